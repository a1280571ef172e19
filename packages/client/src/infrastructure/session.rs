//! Domain interfaces implemented on top of `voicelink_rpc::Session`.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use voicelink_rpc::{
    AuthenticatedUser, RpcError, Session, SessionConfig, discovery::EndpointLocator,
    protocol::RpcMessage,
};

use crate::{
    domain::{Activity, CommandSender, PresenceConnector, PresenceSession, RpcAuth},
    error::ClientError,
};

#[async_trait]
impl CommandSender for Session {
    async fn send_command(&self, cmd: &str, args: Option<Value>) -> Result<RpcMessage, RpcError> {
        Session::send_command(self, cmd, args).await
    }

    fn local_user_id(&self) -> Option<String> {
        self.user().map(|user| user.id)
    }
}

#[async_trait]
impl PresenceSession for Session {
    async fn set_presence(&self, activity: Option<Activity>) -> Result<(), ClientError> {
        let activity = activity
            .map(|activity| serde_json::to_value(&activity))
            .transpose()
            .map_err(|e| ClientError::InvalidArgument(format!("activity payload: {e}")))?;
        Session::set_activity(self, std::process::id(), activity).await?;
        Ok(())
    }

    async fn close(&self) {
        self.disconnect().await;
    }
}

#[async_trait]
impl RpcAuth for Session {
    async fn connect(&self) -> Result<(), RpcError> {
        Session::connect(self).await
    }

    async fn authorize(&self, scopes: &[String], code_challenge: &str) -> Result<String, RpcError> {
        let scopes: Vec<&str> = scopes.iter().map(String::as_str).collect();
        Session::authorize(self, &scopes, Some(code_challenge)).await
    }

    async fn authenticate(&self, access_token: &str) -> Result<AuthenticatedUser, RpcError> {
        Session::authenticate(self, access_token).await
    }

    async fn disconnect(&self) {
        Session::disconnect(self).await;
    }
}

/// Opens a second IPC session under a registered game's application id.
pub struct IpcPresenceConnector {
    locator: Arc<dyn EndpointLocator>,
    config: SessionConfig,
}

impl IpcPresenceConnector {
    pub fn new(locator: Arc<dyn EndpointLocator>, config: SessionConfig) -> Self {
        Self { locator, config }
    }
}

#[async_trait]
impl PresenceConnector for IpcPresenceConnector {
    async fn open(&self, app_id: &str) -> Result<Arc<dyn PresenceSession>, ClientError> {
        let session = Session::with_locator(app_id, self.config.clone(), self.locator.clone());
        session.connect().await?;
        Ok(Arc::new(session))
    }
}
