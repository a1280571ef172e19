//! Session interfaces the use cases depend on.
//!
//! `voicelink_rpc::Session` implements all of them; tests substitute mocks.

use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde_json::Value;
use voicelink_rpc::{AuthenticatedUser, RpcError, protocol::RpcMessage};

use super::activity::Activity;
use crate::error::ClientError;

/// Request/reply commands over an established session.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CommandSender: Send + Sync {
    async fn send_command(&self, cmd: &str, args: Option<Value>) -> Result<RpcMessage, RpcError>;

    /// Id of the authenticated user, if any
    fn local_user_id(&self) -> Option<String>;
}

/// A session able to publish rich presence.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PresenceSession: Send + Sync {
    /// `None` clears the presence.
    async fn set_presence(&self, activity: Option<Activity>) -> Result<(), ClientError>;

    /// Close the connection; errors are ignored.
    async fn close(&self);
}

/// Opens a new, independent session bound to another application id.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PresenceConnector: Send + Sync {
    async fn open(&self, app_id: &str) -> Result<Arc<dyn PresenceSession>, ClientError>;
}

/// Connection and authentication steps used by the login flow.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RpcAuth: Send + Sync {
    async fn connect(&self) -> Result<(), RpcError>;

    async fn authorize(&self, scopes: &[String], code_challenge: &str) -> Result<String, RpcError>;

    async fn authenticate(&self, access_token: &str) -> Result<AuthenticatedUser, RpcError>;

    async fn disconnect(&self);
}
