//! JSON payload shapes carried inside frames.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RpcError;

/// `cmd` value of push events and of the handshake reply.
pub const DISPATCH: &str = "DISPATCH";
/// `evt` value of the handshake reply.
pub const READY: &str = "READY";
/// `evt` value of a rejected command.
pub const ERROR_EVENT: &str = "ERROR";

/// Payload of the `HANDSHAKE` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    pub v: u32,
    pub client_id: String,
}

impl Handshake {
    pub const VERSION: u32 = 1;

    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            v: Self::VERSION,
            client_id: client_id.into(),
        }
    }
}

/// Outgoing command: `{cmd, nonce, evt?, args?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandPayload {
    pub cmd: String,
    pub nonce: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
}

impl CommandPayload {
    pub fn new(cmd: impl Into<String>, nonce: impl Into<String>, args: Option<Value>) -> Self {
        Self {
            cmd: cmd.into(),
            nonce: nonce.into(),
            evt: None,
            args,
        }
    }

    /// Attach an event name (used by `SUBSCRIBE`).
    pub fn with_event(mut self, evt: impl Into<String>) -> Self {
        self.evt = Some(evt.into());
        self
    }
}

/// Incoming reply or push event: `{cmd?, evt?, nonce?, data?, error?}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RpcMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl RpcMessage {
    /// Interpret a decoded payload. Anything that is not a JSON object is a protocol error.
    pub fn from_value(value: Value) -> Result<Self, RpcError> {
        if !value.is_object() {
            return Err(RpcError::Protocol(format!(
                "expected JSON object payload, got {value}"
            )));
        }
        serde_json::from_value(value).map_err(|e| RpcError::Protocol(e.to_string()))
    }

    pub fn cmd(&self) -> Option<&str> {
        self.cmd.as_deref()
    }

    pub fn evt(&self) -> Option<&str> {
        self.evt.as_deref()
    }

    pub fn nonce(&self) -> Option<&str> {
        self.nonce.as_deref()
    }

    /// `DISPATCH` frame (push event or handshake reply)
    pub fn is_dispatch(&self) -> bool {
        self.cmd() == Some(DISPATCH)
    }

    /// `DISPATCH/READY` handshake reply
    pub fn is_ready(&self) -> bool {
        self.is_dispatch() && self.evt() == Some(READY)
    }

    /// Unsolicited push event (no correlation nonce)
    pub fn is_push_event(&self) -> bool {
        self.is_dispatch() && self.nonce.is_none()
    }

    /// Whether the peer rejected the command
    pub fn is_error(&self) -> bool {
        self.evt() == Some(ERROR_EVENT) || self.error.is_some()
    }

    /// `(code, message)` of a rejected command
    pub fn error_detail(&self) -> Option<(i64, String)> {
        if !self.is_error() {
            return None;
        }
        let source = self.error.as_ref().or(self.data.as_ref());
        let code = source
            .and_then(|v| v.get("code"))
            .and_then(Value::as_i64)
            .unwrap_or(0);
        let message = source
            .and_then(|v| v.get("message"))
            .and_then(Value::as_str)
            .unwrap_or("Unknown error")
            .to_string();
        Some((code, message))
    }

    /// Turn an `ERROR` reply into [`RpcError::Command`]
    pub fn into_result(self) -> Result<Self, RpcError> {
        match self.error_detail() {
            Some((code, message)) => Err(RpcError::Command { code, message }),
            None => Ok(self),
        }
    }

    /// String field of `data`
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.as_ref()?.get(key)?.as_str()
    }
}
