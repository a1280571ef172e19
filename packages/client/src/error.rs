//! Error types for the client crate and the uniform operation result.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use voicelink_rpc::RpcError;

/// Client-side errors
#[derive(Debug, Error)]
pub enum ClientError {
    /// Session level failure (transport, protocol, rejected command)
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// Remote app directory could not be fetched
    #[error("App registry unavailable: {0}")]
    RegistryUnavailable(String),

    /// Token or settings file could not be written
    #[error("Store error: {0}")]
    Store(String),

    /// Authorization code exchange failed
    #[error("OAuth error: {0}")]
    OAuth(String),

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Authentication already in progress")]
    AuthInProgress,

    #[error("Discord not found")]
    NotInstalled,

    /// The desktop app could not be started
    #[error("Launch failed: {0}")]
    Launch(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The peer answered with a shape we cannot read
    #[error("Unexpected reply: {0}")]
    UnexpectedReply(String),
}

impl ClientError {
    pub fn store(e: impl std::fmt::Display) -> Self {
        ClientError::Store(e.to_string())
    }
}

/// `{success, message?, data?}` returned by every public operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl OperationResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            message: None,
            data: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            data: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Attach `data`. A value that fails to serialize turns the result into a failure.
    pub fn with_data<T: Serialize>(mut self, data: &T) -> Self {
        match serde_json::to_value(data) {
            Ok(value) => {
                self.data = Some(value);
                self
            }
            Err(e) => Self::failure(format!("Failed to serialize result: {e}")),
        }
    }

    /// Success carrying `value`, or failure carrying the error's message.
    pub fn from_result<T: Serialize>(result: Result<T, ClientError>) -> Self {
        match result {
            Ok(value) => Self::ok().with_data(&value),
            Err(e) => Self::failure(e.to_string()),
        }
    }
}

impl From<ClientError> for OperationResult {
    fn from(e: ClientError) -> Self {
        Self::failure(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_failure_serializes_without_data() {
        // テスト項目: 失敗結果は success=false と message のみを出力する
        // given (前提条件):
        let result = OperationResult::from(ClientError::NotAuthenticated);

        // when (操作):
        let value = serde_json::to_value(&result).unwrap();

        // then (期待する結果):
        assert_eq!(value, json!({"success": false, "message": "Not authenticated"}));
    }

    #[test]
    fn test_from_result_carries_data() {
        // テスト項目: Ok の値は data として保持される
        // given (前提条件):
        let result: Result<Vec<u32>, ClientError> = Ok(vec![1, 2]);

        // when (操作):
        let op = OperationResult::from_result(result);

        // then (期待する結果):
        assert!(op.success);
        assert_eq!(op.data, Some(json!([1, 2])));
    }

    #[test]
    fn test_rpc_error_message_is_kept() {
        // テスト項目: RpcError はメッセージをそのまま失敗理由にする
        // given (前提条件):
        let error = ClientError::from(RpcError::NotConnected);

        // when (操作):
        let op = OperationResult::from(error);

        // then (期待する結果):
        assert!(!op.success);
        assert_eq!(op.message.as_deref(), Some("not connected"));
    }
}
