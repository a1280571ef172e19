//! UseCase: ログイン（保存済みトークン → OAuth2 PKCE）
//!
//! ## テスト実装の作業記録
//!
//! ### 何をテストしているか
//! - AuthFlow::login() の保存済みトークンによる高速ログインと PKCE へのフォールバック
//! - ログインの二重実行防止
//!
//! ### なぜこのテストが必要か
//! - 無効になったトークンでもユーザー操作で再認証できることを保証
//! - 新しいトークンは再接続・認証に成功したときだけ保存されることを確認
//!
//! ### どのような状況を想定しているか
//! - 正常系：保存済みトークンでのログイン、PKCE でのログイン
//! - 異常系：ユーザーが認可を拒否、トークン交換の失敗
//! - エッジケース：ログイン中の再ログイン要求

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use voicelink_rpc::{AuthenticatedUser, RpcError};

use crate::{
    domain::{RpcAuth, TokenExchanger, TokenStore},
    error::ClientError,
    infrastructure::PkcePair,
};

/// ログイン中フラグを drop 時に戻す
struct InProgress<'a>(&'a AtomicBool);

impl Drop for InProgress<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// 認証のユースケース
pub struct AuthFlow {
    tokens: Arc<dyn TokenStore>,
    exchanger: Arc<dyn TokenExchanger>,
    scopes: Vec<String>,
    in_progress: AtomicBool,
}

impl AuthFlow {
    pub fn new(
        tokens: Arc<dyn TokenStore>,
        exchanger: Arc<dyn TokenExchanger>,
        scopes: Vec<String>,
    ) -> Self {
        Self {
            tokens,
            exchanger,
            scopes,
            in_progress: AtomicBool::new(false),
        }
    }

    /// 接続して認証する
    ///
    /// 保存済みトークンが拒否された場合は PKCE で認可を取り直し、交換したトークンで
    /// 接続し直してから保存する。
    pub async fn login(&self, rpc: &dyn RpcAuth) -> Result<AuthenticatedUser, ClientError> {
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ClientError::AuthInProgress);
        }
        let _in_progress = InProgress(&self.in_progress);

        rpc.connect().await?;

        if let Some(token) = self.tokens.load_token() {
            tracing::info!("Logging in with saved token");
            match rpc.authenticate(&token).await {
                Ok(user) => return Ok(user),
                Err(RpcError::Auth(reason)) => {
                    tracing::warn!("Saved token rejected ({}), starting authorization", reason);
                }
                Err(e) => return Err(e.into()),
            }
        }

        tracing::info!("Starting OAuth2 PKCE authorization");
        let pkce = PkcePair::generate();
        let code = rpc.authorize(&self.scopes, &pkce.challenge).await?;
        let token = self
            .exchanger
            .exchange_code_for_token(&code, &pkce.verifier)
            .await?;

        rpc.disconnect().await;
        rpc.connect().await?;
        let user = rpc.authenticate(&token).await?;

        if let Err(e) = self.tokens.save_token(&token) {
            tracing::error!("Logged in but could not save token: {}", e);
        }
        Ok(user)
    }

    /// 保存済みトークンを削除
    pub fn logout(&self) -> Result<(), ClientError> {
        self.tokens.delete_token()?;
        tracing::info!("Saved token deleted");
        Ok(())
    }

    pub fn is_in_progress(&self) -> bool {
        self.in_progress.load(Ordering::SeqCst)
    }
}
