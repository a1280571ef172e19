//! Running game detection.

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::Serialize;

/// A game found running on this machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetectedGame {
    pub app_id: String,
    pub display_name: String,
    pub image_url: String,
}

impl DetectedGame {
    pub fn new(
        app_id: impl Into<String>,
        display_name: impl Into<String>,
        image_url: impl Into<String>,
    ) -> Self {
        Self {
            app_id: app_id.into(),
            display_name: display_name.into(),
            image_url: image_url.into(),
        }
    }
}

/// The game currently tracked by activity sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CurrentGame {
    pub app_id: String,
    pub name: String,
    /// Unix seconds
    pub started_at: i64,
}

/// ゲーム検出の抽象化
#[cfg_attr(test, automock)]
#[async_trait]
pub trait GameDetector: Send + Sync {
    /// 実行中のゲームを返す（無ければ None）
    async fn detect_running_game(&self) -> Option<DetectedGame>;
}
