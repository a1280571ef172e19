//! Officially registered applications and name matching.

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};

/// One entry of the detectable-application directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectableApp {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

impl DetectableApp {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Find the registered app for `game_name`.
///
/// Case-insensitive exact match wins; otherwise the first entry whose name
/// contains, or is contained in, `game_name`. Entries without a name never match.
pub fn match_app<'a>(apps: &'a [DetectableApp], game_name: &str) -> Option<&'a DetectableApp> {
    let target = game_name.to_lowercase();
    if target.is_empty() {
        return None;
    }

    let named = move || apps.iter().filter(|app| !app.name.is_empty());

    named()
        .find(|app| app.name.to_lowercase() == target)
        .or_else(|| {
            named().find(|app| {
                let name = app.name.to_lowercase();
                target.contains(&name) || name.contains(&target)
            })
        })
}

/// app id 解決の抽象化
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AppRegistry: Send + Sync {
    /// ゲーム名に対応する公式 app id（見つからなければ None）
    async fn find_app_id(&self, game_name: &str) -> Option<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apps() -> Vec<DetectableApp> {
        vec![
            DetectableApp::new("1", "Portal 2 Demo"),
            DetectableApp::new("2", ""),
            DetectableApp::new("3", "Portal 2"),
            DetectableApp::new("4", "Elden Ring"),
        ]
    }

    #[test]
    fn test_exact_match_wins_over_earlier_partial() {
        // テスト項目: 大文字小文字を無視した完全一致が部分一致より優先される
        // given (前提条件):
        let apps = apps();

        // when (操作):
        let found = match_app(&apps, "PORTAL 2");

        // then (期待する結果):
        assert_eq!(found.map(|app| app.id.as_str()), Some("3"));
    }

    #[test]
    fn test_partial_match_in_either_direction() {
        // テスト項目: どちらの方向の部分一致でも最初の候補が選ばれる
        // given (前提条件):
        let apps = apps();

        // when (操作):
        let longer_game_name = match_app(&apps, "ELDEN RING Nightreign");
        let shorter_game_name = match_app(&apps, "Portal");

        // then (期待する結果):
        assert_eq!(longer_game_name.map(|app| app.id.as_str()), Some("4"));
        assert_eq!(shorter_game_name.map(|app| app.id.as_str()), Some("1"));
    }

    #[test]
    fn test_no_match_and_nameless_entries() {
        // テスト項目: 一致が無ければ None、名前の無いエントリは一致しない
        // given (前提条件):
        let apps = apps();

        // when (操作):
        let missing = match_app(&apps, "Hades");
        let empty = match_app(&apps, "");

        // then (期待する結果):
        assert!(missing.is_none());
        assert!(empty.is_none());
    }
}
