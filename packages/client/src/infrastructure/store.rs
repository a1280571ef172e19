//! JSON file store for the access token and settings.

use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::{
    domain::{SettingsMap, SettingsStore, TokenStore},
    error::ClientError,
};

pub const SETTINGS_FILE: &str = "settings.json";
pub const TOKEN_FILE: &str = "discord_token.json";

#[derive(Serialize, Deserialize)]
struct TokenFile {
    access_token: String,
}

/// `settings.json` and `discord_token.json` under one directory.
///
/// A file that fails to parse is removed and treated as absent.
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn settings_path(&self) -> PathBuf {
        self.dir.join(SETTINGS_FILE)
    }

    fn token_path(&self) -> PathBuf {
        self.dir.join(TOKEN_FILE)
    }

    fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Option<T> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::error!("Failed to read {}: {}", path.display(), e);
                return None;
            }
        };

        match serde_json::from_str(&content) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Corrupted file {} ({}), removing it", path.display(), e);
                if let Err(e) = fs::remove_file(path) {
                    tracing::debug!("Could not remove {}: {}", path.display(), e);
                }
                None
            }
        }
    }

    fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), ClientError> {
        fs::create_dir_all(&self.dir).map_err(ClientError::store)?;
        let content = serde_json::to_string_pretty(value).map_err(ClientError::store)?;
        fs::write(path, content).map_err(ClientError::store)
    }
}

impl TokenStore for JsonFileStore {
    fn load_token(&self) -> Option<String> {
        self.read_json::<TokenFile>(&self.token_path())
            .map(|file| file.access_token)
            .filter(|token| !token.is_empty())
    }

    fn save_token(&self, access_token: &str) -> Result<(), ClientError> {
        let file = TokenFile {
            access_token: access_token.to_string(),
        };
        self.write_json(&self.token_path(), &file)?;
        tracing::info!("Access token saved");
        Ok(())
    }

    fn delete_token(&self) -> Result<(), ClientError> {
        match fs::remove_file(self.token_path()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ClientError::store(e)),
        }
    }
}

impl SettingsStore for JsonFileStore {
    fn load_settings(&self) -> SettingsMap {
        match self.read_json::<Value>(&self.settings_path()) {
            Some(Value::Object(map)) => map,
            Some(_) => {
                tracing::warn!("Settings file is not a JSON object, ignoring it");
                SettingsMap::new()
            }
            None => SettingsMap::new(),
        }
    }

    fn save_settings(&self, partial: SettingsMap) -> Result<(), ClientError> {
        let mut current = self.load_settings();
        current.extend(partial);
        self.write_json(&self.settings_path(), &Value::Object(current))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> SettingsMap {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn test_token_save_load_delete() {
        // テスト項目: トークンを保存・読み込み・削除できる（削除は冪等）
        // given (前提条件):
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested"));

        // when (操作):
        store.save_token("abc").unwrap();
        let loaded = store.load_token();
        store.delete_token().unwrap();

        // then (期待する結果):
        assert_eq!(loaded.as_deref(), Some("abc"));
        assert_eq!(store.load_token(), None);
        assert!(store.delete_token().is_ok());
    }

    #[test]
    fn test_settings_are_merged_on_save() {
        // テスト項目: 設定の保存は置き換えではなくマージになる
        // given (前提条件):
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        store
            .save_settings(map(json!({"selected_guild_id": "g1", "game_sync_enabled": true})))
            .unwrap();

        // when (操作):
        store
            .save_settings(map(json!({"game_sync_enabled": false})))
            .unwrap();

        // then (期待する結果):
        let settings = store.load_settings();
        assert_eq!(settings["selected_guild_id"], "g1");
        assert_eq!(settings["game_sync_enabled"], false);
    }

    #[test]
    fn test_corrupted_token_file_is_removed() {
        // テスト項目: 壊れたトークンファイルは削除され、未保存として扱われる
        // given (前提条件):
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        let path = dir.path().join(TOKEN_FILE);
        fs::write(&path, "{not json").unwrap();

        // when (操作):
        let token = store.load_token();

        // then (期待する結果):
        assert_eq!(token, None);
        assert!(!path.exists());
    }

    #[test]
    fn test_missing_settings_is_empty() {
        // テスト項目: 設定ファイルが無ければ空のマップを返す
        // given (前提条件):
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());

        // when (操作):
        let settings = store.load_settings();

        // then (期待する結果):
        assert!(settings.is_empty());
    }
}
