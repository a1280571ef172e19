//! Client configuration.

use std::path::{Path, PathBuf};

/// Application id registered for voicelink.
pub const DEFAULT_CLIENT_ID: &str = "1461502476401381446";

/// Scopes requested by `AUTHORIZE`.
pub const DEFAULT_SCOPES: [&str; 3] = ["rpc", "rpc.voice.read", "rpc.voice.write"];

const APP_DIR_NAME: &str = "voicelink";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub client_id: String,
    pub scopes: Vec<String>,
    /// Holds `settings.json`, the token file and the app registry cache
    pub settings_dir: PathBuf,
    pub game_sync_enabled: bool,
    /// Skips socket discovery when set
    pub socket_path: Option<PathBuf>,
}

impl ClientConfig {
    pub fn new(settings_dir: impl Into<PathBuf>) -> Self {
        Self {
            client_id: DEFAULT_CLIENT_ID.to_string(),
            scopes: DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
            settings_dir: settings_dir.into(),
            game_sync_enabled: true,
            socket_path: None,
        }
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn with_socket_path(mut self, socket_path: Option<PathBuf>) -> Self {
        self.socket_path = socket_path;
        self
    }

    pub fn scope_refs(&self) -> Vec<&str> {
        self.scopes.iter().map(String::as_str).collect()
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(default_settings_dir())
    }
}

/// `$XDG_CONFIG_HOME/voicelink`, else `~/.config/voicelink`, else `./.voicelink`.
pub fn default_settings_dir() -> PathBuf {
    settings_dir_from(
        std::env::var_os("XDG_CONFIG_HOME").map(PathBuf::from),
        std::env::var_os("HOME").map(PathBuf::from),
    )
}

fn settings_dir_from(xdg_config_home: Option<PathBuf>, home: Option<PathBuf>) -> PathBuf {
    match (xdg_config_home, home) {
        (Some(xdg), _) if xdg.is_absolute() => xdg.join(APP_DIR_NAME),
        (_, Some(home)) => home.join(".config").join(APP_DIR_NAME),
        _ => Path::new(".").join(format!(".{APP_DIR_NAME}")),
    }
}
