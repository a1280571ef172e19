//! Steam game detection through `/proc` and library manifests.

use std::{
    collections::HashMap,
    fs,
    path::PathBuf,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;

use crate::domain::{DetectedGame, GameDetector};

const LAUNCH_MARKER: &str = "SteamLaunch";
const APP_ID_KEY: &str = "AppId=";
const IGNORED_PROCESSES: [&str; 2] = ["discord", "flatpak"];
const HEADER_IMAGE_BASE: &str = "https://steamcdn-a.akamaihd.net/steam/apps";
const NAME_CACHE_CAPACITY: usize = 50;

/// Finds the game started by Steam's launch wrapper.
pub struct SteamGameDetector {
    scanner: Arc<Scanner>,
}

struct Scanner {
    proc_root: PathBuf,
    library_dirs: Vec<PathBuf>,
    /// Removable media; each `<media_root>/*/steamapps` is a library
    media_root: PathBuf,
    names: Mutex<HashMap<String, String>>,
}

impl SteamGameDetector {
    /// `/proc`, the user's Steam libraries under `$HOME` and `/run/media`.
    pub fn new() -> Self {
        let home = std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/home/deck"));
        Self::with_paths(
            "/proc",
            vec![
                home.join(".local/share/Steam/steamapps"),
                home.join(".steam/steam/steamapps"),
            ],
            "/run/media",
        )
    }

    pub fn with_paths(
        proc_root: impl Into<PathBuf>,
        library_dirs: Vec<PathBuf>,
        media_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            scanner: Arc::new(Scanner {
                proc_root: proc_root.into(),
                library_dirs,
                media_root: media_root.into(),
                names: Mutex::new(HashMap::new()),
            }),
        }
    }
}

impl Default for SteamGameDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GameDetector for SteamGameDetector {
    async fn detect_running_game(&self) -> Option<DetectedGame> {
        let scanner = self.scanner.clone();
        match tokio::task::spawn_blocking(move || scanner.scan()).await {
            Ok(game) => game,
            Err(e) => {
                tracing::error!("Game detection task failed: {}", e);
                None
            }
        }
    }
}

impl Scanner {
    fn scan(&self) -> Option<DetectedGame> {
        let entries = match fs::read_dir(&self.proc_root) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::error!("Cannot list {}: {}", self.proc_root.display(), e);
                return None;
            }
        };

        let mut pids: Vec<u32> = entries
            .filter_map(|entry| entry.ok()?.file_name().to_str()?.parse().ok())
            .collect();
        pids.sort_unstable();

        pids.into_iter().find_map(|pid| {
            // The process may have exited since the listing.
            let raw = fs::read(self.proc_root.join(pid.to_string()).join("cmdline")).ok()?;
            let cmdline = String::from_utf8_lossy(&raw).replace('\0', " ");
            let app_id = launched_app_id(&cmdline)?;
            tracing::debug!("Steam launch found in pid {}: app {}", pid, app_id);
            Some(self.game(app_id))
        })
    }

    fn game(&self, app_id: String) -> DetectedGame {
        let name = self
            .resolve_name(&app_id)
            .unwrap_or_else(|| format!("Game {app_id}"));
        let image_url = format!("{HEADER_IMAGE_BASE}/{app_id}/header.jpg");
        DetectedGame::new(app_id, name, image_url)
    }

    fn resolve_name(&self, app_id: &str) -> Option<String> {
        if let Some(name) = self.cached_name(app_id) {
            return Some(name);
        }

        let manifest = format!("appmanifest_{app_id}.acf");
        let name = self
            .libraries()
            .iter()
            .filter_map(|dir| fs::read(dir.join(&manifest)).ok())
            .find_map(|content| manifest_name(&String::from_utf8_lossy(&content)))?;

        if let Ok(mut names) = self.names.lock() {
            if names.len() >= NAME_CACHE_CAPACITY {
                names.clear();
            }
            names.insert(app_id.to_string(), name.clone());
        }
        Some(name)
    }

    fn cached_name(&self, app_id: &str) -> Option<String> {
        self.names.lock().ok()?.get(app_id).cloned()
    }

    /// Configured libraries followed by any mounted external ones.
    fn libraries(&self) -> Vec<PathBuf> {
        let mut dirs = self.library_dirs.clone();
        if let Ok(entries) = fs::read_dir(&self.media_root) {
            let mut external: Vec<PathBuf> = entries
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.path().join("steamapps"))
                .filter(|path| path.is_dir())
                .collect();
            external.sort();
            dirs.extend(external);
        }
        dirs
    }
}

/// App id of a Steam-launched game command line, ignoring the voice client's
/// own and sandboxed processes.
fn launched_app_id(cmdline: &str) -> Option<String> {
    let start = cmdline.find(LAUNCH_MARKER)?;
    let lower = cmdline.to_lowercase();
    if IGNORED_PROCESSES.iter().any(|name| lower.contains(name)) {
        return None;
    }

    let mut rest = &cmdline[start + LAUNCH_MARKER.len()..];
    while let Some(pos) = rest.find(APP_ID_KEY) {
        rest = &rest[pos + APP_ID_KEY.len()..];
        let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
        if !digits.is_empty() {
            return Some(digits);
        }
    }
    None
}

/// `"name"` value of an `.acf` manifest.
fn manifest_name(content: &str) -> Option<String> {
    content.lines().find_map(|line| {
        let rest = line.trim().strip_prefix("\"name\"")?;
        if !rest.starts_with(char::is_whitespace) {
            return None;
        }
        let value = rest.trim_start().strip_prefix('"')?;
        let name = &value[..value.find('"')?];
        (!name.is_empty()).then(|| name.to_string())
    })
}
