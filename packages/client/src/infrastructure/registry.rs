//! Detectable-application registry: remote directory, 24h memory/disk cache
//! and a per-name lookup cache.

use std::{collections::VecDeque, path::PathBuf, sync::Arc, time::Duration};

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use reqwest::header::USER_AGENT;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use voicelink_shared::time::{Clock, timestamp_to_rfc3339};

use crate::{
    domain::{AppRegistry, DetectableApp, match_app},
    error::ClientError,
};

pub const DETECTABLE_APPS_URL: &str = "https://discord.com/api/v10/applications/detectable";
pub const CACHE_FILE: &str = "discord_apps_cache.json";
pub const CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const NAME_CACHE_CAPACITY: usize = 100;
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Source of the full application list.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AppDirectory: Send + Sync {
    async fn fetch_apps(&self) -> Result<Vec<DetectableApp>, ClientError>;
}

pub struct HttpAppDirectory {
    http: reqwest::Client,
    url: String,
}

impl HttpAppDirectory {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            url: DETECTABLE_APPS_URL.to_string(),
        }
    }
}

impl Default for HttpAppDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AppDirectory for HttpAppDirectory {
    async fn fetch_apps(&self) -> Result<Vec<DetectableApp>, ClientError> {
        tracing::info!("Fetching detectable apps from {}", self.url);
        let response = self
            .http
            .get(&self.url)
            .header(USER_AGENT, concat!("voicelink/", env!("CARGO_PKG_VERSION")))
            .timeout(FETCH_TIMEOUT)
            .send()
            .await
            .map_err(|e| ClientError::RegistryUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::RegistryUnavailable(format!(
                "HTTP {}",
                status.as_u16()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::RegistryUnavailable(format!("unreadable app list: {e}")))
    }
}

/// On-disk cache layout.
#[derive(Debug, Serialize, Deserialize)]
struct DiskCache {
    /// Unix seconds
    last_fetch: f64,
    apps: Vec<DetectableApp>,
}

/// Bounded least-recently-used map of game name -> app id (or known miss).
#[derive(Debug)]
struct NameCache {
    capacity: usize,
    entries: VecDeque<(String, Option<String>)>,
}

impl NameCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    fn get(&mut self, name: &str) -> Option<Option<String>> {
        let position = self.entries.iter().position(|(key, _)| key == name)?;
        let entry = self.entries.remove(position)?;
        let value = entry.1.clone();
        self.entries.push_back(entry);
        Some(value)
    }

    fn insert(&mut self, name: &str, app_id: Option<String>) {
        if let Some(position) = self.entries.iter().position(|(key, _)| key == name) {
            self.entries.remove(position);
        } else if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back((name.to_string(), app_id));
    }
}

struct RegistryState {
    apps: Vec<DetectableApp>,
    /// Unix millis of the data in `apps`
    fetched_at: Option<i64>,
    names: NameCache,
}

pub struct DetectableAppRegistry {
    directory: Arc<dyn AppDirectory>,
    cache_path: PathBuf,
    clock: Arc<dyn Clock>,
    state: Mutex<RegistryState>,
}

impl DetectableAppRegistry {
    pub fn new(
        directory: Arc<dyn AppDirectory>,
        settings_dir: impl Into<PathBuf>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            directory,
            cache_path: settings_dir.into().join(CACHE_FILE),
            clock,
            state: Mutex::new(RegistryState {
                apps: Vec::new(),
                fetched_at: None,
                names: NameCache::new(NAME_CACHE_CAPACITY),
            }),
        }
    }

    fn is_fresh(&self, fetched_at: i64) -> bool {
        self.clock.now_millis() - fetched_at < CACHE_TTL.as_millis() as i64
    }

    /// Make sure `state.apps` is usable. Returns false when the directory
    /// could not be reached and whatever was cached (possibly nothing) is used.
    async fn refresh(&self, state: &mut RegistryState) -> bool {
        if let Some(fetched_at) = state.fetched_at
            && self.is_fresh(fetched_at)
        {
            return true;
        }

        let disk = self.read_disk_cache().await;
        if let Some(disk) = &disk {
            let fetched_at = (disk.last_fetch * 1000.0) as i64;
            if self.is_fresh(fetched_at) {
                state.apps = disk.apps.clone();
                state.fetched_at = Some(fetched_at);
                tracing::info!(
                    "Loaded {} apps from disk cache fetched at {}",
                    state.apps.len(),
                    timestamp_to_rfc3339(fetched_at)
                );
                return true;
            }
        }

        match self.directory.fetch_apps().await {
            Ok(apps) => {
                let now = self.clock.now_millis();
                state.apps = apps;
                state.fetched_at = Some(now);
                self.write_disk_cache(now, &state.apps).await;
                true
            }
            Err(e) => {
                if state.apps.is_empty()
                    && let Some(stale) = disk
                {
                    state.apps = stale.apps;
                }
                tracing::warn!("{}; using {} cached apps", e, state.apps.len());
                false
            }
        }
    }

    async fn read_disk_cache(&self) -> Option<DiskCache> {
        let content = tokio::fs::read(&self.cache_path).await.ok()?;
        match serde_json::from_slice(&content) {
            Ok(cache) => Some(cache),
            Err(e) => {
                tracing::warn!("Ignoring unreadable app cache {}: {}", self.cache_path.display(), e);
                None
            }
        }
    }

    async fn write_disk_cache(&self, fetched_at: i64, apps: &[DetectableApp]) {
        let cache = DiskCache {
            last_fetch: fetched_at as f64 / 1000.0,
            apps: apps.to_vec(),
        };
        let result = async {
            if let Some(parent) = self.cache_path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let content = serde_json::to_vec(&cache).map_err(std::io::Error::other)?;
            tokio::fs::write(&self.cache_path, content).await
        }
        .await;

        match result {
            Ok(()) => tracing::info!("Cached {} apps to disk", apps.len()),
            Err(e) => tracing::error!("Failed to write app cache: {}", e),
        }
    }
}

#[async_trait]
impl AppRegistry for DetectableAppRegistry {
    async fn find_app_id(&self, game_name: &str) -> Option<String> {
        let mut state = self.state.lock().await;
        if let Some(cached) = state.names.get(game_name) {
            return cached;
        }

        let available = self.refresh(&mut state).await;
        if state.apps.is_empty() {
            return None;
        }

        let found = match_app(&state.apps, game_name).map(|app| app.id.clone());
        match &found {
            Some(app_id) => tracing::info!("Registered app for {}: {}", game_name, app_id),
            None => tracing::debug!("No registered app for {}", game_name),
        }

        // A miss against a stale list may be a false negative.
        if found.is_some() || available {
            state.names.insert(game_name, found.clone());
        }
        found
    }
}
