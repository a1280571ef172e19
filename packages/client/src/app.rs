//! Host-facing facade: one authenticated session shared by the foreground
//! operations, the poller tasks and activity sync.

use std::{
    collections::BTreeSet,
    future::Future,
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};
use voicelink_rpc::{
    AuthenticatedUser, Session, SessionConfig,
    discovery::{EndpointLocator, FixedEndpoint, IpcSocketLocator},
    events::EventKind,
    members::{MemberDiff, MemberTracker},
};
use voicelink_shared::time::{Clock, SystemClock};

use crate::{
    config::ClientConfig,
    domain::{
        AppLauncher, ClientEvent, CurrentGame, Guild, InstallKind, SettingsMap, SettingsStore,
        VoiceChannel, VoiceMode, VoiceSettings,
    },
    error::{ClientError, OperationResult},
    infrastructure::{
        DesktopLauncher, DetectableAppRegistry, HttpAppDirectory, IpcPresenceConnector,
        JsonFileStore, OAuthClient, SteamGameDetector,
    },
    poller::{EventQueue, PollTasks, Poller, PollerConfig},
    usecase::{ActivitySync, AuthFlow, VoiceController},
};

const SELECTED_GUILD_KEY: &str = "selected_guild_id";
const GAME_SYNC_KEY: &str = "game_sync_enabled";

/// Settings reported by [`VoiceLinkApp::settings`], with their defaults.
fn default_settings() -> SettingsMap {
    SettingsMap::from_iter([
        ("notifications_enabled".to_string(), json!(true)),
        ("auto_connect".to_string(), json!(false)),
        ("language".to_string(), json!("pt")),
        ("user_volumes".to_string(), json!({})),
        (GAME_SYNC_KEY.to_string(), json!(true)),
    ])
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Voice settings plus channel, as reported by [`VoiceLinkApp::voice_state`].
#[derive(Debug, Serialize)]
struct VoiceStateView {
    #[serde(flatten)]
    settings: VoiceSettings,
    in_voice: bool,
    channel: Option<VoiceChannel>,
    speaking_users: BTreeSet<String>,
}

#[derive(Debug, Serialize)]
struct FullStateView {
    #[serde(flatten)]
    voice: VoiceStateView,
    guilds: Vec<Guild>,
    selected_guild_id: Option<String>,
    game_sync_enabled: bool,
    current_game: Option<CurrentGame>,
}

/// Poller tasks over the shared controller, tracker and activity sync.
pub struct AppTasks {
    voice: Arc<VoiceController>,
    members: Arc<Mutex<MemberTracker>>,
    activity: Arc<ActivitySync>,
    game_sync: Arc<AtomicBool>,
    events: EventQueue,
}

impl AppTasks {
    pub fn new(
        voice: Arc<VoiceController>,
        members: Arc<Mutex<MemberTracker>>,
        activity: Arc<ActivitySync>,
        game_sync: Arc<AtomicBool>,
        events: EventQueue,
    ) -> Self {
        Self {
            voice,
            members,
            activity,
            game_sync,
            events,
        }
    }

    /// Refresh the channel and diff it against the tracker.
    ///
    /// The first channel seen only primes the tracker, so its members are
    /// never reported as joins.
    pub async fn diff_members(&self) -> Result<MemberDiff, ClientError> {
        let channel = self.voice.get_selected_voice_channel().await?;
        let members = channel.iter().flat_map(VoiceChannel::member_records);

        let mut tracker = lock(&self.members);
        if tracker.should_emit() {
            return Ok(tracker.update_and_diff(members));
        }
        tracker.initialize(members);
        Ok(MemberDiff {
            count: tracker.member_count(),
            ..MemberDiff::default()
        })
    }
}

#[async_trait]
impl PollTasks for AppTasks {
    /// Diff the channel members against the tracker and queue join/leave events.
    ///
    /// An unprimed tracker is primed silently from the first channel seen.
    async fn check_members(&self) -> Result<(), ClientError> {
        let primed = lock(&self.members).should_emit();
        if primed && !self.voice.in_voice() {
            return Ok(());
        }

        let Some(channel) = self.voice.get_selected_voice_channel().await? else {
            if primed {
                tracing::info!("Left the voice channel, resetting member tracking");
                lock(&self.members).reset();
            }
            return Ok(());
        };

        let mut tracker = lock(&self.members);
        if !primed {
            tracker.initialize(channel.member_records());
            tracing::info!(
                "Tracking {} members of {}",
                tracker.member_count(),
                channel.name
            );
            return Ok(());
        }
        let diff = tracker.update_and_diff(channel.member_records());
        drop(tracker);

        for member in diff.joined {
            tracing::info!("{} joined the channel", member.username);
            self.events.push(ClientEvent::joined(member));
        }
        for member in diff.left {
            tracing::info!("{} left the channel", member.username);
            self.events.push(ClientEvent::left(member));
        }
        Ok(())
    }

    async fn sync_game(&self) -> Result<(), ClientError> {
        if self.game_sync.load(Ordering::SeqCst) {
            self.activity.sync().await;
        }
        Ok(())
    }

    /// In a voice channel or playing.
    async fn is_active(&self) -> bool {
        self.voice.in_voice() || self.activity.is_tracking().await
    }
}

pub struct VoiceLinkApp {
    session: Arc<Session>,
    locator: Arc<dyn EndpointLocator>,
    launcher: Arc<dyn AppLauncher>,
    voice: Arc<VoiceController>,
    members: Arc<Mutex<MemberTracker>>,
    activity: Arc<ActivitySync>,
    tasks: Arc<AppTasks>,
    poller: Poller,
    auth: AuthFlow,
    settings: Arc<JsonFileStore>,
    game_sync: Arc<AtomicBool>,
    selected_guild: Mutex<Option<String>>,
}

impl VoiceLinkApp {
    /// Wire everything up. Nothing connects until [`VoiceLinkApp::login`].
    pub fn new(config: ClientConfig) -> Self {
        let locator: Arc<dyn EndpointLocator> = match &config.socket_path {
            Some(path) => Arc::new(FixedEndpoint::new(path)),
            None => Arc::new(IpcSocketLocator::from_env()),
        };
        let session = Arc::new(Session::with_locator(
            config.client_id.clone(),
            SessionConfig::default(),
            locator.clone(),
        ));

        let store = Arc::new(JsonFileStore::new(&config.settings_dir));
        let saved = store.load_settings();
        let game_sync = saved
            .get(GAME_SYNC_KEY)
            .and_then(Value::as_bool)
            .unwrap_or(config.game_sync_enabled);
        let selected_guild = saved
            .get(SELECTED_GUILD_KEY)
            .and_then(Value::as_str)
            .map(str::to_string);

        let events = EventQueue::new();
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let registry = Arc::new(DetectableAppRegistry::new(
            Arc::new(HttpAppDirectory::new()),
            &config.settings_dir,
            clock.clone(),
        ));
        let activity = Arc::new(ActivitySync::new(
            Arc::new(SteamGameDetector::new()),
            registry,
            Arc::new(IpcPresenceConnector::new(
                locator.clone(),
                SessionConfig::default(),
            )),
            session.clone(),
            clock,
            events.clone(),
        ));
        let auth = AuthFlow::new(
            store.clone(),
            Arc::new(OAuthClient::new(config.client_id.clone())),
            config.scopes.clone(),
        );

        let voice = Arc::new(VoiceController::new(session.clone()));
        let members = Arc::new(Mutex::new(MemberTracker::new()));
        let game_sync = Arc::new(AtomicBool::new(game_sync));
        let tasks = Arc::new(AppTasks::new(
            voice.clone(),
            members.clone(),
            activity.clone(),
            game_sync.clone(),
            events.clone(),
        ));

        Self {
            session,
            locator,
            launcher: Arc::new(DesktopLauncher::from_env()),
            voice,
            members,
            activity,
            tasks,
            poller: Poller::new(PollerConfig::default(), events),
            auth,
            settings: store,
            game_sync,
            selected_guild: Mutex::new(selected_guild),
        }
    }

    pub fn with_launcher(mut self, launcher: Arc<dyn AppLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn game_sync_enabled(&self) -> bool {
        self.game_sync.load(Ordering::SeqCst)
    }

    /// Saved token first, then the authorization flow. Starts the poller on success.
    pub async fn login(&self) -> OperationResult {
        match self.auth.login(&*self.session).await {
            Ok(user) => {
                self.start_polling().await;
                OperationResult::ok()
                    .with_message(format!("Connected as {}", user.display_name()))
                    .with_data(&json!({"authenticated": true, "user": user}))
            }
            Err(e) => {
                tracing::error!("Login failed: {}", e);
                e.into()
            }
        }
    }

    pub async fn logout(&self) -> OperationResult {
        self.poller.stop().await;
        let result = self.auth.logout();
        self.session.disconnect().await;
        match result {
            Ok(()) => OperationResult::ok().with_message("Logged out"),
            Err(e) => e.into(),
        }
    }

    pub async fn status(&self) -> OperationResult {
        if !self.session.is_connected() {
            return OperationResult::failure("Not connected").with_data(&json!({
                "connected": false,
                "authenticated": false,
            }));
        }
        let user: Option<AuthenticatedUser> = self.session.user();
        let message = if user.is_some() {
            "Connected"
        } else {
            "Not authenticated"
        };
        OperationResult::ok().with_message(message).with_data(&json!({
            "connected": true,
            "authenticated": user.is_some(),
            "user": user,
        }))
    }

    /// Whether the desktop app exposes an IPC socket right now.
    pub fn check_running(&self) -> OperationResult {
        let socket = self.locator.locate();
        OperationResult::ok().with_data(&json!({
            "running": socket.is_some(),
            "socket": socket.map(|path| path.to_string_lossy().into_owned()),
        }))
    }

    pub fn check_installed(&self) -> OperationResult {
        let installation = self.launcher.installation();
        OperationResult::ok().with_data(&json!({
            "installed": installation.installed(),
            "flatpak": installation.flatpak,
            "native": installation.native,
        }))
    }

    /// Start the desktop app, Flatpak first.
    pub fn launch(&self) -> OperationResult {
        match self.launcher.launch() {
            Ok(kind) => {
                let message = match kind {
                    InstallKind::Flatpak => "Discord launched (Flatpak)",
                    InstallKind::Native => "Discord launched",
                };
                OperationResult::ok()
                    .with_message(message)
                    .with_data(&json!({"install": kind}))
            }
            Err(e) => {
                tracing::warn!("Could not launch the desktop app: {}", e);
                e.into()
            }
        }
    }

    pub async fn voice_state(&self) -> OperationResult {
        self.authorized(self.refresh_voice_state()).await
    }

    pub async fn toggle_mute(&self) -> OperationResult {
        self.authorized(self.voice.toggle_mute()).await
    }

    pub async fn toggle_deafen(&self) -> OperationResult {
        self.authorized(self.voice.toggle_deafen()).await
    }

    pub async fn set_input_volume(&self, volume: u32) -> OperationResult {
        self.authorized(self.voice.set_input_volume(volume)).await
    }

    pub async fn set_output_volume(&self, volume: u32) -> OperationResult {
        self.authorized(self.voice.set_output_volume(volume)).await
    }

    pub async fn set_voice_mode(&self, mode: &str) -> OperationResult {
        self.authorized(async {
            let mode: VoiceMode = mode.parse()?;
            self.voice.set_voice_mode(mode).await
        })
        .await
    }

    pub async fn set_ptt_shortcut(&self, key_type: u32, code: u32, name: &str) -> OperationResult {
        self.authorized(async {
            let shortcut = self.voice.set_ptt_shortcut(key_type, code, name).await?;
            Ok::<_, ClientError>(json!({"shortcut": shortcut}))
        })
        .await
    }

    pub async fn set_noise_suppression(&self, enabled: bool) -> OperationResult {
        self.authorized(self.voice.set_noise_suppression(enabled))
            .await
    }

    pub async fn set_echo_cancellation(&self, enabled: bool) -> OperationResult {
        self.authorized(self.voice.set_echo_cancellation(enabled))
            .await
    }

    pub async fn set_automatic_gain_control(&self, enabled: bool) -> OperationResult {
        self.authorized(self.voice.set_automatic_gain_control(enabled))
            .await
    }

    pub async fn guilds(&self) -> OperationResult {
        self.authorized(async {
            let guilds = self.voice.get_guilds().await?;
            Ok::<_, ClientError>(json!({
                "guilds": guilds,
                "selected_guild_id": self.selected_guild(),
            }))
        })
        .await
    }

    pub async fn select_guild(&self, guild_id: &str) -> OperationResult {
        self.authorized(async {
            self.remember_guild(guild_id)?;
            Ok::<_, ClientError>(json!({"guild_id": guild_id}))
        })
        .await
    }

    /// Voice channels of `guild_id`, else of the selected guild, else of the
    /// guild of the current voice channel.
    pub async fn channels(&self, guild_id: Option<&str>) -> OperationResult {
        self.authorized(async {
            let mut guild_id = guild_id.map(str::to_string).or_else(|| self.selected_guild());
            if guild_id.is_none() {
                guild_id = self
                    .voice
                    .get_selected_voice_channel()
                    .await?
                    .and_then(|channel| channel.guild_id);
            }
            let Some(guild_id) = guild_id else {
                return Err(ClientError::InvalidArgument("No server selected".to_string()));
            };
            let channels = self.voice.get_channels(&guild_id).await?;
            Ok(json!({"guild_id": guild_id, "channels": channels}))
        })
        .await
    }

    pub async fn join(&self, channel_id: &str) -> OperationResult {
        self.authorized(async {
            let channel = self.voice.join(channel_id).await?;
            if let Some(channel) = &channel {
                lock(&self.members).initialize(channel.member_records());
            }
            Ok::<_, ClientError>(channel)
        })
        .await
    }

    pub async fn leave(&self) -> OperationResult {
        self.authorized(async {
            self.voice.leave().await?;
            lock(&self.members).reset();
            Ok::<_, ClientError>(Value::Null)
        })
        .await
    }

    pub async fn set_user_volume(&self, user_id: &str, volume: u32) -> OperationResult {
        self.authorized(async {
            let volume = self.voice.set_user_volume(user_id, volume).await?;
            Ok::<_, ClientError>(json!({"user_id": user_id, "volume": volume}))
        })
        .await
    }

    pub async fn mute_user(&self, user_id: &str, mute: bool) -> OperationResult {
        self.authorized(async {
            let muted = self.voice.mute_user(user_id, mute).await?;
            Ok::<_, ClientError>(json!({"user_id": user_id, "muted": muted}))
        })
        .await
    }

    /// Refresh everything and re-prime the member tracker without emitting events.
    pub async fn sync_full_state(&self) -> OperationResult {
        self.authorized(async {
            let voice = self.refresh_voice_state().await?;
            if let Some(guild_id) = voice.channel.as_ref().and_then(|c| c.guild_id.clone()) {
                self.remember_guild(&guild_id)?;
            }
            match &voice.channel {
                Some(channel) => lock(&self.members).initialize(channel.member_records()),
                None => lock(&self.members).reset(),
            }
            let guilds = self.voice.get_guilds().await?;

            Ok::<_, ClientError>(FullStateView {
                voice,
                guilds,
                selected_guild_id: self.selected_guild(),
                game_sync_enabled: self.game_sync_enabled(),
                current_game: self.activity.current_game().await,
            })
        })
        .await
    }

    /// Members who joined or left since the last check.
    pub async fn voice_members_diff(&self) -> OperationResult {
        self.authorized(async {
            let diff = self.tasks.diff_members().await?;
            Ok::<_, ClientError>(json!({
                "joined": diff.joined,
                "left": diff.left,
                "current_count": diff.count,
            }))
        })
        .await
    }

    /// `{"events": [...]}` with every queued event, oldest first.
    pub fn drain_events(&self) -> OperationResult {
        OperationResult::ok().with_data(&json!({"events": self.poller.drain()}))
    }

    /// Subscribe to speaking and voice state events of the current channel.
    pub async fn subscribe_voice_events(&self) -> OperationResult {
        self.authorized(async {
            let channel = match self.voice.channel() {
                Some(channel) => Some(channel),
                None => self.voice.get_selected_voice_channel().await?,
            };
            let Some(channel) = channel else {
                return Ok::<_, ClientError>(json!({"subscribed": false}));
            };

            self.session.subscribe_speaking_events(&channel.id).await?;
            let args = json!({"channel_id": channel.id});
            for kind in [
                EventKind::VoiceStateCreate,
                EventKind::VoiceStateUpdate,
                EventKind::VoiceStateDelete,
            ] {
                self.session.subscribe(kind.as_str(), Some(args.clone())).await?;
            }
            Ok(json!({"subscribed": true, "channel_id": channel.id}))
        })
        .await
    }

    /// Read every push event already waiting on the session. A membership
    /// change runs the member check right away. Returns the number read.
    pub async fn pump_session_events(&self) -> usize {
        let mut read = 0;
        let mut membership_changed = false;
        loop {
            match self.session.receive_event(Some(Duration::ZERO)).await {
                Ok(Some(message)) => {
                    read += 1;
                    membership_changed |= message
                        .evt()
                        .and_then(EventKind::from_name)
                        .is_some_and(EventKind::affects_membership);
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!("Stopped reading session events: {}", e);
                    break;
                }
            }
        }

        if membership_changed && let Err(e) = self.tasks.check_members().await {
            tracing::warn!("Member check after voice state event failed: {}", e);
        }
        read
    }

    /// Saved settings over their defaults.
    pub fn settings(&self) -> OperationResult {
        let saved = self.settings.load_settings();
        let mut settings = default_settings();
        for (key, value) in settings.iter_mut() {
            if let Some(saved) = saved.get(key) {
                *value = saved.clone();
            }
        }
        OperationResult::ok().with_data(&json!({"settings": settings}))
    }

    /// Merge `partial` into the saved settings and apply the keys the app acts on.
    pub async fn save_settings(&self, partial: SettingsMap) -> OperationResult {
        let game_sync = match partial.get(GAME_SYNC_KEY) {
            None => None,
            Some(Value::Bool(enabled)) => Some(*enabled),
            Some(other) => {
                return ClientError::InvalidArgument(format!(
                    "{GAME_SYNC_KEY} must be true or false, got {other}"
                ))
                .into();
            }
        };
        let selected_guild = partial
            .get(SELECTED_GUILD_KEY)
            .and_then(Value::as_str)
            .map(str::to_string);

        if let Err(e) = self.settings.save_settings(partial) {
            tracing::error!("Failed to save settings: {}", e);
            return e.into();
        }
        if selected_guild.is_some() {
            *lock(&self.selected_guild) = selected_guild;
        }
        if let Some(enabled) = game_sync {
            self.apply_game_sync(enabled).await;
        }
        OperationResult::ok()
    }

    /// Persist the flag. Disabling clears the current presence, enabling syncs now.
    pub async fn set_game_sync(&self, enabled: bool) -> OperationResult {
        let mut partial = SettingsMap::new();
        partial.insert(GAME_SYNC_KEY.to_string(), json!(enabled));
        let saved = self.save_settings(partial).await;
        if !saved.success {
            return saved;
        }
        OperationResult::ok().with_data(&json!({"game_sync_enabled": enabled}))
    }

    /// Start the poller (after login it already runs).
    pub async fn start_polling(&self) -> bool {
        match self.voice.get_selected_voice_channel().await {
            Ok(Some(channel)) => lock(&self.members).initialize(channel.member_records()),
            Ok(None) => tracing::debug!("Not in a voice channel, member tracking waits"),
            Err(e) => tracing::warn!("Could not read the voice channel: {}", e),
        }
        self.poller.start(self.tasks.clone())
    }

    /// Stop polling, drop presence and close the session. Idempotent.
    pub async fn shutdown(&self) {
        self.poller.stop().await;
        self.activity.clear().await;
        self.session.disconnect().await;
    }

    async fn authorized<T, F>(&self, operation: F) -> OperationResult
    where
        T: Serialize,
        F: Future<Output = Result<T, ClientError>>,
    {
        if !self.session.is_authenticated() {
            return ClientError::NotAuthenticated.into();
        }
        OperationResult::from_result(operation.await)
    }

    async fn apply_game_sync(&self, enabled: bool) {
        self.game_sync.store(enabled, Ordering::SeqCst);
        if enabled {
            if self.session.is_authenticated() {
                self.activity.sync().await;
            }
        } else {
            self.activity.clear().await;
        }
    }

    async fn refresh_voice_state(&self) -> Result<VoiceStateView, ClientError> {
        let settings = self.voice.get_voice_settings().await?;
        let channel = self.voice.get_selected_voice_channel().await?;
        Ok(VoiceStateView {
            settings,
            in_voice: channel.is_some(),
            channel,
            speaking_users: self.session.speaking_users(),
        })
    }

    fn selected_guild(&self) -> Option<String> {
        lock(&self.selected_guild).clone()
    }

    fn remember_guild(&self, guild_id: &str) -> Result<(), ClientError> {
        let mut partial = SettingsMap::new();
        partial.insert(SELECTED_GUILD_KEY.to_string(), json!(guild_id));
        self.settings.save_settings(partial)?;
        *lock(&self.selected_guild) = Some(guild_id.to_string());
        Ok(())
    }
}
