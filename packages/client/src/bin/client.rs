//! Command-line front end for voicelink.
//!
//! `logout`, `settings`, `set`, `running`, `installed` and `launch` work
//! without a session. Every
//! other command logs in first (saved token, else the authorization prompt in
//! the voice app) and prints an operation result as JSON. `watch` keeps polling
//! and prints member and game events as JSON lines.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin voicelink -- status
//! cargo run --bin voicelink -- volume output 120
//! cargo run --bin voicelink -- set language '"en"'
//! cargo run --bin voicelink -- --socket /run/user/1000/discord-ipc-0 watch
//! ```

use std::{path::PathBuf, time::Duration};

use clap::{Parser, Subcommand, ValueEnum};

use serde_json::Value;
use voicelink_client::{ClientConfig, OperationResult, VoiceLinkApp, config, domain::SettingsMap};
use voicelink_shared::logger::setup_logger;

const WATCH_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Parser, Debug)]
#[command(name = "voicelink")]
#[command(about = "Control voice chat and game presence from the command line", long_about = None)]
struct Args {
    /// Directory holding settings, token and app cache
    #[arg(short = 'd', long)]
    settings_dir: Option<PathBuf>,

    /// IPC socket to use instead of discovery
    #[arg(short = 's', long)]
    socket: Option<PathBuf>,

    /// OAuth2 application id
    #[arg(short = 'c', long, default_value = config::DEFAULT_CLIENT_ID)]
    client_id: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Log in and show the user
    Login,
    /// Delete the saved token
    Logout,
    /// Connection and user
    Status,
    /// Voice settings and current channel
    State,
    /// Toggle microphone mute
    Mute,
    /// Toggle deafen
    Deafen,
    /// Set input (0-100) or output (0-200) volume
    Volume { target: VolumeTarget, value: u32 },
    /// Set the input mode
    Mode { mode: ModeArg },
    /// Switch to push-to-talk bound to one key
    PttShortcut {
        key_type: u32,
        code: u32,
        name: String,
    },
    /// List servers
    Guilds,
    /// Remember a server for `channels`
    SelectGuild { guild_id: String },
    /// List voice channels of a server
    Channels { guild_id: Option<String> },
    /// Join a voice channel
    Join { channel_id: String },
    /// Leave the voice channel
    Leave,
    /// Set a member's volume (0-200)
    UserVolume { user_id: String, value: u32 },
    /// Locally mute or unmute a member
    MuteUser {
        user_id: String,
        #[arg(value_enum)]
        state: Switch,
    },
    /// Turn game presence sync on or off
    GameSync {
        #[arg(value_enum)]
        state: Switch,
    },
    /// Members who joined or left since the last check
    MembersDiff,
    /// Show settings with defaults filled in
    Settings,
    /// Save one setting; the value is parsed as JSON, else taken as a string
    Set { key: String, value: String },
    /// Full state snapshot
    Sync,
    /// Poll and print events until Ctrl-C
    Watch,
    /// Whether the desktop app is running
    Running,
    /// Whether the desktop app is installed
    Installed,
    /// Start the desktop app
    Launch,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum VolumeTarget {
    Input,
    Output,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    VoiceActivity,
    PushToTalk,
}

impl ModeArg {
    fn as_str(self) -> &'static str {
        match self {
            ModeArg::VoiceActivity => "VOICE_ACTIVITY",
            ModeArg::PushToTalk => "PUSH_TO_TALK",
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Switch {
    On,
    Off,
}

impl Switch {
    fn enabled(self) -> bool {
        matches!(self, Switch::On)
    }
}

fn print_result(result: &OperationResult) {
    match serde_json::to_string_pretty(result) {
        Ok(json) => println!("{json}"),
        Err(e) => tracing::error!("Could not encode result: {}", e),
    }
}

fn print_events(drained: OperationResult) {
    let events = drained
        .data
        .as_ref()
        .and_then(|data| data.get("events"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    for event in events {
        println!("{event}");
    }
}

async fn watch(app: &VoiceLinkApp) {
    let subscribed = app.subscribe_voice_events().await;
    if !subscribed.success {
        tracing::warn!(
            "Voice events unavailable, relying on polling: {}",
            subscribed.message.as_deref().unwrap_or("unknown error")
        );
    }

    let mut ticker = tokio::time::interval(WATCH_INTERVAL);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, shutting down");
                break;
            }
            _ = ticker.tick() => {
                app.pump_session_events().await;
                print_events(app.drain_events());
            }
        }
    }
}

fn setting(key: String, value: &str) -> SettingsMap {
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    SettingsMap::from_iter([(key, value)])
}

async fn run(app: &VoiceLinkApp, command: Command) -> OperationResult {
    match command {
        Command::Logout => return app.logout().await,
        Command::Running => return app.check_running(),
        Command::Installed => return app.check_installed(),
        Command::Launch => return app.launch(),
        Command::Settings => return app.settings(),
        Command::Set { key, value } => return app.save_settings(setting(key, &value)).await,
        _ => {}
    }

    let login = app.login().await;
    if !login.success {
        return login;
    }

    match command {
        Command::Login
        | Command::Logout
        | Command::Settings
        | Command::Set { .. }
        | Command::Running
        | Command::Installed
        | Command::Launch => login,
        Command::Status => app.status().await,
        Command::State => app.voice_state().await,
        Command::Mute => app.toggle_mute().await,
        Command::Deafen => app.toggle_deafen().await,
        Command::Volume {
            target: VolumeTarget::Input,
            value,
        } => app.set_input_volume(value).await,
        Command::Volume {
            target: VolumeTarget::Output,
            value,
        } => app.set_output_volume(value).await,
        Command::Mode { mode } => app.set_voice_mode(mode.as_str()).await,
        Command::PttShortcut {
            key_type,
            code,
            name,
        } => app.set_ptt_shortcut(key_type, code, &name).await,
        Command::Guilds => app.guilds().await,
        Command::SelectGuild { guild_id } => app.select_guild(&guild_id).await,
        Command::Channels { guild_id } => app.channels(guild_id.as_deref()).await,
        Command::Join { channel_id } => app.join(&channel_id).await,
        Command::Leave => app.leave().await,
        Command::UserVolume { user_id, value } => app.set_user_volume(&user_id, value).await,
        Command::MuteUser { user_id, state } => app.mute_user(&user_id, state.enabled()).await,
        Command::GameSync { state } => app.set_game_sync(state.enabled()).await,
        Command::MembersDiff => app.voice_members_diff().await,
        Command::Sync => app.sync_full_state().await,
        Command::Watch => {
            print_result(&login);
            watch(app).await;
            OperationResult::ok()
        }
    }
}

#[tokio::main]
async fn main() {
    setup_logger(env!("CARGO_BIN_NAME"), "info");

    let args = Args::parse();

    let settings_dir = args
        .settings_dir
        .unwrap_or_else(config::default_settings_dir);
    let app = VoiceLinkApp::new(
        ClientConfig::new(settings_dir)
            .with_client_id(args.client_id)
            .with_socket_path(args.socket),
    );

    let result = run(&app, args.command).await;
    app.shutdown().await;

    print_result(&result);
    if !result.success {
        tracing::error!(
            "Command failed: {}",
            result.message.as_deref().unwrap_or("unknown error")
        );
        std::process::exit(1);
    }
}
