//! Domain 層
//!
//! ユースケースが扱う値オブジェクトと、Infrastructure 層が実装する trait を定義します。

pub mod activity;
pub mod event;
pub mod game;
pub mod launcher;
pub mod registry;
pub mod rpc;
pub mod store;
pub mod voice;

pub use activity::{Activity, ActivityAssets, ActivityTimestamps};
pub use event::ClientEvent;
pub use game::{CurrentGame, DetectedGame, GameDetector};
pub use launcher::{AppLauncher, InstallKind, Installation};
pub use registry::{AppRegistry, DetectableApp, match_app};
pub use rpc::{CommandSender, PresenceConnector, PresenceSession, RpcAuth};
pub use store::{SettingsMap, SettingsStore, TokenExchanger, TokenStore};
pub use voice::{ChannelSummary, Guild, VoiceChannel, VoiceMember, VoiceMode, VoiceSettings};
