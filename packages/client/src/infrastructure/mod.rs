//! Infrastructure 層
//!
//! Domain 層の trait を実装する具体的なアダプター（IPC セッション、ファイル、HTTP、/proc）。

pub mod launcher;
pub mod oauth;
pub mod registry;
pub mod session;
pub mod steam;
pub mod store;

pub use launcher::DesktopLauncher;
pub use oauth::{OAuthClient, PkcePair};
pub use registry::{AppDirectory, DetectableAppRegistry, HttpAppDirectory};
pub use session::IpcPresenceConnector;
pub use steam::SteamGameDetector;
pub use store::JsonFileStore;
