//! UseCase 層
//!
//! Domain 層の trait を組み合わせたアプリケーションロジック。

pub mod activity_sync;
pub mod auth;
pub mod voice;

pub use activity_sync::ActivitySync;
pub use auth::AuthFlow;
pub use voice::VoiceController;
