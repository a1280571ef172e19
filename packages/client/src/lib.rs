//! voicelink client: drives the voice-chat application's local control
//! surface on top of `voicelink-rpc`.
//!
//! Background polling, game presence sync and the command-line front end all
//! share one authenticated [`voicelink_rpc::Session`].

// layers
pub mod domain;
pub mod infrastructure;
pub mod usecase;

pub mod app;
pub mod config;
pub mod error;
pub mod poller;

pub use app::VoiceLinkApp;
pub use config::ClientConfig;
pub use error::{ClientError, OperationResult};
