//! Session engine for the voice-chat application's local IPC control surface.
//!
//! The crate is layered bottom-up:
//! - [`protocol`]: frame codec and JSON payload shapes
//! - [`volume`]: perceptual <-> amplitude volume conversion
//! - [`events`]: speaking tracker and push-event routing
//! - [`members`]: channel membership diffing
//! - [`discovery`]: IPC socket lookup
//! - [`session`]: connect/authenticate state machine and command multiplexing

pub mod discovery;
pub mod error;
pub mod events;
pub mod members;
pub mod protocol;
pub mod session;
pub mod volume;

pub use error::{Result, RpcError};
pub use session::{AuthenticatedUser, Session, SessionConfig};
