//! Utilities shared by the voicelink crates.

pub mod logger;
pub mod time;
