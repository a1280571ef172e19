//! Events published to the host through the poller queue.

use serde::Serialize;
use voicelink_rpc::members::MemberRecord;

/// Serialized as `{"type": "VOICE_JOIN", ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientEvent {
    VoiceJoin {
        user_id: String,
        username: String,
        avatar: Option<String>,
    },
    VoiceLeave {
        user_id: String,
        username: String,
        avatar: Option<String>,
    },
    GameStarted {
        app_id: String,
        name: String,
    },
    GameStopped {
        app_id: String,
        name: String,
    },
}

impl ClientEvent {
    pub fn joined(member: MemberRecord) -> Self {
        ClientEvent::VoiceJoin {
            user_id: member.user_id,
            username: member.username,
            avatar: member.avatar,
        }
    }

    pub fn left(member: MemberRecord) -> Self {
        ClientEvent::VoiceLeave {
            user_id: member.user_id,
            username: member.username,
            avatar: member.avatar,
        }
    }
}
