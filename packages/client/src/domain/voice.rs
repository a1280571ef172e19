//! Voice settings, channel and guild values read from command replies.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use voicelink_rpc::{
    members::MemberRecord,
    volume::{INPUT_MAX, OUTPUT_MAX, to_perceptual},
};

use crate::error::ClientError;

/// Channel type of voice channels in `GET_CHANNELS` replies.
pub const VOICE_CHANNEL_TYPE: u64 = 2;

const CDN_ICON_BASE: &str = "https://cdn.discordapp.com/icons";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VoiceMode {
    #[default]
    VoiceActivity,
    PushToTalk,
}

impl VoiceMode {
    pub fn as_str(self) -> &'static str {
        match self {
            VoiceMode::VoiceActivity => "VOICE_ACTIVITY",
            VoiceMode::PushToTalk => "PUSH_TO_TALK",
        }
    }
}

impl FromStr for VoiceMode {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "VOICE_ACTIVITY" => Ok(VoiceMode::VoiceActivity),
            "PUSH_TO_TALK" => Ok(VoiceMode::PushToTalk),
            other => Err(ClientError::InvalidArgument(format!(
                "unknown voice mode {other}"
            ))),
        }
    }
}

/// Local voice settings with volumes on the perceptual scale.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoiceSettings {
    pub is_muted: bool,
    pub is_deafened: bool,
    /// 0..=100
    pub input_volume: u32,
    /// 0..=200, above 100 is boost
    pub output_volume: u32,
    pub mode_type: VoiceMode,
    pub noise_suppression: bool,
    pub echo_cancellation: bool,
    pub automatic_gain_control: bool,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            is_muted: false,
            is_deafened: false,
            input_volume: 100,
            output_volume: 100,
            mode_type: VoiceMode::VoiceActivity,
            noise_suppression: true,
            echo_cancellation: true,
            automatic_gain_control: true,
        }
    }
}

impl VoiceSettings {
    /// Read `GET_VOICE_SETTINGS` data. Missing fields keep their defaults.
    pub fn from_reply(data: &Value) -> Self {
        let defaults = Self::default();
        let flag = |key: &str, default: bool| data.get(key).and_then(Value::as_bool).unwrap_or(default);
        let volume = |key: &str, max_value: f64| {
            let amplitude = data
                .get(key)
                .and_then(|device| device.get("volume"))
                .and_then(Value::as_f64)
                .unwrap_or(100.0);
            to_perceptual(amplitude, max_value).round() as u32
        };
        let mode_type = data
            .get("mode")
            .and_then(|mode| mode.get("type"))
            .and_then(Value::as_str)
            .and_then(|mode| mode.parse().ok())
            .unwrap_or_default();

        Self {
            is_muted: flag("mute", defaults.is_muted),
            is_deafened: flag("deaf", defaults.is_deafened),
            input_volume: volume("input", INPUT_MAX),
            output_volume: volume("output", OUTPUT_MAX),
            mode_type,
            noise_suppression: flag("noise_suppression", defaults.noise_suppression),
            echo_cancellation: flag("echo_cancellation", defaults.echo_cancellation),
            automatic_gain_control: flag("automatic_gain_control", defaults.automatic_gain_control),
        }
    }
}

/// One entry of a channel's `voice_states`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoiceMember {
    pub user_id: String,
    pub username: String,
    pub avatar: Option<String>,
    pub mute: bool,
    pub deaf: bool,
    pub volume: f64,
}

impl VoiceMember {
    fn from_voice_state(state: &Value) -> Option<Self> {
        let user = state.get("user")?;
        let user_id = user.get("id").and_then(Value::as_str)?.to_string();
        let either = |a: &str, b: &str| {
            state.get(a).and_then(Value::as_bool).unwrap_or(false)
                || state.get(b).and_then(Value::as_bool).unwrap_or(false)
        };
        Some(Self {
            user_id,
            username: user
                .get("username")
                .and_then(Value::as_str)
                .unwrap_or("User")
                .to_string(),
            avatar: user.get("avatar").and_then(Value::as_str).map(str::to_string),
            mute: either("mute", "self_mute"),
            deaf: either("deaf", "self_deaf"),
            volume: state.get("volume").and_then(Value::as_f64).unwrap_or(100.0),
        })
    }

    pub fn record(&self) -> MemberRecord {
        MemberRecord::new(&self.user_id, &self.username, self.avatar.clone())
    }
}

/// Selected voice channel with its members.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoiceChannel {
    pub id: String,
    pub name: String,
    pub guild_id: Option<String>,
    pub members: Vec<VoiceMember>,
}

impl VoiceChannel {
    /// `None` when the reply carries no channel (not in voice).
    pub fn from_reply(data: &Value) -> Option<Self> {
        let id = data.get("id").and_then(Value::as_str)?.to_string();
        let members = data
            .get("voice_states")
            .and_then(Value::as_array)
            .map(|states| states.iter().filter_map(VoiceMember::from_voice_state).collect())
            .unwrap_or_default();

        Some(Self {
            id,
            name: data
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            guild_id: data.get("guild_id").and_then(Value::as_str).map(str::to_string),
            members,
        })
    }

    pub fn member_records(&self) -> Vec<MemberRecord> {
        self.members.iter().map(VoiceMember::record).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Guild {
    pub id: String,
    pub name: String,
    pub icon_url: Option<String>,
}

impl Guild {
    pub fn from_value(value: &Value) -> Option<Self> {
        let id = value.get("id").and_then(Value::as_str)?.to_string();
        let icon_url = value
            .get("icon")
            .and_then(Value::as_str)
            .filter(|hash| !hash.is_empty())
            .map(|hash| format!("{CDN_ICON_BASE}/{id}/{hash}.png?size=64"));
        Some(Self {
            name: value
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            id,
            icon_url,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelSummary {
    pub id: String,
    pub name: String,
}

impl ChannelSummary {
    /// Voice channels only.
    pub fn voice_from_value(value: &Value) -> Option<Self> {
        if value.get("type").and_then(Value::as_u64) != Some(VOICE_CHANNEL_TYPE) {
            return None;
        }
        Some(Self {
            id: value.get("id").and_then(Value::as_str)?.to_string(),
            name: value
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_voice_settings_converts_amplitudes() {
        // テスト項目: 振幅値は知覚ボリュームに変換され、欠けたフィールドは既定値になる
        // given (前提条件):
        let data = json!({
            "mute": true,
            "input": {"volume": 100.0},
            "output": {"volume": 200.0},
            "mode": {"type": "PUSH_TO_TALK"},
            "noise_suppression": false
        });

        // when (操作):
        let settings = VoiceSettings::from_reply(&data);

        // then (期待する結果):
        assert!(settings.is_muted);
        assert!(!settings.is_deafened);
        assert_eq!(settings.input_volume, 100);
        assert_eq!(settings.output_volume, 200);
        assert_eq!(settings.mode_type, VoiceMode::PushToTalk);
        assert!(!settings.noise_suppression);
        assert!(settings.echo_cancellation);
    }

    #[test]
    fn test_channel_parses_voice_states() {
        // テスト項目: voice_states からメンバー一覧を構築し、self_mute もミュート扱いにする
        // given (前提条件):
        let data = json!({
            "id": "c1",
            "name": "General",
            "guild_id": "g1",
            "voice_states": [
                {"user": {"id": "1", "username": "alice", "avatar": "abc"}, "self_mute": true},
                {"user": {"id": "2"}, "deaf": true, "volume": 150.0},
                {"nick": "no user"}
            ]
        });

        // when (操作):
        let channel = VoiceChannel::from_reply(&data).unwrap();

        // then (期待する結果):
        assert_eq!(channel.members.len(), 2);
        assert!(channel.members[0].mute);
        assert_eq!(channel.members[1].username, "User");
        assert!(channel.members[1].deaf);
        assert_eq!(channel.member_records()[0], MemberRecord::new("1", "alice", Some("abc".to_string())));
    }

    #[test]
    fn test_channel_absent_when_not_in_voice() {
        // テスト項目: id の無い応答は「ボイスチャンネル未参加」とみなす
        // given (前提条件):
        let empty = json!({});

        // when (操作):
        let channel = VoiceChannel::from_reply(&empty);

        // then (期待する結果):
        assert!(channel.is_none());
        assert!(VoiceChannel::from_reply(&Value::Null).is_none());
    }

    #[test]
    fn test_guild_icon_url_and_voice_channel_filter() {
        // テスト項目: ギルドのアイコン URL を組み立て、チャンネルは type 2 のみ残す
        // given (前提条件):
        let guild = json!({"id": "g1", "name": "Home", "icon": "hash"});
        let text = json!({"id": "t1", "name": "chat", "type": 0});
        let voice = json!({"id": "v1", "name": "Lounge", "type": 2});

        // when (操作):
        let guild = Guild::from_value(&guild).unwrap();

        // then (期待する結果):
        assert_eq!(
            guild.icon_url.as_deref(),
            Some("https://cdn.discordapp.com/icons/g1/hash.png?size=64")
        );
        assert!(ChannelSummary::voice_from_value(&text).is_none());
        assert_eq!(ChannelSummary::voice_from_value(&voice).unwrap().name, "Lounge");
    }

    #[test]
    fn test_voice_mode_parse() {
        // テスト項目: 未知のモード名は InvalidArgument になる
        // given (前提条件):
        let known = "PUSH_TO_TALK";

        // when (操作):
        let parsed: Result<VoiceMode, _> = known.parse();
        let unknown: Result<VoiceMode, _> = "WHISPER".parse();

        // then (期待する結果):
        assert_eq!(parsed.unwrap(), VoiceMode::PushToTalk);
        assert!(matches!(unknown, Err(ClientError::InvalidArgument(_))));
    }
}
