//! Push-event routing and the speaking tracker.

use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
    time::Duration,
};

use voicelink_shared::time::{Clock, SystemClock};

use crate::protocol::RpcMessage;

/// How long a user counts as speaking after the last `SPEAKING_START`.
pub const DEFAULT_SPEAKING_EXPIRY: Duration = Duration::from_secs(2);

/// Event names the session understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    SpeakingStart,
    SpeakingStop,
    VoiceSettingsUpdate,
    VoiceChannelSelect,
    VoiceStateCreate,
    VoiceStateUpdate,
    VoiceStateDelete,
}

impl EventKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "SPEAKING_START" => Some(EventKind::SpeakingStart),
            "SPEAKING_STOP" => Some(EventKind::SpeakingStop),
            "VOICE_SETTINGS_UPDATE" => Some(EventKind::VoiceSettingsUpdate),
            "VOICE_CHANNEL_SELECT" => Some(EventKind::VoiceChannelSelect),
            "VOICE_STATE_CREATE" => Some(EventKind::VoiceStateCreate),
            "VOICE_STATE_UPDATE" => Some(EventKind::VoiceStateUpdate),
            "VOICE_STATE_DELETE" => Some(EventKind::VoiceStateDelete),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::SpeakingStart => "SPEAKING_START",
            EventKind::SpeakingStop => "SPEAKING_STOP",
            EventKind::VoiceSettingsUpdate => "VOICE_SETTINGS_UPDATE",
            EventKind::VoiceChannelSelect => "VOICE_CHANNEL_SELECT",
            EventKind::VoiceStateCreate => "VOICE_STATE_CREATE",
            EventKind::VoiceStateUpdate => "VOICE_STATE_UPDATE",
            EventKind::VoiceStateDelete => "VOICE_STATE_DELETE",
        }
    }

    /// Events after which the channel member list should be refreshed
    pub fn affects_membership(self) -> bool {
        matches!(
            self,
            EventKind::VoiceChannelSelect
                | EventKind::VoiceStateCreate
                | EventKind::VoiceStateUpdate
                | EventKind::VoiceStateDelete
        )
    }
}

/// Time-windowed set of currently speaking users.
///
/// Entries older than the expiry window are logically absent; every read
/// evicts them, there is no separate timer.
pub struct SpeakingTracker {
    expiry: Duration,
    clock: Arc<dyn Clock>,
    /// user_id -> last SPEAKING_START (Unix millis)
    last_seen: HashMap<String, i64>,
}

impl SpeakingTracker {
    pub fn new() -> Self {
        Self::with_clock(DEFAULT_SPEAKING_EXPIRY, Arc::new(SystemClock))
    }

    pub fn with_clock(expiry: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            expiry,
            clock,
            last_seen: HashMap::new(),
        }
    }

    pub fn mark_speaking(&mut self, user_id: &str) {
        let now = self.clock.now_millis();
        self.last_seen.insert(user_id.to_string(), now);
    }

    /// Removes immediately, regardless of age.
    pub fn mark_stopped(&mut self, user_id: &str) {
        self.last_seen.remove(user_id);
    }

    pub fn is_speaking(&mut self, user_id: &str) -> bool {
        self.evict_expired();
        self.last_seen.contains_key(user_id)
    }

    pub fn list_speaking(&mut self) -> BTreeSet<String> {
        self.evict_expired();
        self.last_seen.keys().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.last_seen.clear();
    }

    fn evict_expired(&mut self) {
        let now = self.clock.now_millis();
        let window = self.expiry.as_millis() as i64;
        self.last_seen.retain(|_, seen| now - *seen < window);
    }
}

impl Default for SpeakingTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply a push event to the tracker and report what kind it was.
///
/// Unrecognized events return `None`; the caller still owns the raw message.
pub fn route_event(message: &RpcMessage, tracker: &mut SpeakingTracker) -> Option<EventKind> {
    let kind = EventKind::from_name(message.evt()?)?;

    match kind {
        EventKind::SpeakingStart => {
            if let Some(user_id) = message.data_str("user_id") {
                tracker.mark_speaking(user_id);
                tracing::debug!("User {} started speaking", user_id);
            }
        }
        EventKind::SpeakingStop => {
            if let Some(user_id) = message.data_str("user_id") {
                tracker.mark_stopped(user_id);
                tracing::debug!("User {} stopped speaking", user_id);
            }
        }
        _ => {}
    }

    Some(kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use voicelink_shared::time::FixedClock;

    fn tracker_with_clock() -> (SpeakingTracker, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::new(1_000_000));
        let tracker = SpeakingTracker::with_clock(DEFAULT_SPEAKING_EXPIRY, clock.clone());
        (tracker, clock)
    }

    fn event(evt: &str, user_id: &str) -> RpcMessage {
        RpcMessage::from_value(json!({
            "cmd": "DISPATCH",
            "evt": evt,
            "data": {"user_id": user_id, "channel_id": "c1"}
        }))
        .unwrap()
    }

    #[test]
    fn test_mark_speaking_is_visible_immediately() {
        // テスト項目: mark_speaking 直後は speaking と判定される
        // given (前提条件):
        let (mut tracker, _clock) = tracker_with_clock();

        // when (操作):
        tracker.mark_speaking("alice");

        // then (期待する結果):
        assert!(tracker.is_speaking("alice"));
        assert!(tracker.list_speaking().contains("alice"));
    }

    #[test]
    fn test_entry_expires_after_window() {
        // テスト項目: 更新が無いまま expiry を過ぎると speaking ではなくなる
        // given (前提条件):
        let (mut tracker, clock) = tracker_with_clock();
        tracker.mark_speaking("alice");

        // when (操作):
        clock.advance(2_000);

        // then (期待する結果):
        assert!(!tracker.is_speaking("alice"));
        assert!(tracker.list_speaking().is_empty());
    }

    #[test]
    fn test_renewal_extends_window() {
        // テスト項目: 再度 mark_speaking すると期限が延長される
        // given (前提条件):
        let (mut tracker, clock) = tracker_with_clock();
        tracker.mark_speaking("alice");
        clock.advance(1_500);

        // when (操作):
        tracker.mark_speaking("alice");
        clock.advance(1_500);

        // then (期待する結果):
        assert!(tracker.is_speaking("alice"));
    }

    #[test]
    fn test_mark_stopped_removes_immediately() {
        // テスト項目: mark_stopped は経過時間に関係なく即座に削除する
        // given (前提条件):
        let (mut tracker, _clock) = tracker_with_clock();
        tracker.mark_speaking("alice");
        tracker.mark_speaking("bob");

        // when (操作):
        tracker.mark_stopped("alice");

        // then (期待する結果):
        let speaking = tracker.list_speaking();
        assert_eq!(speaking.len(), 1);
        assert!(speaking.contains("bob"));
    }

    #[test]
    fn test_real_clock_expiry() {
        // テスト項目: 実時間でも期限切れのエントリは除外される
        // given (前提条件):
        let mut tracker =
            SpeakingTracker::with_clock(Duration::from_millis(20), Arc::new(SystemClock));
        tracker.mark_speaking("alice");

        // when (操作):
        std::thread::sleep(Duration::from_millis(40));

        // then (期待する結果):
        assert!(!tracker.is_speaking("alice"));
    }

    #[test]
    fn test_route_event_updates_tracker() {
        // テスト項目: SPEAKING_START / SPEAKING_STOP イベントが tracker に反映される
        // given (前提条件):
        let (mut tracker, _clock) = tracker_with_clock();

        // when (操作):
        let started = route_event(&event("SPEAKING_START", "alice"), &mut tracker);
        let speaking_after_start = tracker.is_speaking("alice");
        let stopped = route_event(&event("SPEAKING_STOP", "alice"), &mut tracker);

        // then (期待する結果):
        assert_eq!(started, Some(EventKind::SpeakingStart));
        assert!(speaking_after_start);
        assert_eq!(stopped, Some(EventKind::SpeakingStop));
        assert!(!tracker.is_speaking("alice"));
    }

    #[test]
    fn test_route_event_recognizes_voice_state_and_ignores_unknown() {
        // テスト項目: voice state 系イベントは認識され、未知のイベントは None になる
        // given (前提条件):
        let (mut tracker, _clock) = tracker_with_clock();

        // when (操作):
        let state = route_event(&event("VOICE_STATE_UPDATE", "bob"), &mut tracker);
        let unknown = route_event(&event("GUILD_STATUS", "bob"), &mut tracker);

        // then (期待する結果):
        assert_eq!(state, Some(EventKind::VoiceStateUpdate));
        assert!(state.unwrap().affects_membership());
        assert_eq!(unknown, None);
        assert!(tracker.list_speaking().is_empty());
    }
}
