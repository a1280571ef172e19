//! UseCase: ボイス設定・チャンネル操作
//!
//! ## テスト実装の作業記録
//!
//! ### 何をテストしているか
//! - VoiceController の各コマンド（設定取得・音量・ミュート・チャンネル参加/退出）
//! - 自分自身を対象にしたユーザー操作の読み替え
//!
//! ### なぜこのテストが必要か
//! - 知覚ボリュームと振幅の変換がコマンド引数に正しく反映されることを保証
//! - 失敗したコマンドでキャッシュが書き換わらないことを確認
//!
//! ### どのような状況を想定しているか
//! - 正常系：設定取得、音量変更、ミュート切り替え、プッシュトゥトークのキー設定、参加・退出
//! - 異常系：ERROR 応答
//! - エッジケース：範囲外の音量、自分自身への set_user_volume / mute_user

use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::{Value, json};
use voicelink_rpc::{
    protocol::RpcMessage,
    volume::{INPUT_MAX, OUTPUT_MAX, to_amplitude},
};

use crate::{
    domain::{ChannelSummary, CommandSender, Guild, VoiceChannel, VoiceMode, VoiceSettings},
    error::ClientError,
};

const SET_USER_VOICE_SETTINGS: &str = "SET_USER_VOICE_SETTINGS";
/// Push-to-talk release delay (ms)
const PTT_RELEASE_DELAY: f64 = 100.0;

#[derive(Debug, Default)]
struct VoiceState {
    settings: VoiceSettings,
    channel: Option<VoiceChannel>,
}

/// ボイス操作のユースケース
///
/// 最後に取得した設定とチャンネルをキャッシュする（ポーラーのアクティブ判定に使う）。
pub struct VoiceController {
    rpc: Arc<dyn CommandSender>,
    state: Mutex<VoiceState>,
}

impl VoiceController {
    pub fn new(rpc: Arc<dyn CommandSender>) -> Self {
        Self {
            rpc,
            state: Mutex::new(VoiceState::default()),
        }
    }

    /// 現在の設定を取得してキャッシュを更新
    pub async fn get_voice_settings(&self) -> Result<VoiceSettings, ClientError> {
        let reply = self.command("GET_VOICE_SETTINGS", None).await?;
        let data = reply
            .data
            .ok_or_else(|| ClientError::UnexpectedReply("voice settings without data".to_string()))?;
        let settings = VoiceSettings::from_reply(&data);
        tracing::debug!(
            "Voice settings: input={} output={} muted={} deafened={}",
            settings.input_volume,
            settings.output_volume,
            settings.is_muted,
            settings.is_deafened
        );
        self.lock().settings = settings.clone();
        Ok(settings)
    }

    /// `SET_VOICE_SETTINGS` に `args` をそのまま渡す
    pub async fn set_voice_settings(&self, args: Value) -> Result<Option<Value>, ClientError> {
        let reply = self.command("SET_VOICE_SETTINGS", Some(args)).await?;
        Ok(reply.data)
    }

    /// マイク音量（0〜100）。範囲外は丸める。
    pub async fn set_input_volume(&self, volume: u32) -> Result<u32, ClientError> {
        let volume = volume.min(INPUT_MAX as u32);
        let amplitude = to_amplitude(f64::from(volume), INPUT_MAX);
        tracing::info!("Setting input volume {} (amplitude {:.2})", volume, amplitude);
        self.set_voice_settings(json!({"input": {"volume": amplitude}}))
            .await?;
        self.lock().settings.input_volume = volume;
        Ok(volume)
    }

    /// 出力音量（0〜200、100 超はブースト）
    pub async fn set_output_volume(&self, volume: u32) -> Result<u32, ClientError> {
        let volume = volume.min(OUTPUT_MAX as u32);
        let amplitude = to_amplitude(f64::from(volume), OUTPUT_MAX);
        tracing::info!("Setting output volume {} (amplitude {:.2})", volume, amplitude);
        self.set_voice_settings(json!({"output": {"volume": amplitude}}))
            .await?;
        self.lock().settings.output_volume = volume;
        Ok(volume)
    }

    pub async fn toggle_mute(&self) -> Result<VoiceSettings, ClientError> {
        let current = self.refreshed_settings().await;
        let muted = !current.is_muted;
        self.set_voice_settings(json!({"mute": muted})).await?;

        let mut state = self.lock();
        state.settings.is_muted = muted;
        Ok(state.settings.clone())
    }

    /// 聴覚ミュートを有効にするとマイクもミュートされる
    pub async fn toggle_deafen(&self) -> Result<VoiceSettings, ClientError> {
        let current = self.refreshed_settings().await;
        let deafened = !current.is_deafened;
        self.set_voice_settings(json!({"deaf": deafened})).await?;

        let mut state = self.lock();
        state.settings.is_deafened = deafened;
        if deafened {
            state.settings.is_muted = true;
        }
        Ok(state.settings.clone())
    }

    pub async fn set_voice_mode(&self, mode: VoiceMode) -> Result<VoiceMode, ClientError> {
        self.set_voice_settings(json!({"mode": {"type": mode.as_str()}}))
            .await?;
        self.lock().settings.mode_type = mode;
        Ok(mode)
    }

    /// プッシュトゥトークに切り替え、キーを 1 つ割り当てる
    pub async fn set_ptt_shortcut(
        &self,
        key_type: u32,
        code: u32,
        name: &str,
    ) -> Result<String, ClientError> {
        let mode = VoiceMode::PushToTalk;
        self.set_voice_settings(json!({
            "mode": {
                "type": mode.as_str(),
                "shortcut": [{"type": key_type, "code": code, "name": name}],
                "delay": PTT_RELEASE_DELAY,
            }
        }))
        .await?;
        self.lock().settings.mode_type = mode;
        Ok(name.to_string())
    }

    pub async fn set_noise_suppression(&self, enabled: bool) -> Result<bool, ClientError> {
        self.set_voice_settings(json!({"noise_suppression": enabled}))
            .await?;
        self.lock().settings.noise_suppression = enabled;
        Ok(enabled)
    }

    pub async fn set_echo_cancellation(&self, enabled: bool) -> Result<bool, ClientError> {
        self.set_voice_settings(json!({"echo_cancellation": enabled}))
            .await?;
        self.lock().settings.echo_cancellation = enabled;
        Ok(enabled)
    }

    pub async fn set_automatic_gain_control(&self, enabled: bool) -> Result<bool, ClientError> {
        self.set_voice_settings(json!({"automatic_gain_control": enabled}))
            .await?;
        self.lock().settings.automatic_gain_control = enabled;
        Ok(enabled)
    }

    /// 参加中のボイスチャンネル（未参加なら None）を取得してキャッシュを更新
    pub async fn get_selected_voice_channel(&self) -> Result<Option<VoiceChannel>, ClientError> {
        let reply = self.command("GET_SELECTED_VOICE_CHANNEL", None).await?;
        let channel = reply.data.as_ref().and_then(VoiceChannel::from_reply);
        self.lock().channel = channel.clone();
        Ok(channel)
    }

    /// `None` で退出。`force` は別チャンネル参加中でも移動する。
    pub async fn select_voice_channel(
        &self,
        channel_id: Option<&str>,
        force: bool,
    ) -> Result<(), ClientError> {
        let mut args = json!({"channel_id": channel_id});
        if force && let Some(map) = args.as_object_mut() {
            map.insert("force".to_string(), json!(true));
        }
        self.command("SELECT_VOICE_CHANNEL", Some(args)).await?;
        Ok(())
    }

    /// チャンネルに参加し、参加後の状態を返す
    pub async fn join(&self, channel_id: &str) -> Result<Option<VoiceChannel>, ClientError> {
        self.select_voice_channel(Some(channel_id), true).await?;
        self.get_selected_voice_channel().await
    }

    pub async fn leave(&self) -> Result<(), ClientError> {
        self.select_voice_channel(None, false).await?;
        self.lock().channel = None;
        Ok(())
    }

    pub async fn get_guilds(&self) -> Result<Vec<Guild>, ClientError> {
        let reply = self.command("GET_GUILDS", None).await?;
        Ok(list(&reply, "guilds")
            .iter()
            .filter_map(Guild::from_value)
            .collect())
    }

    /// ボイスチャンネル（type 2）のみ
    pub async fn get_channels(&self, guild_id: &str) -> Result<Vec<ChannelSummary>, ClientError> {
        let reply = self
            .command("GET_CHANNELS", Some(json!({"guild_id": guild_id})))
            .await?;
        Ok(list(&reply, "channels")
            .iter()
            .filter_map(ChannelSummary::voice_from_value)
            .collect())
    }

    /// 他ユーザーの音量（0〜200、ローカルのみ）
    ///
    /// 自分自身が対象なら出力音量の変更に読み替える。
    pub async fn set_user_volume(&self, user_id: &str, volume: u32) -> Result<u32, ClientError> {
        let volume = volume.min(OUTPUT_MAX as u32);
        if self.is_local_user(user_id) {
            tracing::info!("Own volume requested, changing output volume instead");
            return self.set_output_volume(volume).await;
        }

        let amplitude = to_amplitude(f64::from(volume), OUTPUT_MAX).trunc() as i64;
        tracing::info!("Setting volume of {} to {} (amplitude {})", user_id, volume, amplitude);
        self.set_user_voice_settings(json!({"user_id": user_id, "volume": amplitude}))
            .await?;
        Ok(volume)
    }

    /// 他ユーザーのミュート（ローカルのみ）
    ///
    /// 自分自身が対象なら自分のミュート状態を合わせる。
    pub async fn mute_user(&self, user_id: &str, mute: bool) -> Result<bool, ClientError> {
        if self.is_local_user(user_id) {
            if self.settings().is_muted != mute {
                tracing::info!("Own mute requested, toggling mute instead");
                return Ok(self.toggle_mute().await?.is_muted);
            }
            return Ok(mute);
        }

        self.set_user_voice_settings(json!({"user_id": user_id, "mute": mute}))
            .await?;
        Ok(mute)
    }

    pub fn settings(&self) -> VoiceSettings {
        self.lock().settings.clone()
    }

    pub fn channel(&self) -> Option<VoiceChannel> {
        self.lock().channel.clone()
    }

    pub fn in_voice(&self) -> bool {
        self.lock().channel.is_some()
    }

    async fn set_user_voice_settings(&self, args: Value) -> Result<(), ClientError> {
        let reply = self.command(SET_USER_VOICE_SETTINGS, Some(args)).await?;
        if reply.cmd() != Some(SET_USER_VOICE_SETTINGS) {
            return Err(ClientError::UnexpectedReply(format!(
                "{SET_USER_VOICE_SETTINGS} answered with {:?}",
                reply.cmd
            )));
        }
        Ok(())
    }

    /// 取得に失敗した場合はキャッシュを使う
    async fn refreshed_settings(&self) -> VoiceSettings {
        match self.get_voice_settings().await {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!("Could not refresh voice settings: {}", e);
                self.settings()
            }
        }
    }

    async fn command(&self, cmd: &str, args: Option<Value>) -> Result<RpcMessage, ClientError> {
        let reply = self.rpc.send_command(cmd, args).await?.into_result()?;
        Ok(reply)
    }

    fn is_local_user(&self, user_id: &str) -> bool {
        self.rpc.local_user_id().as_deref() == Some(user_id)
    }

    fn lock(&self) -> MutexGuard<'_, VoiceState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn list<'a>(reply: &'a RpcMessage, key: &str) -> &'a [Value] {
    reply
        .data
        .as_ref()
        .and_then(|data| data.get(key))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}
