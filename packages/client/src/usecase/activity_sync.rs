//! UseCase: ゲームとリッチプレゼンスの同期
//!
//! ## テスト実装の作業記録
//!
//! ### 何をテストしているか
//! - ActivitySync::sync() のゲーム開始・切り替え・終了の判定
//! - 公式 app id の専用セッションと、メインセッションへのフォールバック
//!
//! ### なぜこのテストが必要か
//! - 専用セッションに成功したときだけメイン側のプレゼンスを消す（二重表示を防ぐ）
//! - どの段階で失敗しても、メインセッションに必ずプレゼンスが設定される
//! - 失敗した専用セッションが開いたまま残らない
//!
//! ### どのような状況を想定しているか
//! - 正常系：公式 app id での表示、同じゲームが続く場合は何もしない
//! - 異常系：専用セッションの接続失敗・コマンド失敗
//! - エッジケース：別のゲームへの切り替え、ゲーム終了

use std::sync::Arc;

use tokio::sync::Mutex;
use voicelink_shared::time::Clock;

use crate::{
    domain::{
        Activity, AppRegistry, ClientEvent, CurrentGame, DetectedGame, GameDetector,
        PresenceConnector, PresenceSession,
    },
    poller::EventQueue,
};

/// 追跡中のゲームと、専用セッション（公式 app id で開いたもの）
struct GameActivity {
    game: CurrentGame,
    bound: Option<Arc<dyn PresenceSession>>,
}

/// 実行中のゲームをプレゼンスに反映するユースケース
pub struct ActivitySync {
    detector: Arc<dyn GameDetector>,
    registry: Arc<dyn AppRegistry>,
    connector: Arc<dyn PresenceConnector>,
    /// メインセッション（フォールバック先）
    main: Arc<dyn PresenceSession>,
    clock: Arc<dyn Clock>,
    events: EventQueue,
    state: Mutex<Option<GameActivity>>,
}

impl ActivitySync {
    pub fn new(
        detector: Arc<dyn GameDetector>,
        registry: Arc<dyn AppRegistry>,
        connector: Arc<dyn PresenceConnector>,
        main: Arc<dyn PresenceSession>,
        clock: Arc<dyn Clock>,
        events: EventQueue,
    ) -> Self {
        Self {
            detector,
            registry,
            connector,
            main,
            clock,
            events,
            state: Mutex::new(None),
        }
    }

    /// 1 回分の同期
    ///
    /// 検出した app id が変わっていれば開始処理、ゲームが消えていれば終了処理を行う。
    /// 失敗はすべてログに残して握りつぶす。
    pub async fn sync(&self) {
        let detected = self.detector.detect_running_game().await;
        let mut state = self.state.lock().await;

        match detected {
            Some(game) if !is_tracked(&state, &game) => self.start_game(&mut state, game).await,
            None if state.is_some() => self.stop_game(&mut state).await,
            _ => {}
        }
    }

    /// 追跡中のゲームを終了扱いにする（専用セッションを閉じ、メインのプレゼンスを消す）
    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        if state.is_some() {
            self.stop_game(&mut state).await;
        }
    }

    pub async fn current_game(&self) -> Option<CurrentGame> {
        self.state
            .lock()
            .await
            .as_ref()
            .map(|activity| activity.game.clone())
    }

    pub async fn is_tracking(&self) -> bool {
        self.state.lock().await.is_some()
    }

    async fn start_game(&self, state: &mut Option<GameActivity>, game: DetectedGame) {
        if let Some(previous) = state.take() {
            self.release(previous).await;
        }

        let started_at = self.clock.now_millis() / 1000;
        tracing::info!("Game started: {} (app {})", game.display_name, game.app_id);

        let registered_id = self.registry.find_app_id(&game.display_name).await;
        let bound = match &registered_id {
            Some(app_id) => {
                let activity = Activity::for_game(&game, started_at, true);
                self.open_registered(app_id, activity).await
            }
            None => None,
        };

        if bound.is_some() {
            self.set_main(None).await;
        } else {
            tracing::info!("Setting presence on the main session");
            self.set_main(Some(Activity::for_game(&game, started_at, false)))
                .await;
        }

        self.events.push(ClientEvent::GameStarted {
            app_id: game.app_id.clone(),
            name: game.display_name.clone(),
        });
        *state = Some(GameActivity {
            game: CurrentGame {
                app_id: game.app_id,
                name: game.display_name,
                started_at,
            },
            bound,
        });
    }

    async fn stop_game(&self, state: &mut Option<GameActivity>) {
        if let Some(activity) = state.take() {
            self.release(activity).await;
        }
        self.set_main(None).await;
    }

    /// 専用セッションを閉じて終了イベントを積む
    async fn release(&self, activity: GameActivity) {
        tracing::info!("Game stopped: {}", activity.game.name);
        if let Some(bound) = activity.bound {
            bound.close().await;
        }
        self.events.push(ClientEvent::GameStopped {
            app_id: activity.game.app_id,
            name: activity.game.name,
        });
    }

    /// 公式 app id で新しいセッションを開き、そこにプレゼンスを設定する
    async fn open_registered(
        &self,
        app_id: &str,
        activity: Activity,
    ) -> Option<Arc<dyn PresenceSession>> {
        tracing::info!("Trying registered app id {}", app_id);
        let session = match self.connector.open(app_id).await {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!("Could not connect as app {}: {}", app_id, e);
                return None;
            }
        };

        match session.set_presence(Some(activity)).await {
            Ok(()) => {
                tracing::info!("Presence set as app {}", app_id);
                Some(session)
            }
            Err(e) => {
                tracing::warn!("Setting presence as app {} failed: {}", app_id, e);
                session.close().await;
                None
            }
        }
    }

    async fn set_main(&self, activity: Option<Activity>) {
        let clearing = activity.is_none();
        if let Err(e) = self.main.set_presence(activity).await {
            if clearing {
                tracing::error!("Clearing main presence failed: {}", e);
            } else {
                tracing::error!("Setting main presence failed: {}", e);
            }
        }
    }
}

fn is_tracked(state: &Option<GameActivity>, game: &DetectedGame) -> bool {
    state
        .as_ref()
        .is_some_and(|activity| activity.game.app_id == game.app_id)
}
