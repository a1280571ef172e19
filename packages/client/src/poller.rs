//! Background polling loop with an activity-dependent interval.

use std::{
    future::Future,
    panic::AssertUnwindSafe,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use futures_util::FutureExt;
use tokio::{
    sync::{Notify, mpsc},
    task::JoinHandle,
    time::Instant,
};

use crate::{domain::ClientEvent, error::ClientError};

const STOP_TIMEOUT: Duration = Duration::from_secs(5);

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollerConfig {
    /// In a voice channel or playing
    pub active_interval: Duration,
    pub idle_interval: Duration,
    pub min_sleep: Duration,
    /// Sleep after the loop's own bookkeeping failed
    pub error_cooldown: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            active_interval: Duration::from_secs(15),
            idle_interval: Duration::from_secs(60),
            min_sleep: Duration::from_secs(1),
            error_cooldown: Duration::from_secs(20),
        }
    }
}

/// Interval for the current activity minus the time the iteration took,
/// never below `min_sleep`.
pub fn next_sleep(config: &PollerConfig, active: bool, elapsed: Duration) -> Duration {
    let interval = if active {
        config.active_interval
    } else {
        config.idle_interval
    };
    interval.saturating_sub(elapsed).max(config.min_sleep)
}

/// Work run on every iteration.
#[async_trait]
pub trait PollTasks: Send + Sync {
    async fn check_members(&self) -> Result<(), ClientError>;

    async fn sync_game(&self) -> Result<(), ClientError>;

    async fn is_active(&self) -> bool;
}

/// Unbounded multi-producer queue of events for the host.
#[derive(Clone)]
pub struct EventQueue {
    sender: mpsc::UnboundedSender<ClientEvent>,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<ClientEvent>>>,
}

impl EventQueue {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
        }
    }

    pub fn push(&self, event: ClientEvent) {
        tracing::debug!("Queued event: {:?}", event);
        if self.sender.send(event).is_err() {
            tracing::warn!("Event queue closed, dropping event");
        }
    }

    /// Everything queued right now, oldest first. Never blocks on new events.
    pub fn drain(&self) -> Vec<ClientEvent> {
        let mut receiver = lock(&self.receiver);
        let mut events = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            events.push(event);
        }
        events
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Poller {
    config: PollerConfig,
    running: Arc<AtomicBool>,
    /// Replaced on every start so a stale permit never cuts a sleep short
    wake: Mutex<Arc<Notify>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    events: EventQueue,
}

impl Poller {
    pub fn new(config: PollerConfig, events: EventQueue) -> Self {
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
            wake: Mutex::new(Arc::new(Notify::new())),
            handle: Mutex::new(None),
            events,
        }
    }

    /// Spawn the loop. Returns false if it is already running.
    pub fn start(&self, tasks: Arc<dyn PollTasks>) -> bool {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("Poller already running");
            return false;
        }

        let wake = Arc::new(Notify::new());
        *lock(&self.wake) = wake.clone();

        let handle = tokio::spawn(run(
            tasks,
            self.config.clone(),
            self.running.clone(),
            wake,
        ));
        *lock(&self.handle) = Some(handle);
        tracing::info!("Poller started");
        true
    }

    /// Ask the loop to stop and wait for it. Idempotent.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        lock(&self.wake).notify_one();

        let handle = lock(&self.handle).take();
        let Some(handle) = handle else {
            return;
        };

        let abort = handle.abort_handle();
        match tokio::time::timeout(STOP_TIMEOUT, handle).await {
            Ok(_) => tracing::info!("Poller stopped"),
            Err(_) => {
                tracing::warn!("Poller did not stop within {:?}, aborting", STOP_TIMEOUT);
                abort.abort();
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn drain(&self) -> Vec<ClientEvent> {
        self.events.drain()
    }
}

async fn run(
    tasks: Arc<dyn PollTasks>,
    config: PollerConfig,
    running: Arc<AtomicBool>,
    wake: Arc<Notify>,
) {
    while running.load(Ordering::SeqCst) {
        let iteration = async {
            let started = Instant::now();

            guarded("check_members", tasks.check_members()).await;
            guarded("sync_game", tasks.sync_game()).await;

            let active = match AssertUnwindSafe(tasks.is_active()).catch_unwind().await {
                Ok(active) => active,
                Err(_) => {
                    tracing::error!("Activity check panicked, treating as idle");
                    false
                }
            };
            next_sleep(&config, active, started.elapsed())
        };

        let sleep = match AssertUnwindSafe(iteration).catch_unwind().await {
            Ok(sleep) => sleep,
            Err(_) => {
                tracing::error!(
                    "Poller iteration failed, retrying in {:?}",
                    config.error_cooldown
                );
                config.error_cooldown
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(sleep) => {}
            _ = wake.notified() => {}
        }
    }
}

/// Run one poll task; errors and panics are logged and swallowed.
async fn guarded<F>(name: &str, task: F)
where
    F: Future<Output = Result<(), ClientError>>,
{
    match AssertUnwindSafe(task).catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!("Poll task {} failed: {}", name, e),
        Err(_) => tracing::error!("Poll task {} panicked", name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct FakeTasks {
        member_checks: AtomicUsize,
        game_syncs: AtomicUsize,
        active: AtomicBool,
        fail_members: bool,
        panic_activity: bool,
    }

    #[async_trait]
    impl PollTasks for FakeTasks {
        async fn check_members(&self) -> Result<(), ClientError> {
            self.member_checks.fetch_add(1, Ordering::SeqCst);
            if self.fail_members {
                return Err(ClientError::NotAuthenticated);
            }
            Ok(())
        }

        async fn sync_game(&self) -> Result<(), ClientError> {
            self.game_syncs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn is_active(&self) -> bool {
            if self.panic_activity {
                panic!("activity check failed");
            }
            self.active.load(Ordering::SeqCst)
        }
    }

    /// Let the spawned loop run until it parks on its sleep.
    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn test_next_sleep_selects_interval() {
        // テスト項目: アクティブなら 15 秒、アイドルなら 60 秒から経過時間を引き、下限は 1 秒
        // given (前提条件):
        let config = PollerConfig::default();

        // when (操作):
        let active = next_sleep(&config, true, Duration::from_secs(2));
        let idle = next_sleep(&config, false, Duration::from_millis(500));
        let floored = next_sleep(&config, true, Duration::from_secs(30));

        // then (期待する結果):
        assert_eq!(active, Duration::from_secs(13));
        assert_eq!(idle, Duration::from_millis(59_500));
        assert_eq!(floored, Duration::from_secs(1));
    }

    #[test]
    fn test_event_queue_drain_empties_queue() {
        // テスト項目: drain は溜まったイベントを順に返し、キューを空にする
        // given (前提条件):
        let queue = EventQueue::new();
        let producer = queue.clone();
        producer.push(ClientEvent::GameStarted {
            app_id: "1".to_string(),
            name: "Hades".to_string(),
        });
        producer.push(ClientEvent::GameStopped {
            app_id: "1".to_string(),
            name: "Hades".to_string(),
        });

        // when (操作):
        let first = queue.drain();
        let second = queue.drain();

        // then (期待する結果):
        assert_eq!(first.len(), 2);
        assert!(matches!(first[0], ClientEvent::GameStarted { .. }));
        assert!(second.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_active_loop_polls_every_15_seconds() {
        // テスト項目: アクティブ状態では 15 秒ごとに両方のプローブが呼ばれる
        // given (前提条件):
        let tasks = Arc::new(FakeTasks::default());
        tasks.active.store(true, Ordering::SeqCst);
        let poller = Poller::new(PollerConfig::default(), EventQueue::new());

        // when (操作):
        assert!(poller.start(tasks.clone()));
        settle().await;
        tokio::time::sleep(Duration::from_secs(31)).await;
        settle().await;

        // then (期待する結果):
        assert_eq!(tasks.member_checks.load(Ordering::SeqCst), 3);
        assert_eq!(tasks.game_syncs.load(Ordering::SeqCst), 3);
        poller.stop().await;
        assert!(!poller.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_loop_polls_every_60_seconds() {
        // テスト項目: アイドル状態では 60 秒間隔になる
        // given (前提条件):
        let tasks = Arc::new(FakeTasks::default());
        let poller = Poller::new(PollerConfig::default(), EventQueue::new());

        // when (操作):
        poller.start(tasks.clone());
        settle().await;
        tokio::time::sleep(Duration::from_secs(59)).await;
        settle().await;
        let before_interval = tasks.member_checks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(2)).await;
        settle().await;

        // then (期待する結果):
        assert_eq!(before_interval, 1);
        assert_eq!(tasks.member_checks.load(Ordering::SeqCst), 2);
        poller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_failure_does_not_stop_loop() {
        // テスト項目: プローブが失敗してもループは止まらず、次のプローブも実行される
        // given (前提条件):
        let tasks = Arc::new(FakeTasks {
            fail_members: true,
            active: AtomicBool::new(true),
            ..Default::default()
        });
        let poller = Poller::new(PollerConfig::default(), EventQueue::new());

        // when (操作):
        poller.start(tasks.clone());
        settle().await;
        tokio::time::sleep(Duration::from_secs(16)).await;
        settle().await;

        // then (期待する結果):
        assert_eq!(tasks.member_checks.load(Ordering::SeqCst), 2);
        assert_eq!(tasks.game_syncs.load(Ordering::SeqCst), 2);
        assert!(poller.is_running());
        poller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_panic_is_treated_as_idle() {
        // テスト項目: アクティブ判定が panic した場合はアイドル扱いとなり 60 秒間隔で再実行する
        // given (前提条件):
        let tasks = Arc::new(FakeTasks {
            panic_activity: true,
            active: AtomicBool::new(true),
            ..Default::default()
        });
        let poller = Poller::new(PollerConfig::default(), EventQueue::new());

        // when (操作):
        poller.start(tasks.clone());
        settle().await;
        tokio::time::sleep(Duration::from_secs(21)).await;
        settle().await;
        let after_cooldown_window = tasks.member_checks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(38)).await;
        settle().await;
        let before_idle_interval = tasks.member_checks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(2)).await;
        settle().await;

        // then (期待する結果):
        assert_eq!(after_cooldown_window, 1);
        assert_eq!(before_idle_interval, 1);
        assert_eq!(tasks.member_checks.load(Ordering::SeqCst), 2);
        assert!(poller.is_running());
        poller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_and_stop_idempotent() {
        // テスト項目: 二重起動は拒否され、停止は何度呼んでも安全
        // given (前提条件):
        let tasks = Arc::new(FakeTasks::default());
        let poller = Poller::new(PollerConfig::default(), EventQueue::new());

        // when (操作):
        let first = poller.start(tasks.clone());
        let second = poller.start(tasks.clone());
        poller.stop().await;
        poller.stop().await;

        // then (期待する結果):
        assert!(first);
        assert!(!second);
        assert!(!poller.is_running());
        assert!(poller.start(tasks));
        poller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_repeated_stop_keeps_interval() {
        // テスト項目: 停止を重ねた後に再起動しても、最初の待機が飛ばされない
        // given (前提条件):
        let poller = Poller::new(PollerConfig::default(), EventQueue::new());
        poller.start(Arc::new(FakeTasks::default()));
        settle().await;
        poller.stop().await;
        poller.stop().await;
        let tasks = Arc::new(FakeTasks {
            active: AtomicBool::new(true),
            ..Default::default()
        });

        // when (操作):
        assert!(poller.start(tasks.clone()));
        settle().await;
        let right_after_start = tasks.member_checks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(14)).await;
        settle().await;

        // then (期待する結果):
        assert_eq!(right_after_start, 1);
        assert_eq!(tasks.member_checks.load(Ordering::SeqCst), 1);
        poller.stop().await;
    }
}
