use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::notify::{AlarmEvent, NotificationSink};

/// An alarm waiting for the wall clock to reach `time` ("HH:MM").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAlarm {
    pub task_id: i64,
    pub time: String,
    pub title: String,
}

/// Pending alarms shared between request handlers and the scheduler loop.
///
/// Every operation holds the lock for its whole duration and never across an
/// await, so an alarm is either still queued or handed to exactly one caller
/// of [`AlarmQueue::take_due`].
#[derive(Clone, Default)]
pub struct AlarmQueue {
    inner: Arc<Mutex<Vec<PendingAlarm>>>,
}

impl AlarmQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&self, alarm: PendingAlarm) {
        debug!("scheduled alarm for task {} at {}", alarm.task_id, alarm.time);
        self.inner.lock().push(alarm);
    }

    /// Removes and returns every alarm due at `now`.
    pub fn take_due(&self, now: &str) -> Vec<PendingAlarm> {
        let mut alarms = self.inner.lock();
        let mut due = Vec::new();
        alarms.retain(|alarm| {
            if alarm.time == now {
                due.push(alarm.clone());
                false
            } else {
                true
            }
        });
        due
    }

    /// Drops the alarms of the given tasks. Returns how many were removed.
    pub fn retract(&self, task_ids: &[i64]) -> usize {
        let mut alarms = self.inner.lock();
        let before = alarms.len();
        alarms.retain(|alarm| !task_ids.contains(&alarm.task_id));
        before - alarms.len()
    }

    pub fn snapshot(&self) -> Vec<PendingAlarm> {
        self.inner.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

/// Source of the current wall-clock minute.
pub trait Clock: Send + Sync {
    /// Current local time as "HH:MM".
    fn now_minute(&self) -> String;

    /// Timestamp attached to fired events.
    fn timestamp(&self) -> String;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_minute(&self) -> String {
        Local::now().format("%H:%M").to_string()
    }

    fn timestamp(&self) -> String {
        Local::now().to_rfc3339()
    }
}

/// 1 件の通知に待つ最大時間
const DEFAULT_NOTIFY_TIMEOUT_SECS: u64 = 10;

/// リマインダースケジューラー
/// 一定間隔で現在時刻（分単位）と保留中のアラームを照合し、一致したものを通知する
pub struct ReminderScheduler {
    queue: AlarmQueue,
    sink: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    notify_timeout: Duration,
}

impl ReminderScheduler {
    pub fn new(queue: AlarmQueue, sink: Arc<dyn NotificationSink>, interval_secs: u64) -> Self {
        Self {
            queue,
            sink,
            clock: Arc::new(SystemClock),
            interval: Duration::from_secs(interval_secs),
            notify_timeout: Duration::from_secs(DEFAULT_NOTIFY_TIMEOUT_SECS),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_notify_timeout(mut self, timeout: Duration) -> Self {
        self.notify_timeout = timeout;
        self
    }

    /// 1 回分のポーリング：この分に該当するアラームを取り出して通知する
    /// 発火した件数を返す
    pub async fn tick(&self) -> usize {
        let now = self.clock.now_minute();
        let due = self.queue.take_due(&now);
        if due.is_empty() {
            debug!("no alarms due at {}", now);
            return 0;
        }

        let fired_at = self.clock.timestamp();
        for alarm in &due {
            let event = AlarmEvent {
                task_id: alarm.task_id,
                title: alarm.title.clone(),
                time: alarm.time.clone(),
                fired_at: fired_at.clone(),
            };
            // 通知先が応答しなくても次のアラームへ進む
            match tokio::time::timeout(self.notify_timeout, self.sink.notify(&event)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!("Failed to deliver reminder for task {}: {}", alarm.task_id, e);
                }
                Err(_) => {
                    warn!(
                        "Reminder for task {} timed out after {:?}",
                        alarm.task_id, self.notify_timeout
                    );
                }
            }
        }

        info!("fired {} alarm(s) at {}", due.len(), now);
        due.len()
    }

    /// `cancel` が発火するまでポーリングを続ける
    pub async fn start(self, cancel: CancellationToken) {
        info!("Starting reminder scheduler (interval: {:?})", self.interval);

        loop {
            // 通知中でもキャンセルを優先する
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("reminder scheduler stopped");
                    break;
                }
                _ = self.tick() => {}
            }

            // 次のポーリングまで待機
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("reminder scheduler stopped");
                    break;
                }
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}
