use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use studymate::error::AppError;
use studymate::notify::{AlarmEvent, ChannelSink, FanoutSink, NoopSink, NotificationSink, WebhookSink};
use studymate::services::{AlarmQueue, Clock, PendingAlarm, ReminderScheduler};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

struct FixedClock(&'static str);

impl Clock for FixedClock {
    fn now_minute(&self) -> String {
        self.0.to_string()
    }

    fn timestamp(&self) -> String {
        format!("2026-01-10T{}:00+00:00", self.0)
    }
}

/// 最初の通知だけ失敗し、以降は受け取ったイベントを転送する
struct FlakySink {
    calls: AtomicUsize,
    tx: mpsc::UnboundedSender<AlarmEvent>,
}

#[async_trait]
impl NotificationSink for FlakySink {
    async fn notify(&self, event: &AlarmEvent) -> Result<(), AppError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(AppError::Notification("first delivery fails".to_string()));
        }
        self.tx
            .send(event.clone())
            .map_err(|_| AppError::Notification("receiver dropped".to_string()))
    }
}

/// 応答を返さない通知先
struct StalledSink;

#[async_trait]
impl NotificationSink for StalledSink {
    async fn notify(&self, _event: &AlarmEvent) -> Result<(), AppError> {
        std::future::pending::<()>().await;
        Ok(())
    }
}

fn alarm(task_id: i64, time: &str) -> PendingAlarm {
    PendingAlarm {
        task_id,
        time: time.to_string(),
        title: format!("task {}", task_id),
    }
}

#[tokio::test]
async fn test_scheduler_fires_alarm_added_while_running() {
    let queue = AlarmQueue::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let scheduler = ReminderScheduler::new(queue.clone(), Arc::new(ChannelSink::new(tx)), 30)
        .with_clock(Arc::new(FixedClock("07:30")))
        .with_interval(Duration::from_millis(10));

    let cancel = CancellationToken::new();
    let task = tokio::spawn(scheduler.start(cancel.clone()));

    queue.schedule(alarm(1, "07:30"));
    queue.schedule(alarm(2, "19:30"));

    let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("alarm did not fire in time")
        .expect("channel closed");
    assert_eq!(event.task_id, 1);
    assert_eq!(event.message(), "Reminder: task 1");

    cancel.cancel();
    let result = tokio::time::timeout(Duration::from_secs(2), task).await;
    assert!(result.is_ok(), "scheduler should stop after cancel");

    assert!(rx.try_recv().is_err());
    assert_eq!(queue.snapshot(), vec![alarm(2, "19:30")]);
}

#[tokio::test]
async fn test_scheduler_stops_on_cancel_during_long_sleep() {
    let scheduler = ReminderScheduler::new(AlarmQueue::new(), Arc::new(NoopSink), 3600);

    let cancel = CancellationToken::new();
    let task = tokio::spawn(scheduler.start(cancel.clone()));

    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    let result = tokio::time::timeout(Duration::from_secs(2), task).await;
    assert!(result.is_ok(), "scheduler should finish after cancel");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_schedule_and_tick_fire_each_due_alarm_once() {
    const PRODUCERS: i64 = 4;
    const PER_PRODUCER: i64 = 250;

    let queue = AlarmQueue::new();
    let (tx, mut rx) = mpsc::unbounded_channel::<AlarmEvent>();
    let scheduler = Arc::new(
        ReminderScheduler::new(queue.clone(), Arc::new(ChannelSink::new(tx)), 30)
            .with_clock(Arc::new(FixedClock("09:05"))),
    );

    let done = Arc::new(AtomicBool::new(false));
    let ticker = {
        let scheduler = scheduler.clone();
        let done = done.clone();
        tokio::spawn(async move {
            while !done.load(Ordering::Acquire) {
                scheduler.tick().await;
                tokio::task::yield_now().await;
            }
        })
    };

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let queue = queue.clone();
            tokio::spawn(async move {
                for i in 0..PER_PRODUCER {
                    let id = p * PER_PRODUCER + i;
                    let time = if id % 2 == 0 { "09:05" } else { "23:59" };
                    queue.schedule(alarm(id, time));
                    if i % 16 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            })
        })
        .collect();

    for producer in producers {
        producer.await.expect("producer panicked");
    }
    done.store(true, Ordering::Release);
    ticker.await.expect("ticker panicked");
    scheduler.tick().await;

    let mut fired: HashMap<i64, usize> = HashMap::new();
    while let Ok(event) = rx.try_recv() {
        *fired.entry(event.task_id).or_default() += 1;
    }

    let total = PRODUCERS * PER_PRODUCER;
    for id in 0..total {
        let count = fired.get(&id).copied().unwrap_or(0);
        if id % 2 == 0 {
            assert_eq!(count, 1, "due alarm {} fired {} times", id, count);
        } else {
            assert_eq!(count, 0, "alarm {} fired before it was due", id);
        }
    }

    let mut remaining: Vec<i64> = queue.snapshot().iter().map(|a| a.task_id).collect();
    remaining.sort();
    let expected: Vec<i64> = (0..total).filter(|id| id % 2 == 1).collect();
    assert_eq!(remaining, expected);
}

#[tokio::test]
async fn test_scheduler_keeps_running_after_a_failed_delivery() {
    let queue = AlarmQueue::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let sink = Arc::new(FlakySink {
        calls: AtomicUsize::new(0),
        tx,
    });
    let scheduler = ReminderScheduler::new(queue.clone(), sink.clone(), 30)
        .with_clock(Arc::new(FixedClock("08:00")))
        .with_interval(Duration::from_millis(10));

    queue.schedule(alarm(1, "08:00"));

    let cancel = CancellationToken::new();
    let task = tokio::spawn(scheduler.start(cancel.clone()));

    // 1 件目の失敗を待ってから次のアラームを登録
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(queue.is_empty());
    queue.schedule(alarm(2, "08:00"));

    let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("second alarm did not fire")
        .expect("channel closed");
    assert_eq!(event.task_id, 2);
    assert_eq!(sink.calls.load(Ordering::SeqCst), 2);

    cancel.cancel();
    let result = tokio::time::timeout(Duration::from_secs(2), task).await;
    assert!(result.is_ok(), "scheduler should stop after cancel");
}

#[tokio::test]
async fn test_scheduler_stops_on_cancel_while_sink_is_stalled() {
    let queue = AlarmQueue::new();
    queue.schedule(alarm(1, "12:00"));

    let scheduler = ReminderScheduler::new(queue.clone(), Arc::new(StalledSink), 30)
        .with_clock(Arc::new(FixedClock("12:00")))
        .with_notify_timeout(Duration::from_secs(3600));

    let cancel = CancellationToken::new();
    let task = tokio::spawn(scheduler.start(cancel.clone()));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(queue.is_empty(), "alarm should have been handed to the sink");
    cancel.cancel();

    let result = tokio::time::timeout(Duration::from_secs(2), task).await;
    assert!(result.is_ok(), "scheduler should finish even though the sink never returns");
}

#[tokio::test]
async fn test_unresponsive_webhook_does_not_block_later_alarms() {
    // 接続は受け付けるが応答を返さないサーバー
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind listener");
    let addr = listener.local_addr().expect("Failed to read addr");
    let server = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let webhook = WebhookSink::new(format!("http://{}/hook", addr), Duration::from_millis(200))
        .expect("Failed to build webhook sink");
    let (tx, mut rx) = mpsc::unbounded_channel();
    let sink = FanoutSink::new(vec![Arc::new(webhook), Arc::new(ChannelSink::new(tx))]);

    let queue = AlarmQueue::new();
    let scheduler = ReminderScheduler::new(queue.clone(), Arc::new(sink), 30)
        .with_clock(Arc::new(FixedClock("21:15")))
        .with_interval(Duration::from_millis(50));

    queue.schedule(alarm(1, "21:15"));
    let cancel = CancellationToken::new();
    let task = tokio::spawn(scheduler.start(cancel.clone()));

    tokio::time::sleep(Duration::from_millis(200)).await;
    queue.schedule(alarm(2, "21:15"));

    let mut fired = Vec::new();
    while fired.len() < 2 {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("alarm did not fire in time")
            .expect("channel closed");
        fired.push(event.task_id);
    }
    assert_eq!(fired, vec![1, 2]);
    assert!(queue.is_empty());

    cancel.cancel();
    let result = tokio::time::timeout(Duration::from_secs(5), task).await;
    assert!(result.is_ok(), "scheduler should stop after cancel");

    server.abort();
}
