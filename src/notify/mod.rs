pub mod dto;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::AppError;

pub use dto::AlarmEvent;

/// Receives fired alarms. Delivery is fire-and-forget: the scheduler logs a
/// failure and moves on.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, event: &AlarmEvent) -> Result<(), AppError>;
}

/// Logs the reminder and rings the terminal bell.
pub struct LogSink {
    bell: bool,
}

impl LogSink {
    pub fn new(bell: bool) -> Self {
        Self { bell }
    }
}

#[async_trait]
impl NotificationSink for LogSink {
    async fn notify(&self, event: &AlarmEvent) -> Result<(), AppError> {
        info!(task_id = event.task_id, time = %event.time, "{}", event.message());

        if self.bell {
            let mut stdout = tokio::io::stdout();
            stdout
                .write_all(b"\x07")
                .await
                .map_err(|e| AppError::Notification(format!("Failed to ring bell: {}", e)))?;
            stdout
                .flush()
                .await
                .map_err(|e| AppError::Notification(format!("Failed to ring bell: {}", e)))?;
        }
        Ok(())
    }
}

/// Posts each event as JSON to an HTTP endpoint.
pub struct WebhookSink {
    client: Client,
    url: String,
}

impl WebhookSink {
    /// `timeout` bounds the whole request, including waiting for the response.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, AppError> {
        let client = Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build http client: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    async fn notify(&self, event: &AlarmEvent) -> Result<(), AppError> {
        let response = self
            .client
            .post(&self.url)
            .json(event)
            .send()
            .await
            .map_err(|e| AppError::Notification(format!("Webhook request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Notification(format!(
                "Webhook error {}: {}",
                status, body
            )));
        }

        debug!("webhook delivered reminder for task {}", event.task_id);
        Ok(())
    }
}

/// Forwards events into a channel; the receiving half decides how to render them.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<AlarmEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<AlarmEvent>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl NotificationSink for ChannelSink {
    async fn notify(&self, event: &AlarmEvent) -> Result<(), AppError> {
        self.tx
            .send(event.clone())
            .map_err(|_| AppError::Notification("Alarm receiver dropped".to_string()))
    }
}

/// Delivers to every inner sink and reports the first failure.
pub struct FanoutSink {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn NotificationSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl NotificationSink for FanoutSink {
    async fn notify(&self, event: &AlarmEvent) -> Result<(), AppError> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(e) = sink.notify(event).await {
                warn!("notification sink failed: {}", e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

pub struct NoopSink;

#[async_trait]
impl NotificationSink for NoopSink {
    async fn notify(&self, _event: &AlarmEvent) -> Result<(), AppError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(title: &str) -> AlarmEvent {
        AlarmEvent {
            task_id: 1,
            title: title.to_string(),
            time: "09:05".to_string(),
            fired_at: "2026-01-10T09:05:00+09:00".to_string(),
        }
    }

    struct FailingSink;

    #[async_trait]
    impl NotificationSink for FailingSink {
        async fn notify(&self, _event: &AlarmEvent) -> Result<(), AppError> {
            Err(AppError::Notification("boom".to_string()))
        }
    }

    #[tokio::test]
    async fn test_channel_sink_forwards_event() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = ChannelSink::new(tx);

        sink.notify(&event("Quiz")).await.expect("Failed to notify");
        let received = rx.recv().await.expect("No event received");
        assert_eq!(received.title, "Quiz");
        assert_eq!(received.message(), "Reminder: Quiz");
    }

    #[tokio::test]
    async fn test_channel_sink_errors_when_receiver_dropped() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let sink = ChannelSink::new(tx);

        let result = sink.notify(&event("Quiz")).await;
        assert!(matches!(result, Err(AppError::Notification(_))));
    }

    #[tokio::test]
    async fn test_fanout_delivers_past_a_failing_sink() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = FanoutSink::new(vec![
            Arc::new(FailingSink),
            Arc::new(ChannelSink::new(tx)),
        ]);

        let result = sink.notify(&event("Lab report")).await;
        assert!(result.is_err());
        assert_eq!(rx.recv().await.map(|e| e.title), Some("Lab report".to_string()));
    }

    #[tokio::test]
    async fn test_webhook_gives_up_on_unresponsive_endpoint() {
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

        let sink = WebhookSink::new(format!("http://{}/hook", addr), Duration::from_millis(200))
            .expect("Failed to build sink");

        let result = tokio::time::timeout(Duration::from_secs(5), sink.notify(&event("Quiz"))).await;
        let delivery = result.expect("webhook request should time out on its own");
        assert!(matches!(delivery, Err(AppError::Notification(_))));

        server.abort();
    }

    #[tokio::test]
    async fn test_log_sink_without_bell() {
        let sink = LogSink::new(false);
        sink.notify(&event("Quiz")).await.expect("Failed to notify");
    }
}
