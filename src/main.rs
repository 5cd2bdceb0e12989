use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use studymate::api::router;
use studymate::config::Config;
use studymate::db::{self, TaskStore};
use studymate::notify::{FanoutSink, LogSink, NotificationSink, WebhookSink};
use studymate::services::{AlarmQueue, ReminderScheduler, TaskService};
use studymate::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "studymate=debug".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let pool = db::connect(&config.database_url, config.max_connections).await?;
    let alarms = AlarmQueue::new();
    let tasks = TaskService::new(TaskStore::new(pool), alarms.clone());

    if config.reseed_alarms {
        tasks.reseed_alarms().await?;
    }

    let webhook_timeout = Duration::from_secs(config.webhook_timeout_secs);
    let mut sinks: Vec<Arc<dyn NotificationSink>> = vec![Arc::new(LogSink::new(config.bell))];
    if let Some(url) = &config.webhook_url {
        info!("forwarding reminders to {}", url);
        sinks.push(Arc::new(WebhookSink::new(url.clone(), webhook_timeout)?));
    }

    let cancel = CancellationToken::new();

    let scheduler = ReminderScheduler::new(
        alarms,
        Arc::new(FanoutSink::new(sinks)),
        config.poll_interval_secs,
    )
    // Webhook 側のタイムアウトより少し長く待つ
    .with_notify_timeout(webhook_timeout + Duration::from_secs(1));
    let scheduler_task = tokio::spawn(scheduler.start(cancel.child_token()));

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for ctrl-c: {}", e);
            return;
        }
        info!("shutdown requested");
        shutdown.cancel();
    });

    let app = router(AppState { tasks });

    info!("listening on http://{}", config.addr);
    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.clone().cancelled_owned())
        .await?;

    cancel.cancel();
    scheduler_task.await?;

    Ok(())
}
