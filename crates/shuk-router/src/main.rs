//! Shuk router
//!
//! Reads object-store notifications (one JSON document per line) from stdin
//! and routes them: generic uploads fan out to the metadata queue and the
//! optional backup copier, special uploads go to the conversion worker.
//!
//! Run with: SHUK_BUCKET_SCOPE=videos SHUK_CONVERT_URL=http://localhost:9000/convert shuk-router

use anyhow::Context;
use shuk_dispatch::{Dispatcher, HttpDispatchTarget, HttpSubscriber, RetryConfig, TracingDeadLetterSink};
use shuk_events::{MemoryTopic, MemoryWorkQueue, QueueConfig, QueueSubscriber, Topic, WorkQueue};
use shuk_router::{EventSource, Pipeline, RouteTarget, RoutingConfig};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

fn env_secs(key: &str, default: u64) -> anyhow::Result<Duration> {
    match std::env::var(key) {
        Ok(raw) => Ok(Duration::from_secs(
            raw.trim().parse().with_context(|| format!("{} must be a number of seconds", key))?,
        )),
        Err(_) => Ok(Duration::from_secs(default)),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let router = RoutingConfig::from_env()
        .context("Failed to load routing config. Set SHUK_BUCKET_SCOPE")?
        .into_router()
        .context("Invalid routing config")?;

    let mut builder = Pipeline::builder(router.clone());
    let queue = Arc::new(MemoryWorkQueue::with_config(
        "metadata-queue",
        QueueConfig {
            visibility_timeout: env_secs("SHUK_QUEUE_VISIBILITY_SECS", 30)?,
            ..QueueConfig::default()
        },
    ));

    let mut wired = HashSet::new();
    for route in router.routes() {
        if !wired.insert((route.target.is_dispatch(), route.target.name().to_string())) {
            continue;
        }
        match &route.target {
            RouteTarget::Topic { topic } => {
                let topic = Arc::new(MemoryTopic::new(topic.clone()));
                topic
                    .register_subscriber(Arc::new(QueueSubscriber::new(queue.clone())))
                    .await?;
                if let Ok(url) = std::env::var("SHUK_BACKUP_URL") {
                    let backup = HttpSubscriber::new("backup", url, HTTP_TIMEOUT)?;
                    topic.register_subscriber(Arc::new(backup)).await?;
                }
                builder = builder.topic(topic);
            }
            RouteTarget::Dispatch { target, .. } => {
                let url = std::env::var("SHUK_CONVERT_URL")
                    .context("SHUK_CONVERT_URL is required for dispatch routes")?;
                let target = HttpDispatchTarget::new(target.clone(), url, HTTP_TIMEOUT)?;
                let backoff = RetryConfig {
                    jitter: true,
                    ..RetryConfig::default()
                };
                builder = builder.dispatcher(Arc::new(Dispatcher::new(
                    Arc::new(target),
                    backoff,
                    Arc::new(TracingDeadLetterSink),
                )));
            }
        }
    }

    let pipeline = Arc::new(builder.build().context("Failed to wire pipeline")?);
    tracing::info!(pipeline = ?pipeline, "Shuk router ready");

    let (tx, rx) = mpsc::channel(256);
    let reader = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            if tx.send(line).await.is_err() {
                break;
            }
        }
        Ok::<_, std::io::Error>(())
    });

    let stats = EventSource::new(pipeline).run(rx).await;
    reader.await?.context("Failed to read notifications from stdin")?;

    // Topic deliveries run on their own tasks
    tokio::time::sleep(env_secs("SHUK_DRAIN_SECS", 1)?).await;

    let depth = queue.depth().await?;
    tracing::info!(
        stats = ?stats,
        queue_visible = depth.visible,
        queue_in_flight = depth.in_flight,
        "Shuk router finished"
    );

    Ok(())
}
