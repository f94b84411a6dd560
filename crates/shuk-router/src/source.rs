//! Event source loop
//!
//! Reads raw notifications from a channel, normalizes them and hands each
//! event to the pipeline on its own task. The loop never waits on a
//! downstream target and never stops because of a bad notification.

use crate::pipeline::Pipeline;
use shuk_dispatch::DispatchOutcome;
use shuk_events::{parse_notification, UploadEvent};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};

/// Counters for one run of the source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceStats {
    /// Raw notifications read from the channel
    pub notifications: u64,
    /// Notifications that could not be parsed
    pub malformed: u64,
    /// Events normalized from notifications
    pub events: u64,
    /// Events that matched at least one route
    pub routed: u64,
    /// Events no route matched
    pub unmatched: u64,
    /// Actions that could not be handed to their target
    pub target_failures: u64,
    /// Dispatches the target accepted
    pub dispatches_delivered: u64,
    /// Dispatches that ended in the dead-letter sink
    pub dispatches_failed: u64,
}

/// Per-event result collected from a handling task.
struct EventResult {
    matched: bool,
    target_failures: usize,
    dispatches: Vec<(String, DispatchOutcome)>,
}

/// Drives notifications from a channel through a pipeline.
#[derive(Debug, Clone)]
pub struct EventSource {
    pipeline: Arc<Pipeline>,
}

impl EventSource {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }

    /// Consume notifications until the channel closes.
    ///
    /// Returns once every event taken from the channel has been handled
    /// and its dispatches have finished.
    pub async fn run(&self, mut notifications: mpsc::Receiver<String>) -> SourceStats {
        let mut stats = SourceStats::default();
        let mut tasks = JoinSet::new();

        tracing::info!("Event source started");

        loop {
            tokio::select! {
                Some(result) = tasks.join_next(), if !tasks.is_empty() => {
                    record(&mut stats, result);
                }
                raw = notifications.recv() => match raw {
                    Some(raw) => self.ingest(&raw, &mut tasks, &mut stats),
                    None => break,
                },
            }
        }

        while let Some(result) = tasks.join_next().await {
            record(&mut stats, result);
        }

        tracing::info!(
            notifications = stats.notifications,
            malformed = stats.malformed,
            events = stats.events,
            routed = stats.routed,
            unmatched = stats.unmatched,
            "Event source drained"
        );

        stats
    }

    fn ingest(&self, raw: &str, tasks: &mut JoinSet<EventResult>, stats: &mut SourceStats) {
        stats.notifications += 1;

        let events = match parse_notification(raw) {
            Ok(events) => events,
            Err(e) => {
                stats.malformed += 1;
                tracing::warn!(error = %e, "Dropping unparseable notification");
                return;
            }
        };

        for event in events {
            stats.events += 1;
            tasks.spawn(handle_event(Arc::clone(&self.pipeline), event));
        }
    }
}

async fn handle_event(pipeline: Arc<Pipeline>, event: UploadEvent) -> EventResult {
    let mut report = pipeline.handle(event).await;
    EventResult {
        matched: !report.is_miss(),
        target_failures: report.failures.len(),
        dispatches: report.wait_dispatches().await,
    }
}

fn record(stats: &mut SourceStats, result: Result<EventResult, JoinError>) {
    let result = match result {
        Ok(result) => result,
        Err(e) => {
            tracing::error!(error = %e, "Event task failed");
            stats.target_failures += 1;
            return;
        }
    };

    if result.matched {
        stats.routed += 1;
    } else {
        stats.unmatched += 1;
    }
    stats.target_failures += result.target_failures as u64;

    for (_, outcome) in result.dispatches {
        if outcome.is_delivered() {
            stats.dispatches_delivered += 1;
        } else {
            stats.dispatches_failed += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::{RouteTarget, Router};
    use crate::rules::{CompositeRule, ScopeRule, SuffixRule};
    use async_trait::async_trait;
    use shuk_dispatch::{
        DispatchEnvelope, DispatchOptions, DispatchResult, DispatchTarget, Dispatcher,
        MemoryDeadLetterSink, RetryConfig,
    };
    use shuk_events::{MemoryTopic, Topic};

    struct AcceptingTarget;

    #[async_trait]
    impl DispatchTarget for AcceptingTarget {
        fn name(&self) -> &str {
            "convert-mov"
        }

        async fn invoke(&self, _envelope: &DispatchEnvelope) -> DispatchResult<()> {
            Ok(())
        }
    }

    fn pipeline(topic: Arc<MemoryTopic>) -> Arc<Pipeline> {
        let router = Router::builder()
            .route(
                "generic",
                CompositeRule::new(ScopeRule::new("videos"), SuffixRule::not_ends_with(".mov")),
                RouteTarget::topic("upload-topic"),
            )
            .route(
                "special",
                CompositeRule::new(ScopeRule::new("videos"), SuffixRule::ends_with(".mov")),
                RouteTarget::dispatch("convert-mov", DispatchOptions::new(None, 1)),
            )
            .build()
            .unwrap();
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(AcceptingTarget),
            RetryConfig::fast(),
            Arc::new(MemoryDeadLetterSink::new()),
        ));

        Arc::new(
            Pipeline::builder(router)
                .topic(topic)
                .dispatcher(dispatcher)
                .build()
                .unwrap(),
        )
    }

    fn flat(bucket: &str, key: &str) -> String {
        serde_json::json!({
            "eventSource": "aws:s3",
            "eventName": "ObjectCreated:Put",
            "eventTime": "2024-05-01T12:00:00Z",
            "bucketName": bucket,
            "objectKey": key,
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_source_routes_every_notification() {
        let topic = Arc::new(MemoryTopic::new("upload-topic"));
        let source = EventSource::new(pipeline(topic.clone()));
        let (tx, rx) = mpsc::channel(16);

        tx.send(flat("videos", "a.mp4")).await.unwrap();
        tx.send(flat("videos", "a.mov")).await.unwrap();
        tx.send(flat("other", "a.mov")).await.unwrap();
        tx.send("not json".to_string()).await.unwrap();
        drop(tx);

        let stats = source.run(rx).await;

        assert_eq!(
            stats,
            SourceStats {
                notifications: 4,
                malformed: 1,
                events: 3,
                routed: 2,
                unmatched: 1,
                target_failures: 0,
                dispatches_delivered: 1,
                dispatches_failed: 0,
            }
        );
        assert_eq!(topic.stats().await.events_published, 1);
    }

    #[tokio::test]
    async fn test_empty_channel() {
        let source = EventSource::new(pipeline(Arc::new(MemoryTopic::new("upload-topic"))));
        let (tx, rx) = mpsc::channel::<String>(1);
        drop(tx);

        assert_eq!(source.run(rx).await, SourceStats::default());
    }
}
