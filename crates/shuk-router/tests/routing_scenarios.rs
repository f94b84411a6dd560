//! End-to-end routing scenarios.
//!
//! Wires the standard two-route layout to real in-memory topic and queue
//! collaborators, with wiremock standing in for the backup copier and the
//! conversion worker.

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use shuk_dispatch::{
    DispatchOutcome, Dispatcher, FailureKind, HttpDispatchTarget, HttpSubscriber,
    MemoryDeadLetterSink, RetryConfig,
};
use shuk_events::{
    MemoryTopic, MemoryWorkQueue, QueueSubscriber, Topic, TopicConfig, UploadEvent, WorkQueue,
};
use shuk_router::{ConfigError, EventSource, Pipeline, RoutingConfig, SourceStats};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Standard layout wired to mock workers.
struct TestFixture {
    /// Backup copier and conversion worker
    server: MockServer,
    /// Metadata queue behind the upload topic
    queue: Arc<MemoryWorkQueue>,
    /// Upload topic
    topic: Arc<MemoryTopic>,
    /// Dispatch failures
    dead_letters: Arc<MemoryDeadLetterSink>,
    pipeline: Arc<Pipeline>,
}

impl TestFixture {
    async fn new() -> Self {
        Self::with_retries(2).await
    }

    async fn with_retries(retry_attempts: u32) -> Self {
        let server = MockServer::start().await;

        let queue = Arc::new(MemoryWorkQueue::new("metadata-queue"));
        let topic = Arc::new(MemoryTopic::with_config(
            "upload-topic",
            TopicConfig {
                redelivery_attempts: 1,
                redelivery_delay: Duration::from_millis(10),
                ..TopicConfig::default()
            },
        ));
        topic
            .register_subscriber(Arc::new(QueueSubscriber::new(queue.clone())))
            .await
            .unwrap();
        topic
            .register_subscriber(Arc::new(
                HttpSubscriber::new("backup", format!("{}/backup", server.uri()), Duration::from_secs(5))
                    .unwrap(),
            ))
            .await
            .unwrap();

        let dead_letters = Arc::new(MemoryDeadLetterSink::new());
        let target = HttpDispatchTarget::new(
            "convert-mov",
            format!("{}/convert", server.uri()),
            Duration::from_secs(5),
        )
        .unwrap();
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(target),
            RetryConfig {
                initial_delay: Duration::from_millis(5),
                max_delay: Duration::from_millis(20),
                ..RetryConfig::fast()
            },
            dead_letters.clone(),
        ));

        let router = RoutingConfig::standard(
            "videos",
            ".mov",
            "upload-topic",
            "convert-mov",
            2 * 60 * 60,
            retry_attempts,
        )
        .into_router()
        .unwrap();

        let pipeline = Pipeline::builder(router)
            .topic(topic.clone())
            .dispatcher(dispatcher)
            .build()
            .unwrap();

        Self {
            server,
            queue,
            topic,
            dead_letters,
            pipeline: Arc::new(pipeline),
        }
    }

    async fn mount_backup(&self, status: u16) {
        Mock::given(method("POST"))
            .and(path("/backup"))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    /// Wait until the queue holds `expected` visible messages.
    async fn wait_for_queue(&self, expected: usize) {
        for _ in 0..200 {
            if self.queue.depth().await.unwrap().visible >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("queue never reached {} messages", expected);
    }

    async fn requests_to(&self, route: &str) -> Vec<serde_json::Value> {
        self.server
            .received_requests()
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.url.path() == route)
            .map(|r| serde_json::from_slice(&r.body).unwrap())
            .collect()
    }
}

#[tokio::test]
async fn test_three_uploads_take_their_paths() {
    let fixture = TestFixture::new().await;
    fixture.mount_backup(200).await;
    Mock::given(method("POST"))
        .and(path("/convert"))
        .and(body_json(json!({
            "input_bucket": "videos",
            "input_key": "a.mov",
            "output_bucket": "videos"
        })))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&fixture.server)
        .await;

    let generic = UploadEvent::try_new("videos", "a.mp4").unwrap();
    let special = UploadEvent::try_new("videos", "a.mov").unwrap();
    let foreign = UploadEvent::try_new("other", "a.mov").unwrap();

    let mut generic_report = fixture.pipeline.handle(generic.clone()).await;
    let mut special_report = fixture.pipeline.handle(special).await;
    let foreign_report = fixture.pipeline.handle(foreign).await;

    // Generic: topic only
    assert_eq!(generic_report.published, vec!["upload-topic"]);
    assert!(generic_report.wait_dispatches().await.is_empty());

    // Special: dispatch only
    assert!(special_report.published.is_empty());
    assert_eq!(
        special_report.wait_dispatches().await,
        vec![("convert-mov".to_string(), DispatchOutcome::Delivered { attempts: 1 })]
    );

    // Foreign bucket: nothing
    assert!(foreign_report.is_miss());
    assert!(foreign_report.failures.is_empty());

    fixture.wait_for_queue(1).await;
    let message = fixture.queue.dequeue().await.unwrap().unwrap();
    assert_eq!(message.event, generic);
    fixture.queue.ack(&message.receipt).await.unwrap();

    assert_eq!(fixture.topic.stats().await.events_published, 1);
    assert!(fixture.dead_letters.letters().await.is_empty());
}

#[tokio::test]
async fn test_stale_upload_is_dead_lettered_without_attempt() {
    let fixture = TestFixture::new().await;
    Mock::given(method("POST"))
        .and(path("/convert"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&fixture.server)
        .await;

    let old = UploadEvent::try_at("videos", "late.mov", Utc::now() - ChronoDuration::hours(3)).unwrap();
    let mut report = fixture.pipeline.handle(old).await;

    let outcomes = report.wait_dispatches().await;
    assert!(matches!(outcomes[0].1, DispatchOutcome::Stale { attempts: 0, .. }));

    let letters = fixture.dead_letters.letters().await;
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].kind, FailureKind::StaleDispatch);
    assert_eq!(letters[0].envelope.input_key(), "late.mov");
}

#[tokio::test]
async fn test_failing_worker_attempted_retry_plus_one_times() {
    let fixture = TestFixture::with_retries(3).await;
    Mock::given(method("POST"))
        .and(path("/convert"))
        .respond_with(ResponseTemplate::new(500))
        .expect(4)
        .mount(&fixture.server)
        .await;

    let mut report = fixture
        .pipeline
        .handle(UploadEvent::try_new("videos", "a.mov").unwrap())
        .await;

    assert_eq!(
        report.wait_dispatches().await,
        vec![("convert-mov".to_string(), DispatchOutcome::Exhausted { attempts: 4 })]
    );
    assert_eq!(fixture.dead_letters.count(FailureKind::RetryExhausted).await, 1);
}

#[tokio::test]
async fn test_failing_backup_does_not_block_queue() {
    let fixture = TestFixture::new().await;
    fixture.mount_backup(503).await;

    let event = UploadEvent::try_new("videos", "report.pdf").unwrap();
    let report = fixture.pipeline.handle(event.clone()).await;
    assert!(report.failures.is_empty());

    fixture.wait_for_queue(1).await;
    let message = fixture.queue.dequeue().await.unwrap().unwrap();
    assert_eq!(message.event, event);

    // First delivery plus one redelivery
    for _ in 0..200 {
        if fixture.topic.stats().await.delivery_failures == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(fixture.topic.stats().await.delivery_failures, 1);
    assert_eq!(fixture.requests_to("/backup").await.len(), 2);
}

#[tokio::test]
async fn test_source_normalizes_every_shape() {
    let fixture = TestFixture::new().await;
    fixture.mount_backup(200).await;
    Mock::given(method("POST"))
        .and(path("/convert"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&fixture.server)
        .await;

    let now = Utc::now().to_rfc3339();
    let flat = json!({
        "eventSource": "aws:s3",
        "eventName": "ObjectCreated:Put",
        "eventTime": now,
        "bucketName": "videos",
        "objectKey": "one.mp4"
    });
    let bridge = json!({
        "source": "aws.s3",
        "detail-type": "Object Created",
        "time": now,
        "detail": { "bucket": { "name": "videos" }, "object": { "key": "two.mov" } }
    });
    let sns = json!({
        "Records": [
            { "Sns": { "Message": flat.to_string().replace("one.mp4", "three.mp4") } },
            { "Sns": { "Message": bridge.to_string().replace("two.mov", "four.mov") } }
        ]
    });
    let removed = json!({
        "eventSource": "aws:s3",
        "eventName": "ObjectRemoved:Delete",
        "eventTime": now,
        "bucketName": "videos",
        "objectKey": "gone.mp4"
    });

    let (tx, rx) = mpsc::channel(8);
    for raw in [flat, bridge, sns, removed] {
        tx.send(raw.to_string()).await.unwrap();
    }
    tx.send("{ truncated".to_string()).await.unwrap();
    drop(tx);

    let stats = EventSource::new(fixture.pipeline.clone()).run(rx).await;

    assert_eq!(
        stats,
        SourceStats {
            notifications: 5,
            malformed: 1,
            events: 5,
            routed: 4,
            unmatched: 1,
            target_failures: 0,
            dispatches_delivered: 2,
            dispatches_failed: 0,
        }
    );

    fixture.wait_for_queue(2).await;
    let mut keys = Vec::new();
    while let Some(message) = fixture.queue.dequeue().await.unwrap() {
        keys.push(message.event.object_key().to_string());
        fixture.queue.ack(&message.receipt).await.unwrap();
    }
    keys.sort();
    assert_eq!(keys, vec!["one.mp4", "three.mp4"]);

    let mut converted: Vec<String> = fixture
        .requests_to("/convert")
        .await
        .into_iter()
        .map(|body| body["input_key"].as_str().unwrap().to_string())
        .collect();
    converted.sort();
    assert_eq!(converted, vec!["four.mov", "two.mov"]);
}

#[test]
fn test_overlapping_routes_rejected_at_load() {
    let json = r#"{
        "routes": [
            { "name": "generic", "bucketScope": "videos", "suffixFilter": ".mp4", "negate": true,
              "target": { "topic": "upload-topic" } },
            { "name": "special", "bucketScope": "videos", "suffixFilter": ".mov",
              "target": { "dispatch": "convert-mov" }, "retryAttempts": 2 }
        ]
    }"#;

    let result = RoutingConfig::from_json(json).unwrap().into_router();
    assert_eq!(
        result.unwrap_err(),
        ConfigError::OverlappingRules {
            scope: "videos".to_string(),
            first: "generic".to_string(),
            second: "special".to_string(),
        }
    );
}
