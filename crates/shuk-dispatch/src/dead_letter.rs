//! Dead-letter sinks
//!
//! Dispatches that are dropped (stale) or given up on (retries exhausted,
//! rejected) are recorded here. Recording never fails from the caller's
//! point of view: a sink that cannot persist a letter logs it instead.

use crate::envelope::DispatchEnvelope;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Why a dispatch ended up in the dead-letter sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Source event exceeded the maximum age; never attempted again
    StaleDispatch,
    /// Every allowed attempt failed
    RetryExhausted,
    /// Target refused the envelope
    Rejected,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::StaleDispatch => "stale_dispatch",
            FailureKind::RetryExhausted => "retry_exhausted",
            FailureKind::Rejected => "rejected",
        }
    }
}

/// A dispatch that could not be completed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    /// Letter ID
    pub id: Uuid,
    /// Failure classification
    pub kind: FailureKind,
    /// Dispatch target name
    pub target: String,
    /// Envelope that was not delivered
    pub envelope: DispatchEnvelope,
    /// Creation time of the source upload
    pub event_time: DateTime<Utc>,
    /// Invocation attempts made (zero for stale dispatches)
    pub attempts: u32,
    /// Last error seen
    pub error: String,
    /// When the letter was recorded
    pub recorded_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn new(
        kind: FailureKind,
        target: impl Into<String>,
        envelope: DispatchEnvelope,
        event_time: DateTime<Utc>,
        attempts: u32,
        error: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            kind,
            target: target.into(),
            envelope,
            event_time,
            attempts,
            error: error.into(),
            recorded_at: Utc::now(),
        }
    }
}

/// Operator-visible failure channel.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    /// Record a failed dispatch.
    async fn record(&self, letter: DeadLetter);
}

/// Sink that writes every letter as a structured error log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDeadLetterSink;

#[async_trait]
impl DeadLetterSink for TracingDeadLetterSink {
    async fn record(&self, letter: DeadLetter) {
        tracing::error!(
            letter_id = %letter.id,
            kind = letter.kind.as_str(),
            dispatch_target = %letter.target,
            input_bucket = letter.envelope.input_bucket(),
            input_key = letter.envelope.input_key(),
            event_time = %letter.event_time,
            attempts = letter.attempts,
            error = %letter.error,
            "Dispatch dead-lettered"
        );
    }
}

/// In-memory sink, for tests and operator inspection.
#[derive(Debug, Default)]
pub struct MemoryDeadLetterSink {
    letters: RwLock<Vec<DeadLetter>>,
}

impl MemoryDeadLetterSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of recorded letters, oldest first.
    pub async fn letters(&self) -> Vec<DeadLetter> {
        self.letters.read().await.clone()
    }

    /// Number of letters of one kind.
    pub async fn count(&self, kind: FailureKind) -> usize {
        self.letters
            .read()
            .await
            .iter()
            .filter(|l| l.kind == kind)
            .count()
    }

    /// Remove and return every recorded letter.
    pub async fn drain(&self) -> Vec<DeadLetter> {
        std::mem::take(&mut *self.letters.write().await)
    }
}

#[async_trait]
impl DeadLetterSink for MemoryDeadLetterSink {
    async fn record(&self, letter: DeadLetter) {
        tracing::warn!(
            letter_id = %letter.id,
            kind = letter.kind.as_str(),
            dispatch_target = %letter.target,
            "Dispatch dead-lettered"
        );
        self.letters.write().await.push(letter);
    }
}
