//! Dispatcher
//!
//! Runs one dispatch end to end: staleness check, bounded retry against the
//! target, and dead-lettering of anything that does not get through. A
//! dispatch never returns an error to its caller; the outcome is reported
//! instead.

use crate::dead_letter::{DeadLetter, DeadLetterSink, FailureKind};
use crate::envelope::DispatchEnvelope;
use crate::error::DispatchError;
use crate::retry::{with_retry_if, RetryConfig};
use crate::target::DispatchTarget;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Per-dispatch policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOptions {
    /// Drop the dispatch once the source event is older than this
    pub max_age: Option<Duration>,

    /// Retries after the first failed attempt
    pub retry_attempts: u32,
}

impl DispatchOptions {
    pub fn new(max_age: Option<Duration>, retry_attempts: u32) -> Self {
        Self {
            max_age,
            retry_attempts,
        }
    }

    /// Total invocation attempts allowed.
    pub fn max_attempts(&self) -> u32 {
        self.retry_attempts.saturating_add(1)
    }

    /// Fails with [`DispatchError::Stale`] if the event is too old at `now`.
    pub fn check_age(&self, event_time: DateTime<Utc>, now: DateTime<Utc>) -> Result<(), DispatchError> {
        let Some(max_age) = self.max_age else {
            return Ok(());
        };

        let age = (now - event_time).to_std().unwrap_or_default();
        if age > max_age {
            return Err(DispatchError::Stale { age, max_age });
        }
        Ok(())
    }
}

/// How a dispatch ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Worker accepted the envelope
    Delivered { attempts: u32 },
    /// Source event too old; dropped without another attempt
    Stale { age: Duration, attempts: u32 },
    /// Worker refused the envelope
    Rejected { attempts: u32 },
    /// Every allowed attempt failed
    Exhausted { attempts: u32 },
}

impl DispatchOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DispatchOutcome::Delivered { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            DispatchOutcome::Delivered { attempts }
            | DispatchOutcome::Stale { attempts, .. }
            | DispatchOutcome::Rejected { attempts }
            | DispatchOutcome::Exhausted { attempts } => *attempts,
        }
    }
}

/// Dispatches envelopes to one target with retry and dead-lettering.
pub struct Dispatcher {
    /// Downstream worker
    target: Arc<dyn DispatchTarget>,
    /// Delay schedule between attempts; the attempt budget comes from
    /// [`DispatchOptions`]
    backoff: RetryConfig,
    /// Failure channel
    dead_letters: Arc<dyn DeadLetterSink>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("target", &self.target.name())
            .field("backoff", &self.backoff)
            .finish()
    }
}

impl Dispatcher {
    pub fn new(
        target: Arc<dyn DispatchTarget>,
        backoff: RetryConfig,
        dead_letters: Arc<dyn DeadLetterSink>,
    ) -> Self {
        Self {
            target,
            backoff,
            dead_letters,
        }
    }

    /// Target name.
    pub fn name(&self) -> &str {
        self.target.name()
    }

    /// Dispatch an envelope, waiting for the final outcome.
    ///
    /// Staleness is re-evaluated against the wall clock before every
    /// attempt, so a dispatch that ages out while backing off is dropped
    /// rather than retried.
    pub async fn dispatch(
        &self,
        envelope: DispatchEnvelope,
        options: DispatchOptions,
        event_time: DateTime<Utc>,
    ) -> DispatchOutcome {
        let retry = self.backoff.clone().with_max_attempts(options.max_attempts());
        let attempts = AtomicU32::new(0);

        let counter = &attempts;
        let target = &self.target;
        let envelope_ref = &envelope;
        let result = with_retry_if(
            &retry,
            move || async move {
                options.check_age(event_time, Utc::now())?;
                counter.fetch_add(1, Ordering::SeqCst);
                target.invoke(envelope_ref).await
            },
            DispatchError::is_retryable,
        )
        .await;

        let attempts = attempts.load(Ordering::SeqCst);
        let (outcome, kind, error) = match result {
            Ok(()) => {
                tracing::info!(
                    dispatch_target = self.name(),
                    input_key = envelope.input_key(),
                    attempts,
                    "Dispatch delivered"
                );
                return DispatchOutcome::Delivered { attempts };
            }
            Err(DispatchError::Stale { age, max_age }) => (
                DispatchOutcome::Stale { age, attempts },
                FailureKind::StaleDispatch,
                DispatchError::Stale { age, max_age }.to_string(),
            ),
            Err(e) if e.is_retryable() => (
                DispatchOutcome::Exhausted { attempts },
                FailureKind::RetryExhausted,
                e.to_string(),
            ),
            Err(e) => (
                DispatchOutcome::Rejected { attempts },
                FailureKind::Rejected,
                e.to_string(),
            ),
        };

        self.dead_letters
            .record(DeadLetter::new(
                kind,
                self.name(),
                envelope,
                event_time,
                attempts,
                error,
            ))
            .await;

        outcome
    }

    /// Dispatch out-of-band on a new task.
    ///
    /// The caller is free to drop the handle; the dispatch still runs to
    /// completion.
    pub fn spawn(
        self: &Arc<Self>,
        envelope: DispatchEnvelope,
        options: DispatchOptions,
        event_time: DateTime<Utc>,
    ) -> JoinHandle<DispatchOutcome> {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move { dispatcher.dispatch(envelope, options, event_time).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dead_letter::MemoryDeadLetterSink;
    use crate::error::DispatchResult;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use shuk_events::UploadEvent;
    use tokio::sync::Mutex;

    /// Fails the first `failures` calls with the given error, then succeeds.
    struct ScriptedTarget {
        calls: AtomicU32,
        failures: u32,
        rejecting: bool,
        seen: Mutex<Vec<DispatchEnvelope>>,
    }

    impl ScriptedTarget {
        fn new(failures: u32) -> Self {
            Self {
                calls: AtomicU32::new(0),
                failures,
                rejecting: false,
                seen: Mutex::new(Vec::new()),
            }
        }

        fn rejecting() -> Self {
            Self {
                rejecting: true,
                ..Self::new(u32::MAX)
            }
        }
    }

    #[async_trait]
    impl DispatchTarget for ScriptedTarget {
        fn name(&self) -> &str {
            "convert-mov"
        }

        async fn invoke(&self, envelope: &DispatchEnvelope) -> DispatchResult<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().await.push(envelope.clone());
            if call < self.failures {
                if self.rejecting {
                    return Err(DispatchError::Rejected {
                        target: "convert-mov".to_string(),
                        status: 400,
                        message: "bad payload".to_string(),
                    });
                }
                return Err(DispatchError::Unavailable {
                    target: "convert-mov".to_string(),
                    message: "worker down".to_string(),
                });
            }
            Ok(())
        }
    }

    fn setup(target: Arc<ScriptedTarget>) -> (Dispatcher, Arc<MemoryDeadLetterSink>) {
        let sink = Arc::new(MemoryDeadLetterSink::new());
        let backoff = RetryConfig {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            ..RetryConfig::fast()
        };
        (Dispatcher::new(target, backoff, sink.clone()), sink)
    }

    fn mov_event() -> UploadEvent {
        UploadEvent::try_new("videos", "clip.mov").unwrap()
    }

    #[test]
    fn test_options_defaults() {
        let options = DispatchOptions::default();
        assert_eq!(options.max_age, None);
        assert_eq!(options.retry_attempts, 0);
        assert_eq!(options.max_attempts(), 1);
        assert_eq!(DispatchOptions::new(None, u32::MAX).max_attempts(), u32::MAX);
    }

    #[test]
    fn test_check_age() {
        let now = Utc::now();
        let options = DispatchOptions::new(Some(Duration::from_secs(7200)), 2);

        assert!(options.check_age(now - ChronoDuration::hours(1), now).is_ok());
        assert!(matches!(
            options.check_age(now - ChronoDuration::hours(3), now),
            Err(DispatchError::Stale { .. })
        ));
        assert!(DispatchOptions::default()
            .check_age(now - ChronoDuration::days(30), now)
            .is_ok());
    }

    #[tokio::test]
    async fn test_delivered_first_try() {
        let target = Arc::new(ScriptedTarget::new(0));
        let (dispatcher, sink) = setup(target.clone());
        let event = mov_event();

        let outcome = dispatcher
            .dispatch(
                DispatchEnvelope::from_event(&event),
                DispatchOptions::new(Some(Duration::from_secs(7200)), 2),
                event.timestamp(),
            )
            .await;

        assert_eq!(outcome, DispatchOutcome::Delivered { attempts: 1 });
        assert_eq!(
            target.seen.lock().await.as_slice(),
            &[DispatchEnvelope::from_event(&event)]
        );
        assert!(sink.letters().await.is_empty());
    }

    #[tokio::test]
    async fn test_recovers_within_retry_budget() {
        let target = Arc::new(ScriptedTarget::new(2));
        let (dispatcher, sink) = setup(target.clone());
        let event = mov_event();

        let outcome = dispatcher
            .dispatch(
                DispatchEnvelope::from_event(&event),
                DispatchOptions::new(None, 2),
                event.timestamp(),
            )
            .await;

        assert_eq!(outcome, DispatchOutcome::Delivered { attempts: 3 });
        assert!(sink.letters().await.is_empty());
    }

    #[tokio::test]
    async fn test_always_failing_target_attempted_retry_plus_one_times() {
        for retry_attempts in [0, 1, 2, 4] {
            let target = Arc::new(ScriptedTarget::new(u32::MAX));
            let (dispatcher, sink) = setup(target.clone());
            let event = mov_event();

            let outcome = dispatcher
                .dispatch(
                    DispatchEnvelope::from_event(&event),
                    DispatchOptions::new(None, retry_attempts),
                    event.timestamp(),
                )
                .await;

            assert_eq!(
                outcome,
                DispatchOutcome::Exhausted {
                    attempts: retry_attempts + 1
                }
            );
            assert_eq!(target.calls.load(Ordering::SeqCst), retry_attempts + 1);

            let letters = sink.letters().await;
            assert_eq!(letters.len(), 1);
            assert_eq!(letters[0].kind, FailureKind::RetryExhausted);
            assert_eq!(letters[0].attempts, retry_attempts + 1);
            assert_eq!(letters[0].target, "convert-mov");
        }
    }

    #[tokio::test]
    async fn test_stale_dispatch_dropped_without_attempt() {
        let target = Arc::new(ScriptedTarget::new(0));
        let (dispatcher, sink) = setup(target.clone());
        let event = UploadEvent::try_at("videos", "clip.mov", Utc::now() - ChronoDuration::hours(3))
            .unwrap();

        let outcome = dispatcher
            .dispatch(
                DispatchEnvelope::from_event(&event),
                DispatchOptions::new(Some(Duration::from_secs(2 * 60 * 60)), 2),
                event.timestamp(),
            )
            .await;

        assert!(matches!(outcome, DispatchOutcome::Stale { attempts: 0, .. }));
        assert_eq!(target.calls.load(Ordering::SeqCst), 0);
        assert_eq!(sink.count(FailureKind::StaleDispatch).await, 1);
        assert_eq!(sink.count(FailureKind::RetryExhausted).await, 0);
    }

    #[tokio::test]
    async fn test_ages_out_while_retrying() {
        let target = Arc::new(ScriptedTarget::new(u32::MAX));
        let sink = Arc::new(MemoryDeadLetterSink::new());
        let backoff = RetryConfig {
            max_attempts: 1,
            initial_delay: Duration::from_millis(300),
            max_delay: Duration::from_millis(300),
            exponential_base: 1.0,
            jitter: false,
        };
        let dispatcher = Dispatcher::new(target.clone(), backoff, sink.clone());

        // Event is 1.9s old with a 2s window: the first attempt runs, the
        // retry after 300ms finds it stale.
        let event_time = Utc::now() - ChronoDuration::milliseconds(1900);
        let envelope = DispatchEnvelope::from_event(&mov_event());

        let outcome = dispatcher
            .dispatch(
                envelope,
                DispatchOptions::new(Some(Duration::from_secs(2)), 5),
                event_time,
            )
            .await;

        assert!(matches!(outcome, DispatchOutcome::Stale { attempts: 1, .. }));
        assert_eq!(target.calls.load(Ordering::SeqCst), 1);
        assert_eq!(sink.count(FailureKind::StaleDispatch).await, 1);
    }

    #[tokio::test]
    async fn test_rejected_not_retried() {
        let target = Arc::new(ScriptedTarget::rejecting());
        let (dispatcher, sink) = setup(target.clone());
        let event = mov_event();

        let outcome = dispatcher
            .dispatch(
                DispatchEnvelope::from_event(&event),
                DispatchOptions::new(None, 3),
                event.timestamp(),
            )
            .await;

        assert_eq!(outcome, DispatchOutcome::Rejected { attempts: 1 });
        assert_eq!(target.calls.load(Ordering::SeqCst), 1);
        assert_eq!(sink.count(FailureKind::Rejected).await, 1);
    }

    #[tokio::test]
    async fn test_spawned_dispatch_runs_out_of_band() {
        let target = Arc::new(ScriptedTarget::new(1));
        let (dispatcher, _sink) = setup(target.clone());
        let dispatcher = Arc::new(dispatcher);
        let event = mov_event();

        let handle = dispatcher.spawn(
            DispatchEnvelope::from_event(&event),
            DispatchOptions::new(None, 1),
            event.timestamp(),
        );

        assert_eq!(handle.await.unwrap(), DispatchOutcome::Delivered { attempts: 2 });
    }
}
