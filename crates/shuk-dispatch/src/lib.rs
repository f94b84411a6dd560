//! # Shuk Dispatch
//!
//! Direct dispatch of uploads to the conversion worker.
//!
//! ## Overview
//!
//! The shuk-dispatch crate handles:
//! - **Envelope**: the `{ input_bucket, input_key, output_bucket }` payload
//! - **Targets**: the `DispatchTarget` trait and its HTTP implementation
//! - **Retry**: bounded retry with capped exponential backoff
//! - **Dead Letters**: the failure channel for stale and undeliverable
//!   dispatches
//! - **Dispatcher**: ties the above together per dispatch
//!
//! ## Usage
//!
//! ```rust,no_run
//! use shuk_dispatch::{
//!     DispatchEnvelope, DispatchOptions, Dispatcher, HttpDispatchTarget, RetryConfig,
//!     TracingDeadLetterSink,
//! };
//! use shuk_events::UploadEvent;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! async fn example() {
//!     let target = HttpDispatchTarget::new(
//!         "convert-mov",
//!         "http://localhost:9000/convert",
//!         Duration::from_secs(10),
//!     )
//!     .unwrap();
//!     let dispatcher = Arc::new(Dispatcher::new(
//!         Arc::new(target),
//!         RetryConfig::default(),
//!         Arc::new(TracingDeadLetterSink),
//!     ));
//!
//!     let event = UploadEvent::try_new("videos", "clip.mov").unwrap();
//!     let options = DispatchOptions::new(Some(Duration::from_secs(2 * 60 * 60)), 2);
//!     dispatcher.spawn(DispatchEnvelope::from_event(&event), options, event.timestamp());
//! }
//! ```
//!
//! ## Failure Semantics
//!
//! | Failure | Handling |
//! |---|---|
//! | worker unavailable (transport error, 5xx, 429) | retried up to `retry_attempts` times |
//! | event older than `max_age` at attempt time | dropped, dead-lettered as `StaleDispatch` |
//! | retries used up | dead-lettered as `RetryExhausted` |
//! | worker refuses payload (other 4xx) | dead-lettered as `Rejected` |
//!
//! None of these is returned as an error to the caller.

pub mod dead_letter;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod retry;
pub mod target;

// Re-export main types
pub use dead_letter::{DeadLetter, DeadLetterSink, FailureKind, MemoryDeadLetterSink, TracingDeadLetterSink};
pub use dispatcher::{DispatchOptions, DispatchOutcome, Dispatcher};
pub use envelope::DispatchEnvelope;
pub use error::{DispatchError, DispatchResult};
pub use retry::RetryConfig;
pub use target::{DispatchTarget, HttpDispatchTarget, HttpSubscriber};
