//! Dispatch envelope
//!
//! The payload handed to the conversion worker. Field names are part of
//! the wire contract with the worker and must not change.

use serde::{Deserialize, Serialize};
use shuk_events::UploadEvent;

/// `{ input_bucket, input_key, output_bucket }` projection of an upload.
///
/// Built fresh per dispatch and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DispatchEnvelope {
    input_bucket: String,
    input_key: String,
    output_bucket: String,
}

impl DispatchEnvelope {
    /// Project an upload event into an envelope.
    ///
    /// Output always goes back to the source bucket.
    pub fn from_event(event: &UploadEvent) -> Self {
        Self {
            input_bucket: event.bucket_name().to_string(),
            input_key: event.object_key().to_string(),
            output_bucket: event.bucket_name().to_string(),
        }
    }

    pub fn input_bucket(&self) -> &str {
        &self.input_bucket
    }

    pub fn input_key(&self) -> &str {
        &self.input_key
    }

    pub fn output_bucket(&self) -> &str {
        &self.output_bucket
    }
}

impl From<&UploadEvent> for DispatchEnvelope {
    fn from(event: &UploadEvent) -> Self {
        Self::from_event(event)
    }
}
