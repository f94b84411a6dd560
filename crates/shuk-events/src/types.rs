//! Upload event types
//!
//! This module defines the normalized upload event that flows from the
//! event source adapter through the router to every downstream target.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{BusError, BusResult};

/// Source tag carried by every event emitted by the object store.
pub const OBJECT_STORE_SOURCE: &str = "aws.s3";

/// Normalized object-creation notification.
///
/// Events are immutable once built: fields are only reachable through
/// accessors, and the `with_*` helpers consume the event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawUploadEvent")]
pub struct UploadEvent {
    /// Event ID, used for tracing only
    id: Uuid,

    /// Origin of the notification (always the object store)
    source_system: String,

    /// Bucket the object landed in
    bucket_name: String,

    /// Full key of the uploaded object
    object_key: String,

    /// Instant the object was created
    timestamp: DateTime<Utc>,

    /// Kind of change
    event_type: EventType,
}

impl UploadEvent {
    /// Create a `Created` event stamped with the current time.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::InvalidEvent`] if the bucket or key is empty.
    pub fn try_new(bucket_name: impl Into<String>, object_key: impl Into<String>) -> BusResult<Self> {
        Self::try_at(bucket_name, object_key, Utc::now())
    }

    /// Create a `Created` event with an explicit creation time.
    pub fn try_at(
        bucket_name: impl Into<String>,
        object_key: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> BusResult<Self> {
        let bucket_name = bucket_name.into();
        let object_key = object_key.into();

        if bucket_name.is_empty() {
            return Err(BusError::InvalidEvent("bucket name is empty".to_string()));
        }
        if object_key.is_empty() {
            return Err(BusError::InvalidEvent("object key is empty".to_string()));
        }

        Ok(Self {
            id: Uuid::now_v7(),
            source_system: OBJECT_STORE_SOURCE.to_string(),
            bucket_name,
            object_key,
            timestamp,
            event_type: EventType::Created,
        })
    }

    /// Set the event type.
    pub fn with_event_type(mut self, event_type: EventType) -> Self {
        self.event_type = event_type;
        self
    }

    /// Set the source system tag.
    pub fn with_source(mut self, source_system: impl Into<String>) -> Self {
        self.source_system = source_system.into();
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn source_system(&self) -> &str {
        &self.source_system
    }

    pub fn bucket_name(&self) -> &str {
        &self.bucket_name
    }

    pub fn object_key(&self) -> &str {
        &self.object_key
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn event_type(&self) -> &EventType {
        &self.event_type
    }

    /// Whether this event reports a new object in the object store.
    pub fn is_object_created(&self) -> bool {
        self.event_type == EventType::Created && self.source_system == OBJECT_STORE_SOURCE
    }

    /// Trailing `.ext` of the key's last path segment, if any.
    ///
    /// Only used for log fields; classification compares raw suffixes.
    pub fn extension(&self) -> Option<&str> {
        let name = self.object_key.rsplit('/').next()?;
        name.rfind('.').map(|idx| &name[idx..])
    }

    /// Age of the event relative to `now`.
    ///
    /// Events stamped in the future have zero age.
    pub fn age_at(&self, now: DateTime<Utc>) -> std::time::Duration {
        (now - self.timestamp).to_std().unwrap_or_default()
    }
}

/// Wire form of [`UploadEvent`], validated on the way in.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawUploadEvent {
    id: Uuid,
    source_system: String,
    bucket_name: String,
    object_key: String,
    timestamp: DateTime<Utc>,
    event_type: EventType,
}

impl TryFrom<RawUploadEvent> for UploadEvent {
    type Error = BusError;

    fn try_from(raw: RawUploadEvent) -> BusResult<Self> {
        let mut event = UploadEvent::try_at(raw.bucket_name, raw.object_key, raw.timestamp)?
            .with_event_type(raw.event_type)
            .with_source(raw.source_system);
        event.id = raw.id;
        Ok(event)
    }
}

impl fmt::Display for UploadEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket_name, self.object_key)
    }
}

/// Kind of object-store change.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Object was created (put, copy, multipart completion)
    Created,
    /// Object was removed
    Removed,
    /// Anything else the store reports
    Other(String),
}

impl EventType {
    /// Map a store event name to an event type.
    ///
    /// Accepts both the EventBridge detail types (`Object Created`) and the
    /// native notification names (`ObjectCreated:Put`).
    pub fn from_event_name(name: &str) -> Self {
        if name == "Object Created" || name.starts_with("ObjectCreated") {
            EventType::Created
        } else if name == "Object Deleted" || name.starts_with("ObjectRemoved") {
            EventType::Removed
        } else {
            EventType::Other(name.to_string())
        }
    }
}
