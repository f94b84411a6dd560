//! Event source adapter
//!
//! Normalizes object-store change notifications into [`UploadEvent`]s.
//!
//! Three wire shapes are accepted:
//! - a flat notification (`eventSource`, `eventTime`, `bucketName`,
//!   `objectKey`, `eventName`)
//! - an EventBridge S3 event (`source`, `detail-type`, `time`, `detail`)
//! - an SNS envelope (`Records[].Sns.Message`) wrapping either of the above

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::types::{EventType, UploadEvent, OBJECT_STORE_SOURCE};

/// Notification parsing errors.
#[derive(Debug, Error)]
pub enum NotificationError {
    /// Payload is not valid JSON or has the wrong structure
    #[error("Malformed notification: {0}")]
    Malformed(String),

    /// A required field is absent or empty
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// Event time is not RFC 3339
    #[error("Invalid timestamp {0:?}")]
    InvalidTimestamp(String),
}

/// Flat object-store notification.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FlatNotification {
    event_source: Option<String>,
    event_time: Option<String>,
    bucket_name: Option<String>,
    object_key: Option<String>,
    event_name: Option<String>,
}

// --- EventBridge ---

#[derive(Debug, Deserialize)]
struct EventBridgeEvent {
    source: Option<String>,
    #[serde(rename = "detail-type")]
    detail_type: Option<String>,
    time: Option<String>,
    detail: S3EventDetail,
}

#[derive(Debug, Deserialize)]
struct S3EventDetail {
    bucket: Option<S3Bucket>,
    object: Option<S3Object>,
}

#[derive(Debug, Deserialize)]
struct S3Bucket {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct S3Object {
    key: Option<String>,
}

// --- SNS ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SnsEnvelope {
    records: Vec<SnsRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SnsRecord {
    sns: SnsMessage,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SnsMessage {
    message: String,
}

/// Parse a raw notification into zero or more upload events.
///
/// SNS envelopes yield one event per record; the other shapes yield exactly
/// one. Non-creation notifications are returned too, with their
/// [`EventType`] set accordingly, so the caller decides what to drop.
pub fn parse_notification(raw: &str) -> Result<Vec<UploadEvent>, NotificationError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| NotificationError::Malformed(e.to_string()))?;
    parse_value(value)
}

fn parse_value(value: Value) -> Result<Vec<UploadEvent>, NotificationError> {
    if value.get("Records").is_some() {
        let envelope: SnsEnvelope = serde_json::from_value(value)
            .map_err(|e| NotificationError::Malformed(e.to_string()))?;

        let mut events = Vec::with_capacity(envelope.records.len());
        for record in envelope.records {
            let inner: Value = serde_json::from_str(&record.sns.message)
                .map_err(|e| NotificationError::Malformed(e.to_string()))?;
            if inner.get("Records").is_some() {
                return Err(NotificationError::Malformed(
                    "nested SNS envelope".to_string(),
                ));
            }
            events.extend(parse_value(inner)?);
        }
        return Ok(events);
    }

    if value.get("detail").is_some() {
        let event: EventBridgeEvent = serde_json::from_value(value)
            .map_err(|e| NotificationError::Malformed(e.to_string()))?;
        return from_eventbridge(event).map(|e| vec![e]);
    }

    let flat: FlatNotification =
        serde_json::from_value(value).map_err(|e| NotificationError::Malformed(e.to_string()))?;
    from_flat(flat).map(|e| vec![e])
}

fn from_eventbridge(event: EventBridgeEvent) -> Result<UploadEvent, NotificationError> {
    let bucket = event
        .detail
        .bucket
        .and_then(|b| b.name)
        .ok_or(NotificationError::MissingField("detail.bucket.name"))?;
    let key = event
        .detail
        .object
        .and_then(|o| o.key)
        .ok_or(NotificationError::MissingField("detail.object.key"))?;
    let time = event.time.ok_or(NotificationError::MissingField("time"))?;

    build(
        bucket,
        key,
        &time,
        event.source,
        event.detail_type.as_deref(),
        ("detail.bucket.name", "detail.object.key"),
    )
}

fn from_flat(flat: FlatNotification) -> Result<UploadEvent, NotificationError> {
    let bucket = flat
        .bucket_name
        .ok_or(NotificationError::MissingField("bucketName"))?;
    let key = flat
        .object_key
        .ok_or(NotificationError::MissingField("objectKey"))?;
    let time = flat
        .event_time
        .ok_or(NotificationError::MissingField("eventTime"))?;

    build(
        bucket,
        key,
        &time,
        flat.event_source,
        flat.event_name.as_deref(),
        ("bucketName", "objectKey"),
    )
}

fn build(
    bucket: String,
    key: String,
    time: &str,
    source: Option<String>,
    event_name: Option<&str>,
    field_names: (&'static str, &'static str),
) -> Result<UploadEvent, NotificationError> {
    if bucket.is_empty() {
        return Err(NotificationError::MissingField(field_names.0));
    }
    if key.is_empty() {
        return Err(NotificationError::MissingField(field_names.1));
    }

    let timestamp = parse_time(time)?;
    // Notifications without a name are object-creation notifications.
    let event_type = event_name
        .map(EventType::from_event_name)
        .unwrap_or(EventType::Created);

    let event = UploadEvent::try_at(bucket, key, timestamp)
        .map_err(|e| NotificationError::Malformed(e.to_string()))?
        .with_event_type(event_type)
        .with_source(normalize_source(source.as_deref()));

    Ok(event)
}

/// Native notifications tag the store as `aws:s3`, EventBridge as `aws.s3`.
fn normalize_source(source: Option<&str>) -> String {
    match source {
        None | Some("aws:s3") => OBJECT_STORE_SOURCE.to_string(),
        Some(other) => other.to_string(),
    }
}

fn parse_time(time: &str) -> Result<DateTime<Utc>, NotificationError> {
    DateTime::parse_from_rfc3339(time)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| NotificationError::InvalidTimestamp(time.to_string()))
}
