//! Dispatch targets
//!
//! A dispatch target is the downstream conversion worker. The HTTP target
//! POSTs the envelope as JSON; the same status classification is reused by
//! [`HttpSubscriber`], which invokes a worker with the full upload event
//! from the fan-out topic (the backup copier).

use crate::envelope::DispatchEnvelope;
use crate::error::{DispatchError, DispatchResult};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use shuk_events::{BusError, BusResult, Subscriber, UploadEvent};
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Asynchronous invocation of a downstream worker.
#[async_trait]
pub trait DispatchTarget: Send + Sync {
    /// Target name used in logs and dead letters.
    fn name(&self) -> &str;

    /// Hand one envelope to the worker.
    async fn invoke(&self, envelope: &DispatchEnvelope) -> DispatchResult<()>;
}

fn require_endpoint(endpoint: String, kind: &str) -> DispatchResult<String> {
    if endpoint.trim().is_empty() {
        return Err(DispatchError::InvalidConfig(format!("{} endpoint is empty", kind)));
    }
    Ok(endpoint)
}

fn build_client(timeout: Duration) -> DispatchResult<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| DispatchError::InvalidConfig(e.to_string()))
}

/// Map a worker response to a dispatch result.
///
/// Throttling and server errors are transient; any other non-success
/// status means the worker will never accept this payload.
async fn classify_response(target: &str, response: reqwest::Response) -> DispatchResult<()> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }

    let message = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    warn!(worker = %target, status = status.as_u16(), message = %message, "Worker returned an error");

    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        Err(DispatchError::Unavailable {
            target: target.to_string(),
            message: format!("{}: {}", status.as_u16(), message),
        })
    } else {
        Err(DispatchError::Rejected {
            target: target.to_string(),
            status: status.as_u16(),
            message,
        })
    }
}

/// Conversion worker reachable over HTTP.
#[derive(Debug, Clone)]
pub struct HttpDispatchTarget {
    /// Target name
    name: String,
    /// Worker endpoint receiving the envelope
    endpoint: String,
    /// HTTP client instance
    client: Client,
}

impl HttpDispatchTarget {
    /// Create a new HTTP target.
    pub fn new(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        timeout: Duration,
    ) -> DispatchResult<Self> {
        let endpoint = require_endpoint(endpoint.into(), "dispatch")?;

        Ok(Self {
            name: name.into(),
            endpoint,
            client: build_client(timeout)?,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl DispatchTarget for HttpDispatchTarget {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self, envelope), fields(dispatch_target = %self.name, input_key = envelope.input_key()))]
    async fn invoke(&self, envelope: &DispatchEnvelope) -> DispatchResult<()> {
        debug!(endpoint = %self.endpoint, "Invoking conversion worker");

        let response = self
            .client
            .post(&self.endpoint)
            .json(envelope)
            .send()
            .await
            .map_err(|e| DispatchError::Unavailable {
                target: self.name.clone(),
                message: e.to_string(),
            })?;

        classify_response(&self.name, response).await
    }
}

/// Topic subscriber that POSTs each upload event to a worker endpoint.
#[derive(Debug, Clone)]
pub struct HttpSubscriber {
    name: String,
    endpoint: String,
    client: Client,
}

impl HttpSubscriber {
    pub fn new(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        timeout: Duration,
    ) -> DispatchResult<Self> {
        let endpoint = require_endpoint(endpoint.into(), "subscriber")?;

        Ok(Self {
            name: name.into(),
            endpoint,
            client: build_client(timeout)?,
        })
    }
}

#[async_trait]
impl Subscriber for HttpSubscriber {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(&self, event: UploadEvent) -> BusResult<()> {
        let unavailable = |message: String| BusError::SubscriberUnavailable {
            subscriber: self.name.clone(),
            message,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&event)
            .send()
            .await
            .map_err(|e| unavailable(e.to_string()))?;

        classify_response(&self.name, response)
            .await
            .map_err(|e| unavailable(e.to_string()))
    }
}
