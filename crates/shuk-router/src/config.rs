//! Routing configuration.
//!
//! Routes are declared as a JSON document or, for the standard two-route
//! layout, through environment variables. Either way the route set is
//! validated before a [`Router`] is built, so overlapping rules are caught
//! at load time rather than showing up as duplicate deliveries.

use crate::error::{ConfigError, ConfigResult};
use crate::router::{Route, RouteTarget, Router};
use crate::rules::{CompositeRule, ScopeRule, SuffixRule};
use serde::{Deserialize, Serialize};
use shuk_dispatch::DispatchOptions;
use std::time::Duration;

/// Default suffix routed to direct dispatch.
pub const DEFAULT_SPECIAL_SUFFIX: &str = ".mov";
/// Default fan-out topic for generic uploads.
pub const DEFAULT_UPLOAD_TOPIC: &str = "upload-topic";
/// Default dispatch target for special uploads.
pub const DEFAULT_CONVERT_TARGET: &str = "convert-mov";
/// Default staleness window for dispatch (two hours).
pub const DEFAULT_MAX_EVENT_AGE_SECS: u64 = 2 * 60 * 60;
/// Default retries after the first failed dispatch.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 2;

/// Full routing configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingConfig {
    pub routes: Vec<RouteConfig>,
}

/// One route as declared in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteConfig {
    /// Route name, unique within the config.
    pub name: String,

    /// Bucket the route applies to.
    pub bucket_scope: String,

    /// Key suffix to match.
    pub suffix_filter: String,

    /// Match keys that do NOT end with the suffix.
    #[serde(default)]
    pub negate: bool,

    /// Where matching uploads go.
    pub target: TargetConfig,

    /// Staleness window in seconds (dispatch routes only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_event_age_secs: Option<u64>,

    /// Retries after the first failed attempt (dispatch routes only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_attempts: Option<u32>,
}

/// Route target as declared in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TargetConfig {
    Topic(String),
    Dispatch(String),
}

impl RouteConfig {
    fn to_route(&self) -> ConfigResult<Route> {
        let target = match &self.target {
            TargetConfig::Topic(topic) => {
                if self.max_event_age_secs.is_some() || self.retry_attempts.is_some() {
                    return Err(ConfigError::InvalidValue {
                        key: format!("{}.target", self.name),
                        message: "maxEventAgeSecs and retryAttempts apply to dispatch targets only"
                            .to_string(),
                    });
                }
                RouteTarget::topic(topic.clone())
            }
            TargetConfig::Dispatch(target) => RouteTarget::dispatch(
                target.clone(),
                DispatchOptions::new(
                    self.max_event_age_secs.map(Duration::from_secs),
                    self.retry_attempts.unwrap_or(0),
                ),
            ),
        };

        Ok(Route::new(
            self.name.clone(),
            CompositeRule::new(
                ScopeRule::new(self.bucket_scope.clone()),
                SuffixRule::new(self.suffix_filter.clone(), self.negate),
            ),
            target,
        ))
    }
}

impl RoutingConfig {
    /// Parse a JSON routing document.
    pub fn from_json(json: &str) -> ConfigResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Build the standard layout from environment variables.
    ///
    /// Environment variables:
    /// - `SHUK_BUCKET_SCOPE`: bucket both routes apply to (required)
    /// - `SHUK_SPECIAL_SUFFIX`: suffix sent to dispatch (default: .mov)
    /// - `SHUK_UPLOAD_TOPIC`: topic for every other upload (default: upload-topic)
    /// - `SHUK_CONVERT_TARGET`: dispatch target name (default: convert-mov)
    /// - `SHUK_MAX_EVENT_AGE_SECS`: dispatch staleness window (default: 7200)
    /// - `SHUK_RETRY_ATTEMPTS`: dispatch retries (default: 2)
    pub fn from_env() -> ConfigResult<Self> {
        let scope = std::env::var("SHUK_BUCKET_SCOPE")
            .map_err(|_| ConfigError::MissingEnvVar("SHUK_BUCKET_SCOPE".to_string()))?;
        let suffix = env_or("SHUK_SPECIAL_SUFFIX", DEFAULT_SPECIAL_SUFFIX);
        let topic = env_or("SHUK_UPLOAD_TOPIC", DEFAULT_UPLOAD_TOPIC);
        let target = env_or("SHUK_CONVERT_TARGET", DEFAULT_CONVERT_TARGET);
        let max_age = parse_env("SHUK_MAX_EVENT_AGE_SECS", DEFAULT_MAX_EVENT_AGE_SECS)?;
        let retries = parse_env("SHUK_RETRY_ATTEMPTS", DEFAULT_RETRY_ATTEMPTS)?;

        Ok(Self::standard(scope, suffix, topic, target, max_age, retries))
    }

    /// Two complementary routes over one bucket: keys ending with `suffix`
    /// are dispatched, everything else is published.
    pub fn standard(
        scope: impl Into<String>,
        suffix: impl Into<String>,
        topic: impl Into<String>,
        target: impl Into<String>,
        max_event_age_secs: u64,
        retry_attempts: u32,
    ) -> Self {
        let scope = scope.into();
        let suffix = suffix.into();

        Self {
            routes: vec![
                RouteConfig {
                    name: "generic".to_string(),
                    bucket_scope: scope.clone(),
                    suffix_filter: suffix.clone(),
                    negate: true,
                    target: TargetConfig::Topic(topic.into()),
                    max_event_age_secs: None,
                    retry_attempts: None,
                },
                RouteConfig {
                    name: "special".to_string(),
                    bucket_scope: scope,
                    suffix_filter: suffix,
                    negate: false,
                    target: TargetConfig::Dispatch(target.into()),
                    max_event_age_secs: Some(max_event_age_secs),
                    retry_attempts: Some(retry_attempts),
                },
            ],
        }
    }

    /// Convert to routes without validating them.
    pub fn to_routes(&self) -> ConfigResult<Vec<Route>> {
        self.routes.iter().map(RouteConfig::to_route).collect()
    }

    /// Validate names, scopes and the partition constraint.
    pub fn validate(&self) -> ConfigResult<()> {
        crate::router::validate_routes(&self.to_routes()?)
    }

    /// Validate and build a router.
    pub fn into_router(self) -> ConfigResult<Router> {
        self.to_routes()?
            .into_iter()
            .fold(Router::builder(), |builder, route| builder.add(route))
            .build()
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T>(key: &str, default: T) -> ConfigResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}
