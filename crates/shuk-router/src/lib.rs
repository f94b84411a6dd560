//! # Shuk Router
//!
//! Classification and fan-out routing for object-store uploads.
//!
//! ## Overview
//!
//! The shuk-router crate handles:
//! - **Rules**: suffix, scope and composite predicates over upload events
//! - **Router**: evaluates every route and returns a `RoutingDecision`
//! - **Config**: JSON and environment loading with overlap validation
//! - **Pipeline**: hands each action to its topic or dispatcher
//! - **Source**: drains notifications from a channel into the pipeline
//!
//! ## Usage
//!
//! ```rust,no_run
//! use shuk_router::RoutingConfig;
//! use shuk_events::UploadEvent;
//!
//! let router = RoutingConfig::standard("videos", ".mov", "upload-topic", "convert-mov", 7200, 2)
//!     .into_router()
//!     .unwrap();
//!
//! let decision = router.route(&UploadEvent::try_new("videos", "clip.mov").unwrap());
//! assert!(decision.dispatches_to("convert-mov"));
//! ```
//!
//! ## Routing Model
//!
//! Every route is evaluated for every event. In the standard layout the
//! generic and special routes are complementary, so an upload in scope
//! takes exactly one path, and an upload outside the scope takes none.

pub mod config;
pub mod error;
pub mod pipeline;
pub mod router;
pub mod rules;
pub mod source;

// Re-export main types
pub use config::{RouteConfig, RoutingConfig, TargetConfig};
pub use error::{ConfigError, ConfigResult};
pub use pipeline::{DeliveryReport, Pipeline, PipelineBuilder, TargetFailure};
pub use router::{Action, Route, RouteTarget, RoutedAction, Router, RouterBuilder, RoutingDecision};
pub use rules::{CompositeRule, Rule, ScopeRule, SuffixRule};
pub use source::{EventSource, SourceStats};
