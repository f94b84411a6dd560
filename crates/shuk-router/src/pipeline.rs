//! Delivery pipeline
//!
//! Routes an event and hands each action to its collaborator: publishes go
//! to topics (concurrently, awaited), dispatches are spawned and never
//! awaited. A failing or missing target is logged and reported; it never
//! affects the other actions of the same event.

use crate::error::{ConfigError, ConfigResult};
use crate::router::{Action, RouteTarget, Router};
use futures::future::join_all;
use shuk_dispatch::{DispatchOutcome, Dispatcher};
use shuk_events::{Topic, UploadEvent};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// A target that could not take its action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetFailure {
    pub route: String,
    pub target: String,
    pub error: String,
}

/// What happened to one event.
#[derive(Debug)]
pub struct DeliveryReport {
    pub event_id: Uuid,
    /// Routes that matched, in registration order
    pub matched_routes: Vec<String>,
    /// Topics the event was published to
    pub published: Vec<String>,
    /// Spawned dispatches, by target name
    pub dispatched: Vec<(String, JoinHandle<DispatchOutcome>)>,
    /// Actions that could not be handed off
    pub failures: Vec<TargetFailure>,
}

impl DeliveryReport {
    fn new(event_id: Uuid) -> Self {
        Self {
            event_id,
            matched_routes: Vec::new(),
            published: Vec::new(),
            dispatched: Vec::new(),
            failures: Vec::new(),
        }
    }

    /// No route matched the event.
    pub fn is_miss(&self) -> bool {
        self.matched_routes.is_empty()
    }

    /// Wait for every spawned dispatch to finish.
    ///
    /// A dispatch task that panicked is reported as exhausted with zero
    /// attempts.
    pub async fn wait_dispatches(&mut self) -> Vec<(String, DispatchOutcome)> {
        let mut outcomes = Vec::with_capacity(self.dispatched.len());
        for (target, handle) in self.dispatched.drain(..) {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(dispatch_target = %target, error = %e, "Dispatch task failed");
                    DispatchOutcome::Exhausted { attempts: 0 }
                }
            };
            outcomes.push((target, outcome));
        }
        outcomes
    }
}

/// Router plus the topics and dispatchers its routes name.
pub struct Pipeline {
    router: Router,
    topics: HashMap<String, Arc<dyn Topic>>,
    dispatchers: HashMap<String, Arc<Dispatcher>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("routes", &self.router.routes().len())
            .field("topics", &self.topics.keys().collect::<Vec<_>>())
            .field("dispatchers", &self.dispatchers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Pipeline {
    pub fn builder(router: Router) -> PipelineBuilder {
        PipelineBuilder {
            router,
            topics: HashMap::new(),
            dispatchers: HashMap::new(),
            strict: true,
        }
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Route one event and hand off every resulting action.
    ///
    /// Returns once all publishes have completed; dispatches keep running
    /// on their own tasks.
    pub async fn handle(&self, event: UploadEvent) -> DeliveryReport {
        let mut report = DeliveryReport::new(event.id());
        let decision = self.router.route(&event);
        report.matched_routes = decision.matched_routes();

        let mut publishes = Vec::new();
        for routed in decision {
            match routed.action {
                Action::Publish { topic, event } => match self.topics.get(&topic) {
                    Some(handle) => {
                        let handle = Arc::clone(handle);
                        let route = routed.route;
                        publishes.push(async move {
                            let result = handle.publish(event).await;
                            (route, topic, result)
                        });
                    }
                    None => report.failures.push(self.missing(routed.route, topic, "topic")),
                },
                Action::Dispatch {
                    target,
                    envelope,
                    options,
                    event_time,
                } => match self.dispatchers.get(&target) {
                    Some(dispatcher) => {
                        tracing::debug!(
                            event_id = %report.event_id,
                            dispatch_target = %target,
                            input_key = envelope.input_key(),
                            extension = ?event.extension(),
                            "Dispatch spawned"
                        );
                        let handle = dispatcher.spawn(envelope, options, event_time);
                        report.dispatched.push((target, handle));
                    }
                    None => report.failures.push(self.missing(routed.route, target, "dispatcher")),
                },
            }
        }

        for (route, topic, result) in join_all(publishes).await {
            match result {
                Ok(()) => {
                    tracing::debug!(event_id = %report.event_id, topic = %topic, "Event published");
                    report.published.push(topic);
                }
                Err(e) => {
                    tracing::warn!(
                        event_id = %report.event_id,
                        route = %route,
                        topic = %topic,
                        error = %e,
                        "Publish failed"
                    );
                    report.failures.push(TargetFailure {
                        route,
                        target: topic,
                        error: e.to_string(),
                    });
                }
            }
        }

        report
    }

    fn missing(&self, route: String, target: String, kind: &str) -> TargetFailure {
        tracing::warn!(route = %route, target_name = %target, kind, "Route target not registered");
        TargetFailure {
            error: format!("unknown {} '{}'", kind, target),
            route,
            target,
        }
    }
}

/// Builder for [`Pipeline`].
pub struct PipelineBuilder {
    router: Router,
    topics: HashMap<String, Arc<dyn Topic>>,
    dispatchers: HashMap<String, Arc<Dispatcher>>,
    strict: bool,
}

impl PipelineBuilder {
    /// Register a topic under its own name.
    pub fn topic(mut self, topic: Arc<dyn Topic>) -> Self {
        self.topics.insert(topic.name().to_string(), topic);
        self
    }

    /// Register a dispatcher under its target's name.
    pub fn dispatcher(mut self, dispatcher: Arc<Dispatcher>) -> Self {
        self.dispatchers.insert(dispatcher.name().to_string(), dispatcher);
        self
    }

    /// Allow routes whose targets are not registered. Their actions are
    /// reported as failures at delivery time.
    pub fn allow_unknown_targets(mut self) -> Self {
        self.strict = false;
        self
    }

    pub fn build(self) -> ConfigResult<Pipeline> {
        if self.strict {
            for route in self.router.routes() {
                let (known, kind) = match &route.target {
                    RouteTarget::Topic { topic } => (self.topics.contains_key(topic), "topic"),
                    RouteTarget::Dispatch { target, .. } => {
                        (self.dispatchers.contains_key(target), "dispatcher")
                    }
                };
                if !known {
                    return Err(ConfigError::UnknownTarget {
                        route: route.name.clone(),
                        kind,
                        target: route.target.name().to_string(),
                    });
                }
            }
        }

        Ok(Pipeline {
            router: self.router,
            topics: self.topics,
            dispatchers: self.dispatchers,
        })
    }
}
