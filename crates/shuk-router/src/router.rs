//! Router
//!
//! Evaluates every registered route against an event and collects the
//! resulting actions. The router only decides; the pipeline delivers.

use crate::error::{ConfigError, ConfigResult};
use crate::rules::{CompositeRule, Rule};
use chrono::{DateTime, Utc};
use shuk_dispatch::{DispatchEnvelope, DispatchOptions};
use shuk_events::UploadEvent;
use std::collections::HashSet;

/// Where a matching route sends the event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteTarget {
    /// Publish to a fan-out topic
    Topic { topic: String },
    /// Invoke a dispatch target directly
    Dispatch {
        target: String,
        options: DispatchOptions,
    },
}

impl RouteTarget {
    pub fn topic(topic: impl Into<String>) -> Self {
        RouteTarget::Topic {
            topic: topic.into(),
        }
    }

    pub fn dispatch(target: impl Into<String>, options: DispatchOptions) -> Self {
        RouteTarget::Dispatch {
            target: target.into(),
            options,
        }
    }

    /// Topic or dispatch target name.
    pub fn name(&self) -> &str {
        match self {
            RouteTarget::Topic { topic } => topic,
            RouteTarget::Dispatch { target, .. } => target,
        }
    }

    pub fn is_dispatch(&self) -> bool {
        matches!(self, RouteTarget::Dispatch { .. })
    }
}

/// A named rule bound to a target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub name: String,
    pub rule: CompositeRule,
    pub target: RouteTarget,
}

impl Route {
    pub fn new(name: impl Into<String>, rule: CompositeRule, target: RouteTarget) -> Self {
        Self {
            name: name.into(),
            rule,
            target,
        }
    }
}

/// One thing to do with an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Publish {
        topic: String,
        event: UploadEvent,
    },
    Dispatch {
        target: String,
        envelope: DispatchEnvelope,
        options: DispatchOptions,
        event_time: DateTime<Utc>,
    },
}

/// An action together with the route that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedAction {
    pub route: String,
    pub action: Action,
}

/// Every action produced for one event, in route registration order.
///
/// An empty decision means no route matched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingDecision {
    actions: Vec<RoutedAction>,
}

impl RoutingDecision {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn actions(&self) -> &[RoutedAction] {
        &self.actions
    }

    /// Whether the decision publishes to `topic`.
    pub fn publishes_to(&self, topic: &str) -> bool {
        self.actions
            .iter()
            .any(|a| matches!(&a.action, Action::Publish { topic: t, .. } if t == topic))
    }

    /// Whether the decision dispatches to `target`.
    pub fn dispatches_to(&self, target: &str) -> bool {
        self.actions
            .iter()
            .any(|a| matches!(&a.action, Action::Dispatch { target: t, .. } if t == target))
    }

    /// Names of the routes that matched.
    pub fn matched_routes(&self) -> Vec<String> {
        self.actions.iter().map(|a| a.route.clone()).collect()
    }
}

impl IntoIterator for RoutingDecision {
    type Item = RoutedAction;
    type IntoIter = std::vec::IntoIter<RoutedAction>;

    fn into_iter(self) -> Self::IntoIter {
        self.actions.into_iter()
    }
}

/// Immutable set of routes.
#[derive(Debug, Clone, Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn builder() -> RouterBuilder {
        RouterBuilder::default()
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Classify an event against every route.
    ///
    /// All routes are evaluated; a match never stops evaluation of the
    /// remaining ones.
    pub fn route(&self, event: &UploadEvent) -> RoutingDecision {
        let actions: Vec<RoutedAction> = self
            .routes
            .iter()
            .filter(|route| route.rule.matches(event))
            .map(|route| RoutedAction {
                route: route.name.clone(),
                action: match &route.target {
                    RouteTarget::Topic { topic } => Action::Publish {
                        topic: topic.clone(),
                        event: event.clone(),
                    },
                    RouteTarget::Dispatch { target, options } => Action::Dispatch {
                        target: target.clone(),
                        envelope: DispatchEnvelope::from_event(event),
                        options: *options,
                        event_time: event.timestamp(),
                    },
                },
            })
            .collect();

        if actions.is_empty() {
            tracing::debug!(
                event_id = %event.id(),
                bucket = event.bucket_name(),
                key = event.object_key(),
                extension = ?event.extension(),
                "No route matched"
            );
        }

        RoutingDecision { actions }
    }
}

/// Builder for [`Router`].
#[derive(Debug, Default)]
pub struct RouterBuilder {
    routes: Vec<Route>,
}

impl RouterBuilder {
    /// Append a route. Registration order is evaluation order.
    pub fn route(mut self, name: impl Into<String>, rule: CompositeRule, target: RouteTarget) -> Self {
        self.routes.push(Route::new(name, rule, target));
        self
    }

    pub fn add(mut self, route: Route) -> Self {
        self.routes.push(route);
        self
    }

    /// Validate the route set and build the router.
    pub fn build(self) -> ConfigResult<Router> {
        validate_routes(&self.routes)?;
        Ok(Router {
            routes: self.routes,
        })
    }
}

/// Checks names and the partition constraint.
///
/// Within one bucket, a route that dispatches directly must not share any
/// key with another route. Topic routes may overlap each other.
pub fn validate_routes(routes: &[Route]) -> ConfigResult<()> {
    let mut names = HashSet::new();
    for route in routes {
        if route.name.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "name".to_string(),
                message: "route name must not be empty".to_string(),
            });
        }
        if route.rule.scope().bucket().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: format!("{}.bucketScope", route.name),
                message: "bucket scope must not be empty".to_string(),
            });
        }
        if route.target.name().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: format!("{}.target", route.name),
                message: "target name must not be empty".to_string(),
            });
        }
        if !names.insert(route.name.as_str()) {
            return Err(ConfigError::DuplicateRoute(route.name.clone()));
        }
    }

    for (i, first) in routes.iter().enumerate() {
        for second in &routes[i + 1..] {
            if first.rule.scope() != second.rule.scope() {
                continue;
            }
            if !first.target.is_dispatch() && !second.target.is_dispatch() {
                continue;
            }
            if first.rule.suffix().overlaps(second.rule.suffix()) {
                return Err(ConfigError::OverlappingRules {
                    scope: first.rule.scope().bucket().to_string(),
                    first: first.name.clone(),
                    second: second.name.clone(),
                });
            }
        }
    }

    Ok(())
}
