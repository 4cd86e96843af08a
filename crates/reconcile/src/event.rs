//! Events and their delivery along notify edges

use crate::catalog::{Catalog, EdgeKind};
use crate::resource::ResourceId;
use crate::value::Value;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Success,
    Failure,
    Noop,
    Audit,
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
            Self::Noop => write!(f, "noop"),
            Self::Audit => write!(f, "audit"),
        }
    }
}

/// Something that happened to a resource during a transaction
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub name: String,
    /// Reference of the resource that emitted the event
    pub resource: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub property: Option<String>,
    pub status: EventStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desired_value: Option<Value>,
    /// Receiving this event cancels refreshes already queued for the emitter
    pub invalidate_refreshes: bool,
    pub time: DateTime<Utc>,
}

impl Event {
    pub fn new(
        name: impl Into<String>,
        resource: impl Into<String>,
        status: EventStatus,
        message: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            resource: resource.into(),
            property: None,
            status,
            message: message.into(),
            previous_value: None,
            desired_value: None,
            invalidate_refreshes: false,
            time: Utc::now(),
        }
    }

    pub fn for_property(mut self, property: &str, previous: &Value, desired: &Value) -> Self {
        self.property = Some(property.to_string());
        self.previous_value = Some(previous.clone());
        self.desired_value = Some(desired.clone());
        self
    }

    pub fn invalidating(mut self, invalidate: bool) -> Self {
        self.invalidate_refreshes = invalidate;
        self
    }

    /// Whether the event may trigger a refresh downstream
    pub fn propagates(&self) -> bool {
        self.status != EventStatus::Failure
    }
}

/// Queues events per target until the target's turn comes
///
/// A target accumulates every event routed to it but is refreshed at most
/// once, when it is evaluated.
#[derive(Debug, Default)]
pub struct EventManager {
    queued: BTreeMap<ResourceId, Vec<Event>>,
}

impl EventManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route `events` emitted by `source` along its notify edges
    ///
    /// `accepts` filters targets, e.g. to those whose type can refresh.
    /// If any event invalidates refreshes, refreshes already queued for
    /// `source` itself are dropped first.
    pub fn queue_events(
        &mut self,
        catalog: &Catalog,
        source: ResourceId,
        events: &[Event],
        accepts: impl Fn(ResourceId) -> bool,
    ) -> usize {
        if events.iter().any(|e| e.invalidate_refreshes)
            && let Some(dropped) = self.queued.remove(&source)
        {
            log::info!(
                "{}: unscheduling refresh from {} event(s)",
                catalog.resource(source),
                dropped.len()
            );
        }

        let mut queued = 0;
        for edge in catalog.edges_from(source) {
            if edge.kind != EdgeKind::Notify || !accepts(edge.target) {
                continue;
            }
            let matching: Vec<Event> = events
                .iter()
                .filter(|e| e.propagates() && edge.trigger.matches(&e.name))
                .cloned()
                .collect();
            if matching.is_empty() {
                continue;
            }
            log::debug!(
                "{}: scheduling refresh of {}",
                catalog.resource(source),
                catalog.resource(edge.target)
            );
            queued += matching.len();
            self.queued.entry(edge.target).or_default().extend(matching);
        }
        queued
    }

    pub fn queued(&self, target: ResourceId) -> &[Event] {
        self.queued.get(&target).map(Vec::as_slice).unwrap_or_default()
    }

    /// Remove and return everything queued for `target`
    pub fn take_queued(&mut self, target: ResourceId) -> Vec<Event> {
        self.queued.remove(&target).unwrap_or_default()
    }

    /// Drop queued events for a target that will not be evaluated
    pub fn discard(&mut self, target: ResourceId) {
        if let Some(dropped) = self.queued.remove(&target) {
            log::debug!("discarding {} queued event(s)", dropped.len());
        }
    }
}
