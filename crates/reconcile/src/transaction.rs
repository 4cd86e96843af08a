//! Transactions: one ordered pass over a catalog
//!
//! A transaction resolves relationships, refuses to start on a cyclic
//! graph, expands generated resources, sorts the graph and then visits each
//! resource in order. Events flow along notify edges and queued refreshes
//! are processed when the target's turn comes, after its own changes.

use crate::catalog::Catalog;
use crate::context::{CommandRunner, ListingCache, Probe, ProgressCallback, ProviderContext};
use crate::error::{GenerationError, TransactionError};
use crate::event::{Event, EventManager, EventStatus};
use crate::harness::Harness;
use crate::provider::{Provider, ProviderSelector};
use crate::report::{LogLevel, Report, ResourceStatus};
use crate::resource::{Resource, ResourceId};
use crate::storage::Storage;
use crate::types::{TypeDescriptor, TypeRegistry};
use crate::value::Value;
use chrono::Utc;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionPhase {
    Built,
    CycleChecked,
    Generating,
    Sorted,
    Executing,
    Complete,
}

#[derive(Debug, Clone)]
pub struct TransactionOptions {
    /// Simulate changes instead of making them
    pub noop: bool,
    /// Let providers compute diffs for pending changes
    pub show_diff: bool,
    pub max_generation_rounds: usize,
    /// Evaluate only resources carrying one of these tags; empty means all
    pub tags: Vec<String>,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            noop: false,
            show_diff: false,
            max_generation_rounds: 32,
            tags: Vec::new(),
        }
    }
}

/// Cooperative cancellation flag, checked between resources
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct Transaction<'a> {
    catalog: Catalog,
    registry: &'a TypeRegistry,
    runner: &'a dyn CommandRunner,
    probe: &'a dyn Probe,
    storage: &'a mut dyn Storage,
    options: TransactionOptions,
    interrupt: Interrupt,
    phase: TransactionPhase,
    events: EventManager,
    cache: ListingCache,
    selector: ProviderSelector,
    report: Report,
    generation_failures: BTreeMap<ResourceId, GenerationError>,
}

impl<'a> Transaction<'a> {
    pub fn new(
        catalog: Catalog,
        registry: &'a TypeRegistry,
        runner: &'a dyn CommandRunner,
        probe: &'a dyn Probe,
        storage: &'a mut dyn Storage,
    ) -> Self {
        Self {
            catalog,
            registry,
            runner,
            probe,
            storage,
            options: TransactionOptions::default(),
            interrupt: Interrupt::new(),
            phase: TransactionPhase::Built,
            events: EventManager::new(),
            cache: ListingCache::new(),
            selector: ProviderSelector::new(),
            report: Report::new(false),
            generation_failures: BTreeMap::new(),
        }
    }

    pub fn with_options(mut self, options: TransactionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn phase(&self) -> TransactionPhase {
        self.phase
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    fn enter(&mut self, phase: TransactionPhase) {
        log::debug!("transaction phase: {phase:?}");
        self.phase = phase;
    }

    /// Run the transaction to completion
    ///
    /// Structural problems (invalid relationships, cycles) abort before any
    /// provider is called. Everything else is recorded in the report.
    pub fn evaluate(
        mut self,
        progress: &mut dyn ProgressCallback,
    ) -> Result<Report, TransactionError> {
        self.report = Report::new(self.options.noop);
        self.cache.clear();

        self.catalog.resolve_relationships(self.registry)?;
        self.enter(TransactionPhase::Built);
        self.catalog.relationship_graph().check_acyclic()?;
        self.enter(TransactionPhase::CycleChecked);

        self.generate()?;

        let graph = self.catalog.relationship_graph();
        let order = graph.toposort()?;
        self.enter(TransactionPhase::Sorted);
        log::debug!("evaluation order has {} resources", order.len());

        progress.on_start(order.len());
        let mut blocked: HashSet<ResourceId> = HashSet::new();

        for id in order {
            if self.phase == TransactionPhase::Sorted {
                self.enter(TransactionPhase::Executing);
            }
            let reference = self.catalog.resource(id).reference.clone();
            let failed_dependency = graph
                .upstream(id)
                .into_iter()
                .map(|(upstream, _)| upstream)
                .find(|upstream| blocked.contains(upstream));

            let status = if self.interrupt.is_triggered() {
                ResourceStatus::skipped(self.catalog.resource(id), "transaction interrupted")
            } else if !self.options.tags.is_empty()
                && !self.catalog.resource(id).tagged(&self.options.tags)
            {
                log::debug!("{reference}: not tagged with {}", self.options.tags.join(", "));
                let status = ResourceStatus::skipped(
                    self.catalog.resource(id),
                    format!("not tagged with {}", self.options.tags.join(", ")),
                );
                self.events.discard(id);
                progress.on_resource_complete(&reference, &status);
                self.report.add_status(status);
                continue;
            } else if let Some(dependency) = failed_dependency {
                let dependency = self.catalog.resource(dependency).to_string();
                self.report.log(
                    LogLevel::Warning,
                    reference.to_string(),
                    format!("Skipping because of failed dependency {dependency}"),
                );
                ResourceStatus::skipped(
                    self.catalog.resource(id),
                    format!("dependency {dependency} failed"),
                )
            } else {
                progress.on_resource_start(&reference);
                self.apply(id)
            };

            if status.skipped {
                self.events.discard(id);
            }
            if status.blocks_dependents() {
                blocked.insert(id);
            }
            progress.on_resource_complete(&reference, &status);
            self.report.add_status(status);
        }

        if self.interrupt.is_triggered() {
            self.report.log(
                LogLevel::Warning,
                "transaction",
                "interrupted; remaining resources were skipped",
            );
        }

        self.enter(TransactionPhase::Complete);
        progress.on_complete();
        self.cache.clear();
        if let Err(err) = self.storage.flush() {
            self.report.log(
                LogLevel::Error,
                "storage",
                format!("could not save state: {err:#}"),
            );
        }
        self.report.finalize();
        Ok(self.report)
    }

    /// Expand generators until no new resources appear
    fn generate(&mut self) -> Result<(), TransactionError> {
        self.enter(TransactionPhase::Generating);
        let mut frontier: Vec<ResourceId> = (0..self.catalog.len()).map(ResourceId).collect();
        let mut rounds = 0;

        while !frontier.is_empty() {
            if rounds == self.options.max_generation_rounds {
                for id in frontier {
                    if self.generator_for(id).is_some() {
                        let message = format!("gave up after {rounds} rounds of generation");
                        self.fail_generation(id, message);
                    }
                }
                break;
            }
            rounds += 1;

            let mut next = Vec::new();
            for id in frontier {
                let Some(generator) = self.generator_for(id) else {
                    continue;
                };
                match generator(self.catalog.resource(id), &self.catalog) {
                    Ok(decls) => {
                        for decl in decls {
                            match self.catalog.add_generated(self.registry, id, &decl) {
                                Ok(Some(child)) => next.push(child),
                                Ok(None) => {}
                                Err(err) => self.fail_generation(id, err.to_string()),
                            }
                        }
                    }
                    Err(err) => self.fail_generation(id, format!("{err:#}")),
                }
            }
            self.catalog.resolve_relationships(self.registry)?;
            frontier = next;
        }
        Ok(())
    }

    fn generator_for(&self, id: ResourceId) -> Option<crate::types::Generator> {
        self.registry
            .get(self.catalog.resource(id).type_name())
            .and_then(TypeDescriptor::generator_fn)
    }

    fn fail_generation(&mut self, id: ResourceId, message: String) {
        let err = GenerationError {
            resource: self.catalog.resource(id).to_string(),
            message,
        };
        self.report
            .log(LogLevel::Error, err.resource.clone(), err.to_string());
        self.generation_failures.entry(id).or_insert(err);
    }

    /// Evaluate one resource, then deliver its events and process any
    /// refresh queued for it
    fn apply(&mut self, id: ResourceId) -> ResourceStatus {
        let started = Instant::now();
        let resource = self.catalog.resource(id);
        let mut status = ResourceStatus::new(resource);

        let selected = self.selector.select(self.registry, resource, self.probe);
        for (key, message) in self.selector.take_warnings() {
            self.report.warn_once(&key, resource.type_name(), message);
        }
        let descriptor = match selected {
            Ok(descriptor) => descriptor,
            Err(err) => {
                status.failed = true;
                self.report
                    .log(LogLevel::Error, resource.to_string(), err.to_string());
                return status;
            }
        };
        status.provider = Some(descriptor.name.to_string());
        let noop = resource.is_noop(self.options.noop);
        let mut provider = descriptor.instantiate();

        let mut ctx = ProviderContext {
            runner: self.runner,
            probe: self.probe,
            cache: &mut self.cache,
            noop,
            show_diff: self.options.show_diff,
        };

        Harness {
            provider: provider.as_mut(),
            ctx: &mut ctx,
            storage: &mut *self.storage,
            report: &mut self.report,
        }
        .evaluate(self.catalog.resource_mut(id), &mut status);

        if self.generation_failures.contains_key(&id) {
            status.failed = true;
        }

        let registry = self.registry;
        let catalog = &self.catalog;
        self.events.queue_events(catalog, id, &status.events, |target| {
            refreshable(registry, catalog, target)
        });

        let queued = self.events.take_queued(id);
        if !queued.is_empty() {
            let resource = self.catalog.resource(id);
            let emitted = refresh(
                resource,
                provider.as_mut(),
                &mut ctx,
                &queued,
                &mut self.report,
                &mut status,
            );
            let catalog = &self.catalog;
            self.events.queue_events(catalog, id, &emitted, |target| {
                refreshable(registry, catalog, target)
            });
        }

        self.storage.set(
            &self.catalog.resource(id).reference,
            "checked",
            Value::String(Utc::now().to_rfc3339()),
        );
        status.evaluation_time = started.elapsed().as_secs_f64();
        status
    }
}

fn refreshable(registry: &TypeRegistry, catalog: &Catalog, target: ResourceId) -> bool {
    registry
        .get(catalog.resource(target).type_name())
        .is_some_and(TypeDescriptor::is_refreshable)
}

/// Process refresh events queued for `resource`; returns events to deliver
/// further downstream
fn refresh(
    resource: &Resource,
    provider: &mut dyn Provider,
    ctx: &mut ProviderContext<'_>,
    queued: &[Event],
    report: &mut Report,
    status: &mut ResourceStatus,
) -> Vec<Event> {
    let source = resource.to_string();
    let count = queued.len();
    let plural = if count == 1 { "" } else { "s" };

    if resource.deleting() {
        report.log(
            LogLevel::Debug,
            source,
            format!("not refreshing from {count} event{plural}; resource is being removed"),
        );
        return Vec::new();
    }

    let noop_only = queued.iter().all(|e| e.status == EventStatus::Noop);
    if noop_only || ctx.noop {
        let message = format!("Would have triggered 'refresh' from {count} event{plural}");
        report.log(LogLevel::Notice, source.clone(), message.clone());
        let event = Event::new("noop_restart", source, EventStatus::Noop, message);
        status.events.push(event.clone());
        return vec![event];
    }

    match provider.refresh(ctx, resource) {
        Ok(()) => {
            let message = format!("Triggered 'refresh' from {count} event{plural}");
            report.log(LogLevel::Notice, source.clone(), message.clone());
            status.restarted = true;
            let event = Event::new("restarted", source, EventStatus::Success, message);
            status.events.push(event.clone());
            vec![event]
        }
        Err(err) => {
            let message = format!("Failed to call refresh: {err:#}");
            report.log(LogLevel::Error, source.clone(), message.clone());
            status.failed_to_restart = true;
            status
                .events
                .push(Event::new("restarted", source, EventStatus::Failure, message));
            Vec::new()
        }
    }
}
