//! Evaluation of a single resource
//!
//! Retrieves current state, compares it with the desired state and syncs
//! what differs, recording a [`Change`] and an [`Event`] for every property
//! that was out of sync. A failing property never stops the others.

use crate::context::ProviderContext;
use crate::error::{RetrieveError, StateError, SyncError};
use crate::event::{Event, EventStatus};
use crate::property::PropertyPhase;
use crate::provider::Provider;
use crate::report::{Change, ChangeStatus, LogLevel, Report, ResourceStatus};
use crate::resource::Resource;
use crate::storage::Storage;
use crate::value::Value;

/// Borrowed collaborators for evaluating one resource
pub struct Harness<'h, 'c> {
    pub provider: &'h mut dyn Provider,
    pub ctx: &'h mut ProviderContext<'c>,
    pub storage: &'h mut dyn Storage,
    pub report: &'h mut Report,
}

impl Harness<'_, '_> {
    /// Bring `resource` in line with its desired state
    pub fn evaluate(&mut self, resource: &mut Resource, status: &mut ResourceStatus) {
        self.retrieve(resource);

        for index in self.sync_targets(resource) {
            self.evaluate_property(resource, index, status);
        }

        self.audit(resource, status);

        if status.change_count > 0
            && let Err(err) = self.provider.flush(self.ctx, resource)
        {
            status.failed = true;
            self.report.log(
                LogLevel::Error,
                resource.to_string(),
                format!("could not flush changes: {err:#}"),
            );
        }
    }

    fn wanted(resource: &Resource, index: usize) -> bool {
        let property = &resource.properties[index];
        property.is_managed() || resource.is_audited(property.name())
    }

    /// Retrieve managed and audited properties; nothing else is read
    ///
    /// When the object does not exist every other property is absent too,
    /// so the provider is only asked for `ensure`.
    fn retrieve(&mut self, resource: &mut Resource) {
        let ensure = resource
            .properties
            .iter()
            .position(|p| p.spec().is_ensure());
        let mut absent = false;
        if let Some(index) = ensure.filter(|&i| Self::wanted(resource, i)) {
            let result = self
                .provider
                .retrieve(self.ctx, resource, "ensure")
                .map_err(|e| format!("{e:#}"));
            absent = matches!(result, Ok(Value::Absent));
            resource.properties[index].record_retrieve(result);
        }

        for index in 0..resource.properties.len() {
            if Some(index) == ensure || !Self::wanted(resource, index) {
                continue;
            }
            let result = if absent {
                Ok(Value::Absent)
            } else {
                let name = resource.properties[index].name();
                self.provider
                    .retrieve(self.ctx, resource, name)
                    .map_err(|e| format!("{e:#}"))
            };
            resource.properties[index].record_retrieve(result);
        }
    }

    /// Canonical `(should, is)` pair and whether they are in sync;
    /// `None` when nothing is desired or retrieval failed
    fn check(&mut self, resource: &Resource, index: usize) -> Option<(Value, Value, bool)> {
        let property = &resource.properties[index];
        let should = property.should()?;
        let is = property.is().ok()?;
        let name = property.name();
        let should = self.provider.canonicalize_should(self.ctx, resource, name, should);
        let is = self.provider.canonicalize(self.ctx, resource, name, is);
        let insync = property.insync(&should, &is);
        Some((should, is, insync))
    }

    /// Properties to evaluate, in priority order
    ///
    /// An out-of-sync `ensure` is synced alone since creating or removing
    /// the object takes care of everything else. A correctly absent
    /// object needs nothing more.
    fn sync_targets(&mut self, resource: &mut Resource) -> Vec<usize> {
        let mut targets: Vec<usize> = (0..resource.properties.len())
            .filter(|&i| resource.properties[i].is_managed())
            .collect();

        let Some(ensure) = targets
            .iter()
            .copied()
            .find(|&i| resource.properties[i].spec().is_ensure())
        else {
            return targets;
        };

        match self.check(resource, ensure) {
            Some((_, _, true)) => {
                resource.properties[ensure].mark(PropertyPhase::InSync);
                if resource.deleting() {
                    return Vec::new();
                }
                targets.retain(|&i| i != ensure);
                targets
            }
            _ => vec![ensure],
        }
    }

    fn evaluate_property(&mut self, resource: &mut Resource, index: usize, status: &mut ResourceStatus) {
        let source = resource.to_string();
        let property = &resource.properties[index];
        let name = property.name();
        let Some(should) = property.should().cloned() else {
            return;
        };

        if let Err(err) = property.is() {
            let message = match err {
                StateError::RetrieveFailed { message, .. } => message,
                other => other.to_string(),
            };
            let err = RetrieveError {
                resource: source.clone(),
                property: name.to_string(),
                message,
            };
            status.failed = true;
            status.changes.push(Change {
                resource: source.clone(),
                property: name.to_string(),
                is: None,
                should,
                status: ChangeStatus::Failure,
                message: err.to_string(),
                detail: None,
            });
            self.report.log(LogLevel::Error, source, err.to_string());
            return;
        }

        // Messages and events carry canonical values; sync gets the declared one
        let Some((desired, is, insync)) = self.check(resource, index) else {
            return;
        };
        if insync {
            resource.properties[index].mark(PropertyPhase::InSync);
            return;
        }

        let spec = resource.properties[index].spec();
        let message = spec.change_message(&is, &desired);
        let default_event = spec.event_for(resource.type_name(), &desired, &is);
        let invalidates = spec.invalidates_refresh(&desired);
        resource.properties[index].mark(PropertyPhase::NeedsChange);
        status.out_of_sync_count += 1;

        let detail = if self.ctx.show_diff {
            self.provider
                .describe_change(self.ctx, resource, name, &is, &should)
        } else {
            None
        };

        if self.ctx.noop {
            let message = format!("current_value '{is}', should be '{desired}' (noop)");
            self.report
                .log(LogLevel::Notice, source.clone(), format!("{name}: {message}"));
            status.changes.push(Change {
                resource: source.clone(),
                property: name.to_string(),
                is: Some(is.clone()),
                should: desired.clone(),
                status: ChangeStatus::Noop,
                message: message.clone(),
                detail,
            });
            status.events.push(
                Event::new(default_event, source, EventStatus::Noop, message)
                    .for_property(name, &is, &desired),
            );
            return;
        }

        match self.provider.sync(self.ctx, resource, name, &should) {
            Ok(event) => {
                resource.properties[index].mark(PropertyPhase::Applied);
                status.changed = true;
                status.change_count += 1;
                self.report
                    .log(LogLevel::Notice, source.clone(), format!("{name}: {message}"));
                status.changes.push(Change {
                    resource: source.clone(),
                    property: name.to_string(),
                    is: Some(is.clone()),
                    should: desired.clone(),
                    status: ChangeStatus::Success,
                    message: message.clone(),
                    detail,
                });
                status.events.push(
                    Event::new(event.unwrap_or(default_event), source, EventStatus::Success, message)
                        .for_property(name, &is, &desired)
                        .invalidating(invalidates),
                );
            }
            Err(err) => {
                let err = SyncError {
                    resource: source.clone(),
                    property: name.to_string(),
                    is: is.to_string(),
                    should: desired.to_string(),
                    message: format!("{err:#}"),
                };
                resource.properties[index].mark(PropertyPhase::Failed);
                status.failed = true;
                self.report.log(LogLevel::Error, source.clone(), err.to_string());
                status.changes.push(Change {
                    resource: source.clone(),
                    property: name.to_string(),
                    is: Some(is.clone()),
                    should: desired.clone(),
                    status: ChangeStatus::Failure,
                    message: err.to_string(),
                    detail,
                });
                status.events.push(
                    Event::new(default_event, source, EventStatus::Failure, err.to_string())
                        .for_property(name, &is, &desired),
                );
            }
        }
    }

    /// Compare audited properties with the values recorded last run
    fn audit(&mut self, resource: &Resource, status: &mut ResourceStatus) {
        let source = resource.to_string();
        for name in &resource.meta.audit {
            let Some(property) = resource.property(name) else {
                continue;
            };
            let Ok(current) = property.is().cloned() else {
                continue;
            };
            match self.storage.get(&resource.reference, name) {
                Some(previous) if !previous.loosely_eq(&current) => {
                    let message = format!(
                        "audit change: previously recorded value '{previous}' has been changed to '{current}'"
                    );
                    self.report
                        .log(LogLevel::Notice, source.clone(), format!("{name}: {message}"));
                    let event_name =
                        property
                            .spec()
                            .event_for(resource.type_name(), &current, &previous);
                    status.changes.push(Change {
                        resource: source.clone(),
                        property: name.clone(),
                        is: Some(previous.clone()),
                        should: current.clone(),
                        status: ChangeStatus::Audit,
                        message: message.clone(),
                        detail: None,
                    });
                    status.events.push(
                        Event::new(event_name, source.clone(), EventStatus::Audit, message)
                            .for_property(name, &previous, &current),
                    );
                }
                Some(_) => {}
                None => self.report.log(
                    LogLevel::Info,
                    source.clone(),
                    format!("{name}: audit change: newly-recorded value '{current}'"),
                ),
            }
            self.storage.set(&resource.reference, name, current);
        }
    }
}
