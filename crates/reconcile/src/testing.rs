//! In-memory resource types and providers for engine tests
//!
//! `thing` resources live in a thread-local world so a test can seed state,
//! inject failures and inspect every provider call afterwards.

use crate::catalog::Catalog;
use crate::context::{CommandOutput, CommandRunner, ProviderContext, StaticProbe};
use crate::property::PropertySpec;
use crate::provider::{Provider, ProviderDescriptor};
use crate::resource::{Resource, ResourceDecl};
use crate::types::{ParamSpec, TypeDescriptor, TypeRegistry};
use crate::value::Value;
use anyhow::Result;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

#[derive(Debug, Default)]
pub struct World {
    /// Existing objects by name, with their property values
    pub objects: BTreeMap<String, BTreeMap<String, Value>>,
    pub calls: Vec<String>,
    pub fail_sync: HashSet<(String, String)>,
    pub fail_retrieve: HashSet<(String, String)>,
    pub fail_refresh: HashSet<String>,
}

thread_local! {
    static WORLD: RefCell<World> = RefCell::new(World::default());
}

pub fn world<R>(f: impl FnOnce(&mut World) -> R) -> R {
    WORLD.with(|w| f(&mut w.borrow_mut()))
}

pub fn reset() {
    world(|w| *w = World::default());
}

pub fn seed(name: &str, props: &[(&str, &str)]) {
    world(|w| {
        w.objects.insert(
            name.to_string(),
            props
                .iter()
                .map(|(k, v)| ((*k).to_string(), Value::from(*v)))
                .collect(),
        );
    });
}

pub fn calls() -> Vec<String> {
    world(|w| w.calls.clone())
}

/// Provider calls that change something
pub fn mutations() -> Vec<String> {
    calls()
        .into_iter()
        .filter(|c| !c.starts_with("retrieve"))
        .collect()
}

#[derive(Debug)]
struct Memory;

impl Provider for Memory {
    fn retrieve(
        &mut self,
        _ctx: &mut ProviderContext<'_>,
        resource: &Resource,
        property: &str,
    ) -> Result<Value> {
        world(|w| {
            w.calls.push(format!("retrieve {} {property}", resource.name));
            if w
                .fail_retrieve
                .contains(&(resource.name.clone(), property.to_string()))
            {
                anyhow::bail!("cannot read {property}");
            }
            let Some(object) = w.objects.get(&resource.name) else {
                return Ok(Value::Absent);
            };
            if property == "ensure" {
                return Ok(Value::Present);
            }
            Ok(object.get(property).cloned().unwrap_or(Value::Absent))
        })
    }

    fn sync(
        &mut self,
        _ctx: &mut ProviderContext<'_>,
        resource: &Resource,
        property: &str,
        should: &Value,
    ) -> Result<Option<String>> {
        world(|w| {
            w.calls
                .push(format!("sync {} {property}={should}", resource.name));
            if w
                .fail_sync
                .contains(&(resource.name.clone(), property.to_string()))
            {
                anyhow::bail!("refusing to set {property}");
            }
            if property == "ensure" {
                if should.is_absent() {
                    w.objects.remove(&resource.name);
                } else {
                    let props = resource
                        .properties
                        .iter()
                        .filter(|p| !p.spec().is_ensure())
                        .filter_map(|p| Some((p.name().to_string(), p.should()?.clone())))
                        .collect();
                    w.objects.insert(resource.name.clone(), props);
                }
            } else {
                w.objects
                    .entry(resource.name.clone())
                    .or_default()
                    .insert(property.to_string(), should.clone());
            }
            Ok(None)
        })
    }

    fn flush(&mut self, _ctx: &mut ProviderContext<'_>, resource: &Resource) -> Result<()> {
        world(|w| w.calls.push(format!("flush {}", resource.name)));
        Ok(())
    }

    fn refresh(&mut self, _ctx: &mut ProviderContext<'_>, resource: &Resource) -> Result<()> {
        world(|w| {
            w.calls.push(format!("refresh {}", resource.name));
            if w.fail_refresh.contains(&resource.name) {
                anyhow::bail!("restart failed");
            }
            Ok(())
        })
    }
}

pub fn memory() -> Box<dyn Provider> {
    Box::new(Memory)
}

fn generate_children(resource: &Resource, _catalog: &Catalog) -> Result<Vec<ResourceDecl>> {
    if resource.param_bool("broken") {
        anyhow::bail!("cannot list children of {}", resource.name);
    }
    Ok(resource
        .param("children")
        .map(Value::strings)
        .unwrap_or_default()
        .into_iter()
        .map(|child| ResourceDecl::new("thing", child).with("ensure", "present"))
        .collect())
}

/// Types `thing` (refreshable), `plain` (not refreshable) and `bundle`
/// (generates `thing`s), all backed by the in-memory provider
pub fn registry() -> TypeRegistry {
    let mut registry = TypeRegistry::new();
    registry.register_type(
        TypeDescriptor::new("thing", "name")
            .property(PropertySpec::ensure())
            .property(PropertySpec::new("color"))
            .property(
                PropertySpec::new("state")
                    .value_event("running", "thing_started")
                    .invalidates_refresh_on("running"),
            )
            .refreshable(),
    );
    registry.register_type(
        TypeDescriptor::new("plain", "name")
            .property(PropertySpec::ensure())
            .property(PropertySpec::new("color")),
    );
    registry.register_type(
        TypeDescriptor::new("bundle", "name")
            .property(PropertySpec::ensure())
            .parameter(ParamSpec::new("children"))
            .parameter(ParamSpec::new("broken"))
            .generator(generate_children),
    );
    for type_name in ["thing", "plain", "bundle"] {
        registry.register_provider(ProviderDescriptor::new("memory", type_name, memory));
    }
    registry
}

/// Runner for tests that must never spawn anything
pub struct NoCommands;

impl CommandRunner for NoCommands {
    fn run_in(&self, _cwd: Option<&Path>, cmd: &str, _args: &[&str]) -> Result<CommandOutput> {
        anyhow::bail!("unexpected command: {cmd}")
    }
}

pub fn probe() -> StaticProbe {
    StaticProbe::new().with_fact("kernel", "Linux")
}
