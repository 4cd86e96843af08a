//! Providers: the platform-specific half of a resource type
//!
//! A type describes *what* can be managed; providers know *how* on a given
//! host. Each provider is registered with a [`ProviderDescriptor`] carrying
//! its confinement rules and default-for matches, and a factory that builds
//! a fresh [`Provider`] for every resource it manages.

use crate::context::{Probe, ProviderContext};
use crate::error::ProviderSelectionError;
use crate::resource::Resource;
use crate::types::TypeRegistry;
use crate::value::Value;
use anyhow::Result;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

/// Per-resource implementation of retrieve/sync for one provider
pub trait Provider: fmt::Debug {
    /// Current value of `property`; `Value::Absent` when the object does not exist
    fn retrieve(
        &mut self,
        ctx: &mut ProviderContext<'_>,
        resource: &Resource,
        property: &str,
    ) -> Result<Value>;

    /// Make `property` equal `should`
    ///
    /// Returns an event name overriding the property's default, if any.
    fn sync(
        &mut self,
        ctx: &mut ProviderContext<'_>,
        resource: &Resource,
        property: &str,
        should: &Value,
    ) -> Result<Option<String>>;

    /// Normalise a value before comparison (e.g. user name to uid)
    fn canonicalize(
        &mut self,
        _ctx: &mut ProviderContext<'_>,
        _resource: &Resource,
        _property: &str,
        value: &Value,
    ) -> Value {
        value.clone()
    }

    /// Normalise a desired value; defaults to [`Provider::canonicalize`]
    ///
    /// Only the `should` side passes through here, for adjustments that
    /// must not apply to observed values (a directory's mode gaining search
    /// bits, `latest` becoming a version).
    fn canonicalize_should(
        &mut self,
        ctx: &mut ProviderContext<'_>,
        resource: &Resource,
        property: &str,
        should: &Value,
    ) -> Value {
        self.canonicalize(ctx, resource, property, should)
    }

    /// Extra human-readable detail about a pending change, such as a diff
    fn describe_change(
        &mut self,
        _ctx: &mut ProviderContext<'_>,
        _resource: &Resource,
        _property: &str,
        _is: &Value,
        _should: &Value,
    ) -> Option<String> {
        None
    }

    /// Called once after all changed properties were synced
    fn flush(&mut self, _ctx: &mut ProviderContext<'_>, _resource: &Resource) -> Result<()> {
        Ok(())
    }

    /// React to events from resources this one subscribes to
    fn refresh(&mut self, _ctx: &mut ProviderContext<'_>, resource: &Resource) -> Result<()> {
        anyhow::bail!("{resource} does not support refresh")
    }
}

/// A suitability condition on a provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confine {
    Exists(PathBuf),
    True(bool),
    False(bool),
    /// Fact must equal one of the values (case-insensitive)
    Fact {
        name: &'static str,
        values: Vec<&'static str>,
    },
    Feature(&'static str),
}

impl Confine {
    pub fn fact(name: &'static str, values: &[&'static str]) -> Self {
        Self::Fact {
            name,
            values: values.to_vec(),
        }
    }

    pub fn evaluate(&self, probe: &dyn Probe) -> bool {
        match self {
            Self::Exists(path) => probe.path_exists(path),
            Self::True(b) => *b,
            Self::False(b) => !*b,
            Self::Fact { name, values } => fact_matches(probe, name, values),
            Self::Feature(feature) => probe.has_feature(feature),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Exists(path) => format!("file {} does not exist", path.display()),
            Self::True(_) => "true value when expecting true".to_string(),
            Self::False(_) => "false value when expecting false".to_string(),
            Self::Fact { name, values } => {
                format!("fact '{name}' is not one of [{}]", values.join(", "))
            }
            Self::Feature(feature) => format!("feature {feature} is missing"),
        }
    }
}

fn fact_matches(probe: &dyn Probe, name: &str, values: &[&str]) -> bool {
    probe
        .fact(name)
        .is_some_and(|actual| values.iter().any(|v| v.eq_ignore_ascii_case(&actual)))
}

/// Factory building a provider instance for one resource
pub type ProviderFactory = fn() -> Box<dyn Provider>;

/// Registration record for a provider
#[derive(Clone)]
pub struct ProviderDescriptor {
    pub name: &'static str,
    pub type_name: &'static str,
    pub confines: Vec<Confine>,
    /// Executables that must be on the search path
    pub commands: Vec<&'static str>,
    /// Fact matches that make this provider the default; all must hold
    pub defaults: Vec<(&'static str, Vec<&'static str>)>,
    pub factory: ProviderFactory,
}

impl fmt::Debug for ProviderDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderDescriptor")
            .field("name", &self.name)
            .field("type_name", &self.type_name)
            .field("confines", &self.confines)
            .field("commands", &self.commands)
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

impl ProviderDescriptor {
    pub fn new(name: &'static str, type_name: &'static str, factory: ProviderFactory) -> Self {
        Self {
            name,
            type_name,
            confines: Vec::new(),
            commands: Vec::new(),
            defaults: Vec::new(),
            factory,
        }
    }

    pub fn confine(mut self, confine: Confine) -> Self {
        self.confines.push(confine);
        self
    }

    pub fn command(mut self, command: &'static str) -> Self {
        self.commands.push(command);
        self
    }

    pub fn default_for(mut self, fact: &'static str, values: &[&'static str]) -> Self {
        self.defaults.push((fact, values.to_vec()));
        self
    }

    /// Descriptions of every confine that does not hold on this host
    pub fn failed_confines(&self, probe: &dyn Probe) -> Vec<String> {
        let mut failed: Vec<String> = self
            .confines
            .iter()
            .filter(|c| !c.evaluate(probe))
            .map(Confine::describe)
            .collect();
        failed.extend(
            self.commands
                .iter()
                .filter(|cmd| probe.find_executable(cmd).is_none())
                .map(|cmd| format!("command {cmd} is missing")),
        );
        failed
    }

    pub fn is_suitable(&self, probe: &dyn Probe) -> bool {
        self.failed_confines(probe).is_empty()
    }

    /// Number of matching default-for facts; zero when not a default here
    pub fn default_specificity(&self, probe: &dyn Probe) -> usize {
        if self.defaults.is_empty() {
            return 0;
        }
        let all_match = self
            .defaults
            .iter()
            .all(|(fact, values)| fact_matches(probe, fact, values));
        if all_match { self.defaults.len() } else { 0 }
    }

    pub fn instantiate(&self) -> Box<dyn Provider> {
        (self.factory)()
    }
}

/// Chooses providers, memoising suitability for the life of a transaction
#[derive(Debug, Default)]
pub struct ProviderSelector {
    failures: HashMap<(&'static str, &'static str), Vec<String>>,
    warnings: Vec<(String, String)>,
}

impl ProviderSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Warnings raised by selections so far, as `(key, message)` pairs
    ///
    /// The same key repeats for every resource of a type.
    pub fn take_warnings(&mut self) -> Vec<(String, String)> {
        std::mem::take(&mut self.warnings)
    }

    fn failures(&mut self, descriptor: &ProviderDescriptor, probe: &dyn Probe) -> &[String] {
        self.failures
            .entry((descriptor.type_name, descriptor.name))
            .or_insert_with(|| descriptor.failed_confines(probe))
    }

    /// Pick the provider for `resource`
    ///
    /// An explicit `provider` must exist and be suitable. Otherwise the
    /// suitable default with the highest specificity wins (ties go to the
    /// earliest registered), then a lone suitable provider is accepted.
    pub fn select<'r>(
        &mut self,
        registry: &'r TypeRegistry,
        resource: &Resource,
        probe: &dyn Probe,
    ) -> Result<&'r ProviderDescriptor, ProviderSelectionError> {
        let candidates = registry.providers_for(resource.type_name());
        if candidates.is_empty() {
            return Err(ProviderSelectionError::NoProviders {
                resource: resource.to_string(),
                type_name: resource.type_name().to_string(),
            });
        }

        if let Some(wanted) = &resource.meta.provider {
            let descriptor = candidates
                .iter()
                .find(|p| p.name == wanted.as_str())
                .copied()
                .ok_or_else(|| ProviderSelectionError::UnknownProvider {
                    resource: resource.to_string(),
                    provider: wanted.clone(),
                })?;
            let reasons = self.failures(descriptor, probe).to_vec();
            if !reasons.is_empty() {
                return Err(ProviderSelectionError::Unsuitable {
                    resource: resource.to_string(),
                    provider: wanted.clone(),
                    reasons,
                });
            }
            return Ok(descriptor);
        }

        let mut suitable = Vec::new();
        let mut reasons = Vec::new();
        for descriptor in candidates {
            let failed = self.failures(descriptor, probe);
            if failed.is_empty() {
                suitable.push(descriptor);
            } else {
                reasons.push(format!("{}: {}", descriptor.name, failed.join(", ")));
            }
        }

        let mut best: Option<(&ProviderDescriptor, usize)> = None;
        for &descriptor in &suitable {
            let specificity = descriptor.default_specificity(probe);
            if specificity > 0 && best.is_none_or(|(_, s)| specificity > s) {
                best = Some((descriptor, specificity));
            }
        }
        if let Some((descriptor, specificity)) = best {
            let tied: Vec<&str> = suitable
                .iter()
                .filter(|p| p.default_specificity(probe) == specificity)
                .map(|p| p.name)
                .collect();
            if tied.len() > 1 {
                self.warnings.push((
                    format!("default-provider:{}", resource.type_name()),
                    format!(
                        "Found multiple default providers for {}: {}; using {}",
                        resource.type_name(),
                        tied.join(", "),
                        descriptor.name
                    ),
                ));
            }
            return Ok(descriptor);
        }

        match suitable.as_slice() {
            [only] => Ok(*only),
            [] => Err(ProviderSelectionError::NoneSuitable {
                resource: resource.to_string(),
                reasons,
            }),
            many => Err(ProviderSelectionError::Ambiguous {
                resource: resource.to_string(),
                candidates: many.iter().map(|p| p.name.to_string()).collect(),
            }),
        }
    }
}
