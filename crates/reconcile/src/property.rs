//! Attributes and their retrieve / compare / sync state machine
//!
//! A [`PropertySpec`] is the schema a type declares once; a [`Property`] is
//! the per-resource instance carrying the desired value and whatever was
//! observed on the system.

use crate::error::StateError;
use crate::resource::ResourceId;
use crate::value::Value;
use std::fmt;
use std::sync::Arc;

/// Validation and normalisation applied to a declared value
pub type Munge = fn(&Value) -> Result<Value, String>;

/// Equality policy used to decide whether a property is in sync
#[derive(Clone, Copy)]
pub enum Comparison {
    /// Loose equality (`644` equals `"644"`)
    Exact,
    /// Present/absent aware: `Present` accepts any existing state,
    /// `Absent` accepts only absence
    Ensure,
    /// Desired value is a list; in sync when the current value matches any element
    AnyOf,
    /// Desired and current lists must match element by element
    AllOf,
    /// Type-specific equivalence, called as `(should, is)`
    Custom(fn(&Value, &Value) -> bool),
}

impl Comparison {
    pub fn insync(&self, should: &Value, is: &Value) -> bool {
        match self {
            Self::Exact => should.loosely_eq(is),
            Self::Ensure => match should {
                Value::Present => !is.is_absent(),
                Value::Absent => is.is_absent(),
                other => other.loosely_eq(is),
            },
            Self::AnyOf => should.items().into_iter().any(|s| s.loosely_eq(is)),
            Self::AllOf => {
                let wanted = should.items();
                let current = is.items();
                wanted.len() == current.len()
                    && wanted.iter().zip(&current).all(|(s, i)| s.loosely_eq(i))
            }
            Self::Custom(f) => f(should, is),
        }
    }
}

impl fmt::Debug for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact => write!(f, "Exact"),
            Self::Ensure => write!(f, "Ensure"),
            Self::AnyOf => write!(f, "AnyOf"),
            Self::AllOf => write!(f, "AllOf"),
            Self::Custom(_) => write!(f, "Custom"),
        }
    }
}

/// Schema of one property of a resource type
#[derive(Debug, Clone)]
pub struct PropertySpec {
    pub name: &'static str,
    pub comparison: Comparison,
    pub munge: Option<Munge>,
    /// Event emitted on change when no value-specific event applies
    pub event: Option<&'static str>,
    /// `(desired value, event name)` overrides
    pub value_events: Vec<(&'static str, &'static str)>,
    /// Desired values whose successful sync cancels pending refreshes
    pub invalidates_refresh: Vec<&'static str>,
    /// Desired value used when a declaration leaves the property out
    pub default: Option<Value>,
    /// Replaces the generic change message, called as `(is, should)`
    pub describe: Option<fn(&Value, &Value) -> String>,
}

impl PropertySpec {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            comparison: Comparison::Exact,
            munge: None,
            event: None,
            value_events: Vec::new(),
            invalidates_refresh: Vec::new(),
            default: None,
            describe: None,
        }
    }

    /// The conventional `ensure` property
    pub fn ensure() -> Self {
        Self {
            comparison: Comparison::Ensure,
            munge: Some(munge_ensure),
            ..Self::new("ensure")
        }
    }

    pub fn compare(mut self, comparison: Comparison) -> Self {
        self.comparison = comparison;
        self
    }

    pub fn munge(mut self, munge: Munge) -> Self {
        self.munge = Some(munge);
        self
    }

    pub fn event(mut self, event: &'static str) -> Self {
        self.event = Some(event);
        self
    }

    pub fn value_event(mut self, value: &'static str, event: &'static str) -> Self {
        self.value_events.push((value, event));
        self
    }

    pub fn invalidates_refresh_on(mut self, value: &'static str) -> Self {
        self.invalidates_refresh.push(value);
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn describe_with(mut self, describe: fn(&Value, &Value) -> String) -> Self {
        self.describe = Some(describe);
        self
    }

    pub fn is_ensure(&self) -> bool {
        self.name == "ensure"
    }

    /// Validate and normalise a declared value
    pub fn prepare(&self, raw: &Value) -> Result<Value, String> {
        match self.munge {
            Some(munge) => munge(raw),
            None => Ok(raw.clone()),
        }
    }

    /// Name of the event a successful change from `is` to `should` emits
    pub fn event_for(&self, type_name: &str, should: &Value, is: &Value) -> String {
        if let Some(word) = should.as_str()
            && let Some((_, event)) = self.value_events.iter().find(|(v, _)| *v == word)
        {
            return (*event).to_string();
        }

        if self.is_ensure() {
            let suffix = if is.is_absent() {
                "created"
            } else if should.is_absent() {
                "removed"
            } else {
                "changed"
            };
            return format!("{type_name}_{suffix}");
        }

        match self.event {
            Some(event) => event.to_string(),
            None => format!("{type_name}_changed"),
        }
    }

    pub fn invalidates_refresh(&self, should: &Value) -> bool {
        should
            .as_str()
            .is_some_and(|word| self.invalidates_refresh.contains(&word))
    }

    /// Human summary of a change, as logged and reported
    pub fn change_message(&self, is: &Value, should: &Value) -> String {
        if let Some(describe) = self.describe {
            return describe(is, should);
        }
        if self.is_ensure() {
            if should.is_absent() {
                return "removed".to_string();
            }
            if is.is_absent() {
                return "created".to_string();
            }
        }
        if is.is_absent() {
            format!("defined '{}' as '{should}'", self.name)
        } else if should.is_absent() {
            format!("undefined '{}' from '{is}'", self.name)
        } else {
            format!("{} changed '{is}' to '{should}'", self.name)
        }
    }
}

fn munge_ensure(raw: &Value) -> Result<Value, String> {
    match raw {
        Value::String(word) => Ok(Value::symbol(word)),
        Value::Boolean(true) => Ok(Value::Present),
        Value::Boolean(false) => Ok(Value::Absent),
        Value::Array(_) => Err("ensure takes a single value".to_string()),
        other => Ok(other.clone()),
    }
}

/// What retrieval found
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observed {
    Unretrieved,
    Retrieved(Value),
    Failed(String),
}

/// Where a property is in its lifecycle for the current transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyPhase {
    Unretrieved,
    Retrieved,
    InSync,
    NeedsChange,
    Applied,
    Failed,
}

/// A property instance on one resource
#[derive(Debug, Clone)]
pub struct Property {
    spec: Arc<PropertySpec>,
    should: Option<Value>,
    observed: Observed,
    phase: PropertyPhase,
    resource: ResourceId,
}

impl Property {
    pub fn new(spec: Arc<PropertySpec>, should: Option<Value>, resource: ResourceId) -> Self {
        Self {
            spec,
            should,
            observed: Observed::Unretrieved,
            phase: PropertyPhase::Unretrieved,
            resource,
        }
    }

    pub fn name(&self) -> &'static str {
        self.spec.name
    }

    pub fn spec(&self) -> &PropertySpec {
        &self.spec
    }

    /// Desired value; `None` when the property is not managed
    pub fn should(&self) -> Option<&Value> {
        self.should.as_ref()
    }

    pub fn set_should(&mut self, should: Option<Value>) {
        self.should = should;
    }

    pub fn is_managed(&self) -> bool {
        self.should.is_some()
    }

    /// Current value as last retrieved
    pub fn is(&self) -> Result<&Value, StateError> {
        match &self.observed {
            Observed::Retrieved(value) => Ok(value),
            Observed::Unretrieved => Err(StateError::Unretrieved {
                property: self.spec.name.to_string(),
            }),
            Observed::Failed(message) => Err(StateError::RetrieveFailed {
                property: self.spec.name.to_string(),
                message: message.clone(),
            }),
        }
    }

    pub fn observed(&self) -> &Observed {
        &self.observed
    }

    pub fn phase(&self) -> PropertyPhase {
        self.phase
    }

    pub fn resource(&self) -> ResourceId {
        self.resource
    }

    pub fn record_retrieve(&mut self, result: Result<Value, String>) {
        match result {
            Ok(value) => {
                self.observed = Observed::Retrieved(value);
                self.phase = PropertyPhase::Retrieved;
            }
            Err(message) => {
                self.observed = Observed::Failed(message);
                self.phase = PropertyPhase::Failed;
            }
        }
    }

    /// Compare canonical forms of `should` and `is`
    pub fn insync(&self, should: &Value, is: &Value) -> bool {
        self.spec.comparison.insync(should, is)
    }

    pub fn mark(&mut self, phase: PropertyPhase) {
        self.phase = phase;
    }

    /// Forget the observed value, e.g. before re-evaluation
    pub fn reset(&mut self) {
        self.observed = Observed::Unretrieved;
        self.phase = PropertyPhase::Unretrieved;
    }
}
