//! Resource identity, declarations and catalog entries
//!
//! A [`ResourceDecl`] is what a compiler hands over: a type name, a title and
//! raw attributes. [`crate::types::TypeDescriptor::instantiate`] validates it
//! into a [`Resource`], which lives in the catalog arena and is addressed by
//! [`ResourceId`].

use crate::error::ValidationError;
use crate::property::Property;
use crate::value::Value;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

static REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^\s*([A-Za-z][A-Za-z0-9_]*(?:::[A-Za-z][A-Za-z0-9_]*)*)\[(.+)\]\s*$")
        .expect("resource reference pattern is valid")
});

/// Index of a resource in its catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceId(pub usize);

impl ResourceId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// `Type[title]` reference; the type name is stored lowercase
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub type_name: String,
    pub title: String,
}

impl ResourceRef {
    pub fn new(type_name: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into().to_lowercase(),
            title: title.into(),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let type_name = self
            .type_name
            .split("::")
            .map(capitalize)
            .collect::<Vec<_>>()
            .join("::");
        write!(f, "{type_name}[{}]", self.title)
    }
}

fn capitalize(segment: &str) -> String {
    let mut chars = segment.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

impl FromStr for ResourceRef {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = REFERENCE
            .captures(s)
            .ok_or_else(|| ValidationError::InvalidReference(s.to_string()))?;
        Ok(Self::new(&caps[1], &caps[2]))
    }
}

/// A resource as declared, before validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDecl {
    #[serde(rename = "type")]
    pub type_name: String,
    pub title: String,
    #[serde(default, flatten)]
    pub attributes: BTreeMap<String, Value>,
}

impl ResourceDecl {
    pub fn new(type_name: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into().to_lowercase(),
            title: title.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.to_string(), value.into());
        self
    }

    pub fn reference(&self) -> ResourceRef {
        ResourceRef::new(&self.type_name, &self.title)
    }
}

/// Engine-level attributes valid on every resource
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metaparams {
    pub require: Vec<ResourceRef>,
    pub before: Vec<ResourceRef>,
    pub notify: Vec<ResourceRef>,
    pub subscribe: Vec<ResourceRef>,
    pub noop: Option<bool>,
    pub provider: Option<String>,
    pub audit: Vec<String>,
    pub tags: Vec<String>,
    /// Events that may refresh this resource; empty accepts all
    pub refresh_on: Vec<String>,
}

pub const METAPARAMS: &[&str] = &[
    "require",
    "before",
    "notify",
    "subscribe",
    "noop",
    "provider",
    "audit",
    "tag",
    "refresh_on",
];

impl Metaparams {
    /// Accept one metaparameter; returns `Ok(false)` if `name` is not one
    pub(crate) fn accept(
        &mut self,
        resource: &ResourceRef,
        name: &str,
        value: &Value,
    ) -> Result<bool, ValidationError> {
        let invalid = |message: &str| ValidationError::InvalidValue {
            resource: resource.to_string(),
            attribute: name.to_string(),
            message: message.to_string(),
        };
        match name {
            "require" => self.require.extend(parse_refs(value)?),
            "before" => self.before.extend(parse_refs(value)?),
            "notify" => self.notify.extend(parse_refs(value)?),
            "subscribe" => self.subscribe.extend(parse_refs(value)?),
            "noop" => self.noop = Some(value.as_bool().ok_or_else(|| invalid("expected a boolean"))?),
            "provider" => {
                let provider = value.as_str().ok_or_else(|| invalid("expected a provider name"))?;
                self.provider = Some(provider.to_string());
            }
            "audit" => self.audit.extend(value.strings()),
            "tag" => self.tags.extend(value.strings().iter().map(|t| t.to_lowercase())),
            "refresh_on" => self.refresh_on.extend(value.strings()),
            _ => return Ok(false),
        }
        Ok(true)
    }
}

fn parse_refs(value: &Value) -> Result<Vec<ResourceRef>, ValidationError> {
    value.strings().iter().map(|s| s.parse()).collect()
}

/// A validated resource in the catalog arena
#[derive(Debug, Clone)]
pub struct Resource {
    pub id: ResourceId,
    pub reference: ResourceRef,
    /// Namevar value, unique per type
    pub name: String,
    /// Properties in the type's declared (priority) order
    pub properties: Vec<Property>,
    pub parameters: BTreeMap<String, Value>,
    pub meta: Metaparams,
    pub generated_by: Option<ResourceId>,
}

impl Resource {
    pub fn type_name(&self) -> &str {
        &self.reference.type_name
    }

    pub fn title(&self) -> &str {
        &self.reference.title
    }

    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name() == name)
    }

    pub fn property_mut(&mut self, name: &str) -> Option<&mut Property> {
        self.properties.iter_mut().find(|p| p.name() == name)
    }

    /// Desired value of a managed property
    pub fn should(&self, name: &str) -> Option<&Value> {
        self.property(name).and_then(Property::should)
    }

    pub fn param(&self, name: &str) -> Option<&Value> {
        self.parameters.get(name)
    }

    pub fn param_str(&self, name: &str) -> Option<String> {
        self.param(name).map(ToString::to_string)
    }

    pub fn param_bool(&self, name: &str) -> bool {
        self.param(name).and_then(Value::as_bool).unwrap_or(false)
    }

    /// Whether changes are suppressed, given the transaction-wide setting
    pub fn is_noop(&self, global: bool) -> bool {
        self.meta.noop.unwrap_or(global)
    }

    /// `ensure` is managed and set to absent
    pub fn deleting(&self) -> bool {
        self.should("ensure").is_some_and(Value::is_absent)
    }

    pub fn is_audited(&self, property: &str) -> bool {
        self.meta.audit.iter().any(|a| a == property)
    }

    /// Whether the resource carries any of `tags`
    ///
    /// Every resource is implicitly tagged with its type name and title.
    pub fn tagged(&self, tags: &[String]) -> bool {
        let title = self.title().to_lowercase();
        tags.iter().map(|t| t.to_lowercase()).any(|tag| {
            tag == self.type_name() || tag == title || self.meta.tags.contains(&tag)
        })
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.reference.fmt(f)
    }
}
