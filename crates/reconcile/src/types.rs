//! Resource type descriptors and the registry of types and providers

use crate::catalog::Catalog;
use crate::error::ValidationError;
use crate::property::{Munge, Property, PropertySpec};
use crate::provider::ProviderDescriptor;
use crate::resource::{Metaparams, Resource, ResourceDecl, ResourceId, ResourceRef};
use crate::value::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// References a resource wants to depend on if they exist in the catalog
pub type Autorequire = fn(&Resource) -> Vec<ResourceRef>;

/// Produces additional resources from an existing one
///
/// The catalog is passed so a generator can leave alone what is already
/// declared.
pub type Generator = fn(&Resource, &Catalog) -> anyhow::Result<Vec<ResourceDecl>>;

/// Schema of a non-property attribute
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: &'static str,
    pub required: bool,
    pub munge: Option<Munge>,
    pub default: Option<Value>,
}

impl ParamSpec {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            required: false,
            munge: None,
            default: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn munge(mut self, munge: Munge) -> Self {
        self.munge = Some(munge);
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }
}

/// Everything the engine knows about one resource type
#[derive(Clone)]
pub struct TypeDescriptor {
    pub name: &'static str,
    pub namevar: &'static str,
    pub doc: &'static str,
    namevar_munge: Option<Munge>,
    properties: Vec<Arc<PropertySpec>>,
    parameters: Vec<ParamSpec>,
    autorequires: Vec<Autorequire>,
    generator: Option<Generator>,
    refreshable: bool,
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("name", &self.name)
            .field("namevar", &self.namevar)
            .field(
                "properties",
                &self.properties.iter().map(|p| p.name).collect::<Vec<_>>(),
            )
            .field(
                "parameters",
                &self.parameters.iter().map(|p| p.name).collect::<Vec<_>>(),
            )
            .field("generator", &self.generator.is_some())
            .field("refreshable", &self.refreshable)
            .finish_non_exhaustive()
    }
}

impl TypeDescriptor {
    pub fn new(name: &'static str, namevar: &'static str) -> Self {
        Self {
            name,
            namevar,
            doc: "",
            namevar_munge: None,
            properties: Vec::new(),
            parameters: Vec::new(),
            autorequires: Vec::new(),
            generator: None,
            refreshable: false,
        }
    }

    pub fn doc(mut self, doc: &'static str) -> Self {
        self.doc = doc;
        self
    }

    /// Validate and normalise the namevar when the catalog is built
    pub fn namevar_munge(mut self, munge: Munge) -> Self {
        self.namevar_munge = Some(munge);
        self
    }

    /// Add a property; declaration order is sync priority
    pub fn property(mut self, spec: PropertySpec) -> Self {
        self.properties.push(Arc::new(spec));
        self
    }

    pub fn parameter(mut self, spec: ParamSpec) -> Self {
        self.parameters.push(spec);
        self
    }

    pub fn autorequire(mut self, f: Autorequire) -> Self {
        self.autorequires.push(f);
        self
    }

    pub fn generator(mut self, f: Generator) -> Self {
        self.generator = Some(f);
        self
    }

    /// Resources of this type respond to refresh events
    pub fn refreshable(mut self) -> Self {
        self.refreshable = true;
        self
    }

    pub fn properties(&self) -> impl Iterator<Item = &PropertySpec> {
        self.properties.iter().map(AsRef::as_ref)
    }

    pub fn parameters(&self) -> &[ParamSpec] {
        &self.parameters
    }

    pub fn autorequires(&self) -> &[Autorequire] {
        &self.autorequires
    }

    pub fn generator_fn(&self) -> Option<Generator> {
        self.generator
    }

    pub fn is_refreshable(&self) -> bool {
        self.refreshable
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.properties.iter().any(|p| p.name == name)
    }

    /// Validate a declaration into a catalog resource
    pub fn instantiate(
        &self,
        id: ResourceId,
        decl: &ResourceDecl,
    ) -> Result<Resource, ValidationError> {
        let reference = ResourceRef::new(self.name, &decl.title);
        let invalid = |attribute: &str, message: String| ValidationError::InvalidValue {
            resource: reference.to_string(),
            attribute: attribute.to_string(),
            message,
        };

        let mut meta = Metaparams::default();
        let mut shoulds: BTreeMap<&'static str, Value> = BTreeMap::new();
        let mut parameters = BTreeMap::new();
        let mut name = None;

        for (attribute, raw) in &decl.attributes {
            if meta.accept(&reference, attribute, raw)? {
                continue;
            }
            if let Some(spec) = self.properties.iter().find(|p| p.name == attribute) {
                let value = spec.prepare(raw).map_err(|m| invalid(attribute, m))?;
                shoulds.insert(spec.name, value);
            } else if attribute == self.namevar {
                name = Some(raw.to_string());
            } else if let Some(spec) = self.parameters.iter().find(|p| p.name == attribute) {
                let value = match spec.munge {
                    Some(munge) => munge(raw).map_err(|m| invalid(attribute, m))?,
                    None => raw.clone(),
                };
                parameters.insert(spec.name.to_string(), value);
            } else {
                return Err(ValidationError::UnknownAttribute {
                    resource: reference.to_string(),
                    attribute: attribute.clone(),
                });
            }
        }

        let mut name = name.unwrap_or_else(|| decl.title.clone());
        if name.trim().is_empty() {
            return Err(ValidationError::MissingNamevar {
                resource: reference.to_string(),
                namevar: self.namevar.to_string(),
            });
        }
        if let Some(munge) = self.namevar_munge {
            name = munge(&Value::from(name.as_str()))
                .map_err(|m| invalid(self.namevar, m))?
                .to_string();
        }

        for spec in &self.parameters {
            if parameters.contains_key(spec.name) {
                continue;
            }
            if let Some(default) = &spec.default {
                parameters.insert(spec.name.to_string(), default.clone());
            } else if spec.required {
                return Err(ValidationError::MissingParameter {
                    resource: reference.to_string(),
                    parameter: spec.name.to_string(),
                });
            }
        }

        if meta.audit.iter().any(|a| a == "all") {
            meta.audit = self.properties.iter().map(|p| p.name.to_string()).collect();
        }
        if let Some(unknown) = meta.audit.iter().find(|a| !self.has_property(a)) {
            return Err(invalid("audit", format!("'{unknown}' is not a property")));
        }

        let properties = self
            .properties
            .iter()
            .map(|spec| {
                let should = shoulds.remove(spec.name).or_else(|| spec.default.clone());
                Property::new(Arc::clone(spec), should, id)
            })
            .collect();

        Ok(Resource {
            id,
            reference,
            name,
            properties,
            parameters,
            meta,
            generated_by: None,
        })
    }
}

/// Registered resource types and their providers
#[derive(Debug, Default)]
pub struct TypeRegistry {
    types: BTreeMap<&'static str, TypeDescriptor>,
    providers: Vec<ProviderDescriptor>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_type(&mut self, descriptor: TypeDescriptor) {
        log::debug!("registering type {}", descriptor.name);
        self.types.insert(descriptor.name, descriptor);
    }

    /// Providers are considered in registration order
    pub fn register_provider(&mut self, descriptor: ProviderDescriptor) {
        log::debug!(
            "registering provider {} for {}",
            descriptor.name,
            descriptor.type_name
        );
        self.providers.push(descriptor);
    }

    pub fn get(&self, type_name: &str) -> Option<&TypeDescriptor> {
        self.types.get(type_name)
    }

    pub fn types(&self) -> impl Iterator<Item = &TypeDescriptor> {
        self.types.values()
    }

    pub fn providers_for(&self, type_name: &str) -> Vec<&ProviderDescriptor> {
        self.providers
            .iter()
            .filter(|p| p.type_name == type_name)
            .collect()
    }

    /// Look up the type and validate a declaration against it
    pub fn instantiate(
        &self,
        id: ResourceId,
        decl: &ResourceDecl,
    ) -> Result<Resource, ValidationError> {
        let descriptor = self
            .get(&decl.type_name)
            .ok_or_else(|| ValidationError::UnknownType {
                type_name: decl.type_name.clone(),
            })?;
        descriptor.instantiate(id, decl)
    }
}
