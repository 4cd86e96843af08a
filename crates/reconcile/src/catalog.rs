//! The catalog: an arena of validated resources plus their relationships
//!
//! Building a catalog never touches the system. Relationship metaparameters
//! are turned into edges by [`Catalog::resolve_relationships`], which also
//! adds autorequire edges where the referenced resource is present and no
//! explicit edge already connects the pair.

use crate::error::ValidationError;
use crate::graph::DependencyGraph;
use crate::resource::{Resource, ResourceDecl, ResourceId, ResourceRef};
use crate::types::TypeRegistry;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// Kind of a relationship edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    /// Ordering only
    Require,
    /// Ordering plus event delivery
    Notify,
    /// Generated child of its source
    Contain,
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Require => write!(f, "require"),
            Self::Notify => write!(f, "notify"),
            Self::Contain => write!(f, "contain"),
        }
    }
}

/// Which events travel along a notify edge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventMatch {
    All,
    Named(Vec<String>),
}

impl EventMatch {
    pub fn matches(&self, event: &str) -> bool {
        match self {
            Self::All => true,
            Self::Named(names) => names.iter().any(|n| n == event),
        }
    }
}

/// A directed edge: `source` is evaluated before `target`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    pub source: ResourceId,
    pub target: ResourceId,
    pub kind: EdgeKind,
    pub trigger: EventMatch,
}

/// Arena of resources and the edges between them
#[derive(Debug, Default)]
pub struct Catalog {
    resources: Vec<Resource>,
    by_ref: HashMap<ResourceRef, ResourceId>,
    by_name: HashMap<(String, String), ResourceId>,
    relationships: Vec<Relationship>,
    resolved_upto: usize,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and add every declaration, then resolve relationships
    pub fn from_decls(
        registry: &TypeRegistry,
        decls: impl IntoIterator<Item = ResourceDecl>,
    ) -> Result<Self, ValidationError> {
        let mut catalog = Self::new();
        for decl in decls {
            catalog.add(registry, &decl)?;
        }
        catalog.resolve_relationships(registry)?;
        Ok(catalog)
    }

    /// Validate a declaration and add it to the arena
    pub fn add(
        &mut self,
        registry: &TypeRegistry,
        decl: &ResourceDecl,
    ) -> Result<ResourceId, ValidationError> {
        let id = ResourceId(self.resources.len());
        let resource = registry.instantiate(id, decl)?;

        if let Some(existing) = self.existing(&resource) {
            return Err(ValidationError::Duplicate {
                resource: resource.to_string(),
                existing: self.resources[existing.index()].to_string(),
            });
        }

        self.by_ref.insert(resource.reference.clone(), id);
        self.by_name.insert(
            (resource.type_name().to_string(), resource.name.clone()),
            id,
        );
        self.resources.push(resource);
        Ok(id)
    }

    /// Add a resource produced by `parent`'s generator
    ///
    /// Returns `Ok(None)` when an equivalent resource is already declared;
    /// explicit declarations take precedence over generated ones.
    pub fn add_generated(
        &mut self,
        registry: &TypeRegistry,
        parent: ResourceId,
        decl: &ResourceDecl,
    ) -> Result<Option<ResourceId>, ValidationError> {
        let id = ResourceId(self.resources.len());
        let candidate = registry.instantiate(id, decl)?;
        if self.existing(&candidate).is_some() {
            log::debug!("{candidate} is already declared; not generating it");
            return Ok(None);
        }
        let id = self.add(registry, decl)?;
        self.resources[id.index()].generated_by = Some(parent);
        self.add_relationship(Relationship {
            source: parent,
            target: id,
            kind: EdgeKind::Contain,
            trigger: EventMatch::All,
        });

        // A child precedes and notifies whatever its parent does
        let inherited: Vec<Relationship> = self
            .edges_from(parent)
            .filter(|r| r.kind != EdgeKind::Contain)
            .map(|r| Relationship {
                source: id,
                target: r.target,
                kind: r.kind,
                trigger: r.trigger.clone(),
            })
            .collect();
        for edge in inherited {
            self.add_relationship(edge);
        }
        Ok(Some(id))
    }

    fn existing(&self, resource: &Resource) -> Option<ResourceId> {
        self.by_ref.get(&resource.reference).copied().or_else(|| {
            self.by_name
                .get(&(resource.type_name().to_string(), resource.name.clone()))
                .copied()
        })
    }

    /// Add an edge unless one of the same kind already joins the pair
    pub fn add_relationship(&mut self, relationship: Relationship) {
        let duplicate = self.relationships.iter().any(|r| {
            r.source == relationship.source
                && r.target == relationship.target
                && r.kind == relationship.kind
        });
        if !duplicate {
            self.relationships.push(relationship);
        }
    }

    /// Find a resource by reference, falling back to its namevar
    pub fn lookup(&self, reference: &ResourceRef) -> Option<ResourceId> {
        self.by_ref.get(reference).copied().or_else(|| {
            self.by_name
                .get(&(reference.type_name.clone(), reference.title.clone()))
                .copied()
        })
    }

    /// Edges connecting `a` and `b` in either direction
    pub fn connected(&self, a: ResourceId, b: ResourceId) -> bool {
        self.relationships.iter().any(|r| {
            (r.source == a && r.target == b) || (r.source == b && r.target == a)
        })
    }

    /// Turn metaparameters and autorequires of resources added since the
    /// last call into edges
    pub fn resolve_relationships(&mut self, registry: &TypeRegistry) -> Result<(), ValidationError> {
        let pending = self.resolved_upto..self.resources.len();

        for index in pending.clone() {
            let resource = &self.resources[index];
            let id = resource.id;
            let mut edges = Vec::new();
            let meta = &resource.meta;
            let lists = [
                (&meta.require, EdgeKind::Require, true),
                (&meta.before, EdgeKind::Require, false),
                (&meta.subscribe, EdgeKind::Notify, true),
                (&meta.notify, EdgeKind::Notify, false),
            ];
            for (refs, kind, incoming) in lists {
                for reference in refs {
                    let other = self.lookup(reference).ok_or_else(|| {
                        ValidationError::UnknownReference {
                            resource: resource.to_string(),
                            reference: reference.to_string(),
                        }
                    })?;
                    let (source, target) = if incoming { (other, id) } else { (id, other) };
                    let trigger = match kind {
                        EdgeKind::Notify => self.trigger_for(target),
                        _ => EventMatch::All,
                    };
                    edges.push(Relationship {
                        source,
                        target,
                        kind,
                        trigger,
                    });
                }
            }
            for edge in edges {
                self.add_relationship(edge);
            }
        }

        for index in pending.clone() {
            let resource = &self.resources[index];
            let Some(descriptor) = registry.get(resource.type_name()) else {
                continue;
            };
            let mut candidates = Vec::new();
            for autorequire in descriptor.autorequires() {
                candidates.extend(autorequire(resource));
            }
            let id = resource.id;
            for reference in candidates {
                let Some(source) = self.lookup(&reference) else {
                    continue;
                };
                if source == id || self.connected(source, id) {
                    continue;
                }
                log::debug!("autorequiring {reference} for {}", self.resources[index]);
                self.add_relationship(Relationship {
                    source,
                    target: id,
                    kind: EdgeKind::Require,
                    trigger: EventMatch::All,
                });
            }
        }

        self.resolved_upto = pending.end;
        Ok(())
    }

    /// Events allowed to refresh `target`, from its `refresh_on`
    fn trigger_for(&self, target: ResourceId) -> EventMatch {
        let names = &self.resources[target.index()].meta.refresh_on;
        if names.is_empty() {
            EventMatch::All
        } else {
            EventMatch::Named(names.clone())
        }
    }

    pub fn relationship_graph(&self) -> DependencyGraph {
        DependencyGraph::build(self)
    }

    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    pub fn resource(&self, id: ResourceId) -> &Resource {
        &self.resources[id.index()]
    }

    pub fn resource_mut(&mut self, id: ResourceId) -> &mut Resource {
        &mut self.resources[id.index()]
    }

    pub fn relationships(&self) -> &[Relationship] {
        &self.relationships
    }

    /// Outgoing edges of `source`
    pub fn edges_from(&self, source: ResourceId) -> impl Iterator<Item = &Relationship> {
        self.relationships.iter().filter(move |r| r.source == source)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::PropertySpec;
    use crate::types::TypeDescriptor;

    fn parent_dir(resource: &Resource) -> Vec<ResourceRef> {
        std::path::Path::new(&resource.name)
            .parent()
            .map(|p| vec![ResourceRef::new("file", p.to_string_lossy())])
            .unwrap_or_default()
    }

    fn registry() -> TypeRegistry {
        let mut registry = TypeRegistry::new();
        registry.register_type(
            TypeDescriptor::new("file", "path")
                .property(PropertySpec::ensure())
                .autorequire(parent_dir),
        );
        registry.register_type(
            TypeDescriptor::new("service", "name")
                .property(PropertySpec::ensure())
                .refreshable(),
        );
        registry
    }

    fn edge(catalog: &Catalog, source: usize, target: usize) -> Option<EdgeKind> {
        catalog
            .relationships()
            .iter()
            .find(|r| r.source == ResourceId(source) && r.target == ResourceId(target))
            .map(|r| r.kind)
    }

    #[test]
    fn test_metaparams_become_edges() {
        let decls = vec![
            ResourceDecl::new("file", "/etc/app.conf").with("notify", "Service[app]"),
            ResourceDecl::new("service", "app").with("require", "File[/etc/app.conf]"),
            ResourceDecl::new("service", "db").with("before", "Service[app]"),
            ResourceDecl::new("service", "web").with("subscribe", "Service[db]"),
        ];
        let catalog = Catalog::from_decls(&registry(), decls).unwrap();
        assert_eq!(edge(&catalog, 0, 1), Some(EdgeKind::Notify));
        assert_eq!(edge(&catalog, 2, 1), Some(EdgeKind::Require));
        assert_eq!(edge(&catalog, 2, 3), Some(EdgeKind::Notify));
        // Ordering and notification between the same pair are separate edges
        assert_eq!(
            catalog
                .relationships()
                .iter()
                .filter(|r| r.source == ResourceId(0) && r.target == ResourceId(1))
                .count(),
            2
        );
    }

    #[test]
    fn test_notify_and_subscribe_collapse_into_one_edge() {
        let decls = vec![
            ResourceDecl::new("file", "/etc/app.conf").with("notify", "Service[app]"),
            ResourceDecl::new("service", "app").with("subscribe", "File[/etc/app.conf]"),
        ];
        let catalog = Catalog::from_decls(&registry(), decls).unwrap();
        assert_eq!(catalog.relationships().len(), 1);
    }

    #[test]
    fn test_refresh_on_limits_notify_trigger() {
        let decls = vec![
            ResourceDecl::new("file", "/etc/app.conf").with("notify", "Service[app]"),
            ResourceDecl::new("service", "app").with("refresh_on", "file_changed"),
            ResourceDecl::new("service", "db").with("subscribe", "Service[app]"),
        ];
        let catalog = Catalog::from_decls(&registry(), decls).unwrap();
        let trigger = |source: usize| {
            catalog
                .relationships()
                .iter()
                .find(|r| r.source == ResourceId(source))
                .map(|r| r.trigger.clone())
                .unwrap()
        };
        assert_eq!(trigger(0), EventMatch::Named(vec!["file_changed".to_string()]));
        assert_eq!(trigger(1), EventMatch::All);
        assert!(!trigger(0).matches("file_created"));
    }

    #[test]
    fn test_unknown_reference_is_rejected() {
        let decls = vec![ResourceDecl::new("file", "/a").with("require", "File[/missing]")];
        let err = Catalog::from_decls(&registry(), decls).unwrap_err();
        assert!(matches!(err, ValidationError::UnknownReference { .. }));
    }

    #[test]
    fn test_duplicate_title_and_namevar() {
        let registry = registry();
        let mut catalog = Catalog::new();
        catalog.add(&registry, &ResourceDecl::new("file", "/a")).unwrap();
        let err = catalog
            .add(&registry, &ResourceDecl::new("file", "/a"))
            .unwrap_err();
        assert!(matches!(err, ValidationError::Duplicate { .. }));

        let err = catalog
            .add(&registry, &ResourceDecl::new("file", "alias").with("path", "/a"))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "duplicate declaration: File[alias] is already declared as File[/a]"
        );
    }

    #[test]
    fn test_autorequire_only_when_present() {
        let decls = vec![
            ResourceDecl::new("file", "/srv/app/conf"),
            ResourceDecl::new("file", "/srv/app"),
            ResourceDecl::new("file", "/opt/tool/bin"),
        ];
        let catalog = Catalog::from_decls(&registry(), decls).unwrap();
        assert_eq!(edge(&catalog, 1, 0), Some(EdgeKind::Require));
        assert_eq!(catalog.relationships().len(), 1);
    }

    #[test]
    fn test_autorequire_skipped_when_explicit_edge_exists() {
        let decls = vec![
            ResourceDecl::new("file", "/srv/app").with("require", "File[/srv/app/conf]"),
            ResourceDecl::new("file", "/srv/app/conf"),
        ];
        let catalog = Catalog::from_decls(&registry(), decls).unwrap();
        assert_eq!(catalog.relationships().len(), 1);
        assert_eq!(edge(&catalog, 1, 0), Some(EdgeKind::Require));
    }

    #[test]
    fn test_generated_resource_yields_to_declared() {
        let registry = registry();
        let mut catalog =
            Catalog::from_decls(&registry, vec![ResourceDecl::new("file", "/d/x")]).unwrap();
        let parent = catalog.add(&registry, &ResourceDecl::new("file", "/d")).unwrap();
        let dup = catalog
            .add_generated(&registry, parent, &ResourceDecl::new("file", "/d/x"))
            .unwrap();
        assert!(dup.is_none());

        let child = catalog
            .add_generated(&registry, parent, &ResourceDecl::new("file", "/d/y"))
            .unwrap()
            .unwrap();
        assert_eq!(catalog.resource(child).generated_by, Some(parent));
        assert_eq!(edge(&catalog, parent.index(), child.index()), Some(EdgeKind::Contain));

        catalog.resolve_relationships(&registry).unwrap();
        // Contain edge already links parent and child, so no autorequire is added
        assert_eq!(
            catalog
                .relationships()
                .iter()
                .filter(|r| r.target == child)
                .count(),
            1
        );
    }

    #[test]
    fn test_generated_resource_inherits_outgoing_edges() {
        let registry = registry();
        let mut catalog = Catalog::from_decls(
            &registry,
            vec![
                ResourceDecl::new("file", "/d").with("notify", "Service[app]"),
                ResourceDecl::new("service", "app"),
                ResourceDecl::new("service", "db").with("before", "File[/d]"),
            ],
        )
        .unwrap();
        let child = catalog
            .add_generated(&registry, ResourceId(0), &ResourceDecl::new("file", "/d/x"))
            .unwrap()
            .unwrap();

        assert_eq!(edge(&catalog, child.index(), 1), Some(EdgeKind::Notify));
        // Incoming edges stay on the parent; the contain edge orders the child
        assert_eq!(edge(&catalog, 2, child.index()), None);
        assert_eq!(edge(&catalog, 0, child.index()), Some(EdgeKind::Contain));
    }
}
