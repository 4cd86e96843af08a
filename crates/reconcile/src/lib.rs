//! # Reconcile
//!
//! An engine that brings a system in line with a declared catalog of
//! resources.
//!
//! Callers describe *what* should be true (a file with some mode, a running
//! service) and the engine works out *how*: it validates declarations
//! against typed descriptors, picks a provider per resource, orders the
//! resources by their relationships and then retrieves, compares and syncs
//! each one. Changes raise events that travel along notify edges and trigger
//! refreshes of their targets.
//!
//! ## Core Concepts
//!
//! - **TypeDescriptor**: Schema of a resource type (properties, parameters,
//!   autorequires, generator)
//! - **Provider**: Backend that reads and writes the real system for one type
//! - **Catalog**: Validated resources plus relationship edges
//! - **Transaction**: One ordered evaluation of a catalog
//! - **Report**: Per-resource statuses, events, logs and metrics
//!
//! ## Example
//!
//! ```ignore
//! use reconcile::{Catalog, NoProgress, ResourceDecl, Transaction};
//!
//! let registry = my_types();
//! let catalog = Catalog::from_decls(&registry, vec![
//!     ResourceDecl::new("file", "/etc/motd").with("content", "hello\n"),
//!     ResourceDecl::new("service", "sshd").with("subscribe", "File[/etc/motd]"),
//! ])?;
//!
//! let report = Transaction::new(catalog, &registry, &runner, &probe, &mut storage)
//!     .evaluate(&mut NoProgress)?;
//! std::process::exit(report.exit_status());
//! ```
//!
//! ## Injection Points
//!
//! Nothing here talks to the host directly:
//!
//! - [`CommandRunner`]: Runs external commands for providers
//! - [`Probe`]: Answers fact and feature questions for provider selection
//! - [`Storage`]: Keeps audited values between runs
//! - [`ProgressCallback`]: Receives progress updates

pub mod catalog;
pub mod context;
pub mod error;
pub mod event;
pub mod graph;
pub mod harness;
pub mod property;
pub mod provider;
pub mod report;
pub mod resource;
pub mod storage;
pub mod transaction;
pub mod types;
pub mod value;

#[cfg(test)]
mod testing;

// Re-export main types at crate root
pub use catalog::{Catalog, EdgeKind, EventMatch, Relationship};
pub use context::{
    CommandOutput, CommandRunner, Listing, ListingCache, NoProgress, Probe, ProgressCallback,
    ProviderContext, StaticProbe,
};
pub use error::{
    CycleError, GenerationError, ProviderSelectionError, RetrieveError, StateError, SyncError,
    TransactionError, ValidationError,
};
pub use event::{Event, EventManager, EventStatus};
pub use graph::DependencyGraph;
pub use property::{Comparison, Observed, Property, PropertyPhase, PropertySpec};
pub use provider::{Confine, Provider, ProviderDescriptor, ProviderSelector};
pub use report::{Change, ChangeStatus, LogEntry, LogLevel, Metrics, Report, ResourceStatus};
pub use resource::{METAPARAMS, Metaparams, Resource, ResourceDecl, ResourceId, ResourceRef};
pub use storage::{MemoryStorage, Storage};
pub use transaction::{Interrupt, Transaction, TransactionOptions, TransactionPhase};
pub use types::{ParamSpec, TypeDescriptor, TypeRegistry};
pub use value::Value;
