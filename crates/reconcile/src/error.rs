//! Error types for reconciliation.
//!
//! Errors are recovered at the smallest granularity that keeps the run
//! correct: property-level for retrieve failures, resource-level for sync,
//! provider and generation failures, and catalog-level only for structural
//! problems (invalid declarations, dependency cycles).

use thiserror::Error;

/// A resource declaration that cannot enter the catalog
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// No type registered under this name
    #[error("unknown resource type '{type_name}'")]
    UnknownType { type_name: String },

    /// Attribute not declared by the resource's type
    #[error("{resource}: invalid attribute '{attribute}'")]
    UnknownAttribute { resource: String, attribute: String },

    /// The namevar resolved to an empty value
    #[error("{resource}: missing namevar '{namevar}'")]
    MissingNamevar { resource: String, namevar: String },

    /// A required parameter was not given
    #[error("{resource}: missing required parameter '{parameter}'")]
    MissingParameter { resource: String, parameter: String },

    /// A value failed type-specific validation
    #[error("{resource}: invalid value for '{attribute}': {message}")]
    InvalidValue {
        resource: String,
        attribute: String,
        message: String,
    },

    /// Two declarations share a title or namevar
    #[error("duplicate declaration: {resource} is already declared as {existing}")]
    Duplicate { resource: String, existing: String },

    /// A relationship points at a resource that is not in the catalog
    #[error("{resource}: could not find dependency {reference}")]
    UnknownReference { resource: String, reference: String },

    /// Text that is not of the form `Type[title]`
    #[error("invalid resource reference '{0}'")]
    InvalidReference(String),
}

/// No provider could be chosen for a resource
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderSelectionError {
    /// The type has no registered providers at all
    #[error("{resource}: no providers are registered for type '{type_name}'")]
    NoProviders { resource: String, type_name: String },

    /// The explicitly requested provider does not exist
    #[error("{resource}: invalid provider '{provider}'")]
    UnknownProvider { resource: String, provider: String },

    /// The explicitly requested provider failed confinement
    #[error("{resource}: provider '{provider}' is not functional on this host: {}", .reasons.join(", "))]
    Unsuitable {
        resource: String,
        provider: String,
        reasons: Vec<String>,
    },

    /// Every registered provider failed confinement
    #[error("{resource}: no suitable provider ({})", .reasons.join("; "))]
    NoneSuitable {
        resource: String,
        reasons: Vec<String>,
    },

    /// Several suitable providers, none marked default for this host
    #[error("{resource}: several providers are suitable ({}); set 'provider' explicitly", .candidates.join(", "))]
    Ambiguous {
        resource: String,
        candidates: Vec<String>,
    },
}

/// Current state could not be read for a reason other than absence
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{resource}: could not retrieve '{property}': {message}")]
pub struct RetrieveError {
    pub resource: String,
    pub property: String,
    pub message: String,
}

/// Applying a change failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{resource}: could not change '{property}' from '{is}' to '{should}': {message}")]
pub struct SyncError {
    pub resource: String,
    pub property: String,
    pub is: String,
    pub should: String,
    pub message: String,
}

/// A resource failed to generate its children
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{resource}: failed to generate additional resources: {message}")]
pub struct GenerationError {
    pub resource: String,
    pub message: String,
}

/// The relationship graph contains one or more cycles
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("found {} dependency cycle(s): {}", .cycles.len(), format_cycles(.cycles))]
pub struct CycleError {
    /// Each cycle as a path of resource references, first element repeated last
    pub cycles: Vec<Vec<String>>,
}

fn format_cycles(cycles: &[Vec<String>]) -> String {
    cycles
        .iter()
        .map(|path| format!("({})", path.join(" => ")))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Misuse of an attribute's state machine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    /// `is` was read before the attribute was retrieved
    #[error("'{property}' has not been retrieved")]
    Unretrieved { property: String },

    /// Retrieval failed, so there is no current value
    #[error("'{property}' could not be retrieved: {message}")]
    RetrieveFailed { property: String, message: String },
}

/// Failures that abort a whole transaction before anything is changed
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error(transparent)]
    Cycle(#[from] CycleError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}
