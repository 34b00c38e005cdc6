//! Top-level error type for the resource graph domain.
//!
//! [`StackError`] covers every condition that stops a graph from being
//! declared, validated, or reconciled. Port-level errors
//! ([`crate::ports::ProviderError`], [`crate::ports::StateError`]) are defined
//! next to the traits that produce them and convert into [`StackError`].
//!
//! Nothing here is retried: every variant aborts the operation that produced it.

use thiserror::Error;

use crate::policy::PolicyViolation;
use crate::ports::{ProviderError, StateError};
use crate::{Attribute, ResourceKind, ResourceName};

/// Errors that stop a graph from being built, validated, or applied.
#[derive(Debug, Error)]
pub enum StackError {
    /// A required configuration value was not supplied.
    ///
    /// Produced while the graph is being declared, before any state or provider
    /// access, so a missing secret never surfaces as an apply-time failure.
    #[error("Missing required configuration value '{key}'")]
    MissingConfiguration {
        /// The key that was looked up.
        key: String,
    },

    /// A configuration value was present but unusable.
    #[error("Invalid configuration value '{key}': {message}")]
    InvalidConfiguration {
        /// The offending key.
        key: String,
        /// Description of the problem.
        message: String,
    },

    /// A policy document failed structural validation.
    #[error("Invalid policy document on '{resource}': {violation}")]
    InvalidPolicy {
        /// Resource carrying the document.
        resource: ResourceName,
        /// The rule the document broke.
        #[source]
        violation: PolicyViolation,
    },

    /// A resource declaration is internally inconsistent.
    #[error("Invalid resource '{resource}': {reason}")]
    InvalidResource {
        /// The offending resource.
        resource: ResourceName,
        /// Description of the problem.
        reason: String,
    },

    /// A webhook filter group or filter pattern is invalid.
    #[error("Invalid webhook filter on '{resource}': {reason}")]
    InvalidWebhookFilter {
        /// The webhook resource.
        resource: ResourceName,
        /// Description of the problem.
        reason: String,
    },

    /// A resource was declared with an empty logical name.
    #[error("Resource names must not be empty")]
    EmptyResourceName,

    /// Two resources were declared with the same logical name.
    #[error("Duplicate resource name '{name}'")]
    DuplicateResource {
        /// The repeated name.
        name: ResourceName,
    },

    /// A resource references a name that is not declared in the graph.
    #[error("Resource '{from}' references undeclared resource '{to}'")]
    DanglingReference {
        /// The referencing resource.
        from: ResourceName,
        /// The missing target.
        to: ResourceName,
    },

    /// A reference asks for an output the target kind never produces.
    #[error("Resource '{from}' reads '{attribute}' from '{to}' ({kind}), which has no such output")]
    UnsupportedAttribute {
        /// The referencing resource.
        from: ResourceName,
        /// The target resource.
        to: ResourceName,
        /// Kind of the target.
        kind: ResourceKind,
        /// The attribute requested.
        attribute: Attribute,
    },

    /// The dependency edges form a cycle; no apply order exists.
    #[error("Dependency cycle between: {}", join_names(.members))]
    DependencyCycle {
        /// Resources that could not be ordered.
        members: Vec<ResourceName>,
    },

    /// A policy granting a sensitive action is attached to a human identity.
    #[error("Policy '{policy}' allows '{action}' and is attached to '{identity}'")]
    PrivilegeEscalation {
        /// The policy resource.
        policy: ResourceName,
        /// The sensitive action it allows.
        action: String,
        /// The user or group it is attached to.
        identity: ResourceName,
    },

    /// A resource was about to be issued before one of its dependencies had outputs.
    #[error("Resource '{resource}' cannot be applied before '{dependency}' exists")]
    DependencyNotReady {
        /// The resource being applied.
        resource: ResourceName,
        /// The dependency with no recorded outputs.
        dependency: ResourceName,
    },

    /// The provider refused or failed an operation.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// The state backend failed.
    #[error(transparent)]
    State(#[from] StateError),
}

fn join_names(names: &[ResourceName]) -> String {
    names
        .iter()
        .map(ResourceName::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
