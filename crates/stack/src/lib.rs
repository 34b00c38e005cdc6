//! Resource graph domain for the CodeBuild pull-request stack.
//!
//! This crate contains every domain concept used to declare and reconcile the
//! stack: newtype identifiers, policy documents, secrets, configuration values,
//! resource specs, the dependency graph, webhook filters, and the port traits
//! that infrastructure crates implement.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** This crate performs no I/O. It
//! defines *what* a provider and a state backend must do; the `provider` and
//! `state` crates define *how*.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype identifiers (`ResourceName`, `Arn`, `ApplyRunId`, etc.) |
//! | [`types`] | Shared value types (`ResourceKind`, `Attribute`, `Timestamp`) |
//! | [`errors`] | The top-level [`StackError`] |
//! | [`policy`] | IAM policy documents and their validation |
//! | [`secret`] | The redacting [`Secret`] wrapper |
//! | [`config`] | Stack configuration values |
//! | [`resource`] | Per-kind resource specs, inputs and references |
//! | [`graph`] | The declared [`ResourceGraph`] and its ordering |
//! | [`webhook`] | Webhook filter groups and repository events |
//! | [`ports`] | [`ResourceProvider`] and [`StateBackend`] traits |
//! | [`blueprint`] | The declared pipeline stack |

pub mod blueprint;
pub mod config;
pub mod errors;
pub mod graph;
pub mod identifiers;
pub mod policy;
pub mod ports;
pub mod resource;
pub mod secret;
pub mod types;
pub mod webhook;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use config::{Config, ConfigValue};
pub use errors::StackError;
pub use graph::{Resource, ResourceGraph};
pub use identifiers::{ApplyRunId, Arn, PhysicalId, PhysicalName, ResourceName, StackName};
pub use policy::{PolicyDocument, Statement};
pub use ports::{
    ProviderError, ResourceOutputs, ResourceProvider, ResourceState, StateBackend, StateError,
};
pub use secret::Secret;
pub use types::{Attribute, ResourceKind, Timestamp};
pub use webhook::{
    CompiledFilterGroups, EventType, FilterGroup, FilterType, RepositoryEvent, WebhookFilter,
};
