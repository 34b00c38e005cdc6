//! Port traits: the external collaborators a reconciler needs.
//!
//! - [`ResourceProvider`] creates, updates and deletes live resources.
//! - [`StateBackend`] records what was created, keyed by logical resource name.
//!
//! Both are injected into the `engine` crate as trait objects. Infrastructure
//! crates (`provider`, `state`) implement them; this crate never performs I/O.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::resource::ResolvedSpec;
use crate::{Arn, Attribute, PhysicalId, PhysicalName, ResourceKind, ResourceName, Timestamp};

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Outputs the provider reports for a live resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceOutputs {
    pub id: PhysicalId,
    /// `None` for kinds without a name (attachments, webhooks).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<PhysicalName>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arn: Option<Arn>,
}

impl ResourceOutputs {
    /// Returns the value of `attribute`, if this resource has it.
    pub fn get(&self, attribute: Attribute) -> Option<&str> {
        match attribute {
            Attribute::Id => Some(self.id.as_str()),
            Attribute::Name => self.name.as_ref().map(PhysicalName::as_str),
            Attribute::Arn => self.arn.as_ref().map(Arn::as_str),
        }
    }
}

/// What the state backend records for one applied resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    pub name: ResourceName,
    pub kind: ResourceKind,
    pub outputs: ResourceOutputs,
    /// Declared inputs at the time of the last apply, secrets redacted.
    pub inputs: serde_json::Value,
    /// Resources this one referenced when it was applied.
    #[serde(default)]
    pub dependencies: Vec<ResourceName>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures surfaced by a [`ResourceProvider`].
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider validated the request and refused it.
    #[error("Provider rejected '{resource}': {reason}")]
    Rejected {
        resource: ResourceName,
        reason: String,
    },

    /// The identity the request depends on lacks a required permission.
    #[error("Access denied for '{resource}': {reason}")]
    AccessDenied {
        resource: ResourceName,
        reason: String,
    },

    /// The live resource does not exist (anymore).
    #[error("{kind} '{id}' not found")]
    NotFound { kind: ResourceKind, id: PhysicalId },

    /// A source location could not be reached.
    #[error("Source location '{location}' is unreachable: {reason}")]
    Unreachable { location: String, reason: String },

    /// Communication with the provider failed.
    #[error("Provider transport error: {0}")]
    Transport(String),
}

/// Failures surfaced by a [`StateBackend`].
#[derive(Debug, Error)]
pub enum StateError {
    #[error("State I/O failed for {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("State could not be (de)serialized: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("State file {} is corrupt: {reason}", .path.display())]
    Corrupt { path: PathBuf, reason: String },
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Creates, updates and deletes live resources.
///
/// Implementations receive fully resolved specs only. Every call is a single
/// synchronous provider operation; implementations do not retry.
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    /// Creates a resource and returns its outputs.
    async fn create(
        &self,
        name: &ResourceName,
        spec: &ResolvedSpec,
    ) -> Result<ResourceOutputs, ProviderError>;

    /// Updates a live resource in place and returns its (possibly new) outputs.
    async fn update(
        &self,
        name: &ResourceName,
        current: &ResourceOutputs,
        spec: &ResolvedSpec,
    ) -> Result<ResourceOutputs, ProviderError>;

    /// Deletes a live resource.
    async fn delete(
        &self,
        name: &ResourceName,
        kind: ResourceKind,
        current: &ResourceOutputs,
    ) -> Result<(), ProviderError>;
}

/// Persists resource state by logical name.
#[async_trait]
pub trait StateBackend: Send + Sync {
    async fn get(&self, name: &ResourceName) -> Result<Option<ResourceState>, StateError>;

    /// Inserts or replaces the record for `state.name`.
    async fn put(&self, state: ResourceState) -> Result<(), StateError>;

    /// Removes and returns the record for `name`, if any.
    async fn remove(&self, name: &ResourceName) -> Result<Option<ResourceState>, StateError>;

    /// Every record, in the order they were first written.
    async fn list(&self) -> Result<Vec<ResourceState>, StateError>;
}
