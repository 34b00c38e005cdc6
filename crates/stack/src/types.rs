//! Shared value types for the resource graph domain.
//!
//! Unlike the newtype identifiers in [`crate::identifiers`], these types carry
//! meaningful values that participate in graph evaluation: what kind a resource
//! is, which output attribute a reference reads, and when state was recorded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Resource kinds
// ---------------------------------------------------------------------------

/// The provider-side type of a declared resource.
///
/// The serialized form is the provider type token, which is also what the
/// state backend records, so a kind change between runs forces a replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    #[serde(rename = "aws:iam/role:Role")]
    Role,
    #[serde(rename = "aws:iam/rolePolicy:RolePolicy")]
    RolePolicy,
    #[serde(rename = "aws:iam/policy:Policy")]
    Policy,
    #[serde(rename = "aws:iam/rolePolicyAttachment:RolePolicyAttachment")]
    RolePolicyAttachment,
    #[serde(rename = "aws:iam/user:User")]
    User,
    #[serde(rename = "aws:iam/group:Group")]
    Group,
    #[serde(rename = "aws:iam/policyAttachment:PolicyAttachment")]
    PolicyAttachment,
    #[serde(rename = "aws:codebuild/sourceCredential:SourceCredential")]
    SourceCredential,
    #[serde(rename = "aws:ssm/parameter:Parameter")]
    Parameter,
    #[serde(rename = "aws:codebuild/project:Project")]
    Project,
    #[serde(rename = "aws:codebuild/webhook:Webhook")]
    Webhook,
}

impl ResourceKind {
    /// Returns the provider type token (e.g. `"aws:iam/role:Role"`).
    pub fn type_token(self) -> &'static str {
        match self {
            Self::Role => "aws:iam/role:Role",
            Self::RolePolicy => "aws:iam/rolePolicy:RolePolicy",
            Self::Policy => "aws:iam/policy:Policy",
            Self::RolePolicyAttachment => "aws:iam/rolePolicyAttachment:RolePolicyAttachment",
            Self::User => "aws:iam/user:User",
            Self::Group => "aws:iam/group:Group",
            Self::PolicyAttachment => "aws:iam/policyAttachment:PolicyAttachment",
            Self::SourceCredential => "aws:codebuild/sourceCredential:SourceCredential",
            Self::Parameter => "aws:ssm/parameter:Parameter",
            Self::Project => "aws:codebuild/project:Project",
            Self::Webhook => "aws:codebuild/webhook:Webhook",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.type_token())
    }
}

// ---------------------------------------------------------------------------
// Output attributes
// ---------------------------------------------------------------------------

/// An output attribute of a live resource that another resource may consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Attribute {
    /// The resource's ARN. Not every kind has one (e.g. attachments).
    Arn,
    /// The provider-assigned physical name.
    Name,
    /// The provider-assigned identifier.
    Id,
}

impl std::fmt::Display for Attribute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Arn => f.write_str("arn"),
            Self::Name => f.write_str("name"),
            Self::Id => f.write_str("id"),
        }
    }
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// A UTC wall-clock timestamp.
///
/// Wraps [`chrono::DateTime<Utc>`] so callers never depend on `chrono` types
/// directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Returns the current UTC time as a [`Timestamp`].
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Creates a [`Timestamp`] from a [`DateTime<Utc>`].
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Returns the underlying [`DateTime<Utc>`].
    pub fn as_datetime(self) -> DateTime<Utc> {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_serializes_as_type_token() {
        let json = serde_json::to_string(&ResourceKind::PolicyAttachment).unwrap();
        assert_eq!(json, "\"aws:iam/policyAttachment:PolicyAttachment\"");
        assert_eq!(
            ResourceKind::PolicyAttachment.type_token(),
            "aws:iam/policyAttachment:PolicyAttachment"
        );
    }

    #[test]
    fn kind_round_trips_through_state_json() {
        let kind: ResourceKind = serde_json::from_str("\"aws:codebuild/webhook:Webhook\"").unwrap();
        assert_eq!(kind, ResourceKind::Webhook);
    }
}
