//! Declared resources and the inputs that link them.
//!
//! Every resource is a [`ResourceSpec`]: one variant per provider kind, each
//! wrapping a plain struct of inputs. Any input that comes from another
//! resource is an [`Input::Output`] holding a [`Reference`]; those references
//! are the edges of the [`crate::ResourceGraph`]. Before a spec reaches a
//! provider every reference is replaced by the referenced resource's recorded
//! output, producing a [`ResolvedSpec`].
//!
//! Specs serialize to the form stored in state and printed by `graph`: secrets
//! appear only as the redaction marker and unresolved references as
//! `{"$ref": ..., "attribute": ...}`.

mod codebuild;
mod iam;
mod ssm;

pub use codebuild::{
    ArtifactsType, AuthType, ComputeType, EnvironmentType, EnvironmentVariable, ProjectEnvironment,
    ProjectSource, ProjectSpec, ServerType, SourceCredentialSpec, SourceType, VariableType,
    WebhookSpec,
};
pub use iam::{
    GroupSpec, PolicyAttachmentSpec, PolicySpec, RolePolicyAttachmentSpec, RolePolicySpec,
    RoleSpec, UserSpec,
};
pub use ssm::{ParameterSpec, ParameterType};

use serde::Serialize;

use crate::{Attribute, ResourceKind, ResourceName, StackError};

// ---------------------------------------------------------------------------
// Inputs and references
// ---------------------------------------------------------------------------

/// Reads one output attribute of another resource in the graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Reference {
    #[serde(rename = "$ref")]
    pub resource: ResourceName,
    pub attribute: Attribute,
}

impl Reference {
    pub fn new(resource: ResourceName, attribute: Attribute) -> Self {
        Self { resource, attribute }
    }

    pub fn arn(resource: &ResourceName) -> Self {
        Self::new(resource.clone(), Attribute::Arn)
    }

    pub fn name(resource: &ResourceName) -> Self {
        Self::new(resource.clone(), Attribute::Name)
    }

    pub fn id(resource: &ResourceName) -> Self {
        Self::new(resource.clone(), Attribute::Id)
    }
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.resource, self.attribute)
    }
}

/// A string input: either known at declaration time or read from another resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Input {
    Value(String),
    Output(Reference),
}

impl Input {
    /// Returns the literal value, or `None` while the input is still a reference.
    pub fn value(&self) -> Option<&str> {
        match self {
            Self::Value(v) => Some(v),
            Self::Output(_) => None,
        }
    }

    pub fn reference(&self) -> Option<&Reference> {
        match self {
            Self::Value(_) => None,
            Self::Output(r) => Some(r),
        }
    }
}

impl From<&str> for Input {
    fn from(value: &str) -> Self {
        Self::Value(value.to_string())
    }
}

impl From<String> for Input {
    fn from(value: String) -> Self {
        Self::Value(value)
    }
}

impl From<Reference> for Input {
    fn from(reference: Reference) -> Self {
        Self::Output(reference)
    }
}

// ---------------------------------------------------------------------------
// Specs
// ---------------------------------------------------------------------------

/// Declared inputs of one resource.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ResourceSpec {
    Role(RoleSpec),
    RolePolicy(RolePolicySpec),
    Policy(PolicySpec),
    RolePolicyAttachment(RolePolicyAttachmentSpec),
    User(UserSpec),
    Group(GroupSpec),
    PolicyAttachment(PolicyAttachmentSpec),
    SourceCredential(SourceCredentialSpec),
    Parameter(ParameterSpec),
    Project(ProjectSpec),
    Webhook(WebhookSpec),
}

impl ResourceSpec {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Role(_) => ResourceKind::Role,
            Self::RolePolicy(_) => ResourceKind::RolePolicy,
            Self::Policy(_) => ResourceKind::Policy,
            Self::RolePolicyAttachment(_) => ResourceKind::RolePolicyAttachment,
            Self::User(_) => ResourceKind::User,
            Self::Group(_) => ResourceKind::Group,
            Self::PolicyAttachment(_) => ResourceKind::PolicyAttachment,
            Self::SourceCredential(_) => ResourceKind::SourceCredential,
            Self::Parameter(_) => ResourceKind::Parameter,
            Self::Project(_) => ResourceKind::Project,
            Self::Webhook(_) => ResourceKind::Webhook,
        }
    }

    /// Every input of this spec, in declaration order.
    pub fn inputs(&self) -> Vec<&Input> {
        match self {
            Self::Role(_) | Self::Policy(_) | Self::User(_) | Self::Group(_) => Vec::new(),
            Self::SourceCredential(_) | Self::Parameter(_) => Vec::new(),
            Self::RolePolicy(s) => vec![&s.role],
            Self::RolePolicyAttachment(s) => vec![&s.role, &s.policy_arn],
            Self::PolicyAttachment(s) => s
                .users
                .iter()
                .chain(&s.groups)
                .chain(&s.roles)
                .chain(std::iter::once(&s.policy_arn))
                .collect(),
            Self::Project(s) => std::iter::once(&s.service_role)
                .chain(s.environment.environment_variables.iter().map(|v| &v.value))
                .collect(),
            Self::Webhook(s) => vec![&s.project_name],
        }
    }

    fn inputs_mut(&mut self) -> Vec<&mut Input> {
        match self {
            Self::Role(_) | Self::Policy(_) | Self::User(_) | Self::Group(_) => Vec::new(),
            Self::SourceCredential(_) | Self::Parameter(_) => Vec::new(),
            Self::RolePolicy(s) => vec![&mut s.role],
            Self::RolePolicyAttachment(s) => vec![&mut s.role, &mut s.policy_arn],
            Self::PolicyAttachment(s) => s
                .users
                .iter_mut()
                .chain(s.groups.iter_mut())
                .chain(s.roles.iter_mut())
                .chain(std::iter::once(&mut s.policy_arn))
                .collect(),
            Self::Project(s) => std::iter::once(&mut s.service_role)
                .chain(s.environment.environment_variables.iter_mut().map(|v| &mut v.value))
                .collect(),
            Self::Webhook(s) => vec![&mut s.project_name],
        }
    }

    /// References to other resources, in declaration order.
    pub fn references(&self) -> impl Iterator<Item = &Reference> {
        self.inputs().into_iter().filter_map(Input::reference)
    }

    /// References whose target must be of a particular kind.
    ///
    /// Plaintext environment variables may read any output and are not listed.
    pub fn typed_references(&self) -> Vec<(&Reference, ResourceKind)> {
        fn typed(input: &Input, kind: ResourceKind) -> Option<(&Reference, ResourceKind)> {
            input.reference().map(|r| (r, kind))
        }

        match self {
            Self::Role(_) | Self::Policy(_) | Self::User(_) | Self::Group(_) => Vec::new(),
            Self::SourceCredential(_) | Self::Parameter(_) => Vec::new(),
            Self::RolePolicy(s) => typed(&s.role, ResourceKind::Role).into_iter().collect(),
            Self::RolePolicyAttachment(s) => typed(&s.role, ResourceKind::Role)
                .into_iter()
                .chain(typed(&s.policy_arn, ResourceKind::Policy))
                .collect(),
            Self::PolicyAttachment(s) => s
                .users
                .iter()
                .filter_map(|i| typed(i, ResourceKind::User))
                .chain(s.groups.iter().filter_map(|i| typed(i, ResourceKind::Group)))
                .chain(s.roles.iter().filter_map(|i| typed(i, ResourceKind::Role)))
                .chain(typed(&s.policy_arn, ResourceKind::Policy))
                .collect(),
            Self::Project(s) => typed(&s.service_role, ResourceKind::Role)
                .into_iter()
                .chain(
                    s.environment
                        .variables()
                        .iter()
                        .filter(|v| v.kind == VariableType::ParameterStore)
                        .filter_map(|v| typed(&v.value, ResourceKind::Parameter)),
                )
                .collect(),
            Self::Webhook(s) => typed(&s.project_name, ResourceKind::Project)
                .into_iter()
                .collect(),
        }
    }

    /// Replaces every reference with the value `lookup` returns for it.
    ///
    /// Fails with the first reference `lookup` cannot satisfy.
    pub fn resolve<F>(&self, mut lookup: F) -> Result<ResolvedSpec, Reference>
    where
        F: FnMut(&Reference) -> Option<String>,
    {
        let mut resolved = self.clone();
        for input in resolved.inputs_mut() {
            if let Input::Output(reference) = input {
                let value = lookup(reference).ok_or_else(|| reference.clone())?;
                *input = Input::Value(value);
            }
        }
        Ok(ResolvedSpec(resolved))
    }

    /// Checks kind-specific invariants that do not depend on other resources.
    pub fn validate(&self, name: &ResourceName) -> Result<(), StackError> {
        match self {
            Self::Role(s) => s.validate(name),
            Self::RolePolicy(s) => s.validate(name),
            Self::Policy(s) => s.validate(name),
            Self::RolePolicyAttachment(_) | Self::User(_) | Self::Group(_) => Ok(()),
            Self::PolicyAttachment(s) => s.validate(name),
            Self::SourceCredential(s) => s.validate(name),
            Self::Parameter(s) => s.validate(name),
            Self::Project(s) => s.validate(name),
            Self::Webhook(s) => s.validate(name),
        }
    }

    /// The declared inputs as JSON, with secrets redacted.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Returns `true` if resources of `kind` produce `attribute` as an output.
pub fn has_attribute(kind: ResourceKind, attribute: Attribute) -> bool {
    match attribute {
        Attribute::Id => true,
        Attribute::Name => !matches!(
            kind,
            ResourceKind::RolePolicyAttachment | ResourceKind::PolicyAttachment | ResourceKind::Webhook
        ),
        Attribute::Arn => matches!(
            kind,
            ResourceKind::Role
                | ResourceKind::Policy
                | ResourceKind::User
                | ResourceKind::Group
                | ResourceKind::SourceCredential
                | ResourceKind::Parameter
                | ResourceKind::Project
        ),
    }
}

/// A spec whose inputs are all literal values.
///
/// Only [`ResourceSpec::resolve`] constructs one, so a provider receiving a
/// `ResolvedSpec` never sees an unresolved reference.
#[derive(Debug, Clone)]
pub struct ResolvedSpec(ResourceSpec);

impl ResolvedSpec {
    pub fn spec(&self) -> &ResourceSpec {
        &self.0
    }

    pub fn kind(&self) -> ResourceKind {
        self.0.kind()
    }

    /// Wraps a spec that has no references at all.
    pub fn literal(spec: ResourceSpec) -> Result<Self, Reference> {
        spec.resolve(|_| None)
    }
}

impl std::ops::Deref for ResolvedSpec {
    type Target = ResourceSpec;

    fn deref(&self) -> &ResourceSpec {
        &self.0
    }
}

pub(crate) fn invalid(name: &ResourceName, reason: impl Into<String>) -> StackError {
    StackError::InvalidResource {
        resource: name.clone(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PolicyDocument;

    fn name(s: &str) -> ResourceName {
        ResourceName::new(s).unwrap()
    }

    fn attachment() -> ResourceSpec {
        ResourceSpec::PolicyAttachment(PolicyAttachmentSpec {
            users: vec![Reference::name(&name("myuser")).into()],
            groups: vec![Reference::name(&name("mygroup")).into()],
            roles: vec![Reference::name(&name("builder-role")).into()],
            policy_arn: Reference::arn(&name("mypolicy")).into(),
        })
    }

    #[test]
    fn references_follow_declaration_order() {
        let spec = attachment();
        let targets: Vec<_> = spec.references().map(|r| r.resource.as_str()).collect();
        assert_eq!(targets, vec!["myuser", "mygroup", "builder-role", "mypolicy"]);
    }

    #[test]
    fn resolve_replaces_every_reference() {
        let resolved = attachment()
            .resolve(|r| Some(format!("{}-{}", r.resource, r.attribute)))
            .unwrap();
        let ResourceSpec::PolicyAttachment(spec) = resolved.spec() else {
            panic!("kind changed");
        };
        assert_eq!(spec.policy_arn.value(), Some("mypolicy-arn"));
        assert_eq!(spec.users[0].value(), Some("myuser-name"));
        assert_eq!(resolved.references().count(), 0);
    }

    #[test]
    fn resolve_reports_first_missing_reference() {
        let missing = attachment()
            .resolve(|r| (r.resource.as_str() != "mygroup").then(|| "x".to_string()))
            .unwrap_err();
        assert_eq!(missing, Reference::name(&name("mygroup")));
    }

    #[test]
    fn unresolved_reference_serializes_as_ref_object() {
        let json = attachment().to_json();
        assert_eq!(
            json["policyArn"],
            serde_json::json!({ "$ref": "mypolicy", "attribute": "arn" })
        );
    }

    #[test]
    fn literal_rejects_specs_with_references() {
        assert!(ResolvedSpec::literal(attachment()).is_err());
        let role = ResourceSpec::Role(RoleSpec::new(PolicyDocument::trust_for_service("codebuild.amazonaws.com")));
        assert!(ResolvedSpec::literal(role).is_ok());
    }

    #[test]
    fn attachments_have_no_arn() {
        assert!(!has_attribute(ResourceKind::PolicyAttachment, Attribute::Arn));
        assert!(has_attribute(ResourceKind::Policy, Attribute::Arn));
        assert!(has_attribute(ResourceKind::Parameter, Attribute::Name));
        assert!(!has_attribute(ResourceKind::Webhook, Attribute::Name));
    }
}
