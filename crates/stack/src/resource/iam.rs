//! Identity and access management resources.

use serde::Serialize;

use super::{invalid, Input};
use crate::policy::{PolicyDocument, PolicyPurpose};
use crate::{ResourceName, StackError};

fn check_policy(
    name: &ResourceName,
    document: &PolicyDocument,
    purpose: PolicyPurpose,
) -> Result<(), StackError> {
    document
        .validate(purpose)
        .map_err(|violation| StackError::InvalidPolicy {
            resource: name.clone(),
            violation,
        })
}

/// An identity that a service assumes through its trust policy.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleSpec {
    pub assume_role_policy: PolicyDocument,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// IAM path, e.g. `/ci/`. Part of the ARN, so changing it replaces the role.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl RoleSpec {
    pub fn new(assume_role_policy: PolicyDocument) -> Self {
        Self {
            assume_role_policy,
            description: None,
            path: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub(super) fn validate(&self, name: &ResourceName) -> Result<(), StackError> {
        if let Some(path) = &self.path {
            if !path.starts_with('/') || !path.ends_with('/') {
                return Err(invalid(name, format!("role path '{path}' must start and end with '/'")));
            }
        }
        check_policy(name, &self.assume_role_policy, PolicyPurpose::Trust)
    }
}

/// A permission document embedded in a single role.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RolePolicySpec {
    /// Name of the role the document is embedded in.
    pub role: Input,
    pub policy: PolicyDocument,
}

impl RolePolicySpec {
    pub(super) fn validate(&self, name: &ResourceName) -> Result<(), StackError> {
        check_policy(name, &self.policy, PolicyPurpose::Permission)
    }
}

/// A standalone managed permission document.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicySpec {
    pub policy: PolicyDocument,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl PolicySpec {
    pub fn new(policy: PolicyDocument) -> Self {
        Self {
            policy,
            description: None,
        }
    }

    pub(super) fn validate(&self, name: &ResourceName) -> Result<(), StackError> {
        check_policy(name, &self.policy, PolicyPurpose::Permission)
    }
}

/// Attaches one managed policy to one role.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RolePolicyAttachmentSpec {
    /// Role name.
    pub role: Input,
    pub policy_arn: Input,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Attaches one managed policy to a set of users, groups and roles at once.
///
/// The provider applies the attachment atomically: every listed identity gets
/// the policy or the operation fails without attaching anything.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyAttachmentSpec {
    /// User names.
    pub users: Vec<Input>,
    /// Group names.
    pub groups: Vec<Input>,
    /// Role names.
    pub roles: Vec<Input>,
    pub policy_arn: Input,
}

impl PolicyAttachmentSpec {
    pub(super) fn validate(&self, name: &ResourceName) -> Result<(), StackError> {
        if self.users.is_empty() && self.groups.is_empty() && self.roles.is_empty() {
            return Err(invalid(name, "attachment names no users, groups or roles"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::Statement;

    fn name() -> ResourceName {
        ResourceName::new("test").unwrap()
    }

    #[test]
    fn role_requires_trust_shaped_document() {
        let permission = PolicyDocument::new(vec![Statement::allow(["iam:PassRole"], ["*"])]);
        let err = RoleSpec::new(permission).validate(&name()).unwrap_err();
        assert!(matches!(err, StackError::InvalidPolicy { .. }), "got: {err:?}");
    }

    #[test]
    fn role_path_must_be_slash_delimited() {
        let trust = PolicyDocument::trust_for_service("codebuild.amazonaws.com");
        assert!(RoleSpec::new(trust.clone()).with_path("/ci/").validate(&name()).is_ok());
        let err = RoleSpec::new(trust).with_path("ci").validate(&name()).unwrap_err();
        assert!(matches!(err, StackError::InvalidResource { .. }), "got: {err:?}");
    }

    #[test]
    fn empty_attachment_is_rejected() {
        let spec = PolicyAttachmentSpec {
            users: Vec::new(),
            groups: Vec::new(),
            roles: Vec::new(),
            policy_arn: "arn:aws:iam::123456789012:policy/p".into(),
        };
        let err = spec.validate(&name()).unwrap_err();
        assert!(
            matches!(err, StackError::InvalidResource { ref reason, .. } if reason.contains("no users")),
            "got: {err:?}"
        );
    }
}
