//! The simulated cloud account.
//!
//! Every map is keyed by the identifier the real service looks resources up
//! by: names for roles, users, groups, parameters and projects; ARNs for
//! managed policies and source credentials; generated ids for attachments.
//! Secret values are accepted by the provider but never stored here.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use stack::PolicyDocument;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleRecord {
    pub id: String,
    pub arn: String,
    pub assume_role_policy: PolicyDocument,
    /// Inline policies by policy name.
    #[serde(default)]
    pub inline_policies: BTreeMap<String, PolicyDocument>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedPolicyRecord {
    pub id: String,
    pub name: String,
    pub document: PolicyDocument,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityRecord {
    pub id: String,
    pub arn: String,
}

/// One policy bound to any number of users, groups and roles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentRecord {
    pub policy_arn: String,
    #[serde(default)]
    pub users: Vec<String>,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl AttachmentRecord {
    pub fn binds_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn binds_identity(&self, name: &str) -> bool {
        self.users.iter().chain(&self.groups).chain(&self.roles).any(|i| i == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRecord {
    pub server_type: String,
    pub auth_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterRecord {
    pub arn: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// Incremented on every write of the value.
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRecord {
    pub arn: String,
    pub service_role: String,
    pub source_location: String,
    pub image: String,
    pub compute_type: String,
    /// Names of the parameters the build reads.
    #[serde(default)]
    pub parameters: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookRecord {
    pub id: String,
    /// Filter groups as declared.
    pub filter_groups: serde_json::Value,
}

/// Everything that exists in the account.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Account {
    pub roles: BTreeMap<String, RoleRecord>,
    pub policies: BTreeMap<String, ManagedPolicyRecord>,
    pub users: BTreeMap<String, IdentityRecord>,
    pub groups: BTreeMap<String, IdentityRecord>,
    pub attachments: BTreeMap<String, AttachmentRecord>,
    pub source_credentials: BTreeMap<String, CredentialRecord>,
    pub parameters: BTreeMap<String, ParameterRecord>,
    pub projects: BTreeMap<String, ProjectRecord>,
    /// Keyed by project name; a project has at most one webhook.
    pub webhooks: BTreeMap<String, WebhookRecord>,
}

impl Account {
    /// Managed policies attached to `role` by any attachment.
    pub fn attached_policies<'a>(
        &'a self,
        role: &'a str,
    ) -> impl Iterator<Item = &'a ManagedPolicyRecord> + 'a {
        self.attachments
            .values()
            .filter(move |a| a.binds_role(role))
            .filter_map(|a| self.policies.get(&a.policy_arn))
    }

    /// Returns `true` if the union of `role`'s inline and attached policies
    /// allows `action` and none of them denies it.
    pub fn role_allows(&self, role: &RoleRecord, name: &str, action: &str) -> bool {
        let documents: Vec<&PolicyDocument> = role
            .inline_policies
            .values()
            .chain(self.attached_policies(name).map(|p| &p.document))
            .collect();
        !documents.iter().any(|d| d.denies(action)) && documents.iter().any(|d| d.allows(action))
    }

    pub fn role_by_arn(&self, arn: &str) -> Option<(&String, &RoleRecord)> {
        self.roles.iter().find(|(_, role)| role.arn == arn)
    }

    /// Attachments that still reference `policy_arn`.
    pub fn policy_in_use(&self, policy_arn: &str) -> bool {
        self.attachments.values().any(|a| a.policy_arn == policy_arn)
    }

    pub fn identity_in_use(&self, name: &str) -> bool {
        self.attachments.values().any(|a| a.binds_identity(name))
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stack::Statement;

    fn role(arn: &str, inline: Vec<(&str, PolicyDocument)>) -> RoleRecord {
        RoleRecord {
            id: "AROA0000".into(),
            arn: arn.into(),
            assume_role_policy: PolicyDocument::trust_for_service("codebuild.amazonaws.com"),
            inline_policies: inline.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
        }
    }

    #[test]
    fn role_permissions_union_inline_and_attached() {
        let mut account = Account::default();
        account.policies.insert(
            "arn:policy".into(),
            ManagedPolicyRecord {
                id: "ANPA0000".into(),
                name: "mypolicy".into(),
                document: PolicyDocument::new(vec![Statement::allow(["codebuild:CreateProject"], ["*"])]),
            },
        );
        account.attachments.insert(
            "att-1".into(),
            AttachmentRecord {
                policy_arn: "arn:policy".into(),
                users: vec![],
                groups: vec![],
                roles: vec!["builder".into()],
            },
        );
        let builder = role(
            "arn:role",
            vec![("inline", PolicyDocument::new(vec![Statement::allow(["iam:PassRole"], ["*"])]))],
        );

        assert!(account.role_allows(&builder, "builder", "iam:PassRole"));
        assert!(account.role_allows(&builder, "builder", "codebuild:CreateProject"));
        assert!(!account.role_allows(&builder, "other", "codebuild:CreateProject"));
        assert!(account.policy_in_use("arn:policy"));
        assert!(account.identity_in_use("builder"));
    }

    #[test]
    fn explicit_deny_in_any_policy_wins() {
        let account = Account::default();
        let builder = role(
            "arn:role",
            vec![
                ("allow", PolicyDocument::new(vec![Statement::allow(["iam:*"], ["*"])])),
                ("deny", PolicyDocument::new(vec![Statement::deny(["iam:PassRole"], ["*"])])),
            ],
        );
        assert!(!account.role_allows(&builder, "builder", "iam:PassRole"));
        assert!(account.role_allows(&builder, "builder", "iam:GetRole"));
    }
}
