//! IAM policy documents.
//!
//! A [`PolicyDocument`] is used in two roles: as a *trust* policy (who may
//! assume a role; every statement names a principal) and as a *permission*
//! policy (what the holder may do; no statement names a principal). Both are
//! checked by [`PolicyDocument::validate`] before a document is handed to a
//! provider, so malformed documents fail at configuration time rather than
//! half-way through an apply.
//!
//! The JSON form uses the provider's casing (`Version`, `Statement`, `Effect`,
//! `Action`, `Resource`, `Principal`). Single-element action and resource lists
//! serialize as plain strings and both forms are accepted on input.

use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Current policy language version.
pub const POLICY_VERSION: &str = "2012-10-17";

/// Policy language versions the provider still accepts.
const SUPPORTED_VERSIONS: &[&str] = &[POLICY_VERSION, "2008-10-17"];

// ---------------------------------------------------------------------------
// Document model
// ---------------------------------------------------------------------------

/// Whether a statement grants or refuses the listed actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Effect {
    Allow,
    Deny,
}

/// The principal a trust statement applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Principal {
    /// A provider service, e.g. `codebuild.amazonaws.com`.
    Service(String),
    /// An account or identity ARN.
    #[serde(rename = "AWS")]
    Aws(String),
    /// A federated identity provider.
    Federated(String),
}

/// What a document is used for; decides whether principals are required or forbidden.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyPurpose {
    /// Attached to a role as its assume-role policy.
    Trust,
    /// Attached to an identity (inline or managed).
    Permission,
}

/// A single policy statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Statement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,

    pub effect: Effect,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<Principal>,

    #[serde(with = "one_or_many")]
    pub action: Vec<String>,

    /// Resources the statement applies to. Empty only in trust statements.
    #[serde(default, with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub resource: Vec<String>,
}

impl Statement {
    /// An `Allow` statement for `actions` on `resources`.
    pub fn allow<A, R>(actions: A, resources: R) -> Self
    where
        A: IntoIterator,
        A::Item: Into<String>,
        R: IntoIterator,
        R::Item: Into<String>,
    {
        Self {
            sid: None,
            effect: Effect::Allow,
            principal: None,
            action: actions.into_iter().map(Into::into).collect(),
            resource: resources.into_iter().map(Into::into).collect(),
        }
    }

    /// A `Deny` statement for `actions` on `resources`.
    pub fn deny<A, R>(actions: A, resources: R) -> Self
    where
        A: IntoIterator,
        A::Item: Into<String>,
        R: IntoIterator,
        R::Item: Into<String>,
    {
        Self {
            effect: Effect::Deny,
            ..Self::allow(actions, resources)
        }
    }

    /// Lets `principal` call `sts:AssumeRole`.
    pub fn assume_role(principal: Principal) -> Self {
        Self {
            sid: None,
            effect: Effect::Allow,
            principal: Some(principal),
            action: vec!["sts:AssumeRole".to_string()],
            resource: Vec::new(),
        }
    }

    /// Sets the statement id.
    pub fn with_sid(mut self, sid: impl Into<String>) -> Self {
        self.sid = Some(sid.into());
        self
    }

    /// Returns `true` if any of this statement's action patterns covers `action`.
    pub fn covers(&self, action: &str) -> bool {
        self.action
            .iter()
            .any(|pattern| glob_matches(pattern, action))
    }
}

/// A versioned, ordered list of statements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    pub version: String,
    pub statement: Vec<Statement>,
}

impl PolicyDocument {
    /// Creates a document at the current policy language version.
    pub fn new(statements: Vec<Statement>) -> Self {
        Self {
            version: POLICY_VERSION.to_string(),
            statement: statements,
        }
    }

    /// Trust policy letting the named service assume the role and nothing else.
    pub fn trust_for_service(service: impl Into<String>) -> Self {
        Self::new(vec![Statement::assume_role(Principal::Service(service.into()))])
    }

    /// Parses a document from its JSON form.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Returns `true` if the document grants `action`.
    ///
    /// An explicit `Deny` covering the action wins over any `Allow`.
    pub fn allows(&self, action: &str) -> bool {
        let mut allowed = false;
        for statement in &self.statement {
            if !statement.covers(action) {
                continue;
            }
            match statement.effect {
                Effect::Deny => return false,
                Effect::Allow => allowed = true,
            }
        }
        allowed
    }

    /// Returns `true` if some statement explicitly denies `action`.
    pub fn denies(&self, action: &str) -> bool {
        self.statement
            .iter()
            .any(|s| s.effect == Effect::Deny && s.covers(action))
    }

    /// Checks the document against the structural rules for `purpose`.
    pub fn validate(&self, purpose: PolicyPurpose) -> Result<(), PolicyViolation> {
        if !SUPPORTED_VERSIONS.contains(&self.version.as_str()) {
            return Err(PolicyViolation::UnsupportedVersion(self.version.clone()));
        }
        if self.statement.is_empty() {
            return Err(PolicyViolation::NoStatements);
        }

        for (index, statement) in self.statement.iter().enumerate() {
            if statement.action.is_empty() {
                return Err(PolicyViolation::NoActions { index });
            }
            if let Some(action) = statement.action.iter().find(|a| !is_valid_action(a)) {
                return Err(PolicyViolation::MalformedAction {
                    index,
                    action: action.clone(),
                });
            }

            match purpose {
                PolicyPurpose::Trust => {
                    if statement.principal.is_none() {
                        return Err(PolicyViolation::MissingPrincipal { index });
                    }
                }
                PolicyPurpose::Permission => {
                    if statement.principal.is_some() {
                        return Err(PolicyViolation::UnexpectedPrincipal { index });
                    }
                    if statement.resource.is_empty() {
                        return Err(PolicyViolation::NoResources { index });
                    }
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Violations
// ---------------------------------------------------------------------------

/// A structural problem with a policy document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyViolation {
    #[error("unsupported policy version '{0}'")]
    UnsupportedVersion(String),

    #[error("policy has no statements")]
    NoStatements,

    #[error("statement {index} has no actions")]
    NoActions { index: usize },

    #[error("statement {index} has malformed action '{action}'")]
    MalformedAction { index: usize, action: String },

    #[error("statement {index} has no resources")]
    NoResources { index: usize },

    #[error("trust statement {index} does not name a principal")]
    MissingPrincipal { index: usize },

    #[error("permission statement {index} must not name a principal")]
    UnexpectedPrincipal { index: usize },
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// `*` alone, or `service:Action` where the action part may use `*` and `?`.
fn is_valid_action(action: &str) -> bool {
    if action == "*" {
        return true;
    }
    let Some((service, name)) = action.split_once(':') else {
        return false;
    };
    !service.is_empty()
        && service
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '*' || c == '?')
}

/// Case-insensitive glob match supporting `*` (any run) and `?` (any single
/// character), the wildcards IAM allows in action names.
fn glob_matches(pattern: &str, value: &str) -> bool {
    let translated = regex::escape(pattern).replace(r"\*", ".*").replace(r"\?", ".");
    RegexBuilder::new(&format!("^(?:{translated})$"))
        .case_insensitive(true)
        .build()
        .is_ok_and(|re| re.is_match(value))
}

mod one_or_many {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    pub fn serialize<S: Serializer>(values: &[String], serializer: S) -> Result<S::Ok, S::Error> {
        match values {
            [single] => single.serialize(serializer),
            _ => values.serialize(serializer),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
        Ok(match OneOrMany::deserialize(deserializer)? {
            OneOrMany::One(value) => vec![value],
            OneOrMany::Many(values) => values,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn create_and_pass() -> PolicyDocument {
        PolicyDocument::new(vec![
            Statement::allow(["codebuild:CreateProject"], ["*"]),
            Statement::allow(["iam:PassRole"], ["*"]),
        ])
    }

    #[test]
    fn trust_policy_serializes_in_provider_casing() {
        let doc = PolicyDocument::trust_for_service("codebuild.amazonaws.com");
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "Version": "2012-10-17",
                "Statement": [{
                    "Effect": "Allow",
                    "Principal": { "Service": "codebuild.amazonaws.com" },
                    "Action": "sts:AssumeRole"
                }]
            })
        );
        assert!(doc.validate(PolicyPurpose::Trust).is_ok());
    }

    #[test]
    fn parses_string_and_array_actions() {
        let doc = PolicyDocument::from_json(
            r#"{
                "Version": "2012-10-17",
                "Statement": [
                    { "Action": ["codebuild:CreateProject"], "Effect": "Allow", "Resource": "*" },
                    { "Effect": "Allow", "Action": "iam:PassRole", "Resource": "*" }
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(doc, create_and_pass());
    }

    #[test]
    fn unknown_effect_is_rejected_at_parse_time() {
        let err = PolicyDocument::from_json(
            r#"{"Version":"2012-10-17","Statement":[{"Effect":"Maybe","Action":"s3:GetObject","Resource":"*"}]}"#,
        );
        assert!(err.is_err());
    }

    #[test]
    fn empty_actions_are_rejected() {
        let doc = PolicyDocument::new(vec![Statement::allow(Vec::<String>::new(), ["*"])]);
        assert_eq!(
            doc.validate(PolicyPurpose::Permission),
            Err(PolicyViolation::NoActions { index: 0 })
        );
    }

    #[test]
    fn empty_document_is_rejected() {
        let doc = PolicyDocument::new(Vec::new());
        assert_eq!(
            doc.validate(PolicyPurpose::Permission),
            Err(PolicyViolation::NoStatements)
        );
    }

    #[rstest]
    #[case("codebuild")]
    #[case("codebuild:")]
    #[case(":CreateProject")]
    #[case("CodeBuild:CreateProject")]
    #[case("codebuild:Create Project")]
    fn malformed_actions_are_rejected(#[case] action: &str) {
        let doc = PolicyDocument::new(vec![Statement::allow([action], ["*"])]);
        assert!(matches!(
            doc.validate(PolicyPurpose::Permission),
            Err(PolicyViolation::MalformedAction { index: 0, .. })
        ));
    }

    #[test]
    fn trust_statement_requires_principal() {
        let doc = PolicyDocument::new(vec![Statement::allow(["sts:AssumeRole"], ["*"])]);
        assert_eq!(
            doc.validate(PolicyPurpose::Trust),
            Err(PolicyViolation::MissingPrincipal { index: 0 })
        );
    }

    #[test]
    fn permission_statement_rejects_principal() {
        let doc = PolicyDocument::trust_for_service("codebuild.amazonaws.com");
        assert_eq!(
            doc.validate(PolicyPurpose::Permission),
            Err(PolicyViolation::UnexpectedPrincipal { index: 0 })
        );
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let mut doc = create_and_pass();
        doc.version = "2020-01-01".into();
        assert!(matches!(
            doc.validate(PolicyPurpose::Permission),
            Err(PolicyViolation::UnsupportedVersion(_))
        ));
    }

    #[rstest]
    #[case("iam:PassRole", true)]
    #[case("iam:passrole", true)]
    #[case("codebuild:CreateProject", true)]
    #[case("codebuild:DeleteProject", false)]
    #[case("s3:GetObject", false)]
    fn allows_matches_case_insensitively(#[case] action: &str, #[case] expected: bool) {
        assert_eq!(create_and_pass().allows(action), expected);
    }

    #[test]
    fn wildcards_cover_actions() {
        let doc = PolicyDocument::new(vec![Statement::allow(["codebuild:*", "iam:Pass*"], ["*"])]);
        assert!(doc.allows("codebuild:CreateProject"));
        assert!(doc.allows("iam:PassRole"));
        assert!(!doc.allows("iam:CreateUser"));
        assert!(PolicyDocument::new(vec![Statement::allow(["*"], ["*"])]).allows("iam:PassRole"));
    }

    #[test]
    fn explicit_deny_wins() {
        let doc = PolicyDocument::new(vec![
            Statement::allow(["*"], ["*"]),
            Statement::deny(["iam:PassRole"], ["*"]),
        ]);
        assert!(!doc.allows("iam:PassRole"));
        assert!(doc.denies("iam:PassRole"));
        assert!(doc.allows("codebuild:CreateProject"));
    }

    #[rstest]
    #[case("a*c", "abbbc", true)]
    #[case("a?c", "abc", true)]
    #[case("a?c", "abbc", false)]
    #[case("*", "", true)]
    #[case("ab", "abc", false)]
    #[case("codebuild:*", "CodeBuild:CreateProject", true)]
    #[case("iam:Pass.Role", "iam:PassXRole", false)]
    #[case("s3:Get*Acl", "s3:GetObjectAcl", true)]
    fn glob_matching(#[case] pattern: &str, #[case] value: &str, #[case] expected: bool) {
        assert_eq!(glob_matches(pattern, value), expected);
    }
}
