//! Managed build service resources: source credentials, projects, webhooks.

use serde::Serialize;

use super::{invalid, Input};
use crate::webhook::{CompiledFilterGroups, FilterGroup};
use crate::{ResourceName, Secret, StackError};

// ---------------------------------------------------------------------------
// Source credential
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthType {
    PersonalAccessToken,
    BasicAuth,
    Oauth,
}

/// Source-control host a credential is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerType {
    Github,
    GithubEnterprise,
    Bitbucket,
}

/// A token letting the build service authenticate to a source host.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceCredentialSpec {
    pub auth_type: AuthType,
    pub server_type: ServerType,
    pub token: Secret,
    /// Required for `BASIC_AUTH` only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
}

impl SourceCredentialSpec {
    pub fn personal_access_token(server_type: ServerType, token: Secret) -> Self {
        Self {
            auth_type: AuthType::PersonalAccessToken,
            server_type,
            token,
            user_name: None,
        }
    }

    pub(super) fn validate(&self, name: &ResourceName) -> Result<(), StackError> {
        if self.token.is_empty() {
            return Err(invalid(name, "token is empty"));
        }
        if self.auth_type == AuthType::BasicAuth && self.user_name.is_none() {
            return Err(invalid(name, "BASIC_AUTH credentials need a user name"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Project
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceType {
    Github,
    GithubEnterprise,
    Bitbucket,
    #[serde(rename = "CODECOMMIT")]
    CodeCommit,
    S3,
    NoSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnvironmentType {
    LinuxContainer,
    LinuxGpuContainer,
    ArmContainer,
    WindowsServer2019Container,
}

/// Compute class of the build container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ComputeType {
    #[serde(rename = "BUILD_GENERAL1_SMALL")]
    Small,
    #[serde(rename = "BUILD_GENERAL1_MEDIUM")]
    Medium,
    #[serde(rename = "BUILD_GENERAL1_LARGE")]
    Large,
    #[serde(rename = "BUILD_GENERAL1_2XLARGE")]
    TwoXLarge,
}

impl ComputeType {
    pub const ALL: [ComputeType; 4] = [Self::Small, Self::Medium, Self::Large, Self::TwoXLarge];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Small => "BUILD_GENERAL1_SMALL",
            Self::Medium => "BUILD_GENERAL1_MEDIUM",
            Self::Large => "BUILD_GENERAL1_LARGE",
            Self::TwoXLarge => "BUILD_GENERAL1_2XLARGE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArtifactsType {
    NoArtifacts,
    S3,
    Codepipeline,
}

/// How the build service interprets an environment variable's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VariableType {
    /// The value is injected as-is.
    Plaintext,
    /// The value is a parameter-store *name*, resolved inside the build sandbox.
    ParameterStore,
    /// The value is a secrets-manager secret id, resolved inside the build sandbox.
    SecretsManager,
}

/// An environment variable injected into the build container.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentVariable {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: VariableType,
    pub value: Input,
}

impl EnvironmentVariable {
    pub fn plaintext(name: impl Into<String>, value: impl Into<Input>) -> Self {
        Self {
            name: name.into(),
            kind: VariableType::Plaintext,
            value: value.into(),
        }
    }

    /// A variable resolved from a stored parameter at build time.
    ///
    /// `parameter_name` is the parameter's name (usually a reference to its
    /// `name` output), never its value.
    pub fn from_parameter(name: impl Into<String>, parameter_name: impl Into<Input>) -> Self {
        Self {
            name: name.into(),
            kind: VariableType::ParameterStore,
            value: parameter_name.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSource {
    #[serde(rename = "type")]
    pub kind: SourceType,
    pub location: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buildspec: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectEnvironment {
    #[serde(rename = "type")]
    pub kind: EnvironmentType,
    pub compute_type: ComputeType,
    pub image: String,
    pub environment_variables: Vec<EnvironmentVariable>,
}

impl ProjectEnvironment {
    /// Declared variables, in injection order.
    pub fn variables(&self) -> &[EnvironmentVariable] {
        &self.environment_variables
    }
}

/// A managed build configuration.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSpec {
    /// ARN of the role the build service assumes.
    pub service_role: Input,
    pub source: ProjectSource,
    pub environment: ProjectEnvironment,
    pub artifacts: ArtifactsType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ProjectSpec {
    pub(super) fn validate(&self, name: &ResourceName) -> Result<(), StackError> {
        if self.source.kind != SourceType::NoSource && self.source.location.is_empty() {
            return Err(invalid(name, "source location is empty"));
        }
        if self.environment.image.is_empty() {
            return Err(invalid(name, "environment image is empty"));
        }

        let mut seen = std::collections::HashSet::new();
        for variable in self.environment.variables() {
            if variable.name.is_empty() {
                return Err(invalid(name, "environment variable with empty name"));
            }
            if !seen.insert(variable.name.as_str()) {
                return Err(invalid(
                    name,
                    format!("environment variable '{}' declared twice", variable.name),
                ));
            }
            if variable.kind != VariableType::Plaintext && variable.value.value() == Some("") {
                return Err(invalid(
                    name,
                    format!("environment variable '{}' names no stored value", variable.name),
                ));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Webhook
// ---------------------------------------------------------------------------

/// Invokes a project when a repository event passes one of the filter groups.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookSpec {
    pub project_name: Input,
    pub filter_groups: Vec<FilterGroup>,
}

impl WebhookSpec {
    /// Compiles the filter groups for local evaluation.
    pub fn compile(&self) -> Result<CompiledFilterGroups, String> {
        CompiledFilterGroups::compile(&self.filter_groups)
    }

    pub(super) fn validate(&self, name: &ResourceName) -> Result<(), StackError> {
        self.compile()
            .map(|_| ())
            .map_err(|reason| StackError::InvalidWebhookFilter {
                resource: name.clone(),
                reason,
            })
    }
}
