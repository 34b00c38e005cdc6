use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::fs;
use tokio::sync::Mutex;
use uuid::Uuid;

use stack::policy::{Effect, PolicyDocument, PolicyPurpose, Principal};
use stack::resource::{
    EnvironmentType, Input, PolicyAttachmentSpec, ProjectSpec, ResolvedSpec, ResourceSpec,
    ServerType, SourceType, VariableType,
};
use stack::{
    Arn, PhysicalId, PhysicalName, ProviderError, ResourceKind, ResourceName, ResourceOutputs,
    ResourceProvider,
};

use crate::account::{
    Account, AttachmentRecord, CredentialRecord, IdentityRecord, ManagedPolicyRecord,
    ParameterRecord, ProjectRecord, RoleRecord, WebhookRecord,
};
use crate::probe::{NoProbe, SourceProbe};

pub const DEFAULT_ACCOUNT_ID: &str = "123456789012";
pub const DEFAULT_REGION: &str = "us-east-1";

/// Principal a project's service role must trust.
pub const BUILD_SERVICE: &str = "codebuild.amazonaws.com";

/// Actions a project's service role needs before the project can be created.
pub const PROJECT_ACTIONS: [&str; 2] = ["codebuild:CreateProject", "iam:PassRole"];

/// Curated build images the account accepts.
pub const KNOWN_IMAGES: &[&str] = &[
    "aws/codebuild/standard:3.0",
    "aws/codebuild/standard:4.0",
    "aws/codebuild/standard:5.0",
    "aws/codebuild/standard:6.0",
    "aws/codebuild/standard:7.0",
    "aws/codebuild/amazonlinux2-x86_64-standard:4.0",
    "aws/codebuild/amazonlinux2-x86_64-standard:5.0",
    "aws/codebuild/amazonlinux2-aarch64-standard:2.0",
    "aws/codebuild/amazonlinux2-aarch64-standard:3.0",
];

/// An in-process cloud account that validates requests the way the real
/// services do and optionally persists itself to a JSON file.
pub struct SimulatedProvider {
    account: Mutex<Account>,
    path: Option<PathBuf>,
    account_id: String,
    region: String,
    probe: Arc<dyn SourceProbe>,
}

impl SimulatedProvider {
    /// A fresh, empty account held in memory only.
    pub fn new(account_id: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            account: Mutex::new(Account::default()),
            path: None,
            account_id: account_id.into(),
            region: region.into(),
            probe: Arc::new(NoProbe),
        }
    }

    /// Loads the account from `path` (empty if the file does not exist) and
    /// saves it back after every mutation.
    pub async fn open(
        path: &Path,
        account_id: impl Into<String>,
        region: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        let account = match fs::read_to_string(path).await {
            Ok(content) => serde_json::from_str(&content).map_err(|e| {
                ProviderError::Transport(format!("account file {} is corrupt: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Account::default(),
            Err(e) => {
                return Err(ProviderError::Transport(format!(
                    "reading account file {}: {e}",
                    path.display()
                )))
            }
        };

        let mut provider = Self::new(account_id, region);
        provider.account = Mutex::new(account);
        provider.path = Some(path.to_path_buf());
        Ok(provider)
    }

    pub fn with_probe(mut self, probe: Arc<dyn SourceProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// A copy of everything currently in the account.
    pub async fn snapshot(&self) -> Account {
        self.account.lock().await.clone()
    }

    async fn save(&self, account: &Account) -> Result<(), ProviderError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let transport = |e: std::io::Error| {
            ProviderError::Transport(format!("writing account file {}: {e}", path.display()))
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(transport)?;
        }
        let content = serde_json::to_string_pretty(account)
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        let temp = path.with_extension("json.tmp");
        fs::write(&temp, content).await.map_err(transport)?;
        fs::rename(&temp, path).await.map_err(transport)
    }

    fn iam_arn(&self, kind: &str, name: &str) -> String {
        format!("arn:aws:iam::{}:{kind}/{name}", self.account_id)
    }

    fn regional_arn(&self, service: &str, resource: &str) -> String {
        format!("arn:aws:{service}:{}:{}:{resource}", self.region, self.account_id)
    }

    // -----------------------------------------------------------------------
    // Per-kind creation
    // -----------------------------------------------------------------------

    async fn create_in(
        &self,
        account: &mut Account,
        name: &ResourceName,
        spec: &ResourceSpec,
    ) -> Result<ResourceOutputs, ProviderError> {
        match spec {
            ResourceSpec::Role(s) => {
                check_policy(name, &s.assume_role_policy, PolicyPurpose::Trust)?;
                let physical = physical_name(name);
                let path = s.path.as_deref().unwrap_or("/").trim_start_matches('/');
                let arn = self.iam_arn("role", &format!("{path}{physical}"));
                let id = unique_id("AROA");
                account.roles.insert(
                    physical.clone(),
                    RoleRecord {
                        id: id.clone(),
                        arn: arn.clone(),
                        assume_role_policy: s.assume_role_policy.clone(),
                        inline_policies: Default::default(),
                    },
                );
                outputs(id, Some(physical), Some(arn))
            }

            ResourceSpec::RolePolicy(s) => {
                check_policy(name, &s.policy, PolicyPurpose::Permission)?;
                let role = value(name, &s.role)?;
                let record = account
                    .roles
                    .get_mut(role)
                    .ok_or_else(|| rejected(name, format!("role '{role}' does not exist")))?;
                let physical = physical_name(name);
                record.inline_policies.insert(physical.clone(), s.policy.clone());
                outputs(format!("{role}:{physical}"), Some(physical), None)
            }

            ResourceSpec::Policy(s) => {
                check_policy(name, &s.policy, PolicyPurpose::Permission)?;
                let physical = physical_name(name);
                let arn = self.iam_arn("policy", &physical);
                let id = unique_id("ANPA");
                account.policies.insert(
                    arn.clone(),
                    ManagedPolicyRecord {
                        id: id.clone(),
                        name: physical.clone(),
                        document: s.policy.clone(),
                    },
                );
                outputs(id, Some(physical), Some(arn))
            }

            ResourceSpec::RolePolicyAttachment(s) => {
                let role = value(name, &s.role)?;
                let policy_arn = value(name, &s.policy_arn)?;
                if !account.roles.contains_key(role) {
                    return Err(rejected(name, format!("role '{role}' does not exist")));
                }
                if !account.policies.contains_key(policy_arn) {
                    return Err(rejected(name, format!("policy '{policy_arn}' does not exist")));
                }
                let id = format!("{role}-{}", short_suffix());
                account.attachments.insert(
                    id.clone(),
                    AttachmentRecord {
                        policy_arn: policy_arn.to_string(),
                        users: Vec::new(),
                        groups: Vec::new(),
                        roles: vec![role.to_string()],
                    },
                );
                outputs(id, None, None)
            }

            ResourceSpec::User(_) => {
                let physical = physical_name(name);
                let record = IdentityRecord {
                    id: unique_id("AIDA"),
                    arn: self.iam_arn("user", &physical),
                };
                let result = outputs(record.id.clone(), Some(physical.clone()), Some(record.arn.clone()));
                account.users.insert(physical, record);
                result
            }

            ResourceSpec::Group(_) => {
                let physical = physical_name(name);
                let record = IdentityRecord {
                    id: unique_id("AGPA"),
                    arn: self.iam_arn("group", &physical),
                };
                let result = outputs(record.id.clone(), Some(physical.clone()), Some(record.arn.clone()));
                account.groups.insert(physical, record);
                result
            }

            ResourceSpec::PolicyAttachment(s) => {
                let record = attachment_record(account, name, s)?;
                let id = physical_name(name);
                account.attachments.insert(id.clone(), record);
                outputs(id, None, None)
            }

            ResourceSpec::SourceCredential(s) => {
                if s.token.is_empty() {
                    return Err(rejected(name, "token is empty"));
                }
                let server_type = wire_name(s.server_type);
                let arn = self.regional_arn("codebuild", &format!("token/{}", server_type.to_lowercase()));
                // One credential per server type; importing again overwrites it.
                account.source_credentials.insert(
                    arn.clone(),
                    CredentialRecord {
                        server_type,
                        auth_type: wire_name(s.auth_type),
                    },
                );
                outputs(arn.clone(), Some(physical_name(name)), Some(arn))
            }

            ResourceSpec::Parameter(s) => {
                if s.value.is_empty() {
                    return Err(rejected(name, "parameter value is empty"));
                }
                let physical = physical_name(name);
                let arn = self.regional_arn("ssm", &format!("parameter/{physical}"));
                account.parameters.insert(
                    physical.clone(),
                    ParameterRecord {
                        arn: arn.clone(),
                        kind: wire_name(s.kind),
                        version: 1,
                    },
                );
                outputs(physical.clone(), Some(physical), Some(arn))
            }

            ResourceSpec::Project(s) => {
                let physical = physical_name(name);
                let arn = self.regional_arn("codebuild", &format!("project/{physical}"));
                let record = self.project_record(account, name, s, arn.clone()).await?;
                account.projects.insert(physical.clone(), record);
                outputs(physical.clone(), Some(physical), Some(arn))
            }

            ResourceSpec::Webhook(s) => {
                let project = value(name, &s.project_name)?;
                if !account.projects.contains_key(project) {
                    return Err(rejected(name, format!("project '{project}' does not exist")));
                }
                if account.webhooks.contains_key(project) {
                    return Err(rejected(name, format!("project '{project}' already has a webhook")));
                }
                s.compile().map_err(|reason| rejected(name, reason))?;
                account.webhooks.insert(
                    project.to_string(),
                    WebhookRecord {
                        id: project.to_string(),
                        filter_groups: to_json(&s.filter_groups)?,
                    },
                );
                outputs(project.to_string(), None, None)
            }
        }
    }

    /// Validates a project against the account and builds its record.
    async fn project_record(
        &self,
        account: &Account,
        name: &ResourceName,
        spec: &ProjectSpec,
        arn: String,
    ) -> Result<ProjectRecord, ProviderError> {
        let role_arn = value(name, &spec.service_role)?;
        let (role_name, role) = account
            .role_by_arn(role_arn)
            .ok_or_else(|| rejected(name, format!("service role '{role_arn}' does not exist")))?;

        if !trusts_build_service(&role.assume_role_policy) {
            return Err(ProviderError::AccessDenied {
                resource: name.clone(),
                reason: format!("role '{role_name}' cannot be assumed by {BUILD_SERVICE}"),
            });
        }
        for action in PROJECT_ACTIONS {
            if !account.role_allows(role, role_name, action) {
                return Err(ProviderError::AccessDenied {
                    resource: name.clone(),
                    reason: format!("role '{role_name}' is not allowed to perform {action}"),
                });
            }
        }

        if spec.source.kind != SourceType::NoSource {
            let location = &spec.source.location;
            if !location.starts_with("https://") {
                return Err(rejected(name, format!("source location '{location}' is not an https URL")));
            }
            self.probe.check(location).await?;
        }
        if let Some(server_type) = credential_server(spec.source.kind) {
            let server_type = wire_name(server_type);
            let imported = account
                .source_credentials
                .values()
                .any(|c| c.server_type == server_type);
            if !imported {
                return Err(rejected(name, format!("no source credential for {server_type}")));
            }
        }

        let environment = &spec.environment;
        if !KNOWN_IMAGES.contains(&environment.image.as_str()) {
            return Err(rejected(name, format!("unknown image '{}'", environment.image)));
        }
        if environment.kind == EnvironmentType::ArmContainer && !environment.image.contains("aarch64") {
            return Err(rejected(name, format!("image '{}' cannot run on ARM", environment.image)));
        }

        let mut parameters = Vec::new();
        for variable in environment.variables() {
            let stored = value(name, &variable.value)?;
            match variable.kind {
                VariableType::Plaintext => {}
                VariableType::ParameterStore => {
                    if !account.parameters.contains_key(stored) {
                        return Err(rejected(
                            name,
                            format!("variable '{}' names missing parameter '{stored}'", variable.name),
                        ));
                    }
                    parameters.push(stored.to_string());
                }
                VariableType::SecretsManager => {
                    return Err(rejected(
                        name,
                        format!("variable '{}': secrets manager is not available", variable.name),
                    ));
                }
            }
        }

        Ok(ProjectRecord {
            arn,
            service_role: role_arn.to_string(),
            source_location: spec.source.location.clone(),
            image: environment.image.clone(),
            compute_type: environment.compute_type.as_str().to_string(),
            parameters,
        })
    }

    // -----------------------------------------------------------------------
    // Per-kind update
    // -----------------------------------------------------------------------

    async fn update_in(
        &self,
        account: &mut Account,
        name: &ResourceName,
        current: &ResourceOutputs,
        spec: &ResourceSpec,
    ) -> Result<ResourceOutputs, ProviderError> {
        let kind = spec.kind();
        let id = current.id.as_str();
        let missing = || ProviderError::NotFound {
            kind,
            id: current.id.clone(),
        };

        match spec {
            ResourceSpec::Role(s) => {
                check_policy(name, &s.assume_role_policy, PolicyPurpose::Trust)?;
                let role = account.roles.get_mut(physical(current)?).ok_or_else(missing)?;
                role.assume_role_policy = s.assume_role_policy.clone();
            }

            ResourceSpec::RolePolicy(s) => {
                check_policy(name, &s.policy, PolicyPurpose::Permission)?;
                let (role, policy) = id.split_once(':').ok_or_else(missing)?;
                let document = account
                    .roles
                    .get_mut(role)
                    .and_then(|r| r.inline_policies.get_mut(policy))
                    .ok_or_else(missing)?;
                *document = s.policy.clone();
            }

            ResourceSpec::Policy(s) => {
                check_policy(name, &s.policy, PolicyPurpose::Permission)?;
                let arn = current.arn.as_ref().map(Arn::as_str).ok_or_else(missing)?;
                let policy = account.policies.get_mut(arn).ok_or_else(missing)?;
                policy.document = s.policy.clone();
            }

            ResourceSpec::RolePolicyAttachment(s) => {
                let policy_arn = value(name, &s.policy_arn)?;
                if !account.policies.contains_key(policy_arn) {
                    return Err(rejected(name, format!("policy '{policy_arn}' does not exist")));
                }
                let record = account.attachments.get_mut(id).ok_or_else(missing)?;
                record.policy_arn = policy_arn.to_string();
            }

            ResourceSpec::User(_) => {
                account.users.get(physical(current)?).ok_or_else(missing)?;
            }

            ResourceSpec::Group(_) => {
                account.groups.get(physical(current)?).ok_or_else(missing)?;
            }

            ResourceSpec::PolicyAttachment(s) => {
                if !account.attachments.contains_key(id) {
                    return Err(missing());
                }
                let record = attachment_record(account, name, s)?;
                account.attachments.insert(id.to_string(), record);
            }

            ResourceSpec::SourceCredential(s) => {
                if s.token.is_empty() {
                    return Err(rejected(name, "token is empty"));
                }
                let record = account.source_credentials.get_mut(id).ok_or_else(missing)?;
                record.auth_type = wire_name(s.auth_type);
            }

            ResourceSpec::Parameter(s) => {
                if s.value.is_empty() {
                    return Err(rejected(name, "parameter value is empty"));
                }
                let record = account.parameters.get_mut(id).ok_or_else(missing)?;
                record.version += 1;
            }

            ResourceSpec::Project(s) => {
                let project = physical(current)?;
                let arn = account
                    .projects
                    .get(project)
                    .map(|p| p.arn.clone())
                    .ok_or_else(missing)?;
                let record = self.project_record(account, name, s, arn).await?;
                account.projects.insert(project.to_string(), record);
            }

            ResourceSpec::Webhook(s) => {
                s.compile().map_err(|reason| rejected(name, reason))?;
                let filter_groups = to_json(&s.filter_groups)?;
                let record = account.webhooks.get_mut(id).ok_or_else(missing)?;
                record.filter_groups = filter_groups;
            }
        }
        Ok(current.clone())
    }

    // -----------------------------------------------------------------------
    // Per-kind deletion
    // -----------------------------------------------------------------------

    fn delete_in(
        &self,
        account: &mut Account,
        name: &ResourceName,
        kind: ResourceKind,
        current: &ResourceOutputs,
    ) -> Result<(), ProviderError> {
        let id = current.id.as_str();
        let missing = || ProviderError::NotFound {
            kind,
            id: current.id.clone(),
        };

        match kind {
            ResourceKind::Role => {
                let role_name = physical(current)?;
                let role = account.roles.get(role_name).ok_or_else(missing)?;
                if !role.inline_policies.is_empty() || account.identity_in_use(role_name) {
                    return Err(rejected(name, format!("role '{role_name}' still has policies")));
                }
                account.roles.remove(role_name);
            }
            ResourceKind::RolePolicy => {
                let (role, policy) = id.split_once(':').ok_or_else(missing)?;
                account
                    .roles
                    .get_mut(role)
                    .and_then(|r| r.inline_policies.remove(policy))
                    .ok_or_else(missing)?;
            }
            ResourceKind::Policy => {
                let arn = current.arn.as_ref().map(Arn::as_str).ok_or_else(missing)?;
                if account.policy_in_use(arn) {
                    return Err(rejected(name, format!("policy '{arn}' is still attached")));
                }
                account.policies.remove(arn).ok_or_else(missing)?;
            }
            ResourceKind::RolePolicyAttachment | ResourceKind::PolicyAttachment => {
                account.attachments.remove(id).ok_or_else(missing)?;
            }
            ResourceKind::User | ResourceKind::Group => {
                let identity = physical(current)?;
                if account.identity_in_use(identity) {
                    return Err(rejected(name, format!("'{identity}' still has attached policies")));
                }
                let identities = if kind == ResourceKind::User {
                    &mut account.users
                } else {
                    &mut account.groups
                };
                identities.remove(identity).ok_or_else(missing)?;
            }
            ResourceKind::SourceCredential => {
                account.source_credentials.remove(id).ok_or_else(missing)?;
            }
            ResourceKind::Parameter => {
                account.parameters.remove(id).ok_or_else(missing)?;
            }
            ResourceKind::Project => {
                let project = physical(current)?;
                account.projects.remove(project).ok_or_else(missing)?;
                account.webhooks.remove(project);
            }
            ResourceKind::Webhook => {
                account.webhooks.remove(id).ok_or_else(missing)?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ResourceProvider for SimulatedProvider {
    async fn create(
        &self,
        name: &ResourceName,
        spec: &ResolvedSpec,
    ) -> Result<ResourceOutputs, ProviderError> {
        let mut account = self.account.lock().await;
        let created = self.create_in(&mut account, name, spec.spec()).await?;
        self.save(&account).await?;
        tracing::debug!(resource = %name, kind = %spec.kind(), id = %created.id, "created");
        Ok(created)
    }

    async fn update(
        &self,
        name: &ResourceName,
        current: &ResourceOutputs,
        spec: &ResolvedSpec,
    ) -> Result<ResourceOutputs, ProviderError> {
        let mut account = self.account.lock().await;
        let updated = self.update_in(&mut account, name, current, spec.spec()).await?;
        self.save(&account).await?;
        tracing::debug!(resource = %name, kind = %spec.kind(), id = %updated.id, "updated");
        Ok(updated)
    }

    async fn delete(
        &self,
        name: &ResourceName,
        kind: ResourceKind,
        current: &ResourceOutputs,
    ) -> Result<(), ProviderError> {
        let mut account = self.account.lock().await;
        self.delete_in(&mut account, name, kind, current)?;
        self.save(&account).await?;
        tracing::debug!(resource = %name, %kind, id = %current.id, "deleted");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn rejected(name: &ResourceName, reason: impl Into<String>) -> ProviderError {
    ProviderError::Rejected {
        resource: name.clone(),
        reason: reason.into(),
    }
}

fn check_policy(
    name: &ResourceName,
    document: &PolicyDocument,
    purpose: PolicyPurpose,
) -> Result<(), ProviderError> {
    document
        .validate(purpose)
        .map_err(|violation| rejected(name, format!("malformed policy document: {violation}")))
}

/// Source hosts the build service clones through an imported credential.
fn credential_server(source: SourceType) -> Option<ServerType> {
    match source {
        SourceType::Github => Some(ServerType::Github),
        SourceType::GithubEnterprise => Some(ServerType::GithubEnterprise),
        SourceType::Bitbucket => Some(ServerType::Bitbucket),
        SourceType::CodeCommit | SourceType::S3 | SourceType::NoSource => None,
    }
}

fn trusts_build_service(trust: &PolicyDocument) -> bool {
    trust.statement.iter().any(|s| {
        s.effect == Effect::Allow
            && s.principal == Some(Principal::Service(BUILD_SERVICE.to_string()))
            && s.covers("sts:AssumeRole")
    })
}

/// Resolves every identity of an attachment, failing before anything is
/// attached if the policy or any identity is missing.
fn attachment_record(
    account: &Account,
    name: &ResourceName,
    spec: &PolicyAttachmentSpec,
) -> Result<AttachmentRecord, ProviderError> {
    let policy_arn = value(name, &spec.policy_arn)?;
    let mut missing = Vec::new();
    if !account.policies.contains_key(policy_arn) {
        missing.push(format!("policy '{policy_arn}'"));
    }

    let mut resolve = |inputs: &[Input], exists: &dyn Fn(&str) -> bool, what: &str| {
        let mut names = Vec::with_capacity(inputs.len());
        for input in inputs {
            let identity = value(name, input)?;
            if !exists(identity) {
                missing.push(format!("{what} '{identity}'"));
            }
            names.push(identity.to_string());
        }
        Ok::<_, ProviderError>(names)
    };
    let users = resolve(&spec.users, &|n| account.users.contains_key(n), "user")?;
    let groups = resolve(&spec.groups, &|n| account.groups.contains_key(n), "group")?;
    let roles = resolve(&spec.roles, &|n| account.roles.contains_key(n), "role")?;

    if !missing.is_empty() {
        return Err(rejected(
            name,
            format!("nothing attached; missing {}", missing.join(", ")),
        ));
    }
    Ok(AttachmentRecord {
        policy_arn: policy_arn.to_string(),
        users,
        groups,
        roles,
    })
}

fn value<'a>(name: &ResourceName, input: &'a Input) -> Result<&'a str, ProviderError> {
    input
        .value()
        .ok_or_else(|| rejected(name, "input was not resolved before the call"))
}

fn physical(current: &ResourceOutputs) -> Result<&str, ProviderError> {
    current
        .name
        .as_ref()
        .map(PhysicalName::as_str)
        .ok_or_else(|| ProviderError::Transport(format!("'{}' has no recorded name", current.id)))
}

fn outputs(
    id: String,
    name: Option<String>,
    arn: Option<String>,
) -> Result<ResourceOutputs, ProviderError> {
    Ok(ResourceOutputs {
        id: PhysicalId::new(id).ok_or_else(|| ProviderError::Transport("empty physical id".into()))?,
        name: name.and_then(PhysicalName::new),
        arn: arn.and_then(Arn::new),
    })
}

fn to_json(value: &impl Serialize) -> Result<serde_json::Value, ProviderError> {
    serde_json::to_value(value).map_err(|e| ProviderError::Transport(e.to_string()))
}

/// The serialized token of a wire enum, e.g. `"GITHUB"`.
fn wire_name(value: impl Serialize) -> String {
    serde_json::to_value(value)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

fn short_suffix() -> String {
    Uuid::new_v4().simple().to_string()[..7].to_string()
}

/// `<logical>-<7 hex>`, the way the provider auto-names resources.
fn physical_name(name: &ResourceName) -> String {
    format!("{name}-{}", short_suffix())
}

fn unique_id(prefix: &str) -> String {
    format!("{prefix}{}", Uuid::new_v4().simple().to_string()[..17].to_uppercase())
}
