//! The CodeBuild pull-request pipeline.
//!
//! [`declare`] builds the full graph: an execution role the build service
//! assumes, its inline permissions, a narrower managed policy shared with a
//! user and a group, the source credential and stored access token, the build
//! project, and the pull-request webhook.
//!
//! Both secrets are required up front. [`declare`] reads them before declaring
//! anything, so a missing `github-token` or `pulumi-access-token` fails here,
//! not during an apply.
//!
//! | Key | Default |
//! |-----|---------|
//! | `github-token` | required, secret |
//! | `pulumi-access-token` | required, secret |
//! | `source-location` | `https://github.com/spara/aws-codebuild.git` |
//! | `head-branch` | `myBranch` |
//! | `base-branch` | `master` |
//! | `build-image` | `aws/codebuild/standard:3.0` |
//! | `compute-type` | `BUILD_GENERAL1_SMALL` |

use crate::policy::{PolicyDocument, Statement};
use crate::resource::{
    ArtifactsType, ComputeType, EnvironmentType, EnvironmentVariable, GroupSpec, ParameterSpec,
    ParameterType, PolicyAttachmentSpec, PolicySpec, ProjectEnvironment, ProjectSource,
    ProjectSpec, Reference, ResourceSpec, RolePolicyAttachmentSpec, RolePolicySpec, RoleSpec,
    ServerType, SourceCredentialSpec, SourceType, UserSpec, WebhookSpec,
};
use crate::webhook::{EventType, FilterGroup, WebhookFilter};
use crate::{Config, ResourceGraph, StackError};

pub const GITHUB_TOKEN: &str = "github-token";
pub const PULUMI_ACCESS_TOKEN: &str = "pulumi-access-token";

pub const DEFAULT_SOURCE_LOCATION: &str = "https://github.com/spara/aws-codebuild.git";
pub const DEFAULT_HEAD_BRANCH: &str = "myBranch";
pub const DEFAULT_BASE_BRANCH: &str = "master";
pub const DEFAULT_BUILD_IMAGE: &str = "aws/codebuild/standard:3.0";

/// Principal allowed to assume the execution role.
pub const BUILD_SERVICE_PRINCIPAL: &str = "codebuild.amazonaws.com";

/// Environment variable the build reads its access token from.
pub const ACCESS_TOKEN_VARIABLE: &str = "PULUMI_ACCESS_TOKEN";

/// Logical names of the declared resources.
pub mod names {
    pub const ROLE: &str = "builder-role";
    pub const ROLE_POLICY: &str = "builder-role-policy";
    pub const POLICY: &str = "mypolicy";
    pub const ROLE_POLICY_ATTACHMENT: &str = "rolepolicyattachment";
    pub const USER: &str = "myuser";
    pub const GROUP: &str = "mygroup";
    pub const POLICY_ATTACHMENT: &str = "mypolicyattachment";
    pub const SOURCE_CREDENTIAL: &str = "github-token";
    pub const PARAMETER: &str = "pulumi-access-token";
    pub const PROJECT: &str = "aws-codebuild";
    pub const WEBHOOK: &str = "aws-codebuild-webhook";
}

/// Pull-request events that start a build.
pub const TRIGGER_EVENTS: [EventType; 3] = [
    EventType::PullRequestCreated,
    EventType::PullRequestUpdated,
    EventType::PullRequestReopened,
];

/// Permissions the build role needs at build time.
pub fn role_permissions() -> PolicyDocument {
    // Resource scope stays "*" until the project ARN is known up front.
    PolicyDocument::new(vec![
        Statement::allow(["codebuild:CreateProject"], ["*"]),
        Statement::allow(["iam:PassRole"], ["*"]),
    ])
}

/// Permissions shared with the user and group that manage projects.
pub fn manager_permissions() -> PolicyDocument {
    PolicyDocument::new(vec![Statement::allow(["codebuild:CreateProject"], ["*"])])
}

/// Declares the pipeline graph from `config` and validates it.
#[tracing::instrument(skip_all, fields(stack = %config.stack()))]
pub fn declare(config: &Config) -> Result<ResourceGraph, StackError> {
    let github_token = config.require_secret(GITHUB_TOKEN)?;
    let access_token = config.require_secret(PULUMI_ACCESS_TOKEN)?;

    let compute_type = match config.get("compute-type") {
        None => ComputeType::Small,
        Some(value) => ComputeType::parse(value).ok_or_else(|| StackError::InvalidConfiguration {
            key: "compute-type".into(),
            message: format!("unknown compute type '{value}'"),
        })?,
    };
    let source_location = config.get_or("source-location", DEFAULT_SOURCE_LOCATION);
    let head_branch = config.get_or("head-branch", DEFAULT_HEAD_BRANCH);
    let base_branch = config.get_or("base-branch", DEFAULT_BASE_BRANCH);
    let image = config.get_or("build-image", DEFAULT_BUILD_IMAGE);

    let mut graph = ResourceGraph::new();

    let role = graph.add(
        names::ROLE,
        ResourceSpec::Role(RoleSpec::new(PolicyDocument::trust_for_service(
            BUILD_SERVICE_PRINCIPAL,
        ))),
    )?;

    graph.add(
        names::ROLE_POLICY,
        ResourceSpec::RolePolicy(RolePolicySpec {
            role: Reference::name(&role).into(),
            policy: role_permissions(),
        }),
    )?;

    let policy = graph.add(
        names::POLICY,
        ResourceSpec::Policy(PolicySpec::new(manager_permissions())),
    )?;

    graph.add(
        names::ROLE_POLICY_ATTACHMENT,
        ResourceSpec::RolePolicyAttachment(RolePolicyAttachmentSpec {
            role: Reference::name(&role).into(),
            policy_arn: Reference::arn(&policy).into(),
        }),
    )?;

    let user = graph.add(names::USER, ResourceSpec::User(UserSpec::default()))?;
    let group = graph.add(names::GROUP, ResourceSpec::Group(GroupSpec::default()))?;

    graph.add(
        names::POLICY_ATTACHMENT,
        ResourceSpec::PolicyAttachment(PolicyAttachmentSpec {
            users: vec![Reference::name(&user).into()],
            groups: vec![Reference::name(&group).into()],
            roles: vec![Reference::name(&role).into()],
            policy_arn: Reference::arn(&policy).into(),
        }),
    )?;

    let credential = graph.add(
        names::SOURCE_CREDENTIAL,
        ResourceSpec::SourceCredential(SourceCredentialSpec::personal_access_token(
            ServerType::Github,
            github_token,
        )),
    )?;

    let parameter = graph.add(
        names::PARAMETER,
        ResourceSpec::Parameter(ParameterSpec::new(ParameterType::String, access_token)),
    )?;

    // The project's permissions come from the inline policy, which no input
    // references, and it clones through the stored credential.
    let role_policy = crate::ResourceName::new(names::ROLE_POLICY)
        .ok_or(StackError::EmptyResourceName)?;
    let project = graph.add_with_dependencies(
        names::PROJECT,
        ResourceSpec::Project(ProjectSpec {
            service_role: Reference::arn(&role).into(),
            source: ProjectSource {
                kind: SourceType::Github,
                location: source_location.to_string(),
                buildspec: None,
            },
            environment: ProjectEnvironment {
                kind: EnvironmentType::LinuxContainer,
                compute_type,
                image: image.to_string(),
                environment_variables: vec![EnvironmentVariable::from_parameter(
                    ACCESS_TOKEN_VARIABLE,
                    Reference::name(&parameter),
                )],
            },
            artifacts: ArtifactsType::NoArtifacts,
            description: None,
        }),
        vec![role_policy, credential],
    )?;

    graph.add(
        names::WEBHOOK,
        ResourceSpec::Webhook(WebhookSpec {
            project_name: Reference::name(&project).into(),
            filter_groups: vec![FilterGroup::new(vec![
                WebhookFilter::events(&TRIGGER_EVENTS),
                WebhookFilter::head_branch(head_branch),
                WebhookFilter::base_branch(base_branch),
            ])],
        }),
    )?;

    graph.validate()?;
    tracing::info!(resources = graph.len(), "declared pipeline graph");
    Ok(graph)
}
