//! Diffing the declared graph against recorded state.
//!
//! A [`Plan`] lists one [`PlannedStep`] per declared resource in apply order,
//! followed by deletions of recorded resources that are no longer declared
//! (dependents before their dependencies).
//!
//! Inputs are compared in their serialized form. Secrets serialize as the
//! redaction marker on both sides, so a rotated secret never shows up as a
//! change.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::Serialize;

use stack::{ApplyRunId, ResourceGraph, ResourceKind, ResourceName, ResourceState, StackError};

/// What the reconciler will do to one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Update,
    /// Create a new instance, then delete the recorded one.
    Replace,
    Same,
    Delete,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Same => "same",
            Self::Delete => "delete",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedStep {
    pub name: ResourceName,
    #[serde(rename = "type")]
    pub kind: ResourceKind,
    pub operation: Operation,
    /// Top-level inputs that differ from the recorded ones.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub changed: Vec<String>,
    /// Dependencies being replaced in the same run.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub replaced_dependencies: Vec<ResourceName>,
}

impl PlannedStep {
    fn new(name: ResourceName, kind: ResourceKind, operation: Operation) -> Self {
        Self {
            name,
            kind,
            operation,
            changed: Vec::new(),
            replaced_dependencies: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub run_id: ApplyRunId,
    pub steps: Vec<PlannedStep>,
}

impl Plan {
    pub fn count(&self, operation: Operation) -> usize {
        self.steps.iter().filter(|s| s.operation == operation).count()
    }

    /// Returns `true` if applying the plan would touch the provider.
    pub fn has_changes(&self) -> bool {
        self.steps.iter().any(|s| s.operation != Operation::Same)
    }

    pub fn step(&self, name: &str) -> Option<&PlannedStep> {
        self.steps.iter().find(|s| s.name.as_str() == name)
    }
}

/// Inputs whose change cannot be applied in place.
fn forces_replacement(kind: ResourceKind, input: &str) -> bool {
    match kind {
        ResourceKind::Role => input == "path",
        ResourceKind::Parameter => input == "type",
        ResourceKind::SourceCredential => matches!(input, "serverType" | "authType"),
        ResourceKind::Webhook => input == "projectName",
        ResourceKind::RolePolicy | ResourceKind::RolePolicyAttachment => input == "role",
        ResourceKind::PolicyAttachment => input == "policyArn",
        _ => false,
    }
}

/// Returns `true` if `value` holds a reference to any of `names`.
fn references_any(value: &serde_json::Value, names: &[ResourceName]) -> bool {
    match value {
        serde_json::Value::Object(map) => match map.get("$ref").and_then(|r| r.as_str()) {
            Some(target) => names.iter().any(|n| n.as_str() == target),
            None => map.values().any(|v| references_any(v, names)),
        },
        serde_json::Value::Array(items) => items.iter().any(|v| references_any(v, names)),
        _ => false,
    }
}

/// Inputs that cannot change in place and point at a replaced dependency. The
/// declared form is unchanged but the resolved value will be new.
fn repointed_inputs(
    kind: ResourceKind,
    declared: &serde_json::Value,
    replaced: &[ResourceName],
) -> Vec<String> {
    let Some(inputs) = declared.as_object() else {
        return Vec::new();
    };
    inputs
        .iter()
        .filter(|(key, value)| forces_replacement(kind, key) && references_any(value, replaced))
        .map(|(key, _)| key.clone())
        .collect()
}

fn changed_inputs(recorded: &serde_json::Value, declared: &serde_json::Value) -> Vec<String> {
    match (recorded.as_object(), declared.as_object()) {
        (Some(old), Some(new)) => old
            .keys()
            .chain(new.keys())
            .filter(|key| old.get(*key) != new.get(*key))
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect(),
        _ if recorded != declared => vec!["inputs".to_string()],
        _ => Vec::new(),
    }
}

/// Computes the plan that takes `records` to the declared `graph`.
pub fn diff(
    run_id: ApplyRunId,
    graph: &ResourceGraph,
    records: &[ResourceState],
) -> Result<Plan, StackError> {
    graph.validate()?;

    let recorded: HashMap<&ResourceName, &ResourceState> =
        records.iter().map(|r| (&r.name, r)).collect();
    let mut replaced: HashSet<ResourceName> = HashSet::new();
    let mut steps = Vec::with_capacity(graph.len());

    for resource in graph.topological_order()? {
        let Some(record) = recorded.get(&resource.name) else {
            steps.push(PlannedStep::new(resource.name.clone(), resource.kind, Operation::Create));
            continue;
        };

        let mut step = PlannedStep::new(resource.name.clone(), resource.kind, Operation::Same);
        if record.kind != resource.kind {
            step.operation = Operation::Replace;
            step.changed = vec!["type".to_string()];
        } else {
            let declared = resource.spec.to_json();
            step.changed = changed_inputs(&record.inputs, &declared);
            step.replaced_dependencies = resource
                .dependencies()
                .into_iter()
                .filter(|d| replaced.contains(d))
                .collect();
            for input in repointed_inputs(resource.kind, &declared, &step.replaced_dependencies) {
                if !step.changed.contains(&input) {
                    step.changed.push(input);
                }
            }

            if step.changed.iter().any(|input| forces_replacement(resource.kind, input)) {
                step.operation = Operation::Replace;
            } else if !step.changed.is_empty() || !step.replaced_dependencies.is_empty() {
                step.operation = Operation::Update;
            }
        }

        if step.operation == Operation::Replace {
            replaced.insert(resource.name.clone());
        }
        steps.push(step);
    }

    let orphans: Vec<&ResourceState> = records
        .iter()
        .filter(|r| !graph.contains(&r.name))
        .collect();
    for orphan in deletion_order(orphans) {
        steps.push(PlannedStep::new(orphan.name.clone(), orphan.kind, Operation::Delete));
    }

    Ok(Plan { run_id, steps })
}

/// Orders recorded resources so that every resource is deleted before the
/// resources it depended on. Later records go first among independent ones.
pub fn deletion_order(mut remaining: Vec<&ResourceState>) -> Vec<&ResourceState> {
    fn is_needed(candidate: &ResourceState, others: &[&ResourceState]) -> bool {
        others
            .iter()
            .any(|other| other.name != candidate.name && other.dependencies.contains(&candidate.name))
    }

    let mut order = Vec::with_capacity(remaining.len());
    while !remaining.is_empty() {
        // A recorded cycle cannot be ordered; fall back to reverse record order.
        let next = remaining
            .iter()
            .rposition(|r| !is_needed(r, &remaining))
            .unwrap_or(remaining.len() - 1);
        order.push(remaining.remove(next));
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use stack::policy::{PolicyDocument, Statement};
    use stack::resource::{
        ParameterSpec, ParameterType, PolicyAttachmentSpec, PolicySpec, Reference, ResourceSpec,
        RolePolicySpec, RoleSpec,
    };
    use stack::{PhysicalId, ResourceOutputs, Timestamp};

    fn role_spec(service: &str) -> ResourceSpec {
        ResourceSpec::Role(RoleSpec::new(PolicyDocument::trust_for_service(service)))
    }

    fn graph() -> ResourceGraph {
        let mut graph = ResourceGraph::new();
        let role = graph.add("builder-role", role_spec("codebuild.amazonaws.com")).unwrap();
        graph
            .add(
                "builder-role-policy",
                ResourceSpec::RolePolicy(RolePolicySpec {
                    role: Reference::name(&role).into(),
                    policy: PolicyDocument::new(vec![Statement::allow(["iam:PassRole"], ["*"])]),
                }),
            )
            .unwrap();
        graph
            .add(
                "pulumi-access-token",
                ResourceSpec::Parameter(ParameterSpec::new(ParameterType::String, "token".into())),
            )
            .unwrap();
        graph
    }

    fn record_of(graph: &ResourceGraph, name: &str) -> ResourceState {
        let resource = graph.get(&ResourceName::new(name).unwrap()).unwrap();
        let now = Timestamp::now();
        ResourceState {
            name: resource.name.clone(),
            kind: resource.kind,
            outputs: ResourceOutputs {
                id: PhysicalId::new(format!("{name}-id")).unwrap(),
                name: None,
                arn: None,
            },
            inputs: resource.spec.to_json(),
            dependencies: resource.dependencies(),
            created_at: now,
            updated_at: now,
        }
    }

    fn applied(graph: &ResourceGraph) -> Vec<ResourceState> {
        graph
            .resources()
            .iter()
            .map(|r| record_of(graph, r.name.as_str()))
            .collect()
    }

    fn operations(plan: &Plan) -> Vec<(&str, Operation)> {
        plan.steps.iter().map(|s| (s.name.as_str(), s.operation)).collect()
    }

    #[test]
    fn empty_state_creates_everything_in_order() {
        let plan = diff(ApplyRunId::new_random(), &graph(), &[]).unwrap();
        assert_eq!(
            operations(&plan),
            vec![
                ("builder-role", Operation::Create),
                ("builder-role-policy", Operation::Create),
                ("pulumi-access-token", Operation::Create),
            ]
        );
        assert!(plan.has_changes());
    }

    #[test]
    fn applied_state_is_unchanged() {
        let graph = graph();
        let plan = diff(ApplyRunId::new_random(), &graph, &applied(&graph)).unwrap();
        assert!(!plan.has_changes());
        assert_eq!(plan.count(Operation::Same), 3);
    }

    #[test]
    fn rotated_secret_is_not_a_change() {
        let graph = graph();
        let records = applied(&graph);

        let mut rotated = ResourceGraph::new();
        for resource in graph.resources() {
            let spec = match &resource.spec {
                ResourceSpec::Parameter(_) => {
                    ResourceSpec::Parameter(ParameterSpec::new(ParameterType::String, "rotated".into()))
                }
                other => other.clone(),
            };
            rotated.add(resource.name.as_str(), spec).unwrap();
        }

        let plan = diff(ApplyRunId::new_random(), &rotated, &records).unwrap();
        assert!(!plan.has_changes());
    }

    #[test]
    fn changed_input_is_an_update() {
        let old = graph();
        let records = applied(&old);

        let mut new = ResourceGraph::new();
        for resource in old.resources() {
            let spec = match &resource.spec {
                ResourceSpec::Role(role) => {
                    let mut role = role.clone();
                    role.description = Some("build execution role".into());
                    ResourceSpec::Role(role)
                }
                other => other.clone(),
            };
            new.add(resource.name.as_str(), spec).unwrap();
        }

        let plan = diff(ApplyRunId::new_random(), &new, &records).unwrap();
        let step = plan.step("builder-role").unwrap();
        assert_eq!(step.operation, Operation::Update);
        assert_eq!(step.changed, vec!["description".to_string()]);
        assert_eq!(plan.step("builder-role-policy").unwrap().operation, Operation::Same);
    }

    #[test]
    fn replacement_updates_dependents_that_can_follow_in_place() {
        let mut old = graph();
        let role = ResourceName::new("builder-role").unwrap();
        old.add(
            "mypolicyattachment",
            ResourceSpec::PolicyAttachment(PolicyAttachmentSpec {
                users: Vec::new(),
                groups: Vec::new(),
                roles: vec![Reference::name(&role).into()],
                policy_arn: "arn:aws:iam::123456789012:policy/mypolicy".into(),
            }),
        )
        .unwrap();
        let mut records = applied(&old);
        records[0].kind = ResourceKind::User;

        let plan = diff(ApplyRunId::new_random(), &old, &records).unwrap();
        assert_eq!(plan.step("builder-role").unwrap().operation, Operation::Replace);
        let dependent = plan.step("mypolicyattachment").unwrap();
        assert_eq!(dependent.operation, Operation::Update);
        assert!(dependent.changed.is_empty());
        assert_eq!(dependent.replaced_dependencies[0].as_str(), "builder-role");
    }

    #[test]
    fn role_path_change_replaces_the_role_and_its_inline_policy() {
        let old = graph();
        let records = applied(&old);

        let mut new = ResourceGraph::new();
        for resource in old.resources() {
            let spec = match &resource.spec {
                ResourceSpec::Role(role) => ResourceSpec::Role(role.clone().with_path("/ci/")),
                other => other.clone(),
            };
            new.add(resource.name.as_str(), spec).unwrap();
        }

        let plan = diff(ApplyRunId::new_random(), &new, &records).unwrap();
        let role = plan.step("builder-role").unwrap();
        assert_eq!(role.operation, Operation::Replace);
        assert_eq!(role.changed, vec!["path".to_string()]);

        let inline = plan.step("builder-role-policy").unwrap();
        assert_eq!(inline.operation, Operation::Replace);
        assert_eq!(inline.changed, vec!["role".to_string()]);
        assert_eq!(inline.replaced_dependencies[0].as_str(), "builder-role");
        assert_eq!(plan.step("pulumi-access-token").unwrap().operation, Operation::Same);
    }

    #[test]
    fn parameter_type_change_forces_replacement() {
        let old = graph();
        let records = applied(&old);

        let mut new = ResourceGraph::new();
        for resource in old.resources() {
            let spec = match &resource.spec {
                ResourceSpec::Parameter(_) => ResourceSpec::Parameter(ParameterSpec::new(
                    ParameterType::SecureString,
                    "token".into(),
                )),
                other => other.clone(),
            };
            new.add(resource.name.as_str(), spec).unwrap();
        }

        let plan = diff(ApplyRunId::new_random(), &new, &records).unwrap();
        assert_eq!(plan.step("pulumi-access-token").unwrap().operation, Operation::Replace);
    }

    #[test]
    fn orphans_are_deleted_dependents_first() {
        let old = graph();
        let records = applied(&old);

        let mut new = ResourceGraph::new();
        new.add(
            "mypolicy",
            ResourceSpec::Policy(PolicySpec::new(PolicyDocument::new(vec![Statement::allow(
                ["codebuild:CreateProject"],
                ["*"],
            )]))),
        )
        .unwrap();

        let plan = diff(ApplyRunId::new_random(), &new, &records).unwrap();
        assert_eq!(
            operations(&plan),
            vec![
                ("mypolicy", Operation::Create),
                ("pulumi-access-token", Operation::Delete),
                ("builder-role-policy", Operation::Delete),
                ("builder-role", Operation::Delete),
            ]
        );
    }

    #[test]
    fn invalid_graph_is_rejected_before_diffing() {
        let mut graph = ResourceGraph::new();
        graph
            .add("mypolicy", ResourceSpec::Policy(PolicySpec::new(PolicyDocument::new(vec![]))))
            .unwrap();
        assert!(diff(ApplyRunId::new_random(), &graph, &[]).is_err());
    }

    #[rstest]
    #[case(ResourceKind::Parameter, "type", true)]
    #[case(ResourceKind::Parameter, "value", false)]
    #[case(ResourceKind::SourceCredential, "authType", true)]
    #[case(ResourceKind::Webhook, "projectName", true)]
    #[case(ResourceKind::Webhook, "filterGroups", false)]
    #[case(ResourceKind::RolePolicy, "role", true)]
    #[case(ResourceKind::PolicyAttachment, "policyArn", true)]
    #[case(ResourceKind::PolicyAttachment, "users", false)]
    #[case(ResourceKind::Project, "environment", false)]
    #[case(ResourceKind::Role, "path", true)]
    #[case(ResourceKind::Role, "description", false)]
    fn replacement_inputs(#[case] kind: ResourceKind, #[case] input: &str, #[case] replaces: bool) {
        assert_eq!(forces_replacement(kind, input), replaces);
    }
}
