//! The declared resource graph.
//!
//! Resources are nodes; every [`Reference`] inside a spec and every explicit
//! `depends_on` entry is an edge from the dependency to the dependent. The
//! graph only describes; ordering is computed on demand by
//! [`ResourceGraph::topological_order`] (Kahn's algorithm, ties broken by
//! declaration order so plans are stable between runs).
//!
//! [`ResourceGraph::validate`] runs every check that does not need a provider:
//! per-resource invariants, reference integrity, reference target kinds,
//! cycles, and the least-privilege rule that no policy attached to a user or
//! group may grant `iam:PassRole`.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::Serialize;

use crate::resource::{has_attribute, Reference, ResourceSpec};
use crate::{ResourceKind, ResourceName, StackError};

/// Actions that must never be granted to human identities by this graph.
pub const SENSITIVE_ACTIONS: &[&str] = &["iam:PassRole"];

/// A named node in the graph.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub name: ResourceName,
    #[serde(rename = "type")]
    pub kind: ResourceKind,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<ResourceName>,
    #[serde(rename = "inputs")]
    pub spec: ResourceSpec,
}

impl Resource {
    /// Distinct dependencies: referenced resources first, then explicit ones.
    pub fn dependencies(&self) -> Vec<ResourceName> {
        let mut seen = HashSet::new();
        self.spec
            .references()
            .map(|r| &r.resource)
            .chain(&self.depends_on)
            .filter(|name| seen.insert(*name))
            .cloned()
            .collect()
    }
}

/// Declared resources in declaration order.
#[derive(Debug, Clone, Default)]
pub struct ResourceGraph {
    resources: Vec<Resource>,
    index: HashMap<ResourceName, usize>,
}

impl ResourceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a resource and returns its name for use in references.
    pub fn add(&mut self, name: &str, spec: ResourceSpec) -> Result<ResourceName, StackError> {
        self.add_with_dependencies(name, spec, Vec::new())
    }

    /// Declares a resource with extra ordering edges that no input expresses.
    pub fn add_with_dependencies(
        &mut self,
        name: &str,
        spec: ResourceSpec,
        depends_on: Vec<ResourceName>,
    ) -> Result<ResourceName, StackError> {
        let name = ResourceName::new(name).ok_or(StackError::EmptyResourceName)?;
        if self.index.contains_key(&name) {
            return Err(StackError::DuplicateResource { name });
        }

        tracing::debug!(resource = %name, kind = %spec.kind(), "declared resource");
        self.index.insert(name.clone(), self.resources.len());
        self.resources.push(Resource {
            name: name.clone(),
            kind: spec.kind(),
            depends_on,
            spec,
        });
        Ok(name)
    }

    pub fn get(&self, name: &ResourceName) -> Option<&Resource> {
        self.index.get(name).map(|&i| &self.resources[i])
    }

    pub fn contains(&self, name: &ResourceName) -> bool {
        self.index.contains_key(name)
    }

    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Runs every provider-independent check.
    pub fn validate(&self) -> Result<(), StackError> {
        for resource in &self.resources {
            resource.spec.validate(&resource.name)?;
            self.check_references(resource)?;
        }
        self.topological_order()?;
        self.check_least_privilege()
    }

    fn check_references(&self, resource: &Resource) -> Result<(), StackError> {
        for dependency in &resource.depends_on {
            if !self.contains(dependency) {
                return Err(StackError::DanglingReference {
                    from: resource.name.clone(),
                    to: dependency.clone(),
                });
            }
        }

        for reference in resource.spec.references() {
            let target = self.get(&reference.resource).ok_or_else(|| StackError::DanglingReference {
                from: resource.name.clone(),
                to: reference.resource.clone(),
            })?;
            if !has_attribute(target.kind, reference.attribute) {
                return Err(StackError::UnsupportedAttribute {
                    from: resource.name.clone(),
                    to: target.name.clone(),
                    kind: target.kind,
                    attribute: reference.attribute,
                });
            }
        }

        for (reference, expected) in resource.spec.typed_references() {
            let Some(target) = self.get(&reference.resource) else {
                continue;
            };
            if target.kind != expected {
                return Err(StackError::InvalidResource {
                    resource: resource.name.clone(),
                    reason: format!(
                        "'{reference}' must refer to a {expected}, not a {}",
                        target.kind
                    ),
                });
            }
            if expected == ResourceKind::Parameter && reference.attribute != crate::Attribute::Name {
                return Err(StackError::InvalidResource {
                    resource: resource.name.clone(),
                    reason: format!("'{reference}' must read the parameter's name"),
                });
            }
        }
        Ok(())
    }

    fn check_least_privilege(&self) -> Result<(), StackError> {
        for resource in &self.resources {
            let ResourceSpec::PolicyAttachment(attachment) = &resource.spec else {
                continue;
            };
            let Some(policy) = attachment
                .policy_arn
                .reference()
                .and_then(|r| self.get(&r.resource))
            else {
                continue;
            };
            let ResourceSpec::Policy(policy_spec) = &policy.spec else {
                continue;
            };

            let Some(action) = SENSITIVE_ACTIONS
                .iter()
                .find(|action| policy_spec.policy.allows(action))
            else {
                continue;
            };
            if let Some(identity) = attachment.users.iter().chain(&attachment.groups).next() {
                return Err(StackError::PrivilegeEscalation {
                    policy: policy.name.clone(),
                    action: (*action).to_string(),
                    identity: identity
                        .reference()
                        .map(|r| r.resource.clone())
                        .unwrap_or_else(|| resource.name.clone()),
                });
            }
        }
        Ok(())
    }

    /// Resources ordered so that every resource follows all of its dependencies.
    ///
    /// Fails with [`StackError::DependencyCycle`] naming the resources that
    /// could not be ordered, or [`StackError::DanglingReference`] when an edge
    /// points outside the graph.
    pub fn topological_order(&self) -> Result<Vec<&Resource>, StackError> {
        let count = self.resources.len();
        let mut in_degree = vec![0usize; count];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];

        for (i, resource) in self.resources.iter().enumerate() {
            for dependency in resource.dependencies() {
                let &d = self.index.get(&dependency).ok_or_else(|| StackError::DanglingReference {
                    from: resource.name.clone(),
                    to: dependency.clone(),
                })?;
                in_degree[i] += 1;
                dependents[d].push(i);
            }
        }

        let mut ready: BTreeSet<usize> = (0..count).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(count);
        while let Some(i) = ready.pop_first() {
            order.push(&self.resources[i]);
            for &dependent in &dependents[i] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }

        if order.len() != count {
            let members = (0..count)
                .filter(|&i| in_degree[i] > 0)
                .map(|i| self.resources[i].name.clone())
                .collect();
            return Err(StackError::DependencyCycle { members });
        }
        Ok(order)
    }

    /// Every resource that transitively depends on `name`, in declaration order.
    pub fn dependents_of(&self, name: &ResourceName) -> Vec<ResourceName> {
        let mut affected: HashSet<&ResourceName> = HashSet::from([name]);
        let mut changed = true;
        while changed {
            changed = false;
            for resource in &self.resources {
                if affected.contains(&resource.name) {
                    continue;
                }
                if resource.dependencies().iter().any(|d| affected.contains(d)) {
                    affected.insert(&resource.name);
                    changed = true;
                }
            }
        }
        self.resources
            .iter()
            .filter(|r| &r.name != name && affected.contains(&r.name))
            .map(|r| r.name.clone())
            .collect()
    }

    /// The serialized form of the graph: names, kinds, edges and redacted inputs.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({ "resources": self.resources })
    }

    /// Returns the reference's target resource, if declared.
    pub fn target(&self, reference: &Reference) -> Option<&Resource> {
        self.get(&reference.resource)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{PolicyDocument, Statement};
    use crate::resource::{GroupSpec, PolicyAttachmentSpec, PolicySpec, RoleSpec, UserSpec};

    fn role() -> ResourceSpec {
        ResourceSpec::Role(RoleSpec::new(PolicyDocument::trust_for_service(
            "codebuild.amazonaws.com",
        )))
    }

    fn policy(actions: &[&str]) -> ResourceSpec {
        ResourceSpec::Policy(PolicySpec::new(PolicyDocument::new(vec![Statement::allow(
            actions.iter().copied(),
            ["*"],
        )])))
    }

    fn attachment(users: Vec<&ResourceName>, roles: Vec<&ResourceName>, policy: &ResourceName) -> ResourceSpec {
        ResourceSpec::PolicyAttachment(PolicyAttachmentSpec {
            users: users.into_iter().map(|u| Reference::name(u).into()).collect(),
            groups: Vec::new(),
            roles: roles.into_iter().map(|r| Reference::name(r).into()).collect(),
            policy_arn: Reference::arn(policy).into(),
        })
    }

    fn names(resources: &[&Resource]) -> Vec<String> {
        resources.iter().map(|r| r.name.to_string()).collect()
    }

    #[test]
    fn order_respects_references_regardless_of_declaration_order() {
        let mut graph = ResourceGraph::new();
        let user = ResourceName::new("myuser").unwrap();
        let pol = ResourceName::new("mypolicy").unwrap();
        graph
            .add("mypolicyattachment", attachment(vec![&user], Vec::new(), &pol))
            .unwrap();
        graph.add("myuser", ResourceSpec::User(UserSpec::default())).unwrap();
        graph.add("mypolicy", policy(&["codebuild:CreateProject"])).unwrap();

        graph.validate().unwrap();
        let order = names(&graph.topological_order().unwrap());
        assert_eq!(order, vec!["myuser", "mypolicy", "mypolicyattachment"]);
    }

    #[test]
    fn independent_resources_keep_declaration_order() {
        let mut graph = ResourceGraph::new();
        graph.add("b", ResourceSpec::Group(GroupSpec::default())).unwrap();
        graph.add("a", ResourceSpec::User(UserSpec::default())).unwrap();
        assert_eq!(names(&graph.topological_order().unwrap()), vec!["b", "a"]);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut graph = ResourceGraph::new();
        graph.add("myuser", ResourceSpec::User(UserSpec::default())).unwrap();
        let err = graph.add("myuser", ResourceSpec::User(UserSpec::default())).unwrap_err();
        assert!(matches!(err, StackError::DuplicateResource { .. }), "got: {err:?}");
    }

    #[test]
    fn dangling_reference_is_rejected() {
        let mut graph = ResourceGraph::new();
        let ghost = ResourceName::new("ghost").unwrap();
        let role_name = graph.add("builder-role", role()).unwrap();
        graph
            .add("attach", attachment(Vec::new(), vec![&role_name], &ghost))
            .unwrap();
        let err = graph.validate().unwrap_err();
        assert!(
            matches!(err, StackError::DanglingReference { ref to, .. } if to.as_str() == "ghost"),
            "got: {err:?}"
        );
    }

    #[test]
    fn cycles_are_reported() {
        let mut graph = ResourceGraph::new();
        let a = ResourceName::new("a").unwrap();
        let b = ResourceName::new("b").unwrap();
        graph
            .add_with_dependencies("a", ResourceSpec::User(UserSpec::default()), vec![b.clone()])
            .unwrap();
        graph
            .add_with_dependencies("b", ResourceSpec::Group(GroupSpec::default()), vec![a.clone()])
            .unwrap();
        graph.add("c", ResourceSpec::User(UserSpec::default())).unwrap();
        let err = graph.topological_order().unwrap_err();
        match err {
            StackError::DependencyCycle { members } => assert_eq!(members, vec![a, b]),
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn attachment_needs_arn_capable_policy_target() {
        let mut graph = ResourceGraph::new();
        let role_name = graph.add("builder-role", role()).unwrap();
        let user = graph.add("myuser", ResourceSpec::User(UserSpec::default())).unwrap();
        // A user has an ARN, but the attachment expects a policy there.
        graph
            .add("attach", attachment(Vec::new(), vec![&role_name], &user))
            .unwrap();
        let err = graph.validate().unwrap_err();
        assert!(
            matches!(err, StackError::InvalidResource { ref reason, .. } if reason.contains("must refer to a")),
            "got: {err:?}"
        );
    }

    #[test]
    fn pass_role_attached_to_user_is_rejected() {
        let mut graph = ResourceGraph::new();
        let user = graph.add("myuser", ResourceSpec::User(UserSpec::default())).unwrap();
        let pol = graph
            .add("mypolicy", policy(&["codebuild:CreateProject", "iam:PassRole"]))
            .unwrap();
        graph.add("attach", attachment(vec![&user], Vec::new(), &pol)).unwrap();
        let err = graph.validate().unwrap_err();
        assert!(
            matches!(err, StackError::PrivilegeEscalation { ref action, ref identity, .. }
                if action == "iam:PassRole" && identity.as_str() == "myuser"),
            "got: {err:?}"
        );
    }

    #[test]
    fn pass_role_attached_to_role_only_is_allowed() {
        let mut graph = ResourceGraph::new();
        let role_name = graph.add("builder-role", role()).unwrap();
        let pol = graph.add("mypolicy", policy(&["iam:PassRole"])).unwrap();
        graph
            .add("attach", attachment(Vec::new(), vec![&role_name], &pol))
            .unwrap();
        graph.validate().unwrap();
    }

    #[test]
    fn dependents_are_transitive() {
        let mut graph = ResourceGraph::new();
        let role_name = graph.add("builder-role", role()).unwrap();
        let pol = graph.add("mypolicy", policy(&["codebuild:CreateProject"])).unwrap();
        let attach = graph
            .add("attach", attachment(Vec::new(), vec![&role_name], &pol))
            .unwrap();
        graph
            .add_with_dependencies("after", ResourceSpec::User(UserSpec::default()), vec![attach])
            .unwrap();
        let dependents: Vec<String> = graph.dependents_of(&role_name).iter().map(ToString::to_string).collect();
        assert_eq!(dependents, vec!["attach", "after"]);
    }

    #[test]
    fn serialized_graph_lists_kinds_and_edges() {
        let mut graph = ResourceGraph::new();
        let user = graph.add("myuser", ResourceSpec::User(UserSpec::default())).unwrap();
        graph
            .add_with_dependencies("mygroup", ResourceSpec::Group(GroupSpec::default()), vec![user])
            .unwrap();
        let json = graph.to_json();
        assert_eq!(json["resources"][0]["type"], "aws:iam/user:User");
        assert_eq!(json["resources"][1]["dependsOn"], serde_json::json!(["myuser"]));
    }
}
