//! Reconciler for the CodeBuild stack.
//!
//! [`Engine`] drives a [`stack::ResourceGraph`] through the injected
//! [`stack::ResourceProvider`] and [`stack::StateBackend`]:
//!
//! - [`Engine::preview`] diffs the graph against state and returns a [`Plan`].
//! - [`Engine::up`] applies that plan one resource at a time in dependency
//!   order. The first failure stops the run.
//! - [`Engine::destroy`] deletes everything recorded in state, dependents first.
//!
//! ## Architectural Layer
//!
//! **Orchestration layer.** The engine sequences provider and state calls. All
//! graph rules live in the [`stack`] crate; all I/O lives behind the ports.
//!
//! No step is retried. Resources applied before a failure stay recorded in
//! state, so the next `up` resumes from there.

pub mod errors;
pub mod plan;

use std::collections::HashMap;
use std::sync::Arc;

use stack::{
    ApplyRunId, ProviderError, Resource, ResourceGraph, ResourceName, ResourceOutputs,
    ResourceProvider, ResourceState, StackError, StateBackend, Timestamp,
};

pub use errors::{ApplyFailure, EngineError};
pub use plan::{Operation, Plan, PlannedStep};

/// Outcome of a successful `up` or `destroy`.
#[derive(Debug, Clone)]
pub struct ApplyReport {
    pub run_id: ApplyRunId,
    /// Steps that touched the provider, in the order they ran.
    pub completed: Vec<PlannedStep>,
    pub unchanged: usize,
}

pub struct Engine {
    provider: Arc<dyn ResourceProvider>,
    state: Arc<dyn StateBackend>,
}

impl Engine {
    pub fn new(provider: Arc<dyn ResourceProvider>, state: Arc<dyn StateBackend>) -> Self {
        Self { provider, state }
    }

    /// Computes what `up` would do without calling the provider.
    pub async fn preview(&self, graph: &ResourceGraph) -> Result<Plan, StackError> {
        self.plan(ApplyRunId::new_random(), graph).await
    }

    #[tracing::instrument(name = "preview", skip_all, fields(run_id = %run_id))]
    async fn plan(&self, run_id: ApplyRunId, graph: &ResourceGraph) -> Result<Plan, StackError> {
        let records = self.state.list().await?;
        let plan = plan::diff(run_id, graph, &records)?;
        tracing::info!(
            create = plan.count(Operation::Create),
            update = plan.count(Operation::Update),
            replace = plan.count(Operation::Replace),
            delete = plan.count(Operation::Delete),
            same = plan.count(Operation::Same),
            "planned"
        );
        Ok(plan)
    }

    /// Plans and applies `graph`.
    pub async fn up(&self, graph: &ResourceGraph) -> Result<ApplyReport, EngineError> {
        let run_id = ApplyRunId::new_random();
        let plan = self.plan(run_id, graph).await?;
        self.apply(graph, plan).await
    }

    /// Applies a plan computed by [`Self::preview`] for the same graph.
    #[tracing::instrument(name = "up", skip_all, fields(run_id = %plan.run_id))]
    pub async fn apply(&self, graph: &ResourceGraph, plan: Plan) -> Result<ApplyReport, EngineError> {
        let mut records: HashMap<ResourceName, ResourceState> = self
            .state
            .list()
            .await
            .map_err(StackError::from)?
            .into_iter()
            .map(|r| (r.name.clone(), r))
            .collect();
        let mut outputs: HashMap<ResourceName, ResourceOutputs> = records
            .iter()
            .map(|(name, record)| (name.clone(), record.outputs.clone()))
            .collect();

        let mut completed = Vec::new();
        let mut unchanged = 0;
        // Replaced instances outlive the run's other steps so dependents can
        // move to the new instance first.
        let mut retired: Vec<ResourceState> = Vec::new();
        for (index, step) in plan.steps.iter().enumerate() {
            if step.operation == Operation::Same {
                unchanged += 1;
                continue;
            }

            let result = match step.operation {
                Operation::Delete => match records.remove(&step.name) {
                    Some(record) => self.delete(record).await,
                    None => Ok(()),
                },
                _ => match graph.get(&step.name) {
                    Some(resource) => self
                        .converge(resource, step.operation, records.get(&step.name), &outputs)
                        .await
                        .map(|old| retired.extend(old)),
                    None => Err(StackError::InvalidResource {
                        resource: step.name.clone(),
                        reason: "planned but not declared in the applied graph".to_string(),
                    }),
                },
            };

            match result {
                Ok(()) => {
                    if let Some(record) = self.state.get(&step.name).await.map_err(StackError::from)? {
                        outputs.insert(step.name.clone(), record.outputs.clone());
                        records.insert(step.name.clone(), record);
                    } else {
                        outputs.remove(&step.name);
                    }
                    completed.push(step.clone());
                }
                Err(cause) => {
                    tracing::warn!(resource = %step.name, operation = %step.operation, error = %cause, "step failed");
                    for old in &retired {
                        tracing::warn!(resource = %old.name, id = %old.outputs.id, "replaced instance left in place");
                    }
                    let skipped = plan.steps[index + 1..]
                        .iter()
                        .filter(|s| s.operation != Operation::Same)
                        .map(|s| s.name.clone())
                        .collect();
                    return Err(ApplyFailure {
                        run_id: plan.run_id,
                        resource: step.name.clone(),
                        operation: step.operation,
                        cause,
                        completed,
                        skipped,
                    }
                    .into());
                }
            }
        }

        let order: Vec<ResourceState> = plan::deletion_order(retired.iter().collect())
            .into_iter()
            .cloned()
            .collect();
        for (index, old) in order.iter().enumerate() {
            if let Err(cause) = self.retire(old).await {
                tracing::warn!(resource = %old.name, error = %cause, "removing replaced instance failed");
                return Err(ApplyFailure {
                    run_id: plan.run_id,
                    resource: old.name.clone(),
                    operation: Operation::Replace,
                    cause,
                    completed,
                    skipped: order[index + 1..].iter().map(|r| r.name.clone()).collect(),
                }
                .into());
            }
        }
        tracing::info!(applied = completed.len(), unchanged, "up complete");
        Ok(ApplyReport {
            run_id: plan.run_id,
            completed,
            unchanged,
        })
    }

    /// Creates, updates or replaces one declared resource and records it.
    ///
    /// On replace, returns the superseded record; its live instance still
    /// exists and is removed by the caller.
    async fn converge(
        &self,
        resource: &Resource,
        operation: Operation,
        record: Option<&ResourceState>,
        outputs: &HashMap<ResourceName, ResourceOutputs>,
    ) -> Result<Option<ResourceState>, StackError> {
        for dependency in resource.dependencies() {
            if !outputs.contains_key(&dependency) {
                return Err(StackError::DependencyNotReady {
                    resource: resource.name.clone(),
                    dependency,
                });
            }
        }
        let resolved = resource
            .spec
            .resolve(|r| outputs.get(&r.resource)?.get(r.attribute).map(str::to_string))
            .map_err(|r| StackError::DependencyNotReady {
                resource: resource.name.clone(),
                dependency: r.resource,
            })?;

        let now = Timestamp::now();
        let (new_outputs, created_at) = match (operation, record) {
            (Operation::Update, Some(record)) => {
                let updated = self
                    .provider
                    .update(&resource.name, &record.outputs, &resolved)
                    .await?;
                (updated, record.created_at)
            }
            _ => (self.provider.create(&resource.name, &resolved).await?, now),
        };

        self.state
            .put(ResourceState {
                name: resource.name.clone(),
                kind: resource.kind,
                outputs: new_outputs,
                inputs: resource.spec.to_json(),
                dependencies: resource.dependencies(),
                created_at,
                updated_at: now,
            })
            .await?;
        tracing::info!(resource = %resource.name, kind = %resource.kind, %operation, "applied");

        match (operation, record) {
            (Operation::Replace, Some(old)) => Ok(Some(old.clone())),
            _ => Ok(None),
        }
    }

    /// Deletes the live instance a replacement superseded. State already
    /// records the new instance.
    async fn retire(&self, old: &ResourceState) -> Result<(), StackError> {
        match self.provider.delete(&old.name, old.kind, &old.outputs).await {
            Ok(()) => {
                tracing::info!(resource = %old.name, kind = %old.kind, "deleted replaced instance");
                Ok(())
            }
            Err(ProviderError::NotFound { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, record: ResourceState) -> Result<(), StackError> {
        match self
            .provider
            .delete(&record.name, record.kind, &record.outputs)
            .await
        {
            Ok(()) => {}
            Err(ProviderError::NotFound { .. }) => {
                tracing::warn!(resource = %record.name, "already gone; dropping from state");
            }
            Err(e) => return Err(e.into()),
        }
        self.state.remove(&record.name).await?;
        tracing::info!(resource = %record.name, kind = %record.kind, "deleted");
        Ok(())
    }

    /// Deletes every recorded resource, dependents before their dependencies.
    #[tracing::instrument(name = "destroy", skip_all, fields(run_id = tracing::field::Empty))]
    pub async fn destroy(&self) -> Result<ApplyReport, EngineError> {
        let run_id = ApplyRunId::new_random();
        tracing::Span::current().record("run_id", tracing::field::display(run_id));

        let records = self.state.list().await.map_err(StackError::from)?;
        let steps: Vec<PlannedStep> = plan::deletion_order(records.iter().collect())
            .into_iter()
            .map(|r| PlannedStep {
                name: r.name.clone(),
                kind: r.kind,
                operation: Operation::Delete,
                changed: Vec::new(),
                replaced_dependencies: Vec::new(),
            })
            .collect();

        let mut by_name: HashMap<ResourceName, ResourceState> =
            records.into_iter().map(|r| (r.name.clone(), r)).collect();
        let mut completed = Vec::with_capacity(steps.len());
        for (index, step) in steps.iter().enumerate() {
            let Some(record) = by_name.remove(&step.name) else {
                continue;
            };
            if let Err(cause) = self.delete(record).await {
                tracing::warn!(resource = %step.name, error = %cause, "delete failed");
                return Err(ApplyFailure {
                    run_id,
                    resource: step.name.clone(),
                    operation: Operation::Delete,
                    cause,
                    completed,
                    skipped: steps[index + 1..].iter().map(|s| s.name.clone()).collect(),
                }
                .into());
            }
            completed.push(step.clone());
        }

        tracing::info!(deleted = completed.len(), "destroy complete");
        Ok(ApplyReport {
            run_id,
            completed,
            unchanged: 0,
        })
    }
}
