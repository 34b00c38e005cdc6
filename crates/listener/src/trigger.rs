use serde::Serialize;

use stack::resource::{Input, ResourceSpec};
use stack::{RepositoryEvent, ResourceGraph, ResourceName};

use crate::ListenerError;

/// A webhook whose filters accept an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Trigger {
    pub webhook: ResourceName,
    /// The project the webhook starts: its logical name when the webhook
    /// references a declared project, otherwise the literal project name.
    pub project: String,
}

/// Every webhook in `graph` that would start a build for `event`, in
/// declaration order.
pub fn matching_triggers(
    graph: &ResourceGraph,
    event: &RepositoryEvent,
) -> Result<Vec<Trigger>, ListenerError> {
    let mut triggers = Vec::new();
    for resource in graph.resources() {
        let ResourceSpec::Webhook(webhook) = &resource.spec else {
            continue;
        };
        let filters = webhook.compile().map_err(|reason| ListenerError::InvalidFilters {
            webhook: resource.name.clone(),
            reason,
        })?;
        if !filters.triggers(event) {
            continue;
        }

        let project = match &webhook.project_name {
            Input::Value(name) => name.clone(),
            Input::Output(reference) => reference.resource.to_string(),
        };
        tracing::debug!(webhook = %resource.name, project = %project, event = %event.event, "webhook triggered");
        triggers.push(Trigger {
            webhook: resource.name.clone(),
            project,
        });
    }
    Ok(triggers)
}
