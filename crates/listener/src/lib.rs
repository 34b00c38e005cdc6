//! Repository event decoding and webhook trigger evaluation.
//!
//! - [`decode`] turns a GitHub webhook delivery (the `X-GitHub-Event` header
//!   and the JSON body) into a [`stack::RepositoryEvent`].
//! - [`matching_triggers`] evaluates every webhook declared in a
//!   [`stack::ResourceGraph`] against an event, exactly as the build service
//!   would, and reports which projects would start a build.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** Payload formats live here. Filter semantics live in the
//! [`stack`] crate.

mod payload;
mod trigger;

use thiserror::Error;

use stack::ResourceName;

pub use payload::{decode, PING_EVENT, PULL_REQUEST_EVENT, PUSH_EVENT};
pub use trigger::{matching_triggers, Trigger};

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("Malformed webhook payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("Unsupported GitHub event '{0}'")]
    UnsupportedEvent(String),

    #[error("Webhook '{webhook}' has invalid filters: {reason}")]
    InvalidFilters {
        webhook: ResourceName,
        reason: String,
    },
}
