//! Provider infrastructure for the CodeBuild stack.
//!
//! [`SimulatedProvider`] implements [`stack::ResourceProvider`] against an
//! in-process account that behaves like the identity, build and parameter
//! services: it generates physical names, ids and ARNs, refuses malformed
//! requests, checks a project's service role for the permissions it needs,
//! and applies policy attachments all-or-nothing. The account can be persisted
//! to a JSON file so that repeated runs see the resources earlier runs made.
//!
//! [`HttpSourceProbe`] optionally checks that a project's source location is
//! reachable before the project is created.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** The `engine` crate sees only [`stack::ResourceProvider`].

pub mod account;
mod probe;
mod simulated;

pub use account::Account;
pub use probe::{HttpSourceProbe, NoProbe, SourceProbe};
pub use simulated::{
    SimulatedProvider, BUILD_SERVICE, DEFAULT_ACCOUNT_ID, DEFAULT_REGION, KNOWN_IMAGES,
    PROJECT_ACTIONS,
};
