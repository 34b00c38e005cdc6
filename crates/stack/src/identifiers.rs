//! Newtype domain identifiers.
//!
//! Every named thing in the resource graph is represented as a distinct newtype
//! wrapping a primitive. This prevents accidentally interchanging, for example,
//! a [`ResourceName`] (the logical name used in the graph) with a
//! [`PhysicalName`] (the name the provider assigned) even though both are
//! strings under the hood.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Macro for String-wrapped newtypes.
// Generates: struct, new() returning Option<Self>, as_str(), Display.
// ---------------------------------------------------------------------------
macro_rules! string_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier, returning `None` if the value is empty.
            pub fn new(value: impl Into<String>) -> Option<Self> {
                let v = value.into();
                if v.is_empty() { None } else { Some(Self(v)) }
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// UUID-backed identifiers (internally generated)
// ---------------------------------------------------------------------------

/// Identifies a single reconciliation run (one `preview`, `up` or `destroy`).
///
/// Generated fresh for every invocation and attached to the engine's spans so
/// all provider calls made by one run can be correlated in the logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApplyRunId(Uuid);

impl ApplyRunId {
    /// Generates a new random run identifier.
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an [`ApplyRunId`] from an existing UUID.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Returns the underlying [`Uuid`].
    pub fn as_uuid(self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for ApplyRunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// String-backed identifiers
// ---------------------------------------------------------------------------

string_id! {
    /// Logical name of a resource within a graph (e.g. `"builder-role"`).
    ///
    /// Unique per graph. The state backend keys its records by this name.
    ResourceName
}

string_id! {
    /// Name the provider assigned to a resource when it was created.
    ///
    /// Usually the logical name plus a random suffix, so that a replacement can
    /// be created before the old resource is deleted.
    PhysicalName
}

string_id! {
    /// Provider-assigned identifier of a live resource.
    PhysicalId
}

string_id! {
    /// Amazon Resource Name of a live resource
    /// (e.g. `"arn:aws:iam::123456789012:role/builder-role-3f2a9c1"`).
    Arn
}

string_id! {
    /// Name of a stack (an independently configured and stored instance of a graph).
    StackName
}
