//! Parameter store resources.

use serde::Serialize;

use super::invalid;
use crate::{ResourceName, Secret, StackError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ParameterType {
    String,
    SecureString,
    StringList,
}

/// A stored configuration value that builds read by name.
///
/// The value is write-only from the graph's perspective: it is sent to the
/// provider once and consumers only ever see the parameter's name.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterSpec {
    #[serde(rename = "type")]
    pub kind: ParameterType,
    pub value: Secret,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ParameterSpec {
    pub fn new(kind: ParameterType, value: Secret) -> Self {
        Self {
            kind,
            value,
            description: None,
        }
    }

    pub(super) fn validate(&self, name: &ResourceName) -> Result<(), StackError> {
        if self.value.is_empty() {
            return Err(invalid(name, "parameter value is empty"));
        }
        Ok(())
    }
}
