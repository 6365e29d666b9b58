//! Operation kinds an operator can configure on a template.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// The tool family an operation template drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Kubectl,
    AzureCli,
    Git,
    Docker,
    CustomScript,
    ApiCall,
}

impl OperationKind {
    pub const ALL: [OperationKind; 6] = [
        OperationKind::Kubectl,
        OperationKind::AzureCli,
        OperationKind::Git,
        OperationKind::Docker,
        OperationKind::CustomScript,
        OperationKind::ApiCall,
    ];

    /// Value stored in `operation_templates.operation_type`.
    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Kubectl => "kubectl",
            OperationKind::AzureCli => "azure_cli",
            OperationKind::Git => "git",
            OperationKind::Docker => "docker",
            OperationKind::CustomScript => "custom_script",
            OperationKind::ApiCall => "api_call",
        }
    }

    /// Human-readable label.
    pub fn label(self) -> &'static str {
        match self {
            OperationKind::Kubectl => "Kubernetes CLI",
            OperationKind::AzureCli => "Azure CLI",
            OperationKind::Git => "Git Commands",
            OperationKind::Docker => "Docker Commands",
            OperationKind::CustomScript => "Custom Script",
            OperationKind::ApiCall => "API Call",
        }
    }
}

impl FromStr for OperationKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| CoreError::Validation(format!("Unknown operation type '{s}'")))
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
