// Copyright 2025 JiangLong.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::domain::identity::{Iid, ResourceKind};
use crate::domain::model::{ClusterInfo, ClusterStatus};
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PmksError>;

#[derive(Error, Debug)]
pub enum PmksError {
    #[error("{op}: {kind} '{target}' not found")]
    NotFound {
        op: &'static str,
        kind: ResourceKind,
        target: Iid,
    },

    #[error("{op}: {kind} name '{name}' matches {count} resources; address it by system id")]
    AmbiguousName {
        op: &'static str,
        kind: ResourceKind,
        name: String,
        count: usize,
    },

    #[error("{op}: {kind} identifier has neither a name nor a system id")]
    EmptyIdentifier { op: &'static str, kind: ResourceKind },

    #[error("{op}: {kind} '{name}' already exists")]
    AlreadyExists {
        op: &'static str,
        kind: ResourceKind,
        name: String,
    },

    #[error(
        "{op}: invalid scaling bounds for '{target}' (min={min}, desired={desired}, max={max}); \
         expected min <= desired <= max"
    )]
    InvalidScalingBounds {
        op: &'static str,
        target: Iid,
        min: u32,
        desired: u32,
        max: u32,
    },

    #[error("{op}: invalid spec for '{target}': {reason}")]
    InvalidSpec {
        op: &'static str,
        target: Iid,
        reason: String,
    },

    #[error("{op}: invalid transition for '{target}': {reason}")]
    InvalidTransition {
        op: &'static str,
        target: Iid,
        reason: String,
    },

    #[error("{op}: cluster '{cluster}' is {status}; retry once it is Active")]
    ClusterBusy {
        op: &'static str,
        cluster: Iid,
        status: ClusterStatus,
    },

    #[error(
        "{op}: '{target}' did not settle within {waited:?} (last status: {last_status}); \
         the operation may still complete at the provider"
    )]
    ProvisioningTimeout {
        op: &'static str,
        target: Iid,
        waited: Duration,
        last_status: String,
    },

    #[error("{op}: provider rejected request for '{target}': {message}")]
    ProviderRejected {
        op: &'static str,
        target: Iid,
        message: String,
    },

    #[error("status read for {what} did not answer within {waited:?}")]
    ProbeTimeout { what: String, waited: Duration },

    #[error("{}: cluster '{}' is Active but node groups failed: {}", .op, .cluster.iid, .failed.join(", "))]
    PartialFailure {
        op: &'static str,
        cluster: Box<ClusterInfo>,
        failed: Vec<String>,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
}

/// Coarse grouping that tells a caller what to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The request itself was wrong; resubmitting it unchanged fails again.
    InvalidRequest,
    /// The provider refused or could not be reached.
    ProviderUnavailable,
    /// The resource is mid-transition; a later `get` is authoritative.
    Converging,
}

impl PmksError {
    pub fn config_error(context: impl Into<String>) -> Self {
        Self::Config(context.into())
    }

    pub fn not_found(op: &'static str, kind: ResourceKind, target: Iid) -> Self {
        Self::NotFound { op, kind, target }
    }

    pub fn already_exists(op: &'static str, kind: ResourceKind, name: impl Into<String>) -> Self {
        Self::AlreadyExists {
            op,
            kind,
            name: name.into(),
        }
    }

    pub fn invalid_spec(op: &'static str, target: Iid, reason: impl Into<String>) -> Self {
        Self::InvalidSpec {
            op,
            target,
            reason: reason.into(),
        }
    }

    pub fn invalid_transition(op: &'static str, target: Iid, reason: impl Into<String>) -> Self {
        Self::InvalidTransition {
            op,
            target,
            reason: reason.into(),
        }
    }

    pub fn provider_rejected(op: &'static str, target: Iid, message: impl Into<String>) -> Self {
        Self::ProviderRejected {
            op,
            target,
            message: message.into(),
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            PmksError::ClusterBusy { .. }
            | PmksError::ProvisioningTimeout { .. }
            | PmksError::PartialFailure { .. } => ErrorClass::Converging,
            PmksError::ProviderRejected { .. }
            | PmksError::ProbeTimeout { .. }
            | PmksError::Io(_) => {
                ErrorClass::ProviderUnavailable
            }
            _ => ErrorClass::InvalidRequest,
        }
    }

    /// Safe for the caller to resubmit after a backoff.
    ///
    /// Timeouts qualify because the caller's next step is a `get`, not a
    /// blind re-create.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PmksError::ClusterBusy { .. } | PmksError::ProvisioningTimeout { .. }
        )
    }

    /// Raised before any provider call was made.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            PmksError::InvalidScalingBounds { .. }
                | PmksError::InvalidSpec { .. }
                | PmksError::AmbiguousName { .. }
                | PmksError::EmptyIdentifier { .. }
        )
    }

    pub fn operation(&self) -> Option<&'static str> {
        match self {
            PmksError::NotFound { op, .. }
            | PmksError::AmbiguousName { op, .. }
            | PmksError::EmptyIdentifier { op, .. }
            | PmksError::AlreadyExists { op, .. }
            | PmksError::InvalidScalingBounds { op, .. }
            | PmksError::InvalidSpec { op, .. }
            | PmksError::InvalidTransition { op, .. }
            | PmksError::ClusterBusy { op, .. }
            | PmksError::ProvisioningTimeout { op, .. }
            | PmksError::ProviderRejected { op, .. }
            | PmksError::PartialFailure { op, .. } => Some(*op),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        let busy = PmksError::ClusterBusy {
            op: "add_node_group",
            cluster: Iid::from_name("cluster-1"),
            status: ClusterStatus::Creating,
        };
        assert_eq!(busy.class(), ErrorClass::Converging);
        assert!(busy.is_retryable());

        let rejected =
            PmksError::provider_rejected("create_cluster", Iid::from_name("c"), "quota exceeded");
        assert_eq!(rejected.class(), ErrorClass::ProviderUnavailable);
        assert!(!rejected.is_retryable());

        let bounds = PmksError::InvalidScalingBounds {
            op: "change_node_group_scaling",
            target: Iid::from_name("pool-a"),
            min: 2,
            desired: 1,
            max: 3,
        };
        assert_eq!(bounds.class(), ErrorClass::InvalidRequest);
        assert!(bounds.is_validation());
    }

    #[test]
    fn test_error_message_carries_context() {
        let err = PmksError::provider_rejected(
            "upgrade_cluster",
            Iid::new("cluster-1", "c-123"),
            "Throttling.User",
        );
        let msg = err.to_string();
        assert!(msg.contains("upgrade_cluster"));
        assert!(msg.contains("cluster-1 (c-123)"));
        assert!(msg.contains("Throttling.User"));
        assert_eq!(err.operation(), Some("upgrade_cluster"));
    }

    #[test]
    fn test_partial_failure_message() {
        let err = PmksError::PartialFailure {
            op: "create_cluster",
            cluster: Box::new(ClusterInfo::new("cluster-x", "1.30.1")),
            failed: vec!["pool-a".to_string(), "pool-b".to_string()],
        };
        assert!(err.to_string().contains("pool-a, pool-b"));
    }
}
