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

//! The contract every cloud driver implements.
//!
//! Adapters speak in provider terms and classify their own failures with
//! [`AdapterErrorKind`]; the managers in `domain::cluster` turn those into
//! caller-facing [`PmksError`]s with operation and target context attached.

use crate::domain::capability::CapabilityDescriptor;
use crate::domain::identity::{Iid, ResourceKind};
use crate::domain::model::{ClusterInfo, NodeGroupInfo};
use crate::shared::error::PmksError;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterErrorKind {
    NotFound,
    /// The requested version is not a supported upgrade from the current one.
    InvalidUpgradePath,
    /// The resource is in a state that does not allow the call.
    Conflict,
    RateLimited,
    /// The provider refused the payload.
    Invalid,
    Unavailable,
    Other,
}

#[derive(Debug, Clone, Error)]
#[error("{kind:?}: {message}")]
pub struct AdapterError {
    pub kind: AdapterErrorKind,
    pub message: String,
}

pub type AdapterResult<T> = std::result::Result<T, AdapterError>;

impl AdapterError {
    pub fn new(kind: AdapterErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(AdapterErrorKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(AdapterErrorKind::Conflict, message)
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(AdapterErrorKind::Invalid, message)
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == AdapterErrorKind::NotFound
    }

    /// Attach operation context and map onto the caller-facing error kinds.
    pub fn into_pmks(self, op: &'static str, kind: ResourceKind, target: &Iid) -> PmksError {
        match self.kind {
            AdapterErrorKind::NotFound => PmksError::not_found(op, kind, target.clone()),
            AdapterErrorKind::InvalidUpgradePath => {
                PmksError::invalid_transition(op, target.clone(), self.message)
            }
            _ => PmksError::provider_rejected(
                op,
                target.clone(),
                format!("{:?}: {}", self.kind, self.message),
            ),
        }
    }
}

/// `min <= desired <= max`. Unsigned sizes rule out negative bounds.
pub fn scaling_bounds_ok(desired: u32, min: u32, max: u32) -> bool {
    min <= desired && desired <= max
}

/// Operations a managed-Kubernetes provider must support.
///
/// Identifiers passed in by the managers are already resolved, so both
/// `name` and `system_id` are populated. Mutating calls return as soon as the
/// provider accepted the request; the returned record usually still shows a
/// transitional status.
#[async_trait::async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn capabilities(&self) -> &CapabilityDescriptor;

    /// Not idempotent: a retry after an ambiguous failure may create a
    /// second cluster with the same name.
    async fn create_cluster(&self, spec: ClusterInfo) -> AdapterResult<ClusterInfo>;

    async fn list_cluster(&self) -> AdapterResult<Vec<ClusterInfo>>;

    async fn get_cluster(&self, cluster: &Iid) -> AdapterResult<ClusterInfo>;

    async fn delete_cluster(&self, cluster: &Iid) -> AdapterResult<bool>;

    async fn upgrade_cluster(&self, cluster: &Iid, target_version: &str)
        -> AdapterResult<ClusterInfo>;

    async fn add_node_group(&self, cluster: &Iid, spec: NodeGroupInfo)
        -> AdapterResult<NodeGroupInfo>;

    async fn remove_node_group(&self, cluster: &Iid, node_group: &Iid) -> AdapterResult<bool>;

    async fn list_node_group(&self, cluster: &Iid) -> AdapterResult<Vec<NodeGroupInfo>>;

    async fn get_node_group(&self, cluster: &Iid, node_group: &Iid)
        -> AdapterResult<NodeGroupInfo>;

    async fn set_node_group_auto_scaling(
        &self,
        cluster: &Iid,
        node_group: &Iid,
        enable: bool,
    ) -> AdapterResult<bool>;

    /// Implementations reject bounds failing [`scaling_bounds_ok`] without
    /// contacting the provider.
    async fn change_node_group_scaling(
        &self,
        cluster: &Iid,
        node_group: &Iid,
        desired: u32,
        min: u32,
        max: u32,
    ) -> AdapterResult<NodeGroupInfo>;
}
