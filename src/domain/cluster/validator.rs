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
use crate::domain::model::{ClusterInfo, ClusterStatus, NodeGroupInfo};
use crate::domain::version::{check_upgrade_path, KubeVersion};
use crate::infrastructure::provider::scaling_bounds_ok;
use crate::shared::error::PmksError;
use std::collections::HashSet;

/// Checks that run before any provider call is made.
#[derive(Debug, Clone, Copy)]
pub struct SpecValidator {
    max_minor_skew: u64,
}

impl SpecValidator {
    pub fn new(max_minor_skew: u64) -> Self {
        Self { max_minor_skew }
    }

    pub fn validate_scaling(
        &self,
        op: &'static str,
        target: &Iid,
        desired: u32,
        min: u32,
        max: u32,
    ) -> Result<(), PmksError> {
        if scaling_bounds_ok(desired, min, max) {
            Ok(())
        } else {
            Err(PmksError::InvalidScalingBounds {
                op,
                target: target.clone(),
                min,
                desired,
                max,
            })
        }
    }

    pub fn validate_node_group(
        &self,
        op: &'static str,
        node_group: &NodeGroupInfo,
    ) -> Result<(), PmksError> {
        if node_group.iid.name.is_empty() {
            return Err(PmksError::EmptyIdentifier {
                op,
                kind: ResourceKind::NodeGroup,
            });
        }
        if node_group.vm_spec_name.trim().is_empty() {
            return Err(PmksError::invalid_spec(
                op,
                node_group.iid.clone(),
                "vm_spec_name must be set",
            ));
        }
        self.validate_scaling(
            op,
            &node_group.iid,
            node_group.desired_node_size,
            node_group.min_node_size,
            node_group.max_node_size,
        )
    }

    pub fn validate_cluster(&self, op: &'static str, cluster: &ClusterInfo) -> Result<(), PmksError> {
        if cluster.iid.name.is_empty() {
            return Err(PmksError::EmptyIdentifier {
                op,
                kind: ResourceKind::Cluster,
            });
        }
        cluster
            .version
            .parse::<KubeVersion>()
            .map_err(|reason| PmksError::invalid_spec(op, cluster.iid.clone(), reason))?;

        let mut seen = HashSet::new();
        for node_group in &cluster.node_groups {
            self.validate_node_group(op, node_group)?;
            if !seen.insert(node_group.iid.name.as_str()) {
                return Err(PmksError::already_exists(
                    op,
                    ResourceKind::NodeGroup,
                    node_group.iid.name.clone(),
                ));
            }
        }
        Ok(())
    }

    /// Upgrades start from `Active` only and must follow the version rules.
    pub fn validate_upgrade(
        &self,
        op: &'static str,
        cluster: &ClusterInfo,
        target_version: &str,
    ) -> Result<(), PmksError> {
        if cluster.status != ClusterStatus::Active {
            return Err(PmksError::invalid_transition(
                op,
                cluster.iid.clone(),
                format!("cluster is {}; upgrades require Active", cluster.status),
            ));
        }
        check_upgrade_path(&cluster.version, target_version, self.max_minor_skew)
            .map_err(|reason| PmksError::invalid_transition(op, cluster.iid.clone(), reason))
    }

    /// Node group mutations wait for the owning cluster to settle.
    pub fn ensure_accepts_node_group_changes(
        &self,
        op: &'static str,
        cluster: &ClusterInfo,
    ) -> Result<(), PmksError> {
        match cluster.status {
            ClusterStatus::Active => Ok(()),
            status if status.is_busy() => Err(PmksError::ClusterBusy {
                op,
                cluster: cluster.iid.clone(),
                status,
            }),
            status => Err(PmksError::invalid_transition(
                op,
                cluster.iid.clone(),
                format!("cluster is {}", status),
            )),
        }
    }
}
