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

//! Per-provider capability tables.
//!
//! Callers write provider-agnostic specs, so optional fields a provider
//! cannot honor are stripped before the request is forwarded instead of
//! failing the whole operation.

use crate::domain::model::{ClusterInfo, NodeGroupInfo};
use serde::Serialize;
use std::fmt;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Field {
    NodeImage,
    RootDiskType,
    RootDiskSize,
    KeyPair,
    /// Autoscaling requested at node group creation time.
    NodeAutoScaling,
    NodeGroupKeyValues,
    Subnets,
    SecurityGroups,
    NetworkKeyValues,
    /// Node groups supplied inline with the cluster creation request.
    InitialNodeGroups,
}

impl Field {
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::NodeImage => "node_group.image",
            Field::RootDiskType => "node_group.root_disk_type",
            Field::RootDiskSize => "node_group.root_disk_size",
            Field::KeyPair => "node_group.key_pair",
            Field::NodeAutoScaling => "node_group.on_auto_scaling",
            Field::NodeGroupKeyValues => "node_group.key_value_list",
            Field::Subnets => "network.subnets",
            Field::SecurityGroups => "network.security_groups",
            Field::NetworkKeyValues => "network.key_value_list",
            Field::InitialNodeGroups => "cluster.node_groups",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FieldSupport {
    /// Forwarded and applied.
    Honored,
    /// Accepted by the provider but has no effect.
    Ignored,
    /// The provider fails the request when the field is present.
    Rejected,
}

/// A field removed from a request before it reached the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DroppedField {
    pub field: Field,
    pub support: FieldSupport,
    pub owner: String,
}

/// Static description of what a provider does with optional input fields.
///
/// Fields missing from `fields` are honored.
#[derive(Debug, Clone, Copy)]
pub struct CapabilityDescriptor {
    pub provider: &'static str,
    pub fields: &'static [(Field, FieldSupport)],
    /// Largest minor-version jump a single upgrade may take.
    pub max_minor_skew: u64,
}

impl CapabilityDescriptor {
    pub fn support(&self, field: Field) -> FieldSupport {
        self.fields
            .iter()
            .find(|(f, _)| *f == field)
            .map(|(_, s)| *s)
            .unwrap_or(FieldSupport::Honored)
    }

    pub fn honors(&self, field: Field) -> bool {
        self.support(field) == FieldSupport::Honored
    }

    /// Strip unhonored network fields from a cluster spec and every inline
    /// node group. Whether inline node groups are forwarded at all is the
    /// lifecycle manager's call.
    pub fn sanitize_cluster(&self, cluster: &mut ClusterInfo) -> Vec<DroppedField> {
        let owner = cluster.iid.name.clone();
        let mut dropped = Vec::new();

        if !cluster.network.subnet_iids.is_empty() {
            self.drop_if_unhonored(Field::Subnets, &owner, &mut dropped, || {
                cluster.network.subnet_iids.clear()
            });
        }
        if !cluster.network.security_group_iids.is_empty() {
            self.drop_if_unhonored(Field::SecurityGroups, &owner, &mut dropped, || {
                cluster.network.security_group_iids.clear()
            });
        }
        if !cluster.network.key_value_list.is_empty() {
            self.drop_if_unhonored(Field::NetworkKeyValues, &owner, &mut dropped, || {
                cluster.network.key_value_list.clear()
            });
        }

        for node_group in cluster.node_groups.iter_mut() {
            dropped.extend(self.sanitize_node_group(node_group));
        }
        dropped
    }

    pub fn sanitize_node_group(&self, node_group: &mut NodeGroupInfo) -> Vec<DroppedField> {
        let owner = node_group.iid.name.clone();
        let mut dropped = Vec::new();

        if node_group.image_iid.is_some() {
            self.drop_if_unhonored(Field::NodeImage, &owner, &mut dropped, || {
                node_group.image_iid = None
            });
        }
        if node_group.root_disk_type.is_some() {
            self.drop_if_unhonored(Field::RootDiskType, &owner, &mut dropped, || {
                node_group.root_disk_type = None
            });
        }
        if node_group.root_disk_size.is_some() {
            self.drop_if_unhonored(Field::RootDiskSize, &owner, &mut dropped, || {
                node_group.root_disk_size = None
            });
        }
        if node_group.key_pair_iid.is_some() {
            self.drop_if_unhonored(Field::KeyPair, &owner, &mut dropped, || {
                node_group.key_pair_iid = None
            });
        }
        if node_group.on_auto_scaling {
            self.drop_if_unhonored(Field::NodeAutoScaling, &owner, &mut dropped, || {
                node_group.on_auto_scaling = false
            });
        }
        if !node_group.key_value_list.is_empty() {
            self.drop_if_unhonored(Field::NodeGroupKeyValues, &owner, &mut dropped, || {
                node_group.key_value_list.clear()
            });
        }
        dropped
    }

    fn drop_if_unhonored(
        &self,
        field: Field,
        owner: &str,
        dropped: &mut Vec<DroppedField>,
        clear: impl FnOnce(),
    ) {
        let support = self.support(field);
        match support {
            FieldSupport::Honored => return,
            FieldSupport::Ignored => {
                debug!(provider = self.provider, field = %field, owner, "Dropping ignored field")
            }
            FieldSupport::Rejected => {
                warn!(provider = self.provider, field = %field, owner, "Dropping field the provider rejects")
            }
        }
        clear();
        dropped.push(DroppedField {
            field,
            support,
            owner: owner.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::identity::Iid;

    const STRICT: CapabilityDescriptor = CapabilityDescriptor {
        provider: "strict",
        fields: &[
            (Field::NodeImage, FieldSupport::Rejected),
            (Field::RootDiskType, FieldSupport::Ignored),
            (Field::SecurityGroups, FieldSupport::Rejected),
        ],
        max_minor_skew: 1,
    };

    fn node_group() -> NodeGroupInfo {
        let mut ng = NodeGroupInfo::new("pool-a", "ecs.c6.xlarge", 1, 0, 3);
        ng.image_iid = Some(Iid::from_system_id("ubuntu_20_04"));
        ng.root_disk_type = Some("cloud_essd".to_string());
        ng.root_disk_size = Some(70);
        ng.key_pair_iid = Some(Iid::from_name("kp1"));
        ng
    }

    #[test]
    fn test_unlisted_fields_are_honored() {
        assert_eq!(STRICT.support(Field::KeyPair), FieldSupport::Honored);
        assert!(STRICT.honors(Field::InitialNodeGroups));
        assert!(!STRICT.honors(Field::NodeImage));
    }

    #[test]
    fn test_sanitize_node_group() {
        let mut ng = node_group();
        let dropped = STRICT.sanitize_node_group(&mut ng);

        assert_eq!(ng.image_iid, None);
        assert_eq!(ng.root_disk_type, None);
        assert_eq!(ng.root_disk_size, Some(70));
        assert_eq!(ng.key_pair_iid, Some(Iid::from_name("kp1")));

        let fields: Vec<Field> = dropped.iter().map(|d| d.field).collect();
        assert_eq!(fields, vec![Field::NodeImage, Field::RootDiskType]);
        assert_eq!(dropped[0].support, FieldSupport::Rejected);
        assert_eq!(dropped[0].owner, "pool-a");
    }

    #[test]
    fn test_sanitize_cluster_covers_inline_node_groups() {
        let mut cluster = ClusterInfo::new("cluster-x", "1.30.2").with_node_group(node_group());
        cluster.network.security_group_iids = vec![Iid::from_system_id("sg-46eef229")];
        cluster.network.subnet_iids = vec![Iid::from_system_id("subnet-rl79gxhv")];

        let dropped = STRICT.sanitize_cluster(&mut cluster);

        assert!(cluster.network.security_group_iids.is_empty());
        assert_eq!(cluster.network.subnet_iids.len(), 1);
        assert_eq!(cluster.node_groups[0].image_iid, None);
        assert_eq!(dropped.len(), 3);
    }

    #[test]
    fn test_absent_fields_are_not_reported() {
        let mut ng = NodeGroupInfo::new("pool-b", "s3.large", 1, 1, 1);
        assert!(STRICT.sanitize_node_group(&mut ng).is_empty());
    }
}
