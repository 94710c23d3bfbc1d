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

//! Provider-agnostic cluster and node group records.

use crate::domain::identity::{Identified, Iid};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// References to pre-existing network resources. Nothing here is provisioned.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub vpc_iid: Iid,
    #[serde(default)]
    pub subnet_iids: Vec<Iid>,
    #[serde(default)]
    pub security_group_iids: Vec<Iid>,
    #[serde(default)]
    pub key_value_list: Vec<KeyValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessInfo {
    pub endpoint: String,
    pub kubeconfig: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClusterStatus {
    #[default]
    Creating,
    Active,
    Updating,
    Deleting,
    Deleted,
    Error,
}

impl ClusterStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterStatus::Creating => "Creating",
            ClusterStatus::Active => "Active",
            ClusterStatus::Updating => "Updating",
            ClusterStatus::Deleting => "Deleting",
            ClusterStatus::Deleted => "Deleted",
            ClusterStatus::Error => "Error",
        }
    }

    /// A provider-driven transition is in flight.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            ClusterStatus::Creating | ClusterStatus::Updating | ClusterStatus::Deleting
        )
    }
}

impl fmt::Display for ClusterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeGroupStatus {
    #[default]
    Creating,
    Active,
    Updating,
    Deleting,
    Error,
}

impl NodeGroupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeGroupStatus::Creating => "Creating",
            NodeGroupStatus::Active => "Active",
            NodeGroupStatus::Updating => "Updating",
            NodeGroupStatus::Deleting => "Deleting",
            NodeGroupStatus::Error => "Error",
        }
    }

    pub fn is_settled(&self) -> bool {
        matches!(self, NodeGroupStatus::Active | NodeGroupStatus::Error)
    }
}

impl fmt::Display for NodeGroupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeGroupInfo {
    pub iid: Iid,
    /// Machine type, e.g. `ecs.c6.xlarge`.
    pub vm_spec_name: String,
    #[serde(default)]
    pub image_iid: Option<Iid>,
    #[serde(default)]
    pub root_disk_type: Option<String>,
    /// Root disk size in GB.
    #[serde(default)]
    pub root_disk_size: Option<u32>,
    #[serde(default)]
    pub key_pair_iid: Option<Iid>,
    #[serde(default)]
    pub on_auto_scaling: bool,
    pub desired_node_size: u32,
    pub min_node_size: u32,
    pub max_node_size: u32,
    #[serde(default)]
    pub status: NodeGroupStatus,
    /// Nodes the provider reports as members.
    #[serde(default)]
    pub nodes: Vec<Iid>,
    #[serde(default)]
    pub created_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub key_value_list: Vec<KeyValue>,
}

impl NodeGroupInfo {
    pub fn new(
        name: impl Into<String>,
        vm_spec_name: impl Into<String>,
        desired: u32,
        min: u32,
        max: u32,
    ) -> Self {
        Self {
            iid: Iid::from_name(name),
            vm_spec_name: vm_spec_name.into(),
            desired_node_size: desired,
            min_node_size: min,
            max_node_size: max,
            ..Default::default()
        }
    }
}

impl Identified for NodeGroupInfo {
    fn iid(&self) -> &Iid {
        &self.iid
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterInfo {
    pub iid: Iid,
    /// Kubernetes version string as the provider spells it, e.g. `1.22.10-aliyun.1`.
    pub version: String,
    #[serde(default)]
    pub network: NetworkInfo,
    #[serde(default)]
    pub node_groups: Vec<NodeGroupInfo>,
    #[serde(default)]
    pub access_info: Option<AccessInfo>,
    #[serde(default)]
    pub status: ClusterStatus,
    #[serde(default)]
    pub created_time: Option<DateTime<Utc>>,
}

impl ClusterInfo {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            iid: Iid::from_name(name),
            version: version.into(),
            ..Default::default()
        }
    }

    pub fn with_vpc(mut self, vpc: Iid) -> Self {
        self.network.vpc_iid = vpc;
        self
    }

    pub fn with_node_group(mut self, node_group: NodeGroupInfo) -> Self {
        self.node_groups.push(node_group);
        self
    }
}

impl Identified for ClusterInfo {
    fn iid(&self) -> &Iid {
        &self.iid
    }
}
