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

//! Cluster API adapter.
//!
//! A cluster is a `cluster.x-k8s.io/v1beta1` `Cluster` using a ClusterClass
//! topology. Node groups are the entries of `spec.topology.workers.machinePools`;
//! their progress is read from the `MachinePool` objects the topology
//! controller derives from them. The system id of a cluster is its object
//! uid, the system id of a node group is `<cluster uid>:<pool name>`.

use crate::domain::capability::{CapabilityDescriptor, Field, FieldSupport};
use crate::domain::config::CapiConf;
use crate::domain::identity::Iid;
use crate::domain::model::{
    AccessInfo, ClusterInfo, ClusterStatus, KeyValue, NetworkInfo, NodeGroupInfo, NodeGroupStatus,
};
use crate::infrastructure::constants::*;
use crate::infrastructure::kubernetes::client::{CapiKind, PmksKubeClient, PmksKubeClientImpl};
use crate::infrastructure::provider::{
    scaling_bounds_ok, AdapterError, AdapterErrorKind, AdapterResult, ProviderAdapter,
};
use kube::api::DynamicObject;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Images and disks come from the machine pool class, so per-pool image
/// selection is refused and disk or key pair settings have no effect.
pub const CAPI_CAPABILITIES: CapabilityDescriptor = CapabilityDescriptor {
    provider: "cluster-api",
    fields: &[
        (Field::NodeImage, FieldSupport::Rejected),
        (Field::RootDiskType, FieldSupport::Ignored),
        (Field::RootDiskSize, FieldSupport::Ignored),
        (Field::KeyPair, FieldSupport::Ignored),
        (Field::SecurityGroups, FieldSupport::Ignored),
    ],
    max_minor_skew: 1,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct TopologyVariable {
    name: String,
    value: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct PoolMetadata {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    annotations: BTreeMap<String, String>,
}

impl PoolMetadata {
    fn is_empty(&self) -> bool {
        self.labels.is_empty() && self.annotations.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct PoolVariables {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    overrides: Vec<TopologyVariable>,
}

/// One `spec.topology.workers.machinePools` entry. Fields this crate does
/// not manage are carried through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct MachinePoolTopology {
    class: String,
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    replicas: Option<u32>,
    #[serde(default, skip_serializing_if = "PoolMetadata::is_empty")]
    metadata: PoolMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    variables: Option<PoolVariables>,
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

impl MachinePoolTopology {
    fn from_node_group(class: &str, node_group: &NodeGroupInfo) -> Self {
        let mut pool = Self {
            class: class.to_string(),
            name: node_group.iid.name.clone(),
            variables: Some(PoolVariables {
                overrides: vec![TopologyVariable {
                    name: VARIABLE_INSTANCE_TYPE.to_string(),
                    value: Value::String(node_group.vm_spec_name.clone()),
                }],
            }),
            ..Default::default()
        };
        pool.metadata.labels = node_group
            .key_value_list
            .iter()
            .map(|kv| (kv.key.clone(), kv.value.clone()))
            .collect();
        pool.set_scaling(
            node_group.desired_node_size,
            node_group.min_node_size,
            node_group.max_node_size,
            node_group.on_auto_scaling,
        );
        pool
    }

    fn instance_type(&self) -> Option<&str> {
        self.variables
            .as_ref()?
            .overrides
            .iter()
            .find(|v| v.name == VARIABLE_INSTANCE_TYPE)
            .and_then(|v| v.value.as_str())
    }

    fn autoscaling(&self) -> bool {
        self.metadata.annotations.contains_key(ANNOTATION_AUTOSCALER_MIN)
    }

    fn bound(&self, key: &str) -> Option<u32> {
        self.metadata.annotations.get(key).and_then(|v| v.parse().ok())
    }

    /// While the autoscaler owns the pool the replica count is left out of
    /// the topology so the two do not fight over it.
    fn set_scaling(&mut self, desired: u32, min: u32, max: u32, autoscaling: bool) {
        let annotations = &mut self.metadata.annotations;
        annotations.insert(ANNOTATION_MIN_SIZE.to_string(), min.to_string());
        annotations.insert(ANNOTATION_MAX_SIZE.to_string(), max.to_string());
        if autoscaling {
            annotations.insert(ANNOTATION_AUTOSCALER_MIN.to_string(), min.to_string());
            annotations.insert(ANNOTATION_AUTOSCALER_MAX.to_string(), max.to_string());
            self.replicas = None;
        } else {
            annotations.remove(ANNOTATION_AUTOSCALER_MIN);
            annotations.remove(ANNOTATION_AUTOSCALER_MAX);
            self.replicas = Some(desired);
        }
    }
}

fn name_of(obj: &DynamicObject) -> &str {
    obj.metadata.name.as_deref().unwrap_or_default()
}

fn uid_of(obj: &DynamicObject) -> &str {
    obj.metadata.uid.as_deref().unwrap_or_default()
}

fn node_group_system_id(cluster_uid: &str, pool: &str) -> String {
    format!("{}:{}", cluster_uid, pool)
}

fn topology_pools(cluster: &DynamicObject) -> AdapterResult<Vec<MachinePoolTopology>> {
    match cluster.data.pointer("/spec/topology/workers/machinePools") {
        Some(value) => serde_json::from_value(value.clone()).map_err(|e| {
            AdapterError::invalid(format!(
                "cluster {} has malformed machinePools: {}",
                name_of(cluster),
                e
            ))
        }),
        None => Ok(Vec::new()),
    }
}

fn topology_variables(cluster: &DynamicObject) -> Vec<TopologyVariable> {
    cluster
        .data
        .pointer("/spec/topology/variables")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default()
}

/// `Some(true)` / `Some(false)` for a condition reporting `True` / `False`.
fn condition(data: &Value, type_: &str) -> Option<bool> {
    data.pointer("/status/conditions")?
        .as_array()?
        .iter()
        .find(|c| c.get("type").and_then(Value::as_str) == Some(type_))
        .and_then(|c| c.get("status").and_then(Value::as_str))
        .map(|s| s == "True")
}

fn cluster_status(cluster: &DynamicObject) -> ClusterStatus {
    if cluster.metadata.deletion_timestamp.is_some() {
        return ClusterStatus::Deleting;
    }
    match cluster.data.pointer("/status/phase").and_then(Value::as_str) {
        Some("Failed") => ClusterStatus::Error,
        Some("Deleting") => ClusterStatus::Deleting,
        Some("Provisioned") => {
            let observed = cluster
                .data
                .pointer("/status/observedGeneration")
                .and_then(Value::as_i64);
            let reconciled = match (cluster.metadata.generation, observed) {
                (Some(generation), Some(observed)) => observed >= generation,
                _ => true,
            };
            let settled = reconciled
                && condition(&cluster.data, "Ready") != Some(false)
                && condition(&cluster.data, "TopologyReconciled") != Some(false);
            if settled {
                ClusterStatus::Active
            } else {
                ClusterStatus::Updating
            }
        }
        _ => ClusterStatus::Creating,
    }
}

fn node_group_status(desired: Option<u32>, observed: Option<&DynamicObject>) -> NodeGroupStatus {
    let Some(pool) = observed else {
        return NodeGroupStatus::Creating;
    };
    if pool.metadata.deletion_timestamp.is_some() {
        return NodeGroupStatus::Deleting;
    }

    let count = |path: &str| pool.data.pointer(path).and_then(Value::as_u64);
    match pool.data.pointer("/status/phase").and_then(Value::as_str) {
        Some("Failed") => NodeGroupStatus::Error,
        Some("Deleting") => NodeGroupStatus::Deleting,
        Some("Running") => {
            let spec = count("/spec/replicas");
            let ready = count("/status/readyReplicas").unwrap_or(0);
            let target_met = desired.map_or(true, |d| spec == Some(u64::from(d)));
            if target_met && spec.unwrap_or(0) == ready {
                NodeGroupStatus::Active
            } else {
                NodeGroupStatus::Updating
            }
        }
        Some("ScalingUp") | Some("ScalingDown") | Some("Scaling") => NodeGroupStatus::Updating,
        _ => NodeGroupStatus::Creating,
    }
}

fn node_refs(pool: &DynamicObject) -> Vec<Iid> {
    pool.data
        .pointer("/status/nodeRefs")
        .and_then(Value::as_array)
        .map(|refs| {
            refs.iter()
                .map(|r| {
                    Iid::new(
                        r.get("name").and_then(Value::as_str).unwrap_or_default(),
                        r.get("uid").and_then(Value::as_str).unwrap_or_default(),
                    )
                })
                .collect()
        })
        .unwrap_or_default()
}

fn pool_name_of(pool: &DynamicObject) -> Option<&str> {
    pool.metadata
        .labels
        .as_ref()?
        .get(LABEL_TOPOLOGY_POOL_NAME)
        .map(String::as_str)
}

fn node_group_info(
    cluster_uid: &str,
    topology: &MachinePoolTopology,
    observed: Option<&DynamicObject>,
) -> NodeGroupInfo {
    let observed_replicas = observed
        .and_then(|p| p.data.pointer("/spec/replicas"))
        .and_then(Value::as_u64)
        .and_then(|r| u32::try_from(r).ok());
    let min = topology.bound(ANNOTATION_MIN_SIZE).unwrap_or(0);
    let desired = topology
        .replicas
        .or(observed_replicas)
        .unwrap_or(min);

    let mut info = NodeGroupInfo::new(
        topology.name.clone(),
        topology.instance_type().unwrap_or(&topology.class),
        desired,
        min,
        topology.bound(ANNOTATION_MAX_SIZE).unwrap_or(desired),
    );
    info.iid.system_id = node_group_system_id(cluster_uid, &topology.name);
    info.on_auto_scaling = topology.autoscaling();
    info.status = node_group_status(topology.replicas, observed);
    info.key_value_list = topology
        .metadata
        .labels
        .iter()
        .map(|(k, v)| KeyValue::new(k.clone(), v.clone()))
        .collect();
    if let Some(pool) = observed {
        info.nodes = node_refs(pool);
        info.created_time = pool.metadata.creation_timestamp.as_ref().map(|t| t.0);
    }
    info
}

/// Topology entries joined with their observed pools. Pools whose entry is
/// already gone are still draining and show up as `Deleting`.
fn node_groups(cluster: &DynamicObject, observed: &[DynamicObject]) -> AdapterResult<Vec<NodeGroupInfo>> {
    let uid = uid_of(cluster);
    let topology = topology_pools(cluster)?;

    let mut groups: Vec<NodeGroupInfo> = topology
        .iter()
        .map(|entry| {
            let pool = observed
                .iter()
                .find(|p| pool_name_of(p) == Some(entry.name.as_str()));
            node_group_info(uid, entry, pool)
        })
        .collect();

    for pool in observed {
        let Some(name) = pool_name_of(pool) else {
            continue;
        };
        if topology.iter().any(|entry| entry.name == name) {
            continue;
        }
        let entry = MachinePoolTopology {
            name: name.to_string(),
            ..Default::default()
        };
        let mut info = node_group_info(uid, &entry, Some(pool));
        info.status = NodeGroupStatus::Deleting;
        groups.push(info);
    }
    Ok(groups)
}

fn network_info(cluster: &DynamicObject) -> NetworkInfo {
    let mut network = NetworkInfo::default();
    for variable in topology_variables(cluster) {
        match (variable.name.as_str(), &variable.value) {
            (VARIABLE_VPC_ID, Value::String(vpc)) => network.vpc_iid = Iid::from_system_id(vpc.as_str()),
            (VARIABLE_SUBNET_IDS, Value::Array(subnets)) => {
                network.subnet_iids = subnets
                    .iter()
                    .filter_map(Value::as_str)
                    .map(Iid::from_system_id)
                    .collect()
            }
            (name, Value::String(value)) => network.key_value_list.push(KeyValue::new(name, value.as_str())),
            (name, value) => network.key_value_list.push(KeyValue::new(name, value.to_string())),
        }
    }
    network
}

fn access_info(cluster: &DynamicObject) -> Option<AccessInfo> {
    let endpoint = cluster.data.pointer("/spec/controlPlaneEndpoint")?;
    let host = endpoint.get("host").and_then(Value::as_str).filter(|h| !h.is_empty())?;
    let port = endpoint.get("port").and_then(Value::as_u64).unwrap_or(6443);
    Some(AccessInfo {
        endpoint: format!("https://{}:{}", host, port),
        kubeconfig: None,
    })
}

fn cluster_info(cluster: &DynamicObject, observed: &[DynamicObject]) -> AdapterResult<ClusterInfo> {
    let version = cluster
        .data
        .pointer("/spec/topology/version")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let mut info = ClusterInfo::new(name_of(cluster), version);
    info.iid.system_id = uid_of(cluster).to_string();
    info.status = cluster_status(cluster);
    info.network = network_info(cluster);
    info.access_info = access_info(cluster);
    info.created_time = cluster.metadata.creation_timestamp.as_ref().map(|t| t.0);
    info.node_groups = node_groups(cluster, observed)?;
    Ok(info)
}

fn with_v_prefix(version: &str) -> String {
    if version.starts_with('v') {
        version.to_string()
    } else {
        format!("v{}", version)
    }
}

/// Merge patch guarded by the resource version the change was computed from.
fn conditional_patch(cluster: &DynamicObject, spec: Value) -> Value {
    let mut patch = json!({ "spec": spec });
    if let Some(rv) = &cluster.metadata.resource_version {
        patch["metadata"] = json!({ "resourceVersion": rv });
    }
    patch
}

fn reject_unsupported(node_group: &NodeGroupInfo) -> AdapterResult<()> {
    if node_group.image_iid.is_some() {
        return Err(AdapterError::invalid(format!(
            "node group {}: image selection is defined by the machine pool class",
            node_group.iid.name
        )));
    }
    if !scaling_bounds_ok(
        node_group.desired_node_size,
        node_group.min_node_size,
        node_group.max_node_size,
    ) {
        return Err(AdapterError::invalid(format!(
            "node group {}: node size bounds out of order",
            node_group.iid.name
        )));
    }
    Ok(())
}

pub struct CapiAdapter {
    client: Arc<dyn PmksKubeClient>,
    conf: CapiConf,
}

impl CapiAdapter {
    pub fn new(client: Arc<dyn PmksKubeClient>, conf: CapiConf) -> Self {
        Self { client, conf }
    }

    /// Connect to the management cluster named by `conf`.
    pub async fn connect(conf: CapiConf) -> AdapterResult<Self> {
        let client = PmksKubeClientImpl::from_conf(&conf).await?;
        Ok(Self::new(Arc::new(client), conf))
    }

    /// Clusters are matched on uid when one is given, otherwise on name.
    async fn find_cluster(&self, iid: &Iid) -> AdapterResult<DynamicObject> {
        if !iid.has_system_id() {
            return self.client.get(CapiKind::Cluster, &iid.name).await;
        }
        if !iid.name.is_empty() {
            if let Ok(obj) = self.client.get(CapiKind::Cluster, &iid.name).await {
                if uid_of(&obj) == iid.system_id {
                    return Ok(obj);
                }
            }
        }
        self.client
            .list(CapiKind::Cluster, None)
            .await?
            .into_iter()
            .find(|c| uid_of(c) == iid.system_id)
            .ok_or_else(|| AdapterError::not_found(format!("cluster {} not found", iid)))
    }

    async fn observed_pools(&self, cluster: &DynamicObject) -> AdapterResult<Vec<DynamicObject>> {
        let selector = format!("{}={}", LABEL_CLUSTER_NAME, name_of(cluster));
        self.client
            .list(CapiKind::MachinePool, Some(&selector))
            .await
    }

    async fn describe(&self, cluster: &DynamicObject) -> AdapterResult<ClusterInfo> {
        let observed = self.observed_pools(cluster).await?;
        cluster_info(cluster, &observed)
    }

    async fn find_node_group(&self, cluster: &DynamicObject, iid: &Iid) -> AdapterResult<NodeGroupInfo> {
        let observed = self.observed_pools(cluster).await?;
        node_groups(cluster, &observed)?
            .into_iter()
            .find(|ng| {
                if iid.has_system_id() {
                    ng.iid.system_id == iid.system_id
                } else {
                    ng.iid.name == iid.name
                }
            })
            .ok_or_else(|| AdapterError::not_found(format!("node group {} not found", iid)))
    }

    /// Read-modify-write of the machine pool list.
    async fn edit_pools<F>(&self, cluster: &DynamicObject, edit: F) -> AdapterResult<DynamicObject>
    where
        F: FnOnce(&mut Vec<MachinePoolTopology>) -> AdapterResult<()>,
    {
        let mut pools = topology_pools(cluster)?;
        edit(&mut pools)?;
        let pools = serde_json::to_value(&pools)
            .map_err(|e| AdapterError::new(AdapterErrorKind::Other, e.to_string()))?;
        let patch = conditional_patch(
            cluster,
            json!({ "topology": { "workers": { "machinePools": pools } } }),
        );
        self.client
            .merge_patch(CapiKind::Cluster, name_of(cluster), &patch)
            .await
    }

    fn pool_mut<'a>(
        pools: &'a mut [MachinePoolTopology],
        node_group: &Iid,
    ) -> AdapterResult<&'a mut MachinePoolTopology> {
        pools
            .iter_mut()
            .find(|p| p.name == node_group.name)
            .ok_or_else(|| AdapterError::not_found(format!("node group {} not found", node_group)))
    }

    fn cluster_object(&self, spec: &ClusterInfo) -> DynamicObject {
        let pools: Vec<MachinePoolTopology> = spec
            .node_groups
            .iter()
            .map(|ng| MachinePoolTopology::from_node_group(&self.conf.machine_pool_class, ng))
            .collect();

        let mut variables = Vec::new();
        if !spec.network.vpc_iid.system_id.is_empty() {
            variables.push(json!({ "name": VARIABLE_VPC_ID, "value": spec.network.vpc_iid.system_id }));
        }
        if !spec.network.subnet_iids.is_empty() {
            let subnets: Vec<&str> = spec
                .network
                .subnet_iids
                .iter()
                .map(|s| s.system_id.as_str())
                .collect();
            variables.push(json!({ "name": VARIABLE_SUBNET_IDS, "value": subnets }));
        }
        for kv in &spec.network.key_value_list {
            variables.push(json!({ "name": kv.key, "value": kv.value }));
        }

        let mut topology = json!({
            "class": self.conf.cluster_class,
            "version": with_v_prefix(&spec.version),
            "workers": { "machinePools": pools },
        });
        if !variables.is_empty() {
            topology["variables"] = Value::Array(variables);
        }

        let mut obj = DynamicObject::new(&spec.iid.name, &CapiKind::Cluster.api_resource())
            .within(&self.conf.namespace);
        obj.metadata.labels = Some(BTreeMap::from([(
            LABEL_MANAGED_BY.to_string(),
            LABEL_MANAGED_BY_VALUE.to_string(),
        )]));
        obj.data = json!({ "spec": { "topology": topology } });
        obj
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for CapiAdapter {
    fn capabilities(&self) -> &CapabilityDescriptor {
        &CAPI_CAPABILITIES
    }

    async fn create_cluster(&self, spec: ClusterInfo) -> AdapterResult<ClusterInfo> {
        for node_group in &spec.node_groups {
            reject_unsupported(node_group)?;
        }
        let obj = self.cluster_object(&spec);
        info!(cluster = %spec.iid.name, namespace = %self.conf.namespace, "Creating CAPI Cluster");
        let created = self.client.create(CapiKind::Cluster, &obj).await?;
        cluster_info(&created, &[])
    }

    async fn list_cluster(&self) -> AdapterResult<Vec<ClusterInfo>> {
        let clusters = self.client.list(CapiKind::Cluster, None).await?;
        let pools = self.client.list(CapiKind::MachinePool, None).await?;

        clusters
            .iter()
            .map(|cluster| {
                let name = name_of(cluster);
                let observed: Vec<DynamicObject> = pools
                    .iter()
                    .filter(|p| {
                        p.metadata
                            .labels
                            .as_ref()
                            .and_then(|l| l.get(LABEL_CLUSTER_NAME))
                            .map(String::as_str)
                            == Some(name)
                    })
                    .cloned()
                    .collect();
                cluster_info(cluster, &observed)
            })
            .collect()
    }

    async fn get_cluster(&self, cluster: &Iid) -> AdapterResult<ClusterInfo> {
        let obj = self.find_cluster(cluster).await?;
        let mut info = self.describe(&obj).await?;
        // Only for single reads; listing would cost one Secret read per cluster.
        if let Some(access) = info.access_info.as_mut() {
            match self.client.kubeconfig(name_of(&obj)).await {
                Ok(kubeconfig) => access.kubeconfig = kubeconfig,
                Err(e) => warn!(cluster = %info.iid, error = %e, "Cannot read workload kubeconfig"),
            }
        }
        Ok(info)
    }

    async fn delete_cluster(&self, cluster: &Iid) -> AdapterResult<bool> {
        let obj = self.find_cluster(cluster).await?;
        if obj.metadata.deletion_timestamp.is_some() {
            debug!(cluster = %cluster, "CAPI Cluster already being deleted");
            return Ok(true);
        }
        info!(cluster = %cluster, "Deleting CAPI Cluster");
        self.client.delete(CapiKind::Cluster, name_of(&obj)).await?;
        Ok(true)
    }

    async fn upgrade_cluster(&self, cluster: &Iid, target_version: &str) -> AdapterResult<ClusterInfo> {
        let obj = self.find_cluster(cluster).await?;
        let patch = conditional_patch(
            &obj,
            json!({ "topology": { "version": with_v_prefix(target_version) } }),
        );
        info!(cluster = %cluster, version = target_version, "Patching CAPI topology version");
        let patched = self
            .client
            .merge_patch(CapiKind::Cluster, name_of(&obj), &patch)
            .await?;
        self.describe(&patched).await
    }

    async fn add_node_group(&self, cluster: &Iid, spec: NodeGroupInfo) -> AdapterResult<NodeGroupInfo> {
        reject_unsupported(&spec)?;
        let obj = self.find_cluster(cluster).await?;
        let entry = MachinePoolTopology::from_node_group(&self.conf.machine_pool_class, &spec);

        let added = entry.clone();
        self.edit_pools(&obj, move |pools| {
            if pools.iter().any(|p| p.name == added.name) {
                return Err(AdapterError::conflict(format!(
                    "machine pool {} already exists",
                    added.name
                )));
            }
            pools.push(added);
            Ok(())
        })
        .await?;

        Ok(node_group_info(uid_of(&obj), &entry, None))
    }

    async fn remove_node_group(&self, cluster: &Iid, node_group: &Iid) -> AdapterResult<bool> {
        let obj = self.find_cluster(cluster).await?;
        let found = self.find_node_group(&obj, node_group).await?;
        if found.status == NodeGroupStatus::Deleting {
            return Ok(true);
        }
        self.edit_pools(&obj, |pools| {
            pools.retain(|p| p.name != found.iid.name);
            Ok(())
        })
        .await?;
        Ok(true)
    }

    async fn list_node_group(&self, cluster: &Iid) -> AdapterResult<Vec<NodeGroupInfo>> {
        let obj = self.find_cluster(cluster).await?;
        let observed = self.observed_pools(&obj).await?;
        node_groups(&obj, &observed)
    }

    async fn get_node_group(&self, cluster: &Iid, node_group: &Iid) -> AdapterResult<NodeGroupInfo> {
        let obj = self.find_cluster(cluster).await?;
        self.find_node_group(&obj, node_group).await
    }

    async fn set_node_group_auto_scaling(
        &self,
        cluster: &Iid,
        node_group: &Iid,
        enable: bool,
    ) -> AdapterResult<bool> {
        let obj = self.find_cluster(cluster).await?;
        let current = self.find_node_group(&obj, node_group).await?;
        self.edit_pools(&obj, |pools| {
            Self::pool_mut(pools, &current.iid)?.set_scaling(
                current.desired_node_size,
                current.min_node_size,
                current.max_node_size,
                enable,
            );
            Ok(())
        })
        .await?;
        Ok(true)
    }

    async fn change_node_group_scaling(
        &self,
        cluster: &Iid,
        node_group: &Iid,
        desired: u32,
        min: u32,
        max: u32,
    ) -> AdapterResult<NodeGroupInfo> {
        if !scaling_bounds_ok(desired, min, max) {
            return Err(AdapterError::invalid(format!(
                "min={} desired={} max={} out of order",
                min, desired, max
            )));
        }

        let obj = self.find_cluster(cluster).await?;
        let current = self.find_node_group(&obj, node_group).await?;
        let patched = self
            .edit_pools(&obj, |pools| {
                Self::pool_mut(pools, &current.iid)?.set_scaling(
                    desired,
                    min,
                    max,
                    current.on_auto_scaling,
                );
                Ok(())
            })
            .await?;
        self.find_node_group(&patched, &current.iid).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// RFC 7386 merge.
    fn merge(target: &mut Value, patch: &Value) {
        match patch {
            Value::Object(fields) => {
                if !target.is_object() {
                    *target = json!({});
                }
                let target = target.as_object_mut().unwrap();
                for (key, value) in fields {
                    if value.is_null() {
                        target.remove(key);
                    } else {
                        merge(target.entry(key.clone()).or_insert(Value::Null), value);
                    }
                }
            }
            other => *target = other.clone(),
        }
    }

    #[derive(Default)]
    struct FakeKube {
        objects: Mutex<HashMap<(CapiKind, String), DynamicObject>>,
        kubeconfigs: Mutex<HashMap<String, String>>,
        next_uid: Mutex<u64>,
    }

    impl FakeKube {
        fn object(&self, kind: CapiKind, name: &str) -> DynamicObject {
            self.objects.lock().unwrap()[&(kind, name.to_string())].clone()
        }

        fn set_status(&self, kind: CapiKind, name: &str, status: Value) {
            let mut objects = self.objects.lock().unwrap();
            let obj = objects.get_mut(&(kind, name.to_string())).unwrap();
            obj.data["status"] = status;
        }

        fn add_pool(&self, cluster: &str, pool: &str, phase: &str, replicas: u64, ready: u64) {
            let mut obj = DynamicObject::new(
                &format!("{}-{}", cluster, pool),
                &CapiKind::MachinePool.api_resource(),
            );
            obj.metadata.labels = Some(BTreeMap::from([
                (LABEL_CLUSTER_NAME.to_string(), cluster.to_string()),
                (LABEL_TOPOLOGY_POOL_NAME.to_string(), pool.to_string()),
            ]));
            obj.metadata.creation_timestamp = Some(Time(chrono::Utc::now()));
            let node_refs: Vec<Value> = (0..ready)
                .map(|i| json!({ "name": format!("{}-{}", pool, i), "uid": format!("node-uid-{}", i) }))
                .collect();
            obj.data = json!({
                "spec": { "replicas": replicas },
                "status": { "phase": phase, "readyReplicas": ready, "nodeRefs": node_refs },
            });
            self.objects
                .lock()
                .unwrap()
                .insert((CapiKind::MachinePool, obj.metadata.name.clone().unwrap()), obj);
        }
    }

    #[async_trait::async_trait]
    impl PmksKubeClient for FakeKube {
        async fn get(&self, kind: CapiKind, name: &str) -> Result<DynamicObject, AdapterError> {
            self.objects
                .lock()
                .unwrap()
                .get(&(kind, name.to_string()))
                .cloned()
                .ok_or_else(|| AdapterError::not_found(format!("{} not found", name)))
        }

        async fn list(
            &self,
            kind: CapiKind,
            label_selector: Option<&str>,
        ) -> Result<Vec<DynamicObject>, AdapterError> {
            let wanted = label_selector.and_then(|s| s.split_once('='));
            let mut items: Vec<DynamicObject> = self
                .objects
                .lock()
                .unwrap()
                .iter()
                .filter(|((k, _), _)| *k == kind)
                .map(|(_, obj)| obj.clone())
                .filter(|obj| match wanted {
                    Some((key, value)) => obj
                        .metadata
                        .labels
                        .as_ref()
                        .and_then(|l| l.get(key))
                        .is_some_and(|v| v == value),
                    None => true,
                })
                .collect();
            items.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
            Ok(items)
        }

        async fn create(&self, kind: CapiKind, obj: &DynamicObject) -> Result<DynamicObject, AdapterError> {
            let name = obj.metadata.name.clone().unwrap();
            let mut objects = self.objects.lock().unwrap();
            if objects.contains_key(&(kind, name.clone())) {
                return Err(AdapterError::conflict("already exists"));
            }
            let mut uid = self.next_uid.lock().unwrap();
            *uid += 1;
            let mut stored = obj.clone();
            stored.metadata.uid = Some(format!("uid-{}", uid));
            stored.metadata.resource_version = Some("1".to_string());
            stored.metadata.generation = Some(1);
            stored.metadata.creation_timestamp = Some(Time(chrono::Utc::now()));
            objects.insert((kind, name), stored.clone());
            Ok(stored)
        }

        async fn merge_patch(
            &self,
            kind: CapiKind,
            name: &str,
            patch: &Value,
        ) -> Result<DynamicObject, AdapterError> {
            let mut objects = self.objects.lock().unwrap();
            let obj = objects
                .get_mut(&(kind, name.to_string()))
                .ok_or_else(|| AdapterError::not_found(name.to_string()))?;
            if let Some(rv) = patch.pointer("/metadata/resourceVersion") {
                if Some(rv.as_str().unwrap()) != obj.metadata.resource_version.as_deref() {
                    return Err(AdapterError::conflict("resourceVersion changed"));
                }
            }

            let mut whole = serde_json::to_value(&*obj).unwrap();
            merge(&mut whole, patch);
            let mut updated: DynamicObject = serde_json::from_value(whole).unwrap();
            let rv: u64 = obj.metadata.resource_version.as_deref().unwrap().parse().unwrap();
            updated.metadata.resource_version = Some((rv + 1).to_string());
            if patch.get("spec").is_some() {
                updated.metadata.generation = obj.metadata.generation.map(|g| g + 1);
            }
            *obj = updated.clone();
            Ok(updated)
        }

        async fn kubeconfig(&self, cluster: &str) -> Result<Option<String>, AdapterError> {
            Ok(self.kubeconfigs.lock().unwrap().get(cluster).cloned())
        }

        async fn delete(&self, kind: CapiKind, name: &str) -> Result<(), AdapterError> {
            let mut objects = self.objects.lock().unwrap();
            let obj = objects
                .get_mut(&(kind, name.to_string()))
                .ok_or_else(|| AdapterError::not_found(name.to_string()))?;
            obj.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
            Ok(())
        }
    }

    fn adapter() -> (Arc<FakeKube>, CapiAdapter) {
        let kube = Arc::new(FakeKube::default());
        (kube.clone(), CapiAdapter::new(kube, CapiConf::default()))
    }

    fn provisioned(generation: i64) -> Value {
        json!({
            "phase": "Provisioned",
            "observedGeneration": generation,
            "conditions": [{ "type": "Ready", "status": "True" }],
        })
    }

    async fn create(adapter: &CapiAdapter) -> ClusterInfo {
        adapter
            .create_cluster(
                ClusterInfo::new("capi-1", "1.30.2")
                    .with_vpc(Iid::from_system_id("vpc-0a1b"))
                    .with_node_group(NodeGroupInfo::new("pool-a", "m5.large", 1, 0, 3)),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_builds_topology() {
        let (kube, adapter) = adapter();
        let created = create(&adapter).await;

        assert_eq!(created.iid.system_id, "uid-1");
        assert_eq!(created.status, ClusterStatus::Creating);
        assert_eq!(created.version, "v1.30.2");
        assert_eq!(created.network.vpc_iid.system_id, "vpc-0a1b");
        assert_eq!(created.node_groups[0].iid.system_id, "uid-1:pool-a");
        assert_eq!(created.node_groups[0].status, NodeGroupStatus::Creating);

        let obj = kube.object(CapiKind::Cluster, "capi-1");
        let topology = obj.data.pointer("/spec/topology").unwrap();
        assert_eq!(topology["class"], "quick-start");
        let pool = &topology["workers"]["machinePools"][0];
        assert_eq!(pool["class"], "default-worker");
        assert_eq!(pool["replicas"], 1);
        assert_eq!(pool["variables"]["overrides"][0]["value"], "m5.large");
        assert_eq!(pool["metadata"]["annotations"][ANNOTATION_MAX_SIZE], "3");
        assert!(pool["metadata"]["annotations"]
            .get(ANNOTATION_AUTOSCALER_MIN)
            .is_none());
    }

    #[tokio::test]
    async fn test_status_follows_capi_objects() {
        let (kube, adapter) = adapter();
        create(&adapter).await;
        kube.set_status(CapiKind::Cluster, "capi-1", provisioned(1));
        kube.add_pool("capi-1", "pool-a", "Running", 1, 1);

        let cluster = adapter.get_cluster(&Iid::from_name("capi-1")).await.unwrap();
        assert_eq!(cluster.status, ClusterStatus::Active);
        assert_eq!(cluster.node_groups[0].status, NodeGroupStatus::Active);
        assert_eq!(cluster.node_groups[0].nodes, vec![Iid::new("pool-a-0", "node-uid-0")]);
        assert!(cluster.node_groups[0].created_time.is_some());

        let upgrading = adapter
            .upgrade_cluster(&cluster.iid, "1.31.0")
            .await
            .unwrap();
        assert_eq!(upgrading.status, ClusterStatus::Updating);
        assert_eq!(upgrading.version, "v1.31.0");

        kube.set_status(CapiKind::Cluster, "capi-1", provisioned(2));
        let upgraded = adapter.get_cluster(&Iid::from_system_id("uid-1")).await.unwrap();
        assert_eq!(upgraded.status, ClusterStatus::Active);
    }

    #[tokio::test]
    async fn test_access_info_reads_kubeconfig_secret() {
        let (kube, adapter) = adapter();
        create(&adapter).await;
        let cluster = adapter.get_cluster(&Iid::from_name("capi-1")).await.unwrap();
        assert!(cluster.access_info.is_none());

        let mut obj = kube.object(CapiKind::Cluster, "capi-1");
        obj.data["spec"]["controlPlaneEndpoint"] = json!({ "host": "10.0.0.10", "port": 6443 });
        kube.objects
            .lock()
            .unwrap()
            .insert((CapiKind::Cluster, "capi-1".to_string()), obj);

        let cluster = adapter.get_cluster(&Iid::from_name("capi-1")).await.unwrap();
        let access = cluster.access_info.unwrap();
        assert_eq!(access.endpoint, "https://10.0.0.10:6443");
        assert_eq!(access.kubeconfig, None);

        kube.kubeconfigs
            .lock()
            .unwrap()
            .insert("capi-1".to_string(), "apiVersion: v1\nkind: Config\n".to_string());
        let cluster = adapter.get_cluster(&Iid::from_name("capi-1")).await.unwrap();
        assert_eq!(
            cluster.access_info.unwrap().kubeconfig.as_deref(),
            Some("apiVersion: v1\nkind: Config\n")
        );
    }

    #[tokio::test]
    async fn test_provisioned_but_not_ready_is_updating() {
        let (kube, adapter) = adapter();
        create(&adapter).await;
        kube.set_status(
            CapiKind::Cluster,
            "capi-1",
            json!({
                "phase": "Provisioned",
                "observedGeneration": 1,
                "conditions": [
                    { "type": "Ready", "status": "False" },
                    { "type": "TopologyReconciled", "status": "True" },
                ],
            }),
        );

        let cluster = adapter.get_cluster(&Iid::from_name("capi-1")).await.unwrap();
        assert_eq!(cluster.status, ClusterStatus::Updating);

        kube.set_status(CapiKind::Cluster, "capi-1", provisioned(1));
        let cluster = adapter.get_cluster(&Iid::from_name("capi-1")).await.unwrap();
        assert_eq!(cluster.status, ClusterStatus::Active);
    }

    #[tokio::test]
    async fn test_node_group_edits() {
        let (kube, adapter) = adapter();
        let cluster = create(&adapter).await;
        kube.add_pool("capi-1", "pool-a", "Running", 1, 1);

        let added = adapter
            .add_node_group(&cluster.iid, NodeGroupInfo::new("pool-b", "c5.xlarge", 2, 1, 4))
            .await
            .unwrap();
        assert_eq!(added.iid.system_id, "uid-1:pool-b");
        let dup = adapter
            .add_node_group(&cluster.iid, NodeGroupInfo::new("pool-b", "c5.xlarge", 2, 1, 4))
            .await
            .unwrap_err();
        assert_eq!(dup.kind, AdapterErrorKind::Conflict);

        let pool_a = Iid::new("pool-a", "uid-1:pool-a");
        let scaled = adapter
            .change_node_group_scaling(&cluster.iid, &pool_a, 2, 1, 5)
            .await
            .unwrap();
        assert_eq!(
            (scaled.desired_node_size, scaled.min_node_size, scaled.max_node_size),
            (2, 1, 5)
        );
        assert_eq!(scaled.status, NodeGroupStatus::Updating);

        assert!(adapter
            .set_node_group_auto_scaling(&cluster.iid, &pool_a, true)
            .await
            .unwrap());
        let obj = kube.object(CapiKind::Cluster, "capi-1");
        let entry = &obj.data["spec"]["topology"]["workers"]["machinePools"][0];
        assert!(entry.get("replicas").is_none());
        assert_eq!(entry["metadata"]["annotations"][ANNOTATION_AUTOSCALER_MIN], "1");
        assert_eq!(entry["metadata"]["annotations"][ANNOTATION_AUTOSCALER_MAX], "5");

        let pool = adapter.get_node_group(&cluster.iid, &pool_a).await.unwrap();
        assert!(pool.on_auto_scaling);
        assert_eq!(pool.desired_node_size, 1);

        assert!(adapter
            .remove_node_group(&cluster.iid, &Iid::from_name("pool-b"))
            .await
            .unwrap());
        let missing = adapter
            .get_node_group(&cluster.iid, &Iid::from_name("pool-b"))
            .await
            .unwrap_err();
        assert!(missing.is_not_found());
    }

    #[tokio::test]
    async fn test_removed_pool_drains_as_deleting() {
        let (kube, adapter) = adapter();
        let cluster = create(&adapter).await;
        kube.add_pool("capi-1", "pool-a", "Running", 1, 1);

        adapter
            .remove_node_group(&cluster.iid, &Iid::from_name("pool-a"))
            .await
            .unwrap();
        let groups = adapter.list_node_group(&cluster.iid).await.unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].status, NodeGroupStatus::Deleting);
    }

    #[tokio::test]
    async fn test_image_selection_rejected() {
        let (_, adapter) = adapter();
        let mut node_group = NodeGroupInfo::new("pool-a", "m5.large", 1, 0, 3);
        node_group.image_iid = Some(Iid::from_system_id("ami-123"));

        let err = adapter
            .create_cluster(ClusterInfo::new("capi-1", "1.30.2").with_node_group(node_group))
            .await
            .unwrap_err();
        assert_eq!(err.kind, AdapterErrorKind::Invalid);
    }

    #[tokio::test]
    async fn test_delete_marks_cluster_deleting() {
        let (_, adapter) = adapter();
        let cluster = create(&adapter).await;

        assert!(adapter.delete_cluster(&cluster.iid).await.unwrap());
        let deleting = adapter.get_cluster(&cluster.iid).await.unwrap();
        assert_eq!(deleting.status, ClusterStatus::Deleting);

        let stale = Iid::new("capi-1", "uid-other");
        assert!(adapter.get_cluster(&stale).await.unwrap_err().is_not_found());
    }

    #[test]
    fn test_cluster_status_mapping() {
        let mut obj = DynamicObject::new("c", &CapiKind::Cluster.api_resource());
        assert_eq!(cluster_status(&obj), ClusterStatus::Creating);

        obj.data = json!({ "status": { "phase": "Failed" } });
        assert_eq!(cluster_status(&obj), ClusterStatus::Error);

        obj.data = json!({ "status": {
            "phase": "Provisioned",
            "conditions": [{ "type": "TopologyReconciled", "status": "False" }],
        }});
        assert_eq!(cluster_status(&obj), ClusterStatus::Updating);
    }
}
