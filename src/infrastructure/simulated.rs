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

//! In-process provider with deterministic convergence.
//!
//! Mutations put the resource into a transitional status and arm a countdown
//! measured in provider reads (`get_*` / `list_*`). When the countdown runs
//! out the resource settles, so tests drive convergence through the same
//! polling the managers do in production. Faults can be injected per name or
//! per operation, reads can be made to lag behind writes, and every mutating
//! call is counted.

use crate::domain::capability::{CapabilityDescriptor, Field, FieldSupport};
use crate::domain::identity::Iid;
use crate::domain::model::{AccessInfo, ClusterInfo, ClusterStatus, NodeGroupInfo, NodeGroupStatus};
use crate::domain::version::check_upgrade_path;
use crate::infrastructure::provider::{
    scaling_bounds_ok, AdapterError, AdapterErrorKind, AdapterResult, ProviderAdapter,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Node image selection is refused like some providers do, security groups
/// are accepted but have no effect.
pub const SIMULATED_CAPABILITIES: CapabilityDescriptor = CapabilityDescriptor {
    provider: "simulated",
    fields: &[
        (Field::NodeImage, FieldSupport::Rejected),
        (Field::SecurityGroups, FieldSupport::Ignored),
    ],
    max_minor_skew: 1,
};

const DEFAULT_SETTLE_READS: u32 = 2;

#[derive(Debug, Clone, Copy)]
enum Outcome<S> {
    Become(S),
    Remove,
}

#[derive(Debug, Clone, Copy)]
struct Countdown<S> {
    remaining: u32,
    outcome: Outcome<S>,
}

impl<S: Copy> Countdown<S> {
    fn new(remaining: u32, outcome: Outcome<S>) -> Self {
        Self { remaining, outcome }
    }

    /// Returns the outcome once the countdown reaches zero.
    fn tick(&mut self) -> Option<Outcome<S>> {
        self.remaining = self.remaining.saturating_sub(1);
        (self.remaining == 0).then_some(self.outcome)
    }
}

#[derive(Debug)]
struct SimNodeGroup {
    info: NodeGroupInfo,
    countdown: Option<Countdown<NodeGroupStatus>>,
}

#[derive(Debug)]
struct SimCluster {
    info: ClusterInfo,
    node_groups: Vec<SimNodeGroup>,
    countdown: Option<Countdown<ClusterStatus>>,
    pending_version: Option<String>,
}

impl SimCluster {
    fn snapshot(&self) -> ClusterInfo {
        let mut info = self.info.clone();
        info.node_groups = self.node_groups.iter().map(|ng| ng.info.clone()).collect();
        info
    }

    fn node_group_mut(&mut self, iid: &Iid) -> AdapterResult<&mut SimNodeGroup> {
        self.node_groups
            .iter_mut()
            .find(|ng| ng.info.iid.system_id == iid.system_id)
            .ok_or_else(|| AdapterError::not_found(format!("node group {} not found", iid)))
    }
}

/// What readers keep seeing for a while after a write.
#[derive(Debug)]
struct StaleView {
    clusters: Vec<ClusterInfo>,
    remaining: u32,
}

fn find_cluster<'a>(clusters: &'a [ClusterInfo], iid: &Iid) -> AdapterResult<&'a ClusterInfo> {
    clusters
        .iter()
        .find(|c| c.iid.system_id == iid.system_id)
        .ok_or_else(|| AdapterError::not_found(format!("cluster {} not found", iid)))
}

fn find_node_group<'a>(cluster: &'a ClusterInfo, iid: &Iid) -> AdapterResult<&'a NodeGroupInfo> {
    cluster
        .node_groups
        .iter()
        .find(|ng| ng.iid.system_id == iid.system_id)
        .ok_or_else(|| AdapterError::not_found(format!("node group {} not found", iid)))
}

#[derive(Debug, Default)]
struct SimState {
    clusters: Vec<SimCluster>,
    next_id: u64,
    calls: HashMap<&'static str, usize>,
    mutating_calls: usize,
    rejections: HashMap<&'static str, AdapterError>,
    failing: HashSet<String>,
    frozen: bool,
    read_lag: u32,
    stale: Option<StaleView>,
}

impl SimState {
    fn issue_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{:06}", prefix, self.next_id)
    }

    fn record(&mut self, op: &'static str, mutating: bool) -> AdapterResult<()> {
        *self.calls.entry(op).or_default() += 1;
        if mutating {
            self.mutating_calls += 1;
        }
        if let Some(err) = self.rejections.remove(op) {
            return Err(err);
        }
        if mutating && self.read_lag > 0 {
            self.stale = Some(StaleView {
                clusters: self.clusters.iter().map(SimCluster::snapshot).collect(),
                remaining: self.read_lag,
            });
        }
        Ok(())
    }

    /// The pre-write snapshot while reads are still lagging. Stale reads do
    /// not advance transitions.
    fn stale_read(&mut self) -> Option<Vec<ClusterInfo>> {
        let view = self.stale.as_mut()?;
        view.remaining = view.remaining.saturating_sub(1);
        let clusters = view.clusters.clone();
        if view.remaining == 0 {
            self.stale = None;
        }
        Some(clusters)
    }

    fn cluster_mut(&mut self, iid: &Iid) -> AdapterResult<&mut SimCluster> {
        self.clusters
            .iter_mut()
            .find(|c| c.info.iid.system_id == iid.system_id)
            .ok_or_else(|| AdapterError::not_found(format!("cluster {} not found", iid)))
    }

    /// Advance every pending transition by one read.
    fn tick(&mut self) {
        if self.frozen {
            return;
        }

        let mut removed_clusters = Vec::new();
        for (idx, cluster) in self.clusters.iter_mut().enumerate() {
            if let Some(outcome) = cluster.countdown.as_mut().and_then(Countdown::tick) {
                cluster.countdown = None;
                match outcome {
                    Outcome::Become(status) => {
                        if status == ClusterStatus::Active {
                            if let Some(version) = cluster.pending_version.take() {
                                cluster.info.version = version;
                            }
                        }
                        debug!(cluster = %cluster.info.iid, %status, "Simulated cluster settled");
                        cluster.info.status = status;
                    }
                    Outcome::Remove => removed_clusters.push(idx),
                }
            }

            cluster.node_groups.retain_mut(|ng| {
                match ng.countdown.as_mut().and_then(Countdown::tick) {
                    Some(Outcome::Become(status)) => {
                        ng.countdown = None;
                        ng.info.status = status;
                        if status == NodeGroupStatus::Active {
                            materialize_nodes(&mut ng.info);
                        }
                        true
                    }
                    Some(Outcome::Remove) => false,
                    None => true,
                }
            });
        }

        for idx in removed_clusters.into_iter().rev() {
            self.clusters.remove(idx);
        }
    }
}

fn materialize_nodes(info: &mut NodeGroupInfo) {
    info.nodes = (0..info.desired_node_size)
        .map(|i| {
            Iid::new(
                format!("{}-node-{}", info.iid.name, i),
                format!("{}-i{}", info.iid.system_id, i),
            )
        })
        .collect();
}

/// Deterministic [`ProviderAdapter`] kept entirely in memory.
pub struct SimulatedProvider {
    capabilities: CapabilityDescriptor,
    settle_reads: u32,
    versions: Vec<String>,
    state: Mutex<SimState>,
}

impl Default for SimulatedProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedProvider {
    pub fn new() -> Self {
        Self {
            capabilities: SIMULATED_CAPABILITIES,
            settle_reads: DEFAULT_SETTLE_READS,
            versions: Vec::new(),
            state: Mutex::new(SimState::default()),
        }
    }

    pub fn with_capabilities(mut self, capabilities: CapabilityDescriptor) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Number of reads after which a transition completes.
    pub fn with_settle_reads(mut self, reads: u32) -> Self {
        self.settle_reads = reads.max(1);
        self
    }

    /// Restrict upgrades to this catalog. An empty catalog accepts any
    /// version that passes the upgrade-path rules.
    pub fn with_versions<I, S>(mut self, versions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.versions = versions.into_iter().map(Into::into).collect();
        self
    }

    /// Resources with this name settle into `Error` instead of `Active`.
    pub fn fail_resource(&self, name: impl Into<String>) {
        self.lock().failing.insert(name.into());
    }

    /// The next call of `op` fails with `error`.
    pub fn reject_next(&self, op: &'static str, error: AdapterError) {
        self.lock().rejections.insert(op, error);
    }

    /// After each accepted write, the next `reads` reads still return the
    /// state from before that write.
    pub fn lag_reads(&self, reads: u32) {
        let mut state = self.lock();
        state.read_lag = reads;
        state.stale = None;
    }

    /// Stop or resume all pending transitions.
    pub fn freeze(&self, frozen: bool) {
        self.lock().frozen = frozen;
    }

    pub fn calls(&self, op: &str) -> usize {
        self.lock().calls.get(op).copied().unwrap_or(0)
    }

    pub fn mutating_calls(&self) -> usize {
        self.lock().mutating_calls
    }

    pub fn total_calls(&self) -> usize {
        self.lock().calls.values().sum()
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn settle_to<S: Copy>(&self, state: &SimState, name: &str, ok: S, failed: S) -> Countdown<S> {
        let status = if state.failing.contains(name) { failed } else { ok };
        Countdown::new(self.settle_reads, Outcome::Become(status))
    }

    fn check_payload(&self, node_group: &NodeGroupInfo) -> AdapterResult<()> {
        let rejected = [
            (Field::NodeImage, node_group.image_iid.is_some()),
            (Field::RootDiskType, node_group.root_disk_type.is_some()),
            (Field::RootDiskSize, node_group.root_disk_size.is_some()),
            (Field::KeyPair, node_group.key_pair_iid.is_some()),
            (Field::NodeAutoScaling, node_group.on_auto_scaling),
        ]
        .into_iter()
        .find(|(field, present)| {
            *present && self.capabilities.support(*field) == FieldSupport::Rejected
        });

        match rejected {
            Some((field, _)) => Err(AdapterError::invalid(format!(
                "field {} is not supported",
                field
            ))),
            None if !scaling_bounds_ok(
                node_group.desired_node_size,
                node_group.min_node_size,
                node_group.max_node_size,
            ) =>
            {
                Err(AdapterError::invalid("node size bounds out of order"))
            }
            None => Ok(()),
        }
    }

    fn new_node_group(&self, state: &mut SimState, mut spec: NodeGroupInfo) -> SimNodeGroup {
        spec.iid.system_id = state.issue_id("np");
        spec.status = NodeGroupStatus::Creating;
        spec.nodes.clear();
        spec.created_time = Some(chrono::Utc::now());
        let countdown = self.settle_to(
            state,
            &spec.iid.name,
            NodeGroupStatus::Active,
            NodeGroupStatus::Error,
        );
        SimNodeGroup {
            info: spec,
            countdown: Some(countdown),
        }
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for SimulatedProvider {
    fn capabilities(&self) -> &CapabilityDescriptor {
        &self.capabilities
    }

    async fn create_cluster(&self, spec: ClusterInfo) -> AdapterResult<ClusterInfo> {
        let mut state = self.lock();
        state.record("create_cluster", true)?;

        if !spec.node_groups.is_empty() && !self.capabilities.honors(Field::InitialNodeGroups) {
            return Err(AdapterError::invalid(
                "node groups cannot be created together with the cluster",
            ));
        }
        if !spec.network.security_group_iids.is_empty()
            && self.capabilities.support(Field::SecurityGroups) == FieldSupport::Rejected
        {
            return Err(AdapterError::invalid("security groups are not supported"));
        }
        for node_group in &spec.node_groups {
            self.check_payload(node_group)?;
        }

        let mut info = spec;
        let requested_groups = std::mem::take(&mut info.node_groups);
        info.iid.system_id = state.issue_id("cls");
        info.status = ClusterStatus::Creating;
        info.created_time = Some(chrono::Utc::now());
        info.access_info = Some(AccessInfo {
            endpoint: format!("https://{}.sim.local:6443", info.iid.system_id),
            kubeconfig: None,
        });

        let countdown = self.settle_to(
            &state,
            &info.iid.name,
            ClusterStatus::Active,
            ClusterStatus::Error,
        );
        let node_groups = requested_groups
            .into_iter()
            .map(|ng| self.new_node_group(&mut state, ng))
            .collect();

        let cluster = SimCluster {
            info,
            node_groups,
            countdown: Some(countdown),
            pending_version: None,
        };
        let snapshot = cluster.snapshot();
        state.clusters.push(cluster);
        Ok(snapshot)
    }

    async fn list_cluster(&self) -> AdapterResult<Vec<ClusterInfo>> {
        let mut state = self.lock();
        state.record("list_cluster", false)?;
        if let Some(view) = state.stale_read() {
            return Ok(view);
        }
        state.tick();
        Ok(state.clusters.iter().map(SimCluster::snapshot).collect())
    }

    async fn get_cluster(&self, cluster: &Iid) -> AdapterResult<ClusterInfo> {
        let mut state = self.lock();
        state.record("get_cluster", false)?;
        if let Some(view) = state.stale_read() {
            return find_cluster(&view, cluster).cloned();
        }
        state.tick();
        Ok(state.cluster_mut(cluster)?.snapshot())
    }

    async fn delete_cluster(&self, cluster: &Iid) -> AdapterResult<bool> {
        let mut state = self.lock();
        state.record("delete_cluster", true)?;
        let settle_reads = self.settle_reads;
        let sim = state.cluster_mut(cluster)?;
        if sim.info.status != ClusterStatus::Deleting {
            sim.info.status = ClusterStatus::Deleting;
            sim.countdown = Some(Countdown::new(settle_reads, Outcome::Remove));
        }
        Ok(true)
    }

    async fn upgrade_cluster(
        &self,
        cluster: &Iid,
        target_version: &str,
    ) -> AdapterResult<ClusterInfo> {
        let mut state = self.lock();
        state.record("upgrade_cluster", true)?;

        if !self.versions.is_empty() && !self.versions.iter().any(|v| v == target_version) {
            return Err(AdapterError::new(
                AdapterErrorKind::InvalidUpgradePath,
                format!("version {} is not offered", target_version),
            ));
        }

        let skew = self.capabilities.max_minor_skew;
        let settle_reads = self.settle_reads;
        let sim = state.cluster_mut(cluster)?;
        if sim.info.status != ClusterStatus::Active {
            return Err(AdapterError::conflict(format!(
                "cluster is {}",
                sim.info.status
            )));
        }
        check_upgrade_path(&sim.info.version, target_version, skew)
            .map_err(|reason| AdapterError::new(AdapterErrorKind::InvalidUpgradePath, reason))?;

        sim.info.status = ClusterStatus::Updating;
        sim.pending_version = Some(target_version.to_string());
        sim.countdown = Some(Countdown::new(
            settle_reads,
            Outcome::Become(ClusterStatus::Active),
        ));
        Ok(sim.snapshot())
    }

    async fn add_node_group(
        &self,
        cluster: &Iid,
        spec: NodeGroupInfo,
    ) -> AdapterResult<NodeGroupInfo> {
        let mut state = self.lock();
        state.record("add_node_group", true)?;
        self.check_payload(&spec)?;

        let status = state.cluster_mut(cluster)?.info.status;
        if status != ClusterStatus::Active {
            return Err(AdapterError::conflict(format!("cluster is {}", status)));
        }

        let node_group = self.new_node_group(&mut state, spec);
        let info = node_group.info.clone();
        state.cluster_mut(cluster)?.node_groups.push(node_group);
        Ok(info)
    }

    async fn remove_node_group(&self, cluster: &Iid, node_group: &Iid) -> AdapterResult<bool> {
        let mut state = self.lock();
        state.record("remove_node_group", true)?;
        let settle_reads = self.settle_reads;
        let ng = state.cluster_mut(cluster)?.node_group_mut(node_group)?;
        ng.info.status = NodeGroupStatus::Deleting;
        ng.countdown = Some(Countdown::new(settle_reads, Outcome::Remove));
        Ok(true)
    }

    async fn list_node_group(&self, cluster: &Iid) -> AdapterResult<Vec<NodeGroupInfo>> {
        let mut state = self.lock();
        state.record("list_node_group", false)?;
        if let Some(view) = state.stale_read() {
            return Ok(find_cluster(&view, cluster)?.node_groups.clone());
        }
        state.tick();
        Ok(state
            .cluster_mut(cluster)?
            .node_groups
            .iter()
            .map(|ng| ng.info.clone())
            .collect())
    }

    async fn get_node_group(
        &self,
        cluster: &Iid,
        node_group: &Iid,
    ) -> AdapterResult<NodeGroupInfo> {
        let mut state = self.lock();
        state.record("get_node_group", false)?;
        if let Some(view) = state.stale_read() {
            return find_node_group(find_cluster(&view, cluster)?, node_group).cloned();
        }
        state.tick();
        Ok(state
            .cluster_mut(cluster)?
            .node_group_mut(node_group)?
            .info
            .clone())
    }

    async fn set_node_group_auto_scaling(
        &self,
        cluster: &Iid,
        node_group: &Iid,
        enable: bool,
    ) -> AdapterResult<bool> {
        let mut state = self.lock();
        state.record("set_node_group_auto_scaling", true)?;
        if enable && self.capabilities.support(Field::NodeAutoScaling) == FieldSupport::Rejected {
            return Err(AdapterError::invalid("autoscaling is not supported"));
        }
        let settle_reads = self.settle_reads;
        let ng = state.cluster_mut(cluster)?.node_group_mut(node_group)?;
        ng.info.on_auto_scaling = enable;
        ng.info.status = NodeGroupStatus::Updating;
        ng.countdown = Some(Countdown::new(
            settle_reads,
            Outcome::Become(NodeGroupStatus::Active),
        ));
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

        let mut state = self.lock();
        state.record("change_node_group_scaling", true)?;
        let settle_reads = self.settle_reads;
        let ng = state.cluster_mut(cluster)?.node_group_mut(node_group)?;
        ng.info.desired_node_size = desired;
        ng.info.min_node_size = min;
        ng.info.max_node_size = max;
        ng.info.status = NodeGroupStatus::Updating;
        ng.countdown = Some(Countdown::new(
            settle_reads,
            Outcome::Become(NodeGroupStatus::Active),
        ));
        Ok(ng.info.clone())
    }
}
