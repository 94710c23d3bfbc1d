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

//! Node group orchestration on top of a provider adapter.
//!
//! Every mutation is submitted once and then polled until the node group
//! settles. Concurrent calls against the same node group are not serialized
//! here; the provider applies them last-write-wins.

use crate::domain::cluster::validator::SpecValidator;
use crate::domain::cluster::{resolve_cluster, resolve_node_group};
use crate::domain::identity::{Iid, ResourceKind};
use crate::domain::model::{NodeGroupInfo, NodeGroupStatus};
use crate::domain::poller::{PollConfig, StatusPoller};
use crate::infrastructure::provider::ProviderAdapter;
use crate::shared::error::{PmksError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

const ADD: &str = "add_node_group";
const REMOVE: &str = "remove_node_group";
const LIST: &str = "list_node_group";
const GET: &str = "get_node_group";
const SET_AUTO_SCALING: &str = "set_node_group_auto_scaling";
const CHANGE_SCALING: &str = "change_node_group_scaling";

pub struct NodeGroupManager {
    adapter: Arc<dyn ProviderAdapter>,
    poller: StatusPoller,
    validator: SpecValidator,
}

impl NodeGroupManager {
    pub fn new(adapter: Arc<dyn ProviderAdapter>, polling: PollConfig) -> Self {
        let validator = SpecValidator::new(adapter.capabilities().max_minor_skew);
        Self {
            adapter,
            poller: StatusPoller::new(polling),
            validator,
        }
    }

    pub async fn list_node_group(&self, cluster: &Iid) -> Result<Vec<NodeGroupInfo>> {
        let cluster = resolve_cluster(self.adapter.as_ref(), LIST, cluster).await?;
        self.adapter
            .list_node_group(&cluster.iid)
            .await
            .map_err(|e| e.into_pmks(LIST, ResourceKind::Cluster, &cluster.iid))
    }

    pub async fn get_node_group(&self, cluster: &Iid, node_group: &Iid) -> Result<NodeGroupInfo> {
        let cluster = resolve_cluster(self.adapter.as_ref(), GET, cluster).await?;
        let found = resolve_node_group(self.adapter.as_ref(), GET, &cluster.iid, node_group).await?;
        self.adapter
            .get_node_group(&cluster.iid, &found.iid)
            .await
            .map_err(|e| e.into_pmks(GET, ResourceKind::NodeGroup, &found.iid))
    }

    /// Create a node group and wait for it to become `Active`.
    pub async fn add_node_group(&self, cluster: &Iid, spec: NodeGroupInfo) -> Result<NodeGroupInfo> {
        self.validator.validate_node_group(ADD, &spec)?;

        let cluster = resolve_cluster(self.adapter.as_ref(), ADD, cluster).await?;
        self.validator.ensure_accepts_node_group_changes(ADD, &cluster)?;
        self.submit_and_settle(&cluster.iid, spec).await
    }

    /// Add path shared with cluster creation, which has already checked the
    /// owning cluster.
    pub(crate) async fn submit_and_settle(
        &self,
        cluster: &Iid,
        mut spec: NodeGroupInfo,
    ) -> Result<NodeGroupInfo> {
        let existing = self
            .adapter
            .list_node_group(cluster)
            .await
            .map_err(|e| e.into_pmks(ADD, ResourceKind::Cluster, cluster))?;
        if existing.iter().any(|ng| ng.iid.name == spec.iid.name) {
            return Err(PmksError::already_exists(
                ADD,
                ResourceKind::NodeGroup,
                spec.iid.name.clone(),
            ));
        }

        self.adapter.capabilities().sanitize_node_group(&mut spec);

        info!(cluster = %cluster, node_group = %spec.iid, "Adding node group");
        let requested = spec.iid.clone();
        let created = self
            .adapter
            .add_node_group(cluster, spec)
            .await
            .map_err(|e| e.into_pmks(ADD, ResourceKind::NodeGroup, &requested))?;

        let settled = self
            .wait_for_settled(ADD, cluster, &created.iid, |_| true)
            .await?;
        self.expect_active(ADD, settled)
    }

    pub async fn remove_node_group(&self, cluster: &Iid, node_group: &Iid) -> Result<bool> {
        let cluster = resolve_cluster(self.adapter.as_ref(), REMOVE, cluster).await?;
        self.validator
            .ensure_accepts_node_group_changes(REMOVE, &cluster)?;
        let found =
            resolve_node_group(self.adapter.as_ref(), REMOVE, &cluster.iid, node_group).await?;

        if found.status == NodeGroupStatus::Deleting {
            info!(node_group = %found.iid, "Node group already deleting, waiting");
        } else {
            info!(cluster = %cluster.iid, node_group = %found.iid, "Removing node group");
            let accepted = self
                .adapter
                .remove_node_group(&cluster.iid, &found.iid)
                .await
                .map_err(|e| e.into_pmks(REMOVE, ResourceKind::NodeGroup, &found.iid))?;
            if !accepted {
                return Ok(false);
            }
        }

        self.wait_for_absent(REMOVE, &cluster.iid, &found.iid, found.status)
            .await?;
        info!(node_group = %found.iid, "Node group removed");
        Ok(true)
    }

    pub async fn set_node_group_auto_scaling(
        &self,
        cluster: &Iid,
        node_group: &Iid,
        enable: bool,
    ) -> Result<bool> {
        let (cluster, found) = self.resolve_mutable(SET_AUTO_SCALING, cluster, node_group).await?;

        info!(node_group = %found.iid, enable, "Setting node group autoscaling");
        let accepted = self
            .adapter
            .set_node_group_auto_scaling(&cluster, &found.iid, enable)
            .await
            .map_err(|e| e.into_pmks(SET_AUTO_SCALING, ResourceKind::NodeGroup, &found.iid))?;
        if !accepted {
            warn!(node_group = %found.iid, "Provider declined autoscaling change");
            return Ok(false);
        }

        let settled = self
            .wait_for_settled(SET_AUTO_SCALING, &cluster, &found.iid, |ng| {
                ng.on_auto_scaling == enable
            })
            .await?;
        self.expect_active(SET_AUTO_SCALING, settled)?;
        Ok(true)
    }

    /// Bounds are checked before anything is sent to the provider.
    pub async fn change_node_group_scaling(
        &self,
        cluster: &Iid,
        node_group: &Iid,
        desired: u32,
        min: u32,
        max: u32,
    ) -> Result<NodeGroupInfo> {
        self.validator
            .validate_scaling(CHANGE_SCALING, node_group, desired, min, max)?;

        let (cluster, found) = self.resolve_mutable(CHANGE_SCALING, cluster, node_group).await?;

        info!(node_group = %found.iid, desired, min, max, "Changing node group scaling");
        self.adapter
            .change_node_group_scaling(&cluster, &found.iid, desired, min, max)
            .await
            .map_err(|e| e.into_pmks(CHANGE_SCALING, ResourceKind::NodeGroup, &found.iid))?;

        // The autoscaler owns the desired size, so only the bounds must match.
        let autoscaling = found.on_auto_scaling;
        let settled = self
            .wait_for_settled(CHANGE_SCALING, &cluster, &found.iid, |ng| {
                ng.min_node_size == min
                    && ng.max_node_size == max
                    && (autoscaling || ng.desired_node_size == desired)
            })
            .await?;
        self.expect_active(CHANGE_SCALING, settled)
    }

    async fn resolve_mutable(
        &self,
        op: &'static str,
        cluster: &Iid,
        node_group: &Iid,
    ) -> Result<(Iid, NodeGroupInfo)> {
        let cluster = resolve_cluster(self.adapter.as_ref(), op, cluster).await?;
        self.validator.ensure_accepts_node_group_changes(op, &cluster)?;
        let found = resolve_node_group(self.adapter.as_ref(), op, &cluster.iid, node_group).await?;
        Ok((cluster.iid, found))
    }

    /// Poll until the node group is in `Error`, or `Active` with `applied`
    /// holding. An `Active` record that does not show the change yet is a
    /// read from before the write.
    ///
    /// A node group without a system id yet is looked up by name on every
    /// probe.
    pub(crate) async fn wait_for_settled<A>(
        &self,
        op: &'static str,
        cluster: &Iid,
        node_group: &Iid,
        applied: A,
    ) -> Result<NodeGroupInfo>
    where
        A: Fn(&NodeGroupInfo) -> bool,
    {
        let adapter = self.adapter.as_ref();
        let what = format!("node group {}", node_group);
        let outcome = self
            .poller
            .poll(
                &what,
                move || async move {
                    if node_group.has_system_id() {
                        adapter
                            .get_node_group(cluster, node_group)
                            .await
                            .map_err(|e| e.into_pmks(op, ResourceKind::NodeGroup, node_group))
                    } else {
                        resolve_node_group(adapter, op, cluster, node_group).await
                    }
                },
                |ng: &NodeGroupInfo| match ng.status {
                    NodeGroupStatus::Error => true,
                    NodeGroupStatus::Active => applied(ng),
                    _ => false,
                },
            )
            .await;
        outcome.into_terminal(op, node_group, |ng| ng.status.to_string())
    }

    /// Poll until the node group is gone.
    ///
    /// `Error` ends the wait as a failure, except that a group which was
    /// already in `Error` must first be seen `Deleting`: until then the
    /// reads may predate the delete.
    async fn wait_for_absent(
        &self,
        op: &'static str,
        cluster: &Iid,
        node_group: &Iid,
        prior: NodeGroupStatus,
    ) -> Result<()> {
        let adapter = self.adapter.as_ref();
        let seen_deleting = AtomicBool::new(prior == NodeGroupStatus::Deleting);
        let what = format!("removal of node group {}", node_group);
        let outcome = self
            .poller
            .poll(
                &what,
                move || async move {
                    match adapter.get_node_group(cluster, node_group).await {
                        Ok(ng) => Ok(Some(ng)),
                        Err(e) if e.is_not_found() => Ok(None),
                        Err(e) => Err(e.into_pmks(op, ResourceKind::NodeGroup, node_group)),
                    }
                },
                |ng: &Option<NodeGroupInfo>| match ng.as_ref().map(|ng| ng.status) {
                    None => true,
                    Some(NodeGroupStatus::Deleting) => {
                        seen_deleting.store(true, Ordering::Relaxed);
                        false
                    }
                    Some(NodeGroupStatus::Error) => {
                        prior != NodeGroupStatus::Error || seen_deleting.load(Ordering::Relaxed)
                    }
                    Some(_) => false,
                },
            )
            .await;

        match outcome.into_terminal(op, node_group, |ng| {
            ng.as_ref()
                .map_or_else(|| "absent".to_string(), |ng| ng.status.to_string())
        })? {
            None => Ok(()),
            Some(ng) => Err(PmksError::provider_rejected(
                op,
                ng.iid,
                "node group entered Error state while deleting",
            )),
        }
    }

    fn expect_active(&self, op: &'static str, node_group: NodeGroupInfo) -> Result<NodeGroupInfo> {
        if node_group.status == NodeGroupStatus::Active {
            info!(node_group = %node_group.iid, "Node group is Active");
            Ok(node_group)
        } else {
            Err(PmksError::provider_rejected(
                op,
                node_group.iid,
                format!("node group settled in {} state", node_group.status),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::ClusterInfo;
    use crate::infrastructure::simulated::SimulatedProvider;
    use std::time::Duration;

    async fn active_cluster(provider: &SimulatedProvider) -> Iid {
        let created = provider
            .create_cluster(ClusterInfo::new("cluster-1", "1.30.2"))
            .await
            .unwrap();
        provider.get_cluster(&created.iid).await.unwrap();
        provider.get_cluster(&created.iid).await.unwrap();
        created.iid
    }

    fn manager(provider: &Arc<SimulatedProvider>) -> NodeGroupManager {
        NodeGroupManager::new(
            provider.clone(),
            PollConfig::fixed(Duration::from_secs(5), Duration::from_secs(60)),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_then_scale() {
        let provider = Arc::new(SimulatedProvider::new());
        let cluster = active_cluster(&provider).await;
        let manager = manager(&provider);

        let added = manager
            .add_node_group(
                &Iid::from_name("cluster-1"),
                NodeGroupInfo::new("pool-a", "m5.large", 1, 0, 3),
            )
            .await
            .unwrap();
        assert_eq!(added.status, NodeGroupStatus::Active);

        let scaled = manager
            .change_node_group_scaling(&cluster, &Iid::from_name("pool-a"), 2, 0, 5)
            .await
            .unwrap();
        assert_eq!(
            (scaled.desired_node_size, scaled.min_node_size, scaled.max_node_size),
            (2, 0, 5)
        );
        assert_eq!(scaled.nodes.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_bounds_make_no_remote_call() {
        let provider = Arc::new(SimulatedProvider::new());
        let cluster = active_cluster(&provider).await;
        let before = provider.total_calls();

        let err = manager(&provider)
            .change_node_group_scaling(&cluster, &Iid::from_name("pool-a"), 5, 0, 3)
            .await
            .unwrap_err();
        assert!(matches!(err, PmksError::InvalidScalingBounds { .. }));
        assert_eq!(provider.total_calls(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_cluster_refuses_node_group_changes() {
        let provider = Arc::new(SimulatedProvider::new());
        let created = provider
            .create_cluster(ClusterInfo::new("cluster-1", "1.30.2"))
            .await
            .unwrap();

        let err = manager(&provider)
            .add_node_group(&created.iid, NodeGroupInfo::new("pool-a", "m5.large", 1, 0, 3))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PmksError::ClusterBusy {
                status: crate::domain::model::ClusterStatus::Creating,
                ..
            }
        ));
        assert!(err.is_retryable());
        assert_eq!(provider.calls("add_node_group"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_missing_node_group_is_not_found() {
        let provider = Arc::new(SimulatedProvider::new());
        let cluster = active_cluster(&provider).await;

        let err = manager(&provider)
            .remove_node_group(&cluster, &Iid::from_name("ghost"))
            .await
            .unwrap_err();
        assert!(matches!(err, PmksError::NotFound { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_autoscaling_toggle_settles() {
        let provider = Arc::new(SimulatedProvider::new());
        let cluster = active_cluster(&provider).await;
        let manager = manager(&provider);
        manager
            .add_node_group(&cluster, NodeGroupInfo::new("pool-a", "m5.large", 1, 0, 3))
            .await
            .unwrap();

        assert!(manager
            .set_node_group_auto_scaling(&cluster, &Iid::from_name("pool-a"), true)
            .await
            .unwrap());
        let pool = manager
            .get_node_group(&cluster, &Iid::from_name("pool-a"))
            .await
            .unwrap();
        assert!(pool.on_auto_scaling);
        assert_eq!(pool.status, NodeGroupStatus::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_added_node_group_goes_creating_then_active() {
        let provider = Arc::new(SimulatedProvider::new());
        let cluster = active_cluster(&provider).await;
        let manager = manager(&provider);

        let submitted = provider
            .add_node_group(&cluster, NodeGroupInfo::new("pool-a", "m5.large", 1, 0, 3))
            .await
            .unwrap();
        assert_eq!(submitted.status, NodeGroupStatus::Creating);
        let first_read = provider
            .get_node_group(&cluster, &submitted.iid)
            .await
            .unwrap();
        assert_eq!(first_read.status, NodeGroupStatus::Creating);

        let settled = manager
            .wait_for_settled(ADD, &cluster, &submitted.iid, |_| true)
            .await
            .unwrap();
        assert_eq!(settled.status, NodeGroupStatus::Active);
        let listed = manager.list_node_group(&cluster).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status, NodeGroupStatus::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scaling_ignores_read_from_before_the_change() {
        let provider = Arc::new(SimulatedProvider::new());
        let cluster = active_cluster(&provider).await;
        let manager = manager(&provider);
        manager
            .add_node_group(&cluster, NodeGroupInfo::new("pool-a", "m5.large", 1, 0, 3))
            .await
            .unwrap();

        provider.lag_reads(1);
        let scaled = manager
            .change_node_group_scaling(&cluster, &Iid::from_name("pool-a"), 2, 0, 5)
            .await
            .unwrap();
        assert_eq!(scaled.status, NodeGroupStatus::Active);
        assert_eq!(
            (scaled.desired_node_size, scaled.min_node_size, scaled.max_node_size),
            (2, 0, 5)
        );

        assert!(manager
            .set_node_group_auto_scaling(&cluster, &Iid::from_name("pool-a"), true)
            .await
            .unwrap());
        let pool = manager
            .get_node_group(&cluster, &Iid::from_name("pool-a"))
            .await
            .unwrap();
        assert!(pool.on_auto_scaling);
        assert_eq!(pool.status, NodeGroupStatus::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_autoscaled_group_settles_on_bounds_only() {
        let provider = Arc::new(SimulatedProvider::new());
        let cluster = active_cluster(&provider).await;
        let manager = manager(&provider);
        let mut spec = NodeGroupInfo::new("pool-a", "m5.large", 1, 0, 3);
        spec.on_auto_scaling = true;
        manager.add_node_group(&cluster, spec).await.unwrap();

        let scaled = manager
            .change_node_group_scaling(&cluster, &Iid::from_name("pool-a"), 2, 1, 6)
            .await
            .unwrap();
        assert_eq!((scaled.min_node_size, scaled.max_node_size), (1, 6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_errored_node_group_with_lagging_reads() {
        let provider = Arc::new(SimulatedProvider::new());
        let cluster = active_cluster(&provider).await;
        let manager = manager(&provider);
        provider.fail_resource("pool-bad");

        let err = manager
            .add_node_group(&cluster, NodeGroupInfo::new("pool-bad", "m5.large", 1, 0, 3))
            .await
            .unwrap_err();
        assert!(matches!(err, PmksError::ProviderRejected { .. }));

        provider.lag_reads(1);
        assert!(manager
            .remove_node_group(&cluster, &Iid::from_name("pool-bad"))
            .await
            .unwrap());
        assert!(manager.list_node_group(&cluster).await.unwrap().is_empty());
        assert_eq!(provider.calls("remove_node_group"), 1);
    }
}
