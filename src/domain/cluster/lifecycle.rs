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

use crate::domain::capability::Field;
use crate::domain::cluster::node_group::NodeGroupManager;
use crate::domain::cluster::resolve_cluster;
use crate::domain::cluster::validator::SpecValidator;
use crate::domain::config::PmksConf;
use crate::domain::identity::{Iid, ResourceKind};
use crate::domain::model::{ClusterInfo, ClusterStatus, NodeGroupInfo, NodeGroupStatus};
use crate::domain::poller::{PollConfig, PollPolicy, StatusPoller};
use crate::domain::version::KubeVersion;
use crate::infrastructure::provider::ProviderAdapter;
use crate::shared::error::{PmksError, Result};
use futures::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

const CREATE: &str = "create_cluster";
const LIST: &str = "list_cluster";
const GET: &str = "get_cluster";
const UPGRADE: &str = "upgrade_cluster";
const DELETE: &str = "delete_cluster";

/// Drives clusters through `Creating -> Active -> (Updating -> Active)* -> Deleting`.
///
/// Every read goes back to the provider; nothing is cached between calls.
pub struct ClusterLifecycleManager {
    adapter: Arc<dyn ProviderAdapter>,
    policy: PollPolicy,
    validator: SpecValidator,
    node_groups: NodeGroupManager,
}

impl ClusterLifecycleManager {
    pub fn new(adapter: Arc<dyn ProviderAdapter>, policy: PollPolicy) -> Self {
        let validator = SpecValidator::new(adapter.capabilities().max_minor_skew);
        let node_groups = NodeGroupManager::new(adapter.clone(), policy.node_group);
        Self {
            adapter,
            policy,
            validator,
            node_groups,
        }
    }

    pub fn from_conf(adapter: Arc<dyn ProviderAdapter>, conf: &PmksConf) -> Result<Self> {
        conf.validate()?;
        Ok(Self::new(adapter, conf.poll.policy()))
    }

    /// Node group operations sharing this manager's adapter.
    pub fn node_groups(&self) -> &NodeGroupManager {
        &self.node_groups
    }

    pub fn policy(&self) -> &PollPolicy {
        &self.policy
    }

    pub async fn list_cluster(&self) -> Result<Vec<ClusterInfo>> {
        self.adapter
            .list_cluster()
            .await
            .map_err(|e| e.into_pmks(LIST, ResourceKind::Cluster, &Iid::default()))
    }

    pub async fn get_cluster(&self, iid: &Iid) -> Result<ClusterInfo> {
        let found = resolve_cluster(self.adapter.as_ref(), GET, iid).await?;
        self.adapter
            .get_cluster(&found.iid)
            .await
            .map_err(|e| e.into_pmks(GET, ResourceKind::Cluster, &found.iid))
    }

    /// Create a cluster and wait until it and its requested node groups settle.
    ///
    /// The cluster is never rolled back: if it reaches `Active` but some
    /// requested node group does not, the result is
    /// [`PmksError::PartialFailure`] carrying the cluster as it stands.
    pub async fn create_cluster(&self, mut spec: ClusterInfo) -> Result<ClusterInfo> {
        self.validator.validate_cluster(CREATE, &spec)?;

        let existing = self
            .adapter
            .list_cluster()
            .await
            .map_err(|e| e.into_pmks(CREATE, ResourceKind::Cluster, &spec.iid))?;
        if existing.iter().any(|c| c.iid.name == spec.iid.name) {
            return Err(PmksError::already_exists(
                CREATE,
                ResourceKind::Cluster,
                spec.iid.name.clone(),
            ));
        }

        let capabilities = *self.adapter.capabilities();
        capabilities.sanitize_cluster(&mut spec);

        let deferred: Vec<NodeGroupInfo> = if capabilities.honors(Field::InitialNodeGroups) {
            Vec::new()
        } else {
            std::mem::take(&mut spec.node_groups)
        };
        if !deferred.is_empty() {
            info!(
                cluster = %spec.iid,
                count = deferred.len(),
                provider = capabilities.provider,
                "Node groups will be added once the cluster is Active"
            );
        }
        let inline: Vec<String> = spec
            .node_groups
            .iter()
            .map(|ng| ng.iid.name.clone())
            .collect();

        info!(cluster = %spec.iid, version = %spec.version, "Creating cluster");
        let requested = spec.iid.clone();
        let created = self
            .adapter
            .create_cluster(spec)
            .await
            .map_err(|e| e.into_pmks(CREATE, ResourceKind::Cluster, &requested))?;

        let cluster = self
            .wait_for_cluster(CREATE, &created.iid, &self.policy.create, |c| {
                matches!(c.status, ClusterStatus::Active | ClusterStatus::Error)
            })
            .await?;
        if cluster.status != ClusterStatus::Active {
            return Err(PmksError::provider_rejected(
                CREATE,
                cluster.iid,
                format!("cluster settled in {} state", cluster.status),
            ));
        }
        info!(cluster = %cluster.iid, "Cluster is Active");

        let mut failed = self.settle_inline_node_groups(&cluster, &inline).await;
        for node_group in deferred {
            let name = node_group.iid.name.clone();
            if let Err(e) = self.node_groups.submit_and_settle(&cluster.iid, node_group).await {
                warn!(cluster = %cluster.iid, node_group = %name, error = %e, "Requested node group failed");
                failed.push(name);
            }
        }

        let cluster = self
            .adapter
            .get_cluster(&cluster.iid)
            .await
            .map_err(|e| e.into_pmks(CREATE, ResourceKind::Cluster, &cluster.iid))?;
        if failed.is_empty() {
            Ok(cluster)
        } else {
            Err(PmksError::PartialFailure {
                op: CREATE,
                cluster: Box::new(cluster),
                failed,
            })
        }
    }

    /// Wait on every node group created together with the cluster and return
    /// the names of those that did not become `Active`.
    async fn settle_inline_node_groups(&self, cluster: &ClusterInfo, requested: &[String]) -> Vec<String> {
        let waits = requested.iter().map(|name| async move {
            let found = cluster.node_groups.iter().find(|ng| &ng.iid.name == name);
            let outcome = match found {
                Some(ng) if ng.status == NodeGroupStatus::Active => Ok(ng.clone()),
                Some(ng) => {
                    self.node_groups
                        .wait_for_settled(CREATE, &cluster.iid, &ng.iid, |_| true)
                        .await
                }
                None => Err(PmksError::not_found(
                    CREATE,
                    ResourceKind::NodeGroup,
                    Iid::from_name(name.as_str()),
                )),
            };
            (name, outcome)
        });

        join_all(waits)
            .await
            .into_iter()
            .filter_map(|(name, outcome)| match outcome {
                Ok(ng) if ng.status == NodeGroupStatus::Active => None,
                Ok(ng) => {
                    warn!(node_group = %ng.iid, status = %ng.status, "Requested node group did not become Active");
                    Some(name.clone())
                }
                Err(e) => {
                    warn!(node_group = %name, error = %e, "Requested node group failed");
                    Some(name.clone())
                }
            })
            .collect()
    }

    /// Move an `Active` cluster to `target_version` and wait for it to come
    /// back `Active` on that version.
    pub async fn upgrade_cluster(&self, iid: &Iid, target_version: &str) -> Result<ClusterInfo> {
        let cluster = resolve_cluster(self.adapter.as_ref(), UPGRADE, iid).await?;
        self.validator
            .validate_upgrade(UPGRADE, &cluster, target_version)?;

        info!(
            cluster = %cluster.iid,
            from = %cluster.version,
            to = target_version,
            "Upgrading cluster"
        );
        self.adapter
            .upgrade_cluster(&cluster.iid, target_version)
            .await
            .map_err(|e| e.into_pmks(UPGRADE, ResourceKind::Cluster, &cluster.iid))?;

        let target: Option<KubeVersion> = target_version.parse().ok();
        let upgraded = self
            .wait_for_cluster(UPGRADE, &cluster.iid, &self.policy.update, |c| match c.status {
                ClusterStatus::Error => true,
                ClusterStatus::Active => on_version(c, target_version, target.as_ref()),
                _ => false,
            })
            .await?;
        if upgraded.status != ClusterStatus::Active {
            return Err(PmksError::provider_rejected(
                UPGRADE,
                upgraded.iid,
                format!("upgrade to {} ended in {} state", target_version, upgraded.status),
            ));
        }
        info!(cluster = %upgraded.iid, version = %upgraded.version, "Cluster upgraded");
        Ok(upgraded)
    }

    /// Delete a cluster and wait for it to disappear.
    ///
    /// A cluster that is already gone counts as deleted. A cluster already in
    /// `Deleting` is waited on without a second delete request.
    pub async fn delete_cluster(&self, iid: &Iid) -> Result<bool> {
        let cluster = match resolve_cluster(self.adapter.as_ref(), DELETE, iid).await {
            Ok(cluster) => cluster,
            Err(PmksError::NotFound { .. }) => {
                info!(cluster = %iid, "Cluster not found, nothing to delete");
                return Ok(true);
            }
            Err(e) => return Err(e),
        };

        match cluster.status {
            ClusterStatus::Deleted => return Ok(true),
            ClusterStatus::Deleting => {
                info!(cluster = %cluster.iid, "Cluster already deleting, waiting");
            }
            _ => {
                info!(cluster = %cluster.iid, status = %cluster.status, "Deleting cluster");
                match self.adapter.delete_cluster(&cluster.iid).await {
                    Ok(true) => {}
                    Ok(false) => {
                        warn!(cluster = %cluster.iid, "Provider declined delete");
                        return Ok(false);
                    }
                    Err(e) if e.is_not_found() => return Ok(true),
                    Err(e) => return Err(e.into_pmks(DELETE, ResourceKind::Cluster, &cluster.iid)),
                }
            }
        }

        self.wait_for_cluster_gone(&cluster.iid, cluster.status).await?;
        info!(cluster = %cluster.iid, "Cluster deleted");
        Ok(true)
    }

    async fn wait_for_cluster<P>(
        &self,
        op: &'static str,
        iid: &Iid,
        config: &PollConfig,
        is_terminal: P,
    ) -> Result<ClusterInfo>
    where
        P: Fn(&ClusterInfo) -> bool,
    {
        let adapter = self.adapter.as_ref();
        let what = format!("cluster {}", iid);
        let outcome = StatusPoller::new(*config)
            .poll(
                &what,
                move || async move {
                    adapter
                        .get_cluster(iid)
                        .await
                        .map_err(|e| e.into_pmks(op, ResourceKind::Cluster, iid))
                },
                |c: &ClusterInfo| {
                    debug!(cluster = %c.iid, status = %c.status, "Observed cluster");
                    is_terminal(c)
                },
            )
            .await;
        outcome.into_terminal(op, iid, |c| c.status.to_string())
    }

    /// `Error` fails the delete, unless the cluster was already in `Error`
    /// and has not yet been seen `Deleting`.
    async fn wait_for_cluster_gone(&self, iid: &Iid, prior: ClusterStatus) -> Result<()> {
        let adapter = self.adapter.as_ref();
        let seen_deleting = AtomicBool::new(prior == ClusterStatus::Deleting);
        let what = format!("deletion of cluster {}", iid);
        let outcome = StatusPoller::new(self.policy.delete)
            .poll(
                &what,
                move || async move {
                    match adapter.get_cluster(iid).await {
                        Ok(c) if c.status == ClusterStatus::Deleted => Ok(None),
                        Ok(c) => Ok(Some(c)),
                        Err(e) if e.is_not_found() => Ok(None),
                        Err(e) => Err(e.into_pmks(DELETE, ResourceKind::Cluster, iid)),
                    }
                },
                |c: &Option<ClusterInfo>| match c.as_ref().map(|c| c.status) {
                    None => true,
                    Some(ClusterStatus::Deleting) => {
                        seen_deleting.store(true, Ordering::Relaxed);
                        false
                    }
                    Some(ClusterStatus::Error) => {
                        prior != ClusterStatus::Error || seen_deleting.load(Ordering::Relaxed)
                    }
                    Some(_) => false,
                },
            )
            .await;

        match outcome.into_terminal(DELETE, iid, |c| {
            c.as_ref()
                .map_or_else(|| "absent".to_string(), |c| c.status.to_string())
        })? {
            None => Ok(()),
            Some(c) => Err(PmksError::provider_rejected(
                DELETE,
                c.iid,
                "cluster entered Error state while deleting",
            )),
        }
    }
}

/// Providers may decorate the reported version (`1.31.1-aliyun.1`), so the
/// comparison is on parsed versions when both sides parse.
fn on_version(cluster: &ClusterInfo, target: &str, parsed: Option<&KubeVersion>) -> bool {
    match (cluster.version.parse::<KubeVersion>().ok(), parsed) {
        (Some(current), Some(target)) => {
            (current.major, current.minor, current.patch) == (target.major, target.minor, target.patch)
        }
        _ => cluster.version == target,
    }
}
