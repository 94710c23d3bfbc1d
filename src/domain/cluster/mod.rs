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

//! Cluster and node group lifecycle orchestration.

pub mod bootstrap;
pub mod lifecycle;
pub mod node_group;
pub mod validator;

pub use bootstrap::{BootstrapReport, HostReport, NodeBootstrap};
pub use lifecycle::ClusterLifecycleManager;
pub use node_group::NodeGroupManager;
pub use validator::SpecValidator;

use crate::domain::identity::{resolve, Iid, ResourceKind};
use crate::domain::model::{ClusterInfo, NodeGroupInfo};
use crate::infrastructure::provider::ProviderAdapter;
use crate::shared::error::PmksError;

/// Re-list clusters and resolve `iid` against the fresh set.
pub(crate) async fn resolve_cluster(
    adapter: &dyn ProviderAdapter,
    op: &'static str,
    iid: &Iid,
) -> Result<ClusterInfo, PmksError> {
    if iid.is_empty() {
        return Err(PmksError::EmptyIdentifier {
            op,
            kind: ResourceKind::Cluster,
        });
    }
    let clusters = adapter
        .list_cluster()
        .await
        .map_err(|e| e.into_pmks(op, ResourceKind::Cluster, iid))?;
    resolve(op, ResourceKind::Cluster, &clusters, iid).cloned()
}

/// Re-list the node groups of an already resolved cluster and resolve `iid`.
pub(crate) async fn resolve_node_group(
    adapter: &dyn ProviderAdapter,
    op: &'static str,
    cluster: &Iid,
    iid: &Iid,
) -> Result<NodeGroupInfo, PmksError> {
    if iid.is_empty() {
        return Err(PmksError::EmptyIdentifier {
            op,
            kind: ResourceKind::NodeGroup,
        });
    }
    let node_groups = adapter
        .list_node_group(cluster)
        .await
        .map_err(|e| e.into_pmks(op, ResourceKind::Cluster, cluster))?;
    resolve(op, ResourceKind::NodeGroup, &node_groups, iid).cloned()
}
