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

#[cfg(test)]
mod tests {
    use pmks_kube::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    }

    fn test_policy() -> PollPolicy {
        PollPolicy::uniform(PollConfig::fixed(
            Duration::from_secs(10),
            Duration::from_secs(300),
        ))
    }

    fn setup() -> (Arc<SimulatedProvider>, ClusterLifecycleManager) {
        init_tracing();
        let provider = Arc::new(SimulatedProvider::new().with_versions(["1.30.2", "1.31.0"]));
        let manager = ClusterLifecycleManager::new(provider.clone(), test_policy());
        (provider, manager)
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_lifecycle() {
        let (provider, manager) = setup();
        let cluster_iid = Iid::from_name("cluster-1");

        let created = manager
            .create_cluster(ClusterInfo::new("cluster-1", "1.30.2"))
            .await
            .unwrap();
        assert_eq!(created.status, ClusterStatus::Active);
        assert!(created.access_info.is_some());

        let node_groups = manager.node_groups();
        node_groups
            .add_node_group(
                &cluster_iid,
                NodeGroupInfo::new("pool-a", "ecs.c6.xlarge", 1, 0, 3),
            )
            .await
            .unwrap();

        let listed = node_groups.list_node_group(&cluster_iid).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].iid.name, "pool-a");
        assert_eq!(listed[0].status, NodeGroupStatus::Active);

        let scaled = node_groups
            .change_node_group_scaling(&cluster_iid, &Iid::from_name("pool-a"), 2, 0, 5)
            .await
            .unwrap();
        assert_eq!(scaled.desired_node_size, 2);
        assert_eq!(scaled.max_node_size, 5);
        assert_eq!(scaled.nodes.len(), 2);

        let upgraded = manager.upgrade_cluster(&cluster_iid, "1.31.0").await.unwrap();
        assert_eq!(upgraded.version, "1.31.0");

        assert!(node_groups
            .remove_node_group(&cluster_iid, &Iid::from_name("pool-a"))
            .await
            .unwrap());
        assert!(node_groups
            .list_node_group(&cluster_iid)
            .await
            .unwrap()
            .is_empty());

        assert!(manager.delete_cluster(&cluster_iid).await.unwrap());
        assert!(manager.list_cluster().await.unwrap().is_empty());
        assert_eq!(provider.calls("delete_cluster"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_twice_makes_one_mutating_call() {
        let (provider, manager) = setup();
        let created = manager
            .create_cluster(ClusterInfo::new("cluster-1", "1.30.2"))
            .await
            .unwrap();

        assert!(manager.delete_cluster(&created.iid).await.unwrap());
        assert!(manager.delete_cluster(&created.iid).await.unwrap());
        assert_eq!(provider.calls("delete_cluster"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_waits_on_cluster_already_deleting() {
        let (provider, manager) = setup();
        let created = manager
            .create_cluster(ClusterInfo::new("cluster-1", "1.30.2"))
            .await
            .unwrap();

        provider.delete_cluster(&created.iid).await.unwrap();
        assert!(manager.delete_cluster(&created.iid).await.unwrap());
        assert_eq!(provider.calls("delete_cluster"), 1);
        assert!(manager.list_cluster().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_node_group_change_on_creating_cluster_is_busy() {
        let (provider, manager) = setup();
        let created = provider
            .create_cluster(ClusterInfo::new("cluster-1", "1.30.2"))
            .await
            .unwrap();

        let err = manager
            .node_groups()
            .add_node_group(&created.iid, NodeGroupInfo::new("pool-a", "m5.large", 1, 0, 3))
            .await
            .unwrap_err();
        assert!(matches!(err, PmksError::ClusterBusy { .. }));
        assert_eq!(err.class(), ErrorClass::Converging);
        assert!(err.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_bounds_rejected_before_any_call() {
        let (provider, manager) = setup();
        let before = provider.total_calls();

        let err = manager
            .node_groups()
            .change_node_group_scaling(
                &Iid::from_name("cluster-1"),
                &Iid::from_name("pool-a"),
                1,
                2,
                3,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PmksError::InvalidScalingBounds { .. }));
        assert!(err.is_validation());
        assert_eq!(provider.total_calls(), before);

        let err = manager
            .create_cluster(
                ClusterInfo::new("cluster-1", "1.30.2")
                    .with_node_group(NodeGroupInfo::new("pool-a", "m5.large", 4, 0, 3)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PmksError::InvalidScalingBounds { .. }));
        assert_eq!(provider.total_calls(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_failure_keeps_cluster() {
        let (provider, manager) = setup();
        provider.fail_resource("pool-broken");

        let err = manager
            .create_cluster(
                ClusterInfo::new("cluster-1", "1.30.2")
                    .with_node_group(NodeGroupInfo::new("pool-ok", "m5.large", 1, 1, 1))
                    .with_node_group(NodeGroupInfo::new("pool-broken", "m5.large", 1, 1, 1)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PmksError::PartialFailure { .. }));

        let cluster = manager
            .get_cluster(&Iid::from_name("cluster-1"))
            .await
            .unwrap();
        assert_eq!(cluster.status, ClusterStatus::Active);
        assert_eq!(provider.calls("delete_cluster"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ambiguous_name_needs_system_id() {
        let (provider, manager) = setup();
        let first = provider
            .create_cluster(ClusterInfo::new("twin", "1.30.2"))
            .await
            .unwrap();
        provider
            .create_cluster(ClusterInfo::new("twin", "1.30.2"))
            .await
            .unwrap();

        let err = manager.get_cluster(&Iid::from_name("twin")).await.unwrap_err();
        assert!(matches!(err, PmksError::AmbiguousName { count: 2, .. }));

        let found = manager
            .get_cluster(&Iid::from_system_id(first.iid.system_id.clone()))
            .await
            .unwrap();
        assert_eq!(found.iid, first.iid);

        let err = manager.get_cluster(&Iid::default()).await.unwrap_err();
        assert!(matches!(err, PmksError::EmptyIdentifier { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_leaves_resource_to_finish() {
        let (provider, manager) = setup();
        provider.freeze(true);

        let err = manager
            .create_cluster(ClusterInfo::new("cluster-1", "1.30.2"))
            .await
            .unwrap_err();
        assert!(matches!(err, PmksError::ProvisioningTimeout { .. }));
        assert_eq!(err.class(), ErrorClass::Converging);

        provider.freeze(false);
        let cluster = manager
            .get_cluster(&Iid::from_name("cluster-1"))
            .await
            .unwrap();
        assert_eq!(cluster.status, ClusterStatus::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ignored_fields_are_dropped() {
        let (_, manager) = setup();
        let mut spec = ClusterInfo::new("cluster-1", "1.30.2");
        spec.network.security_group_iids = vec![Iid::from_system_id("sg-1")];

        let created = manager.create_cluster(spec).await.unwrap();
        assert!(created.network.security_group_iids.is_empty());
    }

    #[tokio::test]
    async fn test_manager_from_conf() {
        let provider = Arc::new(SimulatedProvider::new());
        let mut conf = PmksConf::default();
        conf.poll.create_timeout_secs = 120;

        let manager = ClusterLifecycleManager::from_conf(provider.clone(), &conf).unwrap();
        assert_eq!(manager.policy().create.timeout, Duration::from_secs(120));

        conf.poll.interval_secs = 0;
        assert!(ClusterLifecycleManager::from_conf(provider, &conf).is_err());
    }
}
