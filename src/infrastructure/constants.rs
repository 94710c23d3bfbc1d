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

/// Cluster API group served by the management cluster
pub const CAPI_GROUP: &str = "cluster.x-k8s.io";
pub const CAPI_VERSION: &str = "v1beta1";
pub const CAPI_API_VERSION: &str = "cluster.x-k8s.io/v1beta1";

/// Kinds
pub const KIND_CLUSTER: &str = "Cluster";
pub const KIND_MACHINE_POOL: &str = "MachinePool";

/// Labels set by the CAPI topology controller
pub const LABEL_CLUSTER_NAME: &str = "cluster.x-k8s.io/cluster-name";
pub const LABEL_TOPOLOGY_POOL_NAME: &str = "topology.cluster.x-k8s.io/pool-name";

/// Resource labels
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
pub const LABEL_MANAGED_BY_VALUE: &str = "pmks-kube";

/// cluster-autoscaler node group bounds
pub const ANNOTATION_AUTOSCALER_MIN: &str = "cluster.x-k8s.io/cluster-api-autoscaler-node-group-min-size";
pub const ANNOTATION_AUTOSCALER_MAX: &str = "cluster.x-k8s.io/cluster-api-autoscaler-node-group-max-size";

/// Scaling bounds kept on the pool while autoscaling is off
pub const ANNOTATION_MIN_SIZE: &str = "pmks.io/min-size";
pub const ANNOTATION_MAX_SIZE: &str = "pmks.io/max-size";

/// Topology variables
pub const VARIABLE_INSTANCE_TYPE: &str = "instanceType";
pub const VARIABLE_VPC_ID: &str = "vpcId";
pub const VARIABLE_SUBNET_IDS: &str = "subnetIds";

/// Kubeconfig secret written by CAPI for each workload cluster
pub const KUBECONFIG_SECRET_SUFFIX: &str = "-kubeconfig";
pub const KUBECONFIG_SECRET_KEY: &str = "value";
