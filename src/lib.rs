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

//! Provider-agnostic lifecycle management for managed Kubernetes clusters.
//!
//! Callers drive clusters and node groups through [`ClusterLifecycleManager`]
//! and [`NodeGroupManager`]; each provider plugs in as a [`ProviderAdapter`]
//! declaring which optional fields it honors in a [`CapabilityDescriptor`].

// Core modules
pub mod domain;
pub mod infrastructure;
pub mod shared;

// Re-export commonly used types
pub use domain::capability::{CapabilityDescriptor, DroppedField, Field, FieldSupport};
pub use domain::cluster::{
    BootstrapReport, ClusterLifecycleManager, HostReport, NodeBootstrap, NodeGroupManager,
    SpecValidator,
};
pub use domain::config::{apply_overrides, parse_overrides, CapiConf, PmksConf, PollConf, SshConf};
pub use domain::identity::{Iid, Identified, ResourceKind};
pub use domain::model::{
    AccessInfo, ClusterInfo, ClusterStatus, KeyValue, NetworkInfo, NodeGroupInfo, NodeGroupStatus,
};
pub use domain::poller::{PollConfig, PollOutcome, PollPolicy, PollTermination, StatusPoller};
pub use domain::version::KubeVersion;
pub use infrastructure::kubernetes::{CapiAdapter, PmksKubeClient, PmksKubeClientImpl};
pub use infrastructure::provider::{AdapterError, AdapterErrorKind, AdapterResult, ProviderAdapter};
pub use infrastructure::remote::{ConnectionInfo, RemoteError, RemoteExecutor, SshExecutor};
pub use infrastructure::simulated::SimulatedProvider;
pub use shared::{ErrorClass, PmksError, Result};
