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

use crate::domain::config::CapiConf;
use crate::infrastructure::constants::{
    CAPI_API_VERSION, CAPI_GROUP, CAPI_VERSION, KIND_CLUSTER, KIND_MACHINE_POOL,
    KUBECONFIG_SECRET_KEY, KUBECONFIG_SECRET_SUFFIX,
};
use crate::infrastructure::provider::{AdapterError, AdapterErrorKind};
use k8s_openapi::api::core::v1::Secret;
use kube::api::{DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::discovery::ApiResource;
use kube::{Api, Client};

/// Cluster API kinds this crate reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CapiKind {
    Cluster,
    MachinePool,
}

impl CapiKind {
    pub fn api_resource(&self) -> ApiResource {
        let (kind, plural) = match self {
            CapiKind::Cluster => (KIND_CLUSTER, "clusters"),
            CapiKind::MachinePool => (KIND_MACHINE_POOL, "machinepools"),
        };
        ApiResource {
            group: CAPI_GROUP.to_string(),
            version: CAPI_VERSION.to_string(),
            api_version: CAPI_API_VERSION.to_string(),
            kind: kind.to_string(),
            plural: plural.to_string(),
        }
    }
}

impl From<kube::Error> for AdapterError {
    fn from(e: kube::Error) -> Self {
        match e {
            kube::Error::Api(ae) => {
                let kind = match ae.code {
                    404 => AdapterErrorKind::NotFound,
                    409 => AdapterErrorKind::Conflict,
                    429 => AdapterErrorKind::RateLimited,
                    400 | 422 => AdapterErrorKind::Invalid,
                    500..=599 => AdapterErrorKind::Unavailable,
                    _ => AdapterErrorKind::Other,
                };
                AdapterError::new(kind, format!("{}: {}", ae.reason, ae.message))
            }
            other => AdapterError::new(AdapterErrorKind::Unavailable, other.to_string()),
        }
    }
}

/// Namespaced access to CAPI objects on the management cluster.
#[async_trait::async_trait]
pub trait PmksKubeClient: Send + Sync {
    async fn get(&self, kind: CapiKind, name: &str) -> Result<DynamicObject, AdapterError>;

    async fn list(
        &self,
        kind: CapiKind,
        label_selector: Option<&str>,
    ) -> Result<Vec<DynamicObject>, AdapterError>;

    async fn create(&self, kind: CapiKind, obj: &DynamicObject) -> Result<DynamicObject, AdapterError>;

    /// JSON merge patch. A `metadata.resourceVersion` in the patch makes it
    /// conditional.
    async fn merge_patch(
        &self,
        kind: CapiKind,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<DynamicObject, AdapterError>;

    async fn delete(&self, kind: CapiKind, name: &str) -> Result<(), AdapterError>;

    /// Admin kubeconfig CAPI stores for a workload cluster, once it exists.
    async fn kubeconfig(&self, cluster: &str) -> Result<Option<String>, AdapterError>;
}

pub struct PmksKubeClientImpl {
    client: Client,
    namespace: String,
    field_manager: String,
}

impl PmksKubeClientImpl {
    pub async fn new(namespace: String, field_manager: String) -> Result<Self, AdapterError> {
        let client = Client::try_default().await.map_err(|e| {
            AdapterError::new(
                AdapterErrorKind::Unavailable,
                format!("Failed to create Kubernetes client: {}", e),
            )
        })?;

        Ok(Self {
            client,
            namespace,
            field_manager,
        })
    }

    pub async fn new_with_config(
        namespace: String,
        field_manager: String,
        kubeconfig_path: Option<String>,
        context: Option<String>,
    ) -> Result<Self, AdapterError> {
        use kube::config::{KubeConfigOptions, Kubeconfig};

        let unavailable = |what: &str, e: &dyn std::fmt::Display| {
            AdapterError::new(AdapterErrorKind::Unavailable, format!("{}: {}", what, e))
        };

        let kubeconfig = if let Some(path) = kubeconfig_path {
            Kubeconfig::read_from(path).map_err(|e| unavailable("Failed to load kubeconfig", &e))?
        } else {
            Kubeconfig::read().map_err(|e| unavailable("Failed to load kubeconfig", &e))?
        };

        let config_options = KubeConfigOptions {
            context,
            cluster: None,
            user: None,
        };

        let config = kube::Config::from_custom_kubeconfig(kubeconfig, &config_options)
            .await
            .map_err(|e| unavailable("Failed to create Kubernetes config", &e))?;

        let client = Client::try_from(config)
            .map_err(|e| unavailable("Failed to create Kubernetes client", &e))?;

        Ok(Self {
            client,
            namespace,
            field_manager,
        })
    }

    /// In-cluster or default kubeconfig unless the configuration names one.
    pub async fn from_conf(conf: &CapiConf) -> Result<Self, AdapterError> {
        if conf.kubeconfig.is_none() && conf.context.is_none() {
            Self::new(conf.namespace.clone(), conf.field_manager.clone()).await
        } else {
            Self::new_with_config(
                conf.namespace.clone(),
                conf.field_manager.clone(),
                conf.kubeconfig.clone(),
                conf.context.clone(),
            )
            .await
        }
    }

    fn api(&self, kind: CapiKind) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), &self.namespace, &kind.api_resource())
    }
}

#[async_trait::async_trait]
impl PmksKubeClient for PmksKubeClientImpl {
    async fn get(&self, kind: CapiKind, name: &str) -> Result<DynamicObject, AdapterError> {
        Ok(self.api(kind).get(name).await?)
    }

    async fn list(
        &self,
        kind: CapiKind,
        label_selector: Option<&str>,
    ) -> Result<Vec<DynamicObject>, AdapterError> {
        let lp = match label_selector {
            Some(selector) => ListParams::default().labels(selector),
            None => ListParams::default(),
        };
        Ok(self.api(kind).list(&lp).await?.items)
    }

    async fn create(&self, kind: CapiKind, obj: &DynamicObject) -> Result<DynamicObject, AdapterError> {
        let pp = PostParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        };
        Ok(self.api(kind).create(&pp, obj).await?)
    }

    async fn merge_patch(
        &self,
        kind: CapiKind,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<DynamicObject, AdapterError> {
        let params = PatchParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        };
        Ok(self.api(kind).patch(name, &params, &Patch::Merge(patch)).await?)
    }

    async fn delete(&self, kind: CapiKind, name: &str) -> Result<(), AdapterError> {
        self.api(kind).delete(name, &DeleteParams::background()).await?;
        Ok(())
    }

    async fn kubeconfig(&self, cluster: &str) -> Result<Option<String>, AdapterError> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), &self.namespace);
        let name = format!("{}{}", cluster, KUBECONFIG_SECRET_SUFFIX);
        let Some(secret) = secrets.get_opt(&name).await? else {
            return Ok(None);
        };
        Ok(secret
            .data
            .and_then(|data| data.get(KUBECONFIG_SECRET_KEY).cloned())
            .map(|value| String::from_utf8_lossy(&value.0).into_owned()))
    }
}
