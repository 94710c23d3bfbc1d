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

//! Type definitions for pmks configuration

use crate::domain::poller::{PollConfig, PollPolicy};
use crate::infrastructure::remote::{ConnectionInfo, SshExecutor};
use crate::shared::error::{PmksError, Result};
use serde::{Deserialize, Serialize};
use std::fs::read_to_string;
use std::path::Path;
use std::time::Duration;

// ============================================================================
// Main configuration
// ============================================================================

/// Configuration handed to managers and adapters at construction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PmksConf {
    pub poll: PollConf,
    pub capi: Option<CapiConf>,
    pub ssh: SshConf,
}

impl PmksConf {
    /// Load configuration from a TOML file, or YAML when the extension is
    /// `.yaml` / `.yml`.
    pub fn from<T: AsRef<str>>(path: T) -> Result<Self> {
        let path = path.as_ref();
        let content = read_to_string(path)
            .map_err(|e| PmksError::config_error(format!("Failed to read config file {}: {}", path, e)))?;

        let is_yaml = Path::new(path)
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"));

        let conf: Self = if is_yaml {
            serde_yaml::from_str(&content)?
        } else {
            toml::from_str(&content)?
        };
        conf.validate()?;
        Ok(conf)
    }

    pub fn validate(&self) -> Result<()> {
        self.poll.validate()?;
        if let Some(capi) = &self.capi {
            capi.validate()?;
        }
        self.ssh.validate()
    }
}

// ============================================================================
// Polling
// ============================================================================

/// Poll cadence and per-operation budgets, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConf {
    pub interval_secs: u64,
    pub max_interval_secs: u64,
    pub backoff_factor: f32,
    pub create_timeout_secs: u64,
    pub update_timeout_secs: u64,
    pub delete_timeout_secs: u64,
    pub node_group_timeout_secs: u64,
}

impl Default for PollConf {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            max_interval_secs: 30,
            backoff_factor: 1.5,
            create_timeout_secs: 30 * 60,
            update_timeout_secs: 45 * 60,
            delete_timeout_secs: 20 * 60,
            node_group_timeout_secs: 20 * 60,
        }
    }
}

impl PollConf {
    fn validate(&self) -> Result<()> {
        if self.interval_secs == 0 {
            return Err(PmksError::config_error("poll.interval_secs must be positive"));
        }
        if self.max_interval_secs < self.interval_secs {
            return Err(PmksError::config_error(
                "poll.max_interval_secs must not be below poll.interval_secs",
            ));
        }
        if self.backoff_factor.is_nan() || self.backoff_factor < 1.0 {
            return Err(PmksError::config_error("poll.backoff_factor must be >= 1.0"));
        }
        let timeouts = [
            ("create", self.create_timeout_secs),
            ("update", self.update_timeout_secs),
            ("delete", self.delete_timeout_secs),
            ("node_group", self.node_group_timeout_secs),
        ];
        match timeouts.iter().find(|(_, secs)| *secs == 0) {
            Some((name, _)) => Err(PmksError::config_error(format!(
                "poll.{}_timeout_secs must be positive",
                name
            ))),
            None => Ok(()),
        }
    }

    fn config(&self, timeout_secs: u64) -> PollConfig {
        PollConfig {
            interval: Duration::from_secs(self.interval_secs),
            max_interval: Duration::from_secs(self.max_interval_secs),
            backoff_factor: self.backoff_factor,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub fn policy(&self) -> PollPolicy {
        PollPolicy {
            create: self.config(self.create_timeout_secs),
            update: self.config(self.update_timeout_secs),
            delete: self.config(self.delete_timeout_secs),
            node_group: self.config(self.node_group_timeout_secs),
        }
    }
}

// ============================================================================
// Cluster API
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapiConf {
    /// Namespace holding the `Cluster` objects on the management cluster.
    pub namespace: String,
    pub kubeconfig: Option<String>,
    pub context: Option<String>,
    pub cluster_class: String,
    /// Worker class used for machine pools added through this crate.
    pub machine_pool_class: String,
    pub field_manager: String,
}

impl Default for CapiConf {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            kubeconfig: None,
            context: None,
            cluster_class: "quick-start".to_string(),
            machine_pool_class: "default-worker".to_string(),
            field_manager: "pmks-kube".to_string(),
        }
    }
}

impl CapiConf {
    fn validate(&self) -> Result<()> {
        let required = [
            ("capi.namespace", &self.namespace),
            ("capi.cluster_class", &self.cluster_class),
            ("capi.machine_pool_class", &self.machine_pool_class),
            ("capi.field_manager", &self.field_manager),
        ];
        match required.iter().find(|(_, value)| value.trim().is_empty()) {
            Some((key, _)) => Err(PmksError::config_error(format!("{} must not be empty", key))),
            None => Ok(()),
        }
    }
}

// ============================================================================
// SSH
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConf {
    pub user: String,
    pub private_key: Option<String>,
    pub port: u16,
    pub connect_timeout_secs: u64,
    pub command_timeout_secs: u64,
}

impl Default for SshConf {
    fn default() -> Self {
        Self {
            user: "root".to_string(),
            private_key: None,
            port: 22,
            connect_timeout_secs: 10,
            command_timeout_secs: 300,
        }
    }
}

impl SshConf {
    fn validate(&self) -> Result<()> {
        if self.user.trim().is_empty() {
            return Err(PmksError::config_error("ssh.user must not be empty"));
        }
        if self.port == 0 || self.connect_timeout_secs == 0 || self.command_timeout_secs == 0 {
            return Err(PmksError::config_error(
                "ssh.port and ssh timeouts must be positive",
            ));
        }
        Ok(())
    }

    pub fn executor(&self) -> SshExecutor {
        SshExecutor::new(
            Duration::from_secs(self.connect_timeout_secs),
            Duration::from_secs(self.command_timeout_secs),
        )
    }

    pub fn connection(&self, host: impl Into<String>) -> ConnectionInfo {
        let conn = ConnectionInfo::new(host, self.user.clone()).with_port(self.port);
        match &self.private_key {
            Some(key) => conn.with_private_key(key),
            None => conn,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::Builder;

    #[test]
    fn test_defaults_are_valid() {
        let conf = PmksConf::default();
        assert!(conf.validate().is_ok());
        assert_eq!(conf.poll.policy(), PollPolicy::default());
    }

    #[test]
    fn test_load_toml() {
        let mut file = Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[poll]
interval_secs = 5
create_timeout_secs = 600

[capi]
namespace = "clusters"
cluster_class = "aws-eks"

[ssh]
user = "ubuntu"
private_key = "/keys/id_ed25519"
"#
        )
        .unwrap();

        let conf = PmksConf::from(file.path().to_str().unwrap()).unwrap();
        assert_eq!(conf.poll.interval_secs, 5);
        assert_eq!(conf.poll.max_interval_secs, 30);
        assert_eq!(conf.poll.policy().create.timeout, Duration::from_secs(600));

        let capi = conf.capi.unwrap();
        assert_eq!(capi.namespace, "clusters");
        assert_eq!(capi.machine_pool_class, "default-worker");

        let conn = conf.ssh.connection("10.0.0.4");
        assert_eq!(conn.user, "ubuntu");
        assert_eq!(conn.port, 22);
        assert!(conn.private_key.is_some());
    }

    #[test]
    fn test_load_yaml() {
        let mut file = Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "poll:\n  backoff_factor: 2.0\n  delete_timeout_secs: 120\nssh:\n  port: 2222\n"
        )
        .unwrap();

        let conf = PmksConf::from(file.path().to_str().unwrap()).unwrap();
        assert_eq!(conf.poll.backoff_factor, 2.0);
        assert_eq!(conf.poll.delete_timeout_secs, 120);
        assert_eq!(conf.ssh.port, 2222);
        assert!(conf.capi.is_none());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut conf = PmksConf::default();
        conf.poll.backoff_factor = 0.5;
        assert!(matches!(conf.validate(), Err(PmksError::Config(_))));

        let mut conf = PmksConf::default();
        conf.poll.node_group_timeout_secs = 0;
        let err = conf.validate().unwrap_err();
        assert!(err.to_string().contains("node_group_timeout_secs"));

        let mut file = Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[poll]\ninterval_secs = 0").unwrap();
        assert!(PmksConf::from(file.path().to_str().unwrap()).is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = PmksConf::from("/nonexistent/pmks.toml").unwrap_err();
        assert!(matches!(err, PmksError::Config(_)));
    }
}
