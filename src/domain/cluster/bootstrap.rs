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

//! Post-provisioning node configuration.
//!
//! Providers hand back running nodes; anything that must be placed on them
//! afterwards (kubelet flags, registry mirrors, CA bundles) goes through a
//! [`RemoteExecutor`].

use crate::infrastructure::remote::{ConnectionInfo, RemoteExecutor};
use futures::future::join_all;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    Copy { local: PathBuf, remote: String },
    Run(String),
}

impl Step {
    fn describe(&self) -> String {
        match self {
            Step::Copy { local, remote } => format!("copy {} -> {}", local.display(), remote),
            Step::Run(command) => format!("run `{}`", command),
        }
    }
}

/// Outcome for a single host. Steps stop at the first failure.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HostReport {
    pub host: String,
    pub completed: usize,
    pub outputs: Vec<String>,
    pub error: Option<String>,
}

impl HostReport {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BootstrapReport {
    pub hosts: Vec<HostReport>,
}

impl BootstrapReport {
    pub fn all_succeeded(&self) -> bool {
        self.hosts.iter().all(HostReport::succeeded)
    }

    pub fn failed_hosts(&self) -> Vec<&str> {
        self.hosts
            .iter()
            .filter(|h| !h.succeeded())
            .map(|h| h.host.as_str())
            .collect()
    }
}

/// File copies followed by commands, applied to every given host.
pub struct NodeBootstrap {
    executor: Arc<dyn RemoteExecutor>,
    copies: Vec<Step>,
    commands: Vec<Step>,
}

impl NodeBootstrap {
    pub fn new(executor: Arc<dyn RemoteExecutor>) -> Self {
        Self {
            executor,
            copies: Vec::new(),
            commands: Vec::new(),
        }
    }

    pub fn copy(mut self, local: impl Into<PathBuf>, remote: impl Into<String>) -> Self {
        self.copies.push(Step::Copy {
            local: local.into(),
            remote: remote.into(),
        });
        self
    }

    pub fn run(mut self, command: impl Into<String>) -> Self {
        self.commands.push(Step::Run(command.into()));
        self
    }

    /// Hosts are handled concurrently; one failing host does not stop the
    /// others.
    pub async fn apply(&self, hosts: &[ConnectionInfo]) -> BootstrapReport {
        info!(
            hosts = hosts.len(),
            steps = self.copies.len() + self.commands.len(),
            "Bootstrapping nodes"
        );
        let reports = join_all(hosts.iter().map(|conn| self.apply_host(conn))).await;
        BootstrapReport { hosts: reports }
    }

    async fn apply_host(&self, conn: &ConnectionInfo) -> HostReport {
        let mut report = HostReport {
            host: conn.host.clone(),
            ..Default::default()
        };

        for step in self.copies.iter().chain(self.commands.iter()) {
            let result = match step {
                Step::Copy { local, remote } => self
                    .executor
                    .copy_file(conn, local, remote)
                    .await
                    .map(|_| None),
                Step::Run(command) => self.executor.run_command(conn, command).await.map(Some),
            };
            match result {
                Ok(output) => {
                    report.completed += 1;
                    report.outputs.extend(output);
                }
                Err(e) => {
                    warn!(host = %conn.host, step = %step.describe(), error = %e, "Bootstrap step failed");
                    report.error = Some(format!("{}: {}", step.describe(), e));
                    break;
                }
            }
        }
        report
    }
}
