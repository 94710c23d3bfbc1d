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

//! Remote command execution on provisioned nodes.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

pub const DEFAULT_SSH_PORT: u16 = 22;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("{host}: failed to execute {program}: {source}")]
    Spawn {
        host: String,
        program: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{host}: timed out after {timeout:?}")]
    Timeout { host: String, timeout: Duration },

    #[error("{host}: exited with {code:?}: {stderr}")]
    Failed {
        host: String,
        code: Option<i32>,
        stderr: String,
    },
}

/// Where and as whom to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub private_key: Option<PathBuf>,
}

impl ConnectionInfo {
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_SSH_PORT,
            user: user.into(),
            private_key: None,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_private_key(mut self, path: impl Into<PathBuf>) -> Self {
        self.private_key = Some(path.into());
        self
    }

    fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

/// Runs commands and copies files on a remote host.
///
/// Each call opens its own channel; no session is kept between calls.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run `command` through the remote shell and return its stdout.
    async fn run_command(&self, conn: &ConnectionInfo, command: &str) -> Result<String, RemoteError>;

    async fn copy_file(
        &self,
        conn: &ConnectionInfo,
        local: &Path,
        remote: &str,
    ) -> Result<(), RemoteError>;
}

/// [`RemoteExecutor`] backed by the OpenSSH `ssh` and `scp` binaries.
#[derive(Debug, Clone)]
pub struct SshExecutor {
    connect_timeout: Duration,
    command_timeout: Duration,
}

impl Default for SshExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT, DEFAULT_COMMAND_TIMEOUT)
    }
}

impl SshExecutor {
    pub fn new(connect_timeout: Duration, command_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            command_timeout,
        }
    }

    /// Options shared by `ssh` and `scp`. Host keys of freshly provisioned
    /// nodes are unknown, so they are accepted on first use.
    fn common_options(&self, conn: &ConnectionInfo) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
        ];
        if let Some(key) = &conn.private_key {
            args.push("-i".to_string());
            args.push(key.display().to_string());
        }
        args
    }

    pub(crate) fn ssh_args(&self, conn: &ConnectionInfo, command: &str) -> Vec<String> {
        let mut args = self.common_options(conn);
        args.push("-p".to_string());
        args.push(conn.port.to_string());
        args.push(conn.destination());
        args.push("--".to_string());
        args.push(command.to_string());
        args
    }

    pub(crate) fn scp_args(&self, conn: &ConnectionInfo, local: &Path, remote: &str) -> Vec<String> {
        let mut args = self.common_options(conn);
        args.push("-P".to_string());
        args.push(conn.port.to_string());
        args.push(local.display().to_string());
        args.push(format!("{}:{}", conn.destination(), remote));
        args
    }

    async fn execute(
        &self,
        host: &str,
        program: &'static str,
        args: &[String],
    ) -> Result<Output, RemoteError> {
        debug!(host, program, "Running remote command");
        let mut cmd = Command::new(program);
        cmd.args(args).kill_on_drop(true);

        let output = tokio::time::timeout(self.command_timeout, cmd.output())
            .await
            .map_err(|_| {
                warn!(host, program, timeout = ?self.command_timeout, "Remote command timed out");
                RemoteError::Timeout {
                    host: host.to_string(),
                    timeout: self.command_timeout,
                }
            })?
            .map_err(|source| RemoteError::Spawn {
                host: host.to_string(),
                program,
                source,
            })?;

        if output.status.success() {
            Ok(output)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(host, program, %stderr, "Remote command failed");
            Err(RemoteError::Failed {
                host: host.to_string(),
                code: output.status.code(),
                stderr,
            })
        }
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn run_command(&self, conn: &ConnectionInfo, command: &str) -> Result<String, RemoteError> {
        let output = self
            .execute(&conn.host, "ssh", &self.ssh_args(conn, command))
            .await?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    async fn copy_file(
        &self,
        conn: &ConnectionInfo,
        local: &Path,
        remote: &str,
    ) -> Result<(), RemoteError> {
        self.execute(&conn.host, "scp", &self.scp_args(conn, local, remote))
            .await
            .map(|_| ())
    }
}
