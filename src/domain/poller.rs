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

//! Wait-until-settled engine shared by the cluster and node group managers.
//!
//! Providers report progress as status strings, so every asynchronous
//! operation is "submit, then re-read until the status is terminal". The
//! poller owns only the calling task: it sleeps between probes, never blocks
//! past its deadline, and dropping the returned future abandons the wait
//! without touching the provider-side operation.

use crate::domain::identity::Iid;
use crate::shared::error::PmksError;
use backon::{BackoffBuilder, ExponentialBuilder};
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, warn};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_POLL_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_BACKOFF_FACTOR: f32 = 1.5;
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(20 * 60);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollConfig {
    /// Delay before the second probe.
    pub interval: Duration,
    /// Upper bound for any single delay.
    pub max_interval: Duration,
    /// Growth of the delay between probes; `1.0` gives a fixed cadence.
    pub backoff_factor: f32,
    /// Total wait budget measured from the first probe.
    pub timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_interval: DEFAULT_MAX_POLL_INTERVAL,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            timeout: DEFAULT_POLL_TIMEOUT,
        }
    }
}

impl PollConfig {
    pub fn fixed(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            max_interval: interval,
            backoff_factor: 1.0,
            timeout,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Per-operation wait budgets. Provisioning latency differs a lot between
/// creating a control plane and resizing a pool.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollPolicy {
    pub create: PollConfig,
    pub update: PollConfig,
    pub delete: PollConfig,
    pub node_group: PollConfig,
}

impl Default for PollPolicy {
    fn default() -> Self {
        let base = PollConfig::default();
        Self {
            create: base.with_timeout(Duration::from_secs(30 * 60)),
            update: base.with_timeout(Duration::from_secs(45 * 60)),
            delete: base.with_timeout(Duration::from_secs(20 * 60)),
            node_group: base.with_timeout(Duration::from_secs(20 * 60)),
        }
    }
}

impl PollPolicy {
    /// Same cadence and budget for every operation.
    pub fn uniform(config: PollConfig) -> Self {
        Self {
            create: config,
            update: config,
            delete: config,
            node_group: config,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollTermination {
    Terminal,
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct PollOutcome<T> {
    /// Last successfully observed value, if any probe succeeded.
    pub last: Option<T>,
    pub termination: PollTermination,
    pub elapsed: Duration,
    pub probes: u32,
    /// Message of the most recent failed probe.
    pub last_error: Option<String>,
}

impl<T> PollOutcome<T> {
    pub fn timed_out(&self) -> bool {
        self.termination == PollTermination::TimedOut
    }

    /// Turn a timeout into [`PmksError::ProvisioningTimeout`] and hand back
    /// the terminal observation otherwise.
    pub fn into_terminal(
        self,
        op: &'static str,
        target: &Iid,
        describe: impl Fn(&T) -> String,
    ) -> Result<T, PmksError> {
        match (self.termination, self.last) {
            (PollTermination::Terminal, Some(value)) => Ok(value),
            (_, last) => Err(PmksError::ProvisioningTimeout {
                op,
                target: target.clone(),
                waited: self.elapsed,
                last_status: last
                    .as_ref()
                    .map(describe)
                    .or(self.last_error)
                    .unwrap_or_else(|| "never observed".to_string()),
            }),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StatusPoller {
    config: PollConfig,
}

impl StatusPoller {
    pub fn new(config: PollConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    fn delays(&self) -> impl Iterator<Item = Duration> {
        ExponentialBuilder::default()
            .with_min_delay(self.config.interval)
            .with_max_delay(self.config.max_interval)
            .with_factor(self.config.backoff_factor.max(1.0))
            .with_max_times(usize::MAX)
            .build()
    }

    /// Probe until `is_terminal` accepts an observation or the deadline
    /// passes.
    ///
    /// Probe errors are logged and polling continues: a resource that was
    /// just submitted is often not yet visible to reads. Each probe may only
    /// use what is left of the budget, so a hung read counts as a failed
    /// probe. The final probe lands on the deadline, so a timeout is
    /// reported at the deadline and not before it.
    pub async fn poll<T, F, Fut, P>(&self, what: &str, mut probe: F, is_terminal: P) -> PollOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PmksError>>,
        P: Fn(&T) -> bool,
    {
        let start = Instant::now();
        let deadline = start + self.config.timeout;
        let mut delays = self.delays();
        let mut last = None;
        let mut last_error = None;
        let mut probes = 0u32;

        loop {
            probes += 1;
            let budget = deadline.saturating_duration_since(Instant::now());
            let result = match timeout(budget, probe()).await {
                Ok(result) => result,
                Err(_) => Err(PmksError::ProbeTimeout {
                    what: what.to_string(),
                    waited: budget,
                }),
            };
            match result {
                Ok(observed) => {
                    let done = is_terminal(&observed);
                    last = Some(observed);
                    if done {
                        debug!(what, probes, "Reached terminal status");
                        return PollOutcome {
                            last,
                            termination: PollTermination::Terminal,
                            elapsed: start.elapsed(),
                            probes,
                            last_error,
                        };
                    }
                }
                Err(e) => {
                    warn!(what, probes, error = %e, "Status probe failed, will retry");
                    last_error = Some(e.to_string());
                }
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(what, probes, timeout = ?self.config.timeout, "Gave up waiting for terminal status");
                return PollOutcome {
                    last,
                    termination: PollTermination::TimedOut,
                    elapsed: start.elapsed(),
                    probes,
                    last_error,
                };
            }

            let delay = delays
                .next()
                .unwrap_or(self.config.max_interval)
                .min(deadline - now);
            debug!(what, probes, delay_ms = delay.as_millis() as u64, "Waiting before next probe");
            sleep(delay).await;
        }
    }
}
