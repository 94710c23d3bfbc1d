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

//! Kubernetes version strings and upgrade-path rules.

use regex::Regex;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

static VERSION_RE: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();

/// A provider-flavoured Kubernetes version such as `1.22.10-aliyun.1`.
///
/// Equality and ordering look at major, minor, patch and then the trailing
/// number of the provider suffix (`aliyun.1` < `aliyun.2`). Suffix text is
/// otherwise kept verbatim and does not take part in comparisons.
#[derive(Debug, Clone)]
pub struct KubeVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub suffix: Option<String>,
}

impl KubeVersion {
    fn revision(&self) -> u64 {
        self.suffix
            .as_deref()
            .and_then(|s| {
                let digits: String = s
                    .chars()
                    .rev()
                    .take_while(|c| c.is_ascii_digit())
                    .collect::<Vec<_>>()
                    .into_iter()
                    .rev()
                    .collect();
                digits.parse().ok()
            })
            .unwrap_or(0)
    }

    fn key(&self) -> (u64, u64, u64, u64) {
        (self.major, self.minor, self.patch, self.revision())
    }
}

impl PartialEq for KubeVersion {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for KubeVersion {}

impl Ord for KubeVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl PartialOrd for KubeVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl FromStr for KubeVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let re = VERSION_RE
            .get_or_init(|| Regex::new(r"^v?(\d+)\.(\d+)(?:\.(\d+))?(?:[-+](.+))?$"))
            .as_ref()
            .map_err(|e| e.to_string())?;
        let caps = re
            .captures(s.trim())
            .ok_or_else(|| format!("'{}' is not a Kubernetes version", s))?;

        let number = |idx: usize| -> Result<u64, String> {
            caps.get(idx)
                .map_or(Ok(0), |m| m.as_str().parse::<u64>())
                .map_err(|e| format!("'{}': {}", s, e))
        };

        Ok(Self {
            major: number(1)?,
            minor: number(2)?,
            patch: number(3)?,
            suffix: caps.get(4).map(|m| m.as_str().to_string()),
        })
    }
}

impl fmt::Display for KubeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(suffix) = &self.suffix {
            write!(f, "-{}", suffix)?;
        }
        Ok(())
    }
}

/// Check that `target` is a legal upgrade from `current`.
///
/// The target must be strictly newer, keep the major version, and move the
/// minor version by at most `max_minor_skew`. The error is a human readable
/// reason.
pub fn check_upgrade_path(current: &str, target: &str, max_minor_skew: u64) -> Result<(), String> {
    let from: KubeVersion = current.parse()?;
    let to: KubeVersion = target.parse()?;

    if to <= from {
        return Err(format!(
            "target version {} is not newer than current version {}",
            target, current
        ));
    }
    if to.major != from.major {
        return Err(format!(
            "major version change {} -> {} is not supported",
            from.major, to.major
        ));
    }
    let skew = to.minor - from.minor;
    if skew > max_minor_skew {
        return Err(format!(
            "upgrading {} -> {} skips {} minor versions; at most {} allowed",
            current, target, skew, max_minor_skew
        ));
    }
    Ok(())
}
