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

//! Dotted `key=value` overrides on top of a loaded [`PmksConf`].

use crate::domain::config::{CapiConf, PmksConf};
use crate::shared::error::{PmksError, Result};
use std::collections::HashMap;
use std::str::FromStr;

/// Parse properties given in `key=value` form.
pub fn parse_overrides(configs: &[String]) -> Result<HashMap<String, String>> {
    let mut map = HashMap::new();

    for config in configs {
        let (key, value) = config.split_once('=').ok_or_else(|| {
            PmksError::config_error(format!(
                "Invalid config format: '{}'. Expected 'key=value'",
                config
            ))
        })?;

        let key = key.trim();
        if key.is_empty() {
            return Err(PmksError::config_error(format!("Empty key in config: '{}'", config)));
        }

        map.insert(key.to_string(), value.trim().to_string());
    }

    Ok(map)
}

/// Apply overrides and re-validate. Unknown keys are an error so typos do
/// not pass silently.
pub fn apply_overrides(configs: &HashMap<String, String>, conf: &mut PmksConf) -> Result<()> {
    for (key, value) in configs {
        match key.as_str() {
            "poll.interval-secs" => conf.poll.interval_secs = parse(key, value)?,
            "poll.max-interval-secs" => conf.poll.max_interval_secs = parse(key, value)?,
            "poll.backoff-factor" => conf.poll.backoff_factor = parse(key, value)?,
            "poll.create-timeout-secs" => conf.poll.create_timeout_secs = parse(key, value)?,
            "poll.update-timeout-secs" => conf.poll.update_timeout_secs = parse(key, value)?,
            "poll.delete-timeout-secs" => conf.poll.delete_timeout_secs = parse(key, value)?,
            "poll.node-group-timeout-secs" => {
                conf.poll.node_group_timeout_secs = parse(key, value)?
            }

            "capi.namespace" => capi(conf).namespace = value.clone(),
            "capi.kubeconfig" => capi(conf).kubeconfig = Some(value.clone()),
            "capi.context" => capi(conf).context = Some(value.clone()),
            "capi.cluster-class" => capi(conf).cluster_class = value.clone(),
            "capi.machine-pool-class" => capi(conf).machine_pool_class = value.clone(),
            "capi.field-manager" => capi(conf).field_manager = value.clone(),

            "ssh.user" => conf.ssh.user = value.clone(),
            "ssh.private-key" => conf.ssh.private_key = Some(value.clone()),
            "ssh.port" => conf.ssh.port = parse(key, value)?,
            "ssh.connect-timeout-secs" => conf.ssh.connect_timeout_secs = parse(key, value)?,
            "ssh.command-timeout-secs" => conf.ssh.command_timeout_secs = parse(key, value)?,

            _ => return Err(PmksError::config_error(format!("Unknown config key: '{}'", key))),
        }
    }
    conf.validate()
}

fn capi(conf: &mut PmksConf) -> &mut CapiConf {
    conf.capi.get_or_insert_with(CapiConf::default)
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value.parse::<T>().map_err(|_| {
        PmksError::config_error(format!("Invalid value for {}: '{}'", key, value))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_overrides() {
        let map = parse_overrides(&[
            "poll.interval-secs=3".to_string(),
            " capi.namespace = clusters ".to_string(),
            "ssh.private-key=/k=v/id".to_string(),
        ])
        .unwrap();
        assert_eq!(map["poll.interval-secs"], "3");
        assert_eq!(map["capi.namespace"], "clusters");
        assert_eq!(map["ssh.private-key"], "/k=v/id");

        assert!(parse_overrides(&["novalue".to_string()]).is_err());
        assert!(parse_overrides(&["=x".to_string()]).is_err());
    }

    #[test]
    fn test_apply_overrides() {
        let mut conf = PmksConf::default();
        let map = parse_overrides(&[
            "poll.create-timeout-secs=900".to_string(),
            "capi.cluster-class=docker-quick-start".to_string(),
            "ssh.port=2200".to_string(),
        ])
        .unwrap();
        apply_overrides(&map, &mut conf).unwrap();

        assert_eq!(conf.poll.create_timeout_secs, 900);
        let capi = conf.capi.as_ref().unwrap();
        assert_eq!(capi.cluster_class, "docker-quick-start");
        assert_eq!(capi.namespace, "default");
        assert_eq!(conf.ssh.port, 2200);
    }

    #[test]
    fn test_apply_overrides_rejects_bad_input() {
        let mut conf = PmksConf::default();

        let unknown = parse_overrides(&["poll.speed=fast".to_string()]).unwrap();
        assert!(apply_overrides(&unknown, &mut conf).is_err());

        let not_a_number = parse_overrides(&["ssh.port=twenty".to_string()]).unwrap();
        assert!(apply_overrides(&not_a_number, &mut conf).is_err());

        let zero = parse_overrides(&["poll.interval-secs=0".to_string()]).unwrap();
        assert!(apply_overrides(&zero, &mut conf).is_err());
    }
}
