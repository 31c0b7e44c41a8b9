// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fs, path::Path, time::Duration};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

use crate::{cfg::enums::SyslogLevel, urlmap::Rule};

/// The recognized `[wapbox]`-equivalent option set.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Config {
    #[serde(rename = "wapbox-port")]
    pub wapbox_port: u16,

    #[serde(rename = "bearerbox-host")]
    pub bearerbox_host: String,
    #[serde(rename = "bearerbox-port")]
    pub bearerbox_port: u16,

    #[serde(rename = "heartbeat-freq", with = "serde_secs")]
    pub heartbeat_freq: Duration,
    #[serde(rename = "timer-freq", with = "serde_secs")]
    pub timer_freq: Duration,

    #[serde(rename = "log-file")]
    pub log_file: Option<String>,
    #[serde(rename = "log-level", default = "default_log_level")]
    pub log_level: i32,
    #[serde(rename = "syslog-level", default = "default_syslog_level")]
    pub syslog_level: SyslogLevel,

    #[serde(rename = "map-url-max", default)]
    pub map_url_max: u32,
    #[serde(flatten)]
    pub url_map_raw: UrlMapRaw,

    #[serde(rename = "device-home", default)]
    pub device_home: Option<String>,

    #[serde(default)]
    pub runtime: RuntimeConfig,
}

fn default_log_level() -> i32 {
    0
}

fn default_syslog_level() -> SyslogLevel {
    SyslogLevel::None
}

/// Captures the raw `map-url` / `map-url-N` entries so they can be
/// expanded against `map-url-max` after deserialization; serde can't natively handle a numbered key family.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct UrlMapRaw {
    #[serde(rename = "map-url", default)]
    pub map_url: Option<String>,
    #[serde(flatten)]
    pub numbered: std::collections::HashMap<String, String>,
}

/// Implementation details with no counterpart in the original option
/// table: concurrency and socket tuning the gateway needs to run at all.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct RuntimeConfig {
    /// Worker tasks draining the HTTP completion queue.
    #[serde(default = "default_http_workers")]
    pub http_workers: usize,
    /// Timeout applied to each bearerbox read/write.
    #[serde(rename = "bearerbox-io-timeout", with = "serde_secs", default = "default_io_timeout")]
    pub bearerbox_io_timeout: Duration,
}

fn default_http_workers() -> usize {
    4
}

fn default_io_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            http_workers: default_http_workers(),
            bearerbox_io_timeout: default_io_timeout(),
        }
    }
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path).context("reading config file")?;
        let mut cfg: Config = serde_yaml::from_str(&s).context("failed to parse config YAML")?;
        cfg.validate_and_normalize()?;
        Ok(cfg)
    }

    pub fn validate_and_normalize(&mut self) -> Result<()> {
        ensure!(self.wapbox_port > 0, "wapbox-port must be nonzero");
        ensure!(!self.bearerbox_host.is_empty(), "bearerbox-host must not be empty");
        ensure!(self.bearerbox_port > 0, "bearerbox-port must be nonzero");
        ensure!(self.runtime.http_workers >= 1, "http_workers must be >= 1");
        // Every map-url-N referenced by map-url-max must be present
        //; this is the config-time half of ConfigError::MissingMapUrlEntry.
        for n in 0..self.map_url_max {
            let key = format!("map-url-{n}");
            ensure!(
                self.url_map_raw.numbered.contains_key(&key),
                "map-url-max={} but {key} is missing",
                self.map_url_max
            );
        }
        Ok(())
    }

    /// Expands `map-url` / `map-url-0..map-url-max` into ordered rewrite
    /// rules.
    pub fn url_map_rules(&self) -> Result<Vec<Rule>> {
        let mut rules = Vec::new();
        if let Some(entry) = &self.url_map_raw.map_url {
            rules.push(parse_map_url_entry(entry)?);
        }
        for n in 0..self.map_url_max {
            let key = format!("map-url-{n}");
            let entry = self
                .url_map_raw
                .numbered
                .get(&key)
                .with_context(|| format!("{key} referenced by map-url-max but missing"))?;
            rules.push(parse_map_url_entry(entry)?);
        }
        Ok(rules)
    }
}

/// Parses a `"src dst"` entry. A trailing `*` on both sides means
/// prefix-rewrite; otherwise the whole URL must match verbatim.
fn parse_map_url_entry(entry: &str) -> Result<Rule> {
    let mut parts = entry.splitn(2, char::is_whitespace);
    let from = parts.next().unwrap_or_default().trim();
    let to = parts
        .next()
        .with_context(|| format!("map-url entry {entry:?} missing destination"))?
        .trim();
    ensure!(!from.is_empty() && !to.is_empty(), "map-url entry {entry:?} is empty");
    if from.ends_with('*') && to.ends_with('*') {
        Ok(Rule::ExactPrefix {
            from: from.to_string(),
            to: to.to_string(),
        })
    } else {
        Ok(Rule::Verbatim {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

/// Serde helper for representing `Duration` as a number of seconds.
mod serde_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_yaml() -> &'static str {
        r#"
wapbox-port: 9201
bearerbox-host: "127.0.0.1"
bearerbox-port: 13003
heartbeat-freq: 15
timer-freq: 1
map-url-max: 1
map-url-0: "/wap/* http://origin.example/*"
device-home: "http://origin.example/home.wml"
"#
    }

    #[test]
    fn minimal_config_parses_and_validates() {
        let mut cfg: Config = serde_yaml::from_str(minimal_yaml()).expect("parse");
        cfg.validate_and_normalize().expect("validate");
        assert_eq!(cfg.wapbox_port, 9201);
        assert_eq!(cfg.runtime.http_workers, 4);
    }

    #[test]
    fn missing_numbered_entry_fails_validation() {
        let yaml = r#"
wapbox-port: 9201
bearerbox-host: "127.0.0.1"
bearerbox-port: 13003
heartbeat-freq: 15
timer-freq: 1
map-url-max: 2
map-url-0: "/a/* http://origin.example/*"
"#;
        let mut cfg: Config = serde_yaml::from_str(yaml).expect("parse");
        assert!(cfg.validate_and_normalize().is_err());
    }

    #[test]
    fn url_map_rules_expands_numbered_entries_in_order() {
        let cfg: Config = serde_yaml::from_str(minimal_yaml()).expect("parse");
        let rules = cfg.url_map_rules().expect("rules");
        assert_eq!(rules.len(), 1);
        assert_eq!(
            rules[0],
            Rule::ExactPrefix {
                from: "/wap/*".to_string(),
                to: "http://origin.example/*".to_string(),
            }
        );
    }
}
