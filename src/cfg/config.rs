// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fs, path::Path, time::Duration};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

/// Top-level harness configuration: a suite's seed zones plus every
/// implementation-side knob the protocol leaves to the runtime.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Config {
    /// Zones a test run may commission against.
    #[serde(default)]
    pub zones: Vec<ZoneConfig>,
    /// Commissioning/operational TLS dial parameters.
    #[serde(default)]
    pub transport: TransportConfig,
    /// Every named duration used by the pool, PASE, and subscription layers.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Connection, retry, and drain caps.
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Auto-PICS base file and discovery behavior.
    #[serde(default)]
    pub pics: PicsConfig,
}

/// One zone a suite may commission the device into.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ZoneConfig {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Priority", default)]
    pub priority: u8,
    #[serde(rename = "CaCertPath")]
    pub ca_cert_path: String,
}

/// ALPN strings and listener addressing for the two TLS dial modes.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct TransportConfig {
    #[serde(rename = "CommissioningAlpn")]
    pub commissioning_alpn: String,
    #[serde(rename = "OperationalAlpn")]
    pub operational_alpn: String,
    #[serde(rename = "DeviceAddr")]
    pub device_addr: String,
    #[serde(rename = "DeviceHost")]
    pub device_host: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            commissioning_alpn: "mash-commissioning".to_string(),
            operational_alpn: "mash-operational".to_string(),
            device_addr: "127.0.0.1:5540".to_string(),
            device_host: "mash-device.local".to_string(),
        }
    }
}

/// Named durations (spec.md §5 "Suspension points" / "Cancellation and
/// timeouts"), overridable per-suite without recompiling.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct TimeoutConfig {
    #[serde(rename = "ReadDefault", with = "serde_secs")]
    pub read_default: Duration,
    #[serde(rename = "ZonePong", with = "serde_secs")]
    pub zone_pong: Duration,
    #[serde(rename = "CloseAck", with = "serde_secs")]
    pub close_ack: Duration,
    #[serde(rename = "SubscribeWait", with = "serde_secs")]
    pub subscribe_wait: Duration,
    #[serde(rename = "CommissioningDial", with = "serde_secs")]
    pub commissioning_dial: Duration,
    #[serde(rename = "OperationalDial", with = "serde_secs")]
    pub operational_dial: Duration,
    #[serde(rename = "FloodDial", with = "serde_secs")]
    pub flood_dial: Duration,
    #[serde(rename = "UnsubscribeDrain", with = "serde_secs")]
    pub unsubscribe_drain: Duration,
    #[serde(rename = "BusyRetryDelay", with = "serde_secs")]
    pub busy_retry_delay: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            read_default: Duration::from_secs(30),
            zone_pong: Duration::from_secs(2),
            close_ack: Duration::from_secs(2),
            subscribe_wait: Duration::from_secs(5),
            commissioning_dial: Duration::from_secs(10),
            operational_dial: Duration::from_secs(10),
            flood_dial: Duration::from_secs(2),
            unsubscribe_drain: Duration::from_secs(2),
            busy_retry_delay: Duration::from_secs(1),
        }
    }
}

/// Connection, retry, and drain caps (spec.md §3, §5).
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct LimitsConfig {
    #[serde(rename = "MaxZoneSessions", default = "default_max_zone_sessions")]
    pub max_zone_sessions: usize,
    #[serde(rename = "MultiplexIterationCap", default = "default_multiplex_cap")]
    pub multiplex_iteration_cap: usize,
    #[serde(rename = "UnsubscribeDrainCap", default = "default_unsubscribe_drain_cap")]
    pub unsubscribe_drain_cap: usize,
    #[serde(rename = "BusyRetryAttempts", default = "default_busy_retry_attempts")]
    pub busy_retry_attempts: u32,
}

fn default_max_zone_sessions() -> usize {
    5
}
fn default_multiplex_cap() -> usize {
    10
}
fn default_unsubscribe_drain_cap() -> usize {
    20
}
fn default_busy_retry_attempts() -> u32 {
    3
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_zone_sessions: default_max_zone_sessions(),
            multiplex_iteration_cap: default_multiplex_cap(),
            unsubscribe_drain_cap: default_unsubscribe_drain_cap(),
            busy_retry_attempts: default_busy_retry_attempts(),
        }
    }
}

/// Auto-PICS base file location and device-discovery toggle.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct PicsConfig {
    #[serde(rename = "BaseFile", default = "default_pics_base_file")]
    pub base_file: String,
    #[serde(rename = "DiscoverFromDevice", default = "default_true")]
    pub discover_from_device: bool,
}

fn default_pics_base_file() -> String {
    "assets/protocol-common.yaml".to_string()
}
fn default_true() -> bool {
    true
}

impl Default for PicsConfig {
    fn default() -> Self {
        Self {
            base_file: default_pics_base_file(),
            discover_from_device: default_true(),
        }
    }
}

impl Config {
    /// Loads the configuration from YAML, validates it, and returns the
    /// ready-to-use value.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let mut cfg: Config =
            serde_yaml::from_str(&s).context("failed to parse config YAML")?;
        cfg.validate_and_normalize()?;
        Ok(cfg)
    }

    /// Validates invariants and normalizes derived fields.
    pub fn validate_and_normalize(&mut self) -> Result<()> {
        ensure!(
            self.limits.max_zone_sessions <= 5,
            "MaxZoneSessions must not exceed the 5-zone cap"
        );
        ensure!(self.limits.max_zone_sessions >= 1, "MaxZoneSessions must be >= 1");
        ensure!(
            self.limits.busy_retry_attempts >= 1,
            "BusyRetryAttempts must be >= 1"
        );

        if !self.zones.is_empty() {
            ensure!(
                self.zones.iter().all(|z| !z.name.is_empty()),
                "every configured zone needs a non-empty Name"
            );
        }

        ensure!(
            !self.transport.commissioning_alpn.is_empty(),
            "CommissioningAlpn must not be empty"
        );
        ensure!(
            !self.transport.operational_alpn.is_empty(),
            "OperationalAlpn must not be empty"
        );

        Ok(())
    }
}

/// Serde helpers for representing `Duration` as a number of seconds.
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
