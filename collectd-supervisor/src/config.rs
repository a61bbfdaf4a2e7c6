//! Configuration for one collectd instance.
//!
//! A [`SupervisorConfig`] describes everything needed to render the master
//! `collectd.conf` and to start the write-back server. The supervisor never
//! mutates a config in place; it replaces it wholesale and compares
//! [`SupervisorConfig::hash`] values to decide whether a restart is needed.
//!
//! ## Example
//!
//! ```rust
//! use collectd_supervisor::SupervisorConfig;
//!
//! let config = SupervisorConfig::builder()
//!     .config_dir("/tmp/collectd")
//!     .read_threads(8)
//!     .log_level("info")
//!     .build();
//!
//! assert!(config.validate().is_ok());
//! assert_eq!(
//!     config.config_file_path(),
//!     std::path::Path::new("/tmp/collectd/global/collectd.conf")
//! );
//! ```

use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use collectd_types::{MonitorId, MONITOR_ID_KEY};
use serde::{Deserialize, Serialize};
use xxhash_rust::xxh64::Xxh64;

use crate::error::{Result, SupervisorError};

/// Log levels collectd's `logfile` plugin accepts.
pub const LOG_LEVELS: &[&str] = &["debug", "info", "notice", "warning", "err"];

/// Collection interval used when none is configured.
pub const DEFAULT_INTERVAL_SECONDS: u32 = 10;

const XXHASH_SEED: u64 = 0;

/// Settings for a single collectd instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SupervisorConfig {
    /// Distinguishes concurrently running instances; also names the
    /// instance's directory under `config_dir`.
    pub instance_name: String,
    /// Root of the collectd bundle (`bin/collectd`, plugins, types.db).
    pub bundle_dir: PathBuf,
    /// Parent directory for every instance's generated configuration.
    pub config_dir: PathBuf,
    /// Iterations before a missing value is considered stale.
    pub timeout: u32,
    pub read_threads: u32,
    pub write_threads: u32,
    pub write_queue_limit_high: u64,
    pub write_queue_limit_low: u64,
    /// One of [`LOG_LEVELS`].
    pub log_level: String,
    /// Zero means [`DEFAULT_INTERVAL_SECONDS`].
    pub interval_seconds: u32,
    pub write_server_ip_addr: String,
    /// Zero binds an ephemeral port.
    pub write_server_port: u16,
    /// Query string appended to the write-back URL, e.g. `?monitorID=redis-1`.
    pub write_server_query: String,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            instance_name: "global".to_string(),
            bundle_dir: PathBuf::from("/usr/lib/collectd-agent"),
            config_dir: PathBuf::from("/var/run/collectd-agent/collectd"),
            timeout: 40,
            read_threads: 5,
            write_threads: 2,
            write_queue_limit_high: 500_000,
            write_queue_limit_low: 400_000,
            log_level: "notice".to_string(),
            interval_seconds: 0,
            write_server_ip_addr: "127.9.8.7".to_string(),
            write_server_port: 0,
            write_server_query: String::new(),
        }
    }
}

impl SupervisorConfig {
    /// Create a new builder starting from the defaults.
    pub fn builder() -> SupervisorConfigBuilder {
        SupervisorConfigBuilder::default()
    }

    /// Derive the config of an isolated, single-monitor collectd instance.
    ///
    /// The isolated instance shares the bundle and config directories of
    /// `self` but runs its own write-back server on an ephemeral port and
    /// tags every record with the monitor's id through the URL query.
    pub fn isolated(&self, monitor_id: &MonitorId, interval_seconds: u32) -> Self {
        Self {
            instance_name: format!("monitor-{}", monitor_id),
            bundle_dir: self.bundle_dir.clone(),
            config_dir: self.config_dir.clone(),
            timeout: self.timeout,
            read_threads: 10,
            write_threads: 1,
            write_queue_limit_high: 10_000,
            write_queue_limit_low: 10_000,
            log_level: self.log_level.clone(),
            interval_seconds,
            write_server_ip_addr: self.write_server_ip_addr.clone(),
            write_server_port: 0,
            write_server_query: format!(
                "?{}={}",
                MONITOR_ID_KEY,
                form_urlencoded::byte_serialize(monitor_id.as_str().as_bytes()).collect::<String>()
            ),
        }
    }

    /// Check the config for values collectd would reject.
    pub fn validate(&self) -> Result<()> {
        if self.instance_name.is_empty()
            || self.instance_name.contains(|c| c == '/' || c == '\\')
            || self.instance_name == "."
            || self.instance_name == ".."
        {
            return Err(SupervisorError::InvalidConfig(format!(
                "instance name {:?} cannot be used as a directory name",
                self.instance_name
            )));
        }
        if !LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(SupervisorError::InvalidConfig(format!(
                "log level {:?} is not one of {}",
                self.log_level,
                LOG_LEVELS.join(", ")
            )));
        }
        if self.read_threads == 0 || self.write_threads == 0 {
            return Err(SupervisorError::InvalidConfig(
                "read and write thread counts must be positive".to_string(),
            ));
        }
        if self.write_queue_limit_low > self.write_queue_limit_high {
            return Err(SupervisorError::InvalidConfig(format!(
                "write queue low limit {} exceeds high limit {}",
                self.write_queue_limit_low, self.write_queue_limit_high
            )));
        }
        if !self.write_server_query.is_empty() && !self.write_server_query.starts_with('?') {
            return Err(SupervisorError::InvalidConfig(format!(
                "write server query {:?} must start with '?'",
                self.write_server_query
            )));
        }
        Ok(())
    }

    /// Stable fingerprint of every field, used to skip no-op reconfigurations.
    pub fn hash(&self) -> u64 {
        let mut hasher = Xxh64::new(XXHASH_SEED);
        Hash::hash(self, &mut hasher);
        hasher.finish()
    }

    /// The collection interval collectd will actually use.
    pub fn effective_interval_seconds(&self) -> u32 {
        if self.interval_seconds == 0 {
            DEFAULT_INTERVAL_SECONDS
        } else {
            self.interval_seconds
        }
    }

    /// Directory holding everything generated for this instance.
    pub fn instance_config_dir(&self) -> PathBuf {
        self.config_dir.join(&self.instance_name)
    }

    /// Path of the master `collectd.conf`.
    pub fn config_file_path(&self) -> PathBuf {
        self.instance_config_dir().join("collectd.conf")
    }

    /// Directory of per-monitor fragments included by the master config.
    pub fn managed_config_dir(&self) -> PathBuf {
        self.instance_config_dir().join("managed_config")
    }

    /// Path of the collectd executable inside the bundle.
    pub fn collectd_binary(&self) -> PathBuf {
        self.bundle_dir.join("bin").join("collectd")
    }

    /// Root directory of the bundled collectd plugins.
    pub fn plugin_root(&self) -> PathBuf {
        self.bundle_dir.join("lib").join("collectd")
    }

    /// Root directory of the bundled python plugins.
    pub fn python_plugin_root(&self) -> PathBuf {
        self.bundle_dir.join("collectd-python")
    }

    /// The write-back URL, using the configured port.
    pub fn write_server_url(&self) -> String {
        self.write_server_url_with_port(self.write_server_port)
    }

    /// The write-back URL for a server bound to `port`.
    pub fn write_server_url_with_port(&self, port: u16) -> String {
        format!(
            "http://{}:{}/{}",
            self.write_server_ip_addr, port, self.write_server_query
        )
    }

    /// Listen address for the write-back server.
    pub fn write_server_bind_addr(&self) -> String {
        format!("{}:{}", self.write_server_ip_addr, self.write_server_port)
    }
}

/// Builder for [`SupervisorConfig`].
#[derive(Debug, Default)]
pub struct SupervisorConfigBuilder {
    config: SupervisorConfig,
}

impl SupervisorConfigBuilder {
    /// Set the instance name.
    pub fn instance_name(mut self, name: impl Into<String>) -> Self {
        self.config.instance_name = name.into();
        self
    }

    /// Set the collectd bundle directory.
    pub fn bundle_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.config.bundle_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Set the parent directory for generated configuration.
    pub fn config_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.config.config_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn timeout(mut self, timeout: u32) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn read_threads(mut self, n: u32) -> Self {
        self.config.read_threads = n;
        self
    }

    pub fn write_threads(mut self, n: u32) -> Self {
        self.config.write_threads = n;
        self
    }

    /// Set both write queue limits.
    pub fn write_queue_limits(mut self, low: u64, high: u64) -> Self {
        self.config.write_queue_limit_low = low;
        self.config.write_queue_limit_high = high;
        self
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.log_level = level.into();
        self
    }

    pub fn interval_seconds(mut self, secs: u32) -> Self {
        self.config.interval_seconds = secs;
        self
    }

    /// Set the address the write-back server listens on.
    pub fn write_server_ip_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.write_server_ip_addr = addr.into();
        self
    }

    pub fn write_server_port(mut self, port: u16) -> Self {
        self.config.write_server_port = port;
        self
    }

    pub fn write_server_query(mut self, query: impl Into<String>) -> Self {
        self.config.write_server_query = query.into();
        self
    }

    /// Build the config.
    pub fn build(self) -> SupervisorConfig {
        self.config
    }
}
