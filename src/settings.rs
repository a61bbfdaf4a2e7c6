//! Agent settings file.
//!
//! Settings are read from a file (TOML, JSON or YAML, picked by extension)
//! and can be overridden from the environment with double-underscore
//! separated keys, e.g. `COLLECTD_AGENT__COLLECTD__TIMEOUT=20`. Words within
//! a key are separated by single underscores and map onto the camelCase
//! names used in the file: `COLLECTD_AGENT__COLLECTD__READ_THREADS` sets
//! `collectd.readThreads`.
//!
//! ```toml
//! output = "/var/log/collectd-agent/data.jsonl"
//!
//! [collectd]
//! bundleDir = "/opt/collectd"
//! intervalSeconds = 10
//!
//! [[monitors]]
//! id = "redis-1"
//! template = "/etc/collectd-agent/templates/redis.conf.tmpl"
//! context = { host = "localhost", port = 6379 }
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use collectd_supervisor::{MonitorSettings, SupervisorConfig};
use collectd_types::MonitorId;
use config::{Case, Config, Environment, File};
use serde::Deserialize;

/// Environment prefix for overrides.
pub const ENV_PREFIX: &str = "COLLECTD_AGENT";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentSettings {
    /// Main collectd instance.
    #[serde(default)]
    pub collectd: SupervisorConfig,
    #[serde(default)]
    pub monitors: Vec<MonitorEntry>,
    /// JSON-lines destination for monitor data. Stdout when unset.
    #[serde(default)]
    pub output: Option<PathBuf>,
}

/// One collectd-backed monitor.
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorEntry {
    pub id: MonitorId,
    /// Path of the fragment template.
    pub template: PathBuf,
    /// Seconds; zero uses the collectd instance's interval.
    #[serde(default)]
    pub interval: u32,
    #[serde(default)]
    pub isolated: bool,
    /// Needs the embedded JVM (GenericJMX) plugin.
    #[serde(default)]
    pub jmx: bool,
    /// Values available to the template.
    #[serde(default)]
    pub context: serde_json::Value,
}

impl MonitorEntry {
    pub fn settings(&self) -> MonitorSettings {
        MonitorSettings::new(self.id.clone())
            .interval_seconds(self.interval)
            .isolated(self.isolated)
    }

    /// Template name used in the fragment file name: the template file name
    /// up to its first dot.
    pub fn template_name(&self) -> Result<&str> {
        self.template
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| name.split('.').next())
            .filter(|name| !name.is_empty())
            .with_context(|| format!("invalid template path {}", self.template.display()))
    }
}

impl AgentSettings {
    /// Load from `path` with `COLLECTD_AGENT__*` overrides.
    pub fn load(path: &Path) -> Result<Self> {
        Self::load_with_prefix(path, ENV_PREFIX)
    }

    pub fn load_with_prefix(path: &Path, prefix: &str) -> Result<Self> {
        let settings: Self = Config::builder()
            .add_source(File::from(path))
            .add_source(
                Environment::with_prefix(prefix)
                    .prefix_separator("__")
                    .separator("__")
                    .convert_case(Case::Camel)
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("failed to read settings from {}", path.display()))?
            .try_deserialize()
            .with_context(|| format!("invalid settings in {}", path.display()))?;

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        self.collectd.validate()?;

        let mut seen = std::collections::BTreeSet::new();
        for monitor in &self.monitors {
            if monitor.id.is_empty() {
                anyhow::bail!("monitor with template {} has an empty id", monitor.template.display());
            }
            if !seen.insert(&monitor.id) {
                anyhow::bail!("duplicate monitor id {}", monitor.id);
            }
            monitor.template_name()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_settings(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_settings_file() {
        let file = write_settings(
            r#"
output = "/tmp/data.jsonl"

[collectd]
timeout = 12

[[monitors]]
id = "redis-1"
template = "/etc/templates/redis.conf.tmpl"
interval = 30
context = { host = "db", port = 6379 }

[[monitors]]
id = "kafka"
template = "/etc/templates/kafka.conf.tmpl"
isolated = true
jmx = true
"#,
        );

        let settings = AgentSettings::load_with_prefix(file.path(), "COLLECTD_AGENT_TEST_FILE").unwrap();
        assert_eq!(settings.collectd.timeout, 12);
        assert_eq!(settings.collectd.instance_name, "global");
        assert_eq!(settings.output, Some(PathBuf::from("/tmp/data.jsonl")));
        assert_eq!(settings.monitors.len(), 2);

        let redis = &settings.monitors[0];
        assert_eq!(redis.id, MonitorId::from("redis-1"));
        assert_eq!(redis.template_name().unwrap(), "redis");
        assert_eq!(redis.context["host"], "db");
        assert_eq!(redis.context["port"], 6379);
        assert_eq!(redis.settings().interval_seconds, 30);
        assert!(!redis.settings().isolated);

        let kafka = &settings.monitors[1];
        assert!(kafka.isolated && kafka.jmx);
        assert!(kafka.context.is_null());
    }

    #[test]
    fn test_environment_overrides_file() {
        let file = write_settings("[collectd]\ntimeout = 12\n");
        std::env::set_var("COLLECTD_AGENT_TEST_ENV__COLLECTD__TIMEOUT", "25");

        let settings = AgentSettings::load_with_prefix(file.path(), "COLLECTD_AGENT_TEST_ENV").unwrap();
        assert_eq!(settings.collectd.timeout, 25);

        std::env::remove_var("COLLECTD_AGENT_TEST_ENV__COLLECTD__TIMEOUT");
    }

    #[test]
    fn test_environment_overrides_camel_case_fields() {
        let file = write_settings("[collectd]\nreadThreads = 3\nbundleDir = \"/opt/from-file\"\n");
        std::env::set_var("COLLECTD_AGENT_TEST_CAMEL__COLLECTD__READ_THREADS", "9");
        std::env::set_var("COLLECTD_AGENT_TEST_CAMEL__COLLECTD__INTERVAL_SECONDS", "15");
        std::env::set_var("COLLECTD_AGENT_TEST_CAMEL__COLLECTD__WRITE_SERVER_PORT", "8081");

        let settings = AgentSettings::load_with_prefix(file.path(), "COLLECTD_AGENT_TEST_CAMEL").unwrap();
        assert_eq!(settings.collectd.read_threads, 9);
        assert_eq!(settings.collectd.interval_seconds, 15);
        assert_eq!(settings.collectd.write_server_port, 8081);
        assert_eq!(settings.collectd.bundle_dir, PathBuf::from("/opt/from-file"));

        std::env::remove_var("COLLECTD_AGENT_TEST_CAMEL__COLLECTD__READ_THREADS");
        std::env::remove_var("COLLECTD_AGENT_TEST_CAMEL__COLLECTD__INTERVAL_SECONDS");
        std::env::remove_var("COLLECTD_AGENT_TEST_CAMEL__COLLECTD__WRITE_SERVER_PORT");
    }

    #[test]
    fn test_duplicate_monitor_ids_rejected() {
        let file = write_settings(
            r#"
[[monitors]]
id = "a"
template = "/t/a.conf.tmpl"

[[monitors]]
id = "a"
template = "/t/b.conf.tmpl"
"#,
        );
        let err = AgentSettings::load_with_prefix(file.path(), "COLLECTD_AGENT_TEST_DUP").unwrap_err();
        assert!(err.to_string().contains("duplicate monitor id a"));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(AgentSettings::load_with_prefix(Path::new("/nonexistent/agent.toml"), "X").is_err());
    }
}
