//! Shared plumbing for monitors implemented as collectd config fragments.

use std::path::PathBuf;
use std::sync::Arc;

use collectd_types::{MonitorId, MONITOR_ID_KEY};
use serde_json::{Map, Value};

use crate::config::SupervisorConfig;
use crate::error::{Result, SupervisorError};
use crate::output::Output;
use crate::render::{fragment_file_name, remove_conf_file, write_conf_file};
use crate::supervisor::ProcessSupervisor;
use crate::template::Template;

/// Per-run settings of a monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorSettings {
    pub id: MonitorId,
    /// Zero falls back to the supervisor's interval.
    pub interval_seconds: u32,
    /// Run in a dedicated collectd instance instead of the shared one.
    pub isolated: bool,
}

impl MonitorSettings {
    pub fn new(id: impl Into<MonitorId>) -> Self {
        Self {
            id: id.into(),
            interval_seconds: 0,
            isolated: false,
        }
    }

    pub fn interval_seconds(mut self, secs: u32) -> Self {
        self.interval_seconds = secs;
        self
    }

    pub fn isolated(mut self, isolated: bool) -> Self {
        self.isolated = isolated;
        self
    }
}

struct Running {
    id: MonitorId,
    supervisor: ProcessSupervisor,
    fragment: PathBuf,
}

/// Renders one monitor's config fragment and keeps it registered with a
/// [`ProcessSupervisor`].
pub struct MonitorCore {
    template: Template,
    output: Arc<dyn Output>,
    supervisor: ProcessSupervisor,
    uses_shared_subsystem: bool,
    running: Option<Running>,
}

impl std::fmt::Debug for MonitorCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorCore")
            .field("template", &self.template.name())
            .field("monitor_id", &self.monitor_id())
            .field("uses_shared_subsystem", &self.uses_shared_subsystem)
            .finish()
    }
}

impl MonitorCore {
    pub fn new(template: Template, output: Arc<dyn Output>, supervisor: ProcessSupervisor) -> Self {
        Self {
            template,
            output,
            supervisor,
            uses_shared_subsystem: false,
            running: None,
        }
    }

    /// Mark the monitor as needing the embedded JVM plugin.
    pub fn with_shared_subsystem(mut self, uses: bool) -> Self {
        self.uses_shared_subsystem = uses;
        self
    }

    /// Id of the running configuration, if any.
    pub fn monitor_id(&self) -> Option<&MonitorId> {
        self.running.as_ref().map(|r| &r.id)
    }

    /// The supervisor the running configuration is registered with.
    pub fn active_supervisor(&self) -> Option<&ProcessSupervisor> {
        self.running.as_ref().map(|r| &r.supervisor)
    }

    /// Render and install the monitor's fragment, then register it.
    ///
    /// `context` must be a JSON object (or null). The keys `bundleDir`,
    /// `pluginRoot`, `pythonPluginRoot`, `monitorID` and `intervalSeconds`
    /// are added to it before rendering. A previous configuration is shut
    /// down first.
    pub async fn set_configuration_and_run(
        &mut self,
        settings: &MonitorSettings,
        context: Value,
    ) -> Result<()> {
        self.shutdown().await;

        if settings.id.is_empty() {
            return Err(SupervisorError::EmptyMonitorId);
        }

        let supervisor = if settings.isolated {
            self.supervisor
                .isolated(&settings.id, settings.interval_seconds)
                .await?
        } else {
            self.supervisor.clone()
        };

        match self.install(&supervisor, settings, context) {
            Ok(fragment) => {
                self.running = Some(Running {
                    id: settings.id.clone(),
                    supervisor: supervisor.clone(),
                    fragment,
                });
            }
            Err(e) => {
                if settings.isolated {
                    supervisor.shutdown().await;
                }
                return Err(e);
            }
        }

        supervisor
            .configure_from_monitor(&settings.id, &self.output, self.uses_shared_subsystem)
            .await
    }

    fn install(
        &self,
        supervisor: &ProcessSupervisor,
        settings: &MonitorSettings,
        context: Value,
    ) -> Result<PathBuf> {
        let conf = supervisor.config()?;
        let context = render_context(&conf, settings, context)?;
        let rendered = self.template.render(&context)?;

        let path = conf
            .managed_config_dir()
            .join(fragment_file_name(self.template.name(), &settings.id));
        write_conf_file(&rendered, &path)?;

        tracing::info!(
            monitor_id = %settings.id,
            instance = %conf.instance_name,
            path = %path.display(),
            "installed collectd monitor config"
        );
        Ok(path)
    }

    /// Remove the fragment and deregister. Does nothing when not running.
    pub async fn shutdown(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        if let Err(e) = remove_conf_file(&running.fragment) {
            tracing::warn!(monitor_id = %running.id, error = %e, "failed to remove monitor config");
        }
        running.supervisor.monitor_did_shutdown(&running.id).await;
    }
}

fn render_context(conf: &SupervisorConfig, settings: &MonitorSettings, context: Value) -> Result<Value> {
    let mut map = match context {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            return Err(SupervisorError::InvalidConfig(format!(
                "monitor {} context must be an object, got {}",
                settings.id, other
            )))
        }
    };

    let interval = match settings.interval_seconds {
        0 => conf.effective_interval_seconds(),
        secs => secs,
    };
    map.insert("bundleDir".into(), conf.bundle_dir.display().to_string().into());
    map.insert("pluginRoot".into(), conf.plugin_root().display().to_string().into());
    map.insert(
        "pythonPluginRoot".into(),
        conf.python_plugin_root().display().to_string().into(),
    );
    map.insert(MONITOR_ID_KEY.into(), settings.id.as_str().into());
    map.insert("intervalSeconds".into(), interval.into());
    Ok(Value::Object(map))
}
