//! Wires configured monitors to a collectd supervisor.

use std::sync::Arc;

use anyhow::{Context, Result};
use collectd_supervisor::template::Template;
use collectd_supervisor::{MonitorCore, Output, ProcessSupervisor};

use crate::settings::{AgentSettings, MonitorEntry};
use crate::sink::JsonLinesSink;

/// A running agent: one main supervisor plus its monitors.
#[derive(Debug)]
pub struct Agent {
    supervisor: ProcessSupervisor,
    monitors: Vec<MonitorCore>,
}

impl Agent {
    /// Start every configured monitor against the bundled collectd.
    pub async fn start(settings: AgentSettings, sink: JsonLinesSink) -> Result<Self> {
        Self::start_with(settings, ProcessSupervisor::new(), sink).await
    }

    /// Start with a caller-provided (unconfigured) supervisor.
    ///
    /// Monitors that fail to start are logged and skipped; the agent keeps
    /// running the others.
    pub async fn start_with(
        settings: AgentSettings,
        supervisor: ProcessSupervisor,
        sink: JsonLinesSink,
    ) -> Result<Self> {
        supervisor
            .configure(settings.collectd.clone())
            .await
            .context("failed to configure collectd")?;

        let mut monitors = Vec::with_capacity(settings.monitors.len());
        for entry in &settings.monitors {
            match start_monitor(entry, &supervisor, &sink).await {
                Ok(monitor) => monitors.push(monitor),
                Err(e) => tracing::error!(monitor_id = %entry.id, error = ?e, "monitor failed to start"),
            }
        }

        tracing::info!(
            configured = settings.monitors.len(),
            running = monitors.len(),
            "collectd agent started"
        );
        Ok(Self {
            supervisor,
            monitors,
        })
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    pub fn running_monitors(&self) -> usize {
        self.monitors.len()
    }

    /// Shut down every monitor, then collectd itself.
    pub async fn shutdown(mut self) {
        for monitor in &mut self.monitors {
            monitor.shutdown().await;
        }
        self.supervisor.shutdown().await;
        tracing::info!("collectd agent stopped");
    }
}

async fn start_monitor(
    entry: &MonitorEntry,
    supervisor: &ProcessSupervisor,
    sink: &JsonLinesSink,
) -> Result<MonitorCore> {
    let text = tokio::fs::read_to_string(&entry.template)
        .await
        .with_context(|| format!("failed to read template {}", entry.template.display()))?;
    let template = Template::parse(entry.template_name()?, &text)?;

    let output: Arc<dyn Output> = Arc::new(sink.for_monitor(entry.id.clone()));
    let mut monitor =
        MonitorCore::new(template, output, supervisor.clone()).with_shared_subsystem(entry.jmx);
    monitor
        .set_configuration_and_run(&entry.settings(), entry.context.clone())
        .await?;
    Ok(monitor)
}
