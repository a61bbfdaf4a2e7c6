//! # collectd-agent
//!
//! A host agent that runs collectd-backed monitors.
//!
//! The agent reads a settings file, starts one supervised collectd process
//! (plus isolated ones for monitors that ask for it), installs each
//! monitor's config fragment, and writes everything collectd reports back as
//! JSON lines tagged with the monitor id.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        collectd-agent                        │
//! │  ┌──────────┐   ┌────────────┐   ┌────────────────────────┐  │
//! │  │ settings │──▶│   agent    │──▶│ MonitorCore (per mon.) │  │
//! │  └──────────┘   └─────┬──────┘   └───────────┬────────────┘  │
//! │                       │                      │ fragment      │
//! │                       ▼                      ▼               │
//! │               ┌─────────────────────────────────────┐        │
//! │               │ ProcessSupervisor ──▶ collectd (-f) │        │
//! │               │        ▲                  │         │        │
//! │               │        └── write server ◀─┘ HTTP    │        │
//! │               └──────────────┬──────────────────────┘        │
//! │                              ▼                               │
//! │                     sink (JSON lines)                        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! - **[`settings`]**: settings file and environment overrides
//! - **[`agent`]**: starts and stops the configured monitors
//! - **[`sink`]**: JSON-lines [`Output`](collectd_supervisor::Output)
//! - **[`logging`]**: tracing subscriber setup
//!
//! ## Usage
//!
//! ```bash
//! collectd-agent --config /etc/collectd-agent/agent.toml
//! COLLECTD_AGENT__COLLECTD__READ_THREADS=8 collectd-agent --config agent.toml --log-level debug
//! ```
//!
//! ### As a library
//!
//! ```no_run
//! use collectd_agent::{Agent, AgentSettings, JsonLinesSink};
//!
//! # tokio_test::block_on(async {
//! let settings = AgentSettings::load("agent.toml".as_ref()).unwrap();
//! let agent = Agent::start(settings, JsonLinesSink::stdout()).await.unwrap();
//! agent.shutdown().await;
//! # });
//! ```

pub mod agent;
pub mod logging;
pub mod settings;
pub mod sink;

pub use agent::Agent;
pub use settings::{AgentSettings, MonitorEntry};
pub use sink::{JsonLinesSink, MonitorSink};
