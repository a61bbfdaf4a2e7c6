//! # collectd-supervisor
//!
//! Runs a collectd child process on behalf of in-process monitors.
//!
//! Monitors describe what they want collected as collectd config fragments.
//! The supervisor renders the master `collectd.conf`, starts collectd, and
//! restarts it (debounced) whenever monitors come and go. collectd reports
//! back through its `write_http` plugin to an embedded HTTP server, and every
//! datapoint or notification is handed to the monitor whose id it carries.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use collectd_supervisor::{
//!     template::Template, ChannelOutput, MonitorCore, MonitorSettings, ProcessSupervisor,
//!     SupervisorConfig,
//! };
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> collectd_supervisor::Result<()> {
//!     let supervisor = ProcessSupervisor::new();
//!     supervisor
//!         .configure(SupervisorConfig::builder().bundle_dir("/opt/collectd").build())
//!         .await?;
//!
//!     let (output, mut rx) = ChannelOutput::new(256);
//!     let template = Template::parse("load", "LoadPlugin load\n")?;
//!     let mut monitor = MonitorCore::new(template, Arc::new(output), supervisor.clone());
//!     monitor
//!         .set_configuration_and_run(&MonitorSettings::new("load-1"), json!({}))
//!         .await?;
//!
//!     while let Some(message) = rx.recv().await {
//!         println!("{:?}", message);
//!     }
//!
//!     monitor.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Debounced restarts**: bursts of monitor changes cause one restart
//! - **Routing by monitor id**: from record metadata, dimensions or the URL
//! - **Isolated instances**: heavy monitors can get their own collectd
//! - **Private config files**: everything generated is written with mode 0600

mod config;
mod debounce;
mod decode;
mod error;
mod machine;
mod monitor;
mod output;
mod process;
mod registry;
mod render;
mod state;
mod supervisor;
pub mod template;
mod wire;
mod write_server;

pub use config::{SupervisorConfig, SupervisorConfigBuilder, DEFAULT_INTERVAL_SECONDS, LOG_LEVELS};
pub use debounce::Debouncer;
pub use decode::{
    decode_body, decode_records, split_encoded_dimensions, Decoded, DimensionSet, MonitorBatch,
    RequestContext, Routed, RoutedBatch, DEFAULT_EVENT_TYPE, QUERY_DIMENSION_PREFIX,
};
pub use error::{DecodeError, RenderError, Result, SupervisorError};
pub use monitor::{MonitorCore, MonitorSettings};
pub use output::{ChannelOutput, Output, OutputMessage};
pub use process::{parse_log_line, BundledCollectd, CollectdLogLevel, Launcher};
pub use registry::{DispatchReport, MonitorRegistration, RegistrationTable};
pub use render::{
    fragment_file_name, remove_conf_file, remove_instance_dir, render_master, write_conf_file,
    MASTER_TEMPLATE,
};
pub use state::{ProcessState, Signal, Transition};
pub use supervisor::{ProcessSupervisor, RESTART_DELAY, RETRY_DELAY};
pub use wire::WriteRecord;
pub use write_server::{BatchReceiver, WriteServer, MAX_BODY_BYTES};

// Re-export types for convenience
pub use collectd_types::{Datapoint, Event, MetricKind, MonitorId, PropertyValue, Value};
