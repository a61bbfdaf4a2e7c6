//! # collectd-types
//!
//! Core types exchanged between the collectd supervisor and the monitors that
//! use it. The write-back server decodes collectd's `write_http` payloads into
//! these types and hands them to the output sink registered by each monitor.
//!
//! ## Design Goals
//!
//! - **Zero required dependencies**: Core types work without any serialization framework
//! - **Optional serialization**: Enable the `serde` feature for JSON and friends
//! - **Opaque routing key**: [`MonitorId`] is a newtype, never a bare `String`
//! - **Ergonomic builders**: Fluent API for constructing datapoints and events
//!
//! ## Features
//!
//! - `serde`: serialization via serde
//!
//! ## Example
//!
//! ```rust
//! use collectd_types::{Datapoint, Event, MetricKind, MonitorId, Value};
//!
//! let dp = Datapoint::gauge("load.shortterm", 0.42)
//!     .dimension("host", "web-1")
//!     .dimension("plugin", "load")
//!     .timestamp_ms(1_703_160_000_000);
//!
//! assert_eq!(dp.kind, MetricKind::Gauge);
//! assert_eq!(dp.value, Value::Float(0.42));
//!
//! let ev = Event::builder("collectd.notification")
//!     .dimension("host", "web-1")
//!     .property("severity", "FAILURE")
//!     .build();
//!
//! assert_eq!(ev.event_type, "collectd.notification");
//!
//! let id = MonitorId::from("collectd-redis-1");
//! assert_eq!(id.as_str(), "collectd-redis-1");
//! ```

mod datapoint;
mod event;
mod id;
mod value;

pub use datapoint::*;
pub use event::*;
pub use id::*;
pub use value::*;

/// Name of the field that carries the correlation id, whether it arrives as
/// metadata, an event property, a dimension or a query parameter.
pub const MONITOR_ID_KEY: &str = "monitorID";
