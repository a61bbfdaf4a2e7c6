//! Datapoint - a single named sample.

use std::collections::BTreeMap;

use crate::{MetricKind, PropertyValue, Value};

/// A single metric sample decoded from collectd.
///
/// Dimensions are the routing-free identity of the series; `meta` holds any
/// extra metadata collectd attached to the value list.
///
/// # Example
///
/// ```rust
/// use collectd_types::{Datapoint, MetricKind};
///
/// let dp = Datapoint::counter("if_octets.rx", 1024)
///     .dimension("plugin", "interface")
///     .dimension("plugin_instance", "eth0");
///
/// assert_eq!(dp.kind, MetricKind::Counter);
/// assert_eq!(dp.dimensions.get("plugin_instance").map(String::as_str), Some("eth0"));
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Datapoint {
    /// Metric name, e.g. `memory.used` or `if_octets.rx`.
    pub metric: String,

    /// Dimension key/value pairs.
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "BTreeMap::is_empty")
    )]
    pub dimensions: BTreeMap<String, String>,

    pub value: Value,

    pub kind: MetricKind,

    /// Unix timestamp in milliseconds, if collectd supplied one.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub timestamp_ms: Option<u64>,

    /// Extra metadata carried alongside the value.
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "BTreeMap::is_empty")
    )]
    pub meta: BTreeMap<String, PropertyValue>,
}

impl Datapoint {
    /// Create a datapoint with no dimensions or metadata.
    pub fn new(metric: impl Into<String>, value: impl Into<Value>, kind: MetricKind) -> Self {
        Self {
            metric: metric.into(),
            dimensions: BTreeMap::new(),
            value: value.into(),
            kind,
            timestamp_ms: None,
            meta: BTreeMap::new(),
        }
    }

    /// Create a gauge datapoint.
    pub fn gauge(metric: impl Into<String>, value: f64) -> Self {
        Self::new(metric, Value::Float(value), MetricKind::Gauge)
    }

    /// Create a (delta) counter datapoint.
    pub fn counter(metric: impl Into<String>, value: i64) -> Self {
        Self::new(metric, Value::Int(value), MetricKind::Counter)
    }

    /// Create a cumulative counter datapoint.
    pub fn cumulative(metric: impl Into<String>, value: i64) -> Self {
        Self::new(metric, Value::Int(value), MetricKind::Cumulative)
    }

    /// Create a count datapoint (collectd `absolute`).
    pub fn count(metric: impl Into<String>, value: i64) -> Self {
        Self::new(metric, Value::Int(value), MetricKind::Count)
    }

    /// Add a dimension.
    pub fn dimension(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.dimensions.insert(key.into(), value.into());
        self
    }

    /// Add a metadata entry.
    pub fn meta(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    /// Set the timestamp in milliseconds since the Unix epoch.
    pub fn timestamp_ms(mut self, ts: u64) -> Self {
        self.timestamp_ms = Some(ts);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors_pick_kind_and_value() {
        let g = Datapoint::gauge("a", 1.5);
        assert_eq!(g.kind, MetricKind::Gauge);
        assert_eq!(g.value, Value::Float(1.5));

        let c = Datapoint::cumulative("b", 7);
        assert_eq!(c.kind, MetricKind::Cumulative);
        assert_eq!(c.value, Value::Int(7));
    }

    #[test]
    fn test_builder_methods_accumulate() {
        let dp = Datapoint::gauge("cpu.idle", 98.0)
            .dimension("host", "a")
            .dimension("host", "b")
            .meta("dsname", "value")
            .timestamp_ms(10);

        assert_eq!(dp.dimensions.len(), 1);
        assert_eq!(dp.dimensions["host"], "b");
        assert_eq!(dp.meta["dsname"], PropertyValue::from("value"));
        assert_eq!(dp.timestamp_ms, Some(10));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_serde_skips_empty_collections() {
        let dp = Datapoint::counter("x", 1);
        let json = serde_json::to_string(&dp).unwrap();
        assert!(!json.contains("dimensions"));
        assert!(!json.contains("meta"));
        assert!(!json.contains("timestamp_ms"));

        let back: Datapoint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, dp);
    }
}
