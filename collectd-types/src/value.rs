//! Sample values, metric kinds and property values.

use std::fmt;

/// The numeric value of a single sample.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum Value {
    /// Integer value, used for counters.
    Int(i64),
    /// Floating point value, used for gauges.
    Float(f64),
}

impl Value {
    /// The value as a float, regardless of representation.
    pub fn as_f64(&self) -> f64 {
        match self {
            Value::Int(v) => *v as f64,
            Value::Float(v) => *v,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

/// How a sample should be interpreted downstream.
///
/// Maps collectd data source types:
///
/// | collectd `dstype` | kind |
/// |---|---|
/// | `gauge` | [`MetricKind::Gauge`] |
/// | `derive` | [`MetricKind::Counter`] |
/// | `counter` | [`MetricKind::Cumulative`] |
/// | `absolute` | [`MetricKind::Count`] |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum MetricKind {
    Gauge,
    Counter,
    Cumulative,
    Count,
}

impl MetricKind {
    /// Resolve a collectd `dstype` string, case-insensitively.
    pub fn from_dstype(dstype: &str) -> Option<Self> {
        match dstype.to_ascii_lowercase().as_str() {
            "gauge" => Some(MetricKind::Gauge),
            "derive" => Some(MetricKind::Counter),
            "counter" => Some(MetricKind::Cumulative),
            "absolute" => Some(MetricKind::Count),
            _ => None,
        }
    }

    /// Gauges carry floats, everything else integers.
    pub fn is_integral(&self) -> bool {
        !matches!(self, MetricKind::Gauge)
    }
}

/// A scalar value attached to a datapoint's metadata or an event's properties.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl PropertyValue {
    /// Returns the string payload, if this is a string property.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        PropertyValue::Str(s.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        PropertyValue::Str(s)
    }
}

impl From<bool> for PropertyValue {
    fn from(b: bool) -> Self {
        PropertyValue::Bool(b)
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::Int(v)
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        PropertyValue::Float(v)
    }
}
