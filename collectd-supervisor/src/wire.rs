//! The `write_http` JSON wire format.
//!
//! collectd's `write_http` plugin (with `Format "JSON"`) posts a JSON array
//! per flush. Value lists and notifications share the array:
//!
//! ```json
//! [
//!   {"values": [0.42], "dstypes": ["gauge"], "dsnames": ["value"],
//!    "time": 1703160000.123, "interval": 10.0, "host": "web-1",
//!    "plugin": "load", "plugin_instance": "", "type": "load",
//!    "type_instance": "", "meta": {"monitorID": "load-1"}},
//!   {"severity": "FAILURE", "message": "disk full", "time": 1703160000.5,
//!    "host": "web-1", "plugin": "df", "type": "df_complex"}
//! ]
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Number;

use crate::error::DecodeError;

/// One element of a `write_http` JSON array.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteRecord {
    /// Present on value lists. Individual values are `null` for NaN.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<Option<Number>>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dstypes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dsnames: Vec<String>,
    /// Seconds since the epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<f64>,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub plugin: String,
    #[serde(default)]
    pub plugin_instance: String,
    #[serde(default, rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub type_instance: String,
    /// Present on notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, serde_json::Value>,
}

impl WriteRecord {
    /// A record with `time`, `severity` and `message` all set is a
    /// notification, whatever else it carries.
    pub fn is_notification(&self) -> bool {
        self.time.is_some() && self.severity.is_some() && self.message.is_some()
    }

    /// The record time in milliseconds since the epoch.
    pub fn timestamp_ms(&self) -> Option<u64> {
        self.time
            .filter(|t| t.is_finite() && *t >= 0.0)
            .map(|t| (t * 1000.0).round() as u64)
    }
}

/// Parse a request body into records.
pub fn parse_body(body: &[u8]) -> Result<Vec<WriteRecord>, DecodeError> {
    Ok(serde_json::from_slice(body)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_value_list() {
        let body = br#"[{"values":[1901474177,null],"dstypes":["counter","gauge"],
            "dsnames":["rx","tx"],"time":1280959128.5,"interval":10,"host":"leeloo",
            "plugin":"interface","plugin_instance":"eth0","type":"if_octets","type_instance":""}]"#;

        let records = parse_body(body).unwrap();
        assert_eq!(records.len(), 1);
        let r = &records[0];
        let values = r.values.as_ref().unwrap();
        assert_eq!(values[0].as_ref().and_then(Number::as_i64), Some(1901474177));
        assert!(values[1].is_none());
        assert_eq!(r.type_name, "if_octets");
        assert_eq!(r.timestamp_ms(), Some(1_280_959_128_500));
        assert!(!r.is_notification());
    }

    #[test]
    fn test_parse_notification() {
        let body = br#"[{"severity":"WARNING","message":"load high","time":1.0,
            "host":"h","plugin":"load","meta":{"monitorID":"m1","extra":3}}]"#;

        let records = parse_body(body).unwrap();
        assert!(records[0].is_notification());
        assert_eq!(records[0].meta.len(), 2);
    }

    #[test]
    fn test_notification_needs_time_severity_and_message() {
        let body = br#"[
            {"message":"m","plugin":"p"},
            {"severity":"OKAY","message":"m"},
            {"values":[1],"dstypes":["gauge"],"dsnames":["value"],
             "time":1.0,"severity":"WARNING","message":"m"}
        ]"#;

        let records = parse_body(body).unwrap();
        assert!(!records[0].is_notification());
        assert!(!records[1].is_notification());
        assert!(records[2].is_notification());
    }

    #[test]
    fn test_parse_rejects_non_array() {
        assert!(parse_body(b"{\"values\": []}").is_err());
        assert!(parse_body(b"not json").is_err());
    }

    #[test]
    fn test_empty_array() {
        assert!(parse_body(b"[]").unwrap().is_empty());
    }
}
