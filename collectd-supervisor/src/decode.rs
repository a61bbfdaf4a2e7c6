//! Decoding `write_http` records into routed datapoints and events.
//!
//! Every decoded element must end up with exactly one [`MonitorId`]. The id is
//! taken, in order of preference, from the record's `meta`, from a
//! `monitorID` dimension, or from the request's `monitorID` query parameter.
//! It is never forwarded as a dimension or property.

use std::collections::BTreeMap;

use collectd_types::{
    Datapoint, Event, MetricKind, MonitorId, PropertyValue, Value, MONITOR_ID_KEY,
};
use serde_json::Number;

use crate::error::DecodeError;
use crate::wire::{parse_body, WriteRecord};

/// Prefix of query parameters that add a dimension to every element.
pub const QUERY_DIMENSION_PREFIX: &str = "sfxdim_";

/// Event type used when a notification names neither type nor plugin.
pub const DEFAULT_EVENT_TYPE: &str = "collectd.notification";

/// A payload tagged with the monitor it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct Routed<T> {
    pub monitor_id: MonitorId,
    pub item: T,
}

/// Dimensions of one element, with the correlation key diverted.
///
/// Inserting `monitorID` records the routing id instead of a dimension, so
/// the map handed to a monitor can never contain it.
#[derive(Debug, Clone, Default)]
pub struct DimensionSet {
    dimensions: BTreeMap<String, String>,
    monitor_id: Option<MonitorId>,
}

impl DimensionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a dimension. Empty values are skipped.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        if value.is_empty() {
            return;
        }
        if key == MONITOR_ID_KEY {
            self.monitor_id = Some(MonitorId::from(value));
        } else {
            self.dimensions.insert(key, value);
        }
    }

    /// The id diverted from a `monitorID` dimension, if any.
    pub fn monitor_id(&self) -> Option<&MonitorId> {
        self.monitor_id.as_ref()
    }

    pub fn into_parts(self) -> (BTreeMap<String, String>, Option<MonitorId>) {
        (self.dimensions, self.monitor_id)
    }
}

/// Per-request routing information taken from the URL query string.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestContext {
    /// Id used for records that carry none of their own.
    pub default_monitor_id: Option<MonitorId>,
    /// Dimensions added to every element.
    pub extra_dimensions: BTreeMap<String, String>,
}

impl RequestContext {
    /// Build from a raw query string such as `monitorID=m1&sfxdim_env=prod`.
    pub fn from_query(query: Option<&str>) -> Self {
        let mut ctx = Self::default();
        let Some(query) = query else {
            return ctx;
        };

        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            if key == MONITOR_ID_KEY {
                if !value.is_empty() {
                    ctx.default_monitor_id = Some(MonitorId::from(value.into_owned()));
                }
            } else if let Some(dim) = key.strip_prefix(QUERY_DIMENSION_PREFIX) {
                if !dim.is_empty() {
                    ctx.extra_dimensions.insert(dim.to_string(), value.into_owned());
                }
            }
        }
        ctx
    }
}

/// Everything decoded from one request.
#[derive(Debug, Default)]
pub struct Decoded {
    pub datapoints: Vec<Routed<Datapoint>>,
    pub events: Vec<Routed<Event>>,
    /// Elements dropped because no monitor id could be determined.
    pub unrouted: usize,
    /// Elements dropped because they could not be interpreted.
    pub invalid: usize,
}

impl Decoded {
    /// Group the routed elements by monitor id.
    pub fn into_batch(self) -> RoutedBatch {
        let mut batch = RoutedBatch::default();
        for routed in self.datapoints {
            batch
                .monitors
                .entry(routed.monitor_id)
                .or_default()
                .datapoints
                .push(routed.item);
        }
        for routed in self.events {
            batch
                .monitors
                .entry(routed.monitor_id)
                .or_default()
                .events
                .push(routed.item);
        }
        batch
    }
}

/// The datapoints and events destined for one monitor.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MonitorBatch {
    pub datapoints: Vec<Datapoint>,
    pub events: Vec<Event>,
}

impl MonitorBatch {
    pub fn len(&self) -> usize {
        self.datapoints.len() + self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Decoded output of one request, grouped per monitor.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RoutedBatch {
    pub monitors: BTreeMap<MonitorId, MonitorBatch>,
}

impl RoutedBatch {
    /// Total number of elements across all monitors.
    pub fn len(&self) -> usize {
        self.monitors.values().map(MonitorBatch::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Parse and decode a request body.
pub fn decode_body(body: &[u8], ctx: &RequestContext) -> Result<Decoded, DecodeError> {
    Ok(decode_records(parse_body(body)?, ctx))
}

/// Decode already-parsed records.
pub fn decode_records(records: Vec<WriteRecord>, ctx: &RequestContext) -> Decoded {
    let mut decoded = Decoded::default();
    for record in records {
        if record.is_notification() {
            decode_notification(record, ctx, &mut decoded);
        } else {
            decode_value_list(record, ctx, &mut decoded);
        }
    }
    decoded
}

fn decode_value_list(mut record: WriteRecord, ctx: &RequestContext, out: &mut Decoded) {
    let values = record.values.take().unwrap_or_default();
    if values.is_empty() {
        tracing::debug!(plugin = %record.plugin, "collectd record has no values and is not a notification, skipping");
        return;
    }
    let (meta_id, meta) = split_meta(std::mem::take(&mut record.meta));
    let dims = base_dimensions(&record, ctx);
    let (dimensions, dim_id) = dims.into_parts();

    let Some(monitor_id) = meta_id.or(dim_id).or_else(|| ctx.default_monitor_id.clone()) else {
        tracing::error!(
            plugin = %record.plugin,
            type_name = %record.type_name,
            count = values.len(),
            "collectd value list has no monitor id, dropping"
        );
        out.unrouted += values.len();
        return;
    };

    let timestamp_ms = record.timestamp_ms();
    for (i, raw) in values.into_iter().enumerate() {
        let (Some(dsname), Some(dstype)) = (record.dsnames.get(i), record.dstypes.get(i)) else {
            tracing::warn!(index = i, type_name = %record.type_name, "collectd value has no dsname or dstype, dropping");
            out.invalid += 1;
            continue;
        };
        let (dsname, dstype) = (dsname.as_str(), dstype.as_str());

        let Some(kind) = MetricKind::from_dstype(dstype) else {
            tracing::warn!(dstype, dsname, "unknown collectd dstype, dropping value");
            out.invalid += 1;
            continue;
        };
        let Some(value) = raw.as_ref().and_then(|n| convert_value(n, kind)) else {
            out.invalid += 1;
            continue;
        };

        let mut dp = Datapoint::new(metric_name(&record, dsname), value, kind);
        dp.dimensions = dimensions.clone();
        dp.meta = meta.clone();
        dp.timestamp_ms = timestamp_ms;

        out.datapoints.push(Routed {
            monitor_id: monitor_id.clone(),
            item: dp,
        });
    }
}

fn decode_notification(mut record: WriteRecord, ctx: &RequestContext, out: &mut Decoded) {
    let (meta_id, meta) = split_meta(std::mem::take(&mut record.meta));
    let (dimensions, dim_id) = base_dimensions(&record, ctx).into_parts();

    let Some(monitor_id) = meta_id.or(dim_id).or_else(|| ctx.default_monitor_id.clone()) else {
        tracing::error!(
            plugin = %record.plugin,
            "collectd notification has no monitor id, dropping"
        );
        out.unrouted += 1;
        return;
    };

    let event_type = [&record.type_name, &record.plugin]
        .into_iter()
        .find(|s| !s.is_empty())
        .cloned()
        .unwrap_or_else(|| DEFAULT_EVENT_TYPE.to_string());

    let mut event = Event::builder(event_type).build();
    event.dimensions = dimensions;
    event.properties = meta;
    if let Some(message) = record.message.take() {
        event.properties.insert("message".to_string(), message.into());
    }
    if let Some(severity) = record.severity.take() {
        event.properties.insert("severity".to_string(), severity.into());
    }
    event.timestamp_ms = record.timestamp_ms();

    out.events.push(Routed {
        monitor_id,
        item: event,
    });
}

/// `type[.type_instance][.dsname]`, omitting the default `value` dsname.
fn metric_name(record: &WriteRecord, dsname: &str) -> String {
    let mut name = if record.type_name.is_empty() {
        record.plugin.clone()
    } else {
        record.type_name.clone()
    };
    if !record.type_instance.is_empty() {
        name.push('.');
        name.push_str(&record.type_instance);
    }
    if dsname != "value" && !dsname.is_empty() {
        name.push('.');
        name.push_str(dsname);
    }
    name
}

fn base_dimensions(record: &WriteRecord, ctx: &RequestContext) -> DimensionSet {
    let mut dims = DimensionSet::new();
    for (key, value) in &ctx.extra_dimensions {
        dims.insert(key.as_str(), value.as_str());
    }
    dims.insert("host", record.host.as_str());
    dims.insert("plugin", record.plugin.as_str());

    let (instance, encoded) = split_encoded_dimensions(&record.plugin_instance);
    dims.insert("plugin_instance", instance);
    for (key, value) in encoded {
        dims.insert(key, value);
    }
    dims
}

/// Split `name[k=v,k2=v2]` into `name` and its bracketed dimensions.
///
/// Input without a well-formed trailing bracket is returned unchanged.
pub fn split_encoded_dimensions(raw: &str) -> (&str, Vec<(&str, &str)>) {
    let Some(open) = raw.find('[') else {
        return (raw, Vec::new());
    };
    let Some(inner) = raw[open + 1..].strip_suffix(']') else {
        return (raw, Vec::new());
    };

    let mut pairs = Vec::new();
    for part in inner.split(',').filter(|p| !p.is_empty()) {
        match part.split_once('=') {
            Some((k, v)) if !k.is_empty() => pairs.push((k, v)),
            _ => return (raw, Vec::new()),
        }
    }
    (&raw[..open], pairs)
}

fn split_meta(
    meta: BTreeMap<String, serde_json::Value>,
) -> (Option<MonitorId>, BTreeMap<String, PropertyValue>) {
    let mut monitor_id = None;
    let mut props = BTreeMap::new();
    for (key, value) in meta {
        if key == MONITOR_ID_KEY {
            if let Some(id) = value.as_str().filter(|s| !s.is_empty()) {
                monitor_id = Some(MonitorId::from(id));
            }
            continue;
        }
        if let Some(prop) = to_property(value) {
            props.insert(key, prop);
        }
    }
    (monitor_id, props)
}

fn to_property(value: serde_json::Value) -> Option<PropertyValue> {
    match value {
        serde_json::Value::String(s) => Some(PropertyValue::Str(s)),
        serde_json::Value::Bool(b) => Some(PropertyValue::Bool(b)),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Some(PropertyValue::Int(i)),
            None => n.as_f64().map(PropertyValue::Float),
        },
        _ => None,
    }
}

fn convert_value(n: &Number, kind: MetricKind) -> Option<Value> {
    if kind.is_integral() {
        if let Some(i) = n.as_i64() {
            return Some(Value::Int(i));
        }
        if let Some(u) = n.as_u64() {
            return Some(Value::Int(i64::try_from(u).unwrap_or(i64::MAX)));
        }
        n.as_f64().filter(|f| f.is_finite()).map(|f| Value::Int(f as i64))
    } else {
        n.as_f64().map(Value::Float)
    }
}
