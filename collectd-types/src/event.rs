//! Event - a collectd notification.

use std::collections::BTreeMap;

use crate::PropertyValue;

/// Broad classification of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "SCREAMING_SNAKE_CASE"))]
pub enum EventCategory {
    #[default]
    Agent,
    Alert,
    UserDefined,
}

/// A notification emitted by a collectd plugin.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Event {
    pub event_type: String,

    #[cfg_attr(feature = "serde", serde(default))]
    pub category: EventCategory,

    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "BTreeMap::is_empty")
    )]
    pub dimensions: BTreeMap<String, String>,

    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "BTreeMap::is_empty")
    )]
    pub properties: BTreeMap<String, PropertyValue>,

    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub timestamp_ms: Option<u64>,
}

impl Event {
    /// Start building an event of the given type.
    pub fn builder(event_type: impl Into<String>) -> EventBuilder {
        EventBuilder::new(event_type)
    }
}

/// Builder for [`Event`].
#[derive(Debug)]
pub struct EventBuilder {
    event: Event,
}

impl EventBuilder {
    /// Create a new builder.
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event: Event {
                event_type: event_type.into(),
                category: EventCategory::default(),
                dimensions: BTreeMap::new(),
                properties: BTreeMap::new(),
                timestamp_ms: None,
            },
        }
    }

    /// Set the category.
    pub fn category(mut self, category: EventCategory) -> Self {
        self.event.category = category;
        self
    }

    /// Add a dimension.
    pub fn dimension(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.event.dimensions.insert(key.into(), value.into());
        self
    }

    /// Add a property.
    pub fn property(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.event.properties.insert(key.into(), value.into());
        self
    }

    /// Set the timestamp (milliseconds since the Unix epoch).
    pub fn timestamp_ms(mut self, ts: u64) -> Self {
        self.event.timestamp_ms = Some(ts);
        self
    }

    /// Build the event.
    pub fn build(self) -> Event {
        self.event
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let ev = Event::builder("t").build();
        assert_eq!(ev.category, EventCategory::Agent);
        assert!(ev.dimensions.is_empty());
        assert!(ev.properties.is_empty());
        assert!(ev.timestamp_ms.is_none());
    }

    #[test]
    fn test_builder_all_fields() {
        let ev = Event::builder("collectd.notification")
            .category(EventCategory::Alert)
            .dimension("host", "h")
            .property("message", "disk full")
            .property("count", 3_i64)
            .timestamp_ms(99)
            .build();

        assert_eq!(ev.category, EventCategory::Alert);
        assert_eq!(ev.dimensions["host"], "h");
        assert_eq!(ev.properties["message"], PropertyValue::from("disk full"));
        assert_eq!(ev.properties["count"], PropertyValue::Int(3));
        assert_eq!(ev.timestamp_ms, Some(99));
    }
}
