//! JSON-lines output for monitor data.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use collectd_supervisor::Output;
use collectd_types::{Datapoint, Event, MonitorId};
use parking_lot::Mutex;
use serde::Serialize;

#[derive(Serialize)]
#[serde(rename_all = "lowercase")]
enum Record<'a> {
    Datapoint(&'a Datapoint),
    Event(&'a Event),
}

#[derive(Serialize)]
struct Line<'a> {
    #[serde(rename = "monitorID")]
    monitor_id: &'a MonitorId,
    #[serde(flatten)]
    record: Record<'a>,
}

/// Writes every datapoint and event as one JSON object per line.
///
/// Each monitor gets its own [`MonitorSink`] so lines carry the monitor id.
#[derive(Clone)]
pub struct JsonLinesSink {
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl std::fmt::Debug for JsonLinesSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonLinesSink").finish_non_exhaustive()
    }
}

impl JsonLinesSink {
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self {
            writer: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    /// Append to `path`, creating it if needed.
    pub fn file(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::new(io::LineWriter::new(file)))
    }

    pub fn for_monitor(&self, monitor_id: MonitorId) -> MonitorSink {
        MonitorSink {
            monitor_id,
            sink: self.clone(),
        }
    }

    fn write_lines<'a>(&self, monitor_id: &MonitorId, records: impl Iterator<Item = Record<'a>>) {
        let mut writer = self.writer.lock();
        for record in records {
            let line = Line { monitor_id, record };
            let result = serde_json::to_writer(&mut *writer, &line)
                .map_err(io::Error::from)
                .and_then(|()| writer.write_all(b"\n"));
            if let Err(e) = result {
                tracing::warn!(%monitor_id, error = %e, "failed to write monitor data");
                return;
            }
        }
        if let Err(e) = writer.flush() {
            tracing::warn!(%monitor_id, error = %e, "failed to flush monitor data");
        }
    }
}

/// The [`Output`] of one monitor.
#[derive(Debug, Clone)]
pub struct MonitorSink {
    monitor_id: MonitorId,
    sink: JsonLinesSink,
}

impl Output for MonitorSink {
    fn send_datapoints(&self, datapoints: Vec<Datapoint>) {
        self.sink
            .write_lines(&self.monitor_id, datapoints.iter().map(Record::Datapoint));
    }

    fn send_events(&self, events: Vec<Event>) {
        self.sink
            .write_lines(&self.monitor_id, events.iter().map(Record::Event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<Vec<u8>>>);

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn lines(buf: &Shared) -> Vec<serde_json::Value> {
        String::from_utf8(buf.0.lock().clone())
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn test_lines_are_tagged_with_monitor() {
        let buf = Shared::default();
        let sink = JsonLinesSink::new(buf.clone());
        let redis = sink.for_monitor(MonitorId::from("redis-1"));

        redis.send_datapoints(vec![
            Datapoint::gauge("load.shortterm", 0.5).dimension("host", "web"),
            Datapoint::counter("if_octets.rx", 10),
        ]);
        redis.send_events(vec![Event::builder("disk full").build()]);

        let lines = lines(&buf);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["monitorID"], "redis-1");
        assert_eq!(lines[0]["datapoint"]["metric"], "load.shortterm");
        assert_eq!(lines[0]["datapoint"]["dimensions"]["host"], "web");
        assert_eq!(lines[1]["datapoint"]["metric"], "if_octets.rx");
        assert_eq!(lines[2]["event"]["event_type"], "disk full");
    }

    #[test]
    fn test_file_sink_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.jsonl");

        for value in [1, 2] {
            let sink = JsonLinesSink::file(&path).unwrap();
            sink.for_monitor(MonitorId::from("m"))
                .send_datapoints(vec![Datapoint::counter("c", value)]);
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }
}
