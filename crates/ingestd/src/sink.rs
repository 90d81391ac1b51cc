//! Storage and monitoring sinks: the abstract appenders accepted batches
//! and decision events are handed off to. Concrete file-backed and
//! stdout/null implementations, synchronous throughout since this
//! service has no async runtime.

use crate::data_model::{ClientId, DecisionEvent, Metric};
use crate::error::SinkError;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Durable append target for accepted metrics. Single-writer from the
/// caller's perspective (the durable writer's background thread is the
/// only caller).
pub trait StorageSink: Send + Sync {
    fn append(&self, line: &str) -> Result<(), SinkError>;
    fn flush(&self) -> Result<(), SinkError>;
}

/// Where the metrics flusher sends each decision event it drains.
pub trait MonitoringSink: Send + Sync {
    fn emit(&self, client: &ClientId, event: DecisionEvent) -> Result<(), SinkError>;
}

/// One line per metric, in a self-delimiting layout:
/// `observed_at_ns\tclient_id\tname\tkind\tvalue\ttag=val;tag=val`.
///
/// `observed_at_ns` is relative to process start (an `Instant` carries no
/// wall-clock epoch); callers that need absolute time should record the
/// process start epoch separately. Tabs cannot appear in validated names,
/// tags, or client ids, so the format is recoverable line-by-line without
/// escaping.
pub fn encode_metric_line(client: &ClientId, metric: &Metric, process_start_ns: u128) -> String {
    let observed_at_ns = process_start_ns + metric.observed_at.elapsed().as_nanos();
    let client_id = String::from_utf8_lossy(client.as_bytes());
    let mut tags: Vec<String> = metric
        .tags
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect();
    tags.sort_unstable();
    format!(
        "{}\t{}\t{}\t{}\t{}\t{}",
        observed_at_ns,
        client_id,
        metric.name,
        metric.kind.as_str(),
        metric.value,
        tags.join(";")
    )
}

/// Epoch-relative nanosecond timestamp for process start, used to convert
/// `Instant`-stamped metrics into an absolute time for storage.
pub fn unix_epoch_nanos_now() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
}

/// Appends lines to a file, flushing on demand. Guarded by a mutex since
/// multiple retry attempts from the writer may call in sequence but never
/// concurrently in practice; the mutex exists for the `Sync` bound, not
/// contention.
pub struct FileStorageSink {
    writer: Mutex<BufWriter<File>>,
}

impl FileStorageSink {
    pub fn open(path: &Path) -> Result<Self, SinkError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
        })
    }
}

impl StorageSink for FileStorageSink {
    fn append(&self, line: &str) -> Result<(), SinkError> {
        let mut writer = self.writer.lock().unwrap();
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&self) -> Result<(), SinkError> {
        let mut writer = self.writer.lock().unwrap();
        writer.flush()?;
        Ok(())
    }
}

/// Discards everything. Useful for benchmarking the pipeline without disk
/// I/O, or for tests that don't care about durability.
pub struct NullStorageSink;

impl StorageSink for NullStorageSink {
    fn append(&self, _line: &str) -> Result<(), SinkError> {
        Ok(())
    }

    fn flush(&self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Writes one JSON-lines record per decision event to stdout.
pub struct StdoutMonitoringSink;

impl MonitoringSink for StdoutMonitoringSink {
    fn emit(&self, client: &ClientId, event: DecisionEvent) -> Result<(), SinkError> {
        let client_id = String::from_utf8_lossy(client.as_bytes());
        println!(
            "{{\"client\":\"{}\",\"allowed\":{}}}",
            client_id, event.allowed
        );
        Ok(())
    }
}

/// Discards decision events. Default when no monitoring backend is wired
/// up, and used in tests that don't assert on flusher output.
pub struct NullMonitoringSink;

impl MonitoringSink for NullMonitoringSink {
    fn emit(&self, _client: &ClientId, _event: DecisionEvent) -> Result<(), SinkError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_model::MetricKind;
    use std::time::Instant;

    #[test]
    fn file_sink_round_trips_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.log");
        let sink = FileStorageSink::open(&path).unwrap();
        sink.append("line one").unwrap();
        sink.append("line two").unwrap();
        sink.flush().unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "line one\nline two\n");
    }

    #[test]
    fn encode_metric_line_is_tab_delimited_and_sorts_tags() {
        let client = ClientId::from_header(Some(b"c1"));
        let mut tags = std::collections::HashMap::new();
        tags.insert("b".to_string(), "2".to_string());
        tags.insert("a".to_string(), "1".to_string());
        let metric = Metric {
            name: "cpu".to_string(),
            value: 75.5,
            kind: MetricKind::Gauge,
            tags,
            observed_at: Instant::now(),
        };
        let line = encode_metric_line(&client, &metric, 0);
        let fields: Vec<&str> = line.split('\t').collect();
        assert_eq!(fields[1], "c1");
        assert_eq!(fields[2], "cpu");
        assert_eq!(fields[3], "gauge");
        assert_eq!(fields[4], "75.5");
        assert_eq!(fields[5], "a=1;b=2");
    }
}
