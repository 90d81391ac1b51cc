//! Durable writer: a bounded producer/consumer queue of accepted
//! batches, drained by one dedicated background thread and appended to a
//! [`StorageSink`].
//!
//! `enqueue` is the only thing the request-handling path touches; it never
//! does I/O. The background thread does all the appending, retrying a
//! failing batch a bounded number of times with exponential backoff before
//! counting it as dropped, grounded in the same retry shape the wider
//! pack's exporter wrappers use for flaky sinks.

use crate::data_model::{ClientId, Metric};
use crate::error::WriterError;
use crate::sink::{encode_metric_line, StorageSink};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{error, info, warn};

/// One accepted batch, queued for durable append. Each entry pairs a
/// metric with the client that sent it, since the writer's line format
/// needs both.
pub struct PendingBatch {
    pub client: ClientId,
    pub metrics: Vec<Metric>,
}

struct Shared {
    queue: Mutex<VecDeque<PendingBatch>>,
    not_empty: Condvar,
    stopping: AtomicBool,
    capacity: usize,
    dropped: AtomicU64,
    written: AtomicU64,
}

/// Bounded queue plus the background thread that drains it to a
/// [`StorageSink`].
pub struct DurableWriter {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

/// Retry policy for a failing sink append: a bounded number of attempts
/// with a short, capped exponential backoff between them.
struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let millis = self.initial_delay.as_millis() as f64 * 2f64.powi(attempt as i32);
        Duration::from_millis(millis as u64).min(self.max_delay)
    }
}

impl DurableWriter {
    /// Starts the background drain thread against `sink`, bounded at
    /// `capacity` pending batches and retrying a failing append up to
    /// `retry_limit` times.
    pub fn start(
        sink: Arc<dyn StorageSink>,
        capacity: usize,
        retry_limit: u32,
        process_start_ns: u128,
    ) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
            not_empty: Condvar::new(),
            stopping: AtomicBool::new(false),
            capacity,
            dropped: AtomicU64::new(0),
            written: AtomicU64::new(0),
        });

        let policy = RetryPolicy {
            max_attempts: retry_limit.max(1),
            initial_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(500),
        };

        let loop_shared = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name("ingestd-writer".to_string())
            .spawn(move || drain_loop(&loop_shared, sink, &policy, process_start_ns))
            .expect("failed to spawn durable writer thread");

        info!(capacity, retry_limit, "durable writer started");

        Self {
            shared,
            handle: Some(handle),
        }
    }

    /// Enqueues `batch` for background append. Returns `QueueFull`
    /// immediately if the queue is already at capacity; never touches
    /// disk.
    pub fn enqueue(&self, batch: PendingBatch) -> Result<(), WriterError> {
        let mut queue = self.shared.queue.lock().unwrap();
        if queue.len() >= self.shared.capacity {
            return Err(WriterError::QueueFull);
        }
        queue.push_back(batch);
        self.shared.not_empty.notify_one();
        Ok(())
    }

    /// Current queue depth, for `/health`.
    pub fn queued(&self) -> usize {
        self.shared.queue.lock().unwrap().len()
    }

    /// Batches dropped after exhausting retries, for `/health`.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Batches successfully appended.
    pub fn written(&self) -> u64 {
        self.shared.written.load(Ordering::Relaxed)
    }

    /// Signals the background thread to drain whatever remains once more
    /// and stop, then joins it. The queue is guaranteed empty (written or
    /// dropped) once this returns.
    pub fn shutdown(&mut self) {
        self.shared.stopping.store(true, Ordering::Release);
        self.shared.not_empty.notify_all();
        if let Some(handle) = self.handle.take() {
            info!("durable writer shutdown initiated, draining queue");
            let _ = handle.join();
            info!("durable writer shutdown complete");
        }
    }
}

impl Drop for DurableWriter {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.shutdown();
        }
    }
}

fn drain_loop(
    shared: &Shared,
    sink: Arc<dyn StorageSink>,
    policy: &RetryPolicy,
    process_start_ns: u128,
) {
    loop {
        let burst: Vec<PendingBatch> = {
            let mut queue = shared.queue.lock().unwrap();
            loop {
                if !queue.is_empty() {
                    break queue.drain(..).collect();
                }
                if shared.stopping.load(Ordering::Acquire) {
                    return;
                }
                queue = shared.not_empty.wait(queue).unwrap();
            }
        };

        if burst.is_empty() {
            continue;
        }

        let mut appended_any = false;
        for batch in &burst {
            for metric in &batch.metrics {
                let line = encode_metric_line(&batch.client, metric, process_start_ns);
                if append_with_retry(sink.as_ref(), &line, policy) {
                    shared.written.fetch_add(1, Ordering::Relaxed);
                    appended_any = true;
                } else {
                    shared.dropped.fetch_add(1, Ordering::Relaxed);
                    error!(client = ?batch.client.as_bytes(), "dropping metric after retry exhaustion");
                }
            }
        }

        if appended_any {
            if let Err(err) = sink.flush() {
                warn!(error = %err, "sink flush failed after drained burst");
            }
        }
    }
}

/// Appends one line, retrying up to `policy.max_attempts` times with
/// backoff. Returns whether the line was durably appended.
fn append_with_retry(sink: &dyn StorageSink, line: &str, policy: &RetryPolicy) -> bool {
    for attempt in 0..policy.max_attempts {
        match sink.append(line) {
            Ok(()) => return true,
            Err(err) => {
                warn!(attempt, error = %err, "sink append failed, retrying");
                if attempt + 1 < policy.max_attempts {
                    std::thread::sleep(policy.delay_for_attempt(attempt));
                }
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_model::{ClientId, MetricKind};
    use crate::error::SinkError;
    use std::sync::atomic::AtomicU32;
    use std::time::Instant;

    fn sample_metric(name: &str) -> Metric {
        Metric {
            name: name.to_string(),
            value: 1.0,
            kind: MetricKind::Gauge,
            tags: Default::default(),
            observed_at: Instant::now(),
        }
    }

    struct RecordingSink {
        lines: Mutex<Vec<String>>,
    }

    impl StorageSink for RecordingSink {
        fn append(&self, line: &str) -> Result<(), SinkError> {
            self.lines.lock().unwrap().push(line.to_string());
            Ok(())
        }

        fn flush(&self) -> Result<(), SinkError> {
            Ok(())
        }
    }

    struct FlakySink {
        failures_remaining: AtomicU32,
        lines: Mutex<Vec<String>>,
    }

    impl StorageSink for FlakySink {
        fn append(&self, line: &str) -> Result<(), SinkError> {
            if self.failures_remaining.load(Ordering::Relaxed) > 0 {
                self.failures_remaining.fetch_sub(1, Ordering::Relaxed);
                return Err(SinkError::Io(std::io::Error::other("flaky")));
            }
            self.lines.lock().unwrap().push(line.to_string());
            Ok(())
        }

        fn flush(&self) -> Result<(), SinkError> {
            Ok(())
        }
    }

    #[test]
    fn enqueued_batches_are_eventually_written() {
        let sink = Arc::new(RecordingSink {
            lines: Mutex::new(Vec::new()),
        });
        let mut writer = DurableWriter::start(sink.clone(), 64, 3, 0);
        writer
            .enqueue(PendingBatch {
                client: ClientId::from_header(Some(b"c1")),
                metrics: vec![sample_metric("cpu"), sample_metric("mem")],
            })
            .unwrap();
        writer.shutdown();
        assert_eq!(sink.lines.lock().unwrap().len(), 2);
        assert_eq!(writer.written(), 2);
    }

    #[test]
    fn queue_full_is_rejected_without_blocking() {
        let sink = Arc::new(RecordingSink {
            lines: Mutex::new(Vec::new()),
        });
        let mut writer = DurableWriter::start(sink, 1, 3, 0);
        writer
            .enqueue(PendingBatch {
                client: ClientId::from_header(None),
                metrics: vec![sample_metric("a")],
            })
            .unwrap();
        // Queue depth 1 already reached capacity 1 is possible if the
        // writer hasn't drained yet; retry enqueue until we observe full or
        // give up quickly (both are acceptable outcomes of this race, but
        // we assert the error variant shape works).
        let second = writer.enqueue(PendingBatch {
            client: ClientId::from_header(None),
            metrics: vec![sample_metric("b")],
        });
        writer.shutdown();
        // Either accepted (drained fast enough) or rejected; just confirm
        // the API never blocks/panics and returns one of the two.
        assert!(matches!(second, Ok(()) | Err(WriterError::QueueFull)));
    }

    #[test]
    fn retries_then_drops_a_permanently_failing_append() {
        struct AlwaysFails;
        impl StorageSink for AlwaysFails {
            fn append(&self, _line: &str) -> Result<(), SinkError> {
                Err(SinkError::Io(std::io::Error::other("down")))
            }
            fn flush(&self) -> Result<(), SinkError> {
                Ok(())
            }
        }

        let sink = Arc::new(AlwaysFails);
        let mut writer = DurableWriter::start(sink, 64, 2, 0);
        writer
            .enqueue(PendingBatch {
                client: ClientId::from_header(None),
                metrics: vec![sample_metric("x")],
            })
            .unwrap();
        writer.shutdown();
        assert_eq!(writer.dropped(), 1);
        assert_eq!(writer.written(), 0);
    }

    #[test]
    fn recovers_after_transient_failures_within_retry_budget() {
        let sink = Arc::new(FlakySink {
            failures_remaining: AtomicU32::new(2),
            lines: Mutex::new(Vec::new()),
        });
        let mut writer = DurableWriter::start(sink.clone(), 64, 3, 0);
        writer
            .enqueue(PendingBatch {
                client: ClientId::from_header(None),
                metrics: vec![sample_metric("x")],
            })
            .unwrap();
        writer.shutdown();
        assert_eq!(sink.lines.lock().unwrap().len(), 1);
        assert_eq!(writer.dropped(), 0);
    }
}
