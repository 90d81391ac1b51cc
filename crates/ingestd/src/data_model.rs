//! Entities shared across the ingestion pipeline: what a metric is, what a
//! client looks like to the rate limiter, and the event shape that flows
//! through the decision ring.

use std::collections::HashMap;
use std::time::Instant;

/// A metric kind, defaulted to `Gauge` when the request omits `type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Gauge,
    Counter,
    Histogram,
    Summary,
}

impl MetricKind {
    /// Maps a request's `type` string to a kind. Returns `None` for anything
    /// not in the known set — callers treat that as a schema error.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "gauge" => Some(Self::Gauge),
            "counter" => Some(Self::Counter),
            "histogram" => Some(Self::Histogram),
            "summary" => Some(Self::Summary),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gauge => "gauge",
            Self::Counter => "counter",
            Self::Histogram => "histogram",
            Self::Summary => "summary",
        }
    }
}

/// One telemetry point. Immutable once built by the parser.
#[derive(Debug, Clone)]
pub struct Metric {
    pub name: String,
    pub value: f64,
    pub kind: MetricKind,
    pub tags: HashMap<String, String>,
    pub observed_at: Instant,
}

pub const MAX_NAME_LEN: usize = 255;
pub const MAX_TAGS: usize = 32;
pub const MAX_BATCH_LEN: usize = 1000;

impl Metric {
    /// Name and value validity, independent of how the value was sourced.
    /// Tag count is checked separately by the parser as tags accumulate.
    pub fn is_valid_name(name: &str) -> bool {
        !name.is_empty()
            && name.len() <= MAX_NAME_LEN
            && !name.bytes().any(|b| b.is_ascii_control())
    }

    pub fn is_valid_value(value: f64) -> bool {
        value.is_finite()
    }
}

/// An ordered, non-empty, size-bounded sequence of metrics parsed from one
/// request body.
#[derive(Debug, Clone)]
pub struct MetricBatch {
    metrics: Vec<Metric>,
}

impl MetricBatch {
    /// Builds a batch, enforcing the `[1, MAX_BATCH_LEN]` size invariant.
    /// Returns `None` if the constraint is violated; callers map that to a
    /// validation error at the parser boundary.
    pub fn new(metrics: Vec<Metric>) -> Option<Self> {
        if metrics.is_empty() || metrics.len() > MAX_BATCH_LEN {
            return None;
        }
        Some(Self { metrics })
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Metric> {
        self.metrics.iter()
    }
}

impl IntoIterator for MetricBatch {
    type Item = Metric;
    type IntoIter = std::vec::IntoIter<Metric>;

    fn into_iter(self) -> Self::IntoIter {
        self.metrics.into_iter()
    }
}

/// Opaque client identity. Byte-equal, no canonicalization, defaults to
/// `anonymous` when the request carries no `Authorization` header.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientId(pub Vec<u8>);

impl ClientId {
    pub const ANONYMOUS: &'static str = "anonymous";

    pub fn from_header(value: Option<&[u8]>) -> Self {
        match value {
            Some(bytes) if !bytes.is_empty() => Self(bytes.to_vec()),
            _ => Self(Self::ANONYMOUS.as_bytes().to_vec()),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// One decision: a point in time and whether the request at that time was
/// allowed. Small and `Copy` so it fits cleanly into the SPSC ring.
#[derive(Debug, Clone, Copy)]
pub struct DecisionEvent {
    pub at: Instant,
    pub allowed: bool,
}
