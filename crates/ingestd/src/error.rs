use thiserror::Error;

/// Errors from the JSON batch parser. Each maps to an HTTP status at
/// the router boundary; none are retried within the request.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed json: {0}")]
    MalformedJson(String),

    #[error("schema error: {0}")]
    SchemaError(String),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("body of {len} bytes exceeds cap of {cap} bytes")]
    BodyTooLarge { len: usize, cap: usize },
}

impl ParseError {
    /// The short machine-readable code used in the response body's
    /// `"error"` field.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MalformedJson(_) => "malformed_json",
            Self::SchemaError(_) => "schema_error",
            Self::ValidationError(_) => "validation_error",
            Self::BodyTooLarge { .. } => "body_too_large",
        }
    }
}

/// Errors surfaced by the durable writer's queue. `Ok` is represented
/// by the absence of an error.
#[derive(Debug, Error)]
pub enum WriterError {
    #[error("writer queue is full")]
    QueueFull,
}

/// Errors from the storage/monitoring sinks.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by the thread pool's queue (C7).
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("task queue is full")]
    Rejected,
}

/// Connection-level and framing errors raised while servicing one HTTP/1.1
/// connection (C8).
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("malformed request: {0}")]
    BadRequest(String),

    #[error("unknown route")]
    NotFound,

    #[error("connection idle timeout")]
    Timeout,

    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("request body of {len} bytes exceeds cap of {cap} bytes")]
    BodyTooLarge { len: usize, cap: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors loading or validating the service configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}
