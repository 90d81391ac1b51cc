//! `ingestd`: a single-node metric ingestion service.
//!
//! Clients push batches of telemetry points over HTTP; the service
//! validates, rate-limits per client, durably appends accepted batches to
//! an append-only log, and emits per-client accept/deny decisions to a
//! monitoring sink.

pub mod config;
pub mod data_model;
pub mod error;
pub mod flusher;
pub mod http;
pub mod parse;
pub mod pool;
pub mod ratelimit;
pub mod router;
pub mod server;
pub mod sink;
pub mod writer;

pub use config::Config;
pub use server::Server;
