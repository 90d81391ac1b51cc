//! Wires the rate limiter, parser, durable writer, flusher, and thread
//! pool into one owned value. `Server` holds every component by value or
//! `Arc`; there is no process-wide mutable state beyond what's reachable
//! from here plus the shutdown flag.

use crate::config::Config;
use crate::flusher::MetricsFlusher;
use crate::http::{self, Response};
use crate::pool::ThreadPool;
use crate::ratelimit::RateLimiter;
use crate::router;
use crate::sink::{FileStorageSink, MonitoringSink, NullMonitoringSink, NullStorageSink, StorageSink};
use crate::writer::DurableWriter;
use socket2::{Domain, Socket, Type};
use std::io::BufReader;
use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Minimum listen backlog per spec.md §4.8 — deliberately above the
/// platform default (128 on Linux) so a burst of SYNs queues instead of
/// getting refused before the accept loop ever sees them.
const LISTEN_BACKLOG: i32 = 1024;

/// The running service: every component, owned, plus the counters
/// `/health` reports.
///
/// `run` borrows `Arc<Server>` and blocks in the accept loop;
/// `join_background` consumes `Server` by value to join the pool and
/// writer threads after `run` has returned. Splitting the two means the
/// accept loop can hand out cheap `Arc` clones per connection while
/// shutdown still gets ordinary ownership semantics for the teardown that
/// follows it.
pub struct Server {
    pub(crate) config: Config,
    pub(crate) limiter: Arc<RateLimiter>,
    pub(crate) writer: Arc<DurableWriter>,
    pub(crate) pool: Arc<ThreadPool>,
    flusher: Option<MetricsFlusher>,
    pub(crate) accepted_total: AtomicU64,
    pub(crate) rejected_total: AtomicU64,
    pub(crate) start: Instant,
    stopping: Arc<AtomicBool>,
}

impl Server {
    /// Builds every component from `config`, opening the real file-backed
    /// storage sink and starting the background writer and flusher
    /// threads. The thread pool and accept loop start only once
    /// [`Server::run`] is called.
    pub fn new(config: Config) -> std::io::Result<Self> {
        let storage_sink: Arc<dyn StorageSink> =
            Arc::new(FileStorageSink::open(&config.storage_path)?);
        Ok(Self::new_with_sinks(
            config,
            storage_sink,
            Arc::new(NullMonitoringSink),
        ))
    }

    fn new_with_sinks(
        config: Config,
        storage_sink: Arc<dyn StorageSink>,
        monitoring_sink: Arc<dyn MonitoringSink>,
    ) -> Self {
        let limiter = Arc::new(RateLimiter::new(
            config.rate_limit,
            config.stripe_count,
            config.ring_capacity,
        ));
        let process_start_ns = crate::sink::unix_epoch_nanos_now();
        let writer = Arc::new(DurableWriter::start(
            storage_sink,
            config.writer_queue_capacity,
            config.writer_retry_limit,
            process_start_ns,
        ));
        let pool = Arc::new(ThreadPool::new(config.workers, config.pool_queue_capacity));
        let flusher = MetricsFlusher::start(
            Arc::clone(&limiter),
            monitoring_sink,
            std::time::Duration::from_secs(config.flusher_interval_secs),
        );

        Self {
            config,
            limiter,
            writer,
            pool,
            flusher: Some(flusher),
            accepted_total: AtomicU64::new(0),
            rejected_total: AtomicU64::new(0),
            start: Instant::now(),
            stopping: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The configuration this server was built from, for callers (tests,
    /// `/health`) that need to inspect it without access to private
    /// fields.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Builds a `Server` with in-memory/null sinks, for unit and
    /// integration tests that don't need real disk I/O or a monitoring
    /// backend.
    #[cfg(test)]
    pub fn new_for_test(config: Config) -> Self {
        Self::new_with_sinks(config, Arc::new(NullStorageSink), Arc::new(NullMonitoringSink))
    }

    /// Binds the listening socket and runs the accept loop until
    /// [`Server::request_shutdown`] is called from another thread. Each
    /// accepted connection is handed to the thread pool as one task; a
    /// pool rejection closes the connection after a `503`, without ever
    /// touching the rate limiter or parser.
    pub fn run(self: &Arc<Self>) -> std::io::Result<()> {
        let listener = bind_with_backlog(&self.config.listen_addr, LISTEN_BACKLOG)?;
        info!(addr = %self.config.listen_addr, backlog = LISTEN_BACKLOG, "ingestd listening");

        for incoming in listener.incoming() {
            if self.stopping.load(Ordering::Acquire) {
                break;
            }
            let stream = match incoming {
                Ok(stream) => stream,
                Err(err) => {
                    warn!(error = %err, "accept failed");
                    continue;
                }
            };
            // The shutdown unblock connection (see `request_shutdown`)
            // arrives here too; a stopping flag already set means this is
            // that connection, not real traffic.
            if self.stopping.load(Ordering::Acquire) {
                break;
            }

            // Wrapped so a rejected submission can hand the stream back to
            // this thread instead of losing it inside the unrun closure.
            let slot = Arc::new(std::sync::Mutex::new(Some(stream)));
            let task_slot = Arc::clone(&slot);
            let server = Arc::clone(self);
            let task = move || {
                if let Some(stream) = task_slot.lock().unwrap().take() {
                    server.serve_connection(stream);
                }
            };
            if self.pool.submit(task).is_err() {
                self.rejected_total.fetch_add(1, Ordering::Relaxed);
                if let Some(mut stream) = slot.lock().unwrap().take() {
                    let response = Response::json(
                        503,
                        "Service Unavailable",
                        r#"{"error":"pool_rejected"}"#.to_string(),
                        false,
                    );
                    let _ = response.write_to(&mut stream);
                }
            }
        }

        info!("accept loop stopped");
        Ok(())
    }

    /// Flags the accept loop to stop and unblocks a thread currently
    /// parked in `accept()` by connecting to the listening address once.
    /// Idempotent-ish: a second call just opens another throwaway
    /// connection, which is harmless.
    pub fn request_shutdown(&self) {
        self.stopping.store(true, Ordering::Release);
        if let Ok(stream) = TcpStream::connect(&self.config.listen_addr) {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
    }

    fn serve_connection(&self, stream: TcpStream) {
        if http::set_idle_timeout(
            &stream,
            std::time::Duration::from_secs(self.config.idle_timeout_secs),
        )
        .is_err()
        {
            return;
        }

        let mut reader = BufReader::new(&stream);
        loop {
            let request = match http::read_request(&mut reader, self.config.body_cap_bytes) {
                Ok(request) => request,
                Err(crate::error::HttpError::ConnectionClosed | crate::error::HttpError::Timeout) => {
                    return;
                }
                Err(err @ crate::error::HttpError::BodyTooLarge { .. }) => {
                    debug!(error = %err, "body too large, closing connection");
                    let response = Response::json(
                        413,
                        "Payload Too Large",
                        format!(r#"{{"error":"body_too_large","detail":"{err}"}}"#),
                        false,
                    );
                    if let Ok(mut s) = reader.get_ref().try_clone() {
                        let _ = response.write_to(&mut s);
                    }
                    return;
                }
                Err(err) => {
                    debug!(error = %err, "framing error, closing connection");
                    let response = Response::json(
                        400,
                        "Bad Request",
                        format!(r#"{{"error":"bad_request","detail":"{err}"}}"#),
                        false,
                    );
                    if let Ok(mut s) = reader.get_ref().try_clone() {
                        let _ = response.write_to(&mut s);
                    }
                    return;
                }
            };

            let keep_alive_requested = !request.wants_close();
            let response = router::dispatch(self, &request);
            let keep_alive = keep_alive_requested && response.keep_alive;

            let mut stream_mut = match reader.get_ref().try_clone() {
                Ok(s) => s,
                Err(_) => return,
            };
            if response.write_to(&mut stream_mut).is_err() {
                return;
            }
            if !keep_alive {
                return;
            }
        }
    }

    /// Joins the background writer and flusher threads and the worker
    /// pool. Call only after [`Server::run`] has returned, and only once
    /// every `Arc<Server>` clone handed to in-flight tasks has been
    /// dropped — otherwise the pool and writer `Arc`s here still have
    /// other owners and teardown degrades to a best-effort signal rather
    /// than a joined wait.
    pub fn join_background(mut self) {
        info!("shutdown initiated");

        if let Some(mut flusher) = self.flusher.take() {
            flusher.shutdown();
        }

        match Arc::get_mut(&mut self.writer) {
            Some(writer) => writer.shutdown(),
            None => warn!("durable writer has other live references; skipping synchronous join"),
        }

        match Arc::try_unwrap(self.pool) {
            Ok(pool) => pool.shutdown(),
            Err(_) => warn!("thread pool has other live references; skipping synchronous join"),
        }

        info!("shutdown complete");
    }
}

/// Binds a listening socket with an explicit backlog. `std::net::TcpListener`
/// has no way to request one above the platform default (128 on Linux), so
/// the socket is built and bound through `socket2` and only converted to a
/// `std::net::TcpListener` once `listen` has already been called on it.
fn bind_with_backlog(addr: &str, backlog: i32) -> std::io::Result<TcpListener> {
    let addr = addr.to_socket_addrs()?.next().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "no socket address resolved")
    })?;
    let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
    let socket = Socket::new(domain, Type::STREAM, None)?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;
    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_for_test_builds_without_touching_disk() {
        let config = Config::default();
        let server = Server::new_for_test(config);
        assert_eq!(server.limiter.client_count(), 0);
    }
}
