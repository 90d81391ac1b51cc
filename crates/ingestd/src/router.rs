//! Request router (C9): the two endpoints in the core, composing
//! C3 (rate limiter) → C4 (parser) → C5 (durable writer) for `POST
//! /metrics`, plus `GET /health`.

use crate::http::{Method, Request, Response};
use crate::parse::parse_body;
use crate::server::Server;
use crate::writer::PendingBatch;
use tracing::debug;

/// Dispatches one parsed request to a handler and returns the response to
/// write back. Never panics on malformed input; every rejection path maps
/// to a documented status code.
pub fn dispatch(server: &Server, request: &Request) -> Response {
    let keep_alive = !request.wants_close();
    match (request.method, request.path.as_str()) {
        (Method::Post, "/metrics") => handle_post_metrics(server, request, keep_alive),
        (Method::Get, "/health") => handle_get_health(server, keep_alive),
        _ => error_response(404, "Not Found", "not_found", "unknown route", keep_alive),
    }
}

fn handle_post_metrics(server: &Server, request: &Request, keep_alive: bool) -> Response {
    let client = crate::data_model::ClientId::from_header(
        request.header("authorization").map(str::as_bytes),
    );

    if !server.limiter.allow(&client) {
        server.rejected_total.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        debug!(client = ?client.as_bytes(), "rate limited");
        return Response::json(
            429,
            "Too Many Requests",
            r#"{"error":"rate_limited"}"#.to_string(),
            keep_alive,
        );
    }

    let batch = match parse_body(&request.body, server.config.body_cap_bytes) {
        Ok(batch) => batch,
        Err(err) => {
            let status = match &err {
                crate::error::ParseError::BodyTooLarge { .. } => 413,
                _ => 400,
            };
            let reason = if status == 413 {
                "Payload Too Large"
            } else {
                "Bad Request"
            };
            return error_response(status, reason, err.code(), &err.to_string(), keep_alive);
        }
    };

    let accepted = batch.len();
    let pending = PendingBatch {
        client,
        metrics: batch.into_iter().collect(),
    };

    match server.writer.enqueue(pending) {
        Ok(()) => {
            server.accepted_total.fetch_add(accepted as u64, std::sync::atomic::Ordering::Relaxed);
            Response::json(
                202,
                "Accepted",
                format!(r#"{{"accepted":{accepted}}}"#),
                keep_alive,
            )
        }
        Err(_) => Response::json(
            503,
            "Service Unavailable",
            r#"{"error":"writer_queue_full"}"#.to_string(),
            keep_alive,
        ),
    }
}

fn handle_get_health(server: &Server, keep_alive: bool) -> Response {
    let body = format!(
        r#"{{"workers_queued":{},"writer_queued":{},"dropped":{},"clients":{},"uptime_seconds":{},"accepted_total":{},"rejected_total":{}}}"#,
        server.pool.queued(),
        server.writer.queued(),
        server.writer.dropped(),
        server.limiter.client_count(),
        server.start.elapsed().as_secs(),
        server.accepted_total.load(std::sync::atomic::Ordering::Relaxed),
        server.rejected_total.load(std::sync::atomic::Ordering::Relaxed),
    );
    Response::json(200, "OK", body, keep_alive)
}

fn error_response(
    status: u16,
    reason: &'static str,
    code: &str,
    detail: &str,
    keep_alive: bool,
) -> Response {
    let body = format!(
        r#"{{"error":"{}","detail":"{}"}}"#,
        code,
        detail.replace('"', "'")
    );
    Response::json(status, reason, body, keep_alive)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::server::Server;
    use std::sync::Arc;

    fn test_server() -> Server {
        let mut config = Config::default();
        config.storage_path = std::env::temp_dir().join(format!(
            "ingestd-router-test-{}.log",
            std::process::id()
        ));
        Server::new_for_test(config)
    }

    fn request(method: Method, path: &str, auth: Option<&str>, body: &str) -> Request {
        Request::for_test(method, path, auth, body.as_bytes().to_vec())
    }

    #[test]
    fn unknown_route_is_404() {
        let server = test_server();
        let req = request(Method::Get, "/nope", None, "");
        let resp = dispatch(&server, &req);
        assert_eq!(resp.status, 404);
    }

    #[test]
    fn health_is_200_and_reports_zero_clients_initially() {
        let server = test_server();
        let req = request(Method::Get, "/health", None, "");
        let resp = dispatch(&server, &req);
        assert_eq!(resp.status, 200);
        assert!(resp.body.contains("\"clients\":0"));
    }

    #[test]
    fn happy_path_single_metric_is_202() {
        let server = test_server();
        let req = request(
            Method::Post,
            "/metrics",
            Some("c1"),
            r#"{"metrics":[{"name":"cpu","value":75.5}]}"#,
        );
        let resp = dispatch(&server, &req);
        assert_eq!(resp.status, 202);
        assert_eq!(resp.body, r#"{"accepted":1}"#);
    }

    #[test]
    fn malformed_body_is_400() {
        let server = test_server();
        let req = request(Method::Post, "/metrics", Some("c1"), r#"{"metrics":["#);
        let resp = dispatch(&server, &req);
        assert_eq!(resp.status, 400);
        assert!(resp.body.contains("malformed_json"));
    }

    #[test]
    fn validation_error_is_400() {
        let server = test_server();
        let req = request(
            Method::Post,
            "/metrics",
            Some("c1"),
            r#"{"metrics":[{"name":"","value":1}]}"#,
        );
        let resp = dispatch(&server, &req);
        assert_eq!(resp.status, 400);
        assert!(resp.body.contains("validation_error"));
    }

    #[test]
    fn rate_limit_denial_is_429_and_skips_parsing() {
        let mut config = Config::default();
        config.rate_limit = 1;
        config.storage_path =
            std::env::temp_dir().join(format!("ingestd-router-test-rl-{}.log", std::process::id()));
        let server = Server::new_for_test(config);

        let body = r#"{"metrics":[{"name":"cpu","value":1}]}"#;
        let first = dispatch(&server, &request(Method::Post, "/metrics", Some("c2"), body));
        assert_eq!(first.status, 202);

        let second = dispatch(&server, &request(Method::Post, "/metrics", Some("c2"), body));
        assert_eq!(second.status, 429);
        assert_eq!(second.body, r#"{"error":"rate_limited"}"#);
    }
}
