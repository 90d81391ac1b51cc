//! HTTP/1.1 framing and the per-connection loop: just enough of the
//! protocol to bound one connection's work and hand the next keep-alive
//! message back to the same worker. No chunked transfer-encoding; bodies
//! are bounded by `Content-Length` only.

use crate::error::HttpError;
use std::collections::HashMap;
use std::io::{BufReader, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Other,
}

/// A parsed HTTP/1.1 request: status line plus headers plus a
/// `Content-Length`-bounded body.
pub struct Request {
    pub method: Method,
    pub path: String,
    headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl Request {
    /// Case-insensitive header lookup (header names are normalized to
    /// lowercase at parse time).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Whether the client asked for the connection to close after this
    /// response. Defaults to keep-alive, per HTTP/1.1.
    pub fn wants_close(&self) -> bool {
        matches!(self.header("connection"), Some(v) if v.eq_ignore_ascii_case("close"))
    }

    /// Builds a request directly, bypassing wire parsing. Used by the
    /// router's unit tests, which exercise dispatch logic without a real
    /// socket.
    #[cfg(test)]
    pub fn for_test(method: Method, path: &str, auth: Option<&str>, body: Vec<u8>) -> Self {
        let mut headers = HashMap::new();
        if let Some(auth) = auth {
            headers.insert("authorization".to_string(), auth.to_string());
        }
        Self {
            method,
            path: path.to_string(),
            headers,
            body,
        }
    }
}

/// An outgoing response: status, a small JSON body, and whether the
/// connection stays open afterward.
pub struct Response {
    pub status: u16,
    pub reason: &'static str,
    pub body: String,
    pub keep_alive: bool,
}

impl Response {
    pub fn json(status: u16, reason: &'static str, body: String, keep_alive: bool) -> Self {
        Self {
            status,
            reason,
            body,
            keep_alive,
        }
    }

    pub fn write_to(&self, stream: &mut TcpStream) -> std::io::Result<()> {
        let connection = if self.keep_alive { "keep-alive" } else { "close" };
        let head = format!(
            "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: {}\r\n\r\n",
            self.status,
            self.reason,
            self.body.len(),
            connection,
        );
        stream.write_all(head.as_bytes())?;
        stream.write_all(self.body.as_bytes())?;
        stream.flush()
    }
}

const MAX_HEADER_BYTES: usize = 16 * 1024;

/// Reads and parses one HTTP/1.1 request from `stream`. `body_cap` bounds
/// the accepted `Content-Length`; a larger declared length is rejected
/// before the body is read, not after buffering it.
pub fn read_request(
    reader: &mut BufReader<&TcpStream>,
    body_cap: usize,
) -> Result<Request, HttpError> {
    let mut header_bytes = Vec::with_capacity(512);
    read_headers(reader, &mut header_bytes)?;

    let text = std::str::from_utf8(&header_bytes)
        .map_err(|_| HttpError::BadRequest("headers are not valid utf-8".to_string()))?;
    let mut lines = text.split("\r\n");

    let status_line = lines
        .next()
        .ok_or_else(|| HttpError::BadRequest("missing status line".to_string()))?;
    let (method, path) = parse_status_line(status_line)?;

    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| HttpError::BadRequest(format!("malformed header line: {line}")))?;
        headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
    }

    let content_length: usize = match headers.get("content-length") {
        Some(v) => v
            .parse()
            .map_err(|_| HttpError::BadRequest("invalid content-length".to_string()))?,
        None => 0,
    };

    if content_length > body_cap {
        return Err(HttpError::BodyTooLarge {
            len: content_length,
            cap: body_cap,
        });
    }

    let mut body = vec![0u8; content_length];
    if content_length > 0 {
        reader
            .read_exact(&mut body)
            .map_err(map_io_error)?;
    }

    Ok(Request {
        method,
        path,
        headers,
        body,
    })
}

fn parse_status_line(line: &str) -> Result<(Method, String), HttpError> {
    let mut parts = line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| HttpError::BadRequest("missing method".to_string()))?;
    let path = parts
        .next()
        .ok_or_else(|| HttpError::BadRequest("missing path".to_string()))?;
    let version = parts
        .next()
        .ok_or_else(|| HttpError::BadRequest("missing version".to_string()))?;
    if !version.starts_with("HTTP/1.") {
        return Err(HttpError::BadRequest(format!("unsupported version {version}")));
    }
    let method = match method {
        "GET" => Method::Get,
        "POST" => Method::Post,
        _ => Method::Other,
    };
    Ok((method, path.to_string()))
}

/// Reads bytes up to and including the blank line ending the header block,
/// into `out` (without the trailing blank line). Bounded by
/// `MAX_HEADER_BYTES` so a client can't force unbounded buffering before
/// any `Content-Length` is even known.
fn read_headers(reader: &mut BufReader<&TcpStream>, out: &mut Vec<u8>) -> Result<(), HttpError> {
    let mut byte = [0u8; 1];
    let mut window = [0u8; 4];
    let mut window_len = 0usize;
    loop {
        if out.len() > MAX_HEADER_BYTES {
            return Err(HttpError::BadRequest("request headers too large".to_string()));
        }
        match reader.read(&mut byte) {
            Ok(0) => return Err(HttpError::ConnectionClosed),
            Ok(_) => {}
            Err(err) => return Err(map_io_error(err)),
        }
        out.push(byte[0]);
        if window_len < 4 {
            window[window_len] = byte[0];
            window_len += 1;
        } else {
            window.copy_within(1.., 0);
            window[3] = byte[0];
        }
        if window_len == 4 && &window == b"\r\n\r\n" {
            out.truncate(out.len() - 4);
            return Ok(());
        }
    }
}

fn map_io_error(err: std::io::Error) -> HttpError {
    match err.kind() {
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => HttpError::Timeout,
        std::io::ErrorKind::UnexpectedEof => HttpError::ConnectionClosed,
        _ => HttpError::Io(err),
    }
}

/// Applies the configured idle read/write timeout to a fresh connection.
pub fn set_idle_timeout(stream: &TcpStream, timeout: Duration) -> std::io::Result<()> {
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufReader as StdBufReader;
    use std::net::{TcpListener, TcpStream};

    fn roundtrip(raw: &[u8]) -> Result<Request, HttpError> {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).unwrap();
        client.write_all(raw).unwrap();
        let (server_stream, _) = listener.accept().unwrap();
        let mut reader = StdBufReader::new(&server_stream);
        read_request(&mut reader, 1024 * 1024)
    }

    #[test]
    fn parses_simple_post() {
        let raw = b"POST /metrics HTTP/1.1\r\nContent-Length: 5\r\nAuthorization: c1\r\n\r\nhello";
        let req = roundtrip(raw).unwrap();
        assert_eq!(req.method, Method::Post);
        assert_eq!(req.path, "/metrics");
        assert_eq!(req.header("authorization"), Some("c1"));
        assert_eq!(req.body, b"hello");
    }

    #[test]
    fn defaults_to_keep_alive() {
        let raw = b"GET /health HTTP/1.1\r\n\r\n";
        let req = roundtrip(raw).unwrap();
        assert!(!req.wants_close());
    }

    #[test]
    fn honors_explicit_close() {
        let raw = b"GET /health HTTP/1.1\r\nConnection: close\r\n\r\n";
        let req = roundtrip(raw).unwrap();
        assert!(req.wants_close());
    }

    #[test]
    fn rejects_body_over_cap_before_reading_it() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).unwrap();
        client
            .write_all(b"POST /metrics HTTP/1.1\r\nContent-Length: 999999\r\n\r\n")
            .unwrap();
        let (server_stream, _) = listener.accept().unwrap();
        let mut reader = StdBufReader::new(&server_stream);
        let err = read_request(&mut reader, 10).unwrap_err();
        assert!(matches!(err, HttpError::BodyTooLarge { .. }));
    }
}
