//! Single-pass JSON batch parser. No backtracking: the cursor only
//! ever moves forward. Recognized shape is narrow — the `"metrics"` array
//! at the top level, and a fixed set of fields inside each metric object —
//! everything else is scanned over and discarded without being retained.

use crate::data_model::{Metric, MetricBatch, MetricKind, MAX_NAME_LEN, MAX_TAGS};
use crate::error::ParseError;
use std::collections::HashMap;
use std::time::Instant;

const FOUND_NAME: u8 = 1 << 0;
const FOUND_VALUE: u8 = 1 << 1;
const REQUIRED: u8 = FOUND_NAME | FOUND_VALUE;

/// Parses one request body into a batch. `body_cap` bounds the accepted
/// size before any parsing work happens.
pub fn parse_body(body: &[u8], body_cap: usize) -> Result<MetricBatch, ParseError> {
    if body.len() > body_cap {
        return Err(ParseError::BodyTooLarge {
            len: body.len(),
            cap: body_cap,
        });
    }

    let mut p = Cursor::new(body);
    p.skip_ws();
    p.expect(b'{')?;

    let mut metrics: Option<Vec<Metric>> = None;

    p.skip_ws();
    if p.peek() != Some(b'}') {
        loop {
            p.skip_ws();
            let key = p.parse_string()?;
            p.skip_ws();
            p.expect(b':')?;
            p.skip_ws();

            if key == "metrics" {
                metrics = Some(parse_metrics_array(&mut p)?);
            } else {
                p.skip_value()?;
            }

            p.skip_ws();
            match p.peek() {
                Some(b',') => {
                    p.advance();
                }
                Some(b'}') => {
                    p.advance();
                    break;
                }
                _ => return Err(ParseError::MalformedJson("expected ',' or '}'".to_string())),
            }
        }
    } else {
        p.advance();
    }

    let metrics = metrics.ok_or_else(|| {
        ParseError::SchemaError("missing required field \"metrics\"".to_string())
    })?;
    let count = metrics.len();

    MetricBatch::new(metrics).ok_or_else(|| {
        ParseError::ValidationError(format!(
            "batch size {count} outside allowed range [1, {}]",
            crate::data_model::MAX_BATCH_LEN
        ))
    })
}

fn parse_metrics_array(p: &mut Cursor<'_>) -> Result<Vec<Metric>, ParseError> {
    p.expect(b'[')?;
    let mut metrics = Vec::with_capacity(16);

    p.skip_ws();
    if p.peek() == Some(b']') {
        p.advance();
        return Ok(metrics);
    }

    loop {
        p.skip_ws();
        metrics.push(parse_metric_object(p)?);
        p.skip_ws();
        match p.peek() {
            Some(b',') => {
                p.advance();
            }
            Some(b']') => {
                p.advance();
                break;
            }
            _ => return Err(ParseError::MalformedJson("expected ',' or ']'".to_string())),
        }
    }

    Ok(metrics)
}

fn parse_metric_object(p: &mut Cursor<'_>) -> Result<Metric, ParseError> {
    p.expect(b'{')?;

    let mut found = 0u8;
    let mut name = String::new();
    let mut value = 0f64;
    let mut kind = MetricKind::Gauge;
    let mut tags = HashMap::new();

    p.skip_ws();
    if p.peek() != Some(b'}') {
        loop {
            p.skip_ws();
            let key = p.parse_string()?;
            p.skip_ws();
            p.expect(b':')?;
            p.skip_ws();

            match key.as_str() {
                "name" => {
                    name = p.parse_string()?;
                    found |= FOUND_NAME;
                }
                "value" => {
                    value = p.parse_number()?;
                    found |= FOUND_VALUE;
                }
                "type" => {
                    let raw = p.parse_string()?;
                    kind = MetricKind::from_str(&raw).ok_or_else(|| {
                        ParseError::SchemaError(format!("unknown metric type \"{raw}\""))
                    })?;
                }
                "tags" => {
                    tags = parse_tags_object(p)?;
                }
                _ => p.skip_value()?,
            }

            p.skip_ws();
            match p.peek() {
                Some(b',') => {
                    p.advance();
                }
                Some(b'}') => {
                    p.advance();
                    break;
                }
                _ => return Err(ParseError::MalformedJson("expected ',' or '}'".to_string())),
            }
        }
    } else {
        p.advance();
    }

    if found & REQUIRED != REQUIRED {
        return Err(ParseError::SchemaError(
            "metric missing required field \"name\" or \"value\"".to_string(),
        ));
    }
    if !Metric::is_valid_name(&name) {
        return Err(ParseError::ValidationError(format!(
            "invalid metric name (empty, > {MAX_NAME_LEN} bytes, or contains control chars)"
        )));
    }
    if !Metric::is_valid_value(value) {
        return Err(ParseError::ValidationError(
            "metric value must be finite".to_string(),
        ));
    }

    Ok(Metric {
        name,
        value,
        kind,
        tags,
        observed_at: Instant::now(),
    })
}

fn parse_tags_object(p: &mut Cursor<'_>) -> Result<HashMap<String, String>, ParseError> {
    p.expect(b'{')?;
    let mut tags = HashMap::new();

    p.skip_ws();
    if p.peek() == Some(b'}') {
        p.advance();
        return Ok(tags);
    }

    loop {
        p.skip_ws();
        let key = p.parse_string()?;
        p.skip_ws();
        p.expect(b':')?;
        p.skip_ws();

        if p.peek() == Some(b'{') {
            return Err(ParseError::SchemaError(
                "nested tag objects are not supported".to_string(),
            ));
        }
        let val = p.parse_string()?;

        if tags.len() >= MAX_TAGS && !tags.contains_key(&key) {
            return Err(ParseError::ValidationError(format!(
                "tags exceed the {MAX_TAGS}-entry cap"
            )));
        }
        tags.insert(key, val);

        p.skip_ws();
        match p.peek() {
            Some(b',') => {
                p.advance();
            }
            Some(b'}') => {
                p.advance();
                break;
            }
            _ => return Err(ParseError::MalformedJson("expected ',' or '}'".to_string())),
        }
    }

    Ok(tags)
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    fn advance(&mut self) {
        self.pos += 1;
    }

    fn skip_ws(&mut self) {
        while let Some(b) = self.peek() {
            if b == b' ' || b == b'\t' || b == b'\n' || b == b'\r' {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn expect(&mut self, byte: u8) -> Result<(), ParseError> {
        match self.peek() {
            Some(b) if b == byte => {
                self.advance();
                Ok(())
            }
            Some(b) => Err(ParseError::MalformedJson(format!(
                "expected '{}' at byte {}, found '{}'",
                byte as char, self.pos, b as char
            ))),
            None => Err(ParseError::MalformedJson(format!(
                "unexpected end of input, expected '{}'",
                byte as char
            ))),
        }
    }

    fn parse_string(&mut self) -> Result<String, ParseError> {
        self.expect(b'"')?;
        let mut out = String::with_capacity(16);
        loop {
            match self.peek() {
                None => {
                    return Err(ParseError::MalformedJson("unterminated string".to_string()))
                }
                Some(b'"') => {
                    self.advance();
                    return Ok(out);
                }
                Some(b'\\') => {
                    self.advance();
                    match self.peek() {
                        Some(b'"') => out.push('"'),
                        Some(b'\\') => out.push('\\'),
                        Some(b'/') => out.push('/'),
                        Some(b'b') => out.push('\u{8}'),
                        Some(b'f') => out.push('\u{c}'),
                        Some(b'n') => out.push('\n'),
                        Some(b'r') => out.push('\r'),
                        Some(b't') => out.push('\t'),
                        Some(b'u') => {
                            self.advance();
                            let cp = self.parse_hex4()?;
                            out.push(char::from_u32(cp).unwrap_or('\u{fffd}'));
                            continue;
                        }
                        _ => {
                            return Err(ParseError::MalformedJson(
                                "invalid escape sequence".to_string(),
                            ))
                        }
                    }
                    self.advance();
                }
                Some(b) if b.is_ascii_control() => {
                    return Err(ParseError::MalformedJson(
                        "control character in string".to_string(),
                    ))
                }
                Some(_) => {
                    // Fold raw UTF-8 bytes straight in; we only ever sliced
                    // on ASCII structural bytes above, so the boundary is safe.
                    let start = self.pos;
                    while let Some(b) = self.peek() {
                        if b == b'"' || b == b'\\' || b.is_ascii_control() {
                            break;
                        }
                        self.advance();
                    }
                    let chunk = std::str::from_utf8(&self.data[start..self.pos])
                        .map_err(|_| ParseError::MalformedJson("invalid utf-8".to_string()))?;
                    out.push_str(chunk);
                }
            }
        }
    }

    fn parse_hex4(&mut self) -> Result<u32, ParseError> {
        let mut cp = 0u32;
        for _ in 0..4 {
            let b = self
                .peek()
                .ok_or_else(|| ParseError::MalformedJson("truncated \\u escape".to_string()))?;
            let digit = (b as char)
                .to_digit(16)
                .ok_or_else(|| ParseError::MalformedJson("invalid \\u escape".to_string()))?;
            cp = cp * 16 + digit;
            self.advance();
        }
        Ok(cp)
    }

    /// Scans the byte extent of a JSON number token, then converts it with
    /// one direct parse. The scan enforces the grammar (optional sign,
    /// digits, optional fraction, optional exponent); the conversion itself
    /// is the standard library's float parser rather than a hand-rolled
    /// accumulator, since metric values are arbitrary-magnitude and the
    /// exponent form needs full float semantics, not fixed-point ticks.
    fn parse_number(&mut self) -> Result<f64, ParseError> {
        let start = self.pos;

        if self.peek() == Some(b'-') {
            self.advance();
        }
        let digits_start = self.pos;
        while matches!(self.peek(), Some(b) if b.is_ascii_digit()) {
            self.advance();
        }
        if self.pos == digits_start {
            return Err(ParseError::MalformedJson(
                "expected digit in number".to_string(),
            ));
        }
        if self.peek() == Some(b'.') {
            self.advance();
            let frac_start = self.pos;
            while matches!(self.peek(), Some(b) if b.is_ascii_digit()) {
                self.advance();
            }
            if self.pos == frac_start {
                return Err(ParseError::MalformedJson(
                    "expected digit after decimal point".to_string(),
                ));
            }
        }
        if matches!(self.peek(), Some(b'e') | Some(b'E')) {
            self.advance();
            if matches!(self.peek(), Some(b'+') | Some(b'-')) {
                self.advance();
            }
            let exp_start = self.pos;
            while matches!(self.peek(), Some(b) if b.is_ascii_digit()) {
                self.advance();
            }
            if self.pos == exp_start {
                return Err(ParseError::MalformedJson(
                    "expected digit in exponent".to_string(),
                ));
            }
        }

        let text = std::str::from_utf8(&self.data[start..self.pos])
            .map_err(|_| ParseError::MalformedJson("invalid utf-8 in number".to_string()))?;
        text.parse::<f64>()
            .map_err(|_| ParseError::MalformedJson(format!("invalid number literal \"{text}\"")))
    }

    /// Skips over one JSON value of any shape without retaining it. Used
    /// for top-level keys other than `"metrics"` and unrecognized keys
    /// inside a metric object.
    fn skip_value(&mut self) -> Result<(), ParseError> {
        self.skip_ws();
        match self.peek() {
            Some(b'"') => {
                self.parse_string()?;
            }
            Some(b'{') => {
                self.advance();
                self.skip_ws();
                if self.peek() != Some(b'}') {
                    loop {
                        self.skip_ws();
                        self.parse_string()?;
                        self.skip_ws();
                        self.expect(b':')?;
                        self.skip_value()?;
                        self.skip_ws();
                        match self.peek() {
                            Some(b',') => self.advance(),
                            Some(b'}') => {
                                self.advance();
                                break;
                            }
                            _ => {
                                return Err(ParseError::MalformedJson(
                                    "expected ',' or '}'".to_string(),
                                ))
                            }
                        }
                    }
                } else {
                    self.advance();
                }
            }
            Some(b'[') => {
                self.advance();
                self.skip_ws();
                if self.peek() != Some(b']') {
                    loop {
                        self.skip_value()?;
                        self.skip_ws();
                        match self.peek() {
                            Some(b',') => self.advance(),
                            Some(b']') => {
                                self.advance();
                                break;
                            }
                            _ => {
                                return Err(ParseError::MalformedJson(
                                    "expected ',' or ']'".to_string(),
                                ))
                            }
                        }
                    }
                } else {
                    self.advance();
                }
            }
            Some(b't') => self.expect_literal("true")?,
            Some(b'f') => self.expect_literal("false")?,
            Some(b'n') => self.expect_literal("null")?,
            Some(b'-') | Some(b'0'..=b'9') => {
                self.parse_number()?;
            }
            Some(b) => {
                return Err(ParseError::MalformedJson(format!(
                    "unexpected token '{}'",
                    b as char
                )))
            }
            None => {
                return Err(ParseError::MalformedJson(
                    "unexpected end of input".to_string(),
                ))
            }
        }
        Ok(())
    }

    fn expect_literal(&mut self, literal: &str) -> Result<(), ParseError> {
        for expected in literal.bytes() {
            self.expect(expected)?;
        }
        Ok(())
    }
}
