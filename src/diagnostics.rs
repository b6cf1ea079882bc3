//! Verbosity-gated dumps of proxied traffic.
//!
//! Levels: 0 silent, 1 request parameters and redirect hops, 2 adds header
//! dumps of requests, responses and redirects, 3 adds bodies.

use crate::config::MAX_VERBOSITY;
use bytes::Bytes;
use hyper::header::{CONTENT_TYPE, HOST};
use hyper::{HeaderMap, Method, StatusCode, Uri, Version};
use log::warn;
use std::fmt::{self, Write};
use std::sync::{Arc, Mutex};

pub const DIAG_TARGET: &str = "proximity::diag";

/// Line-oriented destination for diagnostic output.
pub trait DiagnosticSink: Send + Sync {
    fn record(&self, line: &str);
}

/// Writes every line through the `log` facade under [`DIAG_TARGET`].
#[derive(Debug, Default)]
pub struct LogSink;

impl DiagnosticSink for LogSink {
    fn record(&self, line: &str) {
        log::info!(target: DIAG_TARGET, "{}", line);
    }
}

/// Keeps lines in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        match self.lines.lock() {
            Ok(lines) => lines.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl DiagnosticSink for MemorySink {
    fn record(&self, line: &str) {
        match self.lines.lock() {
            Ok(mut lines) => lines.push(line.to_string()),
            Err(poisoned) => poisoned.into_inner().push(line.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Verbosity(u8);

impl Verbosity {
    pub fn new(level: u8) -> Self {
        Self(level.min(MAX_VERBOSITY))
    }

    pub fn level(self) -> u8 {
        self.0
    }

    pub fn params(self) -> bool {
        self.0 >= 1
    }

    pub fn headers(self) -> bool {
        self.0 >= 2
    }

    pub fn bodies(self) -> bool {
        self.0 >= 3
    }
}

/// Outbound request as seen by diagnostics.
pub struct RequestView<'a> {
    pub method: &'a Method,
    pub uri: &'a Uri,
    pub headers: &'a HeaderMap,
    pub body: &'a Bytes,
}

#[derive(Clone)]
pub struct DiagnosticRecorder {
    verbosity: Verbosity,
    sink: Arc<dyn DiagnosticSink>,
}

impl fmt::Debug for DiagnosticRecorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiagnosticRecorder")
            .field("verbosity", &self.verbosity)
            .finish()
    }
}

impl DiagnosticRecorder {
    pub fn new(verbosity: Verbosity, sink: Arc<dyn DiagnosticSink>) -> Self {
        Self { verbosity, sink }
    }

    pub fn with_log_sink(verbosity: Verbosity) -> Self {
        Self::new(verbosity, Arc::new(LogSink))
    }

    /// Query and urlencoded form parameters of the inbound request.
    pub fn params(&self, method: &Method, uri: &Uri, headers: &HeaderMap, body: &Bytes) {
        if !self.verbosity.params() {
            return;
        }
        let mut out = String::from("----- PARAMS ------\n");
        let result = write_params(&mut out, method, uri, headers, body);
        self.emit(out, result, "parameters");
    }

    pub fn request(&self, request: &RequestView<'_>) {
        if !self.verbosity.headers() {
            return;
        }
        let mut out = String::from("----- REQUEST ------\n");
        let result = self.write_request(&mut out, request);
        self.emit(out, result, "request");
    }

    /// One followed redirect hop. The header dump is only added from level 2.
    pub fn redirect(&self, hop: usize, status: StatusCode, request: &RequestView<'_>) {
        if !self.verbosity.params() {
            return;
        }
        let mut out = String::from("----- REDIRECT ------\n");
        let result = (|| -> fmt::Result {
            writeln!(
                out,
                "hop {} ({}): {} {}",
                hop,
                status.as_u16(),
                request.method,
                request.uri
            )?;
            if self.verbosity.headers() {
                self.write_request(&mut out, request)?;
            }
            Ok(())
        })();
        self.emit(out, result, "redirect");
    }

    pub fn response(
        &self,
        status: StatusCode,
        version: Version,
        headers: &HeaderMap,
        body: &Bytes,
    ) {
        if !self.verbosity.headers() {
            return;
        }
        let mut out = String::from("----- RESPONSE ------\n");
        let result = (|| -> fmt::Result {
            let reason = status.canonical_reason().unwrap_or("");
            writeln!(out, "{:?} {} {}", version, status.as_u16(), reason)?;
            write_headers(&mut out, headers)?;
            if self.verbosity.bodies() {
                write_body(&mut out, body)?;
            }
            Ok(())
        })();
        self.emit(out, result, "response");
    }

    fn write_request(&self, out: &mut String, request: &RequestView<'_>) -> fmt::Result {
        let path = request
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        writeln!(out, "{} {} HTTP/1.1", request.method, path)?;
        if !request.headers.contains_key(HOST) {
            if let Some(authority) = request.uri.authority() {
                writeln!(out, "host: {}", authority)?;
            }
        }
        write_headers(out, request.headers)?;
        if self.verbosity.bodies() {
            write_body(out, request.body)?;
        }
        Ok(())
    }

    fn emit(&self, out: String, result: fmt::Result, what: &str) {
        if let Err(e) = result {
            warn!("Failed to format {} diagnostics: {}", what, e);
            return;
        }
        for line in out.lines() {
            self.sink.record(line);
        }
    }
}

fn write_params(
    out: &mut String,
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    body: &Bytes,
) -> fmt::Result {
    let mut seen: Vec<String> = Vec::new();
    let mut write_pairs = |out: &mut String, input: &[u8]| -> fmt::Result {
        for (key, value) in url::form_urlencoded::parse(input) {
            if seen.iter().any(|k| k.as_str() == key) {
                continue;
            }
            writeln!(out, "{}:\t{}\t", key, value)?;
            seen.push(key.into_owned());
        }
        Ok(())
    };

    if is_form_body(method, headers) {
        write_pairs(&mut *out, body)?;
    }
    if let Some(query) = uri.query() {
        write_pairs(&mut *out, query.as_bytes())?;
    }
    Ok(())
}

fn is_form_body(method: &Method, headers: &HeaderMap) -> bool {
    let carries_body = matches!(*method, Method::POST | Method::PUT | Method::PATCH);
    carries_body
        && headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| {
                ct.trim()
                    .to_ascii_lowercase()
                    .starts_with("application/x-www-form-urlencoded")
            })
            .unwrap_or(false)
}

fn write_headers(out: &mut String, headers: &HeaderMap) -> fmt::Result {
    for (name, value) in headers {
        writeln!(out, "{}: {}", name, String::from_utf8_lossy(value.as_bytes()))?;
    }
    Ok(())
}

fn write_body(out: &mut String, body: &Bytes) -> fmt::Result {
    if body.is_empty() {
        return Ok(());
    }
    writeln!(out)?;
    writeln!(out, "{}", String::from_utf8_lossy(body))
}
