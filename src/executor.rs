use crate::body::CapturedBody;
use crate::diagnostics::DiagnosticRecorder;
use crate::error::{ProxyError, Result};
use crate::metrics::MetricsSink;
use crate::outbound::OutboundRequest;
use crate::redirect::RedirectPolicy;
use crate::rewrite::RequestRewriter;
use crate::tls::Transport;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Incoming};
use hyper::header::LOCATION;
use hyper::{Method, Request, Response, StatusCode, Uri};
use log::{debug, error, info, warn};
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

/// Status answered for requests the proxy itself could not complete.
pub const PROXY_FAILURE_STATUS: u16 = 599;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardState {
    Rewriting,
    Dispatching,
    AwaitingResponse,
    Relaying,
    Done,
    Aborted,
}

impl fmt::Display for ForwardState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ForwardState::Rewriting => "rewriting",
            ForwardState::Dispatching => "dispatching",
            ForwardState::AwaitingResponse => "awaiting response",
            ForwardState::Relaying => "relaying",
            ForwardState::Done => "done",
            ForwardState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Forwards one inbound request to the upstream and produces the response
/// to write back.
///
/// Shared by all connection tasks; it holds nothing mutable besides the
/// counters behind [`MetricsSink`].
pub struct ProxyExecutor {
    transport: Transport,
    rewriter: RequestRewriter,
    redirects: RedirectPolicy,
    recorder: DiagnosticRecorder,
    metrics: Arc<dyn MetricsSink>,
    timeout: Duration,
}

impl ProxyExecutor {
    pub fn new(
        transport: Transport,
        rewriter: RequestRewriter,
        recorder: DiagnosticRecorder,
        metrics: Arc<dyn MetricsSink>,
        timeout: Duration,
    ) -> Self {
        let redirects = RedirectPolicy::new(recorder.clone());
        Self {
            transport,
            rewriter,
            redirects,
            recorder,
            metrics,
            timeout,
        }
    }

    pub fn metrics(&self) -> &Arc<dyn MetricsSink> {
        &self.metrics
    }

    /// Runs the full forwarding pipeline. Never fails: every error ends in a
    /// 599 response.
    pub async fn forward<B>(&self, request: Request<B>) -> Response<Full<Bytes>>
    where
        B: Body,
        B::Error: fmt::Display,
    {
        let (parts, body) = request.into_parts();
        let mut state = ForwardState::Rewriting;
        info!("{}", start_line(&parts.method, &parts.uri));
        debug!("{} {}: {}", parts.method, parts.uri, state);

        let target = match self.rewriter.rewrite(&parts.uri) {
            Ok(target) => target,
            Err(e) => return self.abort(state, e),
        };
        let captured = match CapturedBody::capture(body).await {
            Ok(captured) => captured,
            Err(e) => return self.abort(state, e),
        };

        state = ForwardState::Dispatching;
        debug!("{} {}: {}", parts.method, target, state);
        self.metrics.incr_total();

        let (forward_body, diag_body) = captured.into_copies();
        self.recorder.params(&parts.method, &parts.uri, &parts.headers, &diag_body);
        let outbound = OutboundRequest::new(parts.method, target, &parts.headers, forward_body);
        self.recorder.request(&outbound.view());

        state = ForwardState::AwaitingResponse;
        debug!("{} {}: {}", outbound.method, outbound.uri, state);
        let response = match timeout(self.timeout, self.dispatch(outbound)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return self.abort(state, e),
            Err(_) => {
                let e = ProxyError::Transport(format!(
                    "No response within {}s",
                    self.timeout.as_secs_f64()
                ));
                return self.abort(state, e);
            }
        };

        let status = response.status();
        if status == StatusCode::OK {
            self.metrics.incr_success();
        } else {
            self.metrics.incr_failure();
        }

        state = ForwardState::Relaying;
        debug!("upstream answered {}: {}", status.as_u16(), state);
        let (parts, body) = response.into_parts();
        let bytes = match timeout(self.timeout, body.collect()).await {
            Ok(Ok(collected)) => collected.to_bytes(),
            Ok(Err(e)) => {
                let e = ProxyError::BodyRead(format!("Failed to read upstream body: {}", e));
                return self.abort(state, e);
            }
            Err(_) => {
                let e = ProxyError::BodyRead(format!(
                    "Upstream body not complete within {}s",
                    self.timeout.as_secs_f64()
                ));
                return self.abort(state, e);
            }
        };

        self.recorder.response(parts.status, parts.version, &parts.headers, &bytes);

        let mut relayed = Response::new(Full::new(bytes));
        *relayed.status_mut() = parts.status;
        *relayed.headers_mut() = parts.headers;
        debug!("upstream answered {}: {}", status.as_u16(), ForwardState::Done);
        info!("{}", end_line(status));
        relayed
    }

    /// Sends `outbound` and follows redirects until a final response.
    async fn dispatch(&self, mut outbound: OutboundRequest) -> Result<Response<Incoming>> {
        let mut followed = 0;
        loop {
            let response = self
                .transport
                .request(outbound.to_request())
                .await
                .map_err(|e| {
                    ProxyError::Transport(format!(
                        "{} {}: {}",
                        outbound.method,
                        outbound.uri,
                        error_chain(&e)
                    ))
                })?;

            let status = response.status();
            if !RedirectPolicy::is_redirect(status) {
                return Ok(response);
            }
            let Some(location) = response.headers().get(LOCATION).cloned() else {
                return Ok(response);
            };

            let next = self.redirects.next_hop(&outbound, status, &location, followed)?;
            if let Err(e) = response.into_body().collect().await {
                debug!("Discarding unreadable redirect body from {}: {}", outbound.uri, e);
            }
            outbound = next;
            followed += 1;
        }
    }

    fn abort(&self, state: ForwardState, e: ProxyError) -> Response<Full<Bytes>> {
        if e.is_counted_failure() {
            self.metrics.incr_failure();
            error!("Forwarding failed while {}: {}", state, e);
        } else {
            warn!("Forwarding aborted while {}: {}", state, e);
        }
        debug!("{}", ForwardState::Aborted);
        let response = failure_response(&e);
        info!("{}", end_line(response.status()));
        response
    }
}

fn start_line(method: &Method, uri: &Uri) -> String {
    format!("--> {} {}", method, uri)
}

fn end_line(status: StatusCode) -> String {
    format!("<-- {} END", status.as_u16())
}

/// Builds the synthetic failure response carrying the error text.
pub fn failure_response(e: &ProxyError) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(e.to_string())));
    *response.status_mut() = failure_status();
    response
}

fn failure_status() -> StatusCode {
    StatusCode::from_u16(PROXY_FAILURE_STATUS).unwrap_or(StatusCode::BAD_GATEWAY)
}

/// Joins an error with its sources, `outer: inner: root`.
fn error_chain(e: &(dyn StdError + 'static)) -> String {
    let mut message = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
