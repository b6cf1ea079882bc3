use crate::error::ProxyError;
use crate::metrics::{MetricsSink, ProxyMetrics};
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{CONTENT_TYPE, HeaderValue};
use hyper::server::conn::http1::Builder as ServerBuilder;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::net::TcpListener;

pub const METRICS_ENDPOINT: &str = "/metrics";
pub const HEALTH_ENDPOINT: &str = "/health";

/// Side listener exposing the request counters.
pub struct MonitoringServer {
    listener: TcpListener,
    metrics: Arc<ProxyMetrics>,
}

impl MonitoringServer {
    pub async fn bind(addr: SocketAddr, metrics: Arc<ProxyMetrics>) -> Result<Self, ProxyError> {
        let listener = TcpListener::bind(addr).await.map_err(ProxyError::Io)?;
        Ok(Self { listener, metrics })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ProxyError> {
        self.listener.local_addr().map_err(ProxyError::Io)
    }

    pub async fn run(self) -> Result<(), ProxyError> {
        log::info!("Monitoring server listening on http://{}", self.local_addr()?);

        loop {
            let (stream, remote_addr) = self.listener.accept().await.map_err(ProxyError::Io)?;
            let metrics = self.metrics.clone();

            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                if let Err(err) = ServerBuilder::new()
                    .serve_connection(
                        io,
                        service_fn(move |req| {
                            let metrics = metrics.clone();
                            async move { Ok::<_, Infallible>(route(&metrics, req)) }
                        }),
                    )
                    .await
                {
                    log::error!("Monitoring connection error from {}: {}", remote_addr, err);
                }
            });
        }
    }
}

fn route(metrics: &ProxyMetrics, req: Request<Incoming>) -> Response<Full<Bytes>> {
    if req.method() != Method::GET {
        return text(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed");
    }
    match req.uri().path() {
        METRICS_ENDPOINT => handle_metrics(metrics),
        HEALTH_ENDPOINT => handle_health(metrics),
        _ => text(StatusCode::NOT_FOUND, "Monitoring endpoint not found"),
    }
}

fn handle_metrics(metrics: &ProxyMetrics) -> Response<Full<Bytes>> {
    match metrics.encode() {
        Ok(payload) => with_content_type(
            text(StatusCode::OK, payload),
            "text/plain; version=0.0.4; charset=utf-8",
        ),
        Err(e) => {
            log::error!("Failed to encode Prometheus metrics: {}", e);
            text(StatusCode::INTERNAL_SERVER_ERROR, "metrics unavailable")
        }
    }
}

fn handle_health(metrics: &ProxyMetrics) -> Response<Full<Bytes>> {
    let payload = json!({
        "status": "healthy",
        "timestamp": current_timestamp(),
        "counters": metrics.snapshot(),
    });
    with_content_type(text(StatusCode::OK, payload.to_string()), "application/json")
}

fn text(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}

fn with_content_type(
    mut response: Response<Full<Bytes>>,
    value: &'static str,
) -> Response<Full<Bytes>> {
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(value));
    response
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
