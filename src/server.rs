use crate::error::ProxyError;
use crate::executor::ProxyExecutor;
use hyper::server::conn::http1::Builder as ServerBuilder;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use log::{debug, error, info};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Inbound HTTP/1.1 listener. Each accepted connection gets its own task
/// that hands every request to the shared [`ProxyExecutor`].
pub struct ProxyServer {
    listener: TcpListener,
    executor: Arc<ProxyExecutor>,
}

impl ProxyServer {
    pub async fn bind(addr: SocketAddr, executor: Arc<ProxyExecutor>) -> Result<Self, ProxyError> {
        info!("Binding HTTP listener to: {}", addr);
        let listener = TcpListener::bind(addr).await.map_err(ProxyError::Io)?;
        Ok(Self { listener, executor })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ProxyError> {
        self.listener.local_addr().map_err(ProxyError::Io)
    }

    /// Accepts connections until the listener fails.
    pub async fn serve(self) -> Result<(), ProxyError> {
        info!("Proxy listening on: http://{}", self.local_addr()?);

        loop {
            let (stream, remote_addr) = self.listener.accept().await.map_err(ProxyError::Io)?;
            debug!("Accepted connection from {}", remote_addr);
            let executor = self.executor.clone();

            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |req| {
                    let executor = executor.clone();
                    async move { Ok::<_, Infallible>(executor.forward(req).await) }
                });

                if let Err(err) = ServerBuilder::new()
                    .keep_alive(true)
                    .serve_connection(io, service)
                    .await
                {
                    error!("Error serving connection from {}: {}", remote_addr, err);
                }
            });
        }
    }
}
