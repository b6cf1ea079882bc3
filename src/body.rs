use crate::error::{ProxyError, Result};
use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::body::Body;

/// Inbound request body drained into memory so it can be read twice.
///
/// A request body stream yields its bytes exactly once. Capturing drains it
/// into a single owned buffer, and each copy handed out is an independent
/// view over that buffer with its own read position.
#[derive(Debug, Clone, Default)]
pub struct CapturedBody {
    bytes: Bytes,
}

impl CapturedBody {
    /// Drains `body` to the end. Any read error aborts the capture.
    pub async fn capture<B>(body: B) -> Result<Self>
    where
        B: Body,
        B::Error: std::fmt::Display,
    {
        let collected = body
            .collect()
            .await
            .map_err(|e| ProxyError::BodyRead(format!("Failed to read request body: {}", e)))?;

        Ok(Self {
            bytes: collected.to_bytes(),
        })
    }

    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self { bytes: bytes.into() }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Splits into the forwarding copy and the diagnostics copy.
    pub fn into_copies(self) -> (Bytes, Bytes) {
        let forward = self.bytes.clone();
        (forward, self.bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Buf;
    use futures::stream;
    use http_body_util::{Full, StreamBody};
    use hyper::body::Frame;

    #[tokio::test]
    async fn test_capture_full_body() {
        let captured = CapturedBody::capture(Full::new(Bytes::from_static(b"name=value")))
            .await
            .unwrap();
        assert_eq!(captured.len(), 10);

        let (forward, diag) = captured.into_copies();
        assert_eq!(forward, Bytes::from_static(b"name=value"));
        assert_eq!(diag, Bytes::from_static(b"name=value"));
    }

    #[tokio::test]
    async fn test_copies_are_independent_readers() {
        let (mut forward, diag) = CapturedBody::from_bytes("abcdef").into_copies();

        forward.advance(4);
        assert_eq!(forward.as_ref(), b"ef");
        assert_eq!(diag.as_ref(), b"abcdef");
    }

    #[tokio::test]
    async fn test_capture_multi_frame_stream() {
        let frames: Vec<std::result::Result<Frame<Bytes>, std::io::Error>> = vec![
            Ok(Frame::data(Bytes::from_static(b"chunk-1;"))),
            Ok(Frame::data(Bytes::from_static(b"chunk-2"))),
        ];
        let body = StreamBody::new(stream::iter(frames));

        let captured = CapturedBody::capture(body).await.unwrap();
        let (forward, _) = captured.into_copies();
        assert_eq!(forward.as_ref(), b"chunk-1;chunk-2");
    }

    #[tokio::test]
    async fn test_read_error_is_body_read() {
        let frames: Vec<std::result::Result<Frame<Bytes>, std::io::Error>> = vec![
            Ok(Frame::data(Bytes::from_static(b"partial"))),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
        ];
        let body = StreamBody::new(stream::iter(frames));

        let result = CapturedBody::capture(body).await;
        assert!(matches!(result, Err(ProxyError::BodyRead(_))));
    }

    #[tokio::test]
    async fn test_empty_body() {
        let captured = CapturedBody::capture(Full::new(Bytes::new())).await.unwrap();
        assert!(captured.is_empty());
    }
}
