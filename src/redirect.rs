use crate::config::MAX_REDIRECTS;
use crate::diagnostics::DiagnosticRecorder;
use crate::error::{ProxyError, Result};
use crate::outbound::{OutboundRequest, set_host};
use bytes::Bytes;
use hyper::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderValue, TRANSFER_ENCODING};
use hyper::{Method, StatusCode, Uri};
use log::debug;
use url::Url;

/// Decides how each redirect response in a chain is followed.
///
/// Every hop carries all headers of the request before it, so credentials
/// and cookies survive the chain. Exceeding the hop limit fails only the call
/// being made.
#[derive(Debug, Clone)]
pub struct RedirectPolicy {
    max_hops: usize,
    recorder: DiagnosticRecorder,
}

impl RedirectPolicy {
    pub fn new(recorder: DiagnosticRecorder) -> Self {
        Self {
            max_hops: MAX_REDIRECTS,
            recorder,
        }
    }

    pub fn is_redirect(status: StatusCode) -> bool {
        matches!(
            status,
            StatusCode::MOVED_PERMANENTLY
                | StatusCode::FOUND
                | StatusCode::SEE_OTHER
                | StatusCode::TEMPORARY_REDIRECT
                | StatusCode::PERMANENT_REDIRECT
        )
    }

    /// Builds the request for the next hop.
    ///
    /// `followed` is the number of redirects already followed in this chain.
    pub fn next_hop(
        &self,
        previous: &OutboundRequest,
        status: StatusCode,
        location: &HeaderValue,
        followed: usize,
    ) -> Result<OutboundRequest> {
        if followed >= self.max_hops {
            return Err(ProxyError::TooManyRedirects(self.max_hops));
        }

        let uri = resolve_location(&previous.uri, location)?;

        let mut next = OutboundRequest {
            method: previous.method.clone(),
            uri,
            headers: previous.headers.clone(),
            body: previous.body.clone(),
        };
        set_host(&mut next.headers, &next.uri);

        if matches!(
            status,
            StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND | StatusCode::SEE_OTHER
        ) {
            if next.method != Method::GET && next.method != Method::HEAD {
                next.method = Method::GET;
            }
            next.body = Bytes::new();
            next.headers.remove(CONTENT_LENGTH);
            next.headers.remove(CONTENT_TYPE);
            next.headers.remove(TRANSFER_ENCODING);
        }

        debug!(
            "Following redirect {} of at most {}: {} {} -> {} {}",
            followed + 1,
            self.max_hops,
            status.as_u16(),
            previous.uri,
            next.method,
            next.uri
        );
        self.recorder.redirect(followed + 1, status, &next.view());

        Ok(next)
    }
}

/// Resolves a `Location` value against the URI of the request that got it.
fn resolve_location(base: &Uri, location: &HeaderValue) -> Result<Uri> {
    let location = location
        .to_str()
        .map_err(|e| ProxyError::Transport(format!("Redirect location is not valid text: {}", e)))?;

    let base = Url::parse(&base.to_string()).map_err(|e| {
        ProxyError::Transport(format!("Cannot resolve redirect from '{}': {}", base, e))
    })?;
    let mut target = base.join(location).map_err(|e| {
        ProxyError::Transport(format!("Failed to parse redirect location '{}': {}", location, e))
    })?;
    target.set_fragment(None);

    if target.scheme() != "http" && target.scheme() != "https" {
        return Err(ProxyError::Transport(format!(
            "Unsupported redirect scheme in '{}'",
            target
        )));
    }

    target
        .as_str()
        .parse::<Uri>()
        .map_err(|e| ProxyError::Transport(format!("Invalid redirect target '{}': {}", target, e)))
}
