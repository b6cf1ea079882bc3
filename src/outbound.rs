use crate::diagnostics::RequestView;
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HOST, HeaderValue};
use hyper::{HeaderMap, Method, Request, Uri};

/// One request sent to the upstream: the first hop or a followed redirect.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl OutboundRequest {
    /// Copies `headers` verbatim; only `Host` is re-derived from `uri`.
    pub fn new(method: Method, uri: Uri, headers: &HeaderMap, body: Bytes) -> Self {
        let mut headers = headers.clone();
        set_host(&mut headers, &uri);
        Self { method, uri, headers, body }
    }

    pub fn view(&self) -> RequestView<'_> {
        RequestView {
            method: &self.method,
            uri: &self.uri,
            headers: &self.headers,
            body: &self.body,
        }
    }

    pub fn to_request(&self) -> Request<Full<Bytes>> {
        let mut request = Request::new(Full::new(self.body.clone()));
        *request.method_mut() = self.method.clone();
        *request.uri_mut() = self.uri.clone();
        *request.headers_mut() = self.headers.clone();
        request
    }
}

pub(crate) fn set_host(headers: &mut HeaderMap, uri: &Uri) {
    let value = uri
        .authority()
        .and_then(|authority| HeaderValue::from_str(authority.as_str()).ok());
    match value {
        Some(value) => {
            headers.insert(HOST, value);
        }
        None => {
            headers.remove(HOST);
        }
    }
}
