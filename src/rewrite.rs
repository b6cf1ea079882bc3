use crate::error::{ProxyError, Result};
use hyper::Uri;
use url::Url;

/// Maps inbound request targets onto the configured upstream.
///
/// Only the upstream's scheme and authority are used; its path, if any, is
/// ignored and the inbound path and query are carried over unchanged.
#[derive(Debug, Clone)]
pub struct RequestRewriter {
    scheme: String,
    authority: String,
}

impl RequestRewriter {
    pub fn new(upstream_url: &str) -> Result<Self> {
        let url = Url::parse(upstream_url)?;
        Self::from_url(&url)
    }

    pub fn from_url(url: &Url) -> Result<Self> {
        let host = url
            .host_str()
            .ok_or_else(|| ProxyError::InvalidUrl(format!("upstream URL '{}' has no host", url)))?;

        let authority = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };

        Ok(Self {
            scheme: url.scheme().to_string(),
            authority,
        })
    }

    /// Builds `scheme://authority` + inbound path and query.
    pub fn rewrite(&self, inbound: &Uri) -> Result<Uri> {
        let path = inbound.path();
        if !path.starts_with('/') {
            return Err(ProxyError::InvalidUrl(format!(
                "request target '{}' has no absolute path",
                inbound
            )));
        }
        validate_escapes(path)?;

        let target = match inbound.query() {
            Some(query) => format!("{}://{}{}?{}", self.scheme, self.authority, path, query),
            None => format!("{}://{}{}", self.scheme, self.authority, path),
        };

        target
            .parse::<Uri>()
            .map_err(|e| ProxyError::InvalidUrl(format!("'{}': {}", target, e)))
    }
}

// Every '%' must introduce two hex digits.
fn validate_escapes(path: &str) -> Result<()> {
    let bytes = path.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let valid = bytes.len() > i + 2
                && bytes[i + 1].is_ascii_hexdigit()
                && bytes[i + 2].is_ascii_hexdigit();
            if !valid {
                let end = (i + 3).min(bytes.len());
                return Err(ProxyError::InvalidUrl(format!(
                    "invalid URL escape '{}' in path '{}'",
                    &path[i..end],
                    path
                )));
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rewrite(upstream: &str, inbound: &str) -> Result<String> {
        let rewriter = RequestRewriter::new(upstream)?;
        let uri: Uri = inbound.parse().unwrap();
        rewriter.rewrite(&uri).map(|u| u.to_string())
    }

    #[test]
    fn test_rewrites_scheme_and_host() {
        assert_eq!(
            rewrite("https://api.example.com", "/foo?x=1").unwrap(),
            "https://api.example.com/foo?x=1"
        );
    }

    #[test]
    fn test_keeps_explicit_port() {
        assert_eq!(
            rewrite("http://backend.internal:8443", "/a/b").unwrap(),
            "http://backend.internal:8443/a/b"
        );
    }

    #[test]
    fn test_ignores_upstream_path() {
        assert_eq!(
            rewrite("https://api.example.com/base/", "/users").unwrap(),
            "https://api.example.com/users"
        );
    }

    #[test]
    fn test_query_is_byte_identical() {
        let inbound = "/search?q=a%20b&tag=x&tag=y&empty=";
        assert_eq!(
            rewrite("http://127.0.0.1:3000", inbound).unwrap(),
            format!("http://127.0.0.1:3000{}", inbound)
        );
    }

    #[test]
    fn test_absolute_form_uses_only_path() {
        assert_eq!(
            rewrite("https://api.example.com", "http://other.example.org/foo?x=1").unwrap(),
            "https://api.example.com/foo?x=1"
        );
    }

    #[test]
    fn test_rejects_malformed_escape() {
        assert!(matches!(
            rewrite("https://api.example.com", "/foo%zzbar"),
            Err(ProxyError::InvalidUrl(_))
        ));
        assert!(matches!(
            rewrite("https://api.example.com", "/trailing%4"),
            Err(ProxyError::InvalidUrl(_))
        ));
        assert!(rewrite("https://api.example.com", "/ok%2Fencoded").is_ok());
    }

    #[test]
    fn test_rejects_authority_form() {
        assert!(matches!(
            rewrite("https://api.example.com", "api.example.com:443"),
            Err(ProxyError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_rejects_bad_upstream() {
        assert!(matches!(RequestRewriter::new("::not a url"), Err(ProxyError::InvalidUrl(_))));
        assert!(RequestRewriter::new("unix:/var/run/sock").is_err());
    }
}
