//! Request and response values exchanged with the proxy
//!
//! Bodies are buffered `Bytes` so a request can be resent verbatim after a
//! challenge without re-reading a stream.

use bytes::Bytes;
use http::header::{HOST, PROXY_AUTHENTICATE};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use url::Url;

use crate::error::{Error, Result};

/// Headers that only make sense between adjacent hops (RFC 9110 §7.6.1).
///
/// `proxy-authorization` is here so a caller-supplied value never rides along
/// to the target, and so the only one the proxy sees is ours.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// An outbound request destined for a target through the proxy.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ProxyRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn get(url: &str) -> Result<Self> {
        Ok(Self::new(Method::GET, parse_target(url)?))
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Whether the target is reached through a `CONNECT` tunnel.
    pub fn is_tunnelled(&self) -> bool {
        self.url.scheme() == "https"
    }

    /// `host:port` of the target, as used in a `CONNECT` request line.
    pub fn authority(&self) -> Result<String> {
        let host = self
            .url
            .host_str()
            .ok_or_else(|| Error::InvalidRequest(format!("{} has no host", redacted(&self.url))))?;
        let port = self
            .url
            .port_or_known_default()
            .ok_or_else(|| Error::InvalidRequest(format!("{} has no port", redacted(&self.url))))?;
        Ok(format!("{host}:{port}"))
    }

    /// Drop hop-by-hop headers and anything named in `Connection`.
    pub fn strip_hop_by_hop(&mut self) {
        let named: Vec<HeaderName> = self
            .headers
            .get_all(http::header::CONNECTION)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
            .collect();
        for name in named {
            self.headers.remove(name);
        }
        for name in HOP_BY_HOP_HEADERS {
            self.headers.remove(*name);
        }
        // Derived from the URL on every send
        self.headers.remove(HOST);
    }

    pub(crate) fn validate(&self) -> Result<()> {
        match self.url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(Error::InvalidRequest(format!(
                    "unsupported target scheme {other:?}"
                )));
            }
        }
        self.authority().map(|_| ())
    }
}

/// Response returned to the caller, plus what the proxy itself said.
#[derive(Debug, Clone)]
pub struct ProxyResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Headers of the proxy's own answer: the `CONNECT` reply for tunnelled
    /// targets, otherwise the same as `headers`.
    pub proxy_headers: HeaderMap,
}

impl ProxyResponse {
    /// A response that came straight from the proxy (forward mode, or a
    /// refused `CONNECT`).
    pub fn from_proxy(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            proxy_headers: headers.clone(),
            headers,
            body,
        }
    }

    pub fn is_proxy_auth_required(&self) -> bool {
        self.status == StatusCode::PROXY_AUTHENTICATION_REQUIRED
    }

    pub fn proxy_authenticate(&self) -> impl Iterator<Item = &HeaderValue> {
        self.proxy_headers.get_all(PROXY_AUTHENTICATE).iter()
    }
}

/// `url` with any userinfo password masked, for logs and error messages.
pub fn redacted(url: &Url) -> String {
    if url.password().is_none() {
        return url.to_string();
    }
    let mut masked = url.clone();
    match masked.set_password(Some("***")) {
        Ok(()) => masked.to_string(),
        Err(()) => format!("{}://{}", url.scheme(), url.host_str().unwrap_or_default()),
    }
}

/// Check if a header is hop-by-hop (must not be forwarded)
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

fn parse_target(url: &str) -> Result<Url> {
    Url::parse(url).map_err(|e| Error::InvalidRequest(format!("invalid target URL: {e}")))
}
