//! Transport abstraction for reaching targets through a proxy
//!
//! The authenticator only owns the authentication leg; getting bytes to the
//! proxy is delegated to a `ProxyTransport`. `HttpTransport` is the real one:
//! plain `http://` targets go through reqwest in forward-proxy mode, while
//! `https://` targets use our own `CONNECT` handshake so a 407 on the tunnel
//! is visible to the authenticator.
//!
//! Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn ProxyTransport>`).

use std::future::Future;
use std::pin::Pin;

use http::HeaderValue;
use url::Url;

use crate::error::TransportError;
use crate::forward::ForwardTransport;
use crate::request::{ProxyRequest, ProxyResponse};
use crate::tunnel::TunnelTransport;

/// Future returned by `ProxyTransport::send`.
pub type SendFuture<'a> =
    Pin<Box<dyn Future<Output = std::result::Result<ProxyResponse, TransportError>> + Send + 'a>>;

pub trait ProxyTransport: Send + Sync {
    /// Send `request` through `proxy`, adding `proxy_authorization` to the
    /// message the proxy consumes (never to anything the target sees).
    ///
    /// A 407 from the proxy is a normal `Ok` response, not an error.
    fn send<'a>(
        &'a self,
        proxy: &'a Url,
        request: &'a ProxyRequest,
        proxy_authorization: Option<&'a HeaderValue>,
    ) -> SendFuture<'a>;
}

/// Scheme-dispatching transport used outside of tests.
pub struct HttpTransport {
    forward: ForwardTransport,
    tunnel: TunnelTransport,
}

impl HttpTransport {
    /// Transport with webpki roots for tunnelled TLS.
    pub fn new() -> std::result::Result<Self, TransportError> {
        Ok(Self {
            forward: ForwardTransport::new(),
            tunnel: TunnelTransport::new()?,
        })
    }
}

impl ProxyTransport for HttpTransport {
    fn send<'a>(
        &'a self,
        proxy: &'a Url,
        request: &'a ProxyRequest,
        proxy_authorization: Option<&'a HeaderValue>,
    ) -> SendFuture<'a> {
        if request.is_tunnelled() {
            self.tunnel.send(proxy, request, proxy_authorization)
        } else {
            self.forward.send(proxy, request, proxy_authorization)
        }
    }
}
