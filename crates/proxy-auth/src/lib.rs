//! SPNEGO (`Negotiate`) authentication against forward HTTP proxies
//!
//! Wraps a request pipeline: requests go through the proxy untouched until it
//! answers `407 Proxy Authentication Required` with a `Negotiate` challenge.
//! Then one Kerberos token is produced for `HTTP/<proxy-host>` and the
//! request is resent exactly once with `Proxy-Authorization`.
//!
//! Entry points:
//! - `ProxyAuthenticator::authenticate()` for the configured proxy
//! - `ProxyAuthenticator::authenticate_via()` for an explicit proxy
//!
//! `http://` targets use reqwest in forward-proxy mode; `https://` targets go
//! through a `CONNECT` tunnel opened by this crate so the tunnel's 407 is
//! observable. The token never reaches the target server.

pub mod authenticator;
pub mod cache;
pub mod error;
pub mod forward;
pub mod metrics;
pub mod request;
pub mod state;
pub mod transport;
pub mod tunnel;

#[cfg(test)]
mod test_support;

pub use authenticator::{AuthConfig, ProxyAuthenticator};
pub use error::{Error, Result, TransportError};
pub use forward::ForwardTransport;
pub use request::{ProxyRequest, ProxyResponse, is_hop_by_hop, redacted};
pub use state::{ChallengeState, MAX_RETRIES};
pub use transport::{HttpTransport, ProxyTransport, SendFuture};
pub use tunnel::{ConnectReply, TunnelTransport, establish};
