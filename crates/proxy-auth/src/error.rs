//! Error types for proxy authentication
//!
//! Every variant is terminal for the request that produced it. Credential and
//! negotiation failures are never retried here; the embedding application
//! decides whether to prompt for new credentials and start over.

/// Failures below the authentication layer, passed through unmodified.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP request through proxy failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("proxy connection failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS to target failed: {0}")]
    Tls(String),

    #[error("HTTP exchange inside tunnel failed: {0}")]
    Tunnel(#[from] hyper::Error),

    #[error("malformed proxy response: {0}")]
    Malformed(String),

    #[error("proxy exchange timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Errors surfaced by `ProxyAuthenticator`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("proxy credential error: {0}")]
    Credential(String),

    #[error("proxy negotiation error: {0}")]
    Negotiation(String),

    #[error("proxy {proxy} rejected the Negotiate credentials")]
    AuthenticationFailed { proxy: String },

    #[error("proxy protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl Error {
    /// Short label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Credential(_) => "credential",
            Error::Negotiation(_) => "negotiation",
            Error::AuthenticationFailed { .. } => "authentication_failed",
            Error::ProtocolViolation(_) => "protocol_violation",
            Error::InvalidRequest(_) => "invalid_request",
            Error::Transport(_) => "transport",
        }
    }
}

impl From<negotiate::Error> for Error {
    fn from(e: negotiate::Error) -> Self {
        match e {
            negotiate::Error::Credential(msg) => Error::Credential(msg),
            // An unknown or malformed service principal is something the KDC rejects
            // mid-handshake, same as a bad token.
            negotiate::Error::Negotiation(_)
            | negotiate::Error::InvalidToken(_)
            | negotiate::Error::InvalidPrincipal(_) => Error::Negotiation(e.to_string()),
        }
    }
}

/// Result alias for proxy authentication.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiate_errors_map_onto_taxonomy() {
        let err: Error = negotiate::Error::Credential("no ticket".into()).into();
        assert!(matches!(err, Error::Credential(ref m) if m == "no ticket"));

        let err: Error = negotiate::Error::InvalidPrincipal("HTTP/".into()).into();
        assert_eq!(err.kind(), "negotiation");

        let err: Error = negotiate::Error::Negotiation("Clock skew too great".into()).into();
        assert!(err.to_string().contains("Clock skew too great"));
    }

    #[test]
    fn transport_error_is_transparent() {
        let err: Error = TransportError::Malformed("no status line".into()).into();
        assert_eq!(err.to_string(), "malformed proxy response: no status line");
        assert_eq!(err.kind(), "transport");
    }

    #[test]
    fn authentication_failed_names_proxy() {
        let err = Error::AuthenticationFailed {
            proxy: "http://localhost:3128".into(),
        };
        assert_eq!(
            err.to_string(),
            "proxy http://localhost:3128 rejected the Negotiate credentials"
        );
    }
}
