//! Security context abstraction
//!
//! `Negotiator` is the seam to the Kerberos library: it turns
//! `ProxyCredentials` into a library credential and opens security contexts
//! against a service principal. A `SecurityContext` owns the underlying
//! negotiation handle and must release it in `Drop`, so dropping the context
//! on any path (success, error, cancellation) frees library resources.
//!
//! Both calls may block on KDC round-trips; callers in async code should run
//! them on a blocking thread.

use std::sync::Arc;
use std::time::Instant;

use crate::credentials::ProxyCredentials;
use crate::error::{Error, Result};
use crate::principal::ServicePrincipal;
use crate::token::NegotiationToken;

/// Outcome of one context step.
#[derive(Debug)]
pub enum Step {
    /// The context is established. The token, if any, must still be sent.
    Complete(Option<NegotiationToken>),
    /// The token must be sent and the peer is expected to answer with another.
    Continue(NegotiationToken),
}

impl Step {
    /// Token to put on the wire for this step, if any.
    pub fn token(&self) -> Option<&NegotiationToken> {
        match self {
            Step::Complete(token) => token.as_ref(),
            Step::Continue(token) => Some(token),
        }
    }
}

/// A credential handle together with how long the library says it stays valid.
#[derive(Debug)]
pub struct AcquiredCredential<C> {
    pub handle: C,
    /// `None` when the library cannot tell; such credentials are re-acquired
    /// for every exchange.
    pub valid_until: Option<Instant>,
}

impl<C> AcquiredCredential<C> {
    pub fn is_valid_at(&self, now: Instant) -> bool {
        self.valid_until.is_some_and(|until| now < until)
    }
}

/// Per-exchange negotiation state.
pub trait SecurityContext: Send + 'static {
    /// Advance the handshake. The first call passes `None`; later calls pass
    /// the token the proxy returned.
    fn step(&mut self, input: Option<&NegotiationToken>) -> Result<Step>;

    fn is_complete(&self) -> bool;
}

/// Factory for credentials and security contexts.
pub trait Negotiator: Send + Sync + 'static {
    type Credential: Send + Sync + 'static;
    type Context: SecurityContext;

    /// Identifier for logging (e.g. "gssapi").
    fn id(&self) -> &str;

    /// Obtain a library credential for the configured source.
    ///
    /// Errors here are credential errors: wrong password, expired ticket cache,
    /// unknown client principal.
    fn acquire(&self, credentials: &ProxyCredentials) -> Result<AcquiredCredential<Self::Credential>>;

    /// Open a fresh context for `target` using `credential`.
    fn initiate(
        &self,
        credential: Arc<Self::Credential>,
        target: &ServicePrincipal,
        mutual: bool,
    ) -> Result<Self::Context>;

    /// Whether one credential may drive concurrent negotiations. When false,
    /// callers serialize negotiations per proxy host.
    fn is_reentrant(&self) -> bool {
        false
    }
}

/// Negotiator for builds without a Kerberos backend.
///
/// Every acquisition fails with a credential error, so a challenged request
/// reports a clear reason instead of hanging or sending a bogus token.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledNegotiator;

/// Context type of `DisabledNegotiator`; never constructed.
#[derive(Debug)]
pub enum NoContext {}

impl SecurityContext for NoContext {
    fn step(&mut self, _input: Option<&NegotiationToken>) -> Result<Step> {
        match *self {}
    }

    fn is_complete(&self) -> bool {
        match *self {}
    }
}

impl Negotiator for DisabledNegotiator {
    type Credential = ();
    type Context = NoContext;

    fn id(&self) -> &str {
        "disabled"
    }

    fn acquire(&self, _credentials: &ProxyCredentials) -> Result<AcquiredCredential<()>> {
        Err(Error::Credential(
            "built without Kerberos support (enable the `gssapi` feature)".into(),
        ))
    }

    fn initiate(
        &self,
        _credential: Arc<()>,
        target: &ServicePrincipal,
        _mutual: bool,
    ) -> Result<NoContext> {
        Err(Error::Negotiation(format!(
            "cannot negotiate with {target}: no Kerberos backend"
        )))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn step_token_accessor() {
        let token = NegotiationToken::new(vec![1, 2, 3]);
        assert_eq!(Step::Continue(token.clone()).token(), Some(&token));
        assert_eq!(Step::Complete(Some(token.clone())).token(), Some(&token));
        assert!(Step::Complete(None).token().is_none());
    }

    #[test]
    fn credential_validity_window() {
        let now = Instant::now();
        let cred = AcquiredCredential {
            handle: (),
            valid_until: Some(now + Duration::from_secs(60)),
        };
        assert!(cred.is_valid_at(now));
        assert!(!cred.is_valid_at(now + Duration::from_secs(61)));

        let unknown = AcquiredCredential {
            handle: (),
            valid_until: None,
        };
        assert!(!unknown.is_valid_at(now));
    }

    #[test]
    fn disabled_negotiator_reports_credential_error() {
        let err = DisabledNegotiator
            .acquire(&ProxyCredentials::ambient())
            .unwrap_err();
        assert!(matches!(err, Error::Credential(_)), "got: {err:?}");
        assert!(err.to_string().contains("gssapi"));
    }
}
