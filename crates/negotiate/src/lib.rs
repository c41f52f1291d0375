//! SPNEGO building blocks for proxy authentication
//!
//! Everything needed to answer a `Proxy-Authenticate: Negotiate` challenge,
//! minus the HTTP round-trips: credential sources, service principal names,
//! challenge parsing, Base64 token framing, and the `Negotiator` /
//! `SecurityContext` seam behind which a Kerberos library does the actual
//! GSS-API work.
//!
//! Negotiation flow:
//! 1. `ProxyCredentials::validate()` rejects unusable sources before any network use
//! 2. `Negotiator::acquire()` turns them into a library credential
//! 3. `Negotiator::initiate()` opens a context for `HTTP/<proxy-host>`
//! 4. `SecurityContext::step(None)` yields the token for `Proxy-Authorization`
//! 5. An optional final server token is fed back through `step(Some(..))`

pub mod challenge;
pub mod context;
pub mod credentials;
pub mod error;
pub mod principal;
pub mod token;

#[cfg(feature = "gssapi")]
pub mod gssapi;

pub use challenge::{Challenge, NEGOTIATE, parse_challenges};
pub use context::{AcquiredCredential, DisabledNegotiator, Negotiator, SecurityContext, Step};
pub use credentials::{CCACHE_ENV, CredentialSource, KEYTAB_ENV, ProxyCredentials};
pub use error::{Error, Result};
pub use principal::{DEFAULT_SERVICE, ServicePrincipal};
pub use token::NegotiationToken;

#[cfg(feature = "gssapi")]
pub use gssapi::GssNegotiator;
