//! Kerberos backend over the system GSS-API library
//!
//! Uses `libgssapi` (MIT krb5 or Heimdal). Contexts are opened with the SPNEGO
//! mechanism so the emitted tokens are what `Negotiate` expects; credentials are
//! acquired for the Kerberos mechanism that SPNEGO wraps.
//!
//! Keytab and explicit ticket cache sources are located by the library through
//! `KRB5_CLIENT_KTNAME` / `KRB5CCNAME`; the embedding process sets those before
//! it starts any threads. Acquisition fails when they do not name the
//! configured location.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use libgssapi::context::{ClientCtx, CtxFlags, SecurityContext as _};
use libgssapi::credential::{Cred, CredUsage};
use libgssapi::error::{Error as GssError, MajorFlags};
use libgssapi::name::Name;
use libgssapi::oid::{GSS_MECH_KRB5, GSS_MECH_SPNEGO, GSS_NT_HOSTBASED_SERVICE, GSS_NT_KRB5_PRINCIPAL, OidSet};
use tracing::debug;

use crate::context::{AcquiredCredential, Negotiator, SecurityContext, Step};
use crate::credentials::{CredentialSource, ProxyCredentials};
use crate::error::{Error, Result};
use crate::principal::ServicePrincipal;
use crate::token::NegotiationToken;

/// GSS-API credentials cannot be duplicated, so the handle obtained by
/// `acquire` is lent to the first context and later contexts re-acquire from
/// the same source (a cheap ticket-cache read for keytab/cache sources).
pub struct GssCredential {
    credentials: ProxyCredentials,
    spare: Mutex<Option<Cred>>,
}

impl GssCredential {
    fn take(&self) -> Result<Cred> {
        let spare = self
            .spare
            .lock()
            .map_err(|_| Error::Credential("credential lock poisoned".into()))?
            .take();
        match spare {
            Some(cred) => Ok(cred),
            None => acquire_cred(&self.credentials),
        }
    }
}

/// Client-side SPNEGO context. `ClientCtx` deletes the GSS context on drop.
pub struct GssContext {
    ctx: ClientCtx,
}

impl SecurityContext for GssContext {
    fn step(&mut self, input: Option<&NegotiationToken>) -> Result<Step> {
        let output = self
            .ctx
            .step(input.map(NegotiationToken::as_bytes), None)
            .map_err(negotiation_error)?;
        let token = output
            .map(|buf| NegotiationToken::new(buf.to_vec()))
            .filter(|t| !t.is_empty());
        if self.ctx.is_complete() {
            Ok(Step::Complete(token))
        } else {
            token.map(Step::Continue).ok_or_else(|| {
                Error::Negotiation("security context wants to continue but produced no token".into())
            })
        }
    }

    fn is_complete(&self) -> bool {
        self.ctx.is_complete()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct GssNegotiator;

impl GssNegotiator {
    pub fn new() -> Self {
        Self
    }
}

impl Negotiator for GssNegotiator {
    type Credential = GssCredential;
    type Context = GssContext;

    fn id(&self) -> &str {
        "gssapi"
    }

    fn acquire(&self, credentials: &ProxyCredentials) -> Result<AcquiredCredential<GssCredential>> {
        let cred = acquire_cred(credentials)?;
        let valid_until = match cred.lifetime() {
            Ok(lifetime) if lifetime > Duration::ZERO => Some(Instant::now() + lifetime),
            Ok(_) => None,
            Err(e) => {
                debug!(error = %e, "credential lifetime unavailable");
                None
            }
        };
        Ok(AcquiredCredential {
            handle: GssCredential {
                credentials: credentials.clone(),
                spare: Mutex::new(Some(cred)),
            },
            valid_until,
        })
    }

    fn initiate(
        &self,
        credential: Arc<GssCredential>,
        target: &ServicePrincipal,
        mutual: bool,
    ) -> Result<GssContext> {
        let name = Name::new(target.hostbased_name().as_bytes(), Some(&GSS_NT_HOSTBASED_SERVICE))
            .map_err(|e| Error::InvalidPrincipal(format!("{target}: {e}")))?;
        let cred = credential.take()?;
        let mut flags = CtxFlags::GSS_C_SEQUENCE_FLAG;
        if mutual {
            flags |= CtxFlags::GSS_C_MUTUAL_FLAG;
        }
        debug!(spn = %target, mutual, "initiating SPNEGO context");
        Ok(GssContext {
            ctx: ClientCtx::new(Some(cred), name, flags, Some(&GSS_MECH_SPNEGO)),
        })
    }
}

fn acquire_cred(credentials: &ProxyCredentials) -> Result<Cred> {
    credentials.check_library_env(|var| std::env::var_os(var))?;

    let mut mechs = OidSet::new().map_err(credential_error)?;
    mechs.add(&GSS_MECH_KRB5).map_err(credential_error)?;

    let name = credentials
        .principal()
        .map(|p| Name::new(p.as_bytes(), Some(&GSS_NT_KRB5_PRINCIPAL)))
        .transpose()
        .map_err(credential_error)?;

    let cred = match credentials.source() {
        CredentialSource::Password { password, .. } => Cred::acquire_with_password(
            name.as_ref(),
            password.expose(),
            None,
            CredUsage::Initiate,
            Some(&mechs),
        ),
        CredentialSource::Keytab { .. } | CredentialSource::TicketCache { .. } => {
            Cred::acquire(name.as_ref(), None, CredUsage::Initiate, Some(&mechs))
        }
    };
    cred.map_err(credential_error)
}

fn credential_error(e: GssError) -> Error {
    Error::Credential(e.to_string())
}

fn negotiation_error(e: GssError) -> Error {
    if e.major.intersects(MajorFlags::GSS_S_NO_CRED | MajorFlags::GSS_S_CREDENTIALS_EXPIRED) {
        return Error::Credential(e.to_string());
    }
    Error::Negotiation(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructs_backend() {
        let negotiator = GssNegotiator::new();
        assert_eq!(negotiator.id(), "gssapi");
        assert!(!negotiator.is_reentrant());
    }

    #[test]
    fn keytab_outside_library_env_is_refused() {
        let creds = ProxyCredentials::keytab("/nonexistent/spnego-fetch-test.keytab", None);
        let err = GssNegotiator::new().acquire(&creds).err().unwrap();
        assert!(matches!(err, Error::Credential(_)), "got: {err:?}");
    }
}
