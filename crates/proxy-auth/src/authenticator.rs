//! The proxy authentication exchange
//!
//! `ProxyAuthenticator` sends a request through the proxy and, when the proxy
//! answers 407 with `Proxy-Authenticate: Negotiate`, runs one SPNEGO leg
//! against `HTTP/<proxy-host>` and resends the request exactly once with
//! `Proxy-Authorization: Negotiate <token>`.
//!
//! Outcomes of the retried request:
//! - 407 again without a token: `AuthenticationFailed` (the cached credential
//!   is dropped so the next request re-acquires)
//! - 407 carrying a `Negotiate` token: `ProtocolViolation`, only one leg is supported
//! - anything else: returned unchanged after the optional mutual-auth token
//!   has been verified
//!
//! GSS-API calls block on the KDC, so they run on the blocking pool. The
//! security context is owned by the exchange and dropped on every exit path.
//!
//! Cancellation: dropping the future (or hitting the timeout) abandons the
//! exchange at its next await point, but a GSS call already on the blocking
//! pool cannot be interrupted. It runs to completion on its thread and its
//! result, context included, is then dropped. A stalled KDC therefore holds
//! one blocking thread until the library's own timeout fires.

use std::sync::Arc;
use std::time::Duration;

use negotiate::{
    AcquiredCredential, DEFAULT_SERVICE, NegotiationToken, Negotiator, ProxyCredentials,
    SecurityContext, ServicePrincipal, Step, parse_challenges,
};
use tracing::{debug, info, instrument, warn};
use url::Url;
use uuid::Uuid;

use crate::cache::CredentialCache;
use crate::error::{Error, Result, TransportError};
use crate::metrics;
use crate::request::{ProxyRequest, ProxyResponse, redacted};
use crate::state::ChallengeState;
use crate::transport::{HttpTransport, ProxyTransport};

/// Settings for one proxy and one set of credentials.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub proxy: Url,
    pub credentials: ProxyCredentials,
    /// Service part of the proxy's principal, `HTTP` unless the proxy is
    /// registered under something else.
    pub service: String,
    /// Fail when the proxy does not prove its identity with a final token.
    pub strict_mutual_auth: bool,
    /// Deadline for a whole exchange, both round-trips included.
    pub timeout: Option<Duration>,
}

impl AuthConfig {
    pub fn new(proxy: Url, credentials: ProxyCredentials) -> Self {
        Self {
            proxy,
            credentials,
            service: DEFAULT_SERVICE.to_string(),
            strict_mutual_auth: false,
            timeout: None,
        }
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = service.into();
        self
    }

    pub fn with_strict_mutual_auth(mut self, strict: bool) -> Self {
        self.strict_mutual_auth = strict;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Sends requests through an authenticating proxy. Share it behind an `Arc`.
pub struct ProxyAuthenticator<N: Negotiator> {
    negotiator: Arc<N>,
    transport: Arc<dyn ProxyTransport>,
    config: AuthConfig,
    cache: CredentialCache<N::Credential>,
}

impl<N: Negotiator> ProxyAuthenticator<N> {
    /// Authenticator over the real HTTP transport.
    pub fn new(negotiator: N, config: AuthConfig) -> Result<Self> {
        let transport = HttpTransport::new()?;
        Ok(Self::with_transport(negotiator, Arc::new(transport), config))
    }

    pub fn with_transport(
        negotiator: N,
        transport: Arc<dyn ProxyTransport>,
        config: AuthConfig,
    ) -> Self {
        Self {
            negotiator: Arc::new(negotiator),
            transport,
            config,
            cache: CredentialCache::new(),
        }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Send `request` through the configured proxy.
    pub async fn authenticate(&self, request: ProxyRequest) -> Result<ProxyResponse> {
        self.authenticate_via(&self.config.proxy, request).await
    }

    /// Send `request` through `proxy` using the configured credentials.
    ///
    /// Credentials are cached per proxy, so one authenticator can serve
    /// several proxies without mixing their security contexts.
    #[instrument(
        skip_all,
        fields(
            exchange_id = %Uuid::new_v4().as_simple(),
            proxy = %redacted(proxy),
            method = %request.method,
            url = %redacted(&request.url),
        )
    )]
    pub async fn authenticate_via(&self, proxy: &Url, request: ProxyRequest) -> Result<ProxyResponse> {
        let result = match self.config.timeout {
            Some(limit) => match tokio::time::timeout(limit, self.exchange(proxy, request)).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout(limit).into()),
            },
            None => self.exchange(proxy, request).await,
        };

        match &result {
            Ok(response) => debug!(status = %response.status, "proxy exchange complete"),
            Err(e) => {
                metrics::record_failure(e.kind());
                warn!(error = %e, kind = e.kind(), "proxy exchange failed");
            }
        }
        result
    }

    async fn exchange(&self, proxy: &Url, mut request: ProxyRequest) -> Result<ProxyResponse> {
        validate_proxy(proxy)?;
        request.validate()?;
        request.strip_hop_by_hop();

        let mut state = ChallengeState::new();
        let response = self.transport.send(proxy, &request, None).await?;
        if !state.observe(&response) {
            if state.challenged() {
                debug!(schemes = ?state.schemes(), "proxy challenge does not offer Negotiate");
            }
            return Ok(response);
        }
        metrics::record_challenge();
        if state.wants_continuation() {
            debug!("ignoring server token on initial Negotiate challenge");
        }

        self.config.credentials.validate()?;
        let spn = ServicePrincipal::for_proxy(proxy, &self.config.service)?;
        info!(spn = %spn, negotiator = self.negotiator.id(), "proxy requested Negotiate authentication");

        let slot = self.cache.slot(proxy);
        let _serialized = if self.negotiator.is_reentrant() {
            None
        } else {
            Some(slot.serialize().await)
        };

        let credential = slot.get_or_acquire(|| self.acquire()).await?;
        let (context, token) = match self.initiate(credential, spn).await {
            Ok(opened) => opened,
            Err(e @ Error::Credential(_)) => {
                slot.invalidate().await;
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        let header = token.to_header_value()?;

        let retrying = state.begin_retry();
        debug_assert!(retrying, "a fresh exchange always has a retry left");
        metrics::record_retry();
        debug!(retry = state.retries(), token_len = token.len(), "resending with Negotiate token");

        let response = self.transport.send(proxy, &request, Some(&header)).await?;
        if response.is_proxy_auth_required() {
            state.observe(&response);
            if state.wants_continuation() {
                return Err(Error::ProtocolViolation(
                    "proxy requested a second Negotiate leg".into(),
                ));
            }
            slot.invalidate().await;
            return Err(Error::AuthenticationFailed {
                proxy: proxy.to_string(),
            });
        }

        self.verify_mutual(context, &response).await?;
        Ok(response)
    }

    async fn acquire(&self) -> Result<AcquiredCredential<N::Credential>> {
        let negotiator = Arc::clone(&self.negotiator);
        let credentials = self.config.credentials.clone();
        let acquired = tokio::task::spawn_blocking(move || negotiator.acquire(&credentials))
            .await
            .map_err(|e| Error::Negotiation(format!("credential acquisition task failed: {e}")))??;
        debug!(valid_until = ?acquired.valid_until, "acquired proxy credential");
        Ok(acquired)
    }

    /// Open a context and produce the first token. Mutual authentication is
    /// always requested; whether its absence is fatal is decided later.
    async fn initiate(
        &self,
        credential: Arc<N::Credential>,
        spn: ServicePrincipal,
    ) -> Result<(N::Context, NegotiationToken)> {
        let negotiator = Arc::clone(&self.negotiator);
        let (context, step) = tokio::task::spawn_blocking(move || {
            let mut context = negotiator.initiate(credential, &spn, true)?;
            let step = context.step(None)?;
            Ok::<_, negotiate::Error>((context, step))
        })
        .await
        .map_err(|e| Error::Negotiation(format!("negotiation task failed: {e}")))??;

        match step {
            Step::Continue(token) | Step::Complete(Some(token)) => Ok((context, token)),
            Step::Complete(None) => Err(Error::Negotiation(
                "security context produced no initial token".into(),
            )),
        }
    }

    /// Feed the proxy's final token back into the context.
    ///
    /// Only the proxy's own headers are consulted: for a tunnelled target that
    /// is the `CONNECT` reply, never the target's response. In strict mode a
    /// missing token fails the exchange whatever the final status.
    async fn verify_mutual(&self, mut context: N::Context, response: &ProxyResponse) -> Result<()> {
        let final_token = parse_challenges(response.proxy_authenticate())
            .into_iter()
            .find(|c| c.is_negotiate())
            .map(|c| c.negotiate_token())
            .transpose()?
            .flatten();

        let Some(token) = final_token else {
            if self.config.strict_mutual_auth {
                return Err(Error::Negotiation(format!(
                    "proxy did not return a mutual authentication token (status {})",
                    response.status
                )));
            }
            if !context.is_complete() {
                debug!("proxy did not prove its identity, mutual authentication skipped");
            }
            return Ok(());
        };

        let step = tokio::task::spawn_blocking(move || context.step(Some(&token)))
            .await
            .map_err(|e| Error::Negotiation(format!("mutual authentication task failed: {e}")))??;
        match step {
            Step::Complete(None) => {
                debug!("mutual authentication verified");
                Ok(())
            }
            Step::Complete(Some(_)) | Step::Continue(_) => Err(Error::ProtocolViolation(
                "mutual authentication token asks for a further leg".into(),
            )),
        }
    }
}

fn validate_proxy(proxy: &Url) -> Result<()> {
    if proxy.scheme() != "http" {
        return Err(Error::InvalidRequest(format!(
            "proxy {} must use http://",
            redacted(proxy)
        )));
    }
    if !proxy.username().is_empty() || proxy.password().is_some() {
        return Err(Error::InvalidRequest(
            "proxy URL must not embed credentials".into(),
        ));
    }
    if proxy.host_str().is_none_or(str::is_empty) {
        return Err(Error::InvalidRequest(format!("proxy {proxy} has no host")));
    }
    Ok(())
}
