//! Per-request challenge bookkeeping
//!
//! One `ChallengeState` lives for one call to `authenticate`. It records what
//! the proxy advertised and enforces the single-retry cap, so a proxy that
//! keeps answering 407 cannot drive the client into a loop.

use negotiate::{Challenge, parse_challenges};

use crate::request::ProxyResponse;

/// Retries allowed per original request.
pub const MAX_RETRIES: u8 = 1;

#[derive(Debug, Default)]
pub struct ChallengeState {
    challenged: bool,
    challenges: Vec<Challenge>,
    retries: u8,
}

impl ChallengeState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a response. Returns true when it is a 407 offering `Negotiate`.
    ///
    /// Non-407 responses leave the previous challenge list untouched.
    pub fn observe(&mut self, response: &ProxyResponse) -> bool {
        if !response.is_proxy_auth_required() {
            return false;
        }
        self.challenged = true;
        self.challenges = parse_challenges(response.proxy_authenticate());
        self.offers_negotiate()
    }

    pub fn challenged(&self) -> bool {
        self.challenged
    }

    pub fn schemes(&self) -> Vec<&str> {
        self.challenges.iter().map(Challenge::scheme).collect()
    }

    pub fn offers_negotiate(&self) -> bool {
        self.negotiate().is_some()
    }

    pub fn negotiate(&self) -> Option<&Challenge> {
        self.challenges.iter().find(|c| c.is_negotiate())
    }

    /// True when the latest `Negotiate` challenge carries a server token,
    /// i.e. the proxy expects another leg of the handshake.
    pub fn wants_continuation(&self) -> bool {
        self.negotiate().is_some_and(|c| c.token68().is_some())
    }

    /// Claim a retry. Returns false once the cap is reached.
    pub fn begin_retry(&mut self) -> bool {
        if self.retries >= MAX_RETRIES {
            return false;
        }
        self.retries += 1;
        true
    }

    pub fn retries(&self) -> u8 {
        self.retries
    }
}
