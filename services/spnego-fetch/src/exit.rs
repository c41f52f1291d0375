//! Process exit codes
//!
//! Each failure class of the authenticator gets its own code so scripts can
//! tell a bad password from an unreachable proxy.

use std::process::ExitCode;

pub const GENERIC: u8 = 1;
pub const USAGE: u8 = 2;
pub const CREDENTIAL: u8 = 3;
pub const NEGOTIATION: u8 = 4;
pub const AUTHENTICATION_FAILED: u8 = 5;
pub const PROTOCOL_VIOLATION: u8 = 6;

/// Map an error to its exit code, looking through any added context.
pub fn code_for(err: &anyhow::Error) -> u8 {
    if let Some(e) = err.downcast_ref::<proxy_auth::Error>() {
        return match e {
            proxy_auth::Error::Credential(_) => CREDENTIAL,
            proxy_auth::Error::Negotiation(_) => NEGOTIATION,
            proxy_auth::Error::AuthenticationFailed { .. } => AUTHENTICATION_FAILED,
            proxy_auth::Error::ProtocolViolation(_) => PROTOCOL_VIOLATION,
            proxy_auth::Error::InvalidRequest(_) => USAGE,
            proxy_auth::Error::Transport(_) => GENERIC,
        };
    }
    if err.downcast_ref::<common::Error>().is_some() {
        return USAGE;
    }
    GENERIC
}

pub fn exit_code(err: &anyhow::Error) -> ExitCode {
    ExitCode::from(code_for(err))
}
