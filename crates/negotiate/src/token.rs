//! Negotiate token framing
//!
//! Tokens are opaque GSS-API output. On the wire they travel Base64-encoded
//! (standard alphabet, padded) after the `Negotiate` scheme name.

use std::fmt;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use http::HeaderValue;
use zeroize::Zeroize;

use crate::challenge::NEGOTIATE;
use crate::error::{Error, Result};

/// One SPNEGO token. Single use: each exchange step produces a fresh one.
#[derive(Clone, PartialEq, Eq)]
pub struct NegotiationToken(Vec<u8>);

impl NegotiationToken {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn from_base64(encoded: &str) -> Result<Self> {
        let encoded = encoded.trim();
        if encoded.is_empty() {
            return Err(Error::InvalidToken("empty token".into()));
        }
        STANDARD
            .decode(encoded)
            .map(Self)
            .map_err(|e| Error::InvalidToken(format!("not valid base64: {e}")))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.0)
    }

    /// `Negotiate <base64>`, ready for `Proxy-Authorization`.
    ///
    /// The value is marked sensitive so `http`'s Debug output hides it.
    pub fn to_header_value(&self) -> Result<HeaderValue> {
        if self.0.is_empty() {
            return Err(Error::InvalidToken("refusing to send an empty token".into()));
        }
        let mut value = HeaderValue::try_from(format!("{NEGOTIATE} {}", self.to_base64()))
            .map_err(|e| Error::InvalidToken(format!("token is not a valid header value: {e}")))?;
        value.set_sensitive(true);
        Ok(value)
    }
}

impl fmt::Debug for NegotiationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NegotiationToken({} bytes)", self.0.len())
    }
}

impl Drop for NegotiationToken {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}
