//! Shared types for the SPNEGO proxy workspace
//!
//! `Secret` keeps passwords out of logs and wipes them on drop; `Error` covers
//! configuration loading for any binary built on the workspace.

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
