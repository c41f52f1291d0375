//! Proxy credential sources
//!
//! A `ProxyCredentials` value is built once from configuration and only read
//! afterwards. It names where the Kerberos identity comes from: a password
//! (username + realm), a keytab, an explicit ticket cache, or whatever the
//! ambient default cache holds. `validate()` catches unusable sources before
//! the negotiator touches the network.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use common::Secret;

use crate::error::{Error, Result};

/// Where the client identity for proxy authentication comes from.
#[derive(Debug, Clone)]
pub enum CredentialSource {
    /// Username/password, optionally qualified by a realm (the "proxy domain").
    Password {
        username: String,
        password: Secret<String>,
        realm: Option<String>,
    },
    /// Long-term keys from a keytab file.
    Keytab {
        path: PathBuf,
        principal: Option<String>,
    },
    /// An existing ticket cache. `None` means the library's default cache.
    TicketCache { path: Option<PathBuf> },
}

/// Immutable credential configuration for one proxy.
#[derive(Debug, Clone)]
pub struct ProxyCredentials {
    source: CredentialSource,
}

impl ProxyCredentials {
    /// Password credentials. `domain` is the Kerberos realm; it may also be
    /// embedded in the username as `user@REALM` or `DOMAIN\user`.
    pub fn password(
        username: impl Into<String>,
        password: impl Into<Secret<String>>,
        domain: Option<String>,
    ) -> Self {
        Self {
            source: CredentialSource::Password {
                username: username.into(),
                password: password.into(),
                realm: domain.filter(|d| !d.trim().is_empty()),
            },
        }
    }

    pub fn keytab(path: impl Into<PathBuf>, principal: Option<String>) -> Self {
        Self {
            source: CredentialSource::Keytab {
                path: path.into(),
                principal,
            },
        }
    }

    pub fn ticket_cache(path: impl Into<PathBuf>) -> Self {
        Self {
            source: CredentialSource::TicketCache {
                path: Some(path.into()),
            },
        }
    }

    /// Use whatever ticket the default credential cache holds (`kinit` style).
    pub fn ambient() -> Self {
        Self {
            source: CredentialSource::TicketCache { path: None },
        }
    }

    pub fn source(&self) -> &CredentialSource {
        &self.source
    }

    /// Client principal in `user@REALM` form, when the source names one.
    ///
    /// `DOMAIN\user` is rewritten to `user@DOMAIN`; realms are upper-cased.
    /// An unqualified name with no realm is returned as-is so the Kerberos
    /// library applies its default realm.
    pub fn principal(&self) -> Option<String> {
        match &self.source {
            CredentialSource::Password {
                username, realm, ..
            } => Some(qualify(username, realm.as_deref())),
            CredentialSource::Keytab { principal, .. } => {
                principal.as_deref().map(|p| qualify(p, None))
            }
            CredentialSource::TicketCache { .. } => None,
        }
    }

    /// Check that the source can possibly yield a credential.
    ///
    /// This is purely local: blank usernames/passwords and missing keytab or
    /// cache files are reported as `Error::Credential` without contacting a KDC.
    pub fn validate(&self) -> Result<()> {
        match &self.source {
            CredentialSource::Password {
                username,
                password,
                realm,
            } => {
                let user = username.trim();
                if user.is_empty() {
                    return Err(Error::Credential("proxy username is empty".into()));
                }
                if user.ends_with('@') || user.ends_with('\\') || user.starts_with('@') {
                    return Err(Error::Credential(format!(
                        "proxy username {user:?} is not a valid principal"
                    )));
                }
                if password.is_blank() {
                    return Err(Error::Credential(format!(
                        "no password supplied for {}",
                        qualify(user, realm.as_deref())
                    )));
                }
                Ok(())
            }
            CredentialSource::Keytab { path, .. } => require_file(path, "keytab"),
            CredentialSource::TicketCache { path: Some(path) } => {
                match file_cache_path(path) {
                    Some(file) => require_file(&file, "ticket cache"),
                    // KEYRING:, KCM:, MEMORY: and friends can only be checked by the library
                    None => Ok(()),
                }
            }
            CredentialSource::TicketCache { path: None } => Ok(()),
        }
    }

    /// Environment variable through which the Kerberos library locates this
    /// source, and the location it must name.
    pub fn library_env(&self) -> Option<(&'static str, &Path)> {
        match &self.source {
            CredentialSource::Keytab { path, .. } => Some((KEYTAB_ENV, path.as_path())),
            CredentialSource::TicketCache { path: Some(path) } => Some((CCACHE_ENV, path.as_path())),
            _ => None,
        }
    }

    /// Fail unless the library would read the configured keytab or cache.
    ///
    /// GSS-API takes these locations from the process environment only, so a
    /// path that disagrees with (or is missing from) the environment would
    /// silently authenticate from some other source.
    pub fn check_library_env(&self, lookup: impl Fn(&str) -> Option<OsString>) -> Result<()> {
        let Some((var, expected)) = self.library_env() else {
            return Ok(());
        };
        match lookup(var) {
            Some(actual) if same_location(Path::new(&actual), expected) => Ok(()),
            Some(actual) => Err(Error::Credential(format!(
                "{var} is {} but {} was configured",
                Path::new(&actual).display(),
                expected.display()
            ))),
            None => Err(Error::Credential(format!(
                "{var} must be set to {} before credentials are acquired",
                expected.display()
            ))),
        }
    }
}

pub const KEYTAB_ENV: &str = "KRB5_CLIENT_KTNAME";
pub const CCACHE_ENV: &str = "KRB5CCNAME";

fn same_location(a: &Path, b: &Path) -> bool {
    let strip = |p: &Path| {
        let raw = p.to_string_lossy().into_owned();
        raw.strip_prefix("FILE:").map(str::to_owned).unwrap_or(raw)
    };
    strip(a) == strip(b)
}

fn qualify(username: &str, realm: Option<&str>) -> String {
    let username = username.trim();
    if let Some((domain, user)) = username.split_once('\\') {
        return format!("{user}@{}", domain.to_uppercase());
    }
    if let Some((user, embedded)) = username.rsplit_once('@') {
        return format!("{user}@{}", embedded.to_uppercase());
    }
    match realm {
        Some(realm) => format!("{username}@{}", realm.trim().to_uppercase()),
        None => username.to_owned(),
    }
}

/// Filesystem path of a `FILE:` (or untyped) credential cache name.
fn file_cache_path(name: &Path) -> Option<PathBuf> {
    let raw = name.to_string_lossy();
    if let Some(rest) = raw.strip_prefix("FILE:") {
        return Some(PathBuf::from(rest));
    }
    match raw.split_once(':') {
        // "TYPE:residual" where TYPE is not a drive letter
        Some((kind, _)) if kind.len() > 1 => None,
        _ => Some(name.to_path_buf()),
    }
}

fn require_file(path: &Path, what: &str) -> Result<()> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() => Ok(()),
        Ok(_) => Err(Error::Credential(format!(
            "{what} {} is not a regular file",
            path.display()
        ))),
        Err(e) => Err(Error::Credential(format!(
            "{what} {} is not readable: {e}",
            path.display()
        ))),
    }
}
