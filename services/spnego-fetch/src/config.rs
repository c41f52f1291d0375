//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The proxy password is loaded from PROXY_PASSWORD env var or password_file,
//! never stored in the TOML directly to avoid leaking secrets.

use std::path::{Path, PathBuf};
use std::time::Duration;

use common::Secret;
use negotiate::{DEFAULT_SERVICE, ProxyCredentials};
use proxy_auth::AuthConfig;
use serde::Deserialize;
use url::Url;

use crate::cli::Cli;

/// Root configuration
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub proxy: ProxyConfig,
}

/// Proxy and credential settings
#[derive(Debug, Deserialize)]
pub struct ProxyConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    /// Kerberos realm of `username`
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(skip)]
    pub password: Option<Secret<String>>,
    /// Path to a file containing the password (alternative to PROXY_PASSWORD env var)
    #[serde(default)]
    pub password_file: Option<PathBuf>,
    #[serde(default)]
    pub keytab: Option<PathBuf>,
    #[serde(default)]
    pub ccache: Option<PathBuf>,
    #[serde(default)]
    pub strict_mutual_auth: bool,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_service")]
    pub service: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            url: None,
            username: None,
            domain: None,
            password: None,
            password_file: None,
            keytab: None,
            ccache: None,
            strict_mutual_auth: false,
            timeout_secs: default_timeout(),
            service: default_service(),
        }
    }
}

fn default_timeout() -> u64 {
    30
}

fn default_service() -> String {
    DEFAULT_SERVICE.to_string()
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Password resolution order:
    /// 1. PROXY_PASSWORD env var
    /// 2. password_file path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.resolve_password()?;
        Ok(config)
    }

    /// Like `load`, but a missing file at the default location yields the
    /// defaults so the tool works from flags alone.
    pub fn load_or_default(path: &Path, explicit: bool) -> common::Result<Self> {
        if !explicit && !path.exists() {
            let mut config = Config::default();
            config.resolve_password()?;
            return Ok(config);
        }
        Self::load(path)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    ///
    /// The flag reports whether the path was asked for explicitly.
    pub fn resolve_path(cli_path: Option<&Path>) -> (PathBuf, bool) {
        if let Some(p) = cli_path {
            return (p.to_path_buf(), true);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return (PathBuf::from(p), true);
        }
        (PathBuf::from("spnego-fetch.toml"), false)
    }

    fn resolve_password(&mut self) -> common::Result<()> {
        if let Ok(password) = std::env::var("PROXY_PASSWORD") {
            self.proxy.password = Some(Secret::new(password));
        } else if let Some(ref password_file) = self.proxy.password_file {
            let password = std::fs::read_to_string(password_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read password_file {}: {e}",
                    password_file.display()
                ))
            })?;
            let password = password.trim().to_owned();
            if !password.is_empty() {
                self.proxy.password = Some(Secret::new(password));
            }
        }
        Ok(())
    }

    /// Overlay command-line flags, which win over everything else.
    pub fn apply_cli(&mut self, cli: &Cli) {
        let proxy = &mut self.proxy;
        if let Some(url) = &cli.proxy_url {
            proxy.url = Some(url.clone());
        }
        if let Some(username) = &cli.proxy_username {
            proxy.username = Some(username.clone());
        }
        if let Some(password) = &cli.proxy_password {
            proxy.password = Some(Secret::new(password.clone()));
        }
        if let Some(domain) = &cli.proxy_domain {
            proxy.domain = Some(domain.clone());
        }
        if let Some(keytab) = &cli.proxy_keytab {
            proxy.keytab = Some(keytab.clone());
        }
        if let Some(ccache) = &cli.proxy_ccache {
            proxy.ccache = Some(ccache.clone());
        }
        if let Some(service) = &cli.proxy_service {
            proxy.service = service.clone();
        }
        if let Some(timeout) = cli.timeout_secs {
            proxy.timeout_secs = timeout;
        }
        proxy.strict_mutual_auth |= cli.strict_mutual_auth;
    }

    pub fn validate(&self) -> common::Result<()> {
        self.proxy_url()?;

        if self.proxy.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }
        if self.proxy.service.trim().is_empty() {
            return Err(common::Error::Config("service must not be empty".into()));
        }
        if self.proxy.password.is_some() && self.proxy.username.is_none() {
            return Err(common::Error::Config(
                "a proxy password was given without a username".into(),
            ));
        }
        Ok(())
    }

    pub fn proxy_url(&self) -> common::Result<Url> {
        let raw = self
            .proxy
            .url
            .as_deref()
            .ok_or_else(|| common::Error::Config("proxy url is required (--proxy-url or [proxy] url)".into()))?;
        let url = Url::parse(raw)
            .map_err(|e| common::Error::Config(format!("proxy url is not a valid URL: {e}")))?;
        if !url.username().is_empty() || url.password().is_some() {
            return Err(common::Error::Config(
                "proxy url must not embed credentials; use --proxy-username and PROXY_PASSWORD".into(),
            ));
        }
        if url.scheme() != "http" {
            return Err(common::Error::Config(format!(
                "proxy url must start with http://, got: {raw}"
            )));
        }
        if url.host_str().is_none_or(str::is_empty) {
            return Err(common::Error::Config(format!(
                "proxy url {raw} is missing a host"
            )));
        }
        Ok(url)
    }

    /// Pick the credential source: password, then keytab, then an explicit
    /// ticket cache, then the default cache.
    pub fn credentials(&self) -> ProxyCredentials {
        let proxy = &self.proxy;
        if let (Some(username), Some(password)) = (&proxy.username, &proxy.password) {
            return ProxyCredentials::password(
                username.clone(),
                password.clone(),
                proxy.domain.clone(),
            );
        }
        if let Some(keytab) = &proxy.keytab {
            let principal = match (&proxy.username, &proxy.domain) {
                (Some(user), Some(realm)) if !user.contains(['@', '\\']) => {
                    Some(format!("{user}@{realm}"))
                }
                (user, _) => user.clone(),
            };
            return ProxyCredentials::keytab(keytab.clone(), principal);
        }
        if let Some(ccache) = &proxy.ccache {
            return ProxyCredentials::ticket_cache(ccache.clone());
        }
        ProxyCredentials::ambient()
    }

    pub fn auth_config(&self) -> common::Result<AuthConfig> {
        self.validate()?;
        Ok(AuthConfig::new(self.proxy_url()?, self.credentials())
            .with_service(self.proxy.service.trim())
            .with_strict_mutual_auth(self.proxy.strict_mutual_auth)
            .with_timeout(Duration::from_secs(self.proxy.timeout_secs)))
    }
}
