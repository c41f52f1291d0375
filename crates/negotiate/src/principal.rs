//! Service principal names for proxies
//!
//! A proxy registered in Kerberos as `HTTP/proxy.example.com@REALM` is
//! addressed by GSS-API as the host-based service `HTTP@proxy.example.com`.
//! The realm is resolved by the Kerberos library from its domain mapping.

use std::fmt;

use url::{Host, Url};

use crate::error::{Error, Result};

/// Service class used by HTTP proxies unless configured otherwise.
pub const DEFAULT_SERVICE: &str = "HTTP";

/// `service/host` pair identifying the proxy to the KDC.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServicePrincipal {
    service: String,
    host: String,
}

impl ServicePrincipal {
    pub fn new(service: &str, host: &str) -> Result<Self> {
        let service = service.trim();
        let host = host.trim().trim_end_matches('.').to_ascii_lowercase();
        if service.is_empty() || service.contains(['/', '@']) {
            return Err(Error::InvalidPrincipal(format!(
                "service name {service:?} is not valid"
            )));
        }
        if host.is_empty() || host.contains(['/', '@']) {
            return Err(Error::InvalidPrincipal(format!(
                "host {host:?} is not valid"
            )));
        }
        Ok(Self {
            service: service.to_owned(),
            host,
        })
    }

    /// Derive the principal from the proxy URL's host.
    pub fn for_proxy(proxy: &Url, service: &str) -> Result<Self> {
        let host = match proxy.host() {
            Some(Host::Domain(domain)) => domain.to_owned(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            None => {
                return Err(Error::InvalidPrincipal(format!(
                    "proxy url {proxy} has no host"
                )));
            }
        };
        Self::new(service, &host)
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// GSS-API host-based service form, `HTTP@host`.
    pub fn hostbased_name(&self) -> String {
        format!("{}@{}", self.service, self.host)
    }
}

impl fmt::Display for ServicePrincipal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.service, self.host)
    }
}
