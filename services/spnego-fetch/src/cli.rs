//! Command-line arguments

use std::path::PathBuf;

use clap::Parser;
use http::{HeaderName, HeaderValue, Method};
use proxy_auth::ProxyRequest;
use url::Url;

/// Fetch a URL through a proxy that requires Kerberos (SPNEGO) authentication
#[derive(Parser, Debug)]
#[command(name = "spnego-fetch")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Target URL (http:// or https://)
    pub url: String,

    /// Configuration file (TOML)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Proxy URL, e.g. http://proxy.corp.example:3128
    #[arg(long)]
    pub proxy_url: Option<String>,

    /// Kerberos user name (`user`, `user@REALM` or `DOMAIN\user`)
    #[arg(long)]
    pub proxy_username: Option<String>,

    /// Password for the proxy user (prefer PROXY_PASSWORD or password_file)
    #[arg(long)]
    pub proxy_password: Option<String>,

    /// Kerberos realm for the proxy user
    #[arg(long)]
    pub proxy_domain: Option<String>,

    /// Keytab holding the client key
    #[arg(long)]
    pub proxy_keytab: Option<PathBuf>,

    /// Ticket cache to use instead of the default one
    #[arg(long)]
    pub proxy_ccache: Option<PathBuf>,

    /// Service name of the proxy principal
    #[arg(long)]
    pub proxy_service: Option<String>,

    /// Fail unless the proxy proves its identity
    #[arg(long)]
    pub strict_mutual_auth: bool,

    /// Deadline for the whole exchange, in seconds
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// HTTP method (defaults to GET, or POST when --data is given)
    #[arg(short = 'X', long = "request", value_parser = parse_method)]
    pub method: Option<Method>,

    /// Extra request header, `Name: value` (repeatable)
    #[arg(short = 'H', long = "header", value_parser = parse_header)]
    pub headers: Vec<(HeaderName, HeaderValue)>,

    /// Request body
    #[arg(short = 'd', long = "data")]
    pub data: Option<String>,

    /// Print response headers
    #[arg(short = 'i', long)]
    pub include: bool,
}

impl Cli {
    /// Build the outbound request described by the arguments.
    pub fn request(&self) -> proxy_auth::Result<ProxyRequest> {
        let url = Url::parse(&self.url)
            .map_err(|e| proxy_auth::Error::InvalidRequest(format!("{}: {e}", self.url)))?;
        let method = match (&self.method, &self.data) {
            (Some(method), _) => method.clone(),
            (None, Some(_)) => Method::POST,
            (None, None) => Method::GET,
        };

        let mut request = ProxyRequest::new(method, url);
        for (name, value) in &self.headers {
            request = request.with_header(name.clone(), value.clone());
        }
        if let Some(data) = &self.data {
            request = request.with_body(data.clone());
        }
        Ok(request)
    }
}

fn parse_method(s: &str) -> Result<Method, String> {
    Method::from_bytes(s.to_ascii_uppercase().as_bytes()).map_err(|e| e.to_string())
}

fn parse_header(s: &str) -> Result<(HeaderName, HeaderValue), String> {
    let (name, value) = s
        .split_once(':')
        .ok_or_else(|| format!("expected `Name: value`, got {s:?}"))?;
    let name = HeaderName::from_bytes(name.trim().as_bytes()).map_err(|e| e.to_string())?;
    let value = HeaderValue::from_str(value.trim()).map_err(|e| e.to_string())?;
    Ok((name, value))
}
