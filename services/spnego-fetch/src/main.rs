//! spnego-fetch
//!
//! Fetches one URL through a forward proxy that demands Kerberos (SPNEGO)
//! authentication:
//! 1. Loads `[proxy]` settings from TOML, env and flags
//! 2. Points the Kerberos library at the configured keytab / ticket cache
//! 3. Sends the request, answering a `Negotiate` challenge once
//! 4. Prints the status line and body, or exits with a code per failure class

mod cli;
mod config;
mod exit;

use std::io::Write;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use proxy_auth::{ProxyAuthenticator, ProxyResponse};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::Cli;
use crate::config::{Config, ProxyConfig};

#[cfg(feature = "gssapi")]
type Backend = negotiate::GssNegotiator;
#[cfg(not(feature = "gssapi"))]
type Backend = negotiate::DisabledNegotiator;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            eprintln!("error: {e:#}");
            return exit::exit_code(&e);
        }
    };

    // Must happen before any other thread exists.
    export_kerberos_env(&config.proxy);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("error: failed to start async runtime: {e}");
            return ExitCode::from(exit::GENERIC);
        }
    };

    match runtime.block_on(run(&cli, &config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            exit::exit_code(&e)
        }
    }
}

/// Initialize tracing with LOG_LEVEL / RUST_LOG support, on stderr so the
/// response body on stdout stays clean. LOG_FORMAT=json selects JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_env("LOG_LEVEL")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let (path, explicit) = Config::resolve_path(cli.config.as_deref());
    debug!(path = %path.display(), explicit, "loading configuration");

    let mut config = Config::load_or_default(&path, explicit)
        .with_context(|| format!("failed to load config from {}", path.display()))?;
    config.apply_cli(cli);
    config.validate()?;
    Ok(config)
}

fn export_kerberos_env(proxy: &ProxyConfig) {
    // SAFETY: called from main before the runtime (or any other thread) starts.
    if let Some(keytab) = &proxy.keytab {
        unsafe { std::env::set_var(negotiate::KEYTAB_ENV, keytab) };
    }
    if let Some(ccache) = &proxy.ccache {
        unsafe { std::env::set_var(negotiate::CCACHE_ENV, ccache) };
    }
}

async fn run(cli: &Cli, config: &Config) -> Result<()> {
    let request = cli.request()?;
    let auth_config = config.auth_config()?;
    info!(
        proxy = %auth_config.proxy,
        service = %auth_config.service,
        strict_mutual_auth = auth_config.strict_mutual_auth,
        "configuration loaded"
    );

    let target = request.url.clone();
    let authenticator = ProxyAuthenticator::new(Backend::default(), auth_config)?;
    let response = authenticator
        .authenticate(request)
        .await
        .with_context(|| format!("fetching {target}"))?;

    print_response(&response, cli.include).context("failed to write response")
}

fn print_response(response: &ProxyResponse, include_headers: bool) -> std::io::Result<()> {
    let mut out = std::io::stdout().lock();
    writeln!(out, "HTTP/1.1 {}", response.status)?;
    if include_headers {
        for (name, value) in &response.headers {
            writeln!(out, "{}: {}", name, String::from_utf8_lossy(value.as_bytes()))?;
        }
    }
    writeln!(out)?;
    out.write_all(&response.body)?;
    out.flush()
}
