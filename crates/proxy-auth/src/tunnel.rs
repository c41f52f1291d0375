//! `CONNECT` tunnel transport for `https://` targets
//!
//! The tunnel is opened by hand rather than through reqwest so the proxy's
//! answer to `CONNECT` (in particular a 407 and its `Proxy-Authenticate`
//! headers) reaches the authenticator. Once the proxy answers 2xx the stream
//! is wrapped in TLS and a single HTTP/1.1 exchange runs inside it.
//!
//! Every attempt uses a fresh TCP connection; Kerberos tokens are not bound
//! to a connection, so the retry after a challenge does not need the first one.

use std::sync::Arc;

use bytes::Bytes;
use http::header::{CONTENT_LENGTH, HOST};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use rustls::ClientConfig;
use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::debug;
use url::Url;

use crate::error::TransportError;
use crate::request::{ProxyRequest, ProxyResponse, redacted};
use crate::transport::SendFuture;

/// Largest `CONNECT` reply head accepted from a proxy.
const MAX_HEAD_LEN: usize = 16 * 1024;

/// Largest error body read from a refused `CONNECT`.
const MAX_REFUSAL_BODY: usize = 64 * 1024;

/// What the proxy said in reply to `CONNECT`.
#[derive(Debug)]
pub struct ConnectReply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

pub struct TunnelTransport {
    tls: TlsConnector,
}

impl TunnelTransport {
    /// Trust the Mozilla root set shipped in `webpki-roots`.
    pub fn new() -> Result<Self, TransportError> {
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let mut config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| TransportError::Tls(e.to_string()))?
            .with_root_certificates(roots)
            .with_no_client_auth();
        config.alpn_protocols = vec![b"http/1.1".to_vec()];

        Ok(Self::with_tls_config(Arc::new(config)))
    }

    /// Use a caller-built TLS configuration (private roots, client certs).
    pub fn with_tls_config(config: Arc<ClientConfig>) -> Self {
        Self {
            tls: TlsConnector::from(config),
        }
    }

    pub fn send<'a>(
        &'a self,
        proxy: &'a Url,
        request: &'a ProxyRequest,
        proxy_authorization: Option<&'a HeaderValue>,
    ) -> SendFuture<'a> {
        Box::pin(async move {
            let authority = request
                .authority()
                .map_err(|e| TransportError::Malformed(e.to_string()))?;
            let proxy_addr = proxy_address(proxy)?;

            let mut stream = TcpStream::connect(&proxy_addr).await?;
            let reply = establish(&mut stream, &authority, proxy_authorization).await?;
            if !reply.status.is_success() {
                debug!(proxy = %proxy_addr, status = %reply.status, "CONNECT refused");
                return Ok(ProxyResponse::from_proxy(reply.status, reply.headers, reply.body));
            }
            debug!(proxy = %proxy_addr, target = %authority, "tunnel established");

            let server_name = server_name(&request.url)?;
            let tls = self
                .tls
                .connect(server_name, stream)
                .await
                .map_err(|e| TransportError::Tls(e.to_string()))?;

            let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(tls)).await?;
            tokio::spawn(async move {
                if let Err(e) = conn.await {
                    debug!(error = %e, "tunnelled connection closed with error");
                }
            });

            let response = sender.send_request(origin_request(request)?).await?;
            let (parts, body) = response.into_parts();
            let body = body.collect().await?.to_bytes();

            Ok(ProxyResponse {
                status: parts.status,
                headers: parts.headers,
                body,
                proxy_headers: reply.headers,
            })
        })
    }
}

/// Send `CONNECT authority` on `stream` and read the proxy's reply head.
///
/// For a refusal the body is read when it has a `Content-Length`, so the
/// caller sees the proxy's error page. On 2xx the stream is positioned at the
/// first byte of the tunnel.
pub async fn establish<S>(
    stream: &mut S,
    authority: &str,
    proxy_authorization: Option<&HeaderValue>,
) -> Result<ConnectReply, TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut head = format!("CONNECT {authority} HTTP/1.1\r\nHost: {authority}\r\n").into_bytes();
    if let Some(value) = proxy_authorization {
        head.extend_from_slice(b"Proxy-Authorization: ");
        head.extend_from_slice(value.as_bytes());
        head.extend_from_slice(b"\r\n");
    }
    head.extend_from_slice(b"\r\n");
    stream.write_all(&head).await?;
    stream.flush().await?;

    let head = read_head(stream).await?;
    let (status, headers) = parse_head(&head)?;

    let body = if status.is_success() {
        Bytes::new()
    } else {
        read_refusal_body(stream, &headers).await?
    };
    Ok(ConnectReply {
        status,
        headers,
        body,
    })
}

/// Read byte by byte up to the blank line so nothing past the head is consumed.
async fn read_head<S: AsyncRead + Unpin>(stream: &mut S) -> Result<Vec<u8>, TransportError> {
    let mut buf = Vec::with_capacity(512);
    let mut byte = [0u8; 1];
    loop {
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            return Err(TransportError::Malformed(
                "proxy closed the connection before answering CONNECT".into(),
            ));
        }
        buf.push(byte[0]);
        if buf.ends_with(b"\r\n\r\n") {
            return Ok(buf);
        }
        if buf.len() > MAX_HEAD_LEN {
            return Err(TransportError::Malformed("CONNECT reply head too large".into()));
        }
    }
}

fn parse_head(head: &[u8]) -> Result<(StatusCode, HeaderMap), TransportError> {
    let text = std::str::from_utf8(head)
        .map_err(|_| TransportError::Malformed("CONNECT reply is not valid UTF-8".into()))?;
    let mut lines = text.split("\r\n");

    let status_line = lines.next().unwrap_or_default();
    let mut parts = status_line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/1.") {
        return Err(TransportError::Malformed(format!(
            "bad status line: {status_line:?}"
        )));
    }
    let status = parts
        .next()
        .and_then(|code| StatusCode::from_bytes(code.as_bytes()).ok())
        .ok_or_else(|| TransportError::Malformed(format!("bad status line: {status_line:?}")))?;

    let mut headers = HeaderMap::new();
    for line in lines.take_while(|l| !l.is_empty()) {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| TransportError::Malformed(format!("bad header line: {line:?}")))?;
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|e| TransportError::Malformed(format!("bad header name {name:?}: {e}")))?;
        let value = HeaderValue::from_str(value.trim())
            .map_err(|e| TransportError::Malformed(format!("bad value for {name}: {e}")))?;
        headers.append(name, value);
    }
    Ok((status, headers))
}

async fn read_refusal_body<S: AsyncRead + Unpin>(
    stream: &mut S,
    headers: &HeaderMap,
) -> Result<Bytes, TransportError> {
    let length = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);
    if length == 0 {
        return Ok(Bytes::new());
    }
    if length > MAX_REFUSAL_BODY {
        return Err(TransportError::Malformed(format!(
            "CONNECT refusal body of {length} bytes exceeds limit"
        )));
    }
    let mut body = vec![0u8; length];
    stream.read_exact(&mut body).await?;
    Ok(Bytes::from(body))
}

fn proxy_address(proxy: &Url) -> Result<String, TransportError> {
    let host = proxy
        .host_str()
        .ok_or_else(|| TransportError::Malformed(format!("proxy URL {proxy} has no host")))?;
    let port = proxy
        .port_or_known_default()
        .ok_or_else(|| TransportError::Malformed(format!("proxy URL {proxy} has no port")))?;
    Ok(format!("{host}:{port}"))
}

fn server_name(url: &Url) -> Result<ServerName<'static>, TransportError> {
    let host = match url.host() {
        Some(url::Host::Domain(domain)) => domain.to_string(),
        Some(url::Host::Ipv4(ip)) => ip.to_string(),
        Some(url::Host::Ipv6(ip)) => ip.to_string(),
        None => return Err(TransportError::Malformed(format!("{} has no host", redacted(url)))),
    };
    ServerName::try_from(host).map_err(|e| TransportError::Tls(e.to_string()))
}

/// The request as the origin sees it: origin-form target plus `Host`.
fn origin_request(request: &ProxyRequest) -> Result<http::Request<Full<Bytes>>, TransportError> {
    let url = &request.url;
    let target = match url.query() {
        Some(query) => format!("{}?{query}", url.path()),
        None => url.path().to_string(),
    };
    let host = match (url.host_str(), url.port()) {
        (Some(host), Some(port)) => format!("{host}:{port}"),
        (Some(host), None) => host.to_string(),
        (None, _) => return Err(TransportError::Malformed(format!("{} has no host", redacted(url)))),
    };

    let mut origin = http::Request::new(Full::new(request.body.clone()));
    *origin.method_mut() = request.method.clone();
    *origin.uri_mut() = target
        .parse()
        .map_err(|e| TransportError::Malformed(format!("request target {target:?}: {e}")))?;
    *origin.headers_mut() = request.headers.clone();
    origin.headers_mut().insert(
        HOST,
        HeaderValue::from_str(&host)
            .map_err(|e| TransportError::Malformed(format!("host {host:?}: {e}")))?,
    );
    Ok(origin)
}
