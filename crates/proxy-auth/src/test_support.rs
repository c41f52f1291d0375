//! Test doubles: a scripted TCP proxy, an in-memory transport and a fake
//! negotiator that needs no Kerberos.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::header::PROXY_AUTHENTICATE;
use http::{HeaderMap, HeaderValue, StatusCode};
use negotiate::{
    AcquiredCredential, Negotiator, NegotiationToken, ProxyCredentials, SecurityContext,
    ServicePrincipal, Step,
};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use url::Url;

use crate::error::TransportError;
use crate::request::{ProxyRequest, ProxyResponse};
use crate::transport::{ProxyTransport, SendFuture};

/// Final server token the `Mutual` behaviour accepts.
pub const MUTUAL_OK: &[u8] = b"mutual-ok";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behaviour {
    /// One token, context complete immediately.
    SingleLeg,
    /// One token, then expects `MUTUAL_OK` from the proxy.
    Mutual,
    /// `acquire` fails like a wrong password.
    RejectCredentials,
    /// The first step fails like an unknown service principal.
    RejectNegotiation,
    /// Every server token asks for yet another leg.
    ContinueForever,
}

#[derive(Debug, Default)]
pub struct Counters {
    pub acquisitions: AtomicUsize,
    pub opened: AtomicUsize,
    pub released: AtomicUsize,
    pub steps: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

pub struct FakeNegotiator {
    behaviour: Behaviour,
    reentrant: bool,
    lifetime: Option<Duration>,
    counters: Arc<Counters>,
}

impl FakeNegotiator {
    pub fn new(behaviour: Behaviour) -> Self {
        Self {
            behaviour,
            reentrant: false,
            lifetime: Some(Duration::from_secs(3600)),
            counters: Arc::default(),
        }
    }

    pub fn with_lifetime(mut self, lifetime: Option<Duration>) -> Self {
        self.lifetime = lifetime;
        self
    }

    pub fn reentrant(mut self) -> Self {
        self.reentrant = true;
        self
    }

    pub fn counters(&self) -> Arc<Counters> {
        Arc::clone(&self.counters)
    }
}

pub struct FakeCredential {
    principal: String,
}

/// Emits tokens of the form `spn|principal|legN`.
pub struct FakeContext {
    behaviour: Behaviour,
    spn: String,
    principal: String,
    legs: usize,
    complete: bool,
    counters: Arc<Counters>,
}

impl FakeContext {
    fn next_token(&mut self) -> NegotiationToken {
        self.legs += 1;
        NegotiationToken::new(format!("{}|{}|leg{}", self.spn, self.principal, self.legs))
    }
}

impl SecurityContext for FakeContext {
    fn step(&mut self, input: Option<&NegotiationToken>) -> negotiate::Result<Step> {
        self.counters.steps.fetch_add(1, Ordering::SeqCst);
        match (self.behaviour, input) {
            (Behaviour::RejectNegotiation, _) => Err(negotiate::Error::Negotiation(
                "Server not found in Kerberos database".into(),
            )),
            (Behaviour::SingleLeg, None) => {
                self.complete = true;
                Ok(Step::Complete(Some(self.next_token())))
            }
            (_, None) => Ok(Step::Continue(self.next_token())),
            (Behaviour::Mutual, Some(token)) if token.as_bytes() == MUTUAL_OK => {
                self.complete = true;
                Ok(Step::Complete(None))
            }
            (Behaviour::Mutual, Some(_)) => Err(negotiate::Error::Negotiation(
                "mutual authentication token rejected".into(),
            )),
            (Behaviour::ContinueForever, Some(_)) => Ok(Step::Continue(self.next_token())),
            (_, Some(_)) => Err(negotiate::Error::Negotiation(
                "unexpected server token".into(),
            )),
        }
    }

    fn is_complete(&self) -> bool {
        self.complete
    }
}

impl Drop for FakeContext {
    fn drop(&mut self) {
        self.counters.released.fetch_add(1, Ordering::SeqCst);
        self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Negotiator for FakeNegotiator {
    type Credential = FakeCredential;
    type Context = FakeContext;

    fn id(&self) -> &str {
        "fake"
    }

    fn acquire(
        &self,
        credentials: &ProxyCredentials,
    ) -> negotiate::Result<AcquiredCredential<FakeCredential>> {
        self.counters.acquisitions.fetch_add(1, Ordering::SeqCst);
        if self.behaviour == Behaviour::RejectCredentials {
            return Err(negotiate::Error::Credential(
                "Preauthentication failed".into(),
            ));
        }
        Ok(AcquiredCredential {
            handle: FakeCredential {
                principal: credentials.principal().unwrap_or_default(),
            },
            valid_until: self.lifetime.map(|d| Instant::now() + d),
        })
    }

    fn initiate(
        &self,
        credential: Arc<FakeCredential>,
        target: &ServicePrincipal,
        _mutual: bool,
    ) -> negotiate::Result<FakeContext> {
        self.counters.opened.fetch_add(1, Ordering::SeqCst);
        let now = self.counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.max_in_flight.fetch_max(now, Ordering::SeqCst);
        Ok(FakeContext {
            behaviour: self.behaviour,
            spn: target.to_string(),
            principal: credential.principal.clone(),
            legs: 0,
            complete: false,
            counters: Arc::clone(&self.counters),
        })
    }

    fn is_reentrant(&self) -> bool {
        self.reentrant
    }
}

type Responder = Box<
    dyn Fn(&ProxyRequest, Option<&HeaderValue>) -> Result<ProxyResponse, TransportError>
        + Send
        + Sync,
>;

/// In-memory transport answering from a closure and recording what was sent.
pub struct ScriptedTransport {
    respond: Responder,
    sent: Mutex<Vec<(ProxyRequest, Option<HeaderValue>)>>,
    delay: Option<Duration>,
}

impl ScriptedTransport {
    pub fn new(
        respond: impl Fn(&ProxyRequest, Option<&HeaderValue>) -> Result<ProxyResponse, TransportError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self {
            respond: Box::new(respond),
            sent: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Answer with `responses` in order, one per send.
    pub fn sequence(responses: Vec<ProxyResponse>) -> Self {
        let script = Mutex::new(VecDeque::from(responses));
        Self::new(move |_, _| {
            script
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| TransportError::Malformed("no scripted response left".into()))
        })
    }

    /// Challenge every request without a token, accept every request with one.
    pub fn negotiate_proxy() -> Self {
        Self::new(|_, authorization| match authorization {
            Some(_) => Ok(ok("")),
            None => Ok(challenge(&["Negotiate"])),
        })
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn sent(&self) -> Vec<(ProxyRequest, Option<HeaderValue>)> {
        self.sent.lock().unwrap().clone()
    }
}

impl ProxyTransport for ScriptedTransport {
    fn send<'a>(
        &'a self,
        _proxy: &'a Url,
        request: &'a ProxyRequest,
        proxy_authorization: Option<&'a HeaderValue>,
    ) -> SendFuture<'a> {
        Box::pin(async move {
            self.sent
                .lock()
                .unwrap()
                .push((request.clone(), proxy_authorization.cloned()));
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            (self.respond)(request, proxy_authorization)
        })
    }
}

pub fn challenge(values: &[&str]) -> ProxyResponse {
    let mut headers = HeaderMap::new();
    for value in values {
        headers.append(PROXY_AUTHENTICATE, HeaderValue::from_str(value).unwrap());
    }
    ProxyResponse::from_proxy(StatusCode::PROXY_AUTHENTICATION_REQUIRED, headers, Bytes::new())
}

pub fn ok(body: &str) -> ProxyResponse {
    ProxyResponse::from_proxy(StatusCode::OK, HeaderMap::new(), Bytes::from(body.to_string()))
}

pub fn ok_with_proxy_authenticate(value: &str) -> ProxyResponse {
    let mut headers = HeaderMap::new();
    headers.insert(PROXY_AUTHENTICATE, HeaderValue::from_str(value).unwrap());
    ProxyResponse::from_proxy(StatusCode::OK, headers, Bytes::new())
}

/// Headers carrying `Proxy-Authenticate: Negotiate <token>`.
pub fn negotiate_headers(token: &[u8]) -> HeaderMap {
    use base64::Engine as _;
    let value = format!(
        "Negotiate {}",
        base64::engine::general_purpose::STANDARD.encode(token)
    );
    let mut headers = HeaderMap::new();
    headers.insert(PROXY_AUTHENTICATE, HeaderValue::from_str(&value).unwrap());
    headers
}

/// Response of a tunnelled target: `proxy_headers` from the `CONNECT` reply,
/// `status` and `headers` from the target.
pub fn tunnelled(status: StatusCode, proxy_headers: HeaderMap, headers: HeaderMap) -> ProxyResponse {
    ProxyResponse {
        status,
        headers,
        body: Bytes::new(),
        proxy_headers,
    }
}

/// Raw HTTP/1.1 response with a `Content-Length`.
pub fn reply(status: &str, headers: &[&str], body: &str) -> String {
    let mut raw = format!("HTTP/1.1 {status}\r\n");
    for header in headers {
        raw.push_str(header);
        raw.push_str("\r\n");
    }
    raw.push_str(&format!("Content-Length: {}\r\n\r\n{body}", body.len()));
    raw
}

/// A TCP proxy that answers each request with the next scripted reply and
/// records request heads. Connections are closed after a `CONNECT` reply.
pub struct FakeProxy {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<String>>>,
}

impl FakeProxy {
    pub async fn start(script: Vec<String>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let script = Arc::new(Mutex::new(VecDeque::from(script)));
        let requests = Arc::new(Mutex::new(Vec::new()));

        let (script_, requests_) = (Arc::clone(&script), Arc::clone(&requests));
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, Arc::clone(&script_), Arc::clone(&requests_)));
            }
        });

        Self { addr, requests }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

async fn serve(
    stream: TcpStream,
    script: Arc<Mutex<VecDeque<String>>>,
    requests: Arc<Mutex<Vec<String>>>,
) {
    let mut reader = BufReader::new(stream);
    loop {
        let mut head = String::new();
        loop {
            let mut line = String::new();
            match reader.read_line(&mut line).await {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            }
            let blank = line == "\r\n";
            head.push_str(&line);
            if blank {
                break;
            }
        }

        let length = head
            .lines()
            .filter_map(|l| l.split_once(':'))
            .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        if length > 0 {
            let mut body = vec![0u8; length];
            if reader.read_exact(&mut body).await.is_err() {
                return;
            }
        }

        let is_connect = head.starts_with("CONNECT ");
        requests.lock().unwrap().push(head);
        let next = script.lock().unwrap().pop_front();
        let Some(response) = next else {
            return;
        };
        if reader.get_mut().write_all(response.as_bytes()).await.is_err() {
            return;
        }
        if is_connect {
            return;
        }
    }
}
