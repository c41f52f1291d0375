//! Forward-proxy transport for plain `http://` targets
//!
//! The proxy receives the full request in absolute form, so `Proxy-Authorization`
//! travels on the same message as the request and a 407 comes back as an
//! ordinary response. One reqwest client is kept per proxy so the retry after
//! a challenge can reuse the pooled connection.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use http::HeaderValue;
use http::header::PROXY_AUTHORIZATION;
use tracing::debug;
use url::Url;

use crate::error::TransportError;
use crate::request::{ProxyRequest, ProxyResponse, redacted};
use crate::transport::SendFuture;

#[derive(Default)]
pub struct ForwardTransport {
    clients: Mutex<HashMap<String, reqwest::Client>>,
}

impl ForwardTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn send<'a>(
        &'a self,
        proxy: &'a Url,
        request: &'a ProxyRequest,
        proxy_authorization: Option<&'a HeaderValue>,
    ) -> SendFuture<'a> {
        Box::pin(async move {
            let client = self.client_for(proxy)?;

            let mut headers = request.headers.clone();
            if let Some(value) = proxy_authorization {
                headers.insert(PROXY_AUTHORIZATION, value.clone());
            }

            debug!(
                proxy = %proxy,
                method = %request.method,
                url = %redacted(&request.url),
                authorized = proxy_authorization.is_some(),
                "sending through forward proxy"
            );

            let response = client
                .request(request.method.clone(), request.url.clone())
                .headers(headers)
                .body(request.body.clone())
                .send()
                .await?;

            let status = response.status();
            let headers = response.headers().clone();
            let body = response.bytes().await?;
            Ok(ProxyResponse::from_proxy(status, headers, body))
        })
    }

    fn client_for(&self, proxy: &Url) -> Result<reqwest::Client, TransportError> {
        let key = proxy.as_str().to_string();
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }

        // Redirects are returned to the caller untouched
        let client = reqwest::Client::builder()
            .proxy(reqwest::Proxy::http(proxy.as_str())?)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        clients.insert(key, client.clone());
        Ok(client)
    }
}
