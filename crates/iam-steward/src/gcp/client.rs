//! reqwest-backed [`Transport`] and a cache of it keyed on configuration

use super::transport::{HttpMethod, HttpRequest, Transport};
use crate::config::StewardConfig;
use crate::error::{classify_api_error, Error, Result};
use serde_json::Value;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Supplies OAuth2 bearer tokens. Acquisition and refresh live elsewhere.
pub trait TokenSource: Send + Sync {
    fn token(&self) -> impl Future<Output = Result<String>> + Send;
}

/// A fixed token, for tests and short-lived tools
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

impl TokenSource for StaticToken {
    fn token(&self) -> impl Future<Output = Result<String>> + Send {
        let token = self.0.clone();
        async move { Ok(token) }
    }
}

/// HTTPS JSON transport with bearer authentication.
pub struct HttpTransport<A> {
    client: reqwest::Client,
    tokens: A,
}

impl<A: TokenSource> HttpTransport<A> {
    pub fn new(config: &StewardConfig, tokens: A) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self { client, tokens })
    }
}

fn reqwest_method(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Patch => reqwest::Method::PATCH,
        HttpMethod::Delete => reqwest::Method::DELETE,
    }
}

impl<A: TokenSource> Transport for HttpTransport<A> {
    async fn execute(&self, request: HttpRequest) -> Result<Value> {
        let token = self.tokens.token().await?;
        debug!(method = %request.method, url = %request.url, "Sending request");

        let mut builder = self
            .client
            .request(reqwest_method(request.method), &request.url)
            .bearer_auth(token);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            let bytes = serde_json::to_vec(body).map_err(Error::codec("request body"))?;
            builder = builder.body(bytes);
        }

        let response = builder.send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;

        if !status.is_success() {
            let err = classify_api_error(status.as_u16(), &bytes);
            debug!(method = %request.method, url = %request.url, error = %err, "Request failed");
            return Err(err);
        }
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes).map_err(Error::codec("response body"))
    }
}

/// Lazily built transport shared between requests.
///
/// Replaced only when [`TransportCache::invalidate`] is called, which the
/// configuration store does whenever the configuration is written.
pub struct TransportCache<A> {
    tokens: A,
    current: Mutex<Option<Arc<HttpTransport<A>>>>,
}

impl<A: TokenSource + Clone> TransportCache<A> {
    pub fn new(tokens: A) -> Self {
        Self {
            tokens,
            current: Mutex::new(None),
        }
    }

    /// Cached transport, building one from `config` if none exists
    pub fn get(&self, config: &StewardConfig) -> Result<Arc<HttpTransport<A>>> {
        let mut current = self
            .current
            .lock()
            .map_err(|_| Error::InvalidInput("transport cache lock poisoned".into()))?;
        if let Some(transport) = current.as_ref() {
            return Ok(Arc::clone(transport));
        }
        let transport = Arc::new(HttpTransport::new(config, self.tokens.clone())?);
        info!(user_agent = %config.user_agent, "Built HTTP transport");
        *current = Some(Arc::clone(&transport));
        Ok(transport)
    }

    pub fn invalidate(&self) {
        if let Ok(mut current) = self.current.lock() {
            if current.take().is_some() {
                debug!("Invalidated cached HTTP transport");
            }
        }
    }
}

/// Something that must drop derived state when the configuration changes
pub trait Invalidate: Send + Sync {
    fn invalidate(&self);
}

impl<A: TokenSource + Clone> Invalidate for TransportCache<A> {
    fn invalidate(&self) {
        TransportCache::invalidate(self)
    }
}

impl<I: Invalidate + ?Sized> Invalidate for Arc<I> {
    fn invalidate(&self) {
        (**self).invalidate()
    }
}

/// Hands out the transport to use under a given configuration.
///
/// Implementations may cache; the configuration store calls
/// [`Invalidate::invalidate`] whenever the configuration changes.
pub trait TransportProvider: Invalidate {
    type Transport: Transport;

    fn transport(&self, config: &StewardConfig) -> Result<Self::Transport>;
}

impl<A: TokenSource + Clone> TransportProvider for TransportCache<A> {
    type Transport = Arc<HttpTransport<A>>;

    fn transport(&self, config: &StewardConfig) -> Result<Self::Transport> {
        self.get(config)
    }
}

impl<P: TransportProvider> TransportProvider for Arc<P> {
    type Transport = P::Transport;

    fn transport(&self, config: &StewardConfig) -> Result<Self::Transport> {
        (**self).transport(config)
    }
}
