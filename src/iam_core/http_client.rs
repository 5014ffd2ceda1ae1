use std::collections::VecDeque;
use std::error::Error;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use dashmap::DashMap;
use tokio::sync::Mutex;

/// HTTP methods used by the IAM core and the services built on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    GET,
    POST,
    PUT,
    PATCH,
    DELETE,
}

impl HttpMethod {
    /// Upper-case method name as sent on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::GET => "GET",
            HttpMethod::POST => "POST",
            HttpMethod::PUT => "PUT",
            HttpMethod::PATCH => "PATCH",
            HttpMethod::DELETE => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outbound HTTP request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// HTTP method (GET, POST, etc.).
    pub method: HttpMethod,
    /// Target URL, including any query string.
    pub url: String,
    /// Request headers.
    pub headers: Vec<(String, String)>,
    /// Optional request body.
    pub body: Option<Vec<u8>>,
    /// Optional timeout duration, overriding the client's default.
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    /// Creates a request without headers or body.
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        HttpRequest { method, url: url.into(), headers: Vec::new(), body: None, timeout: None }
    }

    /// Returns the first header named `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Sets a header, replacing any existing value with the same name.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
    }

    /// Builder-style variant of [`set_header`](Self::set_header).
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    /// Sets the body.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Path component of the URL, `/` when absent.
    pub fn path(&self) -> &str {
        let after_scheme = match self.url.find("://") {
            Some(idx) => &self.url[idx + 3..],
            None => self.url.as_str(),
        };
        let path_and_query = match after_scheme.find('/') {
            Some(idx) => &after_scheme[idx..],
            None => "/",
        };
        path_and_query.split(['?', '#']).next().unwrap_or("/")
    }

    /// Raw query string without the leading `?`, empty when absent.
    pub fn query(&self) -> &str {
        match self.url.split_once('?') {
            Some((_, rest)) => rest.split('#').next().unwrap_or_default(),
            None => "",
        }
    }
}

/// HTTP response from executing a call.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: Vec<(String, String)>,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Response with a JSON body and `Content-Type: application/json`.
    pub fn json(status: u16, body: &serde_json::Value) -> Self {
        HttpResponse {
            status,
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body: body.to_string().into_bytes(),
        }
    }

    /// Response with an empty body.
    pub fn empty(status: u16) -> Self {
        HttpResponse { status, headers: Vec::new(), body: Vec::new() }
    }
}

/// Error type for HTTP client operations.
pub type HttpClientError = Box<dyn Error + Send + Sync>;

/// Transport used by the session manager, the permission evaluator and the
/// request builder.
pub trait IamHttpClient: Send + Sync + Clone + 'static {
    /// Execute an HTTP request asynchronously.
    fn execute(
        &self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpClientError>> + Send + 'static>>;
}

fn route_key(url: &str) -> String {
    url.split('?').next().unwrap_or(url).to_string()
}

/// In-memory HTTP client for tests.
///
/// Responses are queued per URL (query string ignored). The last queued
/// response for a URL is repeated once the queue drains.
#[derive(Clone, Default)]
pub struct InMemoryHttpClient {
    responses: Arc<DashMap<String, VecDeque<HttpResponse>>>,
    failures: Arc<DashMap<String, String>>,
    calls: Arc<DashMap<String, usize>>,
    requests: Arc<Mutex<Vec<HttpRequest>>>,
    default_response: Option<HttpResponse>,
    latency: Option<Duration>,
}

impl InMemoryHttpClient {
    /// Creates a new in-memory HTTP client with no default response.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new in-memory HTTP client with a default response on miss.
    pub fn with_default(response: HttpResponse) -> Self {
        Self { default_response: Some(response), ..Self::default() }
    }

    /// Delays every response, letting concurrent callers overlap.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Queues a response for a specific URL.
    pub fn insert_response(&self, url: impl Into<String>, response: HttpResponse) {
        self.responses.entry(route_key(&url.into())).or_default().push_back(response);
    }

    /// Makes every call to `url` fail at the transport level.
    pub fn fail_url(&self, url: impl Into<String>, message: impl Into<String>) {
        self.failures.insert(route_key(&url.into()), message.into());
    }

    /// Stops failing calls to `url`.
    pub fn clear_failure(&self, url: &str) {
        self.failures.remove(&route_key(url));
    }

    /// Number of requests sent to `url`.
    pub fn calls(&self, url: &str) -> usize {
        self.calls.get(&route_key(url)).map(|c| *c.value()).unwrap_or(0)
    }

    /// Every request executed so far, oldest first.
    pub async fn recorded_requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().await.clone()
    }
}

impl IamHttpClient for InMemoryHttpClient {
    fn execute(
        &self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpClientError>> + Send + 'static>> {
        let this = self.clone();
        Box::pin(async move {
            let key = route_key(&request.url);
            *this.calls.entry(key.clone()).or_insert(0) += 1;
            this.requests.lock().await.push(request);
            if let Some(latency) = this.latency {
                tokio::time::sleep(latency).await;
            }
            if let Some(message) = this.failures.get(&key) {
                return Err(HttpClientError::from(message.value().clone()));
            }
            if let Some(mut queue) = this.responses.get_mut(&key) {
                let response = if queue.len() > 1 { queue.pop_front() } else { queue.front().cloned() };
                if let Some(response) = response {
                    return Ok(response);
                }
            }
            match this.default_response {
                Some(resp) => Ok(resp),
                None => Err(HttpClientError::from("no mock response for url")),
            }
        })
    }
}

/// HTTP client backed by `reqwest`, sharing one connection pool.
#[cfg(feature = "transport")]
#[derive(Clone)]
pub struct ReqwestHttpClient {
    inner: reqwest::Client,
}

#[cfg(feature = "transport")]
impl ReqwestHttpClient {
    /// Creates a client whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, HttpClientError> {
        let inner = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(ReqwestHttpClient { inner })
    }

    /// Wraps an already configured `reqwest::Client`.
    pub fn from_client(inner: reqwest::Client) -> Self {
        ReqwestHttpClient { inner }
    }
}

#[cfg(feature = "transport")]
impl IamHttpClient for ReqwestHttpClient {
    fn execute(
        &self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpClientError>> + Send + 'static>> {
        Box::pin(send_with_reqwest(self.inner.clone(), request))
    }
}

#[cfg(feature = "transport")]
async fn send_with_reqwest(client: reqwest::Client, request: HttpRequest) -> Result<HttpResponse, HttpClientError> {
    let method = match request.method {
        HttpMethod::GET => reqwest::Method::GET,
        HttpMethod::POST => reqwest::Method::POST,
        HttpMethod::PUT => reqwest::Method::PUT,
        HttpMethod::PATCH => reqwest::Method::PATCH,
        HttpMethod::DELETE => reqwest::Method::DELETE,
    };
    let mut builder = client.request(method, &request.url);
    for (k, v) in &request.headers {
        builder = builder.header(k.as_str(), v.as_str());
    }
    if let Some(body) = request.body {
        builder = builder.body(body);
    }
    if let Some(timeout) = request.timeout {
        builder = builder.timeout(timeout);
    }
    let resp = builder.send().await?;
    let status = resp.status().as_u16();
    let headers = resp
        .headers()
        .iter()
        .map(|(k, v)| (k.as_str().to_string(), String::from_utf8_lossy(v.as_bytes()).into_owned()))
        .collect();
    let body = resp.bytes().await?.to_vec();
    Ok(HttpResponse { status, headers, body })
}
