use std::time::{Duration, Instant};

use metrics::histogram;
use reqwest::header::{
    ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue,
};
use reqwest::{Client, Method, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use super::error::UpstreamError;
use super::retry::{RetryPolicy, retry};

const METRIC_REQUEST_MS: &str = "tessera_upstream_request_ms";
const MAX_ERROR_MESSAGE_CHARS: usize = 200;
const APPLICATION_JSON: &str = "application/json";

/// Per-call options for [`UpstreamClient::request_with_retry`].
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub token: Option<String>,
    pub body: Option<Value>,
    pub headers: HeaderMap,
    pub query: Vec<(String, String)>,
    /// Overrides the client's attempt count for this call.
    pub max_retries: Option<u32>,
    /// Overrides the client's retry delay for this call.
    pub retry_delay: Option<Duration>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bearer(mut self, token: Option<&str>) -> Self {
        self.token = token.map(str::to_string);
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn query<K, V>(mut self, pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.query
            .extend(pairs.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn retries(mut self, max_retries: u32, delay: Duration) -> Self {
        self.max_retries = Some(max_retries);
        self.retry_delay = Some(delay);
        self
    }
}

/// JSON-over-HTTP client for the upstream REST services.
#[derive(Clone, Debug)]
pub struct UpstreamClient {
    http: Client,
    base: Url,
    policy: RetryPolicy,
}

impl UpstreamClient {
    pub fn new(base_url: &str, timeout: Duration, policy: RetryPolicy) -> Result<Self, UpstreamError> {
        let mut base = Url::parse(base_url.trim())?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let http = Client::builder()
            .user_agent(Self::user_agent())
            .timeout(timeout)
            .build()?;
        Ok(Self { http, base, policy })
    }

    pub fn user_agent() -> &'static str {
        concat!("tessera/", env!("CARGO_PKG_VERSION"))
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Resolve `path` against the base URL, keeping the base path prefix.
    pub fn url(&self, path: &str) -> Result<Url, UpstreamError> {
        self.base
            .join(path.trim_start_matches('/'))
            .map_err(UpstreamError::InvalidUrl)
    }

    /// Send a JSON request, retrying transient failures per the policy.
    ///
    /// An empty success body decodes as JSON `null`.
    pub async fn request_with_retry<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        options: RequestOptions,
    ) -> Result<T, UpstreamError> {
        let mut url = self.url(path)?;
        if !options.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &options.query {
                pairs.append_pair(key, value);
            }
        }

        let headers = build_headers(&options)?;
        let body = options
            .body
            .as_ref()
            .map(serde_json::to_vec)
            .transpose()
            .map_err(UpstreamError::Encode)?;

        let policy = RetryPolicy {
            max_retries: options.max_retries.unwrap_or(self.policy.max_retries),
            delay: options.retry_delay.unwrap_or(self.policy.delay),
        };

        retry(&policy, |attempt| {
            let mut request = self
                .http
                .request(method.clone(), url.clone())
                .headers(headers.clone());
            if let Some(body) = body.as_ref() {
                request = request.body(body.clone());
            }
            let method = method.clone();
            let path = path.to_string();
            async move {
                debug!(%method, path = %path, attempt, "upstream request");
                send(request).await
            }
        })
        .await
    }
}

fn build_headers(options: &RequestOptions) -> Result<HeaderMap, UpstreamError> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static(APPLICATION_JSON));
    for (name, value) in &options.headers {
        headers.insert(name.clone(), value.clone());
    }
    if options.body.is_some() && !headers.contains_key(CONTENT_TYPE) {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON));
    }
    if let Some(token) = options.token.as_deref() {
        let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| UpstreamError::InvalidHeader("authorization"))?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);
    }
    Ok(headers)
}

async fn send<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, UpstreamError> {
    let started = Instant::now();
    let response = request.send().await?;
    let status = response.status();
    let bytes = response.bytes().await?;
    histogram!(METRIC_REQUEST_MS).record(started.elapsed().as_secs_f64() * 1_000.0);

    if !status.is_success() {
        return Err(UpstreamError::status_error(status, error_message(status, &bytes)));
    }

    if bytes.iter().all(u8::is_ascii_whitespace) {
        return serde_json::from_value(Value::Null).map_err(UpstreamError::Decode);
    }
    serde_json::from_slice(&bytes).map_err(UpstreamError::Decode)
}

/// Best human-readable message from an upstream error body.
fn error_message(status: StatusCode, body: &[u8]) -> String {
    if let Ok(json) = serde_json::from_slice::<Value>(body) {
        let candidates = [
            json.get("message"),
            json.get("error").and_then(|error| error.get("message")),
            json.get("error"),
            json.get("detail"),
        ];
        if let Some(message) = candidates
            .into_iter()
            .flatten()
            .find_map(Value::as_str)
            .filter(|message| !message.trim().is_empty())
        {
            return message.to_string();
        }
    }

    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.is_empty() {
        return status
            .canonical_reason()
            .unwrap_or("upstream error")
            .to_string();
    }
    text.chars().take(MAX_ERROR_MESSAGE_CHARS).collect()
}
