use crate::config::TransportSettings;
use crate::domain::{millis, AuthKind, RequestDescriptor, ResponsePayload, TestCaseConfig};
use crate::engine::env::{value_to_text, ExecutionContext, Resolver};
use crate::error::{Error, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Method, Proxy, Url};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

pub type TransportFuture<'a> = Pin<Box<dyn Future<Output = Result<ResponsePayload>> + Send + 'a>>;

/// Sends one resolved request. Connection failures are `Error::Network`,
/// an exceeded timeout is `Error::Timeout`.
pub trait Transport: Send + Sync {
    fn send<'a>(&'a self, request: &'a RequestDescriptor, timeout: Duration) -> TransportFuture<'a>;
}

pub fn build_headers(input: &BTreeMap<String, String>) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();

    for (key, value) in input {
        if key.is_empty() {
            continue;
        }

        let header_name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|err| Error::config(format!("Invalid header name `{key}`: {err}")))?;
        let header_value = HeaderValue::from_str(value)
            .map_err(|err| Error::config(format!("Invalid header value for `{key}`: {err}")))?;
        headers.insert(header_name, header_value);
    }

    Ok(headers)
}

/// reqwest-backed transport sharing one connection pool across runs.
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(settings: &TransportSettings) -> Result<Self> {
        let mut builder = Client::builder().user_agent(settings.user_agent.clone());

        builder = if settings.follow_redirects {
            builder.redirect(reqwest::redirect::Policy::limited(10))
        } else {
            builder.redirect(reqwest::redirect::Policy::none())
        };

        // Proxy
        if let Some(ref proxy_url) = settings.proxy_url {
            if !proxy_url.is_empty() {
                let proxy = Proxy::all(proxy_url)
                    .map_err(|err| Error::config(format!("Invalid proxy URL: {err}")))?;
                builder = builder.proxy(proxy);
            }
        }

        // SSL verification
        if !settings.verify_ssl {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder
            .build()
            .map_err(|err| Error::config(format!("Failed to build HTTP client: {err}")))?;
        Ok(Self { client })
    }

    async fn send_impl(
        &self,
        payload: &RequestDescriptor,
        timeout: Duration,
    ) -> Result<ResponsePayload> {
        let method = Method::from_bytes(payload.method.as_bytes())
            .map_err(|err| Error::config(format!("Invalid HTTP method: {err}")))?;
        let mut url = Url::parse(&payload.url)
            .map_err(|err| Error::config(format!("Invalid URL `{}`: {err}", payload.url)))?;
        if !payload.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &payload.query {
                pairs.append_pair(key, value);
            }
        }
        let headers = build_headers(&payload.headers)?;

        let mut request = self
            .client
            .request(method.clone(), url)
            .headers(headers.clone())
            .timeout(timeout);

        if !matches!(method, Method::GET | Method::HEAD | Method::OPTIONS) {
            match &payload.body {
                None => {}
                Some(Value::String(text)) => request = request.body(text.clone()),
                Some(body) => {
                    if !headers.contains_key(CONTENT_TYPE) {
                        request = request.header(CONTENT_TYPE, "application/json");
                    }
                    request = request.body(body.to_string());
                }
            }
        }

        let start = Instant::now();
        let response = request.send().await.map_err(|err| {
            if err.is_timeout() {
                Error::Timeout(millis(timeout))
            } else {
                Error::Network(format!("Request failed: {err}"))
            }
        })?;

        let status = response.status();
        let status_text = status.canonical_reason().unwrap_or("Unknown").to_string();

        let mut response_headers = HashMap::new();
        for (key, value) in response.headers() {
            response_headers.insert(
                key.to_string(),
                value.to_str().unwrap_or_default().to_string(),
            );
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("text/plain")
            .to_string();

        let bytes = response.bytes().await.map_err(|err| {
            if err.is_timeout() {
                Error::Timeout(millis(timeout))
            } else {
                Error::Network(format!("Failed to read response: {err}"))
            }
        })?;
        let elapsed = millis(start.elapsed());

        Ok(ResponsePayload {
            status: status.as_u16(),
            status_text,
            headers: response_headers,
            body: String::from_utf8_lossy(&bytes).to_string(),
            elapsed_ms: elapsed,
            size: bytes.len() as u64,
            content_type,
        })
    }
}

impl Transport for HttpTransport {
    fn send<'a>(
        &'a self,
        request: &'a RequestDescriptor,
        timeout: Duration,
    ) -> TransportFuture<'a> {
        Box::pin(self.send_impl(request, timeout))
    }
}

/// A composed request and the tokens that could not be resolved on the way.
#[derive(Debug)]
pub struct Composition {
    pub request: RequestDescriptor,
    pub unresolved: Vec<String>,
}

/// Join the environment base URL and an endpoint. Absolute endpoints win.
pub fn join_url(base_url: &str, endpoint: &str) -> String {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") || base_url.is_empty() {
        return endpoint.to_string();
    }
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        endpoint.trim_start_matches('/')
    )
}

/// Build one concrete request from a case config and the current context.
pub fn compose(config: &TestCaseConfig, context: &ExecutionContext) -> Result<Composition> {
    let mut resolver = Resolver::new(context);

    let method = resolver.resolve_str(&config.method).trim().to_ascii_uppercase();
    let endpoint = resolver.resolve_str(&config.endpoint).trim().to_string();

    let mut headers = resolver.resolve_map(&context.default_headers);
    if let (Some(auth), Some(token)) = (&context.auth, &context.tokens.token) {
        if auth.kind == AuthKind::Jwt && !auth.header_name.is_empty() {
            headers.insert(auth.header_name.clone(), auth.header_format.replace("{token}", token));
        }
    }
    for (key, value) in resolver.resolve_map(&config.headers) {
        headers.retain(|existing, _| !existing.eq_ignore_ascii_case(&key));
        headers.insert(key, value);
    }

    let mut query = Vec::new();
    for (key, value) in &config.params {
        let key = resolver.resolve_str(key);
        match resolver.resolve_value(value) {
            Value::Null => {}
            Value::Array(items) => {
                query.extend(items.iter().map(|item| (key.clone(), value_to_text(item))));
            }
            other => query.push((key, value_to_text(&other))),
        }
    }

    let body = config.body.as_ref().map(|body| resolver.resolve_value(body));

    if method.is_empty() {
        return Err(Error::config("request method is empty after variable resolution"));
    }
    if endpoint.is_empty() {
        return Err(Error::config("request endpoint is empty after variable resolution"));
    }

    Ok(Composition {
        request: RequestDescriptor {
            method,
            url: join_url(&context.base_url, &endpoint),
            headers,
            query,
            body,
        },
        unresolved: resolver.into_unresolved(),
    })
}
