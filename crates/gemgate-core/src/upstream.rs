use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::unfold;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use wreq::{Client, Method, Proxy};

use gemgate_transform::chat::ImageFetcher;

use crate::error::UpstreamError;
use crate::response::ByteStream;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

#[derive(Debug)]
pub struct UpstreamRequest {
    pub method: HttpMethod,
    pub url: String,
    pub api_key: String,
    pub body: Option<Bytes>,
    pub is_stream: bool,
}

pub enum UpstreamBody {
    Bytes(Bytes),
    Stream(ByteStream),
}

impl UpstreamBody {
    pub fn into_bytes(self) -> Result<Bytes, UpstreamError> {
        match self {
            UpstreamBody::Bytes(bytes) => Ok(bytes),
            UpstreamBody::Stream(_) => Err(UpstreamError::transport(
                "unexpected streaming upstream body",
            )),
        }
    }

    pub fn into_stream(self) -> Result<ByteStream, UpstreamError> {
        match self {
            UpstreamBody::Stream(stream) => Ok(stream),
            UpstreamBody::Bytes(_) => Err(UpstreamError::transport(
                "unexpected buffered upstream body",
            )),
        }
    }
}

pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: UpstreamBody,
}

/// One credential-scoped exchange with the provider. A non-2xx status is an
/// `UpstreamError` carrying the upstream's own status, headers, and body.
pub trait UpstreamClient: Send + Sync {
    fn send<'a>(
        &'a self,
        req: UpstreamRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamResponse, UpstreamError>> + Send + 'a>>;

    /// Plain GET used to inline remote image URLs; returns content type and
    /// raw bytes.
    fn fetch<'a>(
        &'a self,
        url: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(String, Bytes), String>> + Send + 'a>>;
}

/// URL construction for every provider operation the gateway issues.
#[derive(Debug, Clone)]
pub struct GeminiOps {
    base_url: String,
}

impl GeminiOps {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn action_url(&self, model: &str, action: &str) -> String {
        format!("{}/v1beta/models/{}:{}", self.base_url, model, action)
    }

    fn post(&self, url: String, body: Bytes, api_key: String, is_stream: bool) -> UpstreamRequest {
        UpstreamRequest {
            method: HttpMethod::Post,
            url,
            api_key,
            body: Some(body),
            is_stream,
        }
    }

    pub fn generate(&self, model: &str, body: Bytes, api_key: String) -> UpstreamRequest {
        self.post(self.action_url(model, "generateContent"), body, api_key, false)
    }

    pub fn stream_generate(&self, model: &str, body: Bytes, api_key: String) -> UpstreamRequest {
        let url = format!("{}?alt=sse", self.action_url(model, "streamGenerateContent"));
        self.post(url, body, api_key, true)
    }

    pub fn embed(&self, model: &str, body: Bytes, api_key: String) -> UpstreamRequest {
        self.post(self.action_url(model, "embedContent"), body, api_key, false)
    }

    pub fn batch_embed(&self, model: &str, body: Bytes, api_key: String) -> UpstreamRequest {
        self.post(
            self.action_url(model, "batchEmbedContents"),
            body,
            api_key,
            false,
        )
    }

    pub fn count_tokens(&self, model: &str, body: Bytes, api_key: String) -> UpstreamRequest {
        self.post(self.action_url(model, "countTokens"), body, api_key, false)
    }

    pub fn imagen_predict(&self, model: &str, body: Bytes, api_key: String) -> UpstreamRequest {
        self.post(self.action_url(model, "predict"), body, api_key, false)
    }

    pub fn list_models(&self, query: Option<&str>, api_key: String) -> UpstreamRequest {
        let url = match query {
            Some(query) if !query.is_empty() => {
                format!("{}/v1beta/models?{}", self.base_url, query)
            }
            _ => format!("{}/v1beta/models", self.base_url),
        };
        UpstreamRequest {
            method: HttpMethod::Get,
            url,
            api_key,
            body: None,
            is_stream: false,
        }
    }

    pub fn get_model(&self, model: &str, api_key: String) -> UpstreamRequest {
        UpstreamRequest {
            method: HttpMethod::Get,
            url: format!("{}/v1beta/models/{}", self.base_url, model),
            api_key,
            body: None,
            is_stream: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UpstreamClientConfig {
    pub proxy: Option<String>,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub stream_idle_timeout: Duration,
}

impl Default for UpstreamClientConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(600),
            stream_idle_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Clone)]
pub struct WreqUpstreamClient {
    config: UpstreamClientConfig,
    clients: Arc<Mutex<HashMap<Option<String>, Client>>>,
}

impl WreqUpstreamClient {
    pub fn new(config: UpstreamClientConfig) -> Result<Self, wreq::Error> {
        let proxy = normalize_proxy(config.proxy.clone());
        let initial = build_client(&config, proxy.as_deref())?;
        let mut clients = HashMap::new();
        clients.insert(proxy, initial);
        Ok(Self {
            config,
            clients: Arc::new(Mutex::new(clients)),
        })
    }

    fn client(&self) -> Result<Client, UpstreamError> {
        let proxy = normalize_proxy(self.config.proxy.clone());
        let mut guard = self
            .clients
            .lock()
            .map_err(|_| UpstreamError::transport("upstream client cache lock failed"))?;
        if let Some(client) = guard.get(&proxy) {
            return Ok(client.clone());
        }
        let client = build_client(&self.config, proxy.as_deref()).map_err(map_wreq_error)?;
        guard.insert(proxy, client.clone());
        Ok(client)
    }
}

fn normalize_proxy(value: Option<String>) -> Option<String> {
    value
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
}

fn build_client(config: &UpstreamClientConfig, proxy: Option<&str>) -> Result<Client, wreq::Error> {
    let mut builder = Client::builder()
        .connect_timeout(config.connect_timeout)
        .timeout(config.request_timeout)
        .read_timeout(config.stream_idle_timeout);

    if let Some(proxy) = proxy {
        builder = builder.proxy(Proxy::all(proxy)?);
    }

    builder.build()
}

impl UpstreamClient for WreqUpstreamClient {
    fn send<'a>(
        &'a self,
        req: UpstreamRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamResponse, UpstreamError>> + Send + 'a>> {
        Box::pin(async move {
            let client = self.client()?;
            let method = match req.method {
                HttpMethod::Get => Method::GET,
                HttpMethod::Post => Method::POST,
            };

            let mut builder = client
                .request(method, &req.url)
                .header("x-goog-api-key", &req.api_key);
            if let Some(body) = req.body {
                builder = builder
                    .header("content-type", "application/json")
                    .body(body);
            }

            let resp = builder.send().await.map_err(map_wreq_error)?;
            let status =
                StatusCode::from_u16(resp.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
            let headers = convert_headers(resp.headers());

            if !status.is_success() {
                let body = resp.bytes().await.map_err(map_wreq_error)?;
                return Err(UpstreamError::new(status, headers, body));
            }

            if !req.is_stream {
                let body = resp.bytes().await.map_err(map_wreq_error)?;
                return Ok(UpstreamResponse {
                    status,
                    headers,
                    body: UpstreamBody::Bytes(body),
                });
            }

            let idle = self.config.stream_idle_timeout;
            let stream = unfold(resp.bytes_stream(), move |mut upstream| async move {
                match tokio::time::timeout(idle, upstream.next()).await {
                    Ok(Some(Ok(chunk))) => Some((Ok(chunk), upstream)),
                    Ok(Some(Err(err))) => {
                        Some((Err(io::Error::other(err.to_string())), upstream))
                    }
                    // Stream end, or idle past the configured bound.
                    Ok(None) | Err(_) => None,
                }
            });

            Ok(UpstreamResponse {
                status,
                headers,
                body: UpstreamBody::Stream(Box::pin(stream)),
            })
        })
    }

    fn fetch<'a>(
        &'a self,
        url: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(String, Bytes), String>> + Send + 'a>> {
        Box::pin(async move {
            let client = self.client().map_err(|err| {
                String::from_utf8_lossy(&err.body).to_string()
            })?;
            let resp = client
                .get(url)
                .send()
                .await
                .map_err(|err| err.to_string())?;
            if !resp.status().is_success() {
                return Err(format!("upstream returned {}", resp.status()));
            }
            let mime = resp
                .headers()
                .get("content-type")
                .and_then(|value| value.to_str().ok())
                .map(|value| value.split(';').next().unwrap_or(value).trim().to_string())
                .unwrap_or_else(|| "application/octet-stream".to_string());
            let bytes = resp.bytes().await.map_err(|err| err.to_string())?;
            Ok((mime, bytes))
        })
    }
}

fn convert_headers(map: &wreq::header::HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in map {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_str().as_bytes()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            out.insert(name, value);
        }
    }
    out
}

fn map_wreq_error(err: wreq::Error) -> UpstreamError {
    if err.is_timeout() {
        return UpstreamError::from_status(
            StatusCode::GATEWAY_TIMEOUT,
            format!("upstream timeout: {err}"),
        );
    }
    UpstreamError::transport(err.to_string())
}

/// Lets the chat translator inline remote image URLs through the gateway's
/// upstream client.
pub struct UpstreamImageFetcher {
    client: Arc<dyn UpstreamClient>,
}

impl UpstreamImageFetcher {
    pub fn new(client: Arc<dyn UpstreamClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ImageFetcher for UpstreamImageFetcher {
    async fn fetch(&self, url: &str) -> Result<(String, Bytes), String> {
        self.client.fetch(url).await
    }
}
