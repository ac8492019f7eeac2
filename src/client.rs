use std::env;
use std::time::{Duration, Instant};

use futures::stream::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client as ReqwestClient, Response, StatusCode, header};
use url::Url;

use crate::error::{Error, Result};
use crate::observability::{CLIENT_REQUEST_DURATION, CLIENT_REQUEST_ERRORS, CLIENT_REQUESTS};
use crate::sse::{EventStream, process_sse};
use crate::types::ChatRequest;

/// Base URL used when neither an endpoint nor `COMPASS_API_URL` is given.
pub const DEFAULT_API_URL: &str = "http://localhost:8000/";
/// Path of the streaming chat endpoint relative to the API base.
pub const CHAT_STREAM_PATH: &str = "api/agent/chat/stream";
/// Response header carrying the thread identifier before the first event.
pub const THREAD_ID_HEADER: &str = "x-thread-id";

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

/// An opened agent stream.
pub struct ChatStream {
    /// Thread identifier announced in the response headers, if any.
    pub thread_id: Option<String>,
    /// The decoded events of the response body.
    pub events: EventStream,
}

impl std::fmt::Debug for ChatStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatStream")
            .field("thread_id", &self.thread_id)
            .finish_non_exhaustive()
    }
}

/// Something that can open a streamed chat exchange with the agent.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Send `request` and return the event stream of the response.
    async fn open(&self, request: &ChatRequest, bearer_token: Option<&str>) -> Result<ChatStream>;
}

/// Resolve the chat endpoint from an API base URL.
pub fn chat_endpoint(base_url: &str) -> Result<Url> {
    let mut base = base_url.trim().to_string();
    if !base.ends_with('/') {
        base.push('/');
    }
    Ok(Url::parse(&base)?.join(CHAT_STREAM_PATH)?)
}

/// HTTP client for the neighborhood advisor agent.
#[derive(Debug, Clone)]
pub struct AgentClient {
    client: ReqwestClient,
    endpoint: Url,
    connect_timeout: Duration,
}

impl AgentClient {
    /// Create a new agent client.
    ///
    /// The endpoint is used verbatim when provided.  Otherwise the chat path is appended to
    /// the base URL in `COMPASS_API_URL`, or to `http://localhost:8000/`.
    pub fn new(endpoint: Option<String>) -> Result<Self> {
        Self::with_options(endpoint, None)
    }

    /// Create a new client with custom settings.
    ///
    /// `connect_timeout` bounds connection setup only; a response body may stream for as long
    /// as the agent keeps sending.
    pub fn with_options(endpoint: Option<String>, connect_timeout: Option<Duration>) -> Result<Self> {
        let endpoint = match endpoint {
            Some(endpoint) => Url::parse(&endpoint)?,
            None => {
                let base = env::var("COMPASS_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());
                chat_endpoint(&base)?
            }
        };

        let connect_timeout = connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT);
        let client = ReqwestClient::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| {
                Error::http_client(
                    format!("Failed to build HTTP client: {e}"),
                    Some(Box::new(e)),
                )
            })?;

        Ok(Self {
            client,
            endpoint,
            connect_timeout,
        })
    }

    /// The URL requests are posted to.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Create the headers for a chat request.
    fn default_headers(&self, bearer_token: Option<&str>) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("text/event-stream"),
        );
        if let Some(token) = bearer_token.filter(|token| !token.is_empty()) {
            let value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| {
                Error::authentication("stored token contains characters not allowed in a header")
            })?;
            headers.insert(header::AUTHORIZATION, value);
        }
        Ok(headers)
    }

    /// Process API response errors and convert to our Error type
    async fn process_error_response(response: Response) -> Error {
        let status = response.status();
        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|val| val.to_str().ok())
            .and_then(|val| val.parse::<u64>().ok());

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                return Error::http_client(
                    format!("Failed to read error response: {e}"),
                    Some(Box::new(e)),
                );
            }
        };
        error_from_status(status, &body, retry_after)
    }
}

/// Map a failed response to an error.
///
/// FastAPI reports failures as `{"detail": ...}`; the detail is used as the message when
/// present, then a plain-text body, then the status reason.
fn error_from_status(status: StatusCode, body: &str, retry_after: Option<u64>) -> Error {
    let reason = status.canonical_reason().map(String::from);
    let detail = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| value.get("detail").cloned())
        .map(|detail| match detail {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        });
    let body = body.trim();
    let message = detail
        .or_else(|| (!body.is_empty()).then(|| body.to_string()))
        .or_else(|| reason.clone())
        .unwrap_or_else(|| format!("status {}", status.as_u16()));

    match status.as_u16() {
        400 | 422 => Error::bad_request(message),
        401 => Error::authentication(message),
        403 => Error::permission(message),
        404 => Error::not_found(message),
        408 => Error::timeout(message, None),
        429 => Error::rate_limit(message, retry_after),
        500 => Error::internal_server(message),
        502..=504 => Error::service_unavailable(message, retry_after),
        status_code => Error::api(status_code, reason, message),
    }
}

#[async_trait::async_trait]
impl Transport for AgentClient {
    async fn open(&self, request: &ChatRequest, bearer_token: Option<&str>) -> Result<ChatStream> {
        CLIENT_REQUESTS.click();
        let start = Instant::now();
        let headers = self.default_headers(bearer_token)?;

        let response = self
            .client
            .post(self.endpoint.clone())
            .headers(headers)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                CLIENT_REQUEST_ERRORS.click();
                if e.is_timeout() {
                    Error::timeout(
                        format!("Request timed out: {e}"),
                        Some(self.connect_timeout.as_secs_f64()),
                    )
                } else if e.is_connect() {
                    Error::connection(format!("Connection error: {e}"), Some(Box::new(e)))
                } else {
                    Error::http_client(format!("Request failed: {e}"), Some(Box::new(e)))
                }
            })?;
        CLIENT_REQUEST_DURATION.add(start.elapsed().as_secs_f64());

        if !response.status().is_success() {
            CLIENT_REQUEST_ERRORS.click();
            return Err(Self::process_error_response(response).await);
        }

        let thread_id = response
            .headers()
            .get(THREAD_ID_HEADER)
            .and_then(|val| val.to_str().ok())
            .map(str::trim)
            .filter(|val| !val.is_empty())
            .map(String::from);

        let bytes = response.bytes_stream().map(|result| {
            result.map_err(|e| {
                Error::streaming(format!("Error in HTTP stream: {e}"), Some(Box::new(e)))
            })
        });

        Ok(ChatStream {
            thread_id,
            events: Box::pin(process_sse(bytes)),
        })
    }
}
