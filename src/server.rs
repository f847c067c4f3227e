use crate::credentials::CredentialStore;
use crate::models;
use crate::sse;
use crate::transform;
use anyhow::{Context, Result};
use reqwest::blocking::{Client, Response};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::env;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

pub const UPSTREAM_RESPONSES_ENDPOINT: &str = "https://chatgpt.com/backend-api/codex/responses";
const UPSTREAM_VERSION: &str = "0.19.0";
const UPSTREAM_ORIGINATOR: &str = "codex_cli_rs";

const MAX_HEADER_BYTES: usize = 64 * 1024;
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;
const SOCKET_TIMEOUT: Duration = Duration::from_secs(20);
const BODY_PREVIEW_LIMIT: usize = 1200;

const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
    "proxy-connection",
];

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

#[derive(Debug)]
struct HttpResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

#[derive(Debug)]
struct RequestError {
    status: u16,
    message: String,
}

impl RequestError {
    fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

enum UpstreamError {
    Credentials(anyhow::Error),
    Transport(anyhow::Error),
    Unauthorized,
}

#[derive(Clone, Copy)]
enum ProxyMode {
    /// Chat endpoint: rewrite upstream events into chat.completion chunks,
    /// or aggregate them into one chat.completion when the caller did not
    /// ask for a stream.
    ChatRewrite { stream_requested: bool },
    /// Responses endpoint: re-frame upstream events unchanged.
    ResponsesPassThrough,
}

struct Server {
    creds: Arc<dyn CredentialStore>,
    upstream_client: Client,
}

/// Binds the listener and serves connections, one thread per connection.
pub fn run(host: &str, port: u16, creds: Arc<dyn CredentialStore>) -> Result<()> {
    let listener = TcpListener::bind((host, port))
        .with_context(|| format!("failed to bind {host}:{port}"))?;

    // No total timeout: SSE responses stay open for as long as the model
    // streams. Only connect and idle-pool limits apply.
    let upstream_client = Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .pool_idle_timeout(Duration::from_secs(90))
        .timeout(None::<Duration>)
        .build()
        .context("failed to create upstream HTTP client")?;

    let server = Arc::new(Server {
        creds,
        upstream_client,
    });

    info!(host, port, "codex-proxy listening");

    for incoming in listener.incoming() {
        match incoming {
            Ok(stream) => {
                let server = Arc::clone(&server);
                thread::spawn(move || {
                    if let Err(err) = handle_connection(stream, server) {
                        error!(error = %err, "connection handling error");
                    }
                });
            }
            Err(err) => {
                error!(error = %err, "listener accept error");
            }
        }
    }

    Ok(())
}

fn handle_connection(mut stream: TcpStream, server: Arc<Server>) -> Result<()> {
    stream
        .set_read_timeout(Some(SOCKET_TIMEOUT))
        .context("failed to set socket read timeout")?;
    stream
        .set_write_timeout(Some(SOCKET_TIMEOUT))
        .context("failed to set socket write timeout")?;

    let request = match read_http_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            return write_http_response(&mut stream, &plain_text_response(err.status, &err.message));
        }
    };

    let method = request.method.clone();
    let path = request.path.clone();
    let started = Instant::now();
    info!(method = %method, path = %path, "incoming request");

    let result = server.route(request, &mut stream);

    info!(
        method = %method,
        path = %path,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "finished request"
    );
    result
}

impl Server {
    fn route(&self, request: HttpRequest, stream: &mut TcpStream) -> Result<()> {
        let method = request.method.clone();
        let path = request
            .path
            .split('?')
            .next()
            .unwrap_or_default()
            .to_string();

        match (method.as_str(), path.as_str()) {
            ("GET", "/health") => {
                write_http_response(stream, &json_response(200, json!({"status": "ok"})))
            }
            ("GET", "/v1/models") => write_http_response(
                stream,
                &json_response(
                    200,
                    json!({"object": "list", "data": models::advertised_models()}),
                ),
            ),
            ("POST", "/v1/chat/completions") => {
                self.admin_gated(request, stream, Self::handle_chat_completions)
            }
            ("POST", "/v1/responses") => self.admin_gated(request, stream, Self::handle_responses),
            ("POST", "/admin/credentials") => {
                self.admin_gated(request, stream, Self::handle_admin_credentials)
            }
            ("GET", "/admin/credentials/status") => {
                self.admin_gated(request, stream, Self::handle_admin_status)
            }
            (
                _,
                "/health" | "/v1/models" | "/v1/chat/completions" | "/v1/responses"
                | "/admin/credentials" | "/admin/credentials/status",
            ) => write_http_response(stream, &plain_text_response(405, "method not allowed")),
            _ => {
                warn!(method = %method, path = %path, "unhandled route");
                write_http_response(stream, &plain_text_response(404, "not found"))
            }
        }
    }

    fn admin_gated(
        &self,
        request: HttpRequest,
        stream: &mut TcpStream,
        handler: fn(&Self, HttpRequest, &mut TcpStream) -> Result<()>,
    ) -> Result<()> {
        if let Err(response) = admin_authorized(&request) {
            return write_http_response(stream, &response);
        }
        handler(self, request, stream)
    }

    fn handle_chat_completions(&self, request: HttpRequest, stream: &mut TcpStream) -> Result<()> {
        let Some(body) = parse_json_object(&request.body) else {
            return write_http_response(
                stream,
                &plain_text_response(400, "failed to parse request body"),
            );
        };

        let requested_model = transform::resolve_request_model(&body);
        let normalized_model = models::normalize_model(&requested_model).to_string();
        let requested_effort = transform::resolve_reasoning_effort(&body);
        let normalized_effort = models::normalize_reasoning_effort(&requested_effort);
        let message_count = body
            .get("messages")
            .and_then(Value::as_array)
            .map(|messages| messages.len())
            .unwrap_or(0);
        let stream_requested = body.get("stream").and_then(Value::as_bool).unwrap_or(true);

        let target = transform::build_chat_upstream_body(&body);
        let cache_key = target
            .get("prompt_cache_key")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let input_count = target
            .get("input")
            .and_then(Value::as_array)
            .map(|input| input.len())
            .unwrap_or(0);

        let payload = match serde_json::to_vec(&Value::Object(target)) {
            Ok(payload) => payload,
            Err(err) => {
                error!(error = %err, "failed to encode upstream request body");
                return write_http_response(
                    stream,
                    &plain_text_response(500, "failed to prepare upstream request"),
                );
            }
        };

        info!(
            requested_model = %requested_model,
            normalized_model = %normalized_model,
            requested_reasoning_effort = %requested_effort,
            normalized_reasoning_effort = %normalized_effort,
            message_count,
            input_count,
            prompt_cache_key = %cache_key,
            "processing chat completion request"
        );

        self.proxy_upstream(
            &payload,
            stream,
            &normalized_model,
            ProxyMode::ChatRewrite { stream_requested },
        )
    }

    fn handle_responses(&self, request: HttpRequest, stream: &mut TcpStream) -> Result<()> {
        let Some(mut body) = parse_json_object(&request.body) else {
            return write_http_response(
                stream,
                &plain_text_response(400, "failed to parse request body"),
            );
        };

        let requested_model = transform::resolve_request_model(&body);
        let requested_effort = transform::resolve_reasoning_effort(&body);
        let input_count = body
            .get("input")
            .and_then(Value::as_array)
            .map(|input| input.len())
            .unwrap_or(0);

        let (normalized_model, normalized_effort) =
            transform::transform_responses_body(&mut body, &requested_model, &requested_effort);
        let cache_key = body
            .get("prompt_cache_key")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let payload = match serde_json::to_vec(&Value::Object(body)) {
            Ok(payload) => payload,
            Err(err) => {
                error!(error = %err, "failed to encode upstream request body");
                return write_http_response(
                    stream,
                    &plain_text_response(500, "failed to prepare upstream request"),
                );
            }
        };

        info!(
            requested_model = %requested_model,
            normalized_model = %normalized_model,
            requested_reasoning_effort = %requested_effort,
            normalized_reasoning_effort = %normalized_effort,
            input_count,
            prompt_cache_key = %cache_key,
            "processing responses request"
        );

        self.proxy_upstream(
            &payload,
            stream,
            &normalized_model,
            ProxyMode::ResponsesPassThrough,
        )
    }

    fn proxy_upstream(
        &self,
        payload: &[u8],
        stream: &mut TcpStream,
        model: &str,
        mode: ProxyMode,
    ) -> Result<()> {
        let response = match self.upstream_request_with_retry(payload) {
            Ok(response) => response,
            Err(UpstreamError::Credentials(err)) => {
                error!(error = %err, "failed to get credentials");
                return write_http_response(
                    stream,
                    &plain_text_response(500, "failed to get credentials"),
                );
            }
            Err(UpstreamError::Transport(err)) => {
                error!(error = %err, "error making request to upstream backend");
                return write_http_response(
                    stream,
                    &plain_text_response(
                        503,
                        &format!("failed to communicate with upstream API: {err:#}"),
                    ),
                );
            }
            Err(UpstreamError::Unauthorized) => {
                return write_http_response(
                    stream,
                    &plain_text_response(401, "token expired and refresh failed"),
                );
            }
        };

        self.write_upstream_response(response, stream, model, mode)
    }

    fn upstream_request_with_retry(&self, payload: &[u8]) -> Result<Response, UpstreamError> {
        let (token, account_id) = self
            .creds
            .get_credentials()
            .map_err(UpstreamError::Credentials)?;

        let response = self
            .send_upstream(payload, &token, &account_id)
            .map_err(UpstreamError::Transport)?;
        if response.status() != reqwest::StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        warn!("received 401 from upstream, attempting token refresh");
        drop(response);

        if let Err(err) = self.creds.refresh_credentials() {
            error!(error = %err, "failed to refresh credentials after 401");
            return Err(UpstreamError::Unauthorized);
        }
        info!("credentials refreshed, retrying upstream request");

        let (token, account_id) = self
            .creds
            .get_credentials()
            .map_err(UpstreamError::Credentials)?;
        let response = self
            .send_upstream(payload, &token, &account_id)
            .map_err(UpstreamError::Transport)?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            error!("still 401 after token refresh, giving up");
        } else {
            info!("request succeeded after token refresh");
        }
        Ok(response)
    }

    fn send_upstream(&self, payload: &[u8], token: &str, account_id: &str) -> Result<Response> {
        let session_id = Uuid::new_v4().to_string();
        self.upstream_client
            .post(UPSTREAM_RESPONSES_ENDPOINT)
            .header("authorization", format!("Bearer {}", bare_token(token)))
            .header("version", UPSTREAM_VERSION)
            .header("openai-beta", "responses=experimental")
            .header("session_id", session_id)
            .header("accept", "text/event-stream")
            .header("content-type", "application/json")
            .header("chatgpt-account-id", account_id)
            .header("originator", UPSTREAM_ORIGINATOR)
            .body(payload.to_vec())
            .send()
            .context("failed to send upstream request")
    }

    fn write_upstream_response(
        &self,
        response: Response,
        stream: &mut TcpStream,
        model: &str,
        mode: ProxyMode,
    ) -> Result<()> {
        let status = response.status().as_u16();
        let mut headers = Vec::new();
        for (name, value) in response.headers() {
            let lower = name.as_str().to_ascii_lowercase();
            if should_skip_response_header(&lower) {
                continue;
            }
            if let Ok(parsed) = value.to_str() {
                headers.push((name.as_str().to_string(), parsed.to_string()));
            }
        }

        if status != 200 {
            let content_type = header_value(&headers, "content-type").unwrap_or_default();
            let body = response.bytes().map(|b| b.to_vec()).unwrap_or_default();
            warn!(
                status_code = status,
                content_type = %content_type,
                response_body_preview = %truncate_preview(&body, BODY_PREVIEW_LIMIT),
                "upstream returned error status"
            );
            return write_http_response(
                stream,
                &HttpResponse {
                    status,
                    headers,
                    body,
                },
            );
        }

        let content_type = header_value(&headers, "content-type").unwrap_or_default();
        let media_type = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        let is_event_stream = media_type == "text/event-stream";

        info!(
            status_code = status,
            content_type = %content_type,
            streaming = is_event_stream,
            "received response from upstream"
        );

        if let ProxyMode::ChatRewrite {
            stream_requested: false,
        } = mode
        {
            return match sse::buffer_chat_completion(response, model) {
                Ok(completion) => write_http_response(stream, &json_response(200, completion)),
                Err(err) => {
                    error!(error = %err, "failed to buffer upstream stream");
                    write_http_response(
                        stream,
                        &json_response(
                            502,
                            json!({"error": {
                                "message": "failed to decode upstream streaming response",
                                "type": "bad_gateway",
                            }}),
                        ),
                    )
                }
            };
        }

        if is_event_stream {
            headers.retain(|(name, _)| {
                let lower = name.to_ascii_lowercase();
                lower != "content-type" && lower != "content-length"
            });
            headers.push((
                "Content-Type".to_string(),
                "text/event-stream; charset=utf-8".to_string(),
            ));
            headers.push(("Cache-Control".to_string(), "no-cache".to_string()));
            headers.push(("Connection".to_string(), "keep-alive".to_string()));
        }

        write_streaming_headers(stream, status, &headers)?;

        let result = match mode {
            ProxyMode::ChatRewrite { .. } => sse::rewrite_sse_stream(response, stream, model),
            ProxyMode::ResponsesPassThrough => sse::pass_through_sse_stream(response, stream),
        };
        if let Err(err) = result {
            // The response is already in flight; all we can do is log.
            error!(error = %err, "error streaming upstream response");
        }
        Ok(())
    }

    fn handle_admin_credentials(&self, request: HttpRequest, stream: &mut TcpStream) -> Result<()> {
        if !self.creds.supports_oauth() {
            error!("credential store does not support OAuth operations");
            return write_http_response(
                stream,
                &plain_text_response(
                    400,
                    "OAuth operations not supported by current credential store",
                ),
            );
        }

        let seed: AdminCredentialsRequest = match serde_json::from_slice(&request.body) {
            Ok(seed) => seed,
            Err(err) => {
                warn!(error = %err, "failed to parse admin credentials body");
                return write_http_response(stream, &plain_text_response(400, "invalid request body"));
            }
        };

        if seed.access_token.is_empty() || seed.refresh_token.is_empty() || seed.expires_at == 0 {
            return write_http_response(
                stream,
                &plain_text_response(
                    400,
                    "missing required fields: accessToken, refreshToken, expiresAt",
                ),
            );
        }

        if let Err(err) =
            self.creds
                .update_tokens(&seed.access_token, &seed.refresh_token, seed.expires_at)
        {
            error!(error = %err, "failed to update OAuth tokens");
            return write_http_response(
                stream,
                &plain_text_response(500, "failed to update credentials"),
            );
        }

        info!(user_id = %seed.user_id, "OAuth credentials updated via admin endpoint");
        write_http_response(
            stream,
            &json_response(
                200,
                json!({"status": "success", "message": "Credentials updated successfully"}),
            ),
        )
    }

    fn handle_admin_status(&self, _request: HttpRequest, stream: &mut TcpStream) -> Result<()> {
        if !self.creds.supports_oauth() {
            let response = match self.creds.get_credentials() {
                Ok((_, user_id)) => json!({
                    "type": "basic",
                    "hasCredentials": true,
                    "userID": user_id,
                }),
                Err(err) => json!({
                    "type": "basic",
                    "hasCredentials": false,
                    "error": err.to_string(),
                }),
            };
            return write_http_response(stream, &json_response(200, response));
        }

        let creds = match self.creds.get_full_credentials() {
            Ok(creds) => creds,
            Err(err) => {
                return write_http_response(
                    stream,
                    &json_response(
                        200,
                        json!({
                            "type": "oauth",
                            "hasCredentials": false,
                            "error": err.to_string(),
                        }),
                    ),
                );
            }
        };

        let minutes_until_expiry = (creds.expires_at_ms - crate::oauth::now_millis()) / 1000 / 60;
        write_http_response(
            stream,
            &json_response(
                200,
                json!({
                    "type": "oauth",
                    "hasCredentials": true,
                    "userID": creds.user_id,
                    "expiresAt": creds.expires_at_ms,
                    "minutesUntilExpiry": minutes_until_expiry,
                    "isExpired": minutes_until_expiry <= 0,
                    "needsRefreshSoon": minutes_until_expiry <= 60,
                }),
            ),
        )
    }
}

#[derive(Debug, Deserialize)]
struct AdminCredentialsRequest {
    #[serde(rename = "accessToken", default)]
    access_token: String,
    #[serde(rename = "refreshToken", default)]
    refresh_token: String,
    #[serde(rename = "expiresAt", default)]
    expires_at: i64,
    #[serde(rename = "userID", default)]
    user_id: String,
}

/// Requires the shared admin key from either `Authorization: Bearer <key>`
/// (exactly two space-separated tokens, case-insensitive scheme) or
/// `X-API-Key: <key>`. Unset `ADMIN_API_KEY` fails closed with a 500.
fn admin_authorized(request: &HttpRequest) -> Result<(), HttpResponse> {
    let admin_key = env::var("ADMIN_API_KEY").unwrap_or_default();
    if admin_key.is_empty() {
        error!("ADMIN_API_KEY environment variable not set");
        return Err(plain_text_response(500, "admin API not configured"));
    }

    let provided = if let Some(auth_header) = request.headers.get("authorization") {
        let parts: Vec<&str> = auth_header.split(' ').collect();
        if parts.len() != 2 || !parts[0].eq_ignore_ascii_case("bearer") {
            warn!(method = %request.method, path = %request.path, "invalid Authorization header format");
            return Err(plain_text_response(401, "invalid Authorization header format"));
        }
        parts[1].to_string()
    } else if let Some(api_key) = request.headers.get("x-api-key") {
        api_key.clone()
    } else {
        warn!(method = %request.method, path = %request.path, "missing Authorization or X-API-Key header");
        return Err(plain_text_response(401, "unauthorized"));
    };

    if !secure_eq(&provided, &admin_key) {
        warn!(method = %request.method, path = %request.path, "invalid admin API key provided");
        return Err(plain_text_response(401, "unauthorized"));
    }
    Ok(())
}

fn secure_eq(left: &str, right: &str) -> bool {
    if left.len() != right.len() {
        return false;
    }
    let mut diff = 0_u8;
    for (a, b) in left.as_bytes().iter().zip(right.as_bytes().iter()) {
        diff |= a ^ b;
    }
    diff == 0
}

fn parse_json_object(body: &[u8]) -> Option<Map<String, Value>> {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

fn bare_token(token: &str) -> &str {
    let trimmed = token.trim();
    if trimmed.len() >= 7 && trimmed[..7].eq_ignore_ascii_case("bearer ") {
        trimmed[7..].trim()
    } else {
        trimmed
    }
}

fn header_value(headers: &[(String, String)], name: &str) -> Option<String> {
    headers
        .iter()
        .find(|(header, _)| header.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.clone())
}

fn should_skip_response_header(lower_name: &str) -> bool {
    lower_name == "content-length" || HOP_BY_HOP_HEADERS.contains(&lower_name)
}

fn truncate_preview(body: &[u8], limit: usize) -> String {
    let text = String::from_utf8_lossy(body);
    if text.len() <= limit {
        return text.into_owned();
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…(truncated)", &text[..end])
}

fn read_http_request<R: Read>(stream: &mut R) -> Result<HttpRequest, RequestError> {
    let mut buffer = Vec::with_capacity(4096);
    let mut chunk = [0_u8; 4096];
    let header_end = loop {
        let read_bytes = stream
            .read(&mut chunk)
            .map_err(|_| RequestError::new(400, "failed to read request"))?;
        if read_bytes == 0 {
            return Err(RequestError::new(400, "empty request"));
        }
        buffer.extend_from_slice(&chunk[..read_bytes]);
        if let Some(index) = find_header_end(&buffer) {
            break index;
        }
        if buffer.len() > MAX_HEADER_BYTES {
            return Err(RequestError::new(431, "request header too large"));
        }
    };

    let header_text = std::str::from_utf8(&buffer[..header_end])
        .map_err(|_| RequestError::new(400, "request headers must be valid UTF-8"))?;

    let mut lines = header_text.split("\r\n");
    let request_line = lines
        .next()
        .ok_or_else(|| RequestError::new(400, "missing request line"))?;

    let mut request_line_parts = request_line.split_whitespace();
    let method = request_line_parts
        .next()
        .ok_or_else(|| RequestError::new(400, "missing method"))?
        .to_string();
    let path = request_line_parts
        .next()
        .ok_or_else(|| RequestError::new(400, "missing path"))?
        .to_string();

    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| RequestError::new(400, "invalid header"))?;
        headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
    }

    if headers
        .get("transfer-encoding")
        .map(|value| value.to_ascii_lowercase().contains("chunked"))
        .unwrap_or(false)
    {
        return Err(RequestError::new(
            501,
            "chunked request bodies are not supported",
        ));
    }

    let content_length = headers
        .get("content-length")
        .map(|value| {
            value
                .parse::<usize>()
                .map_err(|_| RequestError::new(400, "invalid content-length"))
        })
        .transpose()?
        .unwrap_or(0);

    if content_length > MAX_BODY_BYTES {
        return Err(RequestError::new(413, "payload too large"));
    }

    let body_start = header_end + 4;
    let mut body = if buffer.len() > body_start {
        buffer[body_start..].to_vec()
    } else {
        Vec::new()
    };

    if body.len() > content_length {
        body.truncate(content_length);
    }

    while body.len() < content_length {
        let mut remaining = vec![0_u8; content_length - body.len()];
        let read_bytes = stream
            .read(&mut remaining)
            .map_err(|_| RequestError::new(400, "failed reading request body"))?;
        if read_bytes == 0 {
            return Err(RequestError::new(400, "incomplete request body"));
        }
        body.extend_from_slice(&remaining[..read_bytes]);
    }

    Ok(HttpRequest {
        method,
        path,
        headers,
        body,
    })
}

fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|window| window == b"\r\n\r\n")
}

fn write_http_response(stream: &mut TcpStream, response: &HttpResponse) -> Result<()> {
    let mut payload = Vec::new();
    write!(
        payload,
        "HTTP/1.1 {} {}\r\n",
        response.status,
        status_reason(response.status)
    )
    .context("failed to serialize response status line")?;

    let mut content_type_present = false;
    for (name, value) in &response.headers {
        if name.eq_ignore_ascii_case("content-length") || name.eq_ignore_ascii_case("connection") {
            continue;
        }
        if name.eq_ignore_ascii_case("content-type") {
            content_type_present = true;
        }
        write!(payload, "{name}: {value}\r\n").context("failed to serialize response headers")?;
    }

    if !content_type_present {
        write!(payload, "Content-Type: text/plain; charset=utf-8\r\n")
            .context("failed to serialize content-type")?;
    }

    write!(payload, "Content-Length: {}\r\n", response.body.len())
        .context("failed to serialize content-length")?;
    write!(payload, "Connection: close\r\n\r\n").context("failed to serialize connection header")?;

    payload.extend_from_slice(&response.body);
    stream
        .write_all(&payload)
        .context("failed writing HTTP response")?;
    stream.flush().ok();
    Ok(())
}

fn write_streaming_headers(
    stream: &mut TcpStream,
    status: u16,
    headers: &[(String, String)],
) -> Result<()> {
    let mut payload = Vec::new();
    write!(payload, "HTTP/1.1 {} {}\r\n", status, status_reason(status))
        .context("failed to serialize response status line")?;
    for (name, value) in headers {
        write!(payload, "{name}: {value}\r\n").context("failed to serialize response headers")?;
    }
    payload.extend_from_slice(b"\r\n");
    stream
        .write_all(&payload)
        .context("failed writing response headers")?;
    stream.flush().ok();
    Ok(())
}

fn plain_text_response(status: u16, message: &str) -> HttpResponse {
    HttpResponse {
        status,
        headers: vec![(
            "Content-Type".to_string(),
            "text/plain; charset=utf-8".to_string(),
        )],
        body: message.as_bytes().to_vec(),
    }
}

fn json_response(status: u16, payload: Value) -> HttpResponse {
    let body = serde_json::to_vec(&payload).unwrap_or_else(|_| b"{}".to_vec());
    HttpResponse {
        status,
        headers: vec![(
            "Content-Type".to_string(),
            "application/json; charset=utf-8".to_string(),
        )],
        body,
    }
}

fn status_reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        413 => "Payload Too Large",
        429 => "Too Many Requests",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "OK",
    }
}
