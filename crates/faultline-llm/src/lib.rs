//! Completion client for an Ollama-style, OpenAI-compatible chat endpoint.
//!
//! Every request is sent with deterministic decoding (temperature 0, full
//! nucleus mass, fixed seed). Streaming responses are exposed as a
//! [`TokenStream`], a finite iterator that reads the SSE body lazily and can
//! only be consumed once. The client never retries; callers decide.

use faultline_core::EndpointConfig;
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::error::Error as StdError;
use std::io::{BufRead, BufReader};
use std::time::Duration;

mod error;

pub use error::CompletionError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub prompt: String,
    pub model: String,
    pub max_tokens: u32,
    #[serde(default)]
    pub stream: bool,
}

/// Decoding parameters applied to every request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodingParams {
    pub temperature: f32,
    pub top_p: f32,
    pub seed: u64,
}

impl DecodingParams {
    pub fn deterministic(seed: u64) -> Self {
        Self {
            temperature: 0.0,
            top_p: 1.0,
            seed,
        }
    }
}

/// Lazy, finite, non-restartable sequence of text fragments.
pub struct TokenStream {
    inner: Box<dyn Iterator<Item = Result<String, CompletionError>> + Send>,
}

impl TokenStream {
    pub fn new<I>(iter: I) -> Self
    where
        I: Iterator<Item = Result<String, CompletionError>> + Send + 'static,
    {
        Self {
            inner: Box::new(iter),
        }
    }

    pub fn from_fragments<S: Into<String>>(fragments: Vec<S>) -> Self {
        let owned: Vec<Result<String, CompletionError>> =
            fragments.into_iter().map(|f| Ok(f.into())).collect();
        Self::new(owned.into_iter())
    }

    /// Concatenate every fragment in arrival order, forwarding each one to
    /// `on_fragment` as it is read. The first error ends the stream.
    pub fn drain(self, on_fragment: &mut dyn FnMut(&str)) -> Result<String, CompletionError> {
        let mut out = String::new();
        for fragment in self {
            let fragment = fragment?;
            on_fragment(&fragment);
            out.push_str(&fragment);
        }
        Ok(out)
    }
}

/// Free-function form of [`TokenStream::drain`].
pub fn drain_stream(
    stream: TokenStream,
    on_fragment: &mut dyn FnMut(&str),
) -> Result<String, CompletionError> {
    stream.drain(on_fragment)
}

impl Iterator for TokenStream {
    type Item = Result<String, CompletionError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

impl std::fmt::Debug for TokenStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TokenStream")
    }
}

#[derive(Debug)]
pub enum Completion {
    Text(String),
    Stream(TokenStream),
}

impl Completion {
    pub fn into_text(self, on_fragment: &mut dyn FnMut(&str)) -> Result<String, CompletionError> {
        match self {
            Completion::Text(text) => {
                on_fragment(&text);
                Ok(text)
            }
            Completion::Stream(stream) => stream.drain(on_fragment),
        }
    }
}

pub trait CompletionClient: Send + Sync {
    fn complete_text(&self, req: &CompletionRequest) -> Result<String, CompletionError>;

    fn complete_stream(&self, req: &CompletionRequest) -> Result<TokenStream, CompletionError>;

    fn complete(&self, req: &CompletionRequest) -> Result<Completion, CompletionError> {
        if req.stream {
            self.complete_stream(req).map(Completion::Stream)
        } else {
            self.complete_text(req).map(Completion::Text)
        }
    }
}

#[derive(Debug, Clone)]
pub struct OllamaClient {
    cfg: EndpointConfig,
    url: String,
    decoding: DecodingParams,
    client: Client,
}

impl OllamaClient {
    pub fn new(cfg: EndpointConfig) -> Result<Self, CompletionError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_seconds))
            .build()
            .map_err(|e| CompletionError::Transport(e.to_string()))?;
        Ok(Self {
            url: cfg.chat_completions_url(),
            decoding: DecodingParams::deterministic(cfg.seed),
            cfg,
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.url
    }

    fn build_payload(&self, req: &CompletionRequest, stream: bool) -> Value {
        json!({
            "model": req.model,
            "messages": [{"role": "user", "content": req.prompt}],
            "max_tokens": req.max_tokens,
            "temperature": self.decoding.temperature,
            "top_p": self.decoding.top_p,
            "seed": self.decoding.seed,
            "stream": stream
        })
    }

    fn send(&self, req: &CompletionRequest, stream: bool) -> Result<reqwest::blocking::Response, CompletionError> {
        let mut builder = self.client.post(&self.url).json(&self.build_payload(req, stream));
        if let Some(key) = self.cfg.api_key.as_deref().filter(|k| !k.trim().is_empty()) {
            builder = builder.bearer_auth(key);
        }
        let resp = builder
            .send()
            .map_err(|e| format_transport_error(&e, &self.url, self.cfg.timeout_seconds))?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().unwrap_or_default();
        Err(format_api_error(status, &body))
    }
}

impl CompletionClient for OllamaClient {
    fn complete_text(&self, req: &CompletionRequest) -> Result<String, CompletionError> {
        let resp = self.send(req, false)?;
        let body = resp
            .text()
            .map_err(|e| format_transport_error(&e, &self.url, self.cfg.timeout_seconds))?;
        parse_non_streaming_payload(&body)
    }

    fn complete_stream(&self, req: &CompletionRequest) -> Result<TokenStream, CompletionError> {
        let resp = self.send(req, true)?;
        Ok(TokenStream::new(SseFragments::new(
            BufReader::new(resp),
            self.cfg.timeout_seconds,
        )))
    }
}

/// Reads `data:` lines from an SSE body and yields the content deltas.
struct SseFragments<R: BufRead> {
    lines: std::io::Lines<R>,
    timeout_seconds: u64,
    finished: bool,
}

impl<R: BufRead> SseFragments<R> {
    fn new(reader: R, timeout_seconds: u64) -> Self {
        Self {
            lines: reader.lines(),
            timeout_seconds,
            finished: false,
        }
    }

    fn fail(&mut self, err: CompletionError) -> Option<Result<String, CompletionError>> {
        self.finished = true;
        Some(Err(err))
    }
}

impl<R: BufRead> Iterator for SseFragments<R> {
    type Item = Result<String, CompletionError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            let line = match self.lines.next()? {
                Ok(l) => l,
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                    let seconds = self.timeout_seconds;
                    return self.fail(CompletionError::Timeout { seconds });
                }
                Err(e) => return self.fail(CompletionError::Stream(e.to_string())),
            };
            let trimmed = line.trim();
            if !trimmed.starts_with("data:") {
                continue;
            }
            let chunk = trimmed.trim_start_matches("data:").trim();
            if chunk == "[DONE]" {
                self.finished = true;
                return None;
            }
            let value: Value = match serde_json::from_str(chunk) {
                Ok(v) => v,
                Err(_) => continue,
            };
            if let Some(err) = value.get("error") {
                return self.fail(CompletionError::Stream(error_detail(err)));
            }
            if let Some(content) = stream_delta_content(&value)
                && !content.is_empty()
            {
                return Some(Ok(content.to_string()));
            }
        }
        None
    }
}

fn stream_delta_content(value: &Value) -> Option<&str> {
    let choice = value
        .get("choices")
        .and_then(|v| v.as_array())
        .and_then(|arr| arr.first())?;
    choice
        .get("delta")
        .and_then(|d| d.get("content"))
        .or_else(|| choice.get("message").and_then(|m| m.get("content")))
        .and_then(|v| v.as_str())
}

fn error_detail(err: &Value) -> String {
    err.get("message")
        .and_then(|m| m.as_str())
        .or_else(|| err.as_str())
        .map(ToString::to_string)
        .unwrap_or_else(|| err.to_string())
}

fn parse_non_streaming_payload(body: &str) -> Result<String, CompletionError> {
    let value: Value =
        serde_json::from_str(body).map_err(|e| CompletionError::Malformed(e.to_string()))?;
    let choice = value
        .get("choices")
        .and_then(|v| v.as_array())
        .and_then(|arr| arr.first())
        .ok_or_else(|| CompletionError::Malformed("missing choices[0]".to_string()))?;
    choice
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(ToString::to_string)
        .ok_or_else(|| CompletionError::Malformed("missing message.content".to_string()))
}

fn format_api_error(status: StatusCode, body: &str) -> CompletionError {
    let detail = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("error").map(error_detail))
        .unwrap_or_else(|| body.chars().take(200).collect());
    CompletionError::Api {
        status: status.as_u16(),
        detail,
    }
}

fn format_transport_error(err: &reqwest::Error, endpoint: &str, timeout_seconds: u64) -> CompletionError {
    if err.is_timeout() {
        return CompletionError::Timeout {
            seconds: timeout_seconds,
        };
    }
    if err.is_connect() {
        let message = err
            .source()
            .map(|e| e.to_string())
            .unwrap_or_else(|| err.to_string());
        return CompletionError::Connect {
            endpoint: endpoint.to_string(),
            message,
        };
    }
    CompletionError::Transport(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Read, Write};
    use std::net::TcpListener;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration as StdDuration;

    fn request(stream: bool) -> CompletionRequest {
        CompletionRequest {
            prompt: "why did it fail?".to_string(),
            model: "llama3.1:8b".to_string(),
            max_tokens: 64,
            stream,
        }
    }

    fn client_for(endpoint: &str, timeout_seconds: u64) -> OllamaClient {
        OllamaClient::new(EndpointConfig {
            base_url: endpoint.to_string(),
            api_key: Some("ollama".to_string()),
            timeout_seconds,
            seed: 7,
        })
        .expect("client")
    }

    #[test]
    fn payload_uses_deterministic_decoding() {
        let client = client_for("http://127.0.0.1:1", 5);
        let payload = client.build_payload(&request(true), true);
        assert_eq!(payload["temperature"], 0.0);
        assert_eq!(payload["top_p"], 1.0);
        assert_eq!(payload["seed"], 7);
        assert_eq!(payload["stream"], true);
        assert_eq!(payload["max_tokens"], 64);
        assert_eq!(payload["messages"][0]["role"], "user");
        assert_eq!(payload["messages"][0]["content"], "why did it fail?");
        assert_eq!(client.endpoint(), "http://127.0.0.1:1/v1/chat/completions");
    }

    #[test]
    fn parses_non_streaming() {
        let body = r#"{"choices":[{"message":{"content":"4"}}]}"#;
        assert_eq!(parse_non_streaming_payload(body).expect("parse"), "4");
        let err = parse_non_streaming_payload(r#"{"choices":[]}"#).expect_err("no choices");
        assert!(matches!(err, CompletionError::Malformed(_)));
    }

    #[test]
    fn sse_fragments_preserve_order_and_stop_at_done() {
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"hel\"}}]}\n\n\
                    : keep-alive\n\
                    data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\
                    data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n\
                    data: [DONE]\n\
                    data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n";
        let fragments: Vec<String> = SseFragments::new(Cursor::new(body), 5)
            .collect::<Result<_, _>>()
            .expect("fragments");
        assert_eq!(fragments, vec!["hel".to_string(), "lo".to_string()]);
    }

    #[test]
    fn sse_error_object_ends_stream_with_error() {
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"par\"}}]}\n\
                    data: {\"error\":{\"message\":\"model unloaded\"}}\n\
                    data: {\"choices\":[{\"delta\":{\"content\":\"tial\"}}]}\n";
        let mut iter = SseFragments::new(Cursor::new(body), 5);
        assert_eq!(iter.next().expect("first").expect("ok"), "par");
        let err = iter.next().expect("second").expect_err("error");
        assert!(err.to_string().contains("model unloaded"));
        assert!(iter.next().is_none());
    }

    #[test]
    fn drain_concatenates_and_forwards_each_fragment_once() {
        let stream = TokenStream::from_fragments(vec!["hel", "lo"]);
        let mut seen = Vec::new();
        let text = stream
            .drain(&mut |f: &str| seen.push(f.to_string()))
            .expect("drain");
        assert_eq!(text, "hello");
        assert_eq!(seen, vec!["hel", "lo"]);
    }

    #[test]
    fn api_errors_are_classified_for_retry() {
        let unavailable = format_api_error(StatusCode::SERVICE_UNAVAILABLE, r#"{"error":"busy"}"#);
        assert!(unavailable.is_retryable());
        assert!(unavailable.to_string().contains("busy"));
        let bad_request = format_api_error(
            StatusCode::BAD_REQUEST,
            r#"{"error":{"message":"model not found"}}"#,
        );
        assert!(!bad_request.is_retryable());
        assert!(bad_request.to_string().contains("model not found"));
    }

    #[test]
    fn complete_text_against_mock_server() {
        let server = start_mock_server(vec![MockHttpResponse::json(
            200,
            r#"{"choices":[{"message":{"content":"Paris"}}]}"#,
        )]);
        let client = client_for(&server.base_url, 5);
        let out = client.complete_text(&request(false)).expect("completion");
        assert_eq!(out, "Paris");
        assert_eq!(server.request_count(), 1);
    }

    #[test]
    fn complete_stream_reassembles_sse_body() {
        let sse_body = "data: {\"choices\":[{\"delta\":{\"content\":\"1. [Top-Level\"}}]}\n\n\
                        data: {\"choices\":[{\"delta\":{\"content\":\" Causal Conclusion]\"}}]}\n\n\
                        data: [DONE]\n";
        let server = start_mock_server(vec![MockHttpResponse::json(200, sse_body)]);
        let client = client_for(&server.base_url, 5);
        let completion = client.complete(&request(true)).expect("stream");
        let mut count = 0;
        let text = completion
            .into_text(&mut |_: &str| count += 1)
            .expect("drain");
        assert_eq!(text, "1. [Top-Level Causal Conclusion]");
        assert_eq!(count, 2);
    }

    #[test]
    fn server_errors_surface_once_without_retry() {
        let server = start_mock_server(vec![MockHttpResponse::json(
            503,
            r#"{"error":"temporarily_unavailable"}"#,
        )]);
        let client = client_for(&server.base_url, 5);
        let err = client.complete_text(&request(false)).expect_err("503");
        assert!(matches!(err, CompletionError::Api { status: 503, .. }));
        assert!(err.is_retryable());
        assert_eq!(server.request_count(), 1);
    }

    #[test]
    fn unreachable_endpoint_is_a_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);
        let client = client_for(&format!("http://{addr}"), 2);
        let err = client.complete_text(&request(false)).expect_err("refused");
        assert!(err.is_retryable());
        assert!(
            matches!(
                err,
                CompletionError::Connect { .. } | CompletionError::Transport(_)
            ),
            "unexpected error: {err:?}"
        );
    }

    #[test]
    fn hung_endpoint_becomes_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        let handle = thread::spawn(move || {
            if let Ok((stream, _)) = listener.accept() {
                thread::sleep(StdDuration::from_millis(2500));
                drop(stream);
            }
        });
        let client = client_for(&format!("http://{addr}"), 1);
        let err = client.complete_text(&request(false)).expect_err("timeout");
        assert!(matches!(err, CompletionError::Timeout { seconds: 1 }), "{err:?}");
        let _ = handle.join();
    }

    #[derive(Clone)]
    struct MockHttpResponse {
        status: u16,
        body: String,
    }

    impl MockHttpResponse {
        fn json(status: u16, body: &str) -> Self {
            Self {
                status,
                body: body.to_string(),
            }
        }
    }

    struct MockServer {
        base_url: String,
        request_count: Arc<AtomicUsize>,
        stop_tx: Option<mpsc::Sender<()>>,
        handle: Option<thread::JoinHandle<()>>,
    }

    impl MockServer {
        fn request_count(&self) -> usize {
            self.request_count.load(Ordering::SeqCst)
        }
    }

    impl Drop for MockServer {
        fn drop(&mut self) {
            if let Some(tx) = self.stop_tx.take() {
                let _ = tx.send(());
            }
            if let Some(handle) = self.handle.take() {
                let _ = handle.join();
            }
        }
    }

    fn start_mock_server(responses: Vec<MockHttpResponse>) -> MockServer {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock server");
        listener
            .set_nonblocking(true)
            .expect("set nonblocking listener");
        let addr = listener.local_addr().expect("addr");
        let request_count = Arc::new(AtomicUsize::new(0));
        let request_count_thread = Arc::clone(&request_count);
        let (tx, rx) = mpsc::channel::<()>();
        let handle = thread::spawn(move || {
            loop {
                if rx.try_recv().is_ok() {
                    break;
                }
                match listener.accept() {
                    Ok((mut stream, _)) => {
                        let _ = stream.set_nonblocking(false);
                        let _ = consume_http_request(&mut stream);
                        let idx = request_count_thread.fetch_add(1, Ordering::SeqCst);
                        let selected = responses
                            .get(idx)
                            .or_else(|| responses.last())
                            .cloned()
                            .expect("scripted response");
                        let status_text = match selected.status {
                            200 => "OK",
                            503 => "Service Unavailable",
                            _ => "Error",
                        };
                        let response = format!(
                            "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            selected.status,
                            status_text,
                            selected.body.len(),
                            selected.body
                        );
                        let _ = stream.write_all(response.as_bytes());
                        let _ = stream.flush();
                    }
                    Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                        thread::sleep(StdDuration::from_millis(2));
                    }
                    Err(_) => break,
                }
            }
        });
        MockServer {
            base_url: format!("http://{addr}"),
            request_count,
            stop_tx: Some(tx),
            handle: Some(handle),
        }
    }

    fn consume_http_request(stream: &mut std::net::TcpStream) -> std::io::Result<()> {
        let mut buffer = Vec::new();
        let mut chunk = [0_u8; 1024];
        let mut header_end = None;
        while header_end.is_none() {
            let read = stream.read(&mut chunk)?;
            if read == 0 {
                break;
            }
            buffer.extend_from_slice(&chunk[..read]);
            header_end = find_subsequence(&buffer, b"\r\n\r\n").map(|idx| idx + 4);
        }
        let header_len = header_end.unwrap_or(buffer.len());
        let content_length = parse_content_length(&buffer[..header_len]);
        let mut body_len = buffer.len().saturating_sub(header_len);
        while body_len < content_length {
            let read = stream.read(&mut chunk)?;
            if read == 0 {
                break;
            }
            body_len += read;
        }
        Ok(())
    }

    fn parse_content_length(headers: &[u8]) -> usize {
        let raw = String::from_utf8_lossy(headers);
        for line in raw.lines() {
            let mut parts = line.splitn(2, ':');
            let key = parts.next().unwrap_or_default().trim();
            if key.eq_ignore_ascii_case("content-length")
                && let Some(value) = parts.next()
                && let Ok(parsed) = value.trim().parse::<usize>()
            {
                return parsed;
            }
        }
        0
    }

    fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
        if needle.is_empty() || haystack.len() < needle.len() {
            return None;
        }
        haystack
            .windows(needle.len())
            .position(|window| window == needle)
    }
}
