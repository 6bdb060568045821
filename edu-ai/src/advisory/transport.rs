// LLM Transport
//
// Concept: Open one streamed completion and hand back the raw byte stream
// Synchronization: The session read loop polls the stream; decoding happens
// in ChunkDecoder, never here
//
// Rate limiting: governor token bucket, requests_per_minute from config.
// The session waits for a permit before connecting.

use crate::advisory::types::{AdvisoryError, AdvisoryResult};
use async_trait::async_trait;
use bytes::Bytes;
use edu_common::config::LlmConfig;
use futures::stream::BoxStream;
use futures::StreamExt;
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde::Serialize;
use std::collections::VecDeque;
use std::num::NonZeroU32;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Raw transport chunks; an `Err` item is a mid-stream transport failure
pub type ByteStream = BoxStream<'static, AdvisoryResult<Bytes>>;

/// Prompt pair for one completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
}

#[async_trait]
pub trait LlmTransport: Send + Sync {
    /// Connect and start streaming
    ///
    /// # Errors
    /// `Transport` when the connection is refused or the backend answers
    /// with a non-success status.
    async fn open(&self, request: &CompletionRequest) -> AdvisoryResult<ByteStream>;
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    stream: bool,
    messages: [ChatMessage<'a>; 2],
}

type DirectLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Chat-completions style HTTP backend
pub struct HttpLlmTransport {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    rate_limiter: DirectLimiter,
}

impl HttpLlmTransport {
    pub fn new(config: &LlmConfig, api_key: Option<String>) -> AdvisoryResult<Self> {
        // No overall timeout: a stream legitimately stays open for a long time
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()?;

        let per_minute = NonZeroU32::new(config.requests_per_minute).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = RateLimiter::direct(Quota::per_minute(per_minute));

        if api_key.is_none() {
            warn!("No LLM API key configured; backend requests will be unauthenticated");
        }

        info!(
            endpoint = %config.endpoint,
            model = %config.model,
            requests_per_minute = per_minute.get(),
            "LLM transport configured"
        );

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key,
            rate_limiter,
        })
    }
}

#[async_trait]
impl LlmTransport for HttpLlmTransport {
    async fn open(&self, request: &CompletionRequest) -> AdvisoryResult<ByteStream> {
        self.rate_limiter.until_ready().await;

        let body = ChatRequest {
            model: &self.model,
            stream: true,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user,
                },
            ],
        };

        debug!(endpoint = %self.endpoint, model = %self.model, "Opening completion stream");

        let mut builder = self
            .client
            .post(&self.endpoint)
            .header("Accept", "text/event-stream")
            .json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| AdvisoryError::Transport(format!("LLM request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(AdvisoryError::Transport(format!(
                "LLM backend returned {}: {}",
                status,
                detail.chars().take(200).collect::<String>()
            )));
        }

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(AdvisoryError::from))
            .boxed())
    }
}

// ============================================================================
// Scripted transport (offline runs and tests)
// ============================================================================

/// One step of a scripted response
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Chunk(Bytes),
    Pause(Duration),
    /// Mid-stream transport failure; ends the stream
    Fail(String),
    /// Never yields again (until the reader gives up)
    Hang,
}

/// Replays canned byte streams, one script per `open`
///
/// The last script is reused once the queue runs dry.
pub struct ScriptedTransport {
    scripts: Mutex<VecDeque<Vec<ScriptStep>>>,
    last: Mutex<Option<Vec<ScriptStep>>>,
    connect_error: Option<String>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedTransport {
    pub fn new(scripts: Vec<Vec<ScriptStep>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            last: Mutex::new(None),
            connect_error: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Stream `pieces` as chat-completion deltas followed by the sentinel
    pub fn from_deltas(pieces: &[&str]) -> Self {
        Self::new(vec![delta_script(pieces)])
    }

    /// Every `open` fails to connect
    pub fn refusing(message: impl Into<String>) -> Self {
        Self {
            connect_error: Some(message.into()),
            ..Self::new(Vec::new())
        }
    }

    /// Requests received so far
    pub async fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().await.clone()
    }
}

/// Frame `pieces` as `data:` delta lines plus the `[DONE]` sentinel
pub fn delta_script(pieces: &[&str]) -> Vec<ScriptStep> {
    pieces
        .iter()
        .map(|piece| {
            let payload = serde_json::json!({ "choices": [{ "delta": { "content": piece } }] });
            ScriptStep::Chunk(Bytes::from(format!("data: {}\n\n", payload)))
        })
        .chain(std::iter::once(ScriptStep::Chunk(Bytes::from_static(
            b"data: [DONE]\n\n",
        ))))
        .collect()
}

#[async_trait]
impl LlmTransport for ScriptedTransport {
    async fn open(&self, request: &CompletionRequest) -> AdvisoryResult<ByteStream> {
        self.requests.lock().await.push(request.clone());

        if let Some(message) = &self.connect_error {
            return Err(AdvisoryError::Transport(message.clone()));
        }

        let script = {
            let mut last = self.last.lock().await;
            match self.scripts.lock().await.pop_front() {
                Some(script) => {
                    *last = Some(script.clone());
                    script
                }
                None => last.clone().unwrap_or_default(),
            }
        };

        let stream = async_stream::stream! {
            for step in script {
                match step {
                    ScriptStep::Chunk(bytes) => yield Ok(bytes),
                    ScriptStep::Pause(delay) => tokio::time::sleep(delay).await,
                    ScriptStep::Fail(message) => {
                        yield Err(AdvisoryError::Transport(message));
                        return;
                    }
                    ScriptStep::Hang => futures::future::pending::<()>().await,
                }
            }
        };

        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> CompletionRequest {
        CompletionRequest {
            system: "sys".into(),
            user: "usr".into(),
        }
    }

    #[tokio::test]
    async fn test_scripted_replays_chunks_in_order() {
        let transport = ScriptedTransport::from_deltas(&["a", "b"]);
        let chunks: Vec<_> = transport.open(&request()).await.unwrap().collect().await;

        assert_eq!(chunks.len(), 3);
        let last = chunks[2].as_ref().unwrap();
        assert_eq!(&last[..], b"data: [DONE]\n\n");
        assert_eq!(transport.requests().await, vec![request()]);
    }

    #[tokio::test]
    async fn test_scripted_failure_ends_stream() {
        let transport = ScriptedTransport::new(vec![vec![
            ScriptStep::Chunk(Bytes::from_static(b"data: \"x\"\n")),
            ScriptStep::Fail("reset".into()),
            ScriptStep::Chunk(Bytes::from_static(b"never")),
        ]]);
        let chunks: Vec<_> = transport.open(&request()).await.unwrap().collect().await;

        assert_eq!(chunks.len(), 2);
        assert!(matches!(chunks[1], Err(AdvisoryError::Transport(_))));
    }

    #[tokio::test]
    async fn test_scripts_consumed_then_last_reused() {
        let transport = ScriptedTransport::new(vec![delta_script(&["one"]), delta_script(&["two", "three"])]);
        let mut counts = Vec::new();
        for _ in 0..3 {
            counts.push(transport.open(&request()).await.unwrap().count().await);
        }
        assert_eq!(counts, vec![2, 3, 3]);
    }

    #[tokio::test]
    async fn test_refusing_transport() {
        let transport = ScriptedTransport::refusing("connection refused");
        assert!(matches!(
            transport.open(&request()).await,
            Err(AdvisoryError::Transport(_))
        ));
    }

    #[test]
    fn test_http_transport_builds_from_config() {
        let config = LlmConfig {
            requests_per_minute: 0,
            ..Default::default()
        };
        assert!(HttpLlmTransport::new(&config, None).is_ok());
    }
}
