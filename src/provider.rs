//! Provider Adapter (§4.4, C3): converts a backend's streamed response into a
//! lazy, finite sequence of [`ContentChunk`]s. `stream_completion` is the
//! primitive; `complete` drains it into a single assistant message.
//!
//! The trait is backend-agnostic (local OpenAI-compatible servers, per the
//! teacher's original LM Studio/Ollama/llama.cpp/vLLM scope); [`HttpProvider`]
//! is one concrete implementation speaking SSE over `reqwest`.

use std::pin::Pin;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use crate::channels::Scope;
use crate::error::{Error, Result};
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::types::{ChunkKind, ContentChunk, Message, Role, Usage};

pub type ChunkStream = BoxStream<'static, ContentChunk>;

/// A backend capable of streaming chat completions.
///
/// Contract (§4.4): the first chunk with nonempty content SHOULD carry a
/// role (not depended on by the parser); a final chunk with `finished: true`
/// signals the end of the sequence and no further reads occur; backend
/// errors are delivered as a terminal chunk with `error` set rather than
/// breaking the stream abstraction; cancellation via `scope` is cooperative
/// — the sequence simply stops yielding, possibly after already-produced
/// partial bytes.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    async fn stream_completion(&self, messages: &[Message], scope: Scope) -> Result<ChunkStream>;

    /// Full assistant message, implemented by draining `stream_completion`.
    async fn complete(&self, messages: &[Message], scope: Scope) -> Result<String> {
        let mut stream = self.stream_completion(messages, scope).await?;
        let mut text = String::new();
        while let Some(chunk) = stream.next().await {
            if let Some(err) = chunk.error {
                return Err(Error::stream(err));
            }
            if chunk.kind == ChunkKind::Message {
                text.push_str(&chunk.content);
            }
            if chunk.finished {
                break;
            }
        }
        Ok(text)
    }
}

// ============================================================================
// HTTP / SSE BACKED IMPLEMENTATION
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    delta: ChatDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ChatDelta {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
    total_tokens: u64,
}

/// An OpenAI-compatible chat completions endpoint, streamed over SSE.
/// Targets the same local-server family the rest of this crate's ambient
/// configuration assumes (LM Studio, Ollama, llama.cpp, vLLM).
pub struct HttpProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
    retry_policy: RetryPolicy,
}

impl HttpProvider {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            model: model.into(),
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    fn wire_role(role: Role) -> &'static str {
        match role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }

    async fn open_stream(
        &self,
        messages: &[Message],
    ) -> Result<Pin<Box<dyn futures::Stream<Item = std::result::Result<eventsource_stream::Event, eventsource_stream::EventStreamError<reqwest::Error>>> + Send>>>
    {
        let wire_messages: Vec<WireMessage> = messages
            .iter()
            .map(|m| WireMessage {
                role: Self::wire_role(m.role),
                content: &m.content,
            })
            .collect();
        let body = ChatRequest {
            model: &self.model,
            messages: wire_messages,
            stream: true,
        };

        let attempt = || async {
            let response = self
                .client
                .post(format!("{}/chat/completions", self.base_url))
                .json(&body)
                .send()
                .await?;
            let response = response.error_for_status()?;
            Ok::<_, reqwest::Error>(response)
        };

        let response = retry_with_backoff(
            &self.retry_policy,
            |err: &reqwest::Error| !err.is_status() || err.status().is_some_and(|s| s.is_server_error()),
            attempt,
        )
        .await?;

        Ok(Box::pin(response.bytes_stream().eventsource()))
    }
}

#[async_trait]
impl ProviderAdapter for HttpProvider {
    async fn stream_completion(&self, messages: &[Message], scope: Scope) -> Result<ChunkStream> {
        let sse = match self.open_stream(messages).await {
            Ok(sse) => sse,
            Err(err) => return Ok(stream::once(async move { ContentChunk::error(err.to_string()) }).boxed()),
        };

        let chunks = sse.take_while(move |_| {
            let cancelled = scope.is_cancelled();
            async move { !cancelled }
        });

        let mapped = chunks.filter_map(|event| async move {
            let event = match event {
                Ok(event) => event,
                Err(err) => return Some(ContentChunk::error(err.to_string())),
            };
            if event.data == "[DONE]" {
                return Some(ContentChunk::finish(None));
            }
            let parsed: ChatChunk = match serde_json::from_str(&event.data) {
                Ok(parsed) => parsed,
                Err(err) => return Some(ContentChunk::error(err.to_string())),
            };
            let choice = parsed.choices.into_iter().next()?;
            let finished = choice.finish_reason.is_some();
            let usage = parsed.usage.map(|u| Usage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            });
            let role = choice.delta.role.as_deref().and_then(|r| match r {
                "assistant" => Some(Role::Assistant),
                "system" => Some(Role::System),
                "user" => Some(Role::User),
                "tool" => Some(Role::Tool),
                _ => None,
            });
            if let Some(reasoning) = choice.delta.reasoning_content.filter(|s| !s.is_empty()) {
                return Some(ContentChunk {
                    content: reasoning,
                    role,
                    kind: ChunkKind::Thinking,
                    finished,
                    error: None,
                    usage,
                });
            }
            Some(ContentChunk {
                content: choice.delta.content.unwrap_or_default(),
                role,
                kind: ChunkKind::Message,
                finished,
                error: None,
                usage,
            })
        });

        Ok(mapped.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubProvider {
        chunks: Vec<ContentChunk>,
    }

    #[async_trait]
    impl ProviderAdapter for StubProvider {
        async fn stream_completion(&self, _messages: &[Message], _scope: Scope) -> Result<ChunkStream> {
            Ok(stream::iter(self.chunks.clone()).boxed())
        }
    }

    #[tokio::test]
    async fn complete_drains_the_stream_into_one_string() {
        let provider = StubProvider {
            chunks: vec![
                ContentChunk::delta("Hello, "),
                ContentChunk::delta("world"),
                ContentChunk::finish(None),
            ],
        };
        let text = provider.complete(&[], Scope::new()).await.unwrap();
        assert_eq!(text, "Hello, world");
    }

    #[tokio::test]
    async fn complete_surfaces_a_terminal_error_chunk() {
        let provider = StubProvider {
            chunks: vec![ContentChunk::error("backend unavailable")],
        };
        let err = provider.complete(&[], Scope::new()).await.unwrap_err();
        assert!(matches!(err, Error::Stream(_)));
    }

    #[tokio::test]
    async fn complete_stops_at_the_finished_chunk_even_with_trailing_items() {
        let provider = StubProvider {
            chunks: vec![
                ContentChunk::delta("keep"),
                ContentChunk::finish(None),
                ContentChunk::delta("dropped"),
            ],
        };
        let text = provider.complete(&[], Scope::new()).await.unwrap();
        assert_eq!(text, "keep");
    }
}
