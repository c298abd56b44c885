//! OpenAI-compatible chat-completion and embedding client.
//!
//! Speaks the `/models`, `/chat/completions` (plain and `stream: true` SSE) and
//! `/embeddings` endpoints with bearer auth.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{
    ChatCompletion, ChatProvider, DeltaStream, EmbeddingProvider, FinishReason, StreamDelta,
    ToolDefinition,
};
use crate::conversation::{Message, Role, ToolCall};
use crate::error::AppError;

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: &'a ToolDefinition,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    function: WireFunction,
}

fn function_kind() -> String {
    "function".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunction {
    #[serde(default)]
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(default)]
    function_call: Option<WireFunction>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<ChatDelta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallDelta>>,
    #[serde(default)]
    function_call: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

pub struct OpenAiClient {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
    chat_model: String,
    embedding_model: String,
}

impl OpenAiClient {
    pub fn new(
        http_client: reqwest::Client,
        base_url: &str,
        api_key: &str,
        chat_model: &str,
        embedding_model: &str,
    ) -> Self {
        Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            chat_model: chat_model.to_string(),
            embedding_model: embedding_model.to_string(),
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn embeddings_url(&self) -> String {
        format!("{}/embeddings", self.base_url)
    }

    fn models_url(&self) -> String {
        format!("{}/models", self.base_url)
    }

    fn to_wire_messages(messages: &[Message]) -> Vec<WireMessage> {
        messages
            .iter()
            .map(|m| {
                let tool_calls = m.tool_call.as_ref().map(|call| {
                    vec![WireToolCall {
                        id: Some(call.id.clone()),
                        kind: function_kind(),
                        function: WireFunction {
                            name: call.name.clone(),
                            arguments: call.arguments.clone(),
                        },
                    }]
                });
                // Tool-request turns usually have no text; the API wants null there.
                let content = if tool_calls.is_some() && m.content.is_empty() {
                    None
                } else {
                    Some(m.content.clone())
                };
                WireMessage {
                    role: m.role.as_str(),
                    content,
                    tool_calls,
                    tool_call_id: m.tool_call_id.clone(),
                    name: if m.role == Role::Tool { m.name.clone() } else { None },
                }
            })
            .collect()
    }

    fn build_request<'a>(
        &'a self,
        history: &[Message],
        tools: &'a [ToolDefinition],
        stream: bool,
    ) -> ChatCompletionRequest<'a> {
        ChatCompletionRequest {
            model: &self.chat_model,
            messages: Self::to_wire_messages(history),
            tools: tools
                .iter()
                .map(|function| WireTool { kind: "function", function })
                .collect(),
            stream,
        }
    }

    async fn post_completion(
        &self,
        request: &ChatCompletionRequest<'_>,
    ) -> Result<reqwest::Response, AppError> {
        let response = self
            .http_client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| AppError::ChatProvider(format!("chat request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ChatProvider(format!("chat backend returned {}: {}", status, body)));
        }
        Ok(response)
    }
}

pub(crate) fn generated_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}

fn into_completion(response: ChatCompletionResponse) -> Result<ChatCompletion, AppError> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| AppError::ChatProvider("no completion choices returned".to_string()))?;

    let mut calls = choice.message.tool_calls.unwrap_or_default().into_iter();
    let tool_call = match (calls.next(), choice.message.function_call) {
        (Some(call), _) => Some(ToolCall {
            id: call.id.unwrap_or_else(generated_call_id),
            name: call.function.name,
            arguments: call.function.arguments,
        }),
        (None, Some(legacy)) => Some(ToolCall {
            id: generated_call_id(),
            name: legacy.name,
            arguments: legacy.arguments,
        }),
        (None, None) => None,
    };
    if calls.next().is_some() {
        warn!("Model requested several tool calls in one turn; only the first is kept");
    }

    let content = choice.message.content.unwrap_or_default();
    let message = match tool_call {
        Some(call) => Message::assistant_tool_request(content, call),
        None => Message::assistant(content),
    };
    let finish_reason = choice
        .finish_reason
        .as_deref()
        .map(FinishReason::parse)
        .unwrap_or(FinishReason::Stop);

    Ok(ChatCompletion { message, finish_reason })
}

/// Payload of one SSE line: `None` for comments and blank lines.
#[derive(Debug, PartialEq)]
enum SseData<'a> {
    Done,
    Json(&'a str),
}

fn parse_sse_line(line: &str) -> Option<SseData<'_>> {
    let data = line.strip_prefix("data:")?.trim();
    if data.is_empty() {
        None
    } else if data == "[DONE]" {
        Some(SseData::Done)
    } else {
        Some(SseData::Json(data))
    }
}

fn chunk_to_deltas(chunk: StreamChunk) -> Vec<StreamDelta> {
    let mut deltas = Vec::new();
    let Some(choice) = chunk.choices.into_iter().next() else {
        return deltas;
    };

    if let Some(delta) = choice.delta {
        if let Some(content) = delta.content.filter(|c| !c.is_empty()) {
            deltas.push(StreamDelta::Content(content));
        }
        for call in delta.tool_calls.unwrap_or_default() {
            let (name, arguments) = match call.function {
                Some(f) => (f.name, f.arguments.unwrap_or_default()),
                None => (None, String::new()),
            };
            deltas.push(StreamDelta::ToolCall {
                index: call.index,
                id: call.id,
                name,
                arguments,
            });
        }
        if let Some(legacy) = delta.function_call {
            deltas.push(StreamDelta::ToolCall {
                index: 0,
                id: None,
                name: legacy.name,
                arguments: legacy.arguments.unwrap_or_default(),
            });
        }
    }

    if let Some(reason) = choice.finish_reason {
        deltas.push(StreamDelta::Finish(FinishReason::parse(&reason)));
    }
    deltas
}

#[async_trait]
impl ChatProvider for OpenAiClient {
    async fn list_models(&self) -> Result<(), AppError> {
        let response = self
            .http_client
            .get(self.models_url())
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| AppError::ChatProvider(format!("model listing failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::ChatProvider(format!(
                "model listing returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn complete(
        &self,
        history: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<ChatCompletion, AppError> {
        debug!("Chat completion over {} messages (non-streaming)", history.len());
        let request = self.build_request(history, tools, false);
        let response = self.post_completion(&request).await?;
        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| AppError::ChatProvider(format!("failed to parse chat response: {}", e)))?;
        into_completion(completion)
    }

    async fn complete_stream(
        &self,
        history: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<DeltaStream, AppError> {
        debug!("Chat completion over {} messages (streaming)", history.len());
        let request = self.build_request(history, tools, true);
        let response = self.post_completion(&request).await?;

        let byte_stream = response.bytes_stream();
        let delta_stream = async_stream::stream! {
            // Bytes, not text: a multi-byte character may straddle two chunks.
            let mut buffer: Vec<u8> = Vec::new();
            futures_util::pin_mut!(byte_stream);
            while let Some(chunk_result) = byte_stream.next().await {
                let chunk = match chunk_result {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(AppError::ChatProvider(format!("stream read error: {}", e)));
                        return;
                    }
                };
                buffer.extend_from_slice(&chunk);
                while let Some(newline_pos) = buffer.iter().position(|b| *b == b'\n') {
                    let raw: Vec<u8> = buffer.drain(..=newline_pos).collect();
                    let line = String::from_utf8_lossy(&raw).trim().to_string();
                    match parse_sse_line(&line) {
                        Some(SseData::Done) => return,
                        Some(SseData::Json(data)) => match serde_json::from_str::<StreamChunk>(data) {
                            Ok(parsed) => {
                                for delta in chunk_to_deltas(parsed) {
                                    yield Ok(delta);
                                }
                            }
                            Err(e) => {
                                yield Err(AppError::ChatProvider(format!("malformed stream chunk: {}", e)));
                                return;
                            }
                        },
                        None => {}
                    }
                }
            }
        };
        Ok(Box::pin(delta_stream))
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!("Generating embeddings for {} text(s)", texts.len());

        let request = EmbeddingRequest {
            model: &self.embedding_model,
            input: texts,
        };
        let response = self
            .http_client
            .post(self.embeddings_url())
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::VectorProvider(format!("embedding request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::VectorProvider(format!(
                "embedding endpoint returned {}: {}",
                status, body
            )));
        }

        let mut embedding_response: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| AppError::VectorProvider(format!("failed to parse embedding response: {}", e)))?;

        if embedding_response.data.len() != texts.len() {
            return Err(AppError::VectorProvider(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                embedding_response.data.len()
            )));
        }
        embedding_response.data.sort_by_key(|d| d.index);
        Ok(embedding_response.data.into_iter().map(|d| d.embedding).collect())
    }
}
