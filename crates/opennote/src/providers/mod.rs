//! External AI and vector-index providers.
//!
//! The session core only sees the three traits below. [`HttpProviderFactory`]
//! binds them to an OpenAI-compatible API and a Pinecone index using a
//! user's credentials.

pub mod openai;
pub mod pinecone;

pub use openai::OpenAiClient;
pub use pinecone::PineconeIndexClient;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::conversation::Message;
use crate::error::AppError;
use crate::profile::UserCredentials;

/// Function tool exposed to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Length,
    ContentFilter,
    Other(String),
}

impl FinishReason {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "stop" => FinishReason::Stop,
            // Legacy function-calling models report `function_call`.
            "tool_calls" | "function_call" => FinishReason::ToolCalls,
            "length" => FinishReason::Length,
            "content_filter" => FinishReason::ContentFilter,
            other => FinishReason::Other(other.to_string()),
        }
    }
}

/// A finished, non-streamed model turn.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatCompletion {
    /// Always an assistant message; carries the tool call when one was requested.
    pub message: Message,
    pub finish_reason: FinishReason,
}

/// Incremental piece of a streamed model turn.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamDelta {
    Content(String),
    /// Tool-call fragment. `id` and `name` usually arrive only on the first
    /// fragment of a call; `arguments` must be concatenated across fragments.
    ToolCall {
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments: String,
    },
    Finish(FinishReason),
}

pub type DeltaStream = BoxStream<'static, Result<StreamDelta, AppError>>;

#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Cheapest authenticated read; used only for credential validation.
    async fn list_models(&self) -> Result<(), AppError>;

    async fn complete(
        &self,
        history: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<ChatCompletion, AppError>;

    async fn complete_stream(
        &self,
        history: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<DeltaStream, AppError>;
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// One vector per input, in input order, from a single batched call.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AppError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorMatch {
    pub id: String,
    pub score: f32,
    pub metadata: Option<serde_json::Map<String, Value>>,
}

impl VectorMatch {
    /// The `content` metadata string, if the match carries one.
    pub fn content(&self) -> Option<&str> {
        self.metadata.as_ref()?.get("content")?.as_str()
    }
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Cheapest authenticated read; used only for credential validation.
    async fn describe_stats(&self) -> Result<(), AppError>;

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        include_metadata: bool,
    ) -> Result<Vec<VectorMatch>, AppError>;
}

/// Provider clients bound to one user's credentials.
#[derive(Clone)]
pub struct ProviderClients {
    pub chat: Arc<dyn ChatProvider>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub index: Arc<dyn VectorIndex>,
}

impl std::fmt::Debug for ProviderClients {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderClients").finish_non_exhaustive()
    }
}

/// Builds provider clients from credentials. Building never performs I/O.
pub trait ProviderFactory: Send + Sync {
    fn build(&self, credentials: &UserCredentials) -> Result<ProviderClients, AppError>;
}

#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub openai_base_url: String,
    pub chat_model: String,
    pub embedding_model: String,
    pub pinecone_host_template: String,
    pub timeout: Duration,
}

impl ProviderSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            openai_base_url: config.openai_base_url.clone(),
            chat_model: config.chat_model.clone(),
            embedding_model: config.embedding_model.clone(),
            pinecone_host_template: config.pinecone_host_template.clone(),
            timeout: config.provider_timeout(),
        }
    }
}

/// Production factory: OpenAI-compatible chat and embeddings, Pinecone index.
pub struct HttpProviderFactory {
    settings: ProviderSettings,
    http_client: reqwest::Client,
}

impl HttpProviderFactory {
    pub fn new(settings: ProviderSettings) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .unwrap_or_default();
        Self { settings, http_client }
    }
}

impl ProviderFactory for HttpProviderFactory {
    fn build(&self, credentials: &UserCredentials) -> Result<ProviderClients, AppError> {
        let openai = Arc::new(OpenAiClient::new(
            self.http_client.clone(),
            &self.settings.openai_base_url,
            &credentials.open_ai_api_key,
            &self.settings.chat_model,
            &self.settings.embedding_model,
        ));
        let host = pinecone::index_host(
            &self.settings.pinecone_host_template,
            &credentials.pinecone_index,
            &credentials.pinecone_project_name,
            &credentials.pinecone_environment,
        );
        let index = Arc::new(PineconeIndexClient::new(
            self.http_client.clone(),
            host,
            &credentials.pinecone_api_key,
        ));

        Ok(ProviderClients {
            chat: openai.clone(),
            embedder: openai,
            index,
        })
    }
}
