//! Scripted provider fakes for unit tests.
//!
//! The embedder encodes each query's bytes as the vector, and the index decodes
//! them back, so a search can be routed to per-query notes without shared state.

use async_trait::async_trait;
use futures::StreamExt;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::conversation::{Message, ToolCall};
use crate::error::AppError;
use crate::profile::UserCredentials;
use crate::providers::{
    ChatCompletion, ChatProvider, DeltaStream, EmbeddingProvider, FinishReason, ProviderClients,
    ProviderFactory, StreamDelta, ToolDefinition, VectorIndex, VectorMatch,
};

pub fn final_reply(text: &str) -> ChatCompletion {
    ChatCompletion {
        message: Message::assistant(text),
        finish_reason: FinishReason::Stop,
    }
}

pub fn tool_request(id: &str, arguments: &str) -> ChatCompletion {
    ChatCompletion {
        message: Message::assistant_tool_request(
            "",
            ToolCall {
                id: id.to_string(),
                name: "query_notes".to_string(),
                arguments: arguments.to_string(),
            },
        ),
        finish_reason: FinishReason::ToolCalls,
    }
}

#[derive(Default)]
pub struct FakeChat {
    reject_key: bool,
    list_models_calls: AtomicUsize,
    completions: Mutex<VecDeque<Result<ChatCompletion, String>>>,
    streams: Mutex<VecDeque<Vec<Result<StreamDelta, String>>>>,
    histories: Mutex<Vec<Vec<Message>>>,
}

impl FakeChat {
    pub fn push_completion(&self, completion: ChatCompletion) {
        self.completions.lock().unwrap().push_back(Ok(completion));
    }

    pub fn push_failure(&self, message: &str) {
        self.completions.lock().unwrap().push_back(Err(message.to_string()));
    }

    pub fn push_stream(&self, deltas: Vec<StreamDelta>) {
        self.streams
            .lock()
            .unwrap()
            .push_back(deltas.into_iter().map(Ok).collect());
    }

    pub fn push_broken_stream(&self, deltas: Vec<StreamDelta>, error: &str) {
        let mut items: Vec<Result<StreamDelta, String>> = deltas.into_iter().map(Ok).collect();
        items.push(Err(error.to_string()));
        self.streams.lock().unwrap().push_back(items);
    }

    /// Every history sent to `complete` or `complete_stream`, in call order.
    pub fn histories(&self) -> Vec<Vec<Message>> {
        self.histories.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.histories.lock().unwrap().len()
    }

    pub fn list_models_calls(&self) -> usize {
        self.list_models_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatProvider for FakeChat {
    async fn list_models(&self) -> Result<(), AppError> {
        self.list_models_calls.fetch_add(1, Ordering::SeqCst);
        if self.reject_key {
            return Err(AppError::ChatProvider("401 invalid api key".to_string()));
        }
        Ok(())
    }

    async fn complete(&self, history: &[Message], _tools: &[ToolDefinition]) -> Result<ChatCompletion, AppError> {
        self.histories.lock().unwrap().push(history.to_vec());
        match self.completions.lock().unwrap().pop_front() {
            Some(Ok(completion)) => Ok(completion),
            Some(Err(message)) => Err(AppError::ChatProvider(message)),
            None => Err(AppError::ChatProvider("no scripted completion".to_string())),
        }
    }

    async fn complete_stream(&self, history: &[Message], _tools: &[ToolDefinition]) -> Result<DeltaStream, AppError> {
        self.histories.lock().unwrap().push(history.to_vec());
        let items = self
            .streams
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| AppError::ChatProvider("no scripted stream".to_string()))?;
        Ok(futures::stream::iter(items.into_iter().map(|item| item.map_err(AppError::ChatProvider))).boxed())
    }
}

#[derive(Clone, Default)]
pub struct FakeEmbedder {
    fail: bool,
    calls: Arc<AtomicUsize>,
}

impl FakeEmbedder {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for FakeEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(AppError::VectorProvider("embedding quota exceeded".to_string()));
        }
        Ok(texts
            .iter()
            .map(|text| text.bytes().map(f32::from).collect())
            .collect())
    }
}

fn decode_query(vector: &[f32]) -> String {
    vector.iter().map(|v| *v as u8 as char).collect()
}

#[derive(Clone, Default)]
pub struct FakeIndex {
    reject_key: bool,
    notes: HashMap<String, Vec<VectorMatch>>,
    failing: HashSet<String>,
    describe_calls: Arc<AtomicUsize>,
    query_calls: Arc<AtomicUsize>,
    last_top_k: Arc<Mutex<Option<usize>>>,
}

impl FakeIndex {
    pub fn with_notes(mut self, query: &str, contents: &[&str]) -> Self {
        let matches = self.notes.entry(query.to_string()).or_default();
        for content in contents {
            let mut metadata = serde_json::Map::new();
            metadata.insert("content".to_string(), serde_json::Value::String(content.to_string()));
            matches.push(VectorMatch {
                id: format!("{}-{}", query, matches.len()),
                score: 1.0,
                metadata: Some(metadata),
            });
        }
        self
    }

    pub fn with_bare_match(mut self, query: &str) -> Self {
        let matches = self.notes.entry(query.to_string()).or_default();
        matches.push(VectorMatch {
            id: format!("{}-bare", query),
            score: 0.5,
            metadata: None,
        });
        self
    }

    pub fn failing_for(mut self, query: &str) -> Self {
        self.failing.insert(query.to_string());
        self
    }

    pub fn describe_calls(&self) -> usize {
        self.describe_calls.load(Ordering::SeqCst)
    }

    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }

    pub fn last_top_k(&self) -> Option<usize> {
        *self.last_top_k.lock().unwrap()
    }
}

#[async_trait]
impl VectorIndex for FakeIndex {
    async fn describe_stats(&self) -> Result<(), AppError> {
        self.describe_calls.fetch_add(1, Ordering::SeqCst);
        if self.reject_key {
            return Err(AppError::VectorProvider("403 forbidden".to_string()));
        }
        Ok(())
    }

    async fn query(&self, vector: &[f32], top_k: usize, _include_metadata: bool) -> Result<Vec<VectorMatch>, AppError> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_top_k.lock().unwrap() = Some(top_k);
        let query = decode_query(vector);
        if self.failing.contains(&query) {
            return Err(AppError::VectorProvider(format!("search failed for {}", query)));
        }
        Ok(self
            .notes
            .get(&query)
            .map(|matches| matches.iter().take(top_k).cloned().collect())
            .unwrap_or_default())
    }
}

/// Which validation checks the fake providers pass.
#[derive(Debug, Clone)]
pub struct ProviderScript {
    pub chat_key_valid: bool,
    pub index_key_valid: bool,
}

impl Default for ProviderScript {
    fn default() -> Self {
        Self {
            chat_key_valid: true,
            index_key_valid: true,
        }
    }
}

/// Hands out the same fakes on every build so tests can script and inspect them.
pub struct FakeProviderFactory {
    chat: Arc<FakeChat>,
    embedder: FakeEmbedder,
    index: FakeIndex,
    builds: AtomicUsize,
}

impl FakeProviderFactory {
    pub fn new(script: ProviderScript) -> Self {
        Self {
            chat: Arc::new(FakeChat {
                reject_key: !script.chat_key_valid,
                ..Default::default()
            }),
            embedder: FakeEmbedder::default(),
            index: FakeIndex {
                reject_key: !script.index_key_valid,
                ..Default::default()
            },
            builds: AtomicUsize::new(0),
        }
    }

    pub fn with_index(mut self, index: FakeIndex) -> Self {
        let reject_key = self.index.reject_key;
        self.index = FakeIndex { reject_key, ..index };
        self
    }

    pub fn chat(&self) -> Arc<FakeChat> {
        self.chat.clone()
    }

    pub fn embedder(&self) -> FakeEmbedder {
        self.embedder.clone()
    }

    pub fn index(&self) -> FakeIndex {
        self.index.clone()
    }

    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

impl ProviderFactory for FakeProviderFactory {
    fn build(&self, _credentials: &UserCredentials) -> Result<ProviderClients, AppError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(ProviderClients {
            chat: self.chat.clone(),
            embedder: Arc::new(self.embedder.clone()),
            index: Arc::new(self.index.clone()),
        })
    }
}

/// Credentials that pass request validation, with the given top-K.
pub fn credentials(uid: &str, top_k: i64) -> UserCredentials {
    UserCredentials {
        open_ai_api_key: "sk-test".to_string(),
        pinecone_api_key: "pc-test".to_string(),
        pinecone_index: "notes".to_string(),
        pinecone_environment: "us-west1-gcp".to_string(),
        pinecone_project_name: "abc123".to_string(),
        top_k,
        ..UserCredentials::empty(uid)
    }
}
