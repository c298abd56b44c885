//! One user turn against a session.
//!
//! A turn runs `AwaitingModel -> (tool requested -> AwaitingToolResult ->
//! AwaitingModel) -> Done`. At most one tool round-trip happens per turn; a
//! tool request in the model's second answer is dropped and the answer is
//! recorded as plain text.
//!
//! A failed provider call ends the turn with an error. Messages already
//! appended stay in the transcript.

use async_stream::stream;
use futures::{Stream, StreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::message::{Message, ToolCall};
use super::tools::{parse_query_arguments, query_notes_tool, render_tool_results, QUERY_NOTES_NAME};
use crate::error::AppError;
use crate::metrics;
use crate::providers::openai::generated_call_id;
use crate::providers::{FinishReason, StreamDelta, ToolDefinition};
use crate::retrieval::NoteRetriever;
use crate::session::Session;

pub struct ConversationEngine {
    session: Arc<Session>,
    tools: Vec<ToolDefinition>,
}

impl ConversationEngine {
    pub fn new(session: Arc<Session>) -> Self {
        Self {
            session,
            tools: vec![query_notes_tool()],
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Runs a full turn and returns the assistant's final text.
    pub async fn message(&self, text: &str) -> Result<String, AppError> {
        self.session.touch();
        let history = self.append_user(text).await;
        let chat = &self.session.clients().chat;

        let completion = chat.complete(&history, &self.tools).await?;
        let answer = match completion.message.tool_call.clone() {
            Some(call) => {
                let history = self.answer_tool_call(completion.message, call).await?;
                chat.complete(&history, &self.tools).await?.message
            }
            None => completion.message,
        };

        Ok(self.record_answer(answer).await)
    }

    /// Streaming turn. Text fragments are yielded as the model produces them;
    /// the accumulated answer is appended to the transcript when the model's
    /// final stream ends.
    pub fn message_stream(self, text: String) -> impl Stream<Item = Result<String, AppError>> + Send + 'static {
        let engine = self;
        stream! {
            engine.session.touch();
            let mut history = engine.append_user(&text).await;
            let chat = engine.session.clients().chat.clone();
            let mut tool_round_done = false;

            loop {
                let mut deltas = match chat.complete_stream(&history, &engine.tools).await {
                    Ok(deltas) => deltas,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };

                let mut pending = PendingAnswer::default();
                while let Some(item) = deltas.next().await {
                    match item {
                        Ok(StreamDelta::Content(fragment)) => {
                            pending.text.push_str(&fragment);
                            yield Ok(fragment);
                        }
                        Ok(delta) => pending.absorb(delta),
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }

                match pending.requested_call() {
                    Some(call) if !tool_round_done => {
                        tool_round_done = true;
                        let request = Message::assistant_tool_request(pending.text, call.clone());
                        match engine.answer_tool_call(request, call).await {
                            Ok(updated) => history = updated,
                            Err(e) => {
                                yield Err(e);
                                return;
                            }
                        }
                    }
                    _ => {
                        engine.record_answer(Message::assistant(pending.text)).await;
                        return;
                    }
                }
            }
        }
    }

    async fn append_user(&self, text: &str) -> Vec<Message> {
        let mut transcript = self.session.transcript().lock().await;
        transcript.push(Message::user(text));
        transcript.snapshot()
    }

    /// Runs the retriever for `call`, records the request/result pair and
    /// returns the history for the follow-up model call.
    async fn answer_tool_call(&self, request: Message, call: ToolCall) -> Result<Vec<Message>, AppError> {
        let queries = if call.name == QUERY_NOTES_NAME {
            parse_query_arguments(&call.arguments)
        } else {
            warn!(user = %self.session.identity(), "Model requested unknown tool {}", call.name);
            Vec::new()
        };
        let top_k = self.session.top_k().await;
        metrics::inc_tool_calls();
        info!(user = %self.session.identity(), "Querying notes for {} queries", queries.len());

        let clients = self.session.clients();
        let retriever = NoteRetriever::new(clients.embedder.clone(), clients.index.clone());
        let results = retriever.retrieve(&queries, top_k).await?;
        let content = render_tool_results(&results)?;

        let mut transcript = self.session.transcript().lock().await;
        transcript.push_unit(vec![request, Message::tool_result(&call, content)]);
        Ok(transcript.snapshot())
    }

    async fn record_answer(&self, mut answer: Message) -> String {
        if let Some(call) = answer.tool_call.take() {
            warn!(
                user = %self.session.identity(),
                "Ignoring follow-up tool request {} after the tool round-trip",
                call.name
            );
        }
        let reply = answer.content.clone();
        self.session.transcript().lock().await.push(answer);
        debug!(user = %self.session.identity(), "Turn finished ({} chars)", reply.chars().count());
        reply
    }
}

#[derive(Debug, Default)]
struct PartialCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

/// A streamed answer being reassembled from deltas.
#[derive(Debug, Default)]
struct PendingAnswer {
    text: String,
    calls: BTreeMap<usize, PartialCall>,
    finish: Option<FinishReason>,
}

impl PendingAnswer {
    fn absorb(&mut self, delta: StreamDelta) {
        match delta {
            StreamDelta::Content(fragment) => self.text.push_str(&fragment),
            StreamDelta::ToolCall {
                index,
                id,
                name,
                arguments,
            } => {
                let call = self.calls.entry(index).or_default();
                if id.is_some() {
                    call.id = id;
                }
                if let Some(name) = name {
                    call.name = name;
                }
                call.arguments.push_str(&arguments);
            }
            StreamDelta::Finish(reason) => self.finish = Some(reason),
        }
    }

    /// The first assembled call, but only if the model finished asking for it.
    fn requested_call(&self) -> Option<ToolCall> {
        if self.finish != Some(FinishReason::ToolCalls) {
            return None;
        }
        let (_, call) = self.calls.iter().next()?;
        Some(ToolCall {
            id: call.id.clone().unwrap_or_else(generated_call_id),
            name: call.name.clone(),
            arguments: call.arguments.clone(),
        })
    }
}
