//! Conversation state and the per-turn tool-call protocol.

pub mod engine;
pub mod message;
pub mod tools;
pub mod transcript;

pub use engine::ConversationEngine;
pub use message::{Message, Role, ToolCall};
pub use tools::{parse_query_arguments, query_notes_tool, render_tool_results, QUERY_NOTES_NAME};
pub use transcript::Transcript;
