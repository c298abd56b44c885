//! Session backend that lets a chat model answer from a user's indexed notes.

pub mod api;
pub mod config;
pub mod conversation;
pub mod error;
pub mod metrics;
pub mod profile;
pub mod providers;
pub mod retrieval;
pub mod server;
pub mod session;
pub mod shared_state;
pub mod telemetry;
pub mod validation;

#[cfg(test)]
pub(crate) mod testing;

// Public API exports
pub use config::{Config, SessionSettings};
pub use conversation::{ConversationEngine, Message, Role, ToolCall};
pub use error::{AppError, CredentialFailure, ErrorKind};
pub use profile::{ProfileStore, UserCredentials};
pub use retrieval::{NoteRetriever, QueryResult};
pub use server::{build_router, run_server};
pub use session::{Session, SessionStore};
pub use shared_state::AppState;
pub use validation::CredentialValidator;
