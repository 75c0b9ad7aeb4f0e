//! Assistant Engine
//!
//! A conversational engine shared by several domain assistants:
//! - Persists sessions and an ordered message history per conversation
//! - Grounds each turn in documents retrieved from a vector index
//! - Prompts a language model and executes the tool directives it emits
//! - Keeps turns idempotent so a retried request never re-runs a tool
//!
//! TURN LOOP:
//! SESSION → HISTORY + RETRIEVAL → PROMPT → MODEL → DIRECTIVES → TOOLS → COMPOSE

pub mod api;
pub mod composer;
pub mod config;
pub mod domains;
pub mod engine;
pub mod error;
pub mod llm;
pub mod memory;
pub mod models;
pub mod prompt;
pub mod retrieval;
pub mod store;
pub mod tools;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{EngineError, Result};

// Re-export common types
pub use config::EngineConfig;
pub use engine::{ConversationEngine, EngineServices};
pub use models::*;
