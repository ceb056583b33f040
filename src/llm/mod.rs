//! LLM completion plumbing: client trait, model tiers, response parsing,
//! and token budgeting.

pub mod client;
pub mod models;
pub mod parse;
pub mod tokens;

pub use client::{CompletionClient, OpenRouterClient};
pub use models::{ChatMessage, Model, Role};
