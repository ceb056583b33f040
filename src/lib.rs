//! Scriptsmith library crate
//!
//! Turns a free-text feature request into a TypeScript snippet for a host
//! application's scripting surface, then iteratively repairs the snippet
//! using a real static analyzer instead of trusting the model's first
//! answer. The CLI in `main.rs` is a thin driver over these modules.

pub mod analyzer;
pub mod config;
pub mod corpus;
pub mod correct;
pub mod generate;
pub mod llm;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod telemetry;
