//! Scan Advisor
//!
//! AI advisory pipeline for trading-scan chat. One chat turn runs through:
//! - intent classification and an optional model-backed plan
//! - context scoping and live account data for "my account" questions
//! - a preflight gate that refuses before any paid call when data is missing
//! - best-effort documentation and web retrieval
//! - prompt assembly, generation (sync or streamed) and answer validation
//!
//! PIPELINE:
//! CLASSIFY → PLAN → SCOPE → PREFLIGHT → RETRIEVE → PROMPT → GENERATE → VALIDATE

pub mod api;
pub mod cache;
pub mod classifier;
pub mod config;
pub mod error;
pub mod knowledge;
pub mod models;
pub mod pipeline;
pub mod planner;
pub mod preflight;
pub mod prompt;
pub mod provider;
pub mod request;
pub mod runtime;
pub mod scope;
pub mod stream;
pub mod text;
pub mod verification;

#[cfg(test)]
mod testing;

pub use error::{AdvisorError, Result};

// Re-export common types
pub use classifier::IntentClassifier;
pub use config::AdvisorConfig;
pub use models::*;
pub use pipeline::AdvisorPipeline;
pub use request::{ChatRequest, ChatTurn};
