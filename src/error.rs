//! Error types for the advisory pipeline

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, AdvisorError>;

#[derive(Error, Debug)]
pub enum AdvisorError {

    // =============================
    // Request Errors
    // =============================

    #[error("Invalid request: {0}")]
    Validation(String),

    // =============================
    // Upstream Errors
    // =============================

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Provider returned {status}: {body}")]
    ProviderStatus { status: u16, body: String },

    #[error("Planner error: {0}")]
    Planner(String),

    #[error("Documentation error: {0}")]
    Documentation(String),

    #[error("Web search error: {0}")]
    WebSearch(String),

    #[error("Account data error: {0}")]
    Account(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Timed out after {0}s")]
    Timeout(u64),

    #[error("Client disconnected")]
    Cancelled,

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AdvisorError {
    /// True for failures caused by a dependency rather than the caller
    pub fn is_upstream(&self) -> bool {
        !matches!(self, AdvisorError::Validation(_) | AdvisorError::Cancelled)
    }
}

/// Clip an upstream response body so it can be embedded in an error message
pub(crate) fn clip_body(body: &str) -> String {
    const LIMIT: usize = 300;
    let trimmed = body.trim();
    if trimmed.chars().count() <= LIMIT {
        return trimmed.to_string();
    }
    let mut clipped: String = trimmed.chars().take(LIMIT).collect();
    clipped.push('…');
    clipped
}
