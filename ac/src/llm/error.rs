//! LLM error types

use thiserror::Error;

/// Errors that can occur during LLM operations
///
/// The orchestrator never retries LLM calls; every call site has a
/// deterministic fallback instead, so no retryability classification is
/// carried here.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("API error {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
