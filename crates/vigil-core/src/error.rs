//! Error types for vigil-core.

// ==============================================================================
// RPC Errors
// ==============================================================================

/// Structured errors from the Bitcoin Core JSON-RPC layer.
///
/// Each variant captures a specific failure mode rather than collapsing
/// everything into a single `String`, so callers can distinguish retryable
/// transport failures from logic errors (e.g. the reconciler retries the
/// snapshot on transport errors but skips individual backfill items on
/// server errors).
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("HTTP transport: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("JSON-RPC error: code={code}, message={message}")]
    ServerError { code: i64, message: String },

    #[error("invalid JSON-RPC response: {0}")]
    InvalidResponse(String),

    #[error("batch response missing item id={id}")]
    MissingBatchItem { id: u64 },
}

// ==============================================================================
// Core Errors
// ==============================================================================

/// Top-level error type for the vigil-core crate.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("transaction decode: {0}")]
    Decode(String),

    #[error("malformed notification payload: {0}")]
    BadNotification(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
