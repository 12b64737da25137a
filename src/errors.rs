//! Error taxonomy
//!
//! `ConfigError` and the first RPC handshake's `ChainError::Read` are the
//! only fatal errors (they abort startup); everything else is caught at the
//! tick boundary or recovered locally.

use thiserror::Error;

/// Missing or malformed required configuration. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingRequired(String),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: String, reason: String },
}

/// Errors raised by the Chain Gateway.
///
/// Non-essential reads have no soft-error variant here by design: they
/// degrade silently to a default value at the call site rather than
/// constructing an error at all.
#[derive(Debug, Error)]
pub enum ChainError {
    /// An essential read failed (node unreachable, or the contract reverted
    /// on a field the tick cannot proceed without). Aborts the current tick.
    #[error("rpc read failed: {0}")]
    Read(String),

    /// A mutating call reverted on-chain. The substring `"Already paused"`
    /// is coerced by the Actor into a success-equivalent sentinel before
    /// this variant would otherwise propagate.
    #[error("transaction {tx_hash} reverted: {reason}")]
    Reverted { tx_hash: String, reason: String },

    /// A transaction receipt was not observed within the 120s bound.
    #[error("transaction {tx_hash} receipt timed out after {timeout_secs}s")]
    Timeout { tx_hash: String, timeout_secs: u64 },

    /// Transport/signing failure before a transaction reached the mempool.
    #[error("transaction submission failed: {0}")]
    Submission(String),
}

/// Errors internal to the Reasoner's LLM client.
///
/// This type never escapes `Reasoner::analyze` — every branch that would
/// otherwise construct one is instead converted to a safe-default
/// `ThreatAssessment` (NATURAL, confidence 0.0). It exists so the parse vs.
/// provider failure paths stay distinguishable in logs and tests.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM provider returned an empty response")]
    EmptyResponse,

    #[error("LLM response was not valid JSON: {0}")]
    InvalidJson(String),

    #[error("LLM response missing required field: {0}")]
    MissingField(String),

    #[error("LLM provider request failed: {0}")]
    Provider(String),
}
