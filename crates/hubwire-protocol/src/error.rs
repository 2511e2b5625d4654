//! Error types for the protocol layer.
//!
//! Every failure the codec can report maps to one variant here. None of
//! them is fatal to a connection: the connection driver logs the error,
//! drops the offending frame or invocation, and keeps reading.

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a message projection into bytes).
    #[error("encode failed: {0}")]
    Encode(#[source] serde_json::Error),

    /// A frame's payload is not well-formed for the wire format.
    ///
    /// Only that frame is lost; the frames after it in the same buffer
    /// are still decoded.
    #[error("decode failed: {0}")]
    Decode(#[source] serde_json::Error),

    /// The byte stream could not be split into frames.
    ///
    /// Raised for a non-empty buffer with no record separator at all, or
    /// when the incremental reader has buffered more unterminated bytes
    /// than it is allowed to.
    #[error("framing error: {0}")]
    Framing(String),

    /// A target declares more parameters than the invocation supplied.
    #[error(
        "argument count mismatch: {expected} parameter(s) declared, {actual} argument(s) supplied"
    )]
    ArgumentCountMismatch {
        /// Number of declared parameter types.
        expected: usize,
        /// Number of arguments on the wire.
        actual: usize,
    },

    /// An argument could not be converted to its declared type.
    #[error("cannot convert argument to {target}: {reason}")]
    Coercion {
        /// Human-readable name of the declared type.
        target: String,
        /// What went wrong.
        reason: String,
    },

    /// The frame decoded, but violates protocol rules — e.g. a Completion
    /// without an invocation id.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

impl ProtocolError {
    pub(crate) fn coercion(
        target: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        Self::Coercion {
            target: target.to_string(),
            reason: reason.into(),
        }
    }
}
