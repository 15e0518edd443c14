//! Protocol error type for OpenFlow encoding and decoding.

use thiserror::Error;

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtoError>;

/// Errors raised while decoding inbound frames or parsing textual specs.
///
/// Decode failures are never fatal to the agent; callers log them
/// (rate-limited) and drop the offending frame.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// A frame or structure was shorter than its fixed parts require.
    #[error("truncated {what}: need {need} bytes, have {have}")]
    Truncated {
        /// What was being decoded.
        what: &'static str,
        /// Bytes required.
        need: usize,
        /// Bytes available.
        have: usize,
    },

    /// The OpenFlow header carried an unsupported version.
    #[error("unsupported OpenFlow version {0:#04x}")]
    BadVersion(u8),

    /// The OpenFlow header carried a message type this agent does not know.
    #[error("unknown OpenFlow message type {0}")]
    UnknownType(u8),

    /// A length field was inconsistent with the surrounding structure.
    #[error("bad length {len} in {what}")]
    BadLength {
        /// Structure whose length field was bad.
        what: &'static str,
        /// The offending length value.
        len: usize,
    },

    /// A structurally invalid message body.
    #[error("malformed {what}: {detail}")]
    Malformed {
        /// What was being decoded.
        what: &'static str,
        /// Why it failed.
        detail: String,
    },

    /// A textual group specification could not be parsed.
    #[error("bad group spec '{spec}': {detail}")]
    GroupSpec {
        /// The spec as supplied by the producer.
        spec: String,
        /// Why it failed.
        detail: String,
    },
}

impl ProtoError {
    /// Creates a malformed-message error.
    pub fn malformed(what: &'static str, detail: impl Into<String>) -> Self {
        Self::Malformed {
            what,
            detail: detail.into(),
        }
    }

    /// Creates a group-spec parse error.
    pub fn group_spec(spec: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::GroupSpec {
            spec: spec.into(),
            detail: detail.into(),
        }
    }
}
