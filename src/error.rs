//! Error types and result definitions for the tuyadp crate.
//! Transport exhaustion is the only failure the dispatcher reports; per-attempt
//! transport errors live in [`crate::transport::TransportError`].

use thiserror::Error;

/// Represents all errors a single codec, frame or dispatch call can return.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DpError {
    /// The value cannot be coerced into the requested datatype
    #[error("Cannot encode {value} as {dp_type}")]
    Encode { value: String, dp_type: String },

    /// The payload does not decode as the declared datatype
    #[error("Cannot decode {len} byte(s) as {dp_type}")]
    Decode { len: usize, dp_type: String },

    /// Hex string input with odd length or non-hex digits
    #[error("Invalid hex input: {0}")]
    InvalidHex(String),

    /// Frame shorter than the fixed 6 byte header
    #[error("Frame too short: {0} byte(s)")]
    FrameTooShort(usize),

    /// Declared payload length points past the end of the buffer
    #[error("Payload truncated: declared {declared} byte(s), {available} available")]
    TruncatedPayload { declared: usize, available: usize },

    /// Payload longer than the u16 length field can declare
    #[error("Payload too long: {0} byte(s), at most 65535")]
    PayloadTooLong(usize),

    /// Datatype tag or name not in the fixed table
    #[error("Unknown datatype: {0}")]
    UnknownDatatype(String),

    /// Capability has no datapoint in the session mapping
    #[error("No datapoint mapped for capability '{0}'")]
    UnknownCapability(String),

    /// Profile name missing from the catalog
    #[error("Profile '{0}' not found")]
    UnknownProfile(String),

    /// Every strategy on every endpoint failed
    #[error("Transport exhausted after {attempts} attempt(s)")]
    TransportExhausted { attempts: usize },

    /// Dispatch aborted by the caller's cancellation token
    #[error("Dispatch cancelled")]
    Cancelled,

    /// JSON serialization or deserialization error
    #[error("JSON error: {0}")]
    Json(String),

    /// IO error raised while reading or writing a byte buffer
    #[error("IO error: {0}")]
    Io(String),
}

/// A specialized Result type for datapoint operations.
pub type Result<T> = std::result::Result<T, DpError>;

impl From<serde_json::Error> for DpError {
    fn from(err: serde_json::Error) -> Self {
        DpError::Json(err.to_string())
    }
}

impl From<std::io::Error> for DpError {
    fn from(err: std::io::Error) -> Self {
        DpError::Io(err.to_string())
    }
}

impl From<hex::FromHexError> for DpError {
    fn from(err: hex::FromHexError) -> Self {
        DpError::InvalidHex(err.to_string())
    }
}

impl DpError {
    pub(crate) fn encode(value: impl std::fmt::Display, dp_type: impl std::fmt::Display) -> Self {
        DpError::Encode {
            value: value.to_string(),
            dp_type: dp_type.to_string(),
        }
    }

    pub(crate) fn decode(len: usize, dp_type: impl std::fmt::Display) -> Self {
        DpError::Decode {
            len,
            dp_type: dp_type.to_string(),
        }
    }
}
