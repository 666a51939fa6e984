//! Error type shared by every operation in the crate
//!
//! Every variant is a caller-contract violation. Nothing here is transient,
//! so callers should surface the error rather than retry.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Key material was not exactly 16 bytes
    #[error("AES-128 key must be 16 bytes, got {len}")]
    InvalidKeyLength { len: usize },

    /// Key text could not be decoded as 32 hex digits
    #[error("Invalid key encoding: {0}")]
    InvalidKeyEncoding(String),

    #[error("Buffer is empty")]
    EmptyBuffer,

    #[error("Buffer of {len} bytes exceeds maximum of {max}")]
    BufferTooLong { len: usize, max: usize },

    /// Ciphertext handed to decrypt was not a whole number of blocks
    #[error("Ciphertext length {len} is not a multiple of 16")]
    UnalignedCiphertext { len: usize },

    /// Destination slice cannot hold the padded output
    #[error("Output buffer too small: need {needed} bytes, have {capacity}")]
    OutputTooSmall { needed: usize, capacity: usize },

    #[error("Message of {len} bytes exceeds maximum of {max}")]
    MessageTooLong { len: usize, max: usize },

    /// A 24-bit protocol field (AppNonce, NetID) was given a wider value
    #[error("{field} value 0x{value:X} exceeds maximum 0x{max:X}")]
    FieldOutOfRange {
        field: &'static str,
        value: u32,
        max: u32,
    },

    #[error("{kind} must be {expected}, got {len} bytes")]
    InvalidFrameLength {
        kind: &'static str,
        expected: &'static str,
        len: usize,
    },

    #[error("Unexpected message type in MHDR 0x{mhdr:02X}")]
    UnexpectedMessageType { mhdr: u8 },

    #[error("MIC mismatch: frame carries {expected:08X}, computed {computed:08X}")]
    MicMismatch { expected: u32, computed: u32 },
}

/// Result type for crypto operations
pub type Result<T> = std::result::Result<T, CryptoError>;
