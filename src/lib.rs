//! LoRaWAN link-layer security primitives
//!
//! - [`cipher`]: per-block AES-128 transform over arbitrary-length buffers
//! - [`mic`]: B0 pre-block construction and truncated AES-CMAC MICs
//! - [`keys`]: 128-bit keys and OTAA session-key derivation
//! - [`join`]: join-request parsing and MIC, join-accept encryption
//!
//! Every operation owns its cipher/CMAC state (or borrows an explicitly
//! constructed [`Cipher`] / [`MicEngine`]), so all of it is reentrant and
//! safe to call from several threads at once.
//!
//! Reference: LoRaWAN 1.0.x Specification, section 6.2 (join procedure)
//! and section 4.4 (message integrity code).

pub mod cipher;
pub mod error;
pub mod join;
pub mod keys;
pub mod mic;

pub use cipher::{decrypt, encrypt, Block, Cipher, BLOCK_SIZE};
pub use error::{CryptoError, Result};
pub use join::{JoinAccept, JoinRequest};
pub use keys::{
    derive_app_s_key, derive_nwk_s_key, derive_session_key, AesKey, JoinParams, KeyType,
    SessionKeys,
};
pub use mic::{compute_cmac_mic, compute_mic, compute_uplink_mic, Direction, MicEngine};
