//! LoRaWAN keys and session-key derivation
//!
//! OTAA session keys (LoRaWAN 1.0.x) are derived from the root AppKey and the
//! join-procedure values:
//!   NwkSKey = aes128_encrypt(AppKey, 0x01 | AppNonce | NetID | DevNonce | pad16)
//!   AppSKey = aes128_encrypt(AppKey, 0x02 | AppNonce | NetID | DevNonce | pad16)
//!
//! Device and network server run this independently after the join-accept,
//! so the nonce block layout is a wire-compatibility requirement.

use std::fmt;
use std::str::FromStr;

use bytes::BufMut;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::cipher::{Block, Cipher, BLOCK_SIZE};
use crate::error::{CryptoError, Result};

/// Largest value a 24-bit protocol field can carry
pub const MAX_U24: u32 = 0x00FF_FFFF;

/// AES-128 key (root key or derived session key)
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AesKey([u8; 16]);

impl AesKey {
    pub const LEN: usize = 16;

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl From<[u8; 16]> for AesKey {
    fn from(bytes: [u8; 16]) -> Self {
        AesKey(bytes)
    }
}

impl TryFrom<&[u8]> for AesKey {
    type Error = CryptoError;

    fn try_from(value: &[u8]) -> Result<Self> {
        let bytes: [u8; 16] = value
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength { len: value.len() })?;
        Ok(AesKey(bytes))
    }
}

impl FromStr for AesKey {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = hex::decode(s.trim())
            .map_err(|e| CryptoError::InvalidKeyEncoding(e.to_string()))?;
        AesKey::try_from(bytes.as_slice())
    }
}

impl TryFrom<String> for AesKey {
    type Error = CryptoError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<AesKey> for String {
    fn from(key: AesKey) -> Self {
        key.to_string()
    }
}

impl fmt::Display for AesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode_upper(self.0))
    }
}

// Keys end up in log lines through derived Debug impls; keep them out.
impl fmt::Debug for AesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AesKey(..)")
    }
}

/// Session key selector, first byte of the nonce block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum KeyType {
    Network = 0x01,
    Application = 0x02,
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyType::Network => write!(f, "NwkSKey"),
            KeyType::Application => write!(f, "AppSKey"),
        }
    }
}

/// Values exchanged during the join procedure that feed key derivation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinParams {
    /// 24-bit nonce chosen by the network server
    pub app_nonce: u32,
    /// 24-bit network identifier
    pub net_id: u32,
    /// Nonce chosen by the device in its join-request
    pub dev_nonce: u16,
}

/// Session keys for one activated device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionKeys {
    pub dev_addr: u32,
    pub nwk_s_key: AesKey,
    pub app_s_key: AesKey,
}

impl SessionKeys {
    /// Derive both session keys from a completed join exchange
    pub fn derive(app_key: &AesKey, params: &JoinParams, dev_addr: u32) -> Result<Self> {
        let JoinParams {
            app_nonce,
            net_id,
            dev_nonce,
        } = *params;

        Ok(Self {
            dev_addr,
            nwk_s_key: derive_nwk_s_key(app_key, app_nonce, net_id, dev_nonce)?,
            app_s_key: derive_app_s_key(app_key, app_nonce, net_id, dev_nonce)?,
        })
    }
}

pub(crate) fn check_u24(field: &'static str, value: u32) -> Result<()> {
    if value > MAX_U24 {
        return Err(CryptoError::FieldOutOfRange {
            field,
            value,
            max: MAX_U24,
        });
    }
    Ok(())
}

/// Build the derivation nonce block
///
/// Layout: KeyType(1) | AppNonce(3,LE) | NetID(3,LE) | DevNonce(2,LE) | zeros(7)
pub fn nonce_block(
    app_nonce: u32,
    net_id: u32,
    dev_nonce: u16,
    key_type: KeyType,
) -> Result<Block> {
    check_u24("AppNonce", app_nonce)?;
    check_u24("NetID", net_id)?;

    let mut block: Block = [0u8; BLOCK_SIZE];
    let mut buf = &mut block[..];
    buf.put_u8(key_type as u8);
    buf.put_uint_le(u64::from(app_nonce), 3);
    buf.put_uint_le(u64::from(net_id), 3);
    buf.put_u16_le(dev_nonce);

    Ok(block)
}

/// Derive a session key by encrypting the nonce block once with `root_key`
pub fn derive_session_key(
    root_key: &AesKey,
    app_nonce: u32,
    net_id: u32,
    dev_nonce: u16,
    key_type: KeyType,
) -> Result<AesKey> {
    let mut block = nonce_block(app_nonce, net_id, dev_nonce, key_type)?;
    trace!(
        "Deriving {} (AppNonce={:06X} NetID={:06X} DevNonce={:04X})",
        key_type,
        app_nonce,
        net_id,
        dev_nonce
    );

    Cipher::new(root_key).encrypt_block(&mut block);
    Ok(AesKey(block))
}

/// Derive the network session key (NwkSKey)
pub fn derive_nwk_s_key(
    root_key: &AesKey,
    app_nonce: u32,
    net_id: u32,
    dev_nonce: u16,
) -> Result<AesKey> {
    derive_session_key(root_key, app_nonce, net_id, dev_nonce, KeyType::Network)
}

/// Derive the application session key (AppSKey)
pub fn derive_app_s_key(
    root_key: &AesKey,
    app_nonce: u32,
    net_id: u32,
    dev_nonce: u16,
) -> Result<AesKey> {
    derive_session_key(root_key, app_nonce, net_id, dev_nonce, KeyType::Application)
}
