//! Join-procedure frame crypto (OTAA)
//!
//! Join-request (device → network), authenticated only:
//!   MHDR(1) | AppEUI(8,LE) | DevEUI(8,LE) | DevNonce(2,LE) | MIC(4,LE)
//!
//! Join-accept (network → device), authenticated then encrypted:
//!   MHDR(1) | AppNonce(3,LE) | NetID(3,LE) | DevAddr(4,LE) | DLSettings(1)
//!   | RxDelay(1) | [CFList(16)] | MIC(4,LE)
//!
//! The network side runs AES *decrypt* over everything after the MHDR so the
//! device only needs AES encrypt to open the frame.

use bytes::{Buf, BufMut};
use tracing::{debug, trace};

use crate::cipher::{self, Cipher};
use crate::error::{CryptoError, Result};
use crate::keys::{check_u24, AesKey, JoinParams};
use crate::mic;

/// MHDR for a join-request (MType 000, LoRaWAN R1)
pub const JOIN_REQUEST_MHDR: u8 = 0x00;

/// MHDR for a join-accept (MType 001, LoRaWAN R1)
pub const JOIN_ACCEPT_MHDR: u8 = 0x20;

/// MHDR | AppEUI | DevEUI | DevNonce
pub const JOIN_REQUEST_LEN: usize = 19;

const MIC_LEN: usize = 4;
const CF_LIST_LEN: usize = 16;
const JOIN_ACCEPT_LEN: usize = 17;
const JOIN_ACCEPT_CF_LIST_LEN: usize = JOIN_ACCEPT_LEN + CF_LIST_LEN;

fn mtype(mhdr: u8) -> u8 {
    (mhdr >> 5) & 0x07
}

/// MIC of a join-request, computed over the frame without its MIC
pub fn join_request_mic(frame: &[u8], app_key: &AesKey) -> Result<u32> {
    if frame.len() != JOIN_REQUEST_LEN {
        return Err(CryptoError::InvalidFrameLength {
            kind: "JoinRequest",
            expected: "19 bytes without MIC",
            len: frame.len(),
        });
    }
    if mtype(frame[0]) != mtype(JOIN_REQUEST_MHDR) {
        return Err(CryptoError::UnexpectedMessageType { mhdr: frame[0] });
    }
    mic::compute_cmac_mic(frame, app_key)
}

/// Check the trailing MIC of a complete 23-byte join-request
pub fn verify_join_request(frame: &[u8], app_key: &AesKey) -> Result<()> {
    JoinRequest::parse(frame)?.verify(app_key)
}

/// Fields of a join-request as sent by the device
///
/// `dev_nonce` is what the network side feeds into [`JoinParams`] once it
/// has picked an AppNonce and NetID for the answering join-accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinRequest {
    pub app_eui: u64,
    pub dev_eui: u64,
    pub dev_nonce: u16,
    pub mic: u32,
}

impl JoinRequest {
    /// Split a complete 23-byte join-request into its fields
    ///
    /// The MIC is read but not checked; see [`JoinRequest::verify`].
    pub fn parse(frame: &[u8]) -> Result<Self> {
        if frame.len() != JOIN_REQUEST_LEN + MIC_LEN {
            return Err(CryptoError::InvalidFrameLength {
                kind: "JoinRequest",
                expected: "23 bytes",
                len: frame.len(),
            });
        }
        if mtype(frame[0]) != mtype(JOIN_REQUEST_MHDR) {
            return Err(CryptoError::UnexpectedMessageType { mhdr: frame[0] });
        }

        let mut buf = &frame[1..];
        Ok(Self {
            app_eui: buf.get_u64_le(),
            dev_eui: buf.get_u64_le(),
            dev_nonce: buf.get_u16_le(),
            mic: buf.get_u32_le(),
        })
    }

    fn body(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(JOIN_REQUEST_LEN);
        body.put_u8(JOIN_REQUEST_MHDR);
        body.put_u64_le(self.app_eui);
        body.put_u64_le(self.dev_eui);
        body.put_u16_le(self.dev_nonce);
        body
    }

    /// Recompute the MIC under `app_key` and compare it with the carried one
    pub fn verify(&self, app_key: &AesKey) -> Result<()> {
        let computed = mic::compute_cmac_mic(&self.body(), app_key)?;
        if computed != self.mic {
            debug!(
                "JoinRequest MIC mismatch: DevEUI={:016X} frame={:08X} computed={:08X}",
                self.dev_eui, self.mic, computed
            );
            return Err(CryptoError::MicMismatch {
                expected: self.mic,
                computed,
            });
        }
        Ok(())
    }

    /// Build the 23-byte frame (device side), signing it with `app_key`
    ///
    /// The `mic` field is ignored and replaced by the computed one.
    pub fn encode(&self, app_key: &AesKey) -> Result<Vec<u8>> {
        let mut frame = self.body();
        let mic = mic::compute_cmac_mic(&frame, app_key)?;
        frame.put_u32_le(mic);
        trace!(
            "JoinRequest encoded: DevEUI={:016X} DevNonce={:04X} MIC={:08X}",
            self.dev_eui,
            self.dev_nonce,
            mic
        );
        Ok(frame)
    }
}

/// Decoded join-accept fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinAccept {
    pub app_nonce: u32,
    pub net_id: u32,
    pub dev_addr: u32,
    pub dl_settings: u8,
    pub rx_delay: u8,
    /// Optional channel frequency list
    pub cf_list: Option<[u8; 16]>,
}

impl JoinAccept {
    /// Join-accept with the default DLSettings (RX2 DR 8) and a 1 s RX delay
    pub fn new(app_nonce: u32, net_id: u32, dev_addr: u32) -> Self {
        Self {
            app_nonce,
            net_id,
            dev_addr,
            dl_settings: 0x08,
            rx_delay: 1,
            cf_list: None,
        }
    }

    /// Parameters the device needs for session-key derivation
    pub fn join_params(&self, dev_nonce: u16) -> JoinParams {
        JoinParams {
            app_nonce: self.app_nonce,
            net_id: self.net_id,
            dev_nonce,
        }
    }

    fn payload(&self) -> Result<Vec<u8>> {
        check_u24("AppNonce", self.app_nonce)?;
        check_u24("NetID", self.net_id)?;

        let mut payload = Vec::with_capacity(JOIN_ACCEPT_CF_LIST_LEN - 1);
        payload.put_uint_le(u64::from(self.app_nonce), 3);
        payload.put_uint_le(u64::from(self.net_id), 3);
        payload.put_u32_le(self.dev_addr);
        payload.put_u8(self.dl_settings);
        payload.put_u8(self.rx_delay);
        if let Some(cf_list) = &self.cf_list {
            payload.put_slice(cf_list);
        }
        Ok(payload)
    }

    /// Build the encrypted join-accept frame (network side)
    pub fn encode(&self, app_key: &AesKey) -> Result<Vec<u8>> {
        let mut body = self.payload()?;

        let mut authenticated = Vec::with_capacity(1 + body.len());
        authenticated.put_u8(JOIN_ACCEPT_MHDR);
        authenticated.put_slice(&body);
        let mic = mic::compute_cmac_mic(&authenticated, app_key)?;
        body.put_u32_le(mic);

        // Body is 16 or 32 bytes, so the transform adds no padding
        let encrypted = cipher::decrypt(&body, app_key)?;

        let mut frame = Vec::with_capacity(1 + encrypted.len());
        frame.put_u8(JOIN_ACCEPT_MHDR);
        frame.put_slice(&encrypted);

        trace!(
            "JoinAccept encoded: DevAddr={:08X} {} bytes MIC={:08X}",
            self.dev_addr,
            frame.len(),
            mic
        );
        Ok(frame)
    }

    /// Decrypt and authenticate a join-accept frame (device side)
    pub fn decode(frame: &[u8], app_key: &AesKey) -> Result<Self> {
        if frame.len() != JOIN_ACCEPT_LEN && frame.len() != JOIN_ACCEPT_CF_LIST_LEN {
            return Err(CryptoError::InvalidFrameLength {
                kind: "JoinAccept",
                expected: "17 or 33 bytes",
                len: frame.len(),
            });
        }

        let mhdr = frame[0];
        if mtype(mhdr) != mtype(JOIN_ACCEPT_MHDR) {
            return Err(CryptoError::UnexpectedMessageType { mhdr });
        }

        let plain = Cipher::new(app_key).encrypt(&frame[1..])?;
        let (payload, mut mic_bytes) = plain.split_at(plain.len() - MIC_LEN);
        let expected = mic_bytes.get_u32_le();

        let mut authenticated = Vec::with_capacity(frame.len() - MIC_LEN);
        authenticated.put_u8(mhdr);
        authenticated.put_slice(payload);
        let computed = mic::compute_cmac_mic(&authenticated, app_key)?;
        if computed != expected {
            debug!(
                "JoinAccept MIC mismatch: frame={:08X} computed={:08X}",
                expected, computed
            );
            return Err(CryptoError::MicMismatch { expected, computed });
        }

        let mut buf = payload;
        let app_nonce = buf.get_uint_le(3) as u32;
        let net_id = buf.get_uint_le(3) as u32;
        let dev_addr = buf.get_u32_le();
        let dl_settings = buf.get_u8();
        let rx_delay = buf.get_u8();
        let cf_list = if buf.remaining() == CF_LIST_LEN {
            let mut list = [0u8; CF_LIST_LEN];
            buf.copy_to_slice(&mut list);
            Some(list)
        } else {
            None
        };

        Ok(Self {
            app_nonce,
            net_id,
            dev_addr,
            dl_settings,
            rx_delay,
            cf_list,
        })
    }
}
