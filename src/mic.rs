//! Message Integrity Code (MIC) computation
//!
//! Data frames are authenticated as
//!   cmac = aes128_cmac(Key, B0 | msg)
//!   MIC  = cmac[0..4], read little-endian
//!
//! with the B0 pre-block:
//!   0x49 | 0x00 x4 | Dir | DevAddr(4,LE) | FCnt(4,LE) | 0x00 | len(msg) & 0xFF
//!
//! Only the low byte of the message length goes into B0. Messages of 256 bytes
//! or more wrap, so a 256-byte and a 0-byte message share the same B0. Peers
//! compute the MIC the same way, so the wrap is kept as-is; callers that need
//! distinct tags must keep authenticated messages under 256 bytes.

use std::fmt;

use aes::cipher::generic_array::GenericArray;
use aes::Aes128;
use bytes::BufMut;
use cmac::{Cmac, Mac};
use tracing::trace;

use crate::cipher::{Block, BLOCK_SIZE};
use crate::error::{CryptoError, Result};
use crate::keys::AesKey;

/// First byte of the B0 authentication block
pub const B0_TAG: u8 = 0x49;

/// Largest message accepted for MIC computation
pub const MAX_MESSAGE_LEN: usize = u16::MAX as usize;

/// Link direction, encoded in byte 5 of B0
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Direction {
    /// Device to network
    #[default]
    Uplink = 0,
    /// Network to device
    Downlink = 1,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Uplink => write!(f, "uplink"),
            Direction::Downlink => write!(f, "downlink"),
        }
    }
}

/// Build the B0 block for a message of `len` bytes
pub fn b0_block(len: usize, dev_addr: u32, direction: Direction, fcnt: u32) -> Block {
    let mut block: Block = [0u8; BLOCK_SIZE];
    let mut buf = &mut block[..];
    buf.put_u8(B0_TAG);
    buf.put_u32(0);
    buf.put_u8(direction as u8);
    buf.put_u32_le(dev_addr);
    buf.put_u32_le(fcnt);
    buf.put_u8(0);
    // Low byte only; see module docs
    buf.put_u8((len & 0xFF) as u8);

    block
}

/// A CMAC state keyed once and cloned for every computation
///
/// Sharing one engine between threads is fine: each call works on its own
/// copy of the keyed state.
#[derive(Clone)]
pub struct MicEngine {
    mac: Cmac<Aes128>,
}

impl MicEngine {
    pub fn new(key: &AesKey) -> Self {
        Self {
            mac: <Cmac<Aes128> as Mac>::new(&GenericArray::from(*key.as_bytes())),
        }
    }

    /// MIC over B0 | message
    pub fn compute(
        &self,
        message: &[u8],
        dev_addr: u32,
        direction: Direction,
        fcnt: u32,
    ) -> Result<u32> {
        check_message(message)?;
        let b0 = b0_block(message.len(), dev_addr, direction, fcnt);
        trace!(
            "MIC: {} {} bytes DevAddr={:08X} FCnt={}",
            direction,
            message.len(),
            dev_addr,
            fcnt
        );
        Ok(self.tag(&[&b0[..], message]))
    }

    /// MIC over the message alone, with no B0 pre-block
    pub fn compute_plain(&self, message: &[u8]) -> Result<u32> {
        check_message(message)?;
        trace!("CMAC MIC: {} bytes", message.len());
        Ok(self.tag(&[message]))
    }

    fn tag(&self, parts: &[&[u8]]) -> u32 {
        let mut mac = self.mac.clone();
        for part in parts {
            mac.update(part);
        }
        let tag = mac.finalize().into_bytes();
        u32::from_le_bytes([tag[0], tag[1], tag[2], tag[3]])
    }
}

impl fmt::Debug for MicEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MicEngine(..)")
    }
}

fn check_message(message: &[u8]) -> Result<()> {
    if message.len() > MAX_MESSAGE_LEN {
        return Err(CryptoError::MessageTooLong {
            len: message.len(),
            max: MAX_MESSAGE_LEN,
        });
    }
    Ok(())
}

/// Compute the 32-bit MIC of a data message
pub fn compute_mic(
    message: &[u8],
    key: &AesKey,
    dev_addr: u32,
    direction: Direction,
    fcnt: u32,
) -> Result<u32> {
    MicEngine::new(key).compute(message, dev_addr, direction, fcnt)
}

/// Compute the MIC of an uplink (device to network) message
pub fn compute_uplink_mic(message: &[u8], key: &AesKey, dev_addr: u32, fcnt: u32) -> Result<u32> {
    compute_mic(message, key, dev_addr, Direction::Uplink, fcnt)
}

/// Compute a MIC straight over `message`, as used by join frames
pub fn compute_cmac_mic(message: &[u8], key: &AesKey) -> Result<u32> {
    MicEngine::new(key).compute_plain(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, RngCore, SeedableRng};

    const DEV_ADDR: u32 = 0x49BE7DF1;

    fn rfc4493_key() -> AesKey {
        "2b7e151628aed2a6abf7158809cf4f3c".parse().unwrap()
    }

    fn frame() -> Vec<u8> {
        hex::decode("40f17dbe4900020001954378762b11ff0d").unwrap()
    }

    #[test]
    fn test_b0_layout() {
        let b0 = b0_block(17, 0x01020304, Direction::Downlink, 0x0A0B0C0D);
        assert_eq!(
            b0,
            [
                0x49, // tag
                0x00, 0x00, 0x00, 0x00, // reserved
                0x01, // Dir
                0x04, 0x03, 0x02, 0x01, // DevAddr (LE)
                0x0D, 0x0C, 0x0B, 0x0A, // FCnt (LE)
                0x00, // reserved
                0x11, // length
            ]
        );
    }

    #[test]
    fn test_b0_length_wraps_at_256() {
        let short = b0_block(0, DEV_ADDR, Direction::Uplink, 1);
        let wrapped = b0_block(256, DEV_ADDR, Direction::Uplink, 1);
        assert_eq!(short, wrapped);
        assert_eq!(b0_block(255, DEV_ADDR, Direction::Uplink, 1)[15], 0xFF);
    }

    #[test]
    fn test_rfc4493_vectors_truncated() {
        let key = rfc4493_key();
        let vectors: [(&str, u32); 4] = [
            ("", 0x29691dbb),
            ("6bc1bee22e409f96e93d7e117393172a", 0xb4160a07),
            (
                "6bc1bee22e409f96e93d7e117393172aae2d8a571e03ac9c9eb76fac45af8e5130c81c46a35ce411",
                0x4767a6df,
            ),
            (
                "6bc1bee22e409f96e93d7e117393172aae2d8a571e03ac9c9eb76fac45af8e5130c81c46a35ce411e5fbc1191a0a52eff69f2445df4f9b17ad2b417be66c3710",
                0xbfbef051,
            ),
        ];

        for (data, expected) in vectors {
            let bytes = hex::decode(data).unwrap();
            assert_eq!(compute_cmac_mic(&bytes, &key).unwrap(), expected, "{}", data);
        }
    }

    #[test]
    fn test_known_data_mics() {
        let key = rfc4493_key();
        let msg = frame();

        assert_eq!(compute_uplink_mic(&msg, &key, DEV_ADDR, 2).unwrap(), 0x5f8f3de1);
        assert_eq!(
            compute_mic(&msg, &key, DEV_ADDR, Direction::Downlink, 2).unwrap(),
            0x250cdee7
        );
        assert_eq!(compute_uplink_mic(&msg, &key, DEV_ADDR, 3).unwrap(), 0xfc55d0d5);
    }

    #[test]
    fn test_empty_message_mic() {
        let mic = compute_uplink_mic(&[], &rfc4493_key(), 0x01020304, 0).unwrap();
        assert_eq!(mic, 0x8f70d7d6);
    }

    #[test]
    fn test_uplink_wrapper_matches_direction_zero() {
        let key = rfc4493_key();
        let msg = frame();
        assert_eq!(
            compute_uplink_mic(&msg, &key, DEV_ADDR, 7).unwrap(),
            compute_mic(&msg, &key, DEV_ADDR, Direction::Uplink, 7).unwrap()
        );
    }

    #[test]
    fn test_boundary_lengths() {
        let key = rfc4493_key();
        for len in [16usize, 17, 255] {
            let msg = vec![0x3Cu8; len];
            let a = compute_uplink_mic(&msg, &key, DEV_ADDR, 1).unwrap();
            let b = compute_uplink_mic(&msg[..len - 1], &key, DEV_ADDR, 1).unwrap();
            assert_ne!(a, b, "len {}", len);
        }
    }

    #[test]
    fn test_message_too_long() {
        let msg = vec![0u8; MAX_MESSAGE_LEN + 1];
        assert!(matches!(
            compute_uplink_mic(&msg, &rfc4493_key(), DEV_ADDR, 0),
            Err(CryptoError::MessageTooLong { .. })
        ));
    }

    #[test]
    fn test_mic_sensitivity() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(0x4D1C);

        for _ in 0..32 {
            let mut raw_key = [0u8; 16];
            rng.fill_bytes(&mut raw_key);
            let key = AesKey::from(raw_key);

            let mut msg = vec![0u8; rng.gen_range(1..=64)];
            rng.fill_bytes(&mut msg);
            let addr: u32 = rng.gen();
            let fcnt: u32 = rng.gen_range(0..u32::MAX);

            let base = compute_mic(&msg, &key, addr, Direction::Uplink, fcnt).unwrap();
            assert_eq!(
                base,
                compute_mic(&msg, &key, addr, Direction::Uplink, fcnt).unwrap()
            );

            let mut flipped = msg.clone();
            let idx = rng.gen_range(0..flipped.len());
            flipped[idx] ^= 1u8 << rng.gen_range(0..8u32);
            assert_ne!(
                base,
                compute_mic(&flipped, &key, addr, Direction::Uplink, fcnt).unwrap()
            );

            let mut other_key = raw_key;
            other_key[rng.gen_range(0..16usize)] ^= 0x01;
            assert_ne!(
                base,
                compute_mic(&msg, &AesKey::from(other_key), addr, Direction::Uplink, fcnt)
                    .unwrap()
            );

            assert_ne!(
                base,
                compute_mic(&msg, &key, addr, Direction::Downlink, fcnt).unwrap()
            );
            let other_addr = addr ^ (1u32 << rng.gen_range(0..32u32));
            assert_ne!(
                base,
                compute_mic(&msg, &key, other_addr, Direction::Uplink, fcnt).unwrap()
            );
            assert_ne!(
                base,
                compute_mic(&msg, &key, addr, Direction::Uplink, fcnt + 1).unwrap()
            );
        }
    }

    #[test]
    fn test_shared_engine_across_threads() {
        let engine = MicEngine::new(&rfc4493_key());
        let msg = frame();
        let expected = engine.compute(&msg, DEV_ADDR, Direction::Uplink, 2).unwrap();
        assert_eq!(expected, 0x5f8f3de1);

        std::thread::scope(|s| {
            for fcnt in 0..4u32 {
                let engine = &engine;
                let msg = &msg;
                s.spawn(move || {
                    let own = engine.compute(msg, DEV_ADDR, Direction::Downlink, fcnt).unwrap();
                    for _ in 0..100 {
                        assert_eq!(
                            engine.compute(msg, DEV_ADDR, Direction::Uplink, 2).unwrap(),
                            expected
                        );
                        assert_eq!(
                            engine.compute(msg, DEV_ADDR, Direction::Downlink, fcnt).unwrap(),
                            own
                        );
                    }
                });
            }
        });
    }
}
