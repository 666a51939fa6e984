//! Block-cipher transform over arbitrary-length buffers
//!
//! Each 16-byte block is passed through the raw AES-128 primitive on its own:
//! no IV, no chaining value, no counter. A trailing partial block is
//! zero-padded into a scratch block before it is transformed, and the full
//! 16 output bytes of that block are written. Output length is therefore
//! always `padded_len(input_len)`, which is what lets `decrypt` recover the
//! plaintext produced by `encrypt`. Since every ciphertext is block-aligned,
//! `decrypt` rejects input whose length is not a multiple of 16.
//!
//! This is NOT the counter-mode FRMPayload encryption described by the
//! LoRaWAN specification; it is the transform used for join-accept bodies
//! and by the legacy payload path.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;
use tracing::trace;

use crate::error::{CryptoError, Result};
use crate::keys::AesKey;

/// Size of one AES block in bytes
pub const BLOCK_SIZE: usize = 16;

/// Largest plaintext the transform accepts (16-bit size field)
pub const MAX_BUFFER_LEN: usize = u16::MAX as usize;

/// Largest ciphertext `decrypt` accepts: a padded `MAX_BUFFER_LEN` plaintext
pub const MAX_CIPHERTEXT_LEN: usize = MAX_BUFFER_LEN.div_ceil(BLOCK_SIZE) * BLOCK_SIZE;

/// One AES block
pub type Block = [u8; BLOCK_SIZE];

/// Length of the transform output for an input of `len` bytes
pub fn padded_len(len: usize) -> usize {
    len.div_ceil(BLOCK_SIZE) * BLOCK_SIZE
}

#[derive(Debug, Clone, Copy)]
enum Mode {
    Encrypt,
    Decrypt,
}

impl Mode {
    fn max_input(self) -> usize {
        match self {
            Mode::Encrypt => MAX_BUFFER_LEN,
            Mode::Decrypt => MAX_CIPHERTEXT_LEN,
        }
    }
}

/// An expanded AES-128 key schedule
///
/// The schedule is immutable once built, so a single `Cipher` may be shared
/// between threads. The free functions in this module build a fresh one for
/// every call.
#[derive(Clone)]
pub struct Cipher {
    aes: Aes128,
}

impl Cipher {
    pub fn new(key: &AesKey) -> Self {
        Self {
            aes: Aes128::new(&GenericArray::from(*key.as_bytes())),
        }
    }

    /// Encrypt a single block in place
    pub fn encrypt_block(&self, block: &mut Block) {
        self.aes
            .encrypt_block(GenericArray::from_mut_slice(&mut block[..]));
    }

    /// Decrypt a single block in place
    pub fn decrypt_block(&self, block: &mut Block) {
        self.aes
            .decrypt_block(GenericArray::from_mut_slice(&mut block[..]));
    }

    pub fn encrypt(&self, buffer: &[u8]) -> Result<Vec<u8>> {
        let mut out = vec![0u8; padded_len(buffer.len())];
        self.encrypt_into(buffer, &mut out)?;
        Ok(out)
    }

    pub fn decrypt(&self, buffer: &[u8]) -> Result<Vec<u8>> {
        let mut out = vec![0u8; padded_len(buffer.len())];
        self.decrypt_into(buffer, &mut out)?;
        Ok(out)
    }

    /// Encrypt `buffer` into `out`, returning the number of bytes written
    pub fn encrypt_into(&self, buffer: &[u8], out: &mut [u8]) -> Result<usize> {
        self.transform(buffer, out, Mode::Encrypt)
    }

    /// Decrypt `buffer` into `out`, returning the number of bytes written
    pub fn decrypt_into(&self, buffer: &[u8], out: &mut [u8]) -> Result<usize> {
        self.transform(buffer, out, Mode::Decrypt)
    }

    fn transform(&self, buffer: &[u8], out: &mut [u8], mode: Mode) -> Result<usize> {
        check_buffer(buffer, mode.max_input())?;
        if matches!(mode, Mode::Decrypt) && buffer.len() % BLOCK_SIZE != 0 {
            return Err(CryptoError::UnalignedCiphertext { len: buffer.len() });
        }

        let needed = padded_len(buffer.len());
        if out.len() < needed {
            return Err(CryptoError::OutputTooSmall {
                needed,
                capacity: out.len(),
            });
        }

        trace!(
            "AES128 {:?}: {} bytes in, {} bytes out",
            mode,
            buffer.len(),
            needed
        );

        for (input, output) in buffer
            .chunks(BLOCK_SIZE)
            .zip(out[..needed].chunks_exact_mut(BLOCK_SIZE))
        {
            // Short final chunk lands zero-padded in the scratch block
            let mut block: Block = [0u8; BLOCK_SIZE];
            block[..input.len()].copy_from_slice(input);

            match mode {
                Mode::Encrypt => self.encrypt_block(&mut block),
                Mode::Decrypt => self.decrypt_block(&mut block),
            }
            output.copy_from_slice(&block);
        }

        Ok(needed)
    }
}

impl std::fmt::Debug for Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Cipher(..)")
    }
}

fn check_buffer(buffer: &[u8], max: usize) -> Result<()> {
    if buffer.is_empty() {
        return Err(CryptoError::EmptyBuffer);
    }
    if buffer.len() > max {
        return Err(CryptoError::BufferTooLong {
            len: buffer.len(),
            max,
        });
    }
    Ok(())
}

/// Encrypt `buffer` block by block with `key`
pub fn encrypt(buffer: &[u8], key: &AesKey) -> Result<Vec<u8>> {
    Cipher::new(key).encrypt(buffer)
}

/// Decrypt `buffer` block by block with `key`
pub fn decrypt(buffer: &[u8], key: &AesKey) -> Result<Vec<u8>> {
    Cipher::new(key).decrypt(buffer)
}

pub fn encrypt_into(buffer: &[u8], key: &AesKey, out: &mut [u8]) -> Result<usize> {
    Cipher::new(key).encrypt_into(buffer, out)
}

pub fn decrypt_into(buffer: &[u8], key: &AesKey, out: &mut [u8]) -> Result<usize> {
    Cipher::new(key).decrypt_into(buffer, out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, RngCore, SeedableRng};

    fn key(hex_str: &str) -> AesKey {
        hex_str.parse().unwrap()
    }

    #[test]
    fn test_all_zero_block_matches_aes_reference() {
        let zero = AesKey::from([0u8; 16]);
        let out = encrypt(&[0u8; 16], &zero).unwrap();
        assert_eq!(hex::encode(out), "66e94bd4ef8a2c3b884cfa59ca342b2e");
    }

    #[test]
    fn test_fips197_vector() {
        let k = key("000102030405060708090a0b0c0d0e0f");
        let pt = hex::decode("00112233445566778899aabbccddeeff").unwrap();

        let ct = encrypt(&pt, &k).unwrap();
        assert_eq!(hex::encode(&ct), "69c4e0d86a7b0430d8cdb78070b4c55a");

        let back = decrypt(&ct, &k).unwrap();
        assert_eq!(back, pt);
    }

    #[test]
    fn test_blocks_are_independent() {
        // Two identical plaintext blocks give identical ciphertext blocks
        let k = key("2b7e151628aed2a6abf7158809cf4f3c");
        let pt = [0x5Au8; 32];
        let ct = encrypt(&pt, &k).unwrap();
        assert_eq!(ct[..16], ct[16..]);
    }

    #[test]
    fn test_partial_final_block_is_zero_padded() {
        let k = key("2b7e151628aed2a6abf7158809cf4f3c");
        let pt: Vec<u8> = (0u8..17).collect();

        let ct = encrypt(&pt, &k).unwrap();
        assert_eq!(ct.len(), 32);
        assert_eq!(
            hex::encode(&ct),
            "50fe67cc996d32b6da0937e99bafec60898ee5c014f1f6abd4d6f7f688715998"
        );

        let back = decrypt(&ct, &k).unwrap();
        assert_eq!(&back[..17], &pt[..]);
        assert!(back[17..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_boundary_lengths() {
        let k = key("00112233445566778899aabbccddeeff");
        for len in [1usize, 15, 16, 17, 255, 256, MAX_BUFFER_LEN] {
            let pt = vec![0xA5u8; len];
            let ct = encrypt(&pt, &k).unwrap();
            assert_eq!(ct.len(), padded_len(len), "len {}", len);

            let back = decrypt(&ct, &k).unwrap();
            assert_eq!(&back[..len], &pt[..], "len {}", len);
        }
    }

    #[test]
    fn test_random_round_trip() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(0x10AA);
        for _ in 0..64 {
            let mut raw = [0u8; 16];
            rng.fill_bytes(&mut raw);
            let k = AesKey::from(raw);

            let len = rng.gen_range(1..=2048);
            let mut pt = vec![0u8; len];
            rng.fill_bytes(&mut pt);

            let back = decrypt(&encrypt(&pt, &k).unwrap(), &k).unwrap();
            assert_eq!(&back[..len], &pt[..]);
            assert!(back[len..].iter().all(|&b| b == 0));
        }
    }

    #[test]
    fn test_empty_buffer_rejected() {
        let k = AesKey::from([0u8; 16]);
        assert_eq!(encrypt(&[], &k), Err(CryptoError::EmptyBuffer));
        assert_eq!(decrypt(&[], &k), Err(CryptoError::EmptyBuffer));
    }

    #[test]
    fn test_truncated_ciphertext_rejected() {
        let k = AesKey::from([0u8; 16]);
        let ct = encrypt(&[9u8; 17], &k).unwrap();
        assert_eq!(ct.len(), 32);

        assert_eq!(
            decrypt(&ct[..17], &k),
            Err(CryptoError::UnalignedCiphertext { len: 17 })
        );
        assert_eq!(
            decrypt(&ct[..1], &k),
            Err(CryptoError::UnalignedCiphertext { len: 1 })
        );

        let mut out = [0xAAu8; 32];
        assert_eq!(
            decrypt_into(&ct[..31], &k, &mut out),
            Err(CryptoError::UnalignedCiphertext { len: 31 })
        );
        assert!(out.iter().all(|&b| b == 0xAA));

        // Encrypt still takes any length
        assert!(encrypt(&ct[..17], &k).is_ok());
    }

    #[test]
    fn test_oversized_buffer_rejected() {
        let k = AesKey::from([0u8; 16]);
        let big = vec![0u8; MAX_BUFFER_LEN + 1];
        assert!(matches!(
            encrypt(&big, &k),
            Err(CryptoError::BufferTooLong { .. })
        ));

        let too_big = vec![0u8; MAX_CIPHERTEXT_LEN + 1];
        assert!(matches!(
            decrypt(&too_big, &k),
            Err(CryptoError::BufferTooLong { .. })
        ));
    }

    #[test]
    fn test_output_too_small() {
        let k = AesKey::from([0u8; 16]);
        let mut out = [0u8; 16];
        let result = encrypt_into(&[1u8; 17], &k, &mut out);
        assert_eq!(
            result,
            Err(CryptoError::OutputTooSmall {
                needed: 32,
                capacity: 16
            })
        );
    }

    #[test]
    fn test_into_leaves_trailing_bytes_untouched() {
        let k = AesKey::from([7u8; 16]);
        let mut out = [0xEEu8; 40];
        let written = encrypt_into(&[1u8; 20], &k, &mut out).unwrap();
        assert_eq!(written, 32);
        assert!(out[32..].iter().all(|&b| b == 0xEE));
    }

    #[test]
    fn test_shared_cipher_across_threads() {
        let k = key("2b7e151628aed2a6abf7158809cf4f3c");
        let cipher = Cipher::new(&k);
        let expected = cipher.encrypt(&[0x11u8; 48]).unwrap();

        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..100 {
                        assert_eq!(cipher.encrypt(&[0x11u8; 48]).unwrap(), expected);
                    }
                });
            }
        });
    }

    #[test]
    fn test_padded_len() {
        assert_eq!(padded_len(0), 0);
        assert_eq!(padded_len(1), 16);
        assert_eq!(padded_len(16), 16);
        assert_eq!(padded_len(17), 32);
    }
}
