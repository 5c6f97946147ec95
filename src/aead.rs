//! One-shot AEAD layer over the streaming contexts.
//!
//! Object-safe trait for callers that pick the algorithm at runtime;
//! the ciphertext is the encrypted payload with the 16-byte tag
//! appended.

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::chacha20::{self, ChaChaPoly};
use crate::gcm::{self, AesGcm};
use crate::{Error, Result};

pub trait AuthEncAD {
    fn key_size(&self) -> usize;

    /// (min, max) accepted nonce length in bytes.
    fn nonce_range(&self) -> (usize, usize);

    /// Output size for a given plaintext size.
    fn expanded_size(&self, plaintext_size: usize) -> usize {
        plaintext_size + 16
    }

    /// Appends ciphertext ∥ tag to `out`.
    fn encrypt(
        &self,
        key: &[u8],
        nonce: &[u8],
        plaintext: &[u8],
        additional_data: &[u8],
        out: &mut Vec<u8>,
    ) -> Result<()>;

    /// Verifies and appends the plaintext to `out`. On failure `out`
    /// is left at its original length: unverified plaintext is never
    /// released.
    fn decrypt(
        &self,
        key: &[u8],
        nonce: &[u8],
        ciphertext: &[u8],
        additional_data: &[u8],
        out: &mut Vec<u8>,
    ) -> Result<()>;

    fn box_clone(&self) -> Box<dyn AuthEncAD>;
}

/// AES-256-GCM as a one-shot AEAD.
#[derive(Clone)]
pub struct AesGcm256;

impl AesGcm256 {
    pub fn new() -> Self {
        Self
    }
}

impl Default for AesGcm256 {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthEncAD for AesGcm256 {
    fn key_size(&self) -> usize {
        gcm::KEY_BYTES
    }

    // Any non-empty IV is accepted; 96 bits is the fast path and the
    // size protocols should use.
    fn nonce_range(&self) -> (usize, usize) {
        (12, 12)
    }

    fn encrypt(
        &self,
        key: &[u8],
        nonce: &[u8],
        plaintext: &[u8],
        additional_data: &[u8],
        out: &mut Vec<u8>,
    ) -> Result<()> {
        if key.len() != gcm::KEY_BYTES {
            return Err(Error::InvalidInput);
        }

        let start = out.len();
        out.resize(start + plaintext.len() + gcm::TAG_BYTES, 0);
        let (ct, tag_out) = out[start..].split_at_mut(plaintext.len());

        let mut ctx = AesGcm::init(array_ref![key, 0, 32], nonce)?;
        if !additional_data.is_empty() {
            ctx.aad_update(additional_data)?;
        }
        ctx.encrypt_update(plaintext, ct)?;

        let mut tag = [0u8; gcm::TAG_BYTES];
        ctx.encrypt_final(&mut tag)?;
        tag_out.copy_from_slice(&tag);
        Ok(())
    }

    fn decrypt(
        &self,
        key: &[u8],
        nonce: &[u8],
        ciphertext: &[u8],
        additional_data: &[u8],
        out: &mut Vec<u8>,
    ) -> Result<()> {
        if key.len() != gcm::KEY_BYTES || ciphertext.len() < gcm::TAG_BYTES {
            return Err(Error::InvalidInput);
        }
        let (ct, tag) = ciphertext.split_at(ciphertext.len() - gcm::TAG_BYTES);

        let start = out.len();
        out.resize(start + ct.len(), 0);

        let result = (|| {
            let mut ctx = AesGcm::init(array_ref![key, 0, 32], nonce)?;
            if !additional_data.is_empty() {
                ctx.aad_update(additional_data)?;
            }
            ctx.decrypt_update(ct, &mut out[start..])?;
            ctx.decrypt_final(array_ref![tag, 0, 16])
        })();

        if result.is_err() {
            out.truncate(start);
        }
        result
    }

    fn box_clone(&self) -> Box<dyn AuthEncAD> {
        Box::new(self.clone())
    }
}

/// ChaCha20-Poly1305 as a one-shot AEAD.
#[derive(Clone)]
pub struct ChaCha20Poly1305;

impl ChaCha20Poly1305 {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ChaCha20Poly1305 {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthEncAD for ChaCha20Poly1305 {
    fn key_size(&self) -> usize {
        chacha20::KEY_BYTES
    }

    fn nonce_range(&self) -> (usize, usize) {
        (chacha20::NONCE_BYTES, chacha20::NONCE_BYTES)
    }

    fn encrypt(
        &self,
        key: &[u8],
        nonce: &[u8],
        plaintext: &[u8],
        additional_data: &[u8],
        out: &mut Vec<u8>,
    ) -> Result<()> {
        if key.len() != chacha20::KEY_BYTES || nonce.len() != chacha20::NONCE_BYTES {
            return Err(Error::InvalidInput);
        }

        let start = out.len();
        out.resize(start + plaintext.len() + chacha20::TAG_BYTES, 0);
        let (ct, tag_out) = out[start..].split_at_mut(plaintext.len());

        let mut ctx = ChaChaPoly::init(array_ref![key, 0, 32], array_ref![nonce, 0, 12]);
        if !additional_data.is_empty() {
            ctx.aad_update(additional_data)?;
        }
        ctx.encrypt_update(plaintext, ct)?;

        let mut tag = [0u8; chacha20::TAG_BYTES];
        ctx.encrypt_final(&mut tag)?;
        tag_out.copy_from_slice(&tag);
        Ok(())
    }

    fn decrypt(
        &self,
        key: &[u8],
        nonce: &[u8],
        ciphertext: &[u8],
        additional_data: &[u8],
        out: &mut Vec<u8>,
    ) -> Result<()> {
        if key.len() != chacha20::KEY_BYTES
            || nonce.len() != chacha20::NONCE_BYTES
            || ciphertext.len() < chacha20::TAG_BYTES
        {
            return Err(Error::InvalidInput);
        }
        let (ct, tag) = ciphertext.split_at(ciphertext.len() - chacha20::TAG_BYTES);

        let start = out.len();
        out.resize(start + ct.len(), 0);

        let result = (|| {
            let mut ctx = ChaChaPoly::init(array_ref![key, 0, 32], array_ref![nonce, 0, 12]);
            if !additional_data.is_empty() {
                ctx.aad_update(additional_data)?;
            }
            ctx.decrypt_update(ct, &mut out[start..])?;
            ctx.decrypt_final(array_ref![tag, 0, 16])
        })();

        if result.is_err() {
            out.truncate(start);
        }
        result
    }

    fn box_clone(&self) -> Box<dyn AuthEncAD> {
        Box::new(self.clone())
    }
}
