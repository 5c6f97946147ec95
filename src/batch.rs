//! Multi-stream batch surface (reserved).
//!
//! The shape of the API is fixed so integrators can code against it,
//! but coalesced multi-key processing is not implemented: every entry
//! point reports `Unsupported`. Per-stream results, once implemented,
//! must match the per-stream API bit-for-bit.

use crate::chacha20::ChaChaPoly;
use crate::gcm::AesGcm;
use crate::{Error, Result};

/// Largest batch an implementation may be asked to coalesce.
pub const MAX_BATCH: usize = 256;

/// One stream's input/output pair. Input is plaintext when encrypting,
/// ciphertext when decrypting.
pub struct Span<'a> {
    pub input: &'a [u8],
    pub output: &'a mut [u8],
}

/// Per-core batch worker state.
pub struct BatchCtx {
    _private: (),
}

impl BatchCtx {
    pub fn init() -> Result<BatchCtx> {
        Err(Error::Unsupported)
    }

    pub fn aesgcm_update(
        &mut self,
        _ctxs: &mut [&mut AesGcm],
        _spans: &mut [Span<'_>],
    ) -> Result<()> {
        Err(Error::Unsupported)
    }

    pub fn chacha_update(
        &mut self,
        _ctxs: &mut [&mut ChaChaPoly],
        _spans: &mut [Span<'_>],
    ) -> Result<()> {
        Err(Error::Unsupported)
    }
}
