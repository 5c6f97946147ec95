//! sealant — freestanding AEAD engine.
//!
//! AES-256-GCM (NIST SP 800-38D) and ChaCha20-Poly1305 (RFC 8439) with
//! no runtime requirements: no allocator in the core, no I/O, contexts
//! are caller-owned values. The AES-GCM hot path is a fused
//! encrypt/authenticate kernel on 256-bit vector AES coordinated with
//! carry-less multiply, selected at runtime over an AES-NI+CLMUL tier
//! and a portable constant-time fallback.
//!
//! The constant-time contract across the crate: no secret-dependent
//! control flow, no secret-dependent table lookups, no data-dependent
//! loop bounds. Physical side channels (power, EM, cache-line probing)
//! are out of scope.

#![no_std]

#[cfg(feature = "alloc")]
extern crate alloc;
#[cfg(test)]
extern crate std;

#[macro_use]
extern crate arrayref;

#[macro_use]
pub mod diag;

#[cfg(feature = "alloc")]
pub mod aead;
mod aes;
#[cfg(target_arch = "x86_64")]
mod aes_ni;
pub mod batch;
pub mod chacha20;
mod cpu;
pub mod ct;
pub mod gcm;
mod ghash;
pub mod poly1305;
#[cfg(test)]
mod testutil;

pub use cpu::{query_caps, Caps};
pub use ct::constant_eq;

/// Operation status. Every fallible operation reports through this
/// enum and nothing else.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// Malformed argument or a call inconsistent with the context's
    /// current phase. The operation was a no-op.
    InvalidInput,
    /// Tag verification failed; plaintext produced by earlier
    /// decrypt updates is undefined and must be discarded.
    AuthFailure,
    /// Reserved surface the implementation declines to provide.
    Unsupported,
    /// Never produced by a correct build; reserved.
    Internal,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let msg = match self {
            Error::InvalidInput => "invalid input",
            Error::AuthFailure => "authentication failure",
            Error::Unsupported => "unsupported operation",
            Error::Internal => "internal error",
        };
        f.write_str(msg)
    }
}

impl core::error::Error for Error {}

pub type Result<T> = core::result::Result<T, Error>;

/// Engine identification, "name vMAJOR.MINOR.PATCH". The wire formats
/// (key, IV and tag sizes, algorithm identities) are stable across
/// minor versions.
pub fn version_string() -> &'static str {
    concat!("sealant v", env!("CARGO_PKG_VERSION"))
}
