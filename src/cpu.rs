//! Runtime CPU capability detection and backend selection.
//!
//! The capability word is advisory; the engine picks a backend
//! internally and caches the choice for the life of the process. A race
//! on first use is harmless since every thread computes the same value.

use core::sync::atomic::{AtomicU64, Ordering};

/// Advisory set of hardware capabilities.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Caps {
    bits: u64,
}

impl Caps {
    /// 256-bit vector AES (VAES).
    pub const VAES: u64 = 1 << 0;
    /// 256-bit vector carry-less multiply (VPCLMULQDQ).
    pub const VPCLMUL: u64 = 1 << 1;
    pub const AVX2: u64 = 1 << 2;
    pub const AVX512F: u64 = 1 << 3;
    pub const NEON: u64 = 1 << 4;
    /// ARM polynomial multiply (PMULL).
    pub const PMULL: u64 = 1 << 5;
    /// Scalar AES instructions (AES-NI).
    pub const AESNI: u64 = 1 << 6;
    /// Scalar carry-less multiply (PCLMULQDQ).
    pub const PCLMUL: u64 = 1 << 7;

    pub fn bits(&self) -> u64 {
        self.bits
    }

    /// Whether every capability in `mask` is present.
    pub fn has(&self, mask: u64) -> bool {
        self.bits & mask == mask
    }
}

// High bit marks the cached word as populated so that an all-zero
// capability set is distinguishable from "not yet queried".
const CAPS_VALID: u64 = 1 << 63;

static CAPS_CACHE: AtomicU64 = AtomicU64::new(0);

/// Queries hardware capabilities. Cached after the first call.
pub fn query_caps() -> Caps {
    let cached = CAPS_CACHE.load(Ordering::Relaxed);
    if cached & CAPS_VALID != 0 {
        return Caps {
            bits: cached & !CAPS_VALID,
        };
    }

    let bits = detect();
    CAPS_CACHE.store(bits | CAPS_VALID, Ordering::Relaxed);
    Caps { bits }
}

#[cfg(target_arch = "x86_64")]
fn detect() -> u64 {
    cpufeatures::new!(cpuid_aesni, "aes");
    cpufeatures::new!(cpuid_pclmul, "pclmulqdq");
    cpufeatures::new!(cpuid_avx2, "avx2");
    cpufeatures::new!(cpuid_avx512f, "avx512f");
    cpufeatures::new!(cpuid_vaes, "vaes");
    cpufeatures::new!(cpuid_vpclmul, "vpclmulqdq");

    let mut bits = 0;
    if cpuid_aesni::get() {
        bits |= Caps::AESNI;
    }
    if cpuid_pclmul::get() {
        bits |= Caps::PCLMUL;
    }
    if cpuid_avx2::get() {
        bits |= Caps::AVX2;
    }
    if cpuid_avx512f::get() {
        bits |= Caps::AVX512F;
    }
    if cpuid_vaes::get() {
        bits |= Caps::VAES;
    }
    if cpuid_vpclmul::get() {
        bits |= Caps::VPCLMUL;
    }
    bits
}

#[cfg(target_arch = "aarch64")]
fn detect() -> u64 {
    cpufeatures::new!(cpuid_aes, "aes");

    // NEON is architecturally baseline on AArch64. The "aes" hwcap
    // implies PMULL on every core we care about; cpufeatures folds the
    // crypto extension into one probe.
    let mut bits = Caps::NEON;
    if cpuid_aes::get() {
        bits |= Caps::PMULL;
    }
    bits
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
fn detect() -> u64 {
    0
}

/// The kernel family a context routes through. Selected once per
/// process; every backend is observationally equivalent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Backend {
    /// Portable constant-time fallback.
    Scalar,
    /// AES-NI counter batches plus 8-way CLMUL GHASH.
    Clmul,
    /// Single-pass VAES+CLMUL fused kernels.
    Fused,
}

fn select(caps: Caps) -> Backend {
    if caps.has(Caps::VAES | Caps::AESNI | Caps::PCLMUL | Caps::AVX2) {
        Backend::Fused
    } else if caps.has(Caps::AESNI | Caps::PCLMUL) {
        Backend::Clmul
    } else {
        Backend::Scalar
    }
}

/// The backend the current hardware selects.
pub(crate) fn backend() -> Backend {
    select(query_caps())
}

/// Whether `b` can actually run on this machine. Used by the
/// differential tests to force weaker backends and skip unavailable
/// ones.
#[cfg(test)]
pub(crate) fn runtime_supports(b: Backend) -> bool {
    let caps = query_caps();
    match b {
        Backend::Scalar => true,
        Backend::Clmul => caps.has(Caps::AESNI | Caps::PCLMUL),
        Backend::Fused => caps.has(Caps::VAES | Caps::AESNI | Caps::PCLMUL | Caps::AVX2),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caps_query_is_stable() {
        let a = query_caps();
        let b = query_caps();
        assert_eq!(a, b);
    }

    #[test]
    fn selection_order() {
        assert_eq!(select(Caps { bits: 0 }), Backend::Scalar);
        assert_eq!(
            select(Caps {
                bits: Caps::AESNI | Caps::PCLMUL
            }),
            Backend::Clmul
        );
        assert_eq!(
            select(Caps {
                bits: Caps::AESNI | Caps::PCLMUL | Caps::AVX2 | Caps::VAES
            }),
            Backend::Fused
        );
        // VAES alone without the scalar CLMUL half is not enough for
        // the fused kernels.
        assert_eq!(
            select(Caps {
                bits: Caps::VAES | Caps::AVX2
            }),
            Backend::Scalar
        );
    }

    #[test]
    fn backend_matches_caps() {
        assert!(runtime_supports(backend()));
    }
}
