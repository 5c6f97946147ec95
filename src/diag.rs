//! Optional engine counters.
//!
//! With the `diag` feature enabled the counters are process-wide
//! relaxed atomics, advisory only. With the feature off every
//! increment compiles to the empty statement.

#[cfg(feature = "diag")]
use core::sync::atomic::{AtomicU64, Ordering};

#[cfg(feature = "diag")]
macro_rules! diag_static {
    ($($name:ident),* $(,)?) => {
        $(pub static $name: AtomicU64 = AtomicU64::new(0);)*
    };
}

#[cfg(feature = "diag")]
diag_static!(
    GCM_INIT_CALLS,
    GCM_AAD_CALLS,
    GCM_ENCRYPT_CALLS,
    GCM_DECRYPT_CALLS,
    GCM_FINAL_CALLS,
    GCM_FUSED8_BATCHES,
    GCM_FUSED16_BATCHES,
);

#[cfg(feature = "diag")]
macro_rules! diag_inc {
    ($name:ident) => {
        $crate::diag::$name.fetch_add(1, core::sync::atomic::Ordering::Relaxed)
    };
}

#[cfg(not(feature = "diag"))]
macro_rules! diag_inc {
    ($name:ident) => {
        ()
    };
}

/// Point-in-time copy of all counters.
#[cfg(feature = "diag")]
#[derive(Clone, Copy, Debug, Default)]
pub struct Counters {
    pub gcm_init_calls: u64,
    pub gcm_aad_calls: u64,
    pub gcm_encrypt_calls: u64,
    pub gcm_decrypt_calls: u64,
    pub gcm_final_calls: u64,
    pub gcm_fused8_batches: u64,
    pub gcm_fused16_batches: u64,
}

#[cfg(feature = "diag")]
pub fn snapshot() -> Counters {
    Counters {
        gcm_init_calls: GCM_INIT_CALLS.load(Ordering::Relaxed),
        gcm_aad_calls: GCM_AAD_CALLS.load(Ordering::Relaxed),
        gcm_encrypt_calls: GCM_ENCRYPT_CALLS.load(Ordering::Relaxed),
        gcm_decrypt_calls: GCM_DECRYPT_CALLS.load(Ordering::Relaxed),
        gcm_final_calls: GCM_FINAL_CALLS.load(Ordering::Relaxed),
        gcm_fused8_batches: GCM_FUSED8_BATCHES.load(Ordering::Relaxed),
        gcm_fused16_batches: GCM_FUSED16_BATCHES.load(Ordering::Relaxed),
    }
}
