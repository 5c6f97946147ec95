//! AES-256-GCM (NIST SP 800-38D).
//!
//! The context is a plain value the caller owns: no heap, no interior
//! I/O, single-owner (parallelism means more contexts). The phase
//! machine is a sum type so invalid transitions are ordinary match
//! arms returning `InvalidInput`, and kernel dispatch is a match on a
//! capability discriminator cached at init.
//!
//! Streaming note: updates do not stage partial blocks across calls. A
//! non-final update whose length is not a multiple of 16 consumes a
//! whole counter block for its tail, so callers should feed block
//! multiples everywhere except the last call. The same holds for AAD.

#[cfg(target_arch = "x86_64")]
pub(crate) mod fused;

use zeroize::Zeroize;

use crate::aes;
#[cfg(target_arch = "x86_64")]
use crate::aes_ni;
use crate::cpu::{self, Backend, Caps};
use crate::ct;
use crate::ghash;
#[cfg(target_arch = "x86_64")]
use crate::ghash::clmul;
use crate::{Error, Result};

pub use crate::ghash::HPowers;

pub const KEY_BYTES: usize = 32;
pub const TAG_BYTES: usize = 16;

const BLOCK_SIZE: usize = 16;

/// Message-size profile assumed at init when the caller gives no hint;
/// matches the large-message default of the plan selector.
const DEFAULT_MSG_HINT: usize = 65536;

/// Lifecycle phases. Transitions are monotonic:
/// Start → Aad? → Update → Final.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Phase {
    Start,
    Aad,
    Update,
    Final,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum StoreMode {
    Cached,
    Streaming,
}

/// Execution plan cached per context at init: which lane depth the
/// fused tier runs at, whether the phase-locked kernel is used, and
/// how ciphertext is stored.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Plan {
    pub(crate) lane_depth: u32,
    pub(crate) overlap: bool,
    pub(crate) store_mode: StoreMode,
}

impl Plan {
    fn select(caps: Caps, msg_size_hint: usize) -> Plan {
        let mut plan = Plan {
            lane_depth: 8,
            overlap: false,
            store_mode: StoreMode::Cached,
        };

        if caps.has(Caps::VAES) && msg_size_hint >= 16384 {
            plan.lane_depth = 16;
        }
        // Phase-locking pays where AESENC and PCLMULQDQ share a port.
        if plan.lane_depth == 16 && caps.has(Caps::AVX512F) {
            plan.overlap = true;
        }
        if msg_size_hint >= 65536 {
            plan.store_mode = StoreMode::Streaming;
        }

        plan
    }
}

/// AES-256-GCM context.
///
/// Owns the expanded key, the GHASH subkey and its power table, the
/// pre-counter block J0 and the running authenticator. ≈1 KiB,
/// stack-allocable, wiped on drop.
#[repr(align(64))]
pub struct AesGcm {
    round_keys: aes::RoundKeys,
    /// H = E_K(0^128), spec domain.
    h: [u8; BLOCK_SIZE],
    /// H^1..H^16 in the backend's domain.
    h_powers: HPowers,
    h_powers_ready: bool,
    j0: [u8; BLOCK_SIZE],
    /// Running GHASH accumulator in the backend's domain.
    ghash_state: [u8; BLOCK_SIZE],
    aad_len: u64,
    ct_len: u64,
    /// CTR counter; starts at 2 (1 is reserved for the tag mask).
    counter: u32,
    phase: Phase,
    backend: Backend,
    plan: Plan,
}

impl AesGcm {
    /// Expands the key, derives H = E_K(0), precomputes H^1..H^16 and
    /// the initial counter block.
    ///
    /// The IV must be non-empty; 96 bits is the fast path.
    pub fn init(key: &[u8; KEY_BYTES], iv: &[u8]) -> Result<AesGcm> {
        Self::init_with_backend(key, iv, cpu::backend())
    }

    pub(crate) fn init_with_backend(
        key: &[u8; KEY_BYTES],
        iv: &[u8],
        backend: Backend,
    ) -> Result<AesGcm> {
        if iv.is_empty() {
            return Err(Error::InvalidInput);
        }
        diag_inc!(GCM_INIT_CALLS);

        let round_keys = key_expand(backend, key);
        let h = encrypt_block(backend, &round_keys, &[0u8; BLOCK_SIZE]);

        let mut ctx = AesGcm {
            round_keys,
            h,
            h_powers: HPowers::zeroed(),
            h_powers_ready: false,
            j0: [0u8; BLOCK_SIZE],
            ghash_state: [0u8; BLOCK_SIZE],
            aad_len: 0,
            ct_len: 0,
            counter: 2,
            phase: Phase::Start,
            backend,
            plan: Plan::select(cpu::query_caps(), DEFAULT_MSG_HINT),
        };

        // Eager precompute: J0 derivation for odd IV lengths already
        // needs the table, and reset() reuses it.
        ctx.precompute_h_powers();
        ctx.derive_j0(iv);

        ctx.check_h_powers();
        Ok(ctx)
    }

    /// Starts a new message under the same key: reuses the round keys
    /// and H-powers, re-derives J0, zeroes the accumulator, counters
    /// and phase. Amortizes init across messages.
    pub fn reset(&mut self, iv: &[u8]) -> Result<()> {
        if iv.is_empty() {
            return Err(Error::InvalidInput);
        }

        self.ghash_state = [0u8; BLOCK_SIZE];
        self.aad_len = 0;
        self.ct_len = 0;
        self.counter = 2;
        self.phase = Phase::Start;
        self.derive_j0(iv);

        self.check_h_powers();
        Ok(())
    }

    fn precompute_h_powers(&mut self) {
        self.h_powers.0 = match self.backend {
            #[cfg(target_arch = "x86_64")]
            Backend::Clmul | Backend::Fused => unsafe { clmul::precompute(&self.h) },
            _ => ghash::precompute(&self.h),
        };
        self.h_powers_ready = true;
        self.check_h_powers();
    }

    /// Debug-build tripwire for the context invariant: once the table
    /// is marked ready, its H^2 entry must equal H ⊗ H in the
    /// backend's domain. Corruption here is fatal.
    #[cfg(debug_assertions)]
    fn check_h_powers(&self) {
        if !self.h_powers_ready {
            return;
        }
        let h2 = match self.backend {
            #[cfg(target_arch = "x86_64")]
            Backend::Clmul | Backend::Fused => unsafe {
                clmul::mul_reflected(&self.h_powers.0[0], &self.h_powers.0[0])
            },
            _ => ghash::mul_spec(&self.h_powers.0[0], &self.h_powers.0[0]),
        };
        assert_eq!(self.h_powers.0[1], h2, "H-power table corrupt");
    }

    #[cfg(not(debug_assertions))]
    fn check_h_powers(&self) {}

    /// J0 per NIST SP 800-38D §7.1: the IV itself for 96 bits,
    /// otherwise GHASH over the zero-padded IV followed by
    /// 0^64 ∥ [len(IV)]_64.
    fn derive_j0(&mut self, iv: &[u8]) {
        if iv.len() == 12 {
            self.j0 = [0u8; BLOCK_SIZE];
            self.j0[..12].copy_from_slice(iv);
            self.j0[15] = 1;
            return;
        }

        self.ghash_state = [0u8; BLOCK_SIZE];
        self.ghash_update(iv);

        let mut len_block = [0u8; BLOCK_SIZE];
        *array_mut_ref![len_block, 8, 8] = ((iv.len() as u64) * 8).to_be_bytes();
        self.ghash_update(&len_block);

        self.j0 = self.ghash_state_spec();
        self.ghash_state = [0u8; BLOCK_SIZE];
    }

    /// Folds data into the accumulator through the backend's GHASH.
    fn ghash_update(&mut self, data: &[u8]) {
        match self.backend {
            #[cfg(target_arch = "x86_64")]
            Backend::Clmul | Backend::Fused => unsafe {
                clmul::update8(&mut self.ghash_state, &self.h_powers, data)
            },
            _ => ghash::update_blocks(&mut self.ghash_state, &self.h_powers, data),
        }
    }

    /// The accumulator in spec-domain bytes (egress conversion).
    fn ghash_state_spec(&self) -> [u8; BLOCK_SIZE] {
        match self.backend {
            #[cfg(target_arch = "x86_64")]
            Backend::Clmul | Backend::Fused => clmul::reflect_bytes(&self.ghash_state),
            _ => self.ghash_state,
        }
    }

    /// Feeds additional authenticated data. May be called repeatedly,
    /// but only before any encrypt/decrypt update.
    pub fn aad_update(&mut self, aad: &[u8]) -> Result<()> {
        match self.phase {
            Phase::Start | Phase::Aad => {}
            Phase::Update | Phase::Final => return Err(Error::InvalidInput),
        }
        diag_inc!(GCM_AAD_CALLS);

        self.phase = Phase::Aad;
        self.aad_len = self.aad_len.wrapping_add(aad.len() as u64);
        self.ghash_update(aad);

        self.check_h_powers();
        Ok(())
    }

    /// Encrypts `pt` into `ct` and folds the ciphertext into the
    /// authenticator. The slices must have equal length.
    pub fn encrypt_update(&mut self, pt: &[u8], ct: &mut [u8]) -> Result<()> {
        if pt.len() != ct.len() {
            return Err(Error::InvalidInput);
        }
        if self.phase == Phase::Final {
            return Err(Error::InvalidInput);
        }
        diag_inc!(GCM_ENCRYPT_CALLS);

        if !self.h_powers_ready {
            self.precompute_h_powers();
        }

        self.phase = Phase::Update;
        self.ct_len = self.ct_len.wrapping_add(pt.len() as u64);

        let main = pt.len() - pt.len() % BLOCK_SIZE;
        match self.backend {
            #[cfg(target_arch = "x86_64")]
            Backend::Fused => self.encrypt_blocks_fused(&pt[..main], &mut ct[..main]),
            #[cfg(target_arch = "x86_64")]
            Backend::Clmul => {
                unsafe {
                    aes_ni::ctr_blocks(
                        &self.round_keys,
                        &self.j0,
                        self.counter,
                        &pt[..main],
                        &mut ct[..main],
                    );
                    clmul::update8(&mut self.ghash_state, &self.h_powers, &ct[..main]);
                }
                self.counter = self.counter.wrapping_add((main / BLOCK_SIZE) as u32);
            }
            _ => {
                aes::ctr_blocks(
                    &self.round_keys,
                    &self.j0,
                    self.counter,
                    &pt[..main],
                    &mut ct[..main],
                );
                ghash::update_blocks(&mut self.ghash_state, &self.h_powers, &ct[..main]);
                self.counter = self.counter.wrapping_add((main / BLOCK_SIZE) as u32);
            }
        }

        if main < pt.len() {
            self.xor_partial(&pt[main..], &mut ct[main..]);
            let tail = &ct[main..];
            self.ghash_update(tail);
        }

        self.check_h_powers();
        Ok(())
    }

    /// Fused tier: depth-16 (plain or phase-locked) per the cached
    /// plan, depth-8 batches, then a vector-CTR tail.
    #[cfg(target_arch = "x86_64")]
    fn encrypt_blocks_fused(&mut self, pt: &[u8], ct: &mut [u8]) {
        let len = pt.len();
        let mut offset = 0;

        if self.plan.lane_depth == 16 {
            while len - offset >= 256 {
                diag_inc!(GCM_FUSED16_BATCHES);
                unsafe {
                    if self.plan.overlap {
                        fused::encrypt16_pipelined(
                            &self.round_keys,
                            &pt[offset..offset + 256],
                            &mut ct[offset..offset + 256],
                            &self.j0,
                            self.counter,
                            &mut self.ghash_state,
                            &self.h_powers,
                        );
                    } else {
                        fused::encrypt16(
                            &self.round_keys,
                            &pt[offset..offset + 256],
                            &mut ct[offset..offset + 256],
                            &self.j0,
                            self.counter,
                            &mut self.ghash_state,
                            &self.h_powers,
                            self.plan.store_mode == StoreMode::Streaming,
                        );
                    }
                }
                self.counter = self.counter.wrapping_add(16);
                offset += 256;
            }
        }

        while len - offset >= 128 {
            diag_inc!(GCM_FUSED8_BATCHES);
            unsafe {
                fused::encrypt8(
                    &self.round_keys,
                    &pt[offset..offset + 128],
                    &mut ct[offset..offset + 128],
                    &self.j0,
                    self.counter,
                    &mut self.ghash_state,
                    &self.h_powers,
                );
            }
            self.counter = self.counter.wrapping_add(8);
            offset += 128;
        }

        if offset < len {
            unsafe {
                fused::ctr_blocks(
                    &self.round_keys,
                    &self.j0,
                    self.counter,
                    &pt[offset..],
                    &mut ct[offset..],
                );
                clmul::update8(&mut self.ghash_state, &self.h_powers, &ct[offset..]);
            }
            self.counter = self
                .counter
                .wrapping_add(((len - offset) / BLOCK_SIZE) as u32);
        }
    }

    /// One keystream block for a sub-block tail; consumes a counter.
    fn xor_partial(&mut self, input: &[u8], output: &mut [u8]) {
        let mut ctr_block = self.j0;
        *array_mut_ref![ctr_block, 12, 4] = self.counter.to_be_bytes();
        let keystream = encrypt_block(self.backend, &self.round_keys, &ctr_block);

        for (i, (o, p)) in output.iter_mut().zip(input.iter()).enumerate() {
            *o = p ^ keystream[i];
        }
        self.counter = self.counter.wrapping_add(1);
    }

    /// Decrypts `ct` into `pt`. The ciphertext is folded into the
    /// authenticator **before** it is decrypted.
    pub fn decrypt_update(&mut self, ct: &[u8], pt: &mut [u8]) -> Result<()> {
        if ct.len() != pt.len() {
            return Err(Error::InvalidInput);
        }
        if self.phase == Phase::Final {
            return Err(Error::InvalidInput);
        }
        diag_inc!(GCM_DECRYPT_CALLS);

        if !self.h_powers_ready {
            self.precompute_h_powers();
        }

        self.phase = Phase::Update;
        self.ct_len = self.ct_len.wrapping_add(ct.len() as u64);

        self.ghash_update(ct);

        let main = ct.len() - ct.len() % BLOCK_SIZE;
        match self.backend {
            #[cfg(target_arch = "x86_64")]
            Backend::Fused => unsafe {
                fused::ctr_blocks(
                    &self.round_keys,
                    &self.j0,
                    self.counter,
                    &ct[..main],
                    &mut pt[..main],
                );
            },
            #[cfg(target_arch = "x86_64")]
            Backend::Clmul => unsafe {
                aes_ni::ctr_blocks(
                    &self.round_keys,
                    &self.j0,
                    self.counter,
                    &ct[..main],
                    &mut pt[..main],
                );
            },
            _ => {
                aes::ctr_blocks(
                    &self.round_keys,
                    &self.j0,
                    self.counter,
                    &ct[..main],
                    &mut pt[..main],
                );
            }
        }
        self.counter = self.counter.wrapping_add((main / BLOCK_SIZE) as u32);

        if main < ct.len() {
            self.xor_partial(&ct[main..], &mut pt[main..]);
        }

        self.check_h_powers();
        Ok(())
    }

    /// GHASH output masked with E_K(J0 ∥ counter=1), spec-domain bytes.
    fn compute_tag(&self) -> [u8; TAG_BYTES] {
        let mut tag = match self.backend {
            #[cfg(target_arch = "x86_64")]
            Backend::Clmul | Backend::Fused => unsafe {
                clmul::finalize(
                    &self.ghash_state,
                    &self.h_powers.0[0],
                    self.aad_len,
                    self.ct_len,
                )
            },
            _ => ghash::finalize(
                &self.ghash_state,
                &self.h_powers.0[0],
                self.aad_len,
                self.ct_len,
            ),
        };

        let mut ctr_block = self.j0;
        *array_mut_ref![ctr_block, 12, 4] = 1u32.to_be_bytes();
        let mask = encrypt_block(self.backend, &self.round_keys, &ctr_block);

        for i in 0..TAG_BYTES {
            tag[i] ^= mask[i];
        }
        tag
    }

    /// Appends the length block, finalizes the authenticator and
    /// writes the 16-byte tag. The context accepts only `wipe`
    /// afterwards (or `reset` for a new message).
    pub fn encrypt_final(&mut self, tag: &mut [u8; TAG_BYTES]) -> Result<()> {
        if self.phase == Phase::Final {
            return Err(Error::InvalidInput);
        }
        diag_inc!(GCM_FINAL_CALLS);

        *tag = self.compute_tag();
        self.phase = Phase::Final;

        self.check_h_powers();
        Ok(())
    }

    /// Recomputes the tag and compares it to `tag` in constant time.
    ///
    /// On `AuthFailure` every byte produced by earlier
    /// `decrypt_update` calls is undefined and must not be released
    /// downstream.
    pub fn decrypt_final(&mut self, tag: &[u8; TAG_BYTES]) -> Result<()> {
        if self.phase == Phase::Final {
            return Err(Error::InvalidInput);
        }
        diag_inc!(GCM_FINAL_CALLS);

        let mut computed = self.compute_tag();
        self.phase = Phase::Final;

        let equal = ct::constant_eq(&computed, tag);
        ct::wipe(&mut computed);

        self.check_h_powers();
        if equal {
            Ok(())
        } else {
            Err(Error::AuthFailure)
        }
    }

    /// Zeroizes all key material and state.
    pub fn wipe(&mut self) {
        self.round_keys.zeroize();
        self.h.zeroize();
        self.h_powers.0.zeroize();
        self.j0.zeroize();
        self.ghash_state.zeroize();
        self.aad_len = 0;
        self.ct_len = 0;
        self.counter = 0;
        self.h_powers_ready = false;
        self.phase = Phase::Final;
    }
}

impl Drop for AesGcm {
    fn drop(&mut self) {
        self.wipe();
    }
}

fn key_expand(backend: Backend, key: &[u8; KEY_BYTES]) -> aes::RoundKeys {
    match backend {
        #[cfg(target_arch = "x86_64")]
        Backend::Clmul | Backend::Fused => unsafe { aes_ni::key_expand(key) },
        _ => aes::key_expand(key),
    }
}

fn encrypt_block(backend: Backend, rk: &aes::RoundKeys, block: &[u8; BLOCK_SIZE]) -> [u8; 16] {
    match backend {
        #[cfg(target_arch = "x86_64")]
        Backend::Clmul | Backend::Fused => unsafe { aes_ni::encrypt_block(rk, block) },
        _ => aes::encrypt_block(rk, block),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::SplitMix64;
    use hex_literal::hex;
    use std::vec;
    use std::vec::Vec;

    fn backends() -> Vec<Backend> {
        [Backend::Scalar, Backend::Clmul, Backend::Fused]
            .into_iter()
            .filter(|b| cpu::runtime_supports(*b))
            .collect()
    }

    /// Fused-tier plan variants the differential tests force: depth-8,
    /// depth-16, and phase-locked depth-16.
    fn plans_for(backend: Backend) -> Vec<Plan> {
        let cached = Plan {
            lane_depth: 8,
            overlap: false,
            store_mode: StoreMode::Cached,
        };
        match backend {
            Backend::Fused => vec![
                cached,
                Plan {
                    lane_depth: 16,
                    overlap: false,
                    store_mode: StoreMode::Cached,
                },
                Plan {
                    lane_depth: 16,
                    overlap: false,
                    store_mode: StoreMode::Streaming,
                },
                Plan {
                    lane_depth: 16,
                    overlap: true,
                    store_mode: StoreMode::Cached,
                },
            ],
            _ => vec![cached],
        }
    }

    fn encrypt_with(
        backend: Backend,
        plan: Plan,
        key: &[u8; 32],
        iv: &[u8],
        aad: &[u8],
        pt: &[u8],
    ) -> (Vec<u8>, [u8; 16]) {
        let mut ctx = AesGcm::init_with_backend(key, iv, backend).unwrap();
        ctx.plan = plan;

        if !aad.is_empty() {
            ctx.aad_update(aad).unwrap();
        }
        let mut ct = vec![0u8; pt.len()];
        ctx.encrypt_update(pt, &mut ct).unwrap();

        let mut tag = [0u8; 16];
        ctx.encrypt_final(&mut tag).unwrap();
        (ct, tag)
    }

    fn decrypt_with(
        backend: Backend,
        key: &[u8; 32],
        iv: &[u8],
        aad: &[u8],
        ct: &[u8],
        tag: &[u8; 16],
    ) -> Result<Vec<u8>> {
        let mut ctx = AesGcm::init_with_backend(key, iv, backend)?;
        if !aad.is_empty() {
            ctx.aad_update(aad)?;
        }
        let mut pt = vec![0u8; ct.len()];
        ctx.decrypt_update(ct, &mut pt)?;
        ctx.decrypt_final(tag)?;
        Ok(pt)
    }

    fn default_plan() -> Plan {
        Plan {
            lane_depth: 8,
            overlap: false,
            store_mode: StoreMode::Cached,
        }
    }

    struct NistVector {
        key: [u8; 32],
        iv: &'static [u8],
        pt: &'static [u8],
        aad: &'static [u8],
        ct: &'static [u8],
        tag: &'static [u8],
    }

    /// NIST SP 800-38D AES-256 vectors, including the two non-96-bit
    /// IV cases. The last vector carries a truncated (96-bit) tag; GCM
    /// truncated tags are prefixes of the full tag.
    fn nist_vectors() -> Vec<NistVector> {
        vec![
            NistVector {
                key: [0u8; 32],
                iv: &hex!("000000000000000000000000"),
                pt: &[],
                aad: &[],
                ct: &[],
                tag: &hex!("530f8afbc74536b9a963b4f1c4cb738b"),
            },
            NistVector {
                key: [0u8; 32],
                iv: &hex!("000000000000000000000000"),
                pt: &hex!("00000000000000000000000000000000"),
                aad: &[],
                ct: &hex!("cea7403d4d606b6e074ec5d3baf39d18"),
                tag: &hex!("d0d1c8a799996bf0265b98b5d48ab919"),
            },
            NistVector {
                key: hex!("feffe9928665731c6d6a8f9467308308feffe9928665731c6d6a8f9467308308"),
                iv: &hex!("cafebabefacedbaddecaf888"),
                pt: &hex!(
                    "d9313225f88406e5a55909c5aff5269a"
                    "86a7a9531534f7da2e4c303d8a318a72"
                    "1c3c0c95956809532fcf0e2449a6b525"
                    "b16aedf5aa0de657ba637b391aafd255"
                ),
                aad: &hex!("feedfacedeadbeeffeedfacedeadbeefabaddad2"),
                ct: &hex!(
                    "522dc1f099567d07f47f37a32a84427d"
                    "643a8cdcbfe5c0c97598a2bd2555d1aa"
                    "8cb08e48590dbb3da7b08b1056828838"
                    "c5f61e6393ba7a0abcc9f662898015ad"
                ),
                tag: &hex!("2df7cd675b4f09163b41ebf980a7f638"),
            },
            NistVector {
                key: hex!("feffe9928665731c6d6a8f9467308308feffe9928665731c6d6a8f9467308308"),
                iv: &hex!("cafebabefacedbaddecaf888"),
                pt: &hex!(
                    "d9313225f88406e5a55909c5aff5269a"
                    "86a7a9531534f7da2e4c303d8a318a72"
                    "1c3c0c95956809532fcf0e2449a6b525"
                    "b16aedf5aa0de657ba637b39"
                ),
                aad: &hex!("feedfacedeadbeeffeedfacedeadbeefabaddad2"),
                ct: &hex!(
                    "522dc1f099567d07f47f37a32a84427d"
                    "643a8cdcbfe5c0c97598a2bd2555d1aa"
                    "8cb08e48590dbb3da7b08b1056828838"
                    "c5f61e6393ba7a0abcc9f662"
                ),
                tag: &hex!("76fc6ece0f4e1768cddf8853bb2d551b"),
            },
            // 8-byte IV: exercises the GHASH-derived J0 path.
            NistVector {
                key: hex!("feffe9928665731c6d6a8f9467308308feffe9928665731c6d6a8f9467308308"),
                iv: &hex!("cafebabefacedbad"),
                pt: &hex!(
                    "d9313225f88406e5a55909c5aff5269a"
                    "86a7a9531534f7da2e4c303d8a318a72"
                    "1c3c0c95956809532fcf0e2449a6b525"
                    "b16aedf5aa0de657ba637b39"
                ),
                aad: &hex!("feedfacedeadbeeffeedfacedeadbeefabaddad2"),
                ct: &hex!(
                    "c3762df1ca787d32ae47c13bf19844cb"
                    "af1ae14d0b976afac52ff7d79bba9de0"
                    "feb582d33934a4f0954cc2363bc73f78"
                    "62ac430e64abe499f47c9b1f"
                ),
                tag: &hex!("3a337dbf46a792c45e454913fe2ea8f2"),
            },
            // 60-byte IV, truncated tag.
            NistVector {
                key: hex!("feffe9928665731c6d6a8f9467308308feffe9928665731c6d6a8f9467308308"),
                iv: &hex!(
                    "9313225df88406e555909c5aff5269aa"
                    "6a7a9538534f7da1e4c303d2a318a728"
                    "c3c0c95156809539fcf0e2429a6b5254"
                    "16aedbf5a0de6a57a637b39b"
                ),
                pt: &hex!(
                    "d9313225f88406e5a55909c5aff5269a"
                    "86a7a9531534f7da2e4c303d8a318a72"
                    "1c3c0c95956809532fcf0e2449a6b525"
                    "b16aedf5aa0de657ba637b39"
                ),
                aad: &hex!("feedfacedeadbeeffeedfacedeadbeefabaddad2"),
                ct: &hex!(
                    "5a8def2f0c9e53f1f75d7853659e2a20"
                    "eeb2b22aafde6419a058ab4f6f746bf4"
                    "0fc0c3b780f244452da3ebf1c5d82cde"
                    "a2418997200ef82e44ae7e3f"
                ),
                tag: &hex!("a44a8266ee1c8eb0c8b5d4cf"),
            },
        ]
    }

    #[test]
    fn nist_vectors_all_backends() {
        for backend in backends() {
            for plan in plans_for(backend) {
                for (i, v) in nist_vectors().iter().enumerate() {
                    let (ct, tag) = encrypt_with(backend, plan, &v.key, v.iv, v.aad, v.pt);
                    assert_eq!(&ct[..], v.ct, "vector {i} ct, {backend:?} {plan:?}");
                    assert_eq!(
                        &tag[..v.tag.len()],
                        v.tag,
                        "vector {i} tag, {backend:?} {plan:?}"
                    );

                    // Full-tag vectors also decrypt.
                    if v.tag.len() == TAG_BYTES {
                        let pt =
                            decrypt_with(backend, &v.key, v.iv, v.aad, v.ct, &tag).unwrap();
                        assert_eq!(&pt[..], v.pt, "vector {i} decrypt, {backend:?}");
                    }
                }
            }
        }
    }

    #[test]
    fn round_trip_lengths() {
        let lengths: &[usize] = &[0, 1, 15, 16, 17, 127, 128, 129, 4095, 4096, 4097];

        let mut rng = SplitMix64::new(0x6c6_0001);
        let mut key = [0u8; 32];
        rng.fill(&mut key);
        let iv = hex!("00112233445566778899aabb");
        let aad = b"session header";

        for backend in backends() {
            for plan in plans_for(backend) {
                for &len in lengths {
                    let mut pt = vec![0u8; len];
                    rng.fill(&mut pt);

                    let (ct, tag) = encrypt_with(backend, plan, &key, &iv, aad, &pt);
                    let out = decrypt_with(backend, &key, &iv, aad, &ct, &tag).unwrap();
                    assert_eq!(out, pt, "len {len} {backend:?}");
                }
            }
        }
    }

    #[test]
    fn round_trip_random_lengths_up_to_64k() {
        let mut rng = SplitMix64::new(0x6c6_0002);
        let mut key = [0u8; 32];
        rng.fill(&mut key);
        let iv = hex!("deadbeefcafebabe00000001");

        for backend in backends() {
            // The portable bit-loop engine gets smaller sizes to keep
            // the suite quick; accelerated tiers cover the full range.
            let max = if backend == Backend::Scalar { 8192 } else { 65536 };
            for _ in 0..4 {
                let len = (rng.next() as usize) % max;
                let mut pt = vec![0u8; len];
                rng.fill(&mut pt);

                let (ct, tag) = encrypt_with(backend, default_plan(), &key, &iv, &[], &pt);
                let out = decrypt_with(backend, &key, &iv, &[], &ct, &tag).unwrap();
                assert_eq!(out, pt, "len {len} {backend:?}");
            }
        }
    }

    #[test]
    fn cross_backend_equivalence() {
        let available = backends();
        if available.len() < 2 {
            return;
        }

        let mut rng = SplitMix64::new(0x6c6_0003);
        let mut key = [0u8; 32];
        rng.fill(&mut key);
        let iv = hex!("0102030405060708090a0b0c");

        let mut aad = [0u8; 48];
        rng.fill(&mut aad);

        for len in [0usize, 48, 129, 256, 1024, 4097] {
            let mut pt = vec![0u8; len];
            rng.fill(&mut pt);

            let mut results: Vec<(Vec<u8>, [u8; 16])> = Vec::new();
            for &backend in &available {
                for plan in plans_for(backend) {
                    results.push(encrypt_with(backend, plan, &key, &iv, &aad, &pt));
                }
            }

            let (ref ct0, ref tag0) = results[0];
            for (ct, tag) in &results[1..] {
                assert_eq!(ct, ct0, "ciphertext diverged at len {len}");
                assert_eq!(tag, tag0, "tag diverged at len {len}");
            }
        }
    }

    #[test]
    fn differential_fuzz_against_portable() {
        // Every accelerated backend against the portable reference on
        // seeded random tuples.
        let accelerated: Vec<Backend> = backends()
            .into_iter()
            .filter(|b| *b != Backend::Scalar)
            .collect();
        if accelerated.is_empty() {
            return;
        }

        let mut rng = SplitMix64::new(0x6c6_0004);
        for round in 0..100 {
            let mut key = [0u8; 32];
            rng.fill(&mut key);

            let iv_len = 1 + (rng.next() as usize) % 24;
            let mut iv = vec![0u8; iv_len];
            rng.fill(&mut iv);

            let aad_len = (rng.next() as usize) % 256;
            let mut aad = vec![0u8; aad_len];
            rng.fill(&mut aad);

            let pt_len = (rng.next() as usize) % 2048;
            let mut pt = vec![0u8; pt_len];
            rng.fill(&mut pt);

            let reference =
                encrypt_with(Backend::Scalar, default_plan(), &key, &iv, &aad, &pt);

            for &backend in &accelerated {
                for plan in plans_for(backend) {
                    let got = encrypt_with(backend, plan, &key, &iv, &aad, &pt);
                    assert_eq!(got, reference, "round {round} {backend:?} {plan:?}");
                }
            }
        }
    }

    #[test]
    fn tag_bijection() {
        // Perturbing one byte of any input changes the tag.
        let mut rng = SplitMix64::new(0x6c6_0005);
        let backend = *backends().last().unwrap();

        for _ in 0..256 {
            let mut key = [0u8; 32];
            rng.fill(&mut key);
            let mut iv = [0u8; 12];
            rng.fill(&mut iv);
            let mut aad = [0u8; 24];
            rng.fill(&mut aad);
            let mut pt = [0u8; 48];
            rng.fill(&mut pt);

            let (_, tag) = encrypt_with(backend, default_plan(), &key, &iv, &aad, &pt);

            let which = rng.next() % 4;
            let bump = 1 + (rng.next() as u8 % 255);
            match which {
                0 => key[rng.next() as usize % 32] ^= bump,
                1 => iv[rng.next() as usize % 12] ^= bump,
                2 => aad[rng.next() as usize % 24] ^= bump,
                _ => pt[rng.next() as usize % 48] ^= bump,
            }

            let (_, tag2) = encrypt_with(backend, default_plan(), &key, &iv, &aad, &pt);
            assert_ne!(tag, tag2, "perturbation class {which}");
        }
    }

    #[test]
    fn auth_failure_on_any_flipped_bit() {
        let mut rng = SplitMix64::new(0x6c6_0006);
        let backend = *backends().last().unwrap();

        let mut key = [0u8; 32];
        rng.fill(&mut key);
        let iv = hex!("a0a1a2a3a4a5a6a7a8a9aaab");

        for trial in 0..1000 {
            let mut pt = [0u8; 40];
            rng.fill(&mut pt);

            let (mut ct, mut tag) =
                encrypt_with(backend, default_plan(), &key, &iv, &[], &pt);

            // Alternate between tag flips and ciphertext flips.
            if trial % 2 == 0 {
                let bit = rng.next() as usize % 128;
                tag[bit / 8] ^= 1 << (bit % 8);
            } else {
                let bit = rng.next() as usize % (ct.len() * 8);
                ct[bit / 8] ^= 1 << (bit % 8);
            }

            let err = decrypt_with(backend, &key, &iv, &[], &ct, &tag).unwrap_err();
            assert_eq!(err, Error::AuthFailure, "trial {trial}");
        }
    }

    #[test]
    fn reset_equals_fresh_init() {
        let mut rng = SplitMix64::new(0x6c6_0007);
        let mut key = [0u8; 32];
        rng.fill(&mut key);

        let iv1 = hex!("000000000000000000000001");
        let iv2 = hex!("000000000000000000000002");
        // Also a non-96-bit IV through the reset path.
        let iv3 = hex!("0000000000000003");

        let mut msg1 = [0u8; 80];
        let mut msg2 = [0u8; 80];
        rng.fill(&mut msg1);
        rng.fill(&mut msg2);

        for backend in backends() {
            let mut ctx = AesGcm::init_with_backend(&key, &iv1, backend).unwrap();
            let mut ct = [0u8; 80];
            ctx.encrypt_update(&msg1, &mut ct).unwrap();
            let mut tag = [0u8; 16];
            ctx.encrypt_final(&mut tag).unwrap();

            for iv in [&iv2[..], &iv3[..]] {
                ctx.reset(iv).unwrap();
                let mut ct_reset = [0u8; 80];
                ctx.encrypt_update(&msg2, &mut ct_reset).unwrap();
                let mut tag_reset = [0u8; 16];
                ctx.encrypt_final(&mut tag_reset).unwrap();

                let (ct_fresh, tag_fresh) =
                    encrypt_with(backend, default_plan(), &key, iv, &[], &msg2);
                assert_eq!(&ct_reset[..], &ct_fresh[..], "{backend:?}");
                assert_eq!(tag_reset, tag_fresh, "{backend:?}");
            }
        }
    }

    #[test]
    fn streaming_multi_update_matches_oneshot() {
        let mut rng = SplitMix64::new(0x6c6_0008);
        let mut key = [0u8; 32];
        rng.fill(&mut key);
        let iv = hex!("101112131415161718191a1b");

        let mut pt = [0u8; 400];
        rng.fill(&mut pt);

        for backend in backends() {
            let (expected_ct, expected_tag) =
                encrypt_with(backend, default_plan(), &key, &iv, b"aad-part-onetwo!", &pt);

            // AAD and plaintext split into block-aligned pieces plus a
            // ragged final piece.
            let mut ctx = AesGcm::init_with_backend(&key, &iv, backend).unwrap();
            ctx.aad_update(b"aad-part-onetwo!").unwrap();

            let mut ct = [0u8; 400];
            ctx.encrypt_update(&pt[..256], &mut ct[..256]).unwrap();
            ctx.encrypt_update(&pt[256..384], &mut ct[256..384]).unwrap();
            ctx.encrypt_update(&pt[384..], &mut ct[384..]).unwrap();

            let mut tag = [0u8; 16];
            ctx.encrypt_final(&mut tag).unwrap();

            assert_eq!(&ct[..], &expected_ct[..], "{backend:?}");
            assert_eq!(tag, expected_tag, "{backend:?}");
        }
    }

    #[test]
    fn phase_machine_rejects_out_of_order_calls() {
        let key = [0u8; 32];
        let iv = [0u8; 12];

        // Zero-length IV.
        assert_eq!(
            AesGcm::init(&key, &[]).map(|_| ()).unwrap_err(),
            Error::InvalidInput
        );

        let mut ctx = AesGcm::init(&key, &iv).unwrap();

        // AAD after data.
        let mut ct = [0u8; 16];
        ctx.encrypt_update(&[0u8; 16], &mut ct).unwrap();
        assert_eq!(ctx.aad_update(b"late").unwrap_err(), Error::InvalidInput);

        // Anything after final except wipe/reset.
        let mut tag = [0u8; 16];
        ctx.encrypt_final(&mut tag).unwrap();
        assert_eq!(
            ctx.encrypt_update(&[0u8; 16], &mut ct).unwrap_err(),
            Error::InvalidInput
        );
        assert_eq!(ctx.aad_update(b"x").unwrap_err(), Error::InvalidInput);
        assert_eq!(ctx.encrypt_final(&mut tag).unwrap_err(), Error::InvalidInput);
        assert_eq!(ctx.decrypt_final(&tag).unwrap_err(), Error::InvalidInput);

        // Mismatched buffer lengths.
        let mut ctx = AesGcm::init(&key, &iv).unwrap();
        let mut short = [0u8; 8];
        assert_eq!(
            ctx.encrypt_update(&[0u8; 16], &mut short).unwrap_err(),
            Error::InvalidInput
        );
    }

    #[test]
    fn wipe_clears_key_material() {
        let key = hex!("feffe9928665731c6d6a8f9467308308feffe9928665731c6d6a8f9467308308");
        let mut ctx = AesGcm::init(&key, &[0u8; 12]).unwrap();
        ctx.wipe();

        assert_eq!(ctx.round_keys, [[0u8; 16]; 15]);
        assert_eq!(ctx.h, [0u8; 16]);
        assert_eq!(ctx.h_powers.0, [[0u8; 16]; 16]);
        assert_eq!(ctx.phase, Phase::Final);
    }

    #[test]
    fn h_power_invariant_holds() {
        let mut rng = SplitMix64::new(0x6c6_0009);
        let mut key = [0u8; 32];
        rng.fill(&mut key);

        for backend in backends() {
            let ctx = AesGcm::init_with_backend(&key, &[1u8; 12], backend).unwrap();
            assert!(ctx.h_powers_ready);

            // h_powers[i] = H^(i+1) in the backend's own domain.
            match backend {
                #[cfg(target_arch = "x86_64")]
                Backend::Clmul | Backend::Fused => {
                    let h2 = unsafe {
                        clmul::mul_reflected(&ctx.h_powers.0[0], &ctx.h_powers.0[0])
                    };
                    assert_eq!(ctx.h_powers.0[1], h2);
                }
                _ => {
                    let h2 = ghash::mul_spec(&ctx.h_powers.0[0], &ctx.h_powers.0[0]);
                    assert_eq!(ctx.h_powers.0[1], h2);
                }
            }
        }
    }
}
