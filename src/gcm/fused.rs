//! Single-pass fused AES-GCM kernels on VAES + CLMUL.
//!
//! Write-avoid discipline: the counter blocks are encrypted with
//! 256-bit vector AES, XORed with plaintext, and the resulting
//! ciphertext is fed to the GHASH fold while still in registers. The
//! output buffer is not touched until the fold has consumed every
//! block, then each block is stored exactly once.

use core::arch::x86_64::*;

use crate::aes::{RoundKeys, NUM_ROUNDS};
use crate::ghash::clmul::{fold_n, karatsuba_parts, reduce, reflect128};
use crate::ghash::{Block, HPowers};

/// Broadcast each 128-bit round key into both lanes of a YMM register,
/// once per kernel invocation.
#[inline]
#[target_feature(enable = "avx2")]
unsafe fn broadcast_keys(rk: &RoundKeys) -> [__m256i; NUM_ROUNDS + 1] {
    let mut out = [_mm256_setzero_si256(); NUM_ROUNDS + 1];
    for (slot, key) in out.iter_mut().zip(rk.iter()) {
        *slot = _mm256_broadcastsi128_si256(_mm_loadu_si128(key.as_ptr().cast()));
    }
    out
}

/// Two consecutive counter blocks packed into one YMM register: J0's
/// 96-bit prefix with the big-endian counter inserted into the low
/// lane of each half.
#[inline]
#[target_feature(enable = "avx2", enable = "sse4.1")]
unsafe fn counter_pair(base: __m128i, ctr: u32) -> __m256i {
    let c0 = _mm_insert_epi32::<3>(base, ctr.swap_bytes() as i32);
    let c1 = _mm_insert_epi32::<3>(base, ctr.wrapping_add(1).swap_bytes() as i32);
    _mm256_setr_m128i(c0, c1)
}

/// AES-256 over four YMM lanes (8 blocks): XOR, 13 AESENC, AESENCLAST.
#[inline]
#[target_feature(enable = "avx2", enable = "vaes")]
unsafe fn aes_rounds4(mut s: [__m256i; 4], rk: &[__m256i; NUM_ROUNDS + 1]) -> [__m256i; 4] {
    for lane in s.iter_mut() {
        *lane = _mm256_xor_si256(*lane, rk[0]);
    }
    for key in rk.iter().take(NUM_ROUNDS).skip(1) {
        for lane in s.iter_mut() {
            *lane = _mm256_aesenc_epi128(*lane, *key);
        }
    }
    for lane in s.iter_mut() {
        *lane = _mm256_aesenclast_epi128(*lane, rk[NUM_ROUNDS]);
    }
    s
}

/// Splits four ciphertext YMMs into eight XMM blocks.
#[inline]
#[target_feature(enable = "avx2")]
unsafe fn split8(c: [__m256i; 4]) -> [__m128i; 8] {
    [
        _mm256_castsi256_si128(c[0]),
        _mm256_extracti128_si256::<1>(c[0]),
        _mm256_castsi256_si128(c[1]),
        _mm256_extracti128_si256::<1>(c[1]),
        _mm256_castsi256_si128(c[2]),
        _mm256_extracti128_si256::<1>(c[2]),
        _mm256_castsi256_si128(c[3]),
        _mm256_extracti128_si256::<1>(c[3]),
    ]
}

/// Fused encrypt+authenticate, depth 8 (128 bytes).
///
/// Preconditions: `counter >= 2`, H-powers ready. Postcondition: the
/// accumulator equals what eight single-block updates would produce.
///
/// SAFETY: requires AVX2 + VAES + PCLMULQDQ (checked by the
/// dispatcher).
#[target_feature(
    enable = "avx2",
    enable = "vaes",
    enable = "aes",
    enable = "pclmulqdq",
    enable = "ssse3",
    enable = "sse4.1"
)]
pub(crate) unsafe fn encrypt8(
    rk: &RoundKeys,
    pt: &[u8],
    ct: &mut [u8],
    j0: &Block,
    counter: u32,
    ghash_state: &mut Block,
    h_powers: &HPowers,
) {
    debug_assert_eq!(pt.len(), 128);
    debug_assert_eq!(ct.len(), 128);

    let rky = broadcast_keys(rk);
    let base = _mm_loadu_si128(j0.as_ptr().cast());

    let ctrs = [
        counter_pair(base, counter),
        counter_pair(base, counter.wrapping_add(2)),
        counter_pair(base, counter.wrapping_add(4)),
        counter_pair(base, counter.wrapping_add(6)),
    ];
    let keystream = aes_rounds4(ctrs, &rky);

    let p = pt.as_ptr();
    let mut c_ymm = [_mm256_setzero_si256(); 4];
    for (i, lane) in c_ymm.iter_mut().enumerate() {
        *lane = _mm256_xor_si256(
            keystream[i],
            _mm256_loadu_si256(p.add(32 * i).cast()),
        );
    }
    let c = split8(c_ymm);

    // Fold into GHASH before anything is stored. Oldest block pairs
    // with the highest power: (Xi ⊕ C0)·H^8 ⊕ C1·H^7 ⊕ … ⊕ C7·H^1.
    let xi = _mm_loadu_si128(ghash_state.as_ptr().cast());

    let mut h = [_mm_setzero_si128(); 8];
    for (i, slot) in h.iter_mut().enumerate() {
        *slot = _mm_loadu_si128(h_powers.0[7 - i].as_ptr().cast());
    }

    let mut c_le = [_mm_setzero_si128(); 8];
    for (i, slot) in c_le.iter_mut().enumerate() {
        *slot = reflect128(c[i]);
    }
    c_le[0] = _mm_xor_si128(c_le[0], xi);

    let xi = fold_n(&c_le, &h);
    _mm_storeu_si128(ghash_state.as_mut_ptr().cast(), xi);

    let q = ct.as_mut_ptr();
    for (i, block) in c.iter().enumerate() {
        _mm_storeu_si128(q.add(16 * i).cast(), *block);
    }
}

/// Fused encrypt+authenticate, depth 16 (256 bytes), one reduction.
///
/// With `streaming` set and an aligned destination the ciphertext goes
/// out through non-temporal stores.
///
/// SAFETY: requires AVX2 + VAES + PCLMULQDQ (checked by the
/// dispatcher).
#[target_feature(
    enable = "avx2",
    enable = "vaes",
    enable = "aes",
    enable = "pclmulqdq",
    enable = "ssse3",
    enable = "sse4.1"
)]
pub(crate) unsafe fn encrypt16(
    rk: &RoundKeys,
    pt: &[u8],
    ct: &mut [u8],
    j0: &Block,
    counter: u32,
    ghash_state: &mut Block,
    h_powers: &HPowers,
    streaming: bool,
) {
    debug_assert_eq!(pt.len(), 256);
    debug_assert_eq!(ct.len(), 256);

    let rky = broadcast_keys(rk);
    let base = _mm_loadu_si128(j0.as_ptr().cast());

    let mut ctrs = [_mm256_setzero_si256(); 8];
    for (i, lane) in ctrs.iter_mut().enumerate() {
        *lane = counter_pair(base, counter.wrapping_add(2 * i as u32));
    }

    let lo_half = aes_rounds4([ctrs[0], ctrs[1], ctrs[2], ctrs[3]], &rky);
    let hi_half = aes_rounds4([ctrs[4], ctrs[5], ctrs[6], ctrs[7]], &rky);

    let p = pt.as_ptr();
    let mut c_ymm = [_mm256_setzero_si256(); 8];
    for i in 0..4 {
        c_ymm[i] = _mm256_xor_si256(lo_half[i], _mm256_loadu_si256(p.add(32 * i).cast()));
        c_ymm[4 + i] = _mm256_xor_si256(
            hi_half[i],
            _mm256_loadu_si256(p.add(128 + 32 * i).cast()),
        );
    }

    let c_lo = split8([c_ymm[0], c_ymm[1], c_ymm[2], c_ymm[3]]);
    let c_hi = split8([c_ymm[4], c_ymm[5], c_ymm[6], c_ymm[7]]);

    let xi = _mm_loadu_si128(ghash_state.as_ptr().cast());

    let mut h = [_mm_setzero_si128(); 16];
    for (i, slot) in h.iter_mut().enumerate() {
        *slot = _mm_loadu_si128(h_powers.0[15 - i].as_ptr().cast());
    }

    let mut c_le = [_mm_setzero_si128(); 16];
    for i in 0..8 {
        c_le[i] = reflect128(c_lo[i]);
        c_le[8 + i] = reflect128(c_hi[i]);
    }
    c_le[0] = _mm_xor_si128(c_le[0], xi);

    let xi = fold_n(&c_le, &h);
    _mm_storeu_si128(ghash_state.as_mut_ptr().cast(), xi);

    let q = ct.as_mut_ptr();
    if streaming && (q as usize) % 16 == 0 {
        for (i, block) in c_lo.iter().chain(c_hi.iter()).enumerate() {
            _mm_stream_si128(q.add(16 * i).cast(), *block);
        }
        _mm_sfence();
    } else {
        for (i, block) in c_lo.iter().chain(c_hi.iter()).enumerate() {
            _mm_storeu_si128(q.add(16 * i).cast(), *block);
        }
    }
}

/// Phase-locked depth-16 kernel (AABB rhythm).
///
/// The AES rounds of the second eight blocks are issued interleaved
/// with the GHASH multiplications of the first eight, because AESENC
/// and PCLMULQDQ contend for the same execution port. Ordering is
/// deterministic and the result is bit-equal to sequential processing.
///
/// SAFETY: requires AVX2 + VAES + PCLMULQDQ (checked by the
/// dispatcher).
#[target_feature(
    enable = "avx2",
    enable = "vaes",
    enable = "aes",
    enable = "pclmulqdq",
    enable = "ssse3",
    enable = "sse4.1"
)]
pub(crate) unsafe fn encrypt16_pipelined(
    rk: &RoundKeys,
    pt: &[u8],
    ct: &mut [u8],
    j0: &Block,
    counter: u32,
    ghash_state: &mut Block,
    h_powers: &HPowers,
) {
    debug_assert_eq!(pt.len(), 256);
    debug_assert_eq!(ct.len(), 256);

    let rky = broadcast_keys(rk);
    let base = _mm_loadu_si128(j0.as_ptr().cast());

    let ctrs_a = [
        counter_pair(base, counter),
        counter_pair(base, counter.wrapping_add(2)),
        counter_pair(base, counter.wrapping_add(4)),
        counter_pair(base, counter.wrapping_add(6)),
    ];
    let mut sb = [
        counter_pair(base, counter.wrapping_add(8)),
        counter_pair(base, counter.wrapping_add(10)),
        counter_pair(base, counter.wrapping_add(12)),
        counter_pair(base, counter.wrapping_add(14)),
    ];

    // A1: first half through the full AES pipeline.
    let sa = aes_rounds4(ctrs_a, &rky);

    let p = pt.as_ptr();
    let mut ca_ymm = [_mm256_setzero_si256(); 4];
    for (i, lane) in ca_ymm.iter_mut().enumerate() {
        *lane = _mm256_xor_si256(sa[i], _mm256_loadu_si256(p.add(32 * i).cast()));
    }
    let c_lo = split8(ca_ymm);

    let xi = _mm_loadu_si128(ghash_state.as_ptr().cast());

    let mut h = [_mm_setzero_si128(); 16];
    for (i, slot) in h.iter_mut().enumerate() {
        *slot = _mm_loadu_si128(h_powers.0[15 - i].as_ptr().cast());
    }

    let mut c_le_lo = [_mm_setzero_si128(); 8];
    for (i, slot) in c_le_lo.iter_mut().enumerate() {
        *slot = reflect128(c_lo[i]);
    }
    c_le_lo[0] = _mm_xor_si128(c_le_lo[0], xi);

    // A2 ∥ B1: each AES round of the second half is followed by the
    // Karatsuba triple of one first-half block.
    let mut lo = [_mm_setzero_si128(); 16];
    let mut hi = [_mm_setzero_si128(); 16];
    let mut mid = [_mm_setzero_si128(); 16];

    for lane in sb.iter_mut() {
        *lane = _mm256_xor_si256(*lane, rky[0]);
    }
    for round in 1..NUM_ROUNDS {
        for lane in sb.iter_mut() {
            *lane = _mm256_aesenc_epi128(*lane, rky[round]);
        }
        let block = round - 1;
        if block < 8 {
            let (l, hh, m) = karatsuba_parts(c_le_lo[block], h[block]);
            lo[block] = l;
            hi[block] = hh;
            mid[block] = m;
        }
    }
    for lane in sb.iter_mut() {
        *lane = _mm256_aesenclast_epi128(*lane, rky[NUM_ROUNDS]);
    }

    // B2: second-half ciphertext and its triples.
    let mut cb_ymm = [_mm256_setzero_si256(); 4];
    for (i, lane) in cb_ymm.iter_mut().enumerate() {
        *lane = _mm256_xor_si256(sb[i], _mm256_loadu_si256(p.add(128 + 32 * i).cast()));
    }
    let c_hi = split8(cb_ymm);

    for i in 0..8 {
        let c_le = reflect128(c_hi[i]);
        let (l, hh, m) = karatsuba_parts(c_le, h[8 + i]);
        lo[8 + i] = l;
        hi[8 + i] = hh;
        mid[8 + i] = m;
    }

    // Reduction tree 16 -> 8 -> 4 -> 2 -> 1, then one reduction.
    let mut width = 8;
    while width >= 1 {
        for i in 0..width {
            lo[i] = _mm_xor_si128(lo[i], lo[i + width]);
            hi[i] = _mm_xor_si128(hi[i], hi[i + width]);
            mid[i] = _mm_xor_si128(mid[i], mid[i + width]);
        }
        width /= 2;
    }

    let lo_final = _mm_xor_si128(lo[0], _mm_slli_si128::<8>(mid[0]));
    let hi_final = _mm_xor_si128(hi[0], _mm_srli_si128::<8>(mid[0]));
    let xi = reduce(lo_final, hi_final);
    _mm_storeu_si128(ghash_state.as_mut_ptr().cast(), xi);

    let q = ct.as_mut_ptr();
    for (i, block) in c_lo.iter().chain(c_hi.iter()).enumerate() {
        _mm_storeu_si128(q.add(16 * i).cast(), *block);
    }
}

/// CTR keystream over whole blocks on 256-bit vector AES; used by the
/// fused tier for decryption and tails. Groups of 8 blocks, remainder
/// through the AES-NI path.
///
/// SAFETY: requires AVX2 + VAES (checked by the dispatcher).
#[target_feature(
    enable = "avx2",
    enable = "vaes",
    enable = "aes",
    enable = "sse4.1"
)]
pub(crate) unsafe fn ctr_blocks(
    rk: &RoundKeys,
    j0: &Block,
    counter: u32,
    input: &[u8],
    output: &mut [u8],
) {
    debug_assert_eq!(input.len() % 16, 0);
    debug_assert_eq!(input.len(), output.len());

    let rky = broadcast_keys(rk);
    let base = _mm_loadu_si128(j0.as_ptr().cast());

    let blocks = input.len() / 16;
    let mut i = 0;

    while blocks - i >= 8 {
        let ctr = counter.wrapping_add(i as u32);
        let ctrs = [
            counter_pair(base, ctr),
            counter_pair(base, ctr.wrapping_add(2)),
            counter_pair(base, ctr.wrapping_add(4)),
            counter_pair(base, ctr.wrapping_add(6)),
        ];
        let keystream = aes_rounds4(ctrs, &rky);

        let p = input.as_ptr().add(16 * i);
        let q = output.as_mut_ptr().add(16 * i);
        for (k, lane) in keystream.iter().enumerate() {
            let mixed = _mm256_xor_si256(*lane, _mm256_loadu_si256(p.add(32 * k).cast()));
            _mm256_storeu_si256(q.add(32 * k).cast(), mixed);
        }

        i += 8;
    }

    if i < blocks {
        crate::aes_ni::ctr_blocks(
            rk,
            j0,
            counter.wrapping_add(i as u32),
            &input[16 * i..],
            &mut output[16 * i..],
        );
    }
}
