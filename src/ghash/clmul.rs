//! GHASH on PCLMULQDQ, reflected domain.
//!
//! The domain contract: H is byte-reversed once when the key is set;
//! the accumulator and every precomputed power stay byte-reversed from
//! then on. Data blocks are reversed once on ingress, the tag once on
//! egress, and the multiply hot path performs no swaps at all. The
//! obligation that makes this sound:
//!
//! ```text
//! reflect(mul_reflected(reflect(x), reflect(h))) == mul_spec(x, h)
//! ```
//!
//! which the test suite checks against the portable engine across
//! random pairs, basis probes and edge cases.

use core::arch::x86_64::*;

use super::{Block, HPowers, BLOCK_SIZE};

/// Spec domain <-> reflected domain, byte-array form. Used at ingress
/// and egress boundaries only.
#[inline]
pub(crate) fn reflect_bytes(b: &Block) -> Block {
    let mut out = *b;
    out.reverse();
    out
}

#[inline]
unsafe fn load(b: &Block) -> __m128i {
    _mm_loadu_si128(b.as_ptr().cast())
}

#[inline]
unsafe fn store(v: __m128i, out: &mut Block) {
    _mm_storeu_si128(out.as_mut_ptr().cast(), v)
}

/// Byte-reverse a loaded block (PSHUFB with the descending index mask).
#[inline]
#[target_feature(enable = "ssse3")]
pub(crate) unsafe fn reflect128(x: __m128i) -> __m128i {
    let rev = _mm_setr_epi8(15, 14, 13, 12, 11, 10, 9, 8, 7, 6, 5, 4, 3, 2, 1, 0);
    _mm_shuffle_epi8(x, rev)
}

/// Ingress: load a spec-domain block and reflect it.
#[inline]
#[target_feature(enable = "ssse3")]
unsafe fn load_reflected(b: &[u8]) -> __m128i {
    debug_assert!(b.len() >= BLOCK_SIZE);
    reflect128(_mm_loadu_si128(b.as_ptr().cast()))
}

/// Unreduced 256-bit product by 4-partial schoolbook: the reference
/// form (selector masks 0x00/0x01/0x10/0x11).
#[inline]
#[target_feature(enable = "pclmulqdq")]
unsafe fn clmul4(a: __m128i, b: __m128i) -> (__m128i, __m128i) {
    let p00 = _mm_clmulepi64_si128::<0x00>(a, b);
    let p01 = _mm_clmulepi64_si128::<0x01>(a, b);
    let p10 = _mm_clmulepi64_si128::<0x10>(a, b);
    let p11 = _mm_clmulepi64_si128::<0x11>(a, b);

    // The two middle partials split across the halves of the result.
    let mid = _mm_xor_si128(p01, p10);
    let lo = _mm_xor_si128(p00, _mm_slli_si128::<8>(mid));
    let hi = _mm_xor_si128(p11, _mm_srli_si128::<8>(mid));
    (lo, hi)
}

/// Unreduced 256-bit product by Karatsuba: three CLMULs plus XORs.
/// Certified bit-identical to `clmul4` by the product-equivalence test.
#[inline]
#[target_feature(enable = "pclmulqdq")]
unsafe fn karatsuba(a: __m128i, b: __m128i) -> (__m128i, __m128i) {
    let lo_p = _mm_clmulepi64_si128::<0x00>(a, b);
    let hi_p = _mm_clmulepi64_si128::<0x11>(a, b);

    let a_fold = _mm_xor_si128(_mm_shuffle_epi32::<0x4E>(a), a);
    let b_fold = _mm_xor_si128(_mm_shuffle_epi32::<0x4E>(b), b);
    let mut mid = _mm_clmulepi64_si128::<0x00>(a_fold, b_fold);
    mid = _mm_xor_si128(mid, _mm_xor_si128(lo_p, hi_p));

    let lo = _mm_xor_si128(lo_p, _mm_slli_si128::<8>(mid));
    let hi = _mm_xor_si128(hi_p, _mm_srli_si128::<8>(mid));
    (lo, hi)
}

/// 256 -> 128 reduction modulo x^128 + x^7 + x^2 + x + 1 in the
/// reflected domain, the OpenSSL-style two-phase shift sequence.
///
/// A carry-less product of bit-reflected operands sits one bit low in
/// its 256-bit register (255 product bits reflected into bits 0..254),
/// so the product is first shifted up once. After that alignment the
/// low half holds the overflowing coefficients in reflected order and
/// the fold is:
///
/// 1. capture lo << {57,62,63} per lane; the low-lane captures feed
///    the x^128 overflow refold, the high-lane captures are the
///    cross-lane carries of the coming right shifts,
/// 2. fold lo >> {1,2,7} together with lo itself into hi.
#[inline]
pub(crate) unsafe fn reduce(lo: __m128i, hi: __m128i) -> __m128i {
    // Align: 256-bit shift left by one.
    let lo_carry = _mm_srli_epi64::<63>(lo);
    let hi_carry = _mm_srli_epi64::<63>(hi);
    let vlo = _mm_or_si128(_mm_slli_epi64::<1>(lo), _mm_slli_si128::<8>(lo_carry));
    let vhi = _mm_or_si128(
        _mm_or_si128(_mm_slli_epi64::<1>(hi), _mm_slli_si128::<8>(hi_carry)),
        _mm_srli_si128::<8>(lo_carry),
    );

    // First phase.
    let t = _mm_xor_si128(
        _mm_xor_si128(_mm_slli_epi64::<57>(vlo), _mm_slli_epi64::<62>(vlo)),
        _mm_slli_epi64::<63>(vlo),
    );
    let vlo = _mm_xor_si128(vlo, _mm_slli_si128::<8>(t));
    let vhi = _mm_xor_si128(vhi, _mm_srli_si128::<8>(t));

    // Second phase.
    let r = _mm_xor_si128(
        _mm_xor_si128(_mm_srli_epi64::<1>(vlo), _mm_srli_epi64::<2>(vlo)),
        _mm_srli_epi64::<7>(vlo),
    );
    _mm_xor_si128(_mm_xor_si128(vhi, vlo), r)
}

/// Reduced multiply in the reflected domain. The 4-partial form feeds
/// the reducer; Karatsuba is reserved for the batched folds where the
/// mid-term XORs amortize.
#[inline]
#[target_feature(enable = "pclmulqdq")]
unsafe fn mul128(a: __m128i, b: __m128i) -> __m128i {
    let (lo, hi) = clmul4(a, b);
    reduce(lo, hi)
}

/// Byte-array entry point for the reflected multiply; used by the
/// commuting-diagram tests and the debug-build H-power tripwire.
///
/// SAFETY: requires PCLMULQDQ (checked by the dispatcher / tests).
#[cfg(any(test, debug_assertions))]
#[target_feature(enable = "pclmulqdq")]
pub(crate) unsafe fn mul_reflected(a: &Block, b: &Block) -> Block {
    let r = mul128(load(a), load(b));
    let mut out = [0u8; BLOCK_SIZE];
    store(r, &mut out);
    out
}

/// 256-bit schoolbook product over byte arrays, for the
/// product-equivalence test.
///
/// SAFETY: requires PCLMULQDQ.
#[cfg(test)]
#[target_feature(enable = "pclmulqdq")]
pub(crate) unsafe fn product_schoolbook(a: &Block, b: &Block) -> (Block, Block) {
    let (lo, hi) = clmul4(load(a), load(b));
    let mut out_lo = [0u8; BLOCK_SIZE];
    let mut out_hi = [0u8; BLOCK_SIZE];
    store(lo, &mut out_lo);
    store(hi, &mut out_hi);
    (out_lo, out_hi)
}

/// 256-bit Karatsuba product over byte arrays, for the
/// product-equivalence test.
///
/// SAFETY: requires PCLMULQDQ.
#[cfg(test)]
#[target_feature(enable = "pclmulqdq")]
pub(crate) unsafe fn product_karatsuba(a: &Block, b: &Block) -> (Block, Block) {
    let (lo, hi) = karatsuba(load(a), load(b));
    let mut out_lo = [0u8; BLOCK_SIZE];
    let mut out_hi = [0u8; BLOCK_SIZE];
    store(lo, &mut out_lo);
    store(hi, &mut out_hi);
    (out_lo, out_hi)
}

/// One Karatsuba product split into its (lo, hi, mid) triple, with the
/// mid term already adjusted by lo ⊕ hi. The phase-locked kernel
/// spreads these between AES rounds.
#[inline]
#[target_feature(enable = "pclmulqdq")]
pub(crate) unsafe fn karatsuba_parts(c: __m128i, h: __m128i) -> (__m128i, __m128i, __m128i) {
    let lo = _mm_clmulepi64_si128::<0x00>(c, h);
    let hi = _mm_clmulepi64_si128::<0x11>(c, h);

    let c_fold = _mm_xor_si128(_mm_shuffle_epi32::<0x4E>(c), c);
    let h_fold = _mm_xor_si128(_mm_shuffle_epi32::<0x4E>(h), h);
    let mut mid = _mm_clmulepi64_si128::<0x00>(c_fold, h_fold);
    mid = _mm_xor_si128(mid, _mm_xor_si128(lo, hi));

    (lo, hi, mid)
}

/// Karatsuba power-sum fold over N reflected blocks with one final
/// reduction. `c[0]` must already carry the accumulator XOR; `h` holds
/// H^N..H^1 so the oldest block pairs with the highest power.
///
/// Issue order is phase-locked for the CLMUL latency: all low
/// products, all high products, the cheap XOR preparation, then all mid
/// products; results land in four independent (lo, hi, mid) triples to
/// relax the dependency chains before the XOR tree.
#[inline]
#[target_feature(enable = "pclmulqdq")]
pub(crate) unsafe fn fold_n<const N: usize>(c: &[__m128i; N], h: &[__m128i; N]) -> __m128i {
    let mut lo = [_mm_setzero_si128(); N];
    let mut hi = [_mm_setzero_si128(); N];
    let mut mid = [_mm_setzero_si128(); N];

    for i in 0..N {
        lo[i] = _mm_clmulepi64_si128::<0x00>(c[i], h[i]);
    }
    for i in 0..N {
        hi[i] = _mm_clmulepi64_si128::<0x11>(c[i], h[i]);
    }

    let mut c_fold = [_mm_setzero_si128(); N];
    let mut h_fold = [_mm_setzero_si128(); N];
    for i in 0..N {
        c_fold[i] = _mm_xor_si128(_mm_shuffle_epi32::<0x4E>(c[i]), c[i]);
        h_fold[i] = _mm_xor_si128(_mm_shuffle_epi32::<0x4E>(h[i]), h[i]);
    }
    for i in 0..N {
        mid[i] = _mm_clmulepi64_si128::<0x00>(c_fold[i], h_fold[i]);
    }
    for i in 0..N {
        mid[i] = _mm_xor_si128(mid[i], _mm_xor_si128(lo[i], hi[i]));
    }

    // Four independent accumulator triples.
    let mut acc_lo = [_mm_setzero_si128(); 4];
    let mut acc_hi = [_mm_setzero_si128(); 4];
    let mut acc_mid = [_mm_setzero_si128(); 4];
    for i in 0..N {
        let a = i * 4 / N;
        acc_lo[a] = _mm_xor_si128(acc_lo[a], lo[i]);
        acc_hi[a] = _mm_xor_si128(acc_hi[a], hi[i]);
        acc_mid[a] = _mm_xor_si128(acc_mid[a], mid[i]);
    }

    let lo = _mm_xor_si128(
        _mm_xor_si128(acc_lo[0], acc_lo[1]),
        _mm_xor_si128(acc_lo[2], acc_lo[3]),
    );
    let hi = _mm_xor_si128(
        _mm_xor_si128(acc_hi[0], acc_hi[1]),
        _mm_xor_si128(acc_hi[2], acc_hi[3]),
    );
    let mid = _mm_xor_si128(
        _mm_xor_si128(acc_mid[0], acc_mid[1]),
        _mm_xor_si128(acc_mid[2], acc_mid[3]),
    );

    // result = lo + 2^64*mid + 2^128*hi, then one reduction.
    let lo = _mm_xor_si128(lo, _mm_slli_si128::<8>(mid));
    let hi = _mm_xor_si128(hi, _mm_srli_si128::<8>(mid));
    reduce(lo, hi)
}

/// Builds H^1..H^16 in the reflected domain from H = E_K(0) in spec
/// domain. The set-key reflection here is the only swap H ever sees;
/// E_K(0) is used directly, with no premultiplication.
///
/// SAFETY: requires PCLMULQDQ.
#[target_feature(enable = "pclmulqdq", enable = "ssse3")]
pub(crate) unsafe fn precompute(h_spec: &Block) -> [Block; 16] {
    let mut powers = [[0u8; BLOCK_SIZE]; 16];

    let h = reflect128(load(h_spec));
    store(h, &mut powers[0]);

    let mut hp = h;
    for power in powers.iter_mut().skip(1) {
        hp = mul128(hp, h);
        store(hp, power);
    }

    // Corruption tripwire: the H^2 entry must equal H ⊗ H.
    #[cfg(debug_assertions)]
    {
        let mut check = [0u8; BLOCK_SIZE];
        store(mul128(h, h), &mut check);
        assert_eq!(powers[1], check, "H-power table corrupt");
    }

    powers
}

/// Single-block update path. `state` and `h1` are reflected; `data` is
/// caller-visible spec domain, reversed on ingress, partial tail
/// zero-padded.
///
/// SAFETY: requires PCLMULQDQ.
#[target_feature(enable = "pclmulqdq", enable = "ssse3")]
pub(crate) unsafe fn update(state: &mut Block, h1: &Block, data: &[u8]) {
    let mut xi = load(state);
    let h = load(h1);

    let mut chunks = data.chunks_exact(BLOCK_SIZE);
    for chunk in &mut chunks {
        let x = load_reflected(chunk);
        xi = mul128(_mm_xor_si128(xi, x), h);
    }

    let rem = chunks.remainder();
    if !rem.is_empty() {
        let mut block = [0u8; BLOCK_SIZE];
        block[..rem.len()].copy_from_slice(rem);
        let x = reflect128(load(&block));
        xi = mul128(_mm_xor_si128(xi, x), h);
    }

    store(xi, state);
}

/// 8-way update: full 128-byte groups through the power-sum fold,
/// stragglers through the single-block path.
///
/// SAFETY: requires PCLMULQDQ.
#[target_feature(enable = "pclmulqdq", enable = "ssse3")]
pub(crate) unsafe fn update8(state: &mut Block, powers: &HPowers, data: &[u8]) {
    let mut xi = load(state);

    // H^8 first so index i pairs block C[i] with H^(8-i).
    let mut h = [_mm_setzero_si128(); 8];
    for (i, slot) in h.iter_mut().enumerate() {
        *slot = load(&powers.0[7 - i]);
    }

    let mut rest = data;
    while rest.len() >= 8 * BLOCK_SIZE {
        let mut c = [_mm_setzero_si128(); 8];
        for (i, slot) in c.iter_mut().enumerate() {
            *slot = load_reflected(&rest[i * BLOCK_SIZE..]);
        }
        c[0] = _mm_xor_si128(c[0], xi);

        xi = fold_n(&c, &h);
        rest = &rest[8 * BLOCK_SIZE..];
    }

    store(xi, state);
    if !rest.is_empty() {
        update(state, &powers.0[0], rest);
    }
}

/// Length-block finalization: (Xi ⊕ len_block) · H, then the single
/// egress reflection. The result is the spec-domain GHASH output, not
/// yet masked with E_K(J0).
///
/// SAFETY: requires PCLMULQDQ.
#[target_feature(enable = "pclmulqdq", enable = "ssse3")]
pub(crate) unsafe fn finalize(state: &Block, h1: &Block, aad_len: u64, ct_len: u64) -> Block {
    let mut len_block = [0u8; BLOCK_SIZE];
    *array_mut_ref![len_block, 0, 8] = (aad_len * 8).to_be_bytes();
    *array_mut_ref![len_block, 8, 8] = (ct_len * 8).to_be_bytes();

    let len = reflect128(load(&len_block));
    let xi = mul128(_mm_xor_si128(load(state), len), load(h1));

    let mut out = [0u8; BLOCK_SIZE];
    store(reflect128(xi), &mut out);
    out
}
