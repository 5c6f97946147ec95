//! AES-256 on AES-NI.
//!
//! Key schedule via AESKEYGENASSIST, single-block encryption for H
//! derivation and the tag mask, and a 4-wide interleaved CTR batch for
//! the tier that has AES instructions but no 256-bit vector AES.
//!
//! Every function here requires the `aes` target feature at runtime;
//! the dispatcher only routes to this module after checking CPUID.

use core::arch::x86_64::*;

use crate::aes::{Block, RoundKeys, BLOCK_SIZE, NUM_ROUNDS};

#[inline]
unsafe fn load(b: &Block) -> __m128i {
    _mm_loadu_si128(b.as_ptr().cast())
}

#[inline]
unsafe fn store(v: __m128i, out: &mut Block) {
    _mm_storeu_si128(out.as_mut_ptr().cast(), v)
}

// Odd schedule step: previous even key mixed with the rcon-rotated
// assist word.
#[inline]
#[target_feature(enable = "aes")]
unsafe fn key_assist_1(mut t1: __m128i, mut t2: __m128i) -> __m128i {
    t2 = _mm_shuffle_epi32::<0xff>(t2);
    let mut t3 = _mm_slli_si128::<4>(t1);
    t1 = _mm_xor_si128(t1, t3);
    t3 = _mm_slli_si128::<4>(t3);
    t1 = _mm_xor_si128(t1, t3);
    t3 = _mm_slli_si128::<4>(t3);
    t1 = _mm_xor_si128(t1, t3);
    _mm_xor_si128(t1, t2)
}

// Even schedule step: no rcon, assist word taken from lane 2.
#[inline]
#[target_feature(enable = "aes")]
unsafe fn key_assist_2(t1: __m128i, mut t3: __m128i) -> __m128i {
    let t4 = _mm_aeskeygenassist_si128::<0>(t1);
    let t2 = _mm_shuffle_epi32::<0xaa>(t4);
    let mut t4 = _mm_slli_si128::<4>(t3);
    t3 = _mm_xor_si128(t3, t4);
    t4 = _mm_slli_si128::<4>(t4);
    t3 = _mm_xor_si128(t3, t4);
    t4 = _mm_slli_si128::<4>(t4);
    t3 = _mm_xor_si128(t3, t4);
    _mm_xor_si128(t3, t2)
}

macro_rules! expand_pair {
    ($ks:ident, $i:expr, $t1:ident, $t3:ident, $rcon:literal) => {{
        let t2 = _mm_aeskeygenassist_si128::<$rcon>($t3);
        $t1 = key_assist_1($t1, t2);
        store($t1, &mut $ks[$i]);
        $t3 = key_assist_2($t1, $t3);
        store($t3, &mut $ks[$i + 1]);
    }};
}

/// Expands a 256-bit key into the 15 round keys.
///
/// SAFETY: requires AES-NI (checked by the dispatcher).
#[target_feature(enable = "aes")]
pub(crate) unsafe fn key_expand(key: &[u8; 32]) -> RoundKeys {
    let mut ks = [[0u8; BLOCK_SIZE]; NUM_ROUNDS + 1];

    let mut t1 = _mm_loadu_si128(key.as_ptr().cast());
    let mut t3 = _mm_loadu_si128(key.as_ptr().add(16).cast());
    store(t1, &mut ks[0]);
    store(t3, &mut ks[1]);

    expand_pair!(ks, 2, t1, t3, 0x01);
    expand_pair!(ks, 4, t1, t3, 0x02);
    expand_pair!(ks, 6, t1, t3, 0x04);
    expand_pair!(ks, 8, t1, t3, 0x08);
    expand_pair!(ks, 10, t1, t3, 0x10);
    expand_pair!(ks, 12, t1, t3, 0x20);

    // The schedule ends on an odd key; no trailing even step.
    let t2 = _mm_aeskeygenassist_si128::<0x40>(t3);
    t1 = key_assist_1(t1, t2);
    store(t1, &mut ks[14]);

    ks
}

/// Encrypts one block.
///
/// SAFETY: requires AES-NI (checked by the dispatcher).
#[target_feature(enable = "aes")]
pub(crate) unsafe fn encrypt_block(rk: &RoundKeys, input: &Block) -> Block {
    let mut state = _mm_xor_si128(load(input), load(&rk[0]));
    for round in rk.iter().take(NUM_ROUNDS).skip(1) {
        state = _mm_aesenc_si128(state, load(round));
    }
    state = _mm_aesenclast_si128(state, load(&rk[NUM_ROUNDS]));

    let mut out = [0u8; BLOCK_SIZE];
    store(state, &mut out);
    out
}

/// CTR keystream over whole blocks, four blocks in flight to cover the
/// AESENC latency.
///
/// SAFETY: requires AES-NI (checked by the dispatcher).
#[target_feature(enable = "aes", enable = "sse4.1")]
pub(crate) unsafe fn ctr_blocks(
    rk: &RoundKeys,
    j0: &Block,
    counter: u32,
    input: &[u8],
    output: &mut [u8],
) {
    debug_assert_eq!(input.len() % BLOCK_SIZE, 0);
    debug_assert_eq!(input.len(), output.len());

    let base = load(j0);
    let blocks = input.len() / BLOCK_SIZE;
    let mut i = 0;

    while blocks - i >= 4 {
        let ctr = counter.wrapping_add(i as u32);
        let mut s0 = _mm_insert_epi32::<3>(base, ctr.swap_bytes() as i32);
        let mut s1 = _mm_insert_epi32::<3>(base, ctr.wrapping_add(1).swap_bytes() as i32);
        let mut s2 = _mm_insert_epi32::<3>(base, ctr.wrapping_add(2).swap_bytes() as i32);
        let mut s3 = _mm_insert_epi32::<3>(base, ctr.wrapping_add(3).swap_bytes() as i32);

        let rk0 = load(&rk[0]);
        s0 = _mm_xor_si128(s0, rk0);
        s1 = _mm_xor_si128(s1, rk0);
        s2 = _mm_xor_si128(s2, rk0);
        s3 = _mm_xor_si128(s3, rk0);

        for round in rk.iter().take(NUM_ROUNDS).skip(1) {
            let k = load(round);
            s0 = _mm_aesenc_si128(s0, k);
            s1 = _mm_aesenc_si128(s1, k);
            s2 = _mm_aesenc_si128(s2, k);
            s3 = _mm_aesenc_si128(s3, k);
        }

        let klast = load(&rk[NUM_ROUNDS]);
        s0 = _mm_aesenclast_si128(s0, klast);
        s1 = _mm_aesenclast_si128(s1, klast);
        s2 = _mm_aesenclast_si128(s2, klast);
        s3 = _mm_aesenclast_si128(s3, klast);

        let p = input.as_ptr().add(i * BLOCK_SIZE);
        let q = output.as_mut_ptr().add(i * BLOCK_SIZE);
        _mm_storeu_si128(q.cast(), _mm_xor_si128(s0, _mm_loadu_si128(p.cast())));
        _mm_storeu_si128(
            q.add(16).cast(),
            _mm_xor_si128(s1, _mm_loadu_si128(p.add(16).cast())),
        );
        _mm_storeu_si128(
            q.add(32).cast(),
            _mm_xor_si128(s2, _mm_loadu_si128(p.add(32).cast())),
        );
        _mm_storeu_si128(
            q.add(48).cast(),
            _mm_xor_si128(s3, _mm_loadu_si128(p.add(48).cast())),
        );

        i += 4;
    }

    while i < blocks {
        let mut ctr_block = *j0;
        *array_mut_ref![ctr_block, 12, 4] = counter.wrapping_add(i as u32).to_be_bytes();
        let ks = encrypt_block(rk, &ctr_block);

        let inb = array_ref![input, i * BLOCK_SIZE, BLOCK_SIZE];
        let outb = array_mut_ref![output, i * BLOCK_SIZE, BLOCK_SIZE];
        for j in 0..BLOCK_SIZE {
            outb[j] = inb[j] ^ ks[j];
        }

        i += 1;
    }
}
