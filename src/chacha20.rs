//! ChaCha20 stream cipher and the ChaCha20-Poly1305 AEAD (RFC 8439).
//!
//! Peer AEAD to the AES-GCM engine, sharing its phase machine and
//! status surface. Scalar only; block counter 0 is reserved for the
//! Poly1305 one-time key, data starts at 1.
//!
//! Streaming note: like the GCM side, updates do not buffer keystream
//! across calls — the counter advances by whole 64-byte blocks per
//! update, so non-final updates should be multiples of 64 bytes.

use zeroize::Zeroize;

use crate::ct;
use crate::gcm::Phase;
use crate::poly1305::Poly1305;
use crate::{Error, Result};

pub const KEY_BYTES: usize = 32;
pub const NONCE_BYTES: usize = 12;
pub const TAG_BYTES: usize = 16;

pub(crate) const CHACHA_BLOCK_SIZE: usize = 64;

type State = [u32; 16];

fn init_state(key: &[u8; KEY_BYTES], nonce: &[u8; NONCE_BYTES], counter: u32) -> State {
    let mut state = [0u32; 16];
    state[0] = 0x61707865;
    state[1] = 0x3320646e;
    state[2] = 0x79622d32;
    state[3] = 0x6b206574;

    for i in 0..8 {
        state[4 + i] = u32::from_le_bytes(*array_ref![key, 4 * i, 4]);
    }

    state[12] = counter;

    for i in 0..3 {
        state[13 + i] = u32::from_le_bytes(*array_ref![nonce, 4 * i, 4]);
    }

    state
}

fn quarter_round_with(mut a: u32, mut b: u32, mut c: u32, mut d: u32) -> (u32, u32, u32, u32) {
    a = a.wrapping_add(b);
    d ^= a;
    d = d.rotate_left(16);

    c = c.wrapping_add(d);
    b ^= c;
    b = b.rotate_left(12);

    a = a.wrapping_add(b);
    d ^= a;
    d = d.rotate_left(8);

    c = c.wrapping_add(d);
    b ^= c;
    b = b.rotate_left(7);

    (a, b, c, d)
}

fn quarter_round(state: &mut State, x: usize, y: usize, z: usize, w: usize) {
    let (a, b, c, d) = quarter_round_with(state[x], state[y], state[z], state[w]);
    state[x] = a;
    state[y] = b;
    state[z] = c;
    state[w] = d;
}

fn serialize(state: State) -> [u8; CHACHA_BLOCK_SIZE] {
    let mut buf = [0u8; CHACHA_BLOCK_SIZE];
    for (i, word) in state.iter().enumerate() {
        *array_mut_ref![buf, 4 * i, 4] = word.to_le_bytes();
    }
    buf
}

/// One keystream block at the given counter.
fn keystream_block(
    key: &[u8; KEY_BYTES],
    nonce: &[u8; NONCE_BYTES],
    counter: u32,
) -> [u8; CHACHA_BLOCK_SIZE] {
    let initial = init_state(key, nonce, counter);
    let mut state = initial;

    for _ in 0..10 {
        quarter_round(&mut state, 0, 4, 8, 12);
        quarter_round(&mut state, 1, 5, 9, 13);
        quarter_round(&mut state, 2, 6, 10, 14);
        quarter_round(&mut state, 3, 7, 11, 15);
        quarter_round(&mut state, 0, 5, 10, 15);
        quarter_round(&mut state, 1, 6, 11, 12);
        quarter_round(&mut state, 2, 7, 8, 13);
        quarter_round(&mut state, 3, 4, 9, 14);
    }

    for (word, init) in state.iter_mut().zip(initial.iter()) {
        *word = word.wrapping_add(*init);
    }

    serialize(state)
}

/// XORs the keystream starting at `counter` over `input`; a partial
/// final block still consumes one counter.
pub(crate) fn xor_stream(
    key: &[u8; KEY_BYTES],
    nonce: &[u8; NONCE_BYTES],
    counter: u32,
    input: &[u8],
    output: &mut [u8],
) {
    debug_assert_eq!(input.len(), output.len());

    for (i, (inb, outb)) in input
        .chunks(CHACHA_BLOCK_SIZE)
        .zip(output.chunks_mut(CHACHA_BLOCK_SIZE))
        .enumerate()
    {
        let ks = keystream_block(key, nonce, counter.wrapping_add(i as u32));
        for (j, o) in outb.iter_mut().enumerate() {
            *o = inb[j] ^ ks[j];
        }
    }
}

/// Poly1305 one-time key: the first 32 keystream bytes of block 0.
pub(crate) fn poly_key(key: &[u8; KEY_BYTES], nonce: &[u8; NONCE_BYTES]) -> [u8; 32] {
    let block = keystream_block(key, nonce, 0);
    let mut otk = [0u8; 32];
    otk.copy_from_slice(&block[..32]);
    otk
}

/// Raw ChaCha20 stream cipher positioned at block 1.
pub struct ChaCha20 {
    key: [u8; KEY_BYTES],
    nonce: [u8; NONCE_BYTES],
    counter: u32,
}

impl ChaCha20 {
    pub fn new(key: &[u8; KEY_BYTES], nonce: &[u8; NONCE_BYTES]) -> Self {
        Self {
            key: *key,
            nonce: *nonce,
            counter: 1,
        }
    }

    /// Encrypts or decrypts (the operations coincide), advancing the
    /// block counter by whole blocks.
    pub fn xor(&mut self, input: &[u8], output: &mut [u8]) {
        xor_stream(&self.key, &self.nonce, self.counter, input, output);
        self.counter = self
            .counter
            .wrapping_add(input.len().div_ceil(CHACHA_BLOCK_SIZE) as u32);
    }
}

impl Drop for ChaCha20 {
    fn drop(&mut self) {
        self.key.zeroize();
        self.nonce.zeroize();
    }
}

/// Streaming ChaCha20-Poly1305 context with the same phase machine as
/// the AES-GCM side.
pub struct ChaChaPoly {
    key: [u8; KEY_BYTES],
    nonce: [u8; NONCE_BYTES],
    poly: Poly1305,
    counter: u32,
    aad_len: u64,
    ct_len: u64,
    phase: Phase,
}

impl ChaChaPoly {
    /// Derives the Poly1305 one-time key from block 0 and positions
    /// the data counter at 1.
    pub fn init(key: &[u8; KEY_BYTES], nonce: &[u8; NONCE_BYTES]) -> ChaChaPoly {
        let mut otk = poly_key(key, nonce);
        let poly = Poly1305::new(&otk);
        otk.zeroize();

        ChaChaPoly {
            key: *key,
            nonce: *nonce,
            poly,
            counter: 1,
            aad_len: 0,
            ct_len: 0,
            phase: Phase::Start,
        }
    }

    pub fn aad_update(&mut self, aad: &[u8]) -> Result<()> {
        match self.phase {
            Phase::Start | Phase::Aad => {}
            Phase::Update | Phase::Final => return Err(Error::InvalidInput),
        }

        self.phase = Phase::Aad;
        self.aad_len = self.aad_len.wrapping_add(aad.len() as u64);
        self.poly.update(aad);
        Ok(())
    }

    /// Zero-pads the AAD to the 16-byte boundary at the AAD → data
    /// transition.
    fn pad_aad(&mut self) {
        if self.phase == Phase::Aad && self.aad_len % 16 != 0 {
            let zeros = [0u8; 16];
            self.poly.update(&zeros[..16 - (self.aad_len % 16) as usize]);
        }
    }

    pub fn encrypt_update(&mut self, pt: &[u8], ct: &mut [u8]) -> Result<()> {
        if pt.len() != ct.len() {
            return Err(Error::InvalidInput);
        }
        if self.phase == Phase::Final {
            return Err(Error::InvalidInput);
        }

        self.pad_aad();
        self.phase = Phase::Update;
        self.ct_len = self.ct_len.wrapping_add(pt.len() as u64);

        xor_stream(&self.key, &self.nonce, self.counter, pt, ct);
        self.counter = self
            .counter
            .wrapping_add(pt.len().div_ceil(CHACHA_BLOCK_SIZE) as u32);

        self.poly.update(ct);
        Ok(())
    }

    /// Ciphertext is authenticated before it is decrypted.
    pub fn decrypt_update(&mut self, ct: &[u8], pt: &mut [u8]) -> Result<()> {
        if ct.len() != pt.len() {
            return Err(Error::InvalidInput);
        }
        if self.phase == Phase::Final {
            return Err(Error::InvalidInput);
        }

        self.pad_aad();
        self.phase = Phase::Update;
        self.ct_len = self.ct_len.wrapping_add(ct.len() as u64);

        self.poly.update(ct);

        xor_stream(&self.key, &self.nonce, self.counter, ct, pt);
        self.counter = self
            .counter
            .wrapping_add(ct.len().div_ceil(CHACHA_BLOCK_SIZE) as u32);

        Ok(())
    }

    /// Pads pending AAD (for AAD-only messages) and ciphertext to the
    /// 16-byte boundary, appends the little-endian length block.
    fn compute_tag(&self) -> [u8; TAG_BYTES] {
        let mut p = self.poly.clone();
        let zeros = [0u8; 16];

        if self.phase == Phase::Aad && self.aad_len % 16 != 0 {
            p.update(&zeros[..16 - (self.aad_len % 16) as usize]);
        }
        if self.ct_len % 16 != 0 {
            p.update(&zeros[..16 - (self.ct_len % 16) as usize]);
        }

        let mut lengths = [0u8; 16];
        *array_mut_ref![lengths, 0, 8] = self.aad_len.to_le_bytes();
        *array_mut_ref![lengths, 8, 8] = self.ct_len.to_le_bytes();
        p.update(&lengths);

        p.finish()
    }

    pub fn encrypt_final(&mut self, tag: &mut [u8; TAG_BYTES]) -> Result<()> {
        if self.phase == Phase::Final {
            return Err(Error::InvalidInput);
        }

        *tag = self.compute_tag();
        self.phase = Phase::Final;
        Ok(())
    }

    /// On `AuthFailure` any plaintext from earlier `decrypt_update`
    /// calls must be discarded.
    pub fn decrypt_final(&mut self, tag: &[u8; TAG_BYTES]) -> Result<()> {
        if self.phase == Phase::Final {
            return Err(Error::InvalidInput);
        }

        let mut computed = self.compute_tag();
        self.phase = Phase::Final;

        let equal = ct::constant_eq(&computed, tag);
        ct::wipe(&mut computed);

        if equal {
            Ok(())
        } else {
            Err(Error::AuthFailure)
        }
    }

    pub fn wipe(&mut self) {
        self.key.zeroize();
        self.nonce.zeroize();
        self.poly.wipe();
        self.counter = 0;
        self.aad_len = 0;
        self.ct_len = 0;
        self.phase = Phase::Final;
    }
}

impl Drop for ChaChaPoly {
    fn drop(&mut self) {
        self.wipe();
    }
}
