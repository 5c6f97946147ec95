//! Poly1305 one-time authenticator (RFC 8439).
//!
//! The accumulator arithmetic is modulo the prime 2^130 - 5, held in
//! five 26-bit limbs inside u64 slots so schoolbook products and their
//! carries never overflow. All carry and reduction decisions are
//! mask-based.

use zeroize::Zeroize;

const BLOCK_SIZE: usize = 16;
const LIMB_MASK: u64 = (1 << 26) - 1;

/// Integer holding at least 130 bits, reduced modulo 2^130 - 5.
#[derive(Clone, Copy)]
struct U1305 {
    /// 26 bits per limb, little-endian limb order.
    limbs: [u64; 5],
}

impl U1305 {
    fn zero() -> Self {
        Self { limbs: [0; 5] }
    }

    /// 2^130 - 5.
    fn modulus() -> Self {
        Self {
            limbs: [LIMB_MASK - 4, LIMB_MASK, LIMB_MASK, LIMB_MASK, LIMB_MASK],
        }
    }

    fn from_le_bytes(data: &[u8; BLOCK_SIZE]) -> Self {
        let v0 = u32::from_le_bytes(*array_ref![data, 0, 4]) & 0x3ff_ffff;
        let v1 = (u32::from_le_bytes(*array_ref![data, 3, 4]) >> 2) & 0x3ff_ffff;
        let v2 = (u32::from_le_bytes(*array_ref![data, 6, 4]) >> 4) & 0x3ff_ffff;
        let v3 = (u32::from_le_bytes(*array_ref![data, 9, 4]) >> 6) & 0x3ff_ffff;
        let v4 = {
            let mut buf = [0u8; 4];
            buf[..3].copy_from_slice(array_ref![data, 13, 3]);
            u32::from_le_bytes(buf) & 0x3ff_ffff
        };

        Self {
            limbs: [v0 as u64, v1 as u64, v2 as u64, v3 as u64, v4 as u64],
        }
    }

    /// Least significant 16 bytes of the value.
    fn to_le_bytes(&self) -> [u8; BLOCK_SIZE] {
        let mut data = [0u8; BLOCK_SIZE];

        let mut limb_i = 0;
        let mut acc = 0u64;
        let mut acc_bits = 0;

        for byte in data.iter_mut() {
            while acc_bits < 8 && limb_i < self.limbs.len() {
                acc |= self.limbs[limb_i] << acc_bits;
                acc_bits += 26;
                limb_i += 1;
            }
            *byte = acc as u8;
            acc >>= 8;
            acc_bits -= 8;
        }

        data
    }

    fn add(&mut self, rhs: &Self) {
        let mut carry = 0;
        for i in 0..self.limbs.len() {
            let v = carry + self.limbs[i] + rhs.limbs[i];
            self.limbs[i] = v & LIMB_MASK;
            carry = v >> 26;
        }
        // Overflow beyond 130 bits parks above the top limb's 26 bits
        // until the next reduction.
        self.limbs[4] |= carry << 26;
    }

    fn add_mod_n(&mut self, rhs: &Self) {
        self.add(rhs);
        self.reduce_once();
    }

    /// Sets bit 2^pow2; the caller guarantees the bit is clear.
    fn add_pow2(&mut self, pow2: usize) {
        self.limbs[pow2 / 26] |= 1 << (pow2 % 26);
    }

    /// 1 if self >= rhs, via a borrow chain.
    fn greater_eq(&self, rhs: &Self) -> u64 {
        let mut borrow = 0;
        for i in 0..self.limbs.len() {
            let d = self.limbs[i].wrapping_sub(rhs.limbs[i]).wrapping_sub(borrow);
            borrow = d >> 63;
        }
        1 - borrow
    }

    /// Conditionally subtracts the modulus (mask-selected, no branch).
    fn reduce_once(&mut self) {
        let mask = self.greater_eq(&Self::modulus()).wrapping_neg();
        let m = Self::modulus();

        let mut borrow = 0;
        for i in 0..self.limbs.len() {
            let d = self.limbs[i]
                .wrapping_sub(m.limbs[i] & mask)
                .wrapping_sub(borrow);
            borrow = d >> 63;
            self.limbs[i] = d & LIMB_MASK;
        }
        debug_assert_eq!(borrow, 0);
    }

    /// Schoolbook multiply with the 2^130 ≡ 5 wrap folded into the
    /// column sums, then three carry passes.
    fn mul_mod_n(&self, rhs: &Self) -> Self {
        let mut out = [0u64; 5];

        for i in 0..self.limbs.len() {
            for j in 0..rhs.limbs.len() {
                let mut k = i + j;
                let mut v = self.limbs[i] * rhs.limbs[j];
                if k >= self.limbs.len() {
                    k -= self.limbs.len();
                    v *= 5;
                }
                out[k] += v;
            }
        }

        // 5 is 3 bits, so three propagation rounds settle all carries.
        let mut carry = 0;
        for _ in 0..3 {
            for limb in out.iter_mut() {
                let v = *limb + carry;
                *limb = v & LIMB_MASK;
                carry = v >> 26;
            }
            carry *= 5;
        }
        debug_assert_eq!(carry, 0);

        let mut out = Self { limbs: out };
        out.reduce_once();
        out
    }
}

/// Streaming Poly1305: buffers sub-block input so update granularity
/// is unrestricted.
#[derive(Clone)]
pub struct Poly1305 {
    /// First key half, clamped.
    r: U1305,
    /// Second key half, added after the final reduction.
    s: U1305,
    acc: U1305,
    buffer: [u8; BLOCK_SIZE],
    buffer_len: usize,
}

impl Poly1305 {
    pub fn new(key: &[u8; 32]) -> Self {
        let r = {
            let mut data = *array_ref![key, 0, BLOCK_SIZE];
            Self::clamp(&mut data);
            // Clamping clears the top bits, so this is already below
            // the prime.
            let r = U1305::from_le_bytes(&data);
            data.zeroize();
            r
        };

        Self {
            r,
            s: U1305::from_le_bytes(array_ref![key, 16, BLOCK_SIZE]),
            acc: U1305::zero(),
            buffer: [0u8; BLOCK_SIZE],
            buffer_len: 0,
        }
    }

    fn clamp(r: &mut [u8; BLOCK_SIZE]) {
        r[3] &= 15;
        r[4] &= 252;
        r[7] &= 15;
        r[8] &= 252;
        r[11] &= 15;
        r[12] &= 252;
        r[15] &= 15;
    }

    /// acc = (acc + block + 2^bits) * r, where `bits` is 128 for full
    /// blocks and 8·len for the final partial block.
    fn process(&mut self, block: &[u8; BLOCK_SIZE], bits: usize) {
        let mut n = U1305::from_le_bytes(block);
        n.add_pow2(bits);
        self.acc.add_mod_n(&n);
        self.acc = self.acc.mul_mod_n(&self.r);
    }

    pub fn update(&mut self, mut data: &[u8]) {
        if self.buffer_len > 0 {
            let take = core::cmp::min(BLOCK_SIZE - self.buffer_len, data.len());
            self.buffer[self.buffer_len..self.buffer_len + take].copy_from_slice(&data[..take]);
            self.buffer_len += take;
            data = &data[take..];

            if self.buffer_len < BLOCK_SIZE {
                return;
            }
            let block = self.buffer;
            self.process(&block, 128);
            self.buffer_len = 0;
        }

        let mut chunks = data.chunks_exact(BLOCK_SIZE);
        for chunk in &mut chunks {
            let block = *array_ref![chunk, 0, BLOCK_SIZE];
            self.process(&block, 128);
        }

        let rem = chunks.remainder();
        if !rem.is_empty() {
            self.buffer[..rem.len()].copy_from_slice(rem);
            self.buffer_len = rem.len();
        }
    }

    /// Consumes the authenticator and returns the 16-byte tag.
    pub fn finish(mut self) -> [u8; BLOCK_SIZE] {
        if self.buffer_len > 0 {
            let mut block = [0u8; BLOCK_SIZE];
            block[..self.buffer_len].copy_from_slice(&self.buffer[..self.buffer_len]);
            let bits = self.buffer_len * 8;
            self.process(&block, bits);
        }

        // The final addition of s is plain 2^128 arithmetic; only the
        // low 16 bytes survive.
        self.acc.add(&self.s);
        self.acc.to_le_bytes()
    }

    /// Zeroizes the key halves and accumulator.
    pub fn wipe(&mut self) {
        self.r.limbs.zeroize();
        self.s.limbs.zeroize();
        self.acc.limbs.zeroize();
        self.buffer.zeroize();
        self.buffer_len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn rfc8439_vector() {
        let key = hex!("85d6be7857556d337f4452fe42d506a80103808afb0db2fd4abff6af4149f51b");
        let plain = b"Cryptographic Forum Research Group";
        let tag = hex!("a8061dc1305136c6c22b8baf0c0127a9");

        let mut poly = Poly1305::new(&key);
        poly.update(&plain[..]);
        assert_eq!(poly.finish(), tag);
    }

    #[test]
    fn split_updates_match_oneshot() {
        let key = hex!("1c9240a5eb55d38af333888604f6b5f0473917c1402b80099dca5cbc207075c0");
        let mut msg = [0u8; 133];
        for (i, b) in msg.iter_mut().enumerate() {
            *b = (i as u8).wrapping_mul(31).wrapping_add(7);
        }

        let mut oneshot = Poly1305::new(&key);
        oneshot.update(&msg);
        let expected = oneshot.finish();

        for split in [1usize, 7, 13, 16, 17, 64] {
            let mut split_mac = Poly1305::new(&key);
            for chunk in msg.chunks(split) {
                split_mac.update(chunk);
            }
            assert_eq!(split_mac.finish(), expected, "split {split}");
        }
    }

    #[test]
    fn limb_round_trip() {
        let bytes = hex!("ffefbeadde0000000000000000c0ffee");
        let v = U1305::from_le_bytes(&bytes);
        assert_eq!(v.to_le_bytes(), bytes);
    }

    #[test]
    fn reduce_once_is_conditional() {
        let mut below = U1305::from_le_bytes(&[20u8; 16]);
        let before = below.limbs;
        below.reduce_once();
        assert_eq!(below.limbs, before);

        let mut exactly = U1305::modulus();
        exactly.reduce_once();
        assert_eq!(exactly.limbs, [0u64; 5]);
    }
}
