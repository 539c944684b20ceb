//! Kerl, the ledger's ternary sponge.
//!
//! Kerl runs Keccak-384 over 243-trit chunks. Each chunk is read as a
//! balanced ternary integer (the last trit is always treated as zero) and
//! fed to Keccak as 48 big-endian two's-complement bytes. Squeezing converts
//! the digest back to trits, then re-seeds the state with the bitwise
//! complement of the digest so that further squeezes keep producing output.

use sha3::{Digest, Keccak384};

use super::trytes::Trit;

/// Trits per hash and per absorbed chunk.
pub const HASH_TRITS: usize = 243;

const HASH_BYTES: usize = 48;
const LIMBS: usize = HASH_BYTES / 4;

/// 384-bit integer, least significant limb first.
type Limbs = [u32; LIMBS];

#[derive(Clone, Default)]
pub struct Kerl {
    keccak: Keccak384,
}

impl Kerl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Absorbs `trits` in 243-trit chunks.
    pub fn absorb(&mut self, trits: &[Trit]) {
        debug_assert_eq!(trits.len() % HASH_TRITS, 0);
        for chunk in trits.chunks(HASH_TRITS) {
            self.keccak.update(trits_to_bytes(chunk));
        }
    }

    /// Fills `out` with squeezed trits, one 243-trit hash at a time.
    pub fn squeeze(&mut self, out: &mut [Trit]) {
        for chunk in out.chunks_mut(HASH_TRITS) {
            let digest = self.keccak.finalize_reset();
            let trits = bytes_to_trits(&digest);
            chunk.copy_from_slice(&trits[..chunk.len()]);

            let mut flipped = [0u8; HASH_BYTES];
            for (dst, src) in flipped.iter_mut().zip(digest.iter()) {
                *dst = !src;
            }
            self.keccak.update(flipped);
        }
    }

    /// One-shot hash of `trits`.
    pub fn hash(trits: &[Trit]) -> [Trit; HASH_TRITS] {
        let mut kerl = Self::new();
        kerl.absorb(trits);
        let mut out = [0; HASH_TRITS];
        kerl.squeeze(&mut out);
        out
    }
}

// ---------------------------------------------------------------------------
// Trit / byte conversion
// ---------------------------------------------------------------------------

fn trits_to_bytes(trits: &[Trit]) -> [u8; HASH_BYTES] {
    // Horner's rule modulo 2^384 yields the two's-complement encoding
    // directly, negative values included.
    let mut value: Limbs = [0; LIMBS];
    for &trit in trits.iter().take(HASH_TRITS - 1).rev() {
        mul_small(&mut value, 3);
        match trit {
            1 => add_one(&mut value),
            -1 => sub_one(&mut value),
            _ => {}
        }
    }

    let mut bytes = [0u8; HASH_BYTES];
    for (i, limb) in value.iter().rev().enumerate() {
        bytes[i * 4..i * 4 + 4].copy_from_slice(&limb.to_be_bytes());
    }
    bytes
}

fn bytes_to_trits(bytes: &[u8]) -> [Trit; HASH_TRITS] {
    let mut value: Limbs = [0; LIMBS];
    for (i, word) in bytes.chunks_exact(4).take(LIMBS).enumerate() {
        value[LIMBS - 1 - i] = u32::from_be_bytes([word[0], word[1], word[2], word[3]]);
    }

    let negative = value[LIMBS - 1] & 0x8000_0000 != 0;
    if negative {
        for limb in value.iter_mut() {
            *limb = !*limb;
        }
        add_one(&mut value);
    }

    let mut trits = [0; HASH_TRITS];
    for trit in trits.iter_mut() {
        let digit = match div_small(&mut value, 3) {
            0 => 0,
            1 => 1,
            _ => {
                add_one(&mut value);
                -1
            }
        };
        *trit = if negative { -digit } else { digit };
    }
    trits[HASH_TRITS - 1] = 0;
    trits
}

fn mul_small(value: &mut Limbs, factor: u32) {
    let mut carry = 0u64;
    for limb in value.iter_mut() {
        let product = *limb as u64 * factor as u64 + carry;
        *limb = product as u32;
        carry = product >> 32;
    }
}

fn div_small(value: &mut Limbs, divisor: u32) -> u32 {
    let mut rem = 0u64;
    for limb in value.iter_mut().rev() {
        let current = (rem << 32) | *limb as u64;
        *limb = (current / divisor as u64) as u32;
        rem = current % divisor as u64;
    }
    rem as u32
}

fn add_one(value: &mut Limbs) {
    for limb in value.iter_mut() {
        let (sum, overflow) = limb.overflowing_add(1);
        *limb = sum;
        if !overflow {
            break;
        }
    }
}

fn sub_one(value: &mut Limbs) {
    for limb in value.iter_mut() {
        let (diff, borrow) = limb.overflowing_sub(1);
        *limb = diff;
        if !borrow {
            break;
        }
    }
}
