// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! 32-bit MurmurHash3 (x86_32 variant).
//!
//! Only used to fingerprint timestamp strings before they are XOR-folded
//! into the Merkle trie. Not cryptographic: a collision costs at most a
//! missed divergence, which the next sync round catches.

const C1: u32 = 0xcc9e_2d51;
const C2: u32 = 0x1b87_3593;

#[inline]
fn mix_k(k: u32) -> u32 {
    k.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2)
}

#[inline]
fn fmix(mut h: u32) -> u32 {
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^= h >> 16;
    h
}

/// Hash `data` with the given seed.
#[must_use]
pub fn murmur3_32(data: &[u8], seed: u32) -> u32 {
    let mut h = seed;

    let mut blocks = data.chunks_exact(4);
    for block in &mut blocks {
        let k = u32::from_le_bytes([block[0], block[1], block[2], block[3]]);
        h ^= mix_k(k);
        h = h.rotate_left(13).wrapping_mul(5).wrapping_add(0xe654_6b64);
    }

    let tail = blocks.remainder();
    let mut k: u32 = 0;
    if tail.len() >= 3 {
        k ^= u32::from(tail[2]) << 16;
    }
    if tail.len() >= 2 {
        k ^= u32::from(tail[1]) << 8;
    }
    if let Some(&first) = tail.first() {
        k ^= u32::from(first);
        h ^= mix_k(k);
    }

    // Length is mixed in modulo 2^32, same as the reference implementation.
    h ^= data.len() as u32;
    fmix(h)
}

/// Seed-0 hash of a string, the form used for timestamps.
#[inline]
#[must_use]
pub fn hash_str(s: &str) -> u32 {
    murmur3_32(s.as_bytes(), 0)
}
