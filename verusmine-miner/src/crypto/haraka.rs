//! Haraka-256 and Haraka-512 short-input permutations.
//!
//! Haraka runs five rounds of paired AES rounds over two (256) or four
//! (512) 128-bit lanes with a lane-interleaving mix between rounds, then
//! feeds the input forward with XOR. Haraka-512 truncates its 64-byte
//! state to 32 bytes by taking the high halves of lanes 0-1 and the low
//! halves of lanes 2-3.
//!
//! The keyed Haraka-512 variant sources its 40 round constants from a
//! caller-provided slice instead of [`RC`]; VerusHash uses it once per
//! nonce with constants drawn from the mutated CLHash key.

use super::ops::{aes_enc, unpack_hi32, unpack_lo32};

/// The 40 Haraka v2 round constants.
///
/// Immutable process-wide table; each entry is the memory image of one
/// `__m128i` constant (byte 0 least significant).
pub const RC: [u128; 40] = [
    0x0684704ce620c00ab2c5fef075817b9d,
    0x8b66b4e188f3a06b640f6ba42f08f717,
    0x3402de2d53f28498cf029d609f029114,
    0x0ed6eae62e7b4f08bbf3bcaffd5b4f79,
    0xcbcfb0cb4872448b79eecd1cbe397044,
    0x7eeacdee6e9032b78d5335ed2b8a057b,
    0x67c28f435e2e7cd0e2412761da4fef1b,
    0x2924d9b0afcacc07675ffde21fc70b3b,
    0xab4d63f1e6867fe9ecdb8fcab9d465ee,
    0x1c30bf84d4b7cd645b2a404fad037e33,
    0xb2cc0bb9941723bf69028b2e8df69800,
    0xfa0478a6de6f55724aaa9ec85c9d2d8a,
    0xdfb49f2b6b772a120efa4f2e29129fd4,
    0x1ea10344f449a23632d611aebb6a12ee,
    0xaf0449884b0500845f9600c99ca8eca6,
    0x21025ed89d199c4f78a2c7e327e593ec,
    0xbf3aaaf8a759c9b7b9282ecd82d40173,
    0x6260700d6186b01737f2efd910307d6b,
    0x5aca45c22130044381c29153f6fc9ac6,
    0x9223973c226b68bb2caf92e836d1943a,
    0xd3bf9238225886eb6cbab958e51071b4,
    0xdb863ce5aef0c677933dfddd24e1128d,
    0xbb606268ffeba09c83e48de3cb2212b1,
    0x734bd3dce2e4d19c2db91a4ec72bf77d,
    0x43bb47c361301b434b1415c42cb3924e,
    0xdba775a8e707eff603b231dd16eb6899,
    0x6df3614b3c7559778e5e23027eca472c,
    0xcda75a17d6de7d776d1be5b9b88617f9,
    0xec6b43f06ba8e9aa9d6c069da946ee5d,
    0xcb1e6950f957332ba25311593bf327c1,
    0x2cee0c7500da619ce4ed0353600ed0d9,
    0xf0b1a5a196e90cab80bbbabc63a4a350,
    0xae3db1025e962988ab0dde30938dca39,
    0x17bb8f38d554a40b8814f3a82e75b442,
    0x34bb8a5b5f427fd7aeb6b779360a16f6,
    0x26f65241cbe5543843ce5918ffbaafde,
    0x4ce99a54b9f3026aa2ca9cf7839ec978,
    0xae51a51a1bdff7be40c06e2822901235,
    0xa0c1613cba7ed22bc173bc0f48a659cf,
    0x756acc03022882884ad6bdfde9c59da1,
];

/// Haraka-256: compress 32 bytes to 32.
pub fn haraka256(input: &[u8; 32]) -> [u8; 32] {
    #[cfg(target_arch = "x86_64")]
    if super::simd_enabled() {
        // Feature presence was verified by `simd_enabled`.
        return unsafe { super::x86::haraka256(input) };
    }
    portable::haraka256(input)
}

/// Haraka-512: compress 64 bytes to 32.
pub fn haraka512(input: &[u8; 64]) -> [u8; 32] {
    #[cfg(target_arch = "x86_64")]
    if super::simd_enabled() {
        return unsafe { super::x86::haraka512(input) };
    }
    portable::haraka512(input)
}

/// Haraka-512 with caller-supplied round constants (at least 40 lanes).
pub fn haraka512_keyed(input: &[u8; 64], rc: &[u128]) -> [u8; 32] {
    assert!(rc.len() >= 40, "keyed haraka512 needs 40 round constants");
    #[cfg(target_arch = "x86_64")]
    if super::simd_enabled() {
        return unsafe { super::x86::haraka512_keyed(input, rc) };
    }
    portable::haraka512_with(input, rc)
}

pub(crate) mod portable {
    use super::*;

    #[inline]
    fn lane(bytes: &[u8]) -> u128 {
        u128::from_le_bytes(bytes.try_into().expect("16-byte lane"))
    }

    pub fn haraka256(input: &[u8; 32]) -> [u8; 32] {
        let in0 = lane(&input[0..16]);
        let in1 = lane(&input[16..32]);
        let mut s0 = in0;
        let mut s1 = in1;

        for r in 0..5 {
            let rc = &RC[r * 4..r * 4 + 4];
            s0 = aes_enc(s0, rc[0]);
            s1 = aes_enc(s1, rc[1]);
            s0 = aes_enc(s0, rc[2]);
            s1 = aes_enc(s1, rc[3]);
            let t = unpack_lo32(s0, s1);
            s1 = unpack_hi32(s0, s1);
            s0 = t;
        }

        s0 ^= in0;
        s1 ^= in1;

        let mut out = [0u8; 32];
        out[0..16].copy_from_slice(&s0.to_le_bytes());
        out[16..32].copy_from_slice(&s1.to_le_bytes());
        out
    }

    pub fn haraka512(input: &[u8; 64]) -> [u8; 32] {
        haraka512_with(input, &RC)
    }

    pub fn haraka512_with(input: &[u8; 64], rc: &[u128]) -> [u8; 32] {
        let in0 = lane(&input[0..16]);
        let in1 = lane(&input[16..32]);
        let in2 = lane(&input[32..48]);
        let in3 = lane(&input[48..64]);
        let mut s0 = in0;
        let mut s1 = in1;
        let mut s2 = in2;
        let mut s3 = in3;

        for r in 0..5 {
            let rc = &rc[r * 8..r * 8 + 8];
            s0 = aes_enc(s0, rc[0]);
            s1 = aes_enc(s1, rc[1]);
            s2 = aes_enc(s2, rc[2]);
            s3 = aes_enc(s3, rc[3]);
            s0 = aes_enc(s0, rc[4]);
            s1 = aes_enc(s1, rc[5]);
            s2 = aes_enc(s2, rc[6]);
            s3 = aes_enc(s3, rc[7]);

            // MIX4
            let tmp = unpack_lo32(s0, s1);
            s0 = unpack_hi32(s0, s1);
            s1 = unpack_lo32(s2, s3);
            s2 = unpack_hi32(s2, s3);
            s3 = unpack_lo32(s0, s2);
            s0 = unpack_hi32(s0, s2);
            s2 = unpack_hi32(s1, tmp);
            s1 = unpack_lo32(s1, tmp);
        }

        s0 ^= in0;
        s1 ^= in1;
        s2 ^= in2;
        s3 ^= in3;

        // Truncation: high qwords of lanes 0-1, low qwords of lanes 2-3.
        let mut out = [0u8; 32];
        out[0..8].copy_from_slice(&s0.to_le_bytes()[8..16]);
        out[8..16].copy_from_slice(&s1.to_le_bytes()[8..16]);
        out[16..24].copy_from_slice(&s2.to_le_bytes()[0..8]);
        out[24..32].copy_from_slice(&s3.to_le_bytes()[0..8]);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn derived_input(seed: u32) -> [u8; 32] {
        let mut b = [0u8; 32];
        for (i, byte) in b.iter_mut().enumerate() {
            *byte = (seed.wrapping_mul(2654435761).wrapping_add(i as u32 * 97) >> 8) as u8;
        }
        b
    }

    #[test]
    fn haraka256_deterministic() {
        let input = derived_input(7);
        assert_eq!(haraka256(&input), haraka256(&input));
    }

    #[test]
    fn haraka256_input_sensitivity() {
        let a = derived_input(1);
        let mut b = a;
        b[0] ^= 1;
        assert_ne!(haraka256(&a), haraka256(&b));
    }

    #[test]
    fn haraka512_deterministic_and_sensitive() {
        let mut input = [0u8; 64];
        for (i, b) in input.iter_mut().enumerate() {
            *b = (i as u8).wrapping_mul(17).wrapping_add(3);
        }
        let h1 = haraka512(&input);
        assert_eq!(h1, haraka512(&input));
        input[63] ^= 0x80;
        assert_ne!(h1, haraka512(&input));
    }

    #[test]
    fn keyed_with_fixed_table_matches_unkeyed() {
        let mut input = [0u8; 64];
        for (i, b) in input.iter_mut().enumerate() {
            *b = i as u8;
        }
        assert_eq!(haraka512_keyed(&input, &RC), haraka512(&input));
    }

    #[test]
    fn keyed_differs_under_different_constants() {
        let input = [0x5au8; 64];
        let mut rc = RC;
        rc[0] ^= 1;
        assert_ne!(haraka512_keyed(&input, &rc), haraka512(&input));
    }

    /// Byte-balance sanity over 2^16 derived inputs: every output byte
    /// position should take many distinct values.
    #[test]
    fn haraka256_byte_balance() {
        let mut seen = vec![[false; 256]; 32];
        let mut input = [0u8; 32];
        for n in 0u32..(1 << 16) {
            input[0..4].copy_from_slice(&n.to_le_bytes());
            let out = haraka256(&input);
            for (pos, &b) in out.iter().enumerate() {
                seen[pos][b as usize] = true;
            }
        }
        for (pos, bucket) in seen.iter().enumerate() {
            let distinct = bucket.iter().filter(|&&v| v).count();
            assert!(
                distinct > 200,
                "output byte {pos} only took {distinct} distinct values"
            );
        }
    }

    /// The SIMD path must agree with the portable reference on every
    /// primitive it implements.
    #[cfg(target_arch = "x86_64")]
    #[test]
    fn simd_matches_portable() {
        if !crate::crypto::simd_enabled() {
            return;
        }
        for seed in 0u32..64 {
            let input32 = derived_input(seed);
            let mut input64 = [0u8; 64];
            input64[..32].copy_from_slice(&derived_input(seed ^ 0xabcd));
            input64[32..].copy_from_slice(&derived_input(seed.wrapping_add(31)));

            assert_eq!(
                unsafe { crate::crypto::x86::haraka256(&input32) },
                portable::haraka256(&input32)
            );
            assert_eq!(
                unsafe { crate::crypto::x86::haraka512(&input64) },
                portable::haraka512(&input64)
            );
            let rc: Vec<u128> = (0..40usize)
                .map(|i| RC[i] ^ (((seed as u128) << 64) | i as u128))
                .collect();
            assert_eq!(
                unsafe { crate::crypto::x86::haraka512_keyed(&input64, &rc) },
                portable::haraka512_with(&input64, &rc)
            );
        }
    }
}
