//! x86_64 kernels using AES-NI, PCLMULQDQ and SSSE3.
//!
//! Each function mirrors its portable counterpart in
//! [`crate::crypto::haraka::portable`] / [`crate::crypto::clhash`]
//! line-for-line; the test suites assert byte equality between the two
//! paths. Callers must verify feature support (see
//! [`crate::crypto::simd_enabled`]) before invoking anything here.

use core::arch::x86_64::*;
use core::mem::transmute;

use super::clhash::{KEY_LANES, RestoreLog};
use super::haraka::RC;

#[inline]
unsafe fn load_lane(bytes: &[u8]) -> __m128i {
    unsafe { _mm_loadu_si128(bytes.as_ptr() as *const __m128i) }
}

#[inline]
unsafe fn store_lane(out: &mut [u8], v: __m128i) {
    unsafe { _mm_storeu_si128(out.as_mut_ptr() as *mut __m128i, v) }
}

#[inline]
unsafe fn rc_lane(rc: &[u128], i: usize) -> __m128i {
    unsafe { _mm_loadu_si128(rc.as_ptr().add(i) as *const __m128i) }
}

/// Haraka-256 with AES-NI.
#[target_feature(enable = "aes,pclmulqdq,ssse3,sse4.1,avx")]
pub unsafe fn haraka256(input: &[u8; 32]) -> [u8; 32] {
    unsafe {
        let in0 = load_lane(&input[0..16]);
        let in1 = load_lane(&input[16..32]);
        let mut s0 = in0;
        let mut s1 = in1;

        for r in 0..5 {
            s0 = _mm_aesenc_si128(s0, rc_lane(&RC, r * 4));
            s1 = _mm_aesenc_si128(s1, rc_lane(&RC, r * 4 + 1));
            s0 = _mm_aesenc_si128(s0, rc_lane(&RC, r * 4 + 2));
            s1 = _mm_aesenc_si128(s1, rc_lane(&RC, r * 4 + 3));
            let t = _mm_unpacklo_epi32(s0, s1);
            s1 = _mm_unpackhi_epi32(s0, s1);
            s0 = t;
        }

        s0 = _mm_xor_si128(s0, in0);
        s1 = _mm_xor_si128(s1, in1);

        let mut out = [0u8; 32];
        store_lane(&mut out[0..16], s0);
        store_lane(&mut out[16..32], s1);
        out
    }
}

/// Haraka-512 with AES-NI and the fixed constant table.
#[target_feature(enable = "aes,pclmulqdq,ssse3,sse4.1,avx")]
pub unsafe fn haraka512(input: &[u8; 64]) -> [u8; 32] {
    unsafe { haraka512_with(input, &RC) }
}

/// Keyed Haraka-512: round constants from `rc` (at least 40 lanes).
#[target_feature(enable = "aes,pclmulqdq,ssse3,sse4.1,avx")]
pub unsafe fn haraka512_keyed(input: &[u8; 64], rc: &[u128]) -> [u8; 32] {
    unsafe { haraka512_with(input, rc) }
}

#[target_feature(enable = "aes,pclmulqdq,ssse3,sse4.1,avx")]
unsafe fn haraka512_with(input: &[u8; 64], rc: &[u128]) -> [u8; 32] {
    unsafe {
        let in0 = load_lane(&input[0..16]);
        let in1 = load_lane(&input[16..32]);
        let in2 = load_lane(&input[32..48]);
        let in3 = load_lane(&input[48..64]);
        let mut s0 = in0;
        let mut s1 = in1;
        let mut s2 = in2;
        let mut s3 = in3;

        for r in 0..5 {
            let base = r * 8;
            s0 = _mm_aesenc_si128(s0, rc_lane(rc, base));
            s1 = _mm_aesenc_si128(s1, rc_lane(rc, base + 1));
            s2 = _mm_aesenc_si128(s2, rc_lane(rc, base + 2));
            s3 = _mm_aesenc_si128(s3, rc_lane(rc, base + 3));
            s0 = _mm_aesenc_si128(s0, rc_lane(rc, base + 4));
            s1 = _mm_aesenc_si128(s1, rc_lane(rc, base + 5));
            s2 = _mm_aesenc_si128(s2, rc_lane(rc, base + 6));
            s3 = _mm_aesenc_si128(s3, rc_lane(rc, base + 7));

            // MIX4
            let tmp = _mm_unpacklo_epi32(s0, s1);
            s0 = _mm_unpackhi_epi32(s0, s1);
            s1 = _mm_unpacklo_epi32(s2, s3);
            s2 = _mm_unpackhi_epi32(s2, s3);
            s3 = _mm_unpacklo_epi32(s0, s2);
            s0 = _mm_unpackhi_epi32(s0, s2);
            s2 = _mm_unpackhi_epi32(s1, tmp);
            s1 = _mm_unpacklo_epi32(s1, tmp);
        }

        s0 = _mm_xor_si128(s0, in0);
        s1 = _mm_xor_si128(s1, in1);
        s2 = _mm_xor_si128(s2, in2);
        s3 = _mm_xor_si128(s3, in3);

        // TRUNCSTORE: high qwords of lanes 0-1, low qwords of lanes 2-3.
        let mut out = [0u8; 32];
        let t0: [u8; 16] = transmute(s0);
        let t1: [u8; 16] = transmute(s1);
        let t2: [u8; 16] = transmute(s2);
        let t3: [u8; 16] = transmute(s3);
        out[0..8].copy_from_slice(&t0[8..16]);
        out[8..16].copy_from_slice(&t1[8..16]);
        out[16..24].copy_from_slice(&t2[0..8]);
        out[24..32].copy_from_slice(&t3[0..8]);
        out
    }
}

/// CLHash v2.2 kernel with PCLMULQDQ and AES-NI.
///
/// Mutates `lanes` exactly like the portable kernel and records the same
/// restore log. Returns the unreduced 128-bit accumulator.
#[target_feature(enable = "aes,pclmulqdq,ssse3,sse4.1,avx")]
pub unsafe fn clhash_kernel(
    lanes: &mut [u128; KEY_LANES],
    buf: &[u8; 64],
    key_mask: u64,
    log: &mut RestoreLog,
) -> u128 {
    unsafe {
        let key = lanes.as_mut_ptr() as *mut __m128i;

        let b0 = load_lane(&buf[0..16]);
        let b1 = load_lane(&buf[16..32]);
        let b2 = load_lane(&buf[32..48]);
        let b3 = load_lane(&buf[48..64]);
        let pbuf_copy = [
            _mm_xor_si128(b0, b2),
            _mm_xor_si128(b1, b3),
            b2,
            b3,
        ];

        let mut acc = _mm_load_si128(key.add((key_mask + 2) as usize));

        for i in 0..32 {
            let selector = _mm_cvtsi128_si64(acc) as u64;

            let prand = ((selector >> 5) & key_mask) as usize;
            let prandex = ((selector >> 32) & key_mask) as usize;
            log.record(
                i,
                prand,
                prandex,
                transmute::<__m128i, u128>(_mm_load_si128(key.add(prand))),
                transmute::<__m128i, u128>(_mm_load_si128(key.add(prandex))),
            );

            let base = pbuf_copy[(selector & 3) as usize];
            let neighbor = pbuf_copy[((selector & 3) ^ 1) as usize];

            match selector & 0x1c {
                0x00 => {
                    let temp1 = _mm_load_si128(key.add(prandex));
                    let add1 = _mm_xor_si128(temp1, neighbor);
                    acc = _mm_xor_si128(_mm_clmulepi64_si128::<0x10>(add1, add1), acc);

                    let tempa1 = _mm_mulhrs_epi16(acc, temp1);
                    let tempa2 = _mm_xor_si128(tempa1, temp1);

                    let temp12 = _mm_load_si128(key.add(prand));
                    _mm_store_si128(key.add(prand), tempa2);

                    let add12 = _mm_xor_si128(temp12, base);
                    acc = _mm_xor_si128(_mm_clmulepi64_si128::<0x10>(add12, add12), acc);

                    let tempb1 = _mm_mulhrs_epi16(acc, temp12);
                    _mm_store_si128(key.add(prandex), _mm_xor_si128(tempb1, temp12));
                }
                0x04 => {
                    let temp1 = _mm_load_si128(key.add(prand));
                    let add1 = _mm_xor_si128(temp1, base);
                    acc = _mm_xor_si128(_mm_clmulepi64_si128::<0x10>(add1, add1), acc);
                    acc = _mm_xor_si128(_mm_clmulepi64_si128::<0x10>(base, base), acc);

                    let tempa1 = _mm_mulhrs_epi16(acc, temp1);
                    let tempa2 = _mm_xor_si128(tempa1, temp1);

                    let temp12 = _mm_load_si128(key.add(prandex));
                    _mm_store_si128(key.add(prandex), tempa2);

                    let add12 = _mm_xor_si128(temp12, neighbor);
                    acc = _mm_xor_si128(add12, acc);

                    let tempb1 = _mm_mulhrs_epi16(acc, temp12);
                    _mm_store_si128(key.add(prand), _mm_xor_si128(tempb1, temp12));
                }
                0x08 => {
                    let temp1 = _mm_load_si128(key.add(prandex));
                    acc = _mm_xor_si128(_mm_xor_si128(temp1, base), acc);

                    let tempa1 = _mm_mulhrs_epi16(acc, temp1);
                    let tempa2 = _mm_xor_si128(tempa1, temp1);

                    let temp12 = _mm_load_si128(key.add(prand));
                    _mm_store_si128(key.add(prand), tempa2);

                    let add12 = _mm_xor_si128(temp12, neighbor);
                    acc = _mm_xor_si128(_mm_clmulepi64_si128::<0x10>(add12, add12), acc);
                    acc = _mm_xor_si128(_mm_clmulepi64_si128::<0x10>(neighbor, neighbor), acc);

                    let tempb1 = _mm_mulhrs_epi16(acc, temp12);
                    _mm_store_si128(key.add(prandex), _mm_xor_si128(tempb1, temp12));
                }
                0x0c => {
                    let temp1 = _mm_load_si128(key.add(prand));
                    acc = _mm_xor_si128(_mm_xor_si128(temp1, neighbor), acc);

                    // Bits 2-3 of the selector are set, divisor != 0.
                    let divisor = selector as u32 as i32;
                    let dividend = _mm_cvtsi128_si64(acc);
                    let modulo = dividend.wrapping_rem(divisor as i64) as i32;
                    acc = _mm_xor_si128(_mm_cvtsi32_si128(modulo), acc);

                    let tempa1 = _mm_mulhrs_epi16(acc, temp1);
                    let tempa2 = _mm_xor_si128(tempa1, temp1);

                    if dividend & 1 != 0 {
                        let temp12 = _mm_load_si128(key.add(prandex));
                        _mm_store_si128(key.add(prandex), tempa2);

                        let add12 = _mm_xor_si128(temp12, base);
                        acc = _mm_xor_si128(_mm_clmulepi64_si128::<0x10>(add12, add12), acc);
                        acc = _mm_xor_si128(_mm_clmulepi64_si128::<0x10>(base, base), acc);

                        let tempb1 = _mm_mulhrs_epi16(acc, temp12);
                        _mm_store_si128(key.add(prand), _mm_xor_si128(tempb1, temp12));
                    } else {
                        _mm_store_si128(key.add(prand), _mm_load_si128(key.add(prandex)));
                        _mm_store_si128(key.add(prandex), tempa2);
                        acc = _mm_xor_si128(base, acc);
                    }
                }
                0x10 => {
                    // Key lanes as AES round constants.
                    let mut s0 = neighbor;
                    let mut s1 = base;
                    for rci in [0usize, 4, 8] {
                        s0 = _mm_aesenc_si128(s0, _mm_load_si128(key.add(prand + rci)));
                        s1 = _mm_aesenc_si128(s1, _mm_load_si128(key.add(prand + rci + 1)));
                        s0 = _mm_aesenc_si128(s0, _mm_load_si128(key.add(prand + rci + 2)));
                        s1 = _mm_aesenc_si128(s1, _mm_load_si128(key.add(prand + rci + 3)));
                        let t = _mm_unpacklo_epi32(s0, s1);
                        s1 = _mm_unpackhi_epi32(s0, s1);
                        s0 = t;
                    }
                    acc = _mm_xor_si128(s1, _mm_xor_si128(s0, acc));

                    let tempa1 = _mm_load_si128(key.add(prand));
                    let tempa2 = _mm_mulhrs_epi16(acc, tempa1);

                    _mm_store_si128(key.add(prand), _mm_load_si128(key.add(prandex)));
                    _mm_store_si128(key.add(prandex), _mm_xor_si128(tempa1, tempa2));
                }
                0x14 => {
                    let rounds = selector >> 61;
                    let mut rc = prand;
                    let mut aes_offset = 0usize;
                    let mut r = rounds as i64;
                    loop {
                        if selector & (0x10000000u64 << (r as u64)) != 0 {
                            let temp2 = if r & 1 != 0 { base } else { neighbor };
                            let add1 = _mm_xor_si128(_mm_load_si128(key.add(rc)), temp2);
                            rc += 1;
                            acc = _mm_xor_si128(_mm_clmulepi64_si128::<0x10>(add1, add1), acc);
                        } else {
                            let mut s0 = _mm_load_si128(key.add(rc));
                            rc += 1;
                            let mut s1 = if r & 1 != 0 { neighbor } else { base };
                            s0 = _mm_aesenc_si128(s0, _mm_load_si128(key.add(rc + aes_offset)));
                            s1 = _mm_aesenc_si128(s1, _mm_load_si128(key.add(rc + aes_offset + 1)));
                            s0 = _mm_aesenc_si128(s0, _mm_load_si128(key.add(rc + aes_offset + 2)));
                            s1 = _mm_aesenc_si128(s1, _mm_load_si128(key.add(rc + aes_offset + 3)));
                            aes_offset += 4;
                            let t = _mm_unpacklo_epi32(s0, s1);
                            s1 = _mm_unpackhi_epi32(s0, s1);
                            s0 = t;
                            acc = _mm_xor_si128(s0, acc);
                            acc = _mm_xor_si128(s1, acc);
                        }
                        if r == 0 {
                            break;
                        }
                        r -= 1;
                    }

                    let tempa1 = _mm_load_si128(key.add(prand));
                    let tempa2 = _mm_mulhrs_epi16(acc, tempa1);
                    let tempa3 = _mm_xor_si128(tempa1, tempa2);

                    let tempa4 = _mm_load_si128(key.add(prandex));
                    _mm_store_si128(key.add(prandex), tempa3);
                    _mm_store_si128(key.add(prand), tempa4);
                }
                0x18 => {
                    let rounds = selector >> 61;
                    let mut rc = prand;
                    let mut onekey = _mm_setzero_si128();
                    let mut r = rounds as i64;
                    loop {
                        if selector & (0x10000000u64 << (r as u64)) != 0 {
                            let temp2 = if r & 1 != 0 { base } else { neighbor };
                            onekey = _mm_xor_si128(_mm_load_si128(key.add(rc)), temp2);
                            rc += 1;
                            // Bits 3-4 of the selector are set, divisor != 0.
                            let divisor = selector as u32 as i32;
                            let dividend = _mm_cvtsi128_si64(onekey);
                            let modulo = dividend.wrapping_rem(divisor as i64) as i32;
                            acc = _mm_xor_si128(_mm_cvtsi32_si128(modulo), acc);
                        } else {
                            let temp2 = if r & 1 != 0 { neighbor } else { base };
                            let add1 = _mm_xor_si128(_mm_load_si128(key.add(rc)), temp2);
                            rc += 1;
                            onekey = _mm_clmulepi64_si128::<0x10>(add1, add1);
                            let clprod2 = _mm_mulhrs_epi16(acc, onekey);
                            acc = _mm_xor_si128(clprod2, acc);
                        }
                        if r == 0 {
                            break;
                        }
                        r -= 1;
                    }

                    let tempa3 = _mm_load_si128(key.add(prandex));
                    _mm_store_si128(key.add(prandex), onekey);
                    _mm_store_si128(key.add(prand), _mm_xor_si128(tempa3, acc));
                }
                0x1c => {
                    let temp2 = _mm_load_si128(key.add(prandex));
                    let add1 = _mm_xor_si128(base, temp2);
                    acc = _mm_xor_si128(_mm_clmulepi64_si128::<0x10>(add1, add1), acc);

                    let tempa1 = _mm_mulhrs_epi16(acc, temp2);
                    let tempa2 = _mm_xor_si128(tempa1, temp2);

                    let tempa3 = _mm_load_si128(key.add(prand));
                    _mm_store_si128(key.add(prand), tempa2);

                    acc = _mm_xor_si128(tempa3, acc);
                    acc = _mm_xor_si128(neighbor, acc);
                    let tempb1 = _mm_mulhrs_epi16(acc, tempa3);
                    _mm_store_si128(key.add(prandex), _mm_xor_si128(tempb1, tempa3));
                }
                _ => unreachable!(),
            }
        }
        transmute::<__m128i, u128>(acc)
    }
}
