//! CLHash v2.2: a carry-less-multiplication keyed hash over a mutable key.
//!
//! The engine runs 32 iterations of a selector-driven state machine over a
//! 128-bit accumulator and an 8832-byte key buffer (552 16-byte lanes).
//! Every iteration reads a selector from the accumulator's low 64 bits,
//! picks two key lanes, and dispatches on `selector & 0x1c` into one of
//! eight mixing cases; the chosen lanes are overwritten with transformed
//! values. Cases 0x10, 0x14 and 0x18 run short AES schedules whose round
//! constants come from the key itself, not the fixed Haraka table.
//!
//! Because the key mutates on every evaluation it must be restored before
//! the next one. The production mechanism is a pristine snapshot copy
//! (see [`crate::crypto::verushash::Hasher`]); the engine additionally
//! records every overwritten lane in a [`RestoreLog`], which
//! [`RestoreLog::apply`] can replay in reverse as a cheaper alternative.
//! Tests verify the two strategies agree byte-for-byte.

use super::haraka;
use super::ops::{aes_enc, clmul64, clmul_lh, mulhrs16, shuffle8, unpack_hi32, unpack_lo32};

/// Key buffer size in bytes: 8 KiB of maskable lanes plus 40 lanes of
/// headroom for the keyed-Haraka constant window and the inner AES
/// schedules.
pub const KEY_SIZE: usize = 1024 * 8 + 40 * 16;

/// Key buffer size in 16-byte lanes (552).
pub const KEY_LANES: usize = KEY_SIZE / 16;

/// Lane-index mask handed to the kernel, pre-divided by the lane size.
pub const KEY_MASK: u64 = 511;

/// The mutable CLHash key: 552 lanes, 32-byte aligned for SIMD loads.
#[repr(C, align(32))]
pub struct ClKey {
    pub lanes: [u128; KEY_LANES],
}

impl ClKey {
    /// Allocate a zeroed key on the heap.
    pub fn zeroed() -> Box<Self> {
        Box::new(ClKey {
            lanes: [0u128; KEY_LANES],
        })
    }

    /// Write one 32-byte block at block index `i` (two lanes).
    #[inline]
    fn set_block(&mut self, i: usize, block: &[u8; 32]) {
        self.lanes[2 * i] = u128::from_le_bytes(block[0..16].try_into().expect("lane"));
        self.lanes[2 * i + 1] = u128::from_le_bytes(block[16..32].try_into().expect("lane"));
    }
}

/// Generate the key from a 32-byte seed by chaining Haraka-256:
/// `k[0] = Haraka256(seed)`, `k[i+1] = Haraka256(k[i])`.
pub fn generate_key(key: &mut ClKey, seed: &[u8; 32]) {
    let mut block = haraka::haraka256(seed);
    key.set_block(0, &block);
    for i in 1..KEY_LANES / 2 {
        block = haraka::haraka256(&block);
        key.set_block(i, &block);
    }
}

/// Record of the 32 lane pairs a kernel run overwrote, in iteration
/// order: indices and pre-mutation values.
pub struct RestoreLog {
    pub fixrand: [u32; 32],
    pub fixrandex: [u32; 32],
    pub prand: [u128; 32],
    pub prandex: [u128; 32],
}

impl RestoreLog {
    pub fn new() -> Self {
        RestoreLog {
            fixrand: [0; 32],
            fixrandex: [0; 32],
            prand: [0; 32],
            prandex: [0; 32],
        }
    }

    #[inline]
    pub(crate) fn record(&mut self, i: usize, idx: usize, idx_ex: usize, lane: u128, lane_ex: u128) {
        self.fixrand[i] = idx as u32;
        self.fixrandex[i] = idx_ex as u32;
        self.prand[i] = lane;
        self.prandex[i] = lane_ex;
    }

    /// Replay the log in reverse, restoring every lane the kernel wrote.
    ///
    /// Reverse order matters when an index repeats across iterations:
    /// the oldest recorded value must win.
    pub fn apply(&self, key: &mut ClKey) {
        for i in (0..32).rev() {
            key.lanes[self.fixrandex[i] as usize] = self.prandex[i];
            key.lanes[self.fixrand[i] as usize] = self.prand[i];
        }
    }
}

impl Default for RestoreLog {
    fn default() -> Self {
        Self::new()
    }
}

/// `lazyLengthHash`: carry-less product of the key length and input
/// length, folded into the accumulator before reduction.
#[inline]
fn lazy_length_hash(key_length: u64, length: u64) -> u128 {
    let v = (length as u128) | ((key_length as u128) << 64);
    clmul_lh(v, v)
}

/// Reduce the 128-bit accumulator modulo `x^64 + x^4 + x^3 + x + 1`.
#[inline]
fn reduce64(acc: u128) -> u64 {
    const POLY: u64 = (1 << 4) + (1 << 3) + (1 << 1) + 1;
    const TABLE: u128 = u128::from_le_bytes([
        0, 27, 54, 45, 108, 119, 90, 65, 216, 195, 238, 245, 180, 175, 130, 153,
    ]);
    let q2 = clmul64((acc >> 64) as u64, POLY);
    let q3 = shuffle8(TABLE, q2 >> 64);
    let q4 = q2 ^ acc;
    (q3 ^ q4) as u64
}

/// CLHash v2.2 over a 64-byte input.
///
/// `key` is mutated; the caller owns restoring it (snapshot or
/// [`RestoreLog::apply`]) before the next evaluation. Returns the reduced
/// 64-bit hash.
pub fn clhash_v2_2(key: &mut ClKey, buf: &[u8; 64], log: &mut RestoreLog) -> u64 {
    let acc = kernel(key, buf, KEY_MASK, log);
    let acc = acc ^ lazy_length_hash(1024, 64);
    reduce64(acc)
}

#[inline]
fn kernel(key: &mut ClKey, buf: &[u8; 64], key_mask: u64, log: &mut RestoreLog) -> u128 {
    #[cfg(target_arch = "x86_64")]
    if super::simd_enabled() {
        // Feature presence was verified by `simd_enabled`.
        return unsafe { super::x86::clhash_kernel(&mut key.lanes, buf, key_mask, log) };
    }
    kernel_portable(&mut key.lanes, buf, key_mask, log)
}

/// Portable reference kernel. The x86 kernel mirrors this structure
/// case-for-case.
pub(crate) fn kernel_portable(
    key: &mut [u128; KEY_LANES],
    buf: &[u8; 64],
    key_mask: u64,
    log: &mut RestoreLog,
) -> u128 {
    let b0 = u128::from_le_bytes(buf[0..16].try_into().expect("lane"));
    let b1 = u128::from_le_bytes(buf[16..32].try_into().expect("lane"));
    let b2 = u128::from_le_bytes(buf[32..48].try_into().expect("lane"));
    let b3 = u128::from_le_bytes(buf[48..64].try_into().expect("lane"));
    let pbuf_copy = [b0 ^ b2, b1 ^ b3, b2, b3];

    let mut acc = key[(key_mask + 2) as usize];

    for i in 0..32 {
        let selector = acc as u64;

        let prand = ((selector >> 5) & key_mask) as usize;
        let prandex = ((selector >> 32) & key_mask) as usize;
        log.record(i, prand, prandex, key[prand], key[prandex]);

        // Buffer view: `selector & 3` picks the base lane, its neighbour
        // flips the low bit, so both stay in bounds.
        let base = pbuf_copy[(selector & 3) as usize];
        let neighbor = pbuf_copy[((selector & 3) ^ 1) as usize];

        match selector & 0x1c {
            0x00 => {
                let temp1 = key[prandex];
                let add1 = temp1 ^ neighbor;
                acc ^= clmul_lh(add1, add1);

                let tempa2 = mulhrs16(acc, temp1) ^ temp1;

                let temp12 = key[prand];
                key[prand] = tempa2;

                let add12 = temp12 ^ base;
                acc ^= clmul_lh(add12, add12);

                key[prandex] = mulhrs16(acc, temp12) ^ temp12;
            }
            0x04 => {
                let temp1 = key[prand];
                let add1 = temp1 ^ base;
                acc ^= clmul_lh(add1, add1);
                acc ^= clmul_lh(base, base);

                let tempa2 = mulhrs16(acc, temp1) ^ temp1;

                let temp12 = key[prandex];
                key[prandex] = tempa2;

                acc ^= temp12 ^ neighbor;

                key[prand] = mulhrs16(acc, temp12) ^ temp12;
            }
            0x08 => {
                let temp1 = key[prandex];
                acc ^= temp1 ^ base;

                let tempa2 = mulhrs16(acc, temp1) ^ temp1;

                let temp12 = key[prand];
                key[prand] = tempa2;

                let add12 = temp12 ^ neighbor;
                acc ^= clmul_lh(add12, add12);
                acc ^= clmul_lh(neighbor, neighbor);

                key[prandex] = mulhrs16(acc, temp12) ^ temp12;
            }
            0x0c => {
                let temp1 = key[prand];
                acc ^= temp1 ^ neighbor;

                // `selector & 0x1c == 0xc` forces bits 2-3 on, so the
                // low word can never be zero.
                let divisor = selector as u32 as i32;
                let dividend = acc as u64 as i64;
                let modulo = dividend.wrapping_rem(divisor as i64) as i32;
                acc ^= modulo as u32 as u128;

                let tempa2 = mulhrs16(acc, temp1) ^ temp1;

                if dividend & 1 != 0 {
                    let temp12 = key[prandex];
                    key[prandex] = tempa2;

                    let add12 = temp12 ^ base;
                    acc ^= clmul_lh(add12, add12);
                    acc ^= clmul_lh(base, base);

                    key[prand] = mulhrs16(acc, temp12) ^ temp12;
                } else {
                    key[prand] = key[prandex];
                    key[prandex] = tempa2;
                    acc ^= base;
                }
            }
            0x10 => {
                // Three paired AES rounds whose round constants are key
                // lanes starting at `prand`, not the Haraka table.
                let mut s0 = neighbor;
                let mut s1 = base;
                for rci in [0usize, 4, 8] {
                    s0 = aes_enc(s0, key[prand + rci]);
                    s1 = aes_enc(s1, key[prand + rci + 1]);
                    s0 = aes_enc(s0, key[prand + rci + 2]);
                    s1 = aes_enc(s1, key[prand + rci + 3]);
                    let t = unpack_lo32(s0, s1);
                    s1 = unpack_hi32(s0, s1);
                    s0 = t;
                }
                acc ^= s0 ^ s1;

                let tempa1 = key[prand];
                let tempa2 = mulhrs16(acc, tempa1);

                key[prand] = key[prandex];
                key[prandex] = tempa1 ^ tempa2;
            }
            0x14 => {
                // The "monkins" loop: between 1 and 8 passes, each either
                // a carry-less fold or a keyed AES pair, with the key
                // pointer advancing through the lanes above `prand`.
                let rounds = selector >> 61;
                let mut rc = prand;
                let mut aes_offset = 0usize;
                let mut r = rounds as i64;
                loop {
                    if selector & (0x10000000u64 << (r as u64)) != 0 {
                        let temp2 = if r & 1 != 0 { base } else { neighbor };
                        let add1 = key[rc] ^ temp2;
                        rc += 1;
                        acc ^= clmul_lh(add1, add1);
                    } else {
                        let mut s0 = key[rc];
                        rc += 1;
                        let mut s1 = if r & 1 != 0 { neighbor } else { base };
                        s0 = aes_enc(s0, key[rc + aes_offset]);
                        s1 = aes_enc(s1, key[rc + aes_offset + 1]);
                        s0 = aes_enc(s0, key[rc + aes_offset + 2]);
                        s1 = aes_enc(s1, key[rc + aes_offset + 3]);
                        aes_offset += 4;
                        let t = unpack_lo32(s0, s1);
                        s1 = unpack_hi32(s0, s1);
                        s0 = t;
                        acc ^= s0;
                        acc ^= s1;
                    }
                    if r == 0 {
                        break;
                    }
                    r -= 1;
                }

                let tempa1 = key[prand];
                let tempa3 = tempa1 ^ mulhrs16(acc, tempa1);

                let tempa4 = key[prandex];
                key[prandex] = tempa3;
                key[prand] = tempa4;
            }
            0x18 => {
                let rounds = selector >> 61;
                let mut rc = prand;
                let mut onekey = 0u128;
                let mut r = rounds as i64;
                loop {
                    if selector & (0x10000000u64 << (r as u64)) != 0 {
                        let temp2 = if r & 1 != 0 { base } else { neighbor };
                        onekey = key[rc] ^ temp2;
                        rc += 1;
                        // Bits 3-4 of the selector are set in this case,
                        // so the divisor is non-zero.
                        let divisor = selector as u32 as i32;
                        let dividend = onekey as u64 as i64;
                        let modulo = dividend.wrapping_rem(divisor as i64) as i32;
                        acc ^= modulo as u32 as u128;
                    } else {
                        let temp2 = if r & 1 != 0 { neighbor } else { base };
                        let add1 = key[rc] ^ temp2;
                        rc += 1;
                        onekey = clmul_lh(add1, add1);
                        acc ^= mulhrs16(acc, onekey);
                    }
                    if r == 0 {
                        break;
                    }
                    r -= 1;
                }

                let tempa3 = key[prandex];
                key[prandex] = onekey;
                key[prand] = tempa3 ^ acc;
            }
            0x1c => {
                let temp2 = key[prandex];
                let add1 = base ^ temp2;
                acc ^= clmul_lh(add1, add1);

                let tempa2 = mulhrs16(acc, temp2) ^ temp2;

                let tempa3 = key[prand];
                key[prand] = tempa2;

                acc ^= tempa3;
                acc ^= neighbor;
                key[prandex] = mulhrs16(acc, tempa3) ^ tempa3;
            }
            _ => unreachable!(),
        }
    }
    acc
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> Box<ClKey> {
        let mut key = ClKey::zeroed();
        let seed: [u8; 32] = core::array::from_fn(|i| (i as u8).wrapping_mul(41).wrapping_add(7));
        generate_key(&mut key, &seed);
        key
    }

    fn test_buf() -> [u8; 64] {
        core::array::from_fn(|i| (i as u8).wrapping_mul(29).wrapping_add(13))
    }

    #[test]
    fn key_generation_chains_haraka256() {
        let key = test_key();
        let seed: [u8; 32] = core::array::from_fn(|i| (i as u8).wrapping_mul(41).wrapping_add(7));
        let k0 = haraka::haraka256(&seed);
        let k1 = haraka::haraka256(&k0);
        assert_eq!(&key.lanes[0].to_le_bytes()[..], &k0[0..16]);
        assert_eq!(&key.lanes[1].to_le_bytes()[..], &k0[16..32]);
        assert_eq!(&key.lanes[2].to_le_bytes()[..], &k1[0..16]);
        assert_eq!(&key.lanes[3].to_le_bytes()[..], &k1[16..32]);
    }

    #[test]
    fn deterministic_on_pristine_key() {
        let pristine = test_key();
        let buf = test_buf();

        let mut key = ClKey::zeroed();
        key.lanes.copy_from_slice(&pristine.lanes);
        let mut log = RestoreLog::new();
        let h1 = clhash_v2_2(&mut key, &buf, &mut log);

        key.lanes.copy_from_slice(&pristine.lanes);
        let h2 = clhash_v2_2(&mut key, &buf, &mut log);
        assert_eq!(h1, h2);
    }

    #[test]
    fn mutates_the_key() {
        let pristine = test_key();
        let mut key = ClKey::zeroed();
        key.lanes.copy_from_slice(&pristine.lanes);
        let mut log = RestoreLog::new();
        clhash_v2_2(&mut key, &test_buf(), &mut log);
        assert_ne!(&key.lanes[..], &pristine.lanes[..]);
    }

    #[test]
    fn restore_log_matches_snapshot_restore() {
        let pristine = test_key();
        let mut key = ClKey::zeroed();
        key.lanes.copy_from_slice(&pristine.lanes);

        let mut log = RestoreLog::new();
        clhash_v2_2(&mut key, &test_buf(), &mut log);
        log.apply(&mut key);

        assert_eq!(&key.lanes[..], &pristine.lanes[..]);
    }

    #[test]
    fn restored_key_reproduces_the_hash() {
        let pristine = test_key();
        let buf = test_buf();
        let mut key = ClKey::zeroed();
        key.lanes.copy_from_slice(&pristine.lanes);

        let mut log = RestoreLog::new();
        let h1 = clhash_v2_2(&mut key, &buf, &mut log);
        log.apply(&mut key);
        let h2 = clhash_v2_2(&mut key, &buf, &mut log);
        assert_eq!(h1, h2);
    }

    #[test]
    fn different_inputs_diverge() {
        let pristine = test_key();
        let mut key = ClKey::zeroed();
        let mut log = RestoreLog::new();

        key.lanes.copy_from_slice(&pristine.lanes);
        let h1 = clhash_v2_2(&mut key, &test_buf(), &mut log);

        let mut buf = test_buf();
        buf[5] ^= 0x40;
        key.lanes.copy_from_slice(&pristine.lanes);
        let h2 = clhash_v2_2(&mut key, &buf, &mut log);
        assert_ne!(h1, h2);
    }

    #[test]
    fn lazy_length_hash_is_the_documented_constant() {
        // Single-bit operands: 64 * 1024 carry-less is exactly 2^16.
        assert_eq!(lazy_length_hash(1024, 64), 1 << 16);
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn simd_kernel_matches_portable() {
        if !crate::crypto::simd_enabled() {
            return;
        }
        let pristine = test_key();
        for round in 0u8..8 {
            let buf: [u8; 64] =
                core::array::from_fn(|i| (i as u8).wrapping_mul(31).wrapping_add(round));

            let mut key_a = ClKey::zeroed();
            key_a.lanes.copy_from_slice(&pristine.lanes);
            let mut log_a = RestoreLog::new();
            let acc_a = kernel_portable(&mut key_a.lanes, &buf, KEY_MASK, &mut log_a);

            let mut key_b = ClKey::zeroed();
            key_b.lanes.copy_from_slice(&pristine.lanes);
            let mut log_b = RestoreLog::new();
            let acc_b = unsafe {
                crate::crypto::x86::clhash_kernel(&mut key_b.lanes, &buf, KEY_MASK, &mut log_b)
            };

            assert_eq!(acc_a, acc_b, "accumulators diverged on round {round}");
            assert_eq!(&key_a.lanes[..], &key_b.lanes[..], "key mutation diverged");
            assert_eq!(log_a.fixrand, log_b.fixrand);
            assert_eq!(log_a.fixrandex, log_b.fixrandex);
            assert_eq!(log_a.prand, log_b.prand);
            assert_eq!(log_a.prandex, log_b.prandex);
        }
    }
}
