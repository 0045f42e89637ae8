//! VerusHash v2.2.
//!
//! The end-to-end hash chains the preimage through Haraka-512 into a
//! 64-byte intermediate, runs CLHash over it with a key derived from the
//! intermediate itself, and finishes with a keyed Haraka-512 whose round
//! constants are picked from the (mutated) key by the CLHash result.
//!
//! Mining uses the split form: [`Hasher::hash_half`] and
//! [`Hasher::prepare_key`] once per job, then [`Hasher::hash_with_nonce`]
//! per nonce with only the 15-byte nonce window changing. The whole-
//! preimage `Hasher::hash` must produce identical bytes for the same
//! preimage; tests hold the two paths against each other.

use super::clhash::{self, ClKey, KEY_MASK, RestoreLog};
use super::haraka;

/// Offset of the per-nonce window inside the final partial block: a
/// 1487-byte preimage leaves 15 bytes (`1487 % 32`) in the last block.
const NONCE_FILL_POS: usize = 15;

/// Reusable VerusHash v2.2 state: the CLHash key, its pristine snapshot,
/// and the restore log. One per worker thread; never shared.
pub struct Hasher {
    key: Box<ClKey>,
    pristine: Box<ClKey>,
    log: RestoreLog,
    key_ready: bool,
}

impl Hasher {
    pub fn new() -> Self {
        Hasher {
            key: ClKey::zeroed(),
            pristine: ClKey::zeroed(),
            log: RestoreLog::new(),
            key_ready: false,
        }
    }

    /// Stage 1: chain the full preimage into the 64-byte intermediate
    /// state. Stable for the life of a job.
    pub fn hash_half(data: &[u8]) -> [u8; 64] {
        let (mut w, cur_pos) = chain_ingest(data);
        fill_extra(&mut w, cur_pos);
        w
    }

    /// Stage 2: derive the CLHash key from the intermediate's first 32
    /// bytes and snapshot a pristine copy. Once per job.
    pub fn prepare_key(&mut self, intermediate: &[u8; 64]) {
        let seed: &[u8; 32] = intermediate[..32].try_into().expect("seed");
        clhash::generate_key(&mut self.key, seed);
        self.pristine.lanes.copy_from_slice(&self.key.lanes);
        self.key_ready = true;
    }

    /// Stage 3: finalise one nonce. Restores the key from the pristine
    /// snapshot, overlays the 15-byte nonce window, and runs CLHash plus
    /// the keyed Haraka-512 finish.
    pub fn hash_with_nonce(&mut self, intermediate: &[u8; 64], nonce_space: &[u8; 15]) -> [u8; 32] {
        if !self.key_ready {
            self.prepare_key(intermediate);
        }
        self.key.lanes.copy_from_slice(&self.pristine.lanes);

        let mut w = *intermediate;
        fill_extra(&mut w, NONCE_FILL_POS);
        w[32..47].copy_from_slice(nonce_space);

        self.finalize(&mut w, NONCE_FILL_POS)
    }

    /// Hash an arbitrary preimage end to end. Regenerates the key, so a
    /// job prepared with [`Self::prepare_key`] must be re-prepared
    /// afterwards. Mining always goes through the two-stage API; this
    /// single-shot form is the oracle the split path is tested against.
    pub(crate) fn hash(&mut self, data: &[u8]) -> [u8; 32] {
        let (mut w, cur_pos) = chain_ingest(data);
        fill_extra(&mut w, cur_pos);
        self.prepare_key(&w);
        self.finalize(&mut w, cur_pos)
    }

    /// Shared CLHash + keyed-Haraka tail. The keyed step reads the key
    /// after CLHash mutated it; restore happens on the next call.
    fn finalize(&mut self, w: &mut [u8; 64], cur_pos: usize) -> [u8; 32] {
        let ih = clhash::clhash_v2_2(&mut self.key, w, &mut self.log);
        fill_extra64(w, cur_pos, ih);
        let off = (ih & KEY_MASK) as usize;
        haraka::haraka512_keyed(w, &self.key.lanes[off..off + 40])
    }

}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Ingest `data` 32 bytes at a time: each full block is written into the
/// upper half of the working buffer and compressed with Haraka-512; the
/// final partial block is left in place un-hashed. Returns the working
/// buffer and the partial length.
fn chain_ingest(data: &[u8]) -> ([u8; 64], usize) {
    let mut bufs = [[0u8; 64]; 2];
    let mut cur = 0usize;
    let mut cur_pos = 0usize;
    let mut pos = 0usize;

    while pos < data.len() {
        let room = 32 - cur_pos;
        if data.len() - pos >= room {
            bufs[cur][32 + cur_pos..64].copy_from_slice(&data[pos..pos + room]);
            let digest = haraka::haraka512(&bufs[cur]);
            cur ^= 1;
            bufs[cur][..32].copy_from_slice(&digest);
            pos += room;
            cur_pos = 0;
        } else {
            let rest = data.len() - pos;
            bufs[cur][32 + cur_pos..32 + cur_pos + rest].copy_from_slice(&data[pos..]);
            cur_pos += rest;
            pos = data.len();
        }
    }

    (bufs[cur], cur_pos)
}

/// Fill the tail of the working buffer with repeated copies of its first
/// 16 bytes, starting at the partial-block boundary. At the mining
/// remainder of 15 this is `W[47..63] = W[0..16]`, `W[63] = W[0]`.
fn fill_extra(w: &mut [u8; 64], cur_pos: usize) {
    let src: [u8; 16] = w[0..16].try_into().expect("fill source");
    let mut pos = cur_pos;
    let mut left = 32 - pos;
    while left > 0 {
        let n = left.min(16);
        w[32 + pos..32 + pos + n].copy_from_slice(&src[..n]);
        pos += n;
        left -= n;
    }
}

/// Same fill with the 64-bit CLHash result as the 8-byte source pattern.
fn fill_extra64(w: &mut [u8; 64], cur_pos: usize, v: u64) {
    let src = v.to_le_bytes();
    let mut pos = cur_pos;
    let mut left = 32 - pos;
    while left > 0 {
        let n = left.min(8);
        w[32 + pos..32 + pos + n].copy_from_slice(&src[..n]);
        pos += n;
        left -= n;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 1487-byte preimage with deterministic pseudo-random content and
    /// the mining layout (140-byte header + fd4005 + 1344-byte body).
    fn mining_preimage() -> Vec<u8> {
        let mut p = vec![0u8; 1487];
        for (i, b) in p.iter_mut().enumerate() {
            *b = ((i as u32).wrapping_mul(2654435761) >> 11) as u8;
        }
        p[140] = 0xfd;
        p[141] = 0x40;
        p[142] = 0x05;
        p
    }

    #[test]
    fn hash_half_fill_pattern_invariants() {
        let preimage = mining_preimage();
        let inter = Hasher::hash_half(&preimage);

        // Mining remainder is 15: the last 15 preimage bytes sit at
        // [32..47), the fill pattern covers [47..64).
        assert_eq!(&inter[32..47], &preimage[1472..]);
        assert_eq!(&inter[47..63], &inter[0..16]);
        assert_eq!(inter[63], inter[0]);
    }

    #[test]
    fn hash_half_deterministic() {
        let preimage = mining_preimage();
        assert_eq!(Hasher::hash_half(&preimage), Hasher::hash_half(&preimage));
    }

    #[test]
    fn two_stage_matches_whole_preimage_hash() {
        let preimage = mining_preimage();

        let mut whole = Hasher::new();
        let expected = whole.hash(&preimage);

        let inter = Hasher::hash_half(&preimage);
        let mut staged = Hasher::new();
        staged.prepare_key(&inter);
        let nonce_space: [u8; 15] = preimage[1472..].try_into().unwrap();
        let got = staged.hash_with_nonce(&inter, &nonce_space);

        assert_eq!(expected, got);
    }

    #[test]
    fn hash_with_nonce_deterministic() {
        let preimage = mining_preimage();
        let inter = Hasher::hash_half(&preimage);
        let mut hasher = Hasher::new();
        hasher.prepare_key(&inter);

        let ns = [7u8; 15];
        let h1 = hasher.hash_with_nonce(&inter, &ns);
        let h2 = hasher.hash_with_nonce(&inter, &ns);
        assert_eq!(h1, h2);
    }

    /// Key-restore equivalence: hashing nonces 0, 1, 2 back to back must
    /// match three fresh prepare+hash runs byte for byte.
    #[test]
    fn key_restore_equivalence_across_nonces() {
        let preimage = mining_preimage();
        let inter = Hasher::hash_half(&preimage);

        let mut sequential = Hasher::new();
        sequential.prepare_key(&inter);

        for nonce in 0u32..3 {
            let mut ns = [0u8; 15];
            ns[11..15].copy_from_slice(&nonce.to_le_bytes());
            let seq = sequential.hash_with_nonce(&inter, &ns);

            let mut fresh = Hasher::new();
            fresh.prepare_key(&inter);
            let one_shot = fresh.hash_with_nonce(&inter, &ns);

            assert_eq!(seq, one_shot, "nonce {nonce} diverged after restore");
        }
    }

    #[test]
    fn nonce_changes_output() {
        let preimage = mining_preimage();
        let inter = Hasher::hash_half(&preimage);
        let mut hasher = Hasher::new();
        hasher.prepare_key(&inter);

        let mut a = [0u8; 15];
        let mut b = [0u8; 15];
        b[11] = 1;
        assert_ne!(
            hasher.hash_with_nonce(&inter, &a),
            hasher.hash_with_nonce(&inter, &b)
        );
        // Extranonce bytes participate too.
        a[0] = 0x42;
        let c = hasher.hash_with_nonce(&inter, &a);
        a[0] = 0;
        assert_ne!(c, hasher.hash_with_nonce(&inter, &a));
    }

    /// Difficulty-1 yield: scanning 2^20 nonces should produce 16
    /// shares on average; 8..=32 is a generous 4-sigma band. Expensive,
    /// so ignored by default like the pool integration tests.
    #[test]
    #[ignore = "statistical scan over 2^20 nonces"]
    fn difficulty_one_yield_over_nonce_scan() {
        use crate::target::{difficulty_to_target, meets_target};

        let mut preimage = vec![0u8; 1487];
        for (i, b) in preimage.iter_mut().enumerate().take(140) {
            *b = (i as u8).wrapping_mul(17).wrapping_add(3);
        }
        preimage[140] = 0xfd;
        preimage[141] = 0x40;
        preimage[142] = 0x05;

        let inter = Hasher::hash_half(&preimage);
        let mut hasher = Hasher::new();
        hasher.prepare_key(&inter);

        let target = difficulty_to_target(1.0);
        let mut nonce_space = [0u8; 15];
        let mut found = 0u32;
        for nonce in 0u32..(1 << 20) {
            nonce_space[11..15].copy_from_slice(&nonce.to_le_bytes());
            let hash = hasher.hash_with_nonce(&inter, &nonce_space);
            if meets_target(&hash, target) {
                found += 1;
            }
        }

        assert!(
            (8..=32).contains(&found),
            "expected 8..=32 shares at difficulty 1, found {found}"
        );
    }

    #[test]
    fn whole_hash_deterministic_on_header_sized_input() {
        let header: Vec<u8> = (0..80).map(|i| (i as u8).wrapping_mul(17).wrapping_add(3)).collect();
        let mut h1 = Hasher::new();
        let mut h2 = Hasher::new();
        assert_eq!(h1.hash(&header), h2.hash(&header));
    }
}
