//! Pool jobs: the Verus block header, solution, and derived hashing
//! inputs.
//!
//! A Verus block header is 140 bytes: version (4), prev hash (32),
//! merkle root (32), final Sapling root (32), nTime (4), nBits (4) and a
//! 32-byte nNonce whose first bytes carry the pool's extranonce1. The
//! hashing preimage appends the 1347-byte solution (`fd4005` compact
//! size plus the 1344-byte body); its final 15 bytes are the per-nonce
//! window the workers vary.

use crate::stratum_v1::messages::JobNotification;
use crate::u256::U256;

/// Verus block header length.
pub const HEADER_LEN: usize = 140;

/// Solution body length the pools declare (excluding the compact-size
/// prefix).
pub const SOLUTION_BODY_LEN: usize = 1344;

/// Compact-size prefix for a 1344-byte solution.
pub const SOLUTION_PREFIX: [u8; 3] = [0xfd, 0x40, 0x05];

/// Full hashing preimage length: header plus prefixed solution.
pub const PREIMAGE_LEN: usize = HEADER_LEN + SOLUTION_PREFIX.len() + SOLUTION_BODY_LEN;

/// Offset of the nNonce field within the header.
const NONCE_OFFSET: usize = 108;

/// A pool-issued unit of work with everything derived that the workers
/// need. Published atomically to the engine and retained until
/// superseded.
#[derive(Debug, Clone)]
pub struct Job {
    /// Opaque pool job id, echoed verbatim on submission
    pub job_id: String,

    /// Timestamp hex, echoed on submission
    pub ntime: String,

    /// When true, workers must abandon in-progress work
    pub clean_jobs: bool,

    /// Share threshold (little-endian 256-bit comparison form)
    pub target: U256,

    /// Difficulty mirror of the target, for display
    pub difficulty: f64,

    /// Assembled 140-byte block header (extranonce1 in place)
    pub header: [u8; HEADER_LEN],

    /// Solution body as the pool sent it, padded to 1344 bytes
    pub solution_body: Vec<u8>,

    /// Template for the 15-byte per-nonce window; bytes 11..15 are the
    /// mining nonce, filled by the worker
    pub nonce_space: [u8; 15],

    /// Decoded extranonce1 length, needed for submission
    pub extranonce1_len: usize,
}

impl Job {
    /// Build a job from a `mining.notify` payload plus the session
    /// extranonce1 and the current target.
    pub fn from_notification(
        n: &JobNotification,
        extranonce1: &[u8],
        target: U256,
        difficulty: f64,
    ) -> Result<Job, String> {
        let mut header = [0u8; HEADER_LEN];
        decode_into(&n.version, &mut header[0..4], "version")?;
        decode_into(&n.prev_hash, &mut header[4..36], "prev_hash")?;
        decode_into(&n.merkle_root, &mut header[36..68], "merkle_root")?;
        decode_into(&n.final_sapling_root, &mut header[68..100], "final_sapling_root")?;
        decode_into(&n.ntime, &mut header[100..104], "ntime")?;
        decode_into(&n.nbits, &mut header[104..108], "nbits")?;

        let extranonce1_len = extranonce1.len().min(32);
        header[NONCE_OFFSET..NONCE_OFFSET + extranonce1_len]
            .copy_from_slice(&extranonce1[..extranonce1_len]);

        let mut solution_body =
            hex::decode(&n.solution_template).map_err(|e| format!("solution hex: {e}"))?;
        solution_body.resize(SOLUTION_BODY_LEN, 0);

        // Per-nonce window template, mirroring the header regions the
        // protocol ties it to.
        let mut nonce_space = [0u8; 15];
        nonce_space[0..7].copy_from_slice(&header[108..115]);
        nonce_space[7..11].copy_from_slice(&header[128..132]);

        Ok(Job {
            job_id: n.job_id.clone(),
            ntime: n.ntime.clone(),
            clean_jobs: n.clean_jobs,
            target,
            difficulty,
            header,
            solution_body,
            nonce_space,
            extranonce1_len,
        })
    }

    /// Solution version, little-endian from the body's first bytes.
    fn solution_version(&self) -> u32 {
        u32::from_le_bytes(self.solution_body[0..4].try_into().expect("body length"))
    }

    /// Whether the pool flagged this job as merged mining (solution
    /// version 7+ with the descriptor byte set).
    pub fn merged_mining(&self) -> bool {
        self.solution_version() >= 7 && self.solution_body[5] > 0
    }

    /// Assemble the 1487-byte hashing preimage: header, compact-size
    /// prefix, solution body. Under merged mining the non-canonical
    /// regions are zeroed first; the canonical fields (version, nTime)
    /// survive.
    pub fn hashing_preimage(&self) -> Vec<u8> {
        let mut header = self.header;
        let mut body = self.solution_body.clone();

        if self.merged_mining() {
            header[4..100].fill(0);
            header[104..108].fill(0);
            header[108..140].fill(0);
            body[8..72].fill(0);
        }

        let mut preimage = Vec::with_capacity(PREIMAGE_LEN);
        preimage.extend_from_slice(&header);
        preimage.extend_from_slice(&SOLUTION_PREFIX);
        preimage.extend_from_slice(&body);
        preimage
    }
}

fn decode_into(hex_str: &str, out: &mut [u8], name: &str) -> Result<(), String> {
    let bytes = hex::decode(hex_str).map_err(|e| format!("{name} hex: {e}"))?;
    if bytes.len() != out.len() {
        return Err(format!(
            "{name} must be {} bytes, got {}",
            out.len(),
            bytes.len()
        ));
    }
    out.copy_from_slice(&bytes);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::difficulty_to_target;

    fn notification(solution: String) -> JobNotification {
        JobNotification {
            job_id: "j1".into(),
            version: "04000100".into(),
            prev_hash: "ab".repeat(32),
            merkle_root: "cd".repeat(32),
            final_sapling_root: "ef".repeat(32),
            ntime: "64000000".into(),
            nbits: "1f00ffff".into(),
            clean_jobs: true,
            solution_template: solution,
        }
    }

    fn plain_solution() -> String {
        // Version 4, not merged: descriptor byte zero.
        let mut body = vec![0u8; SOLUTION_BODY_LEN];
        body[0] = 0x04;
        hex::encode(body)
    }

    fn merged_solution() -> String {
        let mut body = vec![0u8; SOLUTION_BODY_LEN];
        body[0] = 0x07;
        body[5] = 0x01;
        for (i, b) in body[8..72].iter_mut().enumerate() {
            *b = i as u8 + 1;
        }
        hex::encode(body)
    }

    fn job(solution: String) -> Job {
        Job::from_notification(
            &notification(solution),
            &[0x01, 0x02, 0x03, 0x04],
            difficulty_to_target(1.0),
            1.0,
        )
        .unwrap()
    }

    #[test]
    fn header_layout() {
        let job = job(plain_solution());
        assert_eq!(job.header.len(), HEADER_LEN);
        assert_eq!(&job.header[0..4], &[0x04, 0x00, 0x01, 0x00]);
        assert!(job.header[4..36].iter().all(|&b| b == 0xab));
        assert!(job.header[36..68].iter().all(|&b| b == 0xcd));
        assert!(job.header[68..100].iter().all(|&b| b == 0xef));
        assert_eq!(&job.header[100..104], &[0x64, 0x00, 0x00, 0x00]);
        assert_eq!(&job.header[104..108], &[0x1f, 0x00, 0xff, 0xff]);
        // extranonce1 then zeros through the rest of nNonce
        assert_eq!(&job.header[108..112], &[0x01, 0x02, 0x03, 0x04]);
        assert!(job.header[112..140].iter().all(|&b| b == 0));
    }

    #[test]
    fn nonce_space_mirrors_header() {
        let job = job(plain_solution());
        assert_eq!(&job.nonce_space[0..7], &job.header[108..115]);
        assert_eq!(&job.nonce_space[7..11], &job.header[128..132]);
        assert_eq!(&job.nonce_space[11..15], &[0, 0, 0, 0]);
    }

    #[test]
    fn preimage_layout_plain() {
        let job = job(plain_solution());
        assert!(!job.merged_mining());

        let preimage = job.hashing_preimage();
        assert_eq!(preimage.len(), PREIMAGE_LEN);
        assert_eq!(&preimage[..140], &job.header[..]);
        assert_eq!(&preimage[140..143], &SOLUTION_PREFIX);
        assert_eq!(&preimage[143..], &job.solution_body[..]);
    }

    #[test]
    fn merged_mining_zeroing() {
        let job = job(merged_solution());
        assert!(job.merged_mining());

        let preimage = job.hashing_preimage();
        // Version and nTime survive.
        assert_eq!(&preimage[0..4], &[0x04, 0x00, 0x01, 0x00]);
        assert_eq!(&preimage[100..104], &[0x64, 0x00, 0x00, 0x00]);
        // Hashes, nBits and nNonce are cleared.
        assert!(preimage[4..100].iter().all(|&b| b == 0));
        assert!(preimage[104..140].iter().all(|&b| b == 0));
        // Solution bytes 8..71 cleared; descriptor bytes survive.
        assert_eq!(preimage[143], 0x07);
        assert_eq!(preimage[148], 0x01);
        assert!(preimage[143 + 8..143 + 72].iter().all(|&b| b == 0));
        // The job itself keeps the unzeroed originals for submission.
        assert_eq!(job.solution_body[8], 1);
        assert_eq!(&job.header[108..112], &[0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn short_solution_padded() {
        let job = job("aabb".into());
        assert_eq!(job.solution_body.len(), SOLUTION_BODY_LEN);
        assert_eq!(&job.solution_body[..2], &[0xaa, 0xbb]);
        assert!(job.solution_body[2..].iter().all(|&b| b == 0));
    }

    #[test]
    fn bad_field_lengths_rejected() {
        let mut n = notification(plain_solution());
        n.prev_hash = "abcd".into();
        assert!(Job::from_notification(&n, &[1, 2, 3, 4], U256::MAX, 1.0).is_err());

        let mut n = notification(plain_solution());
        n.version = "xyz!".into();
        assert!(Job::from_notification(&n, &[1, 2, 3, 4], U256::MAX, 1.0).is_err());
    }
}
