//! Per-thread mining loop.
//!
//! Each worker owns a [`Hasher`] (and with it an aligned key buffer and
//! pristine snapshot). On every published job the worker re-derives the
//! intermediate state and key, then walks its residue class of the
//! 32-bit nonce space: worker `t` of `N` tries `t, t+N, t+2N, ...`,
//! stopping short of the wrap. The shared `running` flag is polled every
//! nonce; the job epoch only once per batch, which bounds how long a
//! worker keeps hashing a superseded job.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::sync::mpsc;

use super::stats::Stats;
use super::{Shared, submit_share};
use crate::crypto::Hasher;
use crate::job::Job;
use crate::stratum_v1::ClientCommand;
use crate::target::meets_target;
use crate::tracing::prelude::*;

pub(crate) fn run(
    shared: Arc<Shared>,
    stats: Arc<Stats>,
    submit_tx: mpsc::UnboundedSender<ClientCommand>,
    thread_id: usize,
    stride: u32,
    batch: u32,
) {
    let mut hasher = Hasher::new();
    let mut last_epoch = 0u64;

    trace!(thread_id, "Mining thread started");

    while let Some((job, epoch)) = wait_for_job(&shared, last_epoch) {
        last_epoch = epoch;

        // Everything per-job happens outside the lock: preimage
        // assembly, the Haraka chain, and the key schedule.
        let preimage = job.hashing_preimage();
        let intermediate = Hasher::hash_half(&preimage);
        hasher.prepare_key(&intermediate);

        let mut nonce_space = job.nonce_space;
        let mut nonce = thread_id as u32;
        let limit = u32::MAX - stride;

        'job: loop {
            for _ in 0..batch {
                if !shared.running.load(Ordering::Relaxed) {
                    trace!(thread_id, "Mining thread stopping");
                    return;
                }

                nonce_space[11..15].copy_from_slice(&nonce.to_le_bytes());
                let hash = hasher.hash_with_nonce(&intermediate, &nonce_space);
                stats.count_hashes(thread_id, 1);

                if meets_target(&hash, job.target) {
                    debug!(thread_id, nonce, job_id = %job.job_id, "Share found");
                    submit_share(&shared, &stats, &submit_tx, &job, nonce_space);
                }

                if nonce > limit {
                    debug!(thread_id, job_id = %job.job_id, "Nonce stride exhausted");
                    break 'job;
                }
                nonce += stride;
            }

            if shared.epoch.load(Ordering::Relaxed) != epoch {
                break 'job;
            }
        }
    }

    trace!(thread_id, "Mining thread stopping");
}

/// Block (in bounded 100 ms waits) until a job with an epoch newer than
/// `last_epoch` is available, or shutdown is requested (`None`).
fn wait_for_job(shared: &Shared, last_epoch: u64) -> Option<(Arc<Job>, u64)> {
    let mut slot = shared.job.lock().unwrap_or_else(|e| e.into_inner());
    loop {
        if !shared.running.load(Ordering::Relaxed) {
            return None;
        }
        if slot.epoch != last_epoch {
            if let Some(job) = &slot.job {
                return Some((Arc::clone(job), slot.epoch));
            }
        }
        let (guard, _) = shared
            .cond
            .wait_timeout(slot, Duration::from_millis(100))
            .unwrap_or_else(|e| e.into_inner());
        slot = guard;
    }
}
