//! The mining engine: job ownership and worker-thread fan-out.
//!
//! One mutable "current job" record lives behind a mutex plus condition
//! variable; the network side replaces it atomically on every
//! `mining.notify` and workers copy it out. A monotonically increasing
//! epoch lets workers detect supersession with a relaxed atomic load
//! instead of taking the lock mid-batch. Found shares pass back through
//! the stale-share gate ([`submit_share`]) before reaching the Stratum
//! client's command channel.

pub mod stats;
mod worker;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use tokio::sync::mpsc;

use crate::job::Job;
use crate::stratum_v1::{ClientCommand, SubmitParams};
use crate::tracing::prelude::*;
use stats::Stats;

/// Nonces hashed between job-epoch checks.
pub const DEFAULT_BATCH: u32 = 65536;

pub(crate) struct JobSlot {
    pub job: Option<Arc<Job>>,
    pub epoch: u64,
}

pub(crate) struct Shared {
    pub job: Mutex<JobSlot>,
    pub cond: Condvar,
    pub epoch: AtomicU64,
    pub running: AtomicBool,
}

impl Shared {
    fn new() -> Self {
        Shared {
            job: Mutex::new(JobSlot {
                job: None,
                epoch: 0,
            }),
            cond: Condvar::new(),
            epoch: AtomicU64::new(0),
            running: AtomicBool::new(true),
        }
    }
}

/// Handle for publishing jobs into the engine from the network side.
#[derive(Clone)]
pub struct EngineHandle {
    shared: Arc<Shared>,
}

impl EngineHandle {
    /// Replace the current job. Workers observe the change at their next
    /// batch boundary (or immediately if they were idle).
    pub fn on_new_job(&self, job: Job) {
        info!(
            job_id = %job.job_id,
            difficulty = format!("{:.3}", job.difficulty),
            clean = job.clean_jobs,
            "New job"
        );

        let mut slot = self.shared.job.lock().unwrap_or_else(|e| e.into_inner());
        slot.job = Some(Arc::new(job));
        slot.epoch += 1;
        self.shared.epoch.store(slot.epoch, Ordering::Relaxed);
        drop(slot);
        self.shared.cond.notify_all();
    }
}

/// The worker pool. Owns the OS threads; [`Engine::stop`] (or drop)
/// joins them.
pub struct Engine {
    shared: Arc<Shared>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl Engine {
    /// Spawn `threads` mining workers feeding found shares into
    /// `submit_tx`.
    pub fn start(
        threads: usize,
        batch: u32,
        stats: Arc<Stats>,
        submit_tx: mpsc::UnboundedSender<ClientCommand>,
    ) -> Engine {
        let threads = threads.max(1);
        let shared = Arc::new(Shared::new());

        let workers = (0..threads)
            .map(|t| {
                let shared = Arc::clone(&shared);
                let stats = Arc::clone(&stats);
                let submit_tx = submit_tx.clone();
                thread::Builder::new()
                    .name(format!("miner-{t}"))
                    .spawn(move || {
                        worker::run(shared, stats, submit_tx, t, threads as u32, batch)
                    })
                    .expect("spawn mining thread")
            })
            .collect();

        info!(threads, "Mining engine started");
        Engine { shared, workers }
    }

    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Cooperative shutdown: clear the run flag, wake idle workers, and
    /// join every thread.
    pub fn stop(&mut self) {
        self.shared.running.store(false, Ordering::Relaxed);
        self.shared.cond.notify_all();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Stale-share gate: re-check the current job id under the lock and only
/// forward the share if the job is still live. Returns whether the share
/// was forwarded.
pub(crate) fn submit_share(
    shared: &Shared,
    stats: &Stats,
    submit_tx: &mpsc::UnboundedSender<ClientCommand>,
    job: &Job,
    nonce_space: [u8; 15],
) -> bool {
    {
        let slot = shared.job.lock().unwrap_or_else(|e| e.into_inner());
        let stale = match &slot.job {
            Some(current) => current.job_id != job.job_id,
            None => true,
        };
        if stale {
            debug!(job_id = %job.job_id, "Dropping stale share");
            stats.shares_stale.fetch_add(1, Ordering::Relaxed);
            return false;
        }
    }

    let params = SubmitParams {
        job_id: job.job_id.clone(),
        ntime: job.ntime.clone(),
        nonce_space,
        extranonce1_len: job.extranonce1_len,
        solution_body: job.solution_body.clone(),
    };

    if submit_tx
        .send(ClientCommand::SubmitShare(params))
        .is_err()
    {
        warn!("Share channel closed; dropping share");
        return false;
    }
    stats.shares_submitted.fetch_add(1, Ordering::Relaxed);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stratum_v1::messages::JobNotification;
    use crate::target::difficulty_to_target;
    use crate::u256::U256;

    fn test_job(job_id: &str, target: U256) -> Job {
        let notif = JobNotification {
            job_id: job_id.into(),
            version: "04000100".into(),
            prev_hash: "11".repeat(32),
            merkle_root: "22".repeat(32),
            final_sapling_root: "33".repeat(32),
            ntime: "64000000".into(),
            nbits: "1f00ffff".into(),
            clean_jobs: false,
            solution_template: {
                let mut body = vec![0u8; crate::job::SOLUTION_BODY_LEN];
                body[0] = 0x04;
                hex::encode(body)
            },
        };
        Job::from_notification(&notif, &[1, 2, 3, 4], target, 1.0).unwrap()
    }

    fn shared_with_job(job: &Job) -> Arc<Shared> {
        let shared = Arc::new(Shared::new());
        let mut slot = shared.job.lock().unwrap();
        slot.job = Some(Arc::new(job.clone()));
        slot.epoch = 1;
        drop(slot);
        shared.epoch.store(1, Ordering::Relaxed);
        shared
    }

    /// A share found for job A must be dropped once job B replaced it:
    /// nothing submitted, nothing rejected.
    #[test]
    fn stale_share_is_dropped_before_send() {
        let job_a = test_job("A", difficulty_to_target(1.0));
        let shared = shared_with_job(&job_a);
        let stats = Stats::new(1);
        let (tx, mut rx) = mpsc::unbounded_channel();

        // Job B supersedes A before the share is submitted.
        let handle = EngineHandle {
            shared: Arc::clone(&shared),
        };
        handle.on_new_job(test_job("B", difficulty_to_target(1.0)));

        let sent = submit_share(&shared, &stats, &tx, &job_a, [0u8; 15]);

        assert!(!sent);
        assert!(rx.try_recv().is_err());
        assert_eq!(stats.shares_submitted.load(Ordering::Relaxed), 0);
        assert_eq!(stats.shares_rejected.load(Ordering::Relaxed), 0);
        assert_eq!(stats.shares_stale.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn live_share_is_forwarded() {
        let job = test_job("A", difficulty_to_target(1.0));
        let shared = shared_with_job(&job);
        let stats = Stats::new(1);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut nonce_space = job.nonce_space;
        nonce_space[11..15].copy_from_slice(&7u32.to_le_bytes());
        assert!(submit_share(&shared, &stats, &tx, &job, nonce_space));

        match rx.try_recv().unwrap() {
            ClientCommand::SubmitShare(params) => {
                assert_eq!(params.job_id, "A");
                assert_eq!(params.ntime, "64000000");
                assert_eq!(params.nonce_space, nonce_space);
                assert_eq!(params.extranonce1_len, 4);
            }
        }
        assert_eq!(stats.shares_submitted.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn job_epochs_are_monotonic() {
        let shared = Arc::new(Shared::new());
        let handle = EngineHandle {
            shared: Arc::clone(&shared),
        };

        for i in 1..=5u64 {
            handle.on_new_job(test_job(&format!("job-{i}"), U256::MAX));
            assert_eq!(shared.epoch.load(Ordering::Relaxed), i);
        }
    }

    #[test]
    fn engine_starts_and_stops_cleanly_without_work() {
        let stats = Arc::new(Stats::new(2));
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut engine = Engine::start(2, DEFAULT_BATCH, stats, tx);
        engine.stop();
    }

    /// End to end through a real worker: a fully permissive target means
    /// the first hashed nonce is a share.
    #[test]
    fn worker_submits_share_under_permissive_target() {
        let stats = Arc::new(Stats::new(1));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut engine = Engine::start(1, 64, Arc::clone(&stats), tx);

        engine.handle().on_new_job(test_job("easy", U256::MAX));

        let cmd = rx.blocking_recv().expect("worker should find a share");
        let ClientCommand::SubmitShare(params) = cmd;
        assert_eq!(params.job_id, "easy");
        // Mining nonce for thread 0 starts at 0.
        assert_eq!(&params.nonce_space[0..7], &[1, 2, 3, 4, 0, 0, 0]);

        engine.stop();
        assert!(stats.total_hashes() > 0);
        assert!(stats.shares_submitted.load(Ordering::Relaxed) > 0);
    }
}
