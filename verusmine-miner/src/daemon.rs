//! Daemon lifecycle management.
//!
//! Wires the pieces together: the mining engine (OS worker threads), the
//! Stratum network task, the event pump between them, the periodic stats
//! reporter, and the HTTP API server. Handles signals and graceful
//! shutdown; all tasks stop on one cancellation token and the worker
//! threads are joined before exit.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow, bail};
use tokio::signal::unix::{self, SignalKind};
use tokio::sync::{mpsc, watch};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::api::{self, ApiConfig, PoolStatus};
use crate::config::MinerConfig;
use crate::engine::{Engine, EngineHandle, stats::Stats};
use crate::stratum_v1::{
    ClientCommand, ClientEvent, PoolConfig, StratumError, StratumV1Client,
};
use crate::tracing::prelude::*;

/// Reconnect delays back off exponentially up to this multiple of the
/// configured base delay.
const MAX_BACKOFF_MULTIPLIER: u32 = 12;

/// A connection that survived this long resets the backoff.
const STABLE_CONNECTION: Duration = Duration::from_secs(60);

/// The main daemon.
pub struct Daemon {
    config: MinerConfig,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl Daemon {
    /// Create a new daemon instance.
    pub fn new(config: MinerConfig) -> Self {
        Self {
            config,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Run the daemon until shutdown is requested or a fatal error
    /// occurs (missing CPU capability, rejected credentials).
    pub async fn run(self) -> Result<()> {
        crate::crypto::require_capability()?;
        info!("CPU supports VerusHash requirements");
        info!(
            threads = self.config.threads,
            pool = %format!("{}:{}", self.config.pools[0].host, self.config.pools[0].port),
            user = %self.config.username(),
            "Starting miner"
        );

        let stats = Arc::new(Stats::new(self.config.threads));
        let (event_tx, event_rx) = mpsc::channel::<ClientEvent>(100);
        let (submit_tx, submit_rx) = mpsc::unbounded_channel::<ClientCommand>();
        let (pool_tx, pool_rx) = watch::channel(PoolStatus {
            host: self.config.pools[0].host.clone(),
            port: self.config.pools[0].port,
            worker: self.config.worker.clone(),
            difficulty: 0.0,
        });

        let mut engine = Engine::start(
            self.config.threads,
            self.config.batch_size,
            Arc::clone(&stats),
            submit_tx,
        );

        self.tracker.spawn(event_pump(
            event_rx,
            engine.handle(),
            Arc::clone(&stats),
            pool_tx,
        ));

        self.tracker.spawn(stats_task(
            Arc::clone(&stats),
            self.config.stats_interval_secs,
            self.shutdown.clone(),
        ));

        if self.config.api_port != 0 {
            let api_config = ApiConfig {
                bind_addr: format!("{}:{}", self.config.api_bind, self.config.api_port),
            };
            let api_shutdown = self.shutdown.clone();
            let api_stats = Arc::clone(&stats);
            self.tracker.spawn(async move {
                if let Err(e) = api::serve(api_config, api_shutdown, api_stats, pool_rx).await {
                    error!("API server error: {e}");
                }
            });
        }

        let mut stratum = tokio::spawn(stratum_task(
            self.config.clone(),
            event_tx,
            submit_rx,
            self.shutdown.clone(),
        ));

        // Wait for a shutdown signal or the network stack ending on its
        // own (clean stop, or fatal like rejected credentials).
        let mut sigint = unix::signal(SignalKind::interrupt())?;
        let mut sigterm = unix::signal(SignalKind::terminate())?;

        let mut stratum_result = None;
        tokio::select! {
            _ = sigint.recv() => info!("Received SIGINT"),
            _ = sigterm.recv() => info!("Received SIGTERM"),
            res = &mut stratum => stratum_result = Some(res),
        }

        self.shutdown.cancel();
        engine.stop();

        let stratum_result = match stratum_result {
            Some(res) => res,
            None => stratum.await,
        };

        self.tracker.close();
        self.tracker.wait().await;

        info!(
            total_hashes = stats.total_hashes(),
            accepted = stats.shares_accepted.load(Ordering::Relaxed),
            rejected = stats.shares_rejected.load(Ordering::Relaxed),
            "Exiting"
        );

        match stratum_result {
            Ok(inner) => inner,
            Err(join_err) => Err(anyhow!("stratum task panicked: {join_err}")),
        }
    }
}

/// Network task: connect, mine, reconnect with backoff, fail over
/// between configured pools. Returns an error only for conditions that
/// must stop the process.
async fn stratum_task(
    config: MinerConfig,
    event_tx: mpsc::Sender<ClientEvent>,
    mut submit_rx: mpsc::UnboundedReceiver<ClientCommand>,
    shutdown: CancellationToken,
) -> Result<()> {
    let base_delay = Duration::from_secs(config.reconnect_delay_secs.max(1));
    let max_delay = base_delay * MAX_BACKOFF_MULTIPLIER;
    let mut delay = base_delay;
    let mut pool_idx = 0usize;

    while !shutdown.is_cancelled() {
        let pool = &config.pools[pool_idx % config.pools.len()];
        info!(host = %pool.host, port = pool.port, "Connecting to pool");

        let client = StratumV1Client::new(
            PoolConfig {
                host: pool.host.clone(),
                port: pool.port,
                username: config.username(),
                password: config.password.clone(),
                ..PoolConfig::default()
            },
            event_tx.clone(),
            shutdown.clone(),
        );

        let connected_at = Instant::now();
        match client.run(&mut submit_rx).await {
            Ok(()) => return Ok(()),
            Err(StratumError::AuthorizationFailed(reason)) => {
                bail!("pool rejected credentials: {reason}");
            }
            Err(e) => {
                if shutdown.is_cancelled() {
                    return Ok(());
                }
                warn!(error = %e, delay_secs = delay.as_secs(), "Pool connection ended; reconnecting");

                // Shares queued for the dead connection reference jobs
                // the next one will not know; drop them.
                while submit_rx.try_recv().is_ok() {}

                pool_idx += 1;
                if connected_at.elapsed() > STABLE_CONNECTION {
                    delay = base_delay;
                }

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.cancelled() => return Ok(()),
                }
                delay = (delay * 2).min(max_delay);
            }
        }
    }

    Ok(())
}

/// Bridge client events into the engine and counters.
async fn event_pump(
    mut event_rx: mpsc::Receiver<ClientEvent>,
    engine: EngineHandle,
    stats: Arc<Stats>,
    pool_tx: watch::Sender<PoolStatus>,
) {
    while let Some(event) = event_rx.recv().await {
        match event {
            ClientEvent::Subscribed {
                extranonce1,
                extranonce2_size,
            } => {
                info!(
                    extranonce1 = %hex::encode(&extranonce1),
                    extranonce2_size,
                    "Subscribed to pool"
                );
            }
            ClientEvent::NewJob(job) => {
                pool_tx.send_modify(|s| s.difficulty = job.difficulty);
                engine.on_new_job(job);
            }
            ClientEvent::DifficultyChanged(difficulty) => {
                pool_tx.send_modify(|s| s.difficulty = difficulty);
                info!(difficulty = format!("{difficulty:.3}"), "Difficulty updated");
            }
            ClientEvent::ShareAccepted { job_id } => {
                stats.shares_accepted.fetch_add(1, Ordering::Relaxed);
                info!(job_id = %job_id, "Share accepted");
            }
            ClientEvent::ShareRejected { job_id, reason } => {
                stats.shares_rejected.fetch_add(1, Ordering::Relaxed);
                warn!(job_id = %job_id, reason = %reason, "Share rejected");
            }
            ClientEvent::Disconnected => {
                warn!("Pool connection lost; workers continue on the last job");
            }
            ClientEvent::Error(e) => {
                warn!(error = %e, "Pool error");
            }
        }
    }
}

/// Periodic hashrate and share reporting.
async fn stats_task(stats: Arc<Stats>, interval_secs: u64, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let total = stats.sample();
                info!(
                    hashrate = format!("{:.2} kH/s", total as f64 / 1000.0),
                    accepted = stats.shares_accepted.load(Ordering::Relaxed),
                    rejected = stats.shares_rejected.load(Ordering::Relaxed),
                    stale = stats.shares_stale.load(Ordering::Relaxed),
                    total_hashes = stats.total_hashes(),
                    "Mining statistics"
                );
            }
            _ = shutdown.cancelled() => return,
        }
    }
}
