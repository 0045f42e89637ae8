//! Miner configuration: CLI flags merged over an optional JSON config
//! file.
//!
//! The config file is human-authored JSON (`verusmine.json` by default);
//! command-line flags override whatever the file sets. Pools may be
//! given more than once for failover and are tried in order.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use serde::{Deserialize, Serialize};

/// Default Verus stratum port.
const DEFAULT_POOL_PORT: u16 = 3956;

#[derive(Debug, Default, Parser)]
#[command(
    name = "verusmined",
    version,
    about = "VerusHash v2.2 CPU miner",
    after_help = "CLI arguments override config file values."
)]
pub struct Options {
    /// Pool address as host:port; repeat for failover
    #[arg(short = 'o', long = "pool", value_name = "HOST:PORT")]
    pub pool: Vec<String>,

    /// Wallet address
    #[arg(short = 'u', long, value_name = "WALLET")]
    pub user: Option<String>,

    /// Pool password
    #[arg(short = 'p', long, value_name = "PASSWORD")]
    pub pass: Option<String>,

    /// Worker name
    #[arg(short = 'w', long, value_name = "NAME")]
    pub worker: Option<String>,

    /// Number of mining threads (default: all hardware threads)
    #[arg(short = 't', long, value_name = "N")]
    pub threads: Option<usize>,

    /// Stats API port (0 to disable)
    #[arg(long = "api-port", value_name = "PORT")]
    pub api_port: Option<u16>,

    /// Stats API bind address
    #[arg(long = "api-bind", value_name = "ADDR")]
    pub api_bind: Option<String>,

    /// Config file path
    #[arg(short = 'c', long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Quiet mode: only warnings and errors
    #[arg(short, long)]
    pub quiet: bool,
}

/// One pool endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolEndpoint {
    pub host: String,
    pub port: u16,
}

impl PoolEndpoint {
    /// Parse "host:port", defaulting the port when absent.
    pub fn parse(s: &str) -> Result<PoolEndpoint> {
        match s.rsplit_once(':') {
            Some((host, port)) => {
                if host.is_empty() {
                    bail!("empty pool host in {s:?}");
                }
                let port: u16 = port
                    .parse()
                    .with_context(|| format!("invalid pool port in {s:?}"))?;
                Ok(PoolEndpoint {
                    host: host.to_string(),
                    port,
                })
            }
            None => Ok(PoolEndpoint {
                host: s.to_string(),
                port: DEFAULT_POOL_PORT,
            }),
        }
    }
}

/// On-disk configuration, all fields optional.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    pools: Option<Vec<PoolEndpoint>>,
    wallet: Option<String>,
    worker: Option<String>,
    password: Option<String>,
    threads: Option<usize>,
    api_port: Option<u16>,
    api_bind: Option<String>,
    stats_interval_secs: Option<u64>,
    reconnect_delay_secs: Option<u64>,
}

/// Fully resolved miner configuration.
#[derive(Debug, Clone)]
pub struct MinerConfig {
    pub pools: Vec<PoolEndpoint>,
    pub wallet: String,
    pub worker: String,
    pub password: String,

    /// Resolved mining thread count (never zero).
    pub threads: usize,

    /// Nonces per batch between job checks.
    pub batch_size: u32,

    /// Seconds between stats reports.
    pub stats_interval_secs: u64,

    /// Base reconnect delay; backs off exponentially up to a cap.
    pub reconnect_delay_secs: u64,

    /// Stats API port; 0 disables the server.
    pub api_port: u16,
    pub api_bind: String,
}

impl MinerConfig {
    /// Resolve the configuration from CLI options and the optional
    /// config file. Fails when no wallet is configured.
    pub fn load(opts: &Options) -> Result<MinerConfig> {
        let path = opts
            .config
            .clone()
            .unwrap_or_else(|| PathBuf::from("verusmine.json"));

        let file = if path.exists() {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            serde_json::from_str::<ConfigFile>(&raw)
                .with_context(|| format!("parsing config file {}", path.display()))?
        } else if opts.config.is_some() {
            bail!("config file {} does not exist", path.display());
        } else {
            ConfigFile::default()
        };

        Self::merge(opts, file)
    }

    fn merge(opts: &Options, file: ConfigFile) -> Result<MinerConfig> {
        let pools = if opts.pool.is_empty() {
            file.pools.unwrap_or_default()
        } else {
            opts.pool
                .iter()
                .map(|p| PoolEndpoint::parse(p))
                .collect::<Result<Vec<_>>>()?
        };
        let pools = if pools.is_empty() {
            vec![PoolEndpoint {
                host: "eu.luckpool.net".to_string(),
                port: DEFAULT_POOL_PORT,
            }]
        } else {
            pools
        };

        let wallet = opts
            .user
            .clone()
            .or(file.wallet)
            .unwrap_or_default();
        if wallet.is_empty() {
            bail!("wallet address is required (set --user or the config file's \"wallet\")");
        }

        let threads = opts
            .threads
            .or(file.threads)
            .filter(|&t| t > 0)
            .unwrap_or_else(default_thread_count);

        Ok(MinerConfig {
            pools,
            wallet,
            worker: opts
                .worker
                .clone()
                .or(file.worker)
                .unwrap_or_else(|| "verusmine".to_string()),
            password: opts
                .pass
                .clone()
                .or(file.password)
                .unwrap_or_else(|| "x".to_string()),
            threads,
            batch_size: crate::engine::DEFAULT_BATCH,
            stats_interval_secs: file.stats_interval_secs.unwrap_or(10),
            reconnect_delay_secs: file.reconnect_delay_secs.unwrap_or(5),
            api_port: opts.api_port.or(file.api_port).unwrap_or(4068),
            api_bind: opts
                .api_bind
                .clone()
                .or(file.api_bind)
                .unwrap_or_else(|| "127.0.0.1".to_string()),
        })
    }

    /// The pool username: `wallet` or `wallet.worker`.
    pub fn username(&self) -> String {
        if self.worker.is_empty() {
            self.wallet.clone()
        } else {
            format!("{}.{}", self.wallet, self.worker)
        }
    }
}

fn default_thread_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
