//! verusmine: a CPU miner for the VerusHash v2.2 proof-of-work
//! algorithm, mining against a pool over Stratum v1.
//!
//! The crate splits into the hashing core ([`crypto`]), the pool
//! protocol ([`stratum_v1`] and [`job`]), the worker fan-out
//! ([`engine`]), and the surrounding daemon plumbing ([`daemon`],
//! [`config`], [`api`]).

pub mod api;
pub mod config;
pub mod crypto;
pub mod daemon;
pub mod engine;
pub mod job;
pub mod stratum_v1;
pub mod target;
pub mod tracing;
pub mod u256;
