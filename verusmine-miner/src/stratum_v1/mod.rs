//! Stratum v1 pool client.
//!
//! Implements the miner side of the Verus flavour of Stratum v1:
//! newline-delimited JSON-RPC over TCP, with `mining.notify` carrying the
//! 140-byte header fields and the solution template, and `mining.submit`
//! echoing the solution with the nonce space overlaid.

pub mod client;
pub mod connection;
pub mod error;
pub mod messages;

pub use client::{PoolConfig, StratumV1Client};
pub use error::{StratumError, StratumResult};
pub use messages::{ClientCommand, ClientEvent, JobNotification, SubmitParams};
