//! Read-only HTTP stats API.

pub mod server;

pub use server::{ApiConfig, PoolStatus, serve};
