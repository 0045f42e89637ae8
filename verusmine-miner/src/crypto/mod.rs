//! The VerusHash v2.2 pipeline: Haraka permutations, the CLHash engine,
//! and the two-stage mining hasher.
//!
//! Production hashing runs on the x86_64 AES-NI/PCLMULQDQ kernels; the
//! portable lane implementations in [`ops`] serve as the reference the
//! SIMD path is tested against, and as a fallback for test environments.

pub mod clhash;
pub mod haraka;
pub mod ops;
pub mod verushash;
#[cfg(target_arch = "x86_64")]
pub(crate) mod x86;

pub use verushash::Hasher;

use std::sync::OnceLock;
use thiserror::Error;

/// Errors from the hashing subsystem.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The CPU lacks the instruction sets the accelerated kernels need.
    #[error("CPU does not support required features (AES-NI, AVX, PCLMUL)")]
    CapabilityMissing,
}

/// Whether the accelerated x86_64 kernels are usable on this CPU.
///
/// Detected once; read on every hash dispatch.
pub(crate) fn simd_enabled() -> bool {
    static DETECTED: OnceLock<bool> = OnceLock::new();
    *DETECTED.get_or_init(detect)
}

fn detect() -> bool {
    #[cfg(target_arch = "x86_64")]
    {
        std::arch::is_x86_feature_detected!("aes")
            && std::arch::is_x86_feature_detected!("avx")
            && std::arch::is_x86_feature_detected!("pclmulqdq")
            && std::arch::is_x86_feature_detected!("ssse3")
            && std::arch::is_x86_feature_detected!("sse4.1")
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        false
    }
}

/// Startup precondition: mining requires the accelerated kernels.
///
/// The portable path stays available to tests, but is far too slow to be
/// economically viable, so the daemon refuses to start without hardware
/// support.
pub fn require_capability() -> Result<(), CryptoError> {
    if simd_enabled() {
        Ok(())
    } else {
        Err(CryptoError::CapabilityMissing)
    }
}
