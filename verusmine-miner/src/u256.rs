//! 256-bit unsigned integer arithmetic.
//!
//! Wraps `ruint::aliases::U256` to provide a stable interface. This adapter
//! module exists so we can swap the underlying library or implement our own
//! arithmetic without changing callers.

use ruint::aliases::U256 as Ruint256;

/// A 256-bit unsigned integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct U256(Ruint256);

impl U256 {
    /// Zero constant.
    pub const ZERO: Self = Self(Ruint256::ZERO);

    /// Maximum value (2^256 - 1).
    pub const MAX: Self = Self(Ruint256::MAX);

    /// Create from little-endian bytes.
    pub fn from_le_bytes(bytes: [u8; 32]) -> Self {
        Self(Ruint256::from_le_bytes(bytes))
    }

    /// Create from big-endian bytes.
    pub fn from_be_bytes(bytes: [u8; 32]) -> Self {
        Self(Ruint256::from_be_bytes(bytes))
    }

    /// Convert to little-endian bytes.
    pub fn to_le_bytes(self) -> [u8; 32] {
        self.0.to_le_bytes()
    }

    /// Convert to big-endian bytes.
    pub fn to_be_bytes(self) -> [u8; 32] {
        self.0.to_be_bytes()
    }

    /// Convert to f64, losing precision for large values.
    ///
    /// For values larger than f64 can precisely represent (~2^53), this
    /// returns an approximation by extracting the high bits and scaling.
    pub fn to_f64_approx(self) -> f64 {
        let bytes = self.to_le_bytes();

        // Find highest non-zero byte to determine magnitude
        let mut highest_byte = 0;
        for (i, &b) in bytes.iter().enumerate().rev() {
            if b != 0 {
                highest_byte = i;
                break;
            }
        }

        // If zero or fits in u64, use direct conversion
        if highest_byte < 8 {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&bytes[..8]);
            return u64::from_le_bytes(buf) as f64;
        }

        // Extract 8 bytes ending at the highest non-zero byte
        let start = highest_byte - 7;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&bytes[start..start + 8]);
        let mantissa = u64::from_le_bytes(buf) as f64;

        // Scale by 2^(start*8) to account for position
        mantissa * (2.0_f64).powi((start * 8) as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn le_be_round_trip() {
        let mut le = [0u8; 32];
        le[0] = 0x34;
        le[31] = 0x12;
        let v = U256::from_le_bytes(le);

        let mut be = [0u8; 32];
        be[0] = 0x12;
        be[31] = 0x34;
        assert_eq!(v, U256::from_be_bytes(be));
        assert_eq!(v.to_le_bytes(), le);
        assert_eq!(v.to_be_bytes(), be);
    }

    #[test]
    fn ordering_follows_numeric_value() {
        let small = U256::from_le_bytes({
            let mut b = [0u8; 32];
            b[0] = 0xff;
            b
        });
        let big = U256::from_le_bytes({
            let mut b = [0u8; 32];
            b[31] = 1;
            b
        });
        assert!(small < big);
        assert!(U256::ZERO < small);
        assert!(big < U256::MAX);
    }

    #[test]
    fn f64_approx_small_values_exact() {
        let mut b = [0u8; 32];
        b[0..8].copy_from_slice(&123456789u64.to_le_bytes());
        assert_eq!(U256::from_le_bytes(b).to_f64_approx(), 123456789.0);
    }

    #[test]
    fn f64_approx_large_values_scaled() {
        // 2^224 exactly
        let mut b = [0u8; 32];
        b[28] = 1;
        let approx = U256::from_le_bytes(b).to_f64_approx();
        assert_eq!(approx, 2f64.powi(224));
    }
}
