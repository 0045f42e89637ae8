//! Share targets: difficulty conversions and hash comparison.
//!
//! Targets are 256-bit upper bounds on the hash value. VerusHash output
//! bytes are interpreted as a little-endian 256-bit integer; a share is
//! valid when that value is at most the target. Pools either push an
//! explicit target (`mining.set_target`, big-endian hex on the wire) or a
//! difficulty from which the target is derived as
//! `floor(0xFFFF * 2^208 / difficulty)`.

use crate::u256::U256;

/// Numeric value of the difficulty-1 pool target, `0xFFFF * 2^208`.
fn base_target_f64() -> f64 {
    65535.0 * 2f64.powi(208)
}

/// Derive a target from a pool difficulty.
///
/// Non-positive difficulties degrade to the permissive maximum, matching
/// pools that send 0 before the first real difficulty.
pub fn difficulty_to_target(difficulty: f64) -> U256 {
    if difficulty <= 0.0 || !difficulty.is_finite() {
        return U256::MAX;
    }

    let mut val = base_target_f64() / difficulty;
    let mut be = [0u8; 32];
    for (i, byte) in be.iter_mut().enumerate() {
        let unit = 2f64.powi(8 * (31 - i) as i32);
        if val >= unit {
            let b = (val / unit).floor().min(255.0);
            *byte = b as u8;
            val -= b * unit;
        }
    }
    U256::from_be_bytes(be)
}

/// Approximate difficulty for a target, for display and stats only.
pub fn target_to_difficulty(target: U256) -> f64 {
    let t = target.to_f64_approx();
    if t <= 0.0 {
        return 0.0;
    }
    base_target_f64() / t
}

/// Decode a `mining.set_target` parameter: 64 hex chars carrying the
/// target as a big-endian 256-bit number.
pub fn decode_set_target(hex_str: &str) -> Result<U256, String> {
    if hex_str.len() != 64 {
        return Err(format!("target must be 64 hex chars, got {}", hex_str.len()));
    }
    let bytes = hex::decode(hex_str).map_err(|e| format!("target hex: {e}"))?;
    let be: [u8; 32] = bytes.try_into().expect("length checked");
    Ok(U256::from_be_bytes(be))
}

/// Re-encode a target in the pool's big-endian wire form.
pub fn encode_target(target: U256) -> String {
    hex::encode(target.to_be_bytes())
}

/// Whether a hash meets the target: its little-endian 256-bit value must
/// be at most the target.
#[inline]
pub fn meets_target(hash: &[u8; 32], target: U256) -> bool {
    U256::from_le_bytes(*hash) <= target
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn difficulty_one_is_the_standard_pool_target() {
        let target = difficulty_to_target(1.0);
        let be = target.to_be_bytes();
        assert_eq!(&be[0..4], &[0, 0, 0, 0]);
        assert_eq!(&be[4..6], &[0xff, 0xff]);
        assert!(be[6..].iter().all(|&b| b == 0));
    }

    #[test]
    fn doubling_difficulty_halves_the_target() {
        for d in [1.0f64, 3.0, 100.0, 4096.0] {
            let t1 = difficulty_to_target(d);
            let t2 = difficulty_to_target(2.0 * d);
            let ratio = t1.to_f64_approx() / t2.to_f64_approx();
            assert!(
                (ratio - 2.0).abs() < 1e-9,
                "difficulty {d}: ratio {ratio}"
            );
        }
    }

    #[test]
    fn zero_difficulty_degrades_to_max() {
        assert_eq!(difficulty_to_target(0.0), U256::MAX);
        assert_eq!(difficulty_to_target(-5.0), U256::MAX);
    }

    #[test]
    fn difficulty_round_trips_approximately() {
        for d in [1.0f64, 16.0, 1000.0, 1048576.0] {
            let back = target_to_difficulty(difficulty_to_target(d));
            assert!((back - d).abs() / d < 1e-4, "{d} came back as {back}");
        }
    }

    #[test]
    fn set_target_round_trip() {
        let wire = "00000040ffb0000000000000000000000000000000000000000000000000a5c1";
        let target = decode_set_target(wire).unwrap();
        assert_eq!(encode_target(target), wire);
    }

    #[test]
    fn set_target_stored_little_endian() {
        // The wire form is big-endian; the comparison form is its byte
        // reversal.
        let wire = "0000004000000000000000000000000000000000000000000000000000000000";
        let target = decode_set_target(wire).unwrap();
        let le = target.to_le_bytes();
        assert_eq!(le[28], 0x40);
        assert!(le[..28].iter().all(|&b| b == 0));
        assert!(le[29..].iter().all(|&b| b == 0));
    }

    #[test]
    fn set_target_rejects_bad_lengths_and_hex() {
        assert!(decode_set_target("abcd").is_err());
        assert!(decode_set_target(&"zz".repeat(32)).is_err());
    }

    #[test]
    fn meets_target_boundary() {
        let target = difficulty_to_target(1.0);
        assert!(meets_target(&target.to_le_bytes(), target));
        assert!(meets_target(&[0u8; 32], target));

        // One above the target fails.
        let mut above = target.to_le_bytes();
        above[0] += 1;
        assert!(!meets_target(&above, target));
        assert!(!meets_target(&[0xffu8; 32], target));
    }

    /// Target monotonicity: a passing hash passes any weaker target.
    #[test]
    fn monotone_in_the_target() {
        let hash = {
            let mut h = [0u8; 32];
            h[27] = 0x12;
            h
        };
        let tight = difficulty_to_target(2.0);
        let loose = difficulty_to_target(1.0);
        assert!(tight < loose);
        if meets_target(&hash, tight) {
            assert!(meets_target(&hash, loose));
        }
        assert!(meets_target(&hash, loose));
    }
}
