//! Small numeric helpers shared by the pyramid, histogram and remapper code.
//!
//! `floor_log_2` / `ceil_log_2` / `RoundingMode` are kept from the teacher's
//! own `math.rs` (itself adapted from OpenEXR's `ImfTiledMisc.cpp`) since the
//! pyramid level math here is the same shape of problem: computing tile/level
//! counts from a full-resolution size and a step factor.

/// computes floor(log(x)/log(2))
pub fn floor_log_2(mut number: u64) -> u32 {
    debug_assert_ne!(number, 0);
    let mut log = 0;
    while number > 1 {
        log += 1;
        number >>= 1;
    }
    log
}

/// computes ceil(log(x)/log(2))
pub fn ceil_log_2(mut number: u64) -> u32 {
    debug_assert_ne!(number, 0);
    let mut log = 0;
    let mut round_up = 0;
    while number > 1 {
        if number & 1 != 0 {
            round_up = 1;
        }
        log += 1;
        number >>= 1;
    }
    log + round_up
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RoundingMode {
    Down,
    Up,
}

impl RoundingMode {
    pub fn divide(self, dividend: u64, divisor: u64) -> u64 {
        match self {
            RoundingMode::Up => dividend.div_ceil(divisor),
            RoundingMode::Down => dividend / divisor,
        }
    }
}

/// Round-half-to-even, used by the integer downsample average (spec.md
/// §4.3: "for integer types, round-half-to-even").
pub fn round_half_to_even(value: f64) -> f64 {
    let floor = value.floor();
    let fraction = value - floor;

    if fraction < 0.5 {
        floor
    } else if fraction > 0.5 {
        floor + 1.0
    } else if (floor as i64) % 2 == 0 {
        floor
    } else {
        floor + 1.0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn log2_matches_known_values() {
        assert_eq!(floor_log_2(8), 3);
        assert_eq!(ceil_log_2(8), 3);
        assert_eq!(floor_log_2(9), 3);
        assert_eq!(ceil_log_2(9), 4);
    }

    #[test]
    fn round_half_to_even_breaks_ties_to_even() {
        assert_eq!(round_half_to_even(2.5), 2.0);
        assert_eq!(round_half_to_even(3.5), 4.0);
        assert_eq!(round_half_to_even(3.4), 3.0);
        assert_eq!(round_half_to_even(3.6), 4.0);
    }
}
