//! Per-timepoint time metadata. Grounded on `bpfTimeInfo.h` in
//! `original_source`: a Julian day plus nanoseconds-of-day, normalized so
//! the time-of-day component never reaches a full 24 hours.

const NANOS_PER_DAY: u64 = 24 * 60 * 60 * 1_000_000_000;

/// A single point in time: Julian day number plus nanoseconds elapsed since
/// midnight on that day.
#[derive(Debug, Clone, Copy, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub struct TimeInfo {
    julian_day: i64,
    nanos_of_day: u64,
}

impl TimeInfo {
    /// Builds a `TimeInfo`, normalizing any overflow in `nanos_of_day` into
    /// additional days — `bpfTimeInfo`'s documented invariant ("day has no
    /// more than 24 hours").
    pub fn from_julian_day_and_nanos(julian_day: i64, nanos_of_day: u64) -> Self {
        let extra_days = (nanos_of_day / NANOS_PER_DAY) as i64;
        Self {
            julian_day: julian_day + extra_days,
            nanos_of_day: nanos_of_day % NANOS_PER_DAY,
        }
    }

    pub fn julian_day(&self) -> i64 { self.julian_day }
    pub fn nanos_of_day(&self) -> u64 { self.nanos_of_day }

    /// Adds a duration in nanoseconds, normalizing the result the same way
    /// the constructor does.
    pub fn checked_add_nanos(&self, nanos: u64) -> Self {
        Self::from_julian_day_and_nanos(self.julian_day, self.nanos_of_day + nanos)
    }
}

impl Default for TimeInfo {
    /// The Julian epoch used by `bpfTimeInfo`'s default constructor,
    /// -4713-11-24 00:00:00.000.
    fn default() -> Self {
        Self { julian_day: 0, nanos_of_day: 0 }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn overflowing_nanos_roll_into_the_next_day() {
        let time = TimeInfo::from_julian_day_and_nanos(10, NANOS_PER_DAY + 1);
        assert_eq!(time.julian_day(), 11);
        assert_eq!(time.nanos_of_day(), 1);
    }

    #[test]
    fn adding_nanos_normalizes() {
        let time = TimeInfo::from_julian_day_and_nanos(0, NANOS_PER_DAY - 1);
        let later = time.checked_add_nanos(2);
        assert_eq!(later.julian_day(), 1);
        assert_eq!(later.nanos_of_day(), 1);
    }
}
