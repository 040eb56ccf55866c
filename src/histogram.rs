//! Per-(channel, level) running histograms and the finalize-time auto-range
//! analyzer. See spec.md §3 "Histogram" and §4.3 "Finalize (auto-adjust
//! color range)".
//!
//! Grounded on `bpfHistogramBlocked.h` / `bpfHistogramBlockedParameters.h`
//! in `original_source`: u8 has a fixed one-bin-per-value domain; wider
//! integer types and floats keep a variable `(min, max)` that widens as
//! out-of-range samples arrive, with existing counts remapped into the new
//! bin layout by representative bin value (`bpfHistogramBlockedParameters`'s
//! `Merge`/`GetValue`/`GetBin` round trip) — the conservative rebinning
//! strategy spec.md §9 calls for instead of a full per-sample resplit.

use crate::color::ColorInfo;
use crate::datatype::DataType;

/// A single channel/level histogram. `sum()` always equals the number of
/// voxels copied into this (channel, level) so far (spec.md §3 invariant).
#[derive(Debug, Clone)]
pub struct Histogram {
    bins: Vec<u64>,
    data_type: DataType,
    min: f64,
    max: f64,
    /// u8's domain is fixed ([0, 255], one bin per value); everything else
    /// adapts its (min, max) to the data it sees.
    adaptive: bool,
    initialized: bool,
}

impl Histogram {
    pub fn new(data_type: DataType) -> Self {
        let bin_count = data_type.histogram_bin_count();
        let adaptive = !matches!(data_type, DataType::U8);
        let (min, max) = if adaptive { (0.0, 0.0) } else { (0.0, 255.0) };

        Self {
            bins: vec![0; bin_count],
            data_type,
            min,
            max,
            adaptive,
            initialized: !adaptive,
        }
    }

    pub fn bin_count(&self) -> usize { self.bins.len() }
    pub fn bins(&self) -> &[u64] { &self.bins }
    pub fn min(&self) -> f64 { self.min }
    pub fn max(&self) -> f64 { self.max }

    pub fn sum(&self) -> u64 {
        self.bins.iter().sum()
    }

    /// The value represented by the center of `bin`.
    pub fn bin_value(&self, bin: usize) -> f64 {
        if !self.adaptive {
            return bin as f64;
        }
        let width = (self.max - self.min) / self.bins.len() as f64;
        self.min + (bin as f64 + 0.5) * width
    }

    fn bin_of(&self, value: f64) -> usize {
        if !self.adaptive {
            return value.clamp(0.0, 255.0).round() as usize;
        }
        if self.max <= self.min {
            return 0;
        }
        let t = (value - self.min) / (self.max - self.min);
        ((t * self.bins.len() as f64) as i64).clamp(0, self.bins.len() as i64 - 1) as usize
    }

    /// Records one voxel value, widening adaptive bounds and remapping
    /// existing counts if the value falls outside the current range.
    pub fn add_sample(&mut self, value: f64) {
        if self.adaptive {
            if !self.initialized {
                self.min = value;
                self.max = value;
                self.initialized = true;
            } else if value < self.min || value > self.max {
                self.widen_bounds(value.min(self.min), value.max(self.max));
            }
        }

        let bin = self.bin_of(value);
        self.bins[bin] += 1;
    }

    fn widen_bounds(&mut self, new_min: f64, new_max: f64) {
        let bin_count = self.bins.len();
        let mut remapped = vec![0u64; bin_count];

        for (bin, &count) in self.bins.iter().enumerate() {
            if count == 0 {
                continue;
            }
            let representative = self.bin_value(bin);
            let new_bin = Self::bin_of_with(new_min, new_max, bin_count, representative);
            remapped[new_bin] += count;
        }

        self.bins = remapped;
        self.min = new_min;
        self.max = new_max;
    }

    fn bin_of_with(min: f64, max: f64, bin_count: usize, value: f64) -> usize {
        if max <= min {
            return 0;
        }
        let t = (value - min) / (max - min);
        ((t * bin_count as f64) as i64).clamp(0, bin_count as i64 - 1) as usize
    }

    /// Merges another histogram of the same data type into this one,
    /// widening bounds and remapping as needed (used when combining
    /// per-worker partial histograms at finalize, mirroring
    /// `bpfHistogramBlocked::Add`).
    pub fn merge(&mut self, other: &Histogram) {
        debug_assert_eq!(self.data_type.histogram_bin_count(), other.data_type.histogram_bin_count());

        if !other.initialized {
            return;
        }
        if !self.initialized {
            *self = other.clone();
            return;
        }

        if self.adaptive && (other.min < self.min || other.max > self.max) {
            self.widen_bounds(other.min.min(self.min), other.max.max(self.max));
        }

        for (bin, &count) in other.bins.iter().enumerate() {
            if count == 0 {
                continue;
            }
            let representative = other.bin_value(bin);
            let target = self.bin_of(representative);
            self.bins[target] += count;
        }
    }
}

/// Result of the finalize-time auto-range analysis for one channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AutoRange {
    pub range_min: f64,
    pub range_max: f64,
}

/// Runs the auto-adjust algorithm from spec.md §4.3 over a single channel's
/// level-0 histogram and returns the resulting display range.
///
/// 1. Low-pass filter the bin counts with a 1D Gaussian, sigma = 5*N/256.
/// 2. Find the first local maximum of the filtered curve; its bin value
///    becomes `range_min`.
/// 3. Walk cumulative counts until the fraction exceeds 0.998; that bin's
///    value becomes `range_max`.
/// 4. Expand `range_max` by 20% of the interval, capped at the histogram's
///    observed maximum.
///
/// Implemented as a direct (FIR) Gaussian convolution rather than a
/// recursive Deriche filter — the same smoothing result, without needing to
/// carry Deriche's specific pole coefficients into a new domain (spec.md §9
/// leaves the exact smoothing implementation unspecified).
pub fn auto_adjust_range(histogram: &Histogram) -> AutoRange {
    let bin_count = histogram.bin_count();
    if histogram.sum() == 0 || bin_count == 0 {
        return AutoRange { range_min: histogram.min(), range_max: histogram.max() };
    }

    let sigma = 5.0 * bin_count as f64 / 256.0;
    let filtered = gaussian_smooth(histogram.bins(), sigma);

    let first_local_max = first_local_maximum(&filtered).unwrap_or(0);
    let range_min = histogram.bin_value(first_local_max);

    let total: u64 = histogram.sum();
    let threshold = 0.998 * total as f64;
    let mut cumulative = 0u64;
    let mut cutoff_bin = bin_count - 1;
    for (bin, &count) in histogram.bins().iter().enumerate() {
        cumulative += count;
        if cumulative as f64 > threshold {
            cutoff_bin = bin;
            break;
        }
    }
    let cutoff_value = histogram.bin_value(cutoff_bin);

    let highest_populated_bin = histogram.bins().iter().rposition(|&count| count > 0).unwrap_or(bin_count - 1);
    let observed_max = histogram.bin_value(highest_populated_bin);
    let interval = cutoff_value - range_min;
    let expanded_max = (cutoff_value + 0.2 * interval).min(observed_max);

    AutoRange { range_min, range_max: expanded_max.max(range_min) }
}

fn gaussian_smooth(bins: &[u64], sigma: f64) -> Vec<f64> {
    if sigma <= 0.0 {
        return bins.iter().map(|&count| count as f64).collect();
    }

    let radius = (3.0 * sigma).ceil() as isize;
    let mut kernel = Vec::with_capacity((2 * radius + 1) as usize);
    let mut kernel_sum = 0.0;
    for offset in -radius..=radius {
        let weight = (-0.5 * (offset as f64 / sigma).powi(2)).exp();
        kernel.push(weight);
        kernel_sum += weight;
    }
    for weight in &mut kernel {
        *weight /= kernel_sum;
    }

    let len = bins.len() as isize;
    (0..len)
        .map(|i| {
            let mut value = 0.0;
            for (k, &weight) in kernel.iter().enumerate() {
                let offset = k as isize - radius;
                let source = (i + offset).clamp(0, len - 1);
                value += bins[source as usize] as f64 * weight;
            }
            value
        })
        .collect()
}

fn first_local_maximum(curve: &[f64]) -> Option<usize> {
    if curve.len() < 2 {
        return if curve.is_empty() { None } else { Some(0) };
    }
    for i in 1..curve.len() - 1 {
        if curve[i] >= curve[i - 1] && curve[i] > curve[i + 1] {
            return Some(i);
        }
    }
    // monotonically increasing or flat: the maximum is the last bin.
    curve.iter().enumerate().max_by(|a, b| a.1.partial_cmp(b.1).unwrap()).map(|(i, _)| i)
}

/// Writes an [`AutoRange`] result into a channel's color metadata (spec.md
/// §4.3 step 5).
pub fn apply_auto_range(color: &ColorInfo, auto_range: AutoRange) -> ColorInfo {
    color.with_range((auto_range.range_min as f32, auto_range.range_max as f32))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn u8_histogram_sums_to_voxel_count() {
        let mut histogram = Histogram::new(DataType::U8);
        for value in 0..16 {
            histogram.add_sample(value as f64);
        }
        assert_eq!(histogram.sum(), 16);
        for bin in 0..16 {
            assert_eq!(histogram.bins()[bin], 1);
        }
        for bin in 16..256 {
            assert_eq!(histogram.bins()[bin], 0);
        }
    }

    #[test]
    fn u8_auto_adjust_matches_scenario_one() {
        let mut histogram = Histogram::new(DataType::U8);
        for value in 0..16 {
            histogram.add_sample(value as f64);
        }
        let auto_range = auto_adjust_range(&histogram);
        assert_eq!(auto_range.range_min as i32, 0);
        assert_eq!(auto_range.range_max as i32, 15);
    }

    #[test]
    fn adaptive_histogram_widens_and_preserves_total() {
        let mut histogram = Histogram::new(DataType::U16);
        histogram.add_sample(100.0);
        histogram.add_sample(100.0);
        assert_eq!(histogram.sum(), 2);

        histogram.add_sample(50_000.0);
        assert_eq!(histogram.sum(), 3, "widening must not drop or duplicate samples");
        assert!(histogram.max() >= 50_000.0);
    }

    #[test]
    fn merge_preserves_total_sample_count() {
        let mut a = Histogram::new(DataType::U16);
        a.add_sample(10.0);
        a.add_sample(20.0);

        let mut b = Histogram::new(DataType::U16);
        b.add_sample(5000.0);

        a.merge(&b);
        assert_eq!(a.sum(), 3);
    }

    #[test]
    fn constant_volume_histogram_has_single_populated_bin() {
        let mut histogram = Histogram::new(DataType::U8);
        for _ in 0..16 {
            histogram.add_sample(100.0);
        }
        assert_eq!(histogram.bins()[100], 16);
        assert_eq!(histogram.sum(), 16);
    }
}
