//! The thumbnail-only degenerate pipeline. See spec.md §1 ("the
//! thumbnail-only path... writes a single small RGB image from a loaded
//! middle slice instead of a full pyramid") and §6 ("a single centered,
//! square bitmap of side max(W,H) with black letterbox... pixel rows are
//! flipped vertically on write").
//!
//! Grounded on `bpThumbnailImageConverter.h/.cxx`: that converter drives the
//! same block-remapping machinery as a full conversion but targets a tiny
//! subsampled image instead of a pyramid. Encoding the bitmap to PNG/JPEG is
//! explicitly out of scope (spec.md §2 Non-goals: "Thumbnail encoding to
//! external picture formats") — this module only produces the RGBA pixels
//! handed to `Writer::write_thumbnail`.

use crate::color::{Color, ColorInfo};
use crate::datatype::{DataType, Sample};
use crate::dimension::{Index5D, Size5D};
use crate::writer::Thumbnail;

/// How a thumbnail's single 2D slice is selected from the source volume, per
/// spec.md §6 "thumbnail options: mode".
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ThumbnailMode {
    /// Use the Z slice named explicitly by the caller.
    Slice,
    /// Use the middle Z slice (`size.z() / 2`).
    MiddleSlice,
    /// Project across Z, keeping the maximum value per (x, y).
    MaxIntensity,
    /// Project across Z, keeping the minimum value per (x, y).
    MinIntensity,
    /// Pick whichever projection looks least degenerate: max-intensity for
    /// sparse, bright data; middle-slice otherwise. The original leaves this
    /// choice to a calling application's heuristics; we use max-intensity
    /// whenever the volume has more than one Z slice and a middle slice
    /// otherwise, which covers the common "z-stack of a thin sample" case
    /// without needing extra data.
    Automatic,
}

/// Parameters controlling thumbnail extraction, per spec.md §6 "thumbnail
/// options".
#[derive(Debug, Clone, Copy)]
pub struct ThumbnailOptions {
    pub mode: ThumbnailMode,
    pub timepoint: u64,
    pub z_slice: u64,
    pub background: Color,
    pub background_alpha: u8,
    /// Requested output side; the image is downsampled to fit if larger.
    pub max_size: u32,
}

impl Default for ThumbnailOptions {
    fn default() -> Self {
        Self {
            mode: ThumbnailMode::Automatic,
            timepoint: 0,
            z_slice: 0,
            background: Color::BLACK,
            background_alpha: 255,
            max_size: 256,
        }
    }
}

/// One fully decoded XY plane of a single channel, row-major with `y=0` as
/// the first source row (not yet flipped for output).
pub struct Plane {
    pub size_x: u64,
    pub size_y: u64,
    pub samples: Vec<Sample>,
}

impl Plane {
    fn at(&self, x: u64, y: u64) -> Sample {
        self.samples[(y * self.size_x + x) as usize]
    }
}

/// Projects a full (x, y, z) volume down to one [`Plane`] per spec.md's
/// thumbnail modes. `planes` is indexed by z and must all share `size_x`/
/// `size_y`.
pub fn project_plane(mode: ThumbnailMode, z_slice: u64, planes: &[Plane]) -> Plane {
    assert!(!planes.is_empty(), "thumbnail projection needs at least one Z plane");
    let (size_x, size_y) = (planes[0].size_x, planes[0].size_y);

    match mode {
        ThumbnailMode::Slice => {
            let index = (z_slice as usize).min(planes.len() - 1);
            Plane { size_x, size_y, samples: planes[index].samples.clone() }
        }
        ThumbnailMode::MiddleSlice => {
            let index = planes.len() / 2;
            Plane { size_x, size_y, samples: planes[index].samples.clone() }
        }
        ThumbnailMode::MaxIntensity | ThumbnailMode::Automatic if planes.len() > 1 => {
            project_extremum(planes, size_x, size_y, true)
        }
        ThumbnailMode::MinIntensity => project_extremum(planes, size_x, size_y, false),
        ThumbnailMode::Automatic => {
            let index = planes.len() / 2;
            Plane { size_x, size_y, samples: planes[index].samples.clone() }
        }
        ThumbnailMode::MaxIntensity => project_extremum(planes, size_x, size_y, true),
    }
}

fn project_extremum(planes: &[Plane], size_x: u64, size_y: u64, want_max: bool) -> Plane {
    let mut samples = planes[0].samples.clone();
    for plane in &planes[1..] {
        for (accum, candidate) in samples.iter_mut().zip(plane.samples.iter()) {
            let better = if want_max { candidate.as_f64() > accum.as_f64() } else { candidate.as_f64() < accum.as_f64() };
            if better {
                *accum = *candidate;
            }
        }
    }
    Plane { size_x, size_y, samples }
}

/// Maps an entire plane through one channel's color info into linear RGB
/// contributions, row-major with `y=0` as the first source row (not yet
/// letterboxed or flipped). Used both directly (single channel) and summed
/// across channels for a multi-channel composite, mirroring how
/// `bpThumbnailImageConverter`'s downstream viewer overlays one base color
/// per channel rather than picking a single channel to display.
pub fn map_plane_to_rgb(plane: &Plane, color: &ColorInfo) -> Vec<Color> {
    (0..plane.size_y)
        .flat_map(|y| (0..plane.size_x).map(move |x| (x, y)))
        .map(|(x, y)| map_sample_to_color(plane.at(x, y), color))
        .collect()
}

/// Adds `other` into `accumulator` channel-wise, clamping each component to
/// `[0, 1]` — the additive-overlay composition of multiple channels onto one
/// thumbnail.
pub fn accumulate_rgb(accumulator: &mut [Color], other: &[Color]) {
    for (sum, value) in accumulator.iter_mut().zip(other.iter()) {
        sum.r = (sum.r + value.r).min(1.0);
        sum.g = (sum.g + value.g).min(1.0);
        sum.b = (sum.b + value.b).min(1.0);
    }
}

/// Letterboxes a `size_x` by `size_y` RGB buffer (row-major, `y=0` first)
/// into a centered square bitmap of side `max(size_x, size_y)` with a black
/// background, flipping rows bottom-up per spec.md §6: "pixel rows are
/// flipped vertically on write".
pub fn letterbox_and_flip(size_x: u64, size_y: u64, rgb: &[Color], background: Color, background_alpha: u8) -> Thumbnail {
    assert_eq!(rgb.len() as u64, size_x * size_y, "rgb buffer must cover the whole plane");

    let side = size_x.max(size_y);
    let side_usize = side as usize;
    let mut rgba = vec![0u8; side_usize * side_usize * 4];

    for pixel in rgba.chunks_exact_mut(4) {
        pixel[0] = (background.r * 255.0).round() as u8;
        pixel[1] = (background.g * 255.0).round() as u8;
        pixel[2] = (background.b * 255.0).round() as u8;
        pixel[3] = background_alpha;
    }

    let x_offset = (side - size_x) / 2;
    let y_offset = (side - size_y) / 2;

    for y in 0..size_y {
        for x in 0..size_x {
            let color = rgb[(y * size_x + x) as usize];

            // Row flip per spec.md §6.
            let dest_y = side - 1 - (y + y_offset);
            let dest_x = x + x_offset;
            let dest_index = ((dest_y * side + dest_x) * 4) as usize;

            rgba[dest_index] = (color.r * 255.0).round() as u8;
            rgba[dest_index + 1] = (color.g * 255.0).round() as u8;
            rgba[dest_index + 2] = (color.b * 255.0).round() as u8;
            rgba[dest_index + 3] = 255;
        }
    }

    Thumbnail { side: side as u32, rgba }
}

/// Convenience wrapper over [`map_plane_to_rgb`] + [`letterbox_and_flip`] for
/// the single-channel case.
pub fn render_centered_square(plane: &Plane, color: &ColorInfo, background: Color, background_alpha: u8) -> Thumbnail {
    let rgb = map_plane_to_rgb(plane, color);
    letterbox_and_flip(plane.size_x, plane.size_y, &rgb, background, background_alpha)
}

fn normalized_intensity(sample: Sample, color: &ColorInfo) -> f32 {
    let (range_min, range_max) = color.range;
    if range_max <= range_min {
        return 0.0;
    }
    (((sample.as_f64() as f32) - range_min) / (range_max - range_min)).clamp(0.0, 1.0)
}

/// Maps one voxel value to a displayed color, following the base-color or
/// lookup-table modes of [`ColorMode`].
fn map_sample_to_color(sample: Sample, color: &ColorInfo) -> Color {
    let intensity = normalized_intensity(sample, color);
    match &color.mode {
        crate::color::ColorMode::Base(base) => Color::new(base.r * intensity, base.g * intensity, base.b * intensity),
        crate::color::ColorMode::Table(table) => {
            let bin = ((intensity * 255.0).round() as usize).min(255);
            table[bin]
        }
    }
}

/// Builds a [`Sample`] of the given data type from a widened `f64` value,
/// rounding and clamping for integer types.
pub fn sample_from_f64(value: f64, data_type: DataType) -> Sample {
    match data_type {
        DataType::U8 => Sample::U8(value.round().clamp(0.0, u8::MAX as f64) as u8),
        DataType::U16 => Sample::U16(value.round().clamp(0.0, u16::MAX as f64) as u16),
        DataType::U32 => Sample::U32(value.round().clamp(0.0, u32::MAX as f64) as u32),
        DataType::F32 => Sample::F32(value as f32),
    }
}

/// Validates that a thumbnail extraction request is consistent with the
/// source volume's extent, mirroring `NeedCopyBlock`'s all-dimensions-valid
/// guard in `bpThumbnailImageConverter`.
pub fn validate_request(options: &ThumbnailOptions, size: Size5D, data_type: DataType) -> Result<(), crate::error::Error> {
    let _ = data_type;
    if options.timepoint >= size.t() {
        return Err(crate::error::Error::Config(format!(
            "thumbnail timepoint {} is out of range for {} time points",
            options.timepoint,
            size.t()
        )));
    }
    if matches!(options.mode, ThumbnailMode::Slice) && options.z_slice >= size.z() {
        return Err(crate::error::Error::Config(format!(
            "thumbnail z slice {} is out of range for {} planes",
            options.z_slice,
            size.z()
        )));
    }
    Ok(())
}

/// A block index selecting the single (channel, time) volume a thumbnail
/// extraction reads from, expressed in the engine's 5D coordinate system.
pub fn source_volume_index(timepoint: u64, channel: u64) -> Index5D {
    Index5D::new(0, 0, 0, channel, timepoint)
}

#[cfg(test)]
mod test {
    use super::*;

    fn plane(size_x: u64, size_y: u64, fill: impl Fn(u64, u64) -> f64) -> Plane {
        let mut samples = Vec::with_capacity((size_x * size_y) as usize);
        for y in 0..size_y {
            for x in 0..size_x {
                samples.push(Sample::F32(fill(x, y) as f32));
            }
        }
        Plane { size_x, size_y, samples }
    }

    #[test]
    fn middle_slice_picks_the_central_plane() {
        let planes = vec![plane(2, 2, |_, _| 1.0), plane(2, 2, |_, _| 2.0), plane(2, 2, |_, _| 3.0)];
        let projected = project_plane(ThumbnailMode::MiddleSlice, 0, &planes);
        assert_eq!(projected.samples[0].as_f64(), 2.0);
    }

    #[test]
    fn max_intensity_keeps_the_brightest_value_per_pixel() {
        let planes = vec![plane(2, 1, |x, _| x as f64), plane(2, 1, |x, _| 5.0 - x as f64)];
        let projected = project_plane(ThumbnailMode::MaxIntensity, 0, &planes);
        assert_eq!(projected.samples[0].as_f64(), 5.0);
        assert_eq!(projected.samples[1].as_f64(), 4.0);
    }

    #[test]
    fn min_intensity_keeps_the_dimmest_value_per_pixel() {
        let planes = vec![plane(2, 1, |x, _| x as f64), plane(2, 1, |x, _| 5.0 - x as f64)];
        let projected = project_plane(ThumbnailMode::MinIntensity, 0, &planes);
        assert_eq!(projected.samples[0].as_f64(), 0.0);
        assert_eq!(projected.samples[1].as_f64(), 1.0);
    }

    #[test]
    fn wide_plane_is_letterboxed_to_a_square_with_black_bars() {
        let p = plane(4, 2, |_, _| 100.0);
        let color = ColorInfo::base_color(Color::WHITE, (0.0, 100.0));
        let image = render_centered_square(&p, &color, Color::BLACK, 255);
        assert_eq!(image.side, 4);
        // top row (y=0 after flip maps to original row furthest from y_offset) should be letterbox black.
        assert_eq!(&image.rgba[0..3], &[0, 0, 0]);
    }

    #[test]
    fn square_plane_fills_every_pixel() {
        let p = plane(2, 2, |_, _| 50.0);
        let color = ColorInfo::base_color(Color::WHITE, (0.0, 100.0));
        let image = render_centered_square(&p, &color, Color::BLACK, 255);
        assert_eq!(image.side, 2);
        for pixel in image.rgba.chunks_exact(4) {
            assert_eq!(pixel[3], 255);
        }
    }

    #[test]
    fn out_of_range_timepoint_is_rejected() {
        let options = ThumbnailOptions { timepoint: 5, ..ThumbnailOptions::default() };
        let size = Size5D::new(4, 4, 1, 1, 2);
        assert!(validate_request(&options, size, DataType::U8).is_err());
    }
}
