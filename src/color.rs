//! Per-channel color metadata. Grounded on `bpfColorInfo.h` / `bpfColor.h`
//! in `original_source` — a base-color-or-LUT model with a display range and
//! opacity, distinct from the histogram-driven auto range in `histogram.rs`.

/// An RGB color with components in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Color {
    pub const BLACK: Color = Color { r: 0.0, g: 0.0, b: 0.0 };
    pub const WHITE: Color = Color { r: 1.0, g: 1.0, b: 1.0 };

    pub fn new(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }
}

/// Either a single base color (brightness driven by voxel value) or a
/// 256-entry lookup table, per spec.md §3 / `bpfColorInfo.h`.
#[derive(Debug, Clone, PartialEq)]
pub enum ColorMode {
    Base(Color),
    Table(Box<[Color; 256]>),
}

/// Full per-channel color metadata, as read from a source or rewritten by
/// the engine's auto-adjust finalize step (spec.md §4.3).
#[derive(Debug, Clone, PartialEq)]
pub struct ColorInfo {
    pub mode: ColorMode,
    pub opacity: f32,
    pub gamma: f32,
    /// Display range hint; values below `range.0` map to black / table entry
    /// 0, values above `range.1` map to the base color / last table entry.
    /// Not a clipping threshold on the voxel data itself (see GLOSSARY).
    pub range: (f32, f32),
}

impl ColorInfo {
    pub fn base_color(color: Color, range: (f32, f32)) -> Self {
        Self { mode: ColorMode::Base(color), opacity: 1.0, gamma: 1.0, range }
    }

    pub fn with_range(&self, range: (f32, f32)) -> Self {
        Self { range, ..self.clone() }
    }
}

/// Maps an emission wavelength (nanometers) to an RGB color, ported from the
/// spectral approximation in `bpImageConvertNew.cxx`'s `bpCalcWaveLengthColor`.
/// Returns `None` outside the visible range (380-780nm).
pub fn color_from_wavelength_nm(wavelength: f32) -> Option<Color> {
    if !(380.0..=780.0).contains(&wavelength) {
        return None;
    }

    let (r, g, b) = if wavelength <= 440.0 {
        ((440.0 - wavelength) / 60.0, 0.0, 1.0)
    } else if wavelength <= 490.0 {
        (0.0, (wavelength - 440.0) / 50.0, 1.0)
    } else if wavelength <= 510.0 {
        (0.0, 1.0, (510.0 - wavelength) / 20.0)
    } else if wavelength <= 580.0 {
        ((wavelength - 510.0) / 70.0, 1.0, 0.0)
    } else if wavelength <= 645.0 {
        (1.0, (645.0 - wavelength) / 65.0, 0.0)
    } else {
        (1.0, 0.0, 0.0)
    };

    Some(Color::new(r, g, b))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn wavelength_outside_visible_range_is_none() {
        assert!(color_from_wavelength_nm(300.0).is_none());
        assert!(color_from_wavelength_nm(900.0).is_none());
    }

    #[test]
    fn green_wavelength_is_mostly_green() {
        let color = color_from_wavelength_nm(520.0).unwrap();
        assert!(color.g > color.r);
        assert!(color.g > color.b);
    }
}
