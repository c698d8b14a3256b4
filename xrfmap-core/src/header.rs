//! Parsed map header values.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Scan geometry and acquisition parameters read from the file header.
///
/// A `MapHeader` is decoded once per file and passed by reference to every
/// component that needs it; nothing here is cached globally.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MapHeader {
    /// Horizontal resolution (pixels per row).
    pub xres: u32,
    /// Vertical resolution (rows).
    pub yres: u32,
    /// Physical map width in mm.
    pub width_mm: f64,
    /// Physical map height in mm.
    pub height_mm: f64,
    /// Number of spectrum channels per detector.
    pub nchannels: usize,
    /// Energy gain in keV per channel.
    pub gain_kev: f64,
    /// Dwell time per pixel in ms.
    pub dwell_ms: f64,
    /// Declared deadtime percentage.
    pub deadtime_pct: f64,
}

impl MapHeader {
    /// Expected number of pixels, `xres * yres`.
    #[must_use]
    pub fn npx(&self) -> usize {
        self.xres as usize * self.yres as usize
    }

    /// Map dimensions as `(rows, columns)`.
    #[must_use]
    pub fn dimensions(&self) -> (usize, usize) {
        (self.yres as usize, self.xres as usize)
    }

    /// Channel energy series, `energy[c] = c * gain_kev`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn energy_series(&self) -> Vec<f64> {
        (0..self.nchannels).map(|c| c as f64 * self.gain_kev).collect()
    }

    /// Pixel centre positions along x, in mm.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn x_positions(&self) -> Vec<f64> {
        let step = self.width_mm / f64::from(self.xres);
        (0..self.xres).map(|i| f64::from(i) * step).collect()
    }

    /// Pixel centre positions along y, in mm.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn y_positions(&self) -> Vec<f64> {
        let step = self.height_mm / f64::from(self.yres);
        (0..self.yres).map(|i| f64::from(i) * step).collect()
    }
}
