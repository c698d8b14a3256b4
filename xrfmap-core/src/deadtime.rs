//! Deadtime modification policy.
//!
//! Deadtime is stored per record but instruments frequently misreport it;
//! callers choose whether to keep the as-read value, replace it with a
//! model prediction, or force a constant.

use crate::error::{Error, Result};
use crate::series::PixelSeries;

/// Policy selecting how the modified deadtime array is produced.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DeadtimePolicy {
    /// Keep the as-read deadtime values.
    AsRead,
    /// Replace with a model-predicted value per (pixel, detector).
    Predicted,
    /// Force a fixed percentage in `[0, 100]`.
    Fixed(f32),
}

/// Model seam for deadtime prediction.
///
/// Prediction itself is an external concern; implementors receive the
/// fully-decoded series and return a deadtime percentage per cell.
pub trait DeadtimePredictor {
    /// Predicted deadtime percentage for one `(pixel, detector)` cell.
    fn predict(&self, series: &PixelSeries, pixel: usize, detector: usize) -> f32;
}

impl DeadtimePolicy {
    /// Decodes the sentinel encoding used by instrument tooling:
    /// `-1` keeps the as-read values, `999` requests prediction, and a
    /// value in `[0, 100]` forces that constant.
    ///
    /// # Errors
    /// Any other value is a configuration error, surfaced before parsing
    /// begins.
    #[allow(clippy::float_cmp)]
    pub fn from_modify_value(value: f64) -> Result<Self> {
        if value == -1.0 {
            Ok(Self::AsRead)
        } else if value == 999.0 {
            Ok(Self::Predicted)
        } else if (0.0..=100.0).contains(&value) {
            #[allow(clippy::cast_possible_truncation)]
            Ok(Self::Fixed(value as f32))
        } else {
            Err(Error::Config(format!(
                "unexpected deadtime modification value: {value}"
            )))
        }
    }

    /// Checks that a fixed value is a valid percentage.
    ///
    /// # Errors
    /// Returns a configuration error for a fixed value outside `[0, 100]`.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Fixed(value) if !(0.0..=100.0).contains(value) => Err(Error::Config(format!(
                "fixed deadtime {value} outside [0, 100]"
            ))),
            _ => Ok(()),
        }
    }
}
