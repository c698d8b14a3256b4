//! Pixel series accumulator in Structure of Arrays (`SoA`) layout.
//!
//! All arrays are preallocated from the header-declared map size before
//! parsing begins and indexed by `(pixel, detector)` directly; nothing
//! grows during a parse. The dense spectrum block is only committed when a
//! full decode is requested; an index-only series carries a minimal dummy
//! block instead.

use crate::deadtime::{DeadtimePolicy, DeadtimePredictor};
use crate::error::{Error, Result};
use crate::header::MapHeader;
use rayon::prelude::*;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Rows of the dummy spectrum block allocated for index-only sessions.
const DUMMY_ROWS: usize = 1;

/// Per-pixel, per-detector accumulator for one map.
///
/// Scalar arrays are sized `npx * ndet` and indexed `pixel * ndet + det`.
/// The dense spectra block is `npx * ndet * nchan` when fully allocated.
/// Written only by the full-decode pass; read-only to every consumer
/// afterwards.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PixelSeries {
    npx: usize,
    ndet: usize,
    nchan: usize,
    full: bool,

    /// Declared record length per (pixel, detector).
    pub pxlen: Vec<u32>,
    /// Horizontal pixel coordinate per (pixel, detector).
    pub xidx: Vec<u16>,
    /// Vertical pixel coordinate per (pixel, detector).
    pub yidx: Vec<u16>,
    /// Detector id per (pixel, detector).
    pub det: Vec<u16>,
    /// As-read deadtime per (pixel, detector).
    pub dt: Vec<f32>,
    /// Policy-modified deadtime per (pixel, detector).
    pub dtmod: Vec<f32>,

    /// Dense spectra, `npx * ndet * nchan` (dummy-sized when index-only).
    pub spectra: Vec<u16>,

    /// Per-channel sum across detectors, `npx * nchan`.
    pub flattened: Vec<u32>,
    /// Total counts per (pixel, detector).
    pub sum: Vec<u32>,
    /// Total counts per pixel across detectors.
    pub flatsum: Vec<u32>,
}

impl PixelSeries {
    /// Allocates a series with the full spectra block.
    #[must_use]
    pub fn new_full(header: &MapHeader, ndet: usize) -> Self {
        Self::allocate(header, ndet, true)
    }

    /// Allocates a series without the full spectra block.
    ///
    /// Scalar arrays are still full-size so an index pass can record
    /// per-record header fields; only the (large) spectra arena is
    /// replaced by a dummy allocation.
    #[must_use]
    pub fn new_index_only(header: &MapHeader, ndet: usize) -> Self {
        Self::allocate(header, ndet, false)
    }

    fn allocate(header: &MapHeader, ndet: usize, full: bool) -> Self {
        let npx = header.npx();
        let nchan = header.nchannels;
        let cells = npx * ndet;
        let spectra_rows = if full { cells } else { DUMMY_ROWS };
        Self {
            npx,
            ndet,
            nchan,
            full,
            pxlen: vec![0; cells],
            xidx: vec![0; cells],
            yidx: vec![0; cells],
            det: vec![0; cells],
            dt: vec![0.0; cells],
            dtmod: vec![0.0; cells],
            spectra: vec![0; spectra_rows * nchan],
            flattened: vec![0; npx * nchan],
            sum: vec![0; cells],
            flatsum: vec![0; npx],
        }
    }

    /// Number of pixels the series was sized for.
    #[must_use]
    pub fn npx(&self) -> usize {
        self.npx
    }

    /// Number of detectors per pixel.
    #[must_use]
    pub fn ndet(&self) -> usize {
        self.ndet
    }

    /// Number of spectrum channels.
    #[must_use]
    pub fn nchan(&self) -> usize {
        self.nchan
    }

    /// Whether the full spectra block is allocated.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.full
    }

    fn cell(&self, pixel: usize, slot: usize) -> Result<usize> {
        if pixel >= self.npx {
            return Err(Error::PixelOutOfRange {
                pixel,
                npx: self.npx,
            });
        }
        if slot >= self.ndet {
            return Err(Error::DetectorOutOfRange {
                slot,
                ndet: self.ndet,
            });
        }
        Ok(pixel * self.ndet + slot)
    }

    /// Records the scalar header fields of one pixel record.
    ///
    /// `slot` is the detector's position in the cyclic per-pixel order
    /// and selects the cell; `detector` is the id the record carries on
    /// the wire, which need not equal the slot (detector sets can be
    /// non-contiguous).
    ///
    /// # Errors
    /// Returns an error if `pixel` or `slot` is out of range.
    pub fn record_scalars(
        &mut self,
        pixel: usize,
        slot: usize,
        detector: u16,
        record_len: u32,
        x: u16,
        y: u16,
        deadtime: f32,
    ) -> Result<()> {
        let cell = self.cell(pixel, slot)?;
        self.pxlen[cell] = record_len;
        self.xidx[cell] = x;
        self.yidx[cell] = y;
        self.det[cell] = detector;
        self.dt[cell] = deadtime;
        Ok(())
    }

    /// Mutable dense spectrum slice for one `(pixel, detector slot)` cell.
    ///
    /// # Errors
    /// Returns [`Error::IndexOnlySeries`] when the full spectra block was
    /// not allocated, or a range error for bad coordinates.
    pub fn spectrum_mut(&mut self, pixel: usize, slot: usize) -> Result<&mut [u16]> {
        if !self.full {
            return Err(Error::IndexOnlySeries);
        }
        let cell = self.cell(pixel, slot)?;
        let start = cell * self.nchan;
        Ok(&mut self.spectra[start..start + self.nchan])
    }

    /// Dense spectrum slice for one `(pixel, detector slot)` cell.
    ///
    /// # Errors
    /// Returns [`Error::IndexOnlySeries`] when the full spectra block was
    /// not allocated, or a range error for bad coordinates.
    pub fn spectrum(&self, pixel: usize, slot: usize) -> Result<&[u16]> {
        if !self.full {
            return Err(Error::IndexOnlySeries);
        }
        let cell = self.cell(pixel, slot)?;
        let start = cell * self.nchan;
        Ok(&self.spectra[start..start + self.nchan])
    }

    /// Zeroes every cell of one pixel, discarding partially decoded data
    /// after a truncated run.
    pub fn clear_pixel(&mut self, pixel: usize) {
        if pixel >= self.npx {
            return;
        }
        let start = pixel * self.ndet;
        for cell in start..start + self.ndet {
            self.pxlen[cell] = 0;
            self.xidx[cell] = 0;
            self.yidx[cell] = 0;
            self.det[cell] = 0;
            self.dt[cell] = 0.0;
            self.dtmod[cell] = 0.0;
        }
        if self.full {
            let spectra_start = start * self.nchan;
            self.spectra[spectra_start..spectra_start + self.ndet * self.nchan].fill(0);
        }
    }

    /// Computes the derived arrays from the decoded spectra.
    ///
    /// `flattened[p][c]` sums channel `c` across detectors, `sum[p][d]`
    /// sums all channels of one detector, and `flatsum[p]` sums `sum`
    /// across detectors. A no-op for index-only series.
    pub fn derive_statistics(&mut self) {
        if !self.full || self.npx == 0 {
            return;
        }
        let ndet = self.ndet;
        let nchan = self.nchan;
        let spectra = &self.spectra;

        self.flattened
            .par_chunks_mut(nchan)
            .enumerate()
            .for_each(|(pixel, out)| {
                out.fill(0);
                for det in 0..ndet {
                    let start = (pixel * ndet + det) * nchan;
                    for (acc, &count) in out.iter_mut().zip(&spectra[start..start + nchan]) {
                        *acc += u32::from(count);
                    }
                }
            });

        self.sum
            .par_chunks_mut(ndet)
            .enumerate()
            .for_each(|(pixel, out)| {
                for (det, acc) in out.iter_mut().enumerate() {
                    let start = (pixel * ndet + det) * nchan;
                    *acc = spectra[start..start + nchan]
                        .iter()
                        .map(|&c| u32::from(c))
                        .sum();
                }
            });

        let sum = &self.sum;
        self.flatsum
            .par_iter_mut()
            .enumerate()
            .for_each(|(pixel, out)| {
                *out = sum[pixel * ndet..(pixel + 1) * ndet].iter().sum();
            });
    }

    /// Fills `dtmod` according to the requested deadtime policy.
    ///
    /// # Errors
    /// Returns a configuration error for an out-of-range fixed value, or
    /// when `Predicted` is requested without a predictor.
    pub fn apply_deadtime(
        &mut self,
        policy: DeadtimePolicy,
        predictor: Option<&dyn DeadtimePredictor>,
    ) -> Result<()> {
        policy.validate()?;
        match policy {
            DeadtimePolicy::AsRead => {
                self.dtmod.copy_from_slice(&self.dt);
            }
            DeadtimePolicy::Fixed(value) => {
                self.dtmod.fill(value);
            }
            DeadtimePolicy::Predicted => {
                let predictor = predictor.ok_or_else(|| {
                    Error::Config("predicted deadtime requires a predictor".to_string())
                })?;
                let mut predicted = vec![0.0f32; self.dtmod.len()];
                for pixel in 0..self.npx {
                    for det in 0..self.ndet {
                        predicted[pixel * self.ndet + det] = predictor.predict(self, pixel, det);
                    }
                }
                self.dtmod.copy_from_slice(&predicted);
            }
        }
        Ok(())
    }
}
