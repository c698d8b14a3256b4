//! File header decoding.
//!
//! The header is a JSON document stored directly after a 2-byte
//! little-endian length prefix. Files written by an interrupted
//! acquisition occasionally lack the header entirely; those open with the
//! pixel record marker instead and cannot be parsed into a map.

use crate::error::{Error, Result};
use crate::{LENGTH_PREFIX_LEN, PIXEL_MARKER_U16};
use serde_json::Value;
use xrfmap_core::MapHeader;

/// Top-level JSON key holding the acquisition parameters.
const FILE_HEADER_KEY: &str = "File Header";

/// Decodes the 2-byte length prefix.
///
/// # Errors
/// Returns [`Error::HeaderMissing`] when the prefix is the pixel record
/// marker, meaning the stream starts directly with pixel data.
pub fn header_block_len(prefix: [u8; 2]) -> Result<usize> {
    let len = u16::from_le_bytes(prefix);
    if len == PIXEL_MARKER_U16 {
        return Err(Error::HeaderMissing);
    }
    Ok(len as usize)
}

/// Byte offset of the first pixel record given the header block length.
#[must_use]
pub fn data_start(header_len: usize) -> u64 {
    (header_len + LENGTH_PREFIX_LEN) as u64
}

/// Decodes the JSON header block into a [`MapHeader`].
///
/// Numeric fields are accepted either as JSON numbers or as numeric
/// strings; instrument exports are not consistent about which they emit.
///
/// # Errors
/// [`Error::HeaderDecode`] for malformed JSON, [`Error::HeaderField`] for
/// absent or non-numeric required fields.
pub fn decode_header(block: &[u8]) -> Result<MapHeader> {
    let text = std::str::from_utf8(block)?;
    let root: Value = serde_json::from_str(text)?;
    let fields = root
        .get(FILE_HEADER_KEY)
        .and_then(Value::as_object)
        .ok_or_else(|| Error::HeaderField(FILE_HEADER_KEY.to_string()))?;

    let numeric = |key: &str| -> Result<f64> {
        let value = fields
            .get(key)
            .ok_or_else(|| Error::HeaderField(key.to_string()))?;
        match value {
            Value::Number(n) => n
                .as_f64()
                .ok_or_else(|| Error::HeaderField(key.to_string())),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| Error::HeaderField(key.to_string())),
            _ => Err(Error::HeaderField(key.to_string())),
        }
    };

    let xres = to_dimension(numeric("Xres")?, "Xres")?;
    let yres = to_dimension(numeric("Yres")?, "Yres")?;
    let nchannels = to_dimension(numeric("Chan")?, "Chan")? as usize;
    let gain_ev = numeric("Gain (eV)")?;

    Ok(MapHeader {
        xres,
        yres,
        width_mm: numeric("Width (mm)")?,
        height_mm: numeric("Height (mm)")?,
        nchannels,
        gain_kev: gain_ev / 1000.0,
        dwell_ms: numeric("Dwell (mS)")?,
        deadtime_pct: numeric("Deadtime (%)")?,
    })
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_dimension(value: f64, key: &str) -> Result<u32> {
    if value.fract() != 0.0 || value < 1.0 || value > f64::from(u32::MAX) {
        return Err(Error::HeaderField(key.to_string()));
    }
    Ok(value as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn header_json() -> String {
        r#"{
            "File Header": {
                "Xres": 128,
                "Yres": 68,
                "Width (mm)": 32.0,
                "Height (mm)": 17.0,
                "Chan": 4096,
                "Gain (eV)": 10.0,
                "Dwell (mS)": 2.0,
                "Deadtime (%)": 15.5
            }
        }"#
        .to_string()
    }

    #[test]
    fn decode_valid_header() {
        let header = decode_header(header_json().as_bytes()).unwrap();
        assert_eq!(header.xres, 128);
        assert_eq!(header.yres, 68);
        assert_eq!(header.nchannels, 4096);
        assert_relative_eq!(header.gain_kev, 0.01);
        assert_relative_eq!(header.deadtime_pct, 15.5);
    }

    #[test]
    fn numeric_strings_accepted() {
        let json = header_json().replace("\"Xres\": 128", "\"Xres\": \"128\"");
        let header = decode_header(json.as_bytes()).unwrap();
        assert_eq!(header.xres, 128);
    }

    #[test]
    fn missing_header_sentinel() {
        assert!(matches!(
            header_block_len(*b"DP"),
            Err(Error::HeaderMissing)
        ));
        assert_eq!(header_block_len([0x10, 0x00]).unwrap(), 16);
    }

    #[test]
    fn malformed_json_is_decode_error() {
        assert!(matches!(
            decode_header(b"{not json"),
            Err(Error::HeaderDecode(_))
        ));
    }

    #[test]
    fn missing_field_is_field_error() {
        let json = header_json().replace("\"Chan\": 4096,", "");
        match decode_header(json.as_bytes()) {
            Err(Error::HeaderField(field)) => assert_eq!(field, "Chan"),
            other => panic!("expected HeaderField, got {other:?}"),
        }
    }

    #[test]
    fn non_integral_resolution_rejected() {
        let json = header_json().replace("\"Xres\": 128", "\"Xres\": 12.5");
        assert!(matches!(
            decode_header(json.as_bytes()),
            Err(Error::HeaderField(_))
        ));
    }

    #[test]
    fn data_start_skips_prefix_and_block() {
        assert_eq!(data_start(100), 102);
    }
}
