//! Record framing, the excess-64 real format and coordinate quantization.

use std::io::Write;

use super::GdsError;

// ── GDS-II Record Types ──────────────────────────────────────────────

pub mod record_type {
    pub const HEADER: u16     = 0x0002;
    pub const BGNLIB: u16     = 0x0102;
    pub const LIBNAME: u16    = 0x0206;
    pub const UNITS: u16      = 0x0305;
    pub const ENDLIB: u16     = 0x0400;
    pub const BGNSTR: u16     = 0x0502;
    pub const STRNAME: u16    = 0x0606;
    pub const ENDSTR: u16     = 0x0700;
    pub const BOUNDARY: u16   = 0x0800;
    pub const PATH: u16       = 0x0900;
    pub const SREF: u16       = 0x0A00;
    pub const AREF: u16       = 0x0B00;
    pub const TEXT: u16       = 0x0C00;
    pub const LAYER: u16      = 0x0D02;
    pub const DATATYPE: u16   = 0x0E02;
    pub const WIDTH: u16      = 0x0F03;
    pub const XY: u16         = 0x1003;
    pub const ENDEL: u16      = 0x1100;
    pub const SNAME: u16      = 0x1206;
    pub const COLROW: u16     = 0x1302;
    pub const NODE: u16       = 0x1500;
    pub const TEXTTYPE: u16   = 0x1602;
    pub const STRANS: u16     = 0x1A01;
    pub const MAG: u16        = 0x1B05;
    pub const ANGLE: u16      = 0x1C05;
    pub const BOX: u16        = 0x2D00;
    pub const BOXTYPE: u16    = 0x2E02;
}

/// Stream format version written to HEADER (6.0).
pub const GDS_VERSION: i16 = 600;

/// Most points one XY record can carry.
pub const MAX_XY_POINTS: usize = 8191;

/// STRANS bit for reflection about the x axis, applied before rotation.
pub const STRANS_REFLECTION: u16 = 0x8000;

const MAX_PAYLOAD: usize = u16::MAX as usize - 4;

// ── Excess-64 reals ──────────────────────────────────────────────────

/// Convert IEEE 754 f64 to GDS-II excess-64 real format.
///
/// Values too large for the format saturate to the largest magnitude, values
/// too small flush to zero.
pub fn encode_real8(value: f64) -> [u8; 8] {
    if value == 0.0 || !value.is_finite() {
        return [0u8; 8];
    }

    let sign_bit: u8 = if value < 0.0 { 0x80 } else { 0x00 };
    let mut mantissa = value.abs();

    // Find exponent such that 1/16 <= mantissa < 1
    let mut exponent: i32 = 0;
    while mantissa >= 1.0 {
        mantissa /= 16.0;
        exponent += 1;
    }
    while mantissa < 1.0 / 16.0 {
        mantissa *= 16.0;
        exponent -= 1;
    }

    let mut bits = (mantissa * (1u64 << 56) as f64).round() as u64;
    if bits >= 1u64 << 56 {
        bits >>= 4;
        exponent += 1;
    }

    if exponent > 63 {
        let mut max = [0xFFu8; 8];
        max[0] = sign_bit | 0x7F;
        return max;
    }
    if exponent < -64 {
        return [0u8; 8];
    }

    let mut result = bits.to_be_bytes();
    result[0] = sign_bit | (exponent + 64) as u8;
    result
}

/// Convert GDS-II excess-64 real format to IEEE 754 f64.
pub fn decode_real8(bytes: [u8; 8]) -> f64 {
    if bytes.iter().all(|&b| b == 0) {
        return 0.0;
    }

    let sign = if bytes[0] & 0x80 != 0 { -1.0 } else { 1.0 };
    let exponent = (bytes[0] & 0x7F) as i32 - 64;

    let mut mantissa: u64 = 0;
    for &b in &bytes[1..] {
        mantissa = (mantissa << 8) | (b as u64);
    }

    let mantissa_f = mantissa as f64 / (1u64 << 56) as f64;
    sign * mantissa_f * 16.0_f64.powi(exponent)
}

/// Scale a user-unit coordinate to the integer grid, rounding to nearest.
pub fn quantize(value: f64, grid_steps_per_unit: f64) -> Result<i32, GdsError> {
    let scaled = (value * grid_steps_per_unit).round();
    if !scaled.is_finite() || scaled < i32::MIN as f64 || scaled > i32::MAX as f64 {
        return Err(GdsError::CoordinateOverflow { value });
    }
    Ok(scaled as i32)
}

// ── Record sink ──────────────────────────────────────────────────────

/// Writes framed records to any byte sink.
pub struct RecordSink<W: Write> {
    out: W,
}

impl<W: Write> RecordSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.out
    }

    pub fn record(&mut self, record_type: u16, data: &[u8]) -> Result<(), GdsError> {
        if data.len() > MAX_PAYLOAD {
            return Err(GdsError::InvalidRecord {
                offset: 0,
                message: format!(
                    "payload of {} bytes for record 0x{:04X} exceeds the frame limit",
                    data.len(),
                    record_type
                ),
            });
        }
        let total_len = (data.len() + 4) as u16;
        self.out.write_all(&total_len.to_be_bytes())?;
        self.out.write_all(&record_type.to_be_bytes())?;
        if !data.is_empty() {
            self.out.write_all(data)?;
        }
        Ok(())
    }

    pub fn empty(&mut self, record_type: u16) -> Result<(), GdsError> {
        self.record(record_type, &[])
    }

    pub fn i16s(&mut self, record_type: u16, values: &[i16]) -> Result<(), GdsError> {
        let data: Vec<u8> = values.iter().flat_map(|v| v.to_be_bytes()).collect();
        self.record(record_type, &data)
    }

    pub fn u16s(&mut self, record_type: u16, values: &[u16]) -> Result<(), GdsError> {
        let data: Vec<u8> = values.iter().flat_map(|v| v.to_be_bytes()).collect();
        self.record(record_type, &data)
    }

    pub fn i32s(&mut self, record_type: u16, values: &[i32]) -> Result<(), GdsError> {
        let data: Vec<u8> = values.iter().flat_map(|v| v.to_be_bytes()).collect();
        self.record(record_type, &data)
    }

    pub fn real8s(&mut self, record_type: u16, values: &[f64]) -> Result<(), GdsError> {
        let data: Vec<u8> = values.iter().flat_map(|v| encode_real8(*v)).collect();
        self.record(record_type, &data)
    }

    /// ASCII string record, NUL-padded to even length.
    pub fn string(&mut self, record_type: u16, s: &str) -> Result<(), GdsError> {
        let mut data: Vec<u8> = s.bytes().collect();
        if data.len() % 2 != 0 {
            data.push(0);
        }
        if data.len() > MAX_PAYLOAD {
            return Err(GdsError::NameTooLong {
                name: s.to_string(),
                len: s.len(),
            });
        }
        self.record(record_type, &data)
    }

    /// One or more XY records of at most [`MAX_XY_POINTS`] points each.
    pub fn xy(&mut self, points: &[[i32; 2]]) -> Result<(), GdsError> {
        for chunk in points.chunks(MAX_XY_POINTS) {
            let data: Vec<u8> = chunk
                .iter()
                .flat_map(|[x, y]| x.to_be_bytes().into_iter().chain(y.to_be_bytes()))
                .collect();
            self.record(record_type::XY, &data)?;
        }
        Ok(())
    }

    /// Copy pre-encoded records verbatim.
    pub fn raw(&mut self, bytes: &[u8]) -> Result<(), GdsError> {
        self.out.write_all(bytes)?;
        Ok(())
    }
}
