//! Primitive frame layer: every integer little-endian, reads fully checked.
//! A truncated or malformed frame surfaces as an error and is dropped by
//! the caller, never a panic.

use std::f32::consts::PI;

use crate::prelude::*;

#[derive(Default)]
pub struct FrameWriter {
    buf: Vec<u8>,
}

impl FrameWriter {
    pub fn new(id: u8) -> Self {
        Self { buf: vec![id] }
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_i16(&mut self, value: i16) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_f32(&mut self, value: f32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// u8 length prefix, then UTF-8 bytes.
    pub fn write_short_str(&mut self, value: &str) {
        let bytes = value.as_bytes();
        debug_assert!(bytes.len() <= u8::MAX as usize);
        self.write_u8(bytes.len().min(u8::MAX as usize) as u8);
        self.write_bytes(&bytes[..bytes.len().min(u8::MAX as usize)]);
    }

    pub fn write_u16_slice(&mut self, values: &[u16]) {
        self.buf.reserve(values.len() * 2);
        for &value in values {
            self.write_u16(value);
        }
    }

    pub fn write_i16_slice(&mut self, values: &[i16]) {
        self.buf.reserve(values.len() * 2);
        for &value in values {
            self.write_i16(value);
        }
    }
}

pub struct FrameReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FrameReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            bail!(
                "truncated frame: wanted {} more bytes, had {}",
                len,
                self.remaining()
            );
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        Ok(i16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn read_short_str(&mut self) -> Result<String> {
        let len = self.read_u8()? as usize;
        let bytes = self.take(len)?;
        Ok(std::str::from_utf8(bytes)?.to_owned())
    }

    pub fn read_u16_vec(&mut self, count: usize) -> Result<Vec<u16>> {
        let bytes = self.take(count * 2)?;
        Ok(bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect())
    }

    pub fn read_i16_vec(&mut self, count: usize) -> Result<Vec<i16>> {
        let bytes = self.take(count * 2)?;
        Ok(bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect())
    }

    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8]> {
        self.take(count)
    }

    pub fn expect_end(&self) -> Result<()> {
        if self.remaining() != 0 {
            bail!("{} trailing bytes after frame payload", self.remaining());
        }
        Ok(())
    }
}

/// Angles quantize onto i16 over `[-pi, pi]`.
pub fn quantize_angle(angle: f32) -> i16 {
    let normalized = (angle / PI).max(-1.0).min(1.0);
    (normalized * i16::MAX as f32).round() as i16
}

pub fn dequantize_angle(q: i16) -> f32 {
    q as f32 / i16::MAX as f32 * PI
}

/// Snapshot positions travel as whole centimeters.
pub fn quantize_cm(meters: f32) -> i16 {
    (meters * 100.0)
        .round()
        .max(i16::MIN as f32)
        .min(i16::MAX as f32) as i16
}

pub fn dequantize_cm(q: i16) -> f32 {
    q as f32 / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn primitives_round_trip_little_endian() {
        let mut writer = FrameWriter::new(0x42);
        writer.write_u16(0x1234);
        writer.write_i32(-77);
        writer.write_f32(1.5);
        writer.write_short_str("room-0");
        let frame = writer.finish();

        assert_eq!(frame[0], 0x42);
        // u16 low byte first
        assert_eq!(&frame[1..3], &[0x34, 0x12]);

        let mut reader = FrameReader::new(&frame[1..]);
        assert_eq!(reader.read_u16().unwrap(), 0x1234);
        assert_eq!(reader.read_i32().unwrap(), -77);
        assert_eq!(reader.read_f32().unwrap(), 1.5);
        assert_eq!(reader.read_short_str().unwrap(), "room-0");
        assert!(reader.expect_end().is_ok());
    }

    #[test]
    fn truncated_reads_error_out() {
        let mut reader = FrameReader::new(&[1, 2, 3]);
        assert!(reader.read_u32().is_err());
        assert_eq!(reader.read_u8().unwrap(), 1);
        assert!(reader.read_i32().is_err());
    }

    #[test]
    fn angle_quantization_covers_the_circle() {
        for &angle in &[-PI, -1.0, 0.0, 0.5, PI] {
            let round_tripped = dequantize_angle(quantize_angle(angle));
            assert_relative_eq!(round_tripped, angle, epsilon = 1e-3);
        }
        // out-of-range input saturates instead of wrapping
        assert_eq!(quantize_angle(10.0), i16::MAX);
        assert_eq!(quantize_angle(-10.0), -i16::MAX);
    }

    #[test]
    fn centimeter_quantization_is_lossless_for_whole_cm() {
        assert_eq!(dequantize_cm(quantize_cm(1.27)), 1.27);
        assert_eq!(quantize_cm(-3.005), -301);
        assert_eq!(quantize_cm(400.0), i16::MAX);
    }
}
