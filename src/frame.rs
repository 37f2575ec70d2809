/// Width/height prefixed pixel buffers exchanged with the backend
///
/// Every frame starts with an 8-byte little-endian header (u32 width,
/// u32 height). RGBA frames carry `w*h*4` bytes after it; raw frames carry
/// `w*h` little-endian u16 samples. An empty buffer means "no frame".
use crate::color::{self, Rgb};
use crate::error::FrameError;

const HEADER_LEN: usize = 8;

/// A display-ready RGBA frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbaFrame {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

/// A frame of raw detector samples (up to 14 significant bits)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    pub samples: Vec<u16>,
}

fn read_header(buffer: &[u8]) -> Result<(u32, u32, &[u8]), FrameError> {
    if buffer.len() < HEADER_LEN {
        return Err(FrameError::MissingHeader(buffer.len()));
    }
    let width = u32::from_le_bytes([buffer[0], buffer[1], buffer[2], buffer[3]]);
    let height = u32::from_le_bytes([buffer[4], buffer[5], buffer[6], buffer[7]]);
    Ok((width, height, &buffer[HEADER_LEN..]))
}

fn expected_len(width: u32, height: u32, bytes_per_pixel: usize) -> Result<usize, FrameError> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|n| n.checked_mul(bytes_per_pixel))
        .ok_or(FrameError::TooLarge { width, height })
}

fn header(width: u32, height: u32, payload_len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + payload_len);
    out.extend_from_slice(&width.to_le_bytes());
    out.extend_from_slice(&height.to_le_bytes());
    out
}

impl RgbaFrame {
    /// Parse an RGBA frame; `Ok(None)` for an empty buffer
    pub fn parse(buffer: &[u8]) -> Result<Option<Self>, FrameError> {
        if buffer.is_empty() {
            return Ok(None);
        }
        let (width, height, payload) = read_header(buffer)?;
        let expected = expected_len(width, height, 4)?;
        if payload.len() != expected {
            return Err(FrameError::PayloadSize {
                width,
                height,
                expected,
                actual: payload.len(),
            });
        }
        Ok(Some(Self {
            width,
            height,
            rgba: payload.to_vec(),
        }))
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = header(self.width, self.height, self.rgba.len());
        out.extend_from_slice(&self.rgba);
        out
    }
}

impl RawFrame {
    /// Parse a raw sample frame; `Ok(None)` for an empty buffer
    pub fn parse(buffer: &[u8]) -> Result<Option<Self>, FrameError> {
        if buffer.is_empty() {
            return Ok(None);
        }
        let (width, height, payload) = read_header(buffer)?;
        let expected = expected_len(width, height, 2)?;
        if payload.len() != expected {
            return Err(FrameError::PayloadSize {
                width,
                height,
                expected,
                actual: payload.len(),
            });
        }
        let samples = payload
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Ok(Some(Self {
            width,
            height,
            samples,
        }))
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = header(self.width, self.height, self.samples.len() * 2);
        for sample in &self.samples {
            out.extend_from_slice(&sample.to_le_bytes());
        }
        out
    }

    /// Render for display with saturated pixels highlighted
    pub fn to_rgba(&self, threshold: u16, highlight: Rgb) -> RgbaFrame {
        RgbaFrame {
            width: self.width,
            height: self.height,
            rgba: color::samples_to_rgba(&self.samples, threshold, highlight),
        }
    }
}
