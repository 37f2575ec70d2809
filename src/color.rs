/// Pixel colour conversion utilities
///
/// This module handles the display side of detector samples:
/// - Linear rescale of 14-bit sensor samples to 8-bit grey
/// - Saturated pixel highlighting above a configurable threshold
/// - Parsing of the highlight colour as entered by the operator
use std::fmt;
use std::str::FromStr;

use crate::error::ColourError;

/// Largest value a 14-bit detector sample can take (2^14 - 1)
pub const MAX_14BIT: u16 = 16383;

/// Map a 14-bit sample onto the 8-bit display range
///
/// Values above the 14-bit range clamp to 255.
pub fn convert_14bit_to_8bit(value: u16) -> u8 {
    let scaled = f64::from(value) / f64::from(MAX_14BIT) * 255.0;
    scaled.round().clamp(0.0, 255.0) as u8
}

/// Whether a sample counts as saturated for display purposes
pub fn is_saturated(value: u16, threshold: u16) -> bool {
    value > threshold
}

/// Display colour for one sample
pub fn display_pixel(value: u16, threshold: u16, highlight: Rgb) -> [u8; 4] {
    if is_saturated(value, threshold) {
        let [r, g, b] = highlight.0;
        [r, g, b, 255]
    } else {
        let grey = convert_14bit_to_8bit(value);
        [grey, grey, grey, 255]
    }
}

/// Convert a buffer of 14-bit samples into RGBA bytes
///
/// Saturated samples are painted with `highlight`; everything else becomes
/// opaque grey.
pub fn samples_to_rgba(samples: &[u16], threshold: u16, highlight: Rgb) -> Vec<u8> {
    let mut rgba = vec![0u8; samples.len() * 4];
    let pixels: &mut [[u8; 4]] = bytemuck::cast_slice_mut(&mut rgba);

    for (pixel, &value) in pixels.iter_mut().zip(samples) {
        *pixel = display_pixel(value, threshold, highlight);
    }

    rgba
}

/// An opaque RGB colour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb(pub [u8; 3]);

impl Rgb {
    pub const RED: Rgb = Rgb([255, 0, 0]);

    /// CSS-style `rgb(r, g, b)` form, the format the backend parses
    pub fn to_css(self) -> String {
        let [r, g, b] = self.0;
        format!("rgb({}, {}, {})", r, g, b)
    }
}

impl Default for Rgb {
    fn default() -> Self {
        Rgb::RED
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_css())
    }
}

impl FromStr for Rgb {
    type Err = ColourError;

    /// Accepts `rgb(r, g, b)`, `#rrggbb` or one of a few colour names
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        let lower = trimmed.to_ascii_lowercase();

        if let Some(inner) = lower
            .strip_prefix("rgb(")
            .and_then(|rest| rest.strip_suffix(')'))
        {
            return parse_rgb_triplet(inner, input);
        }

        if let Some(hex) = lower.strip_prefix('#') {
            return parse_hex(hex, input);
        }

        let named = match lower.as_str() {
            "red" => [255, 0, 0],
            "green" => [0, 128, 0],
            "lime" => [0, 255, 0],
            "blue" => [0, 0, 255],
            "yellow" => [255, 255, 0],
            "cyan" => [0, 255, 255],
            "magenta" => [255, 0, 255],
            "orange" => [255, 165, 0],
            "white" => [255, 255, 255],
            "black" => [0, 0, 0],
            _ => return Err(ColourError::Format(input.to_string())),
        };
        Ok(Rgb(named))
    }
}

fn parse_rgb_triplet(inner: &str, input: &str) -> Result<Rgb, ColourError> {
    let parts: Vec<&str> = inner.split(',').map(str::trim).collect();
    if parts.len() != 3 {
        return Err(ColourError::Format(input.to_string()));
    }

    let mut channels = [0u8; 3];
    for ((slot, part), name) in channels.iter_mut().zip(&parts).zip(["red", "green", "blue"]) {
        *slot = part.parse::<u8>().map_err(|_| ColourError::Channel {
            channel: name,
            input: input.to_string(),
        })?;
    }
    Ok(Rgb(channels))
}

fn parse_hex(hex: &str, input: &str) -> Result<Rgb, ColourError> {
    if hex.len() != 6 || !hex.is_ascii() {
        return Err(ColourError::Format(input.to_string()));
    }

    let mut channels = [0u8; 3];
    for (i, name) in ["red", "green", "blue"].into_iter().enumerate() {
        channels[i] = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).map_err(|_| {
            ColourError::Channel {
                channel: name,
                input: input.to_string(),
            }
        })?;
    }
    Ok(Rgb(channels))
}
