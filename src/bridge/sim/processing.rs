/// Image processing for the simulated detector
///
/// This module covers everything the simulator does to pixels:
/// - Synthetic sensor and dark frames
/// - Dark and defect correction
/// - Histograms and histogram equalization
/// - Line profiles along ROIs
/// - Windowed SNR for smart captures
use image::{imageops, ImageBuffer, Luma};

use crate::color::MAX_14BIT;
use crate::state::data::{Annotation, Line, LineProfilePoint, Point, Rect};

pub type Frame = ImageBuffer<Luma<u16>, Vec<u16>>;

/// Bias level every frame sits on
pub const PEDESTAL: u16 = 300;

/// Number of bins in the histogram chart
pub const HISTOGRAM_BINS: u32 = 256;

/// Dark frames above this level mark a defective pixel
const DEFECT_LEVEL: u16 = 8000;

/// Cheap integer hash for repeatable noise
fn hash(x: u32, y: u32, seed: u64) -> u64 {
    let mut z = seed
        .wrapping_add(u64::from(x).wrapping_mul(0x9E37_79B9_7F4A_7C15))
        .wrapping_add(u64::from(y).wrapping_mul(0xC2B2_AE3D_27D4_EB4F));
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

fn is_hot_pixel(x: u32, y: u32) -> bool {
    hash(x, y, 0xD3FEC7) % 4099 == 0
}

fn clamp_14bit(value: f64) -> u16 {
    value.round().clamp(0.0, f64::from(MAX_14BIT)) as u16
}

/// Uncorrected frame as the sensor would deliver it
///
/// A bright spot drifts across the frame with `seq`; its amplitude grows
/// with the exposure time.
pub fn sensor_frame(width: u32, height: u32, exp_time: u32, seq: u64) -> Frame {
    let w = f64::from(width.max(1));
    let h = f64::from(height.max(1));
    let phase = seq as f64 * 0.15;
    let cx = w * (0.5 + 0.25 * phase.cos());
    let cy = h * (0.5 + 0.25 * phase.sin());
    let sigma = w.min(h) / 8.0;
    let amplitude = f64::from(exp_time) * 40.0;
    let dark = dark_current(exp_time);

    ImageBuffer::from_fn(width, height, |x, y| {
        if is_hot_pixel(x, y) {
            return Luma([MAX_14BIT]);
        }
        let dx = f64::from(x) - cx;
        let dy = f64::from(y) - cy;
        let spot = amplitude * (-(dx * dx + dy * dy) / (2.0 * sigma * sigma)).exp();
        let gradient = f64::from(exp_time) * f64::from(x) / w;
        let noise = (hash(x, y, seq) % 32) as f64;
        Luma([clamp_14bit(dark + spot + gradient + noise)])
    })
}

fn dark_current(exp_time: u32) -> f64 {
    f64::from(PEDESTAL) + f64::from(exp_time) / 10.0
}

/// Frame taken with the shutter closed
pub fn sensor_dark_frame(width: u32, height: u32, exp_time: u32, seq: u64) -> Frame {
    let dark = dark_current(exp_time);
    ImageBuffer::from_fn(width, height, |x, y| {
        if is_hot_pixel(x, y) {
            return Luma([MAX_14BIT]);
        }
        let noise = (hash(x, y, seq) % 32) as f64;
        Luma([clamp_14bit(dark + noise)])
    })
}

/// Pixel-wise mean of several frames
pub fn average(frames: &[Frame]) -> Option<Frame> {
    let first = frames.first()?;
    let (width, height) = first.dimensions();
    let mut sums = vec![0u64; first.len()];
    for frame in frames {
        if frame.dimensions() != (width, height) {
            return None;
        }
        for (sum, &value) in sums.iter_mut().zip(frame.iter()) {
            *sum += u64::from(value);
        }
    }
    let n = frames.len() as u64;
    let data = sums.into_iter().map(|sum| ((sum + n / 2) / n) as u16).collect();
    ImageBuffer::from_raw(width, height, data)
}

/// Positions whose dark level marks them as defective
pub fn defect_map(dark: &Frame) -> Vec<(u32, u32)> {
    dark.enumerate_pixels()
        .filter(|(_, _, p)| p[0] > DEFECT_LEVEL)
        .map(|(x, y, _)| (x, y))
        .collect()
}

/// Subtract the dark map (keeping the pedestal) and patch defective pixels
pub fn correct(raw: &Frame, dark: &Frame, defects: &[(u32, u32)]) -> Frame {
    let mut out = raw.clone();
    if dark.dimensions() == raw.dimensions() {
        for (value, &d) in out.iter_mut().zip(dark.iter()) {
            *value = value.saturating_sub(d).saturating_add(PEDESTAL).min(MAX_14BIT);
        }
    }

    let (width, height) = out.dimensions();
    for &(x, y) in defects {
        if x >= width || y >= height {
            continue;
        }
        let neighbours: Vec<u32> = [(-1i64, 0i64), (1, 0), (0, -1), (0, 1)]
            .iter()
            .filter_map(|&(dx, dy)| {
                let nx = i64::from(x) + dx;
                let ny = i64::from(y) + dy;
                if nx < 0 || ny < 0 || nx >= i64::from(width) || ny >= i64::from(height) {
                    return None;
                }
                Some(u32::from(out.get_pixel(nx as u32, ny as u32)[0]))
            })
            .collect();
        if !neighbours.is_empty() {
            let mean = neighbours.iter().sum::<u32>() / neighbours.len() as u32;
            out.put_pixel(x, y, Luma([mean as u16]));
        }
    }
    out
}

/// Add `current` onto `previous`, saturating at the 14-bit maximum
pub fn accumulate(previous: &Frame, current: &Frame) -> Frame {
    let mut out = current.clone();
    for (value, &prev) in out.iter_mut().zip(previous.iter()) {
        *value = value.saturating_add(prev).min(MAX_14BIT);
    }
    out
}

/// Histogram with `num_bins` equal bins over `0..=max_value`
///
/// Values above `max_value` land in the last bin.
pub fn histogram<I>(values: I, max_value: u32, num_bins: u32) -> Vec<u32>
where
    I: IntoIterator<Item = u16>,
{
    let num_bins = num_bins.max(1);
    let bin_size = ((max_value + 1) / num_bins).max(1);
    let last = num_bins as usize - 1;
    values
        .into_iter()
        .fold(vec![0u32; num_bins as usize], |mut bins, value| {
            let idx = ((u32::from(value) / bin_size) as usize).min(last);
            bins[idx] += 1;
            bins
        })
}

/// Equalization lookup table from a per-value histogram
pub fn equalization_lut(histogram: &[u32]) -> Vec<u16> {
    let num_pixels: u32 = histogram.iter().sum();
    if num_pixels == 0 {
        return (0..histogram.len()).map(|v| v.min(usize::from(MAX_14BIT)) as u16).collect();
    }

    let mut cdf_min: Option<u32> = None;
    let mut cdf = 0u32;
    histogram
        .iter()
        .map(|&freq| {
            cdf += freq;
            if freq > 0 {
                cdf_min = cdf_min.or(Some(cdf));
            }
            match cdf_min {
                Some(min) if num_pixels > min => {
                    clamp_14bit(f64::from(cdf - min) / f64::from(num_pixels - min) * f64::from(MAX_14BIT))
                }
                _ => 0,
            }
        })
        .collect()
}

/// Lookup table equalizing the given sample values
pub fn equalize_values<I>(values: I) -> Vec<u16>
where
    I: IntoIterator<Item = u16>,
{
    let range = u32::from(MAX_14BIT);
    equalization_lut(&histogram(values, range, range + 1))
}

/// Frame as displayed: LUT applied, then optional inversion
pub fn render(frame: &Frame, lut: Option<&[u16]>, inverted: bool) -> Frame {
    let mut out = frame.clone();
    for value in out.iter_mut() {
        let mut v = (*value).min(MAX_14BIT);
        if let Some(lut) = lut {
            v = lut.get(usize::from(v)).copied().unwrap_or(v);
        }
        if inverted {
            v = MAX_14BIT - v.min(MAX_14BIT);
        }
        *value = v;
    }
    out
}

/// Shrink so the longer side is at most `max_side`, keeping the aspect ratio
pub fn resize(frame: &Frame, max_side: u32) -> Frame {
    let (width, height) = frame.dimensions();
    let longest = width.max(height);
    if max_side == 0 || longest <= max_side {
        return frame.clone();
    }
    let scale = f64::from(max_side) / f64::from(longest);
    let new_w = ((f64::from(width) * scale).round() as u32).max(1);
    let new_h = ((f64::from(height) * scale).round() as u32).max(1);
    imageops::resize(frame, new_w, new_h, imageops::FilterType::Nearest)
}

/// 3x3 (or larger) median filter, edges use the in-bounds part of the window
pub fn median_filter(frame: &Frame, window: u32) -> Frame {
    let (width, height) = frame.dimensions();
    let radius = i64::from(window / 2);
    let mut values = Vec::with_capacity((window * window) as usize);
    ImageBuffer::from_fn(width, height, |x, y| {
        values.clear();
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                let nx = i64::from(x) + dx;
                let ny = i64::from(y) + dy;
                if nx >= 0 && ny >= 0 && nx < i64::from(width) && ny < i64::from(height) {
                    values.push(frame.get_pixel(nx as u32, ny as u32)[0]);
                }
            }
        }
        values.sort_unstable();
        Luma([values[values.len() / 2]])
    })
}

/// Pixel coordinates along a line (Bresenham)
pub fn line_points(line: &Line) -> Vec<(u32, u32)> {
    let (mut x0, mut y0) = (i64::from(line.start.x), i64::from(line.start.y));
    let (x1, y1) = (i64::from(line.finish.x), i64::from(line.finish.y));
    let dx = (x1 - x0).abs();
    let dy = -(y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;

    let mut points = Vec::with_capacity((dx.max(-dy) + 1) as usize);
    loop {
        points.push((x0 as u32, y0 as u32));
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
    points
}

/// Sample values covered by an ROI, clipped to the frame
pub fn roi_values(frame: &Frame, roi: &Annotation) -> Vec<u16> {
    let (width, height) = frame.dimensions();
    match roi {
        Annotation::Rect(rect) => {
            let x_end = rect.pos.x.saturating_add(rect.width).min(width);
            let y_end = rect.pos.y.saturating_add(rect.height).min(height);
            let mut values = Vec::new();
            for y in rect.pos.y..y_end {
                for x in rect.pos.x..x_end {
                    values.push(frame.get_pixel(x, y)[0]);
                }
            }
            values
        }
        Annotation::Line(line) => line_points(line)
            .into_iter()
            .filter(|&(x, y)| x < width && y < height)
            .map(|(x, y)| frame.get_pixel(x, y)[0])
            .collect(),
    }
}

/// Column-averaged intensity profile along an ROI
pub fn line_profile(frame: &Frame, roi: &Annotation) -> Vec<LineProfilePoint> {
    let (width, height) = frame.dimensions();
    match roi {
        Annotation::Rect(rect) => {
            let x_end = rect.pos.x.saturating_add(rect.width).min(width);
            let y_end = rect.pos.y.saturating_add(rect.height).min(height);
            if rect.pos.y >= y_end {
                return Vec::new();
            }
            (rect.pos.x..x_end)
                .map(|x| {
                    let sum: u64 = (rect.pos.y..y_end)
                        .map(|y| u64::from(frame.get_pixel(x, y)[0]))
                        .sum();
                    LineProfilePoint {
                        idx: x,
                        value: (sum / u64::from(y_end - rect.pos.y)) as u32,
                    }
                })
                .collect()
        }
        Annotation::Line(line) => {
            let mut profile: Vec<LineProfilePoint> = Vec::new();
            let mut column: Option<(u32, u64, u64)> = None;
            for (x, y) in line_points(line) {
                if x >= width || y >= height {
                    continue;
                }
                let value = u64::from(frame.get_pixel(x, y)[0]);
                column = match column {
                    Some((cx, sum, count)) if cx == x => Some((cx, sum + value, count + 1)),
                    Some((cx, sum, count)) => {
                        profile.push(LineProfilePoint {
                            idx: cx,
                            value: (sum / count) as u32,
                        });
                        Some((x, value, 1))
                    }
                    None => Some((x, value, 1)),
                };
            }
            if let Some((cx, sum, count)) = column {
                profile.push(LineProfilePoint {
                    idx: cx,
                    value: (sum / count) as u32,
                });
            }
            profile
        }
    }
}

/// Signal to noise ratio between the brightest and darkest window
///
/// Returns the SNR with the background (darkest) and foreground
/// (brightest) windows, or `None` when the window does not fit.
pub fn snr(frame: &Frame, window: u32) -> Option<(f64, Rect, Rect)> {
    let (width, height) = frame.dimensions();
    if window == 0 || window > width || window > height {
        return None;
    }

    // Summed area table with a zero border row and column
    let stride = (width + 1) as usize;
    let mut integral = vec![0u64; stride * (height + 1) as usize];
    for y in 0..height {
        let mut row = 0u64;
        for x in 0..width {
            row += u64::from(frame.get_pixel(x, y)[0]);
            let idx = (y as usize + 1) * stride + x as usize + 1;
            integral[idx] = integral[idx - stride] + row;
        }
    }
    let area = |x: u32, y: u32| -> u64 {
        let (x0, y0) = (x as usize, y as usize);
        let (x1, y1) = (x0 + window as usize, y0 + window as usize);
        integral[y1 * stride + x1] + integral[y0 * stride + x0]
            - integral[y0 * stride + x1]
            - integral[y1 * stride + x0]
    };

    let pixels = f64::from(window) * f64::from(window);
    let mut min = (f64::MAX, Point::default());
    let mut max = (f64::MIN, Point::default());
    for y in 0..=height - window {
        for x in 0..=width - window {
            let mean = area(x, y) as f64 / pixels;
            if mean < min.0 {
                min = (mean, Point::new(x, y));
            }
            if mean > max.0 {
                max = (mean, Point::new(x, y));
            }
        }
    }

    let rect = |pos: Point| Rect {
        width: window,
        height: window,
        pos,
    };
    let noise = (min.0 - f64::from(PEDESTAL)).abs().max(1.0);
    Some(((max.0 - min.0) / noise, rect(min.1), rect(max.1)))
}
