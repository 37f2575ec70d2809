/// Text overlay in the corner of the image viewer
use iced::widget::{column, container, text};
use iced::{Element, Length};

use crate::state::data::{ExtraData, ImageMetadata};

/// Pixel under the cursor and its detector value once known
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hover {
    pub x: u32,
    pub y: u32,
    pub value: Option<u16>,
}

/// Overlay lines for the frame on screen
///
/// `image_idx` is `None` while streaming, where there is no frame index
/// and no stored metadata.
pub fn lines(image_idx: Option<usize>, hover: Option<&Hover>, metadata: Option<&ImageMetadata>) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(idx) = image_idx {
        lines.push(format!("Frame: {}", idx));
    }
    if let Some(hover) = hover {
        lines.push(format!("X: {}, Y: {}", hover.x, hover.y));
        if let Some(value) = hover.value {
            lines.push(format!("Saturation Level: {}", value));
        }
    }
    let Some(metadata) = metadata else {
        return lines;
    };
    if let Some(settings) = &metadata.capture_settings {
        lines.push(format!("Image Exposure Time: {}ms", settings.exp_time));
    }
    match &metadata.extra_info {
        Some(ExtraData::SignalAccumulationData(data)) => {
            lines.push(format!("Accumulated Exposure Time: {}ms", data.accumulated_exp_time))
        }
        Some(ExtraData::SmartCaptureData(data)) => lines.push(format!("SNR: {:.3}", data.signal_noise_ratio)),
        None => {}
    }
    lines
}

pub fn view<'a, Message: 'a>(lines: Vec<String>) -> Element<'a, Message> {
    let content = column(lines.into_iter().map(|line| text(line).size(13).into())).spacing(2);
    container(content)
        .padding(6)
        .width(Length::Shrink)
        .style(container::dark)
        .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::data::{
        BinningMode, CaptureSetting, FullWellMode, Point, Rect, SignalAccumulationData, SmartCaptureData,
    };

    fn metadata(extra_info: Option<ExtraData>) -> ImageMetadata {
        ImageMetadata {
            capture_settings: Some(CaptureSetting {
                exp_time: 250,
                dds: false,
                full_well: FullWellMode::High,
                binning_mode: BinningMode::X11,
                roi: None,
            }),
            date_created: None,
            extra_info,
        }
    }

    #[test]
    fn test_lines_for_accumulated_frame() {
        let hover = Hover {
            x: 5,
            y: 10,
            value: Some(1234),
        };
        let meta = metadata(Some(ExtraData::SignalAccumulationData(SignalAccumulationData {
            accumulated_exp_time: 750,
        })));
        assert_eq!(
            lines(Some(2), Some(&hover), Some(&meta)),
            vec![
                "Frame: 2",
                "X: 5, Y: 10",
                "Saturation Level: 1234",
                "Image Exposure Time: 250ms",
                "Accumulated Exposure Time: 750ms",
            ]
        );
    }

    #[test]
    fn test_snr_has_three_decimals() {
        let window = Rect {
            width: 5,
            height: 5,
            pos: Point::new(0, 0),
        };
        let meta = metadata(Some(ExtraData::SmartCaptureData(SmartCaptureData {
            signal_noise_ratio: 12.34567,
            background_rect: window,
            foreground_rect: window,
        })));
        assert_eq!(lines(None, None, Some(&meta)).last().unwrap(), "SNR: 12.346");
    }

    #[test]
    fn test_streaming_shows_only_cursor() {
        let hover = Hover {
            x: 1,
            y: 1,
            value: None,
        };
        assert_eq!(lines(None, Some(&hover), None), vec!["X: 1, Y: 1"]);
    }
}
