/// Shared data structures exchanged with the backend
///
/// These types mirror the backend's wire contract. The UI only ever holds
/// copies of them: every change goes out as a command and comes back as an
/// event.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A point in image pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: u32,
    pub y: u32,
}

impl Point {
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned rectangle anchored at its top-left corner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub width: u32,
    pub height: u32,
    pub pos: Point,
}

impl Rect {
    /// Rectangle spanning two corners in any order
    pub fn from_corners(a: Point, b: Point) -> Self {
        let top_left = Point::new(a.x.min(b.x), a.y.min(b.y));
        let bottom_right = Point::new(a.x.max(b.x), a.y.max(b.y));
        Self {
            width: bottom_right.x - top_left.x,
            height: bottom_right.y - top_left.y,
            pos: top_left,
        }
    }

    pub fn full_frame(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pos: Point::default(),
        }
    }

    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.pos.x
            && p.y >= self.pos.y
            && p.x < self.pos.x.saturating_add(self.width)
            && p.y < self.pos.y.saturating_add(self.height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Line {
    pub start: Point,
    pub finish: Point,
}

/// Region of interest drawn by the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Annotation {
    Rect(Rect),
    Line(Line),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveCapture {
    pub exp_time: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiCapture {
    pub exp_times: Vec<u32>,
    pub frames_per_capture: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalAccumulationCapture {
    pub exp_times: Vec<u32>,
    pub frames_per_capture: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmartCapture {
    pub exp_times: Vec<u32>,
    pub frames_per_capture: u32,
    pub window_size: u32,
    pub median_filtered: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DarkMapCapture {
    pub exp_times: Vec<u32>,
    pub frames_per_capture: u32,
}

/// Capture recipe understood by the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AdvancedCapture {
    SmartCapture(SmartCapture),
    SignalAccumulationCapture(SignalAccumulationCapture),
    MultiCapture(MultiCapture),
    DarkMapCapture(DarkMapCapture),
    LiveCapture(LiveCapture),
}

impl AdvancedCapture {
    pub fn live(exp_time: u32) -> Self {
        AdvancedCapture::LiveCapture(LiveCapture { exp_time })
    }

    pub fn kind(&self) -> CaptureKind {
        match self {
            AdvancedCapture::SmartCapture(_) => CaptureKind::SmartCapture,
            AdvancedCapture::SignalAccumulationCapture(_) => CaptureKind::SignalAccumulationCapture,
            AdvancedCapture::MultiCapture(_) => CaptureKind::MultiCapture,
            AdvancedCapture::DarkMapCapture(_) => CaptureKind::DarkMapCapture,
            AdvancedCapture::LiveCapture(_) => CaptureKind::LiveCapture,
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, AdvancedCapture::LiveCapture(_))
    }
}

/// Discriminant of [`AdvancedCapture`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureKind {
    SmartCapture,
    SignalAccumulationCapture,
    MultiCapture,
    DarkMapCapture,
    LiveCapture,
}

impl CaptureKind {
    pub fn name(self) -> &'static str {
        match self {
            CaptureKind::SmartCapture => "SmartCapture",
            CaptureKind::SignalAccumulationCapture => "SignalAccumulationCapture",
            CaptureKind::MultiCapture => "MultiCapture",
            CaptureKind::DarkMapCapture => "DarkMapCapture",
            CaptureKind::LiveCapture => "LiveCapture",
        }
    }

    /// Human readable name, e.g. "Signal Accumulation Capture"
    pub fn words(self) -> String {
        camel_case_to_words(self.name())
    }
}

/// Split a CamelCase identifier into space separated words
pub fn camel_case_to_words(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + 4);
    let mut prev_lower = false;
    for c in input.chars() {
        if c.is_uppercase() && prev_lower {
            out.push(' ');
        }
        prev_lower = c.is_lowercase() || c.is_ascii_digit();
        out.push(c);
    }
    out
}

/// State of the backend's capture manager
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CaptureManagerStatus {
    #[default]
    DetectorDisconnected,
    DarkMapsRequired,
    DefectMapsRequired,
    Available,
    Capturing(AdvancedCapture),
}

impl CaptureManagerStatus {
    pub fn capturing(&self) -> Option<&AdvancedCapture> {
        match self {
            CaptureManagerStatus::Capturing(capture) => Some(capture),
            _ => None,
        }
    }

    pub fn is_capturing(&self) -> bool {
        self.capturing().is_some()
    }

    pub fn is_live(&self) -> bool {
        self.capturing().is_some_and(AdvancedCapture::is_live)
    }
}

/// Payload of the capture-manager event
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CaptureManagerInfo {
    pub status: CaptureManagerStatus,
    #[serde(default)]
    pub dark_maps: Vec<u32>,
}

/// Step counter pushed while a capture runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureProgress {
    pub message: String,
    pub current_step: u32,
    pub total_steps: u32,
}

impl CaptureProgress {
    /// Completion in percent; 0 when the total is unknown
    pub fn percent(&self) -> f32 {
        if self.total_steps == 0 {
            return 0.0;
        }
        (self.current_step as f32 / self.total_steps as f32 * 100.0).clamp(0.0, 100.0)
    }
}

/// Correction files known to the backend
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AppData {
    #[serde(default)]
    pub dark_maps_files: BTreeMap<u32, String>,
    pub defect_map: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FullWellMode {
    High,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinningMode {
    BinningUnknown,
    #[serde(rename = "x11")]
    X11,
    #[serde(rename = "x22")]
    X22,
    #[serde(rename = "x44")]
    X44,
}

/// Detector settings a frame was captured with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureSetting {
    pub exp_time: u32,
    pub dds: bool,
    pub full_well: FullWellMode,
    pub binning_mode: BinningMode,
    pub roi: Option<Vec<u32>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmartCaptureData {
    pub signal_noise_ratio: f64,
    pub background_rect: Rect,
    pub foreground_rect: Rect,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalAccumulationData {
    pub accumulated_exp_time: u32,
}

/// Capture-type specific results attached to a frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExtraData {
    SmartCaptureData(SmartCaptureData),
    SignalAccumulationData(SignalAccumulationData),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ImageMetadata {
    pub capture_settings: Option<CaptureSetting>,
    pub date_created: Option<DateTime<Utc>>,
    pub extra_info: Option<ExtraData>,
}

/// Metadata of one frame held by the backend
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ImageHandler {
    pub image_metadata: ImageMetadata,
    pub roi: Option<Annotation>,
    #[serde(default)]
    pub inverted_colours: bool,
}

/// Frames produced by one capture or one file import
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ImageStack {
    pub timestamp: Option<DateTime<Utc>>,
    pub image_handlers: Vec<ImageHandler>,
    pub capture: Option<AdvancedCapture>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Chart {
    Histogram,
    LineProfile,
}

impl Chart {
    pub fn name(self) -> &'static str {
        match self {
            Chart::Histogram => "Histogram",
            Chart::LineProfile => "LineProfile",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineProfilePoint {
    pub idx: u32,
    pub value: u32,
}

/// Data feeding a chart view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChartData {
    Histogram(Vec<u32>),
    LineProfile(Vec<LineProfilePoint>),
}

impl ChartData {
    pub fn chart(&self) -> Chart {
        match self {
            ChartData::Histogram(_) => Chart::Histogram,
            ChartData::LineProfile(_) => Chart::LineProfile,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_wire_format() {
        let capture = AdvancedCapture::live(100);
        let json = serde_json::to_value(&capture).unwrap();
        assert_eq!(json, serde_json::json!({"type": "LiveCapture", "exp_time": 100}));

        let smart: AdvancedCapture = serde_json::from_value(serde_json::json!({
            "type": "SmartCapture",
            "exp_times": [100, 250],
            "frames_per_capture": 3,
            "window_size": 5,
            "median_filtered": false
        }))
        .unwrap();
        assert_eq!(smart.kind(), CaptureKind::SmartCapture);
    }

    #[test]
    fn test_status_wire_format() {
        let status: CaptureManagerStatus = serde_json::from_str("\"Available\"").unwrap();
        assert_eq!(status, CaptureManagerStatus::Available);

        let status: CaptureManagerStatus = serde_json::from_value(serde_json::json!({
            "Capturing": {"type": "LiveCapture", "exp_time": 100}
        }))
        .unwrap();
        assert!(status.is_live());
        assert_eq!(status.capturing(), Some(&AdvancedCapture::live(100)));
    }

    #[test]
    fn test_annotation_wire_format() {
        let json = serde_json::json!({"Rect": {"width": 4, "height": 2, "pos": {"x": 1, "y": 3}}});
        let annotation: Annotation = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(
            annotation,
            Annotation::Rect(Rect {
                width: 4,
                height: 2,
                pos: Point::new(1, 3)
            })
        );
        assert_eq!(serde_json::to_value(annotation).unwrap(), json);
    }

    #[test]
    fn test_rect_from_corners_normalizes() {
        let rect = Rect::from_corners(Point::new(10, 2), Point::new(4, 8));
        assert_eq!(rect.pos, Point::new(4, 2));
        assert_eq!((rect.width, rect.height), (6, 6));
        assert!(rect.contains(Point::new(4, 2)));
        assert!(!rect.contains(Point::new(10, 2)));
    }

    #[test]
    fn test_camel_case_to_words() {
        assert_eq!(camel_case_to_words("SignalAccumulationCapture"), "Signal Accumulation Capture");
        assert_eq!(CaptureKind::LiveCapture.words(), "Live Capture");
        assert_eq!(camel_case_to_words("x"), "x");
    }

    #[test]
    fn test_progress_percent() {
        let progress = CaptureProgress {
            message: "frame".into(),
            current_step: 3,
            total_steps: 12,
        };
        assert_eq!(progress.percent(), 25.0);
        let unknown = CaptureProgress {
            total_steps: 0,
            ..progress
        };
        assert_eq!(unknown.percent(), 0.0);
    }

    #[test]
    fn test_stack_round_trip_with_extra_data() {
        let stack = ImageStack {
            timestamp: None,
            image_handlers: vec![ImageHandler {
                image_metadata: ImageMetadata {
                    capture_settings: None,
                    date_created: None,
                    extra_info: Some(ExtraData::SignalAccumulationData(SignalAccumulationData {
                        accumulated_exp_time: 300,
                    })),
                },
                roi: None,
                inverted_colours: false,
            }],
            capture: Some(AdvancedCapture::MultiCapture(MultiCapture {
                exp_times: vec![100],
                frames_per_capture: 2,
            })),
        };
        let json = serde_json::to_string(&stack).unwrap();
        assert!(json.contains("\"type\":\"SignalAccumulationData\""));
        let back: ImageStack = serde_json::from_str(&json).unwrap();
        assert_eq!(back, stack);
    }
}
