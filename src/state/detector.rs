/// Detector status store
///
/// Mirrors the capture manager's status, the exposure times for which dark
/// maps exist and the progress of the running capture. Progress and status
/// arrive on different channels: a progress event landing in any status is
/// accepted, only shown while a capture runs, and dropped whenever a capture
/// starts or ends.
use crate::state::data::{AdvancedCapture, CaptureManagerInfo, CaptureManagerStatus, CaptureProgress};

#[derive(Debug, Default)]
pub struct DetectorStore {
    status: CaptureManagerStatus,
    dark_maps: Vec<u32>,
    progress: Option<CaptureProgress>,
}

/// What clicking the capture button does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureAction {
    GenerateDarkMaps,
    GenerateDefectMap,
    OpenCaptureSettings,
    StopCapture,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaptureButton {
    pub label: String,
    pub action: Option<CaptureAction>,
    /// Completion in percent while a capture is running
    pub progress: Option<f32>,
}

impl CaptureButton {
    pub fn enabled(&self) -> bool {
        self.action.is_some()
    }
}

/// What clicking the stream button does
#[derive(Debug, Clone, PartialEq)]
pub enum StreamAction {
    Start(AdvancedCapture),
    Stop,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamButton {
    pub label: &'static str,
    pub action: Option<StreamAction>,
}

impl StreamButton {
    pub fn enabled(&self) -> bool {
        self.action.is_some()
    }
}

impl DetectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> &CaptureManagerStatus {
        &self.status
    }

    pub fn dark_maps(&self) -> &[u32] {
        &self.dark_maps
    }

    /// Apply a capture-manager event
    pub fn set_info(&mut self, info: CaptureManagerInfo) {
        self.set_status(info.status);
        self.dark_maps = info.dark_maps;
    }

    pub fn set_status(&mut self, status: CaptureManagerStatus) {
        // Progress left over from a finished capture must not carry into the next one
        if self.status.is_capturing() != status.is_capturing() {
            self.progress = None;
        }
        self.status = status;
    }

    pub fn set_progress(&mut self, progress: CaptureProgress) {
        self.progress = Some(progress);
    }

    /// Progress of the running capture
    pub fn progress(&self) -> Option<&CaptureProgress> {
        if self.status.is_capturing() {
            self.progress.as_ref()
        } else {
            None
        }
    }

    pub fn capture_button(&self) -> CaptureButton {
        let progress = self.progress().map(CaptureProgress::percent);
        match &self.status {
            CaptureManagerStatus::DetectorDisconnected => CaptureButton {
                label: "Detector Disconnected".to_string(),
                action: None,
                progress: None,
            },
            CaptureManagerStatus::DarkMapsRequired => CaptureButton {
                label: "Generate Dark Maps".to_string(),
                action: Some(CaptureAction::GenerateDarkMaps),
                progress: None,
            },
            CaptureManagerStatus::DefectMapsRequired => CaptureButton {
                label: "Generate Defect Map".to_string(),
                action: Some(CaptureAction::GenerateDefectMap),
                progress: None,
            },
            CaptureManagerStatus::Available => CaptureButton {
                label: "Advanced Capture".to_string(),
                action: Some(CaptureAction::OpenCaptureSettings),
                progress: None,
            },
            CaptureManagerStatus::Capturing(capture) => CaptureButton {
                label: format!("Running {}", capture.kind().words()),
                action: (!capture.is_live()).then_some(CaptureAction::StopCapture),
                progress,
            },
        }
    }

    /// Stream button state; `live_exp_time` is used when going live
    pub fn stream_button(&self, live_exp_time: u32) -> StreamButton {
        match &self.status {
            CaptureManagerStatus::Available => StreamButton {
                label: "Go Live",
                action: Some(StreamAction::Start(AdvancedCapture::live(live_exp_time))),
            },
            CaptureManagerStatus::Capturing(capture) if capture.is_live() => StreamButton {
                label: "Stop Live",
                action: Some(StreamAction::Stop),
            },
            CaptureManagerStatus::DetectorDisconnected
            | CaptureManagerStatus::DarkMapsRequired
            | CaptureManagerStatus::DefectMapsRequired
            | CaptureManagerStatus::Capturing(_) => StreamButton {
                label: "Go Live",
                action: None,
            },
        }
    }
}
