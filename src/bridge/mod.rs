/// Command/event bridge to the detector backend
///
/// This module handles everything that crosses the process boundary:
/// - The command set and its replies (this file)
/// - Event fan-out with RAII listeners (events.rs)
/// - A typed client over any backend (client.rs)
/// - Length-prefixed framing for remote backends (wire.rs)
/// - The TCP transport (remote.rs)
/// - An in-process simulated detector (sim/)
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::BackendConfig;
use crate::error::BridgeError;
use crate::state::data::{AdvancedCapture, Annotation, Chart};

pub mod client;
pub mod events;
pub mod remote;
pub mod sim;
pub mod wire;

pub use client::BackendClient;
pub use events::{BackendEvent, EventHub, EventKind, EventListener, UiEvent};

/// Request understood by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", content = "args", rename_all = "snake_case")]
pub enum Command {
    /// Ask the backend to re-emit its state events
    Startup,
    /// Let the backend pick and ingest image files
    OpenImages,
    SaveImage {
        stack_idx: usize,
        image_idx: usize,
    },
    SaveStack {
        stack_idx: usize,
    },
    RemoveImageStack {
        stack_idx: usize,
    },
    RunCapture {
        capture: AdvancedCapture,
        auto_save: bool,
    },
    StopCapture,
    GenerateDarkMaps,
    GenerateDefectMap,
    HistogramEqualization {
        image_idx: usize,
        stack_idx: usize,
    },
    InvertColours {
        image_idx: usize,
        stack_idx: usize,
    },
    Rotate {
        image_idx: usize,
        stack_idx: usize,
        rotate_left: bool,
    },
    Flip {
        image_idx: usize,
        stack_idx: usize,
        vertical: bool,
    },
    UpdateRoi {
        annotation: Annotation,
        image_idx: usize,
        stack_idx: usize,
    },
    GetPixelValue {
        x: u32,
        y: u32,
        stack_idx: usize,
        image_idx: usize,
    },
    GetImageBinary {
        image_idx: usize,
        stack_idx: usize,
        resize: Option<u32>,
    },
    GetImageBinaryRgba {
        image_idx: usize,
        stack_idx: usize,
        resize: Option<u32>,
        saturated_pixel_threshold: u16,
        saturated_pixel_rgb_colour: String,
    },
    ReadStreamBuffer,
    SubscribeChart {
        label: String,
        image_idx: usize,
        stack_idx: usize,
        chart: Chart,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Startup => "startup",
            Command::OpenImages => "open_images",
            Command::SaveImage { .. } => "save_image",
            Command::SaveStack { .. } => "save_stack",
            Command::RemoveImageStack { .. } => "remove_image_stack",
            Command::RunCapture { .. } => "run_capture",
            Command::StopCapture => "stop_capture",
            Command::GenerateDarkMaps => "generate_dark_maps",
            Command::GenerateDefectMap => "generate_defect_map",
            Command::HistogramEqualization { .. } => "histogram_equalization",
            Command::InvertColours { .. } => "invert_colours",
            Command::Rotate { .. } => "rotate",
            Command::Flip { .. } => "flip",
            Command::UpdateRoi { .. } => "update_roi",
            Command::GetPixelValue { .. } => "get_pixel_value",
            Command::GetImageBinary { .. } => "get_image_binary",
            Command::GetImageBinaryRgba { .. } => "get_image_binary_rgba",
            Command::ReadStreamBuffer => "read_stream_buffer",
            Command::SubscribeChart { .. } => "subscribe_chart",
        }
    }
}

/// Reply to a command
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Json(serde_json::Value),
    Binary(Vec<u8>),
}

impl Reply {
    pub fn unit() -> Self {
        Reply::Json(serde_json::Value::Null)
    }
}

/// `Result` as the backend serializes it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum TaggedResult<T, E> {
    Ok { data: T },
    Error { error: E },
}

impl<T, E> From<Result<T, E>> for TaggedResult<T, E> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(data) => TaggedResult::Ok { data },
            Err(error) => TaggedResult::Error { error },
        }
    }
}

impl<T, E> From<TaggedResult<T, E>> for Result<T, E> {
    fn from(result: TaggedResult<T, E>) -> Self {
        match result {
            TaggedResult::Ok { data } => Ok(data),
            TaggedResult::Error { error } => Err(error),
        }
    }
}

/// A detector backend reachable through commands and events
#[async_trait]
pub trait Backend: Send + Sync {
    /// Send a command and wait for its reply
    async fn invoke(&self, command: Command) -> Result<Reply, BridgeError>;

    /// Send an intent event to the backend
    async fn emit(&self, event: UiEvent) -> Result<(), BridgeError>;

    /// Hub the backend publishes its events on
    fn events(&self) -> &EventHub;
}

/// Build the backend selected by the configuration
pub fn connect(config: &BackendConfig) -> Arc<dyn Backend> {
    match config {
        BackendConfig::Simulated(sim) => {
            tracing::info!(
                "Using simulated detector ({}x{})",
                sim.width,
                sim.height
            );
            Arc::new(sim::SimBackend::new(sim.clone()))
        }
        BackendConfig::Remote(remote) => {
            tracing::info!("Using remote backend at {}", remote.address);
            Arc::new(remote::RemoteBackend::new(remote.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CaptureError;

    #[test]
    fn test_command_wire_format() {
        let json = serde_json::to_value(Command::Rotate {
            image_idx: 1,
            stack_idx: 2,
            rotate_left: true,
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "cmd": "rotate",
                "args": {"image_idx": 1, "stack_idx": 2, "rotate_left": true}
            })
        );

        let json = serde_json::to_value(Command::StopCapture).unwrap();
        assert_eq!(json, serde_json::json!({"cmd": "stop_capture"}));
    }

    #[test]
    fn test_command_names_match_wire_tags() {
        let commands = [
            Command::Startup,
            Command::GetImageBinaryRgba {
                image_idx: 0,
                stack_idx: 0,
                resize: Some(300),
                saturated_pixel_threshold: 16000,
                saturated_pixel_rgb_colour: "rgb(255, 0, 0)".into(),
            },
            Command::SubscribeChart {
                label: "Histogram-Image0-Stack0".into(),
                image_idx: 0,
                stack_idx: 0,
                chart: Chart::Histogram,
            },
            Command::RemoveImageStack { stack_idx: 3 },
        ];
        for command in commands {
            let json = serde_json::to_value(&command).unwrap();
            assert_eq!(json["cmd"], command.name());
        }
    }

    #[test]
    fn test_tagged_result() {
        let err: TaggedResult<(), CaptureError> = serde_json::from_value(serde_json::json!({
            "status": "error",
            "error": "DetectorInUse"
        }))
        .unwrap();
        assert_eq!(Result::from(err), Err(CaptureError::DetectorInUse));

        let ok: TaggedResult<(), CaptureError> = Ok(()).into();
        assert_eq!(
            serde_json::to_value(ok).unwrap(),
            serde_json::json!({"status": "ok", "data": null})
        );
    }
}
