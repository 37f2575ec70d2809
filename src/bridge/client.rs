//! Typed client for the detector backend.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::bridge::{Backend, Command, EventHub, Reply, TaggedResult, UiEvent};
use crate::color::Rgb;
use crate::error::{BridgeError, CaptureError};
use crate::frame::{RawFrame, RgbaFrame};
use crate::state::data::{AdvancedCapture, Annotation, Chart};

/// Client wrapper around a backend, one method per command
#[derive(Clone)]
pub struct BackendClient {
    backend: Arc<dyn Backend>,
}

impl std::fmt::Debug for BackendClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendClient").finish_non_exhaustive()
    }
}

impl BackendClient {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    pub fn events(&self) -> &EventHub {
        self.backend.events()
    }

    async fn call_json<T: DeserializeOwned>(&self, command: Command) -> Result<T, BridgeError> {
        let name = command.name();
        debug!("-> {}", name);
        match self.backend.invoke(command).await? {
            Reply::Json(value) => serde_json::from_value(value).map_err(|e| BridgeError::Decode {
                command: name,
                reason: e.to_string(),
            }),
            Reply::Binary(_) => Err(BridgeError::Decode {
                command: name,
                reason: "expected JSON, got binary".to_string(),
            }),
        }
    }

    async fn call_unit(&self, command: Command) -> Result<(), BridgeError> {
        let name = command.name();
        debug!("-> {}", name);
        // Void commands carry no meaningful payload
        match self.backend.invoke(command).await? {
            Reply::Json(_) => Ok(()),
            Reply::Binary(_) => Err(BridgeError::Decode {
                command: name,
                reason: "expected JSON, got binary".to_string(),
            }),
        }
    }

    async fn call_capture(&self, command: Command) -> Result<(), BridgeError> {
        let result: TaggedResult<(), CaptureError> = self.call_json(command).await?;
        Result::from(result).map_err(BridgeError::Capture)
    }

    async fn call_binary(&self, command: Command) -> Result<Vec<u8>, BridgeError> {
        let name = command.name();
        debug!("-> {}", name);
        match self.backend.invoke(command).await? {
            Reply::Binary(bytes) => Ok(bytes),
            Reply::Json(_) => Err(BridgeError::Decode {
                command: name,
                reason: "expected binary, got JSON".to_string(),
            }),
        }
    }

    pub async fn startup(&self) -> Result<(), BridgeError> {
        self.call_unit(Command::Startup).await
    }

    pub async fn open_images(&self) -> Result<(), BridgeError> {
        self.call_unit(Command::OpenImages).await
    }

    pub async fn save_image(&self, stack_idx: usize, image_idx: usize) -> Result<(), BridgeError> {
        let result: TaggedResult<(), ()> = self
            .call_json(Command::SaveImage {
                stack_idx,
                image_idx,
            })
            .await?;
        Result::from(result).map_err(|()| BridgeError::CommandFailed)
    }

    pub async fn save_stack(&self, stack_idx: usize) -> Result<(), BridgeError> {
        self.call_unit(Command::SaveStack { stack_idx }).await
    }

    pub async fn remove_image_stack(&self, stack_idx: usize) -> Result<(), BridgeError> {
        self.call_unit(Command::RemoveImageStack { stack_idx }).await
    }

    /// Start a capture; returns once the backend accepted (live) or finished it
    pub async fn run_capture(&self, capture: AdvancedCapture, auto_save: bool) -> Result<(), BridgeError> {
        self.call_capture(Command::RunCapture { capture, auto_save })
            .await
    }

    pub async fn stop_capture(&self) -> Result<(), BridgeError> {
        self.call_unit(Command::StopCapture).await
    }

    /// Ask the backend to cancel the running capture via the intent event
    pub async fn cancel_capture(&self) -> Result<(), BridgeError> {
        self.backend.emit(UiEvent::CancelCapture).await
    }

    pub async fn generate_dark_maps(&self) -> Result<(), BridgeError> {
        self.call_capture(Command::GenerateDarkMaps).await
    }

    pub async fn generate_defect_map(&self) -> Result<(), BridgeError> {
        self.call_capture(Command::GenerateDefectMap).await
    }

    pub async fn histogram_equalization(&self, image_idx: usize, stack_idx: usize) -> Result<(), BridgeError> {
        self.call_unit(Command::HistogramEqualization {
            image_idx,
            stack_idx,
        })
        .await
    }

    pub async fn invert_colours(&self, image_idx: usize, stack_idx: usize) -> Result<(), BridgeError> {
        self.call_unit(Command::InvertColours {
            image_idx,
            stack_idx,
        })
        .await
    }

    pub async fn rotate(&self, image_idx: usize, stack_idx: usize, rotate_left: bool) -> Result<(), BridgeError> {
        self.call_unit(Command::Rotate {
            image_idx,
            stack_idx,
            rotate_left,
        })
        .await
    }

    pub async fn flip(&self, image_idx: usize, stack_idx: usize, vertical: bool) -> Result<(), BridgeError> {
        self.call_unit(Command::Flip {
            image_idx,
            stack_idx,
            vertical,
        })
        .await
    }

    pub async fn update_roi(
        &self,
        annotation: Annotation,
        image_idx: usize,
        stack_idx: usize,
    ) -> Result<(), BridgeError> {
        self.call_unit(Command::UpdateRoi {
            annotation,
            image_idx,
            stack_idx,
        })
        .await
    }

    /// Sample value at a pixel; `None` outside the frame
    pub async fn get_pixel_value(
        &self,
        x: u32,
        y: u32,
        stack_idx: usize,
        image_idx: usize,
    ) -> Result<Option<u16>, BridgeError> {
        self.call_json(Command::GetPixelValue {
            x,
            y,
            stack_idx,
            image_idx,
        })
        .await
    }

    pub async fn get_image_binary(
        &self,
        image_idx: usize,
        stack_idx: usize,
        resize: Option<u32>,
    ) -> Result<Option<RawFrame>, BridgeError> {
        let bytes = self
            .call_binary(Command::GetImageBinary {
                image_idx,
                stack_idx,
                resize,
            })
            .await?;
        Ok(RawFrame::parse(&bytes)?)
    }

    pub async fn get_image_binary_rgba(
        &self,
        image_idx: usize,
        stack_idx: usize,
        resize: Option<u32>,
        threshold: u16,
        colour: Rgb,
    ) -> Result<Option<RgbaFrame>, BridgeError> {
        let bytes = self
            .call_binary(Command::GetImageBinaryRgba {
                image_idx,
                stack_idx,
                resize,
                saturated_pixel_threshold: threshold,
                saturated_pixel_rgb_colour: colour.to_css(),
            })
            .await?;
        Ok(RgbaFrame::parse(&bytes)?)
    }

    /// Latest live frame, if one is waiting
    pub async fn read_stream_buffer(&self) -> Result<Option<RawFrame>, BridgeError> {
        let bytes = self.call_binary(Command::ReadStreamBuffer).await?;
        Ok(RawFrame::parse(&bytes)?)
    }

    pub async fn subscribe_chart(
        &self,
        label: String,
        image_idx: usize,
        stack_idx: usize,
        chart: Chart,
    ) -> Result<(), BridgeError> {
        self.call_unit(Command::SubscribeChart {
            label,
            image_idx,
            stack_idx,
            chart,
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Backend answering every command with a canned reply
    struct Canned {
        reply: Reply,
        seen: Mutex<Vec<Command>>,
        hub: EventHub,
    }

    #[async_trait]
    impl Backend for Canned {
        async fn invoke(&self, command: Command) -> Result<Reply, BridgeError> {
            self.seen.lock().unwrap().push(command);
            Ok(self.reply.clone())
        }

        async fn emit(&self, _event: UiEvent) -> Result<(), BridgeError> {
            Ok(())
        }

        fn events(&self) -> &EventHub {
            &self.hub
        }
    }

    fn canned(reply: Reply) -> (BackendClient, Arc<Canned>) {
        let backend = Arc::new(Canned {
            reply,
            seen: Mutex::new(Vec::new()),
            hub: EventHub::new(),
        });
        (BackendClient::new(backend.clone()), backend)
    }

    #[tokio::test]
    async fn test_capture_error_is_surfaced() {
        let (client, _) = canned(Reply::Json(serde_json::json!({
            "status": "error",
            "error": {"File2Error": {"FileNotFound": "dark_100.tif"}}
        })));
        let err = client.generate_defect_map().await.unwrap_err();
        assert!(matches!(err, BridgeError::Capture(CaptureError::File2Error(_))));
    }

    #[tokio::test]
    async fn test_save_image_failure() {
        let (client, _) = canned(Reply::Json(serde_json::json!({
            "status": "error",
            "error": null
        })));
        assert!(matches!(
            client.save_image(0, 0).await,
            Err(BridgeError::CommandFailed)
        ));
    }

    #[tokio::test]
    async fn test_rgba_request_carries_settings() {
        let frame = RgbaFrame {
            width: 1,
            height: 1,
            rgba: vec![1, 2, 3, 255],
        };
        let (client, backend) = canned(Reply::Binary(frame.encode()));
        let got = client
            .get_image_binary_rgba(2, 1, Some(300), 16000, Rgb::RED)
            .await
            .unwrap();
        assert_eq!(got, Some(frame));
        assert_eq!(
            backend.seen.lock().unwrap()[0],
            Command::GetImageBinaryRgba {
                image_idx: 2,
                stack_idx: 1,
                resize: Some(300),
                saturated_pixel_threshold: 16000,
                saturated_pixel_rgb_colour: "rgb(255, 0, 0)".into(),
            }
        );
    }

    #[tokio::test]
    async fn test_reply_kind_mismatch() {
        let (client, _) = canned(Reply::unit());
        assert!(matches!(
            client.read_stream_buffer().await,
            Err(BridgeError::Decode {
                command: "read_stream_buffer",
                ..
            })
        ));

        let (client, _) = canned(Reply::Binary(Vec::new()));
        assert_eq!(client.read_stream_buffer().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_pixel_value_null_is_none() {
        let (client, _) = canned(Reply::unit());
        assert_eq!(client.get_pixel_value(5, 10, 0, 0).await.unwrap(), None);
    }
}
