//! In-process simulated detector.
//!
//! Honours the full command and event contract so the UI can run without
//! hardware. Frames are synthetic but go through the same dark and defect
//! correction a real detector pipeline would apply.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bridge::events::ChartDataEvent;
use crate::bridge::{Backend, BackendEvent, Command, EventHub, Reply, TaggedResult, UiEvent};
use crate::color::{self, Rgb, MAX_14BIT};
use crate::config::SimConfig;
use crate::error::{BridgeError, CaptureError, CorrectionError};
use crate::frame::{RawFrame, RgbaFrame};
use crate::state::data::{
    AdvancedCapture, AppData, BinningMode, CaptureManagerInfo, CaptureManagerStatus,
    CaptureProgress, CaptureSetting, Chart, ChartData, DarkMapCapture, ExtraData, FullWellMode,
    ImageHandler, ImageMetadata, ImageStack, MultiCapture, SignalAccumulationCapture,
    SignalAccumulationData, SmartCapture, SmartCaptureData,
};

pub mod processing;

use processing::Frame;

const MEDIAN_WINDOW: u32 = 3;

fn dark_map_file(exp_time: u32) -> String {
    format!("DarkMap_{}ms.tif", exp_time)
}

const DEFECT_MAP_FILE: &str = "DefectMap.tif";

fn missing(file: String) -> CaptureError {
    CaptureError::File2Error(CorrectionError::FileNotFound(file))
}

struct SimImage {
    raw: Frame,
    lut: Option<Vec<u16>>,
    handler: ImageHandler,
    /// Chart subscriptions as (label, chart)
    charts: Vec<(String, Chart)>,
}

impl SimImage {
    fn new(raw: Frame, capture_settings: Option<CaptureSetting>, extra_info: Option<ExtraData>) -> Self {
        Self {
            raw,
            lut: None,
            handler: ImageHandler {
                image_metadata: ImageMetadata {
                    capture_settings,
                    date_created: Some(Utc::now()),
                    extra_info,
                },
                roi: None,
                inverted_colours: false,
            },
            charts: Vec::new(),
        }
    }

    fn captured(raw: Frame, exp_time: u32, extra_info: Option<ExtraData>) -> Self {
        let settings = CaptureSetting {
            exp_time,
            dds: false,
            full_well: FullWellMode::High,
            binning_mode: BinningMode::X11,
            roi: None,
        };
        Self::new(raw, Some(settings), extra_info)
    }

    fn rendered(&self) -> Frame {
        processing::render(&self.raw, self.lut.as_deref(), self.handler.inverted_colours)
    }

    fn chart_data(&self, chart: Chart) -> Option<ChartData> {
        let shown = self.rendered();
        match (chart, &self.handler.roi) {
            (Chart::Histogram, Some(roi)) => Some(ChartData::Histogram(processing::histogram(
                processing::roi_values(&shown, roi),
                u32::from(MAX_14BIT),
                processing::HISTOGRAM_BINS,
            ))),
            (Chart::Histogram, None) => Some(ChartData::Histogram(processing::histogram(
                shown.iter().copied(),
                u32::from(MAX_14BIT),
                processing::HISTOGRAM_BINS,
            ))),
            (Chart::LineProfile, Some(roi)) => Some(ChartData::LineProfile(processing::line_profile(&shown, roi))),
            (Chart::LineProfile, None) => None,
        }
    }
}

struct SimStack {
    timestamp: chrono::DateTime<Utc>,
    capture: Option<AdvancedCapture>,
    images: Vec<SimImage>,
}

impl SimStack {
    fn to_wire(&self) -> ImageStack {
        ImageStack {
            timestamp: Some(self.timestamp),
            image_handlers: self.images.iter().map(|i| i.handler.clone()).collect(),
            capture: self.capture.clone(),
        }
    }
}

#[derive(Default)]
struct SimState {
    status: CaptureManagerStatus,
    dark_maps: BTreeMap<u32, Frame>,
    defects: Option<Vec<(u32, u32)>>,
    stacks: Vec<SimStack>,
    stream_buffer: Option<Frame>,
    seq: u64,
}

impl SimState {
    /// Status to return to when no capture is running
    fn settled(&self) -> CaptureManagerStatus {
        if self.dark_maps.is_empty() {
            CaptureManagerStatus::DarkMapsRequired
        } else if self.defects.is_none() {
            CaptureManagerStatus::DefectMapsRequired
        } else {
            CaptureManagerStatus::Available
        }
    }

    fn info(&self) -> CaptureManagerInfo {
        CaptureManagerInfo {
            status: self.status.clone(),
            dark_maps: self.dark_maps.keys().copied().collect(),
        }
    }

    fn app_data(&self) -> AppData {
        AppData {
            dark_maps_files: self
                .dark_maps
                .keys()
                .map(|&exp| (exp, dark_map_file(exp)))
                .collect(),
            defect_map: self.defects.as_ref().map(|_| DEFECT_MAP_FILE.to_string()),
        }
    }

    fn image_state(&self) -> Vec<ImageStack> {
        self.stacks.iter().map(SimStack::to_wire).collect()
    }

    fn image(&self, stack_idx: usize, image_idx: usize) -> Option<&SimImage> {
        self.stacks.get(stack_idx)?.images.get(image_idx)
    }

    fn image_mut(&mut self, stack_idx: usize, image_idx: usize) -> Option<&mut SimImage> {
        self.stacks.get_mut(stack_idx)?.images.get_mut(image_idx)
    }
}

struct Inner {
    config: SimConfig,
    hub: EventHub,
    state: Mutex<SimState>,
    cancel: watch::Sender<bool>,
    live: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

/// Simulated detector backend
pub struct SimBackend {
    inner: Arc<Inner>,
}

impl SimBackend {
    pub fn new(config: SimConfig) -> Self {
        let mut state = SimState::default();
        if config.calibrated {
            for &exp in &config.dark_map_exposures {
                let dark = processing::sensor_dark_frame(config.width, config.height, exp, 0);
                state.dark_maps.insert(exp, dark);
            }
            let defects = state
                .dark_maps
                .values()
                .flat_map(processing::defect_map)
                .collect();
            state.defects = Some(dedup(defects));
        }
        state.status = state.settled();

        let (cancel, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                config,
                hub: EventHub::new(),
                state: Mutex::new(state),
                cancel,
                live: tokio::sync::Mutex::new(None),
            }),
        }
    }

    pub fn status(&self) -> CaptureManagerStatus {
        self.inner.state().status.clone()
    }
}

fn dedup(mut positions: Vec<(u32, u32)>) -> Vec<(u32, u32)> {
    positions.sort_unstable();
    positions.dedup();
    positions
}

fn json<T: Serialize>(value: T) -> Result<Reply, BridgeError> {
    serde_json::to_value(value)
        .map(Reply::Json)
        .map_err(|e| BridgeError::Protocol(e.to_string()))
}

fn exposures(capture: &AdvancedCapture) -> (&[u32], u32) {
    match capture {
        AdvancedCapture::LiveCapture(c) => (std::slice::from_ref(&c.exp_time), 1),
        AdvancedCapture::MultiCapture(c) => (&c.exp_times, c.frames_per_capture),
        AdvancedCapture::SignalAccumulationCapture(c) => (&c.exp_times, c.frames_per_capture),
        AdvancedCapture::SmartCapture(c) => (&c.exp_times, c.frames_per_capture),
        AdvancedCapture::DarkMapCapture(c) => (&c.exp_times, c.frames_per_capture),
    }
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit_status(&self) {
        let info = self.state().info();
        self.hub.emit(BackendEvent::CaptureManager(info));
    }

    fn emit_app_data(&self) {
        let data = self.state().app_data();
        self.hub.emit(BackendEvent::AppData(data));
    }

    fn emit_image_state(&self) {
        let stacks = self.state().image_state();
        self.hub.emit(BackendEvent::ImageState(stacks));
    }

    fn progress(&self, message: String, current_step: u32, total_steps: u32) {
        self.hub.emit(BackendEvent::CaptureProgress(CaptureProgress {
            message,
            current_step,
            total_steps,
        }));
    }

    fn startup(&self) {
        info!("Backend startup, re-emitting state");
        self.emit_status();
        self.emit_app_data();
        self.emit_image_state();
    }

    /// Wait one frame period; false once the capture was cancelled
    async fn pause(&self) -> bool {
        let mut cancel = self.cancel.subscribe();
        if *cancel.borrow() {
            return false;
        }
        tokio::select! {
            _ = cancel.wait_for(|cancelled| *cancelled) => false,
            _ = tokio::time::sleep(Duration::from_millis(self.config.frame_delay_ms)) => {
                !*self.cancel.borrow()
            }
        }
    }

    fn next_seq(&self) -> u64 {
        let mut state = self.state();
        state.seq += 1;
        state.seq
    }

    /// Expose one corrected frame
    fn capture_frame(&self, exp_time: u32) -> Frame {
        let seq = self.next_seq();
        let raw = processing::sensor_frame(self.config.width, self.config.height, exp_time, seq);
        let state = self.state();
        match state.dark_maps.get(&exp_time) {
            Some(dark) => processing::correct(&raw, dark, state.defects.as_deref().unwrap_or(&[])),
            None => raw,
        }
    }

    fn capture_dark_frame(&self, exp_time: u32) -> Frame {
        let seq = self.next_seq();
        processing::sensor_dark_frame(self.config.width, self.config.height, exp_time, seq)
    }

    /// Validate a capture request and move to `Capturing`
    fn begin(&self, capture: &AdvancedCapture) -> Result<(), CaptureError> {
        let mut state = self.state();
        let is_dark_capture = matches!(capture, AdvancedCapture::DarkMapCapture(_));
        match &state.status {
            CaptureManagerStatus::DetectorDisconnected => return Err(CaptureError::DetectorDisconnected),
            CaptureManagerStatus::Capturing(_) => return Err(CaptureError::DetectorInUse),
            CaptureManagerStatus::DarkMapsRequired if !is_dark_capture => {
                return Err(missing(dark_map_file(exposures(capture).0.first().copied().unwrap_or(0))))
            }
            CaptureManagerStatus::DefectMapsRequired if !is_dark_capture => {
                return Err(missing(DEFECT_MAP_FILE.to_string()))
            }
            _ => {}
        }

        let (exp_times, frames) = exposures(capture);
        if exp_times.is_empty() || frames == 0 {
            return Err(CaptureError::SLError("capture has no frames to take".to_string()));
        }
        if !is_dark_capture {
            if let Some(&exp) = exp_times.iter().find(|exp| !state.dark_maps.contains_key(exp)) {
                return Err(missing(dark_map_file(exp)));
            }
        }
        if let AdvancedCapture::SmartCapture(smart) = capture {
            let (width, height) = (self.config.width, self.config.height);
            if smart.window_size == 0 || smart.window_size > width || smart.window_size > height {
                return Err(CaptureError::SLError(format!(
                    "window size {} does not fit a {}x{} frame",
                    smart.window_size, width, height
                )));
            }
        }

        state.status = CaptureManagerStatus::Capturing(capture.clone());
        drop(state);
        self.cancel.send_replace(false);
        self.emit_status();
        Ok(())
    }

    /// Leave `Capturing`, storing the captured images as a new stack
    fn finish(&self, capture: AdvancedCapture, images: Option<Vec<SimImage>>, auto_save: bool) {
        let mut added = false;
        {
            let mut state = self.state();
            if let Some(images) = images.filter(|images| !images.is_empty()) {
                info!("{} finished with {} image(s)", capture.kind().words(), images.len());
                state.stacks.push(SimStack {
                    timestamp: Utc::now(),
                    capture: Some(capture),
                    images,
                });
                added = true;
            }
            state.status = state.settled();
        }

        if added {
            if auto_save {
                let last = self.state().stacks.len() - 1;
                self.save_stack(last);
            }
            self.emit_image_state();
        }
        self.emit_status();
    }

    async fn run_capture(self: &Arc<Self>, capture: AdvancedCapture, auto_save: bool) -> Result<(), CaptureError> {
        // Held across spawn so stop_capture cannot miss the handle
        let mut live = self.live.lock().await;
        self.begin(&capture)?;

        let images = match &capture {
            AdvancedCapture::LiveCapture(c) => {
                let inner = self.clone();
                *live = Some(tokio::spawn(inner.live_loop(c.exp_time)));
                return Ok(());
            }
            AdvancedCapture::MultiCapture(c) => {
                drop(live);
                self.multi_capture(c).await
            }
            AdvancedCapture::SignalAccumulationCapture(c) => {
                drop(live);
                self.signal_accumulation(c).await
            }
            AdvancedCapture::SmartCapture(c) => {
                drop(live);
                self.smart_capture(c).await
            }
            AdvancedCapture::DarkMapCapture(c) => {
                drop(live);
                self.dark_map_capture(c).await;
                None
            }
        };
        self.finish(capture, images, auto_save);
        Ok(())
    }

    async fn live_loop(self: Arc<Self>, exp_time: u32) {
        info!("Live capture started at {}ms", exp_time);
        while self.pause().await {
            let frame = self.capture_frame(exp_time);
            self.state().stream_buffer = Some(frame);
            self.hub.emit(BackendEvent::StreamCapture);
        }
        info!("Live capture stopped");
        {
            let mut state = self.state();
            state.status = state.settled();
        }
        self.emit_status();
    }

    async fn multi_capture(&self, capture: &MultiCapture) -> Option<Vec<SimImage>> {
        let total = capture.exp_times.len() as u32 * capture.frames_per_capture;
        let mut images = Vec::with_capacity(total as usize);
        for &exp_time in &capture.exp_times {
            for _ in 0..capture.frames_per_capture {
                if !self.pause().await {
                    return None;
                }
                images.push(SimImage::captured(self.capture_frame(exp_time), exp_time, None));
                self.progress(
                    format!("Captured image at {}ms", exp_time),
                    images.len() as u32,
                    total,
                );
            }
        }
        Some(images)
    }

    async fn signal_accumulation(&self, capture: &SignalAccumulationCapture) -> Option<Vec<SimImage>> {
        let total = capture.exp_times.len() as u32 * capture.frames_per_capture;
        let mut images: Vec<SimImage> = Vec::with_capacity(total as usize);
        let mut accumulated_exp_time = 0;
        for &exp_time in &capture.exp_times {
            for _ in 0..capture.frames_per_capture {
                if !self.pause().await {
                    return None;
                }
                let mut frame = self.capture_frame(exp_time);
                if let Some(previous) = images.last() {
                    frame = processing::accumulate(&previous.raw, &frame);
                }
                accumulated_exp_time += exp_time;
                let extra = ExtraData::SignalAccumulationData(SignalAccumulationData { accumulated_exp_time });
                images.push(SimImage::captured(frame, exp_time, Some(extra)));
                self.progress(
                    format!("Accumulated {}ms of signal", accumulated_exp_time),
                    images.len() as u32,
                    total,
                );
            }
        }
        Some(images)
    }

    async fn smart_capture(&self, capture: &SmartCapture) -> Option<Vec<SimImage>> {
        let total = capture.exp_times.len() as u32 * capture.frames_per_capture;
        let mut best: Option<SimImage> = None;
        let mut best_snr = f64::MIN;
        let mut step = 0;
        for &exp_time in &capture.exp_times {
            for _ in 0..capture.frames_per_capture {
                if !self.pause().await {
                    return None;
                }
                let mut frame = self.capture_frame(exp_time);
                if capture.median_filtered {
                    frame = processing::median_filter(&frame, MEDIAN_WINDOW);
                }
                step += 1;
                let Some((snr, background_rect, foreground_rect)) = processing::snr(&frame, capture.window_size) else {
                    continue;
                };
                debug!("Smart capture frame at {}ms has SNR {:.3}", exp_time, snr);
                if snr > best_snr {
                    best_snr = snr;
                    let extra = ExtraData::SmartCaptureData(SmartCaptureData {
                        signal_noise_ratio: snr,
                        background_rect,
                        foreground_rect,
                    });
                    best = Some(SimImage::captured(frame, exp_time, Some(extra)));
                }
                self.progress(format!("Best SNR so far {:.3}", best_snr), step, total);
            }
        }
        best.map(|image| vec![image])
    }

    async fn dark_map_capture(&self, capture: &DarkMapCapture) {
        let total = capture.exp_times.len() as u32 * capture.frames_per_capture;
        let mut step = 0;
        for &exp_time in &capture.exp_times {
            let mut frames = Vec::with_capacity(capture.frames_per_capture as usize);
            for _ in 0..capture.frames_per_capture {
                if !self.pause().await {
                    return;
                }
                frames.push(self.capture_dark_frame(exp_time));
                step += 1;
                self.progress(format!("Capturing dark map at {}ms", exp_time), step, total);
            }
            if let Some(dark) = processing::average(&frames) {
                self.state().dark_maps.insert(exp_time, dark);
                self.emit_app_data();
            }
        }
    }

    async fn generate_dark_maps(self: &Arc<Self>) -> Result<(), CaptureError> {
        let capture = AdvancedCapture::DarkMapCapture(DarkMapCapture {
            exp_times: self.config.dark_map_exposures.clone(),
            frames_per_capture: self.config.dark_map_frames,
        });
        self.run_capture(capture, false).await
    }

    async fn generate_defect_map(&self) -> Result<(), CaptureError> {
        let darks: Vec<Frame> = {
            let state = self.state();
            match &state.status {
                CaptureManagerStatus::DetectorDisconnected => return Err(CaptureError::DetectorDisconnected),
                CaptureManagerStatus::Capturing(_) => return Err(CaptureError::DetectorInUse),
                _ => {}
            }
            state.dark_maps.values().cloned().collect()
        };
        if darks.is_empty() {
            let exp = self.config.dark_map_exposures.first().copied().unwrap_or(0);
            return Err(missing(dark_map_file(exp)));
        }

        let total = darks.len() as u32;
        let mut defects = Vec::new();
        for (step, dark) in darks.iter().enumerate() {
            tokio::time::sleep(Duration::from_millis(self.config.frame_delay_ms)).await;
            defects.extend(processing::defect_map(dark));
            self.progress("Generating defect map".to_string(), step as u32 + 1, total);
        }
        let defects = dedup(defects);
        info!("Defect map marks {} pixel(s)", defects.len());

        {
            let mut state = self.state();
            state.defects = Some(defects);
            if !state.status.is_capturing() {
                state.status = state.settled();
            }
        }
        self.emit_app_data();
        self.emit_status();
        Ok(())
    }

    async fn stop_capture(&self) {
        if !self.state().status.is_capturing() {
            debug!("Stop requested with no capture running");
            return;
        }
        info!("Stopping capture");
        self.cancel.send_replace(true);
        let handle = self.live.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Live capture task ended abnormally: {}", e);
            }
        }
    }

    fn open_images(&self) {
        let Some(dir) = self.config.import_dir.as_deref() else {
            warn!("No import directory configured, nothing to open");
            return;
        };
        let images = match load_images(dir) {
            Ok(images) => images,
            Err(e) => {
                warn!("Failed to read {}: {}", dir.display(), e);
                return;
            }
        };
        if images.is_empty() {
            info!("No images found in {}", dir.display());
            return;
        }
        info!("Opened {} image(s) from {}", images.len(), dir.display());
        self.state().stacks.push(SimStack {
            timestamp: Utc::now(),
            capture: None,
            images,
        });
        self.emit_image_state();
    }

    fn save_image(&self, stack_idx: usize, image_idx: usize) -> Result<(), ()> {
        let Some(dir) = self.config.save_dir.as_deref() else {
            warn!("No save directory configured, image {} of stack {} not written", image_idx, stack_idx);
            return Err(());
        };
        let Some(raw) = self.state().image(stack_idx, image_idx).map(|image| image.raw.clone()) else {
            warn!("Cannot save missing image {} of stack {}", image_idx, stack_idx);
            return Err(());
        };
        let path = dir.join(format!("stack{}_image{}.png", stack_idx, image_idx));
        std::fs::create_dir_all(dir)
            .map_err(|e| e.to_string())
            .and_then(|()| raw.save(&path).map_err(|e| e.to_string()))
            .map_err(|e| warn!("Failed to save {}: {}", path.display(), e))?;
        info!("Saved {}", path.display());
        Ok(())
    }

    fn save_stack(&self, stack_idx: usize) {
        if self.config.save_dir.is_none() {
            warn!("No save directory configured, stack {} not written", stack_idx);
            return;
        }
        let count = match self.state().stacks.get(stack_idx) {
            Some(stack) => stack.images.len(),
            None => {
                warn!("Cannot save missing stack {}", stack_idx);
                return;
            }
        };
        for image_idx in 0..count {
            // Failures are logged per image
            let _ = self.save_image(stack_idx, image_idx);
        }
    }

    fn remove_image_stack(&self, stack_idx: usize) {
        {
            let mut state = self.state();
            if stack_idx >= state.stacks.len() {
                warn!("Cannot remove missing stack {}", stack_idx);
                return;
            }
            state.stacks.remove(stack_idx);
        }
        info!("Removed stack {}", stack_idx);
        self.emit_image_state();
    }

    /// Apply `op` to one image, then refresh its chart subscribers
    fn modify_image(&self, stack_idx: usize, image_idx: usize, op: impl FnOnce(&mut SimImage)) {
        let updates = {
            let mut state = self.state();
            let Some(image) = state.image_mut(stack_idx, image_idx) else {
                warn!("No image {} in stack {}", image_idx, stack_idx);
                return;
            };
            op(image);
            chart_updates(image)
        };
        for event in updates {
            self.hub.emit(BackendEvent::ChartData(event));
        }
    }

    fn subscribe_chart(&self, label: String, image_idx: usize, stack_idx: usize, chart: Chart) {
        let data = {
            let mut state = self.state();
            let Some(image) = state.image_mut(stack_idx, image_idx) else {
                warn!("Chart {} subscribed to missing image", label);
                return;
            };
            if !image.charts.iter().any(|(l, _)| *l == label) {
                image.charts.push((label.clone(), chart));
            }
            image.chart_data(chart)
        };
        if let Some(data) = data {
            self.hub.emit(BackendEvent::ChartData(ChartDataEvent { label, data }));
        }
    }

    fn pixel_value(&self, x: u32, y: u32, stack_idx: usize, image_idx: usize) -> Option<u16> {
        let state = self.state();
        state
            .image(stack_idx, image_idx)?
            .raw
            .get_pixel_checked(x, y)
            .map(|p| p[0])
    }

    fn image_binary(&self, image_idx: usize, stack_idx: usize, resize: Option<u32>) -> Vec<u8> {
        let shown = match self.state().image(stack_idx, image_idx) {
            Some(image) => image.rendered(),
            None => return Vec::new(),
        };
        to_raw_frame(maybe_resize(shown, resize)).encode()
    }

    fn image_binary_rgba(
        &self,
        image_idx: usize,
        stack_idx: usize,
        resize: Option<u32>,
        threshold: u16,
        colour: &str,
    ) -> Vec<u8> {
        let highlight = colour.parse::<Rgb>().unwrap_or_else(|e| {
            warn!("{}, highlighting in red", e);
            Rgb::RED
        });
        let (raw, shown) = match self.state().image(stack_idx, image_idx) {
            Some(image) => (image.raw.clone(), image.rendered()),
            None => return Vec::new(),
        };
        let raw = maybe_resize(raw, resize);
        let shown = maybe_resize(shown, resize);

        // Saturation is judged on the detector value, not the displayed one
        let mut rgba = Vec::with_capacity(raw.len() * 4);
        for (&value, &display) in raw.iter().zip(shown.iter()) {
            if color::is_saturated(value, threshold) {
                rgba.extend_from_slice(&[highlight.0[0], highlight.0[1], highlight.0[2], 255]);
            } else {
                let grey = color::convert_14bit_to_8bit(display);
                rgba.extend_from_slice(&[grey, grey, grey, 255]);
            }
        }
        RgbaFrame {
            width: raw.width(),
            height: raw.height(),
            rgba,
        }
        .encode()
    }

    fn read_stream_buffer(&self) -> Vec<u8> {
        match self.state().stream_buffer.take() {
            Some(frame) => to_raw_frame(frame).encode(),
            None => Vec::new(),
        }
    }
}

fn chart_updates(image: &SimImage) -> Vec<ChartDataEvent> {
    image
        .charts
        .iter()
        .filter_map(|(label, chart)| {
            image.chart_data(*chart).map(|data| ChartDataEvent {
                label: label.clone(),
                data,
            })
        })
        .collect()
}

fn maybe_resize(frame: Frame, resize: Option<u32>) -> Frame {
    match resize {
        Some(max_side) => processing::resize(&frame, max_side),
        None => frame,
    }
}

fn to_raw_frame(frame: Frame) -> RawFrame {
    RawFrame {
        width: frame.width(),
        height: frame.height(),
        samples: frame.into_raw(),
    }
}

fn load_images(dir: &Path) -> std::io::Result<Vec<SimImage>> {
    let mut paths: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "png" | "tif" | "tiff"))
                .unwrap_or(false)
        })
        .collect();
    paths.sort();

    let mut images = Vec::with_capacity(paths.len());
    for path in paths {
        match image::open(&path) {
            Ok(decoded) => {
                let mut frame = decoded.to_luma16();
                for value in frame.iter_mut() {
                    *value = (*value).min(MAX_14BIT);
                }
                images.push(SimImage::new(frame, None, None));
            }
            Err(e) => warn!("Skipping {}: {}", path.display(), e),
        }
    }
    Ok(images)
}

#[async_trait]
impl Backend for SimBackend {
    async fn invoke(&self, command: Command) -> Result<Reply, BridgeError> {
        debug!("sim <- {}", command.name());
        let inner = &self.inner;
        match command {
            Command::Startup => {
                inner.startup();
                Ok(Reply::unit())
            }
            Command::OpenImages => {
                inner.open_images();
                Ok(Reply::unit())
            }
            Command::SaveImage {
                stack_idx,
                image_idx,
            } => json(TaggedResult::from(inner.save_image(stack_idx, image_idx))),
            Command::SaveStack { stack_idx } => {
                inner.save_stack(stack_idx);
                Ok(Reply::unit())
            }
            Command::RemoveImageStack { stack_idx } => {
                inner.remove_image_stack(stack_idx);
                Ok(Reply::unit())
            }
            Command::RunCapture { capture, auto_save } => {
                json(TaggedResult::from(inner.run_capture(capture, auto_save).await))
            }
            Command::StopCapture => {
                inner.stop_capture().await;
                Ok(Reply::unit())
            }
            Command::GenerateDarkMaps => json(TaggedResult::from(inner.generate_dark_maps().await)),
            Command::GenerateDefectMap => json(TaggedResult::from(inner.generate_defect_map().await)),
            Command::HistogramEqualization {
                image_idx,
                stack_idx,
            } => {
                inner.modify_image(stack_idx, image_idx, |image| {
                    let lut = match &image.handler.roi {
                        Some(roi) => processing::equalize_values(processing::roi_values(&image.raw, roi)),
                        None => processing::equalize_values(image.raw.iter().copied()),
                    };
                    image.lut = Some(lut);
                });
                Ok(Reply::unit())
            }
            Command::InvertColours {
                image_idx,
                stack_idx,
            } => {
                inner.modify_image(stack_idx, image_idx, |image| {
                    image.handler.inverted_colours = !image.handler.inverted_colours;
                });
                Ok(Reply::unit())
            }
            Command::Rotate {
                image_idx,
                stack_idx,
                rotate_left,
            } => {
                inner.modify_image(stack_idx, image_idx, |image| {
                    image.raw = if rotate_left {
                        image::imageops::rotate270(&image.raw)
                    } else {
                        image::imageops::rotate90(&image.raw)
                    };
                    // The old ROI no longer lines up with the pixels
                    image.handler.roi = None;
                });
                Ok(Reply::unit())
            }
            Command::Flip {
                image_idx,
                stack_idx,
                vertical,
            } => {
                inner.modify_image(stack_idx, image_idx, |image| {
                    if vertical {
                        image::imageops::flip_vertical_in_place(&mut image.raw);
                    } else {
                        image::imageops::flip_horizontal_in_place(&mut image.raw);
                    }
                    image.handler.roi = None;
                });
                Ok(Reply::unit())
            }
            Command::UpdateRoi {
                annotation,
                image_idx,
                stack_idx,
            } => {
                inner.modify_image(stack_idx, image_idx, |image| {
                    image.handler.roi = Some(annotation);
                });
                Ok(Reply::unit())
            }
            Command::GetPixelValue {
                x,
                y,
                stack_idx,
                image_idx,
            } => json(inner.pixel_value(x, y, stack_idx, image_idx)),
            Command::GetImageBinary {
                image_idx,
                stack_idx,
                resize,
            } => Ok(Reply::Binary(inner.image_binary(image_idx, stack_idx, resize))),
            Command::GetImageBinaryRgba {
                image_idx,
                stack_idx,
                resize,
                saturated_pixel_threshold,
                saturated_pixel_rgb_colour,
            } => Ok(Reply::Binary(inner.image_binary_rgba(
                image_idx,
                stack_idx,
                resize,
                saturated_pixel_threshold,
                &saturated_pixel_rgb_colour,
            ))),
            Command::ReadStreamBuffer => Ok(Reply::Binary(inner.read_stream_buffer())),
            Command::SubscribeChart {
                label,
                image_idx,
                stack_idx,
                chart,
            } => {
                inner.subscribe_chart(label, image_idx, stack_idx, chart);
                Ok(Reply::unit())
            }
        }
    }

    async fn emit(&self, event: UiEvent) -> Result<(), BridgeError> {
        match event {
            UiEvent::CancelCapture => {
                if self.inner.state().status.is_capturing() {
                    info!("Capture cancel requested");
                    self.inner.cancel.send_replace(true);
                }
            }
        }
        Ok(())
    }

    fn events(&self) -> &EventHub {
        &self.inner.hub
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{BackendClient, EventKind};
    use crate::state::data::{Annotation, Point, Rect};

    fn config(calibrated: bool) -> SimConfig {
        SimConfig {
            width: 64,
            height: 48,
            frame_delay_ms: 1,
            dark_map_exposures: vec![10, 100],
            dark_map_frames: 2,
            calibrated,
            save_dir: None,
            import_dir: None,
        }
    }

    fn setup(calibrated: bool) -> (Arc<SimBackend>, BackendClient) {
        let backend = Arc::new(SimBackend::new(config(calibrated)));
        let client = BackendClient::new(backend.clone());
        (backend, client)
    }

    async fn capture_one_stack(client: &BackendClient) {
        let capture = AdvancedCapture::MultiCapture(MultiCapture {
            exp_times: vec![10],
            frames_per_capture: 2,
        });
        client.run_capture(capture, false).await.unwrap();
    }

    #[tokio::test]
    async fn test_live_capture_round_trip() {
        let (backend, client) = setup(true);
        assert_eq!(backend.status(), CaptureManagerStatus::Available);

        let mut frames = client.events().listen(&[EventKind::StreamCapture]);
        client.run_capture(AdvancedCapture::live(100), false).await.unwrap();
        assert_eq!(
            backend.status(),
            CaptureManagerStatus::Capturing(AdvancedCapture::live(100))
        );

        assert_eq!(frames.recv().await, Some(BackendEvent::StreamCapture));
        let frame = client.read_stream_buffer().await.unwrap().unwrap();
        assert_eq!((frame.width, frame.height), (64, 48));

        assert!(matches!(
            client.run_capture(AdvancedCapture::live(100), false).await,
            Err(BridgeError::Capture(CaptureError::DetectorInUse))
        ));

        client.stop_capture().await.unwrap();
        assert_eq!(backend.status(), CaptureManagerStatus::Available);
    }

    #[tokio::test]
    async fn test_uncalibrated_flow() {
        let (backend, client) = setup(false);
        assert_eq!(backend.status(), CaptureManagerStatus::DarkMapsRequired);
        assert!(matches!(
            client.run_capture(AdvancedCapture::live(100), false).await,
            Err(BridgeError::Capture(CaptureError::File2Error(_)))
        ));
        assert!(matches!(
            client.generate_defect_map().await,
            Err(BridgeError::Capture(CaptureError::File2Error(_)))
        ));

        client.generate_dark_maps().await.unwrap();
        assert_eq!(backend.status(), CaptureManagerStatus::DefectMapsRequired);

        client.generate_defect_map().await.unwrap();
        assert_eq!(backend.status(), CaptureManagerStatus::Available);
    }

    #[tokio::test]
    async fn test_missing_dark_map_for_exposure() {
        let (_, client) = setup(true);
        let err = client.run_capture(AdvancedCapture::live(42), false).await.unwrap_err();
        assert!(matches!(
            err,
            BridgeError::Capture(CaptureError::File2Error(CorrectionError::FileNotFound(ref f))) if f.contains("42")
        ));
    }

    #[tokio::test]
    async fn test_pixel_value_bounds() {
        let (_, client) = setup(true);
        assert_eq!(client.get_pixel_value(5, 10, 0, 0).await.unwrap(), None);

        capture_one_stack(&client).await;
        let value = client.get_pixel_value(5, 10, 0, 0).await.unwrap();
        assert!(matches!(value, Some(v) if v <= MAX_14BIT));
        assert_eq!(client.get_pixel_value(64, 10, 0, 0).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_multi_capture_emits_progress_and_stack() {
        let (backend, client) = setup(true);
        let mut events = client
            .events()
            .listen(&[EventKind::CaptureProgress, EventKind::ImageState]);

        capture_one_stack(&client).await;
        assert_eq!(backend.status(), CaptureManagerStatus::Available);

        let mut last_progress = None;
        let mut stacks = None;
        while let Some(event) = events.try_recv() {
            match event {
                BackendEvent::CaptureProgress(p) => last_progress = Some(p),
                BackendEvent::ImageState(s) => stacks = Some(s),
                _ => {}
            }
        }
        let progress = last_progress.unwrap();
        assert_eq!((progress.current_step, progress.total_steps), (2, 2));
        let stacks = stacks.unwrap();
        assert_eq!(stacks.len(), 1);
        assert_eq!(stacks[0].image_handlers.len(), 2);
    }

    #[tokio::test]
    async fn test_signal_accumulation_sums_exposure() {
        let (_, client) = setup(true);
        let mut events = client.events().listen(&[EventKind::ImageState]);
        let capture = AdvancedCapture::SignalAccumulationCapture(SignalAccumulationCapture {
            exp_times: vec![10, 100],
            frames_per_capture: 2,
        });
        client.run_capture(capture, false).await.unwrap();

        let Some(BackendEvent::ImageState(stacks)) = events.try_recv() else {
            panic!("expected image state");
        };
        let accumulated: Vec<_> = stacks[0]
            .image_handlers
            .iter()
            .map(|h| match &h.image_metadata.extra_info {
                Some(ExtraData::SignalAccumulationData(d)) => d.accumulated_exp_time,
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(accumulated, vec![10, 20, 120, 220]);
    }

    #[tokio::test]
    async fn test_smart_capture_keeps_best_frame() {
        let (_, client) = setup(true);
        let mut events = client.events().listen(&[EventKind::ImageState]);
        let capture = AdvancedCapture::SmartCapture(SmartCapture {
            exp_times: vec![10, 100],
            frames_per_capture: 2,
            window_size: 5,
            median_filtered: true,
        });
        client.run_capture(capture, false).await.unwrap();

        let Some(BackendEvent::ImageState(stacks)) = events.try_recv() else {
            panic!("expected image state");
        };
        assert_eq!(stacks[0].image_handlers.len(), 1);
        let Some(ExtraData::SmartCaptureData(data)) = &stacks[0].image_handlers[0].image_metadata.extra_info
        else {
            panic!("missing smart capture data");
        };
        assert_eq!(data.foreground_rect.width, 5);
        assert!(data.signal_noise_ratio > 0.0);

        let too_big = AdvancedCapture::SmartCapture(SmartCapture {
            exp_times: vec![10],
            frames_per_capture: 1,
            window_size: 49,
            median_filtered: false,
        });
        assert!(matches!(
            client.run_capture(too_big, false).await,
            Err(BridgeError::Capture(CaptureError::SLError(_)))
        ));
    }

    #[tokio::test]
    async fn test_chart_subscription_follows_roi() {
        let (_, client) = setup(true);
        capture_one_stack(&client).await;
        let mut charts = client.events().listen(&[EventKind::ChartData]);

        client
            .subscribe_chart("Histogram-Image0-Stack0".into(), 0, 0, Chart::Histogram)
            .await
            .unwrap();
        client
            .subscribe_chart("LineProfile-Image0-Stack0".into(), 0, 0, Chart::LineProfile)
            .await
            .unwrap();

        let Some(BackendEvent::ChartData(event)) = charts.try_recv() else {
            panic!("expected histogram data");
        };
        assert_eq!(event.label, "Histogram-Image0-Stack0");
        let ChartData::Histogram(bins) = event.data else {
            panic!("expected histogram");
        };
        assert_eq!(bins.iter().sum::<u32>(), 64 * 48);
        // No ROI yet, so no profile
        assert!(charts.try_recv().is_none());

        let roi = Annotation::Rect(Rect {
            width: 4,
            height: 2,
            pos: Point::new(1, 1),
        });
        client.update_roi(roi, 0, 0).await.unwrap();

        let mut seen = Vec::new();
        while let Some(BackendEvent::ChartData(event)) = charts.try_recv() {
            seen.push(event);
        }
        assert_eq!(seen.len(), 2);
        let profile = seen
            .iter()
            .find_map(|e| match &e.data {
                ChartData::LineProfile(points) => Some(points.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(profile.iter().map(|p| p.idx).collect::<Vec<_>>(), vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_image_operations() {
        let (_, client) = setup(true);
        capture_one_stack(&client).await;

        let before = client.get_image_binary(0, 0, None).await.unwrap().unwrap();
        client.invert_colours(0, 0).await.unwrap();
        let inverted = client.get_image_binary(0, 0, None).await.unwrap().unwrap();
        assert_eq!(inverted.samples[0], MAX_14BIT - before.samples[0]);

        client.rotate(0, 0, true).await.unwrap();
        let rotated = client.get_image_binary(0, 0, None).await.unwrap().unwrap();
        assert_eq!((rotated.width, rotated.height), (48, 64));

        let thumb = client
            .get_image_binary_rgba(0, 0, Some(32), 16000, Rgb::RED)
            .await
            .unwrap()
            .unwrap();
        assert_eq!((thumb.width, thumb.height), (24, 32));
        assert_eq!(thumb.rgba.len(), 24 * 32 * 4);

        assert_eq!(client.get_image_binary(3, 0, None).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_save_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(true);
        cfg.save_dir = Some(dir.path().to_path_buf());
        let backend = Arc::new(SimBackend::new(cfg));
        let client = BackendClient::new(backend.clone());

        capture_one_stack(&client).await;
        client.save_image(0, 1).await.unwrap();
        assert!(dir.path().join("stack0_image1.png").exists());
        assert!(matches!(
            client.save_image(0, 5).await,
            Err(BridgeError::CommandFailed)
        ));

        let mut events = client.events().listen(&[EventKind::ImageState]);
        client.remove_image_stack(0).await.unwrap();
        assert_eq!(events.try_recv(), Some(BackendEvent::ImageState(Vec::new())));
    }

    #[tokio::test]
    async fn test_save_without_directory_fails() {
        let (_backend, client) = setup(true);
        capture_one_stack(&client).await;
        assert!(matches!(
            client.save_image(0, 0).await,
            Err(BridgeError::CommandFailed)
        ));
        // Stack saves are logged, not reported
        client.save_stack(0).await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_intent_stops_live() {
        let (backend, client) = setup(true);
        let mut status = client.events().listen(&[EventKind::CaptureManager]);
        client.run_capture(AdvancedCapture::live(10), false).await.unwrap();
        client.cancel_capture().await.unwrap();

        loop {
            match status.recv().await {
                Some(BackendEvent::CaptureManager(info)) if info.status == CaptureManagerStatus::Available => break,
                Some(_) => continue,
                None => panic!("event hub closed"),
            }
        }
        assert_eq!(backend.status(), CaptureManagerStatus::Available);
    }
}
