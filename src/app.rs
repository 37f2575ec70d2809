//! Application state, message handling and the main window.
//!
//! All stores are plain values owned by [`App`]. Backend calls run as iced
//! tasks and report back through [`Message`]; backend events arrive through
//! subscriptions.

use std::collections::HashMap;
use std::future::Future;

use futures::stream::{self, Stream};
use iced::keyboard::{self, key::Named, Key, Modifiers};
use iced::widget::image::Handle;
use iced::widget::{canvas, center, column, container, opaque, row, stack};
use iced::{Color, Element, Length, Subscription, Task, Theme};
use tracing::{debug, info, warn};

use crate::bridge::events::event_stream;
use crate::bridge::{self, BackendClient, BackendEvent, EventHub, EventKind, EventListener};
use crate::config::AppConfig;
use crate::error::BridgeError;
use crate::frame::{RawFrame, RgbaFrame};
use crate::state::annotation::{AnnotationDraft, DrawMode};
use crate::state::capture_form::CaptureForm;
use crate::state::charts::ChartWindows;
use crate::state::data::{Annotation, AppData, Chart, ExtraData};
use crate::state::detector::{CaptureAction, DetectorStore, StreamAction};
use crate::state::images::{FetchTicket, HandlerEdit, ImageStore};
use crate::state::settings::SettingsStore;
use crate::state::viewport::Viewport;
use crate::ui::canvas::{Viewer, ViewerMessage};
use crate::ui::capture_settings::{self, FormMessage};
use crate::ui::overlay::{self, Hover};
use crate::ui::settings_form::{self, SettingsDraft, SettingsMessage};
use crate::ui::{charts, controls, image_list};

/// Event kinds handled by the always-on subscription
const STATE_EVENTS: [EventKind; 5] = [
    EventKind::CaptureProgress,
    EventKind::CaptureManager,
    EventKind::ImageState,
    EventKind::AppData,
    EventKind::ChartData,
];

/// Modal dialog on top of the main window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Panel {
    #[default]
    None,
    CaptureSettings,
    Settings,
}

/// Pixel lookup captured at issue time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelQuery {
    pub stack_idx: usize,
    pub image_idx: usize,
    pub x: u32,
    pub y: u32,
}

#[derive(Debug, Clone)]
pub enum Message {
    /// The state listener is registered; safe to ask for a state replay
    EventsReady,
    Backend(BackendEvent),
    Done {
        command: &'static str,
        result: Result<(), BridgeError>,
    },
    /// A command changed one frame; `refresh` refetches its pixels
    Edited {
        command: &'static str,
        target: (usize, usize),
        edit: Option<HandlerEdit>,
        refresh: bool,
        result: Result<(), BridgeError>,
    },
    CaptureDone(Result<(), BridgeError>),
    StreamStarted(Result<(), BridgeError>),
    StreamFrameRead(Result<Option<RawFrame>, BridgeError>),
    FrameLoaded(FetchTicket, Result<Option<RgbaFrame>, BridgeError>),
    ThumbnailLoaded {
        generation: u64,
        stack_idx: usize,
        result: Result<Option<RgbaFrame>, BridgeError>,
    },
    PixelValue(PixelQuery, Result<Option<u16>, BridgeError>),
    Viewer(ViewerMessage),
    SelectStack(usize),
    NextImage,
    PreviousImage,
    OpenImages,
    SaveImage,
    SaveStack(usize),
    RemoveStack(usize),
    Invert,
    Equalize,
    Rotate { left: bool },
    Flip { vertical: bool },
    SelectAll,
    DrawMode(DrawMode),
    CaptureClicked,
    StreamClicked,
    OpenChart(Chart),
    CloseChart(String),
    ShowPanel(Panel),
    Form(FormMessage),
    Settings(SettingsMessage),
}

pub struct App {
    client: BackendClient,
    live_exp_time: u32,
    thumbnail_size: u32,
    images: ImageStore,
    detector: DetectorStore,
    settings: SettingsStore,
    charts: ChartWindows,
    form: CaptureForm,
    form_error: Option<String>,
    settings_draft: SettingsDraft,
    app_data: AppData,
    viewport: Viewport,
    draft: AnnotationDraft,
    draw_mode: DrawMode,
    panel: Panel,
    /// Texture of the frame on screen
    frame: Option<Handle>,
    thumbnails: HashMap<usize, Handle>,
    thumbnail_generation: u64,
    hover: Option<Hover>,
    stream_read_pending: bool,
    /// Latest failure shown in the status line
    error: Option<String>,
}

fn handle(frame: &RgbaFrame) -> Handle {
    Handle::from_rgba(frame.width, frame.height, frame.rgba.clone())
}

/// Backend events, preceded by `EventsReady` once the listener exists
fn state_events(hub: EventHub) -> impl Stream<Item = Message> {
    stream::unfold(
        (hub, None::<EventListener>),
        |(hub, listener)| async move {
            match listener {
                None => {
                    let listener = hub.listen(&STATE_EVENTS);
                    Some((Message::EventsReady, (hub, Some(listener))))
                }
                Some(mut listener) => {
                    let event = listener.recv().await?;
                    Some((Message::Backend(event), (hub, Some(listener))))
                }
            }
        },
    )
}

/// Keyboard shortcuts
pub fn key_message(key: Key, modifiers: Modifiers) -> Option<Message> {
    match key.as_ref() {
        Key::Named(Named::ArrowRight) => Some(Message::NextImage),
        Key::Named(Named::ArrowLeft) => Some(Message::PreviousImage),
        Key::Character(c) if modifiers.control() => match c {
            "s" => Some(Message::SaveImage),
            "a" => Some(Message::SelectAll),
            _ => None,
        },
        Key::Character("i") => Some(Message::Invert),
        Key::Character("r") => Some(Message::Equalize),
        Key::Character("s") => Some(Message::ShowPanel(Panel::CaptureSettings)),
        Key::Character("h") => Some(Message::OpenChart(Chart::Histogram)),
        Key::Character("k") => Some(Message::OpenChart(Chart::LineProfile)),
        _ => None,
    }
}

impl App {
    pub fn new(config: AppConfig) -> (Self, Task<Message>) {
        let client = BackendClient::new(bridge::connect(&config.backend));
        let settings = SettingsStore::new(config.settings);
        let settings_draft = SettingsDraft::from_store(&settings);

        let app = App {
            client,
            live_exp_time: config.live_exp_time,
            thumbnail_size: config.thumbnail_size,
            images: ImageStore::new(),
            detector: DetectorStore::new(),
            settings,
            charts: ChartWindows::new(),
            form: CaptureForm::default(),
            form_error: None,
            settings_draft,
            app_data: AppData::default(),
            viewport: Viewport::default(),
            draft: AnnotationDraft::default(),
            draw_mode: DrawMode::default(),
            panel: Panel::None,
            frame: None,
            thumbnails: HashMap::new(),
            thumbnail_generation: 0,
            hover: None,
            stream_read_pending: false,
            error: None,
        };
        // Startup is sent once the event listener is in place
        (app, Task::none())
    }

    /// Run a unit command in the background
    fn command<F, Fut>(&self, command: &'static str, call: F) -> Task<Message>
    where
        F: FnOnce(BackendClient) -> Fut,
        Fut: Future<Output = Result<(), BridgeError>> + Send + 'static,
    {
        Task::perform(call(self.client.clone()), move |result| Message::Done { command, result })
    }

    /// Run a command that changes the frame at `target` (stack, image)
    fn edit_command<F, Fut>(
        &self,
        command: &'static str,
        target: (usize, usize),
        edit: Option<HandlerEdit>,
        refresh: bool,
        call: F,
    ) -> Task<Message>
    where
        F: FnOnce(BackendClient, usize, usize) -> Fut,
        Fut: Future<Output = Result<(), BridgeError>> + Send + 'static,
    {
        let (stack_idx, image_idx) = target;
        Task::perform(call(self.client.clone(), image_idx, stack_idx), move |result| {
            Message::Edited {
                command,
                target,
                edit,
                refresh,
                result,
            }
        })
    }

    /// The selected (stack, image) when a stored frame is on screen
    fn selection(&self) -> Option<(usize, usize)> {
        (!self.images.is_streaming() && self.images.has_selection())
            .then(|| (self.images.stack_idx(), self.images.image_idx()))
    }

    fn fetch_current(&mut self) -> Task<Message> {
        let Some(ticket) = self.images.request_current() else {
            return Task::none();
        };
        let client = self.client.clone();
        let threshold = self.settings.threshold();
        let colour = self.settings.colour();
        Task::perform(
            async move {
                client
                    .get_image_binary_rgba(ticket.image_idx, ticket.stack_idx, None, threshold, colour)
                    .await
            },
            move |result| Message::FrameLoaded(ticket, result),
        )
    }

    fn fetch_thumbnail(&self, stack_idx: usize) -> Task<Message> {
        let client = self.client.clone();
        let generation = self.thumbnail_generation;
        let size = self.thumbnail_size;
        let threshold = self.settings.threshold();
        let colour = self.settings.colour();
        Task::perform(
            async move {
                client
                    .get_image_binary_rgba(0, stack_idx, Some(size), threshold, colour)
                    .await
            },
            move |result| Message::ThumbnailLoaded {
                generation,
                stack_idx,
                result,
            },
        )
    }

    fn refresh_thumbnails(&mut self) -> Task<Message> {
        self.thumbnail_generation += 1;
        self.thumbnails.clear();
        Task::batch((0..self.images.stacks().len()).map(|idx| self.fetch_thumbnail(idx)))
    }

    /// Put the store's current frame on screen
    fn show_frame(&mut self) {
        match self.images.current_frame() {
            Some(frame) => {
                if self.viewport.scene_changed(frame.width, frame.height) {
                    self.viewport.set_scene_size(frame.width, frame.height);
                }
                self.frame = Some(handle(frame));
            }
            None => self.frame = None,
        }
    }

    fn selection_changed(&mut self) -> Task<Message> {
        self.hover = None;
        self.draft.clear();
        self.draft
            .load(self.images.current_handler().and_then(|handler| handler.roi));
        self.fetch_current()
    }

    fn report(&mut self, what: &str, error: BridgeError) {
        warn!("{} failed: {}", what, error);
        self.error = Some(format!("{}: {}", what, error));
    }

    fn set_streaming(&mut self, streaming: bool) -> Task<Message> {
        if self.images.is_streaming() == streaming {
            return Task::none();
        }
        info!("Streaming {}", if streaming { "on" } else { "off" });
        self.images.set_streaming(streaming);
        self.hover = None;
        if streaming {
            Task::none()
        } else {
            self.selection_changed()
        }
    }

    fn handle_event(&mut self, event: BackendEvent) -> Task<Message> {
        debug!("<- {}", event.kind().channel());
        match event {
            BackendEvent::CaptureProgress(progress) => {
                self.detector.set_progress(progress);
                Task::none()
            }
            BackendEvent::CaptureManager(info) => {
                self.detector.set_info(info);
                if self.images.is_streaming() && !self.detector.status().is_live() {
                    return self.set_streaming(false);
                }
                Task::none()
            }
            BackendEvent::ImageState(stacks) => {
                let previous = self.images.stacks().len();
                self.images.update_stacks(stacks);
                if !self.images.has_selection() {
                    self.frame = None;
                }

                let mut tasks = vec![self.refresh_thumbnails(), self.selection_changed()];
                if self.images.stacks().len() > previous && self.settings.auto_histogram_equalization() {
                    tasks.push(self.equalize_new_stack());
                }
                Task::batch(tasks)
            }
            BackendEvent::AppData(data) => {
                self.app_data = data;
                Task::none()
            }
            BackendEvent::ChartData(event) => {
                if !self.charts.apply(&event.label, event.data) {
                    debug!("Dropping chart data for {}", event.label);
                }
                Task::none()
            }
            BackendEvent::StreamCapture => {
                if !self.images.is_streaming() || self.stream_read_pending {
                    return Task::none();
                }
                self.stream_read_pending = true;
                let client = self.client.clone();
                Task::perform(async move { client.read_stream_buffer().await }, Message::StreamFrameRead)
            }
        }
    }

    /// Equalize every frame of a freshly captured stack
    fn equalize_new_stack(&self) -> Task<Message> {
        let Some(stack) = self.images.current_stack().filter(|stack| stack.capture.is_some()) else {
            return Task::none();
        };
        let stack_idx = self.images.stack_idx();
        Task::batch((0..stack.image_handlers.len()).map(|image_idx| {
            self.edit_command(
                "histogram_equalization",
                (stack_idx, image_idx),
                None,
                true,
                |client, image_idx, stack_idx| async move { client.histogram_equalization(image_idx, stack_idx).await },
            )
        }))
    }

    fn handle_viewer(&mut self, message: ViewerMessage) -> Task<Message> {
        match message {
            ViewerMessage::StageResized(width, height) => {
                self.viewport.set_stage_size(width, height);
                if let Some(frame) = self.images.current_frame() {
                    self.viewport.set_scene_size(frame.width, frame.height);
                }
            }
            ViewerMessage::Zoom { pointer, zoom_in } => self.viewport.zoom_at(pointer, zoom_in),
            ViewerMessage::Pan(delta) => self.viewport.pan(delta),
            ViewerMessage::Hover(None) => self.hover = None,
            ViewerMessage::Hover(Some((x, y))) => {
                if self.hover.is_some_and(|hover| hover.x == x && hover.y == y) {
                    return Task::none();
                }
                self.hover = Some(Hover { x, y, value: None });
                let Some((stack_idx, image_idx)) = self.selection() else {
                    return Task::none();
                };
                let query = PixelQuery {
                    stack_idx,
                    image_idx,
                    x,
                    y,
                };
                let client = self.client.clone();
                return Task::perform(
                    async move { client.get_pixel_value(x, y, stack_idx, image_idx).await },
                    move |result| Message::PixelValue(query, result),
                );
            }
            ViewerMessage::DrawStart(scene) => {
                if self.selection().is_some() {
                    self.draft.begin(self.draw_mode, scene.x, scene.y);
                }
            }
            ViewerMessage::DrawMove(scene) => {
                self.draft.update(scene.x, scene.y);
            }
            ViewerMessage::DrawEnd => {
                let (Some(annotation), Some((stack_idx, image_idx))) = (self.draft.finish(), self.selection())
                else {
                    return Task::none();
                };
                return self.update_roi(annotation, (stack_idx, image_idx));
            }
        }
        Task::none()
    }

    fn update_roi(&self, annotation: Annotation, target: (usize, usize)) -> Task<Message> {
        self.edit_command(
            "update_roi",
            target,
            Some(HandlerEdit::Roi(Some(annotation))),
            false,
            move |client, image_idx, stack_idx| async move { client.update_roi(annotation, image_idx, stack_idx).await },
        )
    }

    /// Edit the selected frame and refetch it afterwards
    fn image_command<F, Fut>(&self, command: &'static str, edit: Option<HandlerEdit>, call: F) -> Task<Message>
    where
        F: FnOnce(BackendClient, usize, usize) -> Fut,
        Fut: Future<Output = Result<(), BridgeError>> + Send + 'static,
    {
        match self.selection() {
            Some(target) => self.edit_command(command, target, edit, true, call),
            None => Task::none(),
        }
    }

    pub fn update(&mut self, message: Message) -> Task<Message> {
        match message {
            Message::EventsReady => {
                info!("Listening for backend events, requesting state");
                self.command("startup", |client| async move { client.startup().await })
            }
            Message::Backend(event) => self.handle_event(event),
            Message::Done { command, result } => {
                if let Err(e) = result {
                    self.report(command, e);
                }
                Task::none()
            }
            Message::Edited {
                command,
                target,
                edit,
                refresh,
                result,
            } => {
                if let Err(e) = result {
                    self.report(command, e);
                    return Task::none();
                }
                // Handler edits are not always followed by a new image state
                if let Some(edit) = edit {
                    self.images.apply_edit(target.0, target.1, edit);
                }
                if !refresh {
                    return Task::none();
                }
                let mut tasks = Vec::new();
                // Thumbnails show the first frame of a stack
                if target.1 == 0 {
                    tasks.push(self.fetch_thumbnail(target.0));
                }
                if self.selection() == Some(target) {
                    tasks.push(self.fetch_current());
                }
                Task::batch(tasks)
            }
            Message::CaptureDone(result) => {
                match result {
                    Ok(()) => self.error = None,
                    Err(e) => self.report("Capture", e),
                }
                Task::none()
            }
            Message::StreamStarted(result) => match result {
                Ok(()) => Task::none(),
                Err(e) => {
                    self.report("Go live", e);
                    self.set_streaming(false)
                }
            },
            Message::StreamFrameRead(result) => {
                self.stream_read_pending = false;
                match result {
                    Ok(Some(raw)) => {
                        let frame = raw.to_rgba(self.settings.threshold(), self.settings.colour());
                        if self.images.set_stream_frame(frame) {
                            self.show_frame();
                        }
                    }
                    Ok(None) => {}
                    Err(e) => debug!("Stream read failed: {}", e),
                }
                Task::none()
            }
            Message::FrameLoaded(ticket, result) => {
                match result {
                    Ok(frame) => {
                        if self.images.accept(ticket, frame) {
                            self.show_frame();
                        } else {
                            debug!("Dropping stale frame for {:?}", ticket);
                        }
                    }
                    Err(e) => self.report("Loading image", e),
                }
                Task::none()
            }
            Message::ThumbnailLoaded {
                generation,
                stack_idx,
                result,
            } => {
                match result {
                    Ok(Some(frame)) if generation == self.thumbnail_generation => {
                        self.thumbnails.insert(stack_idx, handle(&frame));
                    }
                    Ok(_) => {}
                    Err(e) => debug!("Thumbnail for stack {} failed: {}", stack_idx, e),
                }
                Task::none()
            }
            Message::PixelValue(query, result) => {
                let current = self.selection() == Some((query.stack_idx, query.image_idx));
                match (result, self.hover.as_mut()) {
                    (Ok(value), Some(hover)) if current && hover.x == query.x && hover.y == query.y => {
                        hover.value = value;
                    }
                    (Err(e), _) => debug!("Pixel lookup failed: {}", e),
                    _ => {}
                }
                Task::none()
            }
            Message::Viewer(message) => self.handle_viewer(message),
            Message::SelectStack(idx) => {
                if self.images.set_stack(idx) {
                    self.selection_changed()
                } else {
                    Task::none()
                }
            }
            Message::NextImage => {
                if self.images.increment_image() {
                    self.selection_changed()
                } else {
                    Task::none()
                }
            }
            Message::PreviousImage => {
                if self.images.decrement_image() {
                    self.selection_changed()
                } else {
                    Task::none()
                }
            }
            Message::OpenImages => {
                self.command("open_images", |client| async move { client.open_images().await })
            }
            Message::SaveImage => match self.selection() {
                Some((stack_idx, image_idx)) => self.command("save_image", move |client| async move {
                    client.save_image(stack_idx, image_idx).await
                }),
                None => Task::none(),
            },
            Message::SaveStack(stack_idx) => self.command("save_stack", move |client| async move {
                client.save_stack(stack_idx).await
            }),
            Message::RemoveStack(stack_idx) => {
                self.command("remove_image_stack", move |client| async move {
                    client.remove_image_stack(stack_idx).await
                })
            }
            Message::Invert => self.image_command(
                "invert_colours",
                Some(HandlerEdit::ToggleInverted),
                |client, image_idx, stack_idx| async move { client.invert_colours(image_idx, stack_idx).await },
            ),
            Message::Equalize => {
                self.image_command("histogram_equalization", None, |client, image_idx, stack_idx| async move {
                    client.histogram_equalization(image_idx, stack_idx).await
                })
            }
            // The backend drops the ROI of a rotated or flipped frame
            Message::Rotate { left } => {
                self.draft.clear();
                self.image_command(
                    "rotate",
                    Some(HandlerEdit::Roi(None)),
                    move |client, image_idx, stack_idx| async move { client.rotate(image_idx, stack_idx, left).await },
                )
            }
            Message::Flip { vertical } => {
                self.draft.clear();
                self.image_command(
                    "flip",
                    Some(HandlerEdit::Roi(None)),
                    move |client, image_idx, stack_idx| async move { client.flip(image_idx, stack_idx, vertical).await },
                )
            }
            Message::SelectAll => {
                let (Some((stack_idx, image_idx)), Some(frame)) = (self.selection(), self.images.current_frame())
                else {
                    return Task::none();
                };
                let annotation = self.draft.select_all(frame.width, frame.height);
                self.update_roi(annotation, (stack_idx, image_idx))
            }
            Message::DrawMode(mode) => {
                self.draw_mode = mode;
                Task::none()
            }
            Message::CaptureClicked => match self.detector.capture_button().action {
                Some(CaptureAction::GenerateDarkMaps) => {
                    let client = self.client.clone();
                    Task::perform(async move { client.generate_dark_maps().await }, Message::CaptureDone)
                }
                Some(CaptureAction::GenerateDefectMap) => {
                    let client = self.client.clone();
                    Task::perform(async move { client.generate_defect_map().await }, Message::CaptureDone)
                }
                Some(CaptureAction::OpenCaptureSettings) => {
                    self.form_error = None;
                    self.panel = Panel::CaptureSettings;
                    Task::none()
                }
                Some(CaptureAction::StopCapture) => {
                    self.command("stop_capture", |client| async move { client.stop_capture().await })
                }
                None => Task::none(),
            },
            Message::StreamClicked => match self.detector.stream_button(self.live_exp_time).action {
                Some(StreamAction::Start(capture)) => {
                    let client = self.client.clone();
                    let show = self.set_streaming(true);
                    Task::batch([
                        show,
                        Task::perform(
                            async move { client.run_capture(capture, false).await },
                            Message::StreamStarted,
                        ),
                    ])
                }
                Some(StreamAction::Stop) => {
                    let stop = self.command("stop_capture", |client| async move {
                        client.stop_capture().await
                    });
                    Task::batch([stop, self.set_streaming(false)])
                }
                None => Task::none(),
            },
            Message::OpenChart(chart) => {
                let Some((stack_idx, image_idx)) = self.selection() else {
                    return Task::none();
                };
                if chart == Chart::LineProfile && self.draft.annotation().is_none() {
                    self.error = Some("Draw a rectangle or line before opening a line profile".to_string());
                    return Task::none();
                }
                let (label, is_new) = self.charts.open(chart, image_idx, stack_idx);
                if !is_new {
                    return Task::none();
                }
                info!("Opening chart {}", label);
                self.command("subscribe_chart", move |client| async move {
                    client.subscribe_chart(label, image_idx, stack_idx, chart).await
                })
            }
            Message::CloseChart(label) => {
                self.charts.close(&label);
                Task::none()
            }
            Message::ShowPanel(panel) => {
                match panel {
                    Panel::CaptureSettings => {
                        if self.detector.capture_button().action == Some(CaptureAction::OpenCaptureSettings) {
                            self.form_error = None;
                            self.panel = panel;
                        }
                    }
                    Panel::Settings => {
                        self.settings_draft = SettingsDraft::from_store(&self.settings);
                        self.panel = panel;
                    }
                    Panel::None => self.panel = panel,
                }
                Task::none()
            }
            Message::Form(FormMessage::Cancel) => {
                self.panel = Panel::None;
                Task::none()
            }
            Message::Form(FormMessage::Submit) => match self.form.build() {
                Ok(capture) => {
                    self.panel = Panel::None;
                    self.form_error = None;
                    info!("Starting {}", capture.kind().words());
                    let client = self.client.clone();
                    let auto_save = self.settings.auto_save();
                    Task::perform(
                        async move { client.run_capture(capture, auto_save).await },
                        Message::CaptureDone,
                    )
                }
                Err(e) => {
                    self.form_error = Some(e.to_string());
                    Task::none()
                }
            },
            Message::Form(message) => {
                capture_settings::update(&mut self.form, message);
                Task::none()
            }
            Message::Settings(SettingsMessage::Close) => {
                self.panel = Panel::None;
                Task::none()
            }
            Message::Settings(message) => {
                if self.settings_draft.update(&mut self.settings, message) {
                    // Highlighting changed, rerender what is on screen
                    return Task::batch([self.fetch_current(), self.refresh_thumbnails()]);
                }
                Task::none()
            }
        }
    }

    pub fn view(&self) -> Element<Message> {
        let toolbar = controls::Toolbar {
            capture: self.detector.capture_button(),
            stream: self.detector.stream_button(self.live_exp_time),
            mode: self.draw_mode,
            has_image: self.selection().is_some(),
            has_annotation: self.draft.annotation().is_some(),
        }
        .view();

        let streaming = self.images.is_streaming();
        let metadata = self.images.current_metadata();
        let windows = metadata.and_then(|m| match &m.extra_info {
            Some(ExtraData::SmartCaptureData(data)) => Some((&data.background_rect, &data.foreground_rect)),
            _ => None,
        });
        let viewer = canvas(Viewer {
            handle: self.frame.as_ref(),
            viewport: &self.viewport,
            mode: self.draw_mode,
            drawing: self.draft.is_drawing(),
            annotation: if streaming { None } else { self.draft.annotation() },
            windows,
        })
        .width(Length::Fill)
        .height(Length::Fill);

        let frame_idx = (!streaming && self.images.has_selection()).then(|| self.images.image_idx());
        let lines = overlay::lines(frame_idx, self.hover.as_ref(), metadata);
        let viewer = stack![
            Element::from(viewer).map(Message::Viewer),
            container(overlay::view(lines)).padding(8),
        ];

        let mut main = row![viewer].spacing(6).height(Length::Fill);
        if !self.charts.is_empty() {
            main = main.push(charts::view(&self.charts));
        }

        let base = column![
            toolbar,
            main,
            image_list::view(
                self.images.stacks(),
                self.images.stack_idx(),
                &self.thumbnails,
                self.thumbnail_size,
            ),
            controls::status_line(self.detector.progress(), self.error.as_deref()),
        ]
        .spacing(4);

        let dialog: Option<Element<Message>> = match self.panel {
            Panel::None => None,
            Panel::CaptureSettings => Some(
                capture_settings::view(&self.form, self.detector.dark_maps(), self.form_error.as_deref())
                    .map(Message::Form),
            ),
            Panel::Settings => Some(
                settings_form::view(&self.settings_draft, &self.settings, &self.app_data).map(Message::Settings),
            ),
        };

        match dialog {
            Some(dialog) => stack![
                base,
                opaque(center(opaque(dialog)).style(|_theme| container::Style {
                    background: Some(Color { a: 0.6, ..Color::BLACK }.into()),
                    ..container::Style::default()
                })),
            ]
            .into(),
            None => base.into(),
        }
    }

    pub fn subscription(&self) -> Subscription<Message> {
        let hub = self.client.events().clone();
        let mut subscriptions = vec![
            Subscription::run_with_id("backend-state", state_events(hub.clone())),
            keyboard::on_key_press(key_message),
        ];
        // Only listen for live frames while streaming
        if self.images.is_streaming() {
            subscriptions.push(
                Subscription::run_with_id(
                    "backend-stream",
                    event_stream(hub, vec![EventKind::StreamCapture]),
                )
                .map(Message::Backend),
            );
        }
        Subscription::batch(subscriptions)
    }

    pub fn theme(&self) -> Theme {
        Theme::Dark
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::data::{ImageHandler, ImageStack, Line, Point};
    use cgmath::Vector2;

    fn app_with_stacks(stacks: &[usize]) -> App {
        let (mut app, _) = App::new(AppConfig::default());
        let stacks = stacks
            .iter()
            .map(|&images| ImageStack {
                image_handlers: vec![ImageHandler::default(); images],
                ..ImageStack::default()
            })
            .collect();
        let _ = app.update(Message::Backend(BackendEvent::ImageState(stacks)));
        app
    }

    fn edited(target: (usize, usize), edit: HandlerEdit, result: Result<(), BridgeError>) -> Message {
        Message::Edited {
            command: "test",
            target,
            edit: Some(edit),
            refresh: false,
            result,
        }
    }

    fn draw_line(app: &mut App, from: (f32, f32), to: (f32, f32)) -> Annotation {
        let _ = app.update(Message::DrawMode(DrawMode::Line));
        let _ = app.update(Message::Viewer(ViewerMessage::DrawStart(Vector2::new(from.0, from.1))));
        let _ = app.update(Message::Viewer(ViewerMessage::DrawMove(Vector2::new(to.0, to.1))));
        let _ = app.update(Message::Viewer(ViewerMessage::DrawEnd));
        *app.draft.annotation().unwrap()
    }

    #[test]
    fn test_drawn_roi_survives_navigation() {
        let mut app = app_with_stacks(&[2]);
        let drawn = draw_line(&mut app, (2.5, 3.5), (10.2, 8.9));
        assert_eq!(
            drawn,
            Annotation::Line(Line {
                start: Point::new(2, 3),
                finish: Point::new(10, 8),
            })
        );
        let _ = app.update(edited((0, 0), HandlerEdit::Roi(Some(drawn)), Ok(())));

        let _ = app.update(Message::NextImage);
        assert_eq!(app.draft.annotation(), None);
        let _ = app.update(Message::PreviousImage);
        assert_eq!(app.draft.annotation(), Some(&drawn));
    }

    #[test]
    fn test_rotated_frame_forgets_its_roi() {
        let mut app = app_with_stacks(&[2]);
        let drawn = draw_line(&mut app, (1.0, 1.0), (5.0, 5.0));
        let _ = app.update(edited((0, 0), HandlerEdit::Roi(Some(drawn)), Ok(())));

        let _ = app.update(Message::Rotate { left: true });
        assert_eq!(app.draft.annotation(), None);
        let _ = app.update(edited((0, 0), HandlerEdit::Roi(None), Ok(())));

        let _ = app.update(Message::NextImage);
        let _ = app.update(Message::PreviousImage);
        assert_eq!(app.draft.annotation(), None);
    }

    #[test]
    fn test_failed_edit_leaves_handler_untouched() {
        let mut app = app_with_stacks(&[1]);
        let _ = app.update(edited((0, 0), HandlerEdit::ToggleInverted, Err(BridgeError::Disconnected)));
        assert!(!app.images.current_handler().unwrap().inverted_colours);
        assert!(app.error.is_some());
    }

    #[test]
    fn test_edit_lands_on_the_targeted_stack() {
        let mut app = app_with_stacks(&[1, 1]);
        assert_eq!(app.images.stack_idx(), 1);
        let _ = app.update(edited((0, 0), HandlerEdit::ToggleInverted, Ok(())));

        assert!(!app.images.current_handler().unwrap().inverted_colours);
        let _ = app.update(Message::SelectStack(0));
        assert!(app.images.current_handler().unwrap().inverted_colours);
    }

    #[test]
    fn test_shortcuts() {
        let none = Modifiers::empty();
        assert!(matches!(
            key_message(Key::Named(Named::ArrowRight), none),
            Some(Message::NextImage)
        ));
        assert!(matches!(
            key_message(Key::Character("i".into()), none),
            Some(Message::Invert)
        ));
        assert!(matches!(
            key_message(Key::Character("s".into()), none),
            Some(Message::ShowPanel(Panel::CaptureSettings))
        ));
        assert!(matches!(
            key_message(Key::Character("s".into()), Modifiers::CTRL),
            Some(Message::SaveImage)
        ));
        assert!(matches!(
            key_message(Key::Character("a".into()), Modifiers::CTRL),
            Some(Message::SelectAll)
        ));
        assert!(matches!(
            key_message(Key::Character("k".into()), none),
            Some(Message::OpenChart(Chart::LineProfile))
        ));
        assert!(key_message(Key::Character("q".into()), none).is_none());
    }

    #[tokio::test]
    async fn test_state_events_announce_readiness_first() {
        use futures::StreamExt;

        let hub = EventHub::new();
        let mut events = Box::pin(state_events(hub.clone()));
        assert!(matches!(events.next().await, Some(Message::EventsReady)));
        assert_eq!(hub.listener_count(), 1);

        hub.emit(BackendEvent::StreamCapture);
        hub.emit(BackendEvent::AppData(AppData::default()));
        assert!(matches!(
            events.next().await,
            Some(Message::Backend(BackendEvent::AppData(_)))
        ));
    }
}
