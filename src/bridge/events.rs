//! Event channel from the backend to the UI.
//!
//! Backends publish [`BackendEvent`]s on an [`EventHub`]; the UI holds
//! [`EventListener`]s which unregister themselves when dropped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::trace;

use crate::state::data::{AppData, CaptureManagerInfo, CaptureProgress, ChartData, ImageStack};

/// Payload of the chart-data event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartDataEvent {
    pub label: String,
    pub data: ChartData,
}

/// Push from the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum BackendEvent {
    /// A live frame is waiting in the stream buffer
    StreamCapture,
    CaptureProgress(CaptureProgress),
    CaptureManager(CaptureManagerInfo),
    /// Full replacement of the stack list
    ImageState(Vec<ImageStack>),
    AppData(AppData),
    ChartData(ChartDataEvent),
}

impl BackendEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            BackendEvent::StreamCapture => EventKind::StreamCapture,
            BackendEvent::CaptureProgress(_) => EventKind::CaptureProgress,
            BackendEvent::CaptureManager(_) => EventKind::CaptureManager,
            BackendEvent::ImageState(_) => EventKind::ImageState,
            BackendEvent::AppData(_) => EventKind::AppData,
            BackendEvent::ChartData(_) => EventKind::ChartData,
        }
    }
}

/// Event channel names used for filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    StreamCapture,
    CaptureProgress,
    CaptureManager,
    ImageState,
    AppData,
    ChartData,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::StreamCapture,
        EventKind::CaptureProgress,
        EventKind::CaptureManager,
        EventKind::ImageState,
        EventKind::AppData,
        EventKind::ChartData,
    ];

    pub fn channel(self) -> &'static str {
        match self {
            EventKind::StreamCapture => "stream-capture-event",
            EventKind::CaptureProgress => "capture-progress-event",
            EventKind::CaptureManager => "capture-manager-event",
            EventKind::ImageState => "image-state-event",
            EventKind::AppData => "app-data-event",
            EventKind::ChartData => "chart-data-event",
        }
    }
}

/// Intent sent from the UI to the backend over the event bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum UiEvent {
    CancelCapture,
}

type Subscriber = (Vec<EventKind>, mpsc::UnboundedSender<BackendEvent>);

#[derive(Default)]
struct HubInner {
    next_id: u64,
    listeners: HashMap<u64, Subscriber>,
}

/// Fan-out of backend events to registered listeners
#[derive(Clone, Default)]
pub struct EventHub {
    inner: Arc<Mutex<HubInner>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register for a set of event kinds
    pub fn listen(&self, kinds: &[EventKind]) -> EventListener {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let id = inner.next_id;
        inner.next_id += 1;
        inner.listeners.insert(id, (kinds.to_vec(), tx));
        trace!("Listener {} registered for {:?}", id, kinds);
        EventListener {
            id,
            hub: Arc::downgrade(&self.inner),
            rx,
        }
    }

    pub fn listen_all(&self) -> EventListener {
        self.listen(&EventKind::ALL)
    }

    /// Deliver an event to every listener interested in its kind
    ///
    /// Delivery order per listener equals emission order.
    pub fn emit(&self, event: BackendEvent) {
        let kind = event.kind();
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.listeners.retain(|_, (kinds, tx)| {
            if !kinds.contains(&kind) {
                return true;
            }
            // A closed receiver means the listener is gone
            tx.send(event.clone()).is_ok()
        });
    }

    pub fn listener_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .listeners
            .len()
    }
}

/// Registration on an [`EventHub`]; unregisters on drop
pub struct EventListener {
    id: u64,
    hub: std::sync::Weak<Mutex<HubInner>>,
    rx: mpsc::UnboundedReceiver<BackendEvent>,
}

impl EventListener {
    pub async fn recv(&mut self) -> Option<BackendEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<BackendEvent> {
        self.rx.try_recv().ok()
    }
}

impl Drop for EventListener {
    fn drop(&mut self) {
        if let Some(inner) = self.hub.upgrade() {
            let mut inner = inner.lock().unwrap_or_else(PoisonError::into_inner);
            inner.listeners.remove(&self.id);
            trace!("Listener {} unregistered", self.id);
        }
    }
}

/// Stream of events of the given kinds
///
/// The listener is only registered once the stream is first polled, and is
/// released when the stream is dropped.
pub fn event_stream(hub: EventHub, kinds: Vec<EventKind>) -> impl Stream<Item = BackendEvent> {
    stream::unfold(
        (hub, kinds, None::<EventListener>),
        |(hub, kinds, listener)| async move {
            let mut listener = match listener {
                Some(listener) => listener,
                None => hub.listen(&kinds),
            };
            let event = listener.recv().await?;
            Some((event, (hub, kinds, Some(listener))))
        },
    )
}
