//! TCP transport to an out-of-process backend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::bridge::events::EventHub;
use crate::bridge::wire::{self, WireMessage};
use crate::bridge::{Backend, BackendEvent, Command, Reply, UiEvent};
use crate::config::RemoteConfig;
use crate::error::BridgeError;
use crate::state::data::{CaptureManagerInfo, CaptureManagerStatus};

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Reply, BridgeError>>>>>;

/// Commands that block until a capture finishes and so are not timed out
fn is_long_running(command: &Command) -> bool {
    matches!(
        command,
        Command::RunCapture { .. } | Command::GenerateDarkMaps | Command::GenerateDefectMap | Command::OpenImages
    )
}

struct Connection {
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    pending: Pending,
    alive: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Backend reached over a TCP socket, connected on first use
pub struct RemoteBackend {
    config: RemoteConfig,
    hub: EventHub,
    connection: tokio::sync::Mutex<Option<Arc<Connection>>>,
    next_id: AtomicU64,
}

impl RemoteBackend {
    pub fn new(config: RemoteConfig) -> Self {
        Self {
            config,
            hub: EventHub::new(),
            connection: tokio::sync::Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    async fn connection(&self) -> Result<Arc<Connection>, BridgeError> {
        let mut slot = self.connection.lock().await;
        if let Some(conn) = slot.as_ref() {
            if conn.alive.load(Ordering::Acquire) {
                return Ok(conn.clone());
            }
        }

        let address = self.config.address.clone();
        let connect = timeout(
            Duration::from_millis(self.config.connect_timeout_ms),
            TcpStream::connect(&address),
        );
        let stream = match connect.await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(BridgeError::Connect {
                    address,
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(BridgeError::Connect {
                    address,
                    reason: "timed out".to_string(),
                })
            }
        };
        stream.set_nodelay(true)?;
        info!("Connected to backend at {}", address);

        let (read, write) = stream.into_split();
        let pending: Pending = Arc::default();
        let alive = Arc::new(AtomicBool::new(true));
        let reader = tokio::spawn(read_loop(read, pending.clone(), alive.clone(), self.hub.clone()));

        let conn = Arc::new(Connection {
            writer: tokio::sync::Mutex::new(write),
            pending,
            alive,
            reader,
        });
        *slot = Some(conn.clone());
        Ok(conn)
    }
}

impl Connection {
    async fn send(&self, message: &WireMessage) -> Result<(), BridgeError> {
        let mut writer = self.writer.lock().await;
        if let Err(e) = wire::write_message(&mut *writer, message).await {
            self.alive.store(false, Ordering::Release);
            return Err(e);
        }
        Ok(())
    }
}

async fn read_loop(mut read: OwnedReadHalf, pending: Pending, alive: Arc<AtomicBool>, hub: EventHub) {
    loop {
        match wire::read_message(&mut read).await {
            Ok(Some(WireMessage::Reply { id, reply })) => complete(&pending, id, Ok(reply)),
            Ok(Some(WireMessage::Error { id, message })) => {
                complete(&pending, id, Err(BridgeError::Rejected(message)))
            }
            Ok(Some(WireMessage::Event(event))) => {
                debug!("<- {:?}", event.kind());
                hub.emit(event);
            }
            Ok(Some(other)) => warn!("Ignoring unexpected {:?} from backend", other.kind()),
            Ok(None) => {
                info!("Backend closed the connection");
                break;
            }
            Err(e) => {
                warn!("Backend connection failed: {}", e);
                break;
            }
        }
    }

    alive.store(false, Ordering::Release);
    let waiting: Vec<_> = pending
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .drain()
        .collect();
    for (_, tx) in waiting {
        let _ = tx.send(Err(BridgeError::Disconnected));
    }
    hub.emit(BackendEvent::CaptureManager(CaptureManagerInfo {
        status: CaptureManagerStatus::DetectorDisconnected,
        dark_maps: Vec::new(),
    }));
}

fn complete(pending: &Pending, id: u64, result: Result<Reply, BridgeError>) {
    let tx = pending
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&id);
    match tx {
        Some(tx) => {
            let _ = tx.send(result);
        }
        None => debug!("Reply for unknown request {}", id),
    }
}

#[async_trait]
impl Backend for RemoteBackend {
    async fn invoke(&self, command: Command) -> Result<Reply, BridgeError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let long_running = is_long_running(&command);
        let (tx, rx) = oneshot::channel();

        let conn = self.connection().await?;
        conn.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, tx);
        // The reader may have drained the pending map just before the insert
        if !conn.alive.load(Ordering::Acquire) {
            conn.pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&id);
            return Err(BridgeError::Disconnected);
        }

        if let Err(e) = conn.send(&WireMessage::Request { id, command }).await {
            conn.pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&id);
            return Err(e);
        }

        let reply = if long_running {
            rx.await
        } else {
            let limit = self.config.request_timeout_ms;
            match timeout(Duration::from_millis(limit), rx).await {
                Ok(reply) => reply,
                Err(_) => {
                    conn.pending
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .remove(&id);
                    return Err(BridgeError::Timeout(limit));
                }
            }
        };
        reply.unwrap_or(Err(BridgeError::Disconnected))
    }

    async fn emit(&self, event: UiEvent) -> Result<(), BridgeError> {
        self.connection().await?.send(&WireMessage::Intent(event)).await
    }

    fn events(&self) -> &EventHub {
        &self.hub
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn config(address: String) -> RemoteConfig {
        RemoteConfig {
            address,
            request_timeout_ms: 2_000,
            connect_timeout_ms: 2_000,
        }
    }

    #[tokio::test]
    async fn test_request_reply_and_disconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = wire::read_message(&mut socket).await.unwrap().unwrap();
            let WireMessage::Request { id, command } = request else {
                panic!("expected a request");
            };
            assert_eq!(command, Command::GetPixelValue { x: 5, y: 10, stack_idx: 0, image_idx: 0 });
            wire::write_message(&mut socket, &WireMessage::Event(BackendEvent::StreamCapture))
                .await
                .unwrap();
            wire::write_message(
                &mut socket,
                &WireMessage::Reply {
                    id,
                    reply: Reply::Json(serde_json::json!(42)),
                },
            )
            .await
            .unwrap();
        });

        let backend = RemoteBackend::new(config(address));
        let mut listener = backend.events().listen_all();

        let reply = backend
            .invoke(Command::GetPixelValue { x: 5, y: 10, stack_idx: 0, image_idx: 0 })
            .await
            .unwrap();
        assert_eq!(reply, Reply::Json(serde_json::json!(42)));
        assert_eq!(listener.recv().await, Some(BackendEvent::StreamCapture));

        server.await.unwrap();
        // Server dropped the socket: a synthetic disconnected status follows
        match listener.recv().await {
            Some(BackendEvent::CaptureManager(info)) => {
                assert_eq!(info.status, CaptureManagerStatus::DetectorDisconnected)
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_error_reply_is_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            if let Ok(Some(WireMessage::Request { id, .. })) = wire::read_message(&mut socket).await {
                let message = WireMessage::Error {
                    id,
                    message: "unknown command".into(),
                };
                let _ = wire::write_message(&mut socket, &message).await;
            }
            // Hold the socket open until the client is done
            let _ = wire::read_message(&mut socket).await;
        });

        let backend = RemoteBackend::new(config(address));
        let err = backend.invoke(Command::Startup).await.unwrap_err();
        assert!(matches!(err, BridgeError::Rejected(ref m) if m == "unknown command"));
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let backend = RemoteBackend::new(config(address));
        assert!(matches!(
            backend.invoke(Command::Startup).await,
            Err(BridgeError::Connect { .. })
        ));
    }
}
