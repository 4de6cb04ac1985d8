use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use osc::Framing;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::broadcast::{Audience, Delivery, Dispatch, Transport};
use crate::error::TransportError;

/// Addresses whose latest frame is replayed to clients that connect later.
const RETAINED: [&str; 2] = ["/brain/node", "/brain/density"];

/// Frames a client may have queued before it is dropped as lagging.
pub const CLIENT_QUEUE: usize = 256;

#[derive(Default)]
struct HubInner {
    clients: HashMap<Uuid, mpsc::Sender<Vec<u8>>>,
    retained: HashMap<String, Vec<u8>>,
}

/// Connected visualization clients. Cheap to clone; clones share the client set.
#[derive(Clone, Default)]
pub struct VisualizationHub {
    inner: Arc<Mutex<HubInner>>,
}

impl VisualizationHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client. It immediately receives the retained node and density frames.
    pub fn subscribe(&self) -> (Uuid, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(CLIENT_QUEUE);
        let id = Uuid::new_v4();
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        for address in RETAINED {
            if let Some(frame) = guard.retained.get(address) {
                let _ = tx.try_send(frame.clone());
            }
        }
        guard.clients.insert(id, tx);
        (id, rx)
    }

    pub fn unsubscribe(&self, id: Uuid) {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.clients.remove(&id);
    }

    /// Forget the frames replayed to new clients, e.g. once no node is current.
    pub fn clear_retained(&self) {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.retained.clear();
    }

    pub fn client_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clients
            .len()
    }
}

#[async_trait]
impl Transport for VisualizationHub {
    fn name(&self) -> &'static str {
        "websocket"
    }

    async fn deliver(&self, dispatch: &Dispatch, _participants: &[SocketAddr]) -> Delivery {
        let mut delivery = Delivery::default();
        if dispatch.audience != Audience::Everyone {
            return delivery;
        }

        let address = dispatch.event.address(Framing::Absolute);
        let frame = match dispatch.event.encode(Framing::Absolute) {
            Ok(f) => f,
            Err(e) => {
                delivery.failures.push(e);
                return delivery;
            }
        };

        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if RETAINED.contains(&address.as_str()) {
            guard.retained.insert(address, frame.clone());
        }

        let mut dropped = Vec::new();
        for (id, tx) in &guard.clients {
            match tx.try_send(frame.clone()) {
                Ok(()) => delivery.sent += 1,
                Err(TrySendError::Full(_)) => {
                    dropped.push((*id, TransportError::ClientLagging(*id)))
                }
                Err(TrySendError::Closed(_)) => {
                    dropped.push((*id, TransportError::ClientClosed(*id)))
                }
            }
        }
        // Dropping the sender ends the client's write loop, which closes the socket.
        for (id, failure) in dropped {
            guard.clients.remove(&id);
            delivery.failures.push(failure);
        }
        delivery
    }
}

/// Accept WebSocket clients until the listener fails.
pub async fn serve(listener: TcpListener, hub: VisualizationHub) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let hub = hub.clone();
                tokio::spawn(async move {
                    handle_client(stream, peer, hub).await;
                });
            }
            Err(e) => {
                log::error!("visualization listener failed: {e}");
                break;
            }
        }
    }
}

async fn handle_client(stream: TcpStream, peer: SocketAddr, hub: VisualizationHub) {
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            log::warn!("websocket handshake with {peer} failed: {e}");
            return;
        }
    };

    let (id, mut frames) = hub.subscribe();
    log::info!("visualization client {peer} connected ({} total)", hub.client_count());
    let (mut ws_tx, mut ws_rx) = ws.split();

    loop {
        tokio::select! {
            frame = frames.recv() => {
                let Some(frame) = frame else { break };
                if let Err(e) = ws_tx.send(Message::Binary(frame)).await {
                    log::warn!("visualization client {peer}: {e}");
                    break;
                }
            }
            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        log::warn!("visualization client {peer}: {e}");
                        break;
                    }
                }
            }
        }
    }

    hub.unsubscribe(id);
    log::info!("visualization client {peer} disconnected");
}
