//! In-process broker. Also reachable over TCP through [`serve_tcp`].

use crate::alerts::transport::{Frame, Transport, TransportError};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

type SessionId = u64;

#[derive(Debug)]
struct Session {
    tx: mpsc::UnboundedSender<Frame>,
    topics: HashSet<String>,
}

#[derive(Debug)]
struct BrokerInner {
    online: bool,
    next_id: SessionId,
    sessions: HashMap<SessionId, Session>,
}

/// Topic fan-out broker. Taking it offline drops every session, which
/// connected clients observe as a disconnect.
#[derive(Debug, Clone)]
pub struct MemoryBroker {
    inner: Arc<Mutex<BrokerInner>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(BrokerInner {
                online: true,
                next_id: 1,
                sessions: HashMap::new(),
            })),
        }
    }

    pub fn set_online(&self, online: bool) {
        let Ok(mut inner) = self.inner.lock() else {
            warn!("Broker lock poisoned while toggling availability");
            return;
        };
        inner.online = online;
        if !online {
            let dropped = inner.sessions.len();
            inner.sessions.clear();
            info!(dropped, "Broker offline, sessions dropped");
        }
    }

    pub fn session_count(&self) -> usize {
        self.inner.lock().map(|inner| inner.sessions.len()).unwrap_or(0)
    }

    fn open_session(&self) -> Result<(SessionId, mpsc::UnboundedReceiver<Frame>), TransportError> {
        let mut inner = self.inner.lock().map_err(|_| TransportError::Closed)?;
        if !inner.online {
            return Err(TransportError::Refused);
        }
        let id = inner.next_id;
        inner.next_id += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        inner.sessions.insert(
            id,
            Session {
                tx,
                topics: HashSet::new(),
            },
        );
        Ok((id, rx))
    }

    fn close_session(&self, id: SessionId) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.sessions.remove(&id);
        }
    }

    fn handle(&self, id: SessionId, frame: Frame) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().map_err(|_| TransportError::Closed)?;
        if !inner.sessions.contains_key(&id) {
            return Err(TransportError::Closed);
        }

        match frame {
            Frame::Connect => inner.reply(id, Frame::Connected),
            Frame::Heartbeat => inner.reply(id, Frame::Heartbeat),
            Frame::Subscribe { topic } => {
                debug!(session = id, topic, "Broker subscription added");
                if let Some(session) = inner.sessions.get_mut(&id) {
                    session.topics.insert(topic);
                }
            }
            Frame::Publish { topic, body } => {
                for session in inner.sessions.values() {
                    if session.topics.contains(&topic) {
                        let _ = session.tx.send(Frame::Message {
                            topic: topic.clone(),
                            body: body.clone(),
                        });
                    }
                }
            }
            Frame::Disconnect => {
                inner.sessions.remove(&id);
            }
            Frame::Connected | Frame::Message { .. } => {
                debug!(session = id, "Ignoring broker-side frame from client");
            }
        }
        Ok(())
    }
}

impl BrokerInner {
    fn reply(&self, id: SessionId, frame: Frame) {
        if let Some(session) = self.sessions.get(&id) {
            let _ = session.tx.send(frame);
        }
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct MemoryTransport {
    broker: MemoryBroker,
    session: Option<(SessionId, mpsc::UnboundedReceiver<Frame>)>,
}

impl MemoryTransport {
    pub fn new(broker: MemoryBroker) -> Self {
        Self {
            broker,
            session: None,
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        self.close().await;
        let (id, mut rx) = self.broker.open_session()?;
        self.broker.handle(id, Frame::Connect)?;
        match rx.recv().await {
            Some(Frame::Connected) => {
                self.session = Some((id, rx));
                Ok(())
            }
            Some(other) => Err(TransportError::Handshake(format!("unexpected {other:?}"))),
            None => Err(TransportError::Closed),
        }
    }

    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        let (id, _) = self.session.as_ref().ok_or(TransportError::NotConnected)?;
        self.broker.handle(*id, frame)
    }

    async fn recv(&mut self) -> Result<Frame, TransportError> {
        let (_, rx) = self.session.as_mut().ok_or(TransportError::NotConnected)?;
        rx.recv().await.ok_or(TransportError::Closed)
    }

    async fn close(&mut self) {
        if let Some((id, _)) = self.session.take() {
            self.broker.close_session(id);
        }
    }
}

/// Accept TCP clients speaking line-delimited JSON frames and attach each
/// to `broker`. Runs until the listener fails.
pub async fn serve_tcp(listener: TcpListener, broker: MemoryBroker) -> std::io::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        debug!(%peer, "Broker client connected");
        let broker = broker.clone();
        tokio::spawn(async move {
            if let Err(err) = serve_connection(stream, broker).await {
                debug!(%peer, error = %err, "Broker client closed");
            }
        });
    }
}

async fn serve_connection(stream: TcpStream, broker: MemoryBroker) -> Result<(), TransportError> {
    let (read_half, mut write_half) = stream.into_split();
    let (id, mut outbound) = broker.open_session()?;

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            let Ok(mut line) = serde_json::to_string(&frame) else {
                continue;
            };
            line.push('\n');
            if write_half.write_all(line.as_bytes()).await.is_err() {
                break;
            }
        }
    });

    let mut lines = BufReader::new(read_half).lines();
    let result = loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => {
                let frame: Frame = match serde_json::from_str(&line) {
                    Ok(frame) => frame,
                    Err(err) => break Err(TransportError::Codec(err)),
                };
                if let Err(err) = broker.handle(id, frame) {
                    break Err(err);
                }
            }
            Ok(None) => break Ok(()),
            Err(err) => break Err(TransportError::Io(err)),
        }
    };

    broker.close_session(id);
    writer.abort();
    result
}
