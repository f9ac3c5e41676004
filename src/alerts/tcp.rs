use crate::alerts::transport::{Frame, Transport, TransportError};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Line-delimited JSON frames over TCP.
///
/// Inbound lines are decoded on a reader task and queued, so `recv` only
/// waits on a channel and stays cancel safe.
#[derive(Debug)]
pub struct TcpTransport {
    addr: String,
    writer: Option<OwnedWriteHalf>,
    inbound: Option<mpsc::UnboundedReceiver<Result<Frame, TransportError>>>,
    reader: Option<JoinHandle<()>>,
}

impl TcpTransport {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            writer: None,
            inbound: None,
            reader: None,
        }
    }

    async fn write_frame(&mut self, frame: &Frame) -> Result<(), TransportError> {
        let writer = self.writer.as_mut().ok_or(TransportError::NotConnected)?;
        let mut line = serde_json::to_string(frame)?;
        line.push('\n');
        writer.write_all(line.as_bytes()).await?;
        Ok(())
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        self.close().await;

        let stream = TcpStream::connect(&self.addr).await?;
        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel();

        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(read_half).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) if line.trim().is_empty() => continue,
                    Ok(Some(line)) => {
                        let decoded = serde_json::from_str::<Frame>(&line).map_err(TransportError::from);
                        let failed = decoded.is_err();
                        if tx.send(decoded).is_err() || failed {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        let _ = tx.send(Err(TransportError::Io(err)));
                        break;
                    }
                }
            }
        });

        self.writer = Some(write_half);
        self.inbound = Some(rx);
        self.reader = Some(reader);

        self.write_frame(&Frame::Connect).await?;
        let reply = match tokio::time::timeout(HANDSHAKE_TIMEOUT, self.recv()).await {
            Ok(reply) => reply,
            Err(_) => Err(TransportError::Handshake(
                "timed out waiting for connected".to_string(),
            )),
        };
        match reply {
            Ok(Frame::Connected) => {
                debug!(addr = %self.addr, "Broker handshake complete");
                Ok(())
            }
            Ok(other) => {
                self.close().await;
                Err(TransportError::Handshake(format!("unexpected {other:?}")))
            }
            Err(err) => {
                self.close().await;
                Err(err)
            }
        }
    }

    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        self.write_frame(&frame).await
    }

    async fn recv(&mut self) -> Result<Frame, TransportError> {
        let inbound = self.inbound.as_mut().ok_or(TransportError::NotConnected)?;
        inbound.recv().await.unwrap_or(Err(TransportError::Closed))
    }

    async fn close(&mut self) {
        if self.writer.is_some() {
            let _ = self.write_frame(&Frame::Disconnect).await;
        }
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.shutdown().await;
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.inbound = None;
    }
}
