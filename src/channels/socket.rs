//! Raw TCP bridge used by the chat platform integration.
//!
//! Frames are JSON documents separated by a configurable delimiter. A read
//! may carry several frames or only part of one, so bytes are buffered
//! until a full delimiter shows up.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::protocol::FrontendContext;
use super::{ClientHandle, OutboundMessage};
use crate::error::ChannelError;

const READ_CHUNK: usize = 4096;

/// Largest partial frame kept while waiting for a delimiter. Peers that
/// exceed it are disconnected.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

pub struct SocketBridge {
    listener: TcpListener,
    ctx: Arc<FrontendContext>,
    delimiter: Arc<str>,
}

impl SocketBridge {
    pub async fn bind(
        addr: &str,
        ctx: Arc<FrontendContext>,
        delimiter: impl Into<String>,
    ) -> Result<Self, ChannelError> {
        let delimiter: String = delimiter.into();
        if delimiter.is_empty() {
            return Err(ChannelError::InvalidMessage("socket delimiter must not be empty".into()));
        }
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ChannelError::BindFailed {
                addr: addr.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            listener,
            ctx,
            delimiter: delimiter.into(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ChannelError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections forever. Each connection gets its own task.
    pub async fn serve(self) -> Result<(), ChannelError> {
        info!(addr = %self.local_addr()?, "Socket bridge listening");
        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "Failed to accept socket client");
                    continue;
                }
            };
            let ctx = Arc::clone(&self.ctx);
            let delimiter = Arc::clone(&self.delimiter);
            tokio::spawn(async move {
                handle_connection(stream, peer, ctx, delimiter).await;
            });
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    ctx: Arc<FrontendContext>,
    delimiter: Arc<str>,
) {
    let client_id = Uuid::new_v4().to_string();
    info!(client_id = %client_id, peer = %peer, "Socket client connected");

    let (mut reader, writer) = stream.into_split();
    let (client, rx) = ClientHandle::new(client_id.clone());
    client.send(OutboundMessage::Connected {
        client_id: client_id.clone(),
    });
    let writer_task = tokio::spawn(write_frames(writer, rx, Arc::clone(&delimiter)));

    let mut buffer = FrameBuffer::new(delimiter.as_bytes(), MAX_FRAME_BYTES);
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                let frames = match buffer.extend(&chunk[..n]) {
                    Ok(frames) => frames,
                    Err(e) => {
                        warn!(client_id = %client_id, error = %e, "Dropping socket client");
                        break;
                    }
                };
                for frame in frames {
                    match std::str::from_utf8(&frame) {
                        Ok(text) if text.trim().is_empty() => {}
                        Ok(text) => ctx.handle_text(text.trim(), &client),
                        Err(e) => debug!(client_id = %client_id, error = %e, "Dropping non UTF-8 frame"),
                    }
                }
            }
            Err(e) => {
                warn!(client_id = %client_id, error = %e, "Socket read failed");
                break;
            }
        }
    }

    if buffer.pending() > 0 {
        debug!(client_id = %client_id, bytes = buffer.pending(), "Discarding incomplete frame");
    }
    writer_task.abort();
    info!(client_id = %client_id, "Socket client disconnected");
}

async fn write_frames(
    mut writer: tokio::net::tcp::OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<OutboundMessage>,
    delimiter: Arc<str>,
) {
    while let Some(message) = rx.recv().await {
        let mut frame = match serde_json::to_string(&message) {
            Ok(json) => json,
            Err(e) => {
                error!(error = %e, message = message.type_name(), "Failed to serialize message");
                continue;
            }
        };
        frame.push_str(&delimiter);
        if let Err(e) = writer.write_all(frame.as_bytes()).await {
            debug!(error = %e, "Socket write failed, closing writer");
            break;
        }
    }
}

/// Reassembles delimited frames from arbitrary read chunks.
///
/// Bytes already searched are remembered, so each byte is scanned about
/// once no matter how many reads a large frame spans.
struct FrameBuffer {
    bytes: Vec<u8>,
    delimiter: Vec<u8>,
    /// Prefix of `bytes` known to hold no delimiter.
    scanned: usize,
    max_frame: usize,
}

impl FrameBuffer {
    fn new(delimiter: &[u8], max_frame: usize) -> Self {
        Self {
            bytes: Vec::new(),
            delimiter: delimiter.to_vec(),
            scanned: 0,
            max_frame,
        }
    }

    /// Append `chunk` and return every frame it completed. Fails once the
    /// trailing partial frame grows past the limit.
    fn extend(&mut self, chunk: &[u8]) -> Result<Vec<Vec<u8>>, ChannelError> {
        self.bytes.extend_from_slice(chunk);

        let width = self.delimiter.len();
        let mut frames = Vec::new();
        let mut start = 0;
        // A delimiter may straddle the previous chunk boundary.
        let mut from = self.scanned.saturating_sub(width - 1);
        while let Some(offset) = self.bytes[from..]
            .windows(width)
            .position(|window| window == self.delimiter.as_slice())
        {
            let end = from + offset;
            frames.push(self.bytes[start..end].to_vec());
            start = end + width;
            from = start;
        }
        self.bytes.drain(..start);
        self.scanned = self.bytes.len();

        if self.bytes.len() > self.max_frame {
            return Err(ChannelError::InvalidMessage(format!(
                "frame exceeds {} bytes without a delimiter",
                self.max_frame
            )));
        }
        Ok(frames)
    }

    /// Bytes of the trailing partial frame.
    fn pending(&self) -> usize {
        self.bytes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_partial_frame_buffered() {
        let mut buffer = FrameBuffer::new(b"\n", MAX_FRAME_BYTES);
        let frames = buffer.extend(b"{\"a\":1}\n{\"b\"").unwrap();
        assert_eq!(frames, vec![b"{\"a\":1}".to_vec()]);
        assert_eq!(buffer.pending(), 4);

        let frames = buffer.extend(b":2}\n").unwrap();
        assert_eq!(frames, vec![b"{\"b\":2}".to_vec()]);
        assert_eq!(buffer.pending(), 0);
    }

    #[test]
    fn multi_byte_delimiter() {
        let mut buffer = FrameBuffer::new(b"<EOF>", MAX_FRAME_BYTES);
        let frames = buffer.extend(b"one<EOF>two<EOF>thr").unwrap();
        assert_eq!(frames, vec![b"one".to_vec(), b"two".to_vec()]);
        assert_eq!(buffer.pending(), 3);
    }

    #[test]
    fn delimiter_split_across_reads_is_found() {
        let mut buffer = FrameBuffer::new(b"<EOF>", MAX_FRAME_BYTES);
        assert!(buffer.extend(b"one<E").unwrap().is_empty());
        assert!(buffer.extend(b"O").unwrap().is_empty());
        let frames = buffer.extend(b"F>two").unwrap();
        assert_eq!(frames, vec![b"one".to_vec()]);
        assert_eq!(buffer.pending(), 3);
    }

    #[test]
    fn large_frame_arriving_in_small_reads_is_reassembled() {
        let mut buffer = FrameBuffer::new(b"\n", MAX_FRAME_BYTES);
        let payload = vec![b'x'; 64 * 1024];
        for chunk in payload.chunks(100) {
            assert!(buffer.extend(chunk).unwrap().is_empty());
            assert_eq!(buffer.scanned, buffer.pending());
        }
        let frames = buffer.extend(b"\n").unwrap();
        assert_eq!(frames, vec![payload]);
    }

    #[test]
    fn oversized_partial_frame_is_rejected() {
        let mut buffer = FrameBuffer::new(b"\n", 16);
        assert!(buffer.extend(b"0123456789").unwrap().is_empty());
        let err = buffer.extend(b"0123456789").unwrap_err();
        assert!(err.to_string().contains("16 bytes"));
    }

    #[test]
    fn complete_frames_do_not_count_against_the_limit() {
        let mut buffer = FrameBuffer::new(b"\n", 16);
        let frames = buffer.extend(b"0123456789\n0123456789\nabc").unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(buffer.pending(), 3);
    }
}
