//! WebSocket transport over tokio-tungstenite
//!
//! `Connector` opens a connection and hands back a `FrameSource`; the
//! supervisor only ever sees fragments, never tungstenite types.
//!
//! tungstenite joins continuation frames before yielding a message, so the
//! socket is wrapped in a `FrameTap` that scans the inbound byte stream and
//! records how many frames each data message spanned. `WsFrameSource` replays
//! that count to the assembler, which applies the fragment cap.

use crate::error::{BridgeError, Result};
use crate::frame::{Fragment, FrameSource};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{client_async, WebSocketStream};

/// Opens connections to the event source
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn FrameSource>>;
}

/// tokio-tungstenite client connector
#[derive(Debug, Clone)]
pub struct WsConnector {
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    async fn open(&self, url: &str) -> Result<WsFrameSource<TcpStream>> {
        let request = url
            .into_client_request()
            .map_err(|e| BridgeError::Connection(format!("{}: {}", url, e)))?;

        let uri = request.uri();
        if uri.scheme_str() != Some("ws") {
            return Err(BridgeError::Connection(format!(
                "{}: only ws:// endpoints are supported",
                url
            )));
        }
        let host = uri
            .host()
            .map(|h| h.trim_start_matches('[').trim_end_matches(']').to_string())
            .ok_or_else(|| BridgeError::Connection(format!("{}: missing host", url)))?;
        let port = uri.port_u16().unwrap_or(80);

        let tcp = TcpStream::connect((host.as_str(), port))
            .await
            .map_err(|e| BridgeError::Connection(format!("{}: {}", url, e)))?;

        let counts = FrameCounts::default();
        let (stream, response) = client_async(request, FrameTap::new(tcp, counts.clone()))
            .await
            .map_err(|e| BridgeError::Connection(format!("{}: {}", url, e)))?;

        tracing::info!(url = %url, status = %response.status(), "Connected to event source");

        Ok(WsFrameSource::new(stream, counts))
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn FrameSource>> {
        let source = tokio::time::timeout(self.connect_timeout, self.open(url))
            .await
            .map_err(|_| {
                BridgeError::Connection(format!(
                    "{}: timed out after {}s",
                    url,
                    self.connect_timeout.as_secs()
                ))
            })??;
        Ok(Box::new(source))
    }
}

/// Frame counts of completed data messages, oldest first
#[derive(Debug, Clone, Default)]
pub struct FrameCounts {
    inner: Arc<Mutex<FrameScanner>>,
}

impl FrameCounts {
    /// Frames spanned by the oldest message not yet taken
    fn take(&self) -> Option<usize> {
        match self.inner.lock() {
            Ok(mut scanner) => scanner.completed.pop_front(),
            Err(poisoned) => poisoned.into_inner().completed.pop_front(),
        }
    }

    fn scan(&self, bytes: &[u8]) {
        match self.inner.lock() {
            Ok(mut scanner) => scanner.scan(bytes),
            Err(poisoned) => poisoned.into_inner().scan(bytes),
        }
    }
}

const HEADER_END: &[u8; 4] = b"\r\n\r\n";

#[derive(Debug)]
enum Phase {
    /// Inside the HTTP upgrade response; `matched` bytes of the blank line seen
    Handshake { matched: usize },
    /// Collecting a frame header
    Header { buf: [u8; 14], len: usize },
    /// Skipping frame payload
    Payload { remaining: u64 },
}

/// Incremental parser of server-to-client frame headers
#[derive(Debug)]
struct FrameScanner {
    phase: Phase,
    /// Frames seen so far for the message in progress
    fragments: usize,
    completed: VecDeque<usize>,
}

impl Default for FrameScanner {
    fn default() -> Self {
        Self {
            phase: Phase::Handshake { matched: 0 },
            fragments: 0,
            completed: VecDeque::new(),
        }
    }
}

impl FrameScanner {
    fn scan(&mut self, mut bytes: &[u8]) {
        while !bytes.is_empty() {
            match &mut self.phase {
                Phase::Handshake { matched } => {
                    let byte = bytes[0];
                    bytes = &bytes[1..];
                    if byte == HEADER_END[*matched] {
                        *matched += 1;
                    } else {
                        *matched = usize::from(byte == b'\r');
                    }
                    if *matched == HEADER_END.len() {
                        self.phase = Phase::Header {
                            buf: [0; 14],
                            len: 0,
                        };
                    }
                }
                Phase::Header { buf, len } => {
                    buf[*len] = bytes[0];
                    *len += 1;
                    bytes = &bytes[1..];
                    if let Some((payload, b0)) = parse_header(&buf[..*len]) {
                        self.on_frame(b0);
                        self.phase = Phase::Payload { remaining: payload };
                    }
                }
                Phase::Payload { remaining } => {
                    let step = (*remaining).min(bytes.len() as u64);
                    *remaining -= step;
                    bytes = &bytes[step as usize..];
                }
            }

            if let Phase::Payload { remaining: 0 } = self.phase {
                self.phase = Phase::Header {
                    buf: [0; 14],
                    len: 0,
                };
            }
        }
    }

    fn on_frame(&mut self, b0: u8) {
        let fin = b0 & 0x80 != 0;
        match b0 & 0x0f {
            // text, binary
            0x1 | 0x2 => self.fragments = 1,
            // continuation
            0x0 => self.fragments += 1,
            _ => return,
        }
        if fin {
            self.completed.push_back(self.fragments);
            self.fragments = 0;
        }
    }
}

/// Payload length and first header byte once `header` is complete
fn parse_header(header: &[u8]) -> Option<(u64, u8)> {
    if header.len() < 2 {
        return None;
    }
    let masked = header[1] & 0x80 != 0;
    let short = header[1] & 0x7f;
    let ext = match short {
        126 => 2,
        127 => 8,
        _ => 0,
    };
    let total = 2 + ext + if masked { 4 } else { 0 };
    if header.len() < total {
        return None;
    }
    let payload = match ext {
        2 => u64::from(u16::from_be_bytes([header[2], header[3]])),
        8 => {
            let mut be = [0u8; 8];
            be.copy_from_slice(&header[2..10]);
            u64::from_be_bytes(be)
        }
        _ => u64::from(short),
    };
    Some((payload, header[0]))
}

/// Socket wrapper that feeds every inbound byte to a `FrameScanner`
pub struct FrameTap<S> {
    inner: S,
    counts: FrameCounts,
}

impl<S> FrameTap<S> {
    pub fn new(inner: S, counts: FrameCounts) -> Self {
        Self { inner, counts }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for FrameTap<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let polled = Pin::new(&mut self.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = polled {
            self.counts.scan(&buf.filled()[before..]);
        }
        polled
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for FrameTap<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// Fragment source backed by a WebSocket stream
pub struct WsFrameSource<S> {
    stream: WebSocketStream<FrameTap<S>>,
    counts: FrameCounts,
    /// Non-final fragments still owed for the held message
    backlog: usize,
    held: Option<Fragment>,
}

impl<S> WsFrameSource<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: WebSocketStream<FrameTap<S>>, counts: FrameCounts) -> Self {
        Self {
            stream,
            counts,
            backlog: 0,
            held: None,
        }
    }

    /// Replay a reassembled message as the number of frames it arrived in
    fn replay(&mut self, payload: Bytes) -> Fragment {
        let frames = self.counts.take().unwrap_or(1).max(1);
        let last = Fragment::last(payload);
        if frames == 1 {
            return last;
        }
        self.backlog = frames - 2;
        self.held = Some(last);
        Fragment::partial(Bytes::new())
    }
}

#[async_trait]
impl<S> FrameSource for WsFrameSource<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn next_fragment(&mut self) -> Result<Fragment> {
        if self.backlog > 0 {
            self.backlog -= 1;
            return Ok(Fragment::partial(Bytes::new()));
        }
        if let Some(held) = self.held.take() {
            return Ok(held);
        }

        match self.stream.next().await {
            Some(Ok(Message::Text(text))) => {
                Ok(self.replay(Bytes::copy_from_slice(text.as_bytes())))
            }
            Some(Ok(Message::Binary(data))) => Ok(self.replay(Bytes::from(data))),
            // Raw frames are never yielded on read
            Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {
                Ok(Fragment::Control)
            }
            Some(Ok(Message::Close(frame))) => {
                tracing::debug!(frame = ?frame, "Close frame received");
                Ok(Fragment::Close)
            }
            Some(Err(e)) => Err(e.into()),
            None => Err(BridgeError::Transport(
                "connection ended without a close frame".to_string(),
            )),
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self.stream.close(None).await {
            Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
