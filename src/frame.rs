//! Frame assembly: turns WebSocket fragments into complete text messages
//!
//! The assembler never hands a partial message to the decoder. A message
//! that does not complete within the fragment cap is abandoned, and the rest
//! of it is skipped up to its final fragment so the next message starts on a
//! clean boundary.

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;

/// One physical chunk read from the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    /// Payload bytes; `fin` marks the last fragment of a logical message
    Data { payload: Bytes, fin: bool },
    /// Ping/pong traffic; never part of a message
    Control,
    /// Peer started the close handshake
    Close,
}

impl Fragment {
    /// A complete single-fragment message
    pub fn text(text: impl Into<String>) -> Self {
        Fragment::Data {
            payload: Bytes::from(text.into()),
            fin: true,
        }
    }

    /// A non-final piece of a larger message
    pub fn partial(payload: impl Into<Bytes>) -> Self {
        Fragment::Data {
            payload: payload.into(),
            fin: false,
        }
    }

    /// The final piece of a larger message
    pub fn last(payload: impl Into<Bytes>) -> Self {
        Fragment::Data {
            payload: payload.into(),
            fin: true,
        }
    }
}

/// Outcome of assembling one logical message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assembled {
    /// A complete UTF-8 message
    Text(String),
    /// Close frame observed; the receive loop should stop
    Closed,
    /// Fragment cap reached without completion; nothing to decode
    Incomplete,
}

/// Source of fragments for one connection
#[async_trait]
pub trait FrameSource: Send {
    /// Wait for the next fragment from the peer
    async fn next_fragment(&mut self) -> Result<Fragment>;

    /// Finish the close handshake and release the socket
    async fn close(&mut self) -> Result<()>;
}

enum Step {
    Pending,
    Done(Assembled),
}

/// Accumulates fragments into complete messages
pub struct FrameAssembler {
    max_fragments: usize,
    buffer: Vec<u8>,
    fragments: usize,
    /// Skipping the tail of an abandoned message
    discarding: bool,
}

impl FrameAssembler {
    pub fn new(max_fragments: usize) -> Self {
        Self {
            max_fragments: max_fragments.max(1),
            buffer: Vec::with_capacity(16 * 1024),
            fragments: 0,
            discarding: false,
        }
    }

    /// Read fragments from `source` until one message, a close, or the cap
    pub async fn next_message<S>(&mut self, source: &mut S) -> Result<Assembled>
    where
        S: FrameSource + ?Sized,
    {
        loop {
            let fragment = source.next_fragment().await?;
            if let Step::Done(assembled) = self.feed(fragment) {
                return Ok(assembled);
            }
        }
    }

    /// Drop any partially assembled state
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.fragments = 0;
        self.discarding = false;
    }

    fn feed(&mut self, fragment: Fragment) -> Step {
        match fragment {
            Fragment::Control => Step::Pending,
            Fragment::Close => {
                self.reset();
                Step::Done(Assembled::Closed)
            }
            Fragment::Data { payload, fin } => {
                self.fragments += 1;

                if self.discarding {
                    if fin {
                        tracing::debug!(
                            fragments = self.fragments,
                            "Skipped tail of abandoned message"
                        );
                        self.discarding = false;
                        self.fragments = 0;
                    } else if self.fragments >= self.max_fragments {
                        self.fragments = 0;
                        return Step::Done(Assembled::Incomplete);
                    }
                    return Step::Pending;
                }

                self.buffer.extend_from_slice(&payload);

                if fin {
                    self.fragments = 0;
                    let bytes = std::mem::take(&mut self.buffer);
                    let text = match String::from_utf8(bytes) {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::warn!(error = %e, "Message is not valid UTF-8, decoding lossily");
                            String::from_utf8_lossy(e.as_bytes()).into_owned()
                        }
                    };
                    return Step::Done(Assembled::Text(text));
                }

                if self.fragments >= self.max_fragments {
                    tracing::warn!(
                        fragments = self.fragments,
                        bytes = self.buffer.len(),
                        "Failed to receive websocket message within fragment limit, dropping it"
                    );
                    self.buffer.clear();
                    self.fragments = 0;
                    self.discarding = true;
                    return Step::Done(Assembled::Incomplete);
                }

                Step::Pending
            }
        }
    }
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_MAX_FRAGMENTS)
    }
}
