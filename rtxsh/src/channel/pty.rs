//! PTY channel abstraction for interactive sessions.
//!
//! A single background task reads the shell stream and hands chunks over
//! a one-slot channel. [`ShellChannel::read_until`] consumes those chunks
//! one byte at a time, racing the next chunk against the operation
//! timeout and the caller's [`Context`]. Bytes that arrive after a match
//! stay queued for the next read.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use log::{debug, trace};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::buffer::PatternBuffer;
use super::prompt::PromptDetector;
use crate::context::Context;
use crate::error::{ProtocolError, Result, TransportError};

/// Line terminator appended by [`ShellChannel::write_line`].
pub const LINE_TERMINATOR: &str = "\r";

/// Configuration for PTY channel behavior.
#[derive(Debug, Clone)]
pub struct PtyConfig {
    /// Search depth for pattern matching.
    pub search_depth: usize,

    /// Read chunk size of the background reader.
    pub read_chunk: usize,
}

impl Default for PtyConfig {
    fn default() -> Self {
        Self {
            search_depth: 1000,
            read_chunk: 4096,
        }
    }
}

/// What a read should stop at.
#[derive(Debug, Clone, Copy)]
pub enum WaitFor<'a> {
    /// A prompt recognized by the channel's detector.
    Prompt,
    /// An exact substring, e.g. `Password:`.
    Substring(&'a str),
    /// A prompt, or any of the given phrases (case-insensitive).
    PromptOr(&'a [&'a str]),
}

impl fmt::Display for WaitFor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitFor::Prompt => f.write_str("prompt"),
            WaitFor::Substring(s) => write!(f, "{:?}", s),
            WaitFor::PromptOr(phrases) => write!(f, "prompt or {:?}", phrases),
        }
    }
}

/// What ended a successful read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Matched {
    /// A prompt; the string is the prompt line without trailing whitespace.
    Prompt(String),
    /// One of the requested phrases or substrings.
    Phrase(String),
}

/// Result of a read operation.
#[derive(Debug)]
pub struct ReadResult {
    /// The visible output, up to and including the match.
    pub data: Vec<u8>,

    /// What ended the read.
    pub matched: Matched,
}

impl ReadResult {
    /// Get the data as a string (lossy UTF-8).
    pub fn as_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.data)
    }

    /// The prompt that ended the read, if any.
    pub fn prompt(&self) -> Option<&str> {
        match &self.matched {
            Matched::Prompt(p) => Some(p),
            Matched::Phrase(_) => None,
        }
    }
}

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Duplex shell byte stream with cancellable, pattern-terminated reads.
pub struct ShellChannel {
    writer: BoxedWriter,
    chunks: mpsc::Receiver<io::Result<Bytes>>,
    pending: BytesMut,
    reader: JoinHandle<()>,
    detector: Arc<dyn PromptDetector>,
    config: PtyConfig,
    eof: bool,
}

impl ShellChannel {
    /// Wrap a shell stream. Spawns the background reader.
    pub fn new<R, W>(reader: R, writer: W, detector: Arc<dyn PromptDetector>, config: PtyConfig) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (tx, chunks) = mpsc::channel(1);
        let reader = tokio::spawn(read_loop(reader, tx, config.read_chunk));
        Self {
            writer: Box::new(writer),
            chunks,
            pending: BytesMut::new(),
            reader,
            detector,
            config,
            eof: false,
        }
    }

    /// The prompt detector in use.
    pub fn detector(&self) -> &Arc<dyn PromptDetector> {
        &self.detector
    }

    /// Write raw bytes and flush.
    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        self.writer.write_all(data).await.map_err(TransportError::Io)?;
        self.writer.flush().await.map_err(TransportError::Io)?;
        Ok(())
    }

    /// Write `line` followed by the line terminator.
    pub async fn write_line(&mut self, line: &str) -> Result<()> {
        let mut data = Vec::with_capacity(line.len() + LINE_TERMINATOR.len());
        data.extend_from_slice(line.as_bytes());
        data.extend_from_slice(LINE_TERMINATOR.as_bytes());
        self.write(&data).await
    }

    /// Read until `wait` is satisfied, `timeout` elapses, or `ctx` ends.
    ///
    /// A timeout is reported as a [`ProtocolError`] carrying the partial
    /// output. Context termination is reported as `Cancelled` or
    /// `DeadlineExceeded`. A closed stream is a transport error.
    pub async fn read_until(
        &mut self,
        ctx: &Context,
        wait: WaitFor<'_>,
        timeout: Duration,
    ) -> Result<ReadResult> {
        let mut buffer = PatternBuffer::new(self.config.search_depth);
        let expiry = tokio::time::sleep(timeout);
        tokio::pin!(expiry);

        loop {
            while self.pending.has_remaining() {
                let byte = self.pending.get_u8();
                if buffer.push(byte) == 0 {
                    continue;
                }
                if let Some(matched) = self.check(&buffer, wait) {
                    trace!("Matched {:?} after {} bytes", matched, buffer.len());
                    return Ok(ReadResult {
                        data: buffer.take(),
                        matched,
                    });
                }
            }

            if self.eof {
                return Err(TransportError::Disconnected.into());
            }

            tokio::select! {
                biased;
                err = ctx.done() => {
                    debug!("Read for {} interrupted: {}", wait, err);
                    return Err(err);
                }
                _ = &mut expiry => {
                    return Err(timeout_error(wait, timeout, &buffer).into());
                }
                chunk = self.chunks.recv() => match chunk {
                    Some(Ok(data)) => {
                        trace!("Received {} bytes", data.len());
                        self.pending.extend_from_slice(&data);
                    }
                    Some(Err(e)) => {
                        self.eof = true;
                        return Err(TransportError::Io(e).into());
                    }
                    None => {
                        self.eof = true;
                        return Err(TransportError::Disconnected.into());
                    }
                },
            }
        }
    }

    fn check(&self, buffer: &PatternBuffer, wait: WaitFor<'_>) -> Option<Matched> {
        match wait {
            WaitFor::Prompt => self.detector.detect(buffer.tail()).map(Matched::Prompt),
            WaitFor::Substring(s) => buffer
                .tail_contains(s.as_bytes())
                .then(|| Matched::Phrase(s.to_string())),
            WaitFor::PromptOr(phrases) => self
                .detector
                .detect(buffer.tail())
                .map(Matched::Prompt)
                .or_else(|| {
                    phrases
                        .iter()
                        .find(|p| buffer.tail_contains_ignore_case(p))
                        .map(|p| Matched::Phrase(p.to_string()))
                }),
        }
    }

    /// Whether the remote side has closed the stream.
    pub fn is_eof(&self) -> bool {
        self.eof
    }

    /// Stop the background reader and shut down the write side.
    pub async fn shutdown(&mut self) {
        self.reader.abort();
        if let Err(e) = self.writer.shutdown().await {
            trace!("Shell stream shutdown: {}", e);
        }
        self.eof = true;
    }
}

impl Drop for ShellChannel {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

impl fmt::Debug for ShellChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShellChannel")
            .field("pending", &self.pending.len())
            .field("eof", &self.eof)
            .finish()
    }
}

fn timeout_error(wait: WaitFor<'_>, timeout: Duration, buffer: &PatternBuffer) -> ProtocolError {
    let output = buffer.as_str_lossy().into_owned();
    match wait {
        WaitFor::Prompt => ProtocolError::PromptTimeout { timeout, output },
        other => ProtocolError::PatternTimeout {
            expected: other.to_string(),
            timeout,
            output,
        },
    }
}

async fn read_loop<R>(mut reader: R, tx: mpsc::Sender<io::Result<Bytes>>, chunk: usize)
where
    R: AsyncRead + Unpin,
{
    loop {
        let mut buf = BytesMut::with_capacity(chunk);
        match reader.read_buf(&mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                if tx.send(Ok(buf.freeze())).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                let _ = tx.send(Err(e)).await;
                break;
            }
        }
    }
    trace!("Shell reader finished");
}
