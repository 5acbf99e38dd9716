//! Background reader draining the controller link into idle windows

use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::frame::{IdleWindow, TelemetryParser, DEFAULT_MAX_LINE_LEN};

#[derive(Error, Debug)]
pub enum LinkFault {
    #[error("Link closed")]
    Closed,
    #[error("Link I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Telemetry reader task failed: {0}")]
    TaskFailed(String),
}

/// Reader tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaderConfig {
    /// Bytes requested from the link per read
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
    /// Idle windows buffered before the reader waits for the consumer
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Longest line kept before it is discarded as noise
    #[serde(default = "default_max_line_len")]
    pub max_line_len: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: default_read_buffer_size(),
            channel_capacity: default_channel_capacity(),
            max_line_len: default_max_line_len(),
        }
    }
}

fn default_read_buffer_size() -> usize {
    1024
}

fn default_channel_capacity() -> usize {
    64
}

fn default_max_line_len() -> usize {
    DEFAULT_MAX_LINE_LEN
}

/// Owns the read half of the link and the parser's pending buffer
pub struct TelemetryReader<R> {
    link: R,
    parser: TelemetryParser,
    buf: Vec<u8>,
    windows: mpsc::Sender<IdleWindow>,
    shutdown: watch::Receiver<bool>,
}

impl<R: AsyncRead + Unpin> TelemetryReader<R> {
    pub fn new(
        link: R,
        config: &ReaderConfig,
        windows: mpsc::Sender<IdleWindow>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            link,
            parser: TelemetryParser::new(config.max_line_len),
            buf: vec![0u8; config.read_buffer_size.max(1)],
            windows,
            shutdown,
        }
    }

    /// Read until the link closes, faults, or shutdown is requested
    ///
    /// After every blocking read the reader keeps consuming whatever is
    /// immediately available and only then flushes, so each published window
    /// covers everything the controller had sent up to that point. Records
    /// decoded before a fault are published before the fault is returned.
    pub async fn run(mut self) -> Result<(), LinkFault> {
        info!("Telemetry reader started");

        loop {
            let n = tokio::select! {
                _ = self.shutdown.changed() => {
                    debug!("Telemetry reader shutting down");
                    return Ok(());
                }
                read = self.link.read(&mut self.buf) => read?,
            };

            let outcome = if n == 0 {
                Err(LinkFault::Closed)
            } else {
                self.parser.feed(&self.buf[..n]);
                self.drain_backlog().await
            };

            let window = self.parser.flush();
            if !window.records.is_empty() && !self.publish(window).await {
                return Ok(());
            }

            if let Err(fault) = outcome {
                let stats = self.parser.stats();
                warn!(
                    error = %fault,
                    frames = stats.frames,
                    malformed = stats.malformed_frames,
                    "Telemetry link lost"
                );
                return Err(fault);
            }
        }
    }

    /// Drain until a pass finds nothing ready
    ///
    /// A ready read still reports `Pending` once the task's coop budget is
    /// spent, so a pass that consumed bytes yields and looks again.
    async fn drain_backlog(&mut self) -> Result<(), LinkFault> {
        loop {
            match self.drain_ready()? {
                None => return Err(LinkFault::Closed),
                Some(0) => return Ok(()),
                Some(_) => tokio::task::yield_now().await,
            }
        }
    }

    /// Consume every read that completes without waiting
    ///
    /// Returns the number of bytes consumed, or `None` at end of stream.
    fn drain_ready(&mut self) -> std::io::Result<Option<usize>> {
        let mut total = 0;
        loop {
            match self.link.read(&mut self.buf).now_or_never() {
                None => return Ok(Some(total)),
                Some(Ok(0)) => return Ok(None),
                Some(Ok(n)) => {
                    self.parser.feed(&self.buf[..n]);
                    total += n;
                }
                Some(Err(e)) => return Err(e),
            }
        }
    }

    /// Hand a window to the consumer; false once the reader should stop
    ///
    /// A full channel never outlasts a shutdown request.
    async fn publish(&mut self, window: IdleWindow) -> bool {
        trace!(records = window.records.len(), idle = window.idle, "Publishing idle window");
        tokio::select! {
            _ = self.shutdown.changed() => {
                debug!("Telemetry reader shutting down with a window unsent");
                false
            }
            sent = self.windows.send(window) => {
                if sent.is_err() {
                    debug!("Telemetry consumer dropped, stopping reader");
                }
                sent.is_ok()
            }
        }
    }
}

/// Owner-side handle of a spawned reader
pub struct ReaderHandle {
    windows: mpsc::Receiver<IdleWindow>,
    shutdown: watch::Sender<bool>,
    closed: Arc<AtomicBool>,
    task: Option<JoinHandle<Result<(), LinkFault>>>,
}

/// Spawn a reader task on the current tokio runtime
pub fn spawn_reader<R>(link: R, config: &ReaderConfig) -> ReaderHandle
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (window_tx, window_rx) = mpsc::channel(config.channel_capacity.max(1));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let closed = Arc::new(AtomicBool::new(false));

    let reader = TelemetryReader::new(link, config, window_tx, shutdown_rx);
    let closed_flag = closed.clone();
    let task = tokio::spawn(async move {
        let result = reader.run().await;
        closed_flag.store(true, Ordering::Release);
        result
    });

    ReaderHandle {
        windows: window_rx,
        shutdown: shutdown_tx,
        closed,
        task: Some(task),
    }
}

impl ReaderHandle {
    /// Next published window; `None` once the reader has stopped
    pub async fn recv(&mut self) -> Option<IdleWindow> {
        self.windows.recv().await
    }

    /// Next window if one is already queued
    pub fn try_recv(&mut self) -> Option<IdleWindow> {
        self.windows.try_recv().ok()
    }

    /// Whether the reader task has exited
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Ask the reader to stop at its next poll
    ///
    /// No further windows are accepted; those already queued can still be
    /// received.
    pub fn shutdown(&mut self) {
        let _ = self.shutdown.send(true);
        self.windows.close();
    }

    /// Wait for the reader to exit and return how it ended
    ///
    /// Only the first call observes the reader's own result; later calls
    /// report [`LinkFault::Closed`].
    pub async fn join(&mut self) -> Result<(), LinkFault> {
        match self.task.take() {
            Some(task) => match task.await {
                Ok(result) => result,
                Err(e) => Err(LinkFault::TaskFailed(e.to_string())),
            },
            None => Err(LinkFault::Closed),
        }
    }
}
