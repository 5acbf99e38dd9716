//! Motion session: issues commands on the link and paces them on idle windows
//!
//! The session is the explicit context object an executor holds. It owns the
//! write half of the link and the handle of the reader draining the read half;
//! status records only reach it through the reader's window queue.

use tokio::io::{split, AsyncRead, AsyncWrite, AsyncWriteExt, WriteHalf};
use tracing::{debug, info};

use crate::frame::StatusRecord;
use crate::reader::{spawn_reader, LinkFault, ReaderConfig, ReaderHandle};

pub struct MotionSession<W> {
    writer: W,
    reader: ReaderHandle,
    latest: Option<StatusRecord>,
}

impl<L> MotionSession<WriteHalf<L>>
where
    L: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Split a bidirectional link and start reading telemetry from it
    pub fn open(link: L, config: &ReaderConfig) -> Self {
        let (read_half, write_half) = split(link);
        let reader = spawn_reader(read_half, config);
        Self::new(write_half, reader)
    }
}

impl<W: AsyncWrite + Unpin> MotionSession<W> {
    pub fn new(writer: W, reader: ReaderHandle) -> Self {
        Self {
            writer,
            reader,
            latest: None,
        }
    }

    /// Most recent status record received
    pub fn latest_status(&self) -> Option<&StatusRecord> {
        self.latest.as_ref()
    }

    /// Write one command line to the controller
    ///
    /// Windows that arrived before the command are discarded so that a later
    /// [`MotionSession::wait_idle`] only sees the controller's response to it.
    pub async fn issue(&mut self, command: &str) -> Result<(), LinkFault> {
        if self.reader.is_closed() {
            return Err(self.reader_fault().await);
        }
        self.discard_backlog();

        let mut line = Vec::with_capacity(command.len() + 1);
        line.extend_from_slice(command.trim_end().as_bytes());
        line.push(b'\n');
        self.writer.write_all(&line).await?;
        self.writer.flush().await?;

        debug!(command = %command.trim_end(), "Issued command");
        Ok(())
    }

    /// Wait until the controller reports itself settled
    ///
    /// Returns every record received up to and including the idle window, in
    /// arrival order.
    pub async fn wait_idle(&mut self) -> Result<Vec<StatusRecord>, LinkFault> {
        let mut seen = Vec::new();
        loop {
            let Some(window) = self.reader.recv().await else {
                return Err(self.reader_fault().await);
            };
            if let Some(last) = window.records.last() {
                self.latest = Some(last.clone());
            }
            seen.extend(window.records);
            if window.idle {
                return Ok(seen);
            }
        }
    }

    /// Issue each command and wait for the controller to settle before the next
    pub async fn execute<I, S>(&mut self, commands: I) -> Result<usize, LinkFault>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut issued = 0;
        for command in commands {
            let command = command.as_ref();
            if command.trim().is_empty() {
                continue;
            }
            self.issue(command).await?;
            self.wait_idle().await?;
            issued += 1;
            debug!(issued, "Controller settled");
        }
        info!(issued, "Command sequence complete");
        Ok(issued)
    }

    /// Stop the reader and close the write half
    pub async fn close(mut self) -> Result<(), LinkFault> {
        self.reader.shutdown();
        if let Err(e) = self.writer.shutdown().await {
            debug!(error = %e, "Link write half did not shut down cleanly");
        }
        match self.reader.join().await {
            Ok(()) | Err(LinkFault::Closed) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn discard_backlog(&mut self) {
        while let Some(window) = self.reader.try_recv() {
            if let Some(last) = window.records.last() {
                self.latest = Some(last.clone());
            }
        }
    }

    async fn reader_fault(&mut self) -> LinkFault {
        match self.reader.join().await {
            Ok(()) => LinkFault::Closed,
            Err(e) => e,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, BufReader};

    /// Writer whose shutdown always fails, like a bridge that already hung up
    struct HungUpWriter;

    impl AsyncWrite for HungUpWriter {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "bridge gone",
            )))
        }
    }

    /// Controller stand-in: answers every command with a busy then a settled frame
    async fn fake_controller(link: tokio::io::DuplexStream) -> Vec<String> {
        let (read_half, mut write_half) = split(link);
        let mut lines = BufReader::new(read_half).lines();
        let mut received = Vec::new();

        while let Ok(Some(line)) = lines.next_line().await {
            let step = received.len() + 1;
            received.push(line);
            let busy = format!("<ssf:1,pos:{step},0,0,0,0>\r\n");
            let settled = format!("ok\r\n<ssf:0,pos:{step},0,0,0,0>\r\n");
            if write_half.write_all(busy.as_bytes()).await.is_err()
                || write_half.write_all(settled.as_bytes()).await.is_err()
            {
                break;
            }
        }
        received
    }

    #[tokio::test]
    async fn test_execute_paces_on_idle() {
        let (controller, host) = tokio::io::duplex(1024);
        let controller_task = tokio::spawn(fake_controller(controller));

        let mut session = MotionSession::open(host, &ReaderConfig::default());
        let issued = session.execute(["MOVE 1", "", "MOVE 2"]).await.unwrap();
        assert_eq!(issued, 2);

        let latest = session.latest_status().unwrap();
        assert!(latest.is_settled());
        assert_eq!(latest.axes("pos").unwrap().x, 2.0);

        session.close().await.unwrap();
        let received = controller_task.await.unwrap();
        assert_eq!(received, vec!["MOVE 1".to_string(), "MOVE 2".to_string()]);
    }

    #[tokio::test]
    async fn test_wait_idle_returns_records_in_order() {
        let (controller, host) = tokio::io::duplex(1024);
        let _controller_task = tokio::spawn(fake_controller(controller));

        let mut session = MotionSession::open(host, &ReaderConfig::default());
        session.issue("MOVE 1").await.unwrap();
        let records = session.wait_idle().await.unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].number("ssf"), Some(1.0));
        assert_eq!(records[1].number("ssf"), Some(0.0));
    }

    #[tokio::test]
    async fn test_no_commands_after_link_closed() {
        let (controller, host) = tokio::io::duplex(1024);
        let mut session = MotionSession::open(host, &ReaderConfig::default());
        drop(controller);

        assert!(matches!(session.wait_idle().await, Err(LinkFault::Closed)));
        assert!(matches!(session.issue("MOVE 1").await, Err(LinkFault::Closed)));
    }

    #[tokio::test]
    async fn test_close_while_controller_keeps_streaming() {
        let (mut controller, host) = tokio::io::duplex(1024);
        let config = ReaderConfig {
            channel_capacity: 1,
            ..ReaderConfig::default()
        };
        let session = MotionSession::open(host, &config);

        for _ in 0..3 {
            controller.write_all(b"<ssf:1>\r\n").await.unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let closed = tokio::time::timeout(Duration::from_secs(2), session.close()).await;
        assert!(matches!(closed, Ok(Ok(()))));
    }

    #[tokio::test]
    async fn test_close_tolerates_failed_write_shutdown() {
        let (_controller, host) = tokio::io::duplex(64);
        let reader = spawn_reader(host, &ReaderConfig::default());
        let session = MotionSession::new(HungUpWriter, reader);

        assert!(session.close().await.is_ok());
    }
}
