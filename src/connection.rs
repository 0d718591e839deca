//! Buffered line-oriented connection to a peer, usually a [`TcpStream`].
use crate::{Error, Result};
use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::{debug, error};

const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;

/// A trait for types that can be used as a connection stream.
pub(crate) trait ConnectionStream: AsyncRead + AsyncWrite + Unpin + Send {}

// Blanket implementation for all types that implement `AsyncRead + AsyncWrite + Unpin + Send`.
impl<T: AsyncRead + AsyncWrite + Unpin + Send> ConnectionStream for T {}

/// Send and receive newline-delimited ASCII lines from a remote peer.
///
/// To read a line, the connection buffers incoming bytes until a `\n` is
/// found. Any bytes remaining in the buffer after a line is extracted are
/// kept for the next call. This mirrors the framing discipline used for the
/// `REGISTER` / `TASK_DONE` persistent-socket messages (§6): readers must
/// tolerate short reads and partial lines across `recv` boundaries.
#[derive(Debug)]
pub(crate) struct LineConnection<S> {
    stream: BufWriter<S>,
    buffer: BytesMut,
}

impl<S: ConnectionStream> LineConnection<S> {
    pub(crate) fn new(socket: S) -> Self {
        Self {
            stream: BufWriter::new(socket),
            buffer: BytesMut::with_capacity(DEFAULT_BUFFER_SIZE),
        }
    }

    /// Read a single `\n`-terminated line, stripping an optional trailing
    /// `\r`. Returns `Ok(None)` on a clean peer close (no data buffered when
    /// the stream hits EOF). A peer close in the middle of a line is an
    /// error: the message was not fully delivered.
    pub(crate) async fn read_line(&mut self) -> Result<Option<String>> {
        loop {
            if let Some(line) = self.take_line()? {
                debug!(?line, "line received");
                return Ok(Some(line));
            }

            if 0 == self.stream.read_buf(&mut self.buffer).await? {
                if self.buffer.is_empty() {
                    return Ok(None);
                } else {
                    error!("connection was closed mid line");
                    return Err(Error::ClosedMidLine);
                }
            }
        }
    }

    fn take_line(&mut self) -> Result<Option<String>> {
        let Some(newline_pos) = self.buffer.iter().position(|&b| b == b'\n') else {
            return Ok(None);
        };

        let mut line = self.buffer.split_to(newline_pos + 1);
        line.truncate(line.len() - 1); // drop '\n'
        if line.last() == Some(&b'\r') {
            line.truncate(line.len() - 1);
        }

        Ok(Some(String::from_utf8(line.to_vec())?))
    }

    /// Read whatever bytes are immediately available in a single underlying
    /// `recv`, bounded by the connection's buffer, and split them into
    /// complete-or-trailing lines. Used by the Client Session Handler, which
    /// reads "up to one network buffer's worth of bytes" rather than looping
    /// until the peer closes (§4.2).
    pub(crate) async fn read_burst(&mut self) -> Result<Vec<String>> {
        self.stream.read_buf(&mut self.buffer).await?;

        let lines = self
            .buffer
            .split(|&b| b == b'\n')
            .filter(|chunk| !chunk.is_empty())
            .map(|chunk| {
                let chunk = if chunk.last() == Some(&b'\r') {
                    &chunk[..chunk.len() - 1]
                } else {
                    chunk
                };
                String::from_utf8_lossy(chunk).into_owned()
            })
            .collect();

        self.buffer.clear();
        Ok(lines)
    }

    /// Write a raw, unframed payload with no trailing delimiter, used for
    /// the one-shot task-assignment and `SHUTDOWN` messages (§6), which
    /// carry no line terminator.
    pub(crate) async fn write_raw(&mut self, payload: &[u8]) -> Result<()> {
        self.stream.write_all(payload).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Write a `\n`-terminated line, used for `TASK_DONE` on the
    /// persistent node socket.
    pub(crate) async fn write_line(&mut self, line: &str) -> Result<()> {
        self.stream.write_all(line.as_bytes()).await?;
        self.stream.write_all(b"\n").await?;
        self.stream.flush().await?;
        Ok(())
    }
}
