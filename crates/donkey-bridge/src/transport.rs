//! Transport abstractions for the simulator connection
//!
//! Provides AsyncReader/AsyncWriter traits so the receive loop and the send
//! path can run over TCP in production and in-memory pipes in tests.

use async_trait::async_trait;
use donkey_rl_core::{DonkeyError, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Largest single message accepted from the simulator (16MB)
pub const MAX_MESSAGE_LEN: usize = 16 * 1024 * 1024;

/// Trait for async reading from a transport
#[async_trait]
pub trait AsyncReader: Send {
    /// Read one complete message (without its terminator).
    ///
    /// End of stream is reported as `ConnectionLost`.
    async fn read_message(&mut self) -> Result<Vec<u8>>;
}

/// Trait for async writing to a transport
#[async_trait]
pub trait AsyncWriter: Send + Sync {
    /// Write one complete message
    async fn write_message(&mut self, data: &[u8]) -> Result<()>;

    /// Close the write side
    async fn shutdown(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Newline-delimited message reader over any byte stream
pub struct LineReader<R> {
    inner: BufReader<R>,
}

impl<R: AsyncRead + Unpin + Send> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
        }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> AsyncReader for LineReader<R> {
    async fn read_message(&mut self) -> Result<Vec<u8>> {
        loop {
            let mut line = Vec::new();
            let n = (&mut self.inner)
                .take(MAX_MESSAGE_LEN as u64 + 1)
                .read_until(b'\n', &mut line)
                .await
                .map_err(|e| DonkeyError::ConnectionLost(format!("read failed: {}", e)))?;

            if n == 0 {
                return Err(DonkeyError::ConnectionLost(
                    "simulator closed the connection".into(),
                ));
            }
            if line.last() == Some(&b'\n') {
                line.pop();
            } else if line.len() > MAX_MESSAGE_LEN {
                return Err(DonkeyError::ConnectionLost(format!(
                    "message exceeds {} bytes",
                    MAX_MESSAGE_LEN
                )));
            }
            if line.last() == Some(&b'\r') {
                line.pop();
            }

            // Blank keepalive lines carry nothing
            if line.iter().all(|b| b.is_ascii_whitespace()) {
                continue;
            }
            return Ok(line);
        }
    }
}

/// Newline-delimited message writer over any byte stream
pub struct LineWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin + Send + Sync> LineWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send + Sync> AsyncWriter for LineWriter<W> {
    async fn write_message(&mut self, data: &[u8]) -> Result<()> {
        let mut framed = Vec::with_capacity(data.len() + 1);
        framed.extend_from_slice(data);
        framed.push(b'\n');

        self.inner
            .write_all(&framed)
            .await
            .map_err(|e| DonkeyError::ConnectionLost(format!("write failed: {}", e)))?;

        // Flush to ensure data is sent
        self.inner
            .flush()
            .await
            .map_err(|e| DonkeyError::ConnectionLost(format!("flush failed: {}", e)))?;

        Ok(())
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.inner.shutdown().await.map_err(DonkeyError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_line_roundtrip() {
        let (a, b) = duplex(1024);
        let mut writer = LineWriter::new(a);
        let mut reader = LineReader::new(b);

        writer.write_message(br#"{"msg_type":"ping"}"#).await.unwrap();
        writer.write_message(br#"{"msg_type":"car_loaded"}"#).await.unwrap();

        assert_eq!(reader.read_message().await.unwrap(), br#"{"msg_type":"ping"}"#);
        assert_eq!(reader.read_message().await.unwrap(), br#"{"msg_type":"car_loaded"}"#);
    }

    #[tokio::test]
    async fn test_skips_blank_lines_and_crlf() {
        let (mut a, b) = duplex(1024);
        let mut reader = LineReader::new(b);

        a.write_all(b"\n\r\n{\"msg_type\":\"ping\"}\r\n").await.unwrap();
        assert_eq!(reader.read_message().await.unwrap(), br#"{"msg_type":"ping"}"#);
    }

    #[tokio::test]
    async fn test_eof_is_connection_lost() {
        let (a, b) = duplex(64);
        let mut reader = LineReader::new(b);
        drop(a);

        let err = reader.read_message().await.unwrap_err();
        assert!(matches!(err, DonkeyError::ConnectionLost(_)));
    }

    #[tokio::test]
    async fn test_final_unterminated_message() {
        let (mut a, b) = duplex(64);
        let mut reader = LineReader::new(b);
        a.write_all(b"{\"msg_type\":\"ping\"}").await.unwrap();
        drop(a);

        assert_eq!(reader.read_message().await.unwrap(), br#"{"msg_type":"ping"}"#);
        assert!(reader.read_message().await.is_err());
    }

    #[tokio::test]
    async fn test_write_to_closed_peer_fails() {
        let (a, b) = duplex(64);
        let mut writer = LineWriter::new(a);
        drop(b);

        let err = writer.write_message(b"{}").await.unwrap_err();
        assert!(matches!(err, DonkeyError::ConnectionLost(_)));
    }
}
