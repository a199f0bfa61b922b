//! TCP-backed SLCAN transport: lines of the form
//! `T<id:8hex><len:1>[<data:2N hex>]\r` over a plain TCP socket
//! (`spec.md` §6).

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use super::{SlcanReader, SlcanTransport};

pub struct TcpSlcanTransport {
    stream: TcpStream,
}

impl TcpSlcanTransport {
    pub async fn connect(host: &str, port: u16) -> std::io::Result<Self> {
        let stream = TcpStream::connect((host, port)).await?;
        Ok(Self { stream })
    }

    /// Split into independent read/write halves so the RX activity and
    /// the Transmitter can own them separately without sharing a lock
    /// across unrelated concerns.
    pub fn into_split(self) -> (TcpSlcanReader, TcpSlcanWriter) {
        let (read_half, write_half) = self.stream.into_split();
        (
            TcpSlcanReader {
                reader: BufReader::new(read_half),
                buf: Vec::new(),
            },
            TcpSlcanWriter { writer: write_half },
        )
    }
}

pub struct TcpSlcanWriter {
    writer: tokio::net::tcp::OwnedWriteHalf,
}

#[async_trait]
impl SlcanTransport for TcpSlcanWriter {
    async fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\r").await?;
        self.writer.flush().await
    }
}

pub struct TcpSlcanReader {
    reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
    buf: Vec<u8>,
}

#[async_trait]
impl SlcanReader for TcpSlcanReader {
    async fn read_line(&mut self) -> std::io::Result<Option<String>> {
        let mut byte = [0u8; 1];
        self.buf.clear();
        loop {
            let n = self.reader.read(&mut byte).await?;
            if n == 0 {
                return Ok(None);
            }
            if byte[0] == b'\r' || byte[0] == b'\n' {
                if self.buf.is_empty() {
                    continue;
                }
                let line = String::from_utf8_lossy(&self.buf).into_owned();
                return Ok(Some(line));
            }
            self.buf.push(byte[0]);
        }
    }
}
