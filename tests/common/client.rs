//! Test IRC client.
//!
//! Line-oriented: assertions compare the raw lines the gateway sent, with
//! the trailing CRLF removed.

use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::time::timeout;

pub struct TestClient {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
    nick: String,
}

impl TestClient {
    pub async fn connect(addr: SocketAddr, nick: &str) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read_half),
            writer: BufWriter::new(write_half),
            nick: nick.to_string(),
        })
    }

    /// Send one line; CRLF is added.
    pub async fn send(&mut self, line: &str) -> anyhow::Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\r\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    pub async fn recv(&mut self) -> anyhow::Result<String> {
        self.recv_timeout(Duration::from_secs(5)).await
    }

    pub async fn recv_timeout(&mut self, dur: Duration) -> anyhow::Result<String> {
        let mut line = String::new();
        let n = timeout(dur, self.reader.read_line(&mut line)).await??;
        if n == 0 {
            anyhow::bail!("connection closed");
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    /// Read lines up to and including the first one matching `predicate`.
    pub async fn recv_until<F>(&mut self, mut predicate: F) -> anyhow::Result<Vec<String>>
    where
        F: FnMut(&str) -> bool,
    {
        let mut lines = Vec::new();
        loop {
            let line = self.recv().await?;
            let done = predicate(&line);
            lines.push(line);
            if done {
                return Ok(lines);
            }
        }
    }

    /// Whether nothing arrives within `dur`.
    pub async fn is_quiet(&mut self, dur: Duration) -> bool {
        self.recv_timeout(dur).await.is_err()
    }

    /// NICK + USER, then wait for the end of the welcome burst.
    pub async fn register(&mut self) -> anyhow::Result<Vec<String>> {
        let nick = self.nick.clone();
        self.send(&format!("NICK {nick}")).await?;
        self.send(&format!("USER {nick} 0 * :Test User {nick}")).await?;
        let lines = self
            .recv_until(|line| line.contains(" NOTICE ") && line.contains(":Connected to "))
            .await?;
        if !lines.iter().any(|l| l.contains(" 001 ")) {
            anyhow::bail!("registration failed: no 001 in {lines:?}");
        }
        Ok(lines)
    }

    /// JOIN and wait for the end of NAMES.
    pub async fn join(&mut self, channel: &str) -> anyhow::Result<Vec<String>> {
        self.send(&format!("JOIN {channel}")).await?;
        self.recv_until(|line| line.contains(" 366 ")).await
    }
}
