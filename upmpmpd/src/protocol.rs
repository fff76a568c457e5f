//! The raw MPD text protocol over a `tokio::net::TcpStream`: one line per
//! command, a block of `key: value` lines terminated by `OK` or `ACK ...`
//! in reply. No vetted async MPD client crate is in the example pack, so
//! the facade owns a minimal, typed codec sufficient for the command list
//! in spec.md §6, the way the teacher owns a minimal codec for its other
//! raw TCP device protocols (`pmocontrol::arylic_tcp`) rather than pulling
//! in a heavyweight client library for a narrow command set.

use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::{Error, Result};

/// One open line-protocol connection to MPD.
pub(crate) struct Connection {
    reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
    writer: tokio::net::tcp::OwnedWriteHalf,
    timeout: Duration,
}

impl Connection {
    pub(crate) async fn connect(host: &str, port: u16, timeout_dur: Duration, password: &str) -> Result<Self> {
        let stream = timeout(timeout_dur, TcpStream::connect((host, port)))
            .await
            .map_err(|_| Error::Timeout(timeout_dur))?
            .map_err(Error::Connect)?;
        stream.set_nodelay(true).ok();
        let (read_half, write_half) = stream.into_split();
        let mut conn = Connection {
            reader: BufReader::new(read_half),
            writer: write_half,
            timeout: timeout_dur,
        };

        // consume the greeting line "OK MPD x.y.z"
        let greeting = conn.read_line().await?;
        if !greeting.starts_with("OK MPD") {
            return Err(Error::Protocol(format!("unexpected greeting: {greeting}")));
        }

        if !password.is_empty() {
            conn.command(&format!("password {password}")).await?;
        }

        Ok(conn)
    }

    pub(crate) fn protocol_version(greeting: &str) -> (u32, u32, u32) {
        let version = greeting.trim_start_matches("OK MPD ").trim();
        let mut parts = version.split('.');
        let major = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
        let minor = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
        let patch = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
        (major, minor, patch)
    }

    async fn read_line(&mut self) -> Result<String> {
        let mut line = String::new();
        let n = timeout(self.timeout, self.reader.read_line(&mut line))
            .await
            .map_err(|_| Error::Timeout(self.timeout))?
            .map_err(Error::Io)?;
        if n == 0 {
            return Err(Error::ConnectionClosed);
        }
        if line.ends_with('\n') {
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
        }
        Ok(line)
    }

    /// Send a single command line and collect the reply block up to `OK`.
    /// An `ACK ...` line is turned into `Error::Ack`.
    pub(crate) async fn command(&mut self, line: &str) -> Result<Vec<String>> {
        self.writer
            .write_all(format!("{line}\n").as_bytes())
            .await
            .map_err(Error::Io)?;
        self.writer.flush().await.map_err(Error::Io)?;
        self.read_block().await
    }

    async fn read_block(&mut self) -> Result<Vec<String>> {
        let mut lines = Vec::new();
        loop {
            let line = self.read_line().await?;
            if line == "OK" {
                return Ok(lines);
            }
            if let Some(rest) = line.strip_prefix("ACK ") {
                return Err(Error::Ack(rest.to_string()));
            }
            lines.push(line);
        }
    }

    /// Issue `idle <subsystems>` and block (no read timeout) until MPD
    /// reports a change or `noidle` is sent from another task over the
    /// same connection is impossible here — callers cancel by dropping
    /// the future, which simply drops the connection.
    pub(crate) async fn idle(&mut self, subsystems: &str) -> Result<Vec<String>> {
        self.writer
            .write_all(format!("idle {subsystems}\n").as_bytes())
            .await
            .map_err(Error::Io)?;
        self.writer.flush().await.map_err(Error::Io)?;

        let mut lines = Vec::new();
        loop {
            let mut line = String::new();
            let n = self.reader.read_line(&mut line).await.map_err(Error::Io)?;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
            let line = line.trim_end_matches(['\r', '\n']).to_string();
            if line == "OK" {
                return Ok(lines);
            }
            if let Some(rest) = line.strip_prefix("ACK ") {
                return Err(Error::Ack(rest.to_string()));
            }
            lines.push(line);
        }
    }
}

/// Split a `key: value` reply line.
pub(crate) fn split_kv(line: &str) -> Option<(&str, &str)> {
    line.split_once(": ")
}
