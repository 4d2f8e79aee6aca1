//! Minimal NNTP client used by the health sampler.
//!
//! Only the commands availability checking needs: connect, AUTHINFO,
//! STAT per message-id, QUIT. STAT is the cheapest existence probe the
//! protocol offers, a single status line per article with no body
//! transfer.

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

#[derive(Debug, Error)]
pub enum NntpError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("authentication rejected: {0}")]
    AuthRejected(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Outcome of a STAT probe for one segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentStatus {
    /// 223: the article exists on the server.
    Present,
    /// 430: no article with that message-id. Expected for decayed or
    /// taken-down content; counted as a failure, not an error.
    Missing,
}

const STATUS_ARTICLE_EXISTS: u16 = 223;
const STATUS_NO_SUCH_ARTICLE: u16 = 430;

#[derive(Debug)]
pub struct NntpConnection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl NntpConnection {
    /// Connect and authenticate. Consumes the server greeting.
    pub async fn connect(
        host: &str,
        port: u16,
        username: &str,
        password: &str,
    ) -> Result<Self, NntpError> {
        let stream = TcpStream::connect((host, port)).await?;
        let (read_half, write_half) = stream.into_split();
        let mut conn = Self {
            reader: BufReader::new(read_half),
            writer: write_half,
        };
        let (code, line) = conn.read_status().await?;
        if code != 200 && code != 201 {
            return Err(NntpError::Protocol(format!("unexpected greeting: {line}")));
        }
        conn.authenticate(username, password).await?;
        Ok(conn)
    }

    async fn authenticate(&mut self, username: &str, password: &str) -> Result<(), NntpError> {
        let (code, line) = self
            .command(&format!("AUTHINFO USER {username}"))
            .await?;
        match code {
            281 => return Ok(()),
            381 => {}
            _ => return Err(NntpError::AuthRejected(line)),
        }
        let (code, line) = self
            .command(&format!("AUTHINFO PASS {password}"))
            .await?;
        if code != 281 {
            return Err(NntpError::AuthRejected(line));
        }
        Ok(())
    }

    /// Probe one article by message-id.
    pub async fn stat(&mut self, message_id: &str) -> Result<SegmentStatus, NntpError> {
        let (code, line) = self.command(&format!("STAT <{message_id}>")).await?;
        match code {
            STATUS_ARTICLE_EXISTS => Ok(SegmentStatus::Present),
            STATUS_NO_SUCH_ARTICLE => Ok(SegmentStatus::Missing),
            _ => Err(NntpError::Protocol(format!("STAT {message_id}: {line}"))),
        }
    }

    pub async fn quit(mut self) -> Result<(), NntpError> {
        // Best effort: the connection is going away either way.
        let _ = self.command("QUIT").await;
        Ok(())
    }

    async fn command(&mut self, cmd: &str) -> Result<(u16, String), NntpError> {
        self.writer.write_all(cmd.as_bytes()).await?;
        self.writer.write_all(b"\r\n").await?;
        self.writer.flush().await?;
        self.read_status().await
    }

    async fn read_status(&mut self) -> Result<(u16, String), NntpError> {
        let mut line = String::new();
        let read = self.reader.read_line(&mut line).await?;
        if read == 0 {
            return Err(NntpError::Protocol("connection closed".to_string()));
        }
        let line = line.trim_end().to_string();
        let code = line
            .get(..3)
            .and_then(|c| c.parse::<u16>().ok())
            .ok_or_else(|| NntpError::Protocol(format!("malformed status line: {line}")))?;
        Ok((code, line))
    }
}
