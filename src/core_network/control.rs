//! The control channel: owns the command socket, frames replies
//! (single-line, multi-line, deferred-until-next-reply), reads command
//! lines with an idle timeout and upgrades itself to TLS in place on
//! `AUTH TLS`.

use std::net::SocketAddr;
use std::time::Duration;

use log::debug;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsAcceptor;

use crate::core_network::error::{FtpError, Result};

/// Object-safe alias for the underlying socket, plain or TLS-wrapped.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

/// Reply code for one line. `NoCode` emits a bare continuation line with no
/// numeric prefix; `Deferred` buffers the line for the next final reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyCode {
    Code(u16),
    NoCode,
    Deferred,
}

impl From<u16> for ReplyCode {
    fn from(code: u16) -> Self {
        ReplyCode::Code(code)
    }
}

pub struct ControlChannel {
    stream: Option<Box<dyn AsyncStream>>,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
    read_buf: Vec<u8>,
    last_code: Option<u16>,
    deferred: Vec<String>,
    single_line_replies: bool,
    tls: bool,
    bytes_read: u64,
    bytes_written: u64,
}

impl ControlChannel {
    pub fn new(stream: TcpStream) -> Result<Self> {
        let local_addr = stream.local_addr().map_err(FtpError::Network)?;
        let peer_addr = stream.peer_addr().map_err(FtpError::Network)?;
        Ok(Self::from_parts(Box::new(stream), local_addr, peer_addr))
    }

    /// Builds a channel over any stream; used by tests with in-memory pipes.
    pub fn from_parts(
        stream: Box<dyn AsyncStream>,
        local_addr: SocketAddr,
        peer_addr: SocketAddr,
    ) -> Self {
        Self {
            stream: Some(stream),
            local_addr,
            peer_addr,
            read_buf: Vec::new(),
            last_code: None,
            deferred: Vec::new(),
            single_line_replies: false,
            tls: false,
            bytes_read: 0,
            bytes_written: 0,
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn is_tls(&self) -> bool {
        self.tls
    }

    pub fn set_single_line_replies(&mut self, single: bool) {
        self.single_line_replies = single;
    }

    pub fn single_line_replies(&self) -> bool {
        self.single_line_replies
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    fn stream_mut(&mut self) -> Result<&mut Box<dyn AsyncStream>> {
        self.stream
            .as_mut()
            .ok_or_else(|| FtpError::Protocol("Control stream missing".to_string()))
    }

    /// Sends one reply line. Within one logical reply every line must carry
    /// the same code; a mismatch is a protocol error and nothing is sent.
    pub async fn send_reply(
        &mut self,
        code: ReplyCode,
        part: bool,
        message: &str,
    ) -> Result<()> {
        if self.single_line_replies && part {
            return Ok(());
        }

        let line = match code {
            ReplyCode::Code(n) => {
                if let Some(last) = self.last_code {
                    if last != n {
                        return Err(FtpError::Protocol(format!(
                            "Invalid reply code sequence: {} after {}",
                            n, last
                        )));
                    }
                }
                format!("{:03}{}{}", n, if part { '-' } else { ' ' }, message)
            }
            ReplyCode::NoCode => message.to_string(),
            ReplyCode::Deferred => {
                return Err(FtpError::Protocol(
                    "Deferred code cannot be sent directly".to_string(),
                ))
            }
        };

        debug!("<- {}", line);
        let wire = format!("{}\r\n", line);
        let stream = self.stream_mut()?;
        stream
            .write_all(wire.as_bytes())
            .await
            .map_err(FtpError::Network)?;
        self.bytes_written += wire.len() as u64;

        if let ReplyCode::Code(n) = code {
            self.last_code = Some(n);
        }
        Ok(())
    }

    /// Queues or sends an intermediate line. `ReplyCode::Deferred`
    /// accumulates the lines for the next call to `reply`.
    pub async fn part_reply(&mut self, code: ReplyCode, messages: &str) -> Result<()> {
        if code == ReplyCode::Deferred {
            self.deferred
                .extend(messages.split('\n').map(str::to_string));
            return Ok(());
        }
        self.multi_reply(code, false, messages).await
    }

    /// Sends the terminating line of a reply, flushing any deferred lines
    /// first, and resets the code tracker.
    pub async fn reply(&mut self, code: impl Into<ReplyCode>, messages: &str) -> Result<()> {
        let code = code.into();
        if !self.deferred.is_empty() {
            let deferred: Vec<String> = std::mem::take(&mut self.deferred);
            for line in &deferred {
                self.send_reply(code, true, line).await?;
            }
        }
        self.multi_reply(code, true, messages).await?;
        self.last_code = None;
        Ok(())
    }

    /// Splits `messages` on newline; all but the last line go out as
    /// partial, the last as partial-or-final depending on `is_final`.
    pub async fn multi_reply(
        &mut self,
        code: impl Into<ReplyCode>,
        is_final: bool,
        messages: &str,
    ) -> Result<()> {
        let code = code.into();
        let lines: Vec<&str> = messages.split('\n').collect();
        let (last, rest) = lines.split_last().unwrap_or((&"", &[]));
        for line in rest {
            self.send_reply(code, true, line).await?;
        }
        self.send_reply(code, !is_final, last).await
    }

    /// Reads one command line, blocking up to `timeout` when given. Strips
    /// trailing CR/LF and Telnet IAC sequences. Timeout, hang-up and
    /// transport failure each surface as their own error kind.
    pub async fn next_command(&mut self, timeout: Option<Duration>) -> Result<String> {
        let line = match timeout {
            Some(t) => tokio::time::timeout(t, self.read_line())
                .await
                .map_err(|_| FtpError::Timeout)??,
            None => self.read_line().await?,
        };
        debug!("-> {}", line);
        Ok(line)
    }

    async fn read_line(&mut self) -> Result<String> {
        loop {
            if let Some(pos) = self.read_buf.iter().position(|&b| b == b'\n') {
                let raw: Vec<u8> = self.read_buf.drain(..=pos).collect();
                let cleaned: Vec<u8> = raw
                    .into_iter()
                    .filter(|&b| b != b'\r' && b != b'\n' && b < 0xf0)
                    .collect();
                return Ok(String::from_utf8_lossy(&cleaned).into_owned());
            }

            let mut chunk = [0u8; 1024];
            let n = self
                .stream_mut()?
                .read(&mut chunk)
                .await
                .map_err(FtpError::from_io)?;
            if n == 0 {
                return Err(FtpError::EndOfStream);
            }
            self.read_buf.extend_from_slice(&chunk[..n]);
            self.bytes_read += n as u64;
        }
    }

    /// Performs a server-role TLS handshake in place; all subsequent
    /// reads and writes go through the encrypted stream.
    pub async fn negotiate_tls(&mut self, acceptor: &TlsAcceptor) -> Result<()> {
        let stream = self
            .stream
            .take()
            .ok_or_else(|| FtpError::Protocol("Control stream missing".to_string()))?;
        let tls_stream = acceptor
            .accept(stream)
            .await
            .map_err(FtpError::Network)?;
        self.stream = Some(Box::new(tls_stream));
        self.tls = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt};

    fn test_channel() -> (ControlChannel, tokio::io::DuplexStream) {
        let (client, server) = duplex(4096);
        let addr: SocketAddr = "127.0.0.1:21".parse().unwrap();
        let peer: SocketAddr = "127.0.0.1:50000".parse().unwrap();
        (
            ControlChannel::from_parts(Box::new(server), addr, peer),
            client,
        )
    }

    async fn read_out(client: &mut tokio::io::DuplexStream) -> String {
        let mut buf = vec![0u8; 4096];
        let n = client.read(&mut buf).await.unwrap();
        String::from_utf8_lossy(&buf[..n]).into_owned()
    }

    #[tokio::test]
    async fn reply_framing_is_bit_exact() {
        let (mut chan, mut client) = test_channel();
        chan.reply(220u16, "Service ready.").await.unwrap();
        assert_eq!(read_out(&mut client).await, "220 Service ready.\r\n");
    }

    #[tokio::test]
    async fn multi_line_reply_uses_dash_separator() {
        let (mut chan, mut client) = test_channel();
        chan.reply(211u16, "Status:\nline two\nEnd.").await.unwrap();
        assert_eq!(
            read_out(&mut client).await,
            "211-Status:\r\n211-line two\r\n211 End.\r\n"
        );
    }

    #[tokio::test]
    async fn no_code_continuation_lines() {
        let (mut chan, mut client) = test_channel();
        chan.part_reply(ReplyCode::Code(211), "Features:").await.unwrap();
        chan.part_reply(ReplyCode::NoCode, " EPSV").await.unwrap();
        chan.reply(211u16, "End.").await.unwrap();
        assert_eq!(
            read_out(&mut client).await,
            "211-Features:\r\n EPSV\r\n211 End.\r\n"
        );
    }

    #[tokio::test]
    async fn mismatched_code_sequence_rejected() {
        let (mut chan, _client) = test_channel();
        chan.part_reply(ReplyCode::Code(211), "part").await.unwrap();
        let err = chan.send_reply(ReplyCode::Code(226), false, "done").await;
        assert!(matches!(err, Err(FtpError::Protocol(_))));
    }

    #[tokio::test]
    async fn final_reply_resets_code_tracker() {
        let (mut chan, mut client) = test_channel();
        chan.part_reply(ReplyCode::Code(211), "part").await.unwrap();
        chan.reply(211u16, "done").await.unwrap();
        // a new code is fine after the reset
        chan.reply(226u16, "ok").await.unwrap();
        let out = read_out(&mut client).await;
        assert!(out.ends_with("226 ok\r\n"));
    }

    #[tokio::test]
    async fn deferred_lines_flushed_under_next_reply_code() {
        let (mut chan, mut client) = test_channel();
        chan.part_reply(ReplyCode::Deferred, "dupe: file.rar")
            .await
            .unwrap();
        // nothing hits the wire until the next explicit reply
        chan.reply(226u16, "Transfer complete.").await.unwrap();
        assert_eq!(
            read_out(&mut client).await,
            "226-dupe: file.rar\r\n226 Transfer complete.\r\n"
        );
    }

    #[tokio::test]
    async fn single_line_mode_suppresses_partials() {
        let (mut chan, mut client) = test_channel();
        chan.set_single_line_replies(true);
        chan.reply(211u16, "one\ntwo\nEnd.").await.unwrap();
        assert_eq!(read_out(&mut client).await, "211 End.\r\n");
    }

    #[tokio::test]
    async fn command_read_strips_crlf_and_telnet_bytes() {
        let (mut chan, mut client) = test_channel();
        tokio::io::AsyncWriteExt::write_all(&mut client, b"NOOP\xff\xf4\r\n")
            .await
            .unwrap();
        let cmd = chan.next_command(None).await.unwrap();
        assert_eq!(cmd, "NOOP");
    }

    #[tokio::test]
    async fn command_read_timeout_is_distinct() {
        let (mut chan, _client) = test_channel();
        let err = chan
            .next_command(Some(Duration::from_millis(20)))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn peer_hangup_is_end_of_stream() {
        let (mut chan, client) = test_channel();
        drop(client);
        let err = chan.next_command(None).await.unwrap_err();
        assert!(matches!(err, FtpError::EndOfStream));
    }
}
