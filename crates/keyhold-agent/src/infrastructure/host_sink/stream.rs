//! [`PolicySink`] over an async byte stream.
//!
//! Each sink call is one request/reply exchange:
//!
//! ```text
//! agent ── [header][InstallPolicy (category, rules)] ──► host
//! agent ◄────────── [header][Accepted | Rejected] ────── host
//! ```
//!
//! Exchanges are strictly sequential on one stream; the stream mutex is held
//! from the write until the reply has been read.  The reply must carry the
//! request id of the command it answers.
//!
//! # Broken connections
//!
//! A timeout, I/O failure, or undecodable reply leaves the stream at an
//! unknown position: a late reply could otherwise be read as the answer to
//! the next command.  After any of these the sink is marked broken and every
//! later call fails with [`SinkError::Closed`] without touching the stream.
//! A [`SinkError::Rejected`] reply does not break the sink.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::{debug, warn};

use keyhold_core::protocol::{
    decode_header, decode_reply, encode_command, HostCommand, HostReply, ProtocolError,
    RequestCounter, HEADER_SIZE,
};
use keyhold_core::{Category, Propagation, Rule};

use crate::application::commit_policies::{PolicySink, SinkError};

/// Sends host commands over `S` and waits for each reply.
pub struct StreamSink<S> {
    stream: tokio::sync::Mutex<S>,
    requests: RequestCounter,
    reply_timeout: Duration,
    broken: AtomicBool,
}

impl StreamSink<TcpStream> {
    /// Opens a TCP connection to the host at `addr`.
    ///
    /// `reply_timeout` bounds both the connect and every later exchange.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Timeout`] if the host does not accept in time
    /// and [`SinkError::Io`] if the connection is refused.
    pub async fn connect(addr: impl ToSocketAddrs, reply_timeout: Duration) -> Result<Self, SinkError> {
        let stream = tokio::time::timeout(reply_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| SinkError::Timeout(reply_timeout))??;
        stream.set_nodelay(true)?;
        if let Ok(peer) = stream.peer_addr() {
            debug!(%peer, "connected to host");
        }
        Ok(Self::new(stream, reply_timeout))
    }
}

impl<S> StreamSink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S, reply_timeout: Duration) -> Self {
        Self {
            stream: tokio::sync::Mutex::new(stream),
            requests: RequestCounter::new(),
            reply_timeout,
            broken: AtomicBool::new(false),
        }
    }

    /// `true` once an exchange has failed in a way that desynchronised the stream.
    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::Acquire)
    }

    async fn send(&self, cmd: HostCommand) -> Result<(), SinkError> {
        if self.is_broken() {
            return Err(SinkError::Closed);
        }
        let request_id = self.requests.next();
        let frame = encode_command(&cmd, request_id)?;

        let mut stream = self.stream.lock().await;
        // Another caller may have broken the stream while we waited.
        if self.is_broken() {
            return Err(SinkError::Closed);
        }
        let outcome = tokio::time::timeout(self.reply_timeout, exchange(&mut *stream, &frame, request_id))
            .await
            .unwrap_or(Err(SinkError::Timeout(self.reply_timeout)));

        match outcome {
            Err(SinkError::Rejected(reason)) => {
                debug!(request_id, %reason, "host rejected command");
                Err(SinkError::Rejected(reason))
            }
            Err(e) => {
                warn!(request_id, error = %e, "host connection unusable; closing sink");
                self.broken.store(true, Ordering::Release);
                Err(e)
            }
            Ok(()) => Ok(()),
        }
    }

    async fn install(&self, category: Category, rules: Vec<Rule>) -> Result<(), SinkError> {
        self.send(HostCommand::InstallPolicy { category, rules }).await
    }
}

#[async_trait]
impl<S> PolicySink for StreamSink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn install_keyboard_policy(&self, rules: Vec<Rule>) -> Result<(), SinkError> {
        self.install(Category::Keyboard, rules).await
    }

    async fn install_pointer_policy(&self, rules: Vec<Rule>) -> Result<(), SinkError> {
        self.install(Category::Pointer, rules).await
    }

    async fn set_default_propagation_mode(&self, mode: Propagation) -> Result<(), SinkError> {
        self.send(HostCommand::SetDefaultPropagation(mode)).await
    }
}

/// Writes one frame and reads the matching reply.
async fn exchange<S>(stream: &mut S, frame: &[u8], request_id: u64) -> Result<(), SinkError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(frame).await?;
    stream.flush().await?;

    let mut buf = vec![0u8; HEADER_SIZE];
    read_exact_or_closed(stream, &mut buf).await?;
    let header = decode_header(&buf)?;
    buf.resize(HEADER_SIZE + header.payload_length as usize, 0);
    read_exact_or_closed(stream, &mut buf[HEADER_SIZE..]).await?;

    let (received, reply, _) = decode_reply(&buf)?;
    if received != request_id {
        return Err(ProtocolError::RequestIdMismatch {
            expected: request_id,
            received,
        }
        .into());
    }
    match reply {
        HostReply::Accepted => Ok(()),
        HostReply::Rejected { reason } => Err(SinkError::Rejected(reason)),
    }
}

async fn read_exact_or_closed<S>(stream: &mut S, buf: &mut [u8]) -> Result<(), SinkError>
where
    S: AsyncRead + Unpin,
{
    match stream.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(SinkError::Closed),
        Err(e) => Err(e.into()),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use keyhold_core::protocol::{decode_command, encode_reply};
    use keyhold_core::{KeyId, Modifiers};
    use tokio::io::DuplexStream;

    const TIMEOUT: Duration = Duration::from_secs(2);

    fn rules() -> Vec<Rule> {
        vec![Rule::keydown(Propagation::Suppress, KeyId::Char('w'), Modifiers::CTRL)]
    }

    fn install_frame(category: Category, rules: Vec<Rule>, id: u64) -> Vec<u8> {
        encode_command(&HostCommand::InstallPolicy { category, rules }, id).unwrap()
    }

    /// Reads one command frame from the host end of a duplex pipe.
    async fn read_command(host: &mut DuplexStream) -> Option<(u64, HostCommand)> {
        let mut buf = vec![0u8; HEADER_SIZE];
        host.read_exact(&mut buf).await.ok()?;
        let header = decode_header(&buf).ok()?;
        buf.resize(HEADER_SIZE + header.payload_length as usize, 0);
        host.read_exact(&mut buf[HEADER_SIZE..]).await.ok()?;
        let (id, cmd, _) = decode_command(&buf).ok()?;
        Some((id, cmd))
    }

    #[tokio::test]
    async fn test_install_writes_exact_frame_and_accepts_reply() {
        // Arrange
        let mock = tokio_test::io::Builder::new()
            .write(&install_frame(Category::Keyboard, rules(), 1))
            .read(&encode_reply(&HostReply::Accepted, 1).unwrap())
            .build();
        let sink = StreamSink::new(mock, TIMEOUT);

        // Act
        let result = sink.install_keyboard_policy(rules()).await;

        // Assert
        assert!(result.is_ok());
        assert!(!sink.is_broken());
    }

    #[tokio::test]
    async fn test_request_ids_increase_per_command() {
        let mock = tokio_test::io::Builder::new()
            .write(&encode_command(&HostCommand::SetDefaultPropagation(Propagation::Suppress), 1).unwrap())
            .read(&encode_reply(&HostReply::Accepted, 1).unwrap())
            .write(&install_frame(Category::Pointer, Vec::new(), 2))
            .read(&encode_reply(&HostReply::Accepted, 2).unwrap())
            .build();
        let sink = StreamSink::new(mock, TIMEOUT);

        sink.set_default_propagation_mode(Propagation::Suppress).await.unwrap();
        sink.install_pointer_policy(Vec::new()).await.unwrap();
    }

    #[tokio::test]
    async fn test_rejected_reply_is_reported_and_sink_stays_usable() {
        // Arrange
        let reject = HostReply::Rejected {
            reason: "policy too large".to_string(),
        };
        let mock = tokio_test::io::Builder::new()
            .write(&install_frame(Category::Keyboard, rules(), 1))
            .read(&encode_reply(&reject, 1).unwrap())
            .write(&install_frame(Category::Keyboard, Vec::new(), 2))
            .read(&encode_reply(&HostReply::Accepted, 2).unwrap())
            .build();
        let sink = StreamSink::new(mock, TIMEOUT);

        // Act
        let first = sink.install_keyboard_policy(rules()).await;
        let second = sink.install_keyboard_policy(Vec::new()).await;

        // Assert
        assert!(matches!(first, Err(SinkError::Rejected(ref r)) if r == "policy too large"));
        assert!(second.is_ok());
        assert!(!sink.is_broken());
    }

    #[tokio::test]
    async fn test_reply_for_other_request_breaks_sink() {
        // Arrange
        let mock = tokio_test::io::Builder::new()
            .write(&install_frame(Category::Keyboard, rules(), 1))
            .read(&encode_reply(&HostReply::Accepted, 9).unwrap())
            .build();
        let sink = StreamSink::new(mock, TIMEOUT);

        // Act
        let err = sink.install_keyboard_policy(rules()).await.unwrap_err();

        // Assert
        assert!(matches!(
            err,
            SinkError::Protocol(ProtocolError::RequestIdMismatch {
                expected: 1,
                received: 9
            })
        ));
        assert!(sink.is_broken());
    }

    #[tokio::test]
    async fn test_silent_host_times_out_then_sink_is_closed() {
        // Arrange – keep the host end open but never answer
        let (agent, _host) = tokio::io::duplex(4096);
        let sink = StreamSink::new(agent, Duration::from_millis(50));

        // Act
        let first = sink.install_keyboard_policy(rules()).await;
        let second = sink.install_keyboard_policy(rules()).await;

        // Assert
        assert!(matches!(first, Err(SinkError::Timeout(_))));
        assert!(matches!(second, Err(SinkError::Closed)));
    }

    #[tokio::test]
    async fn test_host_hanging_up_reports_closed() {
        // Arrange – host reads the command and drops its end
        let (agent, mut host) = tokio::io::duplex(4096);
        let host_task = tokio::spawn(async move {
            let received = read_command(&mut host).await;
            drop(host);
            received
        });
        let sink = StreamSink::new(agent, TIMEOUT);

        // Act
        let err = sink.install_pointer_policy(Vec::new()).await.unwrap_err();

        // Assert
        assert!(matches!(err, SinkError::Closed));
        let (id, cmd) = host_task.await.unwrap().expect("host saw the command");
        assert_eq!(id, 1);
        assert_eq!(
            cmd,
            HostCommand::InstallPolicy {
                category: Category::Pointer,
                rules: Vec::new()
            }
        );
    }

    #[tokio::test]
    async fn test_fake_host_receives_commands_in_order() {
        // Arrange – a host that accepts everything and records what it saw
        let (agent, mut host) = tokio::io::duplex(4096);
        let host_task = tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some((id, cmd)) = read_command(&mut host).await {
                let reply = encode_reply(&HostReply::Accepted, id).unwrap();
                host.write_all(&reply).await.unwrap();
                seen.push(cmd);
            }
            seen
        });
        let sink = StreamSink::new(agent, TIMEOUT);

        // Act
        sink.set_default_propagation_mode(Propagation::Suppress).await.unwrap();
        sink.install_keyboard_policy(rules()).await.unwrap();
        drop(sink);

        // Assert
        let seen = host_task.await.unwrap();
        assert_eq!(
            seen,
            vec![
                HostCommand::SetDefaultPropagation(Propagation::Suppress),
                HostCommand::InstallPolicy {
                    category: Category::Keyboard,
                    rules: rules()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_is_io_error() {
        // Arrange – bind then drop to find a port nothing listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        // Act
        let result = StreamSink::connect(addr, TIMEOUT).await;

        // Assert
        assert!(matches!(result, Err(SinkError::Io(_))));
    }
}
