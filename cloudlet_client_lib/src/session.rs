use std::io;

use cloudlet_client::header::{HeaderError, ProtocolVersion, SessionHeader};
use futures::{Stream, StreamExt};
use log::{debug, error, info};
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf},
    select,
    task::{JoinError, JoinHandle},
};
use tokio_util::{
    codec::{FramedRead, LinesCodec, LinesCodecError},
    sync::CancellationToken,
};
use utils::net::{connect, TransportError};

use crate::console::Console;

pub const QUIT_COMMAND: &str = "/q";
const RECV_BUFFER_SIZE: usize = 8192;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Failed to connect to the application: {0}")]
    ConnectionFailed(#[from] TransportError),
    #[error("Invalid session header: {0}")]
    InvalidHeader(#[from] HeaderError),
    #[error("Failed to send session header")]
    HeaderSendFailed(#[source] io::Error),
    #[error("Failed to send message")]
    SendFailed(#[source] io::Error),
    #[error("Failed to read console input")]
    ConsoleReadFailed(#[from] LinesCodecError),
    #[error("Failed to write console output")]
    ConsoleWriteFailed(#[source] io::Error),
    #[error("Receiver task failed: {0}")]
    ReceiverFailed(#[from] JoinError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    HeaderSent,
    Interactive,
    Closing,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    ConsoleClosed,
    QuitCommand,
    PeerClosed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub sent_lines: usize,
    pub received_chunks: usize,
    pub close_reason: CloseReason,
}

/// Interactive full-duplex client: after the header is written, console lines
/// go to the socket and socket data goes to the console until `/q`, console
/// EOF or peer EOF.
pub struct SessionForwarder<W> {
    header: SessionHeader,
    version: ProtocolVersion,
    console: Console<W>,
    state: SessionState,
}

impl<W: AsyncWrite + Unpin + Send + 'static> SessionForwarder<W> {
    pub fn new(header: SessionHeader, version: ProtocolVersion, console: Console<W>) -> Self {
        Self {
            header,
            version,
            console,
            state: SessionState::Connecting,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub async fn connect_and_run<L>(
        &mut self,
        host: &str,
        port: u16,
        lines: L,
    ) -> Result<SessionSummary, SessionError>
    where
        L: Stream<Item = Result<String, LinesCodecError>> + Unpin,
    {
        self.transition(SessionState::Connecting);
        let stream = connect(host, port).await?;
        info!("Connection open: {host}:{port}");
        self.run_lines(stream, lines).await
    }

    pub async fn run<S, I>(&mut self, stream: S, input: I) -> Result<SessionSummary, SessionError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
        I: AsyncRead + Unpin,
    {
        self.run_lines(stream, FramedRead::new(input, LinesCodec::new()))
            .await
    }

    /// Console input arrives as already split lines. Returning does not wait
    /// for the next line, so a peer EOF ends the session even while the
    /// console stays open.
    pub async fn run_lines<S, L>(
        &mut self,
        stream: S,
        lines: L,
    ) -> Result<SessionSummary, SessionError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
        L: Stream<Item = Result<String, LinesCodecError>> + Unpin,
    {
        let header = self.header.encode(self.version)?;
        let (reader, mut writer) = tokio::io::split(stream);

        self.println(format!("Header: {}", self.header)).await?;
        writer
            .write_all(&header)
            .await
            .map_err(SessionError::HeaderSendFailed)?;
        writer.flush().await.map_err(SessionError::HeaderSendFailed)?;
        self.transition(SessionState::HeaderSent);

        let mut active = ActiveSession::start(reader, writer, self.console.clone());
        self.transition(SessionState::Interactive);
        let forwarded = self.forward_console(lines, &mut active).await;

        self.transition(SessionState::Closing);
        let received_chunks = active.close().await;
        self.transition(SessionState::Closed);
        self.println("Session end").await?;

        let (sent_lines, close_reason) = forwarded?;
        Ok(SessionSummary {
            sent_lines,
            received_chunks,
            close_reason,
        })
    }

    async fn forward_console<S, L>(
        &self,
        mut lines: L,
        active: &mut ActiveSession<S>,
    ) -> Result<(usize, CloseReason), SessionError>
    where
        S: AsyncWrite,
        L: Stream<Item = Result<String, LinesCodecError>> + Unpin,
    {
        self.println(format!(
            "Session start. Write text to send or {QUIT_COMMAND} to quit"
        ))
        .await?;
        let peer_closed = active.peer_closed.clone();
        let mut sent_lines = 0;

        loop {
            let line = select! {
                _ = peer_closed.cancelled() => return Ok((sent_lines, CloseReason::PeerClosed)),
                line = lines.next() => line,
            };
            let line = match line {
                None => return Ok((sent_lines, CloseReason::ConsoleClosed)),
                Some(line) => line?,
            };
            if line.trim() == QUIT_COMMAND {
                return Ok((sent_lines, CloseReason::QuitCommand));
            }
            active.send_line(&line).await?;
            sent_lines += 1;
            self.println(format!("Sent: {line}")).await?;
        }
    }

    async fn println(&self, line: impl AsRef<str>) -> Result<(), SessionError> {
        self.console
            .println(line)
            .await
            .map_err(SessionError::ConsoleWriteFailed)
    }

    fn transition(&mut self, state: SessionState) {
        debug!("Session state: {:?} -> {:?}", self.state, state);
        self.state = state;
    }
}

struct ActiveSession<S> {
    writer: Option<WriteHalf<S>>,
    receiver: Option<JoinHandle<io::Result<usize>>>,
    cancel: CancellationToken,
    peer_closed: CancellationToken,
}

impl<S: AsyncRead + AsyncWrite + Send + 'static> ActiveSession<S> {
    fn start<W: AsyncWrite + Unpin + Send + 'static>(
        reader: ReadHalf<S>,
        writer: WriteHalf<S>,
        console: Console<W>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let peer_closed = CancellationToken::new();
        let receiver = tokio::spawn(receive(
            reader,
            console,
            cancel.clone(),
            peer_closed.clone(),
        ));
        Self {
            writer: Some(writer),
            receiver: Some(receiver),
            cancel,
            peer_closed,
        }
    }
}

impl<S: AsyncWrite> ActiveSession<S> {
    async fn send_line(&mut self, line: &str) -> Result<(), SessionError> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| SessionError::SendFailed(io::ErrorKind::NotConnected.into()))?;
        writer
            .write_all(format!("{line}\n").as_bytes())
            .await
            .map_err(SessionError::SendFailed)?;
        writer.flush().await.map_err(SessionError::SendFailed)
    }

    /// Stops the receiver and shuts the socket down. Calling it again is a
    /// no-op. Returns the number of chunks the receiver printed.
    async fn close(&mut self) -> usize {
        self.cancel.cancel();
        let mut received_chunks = 0;
        if let Some(receiver) = self.receiver.take() {
            match receiver.await {
                Ok(Ok(chunks)) => received_chunks = chunks,
                Ok(Err(err)) => error!("Receiver ended with error: {err}"),
                Err(err) => error!("Receiver task failed: {err}"),
            }
        }
        if let Some(mut writer) = self.writer.take() {
            if let Err(err) = writer.shutdown().await {
                debug!("Socket shutdown: {err}");
            }
            info!("Connection closed");
        }
        received_chunks
    }
}

impl<S> Drop for ActiveSession<S> {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(receiver) = self.receiver.take() {
            receiver.abort();
        }
    }
}

async fn receive<R: AsyncRead, W: AsyncWrite + Unpin + Send>(
    mut reader: ReadHalf<R>,
    console: Console<W>,
    cancel: CancellationToken,
    peer_closed: CancellationToken,
) -> io::Result<usize> {
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];
    let mut chunks = 0;
    let result = loop {
        select! {
            _ = cancel.cancelled() => break Ok(chunks),
            read = reader.read(&mut buf) => match read {
                Ok(0) => {
                    debug!("Peer closed the connection");
                    break Ok(chunks);
                }
                Ok(count) => {
                    chunks += 1;
                    let line = format!("Recv: {}", String::from_utf8_lossy(&buf[..count]));
                    if let Err(err) = console.println(line).await {
                        break Err(err);
                    }
                }
                Err(err) => break Err(err),
            }
        }
    };
    peer_closed.cancel();
    debug!("Receiver task end");
    result
}
