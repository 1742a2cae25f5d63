//! One-shot request/reply handshake run over a freshly opened stream.
//!
//! The initiator writes `PING\n` and expects `PONG\n` back. The responder
//! tolerates a stream that reports end-of-stream before the request has
//! arrived: it backs off and reads again, up to a bounded number of reads.

use std::io;
use std::time::Duration;

use futures::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, Stream, StreamExt};
use libp2p::PeerId;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tether_shared::constants::{
    HANDSHAKE_BACKOFF, HANDSHAKE_MAX_ATTEMPTS, HANDSHAKE_REPLY, HANDSHAKE_REQUEST,
    HANDSHAKE_STREAM_TIMEOUT, HANDSHAKE_TOKEN_LEN,
};

use crate::error::HandshakeError;

#[derive(Debug, Clone, Copy)]
pub struct HandshakeConfig {
    /// Total reads before a silent stream is abandoned.
    pub max_attempts: u32,
    /// Pause after a read that hit end-of-stream.
    pub backoff: Duration,
    /// Deadline for the whole exchange. Covers peers that neither write nor
    /// close.
    pub stream_timeout: Duration,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            max_attempts: HANDSHAKE_MAX_ATTEMPTS,
            backoff: HANDSHAKE_BACKOFF,
            stream_timeout: HANDSHAKE_STREAM_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// Request received and reply written.
    Responded,
    /// Something other than the request arrived; no reply was sent.
    Rejected { received: Vec<u8> },
    /// Every read hit end-of-stream.
    Abandoned { attempts: u32 },
    Failed(io::ErrorKind),
    /// The exchange ran past `stream_timeout`.
    TimedOut,
    Cancelled,
}

#[derive(Debug, Clone, Copy)]
enum State {
    AwaitingRequest { attempt: u32 },
    Retrying { attempt: u32 },
    Responding,
}

/// Answer a single handshake on `stream`.
///
/// The stream is closed exactly once before returning, whatever the outcome.
pub async fn respond<S>(
    mut stream: S,
    config: &HandshakeConfig,
    cancel: &CancellationToken,
) -> HandshakeOutcome
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => HandshakeOutcome::Cancelled,
        timed = tokio::time::timeout(config.stream_timeout, drive(&mut stream, config)) => {
            timed.unwrap_or(HandshakeOutcome::TimedOut)
        }
    };

    if let Err(e) = stream.close().await {
        debug!(error = %e, "Failed to close handshake stream");
    }

    match &outcome {
        HandshakeOutcome::Responded => info!("Handshake answered"),
        HandshakeOutcome::Rejected { received } => warn!(
            received = %String::from_utf8_lossy(received).escape_debug(),
            "Unexpected handshake request"
        ),
        HandshakeOutcome::Abandoned { attempts } => {
            warn!(attempts, "No handshake request arrived, giving up")
        }
        HandshakeOutcome::Failed(kind) => warn!(error = ?kind, "Handshake failed"),
        HandshakeOutcome::TimedOut => {
            warn!(timeout_secs = config.stream_timeout.as_secs(), "Handshake timed out")
        }
        HandshakeOutcome::Cancelled => debug!("Handshake cancelled"),
    }
    outcome
}

async fn drive<S>(stream: &mut S, config: &HandshakeConfig) -> HandshakeOutcome
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let max_attempts = config.max_attempts.max(1);
    let mut state = State::AwaitingRequest { attempt: 1 };

    loop {
        state = match state {
            State::AwaitingRequest { attempt } => match read_token(stream).await {
                Ok(received) if received.is_empty() => {
                    if attempt >= max_attempts {
                        return HandshakeOutcome::Abandoned { attempts: attempt };
                    }
                    State::Retrying { attempt }
                }
                Ok(received) if received == HANDSHAKE_REQUEST => State::Responding,
                Ok(received) => return HandshakeOutcome::Rejected { received },
                Err(e) => return HandshakeOutcome::Failed(e.kind()),
            },
            State::Retrying { attempt } => {
                debug!(attempt, max_attempts, "Stream reported EOF, retrying read");
                tokio::time::sleep(config.backoff).await;
                State::AwaitingRequest {
                    attempt: attempt + 1,
                }
            }
            State::Responding => {
                return match write_token(stream, HANDSHAKE_REPLY).await {
                    Ok(()) => HandshakeOutcome::Responded,
                    Err(e) => HandshakeOutcome::Failed(e.kind()),
                };
            }
        };
    }
}

/// Run the initiator side on `stream`.
pub async fn request<S>(mut stream: S, cancel: &CancellationToken) -> Result<(), HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(HandshakeError::Cancelled),
        result = exchange(&mut stream) => result,
    };

    if let Err(e) = stream.close().await {
        debug!(error = %e, "Failed to close handshake stream");
    }
    result
}

async fn exchange<S>(stream: &mut S) -> Result<(), HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    write_token(stream, HANDSHAKE_REQUEST).await?;
    let reply = read_token(stream).await?;
    if reply == HANDSHAKE_REPLY {
        Ok(())
    } else {
        Err(HandshakeError::UnexpectedReply(reply))
    }
}

/// Answer every inbound stream on its own task until `cancel` fires or the
/// stream source ends.
pub async fn serve<I, S>(incoming: I, config: HandshakeConfig, cancel: CancellationToken)
where
    I: Stream<Item = (PeerId, S)>,
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut incoming = std::pin::pin!(incoming);
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = incoming.next() => next,
        };
        let Some((peer, stream)) = next else {
            break;
        };

        debug!(peer = %peer, "Inbound handshake stream");
        let cancel = cancel.child_token();
        tokio::spawn(async move {
            let outcome = respond(stream, &config, &cancel).await;
            debug!(peer = %peer, outcome = ?outcome, "Handshake finished");
        });
    }
    debug!("Handshake responder stopped");
}

/// Read until the token buffer is full or the stream ends. An empty result
/// means end-of-stream before any byte.
async fn read_token<S: AsyncRead + Unpin>(stream: &mut S) -> io::Result<Vec<u8>> {
    let mut buf = [0u8; HANDSHAKE_TOKEN_LEN];
    let mut filled = 0;
    while filled < buf.len() {
        match stream.read(&mut buf[filled..]).await? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(buf[..filled].to_vec())
}

async fn write_token<S: AsyncWrite + Unpin>(stream: &mut S, token: &[u8]) -> io::Result<()> {
    stream.write_all(token).await?;
    stream.flush().await
}
