//! # Line-delimited JSON listener.
//!
//! Each accepted connection carries one JSON object per line in both directions.
//!
//! ```text
//! accept ─► handle_connection (own task)
//!             ├─► writer task: ChannelTransport queue ─► encode ─► socket
//!             └─► reader loop: socket ─► Inbound::decode ─► Session::handle
//!                   ends on EOF, read error, transport close (eviction) or cancel
//!                   (cancel first queues `server_shutdown`, which the writer flushes)
//!             └─► Session::finish (unbind if current, arm grace)
//! ```
//!
//! Malformed or oversized lines are logged and skipped; the connection stays open.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::plane::ControlPlane;
use crate::protocol::Inbound;
use crate::registry::{ChannelTransport, Transport};

/// Longest accepted line, in bytes.
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

/// Accepts connections until `token` is cancelled.
pub async fn serve(
    listener: TcpListener,
    plane: Arc<ControlPlane>,
    token: CancellationToken,
) -> std::io::Result<()> {
    info!(local = %listener.local_addr()?, "listening");
    loop {
        let (stream, peer) = tokio::select! {
            _ = token.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(err = %e, "accept failed");
                    continue;
                }
            },
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!(%peer, err = %e, "set_nodelay failed");
        }
        let plane = plane.clone();
        let token = token.clone();
        tokio::spawn(async move {
            handle_connection(stream, peer.ip().to_string(), plane, token).await;
        });
    }
    info!("listener stopped");
    Ok(())
}

/// Runs one connection to completion.
pub async fn handle_connection<S>(
    stream: S,
    peer: String,
    plane: Arc<ControlPlane>,
    token: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let mut reader = FramedRead::new(read_half, LinesCodec::new_with_max_length(MAX_FRAME_BYTES));
    let mut writer = FramedWrite::new(write_half, LinesCodec::new_with_max_length(MAX_FRAME_BYTES));

    let (transport, mut outbound) = ChannelTransport::new(plane.config().transport_queue_clamped());
    let closed = transport.closed_token();

    let writer_task = tokio::spawn({
        let closed = closed.clone();
        let peer = peer.clone();
        async move {
            loop {
                let frame = tokio::select! {
                    biased;
                    next = outbound.recv() => match next {
                        Some(frame) => frame,
                        None => break,
                    },
                    _ = closed.cancelled() => break,
                };
                let line = match frame.encode() {
                    Ok(line) => line,
                    Err(e) => {
                        warn!(%peer, err = %e, "failed to encode frame");
                        continue;
                    }
                };
                if let Err(e) = writer.send(line).await {
                    warn!(%peer, err = %e, "socket write failed");
                    break;
                }
            }
            if let Err(e) = SinkExt::<String>::close(&mut writer).await {
                debug!(%peer, err = %e, "socket close failed");
            }
        }
    });

    debug!(%peer, transport = %transport.id(), "connection opened");
    let mut session = plane.open_session(transport, peer.clone());
    loop {
        let line = tokio::select! {
            _ = token.cancelled() => {
                session.announce_shutdown();
                break;
            }
            _ = closed.cancelled() => {
                debug!(%peer, "transport closed");
                break;
            }
            next = reader.next() => match next {
                Some(Ok(line)) => line,
                Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                    warn!(%peer, limit = MAX_FRAME_BYTES, "oversized frame skipped");
                    continue;
                }
                Some(Err(LinesCodecError::Io(e))) => {
                    warn!(%peer, err = %e, "socket read failed");
                    break;
                }
                None => break,
            },
        };
        if line.trim().is_empty() {
            continue;
        }
        let frame = match Inbound::decode(&line) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(%peer, err = %e, "malformed frame skipped");
                continue;
            }
        };
        if let Err(e) = session.handle(frame).await {
            warn!(%peer, kind = e.as_label(), err = %e, "frame failed");
        }
    }

    session.finish();
    if let Err(e) = writer_task.await {
        warn!(%peer, err = %e, "writer task failed");
    }
    debug!(%peer, "connection closed");
}
