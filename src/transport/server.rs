//! Single-connection TCP server.
//!
//! One listening socket, one client at a time: the accept loop serves a
//! connection to completion before returning to `accept()`. Inbound
//! display-list frames are pushed into a bounded channel of depth
//! [`INBOUND_QUEUE_DEPTH`]; when the engine falls behind the push suspends
//! and the TCP receive window does the rest — backpressure instead of
//! packet loss. Outbound frames (read-back pixels, touch events) arrive on
//! a channel drained by the same connection task, so all socket writes
//! have a single owner. The outbound channel stays drained even while an
//! inbound push is suspended; the engine may emit read-back frames while
//! its queue is full, and waiting on only one channel at a time would
//! stall both sides.
//!
//! Disconnects, mid-frame EOF and I/O errors end the connection and return
//! to the accept loop; only cancellation ends the server.

use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::WriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::framing::{DISPLAY_MAGIC, Frame, FrameDecoder, encode_frame};
use super::Packet;
use crate::error::{Result, ScreenError};

/// Default TCP port of the virtual display.
pub const DEFAULT_PORT: u16 = 7780;

/// Bound of the inbound packet channel; the backpressure boundary.
pub const INBOUND_QUEUE_DEPTH: usize = 2;

/// Bound of the outbound frame channel.
const OUTBOUND_QUEUE_DEPTH: usize = 16;

const READ_BUFFER_LEN: usize = 4096;

/// Channels handed to the engine when the server is spawned.
pub struct ServerChannels {
    /// Address the listener actually bound.
    pub local_addr: SocketAddr,
    /// Inbound display-list packets, in exact wire order.
    pub packets: mpsc::Receiver<Packet>,
    /// Outbound frames (pixel read-back, touch events).
    pub outbound: mpsc::Sender<Frame>,
    /// Cancels the accept loop and any in-flight connection.
    pub cancel: CancellationToken,
}

/// The TCP side of the virtual display.
pub struct Server;

impl Server {
    /// Bind a listener and spawn the accept loop.
    pub async fn bind(addr: SocketAddr) -> Result<ServerChannels> {
        let listener =
            TcpListener::bind(addr).await.map_err(|e| ScreenError::bind_failed(addr, e))?;
        let local_addr = listener.local_addr().map_err(|e| ScreenError::bind_failed(addr, e))?;
        info!(%local_addr, "listening");

        let (packet_tx, packet_rx) = mpsc::channel(INBOUND_QUEUE_DEPTH);
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
        let cancel = CancellationToken::new();

        let accept_cancel = cancel.clone();
        tokio::spawn(async move {
            accept_loop(listener, packet_tx, outbound_rx, accept_cancel).await;
        });

        Ok(ServerChannels { local_addr, packets: packet_rx, outbound: outbound_tx, cancel })
    }
}

async fn accept_loop(
    listener: TcpListener,
    packet_tx: mpsc::Sender<Packet>,
    mut outbound: mpsc::Receiver<Frame>,
    cancel: CancellationToken,
) {
    loop {
        let (stream, peer) = tokio::select! {
            _ = cancel.cancelled() => {
                info!("server cancelled");
                return;
            }
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(error) => {
                    warn!(%error, "accept failed");
                    continue;
                }
            },
        };

        info!(%peer, "client connected");
        if let Err(error) = stream.set_nodelay(true) {
            debug!(%error, "failed to set TCP_NODELAY");
        }

        serve_connection(stream, &packet_tx, &mut outbound, &cancel).await;
        info!(%peer, "client disconnected");

        // Read-back replies and touch events addressed to the departed
        // client must not leak into the next connection.
        while outbound.try_recv().is_ok() {}

        if cancel.is_cancelled() || packet_tx.is_closed() {
            return;
        }
    }
}

/// Serve one connection until disconnect, engine shutdown or cancellation.
async fn serve_connection(
    mut stream: TcpStream,
    packet_tx: &mpsc::Sender<Packet>,
    outbound: &mut mpsc::Receiver<Frame>,
    cancel: &CancellationToken,
) {
    let (mut reader, mut writer) = stream.split();
    let mut decoder = FrameDecoder::new(&[DISPLAY_MAGIC]);
    let mut buf = vec![0u8; READ_BUFFER_LEN];

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,

            read = reader.read(&mut buf) => {
                let n = match read {
                    Ok(0) => {
                        debug!("peer closed connection");
                        return;
                    }
                    Ok(n) => n,
                    Err(error) => {
                        // Mid-frame I/O failure is a disconnect, not fatal.
                        warn!(%error, "read failed");
                        return;
                    }
                };
                decoder.feed(&buf[..n]);
                while let Some(frame) = decoder.next_frame() {
                    debug!(len = frame.payload.len(), "packet received");
                    if !deliver(packet_tx, outbound, &mut writer, Packet(frame.payload)).await {
                        return;
                    }
                }
            }

            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    debug!("outbound channel closed");
                    return;
                };
                if !write_frame(&mut writer, &frame).await {
                    return;
                }
            }
        }
    }
}

/// Hand one packet to the engine, draining outbound frames in the
/// meantime.
///
/// The push suspends while the engine's queue is full; nothing is ever
/// dropped. A packet being processed can itself produce read-back frames,
/// so the wait must keep servicing `outbound` or both sides end up parked
/// on each other's bounded channel. Returns `false` when the connection
/// should close.
async fn deliver(
    packet_tx: &mpsc::Sender<Packet>,
    outbound: &mut mpsc::Receiver<Frame>,
    writer: &mut WriteHalf<'_>,
    packet: Packet,
) -> bool {
    loop {
        tokio::select! {
            permit = packet_tx.reserve() => {
                return match permit {
                    Ok(permit) => {
                        permit.send(packet);
                        true
                    }
                    Err(_) => {
                        debug!("engine gone, closing connection");
                        false
                    }
                };
            }

            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    debug!("outbound channel closed");
                    return false;
                };
                if !write_frame(writer, &frame).await {
                    return false;
                }
            }
        }
    }
}

async fn write_frame(writer: &mut WriteHalf<'_>, frame: &Frame) -> bool {
    let bytes = encode_frame(frame.magic, &frame.payload);
    if let Err(error) = writer.write_all(&bytes).await {
        warn!(%error, "write failed");
        return false;
    }
    true
}
