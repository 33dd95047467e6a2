//! Connection lifecycle: one reader and one writer per socket.
//!
//! ```text
//!   socket ──▶ read pump ──┬─▶ control (ping, subscribe_user, groups)
//!                          └─▶ dispatcher ─▶ handler tasks
//!
//!   publishers ─▶ outbound queue ─▶ write pump ──▶ socket
//!                                      ▲
//!                               ping interval
//! ```
//!
//! Whichever side stops first takes the other down with it: the reader
//! unregisters (closing the queue, which ends the writer), and the reader
//! stops as soon as the writer has exited.

use crate::connection::{Connection, ConnectionId};
use crate::hub::Hub;
use crate::metrics::{self, ConnectionGuard, Direction};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use herald_protocol::{codec, Control, Encoded, Event, Frame, Inbound};
use herald_transport::{FrameSocket, TransportError};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

/// Why a connection ended.
#[derive(Debug)]
enum Exit {
    /// Peer sent a close frame.
    Closed,
    /// Stream ended without a close frame.
    PeerGone,
    /// Nothing received within the idle timeout.
    IdleTimeout,
    /// Reading failed.
    Transport(TransportError),
    /// The writer stopped (queue closed, write failure or timeout).
    WriterStopped,
}

impl fmt::Display for Exit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Exit::Closed => f.write_str("closed by peer"),
            Exit::PeerGone => f.write_str("stream ended"),
            Exit::IdleTimeout => f.write_str("idle timeout"),
            Exit::Transport(e) => write!(f, "transport error: {e}"),
            Exit::WriterStopped => f.write_str("writer stopped"),
        }
    }
}

/// Serve one client socket until it disconnects or the hub shuts down.
///
/// Registers a fresh [`Connection`], runs its writer as a separate task and
/// its reader on the current task, then unregisters exactly once.
pub async fn serve<S: FrameSocket>(hub: Hub, socket: S) {
    let config = hub.config().clone();
    let (connection, outbound) = Connection::new(config.outbound_capacity);
    let id = connection.id().clone();
    let _guard = ConnectionGuard::new();

    if let Err(e) = hub.register(Arc::clone(&connection)).await {
        warn!(connection = %id, error = %e, "Registration failed");
        return;
    }

    info!(connection = %id, "Client connected");

    let (sink, stream) = socket.split();
    let mut writer = tokio::spawn(write_pump(
        id.clone(),
        sink,
        outbound,
        config.ping_interval,
        config.write_timeout,
    ));

    let exit = read_pump(&hub, &connection, stream, &mut writer, config.idle_timeout).await;

    hub.unregister(&id).await;
    connection.close();

    if !matches!(exit, Exit::WriterStopped)
        && time::timeout(config.write_timeout, &mut writer).await.is_err()
    {
        debug!(connection = %id, "Writer did not finish in time, aborting");
        writer.abort();
    }

    info!(connection = %id, reason = %exit, "Client disconnected");
}

async fn read_pump<St>(
    hub: &Hub,
    connection: &Arc<Connection>,
    mut stream: St,
    writer: &mut JoinHandle<()>,
    idle_timeout: Option<Duration>,
) -> Exit
where
    St: Stream<Item = Result<Frame, TransportError>> + Unpin,
{
    loop {
        let next = tokio::select! {
            _ = &mut *writer => return Exit::WriterStopped,
            next = next_frame(&mut stream, idle_timeout) => next,
        };

        let frame = match next {
            Ok(Some(Ok(frame))) => frame,
            Ok(Some(Err(e))) => return Exit::Transport(e),
            Ok(None) => return Exit::PeerGone,
            Err(_) => return Exit::IdleTimeout,
        };

        match frame {
            Frame::Close => return Exit::Closed,
            // Liveness only; receiving it already reset the idle timer.
            Frame::Ping(_) | Frame::Pong(_) => {
                trace!(connection = %connection.id(), "Liveness frame");
            }
            Frame::Text(_) | Frame::Binary(_) => handle_data(hub, connection, &frame),
        }
    }
}

async fn next_frame<St>(
    stream: &mut St,
    idle_timeout: Option<Duration>,
) -> Result<Option<Result<Frame, TransportError>>, time::error::Elapsed>
where
    St: Stream<Item = Result<Frame, TransportError>> + Unpin,
{
    match idle_timeout {
        Some(limit) => time::timeout(limit, stream.next()).await,
        None => Ok(stream.next().await),
    }
}

fn handle_data(hub: &Hub, connection: &Arc<Connection>, frame: &Frame) {
    metrics::record_message(frame.len(), Direction::Inbound);

    let event = match codec::decode(frame) {
        Ok(event) => event,
        Err(e) => {
            warn!(connection = %connection.id(), error = %e, "Dropping malformed frame");
            metrics::record_error("decode");
            return;
        }
    };

    match Inbound::classify(event) {
        Ok(Inbound::Control(control)) => apply_control(hub, connection, control),
        Ok(Inbound::Custom(event)) => {
            trace!(connection = %connection.id(), event = %event.name, "Inbound event");
            hub.dispatch(Arc::clone(connection), event);
        }
        Err(e) => {
            warn!(connection = %connection.id(), error = %e, "Ignoring control message");
            metrics::record_error("control");
        }
    }
}

fn apply_control(hub: &Hub, connection: &Connection, control: Control) {
    let id = connection.id();
    match control {
        Control::Ping => {
            let pong = Event::pong();
            hub.emit_to_connection(id.as_str(), &pong.name, pong.data);
        }
        Control::SubscribeUser(user_id) => {
            connection.set_user_id(user_id);
            debug!(connection = %id, user_id, "Subscribed to user");
        }
        Control::JoinGroup(group) => {
            if connection.join_group(&group) {
                debug!(connection = %id, group = %group, "Joined group");
            }
        }
        Control::LeaveGroup(group) => {
            if connection.leave_group(&group) {
                debug!(connection = %id, group = %group, "Left group");
            }
        }
    }
}

async fn write_pump<Si>(
    id: ConnectionId,
    mut sink: Si,
    mut outbound: mpsc::Receiver<Arc<Encoded>>,
    ping_interval: Duration,
    write_timeout: Duration,
) where
    Si: Sink<Frame, Error = TransportError> + Unpin,
{
    let mut pinger = (!ping_interval.is_zero()).then(|| {
        let mut interval = time::interval_at(Instant::now() + ping_interval, ping_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });

    loop {
        let frame = tokio::select! {
            item = outbound.recv() => match item {
                Some(encoded) => encoded.to_frame(),
                None => {
                    trace!(connection = %id, "Outbound queue closed");
                    if let Err(e) = write_frame(&mut sink, Frame::Close, write_timeout).await {
                        trace!(connection = %id, error = %e, "Close frame not sent");
                    }
                    break;
                }
            },
            _ = tick(&mut pinger) => Frame::ping(),
        };

        let len = frame.len();
        let data = frame.is_data();
        if let Err(e) = write_frame(&mut sink, frame, write_timeout).await {
            debug!(connection = %id, error = %e, "Write failed");
            break;
        }
        if data {
            metrics::record_message(len, Direction::Outbound);
        }
    }

    if let Ok(Err(e)) = time::timeout(write_timeout, sink.close()).await {
        trace!(connection = %id, error = %e, "Socket close failed");
    }
}

async fn write_frame<Si>(sink: &mut Si, frame: Frame, limit: Duration) -> Result<(), TransportError>
where
    Si: Sink<Frame, Error = TransportError> + Unpin,
{
    time::timeout(limit, sink.send(frame))
        .await
        .map_err(|_| TransportError::Timeout)?
}

async fn tick(pinger: &mut Option<Interval>) {
    match pinger {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
