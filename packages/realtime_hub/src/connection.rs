//! Connection actor
//!
//! Each live client gets three tasks:
//! - a reader that decodes inbound frames and forwards envelopes to the hub
//! - a writer that drains the outbound queue onto the transport
//! - a supervisor that registers the connection, waits for whichever of the
//!   two stops first (or for an eviction notice), sends the single unregister
//!   for this connection, and then winds down the rest
//!
//! The writer owns the sink and is the only code that closes it. When it cannot
//! finish (stalled transport, eviction) it is aborted and the sink is released
//! by drop, so the transport is released once no matter who noticed the failure.

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::envelope::{Envelope, UserId};
use crate::error::{HubError, TransportError};
use crate::frame::Frame;
use crate::hub::{ConnectionId, HubHandle, Identity};

/// Why a connection ended. Reports the side that stopped first.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disconnect {
    /// Peer sent a close frame or the inbound stream ended
    ReaderClosed,
    /// Inbound transport returned an error
    ReaderFailed,
    /// The hub stopped accepting forwarded envelopes
    HubClosed,
    /// Outbound queue was closed by the hub (unregister, eviction, supersede, shutdown)
    QueueClosed,
    /// Outbound transport returned an error
    WriterFailed,
    /// The hub evicted this connection because its outbound queue overflowed
    Evicted,
}

/// A registered connection whose reader and writer are running.
#[derive(Debug)]
pub struct Connected {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    task: JoinHandle<Option<Disconnect>>,
}

impl Connected {
    /// Wait for the connection to be fully torn down.
    /// Returns `None` if the supervisor task was cancelled or panicked.
    pub async fn closed(self) -> Option<Disconnect> {
        self.task.await.ok().flatten()
    }
}

impl HubHandle {
    /// Register a new connection and start its reader and writer.
    ///
    /// Registration is acknowledged by the control loop before either flow
    /// starts, so a message routed right after this returns can be delivered.
    /// Registration happens inside the spawned supervisor; dropping this future
    /// early leaves a connection that still tears itself down normally.
    pub async fn connect<R, W>(
        &self,
        identity: Identity,
        reader: R,
        writer: W,
    ) -> Result<Connected, HubError>
    where
        R: Stream<Item = Result<Frame, TransportError>> + Send + Unpin + 'static,
        W: Sink<Frame, Error = TransportError> + Send + Unpin + 'static,
    {
        let user_id = identity.user_id;
        let (registered_tx, registered_rx) = oneshot::channel();
        let hub = self.clone();

        let task = tokio::spawn(async move {
            let (outbox_tx, outbox_rx) = hub.outbox();
            let (evict_tx, evict_rx) = oneshot::channel();
            let connection_id = match hub.register(identity, outbox_tx, evict_tx).await {
                Ok(connection_id) => connection_id,
                Err(e) => {
                    let _ = registered_tx.send(Err(e));
                    return None;
                }
            };
            let _ = registered_tx.send(Ok(connection_id));

            let actor = ConnectionActor {
                user_id,
                connection_id,
                hub,
            };
            Some(actor.run(reader, writer, outbox_rx, evict_rx).await)
        });

        let connection_id = registered_rx.await.map_err(|_| HubError::NoReply)??;

        Ok(Connected {
            connection_id,
            user_id,
            task,
        })
    }
}

enum Remaining {
    Reader,
    Writer,
    Both,
}

struct ConnectionActor {
    user_id: UserId,
    connection_id: ConnectionId,
    hub: HubHandle,
}

impl ConnectionActor {
    async fn run<R, W>(
        self,
        reader: R,
        writer: W,
        outbox: mpsc::Receiver<String>,
        evicted: oneshot::Receiver<()>,
    ) -> Disconnect
    where
        R: Stream<Item = Result<Frame, TransportError>> + Send + Unpin + 'static,
        W: Sink<Frame, Error = TransportError> + Send + Unpin + 'static,
    {
        let mut read_task = tokio::spawn(read_loop(
            self.user_id,
            self.connection_id,
            reader,
            self.hub.clone(),
        ));
        let mut write_task = tokio::spawn(write_loop(self.connection_id, writer, outbox));

        // Resolves only when the hub fires the signal; an unfired drop means a
        // graceful removal, which the writer observes as a closed queue.
        let evicted = async move {
            if evicted.await.is_err() {
                std::future::pending::<()>().await;
            }
        };
        tokio::pin!(evicted);

        let (disconnect, remaining) = tokio::select! {
            result = &mut read_task => (result.unwrap_or(Disconnect::ReaderFailed), Remaining::Writer),
            result = &mut write_task => (result.unwrap_or(Disconnect::WriterFailed), Remaining::Reader),
            () = &mut evicted => (Disconnect::Evicted, Remaining::Both),
        };

        debug!(
            user_id = %self.user_id,
            conn_id = %self.connection_id,
            ?disconnect,
            "Connection stopping"
        );

        // The one unregister for this connection. If the hub is gone it has
        // already dropped every queue, so the writer stops either way.
        if let Err(e) = self.hub.unregister(self.user_id, self.connection_id).await {
            debug!(conn_id = %self.connection_id, "Unregister not delivered: {}", e);
        }

        match remaining {
            Remaining::Writer => {
                // Writer drains what is queued, sends a close frame, and closes the sink
                let drain = self.hub.config().writer_drain_timeout;
                if tokio::time::timeout(drain, &mut write_task).await.is_err() {
                    warn!(
                        conn_id = %self.connection_id,
                        "Writer did not finish within {:?}, dropping transport",
                        drain
                    );
                    write_task.abort();
                    let _ = write_task.await;
                }
            }
            Remaining::Reader => {
                // Dropping the inbound half releases the rest of the transport
                read_task.abort();
                let _ = read_task.await;
            }
            Remaining::Both => {
                // Evicted: the writer may be stuck on the transport, so nothing
                // is drained. Both halves are released by drop.
                warn!(
                    user_id = %self.user_id,
                    conn_id = %self.connection_id,
                    "Evicted, dropping transport"
                );
                read_task.abort();
                write_task.abort();
                let _ = read_task.await;
                let _ = write_task.await;
            }
        }

        info!(
            user_id = %self.user_id,
            conn_id = %self.connection_id,
            ?disconnect,
            "Connection closed"
        );
        disconnect
    }
}

async fn read_loop<R>(
    user_id: UserId,
    connection_id: ConnectionId,
    mut reader: R,
    hub: HubHandle,
) -> Disconnect
where
    R: Stream<Item = Result<Frame, TransportError>> + Unpin,
{
    while let Some(next) = reader.next().await {
        let frame = match next {
            Ok(frame) => frame,
            Err(e) => {
                warn!(%user_id, conn_id = %connection_id, "Transport read error: {}", e);
                return Disconnect::ReaderFailed;
            }
        };

        let payload = match frame.payload() {
            Some(payload) => payload,
            None if frame == Frame::Close => {
                debug!(%user_id, conn_id = %connection_id, "Peer closed connection");
                return Disconnect::ReaderClosed;
            }
            None => continue,
        };

        let envelope = match Envelope::decode(payload) {
            // Never trust the sender claimed on the wire
            Ok(envelope) => envelope.with_sender(user_id).stamped(),
            Err(e) => {
                debug!(%user_id, conn_id = %connection_id, "Skipping frame: {}", e);
                hub.metrics().frame_rejected();
                continue;
            }
        };

        if hub.route(envelope).await.is_err() {
            return Disconnect::HubClosed;
        }
    }

    Disconnect::ReaderClosed
}

async fn write_loop<W>(
    connection_id: ConnectionId,
    mut writer: W,
    mut outbox: mpsc::Receiver<String>,
) -> Disconnect
where
    W: Sink<Frame, Error = TransportError> + Unpin,
{
    let disconnect = loop {
        match outbox.recv().await {
            Some(payload) => {
                if let Err(e) = writer.send(Frame::Text(payload)).await {
                    warn!(conn_id = %connection_id, "Transport write error: {}", e);
                    break Disconnect::WriterFailed;
                }
            }
            None => {
                if let Err(e) = writer.send(Frame::Close).await {
                    debug!(conn_id = %connection_id, "Close frame not sent: {}", e);
                }
                break Disconnect::QueueClosed;
            }
        }
    };

    release(connection_id, writer).await;
    disconnect
}

/// Close the outbound half. Takes the sink by value so it cannot run twice.
async fn release<W>(connection_id: ConnectionId, mut writer: W)
where
    W: Sink<Frame, Error = TransportError> + Unpin,
{
    if let Err(e) = writer.close().await {
        debug!(conn_id = %connection_id, "Transport close: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::{Hub, HubConfig};
    use futures::channel::mpsc as fmpsc;

    #[tokio::test]
    async fn test_write_loop_sends_close_when_queue_closes() {
        let (tx, rx) = mpsc::channel(4);
        let (sink, mut wire) = fmpsc::unbounded::<Frame>();
        let sink = sink.sink_map_err(|e| TransportError::Write(e.to_string()));

        tx.send("one".to_string()).await.unwrap();
        drop(tx);

        let disconnect = write_loop(ConnectionId(1), sink, rx).await;

        assert_eq!(disconnect, Disconnect::QueueClosed);
        assert_eq!(wire.next().await, Some(Frame::Text("one".to_string())));
        assert_eq!(wire.next().await, Some(Frame::Close));
        assert_eq!(wire.next().await, None);
    }

    #[tokio::test]
    async fn test_read_loop_ignores_control_frames() {
        let hub = Hub::spawn(HubConfig::default());
        let (inbound, stream) = fmpsc::unbounded::<Result<Frame, TransportError>>();

        inbound.unbounded_send(Ok(Frame::Ping(vec![1]))).unwrap();
        inbound.unbounded_send(Ok(Frame::Pong(vec![2]))).unwrap();
        inbound.unbounded_send(Ok(Frame::Close)).unwrap();

        let disconnect = read_loop(UserId(1), ConnectionId(1), stream, hub.clone()).await;

        assert_eq!(disconnect, Disconnect::ReaderClosed);
        assert_eq!(hub.metrics().snapshot().messages.frames_rejected, 0);
    }

    #[tokio::test]
    async fn test_read_loop_stops_on_transport_error() {
        let hub = Hub::spawn(HubConfig::default());
        let (inbound, stream) = fmpsc::unbounded::<Result<Frame, TransportError>>();

        inbound
            .unbounded_send(Err(TransportError::Read("reset by peer".into())))
            .unwrap();
        inbound
            .unbounded_send(Ok(Frame::Text("{}".to_string())))
            .unwrap();

        let disconnect = read_loop(UserId(1), ConnectionId(1), stream, hub.clone()).await;

        assert_eq!(disconnect, Disconnect::ReaderFailed);
        hub.connected_users().await.unwrap();
        assert_eq!(hub.metrics().snapshot().messages.ignored, 0);
    }

    #[tokio::test]
    async fn test_read_loop_reports_hub_closed() {
        let hub = Hub::spawn(HubConfig::default());
        hub.shutdown().await.unwrap();
        tokio::task::yield_now().await;

        let (inbound, stream) = fmpsc::unbounded::<Result<Frame, TransportError>>();
        inbound
            .unbounded_send(Ok(Frame::Text(
                r#"{"type":"private_message","to_user_id":2}"#.to_string(),
            )))
            .unwrap();

        let disconnect = read_loop(UserId(1), ConnectionId(1), stream, hub).await;
        assert_eq!(disconnect, Disconnect::HubClosed);
    }
}
