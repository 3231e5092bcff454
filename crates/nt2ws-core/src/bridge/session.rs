//! Client session
//!
//! One session owns one websocket connection end to end. It runs on its own
//! task: a `select!` loop over inbound frames, the dispatch queue and close
//! requests. All writes to the connection happen on that task, one at a time.
//!
//! ```text
//! Opening ──run()──▶ Open ──peer close / I/O failure / close()──▶ Closing ──▶ Closed
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{watch, Notify};
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, info, trace, warn};

use super::dispatch::{dispatch_queue, DispatchReceiver, Dispatcher, Next};
use super::subscriber::Subscription;
use crate::error::{BridgeError, BridgeResult};
use crate::table::Table;
use crate::value::Value;
use crate::wire::{ClientCommand, Codec, CodecConfig, Frame, UpdateRecord};

/// How long teardown waits for the close handshake to flush
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Unique session identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        Self(format!("session-{}", &uuid::Uuid::new_v4().to_string()[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Opening,
    Open,
    Closing,
    Closed,
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The client sent a close frame or the stream ended
    PeerClosed,
    /// [`SessionHandle::close`] was called
    Requested,
    /// Reading from the connection failed
    ReadFailure,
    /// Writing to the connection failed
    WriteFailure,
    /// The dispatch queue overflowed
    Overrun,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CloseReason::PeerClosed => "peer closed",
            CloseReason::Requested => "close requested",
            CloseReason::ReadFailure => "read failure",
            CloseReason::WriteFailure => "write failure",
            CloseReason::Overrun => "send queue overrun",
        };
        f.write_str(s)
    }
}

/// Cloneable handle for observing and closing a running session
#[derive(Clone)]
pub struct SessionHandle {
    id: SessionId,
    state: watch::Receiver<SessionState>,
    close: Arc<Notify>,
    dispatcher: Dispatcher,
}

impl SessionHandle {
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn is_closed(&self) -> bool {
        self.state() == SessionState::Closed
    }

    /// Ask the session to close. Safe to call any number of times, from any
    /// thread, concurrently with records being posted.
    pub fn close(&self) {
        if self.dispatcher.is_closed() {
            return;
        }
        self.dispatcher.close();
        self.close.notify_one();
    }

    /// Wait until the session reaches [`SessionState::Closed`]
    pub async fn closed(&self) {
        let mut state = self.state.clone();
        let _ = state.wait_for(|s| *s == SessionState::Closed).await;
    }
}

/// A bridge session over one websocket connection
pub struct Session<S> {
    id: SessionId,
    socket: S,
    table: Arc<dyn Table>,
    codec: Codec,
    dispatcher: Dispatcher,
    receiver: DispatchReceiver,
    state: watch::Sender<SessionState>,
    close: Arc<Notify>,
}

impl<S> Session<S>
where
    S: Stream<Item = Result<Message, tungstenite::Error>>
        + Sink<Message, Error = tungstenite::Error>
        + Unpin
        + Send
        + 'static,
{
    /// Create a session in the `Opening` state. Nothing is subscribed until
    /// [`run`](Self::run) is polled.
    pub fn new(
        socket: S,
        table: Arc<dyn Table>,
        codec: CodecConfig,
        queue_capacity: usize,
    ) -> (Self, SessionHandle) {
        let id = SessionId::new();
        let (dispatcher, receiver) = dispatch_queue(queue_capacity);
        let (state, state_rx) = watch::channel(SessionState::Opening);
        let close = Arc::new(Notify::new());

        let handle = SessionHandle {
            id: id.clone(),
            state: state_rx,
            close: Arc::clone(&close),
            dispatcher: dispatcher.clone(),
        };

        let session = Self {
            id,
            socket,
            table,
            codec: Codec::new(codec),
            dispatcher,
            receiver,
            state,
            close,
        };

        (session, handle)
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Drive the session until it closes
    pub async fn run(self) -> CloseReason {
        let Session {
            id,
            socket,
            table,
            codec,
            dispatcher,
            mut receiver,
            state,
            close,
        } = self;

        let (mut write, mut read) = socket.split();

        dispatcher.reserve(table.entry_count());
        let mut subscription = Subscription::subscribe(Arc::clone(&table), dispatcher.sink());
        let _ = state.send(SessionState::Open);
        info!(session = %id, format = codec.config().format.as_str(), "Session open");

        let ctx = Context {
            id: &id,
            table: &table,
            codec: &codec,
            dispatcher: &dispatcher,
        };

        let reason = loop {
            tokio::select! {
                biased;

                _ = close.notified() => break CloseReason::Requested,

                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        ctx.handle_frame(Frame::Text(text), &mut subscription);
                    }
                    Some(Ok(Message::Binary(data))) => {
                        ctx.handle_frame(Frame::Binary(data), &mut subscription);
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!(session = %id, ?frame, "Client sent close");
                        break CloseReason::PeerClosed;
                    }
                    // Pings are answered by tungstenite itself
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(session = %id, error = %e, "Read from client failed");
                        break CloseReason::ReadFailure;
                    }
                    None => break CloseReason::PeerClosed,
                },

                next = receiver.next() => match next {
                    Next::Record(record) => {
                        // A client that stops reading stalls the write; give
                        // up on it once the queue behind it overruns.
                        let delivered = tokio::select! {
                            biased;

                            _ = close.notified() => break CloseReason::Requested,
                            _ = receiver.overrun() => break CloseReason::Overrun,
                            delivered = ctx.deliver(&mut write, &record) => delivered,
                        };
                        if let Err(e) = delivered {
                            if e.is_session_fatal() {
                                warn!(session = %id, error = %e, "Closing session");
                                break CloseReason::WriteFailure;
                            }
                            warn!(session = %id, error = %e, "Dropping outbound record");
                        }
                    }
                    Next::Overrun => break CloseReason::Overrun,
                    Next::Closed => break CloseReason::Requested,
                },
            }
        };

        let _ = state.send(SessionState::Closing);
        dispatcher.close();
        subscription.unsubscribe();
        let discarded = receiver.close_and_drain();

        if reason != CloseReason::WriteFailure {
            match tokio::time::timeout(CLOSE_TIMEOUT, write.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(session = %id, error = %e, "Close handshake failed"),
                Err(_) => debug!(session = %id, "Close handshake timed out"),
            }
        }

        let _ = state.send(SessionState::Closed);
        info!(session = %id, %reason, discarded, "Session closed");
        reason
    }
}

/// Borrowed session parts shared by the inbound and outbound paths
struct Context<'a> {
    id: &'a SessionId,
    table: &'a Arc<dyn Table>,
    codec: &'a Codec,
    dispatcher: &'a Dispatcher,
}

impl Context<'_> {
    /// Serialize and write one record
    async fn deliver<S>(
        &self,
        write: &mut SplitSink<S, Message>,
        record: &UpdateRecord,
    ) -> BridgeResult<()>
    where
        S: Sink<Message, Error = tungstenite::Error> + Unpin,
    {
        if self.dispatcher.is_closed() {
            return Ok(());
        }

        let frame = self.codec.encode(record)?;
        trace!(session = %self.id, bytes = frame.len(), "Sending record");
        write.send(frame.into()).await?;
        Ok(())
    }

    /// Decode and apply one inbound frame. Errors are logged and swallowed.
    fn handle_frame(&self, frame: Frame, subscription: &mut Subscription) {
        let result = self
            .codec
            .decode(&frame)
            .and_then(|command| self.apply(command, subscription));

        if let Err(e) = result {
            warn!(session = %self.id, error = %e, "Ignoring client message");
        }
    }

    fn apply(&self, command: ClientCommand, subscription: &mut Subscription) -> BridgeResult<()> {
        match command {
            ClientCommand::SetValue { key, value } => self.set_value(&key, value),
            ClientCommand::AddressChange { new_address } => {
                self.change_address(&new_address, subscription)
            }
        }
    }

    fn set_value(&self, key: &str, value: Value) -> BridgeResult<()> {
        let value = match self.table.entry_kind(key) {
            Some(existing) => value.conform(existing).map_err(|value| {
                BridgeError::TypeMismatch {
                    key: key.to_string(),
                    existing,
                    attempted: value.kind(),
                }
            })?,
            None => value,
        };

        debug!(session = %self.id, key, kind = %value.kind(), "Client set value");
        self.table.set_value(key, value)?;
        Ok(())
    }

    /// Unsubscribe, point the table at `address`, resubscribe
    fn change_address(&self, address: &str, subscription: &mut Subscription) -> BridgeResult<()> {
        info!(session = %self.id, address, "Reconnecting table");

        subscription.unsubscribe();
        self.dispatcher.advance_generation();
        self.dispatcher
            .post(UpdateRecord::connection_status(false, None));

        self.table.shutdown();
        let result = self.table.initialize(address);

        // Resubscribe even when the remote is unreachable so the client keeps
        // receiving updates once the table recovers.
        self.dispatcher.reserve(self.table.entry_count());
        *subscription = Subscription::subscribe(Arc::clone(self.table), self.dispatcher.sink());

        result.map_err(BridgeError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::MemoryTable;
    use tokio::io::DuplexStream;
    use tokio_tungstenite::tungstenite::protocol::Role;
    use tokio_tungstenite::WebSocketStream;

    async fn socket_pair() -> (WebSocketStream<DuplexStream>, WebSocketStream<DuplexStream>) {
        let (server, client) = tokio::io::duplex(64 * 1024);
        let server = WebSocketStream::from_raw_socket(server, Role::Server, None).await;
        let client = WebSocketStream::from_raw_socket(client, Role::Client, None).await;
        (server, client)
    }

    fn table() -> Arc<MemoryTable> {
        let table = Arc::new(MemoryTable::new());
        table.seed_remote("10.0.0.2", [("robot/enabled", Value::Boolean(false))]);
        table.initialize("10.0.0.2").unwrap();
        table
    }

    #[test]
    fn test_session_id_format() {
        let id = SessionId::new();
        assert!(id.as_str().starts_with("session-"));
        assert_eq!(id.as_str().len(), "session-".len() + 8);
        assert_ne!(id, SessionId::new());
    }

    #[tokio::test]
    async fn test_state_transitions_and_idempotent_close() {
        let table = table();
        let (server, _client) = socket_pair().await;
        let (session, handle) = Session::new(server, table.clone(), CodecConfig::json(), 16);
        assert_eq!(handle.state(), SessionState::Opening);

        let task = tokio::spawn(session.run());

        handle.close();
        handle.close();
        let reason = task.await.unwrap();

        assert_eq!(reason, CloseReason::Requested);
        assert_eq!(handle.state(), SessionState::Closed);
        handle.close();
        handle.closed().await;
        assert_eq!(table.value_listener_count(), 0);
        assert_eq!(table.connection_listener_count(), 0);
    }

    #[tokio::test]
    async fn test_peer_close_ends_session() {
        let table = table();
        let (server, mut client) = socket_pair().await;
        let (session, handle) = Session::new(server, table.clone(), CodecConfig::json(), 16);
        let task = tokio::spawn(session.run());

        client.close(None).await.unwrap();
        assert_eq!(task.await.unwrap(), CloseReason::PeerClosed);
        assert!(handle.is_closed());
        assert_eq!(table.value_listener_count(), 0);
    }

    #[tokio::test]
    async fn test_dropped_client_is_write_or_read_failure() {
        let table = table();
        let (server, client) = socket_pair().await;
        let (session, _handle) = Session::new(server, table.clone(), CodecConfig::json(), 16);
        drop(client);

        let reason = session.run().await;
        assert!(matches!(
            reason,
            CloseReason::PeerClosed | CloseReason::ReadFailure | CloseReason::WriteFailure
        ));
        assert_eq!(table.value_listener_count(), 0);
    }
}
