//! The hub connection: a cheap handle plus a background driver task.
//!
//! [`HubConnection`] never touches the transport. Every call is turned into
//! a [`Command`] and sent to the driver over an unbounded channel; the
//! driver is the only task that reads from or writes to the transport, so
//! frames can never interleave.
//!
//! The driver loop multiplexes three things with `tokio::select!`:
//!
//! - commands from handles (send a message, close),
//! - buffers from the transport (reassembled into frames, decoded and
//!   dispatched in stream order),
//! - the keep-alive deadline.
//!
//! When the transport drops it fails every pending call with
//! [`ConnectionError::ConnectionLost`] and walks the retry schedule. Each
//! wait and each connect attempt races against the command channel, so a
//! `close()` cancels the pending retry before it can fire.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use hubwire_protocol::{
    Encoder, FrameReader, HubProtocol, Invocation, Message, ParamType, ProtocolError,
};
use hubwire_transport::{Connection, Connector};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{self, Instant};
use tracing::{debug, info, trace, warn};

use crate::{ConnectionError, ConnectionState, HubEvent, HubOptions, retry::Backoff};

type Handler = Arc<dyn Fn(Vec<Value>) + Send + Sync>;

#[derive(Clone)]
struct Registration {
    param_types: Vec<ParamType>,
    handler: Handler,
}

type Handlers = Arc<Mutex<HashMap<String, Registration>>>;

/// Where the answer to an outstanding call goes.
enum Pending {
    Invoke(oneshot::Sender<Result<Value, ConnectionError>>),
    Stream(mpsc::UnboundedSender<Result<Value, ConnectionError>>),
}

impl Pending {
    fn fail(self, err: ConnectionError) {
        match self {
            Self::Invoke(tx) => {
                let _ = tx.send(Err(err));
            }
            Self::Stream(tx) => {
                let _ = tx.send(Err(err));
            }
        }
    }
}

/// Requests from handles to the driver.
enum Command {
    /// Write `message`. Once it is on the wire, register `pending` (if
    /// any) and report back on `written`.
    Send {
        message: Message,
        pending: Option<(String, Pending)>,
        written: oneshot::Sender<Result<(), ConnectionError>>,
    },
    /// Close for good. `done` fires once the transport is closed.
    Close { done: oneshot::Sender<()> },
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Handle to a running hub connection.
///
/// Cloning is cheap; all clones talk to the same driver. Dropping the last
/// handle closes the connection just like [`close`](Self::close).
///
/// # Example
///
/// ```no_run
/// use hubwire_connection::{HubConnection, HubEvent, HubOptions};
/// use hubwire_protocol::{HubProtocol, ParamType};
/// use hubwire_transport::WebSocketConnector;
/// use serde_json::json;
///
/// # async fn demo() -> Result<(), hubwire_connection::ConnectionError> {
/// let connector = WebSocketConnector::new("ws://127.0.0.1:5000/hub");
/// let (hub, mut events) =
///     HubConnection::connect(connector, HubProtocol::default(), HubOptions::default()).await?;
///
/// hub.on("Notify", vec![ParamType::String], |args| println!("notified: {:?}", args[0]));
/// let sum = hub.invoke("Add", vec![json!(1), json!(2)]).await?;
///
/// while let Some(event) = events.recv().await {
///     if let HubEvent::StateChanged(state) = event {
///         println!("state: {state}");
///     }
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct HubConnection {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    handlers: Handlers,
    next_id: Arc<AtomicU64>,
}

impl HubConnection {
    /// Opens the transport and starts the driver task.
    ///
    /// A failed first connect is not retried: the error is returned and
    /// nothing keeps running. The retry schedule only applies once a
    /// connection has been established and then drops.
    ///
    /// Returns the handle and the event receiver.
    ///
    /// # Errors
    /// Returns `ConnectionError::Transport` if the first connect fails.
    #[must_use = "the event receiver must be used to receive events"]
    pub async fn connect<C, E>(
        connector: C,
        protocol: HubProtocol<E>,
        options: HubOptions,
    ) -> Result<(Self, mpsc::Receiver<HubEvent>), ConnectionError>
    where
        C: Connector,
        E: Encoder,
    {
        let options = options.validated();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (event_tx, event_rx) = mpsc::channel(options.event_channel_capacity);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        let handlers: Handlers = Arc::default();
        let mut driver = Driver {
            connector,
            protocol,
            reader: FrameReader::new(options.max_buffered_bytes),
            backoff: options.retry_policy.backoff(),
            options,
            commands: cmd_rx,
            state: state_tx,
            events: event_tx,
            handlers: Arc::clone(&handlers),
            pending: HashMap::new(),
            last_write: Instant::now(),
            refusal: ConnectionError::NotConnected,
        };

        driver.set_state(ConnectionState::Connecting).await;
        let conn = match driver.connector.connect().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "initial connect failed");
                driver.state.send_replace(ConnectionState::Disconnected);
                return Err(ConnectionError::transport(e));
            }
        };
        info!(id = %conn.id(), "connected");
        driver.set_state(ConnectionState::Connected).await;

        tokio::spawn(driver.run(conn));

        let hub = Self {
            commands: cmd_tx,
            state: state_rx,
            handlers,
            next_id: Arc::new(AtomicU64::new(1)),
        };
        Ok((hub, event_rx))
    }

    /// Calls `target` and waits for its Completion.
    ///
    /// Resolves to the Completion's result (`Value::Null` for an empty
    /// acknowledgement).
    ///
    /// # Errors
    /// - `ConnectionError::Server` — the hub answered with an error.
    /// - `ConnectionError::ConnectionLost` — the transport dropped first.
    /// - `ConnectionError::NotConnected` — reconnecting; nothing was sent.
    /// - `ConnectionError::ConnectionExhausted` / `ServerClosed` / `Closed`
    ///   — the connection has ended for good; nothing was sent.
    pub async fn invoke(
        &self,
        target: impl Into<String>,
        arguments: Vec<Value>,
    ) -> Result<Value, ConnectionError> {
        let id = self.next_invocation_id();
        let (tx, rx) = oneshot::channel();
        let message = Message::Invocation(Invocation::new(id.clone(), target, arguments));
        self.submit(message, Some((id, Pending::Invoke(tx)))).await?;
        rx.await.map_err(|_| self.ended())?
    }

    /// Calls `target` without waiting for (or expecting) a Completion.
    ///
    /// Resolves once the invocation has been written to the transport.
    pub async fn send(
        &self,
        target: impl Into<String>,
        arguments: Vec<Value>,
    ) -> Result<(), ConnectionError> {
        let message = Message::Invocation(Invocation::nonblocking(target, arguments));
        self.submit(message, None).await
    }

    /// Starts a streaming call to `target`.
    ///
    /// Items arrive on the returned [`InvocationStream`] until the hub
    /// sends the Completion.
    pub async fn stream(
        &self,
        target: impl Into<String>,
        arguments: Vec<Value>,
    ) -> Result<InvocationStream, ConnectionError> {
        let id = self.next_invocation_id();
        let (tx, rx) = mpsc::unbounded_channel();
        let message = Message::StreamInvocation(Invocation::new(id.clone(), target, arguments));
        self.submit(message, Some((id.clone(), Pending::Stream(tx))))
            .await?;
        Ok(InvocationStream {
            invocation_id: id,
            items: rx,
            commands: self.commands.downgrade(),
        })
    }

    /// Writes any message as-is: upload invocations with stream ids,
    /// StreamItems for those uploads, Ack, Sequence, and so on.
    pub async fn send_message(&self, message: Message) -> Result<(), ConnectionError> {
        self.submit(message, None).await
    }

    /// Registers the handler for hub-to-client invocations of `target`,
    /// replacing any previous one.
    ///
    /// Arguments are coerced to `param_types` before the handler runs. If
    /// that fails the handler is skipped, a [`HubEvent::DispatchFailed`]
    /// is emitted, and an invocation that carries an id is answered with a
    /// Completion error. A successful call with an id is answered with an
    /// empty Completion.
    ///
    /// Handlers run on the driver task and must not block.
    pub fn on<F>(&self, target: impl Into<String>, param_types: Vec<ParamType>, handler: F)
    where
        F: Fn(Vec<Value>) + Send + Sync + 'static,
    {
        let target = target.into();
        debug!(method = %target, params = param_types.len(), "handler registered");
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                target,
                Registration {
                    param_types,
                    handler: Arc::new(handler),
                },
            );
    }

    /// Removes the handler for `target`. Returns whether one existed.
    pub fn off(&self, target: &str) -> bool {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(target)
            .is_some()
    }

    /// Closes the connection for good and waits until the transport is
    /// closed. Pending calls fail with [`ConnectionError::Closed`]; a
    /// pending retry is cancelled. Calling it again is a no-op.
    pub async fn close(&self) {
        let (done, closed) = oneshot::channel();
        if self.commands.send(Command::Close { done }).is_ok() {
            let _ = closed.await;
        }
    }

    /// The current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// A receiver that observes every state change.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    fn next_invocation_id(&self) -> String {
        self.next_id.fetch_add(1, Ordering::Relaxed).to_string()
    }

    async fn submit(
        &self,
        message: Message,
        pending: Option<(String, Pending)>,
    ) -> Result<(), ConnectionError> {
        let (written, ack) = oneshot::channel();
        self.commands
            .send(Command::Send {
                message,
                pending,
                written,
            })
            .map_err(|_| self.ended())?;
        ack.await.map_err(|_| self.ended())?
    }

    /// The error for a call made after the driver has stopped.
    fn ended(&self) -> ConnectionError {
        match self.state() {
            ConnectionState::Closed => ConnectionError::Closed,
            _ => ConnectionError::NotConnected,
        }
    }
}

impl std::fmt::Debug for HubConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubConnection")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Items of a streaming call, ended by the hub's Completion.
pub struct InvocationStream {
    invocation_id: String,
    items: mpsc::UnboundedReceiver<Result<Value, ConnectionError>>,
    commands: mpsc::WeakUnboundedSender<Command>,
}

impl InvocationStream {
    /// The id correlating this stream's items.
    pub fn invocation_id(&self) -> &str {
        &self.invocation_id
    }

    /// The next item. `None` once the stream has completed; an `Err` is
    /// always the last item.
    pub async fn next(&mut self) -> Option<Result<Value, ConnectionError>> {
        self.items.recv().await
    }

    /// Asks the hub to stop the stream and stops listening for items.
    pub async fn cancel(self) -> Result<(), ConnectionError> {
        let Some(commands) = self.commands.upgrade() else {
            return Err(ConnectionError::NotConnected);
        };
        let (written, ack) = oneshot::channel();
        commands
            .send(Command::Send {
                message: Message::CancelInvocation {
                    invocation_id: self.invocation_id,
                },
                pending: None,
                written,
            })
            .map_err(|_| ConnectionError::NotConnected)?;
        ack.await.map_err(|_| ConnectionError::NotConnected)?
    }
}

impl std::fmt::Debug for InvocationStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvocationStream")
            .field("invocation_id", &self.invocation_id)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// Why the driver stopped serving a transport.
enum Exit {
    /// `close()` was called, or every handle was dropped.
    Close(Option<oneshot::Sender<()>>),
    /// The transport dropped, or the hub closed with reconnect allowed.
    Dropped(String),
    /// The hub closed without allowing a reconnect.
    ServerClosed(Option<String>),
}

enum WriteFailure {
    Encode(ProtocolError),
    Transport(String),
}

enum Step<E> {
    Command(Option<Command>),
    Read(Result<Option<Vec<u8>>, E>),
    KeepAlive,
}

struct Driver<C: Connector, E: Encoder> {
    connector: C,
    protocol: HubProtocol<E>,
    options: HubOptions,
    reader: FrameReader,
    backoff: Backoff,
    commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<ConnectionState>,
    events: mpsc::Sender<HubEvent>,
    handlers: Handlers,
    pending: HashMap<String, Pending>,
    last_write: Instant,
    /// What calls get while no transport is being served.
    refusal: ConnectionError,
}

impl<C: Connector, E: Encoder> Driver<C, E> {
    async fn run(mut self, mut conn: C::Connection) {
        loop {
            match self.serve(&conn).await {
                Exit::Close(done) => {
                    // Best effort: the hub may already be gone.
                    let _ = self.write(&conn, &Message::close()).await;
                    let _ = conn.close().await;
                    self.shut_down(done).await;
                    return;
                }
                Exit::ServerClosed(error) => {
                    info!(id = %conn.id(), ?error, "hub closed the connection");
                    let _ = conn.close().await;
                    self.fail_pending(ConnectionError::ConnectionLost);
                    self.refusal = ConnectionError::ServerClosed {
                        reason: error.clone(),
                    };
                    self.set_state(ConnectionState::Disconnected).await;
                    self.emit(HubEvent::ServerClosed { error }).await;
                    self.linger().await;
                    return;
                }
                Exit::Dropped(reason) => {
                    warn!(id = %conn.id(), %reason, "connection dropped");
                    let _ = conn.close().await;
                    self.fail_pending(ConnectionError::ConnectionLost);
                    self.reader.clear();
                    match self.reconnect().await {
                        Some(next) => conn = next,
                        None => {
                            self.linger().await;
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Serves one established transport until it ends.
    async fn serve(&mut self, conn: &C::Connection) -> Exit {
        self.last_write = Instant::now();
        loop {
            let ping_at = self.options.keep_alive().map(|d| self.last_write + d);
            let step = tokio::select! {
                cmd = self.commands.recv() => Step::Command(cmd),
                read = conn.recv() => Step::Read(read),
                () = keep_alive_due(ping_at) => Step::KeepAlive,
            };

            match step {
                Step::Command(Some(Command::Send {
                    message,
                    pending,
                    written,
                })) => match self.write(conn, &message).await {
                    Ok(()) => {
                        if let Some((id, pending)) = pending {
                            self.pending.insert(id, pending);
                        }
                        if let Message::CancelInvocation { invocation_id } = &message {
                            // Dropping the sender ends the caller's stream.
                            self.pending.remove(invocation_id);
                        }
                        let _ = written.send(Ok(()));
                    }
                    Err(WriteFailure::Encode(e)) => {
                        let _ = written.send(Err(e.into()));
                    }
                    Err(WriteFailure::Transport(reason)) => {
                        let _ = written.send(Err(ConnectionError::Transport(reason.clone())));
                        return Exit::Dropped(reason);
                    }
                },
                Step::Command(Some(Command::Close { done })) => return Exit::Close(Some(done)),
                Step::Command(None) => {
                    debug!("all handles dropped");
                    return Exit::Close(None);
                }
                Step::Read(Ok(Some(bytes))) => {
                    trace!(len = bytes.len(), "received buffer");
                    self.reader.push(&bytes);
                    if let Some(exit) = self.drain_frames(conn).await {
                        return exit;
                    }
                }
                Step::Read(Ok(None)) => return Exit::Dropped("closed by peer".into()),
                Step::Read(Err(e)) => return Exit::Dropped(e.to_string()),
                Step::KeepAlive => {
                    trace!("keep-alive ping");
                    if let Err(WriteFailure::Transport(reason)) =
                        self.write(conn, &Message::Ping).await
                    {
                        return Exit::Dropped(reason);
                    }
                }
            }
        }
    }

    /// Decodes and dispatches every complete frame, in order. A bad frame
    /// is logged and skipped.
    async fn drain_frames(&mut self, conn: &C::Connection) -> Option<Exit> {
        loop {
            let payload = match self.reader.next_frame() {
                Ok(Some(payload)) => payload,
                Ok(None) => return None,
                Err(e) => {
                    warn!(error = %e, "discarding unterminated data");
                    return None;
                }
            };
            match self.protocol.decode_frame(&payload) {
                Ok(message) => {
                    if let Some(exit) = self.dispatch(conn, message).await {
                        return Some(exit);
                    }
                }
                Err(e) => warn!(error = %e, "dropping undecodable frame"),
            }
        }
    }

    async fn dispatch(&mut self, conn: &C::Connection, message: Message) -> Option<Exit> {
        match message {
            Message::Completion {
                invocation_id,
                result,
                error,
            } => match self.pending.remove(&invocation_id) {
                Some(Pending::Invoke(tx)) => {
                    let outcome = match error {
                        Some(error) => Err(ConnectionError::Server(error)),
                        None => Ok(result.unwrap_or(Value::Null)),
                    };
                    let _ = tx.send(outcome);
                }
                Some(Pending::Stream(tx)) => {
                    if let Some(error) = error {
                        let _ = tx.send(Err(ConnectionError::Server(error)));
                    }
                }
                None => {
                    debug!(%invocation_id, "completion for unknown invocation");
                    self.emit(HubEvent::Message(Message::Completion {
                        invocation_id,
                        result,
                        error,
                    }))
                    .await;
                }
            },
            Message::StreamItem {
                invocation_id,
                item,
            } => match self.pending.get(&invocation_id) {
                Some(Pending::Stream(tx)) => {
                    let _ = tx.send(Ok(item));
                }
                Some(Pending::Invoke(_)) => {
                    warn!(%invocation_id, "stream item for a non-streaming invocation");
                }
                None => {
                    self.emit(HubEvent::Message(Message::StreamItem {
                        invocation_id,
                        item,
                    }))
                    .await;
                }
            },
            Message::Invocation(invocation) => return self.invoke_handler(conn, invocation).await,
            Message::Ping => trace!("ping from hub"),
            Message::Close {
                error,
                allow_reconnect: true,
            } => {
                let reason = error.unwrap_or_else(|| "hub requested reconnect".into());
                return Some(Exit::Dropped(reason));
            }
            Message::Close {
                error,
                allow_reconnect: false,
            } => return Some(Exit::ServerClosed(error)),
            other @ (Message::StreamInvocation(_)
            | Message::CancelInvocation { .. }
            | Message::Ack { .. }
            | Message::Sequence { .. }) => self.emit(HubEvent::Message(other)).await,
        }
        None
    }

    async fn invoke_handler(
        &mut self,
        conn: &C::Connection,
        invocation: Invocation,
    ) -> Option<Exit> {
        let registration = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&invocation.target)
            .cloned();

        let Some(registration) = registration else {
            debug!(method = %invocation.target, "no handler registered");
            let reply = invocation.invocation_id.as_ref().map(|id| {
                Message::completion_error(
                    id.clone(),
                    format!("no client method named '{}'", invocation.target),
                )
            });
            self.emit(HubEvent::Message(Message::Invocation(invocation)))
                .await;
            return self.reply(conn, reply).await;
        };

        match self
            .protocol
            .get_real_arguments(&registration.param_types, &invocation.arguments)
        {
            Ok(arguments) => {
                trace!(method = %invocation.target, "dispatching invocation");
                (registration.handler)(arguments);
                let reply = invocation
                    .invocation_id
                    .map(|id| Message::completion_empty(id));
                self.reply(conn, reply).await
            }
            Err(e) => {
                warn!(method = %invocation.target, error = %e, "dispatch failed");
                let reply = invocation
                    .invocation_id
                    .map(|id| Message::completion_error(id, e.to_string()));
                self.emit(HubEvent::DispatchFailed {
                    target: invocation.target,
                    error: e.into(),
                })
                .await;
                self.reply(conn, reply).await
            }
        }
    }

    async fn reply(&mut self, conn: &C::Connection, reply: Option<Message>) -> Option<Exit> {
        let reply = reply?;
        match self.write(conn, &reply).await {
            Err(WriteFailure::Transport(reason)) => Some(Exit::Dropped(reason)),
            Err(WriteFailure::Encode(e)) => {
                warn!(error = %e, "could not encode reply");
                None
            }
            Ok(()) => None,
        }
    }

    /// Walks the retry schedule. Returns the new transport, or `None` once
    /// the schedule is exhausted or the connection was closed.
    async fn reconnect(&mut self) -> Option<C::Connection> {
        self.set_state(ConnectionState::Reconnecting).await;

        loop {
            let Some(delay) = self.backoff.next_delay() else {
                let attempts = self.backoff.attempts();
                warn!(attempts, "retry schedule exhausted");
                self.refusal = ConnectionError::ConnectionExhausted { attempts };
                self.set_state(ConnectionState::Disconnected).await;
                self.emit(HubEvent::ConnectionExhausted { attempts }).await;
                return None;
            };
            let attempt = self.backoff.attempts();
            info!(
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "reconnecting after delay"
            );

            if let Err(done) = interruptible(&mut self.commands, &self.refusal, time::sleep(delay)).await {
                self.shut_down(done).await;
                return None;
            }

            match interruptible(&mut self.commands, &self.refusal, self.connector.connect()).await {
                Err(done) => {
                    self.shut_down(done).await;
                    return None;
                }
                Ok(Err(e)) => warn!(attempt, error = %e, "reconnect attempt failed"),
                Ok(Ok(conn)) => {
                    info!(attempt, id = %conn.id(), "reconnected");
                    self.backoff.reset();
                    self.set_state(ConnectionState::Connected).await;
                    return Some(conn);
                }
            }
        }
    }

    /// Parks a disconnected driver: calls are refused with the reason it
    /// gave up until `close()` (or the last handle dropping) moves it to
    /// `Closed`.
    async fn linger(&mut self) {
        if *self.state.borrow() != ConnectionState::Disconnected {
            return;
        }
        let parked = interruptible(
            &mut self.commands,
            &self.refusal,
            std::future::pending::<()>(),
        )
        .await;
        if let Err(done) = parked {
            self.shut_down(done).await;
        }
    }

    async fn shut_down(&mut self, done: Option<oneshot::Sender<()>>) {
        if self.close_now(done) {
            info!("connection closed");
            self.emit(HubEvent::StateChanged(ConnectionState::Closed))
                .await;
        }
    }

    /// Moves to `Closed` and releases `close()`. Returns whether the state
    /// changed.
    fn close_now(&mut self, done: Option<oneshot::Sender<()>>) -> bool {
        self.fail_pending(ConnectionError::Closed);
        self.refusal = ConnectionError::Closed;
        let previous = self.state.send_replace(ConnectionState::Closed);
        if let Some(done) = done {
            let _ = done.send(());
        }
        previous != ConnectionState::Closed
    }

    async fn write(
        &mut self,
        conn: &C::Connection,
        message: &Message,
    ) -> Result<(), WriteFailure> {
        let frame = self
            .protocol
            .encode_message(message)
            .map_err(WriteFailure::Encode)?;
        conn.send(&frame)
            .await
            .map_err(|e| WriteFailure::Transport(e.to_string()))?;
        self.last_write = Instant::now();
        Ok(())
    }

    fn fail_pending(&mut self, err: ConnectionError) {
        if !self.pending.is_empty() {
            debug!(count = self.pending.len(), error = %err, "failing pending calls");
        }
        for (_, pending) in self.pending.drain() {
            pending.fail(err.clone());
        }
    }

    async fn set_state(&mut self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "state changed");
            self.emit(HubEvent::StateChanged(state)).await;
        }
    }

    /// Queues an event without blocking the driver. A full channel drops
    /// the event with a warning, except for terminal events, which wait
    /// for room.
    async fn emit(&mut self, event: HubEvent) {
        if event.is_terminal() {
            self.deliver(event).await;
            return;
        }
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                warn!(event = ?dropped, "event channel full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                trace!("event receiver dropped");
            }
        }
    }

    /// Waits for room for a terminal event while still answering handles.
    /// A close that arrives meanwhile wins: the driver moves to `Closed`
    /// and the event is dropped.
    async fn deliver(&mut self, event: HubEvent) {
        let closing = matches!(event, HubEvent::StateChanged(ConnectionState::Closed));
        if *self.state.borrow() == ConnectionState::Closed && !closing {
            debug!(?event, "already closed, not delivering");
            return;
        }
        let sent = interruptible(&mut self.commands, &self.refusal, self.events.send(event)).await;
        match sent {
            Ok(Ok(())) => {}
            Ok(Err(_)) => debug!("event receiver dropped"),
            Err(done) => {
                if self.close_now(done) {
                    info!("connection closed while the event channel was full");
                    let _ = self
                        .events
                        .try_send(HubEvent::StateChanged(ConnectionState::Closed));
                }
            }
        }
    }
}

/// Runs `fut` while answering commands: sends are refused with `refusal`,
/// and a close (or every handle dropping) abandons `fut`.
async fn interruptible<F: Future>(
    commands: &mut mpsc::UnboundedReceiver<Command>,
    refusal: &ConnectionError,
    fut: F,
) -> Result<F::Output, Option<oneshot::Sender<()>>> {
    tokio::pin!(fut);
    loop {
        tokio::select! {
            biased;
            cmd = commands.recv() => match cmd {
                Some(Command::Send { written, .. }) => {
                    let _ = written.send(Err(refusal.clone()));
                }
                Some(Command::Close { done }) => return Err(Some(done)),
                None => return Err(None),
            },
            out = &mut fut => return Ok(out),
        }
    }
}

async fn keep_alive_due(at: Option<Instant>) {
    match at {
        Some(at) => time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
