//! Transaction channel: request/reply correlation over one logical,
//! possibly-interrupted connection.
//!
//! The channel owns the current transport (if any), a FIFO of messages
//! queued while disconnected, and the map of outstanding transactions.
//! Every inbound message that matches a pending transaction resolves it
//! exactly once; every inbound message is additionally re-emitted on the
//! event bus so non-transactional listeners observe it.

use crate::transport::{Transport, TransportEvent};
use crate::wire::WireMessage;
use log::{debug, warn};
use rand::RngCore;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, broadcast, mpsc, oneshot};
use tokio::time::timeout;

const EVENT_CHANNEL_CAPACITY: usize = 100;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel closed before a reply arrived")]
    ConnectionClosed,
    #[error("timed out waiting for a reply")]
    Timeout,
}

/// Connection lifecycle and message events emitted for subscribers.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// A connection was attached and the outbound queue flushed.
    Opened,
    /// An inbound message (request, event or reply) arrived.
    Message(Arc<WireMessage>),
    /// The connection was lost or the channel was closed.
    Closed,
    /// A transport-level send failure. Informational; the message was
    /// logged and dropped, not re-queued.
    Error(String),
}

struct ConnectionState {
    transport: Option<Arc<dyn Transport>>,
    /// Bumped on every attach/detach so a pump from a previous connection
    /// cannot resolve transactions with stale replies.
    generation: u64,
}

pub struct SignalChannel {
    state: Mutex<ConnectionState>,
    waiters: Mutex<HashMap<String, oneshot::Sender<Arc<WireMessage>>>>,
    outbound: Mutex<VecDeque<WireMessage>>,
    closed: AtomicBool,
    events: broadcast::Sender<ChannelEvent>,
    unique_id: String,
    id_counter: AtomicU64,
}

impl SignalChannel {
    pub fn new() -> Arc<Self> {
        let mut unique_id_bytes = [0u8; 2];
        rand::rng().fill_bytes(&mut unique_id_bytes);

        Arc::new(Self {
            state: Mutex::new(ConnectionState {
                transport: None,
                generation: 0,
            }),
            waiters: Mutex::new(HashMap::new()),
            outbound: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
            events: broadcast::channel(EVENT_CHANNEL_CAPACITY).0,
            unique_id: format!("{}.{}", unique_id_bytes[0], unique_id_bytes[1]),
            id_counter: AtomicU64::new(0),
        })
    }

    /// Generates a new correlation id, unique for this channel's lifetime.
    pub fn next_id(&self) -> String {
        let count = self.id_counter.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}", self.unique_id, count)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.transport.is_some()
    }

    /// Attaches a fresh connection. Queued messages are flushed in
    /// insertion order before the open event is emitted; inbound frames
    /// are pumped until the connection drops.
    pub async fn attach(
        self: &Arc<Self>,
        transport: Arc<dyn Transport>,
        events: mpsc::Receiver<TransportEvent>,
    ) {
        if self.is_closed() {
            warn!(target: "Channel", "Attach on a closed channel ignored");
            transport.disconnect().await;
            return;
        }

        let generation = {
            let mut state = self.state.lock().await;
            state.generation += 1;
            state.transport = Some(transport.clone());
            state.generation
        };

        self.flush_outbound(&transport).await;
        let _ = self.events.send(ChannelEvent::Opened);

        let channel = self.clone();
        tokio::spawn(async move { channel.pump(generation, events).await });
    }

    /// Drops the current transport without failing pending transactions.
    /// Used by the reconnection control loop: queued callers survive and
    /// complete after a new connection is attached.
    pub(crate) async fn detach(&self) {
        let transport = {
            let mut state = self.state.lock().await;
            state.generation += 1;
            state.transport.take()
        };
        if let Some(t) = transport {
            t.disconnect().await;
        }
    }

    /// Sends a message, queueing it if no connection is attached. Never
    /// fails: transport errors are logged, not raised, so fire-and-forget
    /// callers cannot crash the engine.
    pub async fn send(&self, message: WireMessage) {
        if self.is_closed() {
            warn!(target: "Channel", "Dropping send on closed channel: {:?}", message.method);
            return;
        }
        let transport = { self.state.lock().await.transport.clone() };
        match transport {
            Some(t) => self.transmit(&t, &message).await,
            None => {
                debug!(target: "Channel", "Disconnected, queueing message {}", message.id);
                self.outbound.lock().await.push_back(message);
            }
        }
    }

    /// Sends a request and suspends the caller until a reply bearing the
    /// same id arrives or the channel is torn down. There is no intrinsic
    /// timeout; callers that cannot wait unbounded pass a `deadline`.
    pub async fn send_and_wait(
        &self,
        message: WireMessage,
        deadline: Option<Duration>,
    ) -> Result<Arc<WireMessage>, ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::ConnectionClosed);
        }
        let id = message.id.clone();
        let (tx, rx) = oneshot::channel();
        if self
            .waiters
            .lock()
            .await
            .insert(id.clone(), tx)
            .is_some()
        {
            // Ids must be globally unique; dropping the older waiter here
            // fails it with a connection-closed error.
            warn!(target: "Channel", "Duplicate transaction id {id}, replacing prior waiter");
        }

        self.send(message).await;

        let outcome = match deadline {
            Some(d) => match timeout(d, rx).await {
                Ok(received) => received,
                Err(_) => {
                    self.waiters.lock().await.remove(&id);
                    return Err(ChannelError::Timeout);
                }
            },
            None => rx.await,
        };
        outcome.map_err(|_| ChannelError::ConnectionClosed)
    }

    /// Permanently closes the channel: fails all pending transactions,
    /// clears the outbound queue and notifies subscribers. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let transport = {
            let mut state = self.state.lock().await;
            state.generation += 1;
            state.transport.take()
        };
        if let Some(t) = transport {
            t.disconnect().await;
        }
        // Dropping the senders fails every suspended caller.
        self.waiters.lock().await.clear();
        self.outbound.lock().await.clear();
        let _ = self.events.send(ChannelEvent::Closed);
    }

    async fn flush_outbound(&self, transport: &Arc<dyn Transport>) {
        loop {
            let next = self.outbound.lock().await.pop_front();
            match next {
                Some(message) => {
                    debug!(target: "Channel", "Flushing queued message {}", message.id);
                    self.transmit(transport, &message).await;
                }
                None => return,
            }
        }
    }

    async fn transmit(&self, transport: &Arc<dyn Transport>, message: &WireMessage) {
        let text = match message.to_json() {
            Ok(t) => t,
            Err(e) => {
                warn!(target: "Channel", "Failed to serialize message {}: {e}", message.id);
                return;
            }
        };
        if let Err(e) = transport.send(&text).await {
            warn!(target: "Channel", "Transport send failed for {}: {e:#}", message.id);
            let _ = self.events.send(ChannelEvent::Error(e.to_string()));
        }
    }

    /// Bumped on every attach/detach; lets long-lived helpers notice
    /// that the connection they were started for is gone.
    pub(crate) async fn current_generation(&self) -> u64 {
        self.state.lock().await.generation
    }

    async fn pump(self: Arc<Self>, generation: u64, mut events: mpsc::Receiver<TransportEvent>) {
        while let Some(event) = events.recv().await {
            if self.current_generation().await != generation {
                debug!(target: "Channel", "Stale connection pump exiting (generation {generation})");
                return;
            }
            match event {
                TransportEvent::MessageReceived(text) => match WireMessage::from_json(&text) {
                    Ok(message) => self.handle_inbound(message).await,
                    Err(e) => warn!(target: "Channel", "Discarding unparseable frame: {e}"),
                },
                TransportEvent::Disconnected => {
                    self.handle_disconnect(generation).await;
                    return;
                }
                TransportEvent::Connected => {
                    debug!(target: "Channel", "Transport reports connected")
                }
            }
        }
        // Event sender dropped without an explicit disconnect.
        self.handle_disconnect(generation).await;
    }

    pub(crate) async fn handle_inbound(&self, message: WireMessage) {
        let message = Arc::new(message);
        if let Some(waiter) = self.waiters.lock().await.remove(&message.id) {
            if waiter.send(message.clone()).is_err() {
                warn!(
                    target: "Channel",
                    "Reply for {} arrived but the waiter was gone", message.id
                );
            }
        }
        // Always re-emit so state machines observe the message too.
        let _ = self.events.send(ChannelEvent::Message(message));
    }

    async fn handle_disconnect(&self, generation: u64) {
        {
            let mut state = self.state.lock().await;
            if state.generation != generation {
                return; // a newer connection already took over
            }
            state.transport = None;
        }
        debug!(target: "Channel", "Connection lost (generation {generation})");
        let _ = self.events.send(ChannelEvent::Closed);
    }
}
