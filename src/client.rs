//! Session orchestrator: single point of truth for which calls exist,
//! session-wide identity, and resilience to connectivity loss.
//!
//! The client owns the signal channel and the ordered call registry. It
//! is the only component with cross-call visibility: inbound events are
//! routed to their call by identifier, buffered when the call does not
//! exist yet, and externally queued actions are resolved against calls
//! that may not have materialized at the time they were queued.

use crate::auth::{self, AuthError};
use crate::calls::session::CallContext;
use crate::calls::{Call, CallError};
use crate::channel::{ChannelError, ChannelEvent, SignalChannel};
use crate::config::ClientConfig;
use crate::media::{MediaError, MediaSessionFactory};
use crate::transport::{TransportFactory, WebSocketTransportFactory};
use crate::types::call::NetworkKind;
use crate::types::events::{
    Connected, Disconnected, EventBus, IncomingCall, ReconnectFailed, Reconnecting,
};
use crate::wire::{
    AnswerParams, ByeParams, CustomHeader, GatewayStateResult, InviteParams, MediaEventParams,
    RingingParams, SignalMethod, WireError, WireMessage,
};
use indexmap::IndexMap;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::{Notify, broadcast};
use tokio::task::JoinHandle;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("not connected to the gateway")]
    NotConnected,
    #[error("a connection attempt is already in progress")]
    AlreadyConnecting,
    #[error("transport error: {0}")]
    Transport(#[from] anyhow::Error),
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),
    #[error("call error: {0}")]
    Call(#[from] CallError),
    #[error("protocol error: {0}")]
    Wire(#[from] WireError),
    #[error("media error: {0}")]
    Media(#[from] MediaError),
}

/// An externally queued answer or end, e.g. from a push-notification
/// handler acting before the invite has arrived. One slot per kind; a
/// newer request overwrites the older one and the slot is cleared after
/// the execution attempt, successful or not.
#[derive(Debug, Clone, Default)]
struct PendingAction {
    headers: Vec<CustomHeader>,
    correlation: Option<String>,
}

pub struct Client {
    pub(crate) config: ClientConfig,
    pub(crate) channel: Arc<SignalChannel>,
    transport_factory: Arc<dyn TransportFactory>,
    media_factory: Arc<dyn MediaSessionFactory>,
    bus: Arc<EventBus>,
    /// Gateway-issued session identity; runtime state, replaced on every
    /// successful login and never derived from ambient globals.
    session_id: Mutex<Option<String>>,
    /// Insertion-ordered registry. Entries leave only through explicit
    /// cleanup, never automatically on `ended`.
    calls: Mutex<IndexMap<String, Arc<Call>>>,
    /// Single slot: an invite that arrived while login was in flight.
    pending_invite: Mutex<Option<InviteParams>>,
    /// At most one buffered media event per call id; latest overwrites.
    pending_media: Mutex<HashMap<String, MediaEventParams>>,
    pending_answer: Mutex<Option<PendingAction>>,
    pending_end: Mutex<Option<PendingAction>>,
    reconnecting: AtomicBool,
    network_kind: Mutex<NetworkKind>,
    reconnect_timer: Mutex<Option<JoinHandle<()>>>,
    is_connecting: AtomicBool,
    is_running: AtomicBool,
    pub(crate) shutdown: Notify,
}

impl Client {
    pub fn new(
        config: ClientConfig,
        transport_factory: Arc<dyn TransportFactory>,
        media_factory: Arc<dyn MediaSessionFactory>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            channel: SignalChannel::new(),
            transport_factory,
            media_factory,
            bus: Arc::new(EventBus::new()),
            session_id: Mutex::new(None),
            calls: Mutex::new(IndexMap::new()),
            pending_invite: Mutex::new(None),
            pending_media: Mutex::new(HashMap::new()),
            pending_answer: Mutex::new(None),
            pending_end: Mutex::new(None),
            reconnecting: AtomicBool::new(false),
            network_kind: Mutex::new(NetworkKind::default()),
            reconnect_timer: Mutex::new(None),
            is_connecting: AtomicBool::new(false),
            is_running: AtomicBool::new(false),
            shutdown: Notify::new(),
        })
    }

    /// Convenience constructor wiring the production WebSocket transport
    /// from the configured gateway URL.
    pub fn with_websocket(
        config: ClientConfig,
        media_factory: Arc<dyn MediaSessionFactory>,
    ) -> Arc<Self> {
        let transport = Arc::new(WebSocketTransportFactory::new(config.gateway_url.clone()));
        Self::new(config, transport, media_factory)
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id.lock().unwrap().clone()
    }

    pub async fn is_connected(&self) -> bool {
        self.channel.is_connected().await
    }

    fn call_context(&self) -> Option<CallContext> {
        let session_id = self.session_id.lock().unwrap().clone()?;
        Some(CallContext {
            channel: self.channel.clone(),
            bus: self.bus.clone(),
            session_id,
            reply_deadline: self.config.reply_deadline,
        })
    }

    /// Connects the transport and logs in. An invite that was buffered
    /// while no session existed is replayed once login completes.
    pub async fn connect(self: &Arc<Self>) -> Result<(), ClientError> {
        self.connect_and_login().await?;
        self.replay_pending_invite().await;
        Ok(())
    }

    async fn connect_and_login(self: &Arc<Self>) -> Result<(), ClientError> {
        if self.is_connecting.swap(true, Ordering::SeqCst) {
            return Err(ClientError::AlreadyConnecting);
        }
        let _guard = scopeguard::guard((), |_| {
            self.is_connecting.store(false, Ordering::Relaxed);
        });

        let (transport, events) = self.transport_factory.create_transport().await?;
        self.channel.attach(transport, events).await;

        let session_id = auth::login(&self.channel, &self.config.credentials).await?;
        info!(target: "Client", "Logged in, session {session_id}");
        *self.session_id.lock().unwrap() = Some(session_id.clone());
        let _ = self.bus.connected.send(Arc::new(Connected { session_id }));

        let client = self.clone();
        tokio::spawn(async move { client.keepalive_loop().await });
        Ok(())
    }

    /// The event-processing sequence. Every inbound channel event funnels
    /// through here, so call and registry mutation stays sequential.
    /// Handler bodies never propagate errors out of this loop.
    pub async fn run(self: &Arc<Self>) {
        if self.is_running.swap(true, Ordering::SeqCst) {
            warn!(target: "Client", "run() called while already running");
            return;
        }
        let mut events = self.channel.subscribe();
        loop {
            tokio::select! {
                _ = self.shutdown.notified() => break,
                event = events.recv() => match event {
                    Ok(ChannelEvent::Message(msg)) => self.handle_message(msg).await,
                    Ok(ChannelEvent::Closed) => {
                        if self.channel.is_closed() {
                            break;
                        }
                        self.begin_reconnect().await;
                    }
                    Ok(ChannelEvent::Opened) => {
                        debug!(target: "Client", "Channel opened")
                    }
                    Ok(ChannelEvent::Error(e)) => {
                        warn!(target: "Client", "Channel error: {e}")
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(target: "Client", "Event loop lagged, {n} events missed")
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        self.is_running.store(false, Ordering::SeqCst);
        debug!(target: "Client", "Event loop stopped");
    }

    /// Permanently shuts the client down: fails pending transactions,
    /// stops background loops and forgets the session identity.
    pub async fn disconnect(&self) {
        info!(target: "Client", "Disconnecting client intentionally");
        self.shutdown.notify_waiters();
        if let Some(timer) = self.reconnect_timer.lock().unwrap().take() {
            timer.abort();
        }
        self.reconnecting.store(false, Ordering::SeqCst);
        self.session_id.lock().unwrap().take();
        self.channel.close().await;
    }

    async fn ack(&self, id: &str) {
        self.channel.send(WireMessage::ack(id.to_string())).await;
    }

    pub(crate) async fn handle_message(self: &Arc<Self>, msg: Arc<WireMessage>) {
        if msg.is_reply() {
            // Replies are resolved by the channel's transaction map.
            return;
        }
        let _ = self.bus.notification.send(msg.clone());
        match msg.method() {
            Some(SignalMethod::Invite) => self.handle_invite(&msg).await,
            Some(SignalMethod::Attach) => self.handle_attach(&msg).await,
            Some(SignalMethod::Media) => self.handle_media_event(&msg).await,
            Some(SignalMethod::Answer) => self.handle_answer_event(&msg).await,
            Some(SignalMethod::Ringing) => self.handle_ringing_event(&msg).await,
            Some(SignalMethod::Bye) => self.handle_bye_event(&msg).await,
            Some(SignalMethod::Ping) => self.ack(&msg.id).await,
            _ => {
                debug!(target: "Client", "Acknowledging unhandled event {:?}", msg.method);
                self.ack(&msg.id).await;
            }
        }
    }

    /// Inbound invite. Acked immediately so the gateway does not
    /// retransmit, buffered if login is still in flight, otherwise
    /// materialized into a registry entry.
    async fn handle_invite(self: &Arc<Self>, msg: &WireMessage) {
        self.ack(&msg.id).await;
        let params: InviteParams = match msg.parse_params() {
            Ok(p) => p,
            Err(e) => {
                warn!(target: "Client", "Discarding malformed invite: {e}");
                return;
            }
        };
        let session_ready = self.session_id.lock().unwrap().is_some();
        if !session_ready {
            let mut pending = self.pending_invite.lock().unwrap();
            if pending.is_some() {
                warn!(target: "Client", "Overwriting a pending invite with a newer one");
            }
            debug!(target: "Client", "Buffering invite for {} until login completes", params.dialog_params.call_id);
            *pending = Some(params);
            return;
        }
        self.materialize_inbound(params, false).await;
    }

    async fn replay_pending_invite(self: &Arc<Self>) {
        let invite = self.pending_invite.lock().unwrap().take();
        if let Some(params) = invite {
            debug!(target: "Client", "Replaying invite buffered during login");
            self.materialize_inbound(params, false).await;
        }
    }

    /// Builds the call for an inbound invite (or a reattach replay when
    /// `recovered`). Consumes any buffered media event for the call id,
    /// then schedules whatever action was queued out-of-band.
    async fn materialize_inbound(self: &Arc<Self>, invite: InviteParams, recovered: bool) {
        let call_id = invite.dialog_params.call_id.clone();
        if self.get_call(&call_id).is_some() {
            warn!(target: "Client", "Invite for already known call {call_id} ignored");
            return;
        }
        let ctx = match self.call_context() {
            Some(ctx) => ctx,
            None => {
                warn!(target: "Client", "Cannot materialize {call_id}: no session");
                return;
            }
        };
        let correlation = {
            let pending = self.pending_answer.lock().unwrap();
            pending.as_ref().and_then(|a| a.correlation.clone())
        };
        let call = Call::new_inbound(ctx, &invite, correlation, recovered);
        match self.media_factory.create_session().await {
            Ok(media) => call.attach_media(media),
            Err(e) => warn!(target: "Client", "No media session for {call_id}: {e}"),
        }

        // A media event that raced ahead of the invite carries the
        // remote description; it supersedes the invite's own, and the
        // buffer slot is discarded here either way.
        let buffered = self.pending_media.lock().unwrap().remove(&call_id);
        let remote_sdp = buffered
            .as_ref()
            .and_then(|m| m.sdp.clone())
            .or_else(|| invite.sdp.clone());
        if let Some(sdp) = &remote_sdp {
            call.handle_early_media(sdp).await;
        }
        if let Some(buffered) = &buffered
            && (buffered.audio.is_some() || buffered.video.is_some())
        {
            call.handle_media_update(buffered).await;
        }

        self.calls.lock().unwrap().insert(call_id.clone(), call.clone());
        if !recovered {
            let _ = self.bus.incoming_call.send(Arc::new(IncomingCall {
                call_id,
                caller_name: call.caller_name().map(Into::into),
                caller_number: call.remote_number().map(Into::into),
            }));
        }
        self.schedule_pending_actions(call);
    }

    /// Applies a queued answer/end to a freshly materialized call, after
    /// a short delay that lets construction settle.
    fn schedule_pending_actions(self: &Arc<Self>, call: Arc<Call>) {
        let queued = self.pending_answer.lock().unwrap().is_some()
            || self.pending_end.lock().unwrap().is_some();
        if !queued {
            return;
        }
        let client = self.clone();
        let delay = self.config.action_settle_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            client.apply_pending_actions(&call).await;
        });
    }

    async fn apply_pending_actions(&self, call: &Arc<Call>) {
        // Both slots are cleared on take: an action is never silently
        // retried after a failed attempt.
        let end = self.pending_end.lock().unwrap().take();
        if let Some(action) = end {
            self.pending_answer.lock().unwrap().take();
            info!(target: "Client", "Applying queued end to {}", call.call_id());
            call.hangup(Some(action.headers)).await;
            return;
        }
        let answer = self.pending_answer.lock().unwrap().take();
        if let Some(action) = answer {
            info!(target: "Client", "Applying queued answer to {}", call.call_id());
            if let Err(e) = call.answer(Some(action.headers)).await {
                warn!(target: "Client", "Queued answer for {} failed: {e}", call.call_id());
            }
        }
    }

    /// Media events are matched by call id; for a call that does not
    /// exist yet the event is buffered (one slot per id, latest wins).
    async fn handle_media_event(&self, msg: &WireMessage) {
        self.ack(&msg.id).await;
        let params: MediaEventParams = match msg.parse_params() {
            Ok(p) => p,
            Err(e) => {
                warn!(target: "Client", "Discarding malformed media event: {e}");
                return;
            }
        };
        match self.get_call(&params.call_id) {
            Some(call) => {
                if let Some(sdp) = &params.sdp {
                    call.handle_early_media(sdp).await;
                }
                if params.audio.is_some() || params.video.is_some() {
                    call.handle_media_update(&params).await;
                }
            }
            None => {
                debug!(target: "Client", "Buffering media event for future call {}", params.call_id);
                self.pending_media
                    .lock()
                    .unwrap()
                    .insert(params.call_id.clone(), params);
            }
        }
    }

    async fn handle_answer_event(&self, msg: &WireMessage) {
        self.ack(&msg.id).await;
        let params: AnswerParams = match msg.parse_params() {
            Ok(p) => p,
            Err(e) => {
                warn!(target: "Client", "Discarding malformed answer event: {e}");
                return;
            }
        };
        match self.get_call(&params.dialog_params.call_id) {
            Some(call) => {
                call.note_remote_leg(params.dialog_params.local_leg.as_deref());
                call.handle_remote_answer(params.sdp.as_deref()).await;
            }
            None => warn!(
                target: "Client",
                "Routing miss: answer event for unknown call {}", params.dialog_params.call_id
            ),
        }
    }

    async fn handle_ringing_event(&self, msg: &WireMessage) {
        self.ack(&msg.id).await;
        let params: RingingParams = match msg.parse_params() {
            Ok(p) => p,
            Err(e) => {
                warn!(target: "Client", "Discarding malformed ringing event: {e}");
                return;
            }
        };
        match self.get_call(&params.dialog_params.call_id) {
            Some(call) => {
                call.note_remote_leg(params.dialog_params.local_leg.as_deref());
                call.handle_remote_ringing();
            }
            None => warn!(
                target: "Client",
                "Routing miss: ringing event for unknown call {}", params.dialog_params.call_id
            ),
        }
    }

    async fn handle_bye_event(&self, msg: &WireMessage) {
        self.ack(&msg.id).await;
        let params: ByeParams = match msg.parse_params() {
            Ok(p) => p,
            Err(e) => {
                warn!(target: "Client", "Discarding malformed bye event: {e}");
                return;
            }
        };
        match self.get_call(&params.dialog_params.call_id) {
            Some(call) => call.handle_remote_bye().await,
            None => warn!(
                target: "Client",
                "Routing miss: bye event for unknown call {}", params.dialog_params.call_id
            ),
        }
    }

    /// Session reattachment: the gateway replays an invite-shaped event
    /// for each established dialog it still holds. A known (dropped)
    /// call gets a fresh media handle on the same object; an unknown one
    /// is rebuilt through the inbound path, tagged recovered.
    async fn handle_attach(self: &Arc<Self>, msg: &WireMessage) {
        self.ack(&msg.id).await;
        let params: InviteParams = match msg.parse_params() {
            Ok(p) => p,
            Err(e) => {
                warn!(target: "Client", "Discarding malformed attach event: {e}");
                return;
            }
        };
        let call_id = params.dialog_params.call_id.clone();
        match self.get_call(&call_id) {
            Some(call) => {
                let media = match self.media_factory.create_session().await {
                    Ok(m) => m,
                    Err(e) => {
                        warn!(target: "Client", "No media session to reattach {call_id}: {e}");
                        return;
                    }
                };
                if let Err(e) = call.reattach(media, params.sdp.as_deref()).await {
                    warn!(target: "Client", "Reattach for {call_id} rejected: {e}");
                    return;
                }
                self.complete_reattach(call);
            }
            None => {
                self.materialize_inbound(params, true).await;
                if let Some(call) = self.get_call(&call_id) {
                    self.complete_reattach(call);
                }
            }
        }
    }

    /// The gateway only replays established dialogs, so finish the
    /// answer flow to bring the call back to `Active`, reusing the
    /// headers of the original answer.
    fn complete_reattach(&self, call: Arc<Call>) {
        if !call.was_answered() {
            return;
        }
        tokio::spawn(async move {
            let headers = call.answer_headers();
            let headers = (!headers.is_empty()).then_some(headers);
            if let Err(e) = call.answer(headers).await {
                warn!(target: "Client", "Re-answer after reattach failed for {}: {e}", call.call_id());
            }
        });
    }

    /// Entry point of the reconnection control loop. Idempotent: a loss
    /// signal while already reconnecting is ignored.
    async fn begin_reconnect(self: &Arc<Self>) {
        if self.channel.is_closed() {
            return;
        }
        if self.reconnecting.swap(true, Ordering::SeqCst) {
            debug!(target: "Client", "Already reconnecting, loss signal ignored");
            return;
        }
        info!(target: "Client", "Connectivity lost, opening the reconnection window");
        let _ = self.bus.disconnected.send(Arc::new(Disconnected));
        let _ = self.bus.reconnecting.send(Arc::new(Reconnecting));

        // Live calls survive as dropped; their media handles are useless
        // now and are recreated at reattachment.
        let calls: Vec<Arc<Call>> = self.calls.lock().unwrap().values().cloned().collect();
        for call in calls {
            call.drop_for_reconnect().await;
        }

        // Tear down the channel without touching session-identifying
        // configuration; queued sends survive for the next connection.
        self.channel.detach().await;

        let client = self.clone();
        let window = self.config.reconnect_timeout;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            if client.reconnecting.swap(false, Ordering::SeqCst) {
                warn!(target: "Client", "Reconnection window expired, dropped calls stay dropped");
                let _ = client.bus.reconnect_failed.send(Arc::new(ReconnectFailed));
            }
        });
        if let Some(old) = self.reconnect_timer.lock().unwrap().replace(timer) {
            old.abort();
        }
    }

    /// External connectivity-loss signal (e.g. a platform network
    /// monitor). The same path handles transport-detected loss.
    pub async fn notify_connectivity_lost(self: &Arc<Self>) {
        self.begin_reconnect().await;
    }

    /// Connectivity returned. Attempts one fresh connect-and-login cycle
    /// if the reconnection window is still open; reattachment events
    /// from the gateway then restore each dropped call.
    pub async fn notify_connectivity_restored(self: &Arc<Self>) -> Result<(), ClientError> {
        if !self.reconnecting.load(Ordering::SeqCst) {
            debug!(target: "Client", "Connectivity restored outside a reconnection window");
            return Ok(());
        }
        match self.connect_and_login().await {
            Ok(()) => {
                if let Some(timer) = self.reconnect_timer.lock().unwrap().take() {
                    timer.abort();
                }
                self.reconnecting.store(false, Ordering::SeqCst);
                info!(target: "Client", "Reconnected, awaiting gateway reattachment events");
                self.replay_pending_invite().await;
                Ok(())
            }
            Err(e) => {
                warn!(target: "Client", "Reconnection attempt failed: {e}");
                Err(e)
            }
        }
    }

    /// A network-kind transition without a reported loss (e.g. a radio
    /// handoff) silently breaks the media path, so it is treated as a
    /// brief loss-then-recovery.
    pub async fn notify_network_changed(self: &Arc<Self>, kind: NetworkKind) -> Result<(), ClientError> {
        let changed = {
            let mut current = self.network_kind.lock().unwrap();
            let changed = *current != kind;
            *current = kind;
            changed
        };
        if !changed || self.reconnecting.load(Ordering::SeqCst) {
            return Ok(());
        }
        info!(target: "Client", "Network changed to {kind:?}, simulating loss then recovery");
        self.begin_reconnect().await;
        self.notify_connectivity_restored().await
    }

    pub fn get_call(&self, call_id: &str) -> Option<Arc<Call>> {
        self.calls.lock().unwrap().get(call_id).cloned()
    }

    /// Legacy single-call accessor: the first registry entry, in
    /// insertion order, whose state is live.
    pub fn current_call(&self) -> Option<Arc<Call>> {
        self.calls
            .lock()
            .unwrap()
            .values()
            .find(|c| c.state().is_live())
            .cloned()
    }

    pub fn get_active_calls(&self) -> Vec<Arc<Call>> {
        self.calls
            .lock()
            .unwrap()
            .values()
            .filter(|c| c.state().is_live())
            .cloned()
            .collect()
    }

    pub fn has_active_calls(&self) -> bool {
        !self.get_active_calls().is_empty()
    }

    /// Explicit application-level removal; ending a call never removes
    /// its registry entry by itself.
    pub fn remove_call(&self, call_id: &str) -> Option<Arc<Call>> {
        self.calls.lock().unwrap().shift_remove(call_id)
    }

    pub fn cleanup_ended_calls(&self) {
        self.calls.lock().unwrap().retain(|_, c| c.state().is_live());
    }

    /// Queues an answer for a call that may not exist yet. Applied once
    /// to the next materialized inbound call; a newer queued answer
    /// replaces an older one. The optional correlation (e.g. a push id)
    /// is bound onto that call at construction.
    pub fn queue_answer(&self, headers: Vec<CustomHeader>, correlation: Option<String>) {
        let mut pending = self.pending_answer.lock().unwrap();
        if pending.is_some() {
            warn!(target: "Client", "Replacing a previously queued answer");
        }
        *pending = Some(PendingAction {
            headers,
            correlation,
        });
    }

    /// Queues an end/decline. Outranks a queued answer when both are set.
    pub fn queue_end(&self, headers: Vec<CustomHeader>) {
        let mut pending = self.pending_end.lock().unwrap();
        if pending.is_some() {
            warn!(target: "Client", "Replacing a previously queued end");
        }
        *pending = Some(PendingAction {
            headers,
            correlation: None,
        });
    }

    /// Originates an outbound call: media offer, candidate gathering,
    /// then a `call-invite` round-trip. The registry entry exists once
    /// the gateway accepted the invite; ringing and answer events drive
    /// it from there.
    pub async fn new_call(
        self: &Arc<Self>,
        destination: impl Into<String>,
        headers: Option<Vec<CustomHeader>>,
    ) -> Result<Arc<Call>, ClientError> {
        let ctx = self.call_context().ok_or(ClientError::NotConnected)?;
        let media = self.media_factory.create_session().await?;
        let offer = media.create_offer().await?;
        media.wait_for_ice_gathering_complete().await?;
        let sdp = media.local_description().await.unwrap_or(offer);

        let call = Call::new_outbound(ctx, destination.into(), headers.unwrap_or_default());
        call.attach_media(media);

        let params = call.invite_params(Some(sdp));
        let request = WireMessage::request(self.channel.next_id(), SignalMethod::Invite, &params)?;
        let reply = self
            .channel
            .send_and_wait(request, Some(self.config.reply_deadline))
            .await?;
        reply.parse_result::<serde_json::Value>()?;

        self.calls
            .lock()
            .unwrap()
            .insert(call.call_id().to_string(), call.clone());
        // A media event that outran the invite ack is waiting in the
        // buffer; consume it now.
        let buffered = self.pending_media.lock().unwrap().remove(call.call_id());
        if let Some(buffered) = buffered {
            if let Some(sdp) = &buffered.sdp {
                call.handle_early_media(sdp).await;
            }
            if buffered.audio.is_some() || buffered.video.is_some() {
                call.handle_media_update(&buffered).await;
            }
        }
        Ok(call)
    }

    /// Queries the gateway's registration state.
    pub async fn gateway_state(&self) -> Result<GatewayStateResult, ClientError> {
        let request = WireMessage::request(
            self.channel.next_id(),
            SignalMethod::GatewayState,
            &serde_json::json!({}),
        )?;
        let reply = self
            .channel
            .send_and_wait(request, Some(self.config.reply_deadline))
            .await?;
        Ok(reply.parse_result()?)
    }
}
