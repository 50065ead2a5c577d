//! The per-call session object: owns the media-session handle and the
//! signaling operations that drive the state machine.

use super::error::CallError;
use super::generate_call_id;
use super::state::{CallState, CallTransition, InvalidTransition};
use crate::channel::SignalChannel;
use crate::media::{MediaKind, MediaSession, SdpKind};
use crate::types::call::CallDirection;
use crate::types::events::{CallStateChanged, EventBus};
use crate::wire::{
    AnswerParams, ByeParams, CustomHeader, DialogParams, HoldState, InviteParams,
    MediaEventParams, ModifyParams, ModifyResult, SignalMethod, StreamTarget, WireMessage,
};
use log::{debug, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Channel, event bus and session identity shared with every call the
/// orchestrator materializes.
#[derive(Clone)]
pub(crate) struct CallContext {
    pub channel: Arc<SignalChannel>,
    pub bus: Arc<EventBus>,
    pub session_id: String,
    pub reply_deadline: Duration,
}

pub struct Call {
    call_id: String,
    direction: CallDirection,
    session_id: String,
    local_leg: String,
    remote_leg: Mutex<Option<String>>,
    caller_name: Option<String>,
    remote_number: Option<String>,
    invite_headers: Vec<CustomHeader>,
    answer_headers: Mutex<Vec<CustomHeader>>,
    /// Out-of-band correlation (e.g. a push-notification id), bound
    /// exactly once at construction.
    push_correlation: Option<String>,
    state: Mutex<CallState>,
    media: Mutex<Option<Arc<dyn MediaSession>>>,
    was_answered: AtomicBool,
    channel: Arc<SignalChannel>,
    bus: Arc<EventBus>,
    reply_deadline: Duration,
}

impl Call {
    /// Builds a call from an inbound invite (or a replayed one during
    /// reattachment, in which case it starts in the recovered state
    /// instead of ringing). The invite's headers and any push
    /// correlation are absorbed here and never overwritten later.
    pub(crate) fn new_inbound(
        ctx: CallContext,
        invite: &InviteParams,
        push_correlation: Option<String>,
        recovered: bool,
    ) -> Arc<Self> {
        let state = if recovered {
            CallState::Connecting {
                since: chrono::Utc::now(),
            }
        } else {
            CallState::Ringing {
                since: chrono::Utc::now(),
            }
        };
        // Leg identifiers on the wire are named from the sender's
        // perspective: the gateway's local leg is our remote one.
        Arc::new(Self {
            call_id: invite.dialog_params.call_id.clone(),
            direction: CallDirection::Inbound,
            session_id: ctx.session_id,
            local_leg: generate_call_id(),
            remote_leg: Mutex::new(invite.dialog_params.local_leg.clone()),
            caller_name: invite.caller_name.clone(),
            remote_number: invite.caller_number.clone(),
            invite_headers: invite.dialog_params.custom_headers.clone(),
            answer_headers: Mutex::new(Vec::new()),
            push_correlation,
            state: Mutex::new(state),
            media: Mutex::new(None),
            was_answered: AtomicBool::new(recovered),
            channel: ctx.channel,
            bus: ctx.bus,
            reply_deadline: ctx.reply_deadline,
        })
    }

    /// Builds a locally originated call. The orchestrator sends the
    /// invite; subsequent ringing/answer events drive the state.
    pub(crate) fn new_outbound(
        ctx: CallContext,
        destination: String,
        headers: Vec<CustomHeader>,
    ) -> Arc<Self> {
        Arc::new(Self {
            call_id: generate_call_id(),
            direction: CallDirection::Outbound,
            session_id: ctx.session_id,
            local_leg: generate_call_id(),
            remote_leg: Mutex::new(None),
            caller_name: None,
            remote_number: Some(destination),
            invite_headers: headers,
            answer_headers: Mutex::new(Vec::new()),
            push_correlation: None,
            state: Mutex::new(CallState::New),
            media: Mutex::new(None),
            was_answered: AtomicBool::new(false),
            channel: ctx.channel,
            bus: ctx.bus,
            reply_deadline: ctx.reply_deadline,
        })
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn direction(&self) -> CallDirection {
        self.direction
    }

    pub fn state(&self) -> CallState {
        self.state.lock().unwrap().clone()
    }

    pub fn caller_name(&self) -> Option<&str> {
        self.caller_name.as_deref()
    }

    pub fn remote_number(&self) -> Option<&str> {
        self.remote_number.as_deref()
    }

    pub fn invite_headers(&self) -> &[CustomHeader] {
        &self.invite_headers
    }

    pub fn answer_headers(&self) -> Vec<CustomHeader> {
        self.answer_headers.lock().unwrap().clone()
    }

    pub fn push_correlation(&self) -> Option<&str> {
        self.push_correlation.as_deref()
    }

    pub(crate) fn was_answered(&self) -> bool {
        self.was_answered.load(Ordering::SeqCst)
    }

    pub(crate) fn attach_media(&self, session: Arc<dyn MediaSession>) {
        *self.media.lock().unwrap() = Some(session);
    }

    pub fn media_session(&self) -> Option<Arc<dyn MediaSession>> {
        self.media.lock().unwrap().clone()
    }

    fn media_handle(&self) -> Result<Arc<dyn MediaSession>, CallError> {
        self.media_session().ok_or(CallError::NoMediaSession)
    }

    async fn release_media(&self) {
        let media = self.media.lock().unwrap().take();
        if let Some(m) = media {
            m.close().await;
        }
    }

    fn dialog_params(&self, custom_headers: Vec<CustomHeader>) -> DialogParams {
        DialogParams {
            call_id: self.call_id.clone(),
            local_leg: Some(self.local_leg.clone()),
            remote_leg: self.remote_leg.lock().unwrap().clone(),
            custom_headers,
        }
    }

    /// Invite payload for a locally originated call.
    pub(crate) fn invite_params(&self, sdp: Option<String>) -> InviteParams {
        InviteParams {
            dialog_params: self.dialog_params(self.invite_headers.clone()),
            sdp,
            caller_name: None,
            caller_number: None,
            callee: self.remote_number.clone(),
        }
    }

    pub(crate) fn note_remote_leg(&self, leg: Option<&str>) {
        if let Some(leg) = leg {
            let mut remote = self.remote_leg.lock().unwrap();
            if remote.is_none() {
                *remote = Some(leg.to_string());
            }
        }
    }

    fn transition(&self, transition: CallTransition) -> Result<(), InvalidTransition> {
        let (previous, state) = {
            let mut guard = self.state.lock().unwrap();
            let next = guard.apply(transition)?;
            let previous = std::mem::replace(&mut *guard, next.clone());
            (previous, next)
        };
        let _ = self.bus.call_state.send(Arc::new(CallStateChanged {
            call_id: self.call_id.clone(),
            previous,
            state,
        }));
        Ok(())
    }

    /// Answers the call: attach local media, produce an answer
    /// description, wait out candidate gathering, then send the answer
    /// request and await the gateway's acknowledgment.
    ///
    /// A failing step leaves the call in `Connecting`; the caller
    /// retries or hangs up, there is no rollback to ringing. If the call
    /// was torn down while this was suspended, the late completion is
    /// not forced onto the new state.
    pub async fn answer(&self, headers: Option<Vec<CustomHeader>>) -> Result<(), CallError> {
        let media = self.media_handle()?;

        match self.transition(CallTransition::AnswerStarted) {
            Ok(()) => {}
            // A retry after a failed attempt starts from Connecting.
            Err(_) if matches!(self.state(), CallState::Connecting { .. }) => {}
            Err(e) => return Err(e.into()),
        }

        let created = media.create_answer().await?;
        media.wait_for_ice_gathering_complete().await?;
        let sdp = media.local_description().await.unwrap_or(created);

        let headers = headers.unwrap_or_default();
        let params = AnswerParams {
            session_id: self.session_id.clone(),
            dialog_params: self.dialog_params(headers.clone()),
            sdp: Some(sdp),
        };
        let request =
            WireMessage::request(self.channel.next_id(), SignalMethod::Answer, &params)?;
        let reply = self
            .channel
            .send_and_wait(request, Some(self.reply_deadline))
            .await?;
        reply.parse_result::<serde_json::Value>()?;

        *self.answer_headers.lock().unwrap() = headers;
        self.was_answered.store(true, Ordering::SeqCst);
        if let Err(e) = self.transition(CallTransition::AnswerCompleted) {
            warn!(target: "Call", "Answer for {} completed late: {e}", self.call_id);
        }
        Ok(())
    }

    /// Best-effort termination: the bye is fire-and-forget, the media
    /// handle is released and the call ends locally regardless of
    /// network state. Idempotent with respect to state.
    pub async fn hangup(&self, headers: Option<Vec<CustomHeader>>) {
        let params = ByeParams {
            session_id: self.session_id.clone(),
            dialog_params: self.dialog_params(headers.unwrap_or_default()),
        };
        match WireMessage::request(self.channel.next_id(), SignalMethod::Bye, &params) {
            Ok(request) => self.channel.send(request).await,
            Err(e) => warn!(target: "Call", "Could not build bye for {}: {e}", self.call_id),
        }
        self.release_media().await;
        if !self.state().is_ended() {
            let _ = self.transition(CallTransition::Terminated);
        }
    }

    pub async fn hold(&self) -> Result<(), CallError> {
        self.modify(HoldState::Hold, CallTransition::HoldConfirmed)
            .await
    }

    pub async fn unhold(&self) -> Result<(), CallError> {
        self.modify(HoldState::Active, CallTransition::UnholdConfirmed)
            .await
    }

    /// Sends a modify request and transitions only on a confirmation
    /// whose reported hold state matches what was asked for.
    async fn modify(
        &self,
        requested: HoldState,
        confirmed: CallTransition,
    ) -> Result<(), CallError> {
        // Validate before the round-trip so an impossible request fails
        // without touching the gateway.
        self.state.lock().unwrap().apply(confirmed)?;

        let params = ModifyParams {
            session_id: self.session_id.clone(),
            dialog_params: self.dialog_params(Vec::new()),
            hold: requested,
        };
        let request =
            WireMessage::request(self.channel.next_id(), SignalMethod::Modify, &params)?;
        let reply = self
            .channel
            .send_and_wait(request, Some(self.reply_deadline))
            .await?;
        let result: ModifyResult = reply.parse_result()?;
        if result.hold != requested {
            return Err(CallError::HoldStateMismatch {
                expected: requested,
                got: result.hold,
            });
        }
        self.transition(confirmed)?;
        Ok(())
    }

    /// Applies a description that arrived before the definitive answer.
    /// Outbound calls receive it as the answer to their own offer;
    /// inbound calls receive it as an offer. Never changes call state;
    /// failures are logged because early media is best-effort.
    pub async fn handle_early_media(&self, sdp: &str) {
        let kind = match self.direction {
            CallDirection::Outbound => SdpKind::Answer,
            CallDirection::Inbound => SdpKind::Offer,
        };
        let media = match self.media_session() {
            Some(m) => m,
            None => {
                warn!(target: "Call", "Early media for {} with no media session", self.call_id);
                return;
            }
        };
        if let Err(e) = media.set_remote_description(kind, sdp).await {
            warn!(target: "Call", "Early media for {} not applied: {e}", self.call_id);
        }
    }

    /// The definitive answer event for an outbound call. A description
    /// carried on it is applied as the answer; when it carries none the
    /// one already set by an earlier media event stands.
    pub(crate) async fn handle_remote_answer(&self, sdp: Option<&str>) {
        if self.state().is_ringing()
            && let Err(e) = self.transition(CallTransition::AnswerStarted)
        {
            debug!(target: "Call", "Answer event for {}: {e}", self.call_id);
        }
        if let Some(sdp) = sdp {
            match self.media_session() {
                Some(media) => {
                    if let Err(e) = media.set_remote_description(SdpKind::Answer, sdp).await {
                        warn!(target: "Call", "Remote answer for {} not applied: {e}", self.call_id);
                    }
                }
                None => {
                    warn!(target: "Call", "Answer event for {} with no media session", self.call_id)
                }
            }
        }
        self.was_answered.store(true, Ordering::SeqCst);
        if let Err(e) = self.transition(CallTransition::AnswerCompleted) {
            debug!(target: "Call", "Answer event for {} in a settled state: {e}", self.call_id);
        }
    }

    /// Outbound progress: the remote side started ringing.
    pub(crate) fn handle_remote_ringing(&self) {
        if let Err(e) = self.transition(CallTransition::RingingReceived) {
            debug!(target: "Call", "Ringing event for {}: {e}", self.call_id);
        }
    }

    /// Toggles the enabled flag on a media stream without touching call
    /// state. Best-effort.
    pub async fn handle_media_update(&self, params: &MediaEventParams) {
        let media = match self.media_session() {
            Some(m) => m,
            None => {
                warn!(target: "Call", "Media update for {} with no media session", self.call_id);
                return;
            }
        };
        let toggles = [
            (MediaKind::Audio, params.audio),
            (MediaKind::Video, params.video),
        ];
        for (kind, enabled) in toggles {
            if let Some(enabled) = enabled
                && let Err(e) = media
                    .set_media_stream_state(params.target, kind, enabled)
                    .await
            {
                warn!(target: "Call", "Stream toggle on {} failed: {e}", self.call_id);
            }
        }
    }

    /// Local mute toggle. Best-effort.
    pub async fn set_audio_enabled(&self, enabled: bool) {
        self.set_local_stream(MediaKind::Audio, enabled).await;
    }

    /// Local camera toggle. Best-effort.
    pub async fn set_video_enabled(&self, enabled: bool) {
        self.set_local_stream(MediaKind::Video, enabled).await;
    }

    async fn set_local_stream(&self, kind: MediaKind, enabled: bool) {
        let media = match self.media_session() {
            Some(m) => m,
            None => return,
        };
        if let Err(e) = media
            .set_media_stream_state(StreamTarget::Local, kind, enabled)
            .await
        {
            warn!(target: "Call", "Local {kind:?} toggle on {} failed: {e}", self.call_id);
        }
    }

    /// Remote bye: release media and end locally. No reply beyond the
    /// protocol ack the orchestrator already sent.
    pub(crate) async fn handle_remote_bye(&self) {
        self.release_media().await;
        if !self.state().is_ended() {
            let _ = self.transition(CallTransition::Terminated);
        }
    }

    /// Connectivity loss: the call survives as `Dropped` but its media
    /// handle is useless and gets released; a fresh one is attached on
    /// reattachment.
    pub(crate) async fn drop_for_reconnect(&self) {
        if !self.state().can_drop() {
            return;
        }
        let _ = self.transition(CallTransition::ConnectionLost);
        self.release_media().await;
    }

    /// Reassociates a dropped call with a freshly reconnected session:
    /// new media handle, replayed remote description, back to
    /// `Connecting`. The orchestrator completes the answer flow from
    /// there. Call identity and state history are untouched.
    pub(crate) async fn reattach(
        &self,
        media: Arc<dyn MediaSession>,
        sdp: Option<&str>,
    ) -> Result<(), CallError> {
        self.transition(CallTransition::Reattached)?;
        self.attach_media(media);
        if let Some(sdp) = sdp {
            self.handle_early_media(sdp).await;
        }
        Ok(())
    }
}
