use std::{sync::Arc, time::Duration};

use call_transport::{
    AudioSink, CallLink, CallTransport, CallTransportEvent, DialRequest, NullAudioSink,
    TransportError,
};
use chrono::{DateTime, Utc};
use shared::domain::{
    is_pad_digit, CallSid, CountryCode, DEFAULT_COUNTRY_CODE, MAX_DESTINATION_DIGITS,
    MIN_CALL_CREDITS,
};
use thiserror::Error;
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

mod auth;
mod billing;
mod token_store;

pub use auth::{AuthClient, AuthError, SessionProvider};
pub use billing::{BillingClient, BillingError, CreditPackage, CREDIT_PACKAGES};
pub use token_store::{TokenStore, TokenStoreError};

const EVENT_CHANNEL_CAPACITY: usize = 1024;
const DURATION_TICK_INTERVAL: Duration = Duration::from_secs(1);
/// The two output levels the handset knows: earpiece and speaker.
const SPEAKER_ON_GAIN: f32 = 1.0;
const SPEAKER_OFF_GAIN: f32 = 0.5;

/// Lifecycle of the single call session a controller manages. `Ended` is
/// transient: it is observable in the `CallEnded` snapshot and the state
/// settles back to `Idle` immediately after.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    Idle,
    Dialing,
    Connected,
    Ended,
}

/// Why a call stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    LocalHangup,
    RemoteHangup { reason: Option<String> },
    Failed(CallError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    #[error("not signed in")]
    Unauthenticated,
    #[error("balance of {balance} credits is below the minimum of {minimum}")]
    InsufficientCredits { balance: i64, minimum: i64 },
    #[error("call transport is not ready")]
    TransportNotReady,
    #[error("no destination dialed")]
    NoDestination,
    #[error("a call is already in progress")]
    CallInProgress,
    #[error("call rejected: {reason}")]
    Rejected { reason: String },
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("network failure: {0}")]
    Network(String),
}

fn map_transport_error(err: TransportError, balance: i64) -> CallError {
    match err {
        TransportError::NotReady => CallError::TransportNotReady,
        TransportError::InsufficientCredits => CallError::InsufficientCredits {
            balance,
            minimum: MIN_CALL_CREDITS,
        },
        TransportError::Rejected { reason } => CallError::Rejected { reason },
        TransportError::Network(message) => CallError::Network(message),
        TransportError::Other(message) => CallError::Transport(message),
    }
}

/// Immutable view of the session for rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSnapshot {
    pub status: CallStatus,
    pub country_code: CountryCode,
    pub digits: String,
    pub call_sid: Option<CallSid>,
    pub connected_at: Option<DateTime<Utc>>,
    pub elapsed_secs: u64,
    pub muted: bool,
    pub speaker_on: bool,
}

impl CallSnapshot {
    /// Country prefix plus dialed digits, as sent to the backend.
    pub fn destination(&self) -> String {
        format!("{}{}", self.country_code.prefix, self.digits)
    }
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged(CallSnapshot),
    DurationTick(u64),
    /// A transport failure after `place_call` already returned.
    CallFailed(CallError),
    CallEnded {
        reason: EndReason,
        snapshot: CallSnapshot,
    },
}

struct ActiveCall {
    link: Arc<dyn CallLink>,
    event_task: JoinHandle<()>,
    tick_task: Option<JoinHandle<()>>,
}

struct SessionState {
    status: CallStatus,
    country_code: CountryCode,
    digits: String,
    call_sid: Option<CallSid>,
    connected_at: Option<DateTime<Utc>>,
    elapsed_secs: u64,
    muted: bool,
    speaker_on: bool,
    /// Monotonic dial-attempt counter. Every transport callback carries the
    /// attempt it was spawned for; stale callbacks are dropped.
    attempt: u64,
    /// Balance observed at the last dial, for backend credit rejections.
    last_balance: i64,
    active: Option<ActiveCall>,
}

fn snapshot_of(state: &SessionState) -> CallSnapshot {
    CallSnapshot {
        status: state.status,
        country_code: state.country_code,
        digits: state.digits.clone(),
        call_sid: state.call_sid.clone(),
        connected_at: state.connected_at,
        elapsed_secs: state.elapsed_secs,
        muted: state.muted,
        speaker_on: state.speaker_on,
    }
}

/// Move the session through the transient `Ended` state back to `Idle`,
/// broadcasting both. Returns the released call so the caller can abort its
/// tasks and hang the link up outside the lock. `call_sid` and
/// `connected_at` are cleared together, never one without the other.
fn finish_call(
    state: &mut SessionState,
    reason: EndReason,
    events: &broadcast::Sender<SessionEvent>,
) -> Option<ActiveCall> {
    let active = state.active.take();
    state.status = CallStatus::Ended;
    state.call_sid = None;
    state.connected_at = None;
    let _ = events.send(SessionEvent::CallEnded {
        reason,
        snapshot: snapshot_of(state),
    });

    state.status = CallStatus::Idle;
    state.elapsed_secs = 0;
    state.muted = false;
    state.speaker_on = false;
    let _ = events.send(SessionEvent::StateChanged(snapshot_of(state)));
    active
}

/// Client-side call-session state machine: the dial buffer, the transition
/// table over `Idle/Dialing/Connected/Ended`, the duration clock, and the
/// lifecycle of one transport link at a time. All transitions serialize
/// through one async mutex; user input, transport callbacks, and timer
/// ticks are each a discrete event against that lock.
pub struct CallController {
    session: Arc<dyn SessionProvider>,
    transport: Arc<dyn CallTransport>,
    sink: Arc<dyn AudioSink>,
    inner: Mutex<SessionState>,
    events: broadcast::Sender<SessionEvent>,
}

impl CallController {
    pub fn new(session: Arc<dyn SessionProvider>, transport: Arc<dyn CallTransport>) -> Arc<Self> {
        Self::with_audio_sink(session, transport, Arc::new(NullAudioSink))
    }

    pub fn with_audio_sink(
        session: Arc<dyn SessionProvider>,
        transport: Arc<dyn CallTransport>,
        sink: Arc<dyn AudioSink>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            session,
            transport,
            sink,
            inner: Mutex::new(SessionState {
                status: CallStatus::Idle,
                country_code: DEFAULT_COUNTRY_CODE,
                digits: String::new(),
                call_sid: None,
                connected_at: None,
                elapsed_secs: 0,
                muted: false,
                speaker_on: false,
                attempt: 0,
                last_balance: 0,
                active: None,
            }),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub async fn snapshot(&self) -> CallSnapshot {
        snapshot_of(&*self.inner.lock().await)
    }

    /// Dial-pad tap. While `Idle` the digit is appended to the destination
    /// buffer (capped at 15); while `Connected` it is forwarded as a DTMF
    /// tone and the buffer is untouched. Non-pad characters and taps during
    /// `Dialing` are ignored.
    pub async fn press_digit(&self, digit: char) {
        if !is_pad_digit(digit) {
            return;
        }
        let (changed, tone_link) = {
            let mut state = self.inner.lock().await;
            match state.status {
                CallStatus::Idle => {
                    if state.digits.len() >= MAX_DESTINATION_DIGITS {
                        return;
                    }
                    state.digits.push(digit);
                    (Some(snapshot_of(&state)), None)
                }
                CallStatus::Connected => {
                    let link = state.active.as_ref().map(|active| Arc::clone(&active.link));
                    (None, link)
                }
                CallStatus::Dialing | CallStatus::Ended => (None, None),
            }
        };
        if let Some(snapshot) = changed {
            let _ = self.events.send(SessionEvent::StateChanged(snapshot));
        }
        if let Some(link) = tone_link {
            if let Err(err) = link.send_tone(digit).await {
                warn!("call: dtmf send failed digit={digit}: {err}");
            }
        }
    }

    pub async fn delete_digit(&self) {
        let snapshot = {
            let mut state = self.inner.lock().await;
            if state.status != CallStatus::Idle || state.digits.pop().is_none() {
                return;
            }
            snapshot_of(&state)
        };
        let _ = self.events.send(SessionEvent::StateChanged(snapshot));
    }

    /// Only meaningful while `Idle`; the destination is immutable once a
    /// call is underway.
    pub async fn set_country_code(&self, country: CountryCode) {
        let snapshot = {
            let mut state = self.inner.lock().await;
            if state.status != CallStatus::Idle || state.country_code == country {
                return;
            }
            state.country_code = country;
            snapshot_of(&state)
        };
        let _ = self.events.send(SessionEvent::StateChanged(snapshot));
    }

    /// Start a call to the dialed destination. Guards run in order: a
    /// destination must be dialed, a user signed in, the balance at least
    /// `MIN_CALL_CREDITS`, and the transport ready; guard failures return
    /// the typed error with no state change. Past the guards the session
    /// enters `Dialing` and the transport connect runs with the state lock
    /// released, so a hangup can cancel it; the attempt counter decides who
    /// wins that race.
    pub async fn place_call(self: &Arc<Self>) -> Result<(), CallError> {
        let user = self.session.current_user().await;

        let (request, attempt) = {
            let mut state = self.inner.lock().await;
            if state.status != CallStatus::Idle {
                return Err(CallError::CallInProgress);
            }
            if state.digits.is_empty() {
                return Err(CallError::NoDestination);
            }
            let user = user.ok_or(CallError::Unauthenticated)?;
            if user.call_credits < MIN_CALL_CREDITS {
                return Err(CallError::InsufficientCredits {
                    balance: user.call_credits,
                    minimum: MIN_CALL_CREDITS,
                });
            }
            if !self.transport.is_ready() {
                return Err(CallError::TransportNotReady);
            }

            state.status = CallStatus::Dialing;
            state.call_sid = None;
            state.connected_at = None;
            state.elapsed_secs = 0;
            state.attempt += 1;
            state.last_balance = user.call_credits;
            let request = DialRequest {
                destination: format!("{}{}", state.country_code.prefix, state.digits),
                user_id: user.id,
            };
            let _ = self
                .events
                .send(SessionEvent::StateChanged(snapshot_of(&state)));
            (request, state.attempt)
        };

        info!(
            "call: placing destination={} attempt={attempt}",
            request.destination
        );
        match self.transport.connect(request).await {
            Ok(link) => {
                self.install_link(attempt, link).await;
                Ok(())
            }
            Err(err) => {
                let failure = {
                    let mut state = self.inner.lock().await;
                    if state.attempt != attempt || state.status != CallStatus::Dialing {
                        // A hangup already ended this attempt.
                        return Ok(());
                    }
                    let failure = map_transport_error(err, state.last_balance);
                    finish_call(&mut state, EndReason::Failed(failure.clone()), &self.events);
                    failure
                };
                warn!("call: attempt {attempt} failed: {failure}");
                Err(failure)
            }
        }
    }

    /// End the current call, or cancel the in-flight attempt while still
    /// `Dialing`. A no-op while `Idle`; safe to call repeatedly.
    pub async fn hang_up(&self) {
        let active = {
            let mut state = self.inner.lock().await;
            if state.status == CallStatus::Idle {
                return;
            }
            info!("call: local hangup attempt={}", state.attempt);
            finish_call(&mut state, EndReason::LocalHangup, &self.events)
        };
        self.release_active(active, true).await;
    }

    /// Component-teardown path: ends any active call and releases its
    /// subscription and timer.
    pub async fn shutdown(&self) {
        self.hang_up().await;
    }

    pub async fn toggle_mute(&self) {
        let (snapshot, link, muted) = {
            let mut state = self.inner.lock().await;
            if state.status != CallStatus::Connected {
                return;
            }
            state.muted = !state.muted;
            let link = state.active.as_ref().map(|active| Arc::clone(&active.link));
            (snapshot_of(&state), link, state.muted)
        };
        let _ = self.events.send(SessionEvent::StateChanged(snapshot));
        if let Some(link) = link {
            if let Err(err) = link.set_muted(muted).await {
                warn!("call: mute update failed: {err}");
            }
        }
    }

    /// Switch the local sink between the two output levels.
    pub async fn toggle_speaker(&self) {
        let (snapshot, speaker_on) = {
            let mut state = self.inner.lock().await;
            if state.status != CallStatus::Connected {
                return;
            }
            state.speaker_on = !state.speaker_on;
            (snapshot_of(&state), state.speaker_on)
        };
        self.sink.set_gain(if speaker_on {
            SPEAKER_ON_GAIN
        } else {
            SPEAKER_OFF_GAIN
        });
        let _ = self.events.send(SessionEvent::StateChanged(snapshot));
    }

    /// Adopt a freshly connected link, unless a hangup (or a newer attempt)
    /// won the race while the connect was in flight; the loser is hung up
    /// so no backend call leaks.
    async fn install_link(self: &Arc<Self>, attempt: u64, link: Arc<dyn CallLink>) {
        let events_rx = link.subscribe_events();
        let superseded = {
            let mut state = self.inner.lock().await;
            if state.attempt != attempt || state.status != CallStatus::Dialing {
                true
            } else {
                let event_task = self.spawn_link_events(attempt, events_rx);
                state.active = Some(ActiveCall {
                    link: Arc::clone(&link),
                    event_task,
                    tick_task: None,
                });
                false
            }
        };
        if superseded {
            debug!("call: attempt {attempt} superseded, releasing link");
            if let Err(err) = link.hang_up().await {
                warn!("call: hangup of superseded attempt failed: {err}");
            }
        }
    }

    fn spawn_link_events(
        self: &Arc<Self>,
        attempt: u64,
        mut events: broadcast::Receiver<CallTransportEvent>,
    ) -> JoinHandle<()> {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                controller.handle_transport_event(attempt, event).await;
            }
        })
    }

    async fn handle_transport_event(self: &Arc<Self>, attempt: u64, event: CallTransportEvent) {
        match event {
            CallTransportEvent::Accepted { call_sid } => {
                let snapshot = {
                    let mut state = self.inner.lock().await;
                    if state.attempt != attempt || state.status != CallStatus::Dialing {
                        debug!("call: dropping stale acceptance for attempt {attempt}");
                        return;
                    }
                    // The session identifier and the start timestamp are set
                    // together, as they are cleared.
                    state.status = CallStatus::Connected;
                    state.call_sid = Some(call_sid);
                    state.connected_at = Some(Utc::now());
                    state.elapsed_secs = 0;
                    if let Some(active) = state.active.as_mut() {
                        active.tick_task = Some(self.spawn_duration_ticks(attempt));
                    }
                    snapshot_of(&state)
                };
                if let Some(call_sid) = &snapshot.call_sid {
                    info!("call: connected sid={call_sid}");
                }
                let _ = self.events.send(SessionEvent::StateChanged(snapshot));
            }
            CallTransportEvent::Disconnected { reason } => {
                let active = {
                    let mut state = self.inner.lock().await;
                    if state.attempt != attempt || state.status == CallStatus::Idle {
                        return;
                    }
                    info!("call: remote end attempt={attempt} reason={reason:?}");
                    finish_call(&mut state, EndReason::RemoteHangup { reason }, &self.events)
                };
                // The far side already tore the call down; no hangup request.
                self.release_active(active, false).await;
            }
            CallTransportEvent::Failed { error } => {
                let (failure, active) = {
                    let mut state = self.inner.lock().await;
                    if state.attempt != attempt || state.status == CallStatus::Idle {
                        return;
                    }
                    let failure = map_transport_error(error, state.last_balance);
                    let _ = self.events.send(SessionEvent::CallFailed(failure.clone()));
                    let active =
                        finish_call(&mut state, EndReason::Failed(failure.clone()), &self.events);
                    (failure, active)
                };
                warn!("call: attempt {attempt} failed mid-call: {failure}");
                self.release_active(active, true).await;
            }
        }
    }

    fn spawn_duration_ticks(self: &Arc<Self>, attempt: u64) -> JoinHandle<()> {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(DURATION_TICK_INTERVAL);
            // The first tick of an interval completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if !controller.advance_call_clock(attempt).await {
                    break;
                }
            }
        })
    }

    async fn advance_call_clock(&self, attempt: u64) -> bool {
        let elapsed = {
            let mut state = self.inner.lock().await;
            if state.attempt != attempt || state.status != CallStatus::Connected {
                return false;
            }
            state.elapsed_secs += 1;
            state.elapsed_secs
        };
        let _ = self.events.send(SessionEvent::DurationTick(elapsed));
        true
    }

    async fn release_active(&self, active: Option<ActiveCall>, hang_up: bool) {
        let Some(active) = active else { return };
        if let Some(tick) = active.tick_task {
            tick.abort();
        }
        if hang_up {
            if let Err(err) = active.link.hang_up().await {
                warn!("call: hangup request failed: {err}");
            }
        }
        // Park the sink back at the fresh-call levels the reset flags claim.
        self.sink.set_muted(false);
        self.sink.set_gain(SPEAKER_OFF_GAIN);
        // On a mid-call failure this runs on the event-pump task itself and
        // the abort lands at its next await; the hangup round-trip has to
        // finish first. Late events are dropped by the attempt and status
        // guards either way.
        active.event_task.abort();
    }
}

/// Elapsed-call display, `MM:SS`.
pub fn format_duration(total_secs: u64) -> String {
    format!("{:02}:{:02}", total_secs / 60, total_secs % 60)
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
