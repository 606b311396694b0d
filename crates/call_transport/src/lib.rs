//! Call transport abstraction: the capability set the call controller needs
//! from whatever carries the call (today a REST + WebSocket relay, earlier
//! revisions a provider-managed device), plus the relay implementation.

use std::sync::Arc;

use async_trait::async_trait;
use shared::domain::{CallSid, UserId};
use thiserror::Error;
use tokio::sync::broadcast;

pub mod relay;

pub use relay::RelayTransport;

/// Everything required to place one outbound call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialRequest {
    /// Full destination: country prefix plus dialed digits.
    pub destination: String,
    pub user_id: UserId,
}

/// Lifecycle events for one call, delivered exactly once each.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallTransportEvent {
    Accepted { call_sid: CallSid },
    Disconnected { reason: Option<String> },
    Failed { error: TransportError },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("transport has not finished its setup")]
    NotReady,
    #[error("call rejected by backend: {reason}")]
    Rejected { reason: String },
    #[error("backend reported insufficient credits")]
    InsufficientCredits,
    #[error("network failure: {0}")]
    Network(String),
    #[error("transport failure: {0}")]
    Other(String),
}

/// One live (or connecting) call on the transport side.
///
/// `subscribe_events` hands the pre-created first receiver to its first
/// caller, so events emitted between `CallTransport::connect` returning and
/// the subscription being taken are never dropped.
#[async_trait]
pub trait CallLink: Send + Sync {
    /// Tear the call down and release backend resources. Idempotent: calls
    /// after the first are no-ops.
    async fn hang_up(&self) -> Result<(), TransportError>;
    /// Forward an in-call DTMF digit. Errors once the stream is closed.
    async fn send_tone(&self, digit: char) -> Result<(), TransportError>;
    async fn set_muted(&self, muted: bool) -> Result<(), TransportError>;
    fn subscribe_events(&self) -> broadcast::Receiver<CallTransportEvent>;
}

#[async_trait]
pub trait CallTransport: Send + Sync {
    /// False until the transport completed its own asynchronous setup (for
    /// the relay: a bearer credential from login).
    fn is_ready(&self) -> bool;
    /// Place a call. On success the returned link eventually emits
    /// `Accepted` or `Failed`; immediate rejections come back as `Err`.
    async fn connect(&self, request: DialRequest) -> Result<Arc<dyn CallLink>, TransportError>;
}

/// Local playback endpoint for inbound audio frames. Decoding and device
/// output are outside this crate; the relay only forwards raw frames.
pub trait AudioSink: Send + Sync {
    fn play_frame(&self, frame: &[u8]);
    fn set_muted(&self, muted: bool);
    fn set_gain(&self, gain: f32);
}

/// Discards every frame. Used headless and in tests.
pub struct NullAudioSink;

impl AudioSink for NullAudioSink {
    fn play_frame(&self, _frame: &[u8]) {}
    fn set_muted(&self, _muted: bool) {}
    fn set_gain(&self, _gain: f32) {}
}

/// Classify a backend rejection message into the typed error the controller
/// reacts to. The backend phrases insufficient-balance rejections a few
/// different ways across revisions.
pub fn classify_rejection(reason: &str) -> TransportError {
    let lower = reason.to_ascii_lowercase();
    if lower.contains("insufficient") || lower.contains("not enough credits") {
        TransportError::InsufficientCredits
    } else {
        TransportError::Rejected {
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_credit_rejections_from_backend_phrasings() {
        assert_eq!(
            classify_rejection("Insufficient credits to start a call."),
            TransportError::InsufficientCredits
        );
        assert_eq!(
            classify_rejection("not enough credits on account"),
            TransportError::InsufficientCredits
        );
        assert_eq!(
            classify_rejection("destination unreachable"),
            TransportError::Rejected {
                reason: "destination unreachable".into()
            }
        );
    }
}
