//! Wire types for the phone backend's REST API and the call stream socket.
//!
//! The backend speaks camelCase on request/response bodies (`accessToken`,
//! `phoneNumber`, `callSid`) but returns `User.call_credits` in snake_case;
//! the serde attributes below pin that shape exactly.

use serde::{Deserialize, Serialize};

use crate::domain::{CallSid, User, UserId};

/// Body for `POST /phone/login` and `POST /phone/register`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsRequest {
    pub email: String,
    pub password: String,
}

/// Response to a successful login or registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub access_token: String,
    pub user: User,
}

/// Response to `POST /phone/verify` with a bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub user: User,
}

/// Body for `POST /phone/call`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceCallRequest {
    pub phone_number: String,
    pub user_id: UserId,
}

/// Response to `POST /phone/call`: `call_sid` on success, `error` on
/// rejection. The backend sets exactly one of the two.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceCallResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_sid: Option<CallSid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Body for `POST /phone/hangup`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HangupRequest {
    pub call_sid: CallSid,
}

/// Body for `POST /phone/checkout`. `amount` is the package price in whole
/// dollars.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutRequest {
    pub amount: u32,
}

/// Response to `POST /phone/checkout`: the provider's redirect URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutResponse {
    pub url: String,
}

/// Control frames the client sends on the call stream socket. Outbound
/// audio is not part of this client; the socket carries these as JSON text
/// messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum StreamCommand {
    Dtmf { digit: char },
    Mute { muted: bool },
}

/// Control frames the backend sends on the call stream socket. Binary
/// socket messages carry inbound audio and bypass this enum.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum StreamEvent {
    Disconnected {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Failed {
        error: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_response_uses_camel_case_token_and_snake_case_credits() {
        let parsed: AuthResponse = serde_json::from_str(
            r#"{"accessToken":"tok-1","user":{"id":7,"email":"a@b.c","call_credits":120}}"#,
        )
        .expect("parse");
        assert_eq!(parsed.access_token, "tok-1");
        assert_eq!(parsed.user.call_credits, 120);
    }

    #[test]
    fn place_call_request_serializes_backend_field_names() {
        let body = serde_json::to_value(PlaceCallRequest {
            phone_number: "+15551234".into(),
            user_id: UserId(7),
        })
        .expect("serialize");
        assert_eq!(body["phoneNumber"], "+15551234");
        assert_eq!(body["userId"], 7);
    }

    #[test]
    fn place_call_response_accepts_either_sid_or_error() {
        let ok: PlaceCallResponse =
            serde_json::from_str(r#"{"callSid":"CA123"}"#).expect("parse ok");
        assert_eq!(ok.call_sid, Some(CallSid("CA123".into())));
        assert_eq!(ok.error, None);

        let rejected: PlaceCallResponse =
            serde_json::from_str(r#"{"error":"Insufficient credits"}"#).expect("parse rejection");
        assert_eq!(rejected.call_sid, None);
        assert_eq!(rejected.error.as_deref(), Some("Insufficient credits"));
    }

    #[test]
    fn stream_frames_round_trip_tagged_payloads() {
        let json = serde_json::to_string(&StreamCommand::Dtmf { digit: '7' }).expect("serialize");
        assert_eq!(json, r#"{"type":"dtmf","payload":{"digit":"7"}}"#);

        let event: StreamEvent = serde_json::from_str(
            r#"{"type":"disconnected","payload":{"reason":"remote hangup"}}"#,
        )
        .expect("parse");
        assert_eq!(
            event,
            StreamEvent::Disconnected {
                reason: Some("remote hangup".into())
            }
        );
    }
}
