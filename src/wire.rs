//! JSON wire envelope and the typed params/results it carries.
//!
//! Every frame is one of three shapes sharing a single envelope: a
//! *request* `{id, method, params}`, a *reply* `{id, result}` or
//! `{id, error}`, and a server-initiated *event* that looks exactly like
//! a request but is unsolicited. The `id` is the correlation key; only
//! the side that sent the request matches replies against it.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("message carries no params")]
    MissingParams,
    #[error("reply carries neither result nor error")]
    MissingResult,
    #[error("gateway error {code}: {message}")]
    Gateway { code: i64, message: String },
}

/// Method vocabulary the engine recognizes. Unknown methods still parse
/// as raw [`WireMessage`]s so new gateway events do not break routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalMethod {
    Invite,
    Ringing,
    Answer,
    Bye,
    Modify,
    Media,
    Attach,
    Login,
    GatewayState,
    Ping,
}

impl SignalMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Invite => "call-invite",
            Self::Ringing => "call-ringing",
            Self::Answer => "call-answer",
            Self::Bye => "call-bye",
            Self::Modify => "call-modify",
            Self::Media => "call-media",
            Self::Attach => "call-attach",
            Self::Login => "login",
            Self::GatewayState => "gateway-state-query",
            Self::Ping => "keep-alive-ping",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "call-invite" => Some(Self::Invite),
            "call-ringing" => Some(Self::Ringing),
            "call-answer" => Some(Self::Answer),
            "call-bye" => Some(Self::Bye),
            "call-modify" => Some(Self::Modify),
            "call-media" => Some(Self::Media),
            "call-attach" => Some(Self::Attach),
            "login" => Some(Self::Login),
            "gateway-state-query" => Some(Self::GatewayState),
            "keep-alive-ping" => Some(Self::Ping),
            _ => None,
        }
    }
}

impl fmt::Display for SignalMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The failure half of a reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayError {
    pub code: i64,
    pub message: String,
}

/// One wire frame. Requests and events carry `method` + `params`;
/// replies carry `result` or `error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<GatewayError>,
}

impl WireMessage {
    pub fn request<T: Serialize>(
        id: String,
        method: SignalMethod,
        params: &T,
    ) -> Result<Self, WireError> {
        Ok(Self {
            id,
            method: Some(method.as_str().to_string()),
            params: Some(serde_json::to_value(params)?),
            result: None,
            error: None,
        })
    }

    /// A protocol-level acknowledgment for an inbound request or event.
    pub fn reply<T: Serialize>(id: String, result: &T) -> Result<Self, WireError> {
        Ok(Self {
            id,
            method: None,
            params: None,
            result: Some(serde_json::to_value(result)?),
            error: None,
        })
    }

    pub fn ack(id: String) -> Self {
        Self {
            id,
            method: None,
            params: None,
            result: Some(serde_json::Value::Object(Default::default())),
            error: None,
        }
    }

    pub fn method(&self) -> Option<SignalMethod> {
        self.method.as_deref().and_then(SignalMethod::parse)
    }

    pub fn is_reply(&self) -> bool {
        self.method.is_none() && (self.result.is_some() || self.error.is_some())
    }

    pub fn parse_params<T: DeserializeOwned>(&self) -> Result<T, WireError> {
        let params = self.params.clone().ok_or(WireError::MissingParams)?;
        Ok(serde_json::from_value(params)?)
    }

    /// Extracts the typed result of a reply. A gateway `error` maps to
    /// [`WireError::Gateway`]; a reply with neither half is malformed.
    pub fn parse_result<T: DeserializeOwned>(&self) -> Result<T, WireError> {
        if let Some(err) = &self.error {
            return Err(WireError::Gateway {
                code: err.code,
                message: err.message.clone(),
            });
        }
        let result = self.result.clone().ok_or(WireError::MissingResult)?;
        Ok(serde_json::from_value(result)?)
    }

    pub fn to_json(&self) -> Result<String, WireError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, WireError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// An application-defined header passed through signaling messages,
/// opaque to the engine. Name casing and sequence order are preserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomHeader {
    pub name: String,
    pub value: String,
}

impl CustomHeader {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Call correlation fields nested inside invite, answer and bye messages.
/// `custom_headers` always serializes, as an empty sequence when no
/// headers were given, so the wire shape stays stable for consumers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DialogParams {
    pub call_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_leg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_leg: Option<String>,
    #[serde(default)]
    pub custom_headers: Vec<CustomHeader>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoginParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passwd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResult {
    #[serde(rename = "sessionid")]
    pub session_id: String,
}

/// Inbound invite or session-reattach payload. The reattach replays the
/// same shape so a recovered call is rebuilt through one path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InviteParams {
    pub dialog_params: DialogParams,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller_number: Option<String>,
    /// Destination number on a locally originated invite.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callee: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RingingParams {
    pub dialog_params: DialogParams,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerParams {
    #[serde(rename = "sessionid", default)]
    pub session_id: String,
    pub dialog_params: DialogParams,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ByeParams {
    #[serde(rename = "sessionid", default)]
    pub session_id: String,
    pub dialog_params: DialogParams,
}

/// Requested or reported hold state on a `call-modify` exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HoldState {
    Hold,
    Active,
}

impl fmt::Display for HoldState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hold => f.write_str("hold"),
            Self::Active => f.write_str("active"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModifyParams {
    #[serde(rename = "sessionid", default)]
    pub session_id: String,
    pub dialog_params: DialogParams,
    pub hold: HoldState,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModifyResult {
    pub hold: HoldState,
}

/// Which media stream a toggle applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamTarget {
    Local,
    #[default]
    Remote,
}

/// Early-media / media-update event payload. Arrives keyed by call id
/// only; the call it addresses may not exist yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaEventParams {
    pub call_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<bool>,
    #[serde(default)]
    pub target: StreamTarget,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayStateResult {
    pub registered: bool,
    #[serde(default)]
    pub detail: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_reply_and_event_shapes_are_distinguished() {
        let request = WireMessage::request(
            "id-1".into(),
            SignalMethod::Ping,
            &json!({}),
        )
        .unwrap();
        assert_eq!(request.method(), Some(SignalMethod::Ping));
        assert!(!request.is_reply());

        let ack = WireMessage::ack("id-1".into());
        assert!(ack.is_reply());
        assert_eq!(ack.method(), None);

        let reply = WireMessage::reply("id-2".into(), &json!({"ok": true})).unwrap();
        assert!(reply.is_reply());
        assert_eq!(reply.result.as_ref().unwrap()["ok"], true);

        // An event is shaped like a request but unsolicited.
        let event = WireMessage::from_json(
            r#"{"id":"ev-1","method":"call-bye","params":{"sessionid":"s","dialog_params":{"call_id":"c1","custom_headers":[]}}}"#,
        )
        .unwrap();
        assert_eq!(event.method(), Some(SignalMethod::Bye));
        assert!(!event.is_reply());
    }

    #[test]
    fn unknown_method_still_parses() {
        let msg =
            WireMessage::from_json(r#"{"id":"x","method":"call-novel","params":{}}"#).unwrap();
        assert_eq!(msg.method(), None);
        assert_eq!(msg.method.as_deref(), Some("call-novel"));
    }

    #[test]
    fn gateway_error_reply_maps_to_wire_error() {
        let reply = WireMessage::from_json(
            r#"{"id":"x","error":{"code":-32000,"message":"no such call"}}"#,
        )
        .unwrap();
        match reply.parse_result::<serde_json::Value>() {
            Err(WireError::Gateway { code, message }) => {
                assert_eq!(code, -32000);
                assert_eq!(message, "no such call");
            }
            other => panic!("expected gateway error, got {other:?}"),
        }
    }

    /// Header sequences survive a serialize/parse cycle with order and
    /// name casing intact.
    #[test]
    fn custom_headers_round_trip_preserving_order_and_case() {
        let headers = vec![
            CustomHeader::new("X-Zebra", "2"),
            CustomHeader::new("x-alpha", "1"),
            CustomHeader::new("X-Alpha", "3"),
        ];
        let params = AnswerParams {
            session_id: "sess-1".into(),
            dialog_params: DialogParams {
                call_id: "c1".into(),
                local_leg: Some("leg-a".into()),
                remote_leg: Some("leg-b".into()),
                custom_headers: headers.clone(),
            },
            sdp: Some("v=0".into()),
        };
        let msg = WireMessage::request("id-7".into(), SignalMethod::Answer, &params).unwrap();
        let parsed = WireMessage::from_json(&msg.to_json().unwrap()).unwrap();
        let reparsed: AnswerParams = parsed.parse_params().unwrap();
        assert_eq!(reparsed.dialog_params.custom_headers, headers);
    }

    /// Omitted headers must serialize as an empty sequence, never as an
    /// absent field.
    #[test]
    fn omitted_headers_serialize_as_empty_sequence() {
        let params = ByeParams {
            session_id: "sess-1".into(),
            dialog_params: DialogParams {
                call_id: "c1".into(),
                ..Default::default()
            },
        };
        let msg = WireMessage::request("id-8".into(), SignalMethod::Bye, &params).unwrap();
        let text = msg.to_json().unwrap();
        assert!(text.contains(r#""custom_headers":[]"#), "got: {text}");
    }

    #[test]
    fn media_event_target_defaults_to_remote() {
        let msg = WireMessage::from_json(
            r#"{"id":"m1","method":"call-media","params":{"call_id":"c1","audio":false}}"#,
        )
        .unwrap();
        let params: MediaEventParams = msg.parse_params().unwrap();
        assert_eq!(params.target, StreamTarget::Remote);
        assert_eq!(params.audio, Some(false));
        assert!(params.sdp.is_none());
    }
}
