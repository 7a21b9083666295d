//! JSON-RPC 2.0 envelope codec.
//!
//! Three message shapes travel over the channel as WebSocket text frames:
//!
//! - Request: `{"jsonrpc":"2.0","id":"<uuid>","method":...,"params":...}`
//! - Response: `{"jsonrpc":"2.0","id":"<uuid>","result":...}` or
//!   `{"jsonrpc":"2.0","id":"<uuid>","error":{...}}`
//! - Notification: `{"jsonrpc":"2.0","method":...,"params":...}` — no `id`.
//!
//! Inbound frames are classified by shape, not by a type tag: a frame with an
//! `id` and a `result` or `error` is a response, a frame with a `method` and
//! no `id` is a notification, anything else is malformed and dropped by the
//! read loop.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::Value;

use crate::error::Result;

/// Protocol version stamped on every outbound envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// Reserved error codes.
///
/// The range −32768..−32000 is reserved by the JSON-RPC convention. The
/// application reserves −32000..−32005 for runtime, validation, auth, busy
/// and timeout categories, and −32100..−32199 for failures injected by the
/// transport or gateway rather than the device.
pub mod codes {
    /// Generic runtime failure on the device.
    pub const RUNTIME: i64 = -32000;
    /// Request parameters failed device-side validation.
    pub const VALIDATION: i64 = -32001;
    /// The device rejected the caller's credentials.
    pub const AUTH: i64 = -32002;
    /// The device is busy and cannot service the call.
    pub const BUSY: i64 = -32003;
    /// The device-side operation timed out.
    pub const TIMEOUT: i64 = -32004;

    /// Lowest gateway-injected code.
    pub const GATEWAY_MIN: i64 = -32199;
    /// Highest gateway-injected code.
    pub const GATEWAY_MAX: i64 = -32100;
}

/// Standard JSON-RPC error object, carried inside a [`Response`].
///
/// This is application data, not a transport failure: a call that produces
/// one has still transport-succeeded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcError {
    /// Numeric error code; see [`codes`].
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Optional structured detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    /// Whether the error was injected by the transport/gateway layer rather
    /// than produced by the device.
    pub fn is_gateway(&self) -> bool {
        (codes::GATEWAY_MIN..=codes::GATEWAY_MAX).contains(&self.code)
    }
}

/// Outbound JSON-RPC request.
#[derive(Debug, Serialize)]
pub struct Request<'a> {
    pub jsonrpc: &'static str,
    pub id: &'a str,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<&'a Value>,
}

impl<'a> Request<'a> {
    /// Build a request envelope for the given correlation id.
    pub fn new(id: &'a str, method: &'a str, params: Option<&'a Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method,
            params,
        }
    }

    /// Encode to the wire text.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Inbound JSON-RPC response, matched to a pending call by `id`.
#[derive(Debug, Deserialize)]
pub struct Response {
    pub id: String,
    /// Raw result payload; decoded further only where the caller supplies a
    /// target shape.
    pub result: Option<Box<RawValue>>,
    pub error: Option<RpcError>,
}

/// Inbound JSON-RPC notification (no `id`, never matched to a call).
#[derive(Debug, Clone, Deserialize)]
pub struct Notification {
    pub method: String,
    pub params: Option<Value>,
}

/// Classification of an inbound text frame.
#[derive(Debug)]
pub enum Inbound {
    Response(Response),
    Notification(Notification),
    /// Matched neither shape; dropped by the read loop.
    Malformed,
}

/// Loose single-pass view of an inbound frame, used only for classification.
#[derive(Deserialize)]
struct LooseFrame {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    result: Option<Box<RawValue>>,
    #[serde(default)]
    error: Option<RpcError>,
    #[serde(default)]
    params: Option<Value>,
}

/// Classify an inbound text frame as response, notification, or malformed.
pub fn classify(text: &str) -> Inbound {
    let frame: LooseFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(_) => return Inbound::Malformed,
    };

    match frame.id {
        Some(id) if !id.is_empty() && (frame.result.is_some() || frame.error.is_some()) => {
            Inbound::Response(Response {
                id,
                result: frame.result,
                error: frame.error,
            })
        }
        None => match frame.method {
            Some(method) if !method.is_empty() => Inbound::Notification(Notification {
                method,
                params: frame.params,
            }),
            _ => Inbound::Malformed,
        },
        // An id with neither result nor error is a request echo or garbage.
        Some(_) => Inbound::Malformed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_encoding_with_params() {
        let params = json!({"a": 1});
        let req = Request::new("id-1", "ping", Some(&params));
        let text = req.encode().unwrap();
        let v: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["jsonrpc"], "2.0");
        assert_eq!(v["id"], "id-1");
        assert_eq!(v["method"], "ping");
        assert_eq!(v["params"]["a"], 1);
    }

    #[test]
    fn request_encoding_omits_absent_params() {
        let req = Request::new("id-2", "status", None);
        let text = req.encode().unwrap();
        assert!(!text.contains("params"));
    }

    #[test]
    fn classify_result_response() {
        let inbound = classify(r#"{"jsonrpc":"2.0","id":"x","result":{"ok":true}}"#);
        match inbound {
            Inbound::Response(resp) => {
                assert_eq!(resp.id, "x");
                assert!(resp.result.is_some());
                assert!(resp.error.is_none());
            }
            other => panic!("expected response, got {:?}", other),
        }
    }

    #[test]
    fn classify_error_response() {
        let inbound =
            classify(r#"{"jsonrpc":"2.0","id":"x","error":{"code":-32001,"message":"bad"}}"#);
        match inbound {
            Inbound::Response(resp) => {
                let err = resp.error.unwrap();
                assert_eq!(err.code, codes::VALIDATION);
                assert_eq!(err.message, "bad");
                assert!(err.data.is_none());
            }
            other => panic!("expected response, got {:?}", other),
        }
    }

    #[test]
    fn classify_notification() {
        let inbound = classify(r#"{"jsonrpc":"2.0","method":"device.event","params":{"x":1}}"#);
        match inbound {
            Inbound::Notification(note) => {
                assert_eq!(note.method, "device.event");
                assert_eq!(note.params.unwrap()["x"], 1);
            }
            other => panic!("expected notification, got {:?}", other),
        }
    }

    #[test]
    fn classify_malformed_frames() {
        assert!(matches!(classify("not json"), Inbound::Malformed));
        assert!(matches!(classify("{}"), Inbound::Malformed));
        // id without result or error
        assert!(matches!(
            classify(r#"{"jsonrpc":"2.0","id":"x","method":"m"}"#),
            Inbound::Malformed
        ));
        // empty method
        assert!(matches!(
            classify(r#"{"jsonrpc":"2.0","method":""}"#),
            Inbound::Malformed
        ));
    }

    #[test]
    fn gateway_code_range() {
        let gw = RpcError {
            code: -32150,
            message: "gateway".into(),
            data: None,
        };
        assert!(gw.is_gateway());

        let app = RpcError {
            code: codes::BUSY,
            message: "busy".into(),
            data: None,
        };
        assert!(!app.is_gateway());
    }
}
