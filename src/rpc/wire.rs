//! Line-delimited JSON framing for the loopback RPC link.
//!
//! Each record is a single JSON object on its own line. Requests carry a
//! per-connection id, a method name, and a params object; responses echo the
//! id and carry an optional error string. There is no result payload: every
//! broker method replies empty, errors are what matter.
//!
//! This module provides pure parsing and encoding functions, no async IO.
//! The client and server read loops call these per line.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::error::WireError;

/// Maximum accepted line size (1 MiB).
///
/// Relay packets are at most 1024 bytes of payload, so a well-behaved peer
/// never comes near this. Lines exceeding the limit are rejected before JSON
/// parsing.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// An RPC request record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WireRequest {
    /// Caller-assigned id, unique among the caller's in-flight calls.
    pub id: u64,
    /// Method name, e.g. `HandlePacket`.
    pub method: String,
    /// Method parameters; `null` for parameterless methods.
    #[serde(default)]
    pub params: serde_json::Value,
}

/// An RPC response record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WireResponse {
    /// The id of the request this responds to.
    pub id: u64,
    /// Error string from the serving endpoint; absent on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Parse a single line into a record.
///
/// Performs the size check on the raw line before any JSON parsing.
pub fn parse_line<T: DeserializeOwned>(line: &str) -> Result<T, WireError> {
    if line.len() > MAX_LINE_BYTES {
        return Err(WireError::MessageTooLarge {
            max_bytes: MAX_LINE_BYTES,
        });
    }

    serde_json::from_str(line.trim()).map_err(|e| WireError::Malformed {
        reason: e.to_string(),
    })
}

/// Encode a record as a single newline-terminated line.
pub fn encode_line<T: Serialize>(record: &T) -> Result<String, WireError> {
    let mut line = serde_json::to_string(record).map_err(|e| WireError::Malformed {
        reason: e.to_string(),
    })?;
    line.push('\n');
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_round_trip() {
        let req = WireRequest {
            id: 7,
            method: "HandlePacket".to_string(),
            params: serde_json::json!({"server": "gpcm", "index": 1}),
        };
        let line = encode_line(&req).unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);

        let parsed: WireRequest = parse_line(&line).unwrap();
        assert_eq!(parsed, req);
    }

    #[test]
    fn test_response_success_omits_error() {
        let resp = WireResponse { id: 3, error: None };
        let line = encode_line(&resp).unwrap();
        assert!(!line.contains("error"));

        let parsed: WireResponse = parse_line(&line).unwrap();
        assert_eq!(parsed.id, 3);
        assert!(parsed.error.is_none());
    }

    #[test]
    fn test_response_error_round_trip() {
        let resp = WireResponse {
            id: 9,
            error: Some("incorrect connection index".to_string()),
        };
        let line = encode_line(&resp).unwrap();
        let parsed: WireResponse = parse_line(&line).unwrap();
        assert_eq!(parsed, resp);
    }

    #[test]
    fn test_missing_params_defaults_to_null() {
        let parsed: WireRequest = parse_line(r#"{"id":1,"method":"Shutdown"}"#).unwrap();
        assert_eq!(parsed.method, "Shutdown");
        assert!(parsed.params.is_null());
    }

    #[test]
    fn test_malformed_json() {
        let err = parse_line::<WireRequest>(r#"{"id":1,"#).unwrap_err();
        assert!(matches!(err, WireError::Malformed { .. }));
    }

    #[test]
    fn test_oversized_line_rejected_before_parsing() {
        let big = "x".repeat(MAX_LINE_BYTES + 1);
        let err = parse_line::<WireRequest>(&big).unwrap_err();
        assert!(
            matches!(err, WireError::MessageTooLarge { max_bytes } if max_bytes == MAX_LINE_BYTES)
        );
    }
}
