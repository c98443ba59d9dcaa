//! Session and conversation identifiers for grouping logged exchanges.

use http::HeaderMap;
use serde_json::Value;

/// Checked in order; the first non-empty one wins.
pub const SESSION_HEADER_CANDIDATES: [&str; 3] =
    ["x-session-id", "anthropic-session-id", "x-claude-session-id"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionInfo {
    pub session_id: Option<String>,
    pub conversation_id: Option<String>,
}

/// Derive session identifiers from the request headers and the request
/// body's `metadata` object.
///
/// `conversation_id` falls back to `metadata.session_id` when the body carries
/// no `metadata.conversation_id`. Bodies that are not JSON objects leave
/// `conversation_id` unset.
pub fn extract_session_info(headers: &HeaderMap, body: &[u8]) -> SessionInfo {
    SessionInfo {
        session_id: session_from_headers(headers),
        conversation_id: conversation_from_body(body),
    }
}

fn session_from_headers(headers: &HeaderMap) -> Option<String> {
    SESSION_HEADER_CANDIDATES.iter().find_map(|name| {
        headers
            .get_all(*name)
            .iter()
            .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
            .find(|value| !value.is_empty())
    })
}

fn conversation_from_body(body: &[u8]) -> Option<String> {
    let data: Value = serde_json::from_slice(body).ok()?;
    let metadata = data.get("metadata")?.as_object()?;

    ["conversation_id", "session_id"].iter().find_map(|key| {
        metadata
            .get(*key)
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;
    use serde_json::json;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_extracts_session_from_header() {
        let headers = headers(&[
            ("x-session-id", "sess_abc123"),
            ("content-type", "application/json"),
        ]);
        let info = extract_session_info(&headers, b"{}");
        assert_eq!(info.session_id.as_deref(), Some("sess_abc123"));
        assert_eq!(info.conversation_id, None);
    }

    #[test]
    fn test_extracts_anthropic_session_header() {
        let info = extract_session_info(&headers(&[("anthropic-session-id", "sess_xyz")]), b"{}");
        assert_eq!(info.session_id.as_deref(), Some("sess_xyz"));
    }

    #[test]
    fn test_header_priority_order() {
        let headers = headers(&[
            ("x-claude-session-id", "third"),
            ("anthropic-session-id", "second"),
        ]);
        let info = extract_session_info(&headers, b"");
        assert_eq!(info.session_id.as_deref(), Some("second"));
    }

    #[test]
    fn test_empty_header_value_is_skipped() {
        let headers = headers(&[("x-session-id", ""), ("x-claude-session-id", "sess_cli")]);
        let info = extract_session_info(&headers, b"");
        assert_eq!(info.session_id.as_deref(), Some("sess_cli"));
    }

    #[test]
    fn test_extracts_conversation_id_from_body_metadata() {
        let body = json!({"metadata": {"conversation_id": "conv_456"}}).to_string();
        let info = extract_session_info(&HeaderMap::new(), body.as_bytes());
        assert_eq!(info.conversation_id.as_deref(), Some("conv_456"));
        assert_eq!(info.session_id, None);
    }

    #[test]
    fn test_metadata_session_id_lands_in_conversation_id() {
        let body = json!({"metadata": {"session_id": "sess_789"}}).to_string();
        let info = extract_session_info(&HeaderMap::new(), body.as_bytes());
        assert_eq!(info.conversation_id.as_deref(), Some("sess_789"));
        assert_eq!(info.session_id, None);
    }

    #[test]
    fn test_conversation_id_preferred_over_metadata_session_id() {
        let body = json!({"metadata": {"session_id": "sess_789", "conversation_id": "conv_1"}})
            .to_string();
        let info = extract_session_info(&HeaderMap::new(), body.as_bytes());
        assert_eq!(info.conversation_id.as_deref(), Some("conv_1"));
    }

    #[test]
    fn test_returns_none_when_absent() {
        let info = extract_session_info(
            &HeaderMap::new(),
            br#"{"model": "claude-sonnet-4-5-20250929"}"#,
        );
        assert_eq!(info, SessionInfo::default());
    }

    #[test]
    fn test_handles_invalid_body() {
        let info = extract_session_info(&HeaderMap::new(), b"not json");
        assert_eq!(info, SessionInfo::default());

        let info = extract_session_info(&HeaderMap::new(), &[0xff, 0xfe, b'{']);
        assert_eq!(info, SessionInfo::default());

        let info = extract_session_info(&HeaderMap::new(), b"[1, 2, 3]");
        assert_eq!(info, SessionInfo::default());
    }

    #[test]
    fn test_header_session_survives_malformed_body() {
        let info = extract_session_info(&headers(&[("x-session-id", "sess_h")]), b"{oops");
        assert_eq!(info.session_id.as_deref(), Some("sess_h"));
        assert_eq!(info.conversation_id, None);
    }
}
