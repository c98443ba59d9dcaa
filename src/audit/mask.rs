//! Credential masking for logged header values.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// Appended after the retained key prefix.
pub const MASK_TOKEN: &str = "****";

/// Headers whose values are masked before they reach the audit log.
const MASKED_HEADERS: [&str; 2] = ["x-api-key", "authorization"];

// The trailing `\*{4}` swallows a mask left by a previous pass so masking
// stays idempotent.
static API_KEY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(sk-ant-[a-zA-Z0-9]{0,4})[a-zA-Z0-9_-]*(?:\*{4})?")
        .expect("API key pattern is a valid regex")
});

/// Replace every Anthropic API key in `value` with its first few characters
/// followed by [`MASK_TOKEN`].
pub fn mask_api_key(value: &str) -> String {
    API_KEY_PATTERN
        .replace_all(value, format!("${{1}}{MASK_TOKEN}").as_str())
        .into_owned()
}

/// Mask the credential-bearing headers, passing everything else through.
pub fn mask_headers(headers: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| {
            let value = if is_masked_header(name) {
                mask_api_key(value)
            } else {
                value.clone()
            };
            (name.clone(), value)
        })
        .collect()
}

fn is_masked_header(name: &str) -> bool {
    MASKED_HEADERS
        .iter()
        .any(|masked| name.eq_ignore_ascii_case(masked))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masks_full_key() {
        let result = mask_api_key("sk-ant-REDACTED");
        assert_eq!(result, "sk-ant-api0****");
        assert!(!result.contains("abcdefghijklmnop"));
        assert!(!result.contains("api03"));
    }

    #[test]
    fn test_masks_real_key_format() {
        let result = mask_api_key("sk-ant-REDACTED");
        assert_eq!(result, "sk-ant-api0****");
        assert!(!result.contains("gOoWD2"));
    }

    #[test]
    fn test_masks_short_key() {
        assert_eq!(mask_api_key("sk-ant-abc"), "sk-ant-abc****");
    }

    #[test]
    fn test_no_key_passthrough() {
        assert_eq!(mask_api_key("not-a-key"), "not-a-key");
        assert_eq!(mask_api_key(""), "");
    }

    #[test]
    fn test_masks_in_longer_string() {
        let result = mask_api_key("Bearer sk-ant-api03-xyz123456789");
        assert_eq!(result, "Bearer sk-ant-api0****");
        assert!(!result.contains("xyz123456789"));
    }

    #[test]
    fn test_masking_is_idempotent() {
        for raw in [
            "sk-ant-REDACTED",
            "sk-ant-abc",
            "sk-ant-",
            "Bearer sk-ant-api03-xyz one sk-ant-oat01-zzz",
            "plain value",
        ] {
            let once = mask_api_key(raw);
            assert_eq!(mask_api_key(&once), once, "re-masking changed {raw:?}");
        }
    }

    #[test]
    fn test_mask_headers_only_touches_credentials() {
        let headers = BTreeMap::from([
            ("X-Api-Key".to_string(), "sk-ant-api03-secret".to_string()),
            (
                "Authorization".to_string(),
                "Bearer sk-ant-api03-secret".to_string(),
            ),
            ("x-custom".to_string(), "sk-ant-api03-secret".to_string()),
            ("accept".to_string(), "text/event-stream".to_string()),
        ]);

        let masked = mask_headers(&headers);
        assert_eq!(masked["X-Api-Key"], "sk-ant-api0****");
        assert_eq!(masked["Authorization"], "Bearer sk-ant-api0****");
        assert_eq!(masked["x-custom"], "sk-ant-api03-secret");
        assert_eq!(masked["accept"], "text/event-stream");
    }
}
