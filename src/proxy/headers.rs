//! Header plumbing between the inbound server, the upstream client and the
//! audit log.

use http::header::{HeaderMap, HeaderName, HeaderValue};
use std::collections::BTreeMap;

/// Headers meaningful only for a single connection; never forwarded.
pub const HOP_BY_HOP_HEADERS: [&str; 9] = [
    "host",
    "transfer-encoding",
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "upgrade",
];

pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|hop| name.eq_ignore_ascii_case(hop))
}

/// Convert the server's header map into the client's representation,
/// keeping every header including duplicates.
pub fn from_inbound(inbound: &warp::http::HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(inbound.len());
    for (name, value) in inbound {
        let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_str().as_bytes()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) else {
            continue;
        };
        headers.append(name, value);
    }
    headers
}

/// Headers to send upstream: everything except hop-by-hop headers.
pub fn forwarded(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if !is_hop_by_hop(name.as_str()) {
            out.append(name.clone(), value.clone());
        }
    }
    out
}

/// Headers to return to the client. `content-encoding` is dropped because
/// the client already decoded the body.
pub fn to_client(upstream: &HeaderMap) -> warp::http::HeaderMap {
    let mut out = warp::http::HeaderMap::with_capacity(upstream.len());
    for (name, value) in upstream {
        if is_hop_by_hop(name.as_str()) || name.as_str().eq_ignore_ascii_case("content-encoding")
        {
            continue;
        }
        let (Ok(name), Ok(value)) = (
            warp::http::header::HeaderName::from_bytes(name.as_str().as_bytes()),
            warp::http::header::HeaderValue::from_bytes(value.as_bytes()),
        ) else {
            continue;
        };
        out.append(name, value);
    }
    out
}

/// Flatten headers for logging. Repeated headers are joined with `, `.
pub fn snapshot(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut out: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes());
        out.entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert_with(|| value.into_owned());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inbound(pairs: &[(&'static str, &'static str)]) -> warp::http::HeaderMap {
        let mut map = warp::http::HeaderMap::new();
        for (name, value) in pairs {
            map.append(*name, warp::http::HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_forwarded_strips_hop_by_hop() {
        let headers = from_inbound(&inbound(&[
            ("host", "localhost:8080"),
            ("connection", "keep-alive"),
            ("keep-alive", "timeout=5"),
            ("proxy-authorization", "Basic abc"),
            ("te", "trailers"),
            ("transfer-encoding", "chunked"),
            ("upgrade", "h2c"),
            ("x-api-key", "sk-ant-api03-test"),
            ("anthropic-version", "2023-06-01"),
        ]));

        let forwarded = forwarded(&headers);
        assert_eq!(forwarded.len(), 2);
        assert_eq!(forwarded["x-api-key"], "sk-ant-api03-test");
        assert_eq!(forwarded["anthropic-version"], "2023-06-01");
    }

    #[test]
    fn test_from_inbound_keeps_duplicates() {
        let headers = from_inbound(&inbound(&[("accept", "a"), ("accept", "b")]));
        assert_eq!(headers.get_all("accept").iter().count(), 2);
    }

    #[test]
    fn test_to_client_drops_content_encoding() {
        let mut upstream = HeaderMap::new();
        upstream.insert("content-type", HeaderValue::from_static("application/json"));
        upstream.insert("content-encoding", HeaderValue::from_static("gzip"));
        upstream.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        upstream.insert("request-id", HeaderValue::from_static("req_upstream"));

        let client = to_client(&upstream);
        assert_eq!(client.len(), 2);
        assert_eq!(client["content-type"], "application/json");
        assert_eq!(client["request-id"], "req_upstream");
    }

    #[test]
    fn test_snapshot_joins_repeated_headers() {
        let mut headers = HeaderMap::new();
        headers.append("accept", HeaderValue::from_static("text/event-stream"));
        headers.append("accept", HeaderValue::from_static("application/json"));
        headers.append("x-api-key", HeaderValue::from_static("sk-ant-api03-test"));

        let snapshot = snapshot(&headers);
        assert_eq!(snapshot["accept"], "text/event-stream, application/json");
        assert_eq!(snapshot["x-api-key"], "sk-ant-api03-test");
    }
}
