//! `RequestMessage` / `ResponseMessage`: the in-memory transaction objects
//! that flow between the inbound handlers and the (external) filter
//! pipeline (§3).

use bytes::Bytes;
use std::sync::Arc;
use viaduct_core::channel::AttrId;
use viaduct_core::session::SessionContext;

/// Case-insensitive-keyed, insertion-ordered, multi-valued header list.
/// Values are never merged — a header sent twice on the wire stays two
/// entries, matching §3's "insertion-ordered values" requirement.
#[derive(Debug, Clone, Default)]
pub struct HeaderMultimap {
    entries: Vec<(String, String)>,
}

impl HeaderMultimap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// First value for `name`, case-insensitive.
    #[must_use]
    pub fn get_first(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get_first(name).is_some()
    }

    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    }

    #[must_use]
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Parsed query-string parameters. Repeated keys and insertion order are
/// preserved, same discipline as [`HeaderMultimap`].
#[derive(Debug, Clone, Default)]
pub struct QueryParams {
    entries: Vec<(String, String)>,
}

impl QueryParams {
    /// Parses `query` (the part of a URI after `?`, without the `?`).
    #[must_use]
    pub fn parse(query: &str) -> Self {
        let mut entries = Vec::new();
        if query.is_empty() {
            return Self { entries };
        }
        for pair in query.split('&') {
            if pair.is_empty() {
                continue;
            }
            match pair.split_once('=') {
                Some((k, v)) => entries.push((k.to_string(), v.to_string())),
                None => entries.push((pair.to_string(), String::new())),
            }
        }
        Self { entries }
    }

    #[must_use]
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn get_first(&self, key: &str) -> Option<&str> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }
}

/// One or more reference-counted body chunks.
pub type BodyChunk = Bytes;

/// Well-known channel attribute keys this crate owns (§6): the current
/// in-flight request/response, mirrored onto the channel's attribute side
/// table alongside the handlers' own internal state so anything else
/// holding the channel (diagnostics, the pool's reverse lookup) can find
/// them without reaching into a handler directly.
pub const ZUUL_REQ: AttrId<RequestMessage> = AttrId::new("zuul_req");
pub const ZUUL_RESP: AttrId<ResponseMessage> = AttrId::new("zuul_resp");

/// The in-memory inbound request built by [`crate::receiver::ClientRequestReceiver`]
/// from a decoded HTTP head (§3, §4.2.1).
#[derive(Debug, Clone)]
pub struct RequestMessage {
    pub protocol: String,
    pub method: String,
    pub path: String,
    pub query: QueryParams,
    pub headers: HeaderMultimap,
    pub client_ip: Option<std::net::IpAddr>,
    pub scheme: &'static str,
    pub local_port: u16,
    pub local_server_name: Option<String>,
    pub ssl_info: Option<String>,
    pub body: Option<BodyChunk>,
    pub has_body: bool,
}

impl RequestMessage {
    /// Splits `uri` into path (up to the first `?`, exclusive) and parsed
    /// query params, per §4.2.1.
    #[must_use]
    pub fn split_uri(uri: &str) -> (String, QueryParams) {
        match uri.split_once('?') {
            Some((path, query)) => (path.to_string(), QueryParams::parse(query)),
            None => (uri.to_string(), QueryParams::default()),
        }
    }

    /// `has_body` is true iff `Transfer-Encoding: chunked` or a non-zero
    /// `Content-Length` is present, per §3.
    #[must_use]
    pub fn compute_has_body(headers: &HeaderMultimap) -> bool {
        if headers
            .get_first("transfer-encoding")
            .is_some_and(|v| v.eq_ignore_ascii_case("chunked"))
        {
            return true;
        }
        headers
            .get_first("content-length")
            .and_then(|v| v.parse::<u64>().ok())
            .is_some_and(|len| len > 0)
    }
}

/// The in-memory outbound response handed to
/// [`crate::writer::ClientResponseWriter`] by the filter pipeline (§3).
#[derive(Debug, Clone)]
pub struct ResponseMessage {
    pub status: u16,
    pub headers: HeaderMultimap,
    /// Zero or more reference-counted body chunks, in write order.
    pub body: Vec<Arc<BodyChunk>>,
}

impl ResponseMessage {
    #[must_use]
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HeaderMultimap::new(),
            body: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(name, value);
        self
    }

    #[must_use]
    pub fn with_body(mut self, chunk: impl Into<Bytes>) -> Self {
        self.body.push(Arc::new(chunk.into()));
        self
    }

    #[must_use]
    pub fn wants_close(&self) -> bool {
        self.headers
            .get_first("connection")
            .is_some_and(|v| v.eq_ignore_ascii_case("close"))
    }
}

/// Per-request wrapper around the opaque [`SessionContext`], kept alongside
/// the request so the receiver/writer pair can check cancellation without
/// reaching back into the filter pipeline.
pub struct InFlightRequest {
    pub request: RequestMessage,
    pub context: Arc<SessionContext>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_uri_strips_query_exclusive_of_question_mark() {
        let (path, query) = RequestMessage::split_uri("/foo/bar?a=1&a=2&b=");
        assert_eq!(path, "/foo/bar");
        let collected: Vec<_> = query.iter().collect();
        assert_eq!(collected, vec![("a", "1"), ("a", "2"), ("b", "")]);
    }

    #[test]
    fn split_uri_with_no_query() {
        let (path, query) = RequestMessage::split_uri("/foo/bar");
        assert_eq!(path, "/foo/bar");
        assert_eq!(query.iter().count(), 0);
    }

    #[test]
    fn has_body_true_for_chunked_or_nonzero_length() {
        let mut chunked = HeaderMultimap::new();
        chunked.push("Transfer-Encoding", "chunked");
        assert!(RequestMessage::compute_has_body(&chunked));

        let mut len = HeaderMultimap::new();
        len.push("Content-Length", "10");
        assert!(RequestMessage::compute_has_body(&len));

        let mut zero = HeaderMultimap::new();
        zero.push("Content-Length", "0");
        assert!(!RequestMessage::compute_has_body(&zero));

        assert!(!RequestMessage::compute_has_body(&HeaderMultimap::new()));
    }

    #[test]
    fn headers_preserve_order_and_do_not_merge() {
        let mut headers = HeaderMultimap::new();
        headers.push("X-Foo", "1");
        headers.push("X-Foo", "2");
        let values: Vec<_> = headers.iter().map(|(_, v)| v).collect();
        assert_eq!(values, vec!["1", "2"]);
        assert_eq!(headers.get_first("x-foo"), Some("1"));
    }

    #[test]
    fn response_wants_close_is_case_insensitive() {
        let resp = ResponseMessage::new(200).with_header("Connection", "Close");
        assert!(resp.wants_close());
    }
}
