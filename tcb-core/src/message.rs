//! Intercepted HTTP messages and the boundary to the host proxy

use crate::error::ClassificationFailure;
use crate::mime::normalize_content_type;
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};

const MAX_HEADERS: usize = 128;

/// Target endpoint of an intercepted exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpService {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_protocol")]
    pub protocol: String,
}

fn default_protocol() -> String {
    "http".to_string()
}

impl HttpService {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let protocol = if port == 443 || port == 8443 { "https" } else { "http" };
        Self {
            host: host.into(),
            port,
            protocol: protocol.to_string(),
        }
    }
}

/// What the host proxy exposes for one intercepted exchange.
///
/// Implemented by the proxy integration; the classifier only talks to
/// messages through this trait.
pub trait InterceptedMessage {
    fn service(&self) -> Option<&HttpService>;

    /// Raw request bytes (request line, headers, body)
    fn request(&self) -> &[u8];

    fn set_request(&mut self, request: Bytes);

    /// Raw response bytes, once the response has arrived
    fn response(&self) -> Option<&[u8]>;

    /// MIME type inferred by the host proxy from the response content
    fn inferred_mime(&self) -> Option<&str> {
        None
    }

    fn comment(&self) -> Option<&str>;

    fn set_comment(&mut self, comment: String);
}

/// Owned captured exchange, as read from a capture feed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpExchange {
    #[serde(default)]
    pub service: Option<HttpService>,
    #[serde(with = "raw_text")]
    pub request: Bytes,
    #[serde(default, with = "raw_text::option", skip_serializing_if = "Option::is_none")]
    pub response: Option<Bytes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inferred_mime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl HttpExchange {
    pub fn new(service: HttpService, request: impl Into<Bytes>) -> Self {
        Self {
            service: Some(service),
            request: request.into(),
            ..Default::default()
        }
    }

    pub fn with_response(mut self, response: impl Into<Bytes>) -> Self {
        self.response = Some(response.into());
        self
    }

    pub fn with_inferred_mime(mut self, mime: impl Into<String>) -> Self {
        self.inferred_mime = Some(mime.into());
        self
    }
}

impl InterceptedMessage for HttpExchange {
    fn service(&self) -> Option<&HttpService> {
        self.service.as_ref()
    }

    fn request(&self) -> &[u8] {
        &self.request
    }

    fn set_request(&mut self, request: Bytes) {
        self.request = request;
    }

    fn response(&self) -> Option<&[u8]> {
        self.response.as_deref()
    }

    fn inferred_mime(&self) -> Option<&str> {
        self.inferred_mime.as_deref()
    }

    fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    fn set_comment(&mut self, comment: String) {
        self.comment = Some(comment);
    }
}

/// Parsed view of a request head
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestInfo {
    pub method: String,
    /// Request line followed by one `Name: value` entry per header
    pub headers: Vec<String>,
    pub body_offset: usize,
}

/// Parsed view of a response head
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseInfo {
    pub status_code: u16,
    /// Status line followed by one `Name: value` entry per header
    pub headers: Vec<String>,
    /// MIME type declared by `Content-Type`, normalized
    pub stated_mime: Option<String>,
    pub body_offset: usize,
}

fn header_lines<'a>(headers: &'a [httparse::Header<'a>]) -> impl Iterator<Item = String> + 'a {
    headers
        .iter()
        .map(|h| format!("{}: {}", h.name, String::from_utf8_lossy(h.value)))
}

/// Upper bound on header count for a retry after `TooManyHeaders`
fn header_capacity(raw: &[u8]) -> usize {
    raw.iter().filter(|b| **b == b'\n').count() + 1
}

fn parse_request<'b>(
    raw: &'b [u8],
    headers: &mut [httparse::Header<'b>],
) -> Result<Option<RequestInfo>, httparse::Error> {
    let mut req = httparse::Request::new(headers);
    let body_offset = match req.parse(raw)? {
        httparse::Status::Complete(n) => n,
        httparse::Status::Partial => return Ok(None),
    };

    let method = req.method.unwrap_or_default().to_string();
    let request_line = format!(
        "{} {} HTTP/1.{}",
        method,
        req.path.unwrap_or_default(),
        req.version.unwrap_or(1)
    );

    let mut lines = vec![request_line];
    lines.extend(header_lines(req.headers));

    Ok(Some(RequestInfo {
        method,
        headers: lines,
        body_offset,
    }))
}

fn parse_response<'b>(
    raw: &'b [u8],
    headers: &mut [httparse::Header<'b>],
) -> Result<Option<ResponseInfo>, httparse::Error> {
    let mut res = httparse::Response::new(headers);
    let body_offset = match res.parse(raw)? {
        httparse::Status::Complete(n) => n,
        httparse::Status::Partial => return Ok(None),
    };

    let status_code = res.code.unwrap_or_default();
    let status_line = format!(
        "HTTP/1.{} {} {}",
        res.version.unwrap_or(1),
        status_code,
        res.reason.unwrap_or_default()
    );

    let stated_mime = res
        .headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case("content-type"))
        .and_then(|h| normalize_content_type(&String::from_utf8_lossy(h.value)));

    let mut lines = vec![status_line.trim_end().to_string()];
    lines.extend(header_lines(res.headers));

    Ok(Some(ResponseInfo {
        status_code,
        headers: lines,
        stated_mime,
        body_offset,
    }))
}

pub fn analyze_request(raw: &[u8]) -> Result<RequestInfo, ClassificationFailure> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let parsed = match parse_request(raw, &mut headers) {
        Err(httparse::Error::TooManyHeaders) => {
            let mut headers = vec![httparse::EMPTY_HEADER; header_capacity(raw)];
            parse_request(raw, &mut headers)
        }
        other => other,
    };

    match parsed {
        Ok(Some(info)) => Ok(info),
        Ok(None) => Err(ClassificationFailure::MalformedRequest(
            "incomplete header block".to_string(),
        )),
        // Proxies render HTTP/2 traffic with an `HTTP/2` request line
        Err(httparse::Error::Version) => scan_request(raw).ok_or_else(|| {
            ClassificationFailure::MalformedRequest(httparse::Error::Version.to_string())
        }),
        Err(e) => Err(ClassificationFailure::MalformedRequest(e.to_string())),
    }
}

pub fn analyze_response(raw: &[u8]) -> Result<ResponseInfo, ClassificationFailure> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let parsed = match parse_response(raw, &mut headers) {
        Err(httparse::Error::TooManyHeaders) => {
            let mut headers = vec![httparse::EMPTY_HEADER; header_capacity(raw)];
            parse_response(raw, &mut headers)
        }
        other => other,
    };

    match parsed {
        Ok(Some(info)) => Ok(info),
        Ok(None) => Err(ClassificationFailure::MalformedResponse(
            "incomplete header block".to_string(),
        )),
        Err(httparse::Error::Version) => scan_response(raw).ok_or_else(|| {
            ClassificationFailure::MalformedResponse(httparse::Error::Version.to_string())
        }),
        Err(e) => Err(ClassificationFailure::MalformedResponse(e.to_string())),
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Line-based split of a message head: the first line, the header lines
/// as `Name: value`, and the body offset. `None` when there is no blank
/// line or a header line has no name.
fn scan_head(raw: &[u8]) -> Option<(String, Vec<String>, usize)> {
    let crlf = find(raw, b"\r\n\r\n").map(|i| i + 4);
    let lf = find(raw, b"\n\n").map(|i| i + 2);
    let body_offset = match (crlf, lf) {
        (Some(a), Some(b)) => a.min(b),
        (a, b) => a.or(b)?,
    };

    let head = std::str::from_utf8(&raw[..body_offset]).ok()?;
    let mut lines = head
        .split('\n')
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.is_empty());

    let first = lines.next()?.to_string();
    let mut headers = Vec::new();
    for line in lines {
        let (name, value) = line.split_once(':')?;
        let name = name.trim();
        if name.is_empty() || name.contains(char::is_whitespace) {
            return None;
        }
        headers.push(format!("{}: {}", name, value.trim()));
    }
    Some((first, headers, body_offset))
}

fn scan_request(raw: &[u8]) -> Option<RequestInfo> {
    let (request_line, header_lines, body_offset) = scan_head(raw)?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next()?;
    let _target = parts.next()?;
    let version = parts.next()?;
    if !version.starts_with("HTTP/")
        || parts.next().is_some()
        || !method.bytes().all(|b| b.is_ascii_alphabetic() || b == b'-')
    {
        return None;
    }

    let method = method.to_string();
    let mut headers = vec![request_line];
    headers.extend(header_lines);
    Some(RequestInfo {
        method,
        headers,
        body_offset,
    })
}

fn scan_response(raw: &[u8]) -> Option<ResponseInfo> {
    let (status_line, header_lines, body_offset) = scan_head(raw)?;
    let mut parts = status_line.split_whitespace();
    let version = parts.next()?;
    let code = parts.next()?;
    if !version.starts_with("HTTP/") || code.len() != 3 {
        return None;
    }
    let status_code = code.parse::<u16>().ok()?;

    let stated_mime = header_lines
        .iter()
        .filter_map(|line| line.split_once(": "))
        .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
        .and_then(|(_, value)| normalize_content_type(value));

    let mut headers = vec![status_line];
    headers.extend(header_lines);
    Some(ResponseInfo {
        status_code,
        headers,
        stated_mime,
        body_offset,
    })
}

/// Append one header line after the existing headers of a raw message.
///
/// Existing header bytes are copied verbatim, the new line uses the same
/// line ending as the message, and the body is carried over byte-for-byte.
pub fn insert_header(raw: &[u8], body_offset: usize, header: &str) -> Bytes {
    let head = &raw[..body_offset];
    let (cut, eol): (usize, &[u8]) = if head.ends_with(b"\r\n") {
        (body_offset - 2, b"\r\n")
    } else {
        (body_offset.saturating_sub(1), b"\n")
    };

    let mut out = BytesMut::with_capacity(raw.len() + header.len() + eol.len());
    out.extend_from_slice(&raw[..cut]);
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(eol);
    out.extend_from_slice(&raw[cut..]);
    out.freeze()
}

/// Raw HTTP bytes carried as (lossy) UTF-8 text in JSON feeds
mod raw_text {
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&String::from_utf8_lossy(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let text = String::deserialize(deserializer)?;
        Ok(Bytes::from(text))
    }

    pub mod option {
        use bytes::Bytes;
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(value: &Option<Bytes>, serializer: S) -> Result<S::Ok, S::Error> {
            match value {
                Some(bytes) => serializer.serialize_some(&*String::from_utf8_lossy(bytes)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Bytes>, D::Error> {
            let text = Option::<String>::deserialize(deserializer)?;
            Ok(text.map(Bytes::from))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POST: &[u8] = b"POST /v1/login HTTP/1.1\r\nHost: api.example.com\r\nContent-Length: 13\r\n\r\n{\"user\":\"jb\"}";

    #[test]
    fn test_analyze_request() {
        let info = analyze_request(POST).unwrap();
        assert_eq!(info.method, "POST");
        assert_eq!(info.headers[0], "POST /v1/login HTTP/1.1");
        assert_eq!(info.headers[1], "Host: api.example.com");
        assert_eq!(info.headers.len(), 3);
        assert_eq!(&POST[info.body_offset..], b"{\"user\":\"jb\"}");
    }

    #[test]
    fn test_analyze_request_rejects_garbage() {
        assert!(matches!(
            analyze_request(b"\x00\x01 not http"),
            Err(ClassificationFailure::MalformedRequest(_))
        ));
        assert!(matches!(
            analyze_request(b"GET / HTTP/1.1\r\nHost: a"),
            Err(ClassificationFailure::MalformedRequest(_))
        ));
    }

    #[test]
    fn test_analyze_response() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Type: Application/XML; charset=utf-8\r\n\r\n<a/>";
        let info = analyze_response(raw).unwrap();
        assert_eq!(info.status_code, 200);
        assert_eq!(info.headers[0], "HTTP/1.1 200 OK");
        assert_eq!(info.stated_mime.as_deref(), Some("application/xml"));
        assert_eq!(&raw[info.body_offset..], b"<a/>");
    }

    #[test]
    fn test_analyze_response_without_content_type() {
        let info = analyze_response(b"HTTP/1.1 204 No Content\r\n\r\n").unwrap();
        assert_eq!(info.status_code, 204);
        assert_eq!(info.stated_mime, None);
    }

    #[test]
    fn test_analyze_request_beyond_header_buffer() {
        let mut raw = b"GET /bulk HTTP/1.1\r\nHost: api.example.com\r\n".to_vec();
        for i in 0..130 {
            raw.extend_from_slice(format!("X-Trace-{}: {}\r\n", i, i).as_bytes());
        }
        raw.extend_from_slice(b"\r\nbody");

        let info = analyze_request(&raw).unwrap();
        assert_eq!(info.method, "GET");
        assert_eq!(info.headers.len(), 132);
        assert_eq!(info.headers[131], "X-Trace-129: 129");
        assert_eq!(&raw[info.body_offset..], b"body");
    }

    #[test]
    fn test_analyze_http2_request_line() {
        let raw: &[u8] = b"GET /v2/items HTTP/2\r\nHost: api.example.com\r\nAccept: */*\r\n\r\n{}";
        let info = analyze_request(raw).unwrap();
        assert_eq!(info.method, "GET");
        assert_eq!(info.headers[0], "GET /v2/items HTTP/2");
        assert_eq!(info.headers[2], "Accept: */*");
        assert_eq!(&raw[info.body_offset..], b"{}");

        let updated = insert_header(raw, info.body_offset, "X-TCB: 1");
        assert_eq!(
            &updated[..],
            &b"GET /v2/items HTTP/2\r\nHost: api.example.com\r\nAccept: */*\r\nX-TCB: 1\r\n\r\n{}"[..]
        );
    }

    #[test]
    fn test_analyze_http2_response_line() {
        let raw: &[u8] = b"HTTP/2 200\r\ncontent-type: application/json; charset=utf-8\r\n\r\n{}";
        let info = analyze_response(raw).unwrap();
        assert_eq!(info.status_code, 200);
        assert_eq!(info.stated_mime.as_deref(), Some("application/json"));
        assert_eq!(&raw[info.body_offset..], b"{}");
    }

    #[test]
    fn test_unknown_version_without_head_is_still_malformed() {
        assert!(matches!(
            analyze_request(b"GET / HTTP/2\r\nHost: a"),
            Err(ClassificationFailure::MalformedRequest(_))
        ));
        assert!(matches!(
            analyze_request(b"GET / HTTP/2\r\nnot a header\r\n\r\n"),
            Err(ClassificationFailure::MalformedRequest(_))
        ));
    }

    #[test]
    fn test_insert_header_keeps_body_and_headers() {
        let info = analyze_request(POST).unwrap();
        let updated = insert_header(POST, info.body_offset, "X-TCB: 1");

        let expected: &[u8] = b"POST /v1/login HTTP/1.1\r\nHost: api.example.com\r\nContent-Length: 13\r\nX-TCB: 1\r\n\r\n{\"user\":\"jb\"}";
        assert_eq!(&updated[..], expected);

        let reparsed = analyze_request(&updated).unwrap();
        assert_eq!(reparsed.headers.last().map(String::as_str), Some("X-TCB: 1"));
        assert_eq!(&updated[reparsed.body_offset..], &POST[info.body_offset..]);
    }

    #[test]
    fn test_insert_header_with_bare_newlines() {
        let raw: &[u8] = b"GET / HTTP/1.1\nHost: localhost\n\nbody";
        let info = analyze_request(raw).unwrap();
        let updated = insert_header(raw, info.body_offset, "X-TCB: 1");
        assert_eq!(&updated[..], b"GET / HTTP/1.1\nHost: localhost\nX-TCB: 1\n\nbody");
    }

    #[test]
    fn test_insert_header_keeps_binary_body() {
        let mut raw = b"PUT /blob HTTP/1.1\r\nHost: api\r\n\r\n".to_vec();
        let body: Vec<u8> = (0u8..=255).collect();
        raw.extend_from_slice(&body);

        let info = analyze_request(&raw).unwrap();
        let updated = insert_header(&raw, info.body_offset, "X-TCB: 1");
        let reparsed = analyze_request(&updated).unwrap();
        assert_eq!(&updated[reparsed.body_offset..], &body[..]);
    }

    #[test]
    fn test_exchange_json_round_trip_fields() {
        let line = r#"{"service":{"host":"api.example.com","port":8080},"request":"GET / HTTP/1.1\r\nHost: api.example.com\r\n\r\n","inferred_mime":"unknown"}"#;
        let exchange: HttpExchange = serde_json::from_str(line).unwrap();
        let service = exchange.service().unwrap();
        assert_eq!(service.host, "api.example.com");
        assert_eq!(service.protocol, "http");
        assert!(exchange.response().is_none());
        assert_eq!(exchange.inferred_mime(), Some("unknown"));
        assert!(exchange.request().starts_with(b"GET / HTTP/1.1\r\n"));

        let json = serde_json::to_string(&exchange).unwrap();
        assert!(!json.contains("\"response\""));
        assert!(!json.contains("\"comment\""));
    }
}
