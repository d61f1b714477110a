//! Stored form of a cached page.
//!
//! A snapshot is kept as a plain HTTP/1.1 response message, so any client of
//! the underlying store can read it, and it is parsed back with `httparse`.

use bytes::{BufMut, Bytes, BytesMut};

use crate::http::{Headers, Response, StatusCode, response::write_head};
use crate::persistence::{CacheError, CacheResult};

/// Status, headers and body of a response, as stored by the page cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub status: StatusCode,
    pub headers: Headers,
    pub body: Bytes,
}

impl CachedResponse {
    /// Most headers a snapshot may carry. The encoded message holds one more,
    /// the regenerated `Content-Length`.
    pub const MAX_HEADERS: usize = 64;

    /// Copies `response`. Framing headers (`Content-Length`, `Connection`) are
    /// left out; they are regenerated when the page is served.
    pub fn from_response(response: &Response) -> Self {
        let headers = response
            .headers()
            .iter()
            .filter(|(name, _)| !is_framing_header(name))
            .collect();
        Self {
            status: response.status(),
            headers,
            body: Bytes::copy_from_slice(response.content()),
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(64 + self.headers.len() * 48 + self.body.len());
        buf.put(
            format!(
                "HTTP/1.1 {} {}\r\n",
                self.status.as_u16(),
                self.status.canonical_reason()
            )
            .as_bytes(),
        );
        write_head(&mut buf, &self.headers, self.body.len());
        buf.put(self.body.as_ref());
        buf.freeze()
    }

    /// Parses a snapshot written by [`encode`](Self::encode).
    ///
    /// # Errors
    ///
    /// [`CacheError::Decode`] when the bytes are not a complete response with a
    /// known status and a body matching its `Content-Length`.
    pub fn decode(bytes: &[u8]) -> CacheResult<Self> {
        let mut raw_headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS + 1];
        let mut parsed = httparse::Response::new(&mut raw_headers);
        let body_offset = match parsed.parse(bytes) {
            Ok(httparse::Status::Complete(offset)) => offset,
            Ok(httparse::Status::Partial) => return Err(decode_error("truncated head")),
            Err(e) => return Err(decode_error(e)),
        };

        let code = parsed.code.ok_or_else(|| decode_error("missing status"))?;
        let status = StatusCode::try_from(code).map_err(decode_error)?;

        let mut headers = Headers::with_capacity(parsed.headers.len());
        let mut content_length = None;
        for header in parsed.headers.iter() {
            let value = std::str::from_utf8(header.value).map_err(decode_error)?;
            if header.name.eq_ignore_ascii_case("content-length") {
                content_length = Some(value.trim().parse::<usize>().map_err(decode_error)?);
            } else {
                headers.insert(header.name, value);
            }
        }

        let body = &bytes[body_offset..];
        if content_length.is_some_and(|len| len != body.len()) {
            return Err(decode_error("body length does not match Content-Length"));
        }

        Ok(Self {
            status,
            headers,
            body: Bytes::copy_from_slice(body),
        })
    }

    /// Rebuilds a response; with `restore_headers == false` only status and body.
    pub fn into_response(self, restore_headers: bool) -> Response {
        let headers = if restore_headers {
            self.headers
        } else {
            Headers::new()
        };
        Response::from_parts(self.status, headers, self.body.to_vec())
    }
}

fn is_framing_header(name: &str) -> bool {
    name.eq_ignore_ascii_case("content-length") || name.eq_ignore_ascii_case("connection")
}

fn decode_error(reason: impl std::fmt::Display) -> CacheError {
    CacheError::Decode(reason.to_string())
}
