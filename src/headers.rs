// Copyright 2026. The http2tor Community
//
// Redistribution and use in source and binary forms, with or without modification, are permitted provided that the
// following conditions are met:
//
// 1. Redistributions of source code must retain the above copyright notice, this list of conditions and the following
// disclaimer.
//
// 2. Redistributions in binary form must reproduce the above copyright notice, this list of conditions and the
// following disclaimer in the documentation and/or other materials provided with the distribution.
//
// 3. Neither the name of the copyright holder nor the names of its contributors may be used to endorse or promote
// products derived from this software without specific prior written permission.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS "AS IS" AND ANY EXPRESS OR IMPLIED WARRANTIES,
// INCLUDING, BUT NOT LIMITED TO, THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE ARE
// DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL,
// SPECIAL, EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR
// SERVICES; LOSS OF USE, DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF LIABILITY,
// WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE
// USE OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

//! A byte-unbuffered CRLF line reader for the HTTP request line and headers.
//!
//! Over-reading (e.g. via `BufReader`) would strand bytes that belong to the request body -
//! bytes the splicer needs to forward verbatim once the socket is handed off - so every read here
//! is a single byte at a time straight off the socket.
//!
//! `raw_lines` holds the exact bytes read off the wire, not `String`s: the contract is byte
//! preservation for verbatim forwarding, and a header line carrying a non-UTF-8 byte (in, say, an
//! unrelated header unrelated to `Host`) must still be forwarded untouched rather than failing the
//! whole request. Lookups (`header`, `header_values`) decode lossily for matching purposes only.

use std::collections::HashMap;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::AppError;

/// Header lines longer than this (excluding the terminating CRLF) are rejected.
const MAX_LINE_LEN: usize = 8 * 1024;

#[derive(Debug, Clone)]
pub struct ParsedRequest {
    pub method: String,
    pub target: String,
    pub protocol: String,
    /// Lowercased header name -> value, for lookups. Decoded lossily from `raw_lines`.
    headers: HashMap<String, String>,
    /// The exact bytes of every header line (request line included), in order, so the request
    /// can be reconstructed verbatim for forwarding to the upstream tunnel.
    pub raw_lines: Vec<Vec<u8>>,
}

impl ParsedRequest {
    /// All values seen for a (lowercased) header name. Most callers want `header_values` to
    /// detect the "absent or duplicated" cases the pipeline must reject the `Host` header for.
    /// Matching is done on a lossy UTF-8 decode of each line; this affects only which bytes are
    /// compared, never what gets forwarded.
    pub fn header_values(&self, name: &str) -> Vec<String> {
        let name = name.to_ascii_lowercase();
        self.raw_lines
            .iter()
            .map(|line| String::from_utf8_lossy(line).into_owned())
            .filter_map(|line| split_header(&line).map(|(k, v)| (k.to_string(), v.to_string())))
            .filter(|(k, _)| k.eq_ignore_ascii_case(&name))
            .map(|(_, v)| v)
            .collect()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Overwrites every line whose trimmed, lowercased prefix is `host:` with `Host: <new>`,
    /// in both `raw_lines` (for forwarding) and the parsed lookup table. `new_host` is always an
    /// onion address or alias target, so the replacement line is plain ASCII.
    pub fn replace_host(&mut self, new_host: &str) {
        for line in &mut self.raw_lines {
            let lossy = String::from_utf8_lossy(line);
            if lossy.trim_start().to_ascii_lowercase().starts_with("host:") {
                *line = format!("Host: {new_host}").into_bytes();
            }
        }
        self.headers.insert("host".to_string(), new_host.to_string());
    }

    /// Joins `raw_lines` with CRLF and appends the terminating blank line, producing the exact
    /// byte sequence to send to the upstream tunnel.
    pub fn to_wire_bytes(&self) -> Vec<u8> {
        let mut out = self.raw_lines.join(&b"\r\n"[..]);
        out.extend_from_slice(b"\r\n\r\n");
        out
    }
}

fn split_header(line: &str) -> Option<(&str, &str)> {
    let idx = line.find(':')?;
    let (name, rest) = line.split_at(idx);
    Some((name.trim(), rest[1..].trim()))
}

/// Reads one byte at a time until `CRLF` is seen, capping the accumulated line at
/// `MAX_LINE_LEN`. Returns the raw line bytes without the trailing CRLF - not decoded, since the
/// contract is verbatim byte forwarding, not text validity.
async fn read_line<R: AsyncRead + Unpin>(stream: &mut R) -> Result<Vec<u8>, AppError> {
    let mut buf: Vec<u8> = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            return Err(AppError::ProtocolError("connection closed while reading header line".into()));
        }
        if byte[0] == b'\n' && buf.last() == Some(&b'\r') {
            buf.pop();
            break;
        }
        buf.push(byte[0]);
        if buf.len() > MAX_LINE_LEN {
            return Err(AppError::ProtocolError(format!(
                "header line exceeded {MAX_LINE_LEN} bytes"
            )));
        }
    }
    Ok(buf)
}

/// Reads the request line and header block off `stream`, stopping at the first empty line.
/// Every non-empty header line must contain a colon, or the read fails with `ProtocolError`.
/// Lines are matched/parsed via a lossy UTF-8 decode; the raw bytes read off the wire are kept
/// untouched in `raw_lines` regardless of their content.
pub async fn read_request<R: AsyncRead + Unpin>(stream: &mut R) -> Result<ParsedRequest, AppError> {
    let request_line = read_line(stream).await?;
    let request_line_text = String::from_utf8_lossy(&request_line).into_owned();
    let mut parts = request_line_text.splitn(3, ' ');
    let method = parts
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::ProtocolError("empty request line".into()))?
        .to_string();
    let target = parts
        .next()
        .ok_or_else(|| AppError::ProtocolError("malformed request line".into()))?
        .to_string();
    let protocol = parts
        .next()
        .ok_or_else(|| AppError::ProtocolError("malformed request line".into()))?
        .to_string();

    let mut raw_lines = vec![request_line];
    let mut headers = HashMap::new();
    loop {
        let line = read_line(stream).await?;
        if line.is_empty() {
            break;
        }
        let line_text = String::from_utf8_lossy(&line).into_owned();
        let (name, value) = split_header(&line_text)
            .ok_or_else(|| AppError::ProtocolError(format!("header line has no colon: {line_text:?}")))?;
        headers.insert(name.to_ascii_lowercase(), value.to_string());
        raw_lines.push(line);
    }

    Ok(ParsedRequest {
        method,
        target,
        protocol,
        headers,
        raw_lines,
    })
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[tokio::test]
    async fn parses_request_line_and_headers() {
        let raw = b"GET /x?y=1 HTTP/1.1\r\nHost: short.onion.example.com\r\nUser-Agent: test\r\n\r\n";
        let mut cursor = Cursor::new(raw.to_vec());
        let req = read_request(&mut cursor).await.unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.target, "/x?y=1");
        assert_eq!(req.protocol, "HTTP/1.1");
        assert_eq!(req.header("host"), Some("short.onion.example.com"));
        assert_eq!(req.header("user-agent"), Some("test"));
        assert_eq!(req.header_values("host"), vec!["short.onion.example.com".to_string()]);
    }

    #[tokio::test]
    async fn non_utf8_byte_in_unrelated_header_is_forwarded_verbatim_not_rejected() {
        // A stray Latin-1 byte in an unrelated header must not fail the whole request: the
        // contract is byte preservation, not text validity.
        let mut raw = b"GET / HTTP/1.1\r\nHost: short.onion.example.com\r\nX-Weird: caf\xe9\r\n\r\n".to_vec();
        let mut cursor = Cursor::new(std::mem::take(&mut raw));
        let req = read_request(&mut cursor).await.unwrap();
        assert_eq!(req.header("host"), Some("short.onion.example.com"));
        // The raw bytes of the offending line survive untouched for verbatim forwarding.
        assert!(req.raw_lines.iter().any(|l| l == b"X-Weird: caf\xe9"));
    }

    #[tokio::test]
    async fn rejects_line_without_colon() {
        let raw = b"GET / HTTP/1.1\r\nBadHeaderNoColon\r\n\r\n";
        let mut cursor = Cursor::new(raw.to_vec());
        assert!(read_request(&mut cursor).await.is_err());
    }

    #[tokio::test]
    async fn rejects_oversized_line() {
        let mut raw = b"GET / HTTP/1.1\r\nX-Long: ".to_vec();
        raw.extend(std::iter::repeat(b'a').take(MAX_LINE_LEN + 10));
        raw.extend_from_slice(b"\r\n\r\n");
        let mut cursor = Cursor::new(raw);
        assert!(read_request(&mut cursor).await.is_err());
    }

    #[tokio::test]
    async fn replace_host_rewrites_raw_and_parsed() {
        let raw = b"GET / HTTP/1.1\r\nHost: old.example.com\r\n\r\n";
        let mut cursor = Cursor::new(raw.to_vec());
        let mut req = read_request(&mut cursor).await.unwrap();
        req.replace_host("cccc.onion");
        assert_eq!(req.header("host"), Some("cccc.onion"));
        assert!(req.raw_lines.iter().any(|l| l == b"Host: cccc.onion"));
    }

    #[tokio::test]
    async fn to_wire_bytes_reconstructs_block() {
        let raw = b"GET / HTTP/1.1\r\nHost: x.onion\r\n\r\n";
        let mut cursor = Cursor::new(raw.to_vec());
        let req = read_request(&mut cursor).await.unwrap();
        assert_eq!(req.to_wire_bytes(), raw.to_vec());
    }

    #[tokio::test]
    async fn duplicate_host_headers_detected_via_header_values() {
        let raw = b"GET / HTTP/1.1\r\nHost: a.onion\r\nHost: b.onion\r\n\r\n";
        let mut cursor = Cursor::new(raw.to_vec());
        let req = read_request(&mut cursor).await.unwrap();
        assert_eq!(req.header_values("host").len(), 2);
    }
}
