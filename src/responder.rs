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

//! Canned HTTP error/redirect responders with minimal HTML bodies.

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::warn;

const LOG_TARGET: &str = "http2tor::responder";

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn page(title: &str, message: &str) -> String {
    format!(
        "<!DOCTYPE html><html><head><title>{t}</title></head><body><h1>{t}</h1><p>{m}</p></body></html>",
        t = escape_html(title),
        m = escape_html(message)
    )
}

/// Writes a canned status line, the fixed header set shared by every responder, an optional `Location`
/// and/or `Link` header, the HTML body, then half-closes the write side. Write failures are
/// logged and swallowed - a responder must never panic or propagate on a broken client socket.
async fn write_response<W: AsyncWrite + Unpin>(
    stream: &mut W,
    code: u16,
    reason: &str,
    body: &str,
    location: Option<&str>,
    link: Option<&str>,
) -> bool {
    let mut head = format!(
        "HTTP/1.1 {code} {reason}\r\n\
         Content-Type: text/html; charset=utf-8\r\n\
         Content-Length: {len}\r\n\
         Cache-Control: no-store, max-age=0\r\n\
         Connection: close\r\n",
        len = body.len()
    );
    if let Some(loc) = location {
        head.push_str(&format!("Location: {loc}\r\n"));
    }
    if let Some(url) = link {
        head.push_str(&format!("Link: <{url}>; rel=\"blocked-by\"\r\n"));
    }
    head.push_str("\r\n");
    head.push_str(body);

    let ok = async {
        stream.write_all(head.as_bytes()).await?;
        stream.shutdown().await?;
        Ok::<(), std::io::Error>(())
    }
    .await;

    if let Err(err) = ok {
        warn!(target: LOG_TARGET, "failed writing {code} response: {err}");
        false
    } else {
        true
    }
}

pub async fn bad_request<W: AsyncWrite + Unpin>(stream: &mut W, detail: &str) -> bool {
    let body = page("400 Bad Request", detail);
    write_response(stream, 400, "Bad Request", &body, None, None).await
}

pub async fn forbidden<W: AsyncWrite + Unpin>(stream: &mut W, domain: &str) -> bool {
    let body = page("403 Forbidden", &format!("Access to {domain} is not permitted."));
    write_response(stream, 403, "Forbidden", &body, None, None).await
}

pub async fn gone_v2<W: AsyncWrite + Unpin>(stream: &mut W) -> bool {
    let body = page(
        "410 Gone",
        "Tor v2 onion addresses are no longer supported. Ask the service operator for a v3 address.",
    );
    write_response(stream, 410, "Gone", &body, None, None).await
}

pub async fn legal_reasons<W: AsyncWrite + Unpin>(stream: &mut W, domain: &str, url: Option<&str>) -> bool {
    let mut message = format!("Access to {domain} has been withdrawn for legal reasons.");
    if let Some(u) = url {
        message.push_str(&format!(" See {u} for details."));
    }
    let body = page("451 Unavailable For Legal Reasons", &message);
    write_response(stream, 451, "Unavailable For Legal Reasons", &body, None, url).await
}

pub async fn service_unavailable<W: AsyncWrite + Unpin>(stream: &mut W, detail: &str) -> bool {
    let body = page("503 Service Unavailable", &format!("Could not reach the onion service: {detail}"));
    write_response(stream, 503, "Service Unavailable", &body, None, None).await
}

pub async fn gateway_timeout<W: AsyncWrite + Unpin>(stream: &mut W) -> bool {
    let body = page("504 Gateway Timeout", "The onion service did not respond in time.");
    write_response(stream, 504, "Gateway Timeout", &body, None, None).await
}

pub async fn redirect<W: AsyncWrite + Unpin>(stream: &mut W, location: &str) -> bool {
    let body = page("307 Temporary Redirect", &format!("Redirecting to {location}."));
    write_response(stream, 307, "Temporary Redirect", &body, Some(location), None).await
}
