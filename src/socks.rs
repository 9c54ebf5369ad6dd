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

//! A minimal SOCKS4a client used to open tunnels through the local Tor proxy.

use std::time::Duration;

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time::timeout,
};
use tracing::debug;

use crate::error::AppError;

const LOG_TARGET: &str = "http2tor::socks";

const REPLY_GRANTED: u8 = 0x5A;

/// Opens a SOCKS4a CONNECT tunnel to `(host, port)` through the Tor SOCKS proxy listening at
/// `(proxy_ip, proxy_port)`. `connect_timeout` bounds only the TCP connect + SOCKS handshake;
/// reads/writes against the returned stream carry no further deadline. `ident` is forwarded as
/// the SOCKS4 "user id" field and is typically the inbound client's address, for operator-side
/// correlation in Tor's logs — Tor itself ignores it.
pub async fn connect(
    proxy_ip: &str,
    proxy_port: u16,
    host: &str,
    port: u16,
    ident: &str,
    connect_timeout: Duration,
) -> Result<TcpStream, AppError> {
    if host.len() > 255 {
        return Err(AppError::ValidationError(format!(
            "host name {} bytes exceeds the 255 byte SOCKS4a limit",
            host.len()
        )));
    }

    let dial = async {
        let mut stream = TcpStream::connect((proxy_ip, proxy_port)).await?;
        let request = build_request(host, port, ident);
        stream.write_all(&request).await?;

        let mut reply = [0u8; 8];
        stream.read_exact(&mut reply).await?;
        if reply[0] != 0x00 || reply[1] != REPLY_GRANTED {
            return Err(AppError::DialRejected(reply[1]));
        }
        Ok(stream)
    };

    match timeout(connect_timeout, dial).await {
        Ok(Ok(stream)) => {
            debug!(target: LOG_TARGET, "SOCKS4a tunnel established to {host}:{port}");
            Ok(stream)
        },
        Ok(Err(err)) => Err(err),
        Err(_) => Err(AppError::DialTimeout(format!("{host}:{port}"))),
    }
}

/// Builds the raw SOCKS4a CONNECT request: version, command, port, the `0.0.0.x` sentinel IP
/// (x = len(host), non-zero so the proxy recognizes this as a hostname request), the ident
/// string NUL-terminated, then the host NUL-terminated.
fn build_request(host: &str, port: u16, ident: &str) -> Vec<u8> {
    let mut req = Vec::with_capacity(9 + ident.len() + host.len());
    req.push(0x04); // SOCKS version 4
    req.push(0x01); // CONNECT
    req.extend_from_slice(&port.to_be_bytes());
    req.extend_from_slice(&[0x00, 0x00, 0x00, host.len().min(255) as u8]);
    req.extend_from_slice(ident.as_bytes());
    req.push(0x00);
    req.extend_from_slice(host.as_bytes());
    req.push(0x00);
    req
}
