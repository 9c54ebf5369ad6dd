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

//! Bidirectional byte splicing between the inbound HTTP socket and the outbound SOCKS tunnel.

use tokio::{io::AsyncWriteExt, net::TcpStream};
use tracing::{debug, warn};

const LOG_TARGET: &str = "http2tor::splice";

/// Copies bytes in both directions between `inbound` and `outbound` concurrently. Returns as
/// soon as either direction hits EOF, an error, or a reset - whichever happens first - and
/// makes a best-effort attempt to shut down both sockets before returning. Errors are logged,
/// never propagated: a broken splice is simply the end of this connection's life.
pub async fn splice(inbound: TcpStream, outbound: TcpStream) {
    let (mut inbound_rd, mut inbound_wr) = inbound.into_split();
    let (mut outbound_rd, mut outbound_wr) = outbound.into_split();

    let client_to_tor = async {
        let result = tokio::io::copy(&mut inbound_rd, &mut outbound_wr).await;
        let _ = outbound_wr.shutdown().await;
        result
    };
    let tor_to_client = async {
        let result = tokio::io::copy(&mut outbound_rd, &mut inbound_wr).await;
        let _ = inbound_wr.shutdown().await;
        result
    };

    tokio::select! {
        result = client_to_tor => {
            log_outcome("client->tor", result);
        }
        result = tor_to_client => {
            log_outcome("tor->client", result);
        }
    }
}

fn log_outcome(direction: &str, result: std::io::Result<u64>) {
    match result {
        Ok(n) => debug!(target: LOG_TARGET, "{direction} closed after {n} bytes"),
        Err(err) => warn!(target: LOG_TARGET, "{direction} ended with I/O error: {err}"),
    }
}
