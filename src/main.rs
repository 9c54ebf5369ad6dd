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

mod cli;
mod config;
mod control;
mod coordinator;
mod error;
mod headers;
mod ini_backend;
mod lists;
mod logging;
mod onion;
mod password;
mod pipeline;
mod responder;
mod socks;
mod splice;

use clap::Parser;
use tracing::error;

use crate::{cli::Cli, coordinator::Coordinator};

const LOG_TARGET: &str = "http2tor::main";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    if let Err(err) = run(cli).await {
        error!(target: LOG_TARGET, "fatal error: {err:?}");
        return Err(err);
    }
    Ok(())
}

/// Loads the config, builds and starts the `Coordinator`, then blocks until a shutdown signal
/// arrives. Bind failures and config errors are fatal: this is an exit-code-driven contract
/// rather than a retry loop.
async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = config::load(&cli.config)?;
    let coordinator = Coordinator::new(config)?;
    coordinator.run().await?;

    shutdown_signal().await;
    coordinator.stop();
    Ok(())
}

/// Waits for ctrl-c, or for SIGTERM on unix - the two signals a foreground run (`--foreground` in
/// `Cli`) needs to treat as a graceful-stop request. The OS service harness's own pause/continue
/// hooks are out of scope; this is only the direct-run path.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        sigterm.recv().await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
