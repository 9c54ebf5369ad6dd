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

//! The control-port line protocol: per-connection state machine, command dispatch, and the
//! listener loop that accepts control connections.

use std::time::Duration;

use tokio::{
    io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
};
use tracing::{info, instrument, warn};

use crate::{
    coordinator::Coordinator,
    lists::{AliasEntry, AliasType, BlacklistEntry, BlacklistReason},
    onion,
};

const LOG_TARGET: &str = "http2tor::control";
const AUTH_GATE: Duration = Duration::from_millis(500);

/// Commands that require `Authenticated` state. Looked up before dispatch so every gated command
/// shares one enforcement point rather than each handler re-checking it.
const AUTH_REQUIRED: &[&str] = &[
    "HALT", "CONT", "BLRELOAD", "ALRELOAD", "BLLIST", "ALLIST", "BLADD", "ALADD", "BLREMOVE", "ALREMOVE", "BLSAVE",
    "ALSAVE",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    Unauthenticated,
    Authenticated,
}

struct CommandOutcome {
    payload: Vec<String>,
    ok: bool,
    close: bool,
}

impl CommandOutcome {
    fn ok() -> Self {
        Self { payload: Vec::new(), ok: true, close: false }
    }

    fn ok_with(payload: Vec<String>) -> Self {
        Self { payload, ok: true, close: false }
    }

    fn err(message: impl Into<String>) -> Self {
        Self { payload: vec![message.into()], ok: false, close: false }
    }

    /// An `ERR` with no payload lines at all - distinct from `err("")`, which would still emit a
    /// single blank payload line before the terminator. Unknown commands get this one (spec.md
    /// §4.8: "Unknown commands return `ERR` with no payload").
    fn err_no_payload() -> Self {
        Self { payload: Vec::new(), ok: false, close: false }
    }

    fn exit() -> Self {
        Self { payload: Vec::new(), ok: true, close: true }
    }
}

/// Runs the control listener: one task per accepted connection.
pub async fn run(listener: TcpListener, coordinator: std::sync::Arc<Coordinator>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let coordinator = coordinator.clone();
                tokio::spawn(async move {
                    handle_connection(stream, &coordinator).await;
                    info!(target: LOG_TARGET, peer = %peer, "control connection closed");
                });
            },
            Err(err) => {
                warn!(target: LOG_TARGET, "accept failed: {err}");
            },
        }
    }
}

#[instrument(skip_all, target = "http2tor::control")]
async fn handle_connection(stream: TcpStream, coordinator: &Coordinator) {
    let (rd, mut wr) = stream.into_split();
    let mut lines = BufReader::new(rd).lines();

    let greeting = format!("Http2Socks {}", coordinator.control_greeting_url());
    if write_lines(&mut wr, &[greeting], true).await.is_err() {
        return;
    }

    let mut state = ConnState::Unauthenticated;
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return, // EOF
            Err(err) => {
                warn!(target: LOG_TARGET, "read error: {err}");
                return;
            },
        };

        let outcome = dispatch(coordinator, &mut state, &line).await;
        let close = outcome.close;
        if write_lines(&mut wr, &outcome.payload, outcome.ok).await.is_err() || close {
            return;
        }
    }
}

async fn write_lines<W: AsyncWrite + Unpin>(wr: &mut W, payload: &[String], ok: bool) -> std::io::Result<()> {
    let mut out = String::new();
    for line in payload {
        out.push_str(line);
        out.push_str("\r\n");
    }
    out.push_str(if ok { "OK\r\n" } else { "ERR\r\n" });
    wr.write_all(out.as_bytes()).await
}

/// Splits on single spaces (preserving empty tokens for skipped optional arguments), looks up
/// the auth requirement, and routes to the matching handler.
async fn dispatch(coordinator: &Coordinator, state: &mut ConnState, line: &str) -> CommandOutcome {
    let mut parts = line.split(' ');
    let command = parts.next().unwrap_or("").to_ascii_uppercase();
    let rest_of_line = line.splitn(2, ' ').nth(1).unwrap_or("");
    let args: Vec<&str> = parts.collect();

    if AUTH_REQUIRED.contains(&command.as_str()) && *state != ConnState::Authenticated {
        return CommandOutcome::err("Not authenticated");
    }

    match command.as_str() {
        "NOOP" => CommandOutcome::ok(),
        "EXIT" => CommandOutcome::exit(),
        "VERSION" => CommandOutcome::ok_with(vec!["1".to_string()]),
        "AUTH" => handle_auth(coordinator, state, rest_of_line).await,
        "INFO" => handle_info(coordinator, *state),
        "HALT" => {
            coordinator.set_halt(true);
            CommandOutcome::ok_with(vec!["Halted".to_string()])
        },
        "CONT" => {
            coordinator.set_halt(false);
            CommandOutcome::ok_with(vec!["Resumed".to_string()])
        },
        "BLRELOAD" => match coordinator.lists().load_blacklist(coordinator.blacklist_path()) {
            Ok(()) => CommandOutcome::ok(),
            Err(err) => CommandOutcome::err(err.to_string()),
        },
        "ALRELOAD" => match coordinator.lists().load_aliases(coordinator.alias_path()) {
            Ok(()) => CommandOutcome::ok(),
            Err(err) => CommandOutcome::err(err.to_string()),
        },
        "BLLIST" => CommandOutcome::ok_with(to_lines(coordinator.lists().list_blacklist_ini_text())),
        "ALLIST" => CommandOutcome::ok_with(to_lines(coordinator.lists().list_aliases_ini_text())),
        "BLADD" => handle_bladd(coordinator, &args),
        "ALADD" => handle_aladd(coordinator, &args),
        "BLREMOVE" => handle_remove(&args, |d| coordinator.lists().remove_blacklist(d)),
        "ALREMOVE" => handle_remove(&args, |d| {
            let normalized = onion::normalize(d)
                .ok_or_else(|| crate::error::AppError::ValidationError(format!("invalid onion address: {d:?}")))?;
            coordinator.lists().remove_alias_by_onion(&normalized);
            Ok(())
        }),
        "BLSAVE" => match coordinator.lists().save_blacklist(coordinator.blacklist_path()) {
            Ok(()) => CommandOutcome::ok(),
            Err(err) => CommandOutcome::err(err.to_string()),
        },
        "ALSAVE" => match coordinator.lists().save_aliases(coordinator.alias_path()) {
            Ok(()) => CommandOutcome::ok(),
            Err(err) => CommandOutcome::err(err.to_string()),
        },
        _ => CommandOutcome::err_no_payload(),
    }
}

fn to_lines(text: String) -> Vec<String> {
    text.lines().map(str::to_string).collect()
}

async fn handle_auth(coordinator: &Coordinator, state: &mut ConnState, creds: &str) -> CommandOutcome {
    {
        let _guard = coordinator.auth_throttle().lock().await;
        tokio::time::sleep(AUTH_GATE).await;
    }

    if *state == ConnState::Authenticated {
        return CommandOutcome::err("User already authenticated");
    }

    if coordinator.check_credentials(creds) {
        *state = ConnState::Authenticated;
        CommandOutcome::ok_with(vec!["User authenticated".to_string()])
    } else {
        CommandOutcome::err("Authentication failed")
    }
}

fn handle_info(coordinator: &Coordinator, state: ConnState) -> CommandOutcome {
    let authed = state == ConnState::Authenticated;
    let mut lines = vec![format!("AUTH={}", authed as u8)];
    if authed {
        lines.push(format!("HALT={}", coordinator.is_halted() as u8));
        lines.push(format!("BL={}", coordinator.blacklist_path().is_some() as u8));
        lines.push(format!("AL={}", coordinator.alias_path().is_some() as u8));
        lines.push(format!("BLFILE={}", coordinator.blacklist_path().is_some() as u8));
        lines.push(format!("ALFILE={}", coordinator.alias_path().is_some() as u8));
        lines.push(format!(
            "NONANONYMOUSHEADERS={}",
            coordinator.config().non_anonymous_headers.iter().cloned().collect::<Vec<_>>().join(",")
        ));
    }
    CommandOutcome::ok_with(lines)
}

fn handle_bladd(coordinator: &Coordinator, args: &[&str]) -> CommandOutcome {
    let domain = args.first().copied().unwrap_or("");
    let name = args.get(1).filter(|s| !s.is_empty()).map(|s| onion::url_decode(s));
    let notes = args.get(2).filter(|s| !s.is_empty()).map(|s| onion::url_decode(s));
    let reason = match args.get(3).copied().unwrap_or("") {
        "" => BlacklistReason::Forbidden,
        "403" => BlacklistReason::Forbidden,
        "451" => BlacklistReason::LegalReasons,
        other => return CommandOutcome::err(format!("invalid reason: {other}")),
    };
    let url = args.get(4).filter(|s| !s.is_empty()).map(|s| s.to_string());

    match BlacklistEntry::new(domain, name, notes, reason, url) {
        Ok(entry) => {
            coordinator.lists().add_blacklist(entry);
            CommandOutcome::ok()
        },
        Err(err) => CommandOutcome::err(err.to_string()),
    }
}

fn handle_aladd(coordinator: &Coordinator, args: &[&str]) -> CommandOutcome {
    let onion_arg = args.first().copied().unwrap_or("");
    let alias_arg = args.get(1).copied().unwrap_or("");
    let alias_type = match args.get(2).copied().unwrap_or("") {
        "" => AliasType::Rewrite,
        "0" | "Rewrite" | "rewrite" => AliasType::Rewrite,
        "1" | "Redirect" | "redirect" => AliasType::Redirect,
        other => return CommandOutcome::err(format!("invalid type: {other}")),
    };

    match AliasEntry::new(alias_arg, onion_arg, alias_type) {
        Ok(entry) => {
            coordinator.lists().add_alias(entry);
            CommandOutcome::ok()
        },
        Err(err) => CommandOutcome::err(err.to_string()),
    }
}

fn handle_remove(args: &[&str], f: impl FnOnce(&str) -> Result<(), crate::error::AppError>) -> CommandOutcome {
    let domain = args.first().copied().unwrap_or("");
    match f(domain) {
        Ok(()) => CommandOutcome::ok(),
        Err(err) => CommandOutcome::err(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{ConfigSnapshot, ControlConfig},
        coordinator::Coordinator,
        password,
    };

    #[test]
    fn splitting_preserves_skipped_optional_args() {
        let line = "BLADD dddd.onion  451 https://ex";
        let mut parts = line.split(' ');
        let _cmd = parts.next().unwrap();
        let args: Vec<&str> = parts.collect();
        // domain, "", "451", "https://ex": the skipped `name` is an empty token, `notes` absent.
        assert_eq!(args, vec!["dddd.onion", "", "451", "https://ex"]);
    }

    #[test]
    fn command_is_case_insensitive_via_uppercasing() {
        assert_eq!("noop".to_ascii_uppercase(), "NOOP");
    }

    fn base_config() -> ConfigSnapshot {
        ConfigSnapshot {
            tor_ip: "127.0.0.1".into(),
            tor_port: 9050,
            tor_timeout_ms: 5000,
            http_ip: "127.0.0.1".into(),
            http_port: 12243,
            dns_suffix: "example.com".into(),
            blacklist_path: None,
            alias_path: None,
            control: Some(ControlConfig {
                ip: "127.0.0.1".into(),
                port: 12244,
                password: Some(password::hash("hunter2")),
                cookie_path: None,
            }),
            non_anonymous_headers: Default::default(),
        }
    }

    /// Opens a connected loopback pair: one end is handed to `handle_connection` as the control
    /// socket, the other is driven by the test as the operator's client. Mirrors the pattern used
    /// in `pipeline.rs`'s tests.
    async fn connected_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (server, client)
    }

    /// Reads lines off `client` until a terminator (`OK` or `ERR`) is seen, returning the payload
    /// lines that preceded it plus whether the terminator was `OK`.
    async fn read_response<R>(client: &mut R) -> (Vec<String>, bool)
    where
        R: tokio::io::AsyncBufRead + Unpin,
    {
        let mut payload = Vec::new();
        loop {
            let mut line = String::new();
            let n = client.read_line(&mut line).await.unwrap();
            assert!(n > 0, "connection closed before a terminator line");
            let line = line.trim_end_matches(['\r', '\n']).to_string();
            match line.as_str() {
                "OK" => return (payload, true),
                "ERR" => return (payload, false),
                _ => payload.push(line),
            }
        }
    }

    async fn send_command(client: &mut TcpStream, command: &str) {
        client.write_all(format!("{command}\r\n").as_bytes()).await.unwrap();
    }

    #[tokio::test]
    async fn greeting_then_noop_round_trip() {
        let coordinator = Coordinator::new(base_config()).unwrap();
        let (server, client) = connected_pair().await;
        let (rd, mut wr) = client.into_split();
        let mut rd = BufReader::new(rd);
        let handled = tokio::spawn(async move {
            handle_connection(server, &coordinator).await;
        });

        let (greeting, greeting_ok) = read_response(&mut rd).await;
        assert_eq!(greeting.len(), 1);
        assert!(greeting[0].starts_with("Http2Socks "));
        assert!(greeting_ok);

        send_command(&mut wr, "NOOP").await;
        let (payload, ok) = read_response(&mut rd).await;
        assert!(payload.is_empty());
        assert!(ok);

        send_command(&mut wr, "EXIT").await;
        let (_, ok) = read_response(&mut rd).await;
        assert!(ok);
        drop(wr);
        handled.await.unwrap();
    }

    // Commands gated on authentication are refused before AUTH succeeds (spec.md §4.8's
    // Unauthenticated state).
    #[tokio::test]
    async fn gated_command_before_auth_is_rejected() {
        let coordinator = Coordinator::new(base_config()).unwrap();
        let (server, client) = connected_pair().await;
        let (rd, mut wr) = client.into_split();
        let mut rd = BufReader::new(rd);
        let handled = tokio::spawn(async move {
            handle_connection(server, &coordinator).await;
        });
        let _ = read_response(&mut rd).await; // greeting

        send_command(&mut wr, "HALT").await;
        let (payload, ok) = read_response(&mut rd).await;
        assert!(!ok);
        assert_eq!(payload, vec!["Not authenticated".to_string()]);

        send_command(&mut wr, "EXIT").await;
        let _ = read_response(&mut rd).await;
        drop(wr);
        handled.await.unwrap();
    }

    // AUTH succeeds against the configured password, a repeat AUTH is refused with the
    // "already authenticated" message, and INFO then reports the authenticated field set.
    #[tokio::test]
    async fn auth_then_info_reports_authenticated_state() {
        let coordinator = Coordinator::new(base_config()).unwrap();
        let (server, client) = connected_pair().await;
        let (rd, mut wr) = client.into_split();
        let mut rd = BufReader::new(rd);
        let handled = tokio::spawn(async move {
            handle_connection(server, &coordinator).await;
        });
        let _ = read_response(&mut rd).await; // greeting

        send_command(&mut wr, "AUTH hunter2").await;
        let (payload, ok) = read_response(&mut rd).await;
        assert!(ok);
        assert_eq!(payload, vec!["User authenticated".to_string()]);

        send_command(&mut wr, "AUTH hunter2").await;
        let (payload, ok) = read_response(&mut rd).await;
        assert!(!ok);
        assert_eq!(payload, vec!["User already authenticated".to_string()]);

        send_command(&mut wr, "INFO").await;
        let (payload, ok) = read_response(&mut rd).await;
        assert!(ok);
        assert!(payload.contains(&"AUTH=1".to_string()));
        assert!(payload.iter().any(|l| l.starts_with("HALT=")));

        send_command(&mut wr, "EXIT").await;
        let _ = read_response(&mut rd).await;
        drop(wr);
        handled.await.unwrap();
    }

    // Scenario 6 (spec.md §8): AUTH, then BLADD, then BLSAVE, then re-reading the file off disk
    // shows the persisted fields.
    #[tokio::test]
    async fn bladd_then_blsave_round_trips_to_disk() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut config = base_config();
        config.blacklist_path = Some(file.path().to_path_buf());
        let coordinator = Coordinator::new(config).unwrap();
        let (server, client) = connected_pair().await;
        let (rd, mut wr) = client.into_split();
        let mut rd = BufReader::new(rd);
        let handled = tokio::spawn(async move {
            handle_connection(server, &coordinator).await;
        });
        let _ = read_response(&mut rd).await; // greeting

        send_command(&mut wr, "AUTH hunter2").await;
        let _ = read_response(&mut rd).await;

        let domain = "d".repeat(56);
        send_command(&mut wr, &format!("BLADD {domain}.onion Test%20Name  451 https://ex")).await;
        let (_, ok) = read_response(&mut rd).await;
        assert!(ok);

        send_command(&mut wr, "BLSAVE").await;
        let (_, ok) = read_response(&mut rd).await;
        assert!(ok);

        send_command(&mut wr, "EXIT").await;
        let _ = read_response(&mut rd).await;
        drop(wr);
        handled.await.unwrap();

        let persisted = crate::ini_backend::load(file.path()).unwrap();
        let section = persisted.get(&format!("{domain}.onion")).unwrap();
        assert_eq!(section.get("Name").unwrap(), "Test Name");
        assert_eq!(section.get("Reason").unwrap(), "451");
        assert_eq!(section.get("URL").unwrap(), "https://ex");
    }

    // The unknown-command fallback must not leak a spurious blank payload line ahead of ERR.
    #[tokio::test]
    async fn unknown_command_returns_err_with_no_payload() {
        let coordinator = Coordinator::new(base_config()).unwrap();
        let (server, client) = connected_pair().await;
        let (rd, mut wr) = client.into_split();
        let mut rd = BufReader::new(rd);
        let handled = tokio::spawn(async move {
            handle_connection(server, &coordinator).await;
        });
        let _ = read_response(&mut rd).await; // greeting

        send_command(&mut wr, "BOGUS").await;
        let (payload, ok) = read_response(&mut rd).await;
        assert!(!ok);
        assert!(payload.is_empty());

        send_command(&mut wr, "EXIT").await;
        let _ = read_response(&mut rd).await;
        drop(wr);
        handled.await.unwrap();
    }
}
