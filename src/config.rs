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

//! Loads and validates the `[TOR]/[HTTP]/[DNS]/[Control]/[Security]` INI sections into an
//! immutable [`ConfigSnapshot`]. Like [`crate::lists`], all domain parsing happens on top of the
//! thin [`crate::ini_backend`] wrapper rather than inside it.

use std::{
    collections::BTreeSet,
    net::IpAddr,
    path::{Path, PathBuf},
};

use tracing::info;

use crate::{error::AppError, ini_backend, password};

const LOG_TARGET: &str = "http2tor::config";

const DEFAULT_TOR_TIMEOUT_MS: u64 = 5000;
const DEFAULT_HTTP_PORT: u16 = 12243;
const DEFAULT_CONTROL_PORT: u16 = 12244;

#[derive(Debug, Clone)]
pub struct ControlConfig {
    pub ip: String,
    pub port: u16,
    pub password: Option<String>,
    pub cookie_path: Option<PathBuf>,
}

/// Immutable once loaded - every field here lives for the rest of the process.
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    pub tor_ip: String,
    pub tor_port: u16,
    pub tor_timeout_ms: u64,
    pub http_ip: String,
    pub http_port: u16,
    pub dns_suffix: String,
    pub blacklist_path: Option<PathBuf>,
    pub alias_path: Option<PathBuf>,
    pub control: Option<ControlConfig>,
    pub non_anonymous_headers: BTreeSet<String>,
}

/// Loads `path`, validating every recognized option. If `[Control]` carries a plaintext
/// `Password`, it is rehashed in place and the file is rewritten once; the raw
/// section map (not just the fields this module understands) is written back so unrelated keys
/// survive the round trip.
pub fn load(path: &Path) -> Result<ConfigSnapshot, AppError> {
    let mut sections = ini_backend::load(path)?;

    let tor = section(&sections, "TOR")?;
    let tor_ip = require(tor, "IP")?;
    valid_ip(&tor_ip)?;
    let tor_port = parse_bounded_port(tor, "Port", None)?;
    let tor_timeout_ms = match tor.get("Timeout") {
        Some(s) => s
            .parse::<u64>()
            .ok()
            .filter(|&t| t >= 1)
            .ok_or_else(|| AppError::ConfigInvalid(format!("[TOR] Timeout must be an integer >= 1, got {s:?}")))?,
        None => DEFAULT_TOR_TIMEOUT_MS,
    };

    let http = section(&sections, "HTTP")?;
    let http_ip = require(http, "IP")?;
    valid_ip(&http_ip)?;
    let http_port = parse_bounded_port(http, "Port", Some(DEFAULT_HTTP_PORT))?;

    let dns = section(&sections, "DNS")?;
    let dns_suffix = require(dns, "Suffix")?;
    validate_suffix(&dns_suffix)?;
    let blacklist_path = dns.get("Blacklist").filter(|s| !s.is_empty()).map(PathBuf::from);
    let alias_path = dns.get("Alias").filter(|s| !s.is_empty()).map(PathBuf::from);

    let non_anonymous_headers = sections
        .get("Security")
        .and_then(|fields| fields.get("NonAnonymousHeaders"))
        .map(|s| {
            s.split(',')
                .map(|h| h.trim().to_ascii_lowercase())
                .filter(|h| !h.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let mut rewrite = false;
    let control = if sections.contains_key("Control") {
        let control_fields = sections.get("Control").unwrap();
        let ip = control_fields
            .get("IP")
            .cloned()
            .ok_or_else(|| AppError::ConfigInvalid("[Control] section present but IP missing".into()))?;
        valid_ip(&ip)?;
        let port = parse_bounded_port(control_fields, "Port", Some(DEFAULT_CONTROL_PORT))?;
        let password_raw = control_fields.get("Password").filter(|s| !s.is_empty()).cloned();
        let cookie_path = control_fields.get("Cookie").filter(|s| !s.is_empty()).map(PathBuf::from);

        if password_raw.is_none() && cookie_path.is_none() {
            return Err(AppError::ConfigInvalid(
                "[Control] section requires at least one of Password or Cookie".into(),
            ));
        }

        let password = match password_raw {
            Some(raw) if password::is_hashed(&raw) => Some(raw),
            Some(plaintext) => {
                let hashed = password::hash(&plaintext);
                if let Some(fields) = sections.get_mut("Control") {
                    fields.insert("Password".to_string(), hashed.clone());
                }
                rewrite = true;
                info!(target: LOG_TARGET, "rehashed plaintext [Control] Password on first run");
                Some(hashed)
            },
            None => None,
        };

        Some(ControlConfig { ip, port, password, cookie_path })
    } else {
        None
    };

    if rewrite {
        ini_backend::save(path, &sections)?;
    }

    Ok(ConfigSnapshot {
        tor_ip,
        tor_port,
        tor_timeout_ms,
        http_ip,
        http_port,
        dns_suffix,
        blacklist_path,
        alias_path,
        control,
        non_anonymous_headers,
    })
}

fn section<'a>(
    sections: &'a ini_backend::Sections,
    name: &str,
) -> Result<&'a std::collections::BTreeMap<String, String>, AppError> {
    sections
        .get(name)
        .ok_or_else(|| AppError::ConfigInvalid(format!("missing required [{name}] section")))
}

fn require(fields: &std::collections::BTreeMap<String, String>, key: &str) -> Result<String, AppError> {
    fields
        .get(key)
        .filter(|s| !s.is_empty())
        .cloned()
        .ok_or_else(|| AppError::ConfigInvalid(format!("missing required key {key:?}")))
}

fn valid_ip(s: &str) -> Result<(), AppError> {
    s.parse::<IpAddr>()
        .map(|_| ())
        .map_err(|_| AppError::ConfigInvalid(format!("not a valid IP literal: {s:?}")))
}

fn parse_bounded_port(
    fields: &std::collections::BTreeMap<String, String>,
    key: &str,
    default: Option<u16>,
) -> Result<u16, AppError> {
    match fields.get(key) {
        Some(s) => s
            .parse::<u32>()
            .ok()
            .filter(|&p| (1..=65534).contains(&p))
            .map(|p| p as u16)
            .ok_or_else(|| AppError::ConfigInvalid(format!("{key} must be in 1..=65534, got {s:?}"))),
        None => default.ok_or_else(|| AppError::ConfigInvalid(format!("missing required key {key:?}"))),
    }
}

/// Non-empty, no leading or trailing dot.
fn validate_suffix(suffix: &str) -> Result<(), AppError> {
    if suffix.is_empty() || suffix.starts_with('.') || suffix.ends_with('.') {
        return Err(AppError::ConfigInvalid(format!("invalid DNS suffix: {suffix:?}")));
    }
    Ok(())
}
