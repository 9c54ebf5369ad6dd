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

//! Alias and blacklist entry types. Sum-type-free by design: each is a plain record with its own
//! `validate`/ini conversion methods rather than a shared base class (see DESIGN.md, REDESIGN FLAGS).

use std::collections::BTreeMap;

use regex::Regex;
use url::Url;

use crate::{error::AppError, onion};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliasType {
    Rewrite,
    Redirect,
}

impl AliasType {
    fn as_ini_str(self) -> &'static str {
        match self {
            AliasType::Rewrite => "0",
            AliasType::Redirect => "1",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "0" | "rewrite" => Some(AliasType::Rewrite),
            "1" | "redirect" => Some(AliasType::Redirect),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlacklistReason {
    Forbidden,
    LegalReasons,
}

impl BlacklistReason {
    pub fn status_code(self) -> u16 {
        match self {
            BlacklistReason::Forbidden => 403,
            BlacklistReason::LegalReasons => 451,
        }
    }

    fn as_ini_str(self) -> &'static str {
        match self {
            BlacklistReason::Forbidden => "403",
            BlacklistReason::LegalReasons => "451",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "403" | "Forbidden" | "forbidden" => Some(BlacklistReason::Forbidden),
            "451" | "LegalReasons" | "legalreasons" => Some(BlacklistReason::LegalReasons),
            _ => None,
        }
    }
}

fn alias_label_re() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]+$").unwrap())
}

/// Validates the DNS-label shape an alias is required to have: `[A-Za-z0-9_-]+`, not starting with `-`,
/// no `--`, no `.`.
pub fn validate_alias_label(label: &str) -> Result<(), AppError> {
    if label.is_empty() || !alias_label_re().is_match(label) {
        return Err(AppError::ValidationError(format!("invalid alias label: {label:?}")));
    }
    if label.starts_with('-') || label.contains("--") || label.contains('.') {
        return Err(AppError::ValidationError(format!("invalid alias label: {label:?}")));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct AliasEntry {
    pub alias: String,
    pub onion: onion::OnionAddress,
    pub alias_type: AliasType,
}

impl AliasEntry {
    pub fn new(alias: &str, onion_input: &str, alias_type: AliasType) -> Result<Self, AppError> {
        let alias = alias.to_ascii_lowercase();
        validate_alias_label(&alias)?;
        let onion = onion::normalize(onion_input)
            .ok_or_else(|| AppError::ValidationError(format!("invalid onion address: {onion_input:?}")))?;
        Ok(Self { alias, onion, alias_type })
    }

    pub(crate) fn from_ini_section(alias: &str, fields: &BTreeMap<String, String>) -> Result<Self, AppError> {
        let onion_raw = fields
            .get("Onion")
            .ok_or_else(|| AppError::ValidationError(format!("alias {alias:?} missing Onion")))?;
        let alias_type = fields
            .get("Type")
            .map(|s| AliasType::parse(s).ok_or_else(|| AppError::ValidationError(format!("bad Type for {alias:?}"))))
            .transpose()?
            .unwrap_or(AliasType::Rewrite);
        AliasEntry::new(alias, onion_raw, alias_type)
    }

    pub(crate) fn to_ini_fields(&self) -> BTreeMap<String, String> {
        let mut m = BTreeMap::new();
        m.insert("Onion".to_string(), self.onion.clone());
        m.insert("Type".to_string(), self.alias_type.as_ini_str().to_string());
        m
    }
}

#[derive(Debug, Clone)]
pub struct BlacklistEntry {
    pub domain: onion::OnionAddress,
    pub name: Option<String>,
    pub notes: Option<String>,
    pub reason: BlacklistReason,
    pub url: Option<String>,
}

fn no_crlf(s: &str) -> Result<(), AppError> {
    if s.contains('\r') || s.contains('\n') {
        Err(AppError::ValidationError("value may not contain CR or LF".into()))
    } else {
        Ok(())
    }
}

impl BlacklistEntry {
    pub fn new(
        domain_input: &str,
        name: Option<String>,
        notes: Option<String>,
        reason: BlacklistReason,
        url: Option<String>,
    ) -> Result<Self, AppError> {
        let domain = onion::normalize(domain_input)
            .ok_or_else(|| AppError::ValidationError(format!("invalid onion address: {domain_input:?}")))?;
        if let Some(n) = &name {
            no_crlf(n)?;
        }
        if let Some(n) = &notes {
            no_crlf(n)?;
        }
        if let Some(u) = &url {
            Url::parse(u).map_err(|_| AppError::ValidationError(format!("invalid URL: {u:?}")))?;
        }
        Ok(Self { domain, name, notes, reason, url })
    }

    pub(crate) fn from_ini_section(domain: &str, fields: &BTreeMap<String, String>) -> Result<Self, AppError> {
        let reason = fields
            .get("Reason")
            .map(|s| BlacklistReason::parse(s).ok_or_else(|| AppError::ValidationError(format!("bad Reason for {domain:?}"))))
            .transpose()?
            .unwrap_or(BlacklistReason::Forbidden);
        let name = fields.get("Name").cloned().filter(|s| !s.is_empty());
        let notes = fields.get("Notes").cloned().filter(|s| !s.is_empty());
        let url = fields.get("URL").cloned().filter(|s| !s.is_empty());
        BlacklistEntry::new(domain, name, notes, reason, url)
    }

    pub(crate) fn to_ini_fields(&self) -> BTreeMap<String, String> {
        let mut m = BTreeMap::new();
        if let Some(n) = &self.name {
            m.insert("Name".to_string(), n.clone());
        }
        if let Some(n) = &self.notes {
            m.insert("Notes".to_string(), n.clone());
        }
        m.insert("Reason".to_string(), self.reason.as_ini_str().to_string());
        if let Some(u) = &self.url {
            m.insert("URL".to_string(), u.clone());
        }
        m
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const V3: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    #[test]
    fn alias_label_rules() {
        assert!(validate_alias_label("short").is_ok());
        assert!(validate_alias_label("short_name").is_ok());
        assert!(validate_alias_label("-bad").is_err());
        assert!(validate_alias_label("ba--d").is_err());
        assert!(validate_alias_label("ba.d").is_err());
        assert!(validate_alias_label("").is_err());
    }

    #[test]
    fn blacklist_entry_rejects_crlf_in_name() {
        let err = BlacklistEntry::new(V3, Some("bad\r\nname".into()), None, BlacklistReason::Forbidden, None);
        assert!(err.is_err());
    }

    #[test]
    fn blacklist_entry_rejects_bad_url() {
        let err = BlacklistEntry::new(V3, None, None, BlacklistReason::LegalReasons, Some("not a url".into()));
        assert!(err.is_err());
    }

    #[test]
    fn alias_entry_normalizes_onion() {
        let entry = AliasEntry::new("short", &V3.to_ascii_uppercase(), AliasType::Redirect).unwrap();
        assert_eq!(entry.onion, format!("{V3}.onion"));
        assert_eq!(entry.alias, "short");
    }
}
