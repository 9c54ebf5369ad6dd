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

//! In-memory alias and blacklist tables, each behind its own mutex.

mod entry;

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Mutex,
};

pub use entry::{validate_alias_label, AliasEntry, AliasType, BlacklistEntry, BlacklistReason};
use tracing::info;

use crate::error::AppError;

const LOG_TARGET: &str = "http2tor::lists";

#[derive(Default)]
pub struct ListsStore {
    blacklist: Mutex<HashMap<String, BlacklistEntry>>,
    aliases: Mutex<HashMap<String, AliasEntry>>,
}

impl ListsStore {
    pub fn new() -> Self {
        Self::default()
    }

    // --- Blacklist ---------------------------------------------------------------------------

    pub fn load_blacklist(&self, path: Option<&Path>) -> Result<(), AppError> {
        let Some(path) = path else {
            self.blacklist.lock().unwrap().clear();
            return Ok(());
        };
        let sections = crate::ini_backend::load(path).map_err(|err| AppError::ListParseError {
            path: path.display().to_string(),
            reason: err.to_string(),
        })?;
        let mut table = HashMap::new();
        for (domain, fields) in &sections {
            let entry = BlacklistEntry::from_ini_section(domain, fields).map_err(|err| AppError::ListParseError {
                path: path.display().to_string(),
                reason: err.to_string(),
            })?;
            table.insert(entry.domain.clone(), entry);
        }
        *self.blacklist.lock().unwrap() = table;
        Ok(())
    }

    pub fn save_blacklist(&self, path: Option<&Path>) -> Result<(), AppError> {
        let path = path.ok_or_else(|| AppError::ValidationError("no blacklist file configured".into()))?;
        let table = self.blacklist.lock().unwrap();
        let mut sections = crate::ini_backend::Sections::new();
        for entry in table.values() {
            sections.insert(entry.domain.clone(), entry.to_ini_fields());
        }
        crate::ini_backend::save(path, &sections)
    }

    pub fn add_blacklist(&self, entry: BlacklistEntry) {
        self.blacklist.lock().unwrap().insert(entry.domain.clone(), entry);
    }

    /// Removes the entry for `domain` (normalized). Returns an error if `domain` does not
    /// normalize as a valid onion address.
    pub fn remove_blacklist(&self, domain: &str) -> Result<(), AppError> {
        let normalized = crate::onion::normalize(domain)
            .ok_or_else(|| AppError::ValidationError(format!("invalid onion address: {domain:?}")))?;
        self.blacklist.lock().unwrap().remove(&normalized);
        Ok(())
    }

    pub fn blacklisted(&self, onion: &str) -> Option<BlacklistEntry> {
        self.blacklist.lock().unwrap().get(onion).cloned()
    }

    pub fn list_blacklist_ini_text(&self) -> String {
        let table = self.blacklist.lock().unwrap();
        let mut sections = crate::ini_backend::Sections::new();
        for entry in table.values() {
            sections.insert(entry.domain.clone(), entry.to_ini_fields());
        }
        render_ini(&sections)
    }

    // --- Aliases -------------------------------------------------------------------------------

    pub fn load_aliases(&self, path: Option<&Path>) -> Result<(), AppError> {
        let Some(path) = path else {
            self.aliases.lock().unwrap().clear();
            return Ok(());
        };
        let sections = crate::ini_backend::load(path).map_err(|err| AppError::ListParseError {
            path: path.display().to_string(),
            reason: err.to_string(),
        })?;
        let mut table = HashMap::new();
        let mut onions_seen = std::collections::HashSet::new();
        let mut aliases_seen = std::collections::HashSet::new();
        for (alias, fields) in &sections {
            let entry = AliasEntry::from_ini_section(alias, fields).map_err(|err| AppError::ListParseError {
                path: path.display().to_string(),
                reason: err.to_string(),
            })?;
            if !aliases_seen.insert(entry.alias.clone()) {
                return Err(AppError::ListParseError {
                    path: path.display().to_string(),
                    reason: format!("duplicate alias label {:?} across aliases", entry.alias),
                });
            }
            if !onions_seen.insert(entry.onion.clone()) {
                return Err(AppError::ListParseError {
                    path: path.display().to_string(),
                    reason: format!("duplicate onion target {:?} across aliases", entry.onion),
                });
            }
            table.insert(entry.alias.clone(), entry);
        }
        *self.aliases.lock().unwrap() = table;
        Ok(())
    }

    pub fn save_aliases(&self, path: Option<&Path>) -> Result<(), AppError> {
        let path = path.ok_or_else(|| AppError::ValidationError("no alias file configured".into()))?;
        let table = self.aliases.lock().unwrap();
        let mut sections = crate::ini_backend::Sections::new();
        for entry in table.values() {
            sections.insert(entry.alias.clone(), entry.to_ini_fields());
        }
        crate::ini_backend::save(path, &sections)
    }

    /// Inserts `entry`, first removing any existing entry that shares either its `alias` or its
    /// `onion` target (the ALADD invariant: no two aliases share an alias label or an onion target).
    pub fn add_alias(&self, entry: AliasEntry) {
        let mut table = self.aliases.lock().unwrap();
        table.retain(|_, existing| existing.alias != entry.alias && existing.onion != entry.onion);
        table.insert(entry.alias.clone(), entry);
    }

    pub fn remove_alias(&self, alias: &str) {
        self.aliases.lock().unwrap().remove(&alias.to_ascii_lowercase());
    }

    /// Removes whichever alias entry (if any) targets the given normalized onion address.
    /// `ALREMOVE` takes an onion address, not an alias label - see DESIGN.md.
    pub fn remove_alias_by_onion(&self, onion: &str) {
        self.aliases.lock().unwrap().retain(|_, entry| entry.onion != onion);
    }

    pub fn alias_for(&self, label: &str) -> Option<AliasEntry> {
        self.aliases.lock().unwrap().get(&label.to_ascii_lowercase()).cloned()
    }

    pub fn list_aliases_ini_text(&self) -> String {
        let table = self.aliases.lock().unwrap();
        let mut sections = crate::ini_backend::Sections::new();
        for entry in table.values() {
            sections.insert(entry.alias.clone(), entry.to_ini_fields());
        }
        render_ini(&sections)
    }
}

fn render_ini(sections: &crate::ini_backend::Sections) -> String {
    let mut out = String::new();
    for (name, fields) in sections {
        out.push_str(&format!("[{name}]\n"));
        for (key, value) in fields {
            out.push_str(&format!("{key}={value}\n"));
        }
    }
    out
}

/// Loads both tables from `blacklist_path`/`alias_path`, logging the resulting entry counts.
pub fn load_all(store: &ListsStore, blacklist_path: Option<&PathBuf>, alias_path: Option<&PathBuf>) -> Result<(), AppError> {
    store.load_blacklist(blacklist_path.map(|p| p.as_path()))?;
    store.load_aliases(alias_path.map(|p| p.as_path()))?;
    info!(target: LOG_TARGET, "lists loaded");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const V3A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const V3B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
    const V3C: &str = "cccccccccccccccccccccccccccccccccccccccccccccccccccccc";

    #[test]
    fn alias_table_enforces_uniqueness_of_alias_and_onion() {
        let store = ListsStore::new();
        store.add_alias(AliasEntry::new("short", V3A, AliasType::Rewrite).unwrap());
        // Re-adding the same alias with a different onion replaces the old entry.
        store.add_alias(AliasEntry::new("short", V3B, AliasType::Rewrite).unwrap());
        assert_eq!(store.alias_for("short").unwrap().onion, format!("{V3B}.onion"));

        // Adding a different alias pointing at the same onion evicts the earlier one.
        store.add_alias(AliasEntry::new("other", V3B, AliasType::Redirect).unwrap());
        assert!(store.alias_for("short").is_none());
        assert_eq!(store.alias_for("other").unwrap().onion, format!("{V3B}.onion"));
    }

    #[test]
    fn bladd_then_blremove_clears_entry() {
        let store = ListsStore::new();
        store.add_blacklist(BlacklistEntry::new(V3C, None, None, BlacklistReason::Forbidden, None).unwrap());
        assert!(store.blacklisted(&format!("{V3C}.onion")).is_some());
        store.remove_blacklist(V3C).unwrap();
        assert!(store.blacklisted(&format!("{V3C}.onion")).is_none());
    }

    #[test]
    fn remove_blacklist_rejects_invalid_domain() {
        let store = ListsStore::new();
        assert!(store.remove_blacklist("not-an-onion").is_err());
    }

    #[test]
    fn load_with_no_path_clears_table() {
        let store = ListsStore::new();
        store.add_alias(AliasEntry::new("short", V3A, AliasType::Rewrite).unwrap());
        store.load_aliases(None).unwrap();
        assert!(store.alias_for("short").is_none());
    }

    // Two sections differing only by case normalize to the same alias label; load must reject
    // the file rather than silently letting the second overwrite the first.
    #[test]
    fn load_aliases_rejects_duplicate_alias_label_differing_only_by_case() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(
            file.path(),
            format!("[Short]\nOnion={V3A}.onion\nType=0\n\n[short]\nOnion={V3B}.onion\nType=0\n"),
        )
        .unwrap();

        let store = ListsStore::new();
        let err = store.load_aliases(Some(file.path())).unwrap_err();
        assert!(err.to_string().contains("duplicate alias label"));
    }
}
