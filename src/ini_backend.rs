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

//! Thin wrapper over the `ini` crate providing a read/write-nested-sections contract: no comment
//! preservation, no type coercion, just ordered sections of string key/value pairs. All domain
//! parsing happens one layer up, in [`super::entry`] and [`super::ListsStore`].

use std::{collections::BTreeMap, path::Path};

use ini::Ini;

use crate::error::AppError;

pub type Sections = BTreeMap<String, BTreeMap<String, String>>;

fn reject_reserved_bytes(s: &str) -> Result<(), AppError> {
    if s.contains('=') || s.chars().any(|c| c.is_control()) {
        return Err(AppError::ConfigInvalid(format!(
            "name {s:?} contains a control character or '='"
        )));
    }
    Ok(())
}

/// Loads every section (including the nameless default section, which this contract ignores -
/// callers key off named sections only) into an ordered map.
pub fn load(path: &Path) -> Result<Sections, AppError> {
    let ini = Ini::load_from_file(path)?;
    let mut sections = Sections::new();
    for (section, properties) in ini.iter() {
        let Some(name) = section else { continue };
        let mut fields = BTreeMap::new();
        for (key, value) in properties.iter() {
            fields.insert(key.to_string(), value.to_string());
        }
        sections.insert(name.to_string(), fields);
    }
    Ok(sections)
}

/// Serializes `sections` to `path`, rejecting any section/key name containing `=` or a control
/// character.
pub fn save(path: &Path, sections: &Sections) -> Result<(), AppError> {
    let mut ini = Ini::new();
    for (section, fields) in sections {
        reject_reserved_bytes(section)?;
        for (key, value) in fields {
            reject_reserved_bytes(key)?;
            ini.with_section(Some(section.as_str())).set(key.as_str(), value.as_str());
        }
    }
    ini.write_to_file(path)?;
    Ok(())
}
