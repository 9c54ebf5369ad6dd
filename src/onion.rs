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

//! Normalization and validation of Tor onion addresses.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use regex::Regex;

/// Bytes left unescaped by `url_encode`: alphanumerics plus a handful of characters that are
/// common enough in plain text (and harmless in a control-protocol argument) to leave readable.
const UNRESERVED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// A normalized v3 onion address: 56 lowercase base32 characters followed by `.onion`.
pub type OnionAddress = String;

fn v3_pattern() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^(?:.*\.)?([a-z2-7]{56})(?:\.onion)?$").unwrap())
}

fn v2_pattern() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^(?:.*\.)?([a-z2-7]{16})(?:\.onion)?$").unwrap())
}

/// Case-insensitively match a v3 onion label, optionally prefixed by sub-labels and suffixed by
/// `.onion`, and return the normalized `<56 lowercase chars>.onion` form.
pub fn normalize(input: &str) -> Option<OnionAddress> {
    let caps = v3_pattern().captures(input)?;
    let label = caps.get(1)?.as_str().to_ascii_lowercase();
    Some(format!("{label}.onion"))
}

/// True if `input` has the shape of a v2 (16-char) onion label. Used only to distinguish a
/// v2 address from outright garbage so the pipeline can report 410 Gone with an accurate message.
pub fn is_v2(input: &str) -> bool {
    v2_pattern().is_match(input)
}

/// `+` becomes space, then the remainder is percent-decoded (`application/x-www-form-urlencoded`).
pub fn url_decode(s: &str) -> String {
    let replaced = s.replace('+', " ");
    percent_decode_str(&replaced).decode_utf8_lossy().into_owned()
}

/// Percent-encode reserved bytes, then replace the encoded space (`%20`) with `+`.
pub fn url_encode(s: &str) -> String {
    utf8_percent_encode(s, UNRESERVED).to_string().replace("%20", "+")
}
