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

//! Cookie-secret generation and salted HMAC-SHA256 password hashing.

use base64::{engine::general_purpose::STANDARD, Engine};
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, RngCore};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::AppError;

const SALT_LEN: usize = 18;
const COOKIE_LEN: usize = 33;
const RECORD_PREFIX: &str = "ENC:";

type HmacSha256 = Hmac<Sha256>;

/// True if `s` has the shape `ENC:<salt>:<digest>` (a hashed password record, not a plaintext
/// one waiting to be hashed on first run).
pub fn is_hashed(s: &str) -> bool {
    let Some(rest) = s.strip_prefix(RECORD_PREFIX) else {
        return false;
    };
    match rest.split_once(':') {
        Some((salt, digest)) => !salt.is_empty() && !digest.is_empty(),
        None => false,
    }
}

/// Generates an 18-byte CSPRNG salt, computes `HMAC-SHA256(salt, password)`, and returns
/// `ENC:<b64 salt>:<b64 digest>`.
pub fn hash(password: &str) -> String {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    let digest = hmac_digest(&salt, password.as_bytes());
    format!(
        "{RECORD_PREFIX}{}:{}",
        STANDARD.encode(salt),
        STANDARD.encode(digest)
    )
}

/// Recomputes the HMAC over `candidate` using the salt embedded in `record` and compares the
/// result to the stored digest in constant time.
pub fn verify(candidate: &str, record: &str) -> bool {
    let Some(rest) = record.strip_prefix(RECORD_PREFIX) else {
        return false;
    };
    let Some((salt_b64, digest_b64)) = rest.split_once(':') else {
        return false;
    };
    let (Ok(salt), Ok(expected)) = (STANDARD.decode(salt_b64), STANDARD.decode(digest_b64)) else {
        return false;
    };
    let actual = hmac_digest(&salt, candidate.as_bytes());
    actual.ct_eq(&expected).into()
}

fn hmac_digest(salt: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(salt).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// A fresh bearer token for the control port: 33 random bytes, base64-encoded.
pub fn new_cookie() -> Result<String, AppError> {
    let mut bytes = [0u8; COOKIE_LEN];
    OsRng.fill_bytes(&mut bytes);
    Ok(STANDARD.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify_round_trips() {
        let record = hash("hunter2");
        assert!(is_hashed(&record));
        assert!(verify("hunter2", &record));
        assert!(!verify("wrong", &record));
    }

    #[test]
    fn different_hashes_use_different_salts() {
        assert_ne!(hash("same"), hash("same"));
    }

    #[test]
    fn plaintext_is_not_hashed() {
        assert!(!is_hashed("hunter2"));
        assert!(!is_hashed("ENC:missingcolon"));
    }

    #[test]
    fn cookie_is_url_safe_length() {
        let cookie = new_cookie().unwrap();
        assert!(!cookie.is_empty());
        assert!(cookie.chars().all(|c| c.is_ascii_graphic()));
    }
}
