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

//! All errors that can occur in `http2tor`.

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    ConfigInvalid(String),
    #[error("Failed to bind listener on {addr}: {source}")]
    BindFailure { addr: String, source: io::Error },
    #[error("Protocol error: {0}")]
    ProtocolError(String),
    #[error("SOCKS4a request rejected by proxy (reply byte {0:#04x})")]
    DialRejected(u8),
    #[error("SOCKS4a connect to {0} timed out")]
    DialTimeout(String),
    #[error("Authentication failed")]
    AuthFailure,
    #[error("Failed to parse list file {path}: {reason}")]
    ListParseError { path: String, reason: String },
    #[error("Validation failed: {0}")]
    ValidationError(String),
    #[error("I/O error: {0}")]
    IoFailure(#[from] io::Error),
    #[error("INI error: {0}")]
    IniError(String),
}

impl From<ini::Error> for AppError {
    fn from(err: ini::Error) -> Self {
        AppError::IniError(err.to_string())
    }
}

impl From<ini::ParseError> for AppError {
    fn from(err: ini::ParseError) -> Self {
        AppError::IniError(err.to_string())
    }
}
