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

//! Owns every piece of process-wide shared state: the config snapshot, the list tables, the halt
//! flag, the cookie secret, and the auth throttle. Wires up and tears down the two listeners.

use std::{
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex as StdMutex,
    },
};

use regex::Regex;
use tokio::{net::TcpListener, sync::Mutex as TokioMutex, task::JoinHandle};
use tracing::info;

use crate::{config::ConfigSnapshot, control, error::AppError, lists, lists::ListsStore, password, pipeline};

const LOG_TARGET: &str = "http2tor::coordinator";

pub struct Coordinator {
    config: ConfigSnapshot,
    lists: ListsStore,
    halt: AtomicBool,
    cookie: Option<String>,
    auth_throttle: TokioMutex<()>,
    host_pattern: Regex,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

impl Coordinator {
    /// Loads the list files, generates and persists a fresh cookie secret if one is configured,
    /// and returns a `Coordinator` ready to `run()`. Does not bind any listener yet.
    pub fn new(config: ConfigSnapshot) -> Result<Arc<Self>, AppError> {
        let lists = ListsStore::new();
        lists::load_all(&lists, config.blacklist_path.as_deref(), config.alias_path.as_deref())?;

        let cookie = match config.control.as_ref().and_then(|c| c.cookie_path.as_ref()) {
            Some(path) => {
                let token = password::new_cookie()?;
                std::fs::write(path, &token)?;
                info!(target: LOG_TARGET, path = %path.display(), "wrote fresh control cookie");
                Some(token)
            },
            None => None,
        };

        let host_pattern = Regex::new(&format!(r"(?i)^(.+)\.{}(:\d+)?$", regex::escape(&config.dns_suffix)))
            .map_err(|err| AppError::ConfigInvalid(format!("invalid DNS suffix {:?}: {err}", config.dns_suffix)))?;

        Ok(Arc::new(Self {
            config,
            lists,
            halt: AtomicBool::new(false),
            cookie,
            auth_throttle: TokioMutex::new(()),
            host_pattern,
            tasks: StdMutex::new(Vec::new()),
        }))
    }

    /// Binds and spawns the HTTP listener, plus the control listener if configured. Bind
    /// failures are fatal and are returned to the caller rather than logged and
    /// swallowed.
    pub async fn run(self: &Arc<Self>) -> Result<(), AppError> {
        let http_listener =
            TcpListener::bind((self.config.http_ip.as_str(), self.config.http_port))
                .await
                .map_err(|source| AppError::BindFailure {
                    addr: format!("{}:{}", self.config.http_ip, self.config.http_port),
                    source,
                })?;
        info!(target: LOG_TARGET, addr = %format!("{}:{}", self.config.http_ip, self.config.http_port), "HTTP listener bound");

        let coordinator = self.clone();
        let http_handle = tokio::spawn(async move {
            pipeline::run(http_listener, coordinator).await;
        });
        self.tasks.lock().unwrap().push(http_handle);

        if let Some(control_cfg) = &self.config.control {
            let control_listener = TcpListener::bind((control_cfg.ip.as_str(), control_cfg.port))
                .await
                .map_err(|source| AppError::BindFailure {
                    addr: format!("{}:{}", control_cfg.ip, control_cfg.port),
                    source,
                })?;
            info!(target: LOG_TARGET, addr = %format!("{}:{}", control_cfg.ip, control_cfg.port), "control listener bound");

            let coordinator = self.clone();
            let control_handle = tokio::spawn(async move {
                control::run(control_listener, coordinator).await;
            });
            self.tasks.lock().unwrap().push(control_handle);
        }

        Ok(())
    }

    /// Stops both listeners. In-flight per-connection tasks are left to finish on their own:
    /// they notice their socket is gone and exit.
    pub fn stop(&self) {
        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
    }

    pub fn config(&self) -> &ConfigSnapshot {
        &self.config
    }

    pub fn host_pattern(&self) -> &Regex {
        &self.host_pattern
    }

    pub fn control_greeting_url(&self) -> String {
        format!("http://{}:{}", self.config.http_ip, self.config.http_port)
    }

    pub fn set_halt(&self, halted: bool) {
        self.halt.store(halted, Ordering::SeqCst);
    }

    pub fn is_halted(&self) -> bool {
        self.halt.load(Ordering::SeqCst)
    }

    pub fn lists(&self) -> &ListsStore {
        &self.lists
    }

    pub fn blacklist_path(&self) -> Option<&Path> {
        self.config.blacklist_path.as_deref()
    }

    pub fn alias_path(&self) -> Option<&Path> {
        self.config.alias_path.as_deref()
    }

    pub fn auth_throttle(&self) -> &TokioMutex<()> {
        &self.auth_throttle
    }

    /// Succeeds if a hashed password is configured and verifies, or a cookie secret is configured
    /// and matches exactly (no extra timing constraint on the cookie path beyond the 500 ms gate
    /// every `AUTH` attempt already pays).
    pub fn check_credentials(&self, candidate: &str) -> bool {
        let Some(control) = self.config.control.as_ref() else {
            return false;
        };
        if let Some(record) = &control.password {
            if password::verify(candidate, record) {
                return true;
            }
        }
        if let Some(cookie) = &self.cookie {
            if cookie == candidate {
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ControlConfig;

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
            control: None,
            non_anonymous_headers: Default::default(),
        }
    }

    #[test]
    fn check_credentials_false_with_no_control_section() {
        let coordinator = Coordinator::new(base_config()).unwrap();
        assert!(!coordinator.check_credentials("anything"));
    }

    #[test]
    fn check_credentials_verifies_hashed_password() {
        let mut config = base_config();
        config.control = Some(ControlConfig {
            ip: "127.0.0.1".into(),
            port: 12244,
            password: Some(crate::password::hash("hunter2")),
            cookie_path: None,
        });
        let coordinator = Coordinator::new(config).unwrap();
        assert!(coordinator.check_credentials("hunter2"));
        assert!(!coordinator.check_credentials("wrong"));
    }

    #[test]
    fn halt_flag_round_trips() {
        let coordinator = Coordinator::new(base_config()).unwrap();
        assert!(!coordinator.is_halted());
        coordinator.set_halt(true);
        assert!(coordinator.is_halted());
        coordinator.set_halt(false);
        assert!(!coordinator.is_halted());
    }

    #[test]
    fn host_pattern_matches_suffix_with_optional_port() {
        let coordinator = Coordinator::new(base_config()).unwrap();
        let caps = coordinator.host_pattern().captures("short.onion.example.com").unwrap();
        assert_eq!(&caps[1], "short.onion");
        assert!(caps.get(2).is_none());

        let caps = coordinator.host_pattern().captures("short.onion.example.com:8080").unwrap();
        assert_eq!(&caps[2], ":8080");
    }
}
