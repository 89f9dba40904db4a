// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Host identity.
//!
//! One [`HostContext`] value is constructed per invocation and threaded into
//! whatever needs to know which machine it is running on. The `--simulate
//! role:host` flag builds an alternate context instead of mutating shared
//! state, so testing with a foreign identity is just constructing a
//! different value.

use crate::path;
use std::{env, path::Path, process::Command};

/// What this host is for, relative to the fleet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Runs containerized units itself.
    Executor,

    /// Dispatches lifecycle commands to executors remotely.
    Orchestrator,
}

/// Identity of the machine the current invocation runs on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostContext {
    /// Short hostname, as executors are named in the `run:` section.
    pub hostname: String,

    /// Executor or orchestrator.
    pub role: Role,
}

impl HostContext {
    /// Construct new host context.
    pub fn new(hostname: impl Into<String>, role: Role) -> Self {
        Self {
            hostname: hostname.into(),
            role,
        }
    }

    /// Detect identity for a given site folder.
    ///
    /// A host whose site folder is `/srv/run` is expected to run units; any
    /// other folder (or none) means this machine merely orchestrates.
    pub fn detect(site_folder: Option<&Path>) -> Self {
        let role = if site_folder == Some(path::srv_run()) {
            Role::Executor
        } else {
            Role::Orchestrator
        };

        Self {
            hostname: local_hostname(),
            role,
        }
    }

    /// Apply a `role:host` simulation override.
    ///
    /// Either half may be left out: `executor:` flips the role only,
    /// `:rph` the hostname only, `rph` likewise the hostname only.
    pub fn simulate(mut self, spec: &str) -> Self {
        let (role, hostname) = match spec.rsplit_once(':') {
            Some((role, hostname)) => (role, hostname),
            None => ("", spec),
        };

        if !role.is_empty() {
            self.role = if role.starts_with('e') {
                Role::Executor
            } else {
                Role::Orchestrator
            };
        }

        if !hostname.is_empty() {
            self.hostname = hostname.to_owned();
        }

        self
    }

    /// True if this host is supposed to run docker services.
    pub fn is_executor(&self) -> bool {
        self.role == Role::Executor
    }

    /// True if this host remotely manages other servers instead.
    pub fn is_orchestrator(&self) -> bool {
        self.role == Role::Orchestrator
    }
}

/// Short hostname of this machine, empty when nothing can determine it.
fn local_hostname() -> String {
    if Path::new("/bin/hostname").exists() {
        if let Ok(output) = Command::new("/bin/hostname").output() {
            let name = String::from_utf8_lossy(&output.stdout).trim().to_owned();
            if !name.is_empty() {
                return name;
            }
        }
    }

    env::var("HOSTNAME")
        .or_else(|_| env::var("COMPUTERNAME"))
        .unwrap_or_default()
}
