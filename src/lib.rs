// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration model for a small homelab fleet.
//!
//! A handful of machines run a handful of containerized services, described
//! by one __site folder__: `_config.yml` at the top level (environment
//! expectations, run assignment, backup policy) plus one compose document
//! per deployable unit. This crate loads that folder into a typed entity
//! graph, validates it for internal consistency, and supplies the decision
//! data that lifecycle operations (start, stop, backup, restore, upgrade)
//! need.
//!
//! The model is deliberately static: it is re-derived from disk on every
//! invocation, never persisted, and never mutated after construction. The
//! [`HomelabSite::sanity_check`] walk is the heart of the crate; it surfaces
//! dangling references, port collisions, environment drift, and
//! non-conforming volume layouts before anything destructive runs.

pub mod check;
pub mod context;
pub mod document;
pub mod exec;
pub mod ops;
pub mod path;
pub mod site;

pub use check::{Problem, Severity};
pub use context::{HostContext, Role};
pub use exec::{Invoker, ProcessInvoker};
pub use path::FolderOrigin;
pub use site::{
    backup::BackupPolicy,
    run::RunAssignment,
    unit::{ComposeUnit, Environment, Ports, Service, Volumes},
    HomelabSite, SelectError,
};
