// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Sanity-check findings.
//!
//! The sanity-check walk never aborts and never throws: every inconsistency
//! it finds becomes a [`Problem`] accumulated into a flat list. The command
//! layer prints all of them and only refuses to continue when at least one is
//! [`Severity::Fatal`].

use std::fmt::{Display, Formatter, Result as FmtResult};

/// One finding from the sanity-check walk.
///
/// Carries the label of the entity that produced it (a unit name, a
/// `unit:service/section` path, the site folder) and a human-readable
/// message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Problem {
    origin: String,
    message: String,
}

impl Problem {
    /// Construct new problem.
    pub fn new(origin: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            message: message.into(),
        }
    }

    /// Label of the entity the problem was found on.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// What is wrong.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Classify the finding.
    ///
    /// Advisory findings merely flag drift from convention ("should"/"would"
    /// phrasing); everything else blocks lifecycle operations.
    pub fn severity(&self) -> Severity {
        if self.message.contains("should") || self.message.contains("would") {
            Severity::Advisory
        } else {
            Severity::Fatal
        }
    }
}

impl Display for Problem {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(fmt, "{}: {}", self.origin, self.message)
    }
}

/// How serious a [`Problem`] is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    /// Style drift worth a warning, safe to operate through.
    Advisory,

    /// Misconfiguration that must be fixed before any lifecycle operation.
    Fatal,
}
