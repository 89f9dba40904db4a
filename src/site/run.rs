// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Which host runs which units.
//!
//! The `run:` section of `_config.yml` maps each executor hostname to the
//! units expected to run there. The assignment only names things; whether
//! those names resolve is checked against the site's unit table.

use crate::{check::Problem, document, path, site::HomelabSite};
use serde_yaml::Value;

/// Host to unit-name assignment from the site document.
#[derive(Clone, Debug, Default)]
pub struct RunAssignment {
    by_host: Vec<(String, Vec<String>)>,
}

impl RunAssignment {
    /// Build from the `run:` entry of the site document.
    ///
    /// Unit lists accept both a whitespace-separated string and a proper
    /// sequence.
    pub fn new(cfg: Option<&Value>) -> Self {
        let mut by_host = Vec::new();
        if let Some(Value::Mapping(map)) = cfg {
            for (key, value) in map {
                if let Some(hostname) = document::scalar(key) {
                    by_host.push((hostname, document::words(value)));
                }
            }
        }

        Self { by_host }
    }

    /// Hostnames in declared order.
    pub fn hostnames(&self) -> impl Iterator<Item = &str> {
        self.by_host.iter().map(|(hostname, _)| hostname.as_str())
    }

    /// Units assigned to a host, or `None` for an undeclared host.
    pub fn units_for_host(&self, hostname: &str) -> Option<&[String]> {
        self.by_host
            .iter()
            .find(|(declared, _)| declared == hostname)
            .map(|(_, units)| units.as_slice())
    }

    /// True when no hosts are declared at all.
    pub fn is_empty(&self) -> bool {
        self.by_host.is_empty()
    }

    /// Report an empty assignment and every dangling unit reference.
    pub(crate) fn sanity_check(&self, site: &HomelabSite) -> Vec<Problem> {
        let mut problems = Vec::new();
        if self.by_host.is_empty() {
            problems.push(Problem::new(
                "run",
                format!("no hosts are defined in {} run: section", path::CONFIG_YML),
            ));
        }

        for (hostname, unit_names) in &self.by_host {
            problems.extend(site.unit_name_check(
                unit_names,
                &format!("{}:run/{hostname}", path::CONFIG_YML),
            ));
        }

        problems
    }
}
