// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Backup policy.
//!
//! The `backup:` section of `_config.yml` decides where persisted unit state
//! gets synchronized to: a common root, a per-host subfolder for units that
//! run on more than one machine, and optional restrictions to a few
//! sub-paths for units whose state is mostly throwaway.

use crate::{
    check::Problem,
    context::HostContext,
    document, path,
    site::{unit::ComposeUnit, HomelabSite},
};
use serde_yaml::Value;
use std::path::{Path, PathBuf};

/// Backup destination policy from the site document.
#[derive(Clone, Debug)]
pub struct BackupPolicy {
    folder: PathBuf,
    per_host: Vec<String>,
    restrict: Vec<(String, Vec<String>)>,
}

impl Default for BackupPolicy {
    fn default() -> Self {
        Self::new(None)
    }
}

impl BackupPolicy {
    /// Build from the `backup:` entry of the site document.
    pub fn new(cfg: Option<&Value>) -> Self {
        let map = cfg.and_then(Value::as_mapping);
        let folder = map
            .and_then(|map| document::get(map, "folder"))
            .and_then(|value| document::scalar(value))
            .map(PathBuf::from)
            .unwrap_or_else(|| path::default_backup_folder().to_path_buf());
        let per_host = map
            .and_then(|map| document::get(map, "per_host"))
            .map(document::words)
            .unwrap_or_default();
        let restrict = map
            .and_then(|map| document::get(map, "restrict"))
            .and_then(Value::as_mapping)
            .map(|map| {
                map.iter()
                    .filter_map(|(key, value)| {
                        Some((document::scalar(key)?, document::words(value)))
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            folder,
            per_host,
            restrict,
        }
    }

    /// Root of the backup store.
    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Sub-paths to synchronize for a unit, `None` meaning its whole
    /// persisted directory.
    pub fn restricted_paths(&self, unit_name: &str) -> Option<&[String]> {
        self.restrict
            .iter()
            .find(|(name, _)| name == unit_name)
            .map(|(_, paths)| paths.as_slice())
    }

    /// Concrete backup destination for a unit.
    ///
    /// Units listed in `per_host` get a subfolder per executing host, so
    /// the destination depends on the identity of the machine doing the
    /// backup, handed in explicitly.
    pub fn destination_for(&self, unit: &ComposeUnit, ctx: &HostContext) -> PathBuf {
        let mut destination = self.folder.clone();
        if self.per_host.iter().any(|name| name == unit.name()) {
            destination.push(&ctx.hostname);
        }

        destination.join(unit.name())
    }

    /// Report dangling unit references in `per_host` and `restrict`.
    pub(crate) fn sanity_check(&self, site: &HomelabSite) -> Vec<Problem> {
        let mut problems = site.unit_name_check(
            &self.per_host,
            &format!("{}:backup/per_host", path::CONFIG_YML),
        );

        let restrict_names: Vec<String> = self
            .restrict
            .iter()
            .map(|(name, _)| name.clone())
            .collect();
        problems.extend(site.unit_name_check(
            &restrict_names,
            &format!("{}:backup/restrict", path::CONFIG_YML),
        ));

        problems
    }
}
