// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Compose-unit entities.
//!
//! One compose document describes one __unit__: a group of co-located
//! containerized services that deploy together. The unit wraps the raw
//! document with typed accessors and owns the two per-service conformance
//! checks, environment drift and volume layout.
//!
//! # Vanilla Layout
//!
//! A unit is eligible for generic backup and restore when every persisted
//! volume of every service lives under `/srv/persist/<unit_name>`. Units
//! matching that convention are called __vanilla__; everything the backup
//! machinery needs to know about them is their name. Units named in
//! [`SPECIAL_UNIT_NAMES`] manage their own state and are exempt from both
//! the layout check and default backup selection.

use crate::{check::Problem, document, path};
use serde_yaml::{Mapping, Value};
use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
};

/// Units exempt from the standard volume-layout and backup conventions.
///
/// Syncthing replicates its own state between machines, so backing it up
/// generically is wasted work on a non-standard layout.
pub const SPECIAL_UNIT_NAMES: &[&str] = &["syncthing"];

/// One deployable group of containerized services.
#[derive(Clone, Debug)]
pub struct ComposeUnit {
    name: String,
    source: PathBuf,
    special: bool,
    services: Vec<Service>,
    vanilla_backup: bool,
}

impl ComposeUnit {
    /// Build a unit from one compose document on disk.
    ///
    /// The unit name comes from the source path: a conventionally named
    /// `docker-compose.yml` takes its parent folder's name, anything else
    /// its own stem. A document that fails to parse degrades to a unit with
    /// no services, which the sanity check then surfaces.
    pub fn load(source: impl Into<PathBuf>) -> Self {
        let source = source.into();
        let cfg = document::load_or_warn(&source);
        let services = document::get(&cfg, "services").and_then(Value::as_mapping);
        Self::from_document(source, services)
    }

    pub(crate) fn from_document(source: PathBuf, services_cfg: Option<&Mapping>) -> Self {
        let name = derive_name(&source);
        let special = SPECIAL_UNIT_NAMES.contains(&name.as_str());

        let mut services = Vec::new();
        if let Some(cfg) = services_cfg {
            for (key, value) in cfg {
                let Some(service_name) = document::scalar(key) else {
                    continue;
                };
                services.push(Service::new(&name, service_name, value.as_mapping()));
            }
        }

        // Zero services never passes: an empty unit must not silently count
        // as backed up.
        let vanilla_backup = !services.is_empty()
            && services
                .iter()
                .all(|service| service.volumes().is_vanilla(path::persist_root(), &name));

        Self {
            name,
            source,
            special,
            services,
            vanilla_backup,
        }
    }

    /// Unit name, derived from the source path.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path of the compose document this unit came from.
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// True for units exempt from layout checks and default selection.
    pub fn is_special(&self) -> bool {
        self.special
    }

    /// Services in document order.
    pub fn services(&self) -> &[Service] {
        &self.services
    }

    /// True when every persisted volume follows the standard layout.
    pub fn vanilla_backup(&self) -> bool {
        self.vanilla_backup
    }

    /// Image references of all services, for upgrades.
    pub fn images(&self) -> impl Iterator<Item = &str> {
        self.services.iter().filter_map(Service::image)
    }

    /// Environment drift and volume layout problems across all services.
    pub fn sanity_check(&self, expected_env: &[(String, String)]) -> Vec<Problem> {
        let mut problems = Vec::new();
        for service in &self.services {
            problems.extend(service.environment().conformance_problems(expected_env));
            problems.extend(service.volumes().layout_problems(
                path::persist_root(),
                &self.name,
                self.special,
            ));
        }

        problems
    }
}

/// Derive a unit name from its document path.
fn derive_name(source: &Path) -> String {
    if source.file_name() == Some(OsStr::new(path::COMPOSE_YML)) {
        if let Some(parent) = source.parent().and_then(Path::file_name) {
            return parent.to_string_lossy().into_owned();
        }
    }

    source
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// One container definition inside a unit.
#[derive(Clone, Debug)]
pub struct Service {
    name: String,
    image: Option<String>,
    restart: Option<String>,
    environment: Environment,
    ports: Ports,
    volumes: Volumes,
}

impl Service {
    fn new(unit_name: &str, name: String, cfg: Option<&Mapping>) -> Self {
        let get = |key| cfg.and_then(|cfg| document::get(cfg, key));
        Self {
            image: get("image").and_then(document::scalar),
            restart: get("restart").and_then(document::scalar),
            environment: Environment::new(
                format!("{unit_name}:{name}/environment"),
                get("environment"),
            ),
            ports: Ports::new(get("ports")),
            volumes: Volumes::new(format!("{unit_name}:{name}/volumes"), get("volumes")),
            name,
        }
    }

    /// Service name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Container image reference, when declared.
    pub fn image(&self) -> Option<&str> {
        self.image.as_deref()
    }

    /// Restart policy, passed through unvalidated.
    pub fn restart(&self) -> Option<&str> {
        self.restart.as_deref()
    }

    /// Declared environment assignments.
    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    /// Declared host-side port exposures.
    pub fn ports(&self) -> &Ports {
        &self.ports
    }

    /// Declared bind-mount mappings.
    pub fn volumes(&self) -> &Volumes {
        &self.volumes
    }
}

/// Environment assignments declared for one service.
///
/// Compose documents write these either as a mapping or as a `KEY=VALUE`
/// list; both shapes land in the same ordered name-value table.
#[derive(Clone, Debug, Default)]
pub struct Environment {
    origin: String,
    by_name: Vec<(String, String)>,
}

impl Environment {
    fn new(origin: String, cfg: Option<&Value>) -> Self {
        let mut by_name = Vec::new();
        match cfg {
            Some(Value::Sequence(items)) => {
                for item in items.iter().filter_map(document::scalar) {
                    match item.split_once('=') {
                        Some((name, value)) => {
                            by_name.push((name.to_owned(), value.trim().to_owned()));
                        }
                        None => by_name.push((item, String::new())),
                    }
                }
            }
            Some(Value::Mapping(map)) => {
                for (key, value) in map {
                    if let Some(name) = document::scalar(key) {
                        by_name.push((name, document::scalar(value).unwrap_or_default()));
                    }
                }
            }
            _ => {}
        }

        Self { origin, by_name }
    }

    /// Declared value of a variable.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.by_name
            .iter()
            .find(|(declared, _)| declared == name)
            .map(|(_, value)| value.as_str())
    }

    /// Assignments in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.by_name
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// Report every declared variable that drifts from the site's
    /// expectations.
    ///
    /// Only variables present in both places are compared; mismatches are
    /// reported, never corrected.
    pub fn conformance_problems(&self, expected: &[(String, String)]) -> Vec<Problem> {
        let mut problems = Vec::new();
        for (name, expected_value) in expected {
            if let Some(actual) = self.get(name) {
                if actual != expected_value {
                    problems.push(Problem::new(
                        &self.origin,
                        format!("{name} should be {expected_value} (instead of {actual})"),
                    ));
                }
            }
        }

        problems
    }
}

/// Host-side port exposures declared for one service.
#[derive(Clone, Debug, Default)]
pub struct Ports {
    host_side: Vec<(String, String)>,
}

impl Ports {
    fn new(cfg: Option<&Value>) -> Self {
        Self {
            host_side: split_pairs(cfg),
        }
    }

    /// Host-port to container-port pairs, split at the first `:`.
    pub fn host_side(&self) -> &[(String, String)] {
        &self.host_side
    }

    /// True when the service exposes nothing.
    pub fn is_empty(&self) -> bool {
        self.host_side.is_empty()
    }
}

/// Bind-mount mappings declared for one service.
#[derive(Clone, Debug, Default)]
pub struct Volumes {
    origin: String,
    volumes: Vec<(String, String)>,
}

impl Volumes {
    fn new(origin: String, cfg: Option<&Value>) -> Self {
        Self {
            origin,
            volumes: split_pairs(cfg),
        }
    }

    /// Host-path to container-path pairs, split at the first `:`.
    pub fn volumes(&self) -> &[(String, String)] {
        &self.volumes
    }

    /// True when the service declares no bind mounts.
    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty()
    }

    /// True iff every host path sits under `<persist_root>/<unit_name>`.
    ///
    /// The comparison is lexical, component by component; symlinks and `..`
    /// segments are never resolved. Vacuously true with no volumes.
    pub fn is_vanilla(&self, persist_root: &Path, unit_name: &str) -> bool {
        let expected = persist_root.join(unit_name);
        self.volumes
            .iter()
            .all(|(host, _)| Path::new(host).starts_with(&expected))
    }

    /// Report every volume that escapes the standard persisted location.
    ///
    /// Yields nothing for special units and for services without volumes.
    pub fn layout_problems(
        &self,
        persist_root: &Path,
        unit_name: &str,
        is_special: bool,
    ) -> Vec<Problem> {
        if is_special || self.volumes.is_empty() {
            return Vec::new();
        }

        let expected = persist_root.join(unit_name);
        self.volumes
            .iter()
            .filter(|(host, _)| !Path::new(host).starts_with(&expected))
            .map(|(host, _)| {
                Problem::new(
                    &self.origin,
                    format!("Volume '{host}' should be '{}'", expected.display()),
                )
            })
            .collect()
    }
}

/// Split a sequence of `left:right` scalars at the first `:`.
fn split_pairs(cfg: Option<&Value>) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    if let Some(Value::Sequence(items)) = cfg {
        for item in items.iter().filter_map(document::scalar) {
            match item.split_once(':') {
                Some((left, right)) => pairs.push((left.to_owned(), right.to_owned())),
                None => pairs.push((item, String::new())),
            }
        }
    }

    pairs
}
