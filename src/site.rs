// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Site model.
//!
//! A __site__ is one folder describing the whole fleet: `_config.yml` at the
//! top level (environment expectations, run assignment, backup policy) and
//! one compose document per unit, either standalone (`pihole.yml`) or nested
//! one folder down (`pihole/docker-compose.yml`).
//!
//! [`HomelabSite`] loads the entire entity graph eagerly from one filesystem
//! snapshot, then never mutates it. Derived data (the port-collision map) is
//! computed at construction; the sanity-check traversal is a pure read-only
//! walk yielding accumulated [`Problem`]s.
//!
//! # Discovery
//!
//! Standalone `*.yml` files whose name does not start with `_` and nested
//! `*/docker-compose.yml` files each become one unit. When two discoveries
//! derive the same unit name the later one wins, and the collision itself is
//! reported by the sanity check.

pub mod backup;
pub mod run;
pub mod unit;

use crate::{
    check::Problem,
    document,
    path::{self, FolderOrigin},
    site::{backup::BackupPolicy, run::RunAssignment, unit::ComposeUnit},
};

use glob::glob;
use serde_yaml::{Mapping, Value};
use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
};

/// Root entity of the configuration model.
#[derive(Clone, Debug)]
pub struct HomelabSite {
    folder: Option<PathBuf>,
    folder_origin: Option<FolderOrigin>,
    cfg_path: Option<PathBuf>,
    units: Vec<ComposeUnit>,
    duplicates: Vec<DuplicateUnit>,
    env: Vec<(String, String)>,
    run: RunAssignment,
    backup: BackupPolicy,
    used_host_ports: BTreeMap<u16, BTreeSet<String>>,
}

/// Two discoveries deriving the same unit name.
#[derive(Clone, Debug)]
struct DuplicateUnit {
    name: String,
    kept: PathBuf,
    shadowed: PathBuf,
}

impl HomelabSite {
    /// Resolve the site folder and load everything under it.
    pub fn discover() -> Self {
        let (folder, origin) = path::find_base_folder();
        Self::load(folder, origin)
    }

    /// Load from an explicit folder.
    pub fn from_folder(folder: impl Into<PathBuf>) -> Self {
        Self::load(Some(folder.into()), Some(FolderOrigin::Explicit))
    }

    /// Site with no folder configured at all.
    pub fn unconfigured() -> Self {
        Self::load(None, None)
    }

    fn load(folder: Option<PathBuf>, folder_origin: Option<FolderOrigin>) -> Self {
        let cfg_path = folder.as_ref().map(|folder| folder.join(path::CONFIG_YML));
        let cfg = cfg_path
            .as_deref()
            .map(document::load_or_warn)
            .unwrap_or_default();

        let mut units: Vec<ComposeUnit> = Vec::new();
        let mut duplicates = Vec::new();
        if let Some(folder) = folder.as_deref().filter(|folder| folder.is_dir()) {
            for source in discover_unit_documents(folder) {
                let unit = ComposeUnit::load(source);
                match units.iter_mut().find(|known| known.name() == unit.name()) {
                    Some(known) => {
                        duplicates.push(DuplicateUnit {
                            name: unit.name().to_owned(),
                            kept: unit.source().to_path_buf(),
                            shadowed: known.source().to_path_buf(),
                        });
                        *known = unit;
                    }
                    None => units.push(unit),
                }
            }
        }

        let env = environment_expectations(&cfg);
        let run = RunAssignment::new(document::get(&cfg, "run"));
        let backup = BackupPolicy::new(document::get(&cfg, "backup"));
        let used_host_ports = collect_host_ports(&units);

        Self {
            folder,
            folder_origin,
            cfg_path,
            units,
            duplicates,
            env,
            run,
            backup,
            used_host_ports,
        }
    }

    /// Site folder, when one is configured.
    pub fn folder(&self) -> Option<&Path> {
        self.folder.as_deref()
    }

    /// How the folder was determined.
    pub fn folder_origin(&self) -> Option<FolderOrigin> {
        self.folder_origin
    }

    /// Units in discovery order.
    pub fn units(&self) -> &[ComposeUnit] {
        &self.units
    }

    /// Unit by name.
    pub fn unit(&self, name: &str) -> Option<&ComposeUnit> {
        self.units.iter().find(|unit| unit.name() == name)
    }

    /// Global environment expectations in declared order.
    pub fn env(&self) -> &[(String, String)] {
        &self.env
    }

    /// Host to unit assignment.
    pub fn run(&self) -> &RunAssignment {
        &self.run
    }

    /// Backup destination policy.
    pub fn backup(&self) -> &BackupPolicy {
        &self.backup
    }

    /// Select units.
    ///
    /// No selector picks every non-special unit; `"all"`/`"*"` literally
    /// everything; `"special"` and `"vanilla"` their classes; anything else
    /// is a comma-separated list of unit names.
    ///
    /// # Errors
    ///
    /// - Return [`SelectError::UnknownUnits`] if any explicit name is not a
    ///   known unit, listing every unknown name at once.
    pub fn get_dcs(&self, selector: Option<&str>) -> Result<Vec<&ComposeUnit>> {
        match selector {
            Some("all") | Some("*") => Ok(self.units.iter().collect()),
            Some("special") => Ok(self.units.iter().filter(|unit| unit.is_special()).collect()),
            Some("vanilla") => Ok(self
                .units
                .iter()
                .filter(|unit| unit.vanilla_backup())
                .collect()),
            None | Some("") => Ok(self
                .units
                .iter()
                .filter(|unit| !unit.is_special())
                .collect()),
            Some(names) => {
                let names: Vec<&str> = names
                    .split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .collect();
                let unknown: Vec<String> = names
                    .iter()
                    .filter(|name| self.unit(name).is_none())
                    .map(|name| (*name).to_owned())
                    .collect();
                if !unknown.is_empty() {
                    return Err(SelectError::UnknownUnits { names: unknown });
                }

                Ok(self
                    .units
                    .iter()
                    .filter(|unit| names.contains(&unit.name()))
                    .collect())
            }
        }
    }

    /// Select hosts.
    ///
    /// No selector (or `"all"`/`"*"`) picks every declared host in order;
    /// anything else is a comma-separated list of hostnames.
    ///
    /// # Errors
    ///
    /// - Return [`SelectError::UnknownHosts`] if any explicit name is not
    ///   declared in the `run:` section, listing every unknown name at once.
    pub fn get_hosts(&self, selector: Option<&str>) -> Result<Vec<String>> {
        match selector {
            None | Some("") | Some("all") | Some("*") => {
                Ok(self.run.hostnames().map(str::to_owned).collect())
            }
            Some(names) => {
                let names: Vec<String> = names
                    .split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(str::to_owned)
                    .collect();
                let unknown: Vec<String> = names
                    .iter()
                    .filter(|name| !self.run.hostnames().any(|declared| declared == *name))
                    .cloned()
                    .collect();
                if !unknown.is_empty() {
                    return Err(SelectError::UnknownHosts { names: unknown });
                }

                Ok(names)
            }
        }
    }

    /// Host port to claiming units, across every service of every unit.
    pub fn used_host_ports(&self) -> &BTreeMap<u16, BTreeSet<String>> {
        &self.used_host_ports
    }

    /// Ports claimed by more than one distinct unit.
    ///
    /// Two services of the same unit sharing a port never conflict; only
    /// cross-unit claims matter.
    pub fn conflicting_ports(&self) -> impl Iterator<Item = (u16, &BTreeSet<String>)> {
        self.used_host_ports
            .iter()
            .filter(|(_, units)| units.len() > 1)
            .map(|(port, units)| (*port, units))
    }

    /// Host ports per unit, for status listings.
    pub fn ports_by_unit(&self) -> BTreeMap<&str, BTreeSet<u16>> {
        let mut result: BTreeMap<&str, BTreeSet<u16>> = BTreeMap::new();
        for (port, units) in &self.used_host_ports {
            for unit in units {
                result.entry(unit.as_str()).or_default().insert(*port);
            }
        }

        result
    }

    /// Report every referenced unit name that does not exist.
    pub(crate) fn unit_name_check(&self, names: &[String], origin: &str) -> Vec<Problem> {
        names
            .iter()
            .filter(|name| self.unit(name).is_none())
            .map(|name| {
                Problem::new(
                    self.label(),
                    format!("DC definition '{name}' does not exist (referred from {origin})"),
                )
            })
            .collect()
    }

    /// Walk the whole entity graph and report every inconsistency.
    ///
    /// Pure and read-only. An unconfigured folder and a missing site
    /// document each short-circuit to a single problem; everything else
    /// accumulates.
    pub fn sanity_check(&self) -> Vec<Problem> {
        let mut problems = Vec::new();

        let Some(folder) = self.folder.as_deref() else {
            problems.push(Problem::new(
                self.label(),
                format!(
                    "Run this to configure where your {} is: {} set-folder PATH",
                    path::CONFIG_YML,
                    path::SCRIPT_NAME
                ),
            ));
            return problems;
        };

        let cfg_path = self.cfg_path.as_deref().unwrap_or(folder);
        if !cfg_path.exists() {
            problems.push(Problem::new(
                self.label(),
                format!("{} does not exist", cfg_path.display()),
            ));
            return problems;
        }

        if self.units.is_empty() {
            problems.push(Problem::new(
                self.label(),
                format!("{} has no docker-compose files defined", folder.display()),
            ));
        }

        for duplicate in &self.duplicates {
            problems.push(Problem::new(
                self.label(),
                format!(
                    "DC definition '{}' is defined twice: {} shadows {}",
                    duplicate.name,
                    duplicate.kept.display(),
                    duplicate.shadowed.display()
                ),
            ));
        }

        for unit in &self.units {
            problems.extend(unit.sanity_check(&self.env));
        }

        for (port, units) in self.conflicting_ports() {
            let names = units.iter().cloned().collect::<Vec<_>>().join(" ");
            problems.push(Problem::new(
                self.label(),
                format!("Port {port} would conflict on same host for dcs: {names}"),
            ));
        }

        problems.extend(self.run.sanity_check(self));
        problems.extend(self.backup.sanity_check(self));
        problems
    }

    /// Label used as the origin of site-level problems.
    fn label(&self) -> String {
        self.folder
            .as_deref()
            .map(|folder| folder.display().to_string())
            .unwrap_or_else(|| "site".to_owned())
    }
}

/// Environment expectations from the `env:` entry, in declared order.
fn environment_expectations(cfg: &Mapping) -> Vec<(String, String)> {
    document::get(cfg, "env")
        .and_then(Value::as_mapping)
        .map(|map| {
            map.iter()
                .filter_map(|(key, value)| {
                    Some((
                        document::scalar(key)?,
                        document::scalar(value).unwrap_or_default(),
                    ))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Compose documents under a site folder, standalone files first.
fn discover_unit_documents(folder: &Path) -> Vec<PathBuf> {
    let mut sources = Vec::new();

    let standalone = folder.join("*.yml");
    if let Ok(paths) = glob(&standalone.to_string_lossy()) {
        for source in paths.flatten() {
            let hidden = source
                .file_name()
                .map_or(true, |name| name.to_string_lossy().starts_with('_'));
            if !hidden {
                sources.push(source);
            }
        }
    }

    let nested = folder.join("*").join(path::COMPOSE_YML);
    if let Ok(paths) = glob(&nested.to_string_lossy()) {
        sources.extend(paths.flatten());
    }

    sources
}

/// Host port to claiming units. Non-numeric host-side values (interface
/// prefixes, malformed entries) never collide and are left out.
fn collect_host_ports(units: &[ComposeUnit]) -> BTreeMap<u16, BTreeSet<String>> {
    let mut result: BTreeMap<u16, BTreeSet<String>> = BTreeMap::new();
    for unit in units {
        for service in unit.services() {
            for (host_port, _) in service.ports().host_side() {
                if let Ok(port) = host_port.parse::<u16>() {
                    result.entry(port).or_default().insert(unit.name().to_owned());
                }
            }
        }
    }

    result
}

/// A selector named things the site does not know about.
///
/// This is a caller-contract violation (a typo'd name on the command line),
/// so it is raised immediately instead of being collected with the
/// configuration problems.
#[derive(Debug, thiserror::Error)]
pub enum SelectError {
    /// Explicit unit selection named unknown units.
    #[error("Unknown docker-compose refs: {}", .names.join(", "))]
    UnknownUnits { names: Vec<String> },

    /// Explicit host selection named undeclared hosts.
    #[error("Host(s) not configured: {}", .names.join(", "))]
    UnknownHosts { names: Vec<String> },
}

/// Friendly result alias :3
type Result<T, E = SelectError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::Severity;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    fn write(path: &str, contents: &str) {
        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, contents).unwrap();
    }

    fn sample_site() -> HomelabSite {
        write(
            "site/_config.yml",
            indoc! {r#"
                env:
                  PUID: "1001"
                run:
                  rps: pihole gitea
                  rph: syncthing
                backup:
                  folder: /srv/data/server-backup
                  per_host: syncthing
            "#},
        );
        write(
            "site/pihole.yml",
            indoc! {r#"
                services:
                  web:
                    image: pihole/pihole
                    ports:
                      - "443:443"
                    volumes:
                      - "/srv/persist/pihole/etc:/etc/pihole"
            "#},
        );
        write(
            "site/gitea/docker-compose.yml",
            indoc! {r#"
                services:
                  gitea:
                    image: gitea/gitea
                    ports:
                      - "443:443"
                      - "2222:22"
                    volumes:
                      - "/srv/persist/gitea/data:/data"
            "#},
        );
        write(
            "site/syncthing.yml",
            indoc! {r#"
                services:
                  syncthing:
                    image: syncthing/syncthing
                    volumes:
                      - "/opt/syncthing:/var/syncthing"
            "#},
        );

        HomelabSite::from_folder("site")
    }

    #[test]
    fn unconfigured_site_yields_exactly_one_problem() {
        let problems = HomelabSite::unconfigured().sanity_check();
        assert_eq!(problems.len(), 1);
        assert!(problems[0].message().contains("set-folder"));
        assert_eq!(problems[0].severity(), Severity::Fatal);
    }

    #[sealed_test]
    fn missing_config_yields_exactly_one_problem() {
        std::fs::create_dir_all("site").unwrap();
        write("site/pihole.yml", "services: {}\n");

        let problems = HomelabSite::from_folder("site").sanity_check();
        assert_eq!(problems.len(), 1);
        assert!(problems[0].message().ends_with("does not exist"));
    }

    #[sealed_test]
    fn empty_site_reports_no_units_and_nothing_else_of_substance() {
        write("site/_config.yml", "run:\n  rps:\n");

        let problems = HomelabSite::from_folder("site").sanity_check();
        let messages: Vec<&str> = problems.iter().map(Problem::message).collect();
        assert!(messages
            .iter()
            .any(|message| message.ends_with("has no docker-compose files defined")));
        assert!(!messages.iter().any(|message| message.contains("Port")));
    }

    #[sealed_test]
    fn discovery_finds_standalone_and_nested_documents() {
        let site = sample_site();
        let mut names: Vec<&str> = site.units().iter().map(ComposeUnit::name).collect();
        names.sort_unstable();
        assert_eq!(names, vec!["gitea", "pihole", "syncthing"]);
    }

    #[sealed_test]
    fn duplicate_unit_names_are_reported_and_last_wins() {
        write("site/_config.yml", "run:\n  rps: pihole\n");
        write("site/pihole.yml", "services: {}\n");
        write(
            "site/pihole/docker-compose.yml",
            indoc! {r#"
                services:
                  web:
                    image: pihole/pihole
            "#},
        );

        let site = HomelabSite::from_folder("site");
        assert_eq!(site.units().len(), 1);
        assert_eq!(site.unit("pihole").unwrap().services().len(), 1);

        let problems = site.sanity_check();
        assert!(problems
            .iter()
            .any(|problem| problem.message().contains("'pihole' is defined twice")));
    }

    #[sealed_test]
    fn port_collisions_are_cross_unit_only() {
        let site = sample_site();

        let conflicts: Vec<(u16, Vec<String>)> = site
            .conflicting_ports()
            .map(|(port, units)| (port, units.iter().cloned().collect()))
            .collect();
        assert_eq!(
            conflicts,
            vec![(443, vec!["gitea".to_owned(), "pihole".to_owned()])]
        );

        let problems = site.sanity_check();
        assert!(problems.iter().any(|problem| problem.message()
            == "Port 443 would conflict on same host for dcs: gitea pihole"));
    }

    #[sealed_test]
    fn same_unit_port_reuse_never_conflicts() {
        write("site/_config.yml", "run:\n  rps: gitea\n");
        write(
            "site/gitea.yml",
            indoc! {r#"
                services:
                  web:
                    ports:
                      - "3000:3000"
                  hook:
                    ports:
                      - "3000:3001"
            "#},
        );

        let site = HomelabSite::from_folder("site");
        assert_eq!(site.conflicting_ports().count(), 0);
        assert_eq!(
            site.used_host_ports().get(&3000).unwrap().len(),
            1
        );
    }

    #[sealed_test]
    fn environment_drift_bubbles_up_through_sanity_check() {
        write("site/_config.yml", "env:\n  PUID: \"1001\"\n");
        write(
            "site/gitea.yml",
            indoc! {r#"
                services:
                  web:
                    environment:
                      - PUID=1002
            "#},
        );

        let problems = HomelabSite::from_folder("site").sanity_check();
        assert!(problems
            .iter()
            .any(|problem| problem.message() == "PUID should be 1001 (instead of 1002)"));
    }

    #[sealed_test]
    fn dangling_references_name_their_origin() {
        write(
            "site/_config.yml",
            indoc! {r#"
                run:
                  rps: pihole ghost
                backup:
                  per_host: phantom
                  restrict:
                    specter: data
            "#},
        );
        write("site/pihole.yml", "services: {}\n");

        let problems = HomelabSite::from_folder("site").sanity_check();
        let messages: Vec<&str> = problems.iter().map(Problem::message).collect();

        assert!(messages.contains(
            &"DC definition 'ghost' does not exist (referred from _config.yml:run/rps)"
        ));
        assert!(messages.contains(
            &"DC definition 'phantom' does not exist (referred from _config.yml:backup/per_host)"
        ));
        assert!(messages.contains(
            &"DC definition 'specter' does not exist (referred from _config.yml:backup/restrict)"
        ));
    }

    #[sealed_test]
    fn no_hosts_is_reported_from_the_run_section() {
        write("site/_config.yml", "env:\n");
        write("site/pihole.yml", "services: {}\n");

        let problems = HomelabSite::from_folder("site").sanity_check();
        assert!(problems
            .iter()
            .any(|problem| problem.message()
                == "no hosts are defined in _config.yml run: section"
                && problem.origin() == "run"));
    }

    #[sealed_test]
    fn get_dcs_selectors() {
        let site = sample_site();

        // Default selection leaves special units out; "all"/"*" is a strict
        // superset of it whenever a special unit exists.
        // Discovery order: standalone documents alphabetically, then nested.
        assert_eq!(selected(&site, None), vec!["pihole", "gitea"]);
        assert_eq!(selected(&site, Some("all")), vec!["pihole", "syncthing", "gitea"]);
        assert_eq!(selected(&site, Some("*")), vec!["pihole", "syncthing", "gitea"]);
        assert_eq!(selected(&site, Some("special")), vec!["syncthing"]);
        assert_eq!(selected(&site, Some("vanilla")), vec!["pihole", "gitea"]);
        assert_eq!(selected(&site, Some("pihole,gitea")), vec!["pihole", "gitea"]);
    }

    fn selected<'a>(site: &'a HomelabSite, selector: Option<&str>) -> Vec<&'a str> {
        site.get_dcs(selector)
            .unwrap()
            .iter()
            .map(|unit| unit.name())
            .collect()
    }

    #[sealed_test]
    fn get_dcs_enumerates_every_unknown_name() {
        let site = sample_site();
        let error = site.get_dcs(Some("pihole,nope,nada")).unwrap_err();
        assert_eq!(error.to_string(), "Unknown docker-compose refs: nope, nada");
    }

    #[sealed_test]
    fn get_hosts_selectors() {
        let site = sample_site();
        assert_eq!(site.get_hosts(None).unwrap(), vec!["rps", "rph"]);
        assert_eq!(site.get_hosts(Some("all")).unwrap(), vec!["rps", "rph"]);
        assert_eq!(site.get_hosts(Some("rph")).unwrap(), vec!["rph"]);

        let error = site.get_hosts(Some("rph,ghost")).unwrap_err();
        assert_eq!(error.to_string(), "Host(s) not configured: ghost");
    }

    #[sealed_test]
    fn ports_by_unit_inverts_the_port_map() {
        let site = sample_site();
        let by_unit = site.ports_by_unit();
        assert_eq!(
            by_unit.get("gitea").unwrap().iter().copied().collect::<Vec<_>>(),
            vec![443, 2222]
        );
    }
}
