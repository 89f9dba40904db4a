// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Lifecycle operations.
//!
//! Everything here is orchestration glue around the site model: the model
//! supplies the decision data (is the unit special, is its layout vanilla,
//! which sub-paths are restricted, where do its files go) and these
//! functions drive docker-compose, rsync, and ssh through the [`Invoker`]
//! seam accordingly.

use crate::{
    context::HostContext,
    exec::{run_checked, ExecError, Invoker},
    path,
    site::{unit::ComposeUnit, HomelabSite},
};

use std::path::{Path, PathBuf};
use tracing::info;

/// Start a unit's services.
pub fn start(unit: &ComposeUnit, invoker: &dyn Invoker) -> Result<()> {
    compose(unit, invoker, &["start"])
}

/// Restart a unit's services.
pub fn restart(unit: &ComposeUnit, invoker: &dyn Invoker) -> Result<()> {
    compose(unit, invoker, &["restart"])
}

/// Stop a unit's services, then snapshot their persisted state.
pub fn stop(
    unit: &ComposeUnit,
    site: &HomelabSite,
    ctx: &HostContext,
    invoker: &dyn Invoker,
    down: bool,
) -> Result<()> {
    compose(unit, invoker, &[if down { "down" } else { "stop" }])?;
    backup(unit, site, ctx, invoker, false)
}

/// Pull newer images and redeploy the unit when something changed.
///
/// Without `force`, a unit whose images are all current is left alone.
pub fn upgrade(
    unit: &ComposeUnit,
    site: &HomelabSite,
    ctx: &HostContext,
    invoker: &dyn Invoker,
    force: bool,
) -> Result<()> {
    let mut updated = 0;
    for image in unit.images() {
        let outcome = run_checked(invoker, "docker", &["pull".to_owned(), image.to_owned()])?;
        if invoker.is_dry_run() || outcome.output.contains("newer image") {
            updated += 1;
        }
    }

    if !force && updated == 0 {
        info!("no new docker image available for {}", unit.name());
        return Ok(());
    }

    compose(unit, invoker, &["down"])?;
    backup(unit, site, ctx, invoker, false)?;
    run_checked(
        invoker,
        "docker",
        &["image".to_owned(), "prune".to_owned(), "-f".to_owned()],
    )?;
    compose(unit, invoker, &["up", "-d"])
}

/// Synchronize a unit's persisted state into the backup store.
///
/// `auto` marks unattended snapshots (after a stop, during an upgrade):
/// skip reasons stay silent and existing destinations are left untouched.
pub fn backup(
    unit: &ComposeUnit,
    site: &HomelabSite,
    ctx: &HostContext,
    invoker: &dyn Invoker,
    auto: bool,
) -> Result<()> {
    sync_persisted(unit, site, ctx, invoker, Direction::Store, auto)
}

/// Synchronize a unit's persisted state back out of the backup store.
pub fn restore(
    unit: &ComposeUnit,
    site: &HomelabSite,
    ctx: &HostContext,
    invoker: &dyn Invoker,
    auto: bool,
) -> Result<()> {
    sync_persisted(unit, site, ctx, invoker, Direction::Retrieve, auto)
}

/// Push the whole site folder to a host's `/srv/run`.
pub fn push(site: &HomelabSite, hostname: &str, invoker: &dyn Invoker) -> Result<()> {
    let folder = site.folder().ok_or(OpsError::NoFolder)?;
    let trail = invoker.is_dry_run() || folder.is_dir();
    let args = vec![
        "-rlptJ".to_owned(),
        "--delete".to_owned(),
        slash_trail(&folder.display().to_string(), trail),
        slash_trail(
            &format!("{hostname}:{}", path::srv_run().display()),
            trail,
        ),
    ];
    run_checked(invoker, "rsync", &args)?;
    Ok(())
}

/// Re-dispatch a command line to a remote host over ssh.
pub fn run_ssh(invoker: &dyn Invoker, hostname: &str, args: &[String]) -> Result<()> {
    let mut full = vec![hostname.to_owned()];
    full.extend(args.iter().cloned());
    run_checked(invoker, "ssh", &full)?;
    Ok(())
}

/// Which way persisted state flows.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Direction {
    /// Live state into the backup store.
    Store,

    /// Backup store back into live state.
    Retrieve,
}

fn sync_persisted(
    unit: &ComposeUnit,
    site: &HomelabSite,
    ctx: &HostContext,
    invoker: &dyn Invoker,
    direction: Direction,
    auto: bool,
) -> Result<()> {
    let action = match direction {
        Direction::Store => "backing up",
        Direction::Retrieve => "restoring",
    };

    if unit.is_special() {
        if !auto {
            info!("not {action} '{}': special unit", unit.name());
        }
        return Ok(());
    }

    if !unit.vanilla_backup() {
        if !auto {
            info!(
                "not {action} '{}': it does not use volume {}/{}",
                unit.name(),
                path::persist_root().display(),
                unit.name()
            );
        }
        return Ok(());
    }

    let rel_paths: Vec<String> = match site.backup().restricted_paths(unit.name()) {
        Some(paths) if !paths.is_empty() => paths.to_vec(),
        _ => vec![String::new()],
    };

    let live_root = path::persist_root().join(unit.name());
    let stored_root = site.backup().destination_for(unit, ctx);

    // Ownership is restored from the expected environment on the way in;
    // never forced on the way back out.
    let chown = match direction {
        Direction::Store => chown_env(site),
        Direction::Retrieve => None,
    };

    for rel_path in &rel_paths {
        let (src, dest) = match direction {
            Direction::Store => (join_rel(&live_root, rel_path), join_rel(&stored_root, rel_path)),
            Direction::Retrieve => {
                (join_rel(&stored_root, rel_path), join_rel(&live_root, rel_path))
            }
        };

        if !invoker.is_dry_run() && !src.is_dir() {
            continue;
        }
        if auto && dest.exists() {
            continue;
        }

        if !invoker.is_dry_run() {
            mkdirp::mkdirp(&dest).map_err(|err| OpsError::CreateFolder {
                path: dest.clone(),
                source: err,
            })?;
        }

        run_rsync(invoker, &src, &dest, chown.as_ref())?;
    }

    Ok(())
}

/// Sudo rsync between two local paths, mirroring deletions.
fn run_rsync(
    invoker: &dyn Invoker,
    src: &Path,
    dest: &Path,
    chown: Option<&(String, String)>,
) -> Result<()> {
    let mut args = vec!["rsync".to_owned(), "-rlptJ".to_owned(), "--delete".to_owned()];
    if let Some((uid, gid)) = chown {
        args.push(format!("--chown={uid}:{gid}"));
    }

    // rsync semantics: a trailing slash on a directory source syncs its
    // contents rather than the directory itself.
    let trail = invoker.is_dry_run() || src.is_dir();
    args.push(slash_trail(&src.display().to_string(), trail));
    args.push(slash_trail(&dest.display().to_string(), trail));

    run_checked(invoker, "sudo", &args)?;
    Ok(())
}

/// Expected ownership for synchronized files, when the site declares it.
fn chown_env(site: &HomelabSite) -> Option<(String, String)> {
    let find = |name: &str| {
        site.env()
            .iter()
            .find(|(declared, _)| declared == name)
            .map(|(_, value)| value.clone())
    };
    Some((find("PUID")?, find("PGID")?))
}

fn join_rel(root: &Path, rel_path: &str) -> PathBuf {
    if rel_path.is_empty() {
        root.to_path_buf()
    } else {
        root.join(rel_path)
    }
}

fn slash_trail(path: &str, trail: bool) -> String {
    let trimmed = path.trim_end_matches('/');
    if trail {
        format!("{trimmed}/")
    } else {
        trimmed.to_owned()
    }
}

fn compose(unit: &ComposeUnit, invoker: &dyn Invoker, args: &[&str]) -> Result<()> {
    let mut full = vec!["-f".to_owned(), unit.source().display().to_string()];
    full.extend(args.iter().map(|arg| (*arg).to_owned()));
    run_checked(invoker, "docker-compose", &full)?;
    Ok(())
}

/// Lifecycle operation error types.
#[derive(Debug, thiserror::Error)]
pub enum OpsError {
    /// External command failed.
    #[error(transparent)]
    Exec(#[from] ExecError),

    /// No site folder is configured.
    #[error("no site folder is configured")]
    NoFolder,

    /// Destination folder cannot be created.
    #[error("cannot create {}: {source}", .path.display())]
    CreateFolder {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Friendly result alias :3
type Result<T, E = OpsError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{context::Role, exec::testing::RecordingInvoker};
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
                  PGID: "1001"
                run:
                  rps: pihole gitea syncthing
                backup:
                  folder: /srv/data/server-backup
                  per_host: gitea
                  restrict:
                    gitea: data repos
            "#},
        );
        write(
            "site/pihole.yml",
            indoc! {r#"
                services:
                  web:
                    image: pihole/pihole
                    volumes:
                      - "/srv/persist/pihole/etc:/etc/pihole"
            "#},
        );
        write(
            "site/gitea.yml",
            indoc! {r#"
                services:
                  gitea:
                    image: gitea/gitea
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

    fn ctx() -> HostContext {
        HostContext::new("rps", Role::Executor)
    }

    #[sealed_test]
    fn backup_syncs_the_whole_persisted_directory_by_default() {
        let site = sample_site();
        let invoker = RecordingInvoker::default();

        backup(site.unit("pihole").unwrap(), &site, &ctx(), &invoker, false).unwrap();

        assert_eq!(
            invoker.commands(),
            vec![
                "sudo rsync -rlptJ --delete --chown=1001:1001 \
                 /srv/persist/pihole/ /srv/data/server-backup/pihole/"
                    .to_owned()
            ]
        );
    }

    #[sealed_test]
    fn backup_honors_restrictions_and_per_host_destinations() {
        let site = sample_site();
        let invoker = RecordingInvoker::default();

        backup(site.unit("gitea").unwrap(), &site, &ctx(), &invoker, false).unwrap();

        assert_eq!(
            invoker.commands(),
            vec![
                "sudo rsync -rlptJ --delete --chown=1001:1001 \
                 /srv/persist/gitea/data/ /srv/data/server-backup/rps/gitea/data/"
                    .to_owned(),
                "sudo rsync -rlptJ --delete --chown=1001:1001 \
                 /srv/persist/gitea/repos/ /srv/data/server-backup/rps/gitea/repos/"
                    .to_owned(),
            ]
        );
    }

    #[sealed_test]
    fn backup_skips_special_and_non_vanilla_units() {
        write("site/_config.yml", "run:\n  rps: odd\n");
        write(
            "site/odd.yml",
            indoc! {r#"
                services:
                  odd:
                    volumes:
                      - "/opt/odd:/data"
            "#},
        );
        write("site/syncthing.yml", "services:\n  s:\n    image: x\n");

        let site = HomelabSite::from_folder("site");
        let invoker = RecordingInvoker::default();

        backup(site.unit("syncthing").unwrap(), &site, &ctx(), &invoker, false).unwrap();
        backup(site.unit("odd").unwrap(), &site, &ctx(), &invoker, false).unwrap();

        assert_eq!(invoker.commands(), Vec::<String>::new());
    }

    #[sealed_test]
    fn restore_inverts_the_transfer_and_never_chowns() {
        let site = sample_site();
        let invoker = RecordingInvoker::default();

        restore(site.unit("pihole").unwrap(), &site, &ctx(), &invoker, false).unwrap();

        assert_eq!(
            invoker.commands(),
            vec![
                "sudo rsync -rlptJ --delete \
                 /srv/data/server-backup/pihole/ /srv/persist/pihole/"
                    .to_owned()
            ]
        );
    }

    #[sealed_test]
    fn stop_backs_up_after_stopping() {
        let site = sample_site();
        let invoker = RecordingInvoker::default();

        stop(site.unit("pihole").unwrap(), &site, &ctx(), &invoker, false).unwrap();

        let commands = invoker.commands();
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0], "docker-compose -f site/pihole.yml stop");
        assert!(commands[1].starts_with("sudo rsync"));
    }

    #[sealed_test]
    fn upgrade_is_a_no_op_without_newer_images() {
        let site = sample_site();
        let invoker = RecordingInvoker {
            dry: false,
            ..RecordingInvoker::with_output("docker", "Status: Image is up to date")
        };

        upgrade(site.unit("pihole").unwrap(), &site, &ctx(), &invoker, false).unwrap();

        assert_eq!(invoker.commands(), vec!["docker pull pihole/pihole".to_owned()]);
    }

    #[sealed_test]
    fn upgrade_redeploys_when_a_newer_image_lands() {
        let site = sample_site();
        let invoker = RecordingInvoker {
            dry: false,
            ..RecordingInvoker::with_output("docker", "Status: Downloaded newer image")
        };

        upgrade(site.unit("syncthing").unwrap(), &site, &ctx(), &invoker, false).unwrap();

        assert_eq!(
            invoker.commands(),
            vec![
                "docker pull syncthing/syncthing".to_owned(),
                "docker-compose -f site/syncthing.yml down".to_owned(),
                "docker image prune -f".to_owned(),
                "docker-compose -f site/syncthing.yml up -d".to_owned(),
            ]
        );
    }

    #[sealed_test]
    fn push_syncs_the_site_folder_to_srv_run() {
        let site = sample_site();
        let invoker = RecordingInvoker::default();

        push(&site, "rph", &invoker).unwrap();

        assert_eq!(
            invoker.commands(),
            vec!["rsync -rlptJ --delete site/ rph:/srv/run/".to_owned()]
        );
    }
}
