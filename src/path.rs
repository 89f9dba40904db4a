// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Conventional filesystem locations.
//!
//! The whole tool revolves around one site folder: `_config.yml` at its top
//! level, one compose document per unit next to it. Executors keep a copy of
//! that folder at `/srv/run`; an orchestrator points at its working copy
//! through a one-line dot-file written by `set-folder`.

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs,
    path::{Path, PathBuf},
};
use tracing::{info, warn};

/// Site-level document name.
pub const CONFIG_YML: &str = "_config.yml";

/// Conventional name of a per-unit document nested one folder down.
pub const COMPOSE_YML: &str = "docker-compose.yml";

/// Name of the installed command, as spelled in user-facing messages.
pub const SCRIPT_NAME: &str = "homelab-srv";

/// Root folder every unit persists its state under.
pub fn persist_root() -> &'static Path {
    Path::new("/srv/persist")
}

/// Folder whose presence marks this host as an executor.
pub fn srv_run() -> &'static Path {
    Path::new("/srv/run")
}

/// Backup root used when the site document does not override it.
pub fn default_backup_folder() -> &'static Path {
    Path::new("/srv/data/server-backup")
}

/// Dot-file remembering the configured site folder.
///
/// # Errors
///
/// - Return [`PathError::NoWayHome`] if the user's config directory cannot
///   be determined.
pub fn settings_path() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|path| path.join(format!("{SCRIPT_NAME}.conf")))
        .ok_or(PathError::NoWayHome)
}

/// How the site folder was determined. Informational only.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FolderOrigin {
    /// Host is an executor: the folder is `/srv/run` itself.
    SrvRun,

    /// Taken from the dot-file written by `set-folder`.
    Settings,

    /// `_config.yml` found in the current working directory.
    Cwd,

    /// Handed in explicitly by the caller.
    Explicit,
}

impl Display for FolderOrigin {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::SrvRun => fmt.write_str("/srv/run"),
            Self::Settings => fmt.write_str("~/.config/homelab-srv.conf"),
            Self::Cwd => fmt.write_str("cwd"),
            Self::Explicit => fmt.write_str("explicit"),
        }
    }
}

/// Resolve the site folder.
///
/// Tried in order: `/srv/run` when it is a directory (this host executes
/// units), the dot-file's configured folder, the current working directory
/// when it holds `_config.yml`. An unconfigured site is a valid state that
/// the sanity check reports, not an error.
pub fn find_base_folder() -> (Option<PathBuf>, Option<FolderOrigin>) {
    if srv_run().is_dir() {
        return (Some(srv_run().to_path_buf()), Some(FolderOrigin::SrvRun));
    }

    if let Some(configured) = configured_folder() {
        return (Some(configured), Some(FolderOrigin::Settings));
    }

    if let Ok(cwd) = std::env::current_dir() {
        if cwd.join(CONFIG_YML).exists() {
            info!(
                "using {CONFIG_YML} from current working dir: {}",
                cwd.display()
            );
            return (Some(cwd), Some(FolderOrigin::Cwd));
        }
    }

    (None, None)
}

/// Folder recorded in the dot-file, if it still points at a directory.
fn configured_folder() -> Option<PathBuf> {
    let settings = settings_path().ok()?;
    let text = fs::read_to_string(&settings).ok()?;
    let line = text.lines().next()?.trim();
    if line.is_empty() {
        return None;
    }

    let expanded = match shellexpand::full(line) {
        Ok(expanded) => expanded.into_owned(),
        Err(err) => {
            warn!(
                "cannot expand path configured in {}: {err}",
                settings.display()
            );
            return None;
        }
    };

    let mut path = PathBuf::from(expanded);
    if path.ends_with(CONFIG_YML) {
        path.pop();
    }

    if path.is_dir() {
        Some(path)
    } else {
        warn!(
            "path configured in {} is invalid: {}",
            settings.display(),
            path.display()
        );
        None
    }
}

/// Remember `folder` as the site folder.
///
/// # Errors
///
/// - Return [`PathError::NoWayHome`] if the user's config directory cannot
///   be determined.
/// - Return [`PathError::WriteSettings`] if the dot-file cannot be written.
pub fn write_configured_folder(folder: &Path) -> Result<()> {
    let settings = settings_path()?;
    if let Some(parent) = settings.parent() {
        mkdirp::mkdirp(parent).map_err(|err| PathError::WriteSettings {
            path: settings.clone(),
            source: err,
        })?;
    }

    fs::write(&settings, format!("{}\n", folder.display())).map_err(|err| {
        PathError::WriteSettings {
            path: settings,
            source: err,
        }
    })
}

/// Path resolution error types.
#[derive(Debug, thiserror::Error)]
pub enum PathError {
    /// No way to determine the user's config directory.
    #[error("cannot determine absolute path to user's config directory")]
    NoWayHome,

    /// Dot-file cannot be written.
    #[error("cannot write {}: {source}", .path.display())]
    WriteSettings {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Friendly result alias :3
type Result<T, E = PathError> = std::result::Result<T, E>;
