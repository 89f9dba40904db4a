// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Site document loading.
//!
//! Every document this tool reads (the site-level `_config.yml`, and one
//! compose document per unit) is parsed into a generic order-preserving
//! mapping with no schema enforcement. Scalars are always viewed as strings:
//! a port written as `8080` and one written as `"8080"` must behave
//! identically, so numbers and booleans are stringified on access instead of
//! being interpreted at parse time.

use serde_yaml::{Mapping, Value};
use std::{
    fs::read_to_string,
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tracing::warn;

/// Load a document into a generic mapping.
///
/// Returns `Ok(None)` when the file does not exist. An empty document counts
/// as an empty mapping; any other non-mapping top level is malformed.
///
/// # Errors
///
/// - Return [`DocumentError::Read`] if the file exists but cannot be read.
/// - Return [`DocumentError::Parse`] if the contents are not well-formed.
/// - Return [`DocumentError::NotAMapping`] if the top level is not a mapping.
pub fn load(path: &Path) -> Result<Option<Mapping>> {
    let text = match read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(DocumentError::Read {
                path: path.to_path_buf(),
                source: err,
            })
        }
    };

    let value: Value = serde_yaml::from_str(&text).map_err(|err| DocumentError::Parse {
        path: path.to_path_buf(),
        source: err,
    })?;

    match value {
        Value::Null => Ok(Some(Mapping::new())),
        Value::Mapping(mapping) => Ok(Some(mapping)),
        _ => Err(DocumentError::NotAMapping {
            path: path.to_path_buf(),
        }),
    }
}

/// Load a document, degrading to an empty mapping when it is absent or
/// malformed.
///
/// A malformed document only earns a warning here; the sanity check reports
/// whatever becomes inconsistent as a result of the missing content.
pub fn load_or_warn(path: &Path) -> Mapping {
    match load(path) {
        Ok(Some(mapping)) => mapping,
        Ok(None) => Mapping::new(),
        Err(err) => {
            warn!("{err}");
            Mapping::new()
        }
    }
}

/// Look up a key in a mapping by string.
pub fn get<'a>(mapping: &'a Mapping, key: &str) -> Option<&'a Value> {
    mapping
        .iter()
        .find(|(name, _)| name.as_str() == Some(key))
        .map(|(_, value)| value)
}

/// View a scalar as a string, stringifying numbers and booleans.
pub fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

/// Flatten a value into a word list.
///
/// A scalar splits on whitespace; a sequence contributes each of its elements
/// flattened the same way. Anything else flattens to nothing. The site
/// document allows `run:` and `backup:` entries to be written either as
/// `"unitA unitB"` or as a proper list, and both arrive here.
pub fn words(value: &Value) -> Vec<String> {
    match value {
        Value::Sequence(items) => items.iter().flat_map(words).collect(),
        _ => scalar(value)
            .map(|text| text.split_whitespace().map(str::to_owned).collect())
            .unwrap_or_default(),
    }
}

/// Document loading error types.
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    /// File exists but cannot be read.
    #[error("cannot read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// File is not well-formed YAML.
    #[error("cannot parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    /// Top level of the document is not a mapping.
    #[error("{} does not hold a mapping at its top level", .path.display())]
    NotAMapping { path: PathBuf },
}

/// Friendly result alias :3
type Result<T, E = DocumentError> = std::result::Result<T, E>;
