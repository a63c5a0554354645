// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Exact text patching.
//!
//! Some build tasks flip a handful of literal lines in a text file, e.g.,
//! `debug: false` to `debug: true` in `services.yml`. No YAML parsing happens
//! here. A patch is an exact substring replacement, and a patch whose target
//! substring is missing is an error.

use std::{
    fs::{read_to_string, write},
    path::{Path, PathBuf},
};
use tracing::{debug, instrument};

/// Literal pairs flipped in `services.yml` by twig debugging.
///
/// The first value of each pair is the production value, the second the
/// debugging value.
pub const TWIG_DEBUG_PAIRS: &[(&str, &str)] = &[
    ("debug: false", "debug: true"),
    ("auto_reload: null", "auto_reload: true"),
    ("cache: true", "cache: false"),
    (
        "http.response.debug_cacheability_headers: true",
        "http.response.debug_cacheability_headers: false",
    ),
];

/// Replace every occurrence of `from` with `to` in file.
///
/// # Errors
///
/// - Return [`PatchError::PatchTargetNotFound`] if `from` does not occur in the
///   file. The file is left untouched.
/// - Return [`PatchError::Read`] or [`PatchError::Write`] on I/O failure.
#[instrument(skip(path), level = "debug")]
pub fn replace_in_file(path: impl AsRef<Path>, from: &str, to: &str) -> Result<()> {
    let path = path.as_ref();
    let content = read_to_string(path).map_err(|err| PatchError::Read {
        source: err,
        path: path.to_path_buf(),
    })?;

    if !content.contains(from) {
        return Err(PatchError::PatchTargetNotFound {
            needle: from.to_owned(),
            path: path.to_path_buf(),
        });
    }

    debug!("replace {from:?} with {to:?} in {:?}", path.display());
    write(path, content.replace(from, to)).map_err(|err| PatchError::Write {
        source: err,
        path: path.to_path_buf(),
    })?;

    Ok(())
}

/// Flip twig debugging parameters in `services.yml`.
///
/// # Errors
///
/// - Return [`PatchError::PatchTargetNotFound`] if any expected value is not
///   present, e.g., debugging is already in the requested state.
pub fn toggle_twig_debug(services_yml: impl AsRef<Path>, enable: bool) -> Result<()> {
    for (production, debugging) in TWIG_DEBUG_PAIRS {
        let (from, to) = if enable {
            (production, debugging)
        } else {
            (debugging, production)
        };
        replace_in_file(services_yml.as_ref(), from, to)?;
    }

    Ok(())
}

/// Text patching error types.
#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    /// Expected substring is absent.
    #[error("{needle:?} not found in {:?}", path.display())]
    PatchTargetNotFound { needle: String, path: PathBuf },

    /// Target file cannot be read from.
    #[error("failed to read {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Target file cannot be written to.
    #[error("failed to write {:?}", path.display())]
    Write {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = PatchError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    const SERVICES_YML: &str = indoc! {r#"
        parameters:
          http.response.debug_cacheability_headers: true
          twig.config:
            debug: false
            auto_reload: null
            cache: true
    "#};

    #[test]
    fn toggle_twig_debug_round_trip() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("services.yml");
        write(&path, SERVICES_YML)?;

        toggle_twig_debug(&path, true)?;
        let result = read_to_string(&path)?;
        let expect = indoc! {r#"
            parameters:
              http.response.debug_cacheability_headers: false
              twig.config:
                debug: true
                auto_reload: true
                cache: false
        "#};
        assert_eq!(result, expect);

        toggle_twig_debug(&path, false)?;
        assert_eq!(read_to_string(&path)?, SERVICES_YML);

        Ok(())
    }

    #[test]
    fn missing_target_is_error() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("services.yml");
        write(&path, "parameters: {}\n")?;

        let result = replace_in_file(&path, "debug: false", "debug: true");
        assert!(matches!(result, Err(PatchError::PatchTargetNotFound { .. })));
        assert_eq!(read_to_string(&path)?, "parameters: {}\n");

        Ok(())
    }
}
