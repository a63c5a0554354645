// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Permission toggling.
//!
//! Drupal wants its site directory and settings file read-only once a site is
//! installed, but dependency installation needs to write into that same
//! directory. Shepherd flips between two __permission tables__ around
//! installation: __unlock__ before the package manager starts, and __lock__
//! once it is done.
//!
//! # Permission Tables
//!
//! Tables are plain data, written as TOML. Each direction is an array of path
//! and octal mode pairs. Relative paths are resolved against the project root.
//!
//! ```toml
//! [[lock]]
//! path = "web/sites/default"
//! mode = "0555"
//!
//! [[unlock]]
//! path = "web/sites/default"
//! mode = "0755"
//! ```
//!
//! The two directions do not need to cover the same paths. The built-in lock
//! table touches the `dsh` launcher scripts while the unlock table leaves them
//! alone.
//!
//! # Missing Paths
//!
//! A path that does not exist is reported as a warning and skipped. It never
//! aborts the remaining entries. Modes are set exactly, never merged with the
//! existing bits, so applying either table again is always safe.

use crate::config::ProjectLayout;

use serde::Deserialize;
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs::read_to_string,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::{debug, info, instrument, warn};

/// Built-in lock and unlock tables.
pub const BUILTIN_TABLES: &str = r#"
[[lock]]
path = "web/sites/default"
mode = "0555"

[[lock]]
path = "web/sites/default/default.services.yml"
mode = "0664"

[[lock]]
path = "web/sites/default/settings.php"
mode = "0444"

[[lock]]
path = "dsh"
mode = "0755"

[[lock]]
path = "dsh_bash"
mode = "0755"

[[unlock]]
path = "web/sites/default"
mode = "0755"

[[unlock]]
path = "web/sites/default/default.services.yml"
mode = "0664"

[[unlock]]
path = "web/sites/default/settings.php"
mode = "0664"
"#;

/// Direction to toggle permissions in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Read-only configuration.
    Lock,

    /// Writable configuration.
    Unlock,
}

impl Display for Direction {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Lock => fmt.write_str("lock"),
            Self::Unlock => fmt.write_str("unlock"),
        }
    }
}

/// Lock and unlock permission tables.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize)]
pub struct PermissionTables {
    #[serde(default)]
    pub lock: Vec<PermissionEntry>,

    #[serde(default)]
    pub unlock: Vec<PermissionEntry>,
}

impl PermissionTables {
    /// Load the built-in tables.
    ///
    /// # Errors
    ///
    /// - Return [`PermissionError::ParseTable`] if the built-in tables are
    ///   malformed.
    pub fn builtin() -> Result<Self> {
        BUILTIN_TABLES.parse()
    }

    /// Load tables from TOML file.
    ///
    /// # Errors
    ///
    /// - Return [`PermissionError::ReadTable`] if file cannot be read.
    /// - Return [`PermissionError::ParseTable`] if file is malformed.
    /// - Return [`PermissionError::ShellExpansion`] if a path cannot be
    ///   expanded.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        read_to_string(path.as_ref())
            .map_err(|err| PermissionError::ReadTable {
                source: err,
                path: path.as_ref().to_path_buf(),
            })?
            .parse()
    }

    /// Select table for direction.
    pub fn table(&self, direction: Direction) -> &[PermissionEntry] {
        match direction {
            Direction::Lock => &self.lock,
            Direction::Unlock => &self.unlock,
        }
    }
}

impl FromStr for PermissionTables {
    type Err = PermissionError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut tables: PermissionTables =
            toml::de::from_str(data).map_err(PermissionError::ParseTable)?;

        // INVARIANT: Perform shell expansion on every path, against the live
        // process environment rather than the snapshot.
        for entry in tables.lock.iter_mut().chain(tables.unlock.iter_mut()) {
            entry.path = PathBuf::from(
                shellexpand::full(entry.path.to_string_lossy().as_ref())
                    .map_err(PermissionError::ShellExpansion)?
                    .into_owned(),
            );
        }

        Ok(tables)
    }
}

/// Path and the mode it should end up with.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize)]
pub struct PermissionEntry {
    pub path: PathBuf,
    pub mode: Mode,
}

impl PermissionEntry {
    pub fn new(path: impl Into<PathBuf>, mode: u32) -> Self {
        Self {
            path: path.into(),
            mode: Mode(mode),
        }
    }
}

/// Permission bits, written as an octal string in tables.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Deserialize)]
#[serde(try_from = "String")]
pub struct Mode(pub u32);

impl TryFrom<String> for Mode {
    type Error = InvalidMode;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let digits = value.trim_start_matches("0o");
        match u32::from_str_radix(digits, 8) {
            Ok(bits) if bits <= 0o7777 => Ok(Self(bits)),
            _ => Err(InvalidMode(value)),
        }
    }
}

impl Display for Mode {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(fmt, "{:04o}", self.0)
    }
}

/// What [`apply_permissions`] did.
#[derive(Debug, Default, PartialEq, Eq, Clone)]
pub struct PermissionReport {
    /// Paths whose mode was set.
    pub applied: Vec<PathBuf>,

    /// Paths skipped because they do not exist.
    pub missing: Vec<PathBuf>,
}

/// Apply permission tables of a project.
#[derive(Debug, Clone)]
pub struct PermissionToggle {
    root: PathBuf,
    tables: PermissionTables,
}

impl PermissionToggle {
    /// Construct new permission toggle for project.
    pub fn new(layout: &ProjectLayout, tables: PermissionTables) -> Self {
        Self {
            root: layout.root().to_path_buf(),
            tables,
        }
    }

    /// Remove write permissions on configuration files and folders.
    ///
    /// # Errors
    ///
    /// - Return [`PermissionError::SetMode`] if an existing path cannot be
    ///   changed.
    pub fn lock(&self) -> Result<PermissionReport> {
        self.apply(Direction::Lock)
    }

    /// Restore write permissions on configuration files and folders.
    ///
    /// # Errors
    ///
    /// - Return [`PermissionError::SetMode`] if an existing path cannot be
    ///   changed.
    pub fn unlock(&self) -> Result<PermissionReport> {
        self.apply(Direction::Unlock)
    }

    /// Apply table of given direction.
    ///
    /// # Errors
    ///
    /// - Return [`PermissionError::SetMode`] if an existing path cannot be
    ///   changed.
    #[instrument(skip(self), level = "debug")]
    pub fn apply(&self, direction: Direction) -> Result<PermissionReport> {
        info!("{direction} permissions under {:?}", self.root.display());
        apply_permissions(
            self.tables
                .table(direction)
                .iter()
                .map(|entry| (self.root.join(&entry.path), entry.mode.0)),
        )
    }
}

/// Set each existing path to its mode.
///
/// Paths that do not exist are logged and skipped.
///
/// # Errors
///
/// - Return [`PermissionError::SetMode`] if an existing path cannot be
///   changed. Entries after the failing one are not processed.
pub fn apply_permissions(
    entries: impl IntoIterator<Item = (impl AsRef<Path>, u32)>,
) -> Result<PermissionReport> {
    let mut report = PermissionReport::default();
    for (path, mode) in entries {
        let path = path.as_ref();
        if !path.exists() {
            warn!("{}: file does not exist", path.display());
            report.missing.push(path.to_path_buf());
            continue;
        }

        debug!("chmod {:04o} {:?}", mode, path.display());
        set_mode(path, mode).map_err(|err| PermissionError::SetMode {
            source: err,
            path: path.to_path_buf(),
            mode: Mode(mode),
        })?;
        report.applied.push(path.to_path_buf());
    }

    Ok(report)
}

/// Make sure the project's shared directory exists.
///
/// A freshly created directory gets mode 0755. An existing one keeps
/// whatever mode and owner it already has.
///
/// # Errors
///
/// - Return [`PermissionError::CreateShared`] if the directory cannot be
///   created.
/// - Return [`PermissionError::SetMode`] if the mode of the new directory
///   cannot be set.
#[instrument(skip(layout), level = "debug")]
pub fn ensure_shared_dir(layout: &ProjectLayout) -> Result<PathBuf> {
    let shared = layout.shared_dir();
    let Some(created) = mkdirp::mkdirp(&shared).map_err(|err| PermissionError::CreateShared {
        source: err,
        path: shared.clone(),
    })?
    else {
        debug!("{:?} already exists", shared.display());
        return Ok(shared);
    };

    info!("created {:?}", created.display());
    set_mode(&shared, 0o755).map_err(|err| PermissionError::SetMode {
        source: err,
        path: shared.clone(),
        mode: Mode(0o755),
    })?;

    Ok(shared)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

// Best we can do without unix mode bits is the read-only flag.
#[cfg(not(unix))]
fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    let mut permissions = std::fs::metadata(path)?.permissions();
    permissions.set_readonly(mode & 0o222 == 0);
    std::fs::set_permissions(path, permissions)
}

/// Mode string is not valid octal permission bits.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid permission mode {0:?}")]
pub struct InvalidMode(pub String);

/// Permission toggling error types.
#[derive(Debug, thiserror::Error)]
pub enum PermissionError {
    /// Mode of existing path cannot be set.
    #[error("failed to set mode {mode} on {:?}", path.display())]
    SetMode {
        #[source]
        source: std::io::Error,
        path: PathBuf,
        mode: Mode,
    },

    /// Shared directory cannot be created.
    #[error("failed to create shared directory at {:?}", path.display())]
    CreateShared {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Permission table file cannot be read.
    #[error("failed to read permission table at {:?}", path.display())]
    ReadTable {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Permission table is malformed.
    #[error(transparent)]
    ParseTable(#[from] toml::de::Error),

    /// Failed to perform shell expansion on table path.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),
}

/// Friendly result alias :3
pub type Result<T, E = PermissionError> = std::result::Result<T, E>;

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use std::{
        fs::{create_dir_all, metadata, write},
        os::unix::fs::PermissionsExt,
    };

    fn mode_of(path: impl AsRef<Path>) -> u32 {
        metadata(path).unwrap().permissions().mode() & 0o7777
    }

    #[test]
    fn builtin_tables_keep_lock_unlock_asymmetry() -> anyhow::Result<()> {
        let tables = PermissionTables::builtin()?;
        assert_eq!(tables.lock.len(), 5);
        assert_eq!(tables.unlock.len(), 3);
        assert_eq!(
            tables.lock[2],
            PermissionEntry::new("web/sites/default/settings.php", 0o444)
        );
        assert!(!tables.unlock.iter().any(|entry| entry.path == Path::new("dsh")));

        Ok(())
    }

    #[test]
    fn parse_table_rejects_bad_mode() {
        let result: Result<PermissionTables> = indoc! {r#"
            [[lock]]
            path = "web"
            mode = "0999"
        "#}
        .parse();
        assert!(matches!(result, Err(PermissionError::ParseTable(_))));
    }

    #[test]
    fn apply_permissions_skips_missing_paths() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let exists = dir.path().join("exists");
        let missing = dir.path().join("missing");
        create_dir_all(&exists)?;

        let report = apply_permissions([(&exists, 0o755), (&missing, 0o755)])?;
        assert_eq!(mode_of(&exists), 0o755);
        assert_eq!(report.applied, vec![exists]);
        assert_eq!(report.missing, vec![missing]);

        Ok(())
    }

    #[test]
    fn lock_after_unlock_yields_lock_modes() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let layout = ProjectLayout::new(dir.path());
        create_dir_all(layout.site_dir())?;
        write(layout.settings(), "<?php\n")?;
        write(layout.site_dir().join("default.services.yml"), "parameters:\n")?;

        let toggle = PermissionToggle::new(&layout, PermissionTables::builtin()?);
        toggle.lock()?;
        toggle.unlock()?;
        toggle.unlock()?;
        let report = toggle.lock()?;

        assert_eq!(mode_of(layout.site_dir()), 0o555);
        assert_eq!(mode_of(layout.settings()), 0o444);
        assert_eq!(report.missing.len(), 2);

        // Let tempdir clean up after itself.
        toggle.unlock()?;
        assert_eq!(mode_of(layout.site_dir()), 0o755);
        assert_eq!(mode_of(layout.settings()), 0o664);

        Ok(())
    }

    #[test]
    fn ensure_shared_dir_creates_directory() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let layout = ProjectLayout::new(dir.path());
        let shared = ensure_shared_dir(&layout)?;
        assert!(shared.is_dir());
        assert_eq!(mode_of(&shared), 0o755);

        // Second run is a no-op.
        ensure_shared_dir(&layout)?;

        Ok(())
    }

    #[test]
    fn ensure_shared_dir_keeps_existing_mode() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let layout = ProjectLayout::new(dir.path());
        create_dir_all(layout.shared_dir())?;
        set_mode(&layout.shared_dir(), 0o2775)?;

        ensure_shared_dir(&layout)?;
        assert_eq!(mode_of(layout.shared_dir()), 0o2775);

        Ok(())
    }
}
