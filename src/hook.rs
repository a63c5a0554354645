// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Installation lifecycle hook.
//!
//! The package manager calls into Shepherd around dependency installation.
//! Before install or update starts, configuration is unlocked so the package
//! manager may write into the site directory. After install, update, or
//! project creation finishes, the settings file is generated if needed and
//! configuration is locked again.

use crate::{
    config::ProjectLayout,
    env::EnvSnapshot,
    permissions::{ensure_shared_dir, PermissionError, PermissionReport, PermissionTables, PermissionToggle},
    settings::{Outcome, SettingsEmitter, SettingsError},
};

use clap::ValueEnum;
use std::fmt::{Display, Formatter, Result as FmtResult};
use tracing::{info, instrument};

/// Lifecycle events Shepherd reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum HookEvent {
    PreInstall,
    PreUpdate,
    PostInstall,
    PostUpdate,
    PostCreateProject,
}

impl HookEvent {
    /// Check if event fires before dependencies are touched.
    pub fn is_pre(self) -> bool {
        matches!(self, Self::PreInstall | Self::PreUpdate)
    }
}

impl Display for HookEvent {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        let name = match self {
            Self::PreInstall => "pre-install",
            Self::PreUpdate => "pre-update",
            Self::PostInstall => "post-install",
            Self::PostUpdate => "post-update",
            Self::PostCreateProject => "post-create-project",
        };
        fmt.write_str(name)
    }
}

/// What a hook run did.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct HookReport {
    /// Settings generation outcome, post events only.
    pub settings: Option<Outcome>,

    /// Permission changes.
    pub permissions: PermissionReport,
}

/// Run hook for lifecycle event.
///
/// # Errors
///
/// - Return [`HookError::Settings`] if the settings file cannot be generated.
/// - Return [`HookError::Permissions`] if permissions cannot be applied or the
///   shared directory cannot be created.
#[instrument(skip(layout, tables, env), level = "debug")]
pub fn run_hook(
    event: HookEvent,
    layout: &ProjectLayout,
    tables: PermissionTables,
    env: &EnvSnapshot,
) -> Result<HookReport> {
    let toggle = PermissionToggle::new(layout, tables);

    if event.is_pre() {
        info!("restoring write permissions on settings files");
        return Ok(HookReport {
            settings: None,
            permissions: toggle.unlock()?,
        });
    }

    info!("creating settings.php file if not present");
    let outcome = SettingsEmitter::for_layout(layout).ensure_generated(env)?;
    ensure_shared_dir(layout)?;

    info!("removing write permissions on settings files");
    Ok(HookReport {
        settings: Some(outcome),
        permissions: toggle.lock()?,
    })
}

/// Lifecycle hook error types.
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Permissions(#[from] PermissionError),
}

/// Friendly result alias :3
pub type Result<T, E = HookError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn event_phase() {
        assert!(HookEvent::PreInstall.is_pre());
        assert!(HookEvent::PreUpdate.is_pre());
        assert!(!HookEvent::PostCreateProject.is_pre());
        assert_eq!(HookEvent::PostCreateProject.to_string(), "post-create-project");
    }

    #[test]
    fn post_hook_without_template_fails() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let layout = ProjectLayout::new(dir.path());
        std::fs::create_dir_all(layout.site_dir())?;

        let result = run_hook(
            HookEvent::PostInstall,
            &layout,
            PermissionTables::builtin()?,
            &EnvSnapshot::default(),
        );
        assert!(matches!(
            result,
            Err(HookError::Settings(SettingsError::SourceTemplateMissing { .. }))
        ));

        Ok(())
    }
}
