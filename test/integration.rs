// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::{ProjectFixture, ProjectKind, DEFAULT_SETTINGS};

use anyhow::Result;
use pretty_assertions::assert_eq;
use shepherd::{
    env::EnvSnapshot,
    hook::{run_hook, HookEvent},
    permissions::PermissionTables,
    settings::{Outcome, END_MARKER, LOCAL_START_MARKER, START_MARKER},
};

fn env(pairs: &[(&str, &str)]) -> EnvSnapshot {
    pairs.iter().copied().collect()
}

#[test]
fn post_install_generates_settings_from_scaffold() -> Result<()> {
    let project = ProjectFixture::new(ProjectKind::Full)?;
    let env = env(&[
        ("SHEPHERD_INSTALL_PROFILE", "standard"),
        ("HASH_SALT", "supplied-salt"),
    ]);

    let report = run_hook(
        HookEvent::PostInstall,
        project.layout(),
        PermissionTables::builtin()?,
        &env,
    )?;
    assert_eq!(report.settings, Some(Outcome::Generated));
    assert!(report.permissions.missing.is_empty());

    let settings = project.settings()?;
    assert!(settings.starts_with(DEFAULT_SETTINGS));
    assert!(settings.contains(START_MARKER));
    assert!(settings.contains(END_MARKER));
    assert!(settings.contains("  'driver' => 'mysql',\n"));
    assert!(settings.contains("  'database' => 'drupal',\n"));
    assert!(!settings.contains("'sqlite'"));
    assert!(settings.contains("$settings['hash_salt'] = 'supplied-salt';\n"));
    assert!(project.layout().shared_dir().is_dir());

    Ok(())
}

#[test]
fn repeated_post_install_leaves_settings_alone() -> Result<()> {
    let project = ProjectFixture::new(ProjectKind::Full)?;
    let env = EnvSnapshot::default();

    run_hook(HookEvent::PostInstall, project.layout(), PermissionTables::builtin()?, &env)?;
    let first = project.settings()?;

    run_hook(HookEvent::PreUpdate, project.layout(), PermissionTables::builtin()?, &env)?;
    let report = run_hook(HookEvent::PostUpdate, project.layout(), PermissionTables::builtin()?, &env)?;
    let second = project.settings()?;

    assert_eq!(report.settings, Some(Outcome::AlreadyPresent));
    assert_eq!(first, second);
    assert_eq!(second.matches(START_MARKER).count(), 1);
    assert_eq!(second.matches(LOCAL_START_MARKER).count(), 1);

    Ok(())
}

#[cfg(unix)]
#[test]
fn hooks_toggle_permission_tables() -> Result<()> {
    let project = ProjectFixture::new(ProjectKind::Full)?;
    let env = EnvSnapshot::default();

    run_hook(HookEvent::PostCreateProject, project.layout(), PermissionTables::builtin()?, &env)?;
    assert_eq!(project.mode_of("web/sites/default")?, 0o555);
    assert_eq!(project.mode_of("web/sites/default/settings.php")?, 0o444);
    assert_eq!(project.mode_of("dsh")?, 0o755);

    let report = run_hook(HookEvent::PreInstall, project.layout(), PermissionTables::builtin()?, &env)?;
    assert_eq!(report.settings, None);
    assert_eq!(project.mode_of("web/sites/default")?, 0o755);
    assert_eq!(project.mode_of("web/sites/default/settings.php")?, 0o664);

    Ok(())
}

#[cfg(unix)]
#[test]
fn post_install_keeps_existing_shared_dir_mode() -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let project = ProjectFixture::new(ProjectKind::Full)?;
    let shared = project.layout().shared_dir();
    std::fs::create_dir(&shared)?;
    std::fs::set_permissions(&shared, std::fs::Permissions::from_mode(0o2775))?;

    run_hook(
        HookEvent::PostInstall,
        project.layout(),
        PermissionTables::builtin()?,
        &EnvSnapshot::default(),
    )?;
    assert_eq!(project.mode_of("shared")?, 0o2775);

    Ok(())
}

#[test]
fn pre_install_on_fresh_project_only_warns() -> Result<()> {
    let project = ProjectFixture::new(ProjectKind::TemplateOnly)?;

    let report = run_hook(
        HookEvent::PreInstall,
        project.layout(),
        PermissionTables::builtin()?,
        &EnvSnapshot::default(),
    )?;
    assert_eq!(report.permissions.applied.len(), 2);
    assert_eq!(
        report.permissions.missing,
        vec![project.layout().settings()]
    );

    Ok(())
}

#[test]
fn post_install_without_scaffold_fails() -> Result<()> {
    let project = ProjectFixture::new(ProjectKind::Bare)?;

    let result = run_hook(
        HookEvent::PostInstall,
        project.layout(),
        PermissionTables::builtin()?,
        &EnvSnapshot::default(),
    );
    assert!(result.is_err());
    assert!(!project.layout().settings().exists());

    Ok(())
}

#[cfg(unix)]
#[test]
fn custom_permission_table() -> Result<()> {
    let project = ProjectFixture::new(ProjectKind::Full)?;
    let tables: PermissionTables = indoc::indoc! {r#"
        [[lock]]
        path = "dsh"
        mode = "0500"
    "#}
    .parse()?;

    run_hook(HookEvent::PostInstall, project.layout(), tables, &EnvSnapshot::default())?;
    assert_eq!(project.mode_of("dsh")?, 0o500);

    Ok(())
}
