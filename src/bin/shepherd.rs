// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use shepherd::{
    config::{ProjectLayout, RuntimeConfig},
    env::EnvSnapshot,
    exec::SystemRunner,
    hook::{run_hook, HookEvent},
    permissions::{PermissionTables, PermissionToggle},
    settings::{Outcome, SettingsEmitter},
    tasks::{Tasks, DEFAULT_ADMIN_PASSWORD, DEFAULT_DUMP_NAME},
};

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::{path::PathBuf, process::exit};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "\n  shepherd [options] <shepherd-command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Path to Drupal project root.
    #[arg(short = 'C', long, global = true, default_value = ".", value_name = "path")]
    pub project_root: String,

    /// TOML file with lock and unlock permission tables.
    #[arg(short, long, global = true, value_name = "file")]
    pub permissions: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    fn run(self, env: EnvSnapshot) -> Result<()> {
        let layout = ProjectLayout::expand(&self.project_root)?;
        let tables = match &self.permissions {
            Some(path) => PermissionTables::from_file(path)?,
            None => PermissionTables::builtin()?,
        };

        match self.command {
            Command::Hook(opts) => run_hook_command(opts, &layout, tables, &env)?,
            Command::Generate => run_generate(&layout, &env)?,
            Command::Lock => {
                PermissionToggle::new(&layout, tables).lock()?;
            }
            Command::Unlock => {
                PermissionToggle::new(&layout, tables).unlock()?;
            }
            Command::Config => print!("{}", RuntimeConfig::from_env(&env)?),
            Command::Build => tasks(&layout, &env)?.with_xdebug_disabled(|tasks| tasks.build())?,
            Command::BuildInstall => tasks(&layout, &env)?.build_install()?,
            Command::BuildClean => tasks(&layout, &env)?.build_clean()?,
            Command::BuildUpdate => tasks(&layout, &env)?.build_update()?,
            Command::SitePath => tasks(&layout, &env)?.set_site_path()?,
            Command::CacheRebuild => tasks(&layout, &env)?.dev_cache_rebuild()?,
            Command::TwigDebug(opts) => {
                let tasks = tasks(&layout, &env)?;
                match opts.state {
                    Switch::On => tasks.dev_twig_debug_enable()?,
                    Switch::Off => tasks.dev_twig_debug_disable()?,
                }
            }
            Command::Aggregate(opts) => {
                let tasks = tasks(&layout, &env)?;
                match opts.state {
                    Switch::On => tasks.dev_aggregate_assets_enable(!opts.no_follow_up)?,
                    Switch::Off => tasks.dev_aggregate_assets_disable(!opts.no_follow_up)?,
                }
            }
            Command::Xdebug(opts) => {
                let tasks = tasks(&layout, &env)?;
                let changed = match opts.state {
                    Switch::On => tasks.dev_xdebug_enable(!opts.no_follow_up)?,
                    Switch::Off => tasks.dev_xdebug_disable(!opts.no_follow_up)?,
                };
                if !changed {
                    info!("xdebug left as is");
                }
            }
            Command::ImportDb(opts) => tasks(&layout, &env)?
                .with_xdebug_disabled(|tasks| tasks.dev_import_db(&opts.sql_file))?,
            Command::ResetAdminPass(opts) => {
                tasks(&layout, &env)?.dev_reset_admin_pass(&opts.password)?
            }
            Command::ExportDb(opts) => tasks(&layout, &env)?.dev_export_db(&opts.name)?,
            Command::Lint(opts) => tasks(&layout, &env)?.dev_lint_php(opts.path.as_deref())?,
            Command::LintFix(opts) => tasks(&layout, &env)?.dev_lint_fix(opts.path.as_deref())?,
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// React to package manager lifecycle event.
    #[command(override_usage = "shepherd hook <event>")]
    Hook(HookOptions),

    /// Generate settings.php block if not present.
    Generate,

    /// Remove write permissions on settings files.
    Lock,

    /// Restore write permissions on settings files.
    Unlock,

    /// Show runtime configuration read from environment.
    Config,

    /// Perform a full build of the project.
    Build,

    /// Install Drupal with configured profile.
    BuildInstall,

    /// Remove installed dependencies.
    BuildClean,

    /// Run database updates.
    BuildUpdate,

    /// Set RewriteBase in .htaccess to SITE_PATH.
    SitePath,

    /// Rebuild caches and reload PHP.
    CacheRebuild,

    /// Toggle twig debugging.
    TwigDebug(SwitchOptions),

    /// Toggle CSS and JS aggregation.
    Aggregate(SwitchOptions),

    /// Toggle xdebug.
    Xdebug(SwitchOptions),

    /// Import database dump and reset admin password.
    #[command(override_usage = "shepherd import-db <sql_file>")]
    ImportDb(ImportDbOptions),

    /// Reset password of user 1.
    #[command(override_usage = "shepherd reset-admin-pass [password]")]
    ResetAdminPass(ResetAdminPassOptions),

    /// Export gzipped database dump.
    #[command(override_usage = "shepherd export-db [name]")]
    ExportDb(ExportDbOptions),

    /// Run coding standards checks on PHP files.
    Lint(LintOptions),

    /// Fix coding standards violations in PHP files.
    LintFix(LintOptions),
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct HookOptions {
    /// Lifecycle event that fired.
    #[arg(value_enum, value_name = "event")]
    pub event: HookEvent,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct SwitchOptions {
    #[arg(value_enum, value_name = "state")]
    pub state: Switch,

    /// Skip the cache rebuild or PHP reload that normally follows.
    #[arg(long)]
    pub no_follow_up: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Switch {
    On,
    Off,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ImportDbOptions {
    /// Path to SQL file to import.
    #[arg(required = true, value_name = "sql_file")]
    pub sql_file: PathBuf,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ResetAdminPassOptions {
    /// New password for user 1.
    #[arg(default_value = DEFAULT_ADMIN_PASSWORD, value_name = "password")]
    pub password: String,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ExportDbOptions {
    /// Name of SQL file to export, without extension.
    #[arg(default_value = DEFAULT_DUMP_NAME, value_name = "name")]
    pub name: String,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct LintOptions {
    /// Optional path to lint.
    #[arg(value_name = "path")]
    pub path: Option<PathBuf>,
}

fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = run() {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

fn run() -> Result<()> {
    // INVARIANT: Capture environment exactly once.
    let env = EnvSnapshot::capture();
    Cli::parse().run(env)
}

fn run_hook_command(
    opts: HookOptions,
    layout: &ProjectLayout,
    tables: PermissionTables,
    env: &EnvSnapshot,
) -> Result<()> {
    info!("running {} hook", opts.event);
    let report = run_hook(opts.event, layout, tables, env)?;
    if !report.permissions.missing.is_empty() {
        info!(
            "{} permission paths skipped",
            report.permissions.missing.len()
        );
    }

    Ok(())
}

fn run_generate(layout: &ProjectLayout, env: &EnvSnapshot) -> Result<()> {
    let emitter = SettingsEmitter::for_layout(layout);
    match emitter.ensure_generated(env)? {
        Outcome::Generated => info!("generated {:?}", emitter.target().display()),
        Outcome::AlreadyPresent => info!("{:?} already generated", emitter.target().display()),
    }

    Ok(())
}

fn tasks(layout: &ProjectLayout, env: &EnvSnapshot) -> Result<Tasks<SystemRunner>> {
    let config = RuntimeConfig::from_env(env)?;
    let runner = SystemRunner::new(layout.root());
    Ok(Tasks::new(config, env.clone(), layout.clone(), runner))
}
