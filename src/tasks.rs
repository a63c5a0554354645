// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Build and development tasks.
//!
//! Thin wrappers over external tools, drush mostly. Each task runs its steps
//! in order and stops at the first failure. Tasks read their inputs from an
//! explicit [`RuntimeConfig`] and [`EnvSnapshot`] handed over at construction
//! time, never from the process environment.

use crate::{
    config::{ProjectLayout, RuntimeConfig},
    env::EnvSnapshot,
    exec::{CommandRunner, Drush, ExecError, Invocation},
    patch::{replace_in_file, toggle_twig_debug, PatchError},
};

use std::{
    ffi::OsString,
    fs::remove_dir_all,
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument, warn};

/// Drush binary, relative to project root.
pub const DRUSH: &str = "vendor/bin/drush";

/// Present when PHP runs under s6 supervision.
pub const S6_PHP_FPM_RUN: &str = "/etc/s6-overlay/s6-rc.d/php-fpm/run";

/// Default password given to the admin user by [`Tasks::dev_reset_admin_pass`].
pub const DEFAULT_ADMIN_PASSWORD: &str = "password";

/// Default dump name used by [`Tasks::dev_export_db`].
pub const DEFAULT_DUMP_NAME: &str = "dump";

const ADMIN_NAME_QUERY: &str =
    "SELECT name FROM users u LEFT JOIN users_field_data ud ON u.uid = ud.uid WHERE u.uid = 1";

/// Paths removed by [`Tasks::build_clean`], relative to project root.
const CLEAN_PATHS: &[&str] = &[
    "web/core",
    "web/modules/contrib",
    "web/profiles/contrib",
    "web/themes/contrib",
    "web/sites/all",
    "bin",
    "vendor",
];

/// Build and development tasks of a Drupal project.
#[derive(Debug)]
pub struct Tasks<R>
where
    R: CommandRunner,
{
    config: RuntimeConfig,
    env: EnvSnapshot,
    layout: ProjectLayout,
    runner: R,
    s6_marker: PathBuf,
}

impl<R> Tasks<R>
where
    R: CommandRunner,
{
    /// Construct new task set.
    pub fn new(config: RuntimeConfig, env: EnvSnapshot, layout: ProjectLayout, runner: R) -> Self {
        Self {
            config,
            env,
            layout,
            runner,
            s6_marker: PathBuf::from(S6_PHP_FPM_RUN),
        }
    }

    /// Use different marker file to detect s6 supervision.
    pub fn with_s6_marker(mut self, marker: impl Into<PathBuf>) -> Self {
        self.s6_marker = marker.into();
        self
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    fn drush(&self, command: &str) -> Drush {
        Drush::new(DRUSH, command)
    }

    fn site(&self, key: &str) -> Option<&str> {
        self.config.get("site", key)
    }

    /// Perform a full build of the project.
    ///
    /// Validates composer.json and installs Drupal. If `SITE_UUID` is set, the
    /// new site takes over that UUID and, unless `IMPORT_CONFIG=false`, imports
    /// the config-sync directory.
    ///
    /// # Errors
    ///
    /// - Return [`TaskError::Exec`] if any external command fails.
    #[instrument(skip(self), level = "debug")]
    pub fn build(&self) -> Result<()> {
        self.runner.run(
            &Invocation::new("composer")
                .arg("validate")
                .arg("--no-check-publish"),
        )?;

        self.build_install()?;

        let Some(uuid) = self.site("uuid") else {
            return Ok(());
        };

        info!("set site uuid to {uuid}");
        self.runner.run(
            &self
                .drush("config:set")
                .args(["system.site", "uuid", uuid])
                .yes()
                .build(),
        )?;
        self.dev_cache_rebuild()?;

        if self.env.get("IMPORT_CONFIG") != Some("false") {
            self.runner
                .run(&self.drush("config:import").arg("--partial").yes().build())?;
        }

        Ok(())
    }

    /// Install Drupal with the configured profile and site details.
    ///
    /// # Errors
    ///
    /// - Return [`TaskError::Exec`] if drush fails.
    #[instrument(skip(self), level = "debug")]
    pub fn build_install(&self) -> Result<()> {
        info!("install drupal with profile {}", self.config.profile());
        let invocation = self
            .drush("site:install")
            .arg(self.config.profile())
            .option_opt("account-mail", self.site("admin_email"))
            .option_opt("account-name", self.site("admin_user"))
            .option_opt("account-pass", self.site("admin_password"))
            .option_opt("site-name", self.site("title"))
            .option_opt("site-mail", self.site("mail"))
            .yes()
            .build();

        Ok(self.runner.run(&invocation)?)
    }

    /// Remove installed dependencies in preparation for a new build.
    ///
    /// # Errors
    ///
    /// - Return [`TaskError::Clean`] if an existing path cannot be removed.
    #[instrument(skip(self), level = "debug")]
    pub fn build_clean(&self) -> Result<()> {
        for path in CLEAN_PATHS.iter().map(|path| self.layout.root().join(path)) {
            if !path.exists() {
                debug!("{:?} already gone", path.display());
                continue;
            }

            info!("remove {:?}", path.display());
            remove_dir_all(&path).map_err(|err| TaskError::Clean { source: err, path })?;
        }

        Ok(())
    }

    /// Run database updates.
    ///
    /// # Errors
    ///
    /// - Return [`TaskError::Exec`] if drush fails.
    pub fn build_update(&self) -> Result<()> {
        Ok(self.runner.run(&self.drush("updatedb").yes().build())?)
    }

    /// Set `RewriteBase` in `.htaccess` to the configured site path.
    ///
    /// Does nothing without a site path.
    ///
    /// # Errors
    ///
    /// - Return [`TaskError::Patch`] if `.htaccess` lacks the commented
    ///   `RewriteBase` line.
    pub fn set_site_path(&self) -> Result<()> {
        let Some(path) = self.site("path") else {
            return Ok(());
        };

        info!("setting site path");
        replace_in_file(
            self.layout.htaccess(),
            "# RewriteBase /drupal",
            &format!("\n  RewriteBase /{}\n", path.trim_start_matches('/')),
        )?;

        Ok(())
    }

    /// Rebuild caches and reload PHP.
    ///
    /// PHP is not reloaded when running under GitLab CI.
    ///
    /// # Errors
    ///
    /// - Return [`TaskError::Exec`] if any external command fails.
    pub fn dev_cache_rebuild(&self) -> Result<()> {
        self.runner.run(&self.drush("cache:rebuild").build())?;
        if !self.env.is_set("GITLAB_CI") {
            self.reload_php()?;
        }

        Ok(())
    }

    /// Turn on twig debug mode, auto reload on, and caching off.
    ///
    /// # Errors
    ///
    /// - Return [`TaskError::Patch`] if `services.yml` is not in production
    ///   state.
    /// - Return [`TaskError::Exec`] if any external command fails.
    pub fn dev_twig_debug_enable(&self) -> Result<()> {
        self.dev_aggregate_assets_disable(false)?;
        toggle_twig_debug(self.layout.services_yml(), true)?;
        self.dev_cache_rebuild()
    }

    /// Turn off twig debug mode, auto reload off, and caching on.
    ///
    /// # Errors
    ///
    /// - Return [`TaskError::Patch`] if `services.yml` is not in debugging
    ///   state.
    /// - Return [`TaskError::Exec`] if any external command fails.
    pub fn dev_twig_debug_disable(&self) -> Result<()> {
        toggle_twig_debug(self.layout.services_yml(), false)?;
        self.dev_cache_rebuild()
    }

    /// Disable CSS and JS aggregation.
    ///
    /// # Errors
    ///
    /// - Return [`TaskError::Exec`] if any external command fails.
    pub fn dev_aggregate_assets_disable(&self, cache_clear: bool) -> Result<()> {
        self.preprocess_set(0, cache_clear)
    }

    /// Enable CSS and JS aggregation.
    ///
    /// # Errors
    ///
    /// - Return [`TaskError::Exec`] if any external command fails.
    pub fn dev_aggregate_assets_enable(&self, cache_clear: bool) -> Result<()> {
        self.preprocess_set(1, cache_clear)
    }

    fn preprocess_set(&self, status: u8, cache_clear: bool) -> Result<()> {
        for kind in ["js", "css"] {
            self.runner.run(
                &self
                    .drush("config:set")
                    .args([
                        "system.performance".to_string(),
                        format!("{kind}.preprocess"),
                        status.to_string(),
                    ])
                    .yes()
                    .build(),
            )?;
        }

        if cache_clear {
            self.dev_cache_rebuild()?;
        }

        Ok(())
    }

    /// Enable xdebug.
    ///
    /// Only acts when `XDEBUG_CONFIG` is set. Returns whether xdebug was
    /// actually switched on.
    ///
    /// # Errors
    ///
    /// - Return [`TaskError::Xdebug`] if xdebug cannot be enabled.
    #[instrument(skip(self), level = "debug")]
    pub fn dev_xdebug_enable(&self, reload: bool) -> Result<bool> {
        if !self.env.is_set("XDEBUG_CONFIG") {
            return Ok(false);
        }

        if self.xdebug_loaded()? {
            info!("xdebug already enabled");
            return Ok(false);
        }

        info!("enabling xdebug");
        self.runner
            .capture(&php_module_toggle("phpenmod"))
            .map_err(|err| TaskError::Xdebug {
                action: "enable",
                source: err,
            })?;
        if reload {
            self.reload_php()?;
        }
        info!("enabled xdebug");

        Ok(true)
    }

    /// Disable xdebug.
    ///
    /// Only acts when `XDEBUG_CONFIG` is set. Returns whether xdebug was
    /// actually switched off.
    ///
    /// # Errors
    ///
    /// - Return [`TaskError::Xdebug`] if xdebug cannot be disabled.
    #[instrument(skip(self), level = "debug")]
    pub fn dev_xdebug_disable(&self, reload: bool) -> Result<bool> {
        if !self.env.is_set("XDEBUG_CONFIG") {
            return Ok(false);
        }

        if !self.xdebug_loaded()? {
            info!("xdebug already disabled");
            return Ok(false);
        }

        info!("disabling xdebug");
        self.runner
            .capture(&php_module_toggle("phpdismod"))
            .map_err(|err| TaskError::Xdebug {
                action: "disable",
                source: err,
            })?;
        if reload {
            self.reload_php()?;
        }
        info!("disabled xdebug");

        Ok(true)
    }

    /// Run closure with xdebug switched off.
    ///
    /// If xdebug was switched off for the closure, it is switched back on
    /// afterwards no matter how the closure or the PHP reload after
    /// disabling returns. An error from the
    /// closure takes priority over an error while switching xdebug back on.
    ///
    /// # Errors
    ///
    /// - Return [`TaskError::Xdebug`] if xdebug cannot be toggled.
    /// - Return whatever error the closure returns.
    pub fn with_xdebug_disabled<T, F>(&self, body: F) -> Result<T>
    where
        F: FnOnce(&Self) -> Result<T>,
    {
        if !self.dev_xdebug_disable(false)? {
            return body(self);
        }

        // INVARIANT: Module is switched off from here, so every path re-enables it.
        let result = self.reload_php().and_then(|()| body(self));

        match (result, self.dev_xdebug_enable(true)) {
            (Ok(value), Ok(_)) => Ok(value),
            (Ok(_), Err(err)) => Err(err),
            (Err(err), Ok(_)) => Err(err),
            (Err(err), Err(restore_err)) => {
                warn!("failed to re-enable xdebug: {restore_err}");
                Err(err)
            }
        }
    }

    fn xdebug_loaded(&self) -> Result<bool> {
        let modules = self.runner.capture(&Invocation::new("php").arg("-m"))?;
        Ok(modules
            .lines()
            .any(|module| module.trim().eq_ignore_ascii_case("xdebug")))
    }

    fn reload_php(&self) -> Result<()> {
        if self.s6_marker.exists() {
            self.runner.run(
                &Invocation::new("sudo")
                    .arg("/command/s6-svc")
                    .args(["-r", "/service/php-fpm"]),
            )?;
        } else {
            warn!("you will need to start ./dsh again");
            self.runner
                .run(&Invocation::new("sudo").args(["kill", "-HUP", "1"]))?;
        }

        Ok(())
    }

    /// Import database dump, then rebuild caches and reset admin password.
    ///
    /// # Errors
    ///
    /// - Return [`TaskError::Exec`] if any external command fails.
    #[instrument(skip(self, sql_file), level = "debug")]
    pub fn dev_import_db(&self, sql_file: impl AsRef<Path>) -> Result<()> {
        self.runner.run(&self.drush("sql:drop").yes().build())?;
        self.runner.run(
            &self
                .drush("sql:query")
                .option("file", sql_file.as_ref())
                .build(),
        )?;
        self.dev_cache_rebuild()?;
        self.dev_reset_admin_pass(DEFAULT_ADMIN_PASSWORD)
    }

    /// Reset password of user 1, whatever its name is.
    ///
    /// # Errors
    ///
    /// - Return [`TaskError::NoAdminUser`] if user 1 cannot be found.
    /// - Return [`TaskError::Exec`] if the password reset fails.
    #[instrument(skip(self, password), level = "debug")]
    pub fn dev_reset_admin_pass(&self, password: &str) -> Result<()> {
        let admin = self
            .runner
            .capture(&self.drush("sql:query").arg(ADMIN_NAME_QUERY).build())
            .map_err(|err| TaskError::NoAdminUser { source: Some(err) })?;
        let admin = admin.trim();
        if admin.is_empty() {
            return Err(TaskError::NoAdminUser { source: None });
        }

        info!("reset password of {admin}");
        self.runner
            .run(&self.drush("user:password").args([admin, password]).build())?;

        Ok(())
    }

    /// Export gzipped database dump named `<name>.sql.gz`.
    ///
    /// # Errors
    ///
    /// - Return [`TaskError::Exec`] if drush fails.
    pub fn dev_export_db(&self, name: &str) -> Result<()> {
        Ok(self.runner.run(
            &self
                .drush("sql:dump")
                .flag("gzip")
                .option("result-file", format!("{name}.sql"))
                .build(),
        )?)
    }

    /// Run coding standards checks on PHP files.
    ///
    /// # Errors
    ///
    /// - Return [`TaskError::Exec`] if a linter reports violations.
    pub fn dev_lint_php(&self, path: Option<&Path>) -> Result<()> {
        self.runner.run(&Invocation::new("phpcs").arg_opt(path.map(OsString::from)))?;
        self.runner
            .run(&Invocation::new("phpstan").args(["analyze", "--no-progress"]))?;

        Ok(())
    }

    /// Fix coding standards violations in PHP files.
    ///
    /// # Errors
    ///
    /// - Return [`TaskError::Exec`] if phpcbf fails.
    pub fn dev_lint_fix(&self, path: Option<&Path>) -> Result<()> {
        Ok(self
            .runner
            .run(&Invocation::new("phpcbf").arg_opt(path.map(OsString::from)))?)
    }
}

fn php_module_toggle(tool: &str) -> Invocation {
    Invocation::new("sudo")
        .arg(tool)
        .args(["-v", "ALL", "-s", "ALL", "xdebug"])
}

/// Build task error types.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// External command fails.
    #[error(transparent)]
    Exec(#[from] ExecError),

    /// File patching fails.
    #[error(transparent)]
    Patch(#[from] PatchError),

    /// Build artifact cannot be removed.
    #[error("failed to remove {:?}", path.display())]
    Clean {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Xdebug cannot be toggled.
    #[error("unable to {action} xdebug")]
    Xdebug {
        action: &'static str,
        #[source]
        source: ExecError,
    },

    /// User 1 cannot be found.
    #[error("no user with uid 1, this is probably bad")]
    NoAdminUser {
        #[source]
        source: Option<ExecError>,
    },
}

/// Friendly result alias :3
pub type Result<T, E = TaskError> = std::result::Result<T, E>;
