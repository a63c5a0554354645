// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! External command execution.
//!
//! Build tasks delegate the real work to external tools like drush, phpcs,
//! and friends. Every call blocks until the child exits, and a non-zero exit
//! status aborts the task that made the call. Nothing is retried.
//!
//! Command execution sits behind the [`CommandRunner`] trait so build tasks
//! can be exercised without spawning anything.

use std::{
    ffi::{OsStr, OsString},
    fmt::{Display, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
    process::{Command, Stdio},
};
use tracing::{debug, instrument};

/// Program and arguments of an external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    program: OsString,
    args: Vec<OsString>,
}

impl Invocation {
    /// Construct new invocation of program.
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Append argument.
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append listing of arguments.
    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<OsString>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Append argument if present.
    pub fn arg_opt(self, arg: Option<impl Into<OsString>>) -> Self {
        match arg {
            Some(arg) => self.arg(arg),
            None => self,
        }
    }

    pub fn program(&self) -> &OsStr {
        self.program.as_os_str()
    }

    pub fn arguments(&self) -> &[OsString] {
        &self.args
    }
}

impl Display for Invocation {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(&self.program.to_string_lossy())?;
        for arg in &self.args {
            write!(fmt, " {}", arg.to_string_lossy())?;
        }

        Ok(())
    }
}

/// Run external commands.
pub trait CommandRunner {
    /// Run command with inherited stdio, blocking until it exits.
    fn run(&self, invocation: &Invocation) -> Result<()>;

    /// Run command and capture its standard output.
    fn capture(&self, invocation: &Invocation) -> Result<String>;
}

/// Run commands as child processes of the current process.
#[derive(Debug, Default, Clone)]
pub struct SystemRunner {
    cwd: Option<PathBuf>,
}

impl SystemRunner {
    /// Construct new runner that executes commands inside directory.
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: Some(cwd.into()),
        }
    }

    fn command(&self, invocation: &Invocation) -> Command {
        let mut command = Command::new(invocation.program());
        command.args(invocation.arguments());
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }

        command
    }
}

impl CommandRunner for SystemRunner {
    #[instrument(skip(self), level = "debug")]
    fn run(&self, invocation: &Invocation) -> Result<()> {
        debug!("run {invocation}");
        let status = self
            .command(invocation)
            .spawn()
            .and_then(|mut child| child.wait())
            .map_err(|err| ExecError::Spawn {
                source: err,
                program: invocation.to_string(),
            })?;

        if !status.success() {
            return Err(ExecError::ExternalCommandFailed {
                program: invocation.to_string(),
                code: status.code(),
                message: String::new(),
            });
        }

        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    fn capture(&self, invocation: &Invocation) -> Result<String> {
        debug!("capture {invocation}");
        let output = self
            .command(invocation)
            .stdin(Stdio::null())
            .output()
            .map_err(|err| ExecError::Spawn {
                source: err,
                program: invocation.to_string(),
            })?;
        let stdout = String::from_utf8_lossy(output.stdout.as_slice()).into_owned();

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(output.stderr.as_slice());
            return Err(ExecError::ExternalCommandFailed {
                program: invocation.to_string(),
                code: output.status.code(),
                message: chomp(&stderr).to_owned(),
            });
        }

        Ok(chomp(&stdout).to_owned())
    }
}

// INVARIANT: Chomp trailing newlines.
fn chomp(message: &str) -> &str {
    message
        .strip_suffix("\r\n")
        .or(message.strip_suffix('\n'))
        .unwrap_or(message)
}

/// Builder for drush invocations.
///
/// Produces `<drush> <command> [args...] [--option[=value]...]`.
#[derive(Debug, Clone)]
pub struct Drush {
    invocation: Invocation,
    options: Vec<OsString>,
}

impl Drush {
    /// Start drush invocation of a command using binary at path.
    pub fn new(binary: impl AsRef<Path>, command: impl Into<OsString>) -> Self {
        Self {
            invocation: Invocation::new(binary.as_ref().as_os_str()).arg(command),
            options: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.invocation = self.invocation.arg(arg);
        self
    }

    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<OsString>>) -> Self {
        self.invocation = self.invocation.args(args);
        self
    }

    /// Add `--name` flag.
    pub fn flag(mut self, name: &str) -> Self {
        self.options.push(format!("--{name}").into());
        self
    }

    /// Add `--name=value` option.
    pub fn option(mut self, name: &str, value: impl AsRef<OsStr>) -> Self {
        let mut option = OsString::from(format!("--{name}="));
        option.push(value.as_ref());
        self.options.push(option);
        self
    }

    /// Add `--name=value` option if value is present.
    pub fn option_opt(self, name: &str, value: Option<impl AsRef<OsStr>>) -> Self {
        match value {
            Some(value) => self.option(name, value),
            None => self,
        }
    }

    /// Shorthand for `--yes`.
    pub fn yes(self) -> Self {
        self.flag("yes")
    }

    pub fn build(self) -> Invocation {
        self.invocation.args(self.options)
    }
}

/// Command execution error types.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// Command could not be started at all.
    #[error("failed to run {program:?}")]
    Spawn {
        #[source]
        source: std::io::Error,
        program: String,
    },

    /// Command exited unsuccessfully.
    #[error("command {program:?} failed{}{}", exit_code(code), detail(message))]
    ExternalCommandFailed {
        program: String,
        code: Option<i32>,
        message: String,
    },
}

fn exit_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!(" with exit code {code}"),
        None => " by signal".into(),
    }
}

fn detail(message: &str) -> String {
    if message.is_empty() {
        String::new()
    } else {
        format!(":\n{message}")
    }
}

/// Friendly result alias :3
pub type Result<T, E = ExecError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn drush_invocation_layout() {
        let result = Drush::new("vendor/bin/drush", "site:install")
            .arg("standard")
            .option("account-name", "admin")
            .option_opt("site-mail", None::<&str>)
            .yes()
            .build()
            .to_string();
        assert_eq!(
            result,
            "vendor/bin/drush site:install standard --account-name=admin --yes"
        );
    }

    #[cfg(unix)]
    #[test]
    fn system_runner_reports_failure() {
        let runner = SystemRunner::default();
        let result = runner.run(&Invocation::new("sh").args(["-c", "exit 3"]));
        assert!(matches!(
            result,
            Err(ExecError::ExternalCommandFailed { code: Some(3), .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn system_runner_captures_stdout() -> anyhow::Result<()> {
        let runner = SystemRunner::default();
        let result = runner.capture(&Invocation::new("sh").args(["-c", "echo admin"]))?;
        assert_eq!(result, "admin");

        Ok(())
    }
}
