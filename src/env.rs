// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Environment snapshot.
//!
//! Shepherd is driven almost entirely by environment variables. Rather than
//! calling [`std::env::var`] wherever a value is needed, the environment is
//! captured exactly once at startup into an [`EnvSnapshot`], and that snapshot
//! is handed to every operation that needs it. Tests simply build a snapshot
//! from literal pairs.
//!
//! Shell expansion of user supplied paths, i.e., the `--project-root`
//! argument and paths in permission tables, is the one exception. It expands
//! `~` and `$VAR` against the live process environment, the same way a shell
//! would when it reads those paths.
//!
//! # Empty Values
//!
//! An empty variable is treated exactly like an absent one. Deployment tooling
//! commonly exports `FOO=` to "unset" a value, so `FOO=` must select the
//! default just like a missing `FOO` does.

use std::{
    collections::BTreeMap,
    fs::read_to_string,
    path::PathBuf,
};

/// Immutable view of environment variables.
#[derive(Default, Debug, PartialEq, Eq, Clone)]
pub struct EnvSnapshot {
    vars: BTreeMap<String, String>,
}

impl EnvSnapshot {
    /// Capture current process environment.
    ///
    /// Variables whose name or value is not valid unicode are skipped.
    pub fn capture() -> Self {
        Self {
            vars: std::env::vars_os()
                .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
                .collect(),
        }
    }

    /// Get non-empty value of variable.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars
            .get(name)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    /// Get non-empty value of variable, or fallback to default.
    pub fn get_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.get(name).unwrap_or(default)
    }

    /// Check if variable is set to a non-empty value.
    pub fn is_set(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Check if variable holds a truthy flag.
    ///
    /// Any non-empty value other than `0`, `false`, `no`, or `off` counts as
    /// enabled. Comparison is case-insensitive.
    pub fn flag(&self, name: &str) -> bool {
        match self.get(name) {
            Some(value) => !matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "0" | "false" | "no" | "off"
            ),
            None => false,
        }
    }

    /// Split comma separated variable into a list.
    ///
    /// An absent variable yields an empty list, never a list holding one empty
    /// string.
    pub fn list(&self, name: &str) -> Vec<String> {
        match self.get(name) {
            Some(value) => value.split(',').map(str::to_owned).collect(),
            None => Vec::new(),
        }
    }

    /// Resolve a secret that may be supplied through a `<NAME>_FILE` variable.
    ///
    /// If `<NAME>_FILE` is set, the referenced file's content is returned
    /// verbatim and the plain `<NAME>` variable is ignored. Otherwise the plain
    /// variable is used.
    ///
    /// # Errors
    ///
    /// - Return [`SecretFileError`] if `<NAME>_FILE` is set but cannot be read.
    pub fn secret(&self, name: &str) -> Result<Option<String>, SecretFileError> {
        let file_var = format!("{name}_FILE");
        if let Some(path) = self.get(&file_var) {
            let path = PathBuf::from(path);
            return read_to_string(&path)
                .map(Some)
                .map_err(|source| SecretFileError {
                    source,
                    variable: file_var,
                    path,
                });
        }

        Ok(self.get(name).map(str::to_owned))
    }
}

impl<K, V> FromIterator<(K, V)> for EnvSnapshot
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }
}

/// File referenced by a `_FILE` variable cannot be read.
#[derive(Debug, thiserror::Error)]
#[error("failed to read {variable} at {:?}", path.display())]
pub struct SecretFileError {
    #[source]
    pub source: std::io::Error,
    pub variable: String,
    pub path: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;
    use sealed_test::prelude::*;
    use simple_test_case::test_case;

    #[sealed_test(env = [("SHEPHERD_INSTALL_PROFILE", "standard"), ("DATABASE_NAME", "")])]
    fn capture_process_environment() {
        let env = EnvSnapshot::capture();
        assert_eq!(env.get("SHEPHERD_INSTALL_PROFILE"), Some("standard"));
        assert_eq!(env.get("DATABASE_NAME"), None);
        assert_eq!(env.get_or("DATABASE_NAME", "drupal"), "drupal");
    }

    #[test_case("1", true; "one")]
    #[test_case("true", true; "true word")]
    #[test_case("yes", true; "yes word")]
    #[test_case("0", false; "zero")]
    #[test_case("FALSE", false; "false uppercase")]
    #[test_case("off", false; "off word")]
    #[test_case("", false; "empty")]
    #[test]
    fn flag_truthiness(value: &str, expect: bool) {
        let env: EnvSnapshot = [("REDIS_ENABLED", value)].into_iter().collect();
        assert_eq!(env.flag("REDIS_ENABLED"), expect);
    }

    #[test]
    fn list_splits_on_comma_only_when_set() {
        let env = EnvSnapshot::default();
        assert_eq!(env.list("TRUSTED_HOST_PATTERNS"), Vec::<String>::new());

        let env: EnvSnapshot = [("TRUSTED_HOST_PATTERNS", "a,b,c")].into_iter().collect();
        assert_eq!(env.list("TRUSTED_HOST_PATTERNS"), vec!["a", "b", "c"]);
    }

    #[test]
    fn secret_file_takes_precedence() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("password");
        std::fs::write(&path, "s3cr3t")?;

        let env: EnvSnapshot = [
            ("DATABASE_PASSWORD", "plain".to_string()),
            ("DATABASE_PASSWORD_FILE", path.display().to_string()),
        ]
        .into_iter()
        .collect();
        assert_eq!(env.secret("DATABASE_PASSWORD")?, Some("s3cr3t".into()));

        let env: EnvSnapshot = [("DATABASE_PASSWORD", "plain")].into_iter().collect();
        assert_eq!(env.secret("DATABASE_PASSWORD")?, Some("plain".into()));

        Ok(())
    }

    #[test]
    fn secret_file_missing_is_error() {
        let env: EnvSnapshot = [("REDIS_PASSWORD_FILE", "/does/not/exist")].into_iter().collect();
        assert!(env.secret("REDIS_PASSWORD").is_err());
    }
}
