// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Runtime configuration layout.
//!
//! Specify the configuration that Shepherd's build tasks run against. All
//! values come from the [`EnvSnapshot`] captured at startup. Nothing here
//! touches the process environment directly, and nothing is mutated once
//! constructed.
//!
//! # General Layout
//!
//! Runtime configuration is a two level mapping of __category__ to __key__ to
//! value, e.g., `site.title` or `environment.hash_salt`. Empty values are
//! pruned before use, so a key is either present with a meaningful value or
//! absent entirely. A category that ends up empty is pruned as well.

use crate::env::EnvSnapshot;

use std::{
    collections::BTreeMap,
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
};

/// Variable naming the Drupal install profile.
pub const INSTALL_PROFILE_VAR: &str = "SHEPHERD_INSTALL_PROFILE";

/// Known configuration keys and the variables that populate them.
const ENV_KEYS: &[(&str, &str, &str)] = &[
    ("site", "title", "SITE_TITLE"),
    ("site", "mail", "SITE_MAIL"),
    ("site", "admin_email", "SITE_ADMIN_EMAIL"),
    ("site", "admin_user", "SITE_ADMIN_USERNAME"),
    ("site", "admin_password", "SITE_ADMIN_PASSWORD"),
    ("site", "path", "SITE_PATH"),
    ("site", "uuid", "SITE_UUID"),
    ("environment", "hash_salt", "HASH_SALT"),
];

/// Keys whose values never get printed.
const REDACTED_KEYS: &[&str] = &["admin_password", "hash_salt"];

type Categories = BTreeMap<String, BTreeMap<String, String>>;

/// Configuration for build tasks.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct RuntimeConfig {
    profile: String,
    categories: Categories,
}

impl RuntimeConfig {
    /// Construct runtime configuration from environment snapshot.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::MissingRequiredEnv`] if the install profile
    ///   variable is absent. Nothing else is evaluated in that case.
    pub fn from_env(env: &EnvSnapshot) -> Result<Self> {
        let profile = env
            .get(INSTALL_PROFILE_VAR)
            .ok_or(ConfigError::MissingRequiredEnv {
                name: INSTALL_PROFILE_VAR,
            })?
            .to_owned();

        let mut categories = Categories::new();
        for (category, key, var) in ENV_KEYS {
            // Absent and empty are the same thing to an environment snapshot.
            let value = env.get(var).unwrap_or_default();
            categories
                .entry(category.to_string())
                .or_default()
                .insert(key.to_string(), value.to_owned());
        }

        Ok(Self {
            profile,
            categories: prune(categories),
        })
    }

    /// Construct runtime configuration from literal parts.
    pub fn new(profile: impl Into<String>, categories: Categories) -> Self {
        Self {
            profile: profile.into(),
            categories: prune(categories),
        }
    }

    /// Drupal install profile.
    pub fn profile(&self) -> &str {
        &self.profile
    }

    /// Lookup value by category and key.
    pub fn get(&self, category: &str, key: &str) -> Option<&str> {
        self.categories
            .get(category)
            .and_then(|keys| keys.get(key))
            .map(String::as_str)
    }

    /// Check if category survived pruning.
    pub fn has_category(&self, category: &str) -> bool {
        self.categories.contains_key(category)
    }
}

impl Display for RuntimeConfig {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        let mut dump = self.categories.clone();
        dump.entry("install".into())
            .or_default()
            .insert("profile".into(), self.profile.clone());

        for keys in dump.values_mut() {
            for (key, value) in keys.iter_mut() {
                if REDACTED_KEYS.contains(&key.as_str()) {
                    *value = "********".into();
                }
            }
        }

        fmt.write_str(
            toml::ser::to_string_pretty(&dump)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Drop empty values, then drop categories left without keys.
///
/// The literal `"0"` is a meaningful value and is kept.
fn prune(categories: Categories) -> Categories {
    categories
        .into_iter()
        .filter_map(|(category, keys)| {
            let keys = keys
                .into_iter()
                .filter(|(_, value)| !value.is_empty())
                .collect::<BTreeMap<_, _>>();
            (!keys.is_empty()).then_some((category, keys))
        })
        .collect()
}

/// File system layout of a Drupal project.
///
/// Everything is derived from the project root, i.e., the directory holding
/// `composer.json` and `vendor/`.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ProjectLayout {
    root: PathBuf,
}

impl ProjectLayout {
    /// Construct new project layout.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Construct project layout from path that may need shell expansion.
    ///
    /// Expansion reads the live process environment, not an
    /// [`EnvSnapshot`](crate::env::EnvSnapshot).
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::ShellExpansion`] if expansion fails.
    pub fn expand(root: impl AsRef<str>) -> Result<Self> {
        let root = shellexpand::full(root.as_ref())
            .map_err(ConfigError::ShellExpansion)?
            .into_owned();

        Ok(Self::new(root))
    }

    pub fn root(&self) -> &Path {
        self.root.as_path()
    }

    pub fn web_root(&self) -> PathBuf {
        self.root.join("web")
    }

    /// Directory of the default site, i.e., `web/sites/default`.
    pub fn site_dir(&self) -> PathBuf {
        self.web_root().join("sites").join("default")
    }

    /// Generated settings file.
    pub fn settings(&self) -> PathBuf {
        self.site_dir().join("settings.php")
    }

    /// Scaffold template copied to [`Self::settings`] when missing.
    pub fn default_settings(&self) -> PathBuf {
        self.site_dir().join("default.settings.php")
    }

    pub fn services_yml(&self) -> PathBuf {
        self.site_dir().join("services.yml")
    }

    pub fn htaccess(&self) -> PathBuf {
        self.web_root().join(".htaccess")
    }

    pub fn shared_dir(&self) -> PathBuf {
        self.root.join("shared")
    }
}

/// Configuration error types.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ConfigError {
    /// Mandatory environment variable is absent.
    #[error("{name} environment variable not defined")]
    MissingRequiredEnv { name: &'static str },

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on project root.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    #[test]
    fn missing_install_profile_is_fatal() {
        let env: EnvSnapshot = [("SITE_TITLE", "Blah")].into_iter().collect();
        let result = RuntimeConfig::from_env(&env);
        assert!(matches!(
            result,
            Err(ConfigError::MissingRequiredEnv { name: INSTALL_PROFILE_VAR })
        ));
    }

    #[test]
    fn runtime_config_prunes_empty_values() -> anyhow::Result<()> {
        let env: EnvSnapshot = [
            ("SHEPHERD_INSTALL_PROFILE", "standard"),
            ("SITE_TITLE", "Blah blah"),
            ("SITE_MAIL", ""),
            ("SITE_ADMIN_USERNAME", "admin"),
        ]
        .into_iter()
        .collect();

        let config = RuntimeConfig::from_env(&env)?;
        assert_eq!(config.profile(), "standard");
        assert_eq!(config.get("site", "title"), Some("Blah blah"));
        assert_eq!(config.get("site", "mail"), None);
        assert_eq!(config.get("site", "admin_user"), Some("admin"));
        assert!(!config.has_category("environment"));

        Ok(())
    }

    #[test]
    fn prune_keeps_literal_zero() {
        let categories = Categories::from([(
            "site".to_string(),
            BTreeMap::from([
                ("path".to_string(), "0".to_string()),
                ("title".to_string(), String::new()),
            ]),
        )]);

        let config = RuntimeConfig::new("minimal", categories);
        assert_eq!(config.get("site", "path"), Some("0"));
        assert_eq!(config.get("site", "title"), None);
    }

    #[test]
    fn serialize_runtime_config_redacts_secrets() -> anyhow::Result<()> {
        let env: EnvSnapshot = [
            ("SHEPHERD_INSTALL_PROFILE", "standard"),
            ("SITE_TITLE", "Blah"),
            ("SITE_ADMIN_PASSWORD", "hunter2"),
            ("HASH_SALT", "salty"),
        ]
        .into_iter()
        .collect();

        let result = RuntimeConfig::from_env(&env)?.to_string();
        let expect = indoc! {r#"
            [environment]
            hash_salt = "********"

            [install]
            profile = "standard"

            [site]
            admin_password = "********"
            title = "Blah"
        "#};
        assert_eq!(result, expect);

        Ok(())
    }

    #[sealed_test(env = [("BLAH", "/home/blah/project")])]
    fn project_layout_shell_expansion() -> anyhow::Result<()> {
        let layout = ProjectLayout::expand("$BLAH")?;
        assert_eq!(
            layout.settings(),
            PathBuf::from("/home/blah/project/web/sites/default/settings.php")
        );
        assert_eq!(layout.shared_dir(), PathBuf::from("/home/blah/project/shared"));

        Ok(())
    }
}
