// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Generated settings file.
//!
//! Drupal reads its site configuration from `sites/default/settings.php`.
//! Shepherd appends a block of PHP statements to that file whose values come
//! from the environment snapshot, e.g., database credentials, cache backends,
//! reverse proxy headers, etc.
//!
//! # Marker Blocks
//!
//! The generated block is delimited by a `START SHEPHERD CONFIG` and
//! `END SHEPHERD CONFIG` marker pair. The start marker doubles as a sentinel:
//! if it already shows up anywhere in the settings file, then generation has
//! already happened and the file is left alone. Re-running the install hook
//! must never duplicate the block.
//!
//! A second `START LOCAL CONFIG` block is appended after the generated block.
//! It includes `settings.local.php` at load time if that file exists, so
//! developers can layer their own overrides on top without touching the
//! generated block.
//!
//! # Hash Salt
//!
//! Drupal signs sessions and form tokens with `$settings['hash_salt']`. Its
//! value is written into the file once. A fresh salt is only generated when
//! `HASH_SALT` is unset and the file does not already carry a non-empty salt,
//! because regenerating it invalidates every existing session.

use crate::{
    config::ProjectLayout,
    env::{EnvSnapshot, SecretFileError},
};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::{rngs::OsRng, RngCore};
use regex::Regex;
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs::{copy, read_to_string, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    sync::LazyLock,
};
use tracing::{debug, info, instrument};

/// Sentinel marking start of generated block.
pub const START_MARKER: &str = "START SHEPHERD CONFIG";

/// Marker closing generated block.
pub const END_MARKER: &str = "END SHEPHERD CONFIG";

/// Sentinel marking start of local override block.
pub const LOCAL_START_MARKER: &str = "START LOCAL CONFIG";

/// Marker closing local override block.
pub const LOCAL_END_MARKER: &str = "END LOCAL CONFIG";

/// Number of random bytes behind a generated hash salt.
const HASH_SALT_BYTES: usize = 55;

static HASH_SALT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\$settings\[['"]hash_salt['"]\]\s*=\s*'((?:[^'\\]|\\.)+)'\s*;"#).unwrap()
});

/// Result of [`SettingsEmitter::ensure_generated`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Block was rendered and appended.
    Generated,

    /// Sentinel was already present, nothing was written.
    AlreadyPresent,
}

/// Emit Shepherd's configuration block into a settings file.
#[derive(Debug, Clone)]
pub struct SettingsEmitter {
    target: PathBuf,
    template: PathBuf,
}

impl SettingsEmitter {
    /// Construct new emitter for target settings file.
    ///
    /// The template is the scaffold file copied into place if the target does
    /// not exist yet.
    pub fn new(target: impl Into<PathBuf>, template: impl Into<PathBuf>) -> Self {
        Self {
            target: target.into(),
            template: template.into(),
        }
    }

    /// Construct emitter for the default site of a project.
    pub fn for_layout(layout: &ProjectLayout) -> Self {
        Self::new(layout.settings(), layout.default_settings())
    }

    pub fn target(&self) -> &Path {
        self.target.as_path()
    }

    /// Make sure target settings file contains the generated block.
    ///
    /// Seeds the target from the scaffold template if missing. Appends the
    /// generated block followed by the local override block, unless the start
    /// sentinel is already present. Bytes already in the file are never
    /// rewritten.
    ///
    /// # Errors
    ///
    /// - Return [`SettingsError::SourceTemplateMissing`] if the target is
    ///   missing and so is the scaffold template.
    /// - Return [`SettingsError::CopyTemplate`] if the template cannot be
    ///   copied, e.g., the target directory is missing or unwritable.
    /// - Return [`SettingsError::ReadSettings`] or
    ///   [`SettingsError::WriteSettings`] on I/O failure with the target.
    /// - Return [`SettingsError::ReadSecretFile`] if a `_FILE` variable points
    ///   at an unreadable file.
    #[instrument(skip(self, env), level = "debug")]
    pub fn ensure_generated(&self, env: &EnvSnapshot) -> Result<Outcome> {
        if !self.target.exists() {
            self.seed_from_template()?;
        }

        let contents = read_to_string(&self.target).map_err(|err| SettingsError::ReadSettings {
            source: err,
            path: self.target.clone(),
        })?;

        if contents.contains(START_MARKER) {
            debug!("{:?} already holds generated block", self.target.display());
            return Ok(Outcome::AlreadyPresent);
        }

        let mut addition = render(env, &contents)?;
        if !contents.contains(LOCAL_START_MARKER) {
            addition.push_str(&local_override_block());
        }

        info!("append generated block to {:?}", self.target.display());
        OpenOptions::new()
            .append(true)
            .open(&self.target)
            .and_then(|mut file| file.write_all(addition.as_bytes()))
            .map_err(|err| SettingsError::WriteSettings {
                source: err,
                path: self.target.clone(),
            })?;

        Ok(Outcome::Generated)
    }

    fn seed_from_template(&self) -> Result<()> {
        if !self.template.exists() {
            return Err(SettingsError::SourceTemplateMissing {
                template: self.template.clone(),
                target: self.target.clone(),
            });
        }

        info!(
            "create {:?} from {:?}",
            self.target.display(),
            self.template.display()
        );
        copy(&self.template, &self.target).map_err(|err| SettingsError::CopyTemplate {
            source: err,
            template: self.template.clone(),
            target: self.target.clone(),
        })?;

        Ok(())
    }
}

/// Render generated configuration block.
///
/// Values are resolved from the environment snapshot now and written as PHP
/// literals. The `existing` contents of the settings file are only consulted
/// to reuse a hash salt that is already there.
///
/// # Errors
///
/// - Return [`SettingsError::ReadSecretFile`] if a `_FILE` variable points at
///   an unreadable file.
pub fn render(env: &EnvSnapshot, existing: &str) -> Result<String> {
    let mut block = PhpBlock::default();
    block.raw(format!("\n/**\n * {START_MARKER}\n */\n"));

    render_database(&mut block, env)?;

    block.setting("['file_private_path']", PhpValue::str(env.get_or("PRIVATE_DIR", "/shared/private")));
    block.setting("['file_temp_path']", PhpValue::str(env.get_or("TMP_DIR", "/shared/tmp")));
    block.setting("['hash_salt']", PhpValue::Str(hash_salt(env, existing)));
    block.setting(
        "['config_sync_directory']",
        PhpValue::Expr("DRUPAL_ROOT . '/../config-sync'".into()),
    );
    block.setting("['shepherd_site_id']", PhpValue::optional(env.get("SHEPHERD_SITE_ID")));
    block.setting("['shepherd_url']", PhpValue::optional(env.get("SHEPHERD_URL")));
    block.setting(
        "['shepherd_token']",
        PhpValue::optional(env.secret("SHEPHERD_TOKEN")?.as_deref()),
    );

    if env.flag("REDIS_ENABLED") {
        render_redis(&mut block, env)?;
    }

    if env.flag("MEMCACHE_ENABLED") {
        render_memcache(&mut block, env);
    }

    if let Some(path) = env.get("SHEPHERD_SECRET_PATH") {
        render_secrets(&mut block, path);
    }

    if env.flag("SHEPHERD_REVERSE_PROXY") {
        render_reverse_proxy(&mut block, env);
    }

    block.setting(
        "['trusted_host_patterns']",
        PhpValue::List(env.list("TRUSTED_HOST_PATTERNS")),
    );

    block.raw(format!("/**\n * {END_MARKER}\n */\n"));
    Ok(block.into_string())
}

/// Render load-time include of `settings.local.php`.
///
/// The existence check happens when Drupal loads the settings file, not when
/// the block is written.
pub fn local_override_block() -> String {
    format!(
        "\n/**\n * {LOCAL_START_MARKER}\n */\n\
         if (file_exists(__DIR__ . '/settings.local.php')) {{\n  \
         include __DIR__ . '/settings.local.php';\n\
         }}\n\
         /**\n * {LOCAL_END_MARKER}\n */\n"
    )
}

/// Generate fresh hash salt.
///
/// URL-safe base64 without padding, so the value never needs escaping inside
/// a single quoted PHP string.
pub fn generate_hash_salt() -> String {
    let mut bytes = [0u8; HASH_SALT_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn hash_salt(env: &EnvSnapshot, existing: &str) -> String {
    if let Some(salt) = env.get("HASH_SALT") {
        return salt.to_owned();
    }

    if let Some(salt) = HASH_SALT_RE
        .captures(existing)
        .and_then(|captures| captures.get(1))
    {
        debug!("reuse hash salt already present in settings file");
        return unescape_single_quoted(salt.as_str());
    }

    debug!("generate new hash salt");
    generate_hash_salt()
}

fn render_database(block: &mut PhpBlock, env: &EnvSnapshot) -> Result<()> {
    let target = "$databases['default']['default']";
    if let Some(database) = env.get("SQLITE_DATABASE") {
        block.raw("// Allow using an sqlite db for testing etc.\n");
        block.array(
            target,
            [
                ("driver", PhpValue::str("sqlite")),
                ("database", PhpValue::str(database)),
            ],
        );
        return Ok(());
    }

    let password = env
        .secret("DATABASE_PASSWORD")?
        .unwrap_or_else(|| "password".into());
    block.array(
        target,
        [
            ("database", PhpValue::str(env.get_or("DATABASE_NAME", "drupal"))),
            ("username", PhpValue::str(env.get_or("DATABASE_USER", "user"))),
            ("password", PhpValue::Str(password)),
            ("host", PhpValue::str(env.get_or("DATABASE_HOST", "127.0.0.1"))),
            ("port", PhpValue::str(env.get_or("DATABASE_PORT", "3306"))),
            ("driver", PhpValue::str(env.get_or("DATABASE_DRIVER", "mysql"))),
            ("prefix", PhpValue::str(env.get_or("DATABASE_PREFIX", ""))),
            (
                "collation",
                PhpValue::str(env.get_or("DATABASE_COLLATION", "utf8mb4_general_ci")),
            ),
            (
                "namespace",
                PhpValue::str(env.get_or("DATABASE_NAMESPACE", r"Drupal\Core\Database\Driver\mysql")),
            ),
        ],
    );

    Ok(())
}

fn render_redis(block: &mut PhpBlock, env: &EnvSnapshot) -> Result<()> {
    block.raw("\n// Redis cache backend.\n");
    block.setting("['redis.connection']['interface']", PhpValue::str("PhpRedis"));
    block.setting(
        "['redis.connection']['host']",
        PhpValue::str(env.get_or("REDIS_HOST", "127.0.0.1")),
    );
    block.setting(
        "['redis.connection']['port']",
        PhpValue::str(env.get_or("REDIS_PORT", "6379")),
    );
    if let Some(password) = env.secret("REDIS_PASSWORD")? {
        block.setting("['redis.connection']['password']", PhpValue::Str(password));
    }

    // Fast backends for bootstrap, discovery and config are lost otherwise.
    for bin in ["bootstrap", "discovery", "config"] {
        block.setting(
            &format!("['cache']['bins']['{bin}']"),
            PhpValue::str("cache.backend.chainedfast"),
        );
    }
    block.setting(
        "['cache_prefix']['default']",
        PhpValue::str(env.get_or("REDIS_PREFIX", "")),
    );
    block.raw("if (!isset($GLOBALS['install_state'])) {\n");
    block.raw("  $settings['cache']['default'] = 'cache.backend.redis';\n");
    block.raw("  $settings['container_yamls'][] = 'modules/contrib/redis/example.services.yml';\n");
    block.raw("}\n");

    Ok(())
}

fn render_memcache(block: &mut PhpBlock, env: &EnvSnapshot) {
    let server = format!(
        "{}:{}",
        env.get_or("MEMCACHE_HOST", "127.0.0.1"),
        env.get_or("MEMCACHE_PORT", "11211")
    );

    block.raw("\n// Memcache cache backend.\n");
    block.setting(
        "['memcache']['servers']",
        PhpValue::Expr(format!("[{} => 'default']", PhpValue::Str(server))),
    );
    block.setting("['memcache']['bins']", PhpValue::Expr("['default' => 'default']".into()));
    block.setting(
        "['memcache']['key_prefix']",
        PhpValue::str(env.get_or("MEMCACHE_PREFIX", "")),
    );
    block.raw("if (!isset($GLOBALS['install_state'])) {\n");
    block.raw("  $settings['cache']['default'] = 'cache.backend.memcache';\n");
    block.raw("}\n");
}

fn render_secrets(block: &mut PhpBlock, path: &str) {
    let dir = PhpValue::str(path.trim_end_matches('/'));
    block.raw("\n// Load secrets matching SHEPHERD_* from the secret path.\n");
    block.setting("['shepherd_secrets']", PhpValue::List(Vec::new()));
    block.raw(format!(
        "foreach (glob({dir} . DIRECTORY_SEPARATOR . 'SHEPHERD_*') as $secret) {{\n"
    ));
    block.raw("  $settings['shepherd_secrets'][pathinfo($secret)['filename']] = file_get_contents($secret);\n");
    block.raw("}\n");
}

fn render_reverse_proxy(block: &mut PhpBlock, env: &EnvSnapshot) {
    block.raw("\n// Reverse proxy.\n");
    block.setting("['reverse_proxy']", PhpValue::Expr("TRUE".into()));
    block.setting(
        "['reverse_proxy_header']",
        PhpValue::str(env.get_or("SHEPHERD_REVERSE_PROXY_HEADER", "X_CLUSTER_CLIENT_IP")),
    );
    block.setting(
        "['reverse_proxy_addresses']",
        PhpValue::List(env.list("SHEPHERD_REVERSE_PROXY_ADDRESSES")),
    );
    block.setting(
        "['reverse_proxy_proto_header']",
        PhpValue::str(env.get_or("SHEPHERD_REVERSE_PROXY_PROTO_HEADER", "X_FORWARDED_PROTO")),
    );
    block.setting(
        "['reverse_proxy_host_header']",
        PhpValue::str(env.get_or("SHEPHERD_REVERSE_PROXY_HOST_HEADER", "X_FORWARDED_HOST")),
    );
    block.setting(
        "['reverse_proxy_port_header']",
        PhpValue::str(env.get_or("SHEPHERD_REVERSE_PROXY_PORT_HEADER", "X_FORWARDED_PORT")),
    );
    block.setting(
        "['reverse_proxy_forwarded_header']",
        PhpValue::str(env.get_or("SHEPHERD_REVERSE_PROXY_FORWARDED_HEADER", "FORWARDED")),
    );
}

/// Accumulates rendered PHP source.
#[derive(Debug, Default)]
struct PhpBlock {
    out: String,
}

impl PhpBlock {
    fn raw(&mut self, text: impl AsRef<str>) {
        self.out.push_str(text.as_ref());
    }

    /// Assign `$settings<key> = <value>;`.
    fn setting(&mut self, key: &str, value: PhpValue) {
        self.out.push_str(&format!("$settings{key} = {value};\n"));
    }

    /// Assign an associative array with one entry per line.
    fn array<'a>(&mut self, target: &str, entries: impl IntoIterator<Item = (&'a str, PhpValue)>) {
        self.out.push_str(&format!("{target} = [\n"));
        for (key, value) in entries {
            self.out
                .push_str(&format!("  {} => {value},\n", PhpValue::str(key)));
        }
        self.out.push_str("];\n");
    }

    fn into_string(self) -> String {
        self.out
    }
}

/// PHP literal.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PhpValue {
    /// Single quoted string.
    Str(String),

    /// List of single quoted strings.
    List(Vec<String>),

    /// `NULL`.
    Null,

    /// Written out verbatim.
    Expr(String),
}

impl PhpValue {
    fn str(value: impl Into<String>) -> Self {
        Self::Str(value.into())
    }

    fn optional(value: Option<&str>) -> Self {
        value.map(Self::str).unwrap_or(Self::Null)
    }
}

impl Display for PhpValue {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Str(value) => write!(fmt, "'{}'", escape_single_quoted(value)),
            Self::List(items) => {
                let items = items
                    .iter()
                    .map(|item| format!("'{}'", escape_single_quoted(item)))
                    .collect::<Vec<_>>();
                write!(fmt, "[{}]", items.join(", "))
            }
            Self::Null => fmt.write_str("NULL"),
            Self::Expr(expr) => fmt.write_str(expr),
        }
    }
}

// Only backslash and single quote are special in a single quoted PHP string.
fn escape_single_quoted(value: &str) -> String {
    value.replace('\\', r"\\").replace('\'', r"\'")
}

// INVARIANT: Only `\\` and `\'` are escapes inside single quotes.
fn unescape_single_quoted(literal: &str) -> String {
    let mut value = String::with_capacity(literal.len());
    let mut chars = literal.chars();
    while let Some(c) = chars.next() {
        match (c, chars.clone().next()) {
            ('\\', Some(next @ ('\\' | '\''))) => {
                value.push(next);
                chars.next();
            }
            _ => value.push(c),
        }
    }

    value
}

/// Settings generation error types.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// Target and scaffold template are both missing.
    #[error(
        "cannot create {:?}, scaffold template {:?} does not exist",
        target.display(),
        template.display()
    )]
    SourceTemplateMissing { template: PathBuf, target: PathBuf },

    /// Scaffold template cannot be copied into place.
    #[error("failed to copy {:?} to {:?}", template.display(), target.display())]
    CopyTemplate {
        #[source]
        source: std::io::Error,
        template: PathBuf,
        target: PathBuf,
    },

    /// Settings file cannot be read from.
    #[error("failed to read settings file at {:?}", path.display())]
    ReadSettings {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Settings file cannot be written to.
    #[error("failed to write settings file at {:?}", path.display())]
    WriteSettings {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Secret referenced by a `_FILE` variable cannot be read.
    #[error(transparent)]
    ReadSecretFile(#[from] SecretFileError),
}

/// Friendly result alias :3
pub type Result<T, E = SettingsError> = std::result::Result<T, E>;
