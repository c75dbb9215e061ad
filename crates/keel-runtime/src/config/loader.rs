//! Configuration loader using figment.
//!
//! # Feature Flags
//!
//! - `toml-config` *(default)*: TOML files (`keel.toml`, `config.toml`)
//! - `yaml-config`: YAML files (`keel.yaml`, `keel.yml`, `config.yaml`, `config.yml`)
//!
//! With both enabled, both formats are searched and merged.
//!
//! # Configuration Priority (lowest to highest)
//!
//! 1. Built-in defaults
//! 2. Programmatic [`ConfigLoader::merge`] values
//! 3. Profile-specific config file (`keel.{profile}.toml`)
//! 4. Main config file (`keel.toml`)
//! 5. Environment variables (`KEEL_*`)
//!
//! # Environment Variable Mapping
//!
//! `KEEL_` prefix, `__` separates nesting levels:
//!
//! - `KEEL_LOGGING__LEVEL=debug` → `logging.level = "debug"`
//! - `KEEL_DISPATCH__DEFAULT_TIMEOUT_MS=5000` → `dispatch.default_timeout_ms = 5000`
//! - `KEEL_BOT__USERNAME=keelbot` → `bot.username = "keelbot"`
//!
//! # Example
//!
//! ```rust,ignore
//! use keel_runtime::config::ConfigLoader;
//!
//! let config = ConfigLoader::new()
//!     .profile("production")
//!     .with_current_dir()
//!     .load()?;
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use figment::Figment;
#[cfg(any(feature = "yaml-config", feature = "toml-config"))]
use figment::providers::Format;
#[cfg(feature = "toml-config")]
use figment::providers::Toml;
#[cfg(feature = "yaml-config")]
use figment::providers::Yaml;
use figment::providers::{Env, Serialized};
use tracing::{debug, info, trace, warn};

use super::error::{ConfigError, ConfigResult};
use super::schema::KeelConfig;
use super::validation::validate_config;

/// Environment variable selecting the [`Profile`].
pub const PROFILE_ENV: &str = "KEEL_PROFILE";

const ENV_PREFIX: &str = "KEEL_";

/// Configuration profile, selecting `keel.{profile}.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Profile {
    #[default]
    Development,
    Production,
    Custom(String),
}

impl Profile {
    /// Returns the profile name as a string.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Custom(name) => name,
        }
    }

    /// Reads `KEEL_PROFILE`, defaulting to development.
    pub fn from_env() -> Self {
        std::env::var(PROFILE_ENV)
            .map(|p| Self::parse(&p))
            .unwrap_or_default()
    }

    fn parse(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            "development" | "dev" => Self::Development,
            other => Self::Custom(other.to_string()),
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Loads [`KeelConfig`] from layered sources.
pub struct ConfigLoader {
    figment: Figment,
    profile: Profile,
    search_paths: Vec<PathBuf>,
    load_env: bool,
    config_file: Option<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Creates a loader with the profile from `KEEL_PROFILE` and env loading
    /// enabled.
    pub fn new() -> Self {
        Self {
            figment: Figment::new(),
            profile: Profile::from_env(),
            search_paths: Vec::new(),
            load_env: true,
            config_file: None,
        }
    }

    /// Sets the configuration profile.
    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.profile = Profile::parse(profile.as_ref());
        self
    }

    /// Adds a search path for configuration files.
    ///
    /// Without any, the current directory and the user config directory
    /// (`~/.config/keel` on Linux) are searched.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    /// Adds the current directory to the search paths.
    pub fn with_current_dir(self) -> Self {
        match std::env::current_dir() {
            Ok(cwd) => self.search_path(cwd),
            Err(_) => self,
        }
    }

    /// Adds the user config directory to the search paths.
    pub fn with_user_config_dir(self) -> Self {
        match dirs::config_dir() {
            Some(dir) => self.search_path(dir.join("keel")),
            None => self,
        }
    }

    /// Loads exactly this file instead of searching.
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Enables loading environment variables (default).
    pub fn with_env(mut self) -> Self {
        self.load_env = true;
        self
    }

    /// Disables loading environment variables.
    pub fn without_env(mut self) -> Self {
        self.load_env = false;
        self
    }

    /// Merges a programmatic configuration over the defaults.
    pub fn merge(mut self, config: KeelConfig) -> Self {
        self.figment = self.figment.merge(Serialized::defaults(config));
        self
    }

    /// Loads and validates the configuration.
    pub fn load(self) -> ConfigResult<KeelConfig> {
        let profile = self.profile.clone();
        let figment = self.build_figment()?;

        let config: KeelConfig = figment.extract().map_err(|e| {
            ConfigError::ParseError(format!("Failed to extract configuration: {e}"))
        })?;
        validate_config(&config)?;

        debug!(
            profile = %profile,
            logging_level = %config.logging.level,
            username = ?config.bot.username,
            "Configuration loaded"
        );

        Ok(config)
    }

    fn build_figment(mut self) -> ConfigResult<Figment> {
        let mut figment = Figment::from(Serialized::defaults(KeelConfig::default()));
        figment = figment.merge(std::mem::take(&mut self.figment));

        if let Some(path) = &self.config_file {
            if !path.exists() {
                return Err(ConfigError::FileNotFound(path.clone()));
            }
            info!(path = %path.display(), "Loading configuration file");
            figment = Self::merge_config_file(figment, path)?;
        } else {
            figment = self.load_config_files(figment);
        }

        if self.load_env {
            trace!(prefix = ENV_PREFIX, "Loading environment variables");
            figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));
        }

        Ok(figment)
    }

    /// Merges one file, picking the format from its extension.
    fn merge_config_file(figment: Figment, path: &Path) -> ConfigResult<Figment> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        match ext {
            #[cfg(feature = "toml-config")]
            "toml" => Ok(figment.merge(Toml::file(path))),
            #[cfg(feature = "yaml-config")]
            "yaml" | "yml" => Ok(figment.merge(Yaml::file(path))),
            _ => Err(ConfigError::ParseError(format!(
                "Unsupported or disabled configuration file format: .{ext}"
            ))),
        }
    }

    fn resolve_search_paths(&self) -> Vec<PathBuf> {
        if !self.search_paths.is_empty() {
            return self.search_paths.clone();
        }
        let mut paths = Vec::new();
        if let Ok(cwd) = std::env::current_dir() {
            paths.push(cwd);
        }
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("keel"));
        }
        paths
    }

    /// Searches `search_paths × base_names` for one format.
    ///
    /// The profile variant of a name is merged before its base file. Stops at
    /// the first base file found and reports whether there was one.
    #[cfg(any(feature = "toml-config", feature = "yaml-config"))]
    fn load_format_files<F>(
        &self,
        mut figment: Figment,
        search_paths: &[PathBuf],
        base_names: &[&str],
        merge_fn: F,
    ) -> (Figment, bool)
    where
        F: Fn(Figment, &Path) -> Figment,
    {
        for search_path in search_paths {
            for base_name in base_names {
                let Some((stem, ext)) = base_name.rsplit_once('.') else {
                    continue;
                };

                let profile_path =
                    search_path.join(format!("{stem}.{}.{ext}", self.profile.as_str()));
                if profile_path.exists() {
                    debug!(path = %profile_path.display(), "Loading profile-specific config");
                    figment = merge_fn(figment, &profile_path);
                }

                let base_path = search_path.join(base_name);
                if base_path.exists() {
                    info!(path = %base_path.display(), "Loading configuration file");
                    return (merge_fn(figment, &base_path), true);
                }
            }
        }
        (figment, false)
    }

    #[allow(unused_mut)]
    fn load_config_files(&self, mut figment: Figment) -> Figment {
        let search_paths = self.resolve_search_paths();
        let mut found = false;

        #[cfg(feature = "toml-config")]
        {
            let (f, ok) = self.load_format_files(
                figment,
                &search_paths,
                &["keel.toml", "config.toml"],
                |fig, path| fig.merge(Toml::file(path)),
            );
            figment = f;
            found |= ok;
        }

        #[cfg(feature = "yaml-config")]
        {
            let (f, ok) = self.load_format_files(
                figment,
                &search_paths,
                &["keel.yaml", "keel.yml", "config.yaml", "config.yml"],
                |fig, path| fig.merge(Yaml::file(path)),
            );
            figment = f;
            found |= ok;
        }

        if !found {
            warn!(?search_paths, "No configuration file found, using defaults");
        }
        figment
    }
}

/// Loads the configuration from the default locations.
pub fn load_config() -> ConfigResult<KeelConfig> {
    ConfigLoader::new().load()
}

/// Loads the configuration from `path`, with `KEEL_*` overrides.
pub fn load_config_from_file<P: AsRef<Path>>(path: P) -> ConfigResult<KeelConfig> {
    ConfigLoader::new().file(path).load()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use figment::Jail;

    use super::*;
    use crate::config::schema::{LogLevel, LogOutput};

    #[test]
    fn test_default_config() {
        Jail::expect_with(|jail| {
            let config = ConfigLoader::new()
                .search_path(jail.directory())
                .without_env()
                .load()
                .unwrap();
            assert_eq!(config.logging.level.as_str(), "info");
            assert_eq!(config.dispatch.thread_name, "keel-dispatch");
            Ok(())
        });
    }

    #[test]
    fn test_profile_from_env() {
        Jail::expect_with(|jail| {
            jail.set_env(PROFILE_ENV, "prod");
            assert_eq!(Profile::from_env(), Profile::Production);
            jail.set_env(PROFILE_ENV, "Staging");
            assert_eq!(Profile::from_env(), Profile::Custom("staging".to_string()));
            Ok(())
        });
    }

    #[test]
    fn test_layered_sources() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "keel.toml",
                r#"
                [logging]
                level = "debug"
                output = "stderr"

                [bot]
                username = "keelbot"
                "#,
            )?;
            jail.create_file(
                "keel.production.toml",
                r#"
                [logging]
                level = "warn"

                [dispatch]
                default_timeout_ms = 250
                "#,
            )?;
            jail.set_env(PROFILE_ENV, "production");
            jail.set_env("KEEL_DISPATCH__THREAD_NAME", "dispatch-test");

            let config = ConfigLoader::new()
                .search_path(jail.directory())
                .load()
                .unwrap();

            // The base file wins over the profile file, env over both.
            assert_eq!(config.logging.level, LogLevel::Debug);
            assert_eq!(config.logging.output, LogOutput::Stderr);
            assert_eq!(
                config.dispatch.default_timeout(),
                Some(Duration::from_millis(250))
            );
            assert_eq!(config.dispatch.thread_name, "dispatch-test");
            assert_eq!(config.bot.username.as_deref(), Some("keelbot"));
            Ok(())
        });
    }

    #[test]
    fn test_without_env() {
        Jail::expect_with(|jail| {
            jail.set_env("KEEL_LOGGING__LEVEL", "error");
            let config = ConfigLoader::new()
                .search_path(jail.directory())
                .without_env()
                .load()
                .unwrap();
            assert_eq!(config.logging.level, LogLevel::Info);
            Ok(())
        });
    }

    #[test]
    fn test_merge_under_files() {
        Jail::expect_with(|jail| {
            jail.create_file("config.toml", "[bot]\nusername = \"from_file\"\n")?;
            let mut programmatic = KeelConfig::default();
            programmatic.bot.username = Some("from_code".to_string());
            programmatic.dispatch.default_timeout_ms = Some(1000);

            let config = ConfigLoader::new()
                .search_path(jail.directory())
                .without_env()
                .merge(programmatic)
                .load()
                .unwrap();
            assert_eq!(config.bot.username.as_deref(), Some("from_file"));
            assert_eq!(config.dispatch.default_timeout_ms, Some(1000));
            Ok(())
        });
    }

    #[test]
    fn test_explicit_file_errors() {
        Jail::expect_with(|jail| {
            let missing = ConfigLoader::new().file("missing.toml").load();
            assert!(matches!(missing, Err(ConfigError::FileNotFound(_))));

            jail.create_file("keel.ini", "level = debug")?;
            let unsupported = ConfigLoader::new().file("keel.ini").load();
            assert!(matches!(unsupported, Err(ConfigError::ParseError(_))));

            jail.create_file("bad.toml", "[logging]\nlevel = \"loud\"\n")?;
            let invalid = load_config_from_file("bad.toml");
            assert!(matches!(invalid, Err(ConfigError::ParseError(_))));

            jail.create_file("zero.toml", "[logging]\nmax_files = 0\n")?;
            let rejected = load_config_from_file("zero.toml");
            assert!(matches!(rejected, Err(ConfigError::ValidationError { .. })));
            Ok(())
        });
    }
}
