//! Settings lookup and config file resolution
//!
//! The query client consumes configuration as a read-only key/value store. Keys are
//! dotted paths into a TOML document (`query.scoreFunction`, `mlt.VIDEO`,
//! `query.config.hints`). Persisting settings is someone else's job.

use crate::messages::MediaType;
use crate::{Error, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "SIMQ_CONFIG";

/// Score function used when configuration does not name one
pub const DEFAULT_SCORE_FUNCTION: &str = "TEMPORAL";

/// Typed key/value view over a TOML settings document
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    root: toml::Table,
}

impl Default for Settings {
    fn default() -> Self {
        let mut query = toml::Table::new();
        query.insert(
            "scoreFunction".to_string(),
            toml::Value::String(DEFAULT_SCORE_FUNCTION.to_string()),
        );
        let mut root = toml::Table::new();
        root.insert("query".to_string(), toml::Value::Table(query));
        Self { root }
    }
}

impl Settings {
    /// Parse settings from TOML text
    ///
    /// Keys the query client reads must have the expected shape; anything else is
    /// left alone.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let root: toml::Table = toml::from_str(text)?;
        let settings = Self { root };
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if let Some(value) = self.value("query.scoreFunction") {
            if !value.is_str() {
                return Err(Error::Config(format!(
                    "query.scoreFunction must be a string, found {}",
                    value.type_str()
                )));
            }
        }
        if let Some(value) = self.value("query.config.hints") {
            expect_string_list("query.config.hints", value)?;
        }
        if let Some(value) = self.value("mlt") {
            let table = value.as_table().ok_or_else(|| {
                Error::Config(format!("mlt must be a table, found {}", value.type_str()))
            })?;
            for (media_type, categories) in table {
                expect_string_list(&format!("mlt.{media_type}"), categories)?;
            }
        }
        Ok(())
    }

    /// Load settings from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let settings = Self::from_toml_str(&text)?;
        debug!(path = %path.display(), "Loaded settings");
        Ok(settings)
    }

    /// Load settings from the resolved config file, falling back to defaults
    ///
    /// A missing or unreadable file is not fatal: it logs a warning and the built-in
    /// defaults are used.
    pub fn load_or_default(cli_arg: Option<&str>) -> Self {
        let Some(path) = resolve_config_path(cli_arg, CONFIG_ENV_VAR) else {
            debug!("No config file found, using default settings");
            return Self::default();
        };

        match Self::load(&path) {
            Ok(settings) => settings,
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Failed to load settings, using defaults"
                );
                Self::default()
            }
        }
    }

    /// Raw value at a dotted key
    pub fn value(&self, key: &str) -> Option<&toml::Value> {
        let mut parts = key.split('.');
        let mut current = self.root.get(parts.next()?)?;
        for part in parts {
            current = current.as_table()?.get(part)?;
        }
        Some(current)
    }

    /// Typed value at a dotted key
    ///
    /// Returns `None` when the key is absent or has an incompatible type.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.value(key)?.clone();
        match value.try_into() {
            Ok(typed) => Some(typed),
            Err(e) => {
                warn!(key, error = %e, "Setting has unexpected type");
                None
            }
        }
    }

    /// Name of the configured score (fusion) function
    pub fn score_function(&self) -> Option<String> {
        self.get("query.scoreFunction")
    }

    /// Default More-Like-This categories for a media type (`mlt.<TYPE>`)
    pub fn mlt_categories(&self, media_type: MediaType) -> Option<Vec<String>> {
        self.get(&format!("mlt.{}", media_type.as_str()))
    }

    /// Query hints forwarded with every similarity request
    pub fn query_hints(&self) -> Vec<String> {
        self.get("query.config.hints").unwrap_or_default()
    }
}

fn expect_string_list(key: &str, value: &toml::Value) -> Result<()> {
    let valid = value
        .as_array()
        .is_some_and(|items| items.iter().all(toml::Value::is_str));
    if valid {
        Ok(())
    } else {
        Err(Error::Config(format!("{key} must be a list of strings")))
    }
}

/// Config file resolution, in priority order:
/// 1. Command-line argument
/// 2. Environment variable
/// 3. User config file (`<config dir>/simq/config.toml`) if it exists
///
/// Returns `None` when no source applies.
pub fn resolve_config_path(cli_arg: Option<&str>, env_var_name: &str) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(PathBuf::from(path));
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: User config file
    default_config_file().filter(|path| path.exists())
}

/// Platform config file location
fn default_config_file() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("simq").join("config.toml"))
}

impl std::str::FromStr for Settings {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_toml_str(s)
    }
}
