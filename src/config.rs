//! Configuration.
//!
//! Read from `tablewright.toml`:
//!
//! ```toml
//! database_url = "postgres://localhost/app"
//! migrations_dir = "db/migrations"
//! max_connections = 5
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{SchemaError, SchemaResult};

/// File name looked up in the working directory.
pub const CONFIG_FILE: &str = "tablewright.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Database connection URL
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Directory holding persisted migration units
    #[serde(default = "default_migrations_dir")]
    pub migrations_dir: PathBuf,

    /// Connection pool size
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_url() -> String {
    "sqlite://tablewright.db?mode=rwc".to_string()
}

fn default_migrations_dir() -> PathBuf {
    PathBuf::from("migrations")
}

fn default_max_connections() -> u32 {
    5
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            migrations_dir: default_migrations_dir(),
            max_connections: default_max_connections(),
        }
    }
}

impl Config {
    /// Create a new configuration builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    pub fn from_toml(content: &str) -> SchemaResult<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| SchemaError::Config(e.to_string()))?;
        if config.max_connections == 0 {
            return Err(SchemaError::Config("max_connections must be at least 1".into()));
        }
        Ok(config)
    }

    /// Load configuration.
    ///
    /// An explicit path must exist. Otherwise `./tablewright.toml` and then
    /// `<config dir>/tablewright/config.toml` are tried, falling back to
    /// defaults.
    pub fn load(explicit: Option<&Path>) -> SchemaResult<Self> {
        if let Some(path) = explicit {
            return Self::read(path);
        }
        let candidates = [
            Some(PathBuf::from(CONFIG_FILE)),
            dirs::config_dir().map(|d| d.join("tablewright").join("config.toml")),
        ];
        for path in candidates.into_iter().flatten() {
            if path.is_file() {
                return Self::read(&path);
            }
        }
        Ok(Self::default())
    }

    fn read(path: &Path) -> SchemaResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SchemaError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }
}

/// Builder for Config
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the database URL
    pub fn database(mut self, url: impl Into<String>) -> Self {
        self.config.database_url = url.into();
        self
    }

    /// Set the migrations directory
    pub fn migrations_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.migrations_dir = dir.into();
        self
    }

    /// Set the pool size
    pub fn max_connections(mut self, n: u32) -> Self {
        self.config.max_connections = n;
        self
    }

    /// Build the configuration
    pub fn build(self) -> Config {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_toml_with_defaults() {
        let config = Config::from_toml("database_url = \"sqlite::memory:\"").unwrap();
        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.migrations_dir, PathBuf::from("migrations"));
        assert_eq!(config.max_connections, 5);
    }

    #[test]
    fn test_from_toml_rejects_zero_pool() {
        assert!(matches!(
            Config::from_toml("max_connections = 0"),
            Err(SchemaError::Config(_))
        ));
    }

    #[test]
    fn test_load_explicit_path() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("custom.toml");
        std::fs::write(&path, "migrations_dir = \"db/migrations\"\nmax_connections = 2\n").unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.migrations_dir, PathBuf::from("db/migrations"));
        assert_eq!(config.max_connections, 2);

        assert!(Config::load(Some(&tmp.path().join("missing.toml"))).is_err());
    }

    #[test]
    fn test_builder() {
        let config = Config::builder()
            .database("postgres://localhost/app")
            .max_connections(1)
            .build();
        assert_eq!(config.database_url, "postgres://localhost/app");
        assert_eq!(config.max_connections, 1);
    }
}
