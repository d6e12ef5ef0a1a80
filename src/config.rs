// src/config.rs

//! Configuration loading.
//!
//! Options are resolved from three layers, lowest precedence first: the
//! project file `./shale.yaml`, the per-user file `~/.shale.yaml`, and the
//! process environment (`SHALE_*`). Connection settings are only required
//! by commands that touch the database, and are checked before any I/O.

use crate::error::{Error, Result};
use crate::exec::DEFAULT_BATCH_SIZE;
use crate::infer::DEFAULT_SAMPLE_SIZE;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Project-level config file name, also used for `~/.shale.yaml`.
pub const PROJECT_CONFIG: &str = "shale.yaml";
pub const USER_CONFIG: &str = ".shale.yaml";

/// One configuration layer as read from a file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub mongodb_uri: Option<String>,
    pub default_db: Option<String>,
    pub sample_size: Option<usize>,
    pub batch_size: Option<usize>,
    pub rate_limit_ms: Option<u64>,
    pub webhook_url: Option<String>,
    /// Recognised for compatibility with AI-assisted tooling; the core
    /// never reads it.
    pub ai_api_key: Option<String>,
    pub schema_dir: Option<PathBuf>,
}

/// Fully resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub mongodb_uri: Option<String>,
    pub default_db: Option<String>,
    pub sample_size: usize,
    pub batch_size: usize,
    pub rate_limit_ms: u64,
    pub webhook_url: Option<String>,
    pub ai_api_key: Option<String>,
    pub schema_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            mongodb_uri: None,
            default_db: None,
            sample_size: DEFAULT_SAMPLE_SIZE,
            batch_size: DEFAULT_BATCH_SIZE,
            rate_limit_ms: 0,
            webhook_url: None,
            ai_api_key: None,
            schema_dir: PathBuf::from("schemas"),
        }
    }
}

impl Config {
    fn apply_file(&mut self, file: FileConfig) {
        if let Some(v) = file.mongodb_uri {
            self.mongodb_uri = Some(v);
        }
        if let Some(v) = file.default_db {
            self.default_db = Some(v);
        }
        if let Some(v) = file.sample_size {
            self.sample_size = v;
        }
        if let Some(v) = file.batch_size {
            self.batch_size = v;
        }
        if let Some(v) = file.rate_limit_ms {
            self.rate_limit_ms = v;
        }
        if let Some(v) = file.webhook_url {
            self.webhook_url = Some(v);
        }
        if let Some(v) = file.ai_api_key {
            self.ai_api_key = Some(v);
        }
        if let Some(v) = file.schema_dir {
            self.schema_dir = v;
        }
    }

    fn apply_env(&mut self, env: &BTreeMap<String, String>) -> Result<()> {
        let parse_usize = |key: &str, value: &str| -> Result<usize> {
            value
                .parse()
                .map_err(|_| Error::Config(format!("{} must be an integer, got '{}'", key, value)))
        };
        if let Some(v) = env.get("SHALE_MONGODB_URI").or_else(|| env.get("MONGODB_URI")) {
            self.mongodb_uri = Some(v.clone());
        }
        if let Some(v) = env.get("SHALE_DB") {
            self.default_db = Some(v.clone());
        }
        if let Some(v) = env.get("SHALE_SAMPLE_SIZE") {
            self.sample_size = parse_usize("SHALE_SAMPLE_SIZE", v)?;
        }
        if let Some(v) = env.get("SHALE_BATCH_SIZE") {
            self.batch_size = parse_usize("SHALE_BATCH_SIZE", v)?;
        }
        if let Some(v) = env.get("SHALE_RATE_LIMIT_MS") {
            self.rate_limit_ms = v.parse().map_err(|_| {
                Error::Config(format!("SHALE_RATE_LIMIT_MS must be an integer, got '{}'", v))
            })?;
        }
        if let Some(v) = env.get("SHALE_WEBHOOK_URL") {
            self.webhook_url = Some(v.clone());
        }
        if let Some(v) = env.get("SHALE_AI_API_KEY") {
            self.ai_api_key = Some(v.clone());
        }
        if let Some(v) = env.get("SHALE_SCHEMA_DIR") {
            self.schema_dir = PathBuf::from(v);
        }
        Ok(())
    }

    /// Merge the three layers, lowest precedence first.
    pub fn resolve(
        project: Option<FileConfig>,
        user: Option<FileConfig>,
        env: &BTreeMap<String, String>,
    ) -> Result<Config> {
        let mut config = Config::default();
        if let Some(file) = project {
            config.apply_file(file);
        }
        if let Some(file) = user {
            config.apply_file(file);
        }
        config.apply_env(env)?;
        Ok(config)
    }

    /// Load from the conventional locations and the process environment.
    pub fn load() -> Result<Config> {
        let project = read_file(Path::new(PROJECT_CONFIG))?;
        let user = match std::env::var_os("HOME") {
            Some(home) => read_file(&Path::new(&home).join(USER_CONFIG))?,
            None => None,
        };
        let env: BTreeMap<String, String> = std::env::vars().collect();
        Config::resolve(project, user, &env)
    }

    pub fn require_uri(&self) -> Result<&str> {
        self.mongodb_uri.as_deref().ok_or_else(|| {
            Error::Config(
                "no MongoDB URI configured; set SHALE_MONGODB_URI or add mongodb_uri to shale.yaml"
                    .to_string(),
            )
        })
    }

    pub fn require_db(&self) -> Result<&str> {
        self.default_db.as_deref().ok_or_else(|| {
            Error::Config(
                "no database configured; set SHALE_DB or add default_db to shale.yaml".to_string(),
            )
        })
    }
}

fn read_file(path: &Path) -> Result<Option<FileConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    debug!("Reading config from {}", path.display());
    let text = std::fs::read_to_string(path)?;
    let file: FileConfig = serde_yaml::from_str(&text)
        .map_err(|e| Error::Config(format!("invalid config file {}: {}", path.display(), e)))?;
    Ok(Some(file))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::resolve(None, None, &BTreeMap::new()).unwrap();
        assert_eq!(config.sample_size, DEFAULT_SAMPLE_SIZE);
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
        assert!(config.mongodb_uri.is_none());
        assert!(config.require_uri().is_err());
        assert!(config.require_db().is_err());
    }

    #[test]
    fn test_env_beats_user_beats_project() {
        let project = FileConfig {
            mongodb_uri: Some("mongodb://project".into()),
            default_db: Some("projectdb".into()),
            sample_size: Some(10),
            ..FileConfig::default()
        };
        let user = FileConfig {
            mongodb_uri: Some("mongodb://user".into()),
            ..FileConfig::default()
        };
        let mut env = BTreeMap::new();
        env.insert("SHALE_MONGODB_URI".to_string(), "mongodb://env".to_string());

        let config = Config::resolve(Some(project), Some(user), &env).unwrap();
        assert_eq!(config.mongodb_uri.as_deref(), Some("mongodb://env"));
        // Untouched by higher layers: the project values survive.
        assert_eq!(config.default_db.as_deref(), Some("projectdb"));
        assert_eq!(config.sample_size, 10);
    }

    #[test]
    fn test_generic_mongodb_uri_fallback() {
        let mut env = BTreeMap::new();
        env.insert("MONGODB_URI".to_string(), "mongodb://generic".to_string());
        let config = Config::resolve(None, None, &env).unwrap();
        assert_eq!(config.mongodb_uri.as_deref(), Some("mongodb://generic"));
    }

    #[test]
    fn test_invalid_numeric_env_is_config_error() {
        let mut env = BTreeMap::new();
        env.insert("SHALE_BATCH_SIZE".to_string(), "lots".to_string());
        assert!(matches!(
            Config::resolve(None, None, &env),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_file_parsing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shale.yaml");
        std::fs::write(
            &path,
            "mongodb_uri: mongodb://localhost:27017\ndefault_db: app\nbatch_size: 250\n",
        )
        .unwrap();
        let file = read_file(&path).unwrap().unwrap();
        assert_eq!(file.default_db.as_deref(), Some("app"));
        assert_eq!(file.batch_size, Some(250));
        assert!(read_file(&dir.path().join("absent.yaml")).unwrap().is_none());
    }
}
