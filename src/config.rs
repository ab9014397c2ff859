use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::graph::{QueryLimits, MAX_DEPTH, MAX_PATH_DEPTH, MIN_DEPTH};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub kgraph: KgraphConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub http_server: HttpServerConfig,
}

/// Storage and process settings
#[derive(Debug, Clone, Deserialize)]
pub struct KgraphConfig {
    pub db_path: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_migrations_dir")]
    pub migrations_dir: PathBuf,
}

/// Extraction payload handling
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Keep triples whose subject equals their object
    #[serde(default)]
    pub allow_self_loops: bool,
    /// Payloads larger than this are rejected before parsing
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            allow_self_loops: false,
            max_payload_bytes: default_max_payload_bytes(),
        }
    }
}

fn default_max_payload_bytes() -> usize {
    1024 * 1024
}

/// Subgraph and path query bounds
#[derive(Debug, Clone, Deserialize)]
pub struct QueryConfig {
    #[serde(default = "default_depth")]
    pub default_depth: u32,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_path_max_depth")]
    pub path_max_depth: u32,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_depth: default_depth(),
            max_results: default_max_results(),
            path_max_depth: default_path_max_depth(),
        }
    }
}

fn default_depth() -> u32 {
    1
}

fn default_max_results() -> usize {
    100
}

fn default_path_max_depth() -> u32 {
    5
}

impl QueryConfig {
    pub fn limits(&self) -> QueryLimits {
        QueryLimits {
            default_depth: self.default_depth,
            max_results: self.max_results,
            default_path_depth: self.path_max_depth,
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HttpServerConfig {
    #[serde(default = "default_http_port")]
    pub port: u16,
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            port: default_http_port(),
            allowed_origins: default_allowed_origins(),
        }
    }
}

fn default_http_port() -> u16 {
    8000
}

fn default_allowed_origins() -> Vec<String> {
    // Empty means any origin; set allowed_origins for production
    vec![]
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_migrations_dir() -> PathBuf {
    PathBuf::from("migrations")
}

impl Config {
    /// Load configuration from file
    ///
    /// Loads environment variables from .env file (if present) before loading config.
    /// Looks for config file in this order:
    /// 1. Path specified in KGRAPH_CONFIG environment variable
    /// 2. ./config.toml in current directory
    pub fn load() -> Result<Self> {
        // .env is optional
        let _ = dotenv::dotenv();

        let config_path = std::env::var("KGRAPH_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.toml"));

        Self::from_file(&config_path)
    }

    /// Load and validate a specific config file
    pub fn from_file(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: Config = toml::from_str(&config_str)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.kgraph.db_path.as_os_str().is_empty() {
            anyhow::bail!("kgraph.db_path must not be empty");
        }

        if !(MIN_DEPTH..=MAX_DEPTH).contains(&self.query.default_depth) {
            anyhow::bail!(
                "query.default_depth must be between {} and {}",
                MIN_DEPTH,
                MAX_DEPTH
            );
        }

        if self.query.max_results == 0 || self.query.max_results > 1000 {
            anyhow::bail!("query.max_results must be between 1 and 1000");
        }

        if !(MIN_DEPTH..=MAX_PATH_DEPTH).contains(&self.query.path_max_depth) {
            anyhow::bail!(
                "query.path_max_depth must be between {} and {}",
                MIN_DEPTH,
                MAX_PATH_DEPTH
            );
        }

        if self.ingest.max_payload_bytes == 0 {
            anyhow::bail!("ingest.max_payload_bytes must be greater than 0");
        }

        if !is_log_filter(&self.kgraph.log_level) {
            anyhow::bail!(
                "kgraph.log_level must be a level (error, warn, info, debug, trace, off) \
                 or a list of module=level directives, got {:?}",
                self.kgraph.log_level
            );
        }

        Ok(())
    }

    /// Default log filter; `RUST_LOG` takes precedence when set.
    pub fn log_filter(&self) -> &str {
        self.kgraph.log_level.trim()
    }

    /// Set up `env_logger` with [`log_filter`](Self::log_filter) as the default.
    pub fn init_logging(&self) {
        let env = env_logger::Env::default().filter_or("RUST_LOG", self.log_filter());
        // A second call in the same process keeps the first logger
        let _ = env_logger::Builder::from_env(env).try_init();
    }

    /// Get database path
    pub fn db_path(&self) -> &Path {
        &self.kgraph.db_path
    }

    /// Get migrations directory
    pub fn migrations_dir(&self) -> &Path {
        &self.kgraph.migrations_dir
    }
}

/// `info`, or `kgraph=debug,tower_http=warn`.
fn is_log_filter(filter: &str) -> bool {
    let filter = filter.trim();
    !filter.is_empty()
        && filter.split(',').all(|directive| {
            let level = directive.rsplit('=').next().unwrap_or(directive);
            level.trim().parse::<log::LevelFilter>().is_ok()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Serialize config tests that mutate process-wide env so they don't race.
    static CONFIG_TEST_LOCK: Mutex<()> = Mutex::new(());

    const FULL_CONFIG: &str = r#"
[kgraph]
db_path = "./graph.db"
log_level = "debug"

[ingest]
allow_self_loops = true
max_payload_bytes = 4096

[query]
default_depth = 2
max_results = 50
path_max_depth = 4

[http_server]
port = 9100
allowed_origins = ["http://localhost:3000"]
"#;

    fn write_config(temp_dir: &TempDir, content: &str) -> PathBuf {
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_config_load_full() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_config(&temp_dir, FULL_CONFIG);

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.kgraph.log_level, "debug");
        assert!(config.ingest.allow_self_loops);
        assert_eq!(config.ingest.max_payload_bytes, 4096);
        assert_eq!(config.query.limits().default_depth, 2);
        assert_eq!(config.query.limits().max_results, 50);
        assert_eq!(config.http_server.port, 9100);
        assert_eq!(config.migrations_dir(), Path::new("migrations"));
    }

    #[test]
    fn test_config_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_config(&temp_dir, "[kgraph]\ndb_path = \"g.db\"\n");

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.kgraph.log_level, "info");
        assert!(!config.ingest.allow_self_loops);
        assert_eq!(config.query.default_depth, 1);
        assert_eq!(config.query.max_results, 100);
        assert_eq!(config.query.path_max_depth, 5);
        assert_eq!(config.http_server.port, 8000);
        assert!(config.http_server.allowed_origins.is_empty());
    }

    #[test]
    fn test_config_rejects_out_of_range_depth() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_config(
            &temp_dir,
            "[kgraph]\ndb_path = \"g.db\"\n\n[query]\ndefault_depth = 9\n",
        );

        let err = Config::from_file(&path).unwrap_err();
        assert!(err.to_string().contains("default_depth"));
    }

    #[test]
    fn test_config_log_level_is_the_log_filter() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_config(
            &temp_dir,
            "[kgraph]\ndb_path = \"g.db\"\nlog_level = \" kgraph=debug,tower_http=warn \"\n",
        );

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.log_filter(), "kgraph=debug,tower_http=warn");
        config.init_logging();
        config.init_logging();
    }

    #[test]
    fn test_config_rejects_unknown_log_level() {
        let temp_dir = TempDir::new().unwrap();
        for level in ["loud", "", "kgraph=verbose"] {
            let path = write_config(
                &temp_dir,
                &format!("[kgraph]\ndb_path = \"g.db\"\nlog_level = {:?}\n", level),
            );
            let err = Config::from_file(&path).unwrap_err();
            assert!(err.to_string().contains("log_level"), "{}", level);
        }
    }

    #[test]
    fn test_config_rejects_zero_results() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_config(
            &temp_dir,
            "[kgraph]\ndb_path = \"g.db\"\n\n[query]\nmax_results = 0\n",
        );

        assert!(Config::from_file(&path).is_err());
    }

    #[test]
    fn test_config_load_from_env_var() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let path = write_config(&temp_dir, FULL_CONFIG);

        let original = std::env::var("KGRAPH_CONFIG").ok();
        std::env::set_var("KGRAPH_CONFIG", path.to_str().unwrap());
        let config = Config::load();
        std::env::remove_var("KGRAPH_CONFIG");
        if let Some(v) = original {
            std::env::set_var("KGRAPH_CONFIG", v);
        }

        let config = config.unwrap();
        assert_eq!(config.db_path(), Path::new("./graph.db"));
    }

    #[test]
    fn test_config_invalid_path() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        let original = std::env::var("KGRAPH_CONFIG").ok();
        std::env::set_var("KGRAPH_CONFIG", "nonexistent.toml");
        let config = Config::load();
        assert!(config.is_err());
        std::env::remove_var("KGRAPH_CONFIG");
        if let Some(v) = original {
            std::env::set_var("KGRAPH_CONFIG", v);
        }
    }
}
