use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::model::{ProtectionRules, Severity};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub merge: MergeConfig,
    #[serde(default)]
    pub repository: RepositoryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Branch name -> protection rules, overriding what is stored on the branch
    #[serde(default)]
    pub protection: HashMap<String, ProtectionRules>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Highest severity a merge may resolve without manual input
    pub auto_resolve_threshold: Severity,
    /// Maximum number of parents walked when searching for a common ancestor
    pub max_ancestry_depth: usize,
    pub lock_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    pub default_branch: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            auto_resolve_threshold: Severity::Warn,
            max_ancestry_depth: 1000,
            lock_timeout_ms: 5000,
        }
    }
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            default_branch: "main".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl MergeConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

impl AppConfig {
    /// Load configuration from defaults, an optional config file and environment
    /// variables (`ONTO__MERGE__LOCK_TIMEOUT_MS=250`)
    pub fn load() -> anyhow::Result<Self> {
        // Load environment variables from .env file if it exists
        dotenvy::dotenv().ok();

        let mut config = config::Config::builder();

        // Add default configuration
        config = config.add_source(config::Config::try_from(&AppConfig::default())?);

        // Add config file if it exists
        config = config.add_source(config::File::with_name("ontology-versioning").required(false));

        // Add environment variables with prefix "ONTO__"
        config = config.add_source(
            config::Environment::with_prefix("ONTO")
                .prefix_separator("__")
                .separator("__"),
        );

        let config = config.build()?;
        let app_config: AppConfig = config.try_deserialize()?;

        Ok(app_config)
    }

    /// Initialise env_logger at the configured level; `RUST_LOG` still wins
    pub fn init_logging(&self) {
        let _ = env_logger::Builder::from_env(
            env_logger::Env::default().default_filter_or(self.logging.level.as_str()),
        )
        .try_init();
    }
}
