use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::OnceLock;

use crate::auth::KeyFormat;

static CONFIG: OnceLock<OperatorConfig> = OnceLock::new();

/// Operator API configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    /// Base URL of the operator API, e.g. `https://operator.example.com/`.
    /// Canonical messages are built from the absolute endpoint URL, so this
    /// must match what the server sees.
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Header carrying the signed credential
    #[serde(default = "default_signature_header")]
    pub signature_header: String,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_signature_header() -> String {
    crate::auth::SIGNATURE_HEADER.to_string()
}

/// Where the operator key is read from when not given on the command line.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct KeyConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub format: KeyFormat,
}

/// Root operator configuration
#[derive(Debug, Deserialize, Clone)]
pub struct OperatorConfig {
    pub api: ApiConfig,
    #[serde(default)]
    pub key: KeyConfig,
}

impl OperatorConfig {
    /// Load configuration from files and environment variables, letting
    /// `base_url` override every other source.
    pub fn load(base_url: Option<String>) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // e.g., CUSTODY_OPERATOR_API__BASE_URL, CUSTODY_OPERATOR_KEY__PATH
            .add_source(
                Environment::with_prefix("CUSTODY_OPERATOR")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("api.base_url", base_url)?
            .build()?;

        config.try_deserialize()
    }

    /// Parse configuration from an inline TOML document.
    pub fn from_toml(source: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from_str(source, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }

    /// Initialize the global config singleton. Later calls return the
    /// first configuration.
    pub fn init(base_url: Option<String>) -> Result<&'static Self, ConfigError> {
        if let Some(config) = CONFIG.get() {
            return Ok(config);
        }
        let config = Self::load(base_url)?;
        Ok(CONFIG.get_or_init(|| config))
    }
}

impl ApiConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout_secs: default_timeout_secs(),
            signature_header: default_signature_header(),
        }
    }

    /// Absolute URL of an operator endpoint
    pub fn endpoint(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{}/{}", base, path)
    }
}
