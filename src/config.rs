use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::path::Path;
use tracing::warn;

use crate::error::{LedgerError, LedgerResult};
use crate::store::policy::DeletePolicy;

pub const DEFAULT_HMAC_SECRET: &str = "audit-secret-change-in-production-minimum-32-chars";
pub const DEFAULT_DATABASE_URL: &str = "sqlite://ledger.db";
pub const DEFAULT_VERIFY_PAGE_SIZE: u64 = 500;
pub const MIN_SECRET_LEN: usize = 32;

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub hmac_secret: String,
    pub database_url: String,
    pub verify_page_size: u64,
    pub block_delete: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            hmac_secret: DEFAULT_HMAC_SECRET.to_string(),
            database_url: DEFAULT_DATABASE_URL.to_string(),
            verify_page_size: DEFAULT_VERIFY_PAGE_SIZE,
            block_delete: false,
        }
    }
}

impl fmt::Debug for LedgerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LedgerConfig")
            .field("hmac_secret", &"[redacted]")
            .field("database_url", &self.database_url)
            .field("verify_page_size", &self.verify_page_size)
            .field("block_delete", &self.block_delete)
            .finish()
    }
}

impl LedgerConfig {
    /// Load from `LEDGER_*` environment variables, falling back to defaults
    pub fn load() -> LedgerResult<Self> {
        let defaults = Self::default();

        let hmac_secret = env::var("LEDGER_HMAC_SECRET").unwrap_or(defaults.hmac_secret);

        let database_url = env::var("LEDGER_DATABASE_URL").unwrap_or(defaults.database_url);

        let verify_page_size = match env::var("LEDGER_VERIFY_PAGE_SIZE") {
            Ok(raw) => raw.parse().map_err(|e| {
                LedgerError::Config(format!("LEDGER_VERIFY_PAGE_SIZE={:?}: {}", raw, e))
            })?,
            Err(_) => defaults.verify_page_size,
        };

        let block_delete = match env::var("LEDGER_BLOCK_DELETE") {
            Ok(raw) => parse_flag(&raw).ok_or_else(|| {
                LedgerError::Config(format!("LEDGER_BLOCK_DELETE={:?} is not a boolean", raw))
            })?,
            Err(_) => defaults.block_delete,
        };

        let config = LedgerConfig {
            hmac_secret,
            database_url,
            verify_page_size,
            block_delete,
        };
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file; missing keys take their defaults
    pub fn from_toml_file(path: &Path) -> LedgerResult<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| LedgerError::Config(format!("Failed to read {:?}: {}", path, e)))?;
        let config: LedgerConfig = toml::from_str(&contents)
            .map_err(|e| LedgerError::Config(format!("Failed to parse {:?}: {}", path, e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> LedgerResult<()> {
        if self.hmac_secret.is_empty() {
            return Err(LedgerError::Config("hmac_secret must not be empty".to_string()));
        }
        if self.hmac_secret.len() < MIN_SECRET_LEN {
            warn!(
                "Ledger HMAC secret is shorter than {} bytes; signatures are weak",
                MIN_SECRET_LEN
            );
        }
        if self.hmac_secret == DEFAULT_HMAC_SECRET {
            warn!("Ledger HMAC secret is the built-in default; set LEDGER_HMAC_SECRET");
        }
        if self.verify_page_size == 0 {
            return Err(LedgerError::Config(
                "verify_page_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn delete_policy(&self) -> DeletePolicy {
        DeletePolicy::from_flag(self.block_delete)
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
