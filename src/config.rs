// ⚙️ Runtime configuration
//
// Everything is optional and comes from LEDGER_BRIDGE_* environment
// variables. Unset or blank values fall back to the defaults below; values
// that are set but unparsable are errors, never silently ignored.

use crate::reconciliation::ReconciliationEngine;
use crate::schema::DiscriminatorMap;
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

pub const ENV_DB: &str = "LEDGER_BRIDGE_DB";
pub const ENV_ADDR: &str = "LEDGER_BRIDGE_ADDR";
pub const ENV_UPLOAD_LIMIT: &str = "LEDGER_BRIDGE_UPLOAD_LIMIT";
pub const ENV_SCRATCH_DIR: &str = "LEDGER_BRIDGE_SCRATCH_DIR";
pub const ENV_COUNT_THRESHOLD: &str = "LEDGER_BRIDGE_COUNT_THRESHOLD";
pub const ENV_TOLERANCE: &str = "LEDGER_BRIDGE_TOLERANCE";
pub const ENV_DISCRIMINATORS: &str = "LEDGER_BRIDGE_DISCRIMINATORS";

/// Multipart uploads above this are refused (two files plus framing)
pub const DEFAULT_UPLOAD_LIMIT: usize = 60 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_path: PathBuf,
    pub bind_addr: SocketAddr,
    pub upload_limit: usize,
    /// Where uploads are staged; system temp dir when unset
    pub scratch_dir: PathBuf,
    pub engine: ReconciliationEngine,
    pub discriminators: DiscriminatorMap,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            database_path: PathBuf::from("transactions.db"),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            upload_limit: DEFAULT_UPLOAD_LIMIT,
            scratch_dir: std::env::temp_dir(),
            engine: ReconciliationEngine::default(),
            discriminators: DiscriminatorMap::default(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key/value source (the environment in production)
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = AppConfig::default();

        if let Some(path) = get(ENV_DB) {
            config.database_path = PathBuf::from(path);
        }
        if let Some(addr) = get(ENV_ADDR) {
            config.bind_addr = parse_value(ENV_ADDR, &addr)?;
        }
        if let Some(limit) = get(ENV_UPLOAD_LIMIT) {
            config.upload_limit = parse_value(ENV_UPLOAD_LIMIT, &limit)?;
        }
        if let Some(dir) = get(ENV_SCRATCH_DIR) {
            config.scratch_dir = PathBuf::from(dir);
        }
        if let Some(threshold) = get(ENV_COUNT_THRESHOLD) {
            config.engine.count_threshold = parse_value(ENV_COUNT_THRESHOLD, &threshold)?;
        }
        if let Some(tolerance) = get(ENV_TOLERANCE) {
            let tolerance: f64 = parse_value(ENV_TOLERANCE, &tolerance)?;
            anyhow::ensure!(
                tolerance.is_finite() && tolerance >= 0.0,
                "{} must be a non-negative number, got {}",
                ENV_TOLERANCE,
                tolerance
            );
            config.engine.tolerance = tolerance;
        }
        if let Some(path) = get(ENV_DISCRIMINATORS) {
            config.discriminators = load_discriminators(&PathBuf::from(path))?;
        }

        Ok(config)
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.parse::<T>()
        .with_context(|| format!("Invalid value for {}: {:?}", key, raw))
}

pub fn load_discriminators(path: &std::path::Path) -> Result<DiscriminatorMap> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read discriminator table {}", path.display()))?;
    DiscriminatorMap::from_json(&json)
        .with_context(|| format!("Failed to parse discriminator table {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TxKind;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AppConfig> {
        let vars: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();

        assert_eq!(config.database_path, PathBuf::from("transactions.db"));
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.upload_limit, 60 * 1024 * 1024);
        assert_eq!(config.engine, ReconciliationEngine::new());
        assert_eq!(config.discriminators, DiscriminatorMap::default());
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            (ENV_DB, "/tmp/ledger.db"),
            (ENV_ADDR, "127.0.0.1:9000"),
            (ENV_UPLOAD_LIMIT, "1024"),
            (ENV_COUNT_THRESHOLD, " 5 "),
            (ENV_TOLERANCE, "0.5"),
            (ENV_SCRATCH_DIR, ""),
        ])
        .unwrap();

        assert_eq!(config.database_path, PathBuf::from("/tmp/ledger.db"));
        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:9000");
        assert_eq!(config.upload_limit, 1024);
        assert_eq!(config.engine.count_threshold, 5);
        assert_eq!(config.engine.tolerance, 0.5);
        assert_eq!(config.scratch_dir, std::env::temp_dir());
    }

    #[test]
    fn test_invalid_values_are_errors() {
        let err = config_from(&[(ENV_COUNT_THRESHOLD, "many")]).unwrap_err();
        assert!(err.to_string().contains(ENV_COUNT_THRESHOLD));

        assert!(config_from(&[(ENV_ADDR, "localhost")]).is_err());
        assert!(config_from(&[(ENV_TOLERANCE, "-1")]).is_err());
    }

    #[test]
    fn test_discriminator_table_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"entries": [["0", "income"], ["1", "expense"]], "fallback": "transfer"}}"#
        )
        .unwrap();

        let path = file.path().to_string_lossy().to_string();
        let config = config_from(&[(ENV_DISCRIMINATORS, &path)]).unwrap();

        assert_eq!(config.discriminators.classify(Some("0")), TxKind::Income);
        assert_eq!(config.discriminators.classify(Some("9")), TxKind::Transfer);

        assert!(config_from(&[(ENV_DISCRIMINATORS, "/no/such/table.json")]).is_err());
    }
}
