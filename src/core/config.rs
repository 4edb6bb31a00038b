/// Configuration management for .env files
///
/// The backup subsystem only reads deployment parameters from the settings
/// file: database connection values for pg_dump, the blob storage root, and
/// a handful of tunables. It never writes settings back.

use anyhow::{anyhow, Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::utils::{
    parse_exclusions, redact_credentials, DEFAULT_DATABASE_PORT, DEFAULT_DB_DIR,
    DEFAULT_EXCLUSIONS, DEFAULT_PG_DUMP_BIN, DEFAULT_PROCESS_TIMEOUT_SECS,
};

pub struct DeploymentConfig {
    path: PathBuf,
    values: HashMap<String, String>,
}

impl DeploymentConfig {
    /// Load configuration from a .env file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if !path.exists() {
            return Err(anyhow!("config file not found at {}", path.display()));
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;

        let mut values = HashMap::new();
        for line in content.lines() {
            let line = line.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                values.insert(key.trim().to_string(), value.trim().to_string());
            }
        }

        Ok(Self { path, values })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get a configuration value
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|v| v.as_str())
    }

    fn require(&self, key: &str) -> Result<&str> {
        self.get(key)
            .ok_or_else(|| anyhow!("{} is not set in {}", key, self.path.display()))
    }

    /// Root of the blob storage tree.
    pub fn storage_root(&self) -> Result<PathBuf> {
        Ok(PathBuf::from(self.require("STORAGE_ROOT")?))
    }

    /// Directory where dump artifacts are staged for the loader.
    pub fn db_dir(&self) -> PathBuf {
        self.get("DB_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_DIR))
    }

    /// Parent directory for scratch dirs; defaults to the system temp dir.
    pub fn scratch_dir(&self) -> PathBuf {
        self.get("SCRATCH_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir)
    }

    /// Subprocess timeout for dump tools.
    pub fn process_timeout(&self) -> Duration {
        let secs = self
            .get("PROCESS_TIMEOUT_SECS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_PROCESS_TIMEOUT_SECS);
        Duration::from_secs(secs)
    }

    pub fn pg_dump_bin(&self) -> &str {
        self.get("PG_DUMP_BIN").unwrap_or(DEFAULT_PG_DUMP_BIN)
    }

    /// The external task that writes the structured data dump. Configured as
    /// a whitespace-separated program + arguments; the output path is
    /// appended as the final argument at invocation time.
    pub fn data_dump_command(&self) -> Result<Vec<String>> {
        let raw = self.require("DATA_DUMP_COMMAND")?;
        let parts: Vec<String> = raw.split_whitespace().map(String::from).collect();
        if parts.is_empty() {
            return Err(anyhow!(
                "DATA_DUMP_COMMAND in {} is empty",
                self.path.display()
            ));
        }
        Ok(parts)
    }

    /// Tables excluded from the structured dump. Caller-configurable via
    /// BACKUP_EXCLUDE; absent means the fixed default policy.
    pub fn exclusions(&self) -> Vec<String> {
        match self.get("BACKUP_EXCLUDE") {
            Some(raw) => parse_exclusions(raw),
            None => DEFAULT_EXCLUSIONS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Connection URI handed to pg_dump. Embeds credentials, so it must
    /// never be logged; use `redacted_uri` for display.
    pub fn connection_uri(&self) -> Result<String> {
        let user = self.require("DATABASE_USER")?;
        let password = self.require("DATABASE_PASSWORD")?;
        let database = self.require("DATABASE_NAME")?;
        let host = self.require("DATABASE_HOST")?;
        let port = self.get("DATABASE_PORT").unwrap_or(DEFAULT_DATABASE_PORT);

        Ok(format!(
            "postgresql://{}:{}@:{}/{}?host={}",
            user, password, port, database, host
        ))
    }

    pub fn redacted_uri(&self) -> Result<String> {
        Ok(redact_credentials(&self.connection_uri()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn config_from(content: &str) -> DeploymentConfig {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        DeploymentConfig::load(file.path()).unwrap()
    }

    const FULL: &str = "\
# deployment settings
DATABASE_HOST=db
DATABASE_USER=envizon
DATABASE_PASSWORD=s3cret
DATABASE_NAME=envizon_production
STORAGE_ROOT=/srv/envizon/storage
DATA_DUMP_COMMAND=bundle exec rake db:data:dump
";

    #[test]
    fn parses_key_value_lines_and_skips_comments() {
        let config = config_from(FULL);
        assert_eq!(config.get("DATABASE_HOST"), Some("db"));
        assert_eq!(
            config.storage_root().unwrap(),
            PathBuf::from("/srv/envizon/storage")
        );
        assert_eq!(
            config.data_dump_command().unwrap(),
            vec!["bundle", "exec", "rake", "db:data:dump"]
        );
    }

    #[test]
    fn builds_connection_uri_with_default_port() {
        let config = config_from(FULL);
        assert_eq!(
            config.connection_uri().unwrap(),
            "postgresql://envizon:s3cret@:5432/envizon_production?host=db"
        );
        assert!(!config.redacted_uri().unwrap().contains("s3cret"));
    }

    #[test]
    fn missing_required_key_is_an_error() {
        let config = config_from("DATABASE_HOST=db\n");
        assert!(config.connection_uri().is_err());
        assert!(config.storage_root().is_err());
    }

    #[test]
    fn exclusions_default_to_fixed_policy() {
        let config = config_from(FULL);
        assert_eq!(config.exclusions(), vec!["users", "ar_internal_metadata"]);

        let config = config_from("BACKUP_EXCLUDE=sessions,tokens\n");
        assert_eq!(config.exclusions(), vec!["sessions", "tokens"]);
    }

    #[test]
    fn timeout_and_binaries_have_defaults() {
        let config = config_from(FULL);
        assert_eq!(config.process_timeout(), Duration::from_secs(600));
        assert_eq!(config.pg_dump_bin(), "pg_dump");
        assert_eq!(config.db_dir(), PathBuf::from("db"));

        let config = config_from("PROCESS_TIMEOUT_SECS=30\nPG_DUMP_BIN=/opt/pg/bin/pg_dump\n");
        assert_eq!(config.process_timeout(), Duration::from_secs(30));
        assert_eq!(config.pg_dump_bin(), "/opt/pg/bin/pg_dump");
    }
}
