use crate::error::{AppError, Result};
use serde::{Deserialize, Deserializer};
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub ingest: IngestConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    #[serde(default = "default_db_port", deserialize_with = "deserialize_port")]
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_db_port() -> u16 {
    5432
}

fn default_max_connections() -> u32 {
    10
}

/// Custom deserializer that handles port as both number and string
///
/// Accepts:
/// - `port: 5432` (number)
/// - `port: "5432"` (string that parses to number)
/// - `port: ${DB_PORT}` (env var substituted to either)
fn deserialize_port<'de, D>(deserializer: D) -> std::result::Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum PortValue {
        Number(u16),
        String(String),
    }

    match PortValue::deserialize(deserializer)? {
        PortValue::Number(n) => Ok(n),
        PortValue::String(s) => s
            .parse::<u16>()
            .map_err(|_| serde::de::Error::custom(format!("Invalid port number: '{}'", s))),
    }
}

impl DatabaseConfig {
    pub fn connection_string(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.name
        )
    }
}

/// How a bulk write treats rows whose natural key already exists.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    /// Refresh the mutable columns of the existing row.
    #[default]
    Refresh,
    /// Leave the existing row untouched and skip the candidate.
    Ignore,
}

/// How candidates are reconciled against existing rows.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ReconcileStrategy {
    /// Single bulk INSERT with an ON CONFLICT clause on the natural key.
    #[default]
    Upsert,
    /// Batched key lookup, set-difference, then separate bulk insert/update
    /// in one transaction.
    SelectThenWrite,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    pub weather_dir: String,
    pub crop_dir: String,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default)]
    pub on_conflict: ConflictPolicy,
    #[serde(default)]
    pub strategy: ReconcileStrategy,
    /// Optional glob applied to file names within the data directories,
    /// e.g. "*.txt". Unset means every regular file is ingested.
    #[serde(default)]
    pub file_pattern: Option<String>,
}

fn default_workers() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            page_size: default_page_size(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

fn default_page_size() -> i64 {
    50
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| AppError::Config(format!("Failed to read config file: {}", e)))?;

        // Substitute environment variables
        let expanded = expand_env_vars(&content)?;

        let config: Config = serde_yaml::from_str(&expanded)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {}", e)))?;

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    ///
    /// Checks for:
    /// - Unexpanded environment variables
    /// - Non-empty required fields
    /// - Valid port, pool and pagination ranges
    /// - Well-formed file pattern
    fn validate(&self) -> Result<()> {
        // Check if any database field contains unexpanded environment variables
        let fields_to_check = [
            ("DB_HOST", &self.database.host),
            ("DB_NAME", &self.database.name),
            ("DB_USER", &self.database.user),
            ("DB_PASSWORD", &self.database.password),
        ];

        for (field_name, value) in &fields_to_check {
            if value.contains("${") {
                return Err(AppError::Config(format!(
                    "{} environment variable is not set. \
                     Please set it or create a .env file. \
                     See .env.example for required variables.",
                    field_name
                )));
            }
        }

        if self.database.host.is_empty() {
            return Err(AppError::Config(
                "Database host cannot be empty".to_string(),
            ));
        }

        if self.database.name.is_empty() {
            return Err(AppError::Config(
                "Database name cannot be empty".to_string(),
            ));
        }

        if self.database.user.is_empty() {
            return Err(AppError::Config(
                "Database user cannot be empty".to_string(),
            ));
        }

        if self.database.port == 0 {
            return Err(AppError::Config("Database port cannot be 0".to_string()));
        }

        if self.database.max_connections == 0 {
            return Err(AppError::Config(
                "Database max_connections must be at least 1".to_string(),
            ));
        }

        if self.database.max_connections > 100 {
            return Err(AppError::Config(format!(
                "Database max_connections {} seems too high, maximum recommended is 100",
                self.database.max_connections
            )));
        }

        if self.ingest.weather_dir.is_empty() {
            return Err(AppError::Config(
                "Ingest weather_dir cannot be empty".to_string(),
            ));
        }

        if self.ingest.crop_dir.is_empty() {
            return Err(AppError::Config(
                "Ingest crop_dir cannot be empty".to_string(),
            ));
        }

        if self.ingest.workers == 0 {
            return Err(AppError::Config(
                "Ingest workers must be at least 1".to_string(),
            ));
        }

        // Every worker holds one connection while writing; a pool smaller than
        // the worker count just serializes the workers.
        if (self.ingest.workers as u32) > self.database.max_connections {
            tracing::warn!(
                "Ingest workers ({}) exceeds database max_connections ({}), workers will contend for connections",
                self.ingest.workers,
                self.database.max_connections
            );
        }

        if let Some(pattern) = &self.ingest.file_pattern {
            glob::Pattern::new(pattern).map_err(|e| {
                AppError::Config(format!("Invalid ingest file_pattern '{}': {}", pattern, e))
            })?;
        }

        if self.server.page_size <= 0 {
            return Err(AppError::Config(
                "Server page_size must be at least 1".to_string(),
            ));
        }

        if self.server.bind.parse::<std::net::SocketAddr>().is_err() {
            return Err(AppError::Config(format!(
                "Invalid server bind address '{}'",
                self.server.bind
            )));
        }

        Ok(())
    }
}

fn expand_env_vars(content: &str) -> Result<String> {
    let mut result = content.to_string();
    let re = regex_lite::Regex::new(r"\$\{([^}]+)\}").unwrap();

    let mut missing_vars = Vec::new();

    for cap in re.captures_iter(content) {
        let var_name = &cap[1];
        match std::env::var(var_name) {
            Ok(value) => {
                result = result.replace(&cap[0], &value);
            }
            Err(_) => {
                missing_vars.push(var_name.to_string());
            }
        }
    }

    if !missing_vars.is_empty() {
        return Err(AppError::Config(format!(
            "Missing required environment variable{}: {}\n\n\
             To fix this:\n\
             1. Create a .env file in the project root (copy .env.example)\n\
             2. Set the missing variable{}: export {}=<value>\n\
             3. Or set {} in your environment before running",
            if missing_vars.len() > 1 { "s" } else { "" },
            missing_vars.join(", "),
            if missing_vars.len() > 1 { "s" } else { "" },
            missing_vars[0],
            missing_vars.join(", ")
        )));
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_deserialize_from_number() {
        let yaml = r#"
host: localhost
port: 5432
name: test
user: test
password: test
"#;
        let config: DatabaseConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.port, 5432);
    }

    #[test]
    fn test_port_deserialize_from_string() {
        let yaml = r#"
host: localhost
port: "5432"
name: test
user: test
password: test
"#;
        let config: DatabaseConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.port, 5432);
    }

    #[test]
    fn test_port_deserialize_invalid_string() {
        let yaml = r#"
host: localhost
port: "not_a_number"
name: test
user: test
password: test
"#;
        let result: std::result::Result<DatabaseConfig, _> = serde_yaml::from_str(yaml);
        assert!(result.is_err());
        let err_msg = result.unwrap_err().to_string();
        assert!(err_msg.contains("Invalid port number") || err_msg.contains("not_a_number"));
    }

    #[test]
    fn test_ingest_defaults() {
        let yaml = r#"
weather_dir: /data/wx_data
crop_dir: /data/yld_data
"#;
        let config: IngestConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.workers, 5);
        assert_eq!(config.on_conflict, ConflictPolicy::Refresh);
        assert_eq!(config.strategy, ReconcileStrategy::Upsert);
        assert!(config.file_pattern.is_none());
    }

    #[test]
    fn test_conflict_policy_kebab_case() {
        let yaml = r#"
weather_dir: /data/wx_data
crop_dir: /data/yld_data
on_conflict: ignore
strategy: select-then-write
"#;
        let config: IngestConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.on_conflict, ConflictPolicy::Ignore);
        assert_eq!(config.strategy, ReconcileStrategy::SelectThenWrite);
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("password: ${AGRICLIME_TEST_UNSET_VAR}");
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("AGRICLIME_TEST_UNSET_VAR"));
    }
}
