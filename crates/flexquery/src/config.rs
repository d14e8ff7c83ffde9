//! Configuration loaded from environment variables.

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use sea_query::{MysqlQueryBuilder, PostgresQueryBuilder, SelectStatement, SqliteQueryBuilder};

/// SQL dialect to render statements for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum Backend {
    #[default]
    Postgres,
    Sqlite,
    #[value(name = "mysql")]
    MySql,
}

impl Backend {
    /// Render `statement` with values inlined.
    pub fn render(self, statement: &SelectStatement) -> String {
        match self {
            Backend::Postgres => statement.to_string(PostgresQueryBuilder),
            Backend::Sqlite => statement.to_string(SqliteQueryBuilder),
            Backend::MySql => statement.to_string(MysqlQueryBuilder),
        }
    }
}

impl FromStr for Backend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Backend::Postgres),
            "sqlite" => Ok(Backend::Sqlite),
            "mysql" => Ok(Backend::MySql),
            other => anyhow::bail!(
                "unknown backend '{other}'. Valid backends: postgres, sqlite, mysql"
            ),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Backend::Postgres => "postgres",
            Backend::Sqlite => "sqlite",
            Backend::MySql => "mysql",
        })
    }
}

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Schema and declaration file, TOML or JSON (default: flexquery.toml).
    pub schema_path: PathBuf,

    /// SQL dialect for rendered statements (default: postgres).
    pub backend: Backend,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Load configuration through `var`, which returns a variable's value.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let schema_path = var("FLEXQUERY_SCHEMA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("flexquery.toml"));

        let backend = var("FLEXQUERY_BACKEND")
            .unwrap_or_else(|| "postgres".to_string())
            .parse()
            .context("FLEXQUERY_BACKEND must be one of postgres, sqlite, mysql")?;

        Ok(Self {
            schema_path,
            backend,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = Config::from_vars(vars(&[])).unwrap();
        assert_eq!(config.schema_path, PathBuf::from("flexquery.toml"));
        assert_eq!(config.backend, Backend::Postgres);
    }

    #[test]
    fn overrides() {
        let config = Config::from_vars(vars(&[
            ("FLEXQUERY_SCHEMA", "/etc/orchard.json"),
            ("FLEXQUERY_BACKEND", "SQLite"),
        ]))
        .unwrap();
        assert_eq!(config.schema_path, PathBuf::from("/etc/orchard.json"));
        assert_eq!(config.backend, Backend::Sqlite);
    }

    #[test]
    fn invalid_backend() {
        let err = Config::from_vars(vars(&[("FLEXQUERY_BACKEND", "oracle")])).unwrap_err();
        assert!(format!("{err:#}").contains("oracle"));
    }
}
