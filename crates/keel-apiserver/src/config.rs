// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for keel-apiserver.

use std::time::Duration;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Database URL; `postgres://` or `sqlite:` selects the store backend
    pub database_url: String,
    /// Maximum connections of the database pool
    pub database_max_connections: u32,
    /// Interval between two workflow record sync passes
    pub record_sync_interval: Duration,
    /// Field manager used for server-side apply
    pub field_manager: String,
}

/// Database backend selected by the URL scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseKind {
    Postgres,
    Sqlite,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("KEEL_DATABASE_URL")
            .map_err(|_| ConfigError::MissingEnvVar("KEEL_DATABASE_URL"))?;

        let database_max_connections: u32 = std::env::var("KEEL_DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("KEEL_DATABASE_MAX_CONNECTIONS"))?;

        let interval_secs: u64 = std::env::var("KEEL_RECORD_SYNC_INTERVAL_SECS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("KEEL_RECORD_SYNC_INTERVAL_SECS"))?;
        if interval_secs == 0 {
            return Err(ConfigError::InvalidValue("KEEL_RECORD_SYNC_INTERVAL_SECS"));
        }

        let field_manager =
            std::env::var("KEEL_FIELD_MANAGER").unwrap_or_else(|_| "keel-apiserver".to_string());

        Ok(Self {
            database_url,
            database_max_connections,
            record_sync_interval: Duration::from_secs(interval_secs),
            field_manager,
        })
    }

    /// Backend for the configured database URL.
    pub fn database_kind(&self) -> Result<DatabaseKind, ConfigError> {
        let url = self.database_url.as_str();
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Ok(DatabaseKind::Postgres)
        } else if url.starts_with("sqlite:") {
            Ok(DatabaseKind::Sqlite)
        } else {
            Err(ConfigError::UnsupportedDatabase(url.to_string()))
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),

    #[error("Unsupported database URL: {0}")]
    UnsupportedDatabase(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Environment variables are process-global
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new() -> Self {
            Self { vars: Vec::new() }
        }

        fn set(&mut self, key: &str, value: &str) {
            self.vars.push((key.to_string(), env::var(key).ok()));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::set_var(key, value) };
        }

        fn remove(&mut self, key: &str) {
            self.vars.push((key.to_string(), env::var(key).ok()));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::remove_var(key) };
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.vars.drain(..).rev() {
                // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
                unsafe {
                    match value {
                        Some(v) => env::set_var(&key, v),
                        None => env::remove_var(&key),
                    }
                }
            }
        }
    }

    #[test]
    fn test_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.set("KEEL_DATABASE_URL", "sqlite::memory:");
        guard.remove("KEEL_DATABASE_MAX_CONNECTIONS");
        guard.remove("KEEL_RECORD_SYNC_INTERVAL_SECS");
        guard.remove("KEEL_FIELD_MANAGER");

        let config = Config::from_env().unwrap();
        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.database_max_connections, 10);
        assert_eq!(config.record_sync_interval, Duration::from_secs(10));
        assert_eq!(config.field_manager, "keel-apiserver");
        assert_eq!(config.database_kind().unwrap(), DatabaseKind::Sqlite);
    }

    #[test]
    fn test_overrides() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.set("KEEL_DATABASE_URL", "postgres://keel@localhost/keel");
        guard.set("KEEL_DATABASE_MAX_CONNECTIONS", "4");
        guard.set("KEEL_RECORD_SYNC_INTERVAL_SECS", "30");
        guard.set("KEEL_FIELD_MANAGER", "keel-test");

        let config = Config::from_env().unwrap();
        assert_eq!(config.database_max_connections, 4);
        assert_eq!(config.record_sync_interval, Duration::from_secs(30));
        assert_eq!(config.field_manager, "keel-test");
        assert_eq!(config.database_kind().unwrap(), DatabaseKind::Postgres);
    }

    #[test]
    fn test_missing_database_url() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.remove("KEEL_DATABASE_URL");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar("KEEL_DATABASE_URL")));
    }

    #[test]
    fn test_invalid_values() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.set("KEEL_DATABASE_URL", "sqlite::memory:");
        guard.set("KEEL_RECORD_SYNC_INTERVAL_SECS", "0");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue("KEEL_RECORD_SYNC_INTERVAL_SECS")
        ));

        guard.set("KEEL_RECORD_SYNC_INTERVAL_SECS", "5");
        guard.set("KEEL_DATABASE_MAX_CONNECTIONS", "many");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue("KEEL_DATABASE_MAX_CONNECTIONS")
        ));
    }

    #[test]
    fn test_unsupported_database() {
        let config = Config {
            database_url: "mysql://localhost/keel".into(),
            database_max_connections: 10,
            record_sync_interval: Duration::from_secs(10),
            field_manager: "keel-apiserver".into(),
        };
        assert!(matches!(
            config.database_kind(),
            Err(ConfigError::UnsupportedDatabase(_))
        ));
    }
}
