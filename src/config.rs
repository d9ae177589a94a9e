//! Configuration parsing.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::models::supervisor::SupervisorConfig;
use crate::models::{Duration, HorizonError, HorizonResult};

/// Main runtime config, typically read from a `.toml` file.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Prefix applied to every Redis key. Defaults to "horizon".
    pub prefix: String,

    /// Configuration for connecting to Redis.
    pub redis: RedisConfig,

    /// Supervisor pools to run, keyed by name.
    pub supervisors: HashMap<String, SupervisorConfig>,

    /// Snapshot/retention settings for the metrics pipeline.
    pub metrics: MetricsConfig,

    /// Configuration for the HTTP control/inspection surface.
    pub http: HttpConfig,
}

impl Config {
    /// Read configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> HorizonResult<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path).map_err(|err| {
            HorizonError::NotConfigured(format!("failed to read {}: {}", path.display(), err))
        })?;
        let config: Config = toml::from_str(&data).map_err(|err| {
            HorizonError::NotConfigured(format!("failed to parse {}: {}", path.display(), err))
        })?;
        Ok(config)
    }

    /// Fill defaults and reject inconsistent settings. Called by the
    /// coordinator before any component is built.
    pub fn validate(&mut self) -> HorizonResult<()> {
        if self.prefix.is_empty() {
            self.prefix = "horizon".to_owned();
        }
        if self.redis.host.is_empty() {
            self.redis.host = "localhost".to_owned();
        }
        if self.redis.port == 0 {
            self.redis.port = 6379;
        }

        for (name, supervisor) in &mut self.supervisors {
            supervisor.name = name.clone();
            if supervisor.queues.is_empty() {
                return Err(HorizonError::NotConfigured(format!(
                    "supervisor '{}' has no queues",
                    name
                )));
            }
            if supervisor.min_processes == 0 {
                return Err(HorizonError::NotConfigured(format!(
                    "supervisor '{}' must have min_processes >= 1",
                    name
                )));
            }
            if supervisor.min_processes > supervisor.max_processes {
                return Err(HorizonError::NotConfigured(format!(
                    "supervisor '{}' has min_processes > max_processes",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Redis URL for the configured server.
    pub fn redis_url(&self) -> String {
        if self.redis.password.is_empty() {
            format!("redis://{}:{}/{}", self.redis.host, self.redis.port, self.redis.db)
        } else {
            format!(
                "redis://:{}@{}:{}/{}",
                self.redis.password, self.redis.host, self.redis.port, self.redis.db
            )
        }
    }
}

/// Configuration for connecting to Redis.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub password: String,
    pub db: i64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        RedisConfig {
            host: "localhost".to_owned(),
            port: 6379,
            password: String::new(),
            db: 0,
        }
    }
}

/// Snapshot cadence and retention for the metrics pipeline.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,

    /// How often a point-in-time snapshot is taken.
    pub snapshot_interval: Duration,

    /// How long snapshots are retained before the hourly trim drops them.
    pub retention_period: Duration,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        MetricsConfig {
            enabled: true,
            snapshot_interval: Duration::from_secs(60),
            retention_period: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

/// Configuration for the HTTP control/inspection surface.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub enabled: bool,

    /// Listen address, e.g. "127.0.0.1:8080".
    pub addr: String,

    /// Path all endpoints are mounted under.
    pub base_path: String,

    pub auth: AuthConfig,
}

impl Default for HttpConfig {
    fn default() -> Self {
        HttpConfig {
            enabled: true,
            addr: "127.0.0.1:8080".to_owned(),
            base_path: "/horizon".to_owned(),
            auth: AuthConfig::default(),
        }
    }
}

/// Authentication scheme for the HTTP surface.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub enabled: bool,

    /// One of "basic" or "token".
    #[serde(rename = "type")]
    pub auth_type: String,

    pub username: String,
    pub password: String,
    pub token: String,
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::models::supervisor::BalanceMode;

    #[test]
    fn defaults() {
        let mut config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.prefix, "horizon");
        assert_eq!(config.redis.host, "localhost");
        assert_eq!(config.redis.port, 6379);
        assert_eq!(config.redis_url(), "redis://localhost:6379/0");
        assert!(config.metrics.enabled);
        assert_eq!(config.metrics.snapshot_interval, Duration::from_secs(60));
        assert_eq!(config.metrics.retention_period, Duration::from_secs(604800));
        assert!(config.http.enabled);
        assert_eq!(config.http.base_path, "/horizon");
        assert!(!config.http.auth.enabled);
    }

    #[test]
    fn parse_minimal() {
        let toml_str = r#"
prefix = "app"

[redis]
host = "redis.internal"
port = 6380
"#;
        let mut config: Config = toml::from_str(toml_str).unwrap();
        config.validate().unwrap();
        assert_eq!(config.prefix, "app");
        assert_eq!(config.redis_url(), "redis://redis.internal:6380/0");
    }

    #[test]
    fn parse_supervisors() {
        let toml_str = r#"
[supervisors.main]
queues = ["default", "mail"]
balance = "auto"
min_processes = 2
max_processes = 8
sleep = "1s"
timeout = "2m"

[supervisors.batch]
queues = ["batch"]
"#;
        let mut config: Config = toml::from_str(toml_str).unwrap();
        config.validate().unwrap();
        assert_eq!(config.supervisors.len(), 2);

        let main = &config.supervisors["main"];
        assert_eq!(main.name, "main");
        assert_eq!(main.queues, vec!["default", "mail"]);
        assert_eq!(main.balance, BalanceMode::Auto);
        assert_eq!(main.min_processes, 2);
        assert_eq!(main.max_processes, 8);
        assert_eq!(main.sleep, Duration::from_secs(1));
        assert_eq!(main.timeout, Duration::from_secs(120));

        let batch = &config.supervisors["batch"];
        assert_eq!(batch.name, "batch");
        assert_eq!(batch.balance, BalanceMode::Simple);
        assert_eq!(batch.min_processes, 1);
    }

    #[test]
    fn parse_auth() {
        let toml_str = r#"
[http]
addr = "0.0.0.0:9000"
base_path = "/jobs"

[http.auth]
enabled = true
type = "token"
token = "secret"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.http.addr, "0.0.0.0:9000");
        assert_eq!(config.http.base_path, "/jobs");
        assert!(config.http.auth.enabled);
        assert_eq!(config.http.auth.auth_type, "token");
        assert_eq!(config.http.auth.token, "secret");
    }

    #[test]
    fn reject_invalid_supervisor() {
        let toml_str = r#"
[supervisors.bad]
queues = []
"#;
        let mut config: Config = toml::from_str(toml_str).unwrap();
        assert!(matches!(
            config.validate(),
            Err(HorizonError::NotConfigured(_))
        ));

        let toml_str = r#"
[supervisors.bad]
min_processes = 5
max_processes = 2
"#;
        let mut config: Config = toml::from_str(toml_str).unwrap();
        assert!(matches!(
            config.validate(),
            Err(HorizonError::NotConfigured(_))
        ));
    }

    #[test]
    fn redis_url_with_password() {
        let mut config = Config::default();
        config.redis.password = "hunter2".to_owned();
        config.validate().unwrap();
        assert_eq!(config.redis_url(), "redis://:hunter2@localhost:6379/0");
    }
}
