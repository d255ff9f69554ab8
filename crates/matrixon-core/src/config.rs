// =============================================================================
// Matrixon Homeserver Core - Server Configuration
// =============================================================================
//
// Project: Matrixon - a federated Matrix homeserver core
// Author: arkSong (arksong2018@gmail.com)
// Contributors: Matrixon Development Team
// Date: 2024-12-11
// Version: 0.11.0-alpha (file-backed object store core)
// License: Apache 2.0 / MIT
//
// Description:
//   The config singleton document and its typed facade: listeners, logging, 
//   registration/federation toggles, captcha and rate-limit settings, all 
//   round-tripped through the object store's JSON Schema Layer.
//
// Performance Targets:
//   • Single object-store lock per config read/write
//
// Architecture:
//   • Config is a store-backed document, not a process-local in-memory struct
// =============================================================================

//! The `config` singleton document and its facade (§3, §4.3).

use matrixon_db::schema::require_str;
use matrixon_db::{FromJson, ObjectStore, Path, StoreError, StoreResult, ToJson};
use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOutput {
    Stdout,
    File,
    Syslog,
}

impl LogOutput {
    fn as_str(&self) -> &'static str {
        match self {
            LogOutput::Stdout => "stdout",
            LogOutput::File => "file",
            LogOutput::Syslog => "syslog",
        }
    }

    fn parse(s: &str) -> StoreResult<LogOutput> {
        match s {
            "stdout" => Ok(LogOutput::Stdout),
            "file" => Ok(LogOutput::File),
            "syslog" => Ok(LogOutput::Syslog),
            other => Err(StoreError::Corrupt(format!("unknown log output '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogLevel {
    Notice,
    Error,
    Message,
    Debug,
    Warning,
}

impl LogLevel {
    fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Notice => "notice",
            LogLevel::Error => "error",
            LogLevel::Message => "message",
            LogLevel::Debug => "debug",
            LogLevel::Warning => "warning",
        }
    }

    fn parse(s: &str) -> StoreResult<LogLevel> {
        match s {
            "notice" => Ok(LogLevel::Notice),
            "error" => Ok(LogLevel::Error),
            "message" => Ok(LogLevel::Message),
            "debug" => Ok(LogLevel::Debug),
            "warning" => Ok(LogLevel::Warning),
            other => Err(StoreError::Corrupt(format!("unknown log level '{other}'"))),
        }
    }

    /// The `tracing` filter directive this level maps onto.
    pub fn as_env_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Warning => "warn",
            LogLevel::Error => "error",
            LogLevel::Notice | LogLevel::Message => "info",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub output: LogOutput,
    pub level: LogLevel,
    pub timestamp_format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            output: LogOutput::Stdout,
            level: LogLevel::Notice,
            timestamp_format: "default".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsListenConfig {
    pub cert: String,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenConfig {
    pub port: u16,
    pub threads: u32,
    pub max_connections: u32,
    pub tls: Option<TlsListenConfig>,
}

impl Default for ListenConfig {
    fn default() -> Self {
        ListenConfig {
            port: 8008,
            threads: 4,
            max_connections: 32,
            tls: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunAs {
    pub uid: String,
    pub gid: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptchaConfig {
    pub enabled: bool,
    pub verify_url: Option<String>,
    pub secret: Option<String>,
}

impl Default for CaptchaConfig {
    fn default() -> Self {
        CaptchaConfig {
            enabled: false,
            verify_url: None,
            secret: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub per_second: u32,
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimitConfig {
            enabled: true,
            per_second: 10,
            burst: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub server_name: String,
    pub base_url: String,
    pub identity_server: Option<String>,
    pub listen: Vec<ListenConfig>,
    pub log: LogConfig,
    pub run_as: RunAs,
    pub registration: bool,
    pub federation: bool,
    pub max_cache: u64,
    pub captcha: CaptchaConfig,
    pub rate_limit: RateLimitConfig,
}

fn default_base_url(server_name: &str) -> String {
    format!("https://{server_name}/")
}

/// Best-effort local hostname lookup for `createDefault`, falling back
/// to `localhost` rather than failing startup over it.
fn local_hostname() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "localhost".to_string())
}

/// Best-effort local user/group lookup for `createDefault`.
fn effective_run_as() -> RunAs {
    RunAs {
        uid: std::env::var("USER").unwrap_or_else(|_| "matrixon".to_string()),
        gid: std::env::var("USER").unwrap_or_else(|_| "matrixon".to_string()),
    }
}

impl Config {
    /// Assemble the default configuration used when the store has no
    /// `config` document yet: the local hostname, one plaintext
    /// listener, and `runAs` set to the effective user (§4.3).
    pub fn create_default() -> Config {
        let server_name = local_hostname();
        Config {
            base_url: default_base_url(&server_name),
            server_name,
            identity_server: None,
            listen: vec![ListenConfig::default()],
            log: LogConfig::default(),
            run_as: effective_run_as(),
            registration: false,
            federation: true,
            max_cache: 0,
            captcha: CaptchaConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }

    pub fn validate(&self) -> StoreResult<()> {
        if self.server_name.is_empty() {
            return Err(StoreError::Corrupt("serverName must not be empty".into()));
        }
        if self.listen.is_empty() {
            return Err(StoreError::Corrupt("at least one listener is required".into()));
        }
        Ok(())
    }
}

const CONFIG_PATH: &[&str] = &["config"];

/// Open (creating the default if absent) and lock the singleton config
/// document, returning the parsed record alongside the lock handle so
/// the caller can mutate and commit it.
pub fn lock(store: &ObjectStore) -> StoreResult<(Config, matrixon_db::ObjectRef)> {
    let path = Path::new(CONFIG_PATH.iter().copied())?;
    let obj = store.lock_or_create(&path, || Config::create_default().to_json())?;
    let config = Config::from_json(obj.json())?;
    Ok((config, obj))
}

/// Write a (possibly mutated) config back and release the lock.
pub fn unlock(mut obj: matrixon_db::ObjectRef, config: &Config) -> StoreResult<()> {
    obj.set_json(config.to_json());
    obj.commit()
}

pub fn exists(store: &ObjectStore) -> StoreResult<bool> {
    let path = Path::new(CONFIG_PATH.iter().copied())?;
    Ok(store.exists(&path))
}

impl ToJson for ListenConfig {
    fn to_json(&self) -> Value {
        let mut obj = json!({
            "port": self.port,
            "threads": self.threads,
            "maxConnections": self.max_connections,
        });
        if let Some(tls) = &self.tls {
            obj["tls"] = json!({"cert": tls.cert, "key": tls.key});
        }
        obj
    }
}

impl FromJson for ListenConfig {
    fn from_json(value: &Value) -> StoreResult<Self> {
        let tls = match value.get("tls") {
            Some(tls) if !tls.is_null() => Some(TlsListenConfig {
                cert: require_str(tls, "cert")?.to_string(),
                key: require_str(tls, "key")?.to_string(),
            }),
            _ => None,
        };
        Ok(ListenConfig {
            port: value
                .get("port")
                .and_then(Value::as_u64)
                .map(|p| p as u16)
                .unwrap_or(8008),
            threads: value
                .get("threads")
                .and_then(Value::as_u64)
                .map(|t| t as u32)
                .unwrap_or(4),
            max_connections: value
                .get("maxConnections")
                .and_then(Value::as_u64)
                .map(|m| m as u32)
                .unwrap_or(32),
            tls,
        })
    }
}

impl ToJson for Config {
    fn to_json(&self) -> Value {
        json!({
            "serverName": self.server_name,
            "baseUrl": self.base_url,
            "identityServer": self.identity_server,
            "listen": self.listen.iter().map(ToJson::to_json).collect::<Vec<_>>(),
            "log": {
                "output": self.log.output.as_str(),
                "level": self.log.level.as_str(),
                "timestampFormat": self.log.timestamp_format,
            },
            "runAs": {"uid": self.run_as.uid, "gid": self.run_as.gid},
            "registration": self.registration,
            "federation": self.federation,
            "maxCache": self.max_cache,
            "captcha": {
                "enabled": self.captcha.enabled,
                "verifyUrl": self.captcha.verify_url,
                "secret": self.captcha.secret,
            },
            "rateLimit": {
                "enabled": self.rate_limit.enabled,
                "perSecond": self.rate_limit.per_second,
                "burst": self.rate_limit.burst,
            },
        })
    }
}

impl FromJson for Config {
    fn from_json(value: &Value) -> StoreResult<Self> {
        let server_name = require_str(value, "serverName")?.to_string();
        if server_name.is_empty() {
            return Err(StoreError::Corrupt("serverName must not be empty".into()));
        }
        let base_url = value
            .get("baseUrl")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| default_base_url(&server_name));
        let identity_server = value
            .get("identityServer")
            .and_then(Value::as_str)
            .map(str::to_string);

        let listen = match value.get("listen").and_then(Value::as_array) {
            Some(items) if !items.is_empty() => items
                .iter()
                .map(ListenConfig::from_json)
                .collect::<StoreResult<Vec<_>>>()?,
            _ => vec![ListenConfig::default()],
        };

        let log = match value.get("log") {
            Some(log) => LogConfig {
                output: match log.get("output").and_then(Value::as_str) {
                    Some(s) => LogOutput::parse(s)?,
                    None => LogOutput::Stdout,
                },
                level: match log.get("level").and_then(Value::as_str) {
                    Some(s) => LogLevel::parse(s)?,
                    None => LogLevel::Notice,
                },
                timestamp_format: log
                    .get("timestampFormat")
                    .and_then(Value::as_str)
                    .unwrap_or("default")
                    .to_string(),
            },
            None => LogConfig::default(),
        };

        let run_as = match value.get("runAs") {
            Some(run_as) => RunAs {
                uid: require_str(run_as, "uid")?.to_string(),
                gid: require_str(run_as, "gid")?.to_string(),
            },
            None => effective_run_as(),
        };

        let registration = value
            .get("registration")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let federation = value.get("federation").and_then(Value::as_bool).unwrap_or(true);
        let max_cache = value.get("maxCache").and_then(Value::as_u64).unwrap_or(0);

        let captcha = match value.get("captcha") {
            Some(c) => CaptchaConfig {
                enabled: c.get("enabled").and_then(Value::as_bool).unwrap_or(false),
                verify_url: c.get("verifyUrl").and_then(Value::as_str).map(str::to_string),
                secret: c.get("secret").and_then(Value::as_str).map(str::to_string),
            },
            None => CaptchaConfig::default(),
        };

        let rate_limit = match value.get("rateLimit") {
            Some(r) => RateLimitConfig {
                enabled: r.get("enabled").and_then(Value::as_bool).unwrap_or(true),
                per_second: r.get("perSecond").and_then(Value::as_u64).unwrap_or(10) as u32,
                burst: r.get("burst").and_then(Value::as_u64).unwrap_or(20) as u32,
            },
            None => RateLimitConfig::default(),
        };

        Ok(Config {
            server_name,
            base_url,
            identity_server,
            listen,
            log,
            run_as,
            registration,
            federation,
            max_cache,
            captcha,
            rate_limit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_default_has_one_plaintext_listener_on_8008() {
        let config = Config::create_default();
        assert_eq!(config.listen.len(), 1);
        assert_eq!(config.listen[0].port, 8008);
        assert!(config.listen[0].tls.is_none());
        assert_eq!(config.base_url, format!("https://{}/", config.server_name));
        assert!(!config.registration);
        assert!(config.federation);
    }

    #[test]
    fn round_trips_through_json() {
        let config = Config::create_default();
        let json = config.to_json();
        let back = Config::from_json(&json).unwrap();
        assert_eq!(config, back);
    }

    #[test]
    fn missing_optional_sections_fall_back_to_defaults() {
        let json = json!({"serverName": "example.org"});
        let config = Config::from_json(&json).unwrap();
        assert_eq!(config.base_url, "https://example.org/");
        assert_eq!(config.listen.len(), 1);
        assert_eq!(config.log, LogConfig::default());
        assert!(!config.captcha.enabled);
        assert!(config.rate_limit.enabled);
    }

    #[test]
    fn lock_auto_seeds_default_on_first_boot() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::open(dir.path()).unwrap();
        assert!(!exists(&store).unwrap());

        let (config, obj) = lock(&store).unwrap();
        assert_eq!(config.listen[0].port, 8008);
        unlock(obj, &config).unwrap();
        assert!(exists(&store).unwrap());
    }

    #[test]
    fn lock_returns_the_same_config_on_second_open() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::open(dir.path()).unwrap();

        let (mut config, obj) = lock(&store).unwrap();
        config.registration = true;
        unlock(obj, &config).unwrap();

        let (config2, obj2) = lock(&store).unwrap();
        assert!(config2.registration);
        obj2.discard().unwrap();
    }
}
