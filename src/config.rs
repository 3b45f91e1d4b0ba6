//! Process configuration, loaded from environment variables. No CLI crate
//! is used: every role (gateway, engine, storage, sequencer-link) reads the
//! same variable set and ignores what it doesn't need, matching the
//! single-binary layout described for this crate.
//!
//! Grounded on the teacher's `config.rs` (`Config::from_env`,
//! `env_required`/`env_parse_or`/`env_bool` helpers, `validate()`,
//! `for_testing()`).

use std::env;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {var}: {message}")]
    InvalidValue { var: String, message: String },

    #[error("unknown role: {0} (expected gateway, engine, storage, or sequencer-link)")]
    UnknownRole(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Gateway,
    Engine,
    Storage,
    SequencerLink,
}

impl std::str::FromStr for Role {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, ConfigError> {
        match s {
            "gateway" => Ok(Role::Gateway),
            "engine" => Ok(Role::Engine),
            "storage" => Ok(Role::Storage),
            "sequencer-link" => Ok(Role::SequencerLink),
            other => Err(ConfigError::UnknownRole(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    RocksDb,
    Sled,
}

impl std::str::FromStr for StorageBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, ConfigError> {
        match s {
            "rocksdb" => Ok(StorageBackend::RocksDb),
            "sled" => Ok(StorageBackend::Sled),
            other => Err(ConfigError::InvalidValue {
                var: "FAAS_STORAGE_BACKEND".into(),
                message: format!("unknown backend {other}, expected rocksdb or sled"),
            }),
        }
    }
}

/// Helper to get a required environment variable.
fn env_required(name: &str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::MissingEnvVar(name.into()))
}

/// Helper to parse an environment variable with a default value.
fn env_parse_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(val) => val.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            var: name.into(),
            message: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

/// Helper to parse a boolean environment variable.
fn env_bool(name: &str, default: bool) -> bool {
    env::var(name).unwrap_or_else(|_| default.to_string()).to_lowercase() == "true"
}

/// Process-wide configuration shared by every role.
#[derive(Debug, Clone)]
pub struct Config {
    pub role: Role,
    pub hostname: String,
    pub listen_addr: String,
    pub engine_conn_port: u16,
    pub storage_conn_port: u16,
    pub http_port: u16,
    pub grpc_port: u16,
    pub func_config_file: String,

    /// Static `node_id@host:port` engine addresses the gateway dials at
    /// startup and registers with the node manager. Coordination-service
    /// discovery is out of scope (see `DESIGN.md` decision 4), so this
    /// list stands in for it.
    pub engine_addrs: Vec<String>,
    pub max_pending_func_calls: usize,

    pub storage_backend: StorageBackend,
    pub storage_datadir: String,
    pub rocksdb_max_background_jobs: i32,
    pub rocksdb_enable_compression: bool,

    pub num_io_workers: usize,
    pub message_conn_per_worker: usize,
    pub socket_listen_backlog: i32,
    pub tcp_enable_nodelay: bool,
    pub tcp_enable_keepalive: bool,

    pub zookeeper_host: String,
    pub zookeeper_root_path: String,

    pub metrics_addr: String,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let role_str = env::var("FAAS_ROLE").unwrap_or_else(|_| "gateway".to_string());
        let role: Role = role_str.parse()?;

        let storage_backend_str = env::var("FAAS_STORAGE_BACKEND").unwrap_or_else(|_| "sled".to_string());
        let storage_backend: StorageBackend = storage_backend_str.parse()?;

        let config = Config {
            role,
            hostname: env::var("FAAS_HOSTNAME").unwrap_or_else(|_| "localhost".to_string()),
            listen_addr: env::var("FAAS_LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0".to_string()),
            engine_conn_port: env_parse_or("FAAS_ENGINE_CONN_PORT", 10000)?,
            storage_conn_port: env_parse_or("FAAS_STORAGE_CONN_PORT", 10001)?,
            http_port: env_parse_or("FAAS_HTTP_PORT", 8080)?,
            grpc_port: env_parse_or("FAAS_GRPC_PORT", 8081)?,
            func_config_file: env::var("FAAS_FUNC_CONFIG_FILE").unwrap_or_else(|_| "func_config.json".to_string()),

            engine_addrs: env::var("FAAS_ENGINE_ADDRS")
                .unwrap_or_default()
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
            max_pending_func_calls: env_parse_or("FAAS_MAX_PENDING_FUNC_CALLS", 1024)?,

            storage_backend,
            storage_datadir: env::var("FAAS_STORAGE_DATADIR").unwrap_or_else(|_| "/tmp/faas-storage".to_string()),
            rocksdb_max_background_jobs: env_parse_or("FAAS_ROCKSDB_MAX_BACKGROUND_JOBS", 2)?,
            rocksdb_enable_compression: env_bool("FAAS_ROCKSDB_ENABLE_COMPRESSION", false),

            num_io_workers: env_parse_or("FAAS_NUM_IO_WORKERS", 2)?,
            message_conn_per_worker: env_parse_or("FAAS_MESSAGE_CONN_PER_WORKER", 4)?,
            socket_listen_backlog: env_parse_or("FAAS_SOCKET_LISTEN_BACKLOG", 1024)?,
            tcp_enable_nodelay: env_bool("FAAS_TCP_ENABLE_NODELAY", true),
            tcp_enable_keepalive: env_bool("FAAS_TCP_ENABLE_KEEPALIVE", true),

            zookeeper_host: env::var("FAAS_ZOOKEEPER_HOST").unwrap_or_else(|_| "localhost:2181".to_string()),
            zookeeper_root_path: env::var("FAAS_ZOOKEEPER_ROOT_PATH").unwrap_or_else(|_| "/faas".to_string()),

            metrics_addr: env::var("FAAS_METRICS_ADDR").unwrap_or_else(|_| "0.0.0.0:9090".to_string()),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for consistency and correctness.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.num_io_workers == 0 {
            return Err(ConfigError::InvalidValue {
                var: "FAAS_NUM_IO_WORKERS".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.message_conn_per_worker == 0 {
            return Err(ConfigError::InvalidValue {
                var: "FAAS_MESSAGE_CONN_PER_WORKER".into(),
                message: "must be greater than 0".into(),
            });
        }
        Ok(())
    }

    /// Creates a default Config for testing purposes.
    #[cfg(test)]
    pub fn for_testing() -> Self {
        Config {
            role: Role::Gateway,
            hostname: "localhost".into(),
            listen_addr: "127.0.0.1".into(),
            engine_conn_port: 0,
            storage_conn_port: 0,
            http_port: 0,
            grpc_port: 0,
            func_config_file: "func_config.json".into(),
            engine_addrs: Vec::new(),
            max_pending_func_calls: 1024,
            storage_backend: StorageBackend::Sled,
            storage_datadir: "/tmp/faas-storage-test".into(),
            rocksdb_max_background_jobs: 2,
            rocksdb_enable_compression: false,
            num_io_workers: 1,
            message_conn_per_worker: 1,
            socket_listen_backlog: 128,
            tcp_enable_nodelay: true,
            tcp_enable_keepalive: true,
            zookeeper_host: "localhost:2181".into(),
            zookeeper_root_path: "/faas-test".into(),
            metrics_addr: "127.0.0.1:0".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    fn clear_env_vars() {
        let vars = [
            "FAAS_ROLE",
            "FAAS_HOSTNAME",
            "FAAS_LISTEN_ADDR",
            "FAAS_ENGINE_CONN_PORT",
            "FAAS_STORAGE_CONN_PORT",
            "FAAS_HTTP_PORT",
            "FAAS_GRPC_PORT",
            "FAAS_FUNC_CONFIG_FILE",
            "FAAS_ENGINE_ADDRS",
            "FAAS_MAX_PENDING_FUNC_CALLS",
            "FAAS_STORAGE_BACKEND",
            "FAAS_STORAGE_DATADIR",
            "FAAS_ROCKSDB_MAX_BACKGROUND_JOBS",
            "FAAS_ROCKSDB_ENABLE_COMPRESSION",
            "FAAS_NUM_IO_WORKERS",
            "FAAS_MESSAGE_CONN_PER_WORKER",
            "FAAS_SOCKET_LISTEN_BACKLOG",
            "FAAS_TCP_ENABLE_NODELAY",
            "FAAS_TCP_ENABLE_KEEPALIVE",
            "FAAS_ZOOKEEPER_HOST",
            "FAAS_ZOOKEEPER_ROOT_PATH",
            "FAAS_METRICS_ADDR",
        ];
        for var in vars {
            env::remove_var(var);
        }
    }

    #[test]
    fn role_parses_known_values() {
        assert_eq!("gateway".parse::<Role>().unwrap(), Role::Gateway);
        assert_eq!("storage".parse::<Role>().unwrap(), Role::Storage);
        assert!("nonsense".parse::<Role>().is_err());
    }

    #[test]
    fn storage_backend_parses_known_values() {
        assert_eq!("rocksdb".parse::<StorageBackend>().unwrap(), StorageBackend::RocksDb);
        assert!("tkrzw".parse::<StorageBackend>().is_err());
    }

    #[test]
    fn defaults_with_no_env_set() {
        let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        clear_env_vars();

        let config = Config::from_env().unwrap();
        assert_eq!(config.role, Role::Gateway);
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.grpc_port, 8081);
        assert_eq!(config.storage_backend, StorageBackend::Sled);
        assert_eq!(config.num_io_workers, 2);

        clear_env_vars();
    }

    #[test]
    fn role_is_read_from_env() {
        let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        clear_env_vars();

        env::set_var("FAAS_ROLE", "storage");
        let config = Config::from_env().unwrap();
        assert_eq!(config.role, Role::Storage);

        clear_env_vars();
    }

    #[test]
    fn unknown_role_returns_error() {
        let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        clear_env_vars();

        env::set_var("FAAS_ROLE", "nonsense");
        let result = Config::from_env();
        clear_env_vars();

        assert!(matches!(result, Err(ConfigError::UnknownRole(ref r)) if r == "nonsense"));
    }

    #[test]
    fn zero_io_workers_returns_error() {
        let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        clear_env_vars();

        env::set_var("FAAS_NUM_IO_WORKERS", "0");
        let result = Config::from_env();
        clear_env_vars();

        assert!(matches!(result, Err(ConfigError::InvalidValue { ref var, .. }) if var == "FAAS_NUM_IO_WORKERS"));
    }

    #[test]
    fn unknown_storage_backend_returns_error() {
        let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        clear_env_vars();

        env::set_var("FAAS_STORAGE_BACKEND", "tkrzw");
        let result = Config::from_env();
        clear_env_vars();

        assert!(matches!(result, Err(ConfigError::InvalidValue { ref var, .. }) if var == "FAAS_STORAGE_BACKEND"));
    }

    #[test]
    fn for_testing_creates_valid_config() {
        let config = Config::for_testing();
        assert_eq!(config.role, Role::Gateway);
        assert_eq!(config.num_io_workers, 1);
    }
}
