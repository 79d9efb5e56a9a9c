//! Configuration schema and loader for abd nodes.
//!
//! A node runs as exactly one of two roles: a replica (gRPC service over a
//! local storage engine) or a coordinator (HTTP client surface fanning out
//! to replicas). The role is mandatory; a file without one does not parse.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Which process a node runs as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Replica,
    Coordinator,
}

/// Top-level node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub role: Role,

    /// gRPC address for a replica, HTTP address for a coordinator.
    pub listen: SocketAddr,

    /// Log at `info` instead of `warn` when `RUST_LOG` is unset.
    #[serde(default)]
    pub verbose: bool,

    /// Optional Prometheus metrics HTTP port.
    #[serde(default)]
    pub metrics_port: Option<u16>,

    #[serde(default)]
    pub replica: ReplicaConfig,

    #[serde(default)]
    pub coordinator: CoordinatorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicaConfig {
    /// Directory for the WAL.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Fsync policy: "always", "batch", "none".
    #[serde(default = "default_fsync")]
    pub fsync: String,

    /// How often the WAL is synced in batch mode.
    #[serde(default = "default_fsync_interval_ms")]
    pub fsync_interval_ms: u64,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            fsync: default_fsync(),
            fsync_interval_ms: default_fsync_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Identity used to mint writer ids. Must differ between coordinators;
    /// a random one is generated when omitted.
    #[serde(default)]
    pub identity: Option<String>,

    /// Replica gRPC addresses (`host:port`).
    #[serde(default)]
    pub replicas: Vec<String>,

    /// Deadline for each individual replica RPC.
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,

    /// Deadline for each quorum wait (election, propagation, read).
    #[serde(default = "default_quorum_timeout_ms")]
    pub quorum_timeout_ms: u64,
}

// --- Defaults ---

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}
fn default_fsync() -> String {
    "batch".to_string()
}
fn default_fsync_interval_ms() -> u64 {
    1000
}
fn default_rpc_timeout_ms() -> u64 {
    2000
}
fn default_quorum_timeout_ms() -> u64 {
    5000
}

// --- Loading ---

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl NodeConfig {
    /// Validate that configuration values are consistent with the role.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.role {
            Role::Replica => {
                if self.replica.fsync_interval_ms == 0 {
                    return Err(ConfigError::Invalid(
                        "replica.fsync_interval_ms must be > 0".into(),
                    ));
                }
            }
            Role::Coordinator => {
                let c = &self.coordinator;
                if c.replicas.is_empty() {
                    return Err(ConfigError::Invalid(
                        "coordinator.replicas must list at least one replica".into(),
                    ));
                }
                if let Some(empty) = c.replicas.iter().find(|r| r.trim().is_empty()) {
                    return Err(ConfigError::Invalid(format!(
                        "coordinator.replicas contains an empty address: {:?}",
                        empty
                    )));
                }
                let mut seen = std::collections::HashSet::new();
                if let Some(dup) = c.replicas.iter().find(|r| !seen.insert(r.trim())) {
                    return Err(ConfigError::Invalid(format!(
                        "coordinator.replicas lists {:?} more than once",
                        dup
                    )));
                }
                if c.rpc_timeout_ms == 0 {
                    return Err(ConfigError::Invalid(
                        "coordinator.rpc_timeout_ms must be > 0".into(),
                    ));
                }
                if c.quorum_timeout_ms == 0 {
                    return Err(ConfigError::Invalid(
                        "coordinator.quorum_timeout_ms must be > 0".into(),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Load a `NodeConfig` from a YAML file path.
pub fn load_from_file(path: &std::path::Path) -> Result<NodeConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    load_from_str(&contents)
}

/// Load a `NodeConfig` from a YAML string.
pub fn load_from_str(yaml: &str) -> Result<NodeConfig, ConfigError> {
    let config: NodeConfig = serde_yaml::from_str(yaml)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_replica() {
        let yaml = r#"
role: replica
listen: "127.0.0.1:4001"
"#;
        let config = load_from_str(yaml).unwrap();
        assert_eq!(config.role, Role::Replica);
        assert_eq!(config.listen.port(), 4001);
        assert!(!config.verbose);
        assert_eq!(config.replica.data_dir, PathBuf::from("data"));
        assert_eq!(config.replica.fsync, "batch");
    }

    #[test]
    fn test_parse_full_coordinator() {
        let yaml = r#"
role: coordinator
listen: "0.0.0.0:3000"
verbose: true
metrics_port: 9100
coordinator:
  identity: coord-a
  replicas:
    - "127.0.0.1:4001"
    - "127.0.0.1:4002"
    - "127.0.0.1:4003"
  rpc_timeout_ms: 750
  quorum_timeout_ms: 1500
"#;
        let config = load_from_str(yaml).unwrap();
        assert_eq!(config.role, Role::Coordinator);
        assert!(config.verbose);
        assert_eq!(config.metrics_port, Some(9100));
        assert_eq!(config.coordinator.identity.as_deref(), Some("coord-a"));
        assert_eq!(config.coordinator.replicas.len(), 3);
        assert_eq!(config.coordinator.rpc_timeout_ms, 750);
        assert_eq!(config.coordinator.quorum_timeout_ms, 1500);
    }

    #[test]
    fn test_coordinator_defaults() {
        let yaml = r#"
role: coordinator
listen: "127.0.0.1:3000"
coordinator:
  replicas: ["127.0.0.1:4001"]
"#;
        let config = load_from_str(yaml).unwrap();
        assert!(config.coordinator.identity.is_none());
        assert_eq!(config.coordinator.rpc_timeout_ms, 2000);
        assert_eq!(config.coordinator.quorum_timeout_ms, 5000);
    }

    #[test]
    fn test_roundtrip_yaml() {
        let yaml = r#"
role: replica
listen: "127.0.0.1:9000"
replica:
  data_dir: /tmp/abd-test
  fsync: always
"#;
        let config = load_from_str(yaml).unwrap();
        let serialized = serde_yaml::to_string(&config).unwrap();
        let config2 = load_from_str(&serialized).unwrap();
        assert_eq!(config.listen, config2.listen);
        assert_eq!(config.role, config2.role);
        assert_eq!(config2.replica.fsync, "always");
    }

    #[test]
    fn test_rejects_missing_role() {
        let yaml = r#"
listen: "127.0.0.1:3000"
"#;
        let err = load_from_str(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::Yaml(_)), "got {}", err);
        assert!(err.to_string().contains("role"), "error should mention role: {}", err);
    }

    #[test]
    fn test_rejects_unknown_role() {
        let yaml = r#"
role: observer
listen: "127.0.0.1:3000"
"#;
        assert!(matches!(load_from_str(yaml), Err(ConfigError::Yaml(_))));
    }

    #[test]
    fn test_rejects_coordinator_without_replicas() {
        let yaml = r#"
role: coordinator
listen: "127.0.0.1:3000"
"#;
        let err = load_from_str(yaml).unwrap_err().to_string();
        assert!(err.contains("coordinator.replicas"), "got {}", err);
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let yaml = r#"
role: coordinator
listen: "127.0.0.1:3000"
coordinator:
  replicas: ["127.0.0.1:4001"]
  quorum_timeout_ms: 0
"#;
        let err = load_from_str(yaml).unwrap_err().to_string();
        assert!(err.contains("quorum_timeout_ms"), "got {}", err);
    }

    #[test]
    fn test_rejects_duplicate_replica() {
        let yaml = r#"
role: coordinator
listen: "127.0.0.1:3000"
coordinator:
  replicas: ["127.0.0.1:4001", "127.0.0.1:4001", "127.0.0.1:4002"]
"#;
        let err = load_from_str(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(err.to_string().contains("127.0.0.1:4001"), "got {}", err);
    }

    #[test]
    fn test_replica_ignores_coordinator_section() {
        let yaml = r#"
role: replica
listen: "127.0.0.1:4001"
coordinator:
  replicas: []
"#;
        assert!(load_from_str(yaml).is_ok());
    }
}
