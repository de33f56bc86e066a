use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level daemon configuration (loaded from haven.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HavenConfig {
    pub storage: StorageConfig,
    pub server: ServerConfig,
    pub transfer: TransferConfig,
    pub crypto: CryptoConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the vault file and the metadata database
    pub data_dir: PathBuf,
    /// Directory for decrypted temp artifacts
    pub temp_dir: PathBuf,
    /// Directory receiving exported files and archives
    pub export_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTPS listen port
    pub port: u16,
    /// Device alias advertised in the ping handshake and certificate CN
    pub alias: String,
    /// Certificate organization name
    pub organization: String,
    /// Grace window for in-flight requests on stop, in seconds
    pub shutdown_grace_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// How long the recipient has to accept or reject an incoming transfer
    pub decision_timeout_secs: u64,
    /// Rolling session expiry, refreshed by each accepted upload
    pub refresh_timeout_mins: u64,
    /// Hard watchdog on registration sessions and transfer state
    pub session_cleanup_timeout_mins: u64,
}

/// Argon2id parameters for the password KDF
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// Memory cost in KiB (default: 65536 = 64 MiB)
    pub argon2_mem_cost_kib: u32,
    /// Time cost / iterations (default: 3)
    pub argon2_time_cost: u32,
    /// Parallelism (default: 4)
    pub argon2_parallelism: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("~/.local/share/haven"),
            temp_dir: PathBuf::from("~/.cache/haven/temp"),
            export_dir: PathBuf::from("~/Downloads/Haven"),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 53317,
            alias: "Haven Desktop".into(),
            organization: "Haven".into(),
            shutdown_grace_secs: 3,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            decision_timeout_secs: 300,
            refresh_timeout_mins: 45,
            session_cleanup_timeout_mins: 600,
        }
    }
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            argon2_mem_cost_kib: 65536,
            argon2_time_cost: 3,
            argon2_parallelism: 4,
        }
    }
}

impl StorageConfig {
    pub fn vault_path(&self) -> PathBuf {
        expand_tilde(&self.data_dir).join("haven.vault")
    }

    pub fn database_path(&self) -> PathBuf {
        expand_tilde(&self.data_dir).join("haven.db")
    }

    pub fn temp_path(&self) -> PathBuf {
        expand_tilde(&self.temp_dir)
    }

    pub fn export_path(&self) -> PathBuf {
        expand_tilde(&self.export_dir)
    }
}

/// Expand `~` in path to the user's home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_default();
        PathBuf::from(home).join(rest)
    } else {
        path.to_path_buf()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[storage]
data_dir = "/var/lib/haven"
export_dir = "/srv/exports"

[server]
port = 8443
alias = "Test Box"
shutdown_grace_secs = 1

[transfer]
decision_timeout_secs = 10
refresh_timeout_mins = 5

[crypto]
argon2_mem_cost_kib = 131072
argon2_time_cost = 4
argon2_parallelism = 8
"#;
        let config: HavenConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(config.storage.data_dir, PathBuf::from("/var/lib/haven"));
        assert_eq!(config.storage.export_dir, PathBuf::from("/srv/exports"));
        assert_eq!(config.server.port, 8443);
        assert_eq!(config.server.alias, "Test Box");
        assert_eq!(config.server.shutdown_grace_secs, 1);
        assert_eq!(config.transfer.decision_timeout_secs, 10);
        assert_eq!(config.transfer.refresh_timeout_mins, 5);
        assert_eq!(config.crypto.argon2_mem_cost_kib, 131072);
    }

    #[test]
    fn test_parse_defaults() {
        let config: HavenConfig = toml::from_str("").unwrap();

        assert_eq!(config.server.port, 53317);
        assert_eq!(config.server.alias, "Haven Desktop");
        assert_eq!(config.transfer.decision_timeout_secs, 300);
        assert_eq!(config.transfer.refresh_timeout_mins, 45);
        assert_eq!(config.transfer.session_cleanup_timeout_mins, 600);
        assert_eq!(config.crypto.argon2_mem_cost_kib, 65536);
        assert_eq!(config.crypto.argon2_time_cost, 3);
    }

    #[test]
    fn test_parse_partial_config() {
        let toml_str = r#"
[server]
port = 9000
"#;
        let config: HavenConfig = toml::from_str(toml_str).unwrap();

        // Overridden
        assert_eq!(config.server.port, 9000);
        // Defaults
        assert_eq!(config.server.alias, "Haven Desktop");
        assert_eq!(config.storage.data_dir, PathBuf::from("~/.local/share/haven"));
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = HavenConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: HavenConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.server.port, parsed.server.port);
        assert_eq!(config.storage.data_dir, parsed.storage.data_dir);
        assert_eq!(
            config.transfer.decision_timeout_secs,
            parsed.transfer.decision_timeout_secs
        );
    }

    #[test]
    fn test_derived_paths() {
        let storage = StorageConfig {
            data_dir: PathBuf::from("/data/haven"),
            ..Default::default()
        };
        assert_eq!(storage.vault_path(), PathBuf::from("/data/haven/haven.vault"));
        assert_eq!(storage.database_path(), PathBuf::from("/data/haven/haven.db"));
    }

    #[test]
    fn test_expand_tilde() {
        let expanded = expand_tilde(Path::new("~/.local/share/haven"));
        assert!(!expanded.to_string_lossy().starts_with('~'));

        let absolute = expand_tilde(Path::new("/opt/haven"));
        assert_eq!(absolute, PathBuf::from("/opt/haven"));
    }
}
