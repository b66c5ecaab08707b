//! Configuration management for xcryptfs

use crate::crypto::SALT_SIZE;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default attribute/entry TTL handed to the kernel (milliseconds)
pub const DEFAULT_ATTR_TTL_MS: u64 = 1000;

/// Upper bound for the attribute TTL (one hour)
pub const MAX_ATTR_TTL_MS: u64 = 60 * 60 * 1000;

/// Encryption configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptionConfig {
    /// Argon2 memory cost in KiB
    pub argon2_memory_kib: u32,

    /// Argon2 time cost (iterations)
    pub argon2_iterations: u32,

    /// Argon2 parallelism
    pub argon2_parallelism: u32,

    /// Salt for passphrase derivation (built-in salt when empty)
    #[serde(with = "hex_serde")]
    pub salt: Vec<u8>,
}

/// Mount configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MountConfig {
    /// Filesystem name shown in the mount table
    pub fsname: String,

    /// Allow other users to access the mount
    pub allow_other: bool,

    /// Allow root to access the mount
    pub allow_root: bool,

    /// Unmount automatically when the process exits
    pub auto_unmount: bool,

    /// Mount read-only
    pub read_only: bool,

    /// Attribute and entry cache timeout handed to the kernel
    pub attr_ttl_ms: u64,

    /// Extra `-o` style mount options
    pub options: Vec<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log file path
    pub file: Option<PathBuf>,
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Encryption configuration
    #[serde(default)]
    pub encryption: EncryptionConfig,

    /// Mount configuration
    #[serde(default)]
    pub mount: MountConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        EncryptionConfig {
            argon2_memory_kib: 65536, // 64 MiB
            argon2_iterations: 3,
            argon2_parallelism: 4,
            salt: Vec::new(),
        }
    }
}

impl Default for MountConfig {
    fn default() -> Self {
        MountConfig {
            fsname: "xcryptfs".to_string(),
            allow_other: false,
            allow_root: false,
            auto_unmount: false,
            read_only: false,
            attr_ttl_ms: DEFAULT_ATTR_TTL_MS,
            options: Vec::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl Config {
    /// Default location of the configuration file
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("xcryptfs")
            .join("config.json")
    }

    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Config(format!("Failed to read config file: {}", e))
        })?;

        let config: Config = serde_json::from_str(&content).map_err(|e| {
            Error::Config(format!("Failed to parse config file: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load the file if it exists, otherwise fall back to defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Config::default())
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("XCRYPTFS_LOG") {
            let level = level.trim().to_string();
            if !level.is_empty() {
                self.logging.level = level;
            }
        }

        if let Ok(file) = std::env::var("XCRYPTFS_LOG_FILE") {
            let file = file.trim();
            if !file.is_empty() {
                self.logging.file = Some(PathBuf::from(file));
            }
        }

        if let Ok(memory) = std::env::var("XCRYPTFS_ARGON2_MEMORY_KIB") {
            if let Ok(kib) = memory.trim().parse::<u32>() {
                self.encryption.argon2_memory_kib = kib;
            }
        }

        if let Ok(iterations) = std::env::var("XCRYPTFS_ARGON2_ITERATIONS") {
            if let Ok(n) = iterations.trim().parse::<u32>() {
                self.encryption.argon2_iterations = n;
            }
        }

        if let Ok(parallelism) = std::env::var("XCRYPTFS_ARGON2_PARALLELISM") {
            if let Ok(n) = parallelism.trim().parse::<u32>() {
                self.encryption.argon2_parallelism = n;
            }
        }
    }

    /// Save configuration to a file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self).map_err(|e| {
            Error::Config(format!("Failed to serialize config: {}", e))
        })?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| {
            Error::Config(format!("Failed to write config file: {}", e))
        })?;

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        argon2::Params::new(
            self.encryption.argon2_memory_kib,
            self.encryption.argon2_iterations,
            self.encryption.argon2_parallelism,
            None,
        )
        .map_err(|e| Error::InvalidConfig(format!("Invalid Argon2 parameters: {}", e)))?;

        if !self.encryption.salt.is_empty() && self.encryption.salt.len() < SALT_SIZE {
            return Err(Error::InvalidConfig(format!(
                "Salt must be at least {} bytes, got {}",
                SALT_SIZE,
                self.encryption.salt.len()
            )));
        }

        if self.mount.attr_ttl_ms > MAX_ATTR_TTL_MS {
            return Err(Error::InvalidConfig(format!(
                "Attribute TTL of {}ms exceeds {}ms",
                self.mount.attr_ttl_ms, MAX_ATTR_TTL_MS
            )));
        }

        if self.mount.allow_other && self.mount.allow_root {
            return Err(Error::InvalidConfig(
                "allow_other and allow_root are mutually exclusive".to_string(),
            ));
        }

        if self.mount.fsname.is_empty() {
            return Err(Error::InvalidConfig(
                "Filesystem name cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

/// Hex serialization for byte arrays
mod hex_serde {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        if s.is_empty() {
            return Ok(Vec::new());
        }
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}
