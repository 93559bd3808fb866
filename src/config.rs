//! Crate configuration and master-secret sourcing.

use std::fs;
use std::path::PathBuf;

use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::error::{PkiError, Result};

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub vault: VaultConfig,
    #[serde(default)]
    pub root_dn: RootDnDefaults,
}

/// Key-vault configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct VaultConfig {
    /// Directory for on-disk key containers (when using the filesystem
    /// blob store).
    #[serde(default = "default_container_dir")]
    pub container_directory: PathBuf,
    /// Environment variable the master secret is read from.
    #[serde(default = "default_master_secret_env")]
    pub master_secret_env: String,
    /// Permit deriving a master secret from host identity when the
    /// environment variable is unset. Off by default; the derived secret is
    /// predictable and only acceptable for local development.
    #[serde(default)]
    pub allow_host_fallback: bool,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            container_directory: default_container_dir(),
            master_secret_env: default_master_secret_env(),
            allow_host_fallback: false,
        }
    }
}

fn default_container_dir() -> PathBuf {
    PathBuf::from("keystores")
}

fn default_master_secret_env() -> String {
    "PKI_MASTER_KEY".to_string()
}

/// Distinguished-name defaults applied to self-issued root CAs, which carry
/// no per-request subject fields beyond the common name.
#[derive(Debug, Deserialize, Clone)]
pub struct RootDnDefaults {
    #[serde(default = "default_root_organization")]
    pub organization: String,
    #[serde(default = "default_root_country")]
    pub country: String,
}

impl Default for RootDnDefaults {
    fn default() -> Self {
        Self {
            organization: default_root_organization(),
            country: default_root_country(),
        }
    }
}

fn default_root_organization() -> String {
    "PKI Organization".to_string()
}

fn default_root_country() -> String {
    "RS".to_string()
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let config_str = fs::read_to_string(path)
            .map_err(|e| PkiError::Storage(format!("failed to read config file {path}: {e}")))?;

        toml::from_str(&config_str)
            .map_err(|e| PkiError::Validation(format!("failed to parse config file: {e}")))
    }

    /// Load configuration with the default path (config.toml).
    pub fn load() -> Result<Self> {
        Self::from_file("config.toml")
    }
}

/// Process-wide secret all per-user vault key material derives from.
pub struct MasterSecret(Secret<String>);

impl MasterSecret {
    /// Resolve the master secret per the vault configuration.
    ///
    /// The secret is read from the configured environment variable. When it
    /// is unset or blank, resolution fails unless `allow_host_fallback` is
    /// enabled, in which case a deterministic secret is derived from host
    /// identity and a warning is logged. The fallback is predictable by
    /// anyone who can enumerate the host's account and OS names; it exists
    /// for development setups only.
    pub fn resolve(config: &VaultConfig) -> Result<Self> {
        match std::env::var(&config.master_secret_env) {
            Ok(value) if !value.trim().is_empty() => {
                tracing::info!(
                    env = %config.master_secret_env,
                    "using master secret from environment"
                );
                Ok(Self(Secret::new(value)))
            }
            _ if config.allow_host_fallback => {
                tracing::warn!(
                    env = %config.master_secret_env,
                    "master secret not set; deriving a fallback from host identity. \
                     Set the environment variable for any non-development use"
                );
                Ok(Self::host_fallback())
            }
            _ => Err(PkiError::Crypto(format!(
                "master secret environment variable {} is not set and host fallback is disabled",
                config.master_secret_env
            ))),
        }
    }

    /// Construct from an explicit value. Intended for tests and embedders
    /// that manage secret delivery themselves.
    pub fn from_value(value: String) -> Self {
        Self(Secret::new(value))
    }

    fn host_fallback() -> Self {
        let user = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_default();
        let host = std::env::var("HOSTNAME").unwrap_or_default();
        let seed = format!("{user}{host}{}certforge-host-fallback", std::env::consts::OS);
        let digest = Sha256::digest(seed.as_bytes());
        let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        Self(Secret::new(hex))
    }

    pub(crate) fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for MasterSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("MasterSecret").field(&"<redacted>").finish()
    }
}
