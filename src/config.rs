//! Deployment configuration loading via `ortho-config`.
//!
//! These are the per-deployment variables an operator provides once: the grid
//! credentials, node selections, and connection modes. Values merge defaults,
//! `qsdeploy.toml`, and `QSDEPLOY_*` environment variables.

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::backend::ConnectionMode;
use crate::secrets::SecretSource;

/// Environment variable consulted for the mnemonic when the configuration
/// file does not provide one.
pub const MNEMONIC_ENV_VAR: &str = "MNEMONIC";

/// Deployment variables derived from environment variables, configuration
/// files, and defaults.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "QSDEPLOY")]
pub struct DeployConfig {
    /// Grid account mnemonic. Optional here because it can also arrive via
    /// the `MNEMONIC` environment variable or an interactive prompt.
    pub mnemonic: Option<String>,
    /// Grid network to deploy against (`main` or `test`).
    #[ortho_config(default = "main".to_owned())]
    pub network: String,
    /// Path to the SSH private key used for the deployment VM. The matching
    /// `.pub` file must sit beside it.
    #[ortho_config(default = "~/.ssh/id_ed25519".to_owned())]
    pub ssh_key_path: String,
    /// Node that hosts the deployment VM.
    #[ortho_config(default = 0)]
    pub vm_node: u32,
    /// Nodes that host metadata namespaces.
    #[ortho_config(default = Vec::new())]
    pub meta_nodes: Vec<u32>,
    /// Nodes that host data namespaces.
    #[ortho_config(default = Vec::new())]
    pub data_nodes: Vec<u32>,
    /// Size of each data namespace in gigabytes.
    #[ortho_config(default = 1)]
    pub data_size_gb: u32,
    /// Size of each metadata namespace in gigabytes.
    #[ortho_config(default = 1)]
    pub meta_size_gb: u32,
    /// Network used to reach the zdb backends (`ipv6` or `mycelium`).
    #[ortho_config(default = "ipv6".to_owned())]
    pub zdb_connection: String,
    /// Network used to reach the deployment VM over SSH (`ipv6` or
    /// `mycelium`).
    #[ortho_config(default = "ipv6".to_owned())]
    pub ssh_connection: String,
    /// Path of the operator-provided base template.
    #[ortho_config(default = "zstor_config.base.toml".to_owned())]
    pub base_template: String,
    /// Path of the canonical rendered configuration file.
    #[ortho_config(default = "zstor_config.toml".to_owned())]
    pub config_path: String,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
    section: &'static str,
}

impl FieldMetadata {
    const fn new(
        description: &'static str,
        env_var: &'static str,
        toml_key: &'static str,
        section: &'static str,
    ) -> Self {
        Self {
            description,
            env_var,
            toml_key,
            section,
        }
    }
}

impl DeployConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to [{}] in qsdeploy.toml",
                metadata.description, metadata.env_var, metadata.toml_key, metadata.section
            )));
        }
        Ok(())
    }

    /// Loads configuration using the `ortho-config` derive. Values merge
    /// defaults, configuration files, environment variables, and CLI flags in
    /// that order of precedence.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the loader fails to merge sources.
    pub fn load_from_sources() -> Result<Self, ConfigError> {
        Self::load().map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("qsdeploy")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on required fields. Error messages include
    /// guidance on how to provide missing values via environment variables or
    /// configuration files.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a required field is empty or malformed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.network,
            &FieldMetadata::new("grid network", "QSDEPLOY_NETWORK", "network", "deploy"),
        )?;
        if self.network != "main" && self.network != "test" {
            return Err(ConfigError::InvalidField {
                field: String::from("network"),
                message: format!("expected \"main\" or \"test\", got {:?}", self.network),
            });
        }
        Self::require_field(
            &self.ssh_key_path,
            &FieldMetadata::new(
                "SSH key path",
                "QSDEPLOY_SSH_KEY_PATH",
                "ssh_key_path",
                "deploy",
            ),
        )?;
        if self.vm_node == 0 {
            return Err(ConfigError::MissingField(String::from(
                "missing VM node: set QSDEPLOY_VM_NODE or add vm_node to [deploy] in qsdeploy.toml",
            )));
        }
        if self.meta_nodes.is_empty() {
            return Err(ConfigError::MissingField(String::from(
                "missing metadata nodes: set QSDEPLOY_META_NODES or add meta_nodes to [deploy] in qsdeploy.toml",
            )));
        }
        if self.data_nodes.is_empty() {
            return Err(ConfigError::MissingField(String::from(
                "missing data nodes: set QSDEPLOY_DATA_NODES or add data_nodes to [deploy] in qsdeploy.toml",
            )));
        }
        if self.data_size_gb == 0 {
            return Err(ConfigError::InvalidField {
                field: String::from("data_size_gb"),
                message: String::from("data namespace size must be at least 1 GB"),
            });
        }
        Self::require_field(
            &self.base_template,
            &FieldMetadata::new(
                "base template path",
                "QSDEPLOY_BASE_TEMPLATE",
                "base_template",
                "deploy",
            ),
        )?;
        Self::require_field(
            &self.config_path,
            &FieldMetadata::new(
                "canonical config path",
                "QSDEPLOY_CONFIG_PATH_OUT",
                "config_path",
                "deploy",
            ),
        )?;
        self.zdb_connection_mode()?;
        self.ssh_connection_mode()?;
        Ok(())
    }

    /// Connection mode used for backend addresses.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidField`] when the configured value is not
    /// a known mode.
    pub fn zdb_connection_mode(&self) -> Result<ConnectionMode, ConfigError> {
        self.zdb_connection
            .parse()
            .map_err(|err: crate::backend::UnknownConnectionMode| ConfigError::InvalidField {
                field: String::from("zdb_connection"),
                message: err.to_string(),
            })
    }

    /// Connection mode used for the deployment VM.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidField`] when the configured value is not
    /// a known mode.
    pub fn ssh_connection_mode(&self) -> Result<ConnectionMode, ConfigError> {
        self.ssh_connection
            .parse()
            .map_err(|err: crate::backend::UnknownConnectionMode| ConfigError::InvalidField {
                field: String::from("ssh_connection"),
                message: err.to_string(),
            })
    }

    /// Resolution chain for the mnemonic: configured value, then the bare
    /// `MNEMONIC` environment variable, then an interactive prompt.
    #[must_use]
    pub fn mnemonic_sources(&self) -> Vec<SecretSource> {
        let mut sources = Vec::with_capacity(3);
        if let Some(ref mnemonic) = self.mnemonic {
            sources.push(SecretSource::Explicit(mnemonic.clone()));
        }
        sources.push(SecretSource::EnvVar(MNEMONIC_ENV_VAR.to_owned()));
        sources.push(SecretSource::Prompt {
            label: String::from("Enter your mnemonic"),
        });
        sources
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a configuration field holds a value outside its domain.
    #[error("invalid {field}: {message}")]
    InvalidField {
        /// Field that failed validation.
        field: String,
        /// Human-readable description of the problem.
        message: String,
    },
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
