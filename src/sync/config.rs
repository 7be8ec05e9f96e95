//! Synchronisation configuration structures and validation.
//!
//! This module defines [`SyncConfig`] for SSH and scp settings, along with
//! associated error types. Configuration is loaded via `ortho-config` which
//! merges defaults, configuration files, and environment variables.

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

/// Remote path the canonical configuration is pushed to. The on-node startup
/// hook reads this exact path.
pub const DEFAULT_REMOTE_CONFIG_PATH: &str = "/etc/zstor-default.toml";

/// Default path of the activation script staged on the deployment VM.
pub const DEFAULT_ACTIVATION_SCRIPT: &str = "/root/scripts/activate_qsfs.sh";

/// Default path of the zstor control socket probed after activation.
pub const DEFAULT_ZSTOR_SOCKET: &str = "/tmp/zstor.sock";

/// Synchronisation and SSH settings loaded via `ortho-config`.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "QSDEPLOY_SYNC",
    discovery(
        app_name = "qsdeploy",
        env_var = "QSDEPLOY_CONFIG_PATH",
        config_file_name = "qsdeploy.toml",
        dotfile_name = ".qsdeploy.toml",
        project_file_name = "qsdeploy.toml"
    )
)]
pub struct SyncConfig {
    /// Path to the `scp` executable.
    #[ortho_config(default = "scp".to_owned())]
    pub scp_bin: String,
    /// Path to the `ssh` executable.
    #[ortho_config(default = "ssh".to_owned())]
    pub ssh_bin: String,
    /// Remote user to connect as.
    #[ortho_config(default = "root".to_owned())]
    pub ssh_user: String,
    /// Remote path that receives the canonical configuration file.
    #[ortho_config(default = DEFAULT_REMOTE_CONFIG_PATH.to_owned())]
    pub remote_config_path: String,
    /// Host key policy passed to `StrictHostKeyChecking`. Deployment VMs are
    /// fresh hosts, so `accept-new` records them on first contact.
    #[ortho_config(default = "accept-new".to_owned())]
    pub host_key_policy: String,
    /// Value passed to `ConnectionAttempts`; freshly booted VMs can take a
    /// few seconds to accept connections.
    #[ortho_config(default = 5)]
    pub connection_attempts: u32,
    /// Whether to force batch mode for SSH to avoid password prompts.
    #[ortho_config(default = true)]
    pub ssh_batch_mode: bool,
    /// Path to the SSH private key file for remote authentication. Supports
    /// tilde expansion (`~/.ssh/id_ed25519`). Optional; when not provided,
    /// SSH falls back to default key locations. Validation rejects empty or
    /// whitespace-only values.
    pub ssh_identity_file: Option<String>,
    /// Path of the activation script staged on the deployment VM.
    #[ortho_config(default = DEFAULT_ACTIVATION_SCRIPT.to_owned())]
    pub activation_script: String,
    /// Path of the zstor control socket probed to confirm activation.
    #[ortho_config(default = DEFAULT_ZSTOR_SOCKET.to_owned())]
    pub zstor_socket: String,
}

/// Errors raised when loading the sync configuration from layered sources.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum SyncConfigLoadError {
    /// Indicates that parsing or merging configuration layers failed.
    #[error("sync configuration parsing failed: {0}")]
    Parse(String),
}

impl SyncConfig {
    /// Ensures configuration values are present after trimming whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidConfig`] when any required field is empty.
    pub fn validate(&self) -> Result<(), SyncError> {
        Self::require_value(&self.scp_bin, "scp_bin")?;
        Self::require_value(&self.ssh_bin, "ssh_bin")?;
        Self::require_value(&self.ssh_user, "ssh_user")?;
        Self::require_value(&self.remote_config_path, "remote_config_path")?;
        Self::require_value(&self.host_key_policy, "host_key_policy")?;
        Self::require_optional_value(self.ssh_identity_file.as_deref(), "ssh_identity_file")?;
        Self::require_value(&self.activation_script, "activation_script")?;
        Self::require_value(&self.zstor_socket, "zstor_socket")?;
        Ok(())
    }

    fn require_optional_value(value: Option<&str>, field: &str) -> Result<(), SyncError> {
        match value {
            None => Ok(()), // Not configured; SSH uses defaults
            Some(v) if !v.trim().is_empty() => Ok(()),
            Some(_) => Err(SyncError::InvalidConfig {
                field: field.to_owned(),
            }),
        }
    }

    /// Loads configuration using defaults, configuration files, and
    /// environment variables, without parsing CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`SyncConfigLoadError::Parse`] when merging sources fails.
    pub fn load_without_cli_args() -> Result<Self, SyncConfigLoadError> {
        Self::load_from_iter([std::ffi::OsString::from("qsdeploy")])
            .map_err(|err| SyncConfigLoadError::Parse(err.to_string()))
    }

    /// Loads configuration using the default argument iterator.
    ///
    /// # Errors
    ///
    /// Returns [`SyncConfigLoadError::Parse`] when merging sources fails.
    pub fn load_from_sources() -> Result<Self, SyncConfigLoadError> {
        Self::load().map_err(|err| SyncConfigLoadError::Parse(err.to_string()))
    }

    fn require_value(value: &str, field: &str) -> Result<(), SyncError> {
        Self::require_optional_value(Some(value), field)
    }
}

/// Errors surfaced while pushing configuration or running remote commands.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SyncError {
    /// Raised when configuration is missing required values. The error message
    /// includes guidance on how to provide the value via environment variable
    /// or configuration file.
    #[error("missing {field}: set QSDEPLOY_SYNC_{env_suffix} or add {field} to [sync] in qsdeploy.toml", env_suffix = field.to_uppercase())]
    InvalidConfig {
        /// Configuration field that failed validation.
        field: String,
    },
    /// Raised when the local file to push does not exist.
    #[error("push source file missing: {path}")]
    MissingSource {
        /// Path that was expected to be pushed.
        path: Utf8PathBuf,
    },
    /// Raised when a command cannot be spawned.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Command that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when `scp` or `ssh` completes with a non-zero exit code.
    #[error("{program} exited with status {status_text}: {stderr}")]
    CommandFailure {
        /// Command name used for the attempted operation.
        program: String,
        /// Exit status as reported by the OS.
        status: Option<i32>,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from the process.
        stderr: String,
    },
    /// Raised when the push trigger state cannot be read or written.
    #[error("failed to access push state {path}: {message}")]
    TriggerState {
        /// Path of the trigger state file.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
}
