//! Persistent configuration file updates for qsdeploy.
//!
//! The deployment secrets are generated exactly once and must survive across
//! runs, so they are written into the same `qsdeploy.toml` that carries the
//! operator's deployment variables. This module owns all writes to that file.

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use ortho_config::ConfigDiscovery;
use thiserror::Error;

use ortho_config::toml;

use crate::secrets::{DeploymentSecrets, SecretError};

const APP_NAME: &str = "qsdeploy";
const CONFIG_ENV_VAR: &str = "QSDEPLOY_CONFIG_PATH";
const CONFIG_FILE_NAME: &str = "qsdeploy.toml";
const DOTFILE_NAME: &str = ".qsdeploy.toml";
const PROJECT_FILE_NAME: &str = "qsdeploy.toml";
const DEPLOY_SECTION: &str = "deploy";
const MNEMONIC_KEY: &str = "mnemonic";
const SECRETS_SECTION: &str = "secrets";
const KEY_KEY: &str = "encryption_key";
const PASSWORD_KEY: &str = "backend_password";

/// Errors raised while updating the configuration file.
#[derive(Debug, Error)]
pub enum ConfigStoreError {
    /// Raised when no configuration candidates are available.
    #[error("no configuration file candidates were discovered")]
    NoCandidates,
    /// Raised when file system operations fail.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when parsing existing TOML content fails.
    #[error("failed to parse {path}: {message}")]
    Parse {
        /// Path that could not be parsed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when existing TOML has an unexpected structure.
    #[error("invalid configuration in {path}: {message}")]
    InvalidStructure {
        /// Path that had invalid content.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when secrets are already configured and overwrite is disabled.
    #[error("deployment secrets already configured; rerun with --force to replace them")]
    SecretsAlreadyConfigured,
    /// Raised when stored secrets fail to decode.
    #[error("stored secrets are invalid: {0}")]
    InvalidSecrets(#[from] SecretError),
}

/// Abstraction over configuration writers for dependency injection.
pub trait ConfigWriter {
    /// Returns the currently stored secrets, if present.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigStoreError`] when the configuration file cannot be
    /// accessed or parsed, or when stored secrets are malformed.
    fn current_secrets(&self) -> Result<Option<DeploymentSecrets>, ConfigStoreError>;

    /// Writes the secrets to the configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigStoreError::SecretsAlreadyConfigured`] when secrets
    /// exist and `force` is false, or other variants when file access fails.
    fn write_secrets(
        &self,
        secrets: &DeploymentSecrets,
        force: bool,
    ) -> Result<Utf8PathBuf, ConfigStoreError>;

    /// Writes the mnemonic to the configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigStoreError`] when reading or updating configuration
    /// content fails.
    fn write_mnemonic(&self, mnemonic: &str) -> Result<Utf8PathBuf, ConfigStoreError>;
}

/// Updates `qsdeploy.toml` using `OrthoConfig`'s discovery search order.
#[derive(Clone, Debug)]
pub struct ConfigStore {
    discovery: ConfigDiscovery,
}

impl ConfigStore {
    /// Builds a config store using the standard qsdeploy discovery settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            discovery: ConfigDiscovery::builder(APP_NAME)
                .env_var(CONFIG_ENV_VAR)
                .config_file_name(CONFIG_FILE_NAME)
                .dotfile_name(DOTFILE_NAME)
                .project_file_name(PROJECT_FILE_NAME)
                .build(),
        }
    }

    /// Builds a config store using an explicit discovery configuration.
    #[must_use]
    pub const fn with_discovery(discovery: ConfigDiscovery) -> Self {
        Self { discovery }
    }

    fn resolve_target(&self) -> Result<ConfigTarget, ConfigStoreError> {
        let candidates = self.discovery.utf8_candidates();
        if candidates.is_empty() {
            return Err(ConfigStoreError::NoCandidates);
        }

        for candidate in &candidates {
            if path_exists(candidate)? {
                return Ok(ConfigTarget {
                    path: candidate.clone(),
                    exists: true,
                });
            }
        }

        let fallback = candidates
            .last()
            .cloned()
            .ok_or(ConfigStoreError::NoCandidates)?;
        Ok(ConfigTarget {
            path: fallback,
            exists: false,
        })
    }

    fn load_value(&self) -> Result<(ConfigTarget, toml::Value), ConfigStoreError> {
        let target = self.resolve_target()?;
        let contents = if target.exists {
            read_config(&target.path)?
        } else {
            String::new()
        };
        let value = parse_toml(&target.path, &contents)?;
        Ok((target, value))
    }

    fn update_string_key(
        &self,
        section: &str,
        key: &str,
        new_value: &str,
    ) -> Result<Utf8PathBuf, ConfigStoreError> {
        let (target, mut value) = self.load_value()?;
        write_string_key(&target.path, &mut value, section, key, new_value)?;
        write_config(&target.path, &value)?;
        Ok(target.path)
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigWriter for ConfigStore {
    fn current_secrets(&self) -> Result<Option<DeploymentSecrets>, ConfigStoreError> {
        let target = self.resolve_target()?;
        if !target.exists {
            return Ok(None);
        }

        let contents = read_config(&target.path)?;
        let value = parse_toml(&target.path, &contents)?;
        let key_hex = read_string_key(&target.path, &value, SECRETS_SECTION, KEY_KEY)?;
        let password = read_string_key(&target.path, &value, SECRETS_SECTION, PASSWORD_KEY)?;
        match (key_hex, password) {
            (Some(key_hex), Some(password)) => {
                let secrets = DeploymentSecrets::from_stored(&key_hex, &password)?;
                Ok(Some(secrets))
            }
            (None, None) => Ok(None),
            _ => Err(ConfigStoreError::InvalidStructure {
                path: target.path,
                message: format!(
                    "[{SECRETS_SECTION}] must define both {KEY_KEY} and {PASSWORD_KEY} or neither"
                ),
            }),
        }
    }

    fn write_secrets(
        &self,
        secrets: &DeploymentSecrets,
        force: bool,
    ) -> Result<Utf8PathBuf, ConfigStoreError> {
        if self.current_secrets()?.is_some() && !force {
            return Err(ConfigStoreError::SecretsAlreadyConfigured);
        }

        let (target, mut value) = self.load_value()?;
        write_string_key(
            &target.path,
            &mut value,
            SECRETS_SECTION,
            KEY_KEY,
            &secrets.key.to_hex(),
        )?;
        write_string_key(
            &target.path,
            &mut value,
            SECRETS_SECTION,
            PASSWORD_KEY,
            &secrets.password,
        )?;
        write_config(&target.path, &value)?;
        Ok(target.path)
    }

    fn write_mnemonic(&self, mnemonic: &str) -> Result<Utf8PathBuf, ConfigStoreError> {
        self.update_string_key(DEPLOY_SECTION, MNEMONIC_KEY, mnemonic)
    }
}

#[derive(Clone, Debug)]
struct ConfigTarget {
    path: Utf8PathBuf,
    exists: bool,
}

fn split_config_path(path: &Utf8Path) -> Result<(&Utf8Path, &str), ConfigStoreError> {
    let parent = path.parent().unwrap_or_else(|| Utf8Path::new("."));
    let file_name = path
        .file_name()
        .ok_or_else(|| ConfigStoreError::InvalidStructure {
            path: path.to_path_buf(),
            message: String::from("configuration file path is missing a filename"),
        })?;
    Ok((parent, file_name))
}

fn path_exists(path: &Utf8Path) -> Result<bool, ConfigStoreError> {
    let (parent, file_name) = split_config_path(path)?;
    match Dir::open_ambient_dir(parent, ambient_authority()) {
        Ok(dir) => dir
            .try_exists(file_name)
            .map_err(|err| ConfigStoreError::Io {
                path: path.to_path_buf(),
                message: err.to_string(),
            }),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(ConfigStoreError::Io {
            path: parent.to_path_buf(),
            message: err.to_string(),
        }),
    }
}

fn read_config(path: &Utf8Path) -> Result<String, ConfigStoreError> {
    let (parent, file_name) = split_config_path(path)?;
    let dir =
        Dir::open_ambient_dir(parent, ambient_authority()).map_err(|err| ConfigStoreError::Io {
            path: parent.to_path_buf(),
            message: err.to_string(),
        })?;

    dir.read_to_string(file_name)
        .map_err(|err| ConfigStoreError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        })
}

fn parse_toml(path: &Utf8Path, contents: &str) -> Result<toml::Value, ConfigStoreError> {
    if contents.trim().is_empty() {
        return Ok(toml::Value::Table(toml::value::Table::new()));
    }

    toml::from_str(contents).map_err(|err| ConfigStoreError::Parse {
        path: path.to_path_buf(),
        message: err.to_string(),
    })
}

fn section_table<'a>(
    path: &Utf8Path,
    value: &'a toml::Value,
    section: &str,
) -> Result<Option<&'a toml::value::Table>, ConfigStoreError> {
    let table = value
        .as_table()
        .ok_or_else(|| ConfigStoreError::InvalidStructure {
            path: path.to_path_buf(),
            message: String::from("configuration root is not a table"),
        })?;

    let Some(raw) = table.get(section) else {
        return Ok(None);
    };

    raw.as_table()
        .map(Some)
        .ok_or_else(|| ConfigStoreError::InvalidStructure {
            path: path.to_path_buf(),
            message: format!("[{section}] must be a table"),
        })
}

fn read_string_key(
    path: &Utf8Path,
    value: &toml::Value,
    section: &str,
    key: &str,
) -> Result<Option<String>, ConfigStoreError> {
    let Some(table) = section_table(path, value, section)? else {
        return Ok(None);
    };

    table.get(key).map_or(Ok(None), |raw| {
        raw.as_str()
            .map(|text| Some(text.trim().to_owned()))
            .ok_or_else(|| ConfigStoreError::InvalidStructure {
                path: path.to_path_buf(),
                message: format!("{section}.{key} must be a string"),
            })
    })
}

fn write_string_key(
    path: &Utf8Path,
    value: &mut toml::Value,
    section: &str,
    key: &str,
    new_value: &str,
) -> Result<(), ConfigStoreError> {
    let table = value
        .as_table_mut()
        .ok_or_else(|| ConfigStoreError::InvalidStructure {
            path: path.to_path_buf(),
            message: String::from("configuration root is not a table"),
        })?;

    let entry = table
        .entry(section.to_owned())
        .or_insert_with(|| toml::Value::Table(toml::value::Table::new()));

    let entry_table = entry
        .as_table_mut()
        .ok_or_else(|| ConfigStoreError::InvalidStructure {
            path: path.to_path_buf(),
            message: format!("[{section}] must be a table"),
        })?;

    entry_table.insert(
        key.to_owned(),
        toml::Value::String(new_value.trim().to_owned()),
    );
    Ok(())
}

fn write_config(path: &Utf8Path, value: &toml::Value) -> Result<(), ConfigStoreError> {
    let (parent, file_name) = split_config_path(path)?;
    Dir::create_ambient_dir_all(parent, ambient_authority()).map_err(|err| {
        ConfigStoreError::Io {
            path: parent.to_path_buf(),
            message: err.to_string(),
        }
    })?;

    let dir =
        Dir::open_ambient_dir(parent, ambient_authority()).map_err(|err| ConfigStoreError::Io {
            path: parent.to_path_buf(),
            message: err.to_string(),
        })?;

    let rendered = toml::to_string_pretty(value).map_err(|err| ConfigStoreError::Parse {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;

    dir.write(file_name, rendered)
        .map_err(|err| ConfigStoreError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        })
}

/// Loads persisted secrets, generating and storing a fresh bundle on first
/// use. Never regenerates an existing bundle.
///
/// # Errors
///
/// Returns [`ConfigStoreError`] when the configuration file cannot be read or
/// written, or when stored secrets are malformed.
pub fn load_or_generate_secrets<W: ConfigWriter>(
    writer: &W,
) -> Result<DeploymentSecrets, ConfigStoreError> {
    if let Some(existing) = writer.current_secrets()? {
        return Ok(existing);
    }
    let fresh = DeploymentSecrets::generate();
    writer.write_secrets(&fresh, false)?;
    Ok(fresh)
}
