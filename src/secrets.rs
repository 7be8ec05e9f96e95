//! Deployment-wide secrets: the encryption key, the backend password, and the
//! mnemonic resolution chain.
//!
//! Secrets are generated once per deployment lifetime and treated as immutable
//! inputs everywhere else; nothing in the reconciliation core regenerates or
//! mutates them. Interactive prompting lives behind [`PromptSource`] so the
//! core itself never touches stdin.

use std::env;
use std::io::{self, BufRead, Write};

use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use thiserror::Error;

/// Length of the symmetric encryption key in bytes.
pub const ENCRYPTION_KEY_LEN: usize = 32;

/// Length of the generated backend password in characters.
pub const BACKEND_PASSWORD_LEN: usize = 20;

/// Errors raised while resolving or decoding secrets.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum SecretError {
    /// Raised when a stored key is not valid hex.
    #[error("encryption key is not valid hex: {0}")]
    InvalidKey(String),
    /// Raised when a stored key decodes to the wrong number of bytes.
    #[error("encryption key must be {expected} bytes, got {actual}")]
    KeyLength {
        /// Required key length in bytes.
        expected: usize,
        /// Length of the rejected key in bytes.
        actual: usize,
    },
    /// Raised when every source in a resolution chain came up empty.
    #[error("no value available for {what}; provide it in qsdeploy.toml or via the environment")]
    Unresolved {
        /// Human-readable name of the missing secret.
        what: String,
    },
    /// Raised when interactive prompting fails.
    #[error("failed to prompt for {what}: {message}")]
    Prompt {
        /// Human-readable name of the prompted secret.
        what: String,
        /// Operating system error string.
        message: String,
    },
}

/// Symmetric key injected verbatim into both encryption blocks of the
/// rendered configuration.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EncryptionSecret([u8; ENCRYPTION_KEY_LEN]);

impl EncryptionSecret {
    /// Generates a fresh random key from the operating system RNG.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0_u8; ENCRYPTION_KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Decodes a key from its stable hex representation.
    ///
    /// # Errors
    ///
    /// Returns [`SecretError::InvalidKey`] when the text is not hex and
    /// [`SecretError::KeyLength`] when it decodes to the wrong length.
    pub fn from_hex(text: &str) -> Result<Self, SecretError> {
        let bytes = hex::decode(text.trim()).map_err(|err| SecretError::InvalidKey(err.to_string()))?;
        let actual = bytes.len();
        let key: [u8; ENCRYPTION_KEY_LEN] = bytes.try_into().map_err(|_| SecretError::KeyLength {
            expected: ENCRYPTION_KEY_LEN,
            actual,
        })?;
        Ok(Self(key))
    }

    /// Renders the key as lowercase hex, the encoding used in the
    /// configuration file.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

/// The immutable secret bundle for one deployment: encryption key plus the
/// password shared by every backend namespace.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeploymentSecrets {
    /// Symmetric encryption key.
    pub key: EncryptionSecret,
    /// Password shared by all backend namespaces.
    pub password: String,
}

impl DeploymentSecrets {
    /// Generates a fresh secret bundle. Called exactly once per deployment;
    /// later runs reload the persisted values instead.
    #[must_use]
    pub fn generate() -> Self {
        let password: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(BACKEND_PASSWORD_LEN)
            .map(char::from)
            .collect();
        Self {
            key: EncryptionSecret::generate(),
            password,
        }
    }

    /// Rebuilds the bundle from its persisted representation.
    ///
    /// # Errors
    ///
    /// Returns [`SecretError`] when the stored key is malformed.
    pub fn from_stored(key_hex: &str, password: &str) -> Result<Self, SecretError> {
        Ok(Self {
            key: EncryptionSecret::from_hex(key_hex)?,
            password: password.to_owned(),
        })
    }
}

/// Capability for asking the operator a question. Implemented over stdin by
/// the CLI; tests script answers instead.
pub trait PromptSource {
    /// Prompts with `label` and returns the entered line.
    ///
    /// # Errors
    ///
    /// Returns [`SecretError::Prompt`] when reading the answer fails.
    fn prompt(&mut self, label: &str) -> Result<String, SecretError>;
}

/// Prompt source backed by stderr and stdin.
#[derive(Clone, Copy, Debug, Default)]
pub struct StdinPrompt;

impl PromptSource for StdinPrompt {
    fn prompt(&mut self, label: &str) -> Result<String, SecretError> {
        let prompt_failed = |err: io::Error| SecretError::Prompt {
            what: label.to_owned(),
            message: err.to_string(),
        };
        let mut stderr = io::stderr();
        write!(stderr, "{label}: ").map_err(prompt_failed)?;
        stderr.flush().map_err(prompt_failed)?;
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line).map_err(prompt_failed)?;
        Ok(line.trim().to_owned())
    }
}

/// One place a secret value may come from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SecretSource {
    /// A value supplied directly, for example from the configuration file.
    Explicit(String),
    /// An environment variable read at resolution time.
    EnvVar(String),
    /// An interactive prompt, shown with the given label.
    Prompt {
        /// Label presented to the operator.
        label: String,
    },
}

impl SecretSource {
    /// Resolves this source to a non-empty value, or `None` when the source
    /// has nothing to offer.
    ///
    /// # Errors
    ///
    /// Returns [`SecretError::Prompt`] when interactive prompting fails.
    pub fn resolve(&self, prompter: &mut dyn PromptSource) -> Result<Option<String>, SecretError> {
        let value = match self {
            Self::Explicit(value) => Some(value.clone()),
            Self::EnvVar(name) => env::var(name).ok(),
            Self::Prompt { label } => Some(prompter.prompt(label)?),
        };
        Ok(value.map(|text| text.trim().to_owned()).filter(|text| !text.is_empty()))
    }

    /// Resolves the first source in `sources` that yields a value. Called
    /// once before reconciliation begins; the core never prompts mid-run.
    ///
    /// # Errors
    ///
    /// Returns [`SecretError::Unresolved`] when every source is empty, or any
    /// error from an individual source.
    pub fn resolve_first(
        sources: &[Self],
        what: &str,
        prompter: &mut dyn PromptSource,
    ) -> Result<String, SecretError> {
        for source in sources {
            if let Some(value) = source.resolve(prompter)? {
                return Ok(value);
            }
        }
        Err(SecretError::Unresolved {
            what: what.to_owned(),
        })
    }
}
