//! Provisioned deployment state consumed from the provisioning engine.
//!
//! The engine that actually allocates the VM and the zdb namespaces is an
//! external collaborator; this crate consumes its outputs as a JSON document
//! listing, per resource, the candidate addresses and the namespace facts
//! needed to build backend descriptors. Role classification happens here,
//! from the zdb's explicit mode tag rather than a substring of the namespace:
//! metadata namespaces are provisioned in `user` mode and data namespaces in
//! `seq` mode.

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use serde::Deserialize;
use thiserror::Error;

use crate::backend::{BackendDescriptor, BackendRole, ConnectionMode, sort_descriptors};

/// Errors raised while loading or interpreting deployment state.
#[derive(Debug, Error)]
pub enum DeploymentError {
    /// Raised when the state document cannot be read.
    #[error("failed to read deployment state {path}: {message}")]
    Read {
        /// Path of the state document.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when the state document is not valid JSON.
    #[error("failed to parse deployment state: {0}")]
    Parse(String),
    /// Raised when a zdb exposes no candidate address for the configured
    /// connection mode.
    #[error("zdb {namespace} has no address for connection mode {mode:?}")]
    NoBackendAddress {
        /// Namespace of the zdb without an address.
        namespace: String,
        /// Connection mode that failed to select an address.
        mode: ConnectionMode,
    },
    /// Raised when the VM exposes no candidate address for the configured
    /// connection mode.
    #[error("vm {name} has no address for connection mode {mode:?}")]
    NoVmAddress {
        /// Name of the VM.
        name: String,
        /// Connection mode that failed to select an address.
        mode: ConnectionMode,
    },
}

/// Provisioning mode of a zdb namespace.
///
/// The provisioning layer creates metadata namespaces in key-value (`user`)
/// mode and data namespaces in append-only (`seq`) mode, so the mode doubles
/// as an explicit role tag.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ZdbMode {
    /// Key-value mode; holds metadata.
    User,
    /// Sequential append-only mode; holds data shards.
    Seq,
}

impl ZdbMode {
    /// Configuration section backends of this mode belong to.
    #[must_use]
    pub const fn role(self) -> BackendRole {
        match self {
            Self::User => BackendRole::Meta,
            Self::Seq => BackendRole::Data,
        }
    }
}

/// The deployment VM as reported by the provisioning engine.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct VmRecord {
    /// Name of the VM workload.
    pub name: String,
    /// Candidate addresses, IPv6 first and mycelium last.
    #[serde(default)]
    pub ips: Vec<String>,
}

/// One provisioned zdb namespace.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct ZdbRecord {
    /// Namespace identifier with its trailing node ordinal.
    pub namespace: String,
    /// Provisioning mode, which determines the backend role.
    pub mode: ZdbMode,
    /// Candidate addresses, IPv6 first and mycelium last.
    #[serde(default)]
    pub ips: Vec<String>,
}

/// Full provisioning output for one deployment.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct DeploymentState {
    /// The deployment VM that receives the configuration.
    pub vm: VmRecord,
    /// All provisioned zdb namespaces, both roles.
    #[serde(default)]
    pub zdbs: Vec<ZdbRecord>,
}

impl DeploymentState {
    /// Parses a state document from JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`DeploymentError::Parse`] when the text is not a valid state
    /// document.
    pub fn from_json(text: &str) -> Result<Self, DeploymentError> {
        serde_json::from_str(text).map_err(|err| DeploymentError::Parse(err.to_string()))
    }

    /// Loads a state document from disk.
    ///
    /// # Errors
    ///
    /// Returns [`DeploymentError::Read`] when the file cannot be read and
    /// [`DeploymentError::Parse`] when its contents are malformed.
    pub fn load(path: &Utf8Path) -> Result<Self, DeploymentError> {
        let read_failed = |message: String| DeploymentError::Read {
            path: path.to_path_buf(),
            message,
        };
        let parent = path.parent().unwrap_or_else(|| Utf8Path::new("."));
        let file_name = path
            .file_name()
            .ok_or_else(|| read_failed(String::from("path is missing a file name")))?;
        let dir = Dir::open_ambient_dir(parent, ambient_authority())
            .map_err(|err: io::Error| read_failed(err.to_string()))?;
        let text = dir
            .read_to_string(file_name)
            .map_err(|err| read_failed(err.to_string()))?;
        Self::from_json(&text)
    }

    /// Builds the sorted meta and data descriptor lists for rendering.
    ///
    /// Each zdb's host is selected from its candidate list by `mode`; the
    /// deployment-wide `password` is attached to every descriptor. Both lists
    /// come back sorted by namespace ordinal, ready for the renderer.
    ///
    /// # Errors
    ///
    /// Returns [`DeploymentError::NoBackendAddress`] when a zdb has no
    /// candidate address for the configured mode.
    pub fn backends(
        &self,
        mode: ConnectionMode,
        password: &str,
    ) -> Result<(Vec<BackendDescriptor>, Vec<BackendDescriptor>), DeploymentError> {
        let mut meta = Vec::new();
        let mut data = Vec::new();
        for zdb in &self.zdbs {
            let host = mode
                .select(&zdb.ips)
                .ok_or_else(|| DeploymentError::NoBackendAddress {
                    namespace: zdb.namespace.clone(),
                    mode,
                })?;
            let descriptor = BackendDescriptor {
                role: zdb.mode.role(),
                host: host.to_owned(),
                namespace: zdb.namespace.clone(),
                password: password.to_owned(),
            };
            match zdb.mode.role() {
                BackendRole::Meta => meta.push(descriptor),
                BackendRole::Data => data.push(descriptor),
            }
        }
        sort_descriptors(&mut meta);
        sort_descriptors(&mut data);
        Ok((meta, data))
    }

    /// Selects the VM address used as the push and SSH target.
    ///
    /// # Errors
    ///
    /// Returns [`DeploymentError::NoVmAddress`] when the VM has no candidate
    /// address for the configured mode.
    pub fn vm_host(&self, mode: ConnectionMode) -> Result<&str, DeploymentError> {
        mode.select(&self.vm.ips)
            .ok_or_else(|| DeploymentError::NoVmAddress {
                name: self.vm.name.clone(),
                mode,
            })
    }
}
