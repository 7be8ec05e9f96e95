//! Core library for the qsdeploy storage deployment tool.
//!
//! The crate reconciles freshly-provisioned storage backend facts into a
//! deterministic, versioned zstor configuration file and synchronises it to
//! the deployment VM exactly when content or target changes (render → commit
//! → sync). The provisioning engine, the SSH transport, and the on-node
//! daemons are external collaborators.

pub mod backend;
pub mod config;
pub mod config_store;
pub mod deployment;
pub mod reconcile;
pub mod render;
pub mod secrets;
pub mod store;
pub mod sync;
pub mod test_support;

pub use backend::{BACKEND_PORT, BackendDescriptor, BackendRole, ConnectionMode, sort_descriptors};
pub use config::{ConfigError, DeployConfig};
pub use config_store::{ConfigStore, ConfigStoreError, ConfigWriter, load_or_generate_secrets};
pub use deployment::{DeploymentError, DeploymentState, VmRecord, ZdbMode, ZdbRecord};
pub use reconcile::{ReconcileError, ReconcileInputs, ReconcileOutcome, Reconciler};
pub use render::render;
pub use secrets::{
    DeploymentSecrets, EncryptionSecret, PromptSource, SecretError, SecretSource, StdinPrompt,
};
pub use store::{Commit, StoreError, VersionStore, read_base_template};
pub use sync::{
    CommandOutput, CommandRunner, DEFAULT_REMOTE_CONFIG_PATH, ProcessCommandRunner, PushOutcome,
    PushTarget, RemoteCommandOutput, SyncConfig, SyncConfigLoadError, SyncError, SyncGate, Syncer,
};
