//! End-to-end reconciliation: gather descriptors, render, commit, sync.
//!
//! One reconciliation cycle runs to completion without interleaving from
//! another cycle over the same canonical file. The version store's suffix
//! scan and the canonical compare-and-replace are single-writer operations,
//! so cycles are serialised through a process-wide lock registry keyed by the
//! canonical file's logical name. The only suspend points are the remote
//! transfer, the activation command, and the readiness poll.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, OnceLock};
use std::time::Duration;

use camino::Utf8PathBuf;
use shell_escape::unix::escape;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep};

use crate::backend::ConnectionMode;
use crate::deployment::{DeploymentError, DeploymentState};
use crate::render::render;
use crate::secrets::DeploymentSecrets;
use crate::store::{StoreError, VersionStore, read_base_template};
use crate::sync::{CommandRunner, PushOutcome, PushTarget, SyncError, SyncGate};

const READY_POLL_INTERVAL: Duration = Duration::from_secs(2);
const READY_WAIT_TIMEOUT: Duration = Duration::from_secs(600);

/// Errors surfaced while reconciling a deployment.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Raised when the base template is missing or the store fails.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Raised when the deployment state is unusable.
    #[error(transparent)]
    State(#[from] DeploymentError),
    /// Raised when the push or a remote command fails.
    #[error(transparent)]
    Sync(#[from] SyncError),
    /// Raised when the activation script exits with a failure.
    #[error("activation script failed: {message}")]
    Activation {
        /// Human-readable description of the failure.
        message: String,
    },
    /// Raised when the zstor socket does not appear before the timeout.
    #[error("storage services did not become ready: {message}")]
    ReadyTimeout {
        /// Human-readable description of the failure.
        message: String,
    },
}

/// Inputs for one reconciliation cycle.
///
/// Everything here is immutable for the duration of the cycle: the secrets
/// were generated once per deployment and the state is a snapshot of what the
/// provisioning engine allocated.
#[derive(Clone, Debug)]
pub struct ReconcileInputs {
    /// Path of the operator-provided base template.
    pub base_template: Utf8PathBuf,
    /// Snapshot of the provisioned resources.
    pub state: DeploymentState,
    /// Deployment-wide secrets.
    pub secrets: DeploymentSecrets,
    /// Network used to reach the zdb backends.
    pub zdb_connection: ConnectionMode,
    /// Network used to reach the deployment VM.
    pub ssh_connection: ConnectionMode,
    /// Whether to run the activation script after a push.
    pub activate: bool,
}

/// Outcome of a reconciliation cycle.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReconcileOutcome {
    /// Path of the canonical configuration file.
    pub config_path: Utf8PathBuf,
    /// Whether this cycle produced new canonical content.
    pub is_new: bool,
    /// Whether the canonical file was pushed to the VM.
    pub push: PushOutcome,
    /// Whether the activation script ran this cycle.
    pub activated: bool,
}

/// Drives render → commit → sync cycles for one canonical file.
#[derive(Debug)]
pub struct Reconciler<R: CommandRunner> {
    store: VersionStore,
    gate: SyncGate<R>,
    ready_poll_interval: Duration,
    ready_wait_timeout: Duration,
}

impl<R: CommandRunner> Reconciler<R> {
    /// Creates a new reconciler.
    #[must_use]
    pub const fn new(store: VersionStore, gate: SyncGate<R>) -> Self {
        Self {
            store,
            gate,
            ready_poll_interval: READY_POLL_INTERVAL,
            ready_wait_timeout: READY_WAIT_TIMEOUT,
        }
    }

    /// Overrides the readiness polling interval.
    ///
    /// This is primarily used by tests to keep timeout scenarios fast.
    #[must_use]
    pub const fn with_ready_poll_interval(mut self, interval: Duration) -> Self {
        self.ready_poll_interval = interval;
        self
    }

    /// Overrides the readiness wait timeout.
    ///
    /// This is primarily used by tests to keep timeout scenarios fast.
    #[must_use]
    pub const fn with_ready_wait_timeout(mut self, timeout: Duration) -> Self {
        self.ready_wait_timeout = timeout;
        self
    }

    /// Runs one full reconciliation cycle and returns what happened.
    ///
    /// The base template is read before any candidate file is created, so a
    /// missing template aborts with no on-disk effect. Cycles over the same
    /// canonical file are serialised; a second caller waits for the first to
    /// finish.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError`] when the template is missing, the state is
    /// unusable, the transfer fails, or activation does not complete.
    pub async fn reconcile(
        &self,
        inputs: &ReconcileInputs,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let lock = cycle_lock(&self.store.logical_name());
        let _guard = lock.lock().await;

        let base = read_base_template(&inputs.base_template)?;
        let (meta, data) = inputs
            .state
            .backends(inputs.zdb_connection, &inputs.secrets.password)?;
        let rendered = render(&base, &meta, &data, &inputs.secrets.key);

        let commit = self.store.commit(&rendered)?;

        let host = inputs.state.vm_host(inputs.ssh_connection)?;
        let target = PushTarget::new(host);
        let push = self
            .gate
            .push_if_needed(&commit.path, &target, commit.is_new)?;

        let mut activated = false;
        if inputs.activate && push == PushOutcome::Pushed {
            self.activate(&target).await?;
            activated = true;
        }

        Ok(ReconcileOutcome {
            config_path: commit.path,
            is_new: commit.is_new,
            push,
            activated,
        })
    }

    /// Runs the staged activation script and waits for the zstor control
    /// socket to appear.
    async fn activate(&self, target: &PushTarget) -> Result<(), ReconcileError> {
        let config = self.gate.syncer().config();
        let script = escape(config.activation_script.as_str().into());
        let command = format!("bash {script} 2>&1 | tee /var/log/activate_qsfs.log");
        let output = self.gate.syncer().run_remote(target, &command)?;
        if output.exit_code != Some(0) {
            return Err(ReconcileError::Activation {
                message: activation_failure_message(&output.exit_code, &output.stderr),
            });
        }

        self.wait_for_ready(target).await
    }

    /// Polls for the zstor control socket until it exists or the timeout
    /// elapses.
    async fn wait_for_ready(&self, target: &PushTarget) -> Result<(), ReconcileError> {
        let socket = self.gate.syncer().config().zstor_socket.clone();
        let probe = format!("test -S {}", escape(socket.as_str().into()));
        let deadline = Instant::now() + self.ready_wait_timeout;

        while Instant::now() <= deadline {
            let output = self.gate.syncer().run_remote(target, &probe)?;
            if output.exit_code == Some(0) {
                return Ok(());
            }
            sleep(self.ready_poll_interval).await;
        }

        Err(ReconcileError::ReadyTimeout {
            message: format!(
                "{socket} did not appear within {} seconds",
                self.ready_wait_timeout.as_secs()
            ),
        })
    }
}

fn activation_failure_message(exit_code: &Option<i32>, stderr: &str) -> String {
    let trimmed = stderr.trim();
    match exit_code {
        Some(code) if trimmed.is_empty() => format!("exited with status {code}"),
        Some(code) => format!("exited with status {code}: {trimmed}"),
        None if trimmed.is_empty() => String::from("terminated without an exit status"),
        None => format!("terminated without an exit status: {trimmed}"),
    }
}

/// Returns the cycle lock for a canonical file's logical name, creating it on
/// first use.
fn cycle_lock(name: &str) -> Arc<Mutex<()>> {
    static LOCKS: OnceLock<StdMutex<HashMap<String, Arc<Mutex<()>>>>> = OnceLock::new();
    let registry = LOCKS.get_or_init(|| StdMutex::new(HashMap::new()));
    let mut map = registry
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    map.entry(name.to_owned()).or_default().clone()
}
