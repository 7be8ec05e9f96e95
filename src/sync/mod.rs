//! Idempotent transfer of the canonical configuration file to the deployment
//! VM, plus remote command execution over SSH.
//!
//! The gate half of this module decides whether a push is needed at all: the
//! canonical file travels only when its content changed since the last commit
//! or when the push target itself changed (for example because the VM was
//! rebuilt with a new address). The transport half shells out to `scp` and
//! `ssh` through a [`CommandRunner`] seam so tests can script outcomes.

use std::ffi::OsString;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};

mod config;
mod types;
mod util;

pub use config::{
    DEFAULT_ACTIVATION_SCRIPT, DEFAULT_REMOTE_CONFIG_PATH, DEFAULT_ZSTOR_SOCKET, SyncConfig,
    SyncConfigLoadError, SyncError,
};
pub use types::{
    CommandOutput, CommandRunner, ProcessCommandRunner, PushOutcome, PushTarget,
    RemoteCommandOutput,
};
pub use util::expand_tilde;

/// Suffix of the sidecar file recording the last pushed target.
const TRIGGER_SUFFIX: &str = "target";

/// Executes scp pushes and remote SSH commands against the deployment VM.
#[derive(Clone, Debug)]
pub struct Syncer<R: CommandRunner> {
    config: SyncConfig,
    runner: R,
}

impl Syncer<ProcessCommandRunner> {
    /// Convenience constructor that wires the real process runner.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidConfig`] when validation fails.
    pub fn with_process_runner(config: SyncConfig) -> Result<Self, SyncError> {
        Self::new(config, ProcessCommandRunner)
    }
}

impl<R: CommandRunner> Syncer<R> {
    /// Creates a new syncer using the provided runner and configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidConfig`] when configuration validation
    /// fails.
    pub fn new(config: SyncConfig, runner: R) -> Result<Self, SyncError> {
        config.validate()?;
        Ok(Self { config, runner })
    }

    /// Returns a reference to the underlying configuration.
    #[must_use]
    pub const fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Copies `source` to the configured remote path on `target` via scp.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::MissingSource`] when the source file is absent,
    /// or [`SyncError::CommandFailure`] if `scp` returns a non-zero exit
    /// code.
    pub fn push_file(&self, source: &Utf8Path, target: &PushTarget) -> Result<(), SyncError> {
        let args = self.build_scp_args(source, target)?;
        let output = self.runner.run(&self.config.scp_bin, &args)?;
        if output.is_success() {
            return Ok(());
        }

        Err(command_failure(&self.config.scp_bin, &output))
    }

    /// Executes `remote_command` over SSH and returns the remote exit code.
    ///
    /// # Errors
    ///
    /// Propagates any failure to spawn or execute the SSH command from the
    /// configured [`CommandRunner`].
    ///
    /// # Security
    ///
    /// `remote_command` is passed verbatim to the SSH client. Ensure any
    /// caller-provided arguments are validated or quoted upstream.
    pub fn run_remote(
        &self,
        target: &PushTarget,
        remote_command: &str,
    ) -> Result<RemoteCommandOutput, SyncError> {
        let args = self.build_ssh_args(target, remote_command);
        let output = self.runner.run(&self.config.ssh_bin, &args)?;

        Ok(RemoteCommandOutput {
            exit_code: output.code,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    fn build_scp_args(
        &self,
        source: &Utf8Path,
        target: &PushTarget,
    ) -> Result<Vec<OsString>, SyncError> {
        if !source.is_file() {
            return Err(SyncError::MissingSource {
                path: source.to_path_buf(),
            });
        }

        let mut args = vec![OsString::from("-P"), OsString::from(target.port.to_string())];
        args.extend(self.common_ssh_options());
        args.push(OsString::from(source));
        args.push(OsString::from(format!(
            "{}@{}:{}",
            self.config.ssh_user,
            target.scp_host(),
            self.config.remote_config_path
        )));
        Ok(args)
    }

    fn build_ssh_args(&self, target: &PushTarget, remote_command: &str) -> Vec<OsString> {
        let mut args = vec![OsString::from("-p"), OsString::from(target.port.to_string())];
        args.extend(self.common_ssh_options());
        args.push(OsString::from(format!(
            "{}@{}",
            self.config.ssh_user, target.host
        )));
        args.push(OsString::from(remote_command));
        args
    }

    fn common_ssh_options(&self) -> Vec<OsString> {
        let mut args = Vec::new();

        if let Some(ref identity_file) = self.config.ssh_identity_file {
            let expanded = expand_tilde(identity_file);
            args.push(OsString::from("-i"));
            args.push(OsString::from(expanded));
        }

        if self.config.ssh_batch_mode {
            args.push(OsString::from("-o"));
            args.push(OsString::from("BatchMode=yes"));
        }

        args.push(OsString::from("-o"));
        args.push(OsString::from(format!(
            "StrictHostKeyChecking={}",
            self.config.host_key_policy
        )));

        args.push(OsString::from("-o"));
        args.push(OsString::from(format!(
            "ConnectionAttempts={}",
            self.config.connection_attempts
        )));

        args
    }
}

/// Gates pushes of the canonical configuration file on content and target
/// changes.
///
/// The last successfully pushed host is recorded in a sidecar file beside the
/// canonical file. A push happens when the latest commit changed the
/// canonical content, or when the recorded host differs from the current one;
/// otherwise the gate skips the transfer entirely.
#[derive(Clone, Debug)]
pub struct SyncGate<R: CommandRunner> {
    syncer: Syncer<R>,
    trigger_path: Utf8PathBuf,
}

impl<R: CommandRunner> SyncGate<R> {
    /// Creates a gate for the given canonical file path.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::TriggerState`] when the canonical path has no
    /// file name to derive the sidecar name from.
    pub fn new(syncer: Syncer<R>, canonical_path: &Utf8Path) -> Result<Self, SyncError> {
        let file_name =
            canonical_path
                .file_name()
                .ok_or_else(|| SyncError::TriggerState {
                    path: canonical_path.to_path_buf(),
                    message: String::from("canonical path is missing a file name"),
                })?;
        let parent = canonical_path
            .parent()
            .filter(|p| !p.as_str().is_empty())
            .unwrap_or_else(|| Utf8Path::new("."));
        Ok(Self {
            syncer,
            trigger_path: parent.join(format!("{file_name}.{TRIGGER_SUFFIX}")),
        })
    }

    /// Returns the underlying syncer, for follow-up remote commands.
    #[must_use]
    pub const fn syncer(&self) -> &Syncer<R> {
        &self.syncer
    }

    /// Pushes `canonical` to `target` when the content changed or the target
    /// differs from the last recorded push, and records the target on
    /// success.
    ///
    /// Safe to call repeatedly: unchanged content going to an unchanged
    /// target is skipped, and unchanged content going to a fresh target is
    /// re-pushed byte-for-byte.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] when the transfer fails or the trigger state
    /// cannot be read or written. Transport failures are not retried here.
    pub fn push_if_needed(
        &self,
        canonical: &Utf8Path,
        target: &PushTarget,
        content_changed: bool,
    ) -> Result<PushOutcome, SyncError> {
        let recorded = self.recorded_host()?;
        let target_changed = recorded.as_deref() != Some(target.host.as_str());
        if !content_changed && !target_changed {
            return Ok(PushOutcome::Skipped);
        }

        self.syncer.push_file(canonical, target)?;
        self.record_host(&target.host)?;
        Ok(PushOutcome::Pushed)
    }

    fn trigger_dir(&self) -> Result<(Dir, &str), SyncError> {
        let parent = self
            .trigger_path
            .parent()
            .filter(|p| !p.as_str().is_empty())
            .unwrap_or_else(|| Utf8Path::new("."));
        let file_name = self
            .trigger_path
            .file_name()
            .ok_or_else(|| SyncError::TriggerState {
                path: self.trigger_path.clone(),
                message: String::from("trigger path is missing a file name"),
            })?;
        let dir = Dir::open_ambient_dir(parent, ambient_authority()).map_err(|err| {
            SyncError::TriggerState {
                path: self.trigger_path.clone(),
                message: err.to_string(),
            }
        })?;
        Ok((dir, file_name))
    }

    fn recorded_host(&self) -> Result<Option<String>, SyncError> {
        let (dir, file_name) = self.trigger_dir()?;
        match dir.read_to_string(file_name) {
            Ok(contents) => Ok(Some(contents.trim().to_owned())),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(SyncError::TriggerState {
                path: self.trigger_path.clone(),
                message: err.to_string(),
            }),
        }
    }

    fn record_host(&self, host: &str) -> Result<(), SyncError> {
        let (dir, file_name) = self.trigger_dir()?;
        dir.write(file_name, format!("{host}\n"))
            .map_err(|err| SyncError::TriggerState {
                path: self.trigger_path.clone(),
                message: err.to_string(),
            })
    }
}

fn command_failure(program: &str, output: &CommandOutput) -> SyncError {
    let status_text = output
        .code
        .map_or_else(|| String::from("unknown"), |code| code.to_string());
    SyncError::CommandFailure {
        program: program.to_owned(),
        status: output.code,
        status_text,
        stderr: output.stderr.clone(),
    }
}

#[cfg(test)]
mod tests;
