//! Command-line interface definitions for the `qsdeploy` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use camino::Utf8PathBuf;
use clap::Parser;

/// Top-level CLI for the `qsdeploy` binary.
#[derive(Debug, Parser)]
#[command(
    name = "qsdeploy",
    about = "Reconcile provisioned storage backends into a zstor config and sync it to the deployment VM",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Render, commit, and push the configuration for the current deployment.
    #[command(
        name = "reconcile",
        about = "Render the zstor config, commit a version, and push it when changed"
    )]
    Reconcile(ReconcileCommand),
    /// Render the configuration to stdout without committing or pushing.
    #[command(name = "render", about = "Print the rendered zstor config without committing")]
    Render(RenderCommand),
    /// Generate and persist the deployment secrets.
    #[command(name = "init", about = "Generate deployment secrets and store them in qsdeploy.toml")]
    Init(InitCommand),
}

/// Arguments for the `qsdeploy reconcile` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct ReconcileCommand {
    /// Path to the deployment state document produced by the provisioning
    /// engine.
    #[arg(long, value_name = "PATH", default_value = "deployment.json")]
    pub(crate) state: Utf8PathBuf,
    /// Run the on-node activation script after a push and wait for the zstor
    /// control socket.
    #[arg(long)]
    pub(crate) activate: bool,
}

/// Arguments for the `qsdeploy render` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct RenderCommand {
    /// Path to the deployment state document produced by the provisioning
    /// engine.
    #[arg(long, value_name = "PATH", default_value = "deployment.json")]
    pub(crate) state: Utf8PathBuf,
}

/// Arguments for the `qsdeploy init` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct InitCommand {
    /// Overwrite secrets already present in the configuration file.
    #[arg(long)]
    pub(crate) force: bool,
}
