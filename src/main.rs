//! Binary entry point for the qsdeploy CLI.

use std::io::{self, Write};
use std::process;

use camino::Utf8PathBuf;
use clap::Parser;
use thiserror::Error;

use qsdeploy::{
    ConfigStore, ConfigWriter, DeployConfig, DeploymentSecrets, DeploymentState,
    ProcessCommandRunner, PushOutcome, ReconcileError, ReconcileInputs, ReconcileOutcome,
    Reconciler, SecretSource, StdinPrompt, SyncConfig, SyncGate, Syncer, VersionStore,
    load_or_generate_secrets, read_base_template, render,
};

mod cli;

use cli::{Cli, InitCommand, ReconcileCommand, RenderCommand};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("secrets error: {0}")]
    Secrets(String),
    #[error("deployment state error: {0}")]
    State(String),
    #[error("sync error: {0}")]
    Sync(String),
    #[error("reconciliation failed: {0}")]
    Reconcile(#[from] ReconcileError),
    #[error("{0}")]
    Store(String),
    #[error("failed to write output: {0}")]
    Output(String),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    match cli {
        Cli::Reconcile(command) => reconcile_command(command).await,
        Cli::Render(command) => render_command(&command),
        Cli::Init(command) => init_command(&command),
    }
}

async fn reconcile_command(args: ReconcileCommand) -> Result<(), CliError> {
    let deploy_config = load_deploy_config()?;
    let secrets = load_secrets()?;
    let state = DeploymentState::load(&args.state).map_err(|err| CliError::State(err.to_string()))?;

    let mut sync_config =
        SyncConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    if sync_config.ssh_identity_file.is_none() {
        sync_config.ssh_identity_file = Some(deploy_config.ssh_key_path.clone());
    }
    let syncer = Syncer::new(sync_config, ProcessCommandRunner)
        .map_err(|err| CliError::Sync(err.to_string()))?;

    let canonical = Utf8PathBuf::from(&deploy_config.config_path);
    let store = VersionStore::new(&canonical).map_err(|err| CliError::Store(err.to_string()))?;
    let gate = SyncGate::new(syncer, &canonical).map_err(|err| CliError::Sync(err.to_string()))?;

    let inputs = ReconcileInputs {
        base_template: Utf8PathBuf::from(&deploy_config.base_template),
        state,
        secrets,
        zdb_connection: deploy_config
            .zdb_connection_mode()
            .map_err(|err| CliError::Config(err.to_string()))?,
        ssh_connection: deploy_config
            .ssh_connection_mode()
            .map_err(|err| CliError::Config(err.to_string()))?,
        activate: args.activate,
    };

    let reconciler = Reconciler::new(store, gate);
    let outcome = reconciler.reconcile(&inputs).await?;
    report_outcome(&outcome)
}

fn render_command(args: &RenderCommand) -> Result<(), CliError> {
    let deploy_config = load_deploy_config()?;
    let secrets = load_secrets()?;
    let state = DeploymentState::load(&args.state).map_err(|err| CliError::State(err.to_string()))?;

    let base = read_base_template(&Utf8PathBuf::from(&deploy_config.base_template))
        .map_err(|err| CliError::Store(err.to_string()))?;
    let zdb_connection = deploy_config
        .zdb_connection_mode()
        .map_err(|err| CliError::Config(err.to_string()))?;
    let (meta, data) = state
        .backends(zdb_connection, &secrets.password)
        .map_err(|err| CliError::State(err.to_string()))?;

    let rendered = render(&base, &meta, &data, &secrets.key);
    write!(io::stdout(), "{rendered}").map_err(|err| CliError::Output(err.to_string()))
}

fn init_command(args: &InitCommand) -> Result<(), CliError> {
    let deploy_config =
        DeployConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    let config_store = ConfigStore::new();

    let mut prompter = StdinPrompt;
    let mnemonic = SecretSource::resolve_first(
        &deploy_config.mnemonic_sources(),
        "mnemonic",
        &mut prompter,
    )
    .map_err(|err| CliError::Secrets(err.to_string()))?;
    if deploy_config.mnemonic.as_deref() != Some(mnemonic.as_str()) {
        config_store
            .write_mnemonic(&mnemonic)
            .map_err(|err| CliError::Secrets(err.to_string()))?;
    }

    let secrets = DeploymentSecrets::generate();
    let path = config_store
        .write_secrets(&secrets, args.force)
        .map_err(|err| CliError::Secrets(err.to_string()))?;

    writeln!(io::stdout(), "deployment secrets written to {path}")
        .map_err(|err| CliError::Output(err.to_string()))
}

fn load_deploy_config() -> Result<DeployConfig, CliError> {
    let deploy_config =
        DeployConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    deploy_config
        .validate()
        .map_err(|err| CliError::Config(err.to_string()))?;
    Ok(deploy_config)
}

fn load_secrets() -> Result<DeploymentSecrets, CliError> {
    let config_store = ConfigStore::new();
    load_or_generate_secrets(&config_store).map_err(|err| CliError::Secrets(err.to_string()))
}

fn report_outcome(outcome: &ReconcileOutcome) -> Result<(), CliError> {
    let mut stdout = io::stdout();
    let write_failed = |err: io::Error| CliError::Output(err.to_string());
    if outcome.is_new {
        writeln!(stdout, "updated {}", outcome.config_path).map_err(write_failed)?;
    } else {
        writeln!(stdout, "{} is up to date", outcome.config_path).map_err(write_failed)?;
    }
    match outcome.push {
        PushOutcome::Pushed => {
            writeln!(stdout, "pushed config to the deployment VM").map_err(write_failed)?;
        }
        PushOutcome::Skipped => {
            writeln!(stdout, "push skipped; VM already has this config").map_err(write_failed)?;
        }
    }
    if outcome.activated {
        writeln!(stdout, "storage services activated").map_err(write_failed)?;
    }
    Ok(())
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
