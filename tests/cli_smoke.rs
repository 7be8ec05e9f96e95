//! Behavioural smoke tests for the CLI entrypoint.

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::str::contains;
use tempfile::TempDir;

#[test]
fn cli_without_arguments_prints_usage() {
    let mut cmd = cargo_bin_cmd!("qsdeploy");
    cmd.assert().failure().stderr(contains("Usage"));
}

#[test]
fn reconcile_aborts_when_deployment_vars_are_missing() {
    let tmp = TempDir::new().expect("tempdir");
    let mut cmd = cargo_bin_cmd!("qsdeploy");
    cmd.current_dir(tmp.path());
    cmd.env_remove("MNEMONIC");
    cmd.args(["reconcile"]);

    cmd.assert()
        .failure()
        .code(1)
        .stderr(contains("configuration error"));
}

#[test]
fn init_fails_cleanly_when_no_mnemonic_is_available() {
    let tmp = TempDir::new().expect("tempdir");
    let mut cmd = cargo_bin_cmd!("qsdeploy");
    cmd.current_dir(tmp.path());
    cmd.env_remove("MNEMONIC");
    cmd.args(["init"]);
    cmd.write_stdin("");

    cmd.assert()
        .failure()
        .code(1)
        .stderr(contains("no value available for mnemonic"));
}
