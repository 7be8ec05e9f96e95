//! Unit tests for the sync module.

use super::*;
use crate::test_support::ScriptedRunner;
use rstest::{fixture, rstest};
use tempfile::TempDir;

/// Helper to assert validation rejects empty or whitespace values for a given field.
fn assert_validation_rejects_field<F>(mut cfg: SyncConfig, field_name: &str, set_field: F)
where
    F: Fn(&mut SyncConfig, String),
{
    for invalid in ["", "  "] {
        set_field(&mut cfg, invalid.to_owned());
        let Err(err) = cfg.validate() else {
            panic!("{field_name} '{invalid}' should fail");
        };
        let SyncError::InvalidConfig { ref field } = err else {
            panic!("expected InvalidConfig for {field_name}, got {err:?}");
        };
        assert_eq!(field, field_name, "expected invalid field {field_name}");
    }
}

#[fixture]
fn base_config() -> SyncConfig {
    SyncConfig {
        scp_bin: String::from("scp"),
        ssh_bin: String::from("ssh"),
        ssh_user: String::from("root"),
        remote_config_path: String::from("/etc/zstor-default.toml"),
        host_key_policy: String::from("accept-new"),
        connection_attempts: 5,
        ssh_batch_mode: true,
        ssh_identity_file: None,
        activation_script: String::from("/root/scripts/activate_qsfs.sh"),
        zstor_socket: String::from("/tmp/zstor.sock"),
    }
}

#[fixture]
fn target() -> PushTarget {
    PushTarget::new("2a02:1::10")
}

fn canonical_in_temp(tmp: &TempDir) -> Utf8PathBuf {
    let path = Utf8PathBuf::from_path_buf(tmp.path().join("zstor_config.toml"))
        .unwrap_or_else(|err| panic!("temp path should be utf8: {}", err.display()));
    std::fs::write(&path, "rendered").unwrap_or_else(|err| panic!("seed canonical: {err}"));
    path
}

#[rstest]
fn sync_config_validate_accepts_defaults(base_config: SyncConfig) {
    let cfg = base_config;
    assert!(cfg.validate().is_ok());
}

#[rstest]
fn sync_config_validation_rejects_scp_bin(base_config: SyncConfig) {
    assert_validation_rejects_field(base_config, "scp_bin", |cfg, val| cfg.scp_bin = val);
}

#[rstest]
fn sync_config_validation_rejects_ssh_user(base_config: SyncConfig) {
    assert_validation_rejects_field(base_config, "ssh_user", |cfg, val| cfg.ssh_user = val);
}

#[rstest]
fn sync_config_validation_rejects_remote_config_path(base_config: SyncConfig) {
    assert_validation_rejects_field(base_config, "remote_config_path", |cfg, val| {
        cfg.remote_config_path = val;
    });
}

#[rstest]
fn sync_config_validation_rejects_blank_identity_file(base_config: SyncConfig) {
    let mut cfg = base_config;
    cfg.ssh_identity_file = Some(String::from("  "));
    let Err(err) = cfg.validate() else {
        panic!("blank identity file should fail");
    };
    assert!(matches!(err, SyncError::InvalidConfig { ref field } if field == "ssh_identity_file"));
}

#[rstest]
fn scp_host_brackets_ipv6_literals(target: PushTarget) {
    assert_eq!(target.scp_host(), "[2a02:1::10]");
    assert_eq!(PushTarget::new("example.org").scp_host(), "example.org");
}

#[rstest]
fn build_scp_args_include_destination_and_options(base_config: SyncConfig, target: PushTarget) {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let canonical = canonical_in_temp(&tmp);
    let syncer =
        Syncer::new(base_config, ScriptedRunner::new()).expect("config should validate");

    let args = syncer
        .build_scp_args(&canonical, &target)
        .expect("args should build");
    let args_strs: Vec<String> = args
        .iter()
        .map(|a| a.to_string_lossy().into_owned())
        .collect();

    assert!(args_strs.contains(&String::from("StrictHostKeyChecking=accept-new")));
    assert!(args_strs.contains(&String::from("ConnectionAttempts=5")));
    assert!(args_strs.contains(&String::from("BatchMode=yes")));
    assert_eq!(
        args_strs.last().map(String::as_str),
        Some("root@[2a02:1::10]:/etc/zstor-default.toml")
    );
}

#[rstest]
fn build_scp_args_reject_missing_source(base_config: SyncConfig, target: PushTarget) {
    let syncer =
        Syncer::new(base_config, ScriptedRunner::new()).expect("config should validate");

    let err = syncer
        .build_scp_args(Utf8Path::new("/nonexistent/zstor_config.toml"), &target)
        .expect_err("missing source should fail");

    assert!(matches!(err, SyncError::MissingSource { .. }));
}

#[rstest]
fn build_ssh_args_forward_command_verbatim(base_config: SyncConfig, target: PushTarget) {
    let syncer =
        Syncer::new(base_config, ScriptedRunner::new()).expect("config should validate");

    let args = syncer.build_ssh_args(&target, "test -S /tmp/zstor.sock");
    let args_strs: Vec<String> = args
        .iter()
        .map(|a| a.to_string_lossy().into_owned())
        .collect();

    assert!(args_strs.contains(&String::from("root@2a02:1::10")));
    assert_eq!(
        args_strs.last().map(String::as_str),
        Some("test -S /tmp/zstor.sock")
    );
}

#[rstest]
fn push_file_surfaces_non_zero_exit(base_config: SyncConfig, target: PushTarget) {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let canonical = canonical_in_temp(&tmp);
    let runner = ScriptedRunner::new();
    runner.push_failure(1);
    let syncer = Syncer::new(base_config, runner).expect("config should validate");

    let err = syncer
        .push_file(&canonical, &target)
        .expect_err("failed scp should error");

    let SyncError::CommandFailure { status, .. } = err else {
        panic!("expected CommandFailure");
    };
    assert_eq!(status, Some(1));
}

#[rstest]
fn gate_pushes_when_content_changed(base_config: SyncConfig, target: PushTarget) {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let canonical = canonical_in_temp(&tmp);
    let runner = ScriptedRunner::new();
    runner.push_success();
    let syncer = Syncer::new(base_config, runner).expect("config should validate");
    let gate = SyncGate::new(syncer, &canonical).expect("gate should build");

    let outcome = gate
        .push_if_needed(&canonical, &target, true)
        .unwrap_or_else(|err| panic!("push: {err}"));

    assert_eq!(outcome, PushOutcome::Pushed);
}

#[rstest]
fn gate_skips_when_content_and_target_unchanged(base_config: SyncConfig, target: PushTarget) {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let canonical = canonical_in_temp(&tmp);
    let runner = ScriptedRunner::new();
    runner.push_success();
    let syncer = Syncer::new(base_config, runner.clone()).expect("config should validate");
    let gate = SyncGate::new(syncer, &canonical).expect("gate should build");
    gate.push_if_needed(&canonical, &target, true)
        .unwrap_or_else(|err| panic!("first push: {err}"));

    let outcome = gate
        .push_if_needed(&canonical, &target, false)
        .unwrap_or_else(|err| panic!("second push: {err}"));

    assert_eq!(outcome, PushOutcome::Skipped);
    // Only the first call reached scp.
    assert_eq!(runner.invocations().len(), 1);
}

#[rstest]
fn gate_repushes_unchanged_content_to_new_target(base_config: SyncConfig, target: PushTarget) {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let canonical = canonical_in_temp(&tmp);
    let runner = ScriptedRunner::new();
    runner.push_success();
    runner.push_success();
    let syncer = Syncer::new(base_config, runner.clone()).expect("config should validate");
    let gate = SyncGate::new(syncer, &canonical).expect("gate should build");
    gate.push_if_needed(&canonical, &target, true)
        .unwrap_or_else(|err| panic!("first push: {err}"));

    let replacement_vm = PushTarget::new("2a02:1::99");
    let outcome = gate
        .push_if_needed(&canonical, &replacement_vm, false)
        .unwrap_or_else(|err| panic!("re-push: {err}"));

    assert_eq!(outcome, PushOutcome::Pushed);
    assert_eq!(runner.invocations().len(), 2);
}

#[rstest]
fn gate_does_not_record_target_on_transport_failure(base_config: SyncConfig, target: PushTarget) {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let canonical = canonical_in_temp(&tmp);
    let runner = ScriptedRunner::new();
    runner.push_failure(255);
    runner.push_success();
    let syncer = Syncer::new(base_config, runner.clone()).expect("config should validate");
    let gate = SyncGate::new(syncer, &canonical).expect("gate should build");

    gate.push_if_needed(&canonical, &target, true)
        .expect_err("transport failure should surface");

    // The failed push left no record, so the next attempt pushes again even
    // with unchanged content.
    let outcome = gate
        .push_if_needed(&canonical, &target, false)
        .unwrap_or_else(|err| panic!("retry push: {err}"));
    assert_eq!(outcome, PushOutcome::Pushed);
}
