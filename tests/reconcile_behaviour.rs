//! Behavioural tests for the full reconciliation cycle.

#[path = "common/test_constants.rs"]
mod test_constants;

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::TempDir;

use qsdeploy::test_support::ScriptedRunner;
use qsdeploy::{
    ConnectionMode, DeploymentSecrets, DeploymentState, EncryptionSecret, PushOutcome,
    ReconcileError, ReconcileInputs, Reconciler, StoreError, SyncConfig, SyncGate, Syncer,
    VersionStore,
};
use test_constants::{BASE_CONTENT, TEST_KEY_HEX, TEST_PASSWORD};

struct Deployment {
    _tmp: TempDir,
    root: Utf8PathBuf,
    runner: ScriptedRunner,
    reconciler: Reconciler<ScriptedRunner>,
}

fn sync_config() -> SyncConfig {
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

fn deployment(with_template: bool) -> Deployment {
    let tmp = TempDir::new().expect("tempdir");
    let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).expect("temp path utf8");
    if with_template {
        std::fs::write(root.join("zstor_config.base.toml"), BASE_CONTENT)
            .expect("seed base template");
    }

    let canonical = root.join("zstor_config.toml");
    let runner = ScriptedRunner::new();
    let syncer = Syncer::new(sync_config(), runner.clone()).expect("syncer");
    let gate = SyncGate::new(syncer, &canonical).expect("gate");
    let store = VersionStore::new(&canonical).expect("store");
    let reconciler = Reconciler::new(store, gate)
        .with_ready_poll_interval(Duration::from_millis(5))
        .with_ready_wait_timeout(Duration::from_millis(40));

    Deployment {
        _tmp: tmp,
        root,
        runner,
        reconciler,
    }
}

fn state(vm_host: &str, zdbs: &[(&str, &str, &str)]) -> DeploymentState {
    let zdb_records: Vec<String> = zdbs
        .iter()
        .map(|(namespace, mode, ip)| {
            format!(r#"{{"namespace": "{namespace}", "mode": "{mode}", "ips": ["{ip}"]}}"#)
        })
        .collect();
    let json = format!(
        r#"{{"vm": {{"name": "vm", "ips": ["{vm_host}"]}}, "zdbs": [{}]}}"#,
        zdb_records.join(",")
    );
    DeploymentState::from_json(&json).expect("state should parse")
}

fn inputs(root: &Utf8Path, deployment_state: DeploymentState, activate: bool) -> ReconcileInputs {
    ReconcileInputs {
        base_template: root.join("zstor_config.base.toml"),
        state: deployment_state,
        secrets: DeploymentSecrets {
            key: EncryptionSecret::from_hex(TEST_KEY_HEX).expect("test key"),
            password: TEST_PASSWORD.to_owned(),
        },
        zdb_connection: ConnectionMode::Ipv6,
        ssh_connection: ConnectionMode::Ipv6,
        activate,
    }
}

fn default_state() -> DeploymentState {
    state(
        "2a02:1::10",
        &[
            ("meta-1", "user", "fd00::1"),
            ("meta-2", "user", "fd00::2"),
            ("data-3", "seq", "fd00::3"),
        ],
    )
}

#[tokio::test]
async fn first_cycle_commits_and_pushes() {
    let deploy = deployment(true);
    deploy.runner.push_success();

    let outcome = deploy
        .reconciler
        .reconcile(&inputs(&deploy.root, default_state(), false))
        .await
        .expect("reconcile");

    assert!(outcome.is_new);
    assert_eq!(outcome.push, PushOutcome::Pushed);
    assert!(!outcome.activated);

    let canonical = std::fs::read_to_string(outcome.config_path.as_std_path())
        .expect("read canonical");
    assert!(canonical.starts_with(BASE_CONTENT));
    assert!(canonical.contains("namespace = \"meta-1\""));
    assert!(canonical.contains("namespace = \"data-3\""));

    let invocations = deploy.runner.invocations();
    assert_eq!(invocations.len(), 1);
    let scp = invocations.first().expect("scp invocation");
    assert_eq!(scp.program, "scp");
    assert!(
        scp.command_string()
            .ends_with("root@[2a02:1::10]:/etc/zstor-default.toml"),
        "unexpected scp command: {}",
        scp.command_string()
    );
}

#[tokio::test]
async fn identical_second_cycle_skips_the_push() {
    let deploy = deployment(true);
    deploy.runner.push_success();

    deploy
        .reconciler
        .reconcile(&inputs(&deploy.root, default_state(), false))
        .await
        .expect("first cycle");
    let outcome = deploy
        .reconciler
        .reconcile(&inputs(&deploy.root, default_state(), false))
        .await
        .expect("second cycle");

    assert!(!outcome.is_new);
    assert_eq!(outcome.push, PushOutcome::Skipped);
    assert_eq!(deploy.runner.invocations().len(), 1);
}

#[tokio::test]
async fn changed_backends_trigger_a_new_push() {
    let deploy = deployment(true);
    deploy.runner.push_success();
    deploy.runner.push_success();

    deploy
        .reconciler
        .reconcile(&inputs(&deploy.root, default_state(), false))
        .await
        .expect("first cycle");
    let grown = state(
        "2a02:1::10",
        &[
            ("meta-1", "user", "fd00::1"),
            ("meta-2", "user", "fd00::2"),
            ("data-3", "seq", "fd00::3"),
            ("data-4", "seq", "fd00::4"),
        ],
    );
    let outcome = deploy
        .reconciler
        .reconcile(&inputs(&deploy.root, grown, false))
        .await
        .expect("second cycle");

    assert!(outcome.is_new);
    assert_eq!(outcome.push, PushOutcome::Pushed);
    assert_eq!(deploy.runner.invocations().len(), 2);
}

#[tokio::test]
async fn replaced_vm_repushes_unchanged_content() {
    let deploy = deployment(true);
    deploy.runner.push_success();
    deploy.runner.push_success();

    deploy
        .reconciler
        .reconcile(&inputs(&deploy.root, default_state(), false))
        .await
        .expect("first cycle");
    let moved_vm = state(
        "2a02:1::99",
        &[
            ("meta-1", "user", "fd00::1"),
            ("meta-2", "user", "fd00::2"),
            ("data-3", "seq", "fd00::3"),
        ],
    );
    let outcome = deploy
        .reconciler
        .reconcile(&inputs(&deploy.root, moved_vm, false))
        .await
        .expect("second cycle");

    assert!(!outcome.is_new, "content should be unchanged");
    assert_eq!(outcome.push, PushOutcome::Pushed);
    assert_eq!(deploy.runner.invocations().len(), 2);
}

#[tokio::test]
async fn missing_template_aborts_before_any_candidate_exists() {
    let deploy = deployment(false);

    let err = deploy
        .reconciler
        .reconcile(&inputs(&deploy.root, default_state(), false))
        .await
        .expect_err("missing template should fail");

    assert!(matches!(
        err,
        ReconcileError::Store(StoreError::MissingBaseTemplate { .. })
    ));
    let leftovers: Vec<String> = std::fs::read_dir(deploy.root.as_std_path())
        .expect("read dir")
        .map(|entry| entry.expect("dir entry").file_name().to_string_lossy().into_owned())
        .collect();
    assert!(leftovers.is_empty(), "unexpected files: {leftovers:?}");
    assert!(deploy.runner.invocations().is_empty());
}

#[tokio::test]
async fn activation_runs_script_and_waits_for_the_socket() {
    let deploy = deployment(true);
    deploy.runner.push_success(); // scp
    deploy.runner.push_success(); // activation script
    deploy.runner.push_exit_code(1); // first probe: socket absent
    deploy.runner.push_success(); // second probe: socket present

    let outcome = deploy
        .reconciler
        .reconcile(&inputs(&deploy.root, default_state(), true))
        .await
        .expect("reconcile with activation");

    assert!(outcome.activated);
    let invocations = deploy.runner.invocations();
    assert_eq!(invocations.len(), 4);
    let activation = invocations.get(1).expect("activation invocation");
    assert!(
        activation
            .command_string()
            .contains("bash /root/scripts/activate_qsfs.sh"),
        "unexpected activation command: {}",
        activation.command_string()
    );
    let probe = invocations.get(2).expect("probe invocation");
    assert!(
        probe.command_string().contains("test -S /tmp/zstor.sock"),
        "unexpected probe command: {}",
        probe.command_string()
    );
}

#[tokio::test]
async fn failed_activation_script_surfaces_an_error() {
    let deploy = deployment(true);
    deploy.runner.push_success(); // scp
    deploy.runner.push_failure(1); // activation script

    let err = deploy
        .reconciler
        .reconcile(&inputs(&deploy.root, default_state(), true))
        .await
        .expect_err("failed activation should surface");

    assert!(matches!(err, ReconcileError::Activation { .. }));
}

#[tokio::test]
async fn activation_times_out_when_the_socket_never_appears() {
    let deploy = deployment(true);
    deploy.runner.push_success(); // scp
    deploy.runner.push_success(); // activation script
    for _ in 0..32 {
        deploy.runner.push_exit_code(1); // probes keep failing
    }

    let err = deploy
        .reconciler
        .reconcile(&inputs(&deploy.root, default_state(), true))
        .await
        .expect_err("activation should time out");

    assert!(matches!(err, ReconcileError::ReadyTimeout { .. }));
}

#[tokio::test]
async fn unreachable_vm_surfaces_the_transport_failure() {
    let deploy = deployment(true);
    deploy.runner.push_failure(255);

    let err = deploy
        .reconciler
        .reconcile(&inputs(&deploy.root, default_state(), false))
        .await
        .expect_err("unreachable VM should fail");

    assert!(matches!(err, ReconcileError::Sync(_)));
}
