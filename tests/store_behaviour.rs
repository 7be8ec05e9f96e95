//! Behavioural tests for the version store.

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::TempDir;

use qsdeploy::{StoreError, VersionStore, read_base_template};

fn temp_root(tmp: &TempDir) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).expect("temp path should be utf8")
}

fn artifacts(root: &Utf8Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(root)
        .expect("read dir")
        .map(|entry| entry.expect("dir entry").file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[test]
fn idempotent_commit_retains_one_candidate() {
    let tmp = TempDir::new().expect("tempdir");
    let root = temp_root(&tmp);
    let store = VersionStore::new(&root.join("zstor_config.toml")).expect("store");

    let first = store.commit("content").expect("first commit");
    let second = store.commit("content").expect("second commit");

    assert!(first.is_new);
    assert!(!second.is_new);
    assert_eq!(first.path, second.path);
    assert_eq!(
        artifacts(&root),
        ["zstor_config.toml", "zstor_config.toml.1"]
    );
}

#[test]
fn change_detection_keeps_the_full_trail() {
    let tmp = TempDir::new().expect("tempdir");
    let root = temp_root(&tmp);
    let store = VersionStore::new(&root.join("zstor_config.toml")).expect("store");

    store.commit("content-a").expect("commit a");
    let second = store.commit("content-b").expect("commit b");

    assert!(second.is_new);
    let canonical = std::fs::read_to_string(second.path.as_std_path()).expect("read canonical");
    assert_eq!(canonical, "content-b");
    assert_eq!(
        artifacts(&root),
        [
            "zstor_config.toml",
            "zstor_config.toml.1",
            "zstor_config.toml.2"
        ]
    );
}

#[test]
fn missing_base_template_aborts_with_a_clear_error() {
    let tmp = TempDir::new().expect("tempdir");
    let root = temp_root(&tmp);
    let template = root.join("zstor_config.base.toml");

    let err = read_base_template(&template).expect_err("missing template should fail");

    let StoreError::MissingBaseTemplate { path } = err else {
        panic!("expected MissingBaseTemplate, got {err:?}");
    };
    assert_eq!(path, template);
}
