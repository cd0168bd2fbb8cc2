use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::tempdir;

fn mediasift() -> Command {
    let mut cmd = Command::cargo_bin("mediasift").unwrap();
    cmd.env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_dry_run_succeeds() {
    let src = tempdir().unwrap();
    let out = tempdir().unwrap();
    fs::write(src.path().join("a.jpg"), b"photo").unwrap();
    fs::write(src.path().join("b.jpg"), b"photo").unwrap();
    let report = out.path().join("report.json");

    mediasift()
        .arg(src.path())
        .arg(out.path().join("sorted"))
        .arg("--output-json")
        .arg(&report)
        .args(["--no-cache", "-q"])
        .assert()
        .code(0);

    let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&report).unwrap()).unwrap();
    assert_eq!(json["duplicate_group_count"], 1);
    assert!(!out.path().join("sorted").exists());
}

#[test]
fn test_apply_copies() {
    let src = tempdir().unwrap();
    let out = tempdir().unwrap();
    fs::write(src.path().join("a.jpg"), b"photo").unwrap();

    mediasift()
        .arg(src.path())
        .arg(out.path().join("sorted"))
        .arg("--output-json")
        .arg(out.path().join("report.json"))
        .args(["--no-cache", "-q", "--no-dryrun", "--layout", "flat"])
        .assert()
        .code(0);

    assert_eq!(fs::read(out.path().join("sorted/a.jpg")).unwrap(), b"photo");
}

#[test]
fn test_missing_root_is_config_error() {
    let out = tempdir().unwrap();

    mediasift()
        .arg(out.path().join("does-not-exist"))
        .arg(out.path().join("sorted"))
        .arg("--output-json")
        .arg(out.path().join("report.json"))
        .args(["--no-cache", "-q"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("[MS002]"));

    assert!(!out.path().join("report.json").exists());
}

#[cfg(unix)]
#[test]
fn test_unreadable_root_is_config_error() {
    use std::os::unix::fs::PermissionsExt;

    let src = tempdir().unwrap();
    let out = tempdir().unwrap();
    let locked = src.path().join("locked");
    fs::create_dir(&locked).unwrap();
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
    if fs::read_dir(&locked).is_ok() {
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        return;
    }

    let assert = mediasift()
        .arg(&locked)
        .arg(out.path().join("sorted"))
        .arg("--output-json")
        .arg(out.path().join("report.json"))
        .args(["--no-cache", "-q"])
        .assert();
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

    assert.code(2).stderr(predicate::str::contains("[MS002]"));
    assert!(!out.path().join("report.json").exists());
}

#[test]
fn test_target_that_is_a_file_is_config_error() {
    let src = tempdir().unwrap();
    let out = tempdir().unwrap();
    let target = out.path().join("not-a-dir");
    fs::write(&target, b"x").unwrap();

    mediasift()
        .arg(src.path())
        .arg(&target)
        .arg("--output-json")
        .arg(out.path().join("report.json"))
        .args(["--no-cache", "-q"])
        .assert()
        .code(2);
}

#[test]
fn test_target_inside_source_is_config_error() {
    let src = tempdir().unwrap();
    let out = tempdir().unwrap();

    mediasift()
        .arg(src.path())
        .arg(src.path().join("sorted"))
        .arg("--output-json")
        .arg(out.path().join("report.json"))
        .args(["--no-cache", "-q", "--no-dryrun"])
        .assert()
        .code(2);

    assert!(!src.path().join("sorted").exists());
}

#[test]
fn test_bad_config_file_is_config_error() {
    let src = tempdir().unwrap();
    let out = tempdir().unwrap();
    let config = out.path().join("mediasift.toml");
    fs::write(&config, "io_threads = \"lots\"").unwrap();

    mediasift()
        .arg(src.path())
        .arg(out.path().join("sorted"))
        .arg("--output-json")
        .arg(out.path().join("report.json"))
        .arg("--config")
        .arg(&config)
        .args(["--no-cache", "-q"])
        .assert()
        .code(2);
}

#[test]
fn test_config_file_layout_is_used() {
    let src = tempdir().unwrap();
    let out = tempdir().unwrap();
    fs::write(src.path().join("a.jpg"), b"photo").unwrap();
    let config = out.path().join("mediasift.toml");
    fs::write(&config, "layout = \"flat\"\n").unwrap();
    let report = out.path().join("report.json");

    mediasift()
        .arg(src.path())
        .arg(out.path().join("sorted"))
        .arg("--output-json")
        .arg(&report)
        .arg("--config")
        .arg(&config)
        .args(["--no-cache", "-q"])
        .assert()
        .code(0);

    let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&report).unwrap()).unwrap();
    let dest = json["plan"][0]["destination_path"].as_str().unwrap();
    let sorted = fs::canonicalize(out.path()).unwrap().join("sorted").join("a.jpg");
    assert_eq!(dest, sorted.to_string_lossy());
}

#[test]
fn test_json_errors() {
    let out = tempdir().unwrap();

    mediasift()
        .arg(out.path().join("missing"))
        .arg(out.path().join("sorted"))
        .arg("--output-json")
        .arg(out.path().join("report.json"))
        .args(["--no-cache", "-q", "--json-errors"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("\"code\": \"MS002\""));
}

#[test]
fn test_missing_output_json_is_usage_error() {
    let src = tempdir().unwrap();
    let out = tempdir().unwrap();

    mediasift()
        .arg(src.path())
        .arg(out.path().join("sorted"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("--output-json"));
}

#[test]
fn test_diff_subcommand() {
    let a = tempdir().unwrap();
    let b = tempdir().unwrap();
    let out = tempdir().unwrap();
    fs::write(a.path().join("x.jpg"), b"shared").unwrap();
    fs::write(b.path().join("x.jpg"), b"shared").unwrap();
    fs::write(b.path().join("y.jpg"), b"only b").unwrap();
    let report = out.path().join("diff.json");

    mediasift()
        .arg("diff")
        .arg(a.path())
        .arg(b.path())
        .arg("--output-json")
        .arg(&report)
        .args(["--no-cache", "-q"])
        .assert()
        .code(0);

    let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&report).unwrap()).unwrap();
    assert_eq!(json["unique_to_folder_a"].as_array().unwrap().len(), 0);
    assert_eq!(json["unique_to_folder_b"].as_array().unwrap().len(), 1);
}
