use mediasift::config::Settings;
use mediasift::error::ExitCode;
use mediasift::pipeline::{CacheMode, DiffOptions, DiffOutcome, Pipeline};
use std::fs;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tempfile::tempdir;

fn diff(a: &Path, b: &Path, report: &Path) -> DiffOutcome {
    let options = DiffOptions {
        folder_a: a.to_path_buf(),
        folder_b: b.to_path_buf(),
        output_json: report.to_path_buf(),
        settings: Settings::default(),
        cache_mode: CacheMode::Disabled,
    };
    Pipeline::new(Arc::new(AtomicBool::new(false)))
        .diff(&options)
        .unwrap()
}

fn canonical(path: &Path) -> String {
    fs::canonicalize(path).unwrap().to_string_lossy().into_owned()
}

#[test]
fn test_unique_files_on_each_side() {
    let a = tempdir().unwrap();
    let b = tempdir().unwrap();
    let out = tempdir().unwrap();

    fs::write(a.path().join("shared.jpg"), b"in both").unwrap();
    fs::write(b.path().join("renamed.jpg"), b"in both").unwrap();
    fs::write(a.path().join("only_a.jpg"), b"only in a").unwrap();
    fs::write(b.path().join("only_b.jpg"), b"only in b").unwrap();

    let outcome = diff(a.path(), b.path(), &out.path().join("diff.json"));
    assert_eq!(outcome.exit_code, ExitCode::Success);

    let report = outcome.report;
    assert_eq!(report.matched_group_count, 1);
    assert_eq!(report.unique_to_folder_a, vec![canonical(&a.path().join("only_a.jpg"))]);
    assert_eq!(report.unique_to_folder_b, vec![canonical(&b.path().join("only_b.jpg"))]);
}

#[test]
fn test_duplicates_within_one_side_are_all_unique() {
    let a = tempdir().unwrap();
    let b = tempdir().unwrap();
    let out = tempdir().unwrap();

    fs::write(a.path().join("copy1.jpg"), b"a twice").unwrap();
    fs::write(a.path().join("copy2.jpg"), b"a twice").unwrap();
    fs::write(b.path().join("other.jpg"), b"b stuff").unwrap();

    let report = diff(a.path(), b.path(), &out.path().join("diff.json")).report;
    assert_eq!(report.matched_group_count, 0);
    assert_eq!(
        report.unique_to_folder_a,
        vec![
            canonical(&a.path().join("copy1.jpg")),
            canonical(&a.path().join("copy2.jpg")),
        ]
    );
    assert_eq!(report.unique_to_folder_b.len(), 1);
}

#[test]
fn test_identical_folders_have_nothing_unique() {
    let a = tempdir().unwrap();
    let b = tempdir().unwrap();
    let out = tempdir().unwrap();
    for (name, body) in [("x.jpg", &b"xx"[..]), ("y.mp4", &b"yyy"[..])] {
        fs::write(a.path().join(name), body).unwrap();
        fs::write(b.path().join(name), body).unwrap();
    }

    let report_path = out.path().join("diff.json");
    let report = diff(a.path(), b.path(), &report_path).report;
    assert!(report.unique_to_folder_a.is_empty());
    assert!(report.unique_to_folder_b.is_empty());
    assert_eq!(report.matched_group_count, 2);

    let json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(report_path).unwrap()).unwrap();
    assert_eq!(json["matched_group_count"], 2);
}

#[test]
fn test_overlapping_folders_rejected() {
    let a = tempdir().unwrap();
    let inner = a.path().join("inner");
    fs::create_dir(&inner).unwrap();
    let out = tempdir().unwrap();

    let options = DiffOptions {
        folder_a: a.path().to_path_buf(),
        folder_b: inner,
        output_json: out.path().join("diff.json"),
        settings: Settings::default(),
        cache_mode: CacheMode::Disabled,
    };
    assert!(Pipeline::new(Arc::new(AtomicBool::new(false)))
        .diff(&options)
        .is_err());
}
