use filetime::FileTime;
use mediasift::config::Settings;
use mediasift::pipeline::{CacheMode, Pipeline, RunOptions};
use std::fs;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tempfile::tempdir;

fn options(root: &Path, out: &Path, report: &str, cache_mode: CacheMode) -> RunOptions {
    RunOptions {
        roots: vec![root.to_path_buf()],
        target: out.join("sorted"),
        output_json: out.join(report),
        dry_run: true,
        settings: Settings {
            cache_path: Some(out.join("cache.db")),
            ..Settings::default()
        },
        cache_mode,
    }
}

fn pipeline() -> Pipeline {
    Pipeline::new(Arc::new(AtomicBool::new(false)))
}

fn build_tree(root: &Path) {
    fs::create_dir_all(root.join("2019/holiday")).unwrap();
    fs::create_dir_all(root.join("misc")).unwrap();
    fs::write(root.join("2019/holiday/beach.jpg"), b"beach pixels").unwrap();
    fs::write(root.join("misc/beach copy.jpg"), b"beach pixels").unwrap();
    fs::write(root.join("misc/notes.txt"), b"remember sunscreen").unwrap();
    fs::write(root.join("song.mp3"), b"not really an mp3").unwrap();
}

#[test]
fn test_dry_runs_are_byte_identical() {
    let src = tempdir().unwrap();
    let out = tempdir().unwrap();
    build_tree(src.path());

    pipeline()
        .run(&options(src.path(), out.path(), "first.json", CacheMode::Enabled))
        .unwrap();
    pipeline()
        .run(&options(src.path(), out.path(), "second.json", CacheMode::Enabled))
        .unwrap();
    pipeline()
        .run(&options(src.path(), out.path(), "third.json", CacheMode::Disabled))
        .unwrap();

    let first = fs::read(out.path().join("first.json")).unwrap();
    assert_eq!(first, fs::read(out.path().join("second.json")).unwrap());
    assert_eq!(first, fs::read(out.path().join("third.json")).unwrap());
}

#[test]
fn test_report_fields() {
    let src = tempdir().unwrap();
    let out = tempdir().unwrap();
    build_tree(src.path());

    pipeline()
        .run(&options(src.path(), out.path(), "report.json", CacheMode::Disabled))
        .unwrap();

    let text = fs::read_to_string(out.path().join("report.json")).unwrap();
    let json: serde_json::Value = serde_json::from_str(&text).unwrap();

    assert_eq!(json["dry_run"], true);
    assert_eq!(json["scanned_file_count"], 4);
    assert_eq!(json["duplicate_group_count"], 1);
    assert_eq!(json["redundant_file_count"], 1);
    assert_eq!(json["survivor_file_count"], 3);
    assert_eq!(json["groups"][0]["size_bytes"], 12);
    assert_eq!(json["plan"].as_array().unwrap().len(), 3);
    assert!(json["plan"][0]["destination_path"].is_string());
    assert!(json["plan"][0]["date_bucket"].is_string());
    assert_eq!(json["plan"][0]["reason"], "new_file");
    assert!(json.get("copy_results").is_none());
    assert!(json["failures"].as_array().unwrap().is_empty());
}

#[test]
fn test_totals_add_up() {
    let src = tempdir().unwrap();
    let out = tempdir().unwrap();
    build_tree(src.path());

    let outcome = pipeline()
        .run(&options(src.path(), out.path(), "report.json", CacheMode::Disabled))
        .unwrap();
    let report = outcome.report;
    assert_eq!(
        report.redundant_total_bytes + report.survivor_total_bytes,
        report.scanned_total_bytes
    );
}

#[test]
fn test_edited_file_is_rehashed() {
    let src = tempdir().unwrap();
    let out = tempdir().unwrap();
    let a = src.path().join("a.jpg");
    let b = src.path().join("b.jpg");
    fs::write(&a, b"original").unwrap();
    fs::write(&b, b"original").unwrap();

    let first = pipeline()
        .run(&options(src.path(), out.path(), "r1.json", CacheMode::Enabled))
        .unwrap();
    assert_eq!(first.report.duplicate_group_count, 1);

    // Same size, new content, later mtime
    fs::write(&b, b"modified").unwrap();
    filetime::set_file_mtime(&b, FileTime::from_unix_time(2_000_000_000, 0)).unwrap();

    let second = pipeline()
        .run(&options(src.path(), out.path(), "r2.json", CacheMode::Enabled))
        .unwrap();
    assert_eq!(second.report.duplicate_group_count, 0);
    assert_eq!(second.report.survivor_file_count, 2);
}

#[test]
fn test_cleared_cache_gives_same_report() {
    let src = tempdir().unwrap();
    let out = tempdir().unwrap();
    build_tree(src.path());

    pipeline()
        .run(&options(src.path(), out.path(), "warm.json", CacheMode::Enabled))
        .unwrap();
    pipeline()
        .run(&options(src.path(), out.path(), "cleared.json", CacheMode::Cleared))
        .unwrap();

    assert_eq!(
        fs::read(out.path().join("warm.json")).unwrap(),
        fs::read(out.path().join("cleared.json")).unwrap()
    );
}
