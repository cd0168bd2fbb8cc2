use mediasift::actions::CopyStatus;
use mediasift::classify::Layout;
use mediasift::config::Settings;
use mediasift::error::ExitCode;
use mediasift::pipeline::{CacheMode, Pipeline, RunOptions, RunOutcome};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tempfile::tempdir;

/// Seconds between 1904-01-01 and 1970-01-01.
const MAC_EPOCH_OFFSET: u32 = 2_082_844_800;

fn atom(kind: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut out = ((body.len() + 8) as u32).to_be_bytes().to_vec();
    out.extend_from_slice(kind);
    out.extend_from_slice(body);
    out
}

/// Minimal MP4 whose movie header records `unix_seconds` as creation time.
fn mp4_created_at(unix_seconds: u32) -> Vec<u8> {
    let stamp = (unix_seconds + MAC_EPOCH_OFFSET).to_be_bytes();
    let mut mvhd = vec![0u8, 0, 0, 0];
    mvhd.extend_from_slice(&stamp);
    mvhd.extend_from_slice(&stamp);
    mvhd.extend_from_slice(&[0u8; 88]);

    let mut file = atom(b"ftyp", b"isom\0\0\x02\0isomiso2");
    file.extend(atom(b"moov", &atom(b"mvhd", &mvhd)));
    file.extend(atom(b"mdat", &[0x5A; 64]));
    file
}

fn run(roots: &[&Path], target: &Path, report: &Path, dry_run: bool, layout: Layout) -> RunOutcome {
    let options = RunOptions {
        roots: roots.iter().map(|p| p.to_path_buf()).collect(),
        target: target.to_path_buf(),
        output_json: report.to_path_buf(),
        dry_run,
        settings: Settings {
            layout,
            ..Settings::default()
        },
        cache_mode: CacheMode::Disabled,
    };
    Pipeline::new(Arc::new(AtomicBool::new(false)))
        .run(&options)
        .unwrap()
}

fn fingerprint_tree(root: &Path) -> BTreeMap<PathBuf, String> {
    let mut out = BTreeMap::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(&dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                stack.push(path);
            } else {
                let hash = blake3::hash(&fs::read(&path).unwrap()).to_hex().to_string();
                out.insert(path, hash);
            }
        }
    }
    out
}

#[test]
fn test_apply_copies_every_survivor() {
    let a = tempdir().unwrap();
    let b = tempdir().unwrap();
    let out = tempdir().unwrap();
    fs::create_dir(a.path().join("trip")).unwrap();
    fs::write(a.path().join("trip/one.jpg"), b"first photo").unwrap();
    fs::write(b.path().join("one.jpg"), b"first photo").unwrap();
    fs::write(b.path().join("two.png"), b"second photo").unwrap();
    fs::write(a.path().join("notes.txt"), b"text").unwrap();

    let before_a = fingerprint_tree(a.path());
    let before_b = fingerprint_tree(b.path());
    let target = out.path().join("sorted");

    let outcome = run(&[a.path(), b.path()], &target, &out.path().join("run.json"), false, Layout::Day);
    assert_eq!(outcome.exit_code, ExitCode::Success);

    let report = outcome.report;
    assert!(!report.dry_run);
    assert_eq!(report.plan.len(), 3);
    let results = report.copy_results.as_ref().unwrap();
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| r.status == CopyStatus::Copied));

    for entry in &report.plan {
        let copied = fs::read(&entry.destination_path).unwrap();
        let original = fs::read(&entry.source_path).unwrap();
        assert_eq!(copied, original);
    }

    assert_eq!(fingerprint_tree(a.path()), before_a);
    assert_eq!(fingerprint_tree(b.path()), before_b);
    assert_eq!(fingerprint_tree(&target).len(), 3);
}

#[test]
fn test_dry_run_writes_nothing() {
    let a = tempdir().unwrap();
    let out = tempdir().unwrap();
    fs::write(a.path().join("one.jpg"), b"photo").unwrap();
    let before = fingerprint_tree(a.path());
    let target = out.path().join("sorted");

    let outcome = run(&[a.path()], &target, &out.path().join("plan.json"), true, Layout::Day);

    assert!(outcome.report.copy_results.is_none());
    assert!(!target.exists());
    assert_eq!(fingerprint_tree(a.path()), before);
}

#[test]
fn test_embedded_date_picks_folder() {
    let a = tempdir().unwrap();
    let out = tempdir().unwrap();
    // 2021-06-15 12:00:00 UTC
    fs::write(a.path().join("clip.mp4"), mp4_created_at(1_623_758_400)).unwrap();
    let target = out.path().join("sorted");

    let outcome = run(&[a.path()], &target, &out.path().join("run.json"), false, Layout::Day);

    let entry = &outcome.report.plan[0];
    assert_eq!(entry.date_bucket, "2021-06-15");
    let expected = fs::canonicalize(&target).unwrap().join("2021-06-15").join("clip.mp4");
    assert_eq!(PathBuf::from(&entry.destination_path), expected);
    assert!(expected.is_file());
}

#[test]
fn test_month_layout() {
    let a = tempdir().unwrap();
    let out = tempdir().unwrap();
    fs::write(a.path().join("clip.mov"), mp4_created_at(1_623_758_400)).unwrap();
    let target = out.path().join("sorted");

    let outcome = run(&[a.path()], &target, &out.path().join("run.json"), true, Layout::Month);

    let entry = &outcome.report.plan[0];
    assert_eq!(entry.date_bucket, "2021-06-15");
    assert!(entry.destination_path.ends_with(&format!("2021-06{}clip.mov", std::path::MAIN_SEPARATOR)));
}

#[test]
fn test_name_collisions_get_suffixes() {
    let a = tempdir().unwrap();
    let out = tempdir().unwrap();
    fs::create_dir_all(a.path().join("x")).unwrap();
    fs::create_dir_all(a.path().join("y")).unwrap();
    fs::create_dir_all(a.path().join("z")).unwrap();
    fs::write(a.path().join("x/IMG_0001.jpg"), b"first camera").unwrap();
    fs::write(a.path().join("y/IMG_0001.jpg"), b"second camera").unwrap();
    fs::write(a.path().join("z/img_0001.JPG"), b"third camera").unwrap();
    let target = out.path().join("flat");

    let outcome = run(&[a.path()], &target, &out.path().join("run.json"), false, Layout::Flat);

    let names: Vec<String> = outcome
        .report
        .plan
        .iter()
        .map(|e| {
            Path::new(&e.destination_path)
                .file_name()
                .unwrap()
                .to_string_lossy()
                .into_owned()
        })
        .collect();
    assert_eq!(names, vec!["IMG_0001.jpg", "IMG_0001_1.jpg", "img_0001_2.JPG"]);
    assert_eq!(fs::read(target.join("IMG_0001_1.jpg")).unwrap(), b"second camera");
}

#[test]
fn test_existing_target_files_are_kept() {
    let a = tempdir().unwrap();
    let out = tempdir().unwrap();
    let target = out.path().join("flat");
    fs::create_dir_all(&target).unwrap();
    fs::write(target.join("photo.jpg"), b"already sorted").unwrap();
    fs::write(a.path().join("photo.jpg"), b"new arrival").unwrap();

    let outcome = run(&[a.path()], &target, &out.path().join("run.json"), false, Layout::Flat);

    assert!(outcome.report.plan[0].destination_path.ends_with("photo_1.jpg"));
    assert_eq!(fs::read(target.join("photo.jpg")).unwrap(), b"already sorted");
    assert_eq!(fs::read(target.join("photo_1.jpg")).unwrap(), b"new arrival");
}

#[test]
fn test_rerun_into_same_target_copies_nothing() {
    let a = tempdir().unwrap();
    let out = tempdir().unwrap();
    fs::write(a.path().join("one.jpg"), b"first photo").unwrap();
    fs::write(a.path().join("two.jpg"), b"second photo").unwrap();
    let target = out.path().join("flat");

    let first = run(&[a.path()], &target, &out.path().join("first.json"), false, Layout::Flat);
    assert_eq!(first.exit_code, ExitCode::Success);
    let before = fingerprint_tree(&target);

    let second = run(&[a.path()], &target, &out.path().join("second.json"), false, Layout::Flat);
    assert_eq!(second.exit_code, ExitCode::Success);

    let results = second.report.copy_results.as_ref().unwrap();
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.status == CopyStatus::AlreadyPresent));
    assert_eq!(fingerprint_tree(&target), before);
    assert!(!target.join("one_1.jpg").exists());
}

#[test]
fn test_apply_report_is_rewritten_with_results() {
    let a = tempdir().unwrap();
    let out = tempdir().unwrap();
    fs::write(a.path().join("one.jpg"), b"photo").unwrap();
    let report_path = out.path().join("run.json");

    run(&[a.path()], &out.path().join("sorted"), &report_path, false, Layout::Day);

    let json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&report_path).unwrap()).unwrap();
    assert_eq!(json["dry_run"], false);
    assert_eq!(json["copy_results"][0]["status"], "copied");
    assert!(json["copy_results"][0].get("error").is_none());
}
