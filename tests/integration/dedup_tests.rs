use mediasift::config::Settings;
use mediasift::duplicates::DuplicateFinder;
use mediasift::pipeline::{CacheMode, Pipeline, RunOptions, RunOutcome};
use mediasift::scanner::{ContentHasher, Hash, HashError, MultiWalker, ScanConfig};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tempfile::tempdir;

const MIB: usize = 1024 * 1024;

fn dry_run(roots: &[&Path], target: &Path, report: &Path) -> RunOutcome {
    let options = RunOptions {
        roots: roots.iter().map(|p| p.to_path_buf()).collect(),
        target: target.to_path_buf(),
        output_json: report.to_path_buf(),
        dry_run: true,
        settings: Settings::default(),
        cache_mode: CacheMode::Disabled,
    };
    Pipeline::new(Arc::new(AtomicBool::new(false)))
        .run(&options)
        .unwrap()
}

fn canonical(path: &Path) -> String {
    fs::canonicalize(path).unwrap().to_string_lossy().into_owned()
}

struct FixedHasher;

impl ContentHasher for FixedHasher {
    fn prehash(&self, _path: &Path) -> Result<Hash, HashError> {
        Ok([6u8; 32])
    }

    fn fingerprint(&self, _path: &Path) -> Result<Hash, HashError> {
        Ok([7u8; 32])
    }
}

#[test]
fn test_identical_photo_across_two_roots() {
    let a = tempdir().unwrap();
    let b = tempdir().unwrap();
    let out = tempdir().unwrap();

    let photo: Vec<u8> = (0..2 * MIB).map(|i| (i % 251) as u8).collect();
    let unique: Vec<u8> = (0..MIB).map(|i| (i % 13) as u8).collect();
    fs::write(a.path().join("photo.jpg"), &photo).unwrap();
    fs::write(b.path().join("photo.jpg"), &photo).unwrap();
    fs::write(a.path().join("unique.jpg"), &unique).unwrap();

    let outcome = dry_run(
        &[a.path(), b.path()],
        &out.path().join("sorted"),
        &out.path().join("report.json"),
    );
    let report = outcome.report;

    assert_eq!(report.duplicate_group_count, 1);
    assert_eq!(report.groups[0].canonical_path, canonical(&a.path().join("photo.jpg")));
    assert_eq!(
        report.groups[0].redundant_paths,
        vec![canonical(&b.path().join("photo.jpg"))]
    );
    assert_eq!(report.redundant_file_count, 1);
    assert_eq!(report.redundant_total_bytes, (2 * MIB) as u64);
    assert_eq!(report.survivor_file_count, 2);
    assert_eq!(report.survivor_total_bytes, (3 * MIB) as u64);
    assert_eq!(report.scanned_total_bytes, (5 * MIB) as u64);
    assert!(report.failures.is_empty());
}

#[test]
fn test_earlier_root_wins_canonical() {
    let first = tempdir().unwrap();
    let second = tempdir().unwrap();
    let third = tempdir().unwrap();
    let out = tempdir().unwrap();

    // Name ordering alone would pick the third root
    fs::write(third.path().join("a.jpg"), b"same bytes").unwrap();
    fs::write(second.path().join("m.jpg"), b"same bytes").unwrap();
    fs::write(first.path().join("z.jpg"), b"same bytes").unwrap();

    let outcome = dry_run(
        &[first.path(), second.path(), third.path()],
        &out.path().join("sorted"),
        &out.path().join("report.json"),
    );

    let group = &outcome.report.groups[0];
    assert_eq!(group.canonical_path, canonical(&first.path().join("z.jpg")));
    assert_eq!(
        group.redundant_paths,
        vec![
            canonical(&second.path().join("m.jpg")),
            canonical(&third.path().join("a.jpg")),
        ]
    );
    assert_eq!(outcome.report.plan.len(), 1);
    assert_eq!(outcome.report.plan[0].source_path, group.canonical_path);
}

#[test]
fn test_same_size_different_content_not_grouped() {
    let a = tempdir().unwrap();
    let out = tempdir().unwrap();
    fs::write(a.path().join("one.jpg"), b"aaaa").unwrap();
    fs::write(a.path().join("two.jpg"), b"bbbb").unwrap();

    let outcome = dry_run(&[a.path()], &out.path().join("t"), &out.path().join("r.json"));
    assert_eq!(outcome.report.duplicate_group_count, 0);
    assert_eq!(outcome.report.survivor_file_count, 2);
}

#[test]
fn test_fixed_hasher_still_separates_contents() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("a.bin"), b"same-123").unwrap();
    fs::write(dir.path().join("b.bin"), b"same-123").unwrap();
    fs::write(dir.path().join("c.bin"), b"other-12").unwrap();
    fs::write(dir.path().join("d.bin"), b"other-12").unwrap();
    fs::write(dir.path().join("e.bin"), b"lonely-1").unwrap();

    let walker = MultiWalker::new(vec![dir.path().to_path_buf()], ScanConfig::default());
    let records: Vec<_> = walker.walk().map(Result::unwrap).collect();
    assert_eq!(records.len(), 5);

    let outcome = DuplicateFinder::with_defaults()
        .with_hasher(Arc::new(FixedHasher))
        .find_duplicates(records)
        .unwrap();

    assert_eq!(outcome.groups.len(), 2);
    for group in &outcome.groups {
        let first = fs::read(&group.files[0].path).unwrap();
        for member in &group.files[1..] {
            assert_eq!(fs::read(&member.path).unwrap(), first);
        }
    }
    assert_eq!(outcome.survivors.len(), 3);
    assert!(outcome.stats.split_buckets >= 1);
}

#[test]
fn test_metadata_files_are_never_grouped() {
    let a = tempdir().unwrap();
    let b = tempdir().unwrap();
    let out = tempdir().unwrap();
    fs::write(a.path().join(".DS_Store"), b"finder junk").unwrap();
    fs::write(b.path().join(".DS_Store"), b"finder junk").unwrap();
    fs::write(a.path().join("Thumbs.db"), b"thumbs").unwrap();
    fs::write(a.path().join("img.jpg"), b"pixels").unwrap();

    let outcome = dry_run(
        &[a.path(), b.path()],
        &out.path().join("sorted"),
        &out.path().join("report.json"),
    );
    let report = outcome.report;

    assert_eq!(report.scanned_file_count, 1);
    assert_eq!(report.duplicate_group_count, 0);
    let mentions = |s: &str| s.contains(".DS_Store") || s.contains("Thumbs.db");
    assert!(report.plan.iter().all(|p| !mentions(&p.source_path)));
    assert!(report
        .groups
        .iter()
        .all(|g| !mentions(&g.canonical_path) && g.redundant_paths.iter().all(|p| !mentions(p))));
}

#[test]
fn test_empty_files_group_together() {
    let a = tempdir().unwrap();
    let out = tempdir().unwrap();
    fs::write(a.path().join("empty1.txt"), b"").unwrap();
    fs::write(a.path().join("empty2.txt"), b"").unwrap();

    let outcome = dry_run(&[a.path()], &out.path().join("t"), &out.path().join("r.json"));
    assert_eq!(outcome.report.duplicate_group_count, 1);
    assert_eq!(outcome.report.redundant_total_bytes, 0);
    assert_eq!(outcome.report.survivor_file_count, 1);
}

#[test]
fn test_nested_roots_rejected() {
    let a = tempdir().unwrap();
    let nested: PathBuf = a.path().join("inner");
    fs::create_dir(&nested).unwrap();
    let out = tempdir().unwrap();

    let options = RunOptions {
        roots: vec![a.path().to_path_buf(), nested],
        target: out.path().join("t"),
        output_json: out.path().join("r.json"),
        dry_run: true,
        settings: Settings::default(),
        cache_mode: CacheMode::Disabled,
    };
    let result = Pipeline::new(Arc::new(AtomicBool::new(false))).run(&options);
    assert!(result.is_err());
    assert!(!out.path().join("r.json").exists());
}
