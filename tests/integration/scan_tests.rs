use mediasift::scanner::{validate_roots, MultiWalker, ScanConfig, ScanError, Walker};
use std::fs;
use std::path::PathBuf;
use tempfile::tempdir;

#[test]
fn test_walk_is_sorted_and_recursive() {
    let dir = tempdir().unwrap();
    fs::create_dir_all(dir.path().join("b/deep")).unwrap();
    fs::write(dir.path().join("c.jpg"), b"c").unwrap();
    fs::write(dir.path().join("a.jpg"), b"a").unwrap();
    fs::write(dir.path().join("b/deep/x.jpg"), b"x").unwrap();

    let walker = Walker::new(dir.path(), 0, ScanConfig::default());
    let mut names: Vec<PathBuf> = walker
        .walk()
        .map(|r| r.unwrap().path.strip_prefix(dir.path()).unwrap().to_path_buf())
        .collect();
    names.sort();

    assert_eq!(
        names,
        vec![
            PathBuf::from("a.jpg"),
            PathBuf::from("b/deep/x.jpg"),
            PathBuf::from("c.jpg"),
        ]
    );
}

#[test]
fn test_exclusions_apply_to_files_and_directories() {
    let dir = tempdir().unwrap();
    fs::create_dir_all(dir.path().join("cache")).unwrap();
    fs::write(dir.path().join("cache/thumb.jpg"), b"t").unwrap();
    fs::write(dir.path().join("keep.jpg"), b"k").unwrap();
    fs::write(dir.path().join("scratch.tmp"), b"s").unwrap();
    fs::write(dir.path().join("._keep.jpg"), b"resource fork").unwrap();

    let config = ScanConfig::default().with_exclude_patterns(vec![
        "cache/".to_string(),
        "*.tmp".to_string(),
        "._*".to_string(),
    ]);
    let records: Vec<_> = Walker::new(dir.path(), 0, config)
        .walk()
        .map(Result::unwrap)
        .collect();

    assert_eq!(records.len(), 1);
    assert!(records[0].path.ends_with("keep.jpg"));
}

#[test]
fn test_multi_walker_tags_root_index() {
    let a = tempdir().unwrap();
    let b = tempdir().unwrap();
    fs::write(a.path().join("one.jpg"), b"1").unwrap();
    fs::write(b.path().join("two.jpg"), b"2").unwrap();

    let walker = MultiWalker::new(
        vec![a.path().to_path_buf(), b.path().to_path_buf()],
        ScanConfig::default(),
    );
    let records: Vec<_> = walker.walk().map(Result::unwrap).collect();

    assert_eq!(records.len(), 2);
    let one = records.iter().find(|r| r.path.ends_with("one.jpg")).unwrap();
    let two = records.iter().find(|r| r.path.ends_with("two.jpg")).unwrap();
    assert_eq!(one.root_index, 0);
    assert_eq!(two.root_index, 1);
    assert_eq!(one.size, 1);
}

#[test]
fn test_validate_roots_errors() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("file.jpg");
    fs::write(&file, b"x").unwrap();

    let missing = validate_roots(&[dir.path().join("missing")]).unwrap_err();
    assert!(matches!(missing, ScanError::NotFound(_)));

    let not_dir = validate_roots(&[file]).unwrap_err();
    assert!(matches!(not_dir, ScanError::NotADirectory(_)));

    let same = validate_roots(&[dir.path().to_path_buf(), dir.path().to_path_buf()]).unwrap_err();
    assert!(matches!(same, ScanError::OverlappingRoots { .. }));
}

#[cfg(unix)]
#[test]
fn test_validate_roots_rejects_unreadable_root() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempdir().unwrap();
    let locked = dir.path().join("locked");
    fs::create_dir(&locked).unwrap();
    fs::write(locked.join("photo.jpg"), b"x").unwrap();
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

    // Permission bits do not bind a privileged user.
    if fs::read_dir(&locked).is_ok() {
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        return;
    }

    let result = validate_roots(&[locked.clone()]);
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
    assert!(matches!(result, Err(ScanError::PermissionDenied(p)) if p == locked));
}

#[cfg(unix)]
#[test]
fn test_symlinks_skipped_by_default() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("real.jpg"), b"real").unwrap();
    std::os::unix::fs::symlink(dir.path().join("real.jpg"), dir.path().join("link.jpg")).unwrap();

    let records: Vec<_> = Walker::new(dir.path(), 0, ScanConfig::default())
        .walk()
        .map(Result::unwrap)
        .collect();
    assert_eq!(records.len(), 1);

    // The link's target is scanned directly, so following adds nothing.
    let records: Vec<_> = Walker::new(dir.path(), 0, ScanConfig::default().with_follow_symlinks(true))
        .walk()
        .map(Result::unwrap)
        .collect();
    assert_eq!(records.len(), 1);
    assert!(records[0].path.ends_with("real.jpg"));
}
