use mediasift::cache::HashCache;
use mediasift::duplicates::{DuplicateFinder, FinderConfig};
use mediasift::scanner::{MultiWalker, ScanConfig};
use std::fs;
use std::sync::Arc;
use tempfile::tempdir;

fn records(root: &std::path::Path) -> Vec<mediasift::scanner::FileRecord> {
    MultiWalker::new(vec![root.to_path_buf()], ScanConfig::default())
        .walk()
        .map(Result::unwrap)
        .collect()
}

#[test]
fn test_cache_initial_scan_and_rescan() {
    let dir = tempdir().unwrap();
    let cache_dir = tempdir().unwrap();
    let cache_path = cache_dir.path().join("cache.db");

    fs::write(dir.path().join("file1.jpg"), b"duplicate content").unwrap();
    fs::write(dir.path().join("file2.jpg"), b"duplicate content").unwrap();

    let cache = Arc::new(HashCache::open(&cache_path).unwrap());
    let finder = DuplicateFinder::new(FinderConfig::default().with_cache(cache.clone()));

    let first = finder.find_duplicates(records(dir.path())).unwrap();
    assert_eq!(first.groups.len(), 1);
    assert_eq!(first.stats.cache_hits, 0);
    assert_eq!(first.stats.cache_misses, 2);
    cache.flush().unwrap();

    // A fresh handle reads what the first one persisted
    let reopened = Arc::new(HashCache::open(&cache_path).unwrap());
    assert_eq!(reopened.len(), 2);
    let finder = DuplicateFinder::new(FinderConfig::default().with_cache(reopened));
    let second = finder.find_duplicates(records(dir.path())).unwrap();
    assert_eq!(second.groups.len(), 1);
    assert_eq!(second.stats.cache_hits, 2);
    assert_eq!(second.stats.cache_misses, 0);
}

#[test]
fn test_unique_sizes_are_not_hashed() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("small.jpg"), b"a").unwrap();
    fs::write(dir.path().join("large.jpg"), b"abcdef").unwrap();

    let cache = Arc::new(HashCache::in_memory());
    let finder = DuplicateFinder::new(FinderConfig::default().with_cache(cache.clone()));
    let outcome = finder.find_duplicates(records(dir.path())).unwrap();

    assert_eq!(outcome.stats.hashed, 0);
    assert_eq!(outcome.survivors.len(), 2);
    assert!(cache.is_empty());
}

#[test]
fn test_prehash_is_cached_for_prefix_unique_files() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("a.jpg"), b"first").unwrap();
    fs::write(dir.path().join("b.jpg"), b"other").unwrap();

    let cache = Arc::new(HashCache::in_memory());
    let finder = DuplicateFinder::new(FinderConfig::default().with_cache(cache.clone()));

    let first = finder.find_duplicates(records(dir.path())).unwrap();
    assert_eq!(first.stats.prehashed, 2);
    assert_eq!(first.stats.unique_by_prehash, 2);
    assert_eq!(first.stats.hashed, 0);
    assert_eq!(cache.len(), 2);

    let second = finder.find_duplicates(records(dir.path())).unwrap();
    assert_eq!(second.stats.prehash_cache_hits, 2);
    assert_eq!(second.stats.hashed, 0);
}

#[test]
fn test_corrupt_cache_file_recovers() {
    let dir = tempdir().unwrap();
    let cache_dir = tempdir().unwrap();
    let cache_path = cache_dir.path().join("cache.db");
    fs::write(&cache_path, b"this is not a sqlite database at all").unwrap();

    fs::write(dir.path().join("a.jpg"), b"same").unwrap();
    fs::write(dir.path().join("b.jpg"), b"same").unwrap();

    let cache = Arc::new(HashCache::open_or_recover(&cache_path));
    let finder = DuplicateFinder::new(FinderConfig::default().with_cache(cache.clone()));
    let outcome = finder.find_duplicates(records(dir.path())).unwrap();

    assert_eq!(outcome.groups.len(), 1);
    assert_eq!(outcome.stats.cache_misses, 2);
    cache.flush().unwrap();
    assert_eq!(HashCache::open(&cache_path).unwrap().len(), 2);
}

#[test]
fn test_prune_forgets_deleted_files() {
    let dir = tempdir().unwrap();
    let cache_dir = tempdir().unwrap();
    let cache_path = cache_dir.path().join("cache.db");

    fs::write(dir.path().join("a.jpg"), b"same").unwrap();
    fs::write(dir.path().join("b.jpg"), b"same").unwrap();

    let cache = Arc::new(HashCache::open(&cache_path).unwrap());
    let finder = DuplicateFinder::new(FinderConfig::default().with_cache(cache.clone()));
    finder.find_duplicates(records(dir.path())).unwrap();
    cache.flush().unwrap();
    assert_eq!(cache.len(), 2);

    fs::remove_file(dir.path().join("b.jpg")).unwrap();
    let removed = cache.prune_missing(&[dir.path().to_path_buf()]).unwrap();
    assert_eq!(removed, 1);
    assert_eq!(cache.len(), 1);
}
