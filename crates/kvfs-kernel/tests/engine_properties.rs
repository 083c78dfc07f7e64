//! Integration tests for the filesystem engine.
//!
//! Every property runs over both substrates: the in-memory map and a SQLite
//! database in a temporary directory.

use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;

use kvfs_kernel::{
    DirEntry, FileKind, Filesystem, FsConfig, FsError, KvStore, MemoryStore, Mount, SqliteStore,
    fsck,
};
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

// ============================================================================
// Shared test setup
// ============================================================================

/// An engine plus whatever keeps its backing store alive.
struct Harness {
    fs: Filesystem,
    _dir: Option<TempDir>,
}

fn memory() -> Harness {
    let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
    Harness {
        fs: Filesystem::new(store, &FsConfig::default()).unwrap(),
        _dir: None,
    }
}

fn sqlite() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn KvStore> = Arc::new(SqliteStore::open_dir(dir.path()).unwrap());
    Harness {
        fs: Filesystem::new(store, &FsConfig::default()).unwrap(),
        _dir: Some(dir),
    }
}

/// Log to the test writer; `RUST_LOG=kvfs_kernel=debug` to see handler spans.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn each_substrate(test: impl Fn(&Filesystem)) {
    init_tracing();
    test(&memory().fs);
    test(&sqlite().fs);
}

// ============================================================================
// Properties
// ============================================================================

#[test]
fn distinct_names_get_distinct_inos() {
    each_substrate(|fs| {
        let names = ["a", "b", "c", "d", "e", "f", "g", "h"];
        for (i, name) in names.iter().enumerate() {
            if i % 2 == 0 {
                fs.mkdir("/", name, 0o755, 0, 0).unwrap();
            } else {
                fs.create("/", name, 0o644, 0, 0).unwrap();
            }
        }

        let inos: HashSet<_> = names
            .iter()
            .map(|name| fs.lookup("/", name).unwrap().0)
            .collect();
        assert_eq!(inos.len(), names.len());
    });
}

#[test]
fn remove_then_recreate_gets_fresh_ino() {
    each_substrate(|fs| {
        let mut seen = HashSet::new();
        for round in 0..5 {
            let ino = if round % 2 == 0 {
                fs.mkdir("/", "x", 0o755, 0, 0).unwrap().0
            } else {
                fs.create("/", "x", 0o644, 0, 0).unwrap().0
            };
            assert!(seen.insert(ino), "ino {ino} reused");

            fs.remove("/", "x").unwrap();
            assert!(matches!(fs.lookup("/", "x"), Err(FsError::NotFound(_))));
        }
    });
}

#[test]
fn write_then_read_round_trips() {
    each_substrate(|fs| {
        let (ino, _, handle) = fs.create("/", "f", 0o644, 0, 0).unwrap();
        for payload in [&b"hello world"[..], &b""[..], &[0u8, 255, 7, 0][..], &[b'z'; 10_000][..]] {
            assert_eq!(fs.write(&handle, payload).unwrap(), payload.len());
            assert_eq!(fs.read(&handle).unwrap(), payload);
            assert_eq!(fs.getattr(ino).unwrap().size, payload.len() as u64);
        }
    });
}

#[test]
fn readdir_keeps_creation_order_minus_removed() {
    each_substrate(|fs| {
        fs.mkdir("/", "p", 0o755, 0, 0).unwrap();
        let (a, _) = fs.mkdir("/p", "a", 0o755, 0, 0).unwrap();
        fs.create("/p", "b", 0o644, 0, 0).unwrap();
        let (c, _, _) = fs.create("/p", "c", 0o644, 0, 0).unwrap();
        fs.remove("/p", "b").unwrap();

        assert_eq!(
            fs.readdir("/p").unwrap(),
            vec![
                DirEntry::new("a", a, FileKind::Directory),
                DirEntry::new("c", c, FileKind::File),
            ]
        );
    });
}

#[test]
fn concurrent_mkdir_same_name_one_wins() {
    each_substrate(|fs| {
        for round in 0..20 {
            let name = format!("x{round}");
            let barrier = Barrier::new(2);
            let (barrier, name) = (&barrier, name.as_str());
            let results: Vec<_> = thread::scope(|s| {
                let handles: Vec<_> = (0..2)
                    .map(|_| {
                        s.spawn(move || {
                            barrier.wait();
                            fs.mkdir("/", name, 0o755, 0, 0)
                        })
                    })
                    .collect();
                handles.into_iter().map(|h| h.join().unwrap()).collect()
            });

            let wins = results.iter().filter(|r| r.is_ok()).count();
            let collisions = results
                .iter()
                .filter(|r| matches!(r, Err(FsError::AlreadyExists(_))))
                .count();
            assert_eq!((wins, collisions), (1, 1), "round {round}: {results:?}");
        }

        let listed = fs.namespace().list_children("/").unwrap();
        let unique: HashSet<_> = listed.iter().collect();
        assert_eq!(listed.len(), 20);
        assert_eq!(unique.len(), 20);
        assert!(fsck(fs).unwrap().is_clean());
    });
}

#[test]
fn concurrent_writes_leave_size_matching_content() {
    each_substrate(|fs| {
        let (ino, _, handle) = fs.create("/", "f", 0o644, 0, 0).unwrap();
        let barrier = Barrier::new(8);
        thread::scope(|s| {
            for i in 0..8usize {
                let barrier = &barrier;
                s.spawn(move || {
                    barrier.wait();
                    fs.write(&handle, &vec![b'a' + i as u8; 100 + i * 37]).unwrap();
                });
            }
        });

        let content = fs.read(&handle).unwrap();
        assert_eq!(fs.getattr(ino).unwrap().size, content.len() as u64);
        assert!(content.iter().all(|b| *b == content[0]));
    });
}

#[test]
fn concurrent_creates_in_distinct_dirs() {
    each_substrate(|fs| {
        for d in 0..4 {
            fs.mkdir("/", &format!("d{d}"), 0o755, 0, 0).unwrap();
        }
        let barrier = Barrier::new(4);
        thread::scope(|s| {
            for d in 0..4 {
                let barrier = &barrier;
                s.spawn(move || {
                    barrier.wait();
                    let dir = format!("/d{d}");
                    for f in 0..10 {
                        fs.create(&dir, &format!("f{f}"), 0o644, 0, 0).unwrap();
                    }
                });
            }
        });

        let report = fsck(fs).unwrap();
        assert!(report.is_clean(), "{:?}", report.issues);
        assert_eq!(report.files, 40);
        assert_eq!(report.dirs, 5);
    });
}

// ============================================================================
// Scenario
// ============================================================================

#[test]
fn docs_scenario() {
    each_substrate(|fs| {
        let (i1, docs) = fs.mkdir("/", "docs", 0o755, 0, 0).unwrap();
        assert!(docs.is_dir());

        let (i2, _, handle) = fs.create("/docs", "a.txt", 0o644, 0, 0).unwrap();
        assert_ne!(i1, i2);

        assert_eq!(fs.write(&handle, b"hello world").unwrap(), 11);
        assert_eq!(fs.read(&handle).unwrap(), b"hello world");
        assert_eq!(
            fs.readdir("/docs").unwrap(),
            vec![DirEntry::new("a.txt", i2, FileKind::File)]
        );

        fs.release(&handle).unwrap();
        fs.remove("/docs", "a.txt").unwrap();
        assert!(matches!(
            fs.lookup("/docs", "a.txt"),
            Err(FsError::NotFound(_))
        ));
    });
}

// ============================================================================
// Mount lifecycle
// ============================================================================

fn on_disk(dir: &TempDir) -> FsConfig {
    init_tracing();
    FsConfig::default()
        .with_mount_point(dir.path().join("mnt"))
        .with_store_dir(dir.path().join("store"))
}

#[test]
fn remount_never_reuses_inos() {
    let dir = tempfile::tempdir().unwrap();
    let config = FsConfig {
        ino_batch: 4,
        ..on_disk(&dir)
    };

    let mut seen = HashSet::new();
    for round in 0..3 {
        let mount = Mount::open(&config).unwrap();
        let root = mount.root();
        for i in 0..3 {
            let name = format!("r{round}-{i}");
            let made = root.mkdir(&name, 0, 0, 0).unwrap();
            assert!(seen.insert(made.ino()));
        }
        mount.close().unwrap();
    }

    let mount = Mount::open(&config).unwrap();
    let names: Vec<_> = mount
        .root()
        .readdir()
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(names.len(), 2 + 9);
    assert!(fsck(mount.engine()).unwrap().is_clean());
}

#[test]
fn remove_non_empty_directory_is_refused() {
    each_substrate(|fs| {
        fs.mkdir("/", "d", 0o755, 0, 0).unwrap();
        fs.mkdir("/d", "e", 0o755, 0, 0).unwrap();
        assert!(matches!(
            fs.remove("/", "d"),
            Err(FsError::DirectoryNotEmpty(_))
        ));
        assert_eq!(fs.readdir("/d").unwrap().len(), 1);
    });
}

#[test]
fn calls_after_close_fail() {
    let dir = tempfile::tempdir().unwrap();
    let mount = Mount::open(&on_disk(&dir)).unwrap();
    let root = mount.root();
    let (file, open) = root.create("f", 0, 0, 0).unwrap();
    mount.close().unwrap();

    assert!(matches!(root.lookup("f"), Err(FsError::Unmounted)));
    assert!(matches!(file.attr(), Err(FsError::Unmounted)));
    assert!(matches!(open.write(b"late"), Err(FsError::Unmounted)));
}

#[test]
fn stale_handle_does_not_reach_recreated_dir() {
    let dir = tempfile::tempdir().unwrap();
    let mount = Mount::open(&on_disk(&dir)).unwrap();
    let root = mount.root();

    let stale = root.mkdir("d", 0, 0, 0).unwrap();
    root.remove("d").unwrap();
    let fresh = root.mkdir("d", 0, 0, 0).unwrap();

    assert!(matches!(stale.mkdir("x", 0, 0, 0), Err(FsError::NotFound(_))));
    assert!(fresh.readdir().unwrap().iter().all(|e| e.name != "x"));
    assert_eq!(mount.dir("/d").unwrap().ino(), fresh.ino());
    assert!(fsck(mount.engine()).unwrap().is_clean());
}

#[test]
fn oversized_writes_fail_without_changing_content() {
    each_substrate(|fs| {
        let (ino, _, handle) = fs.create("/", "f", 0o644, 0, 0).unwrap();
        fs.write(&handle, b"abc").unwrap();

        for offset in [u64::MAX, u64::MAX - 1, 1 << 40] {
            assert!(matches!(
                fs.splice_write(&handle, offset, b"x"),
                Err(FsError::FileTooLarge(_))
            ));
        }
        assert!(matches!(
            fs.setattr(ino, &kvfs_kernel::SetAttr::new().with_size(u64::MAX)),
            Err(FsError::FileTooLarge(_))
        ));
        assert_eq!(fs.read(&handle).unwrap(), b"abc");
        assert_eq!(fs.getattr(ino).unwrap().size, 3);
    });
}
