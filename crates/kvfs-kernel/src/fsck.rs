//! Read-only consistency check.
//!
//! Walks the tree from the root through child listings, then sweeps every
//! record family for entries the walk never reached.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::engine::Filesystem;
use crate::error::FsResult;
use crate::path::{self, ROOT};
use crate::types::Ino;

/// One disagreement between records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FsckIssue {
    /// A listed name with no binding.
    DanglingListing { dir: String, name: String },
    /// A binding whose identifier has no attribute record.
    MissingAttributes { path: String, ino: Ino },
    /// A binding not listed under its parent.
    UnlistedBinding { path: String, ino: Ino },
    /// An attribute record no binding points at.
    OrphanAttributes { ino: Ino },
    /// A content blob with no attribute record.
    OrphanContent { ino: Ino },
    /// A listing stored under a path that is not a reachable directory.
    OrphanListing { dir: String },
    /// Records of the wrong family for the object's kind.
    KindMismatch { path: String, ino: Ino, detail: String },
}

impl fmt::Display for FsckIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FsckIssue::DanglingListing { dir, name } => {
                write!(f, "{dir}: lists {name:?} but it has no binding")
            }
            FsckIssue::MissingAttributes { path, ino } => {
                write!(f, "{path}: bound to {ino} which has no attributes")
            }
            FsckIssue::UnlistedBinding { path, ino } => {
                write!(f, "{path}: bound to {ino} but not listed in its parent")
            }
            FsckIssue::OrphanAttributes { ino } => write!(f, "ino {ino}: attributes not reachable"),
            FsckIssue::OrphanContent { ino } => write!(f, "ino {ino}: content without attributes"),
            FsckIssue::OrphanListing { dir } => write!(f, "{dir}: listing for a non-directory"),
            FsckIssue::KindMismatch { path, ino, detail } => write!(f, "{path} ({ino}): {detail}"),
        }
    }
}

/// Result of a check.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FsckReport {
    /// Disagreements found, in discovery order.
    pub issues: Vec<FsckIssue>,
    /// Reachable directories, root included.
    pub dirs: usize,
    /// Reachable regular files.
    pub files: usize,
}

impl FsckReport {
    /// Returns true when no issue was found.
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Check every record family of `fs` against the tree.
#[tracing::instrument(name = "fs.fsck", level = "debug", skip(fs))]
pub fn fsck(fs: &Filesystem) -> FsResult<FsckReport> {
    let ns = fs.namespace();
    let attrs = fs.attrs();
    let mut report = FsckReport {
        dirs: 1,
        ..Default::default()
    };

    let mut reached_paths: HashSet<String> = HashSet::new();
    let mut reached_dirs: HashSet<String> = HashSet::from([ROOT.to_string()]);
    let mut reached_inos: HashMap<Ino, String> = HashMap::new();
    let mut pending = vec![ROOT.to_string()];

    while let Some(dir) = pending.pop() {
        for name in ns.list_children(&dir)? {
            let child = path::join(&dir, &name);
            let Some(ino) = ns.resolve(&child)? else {
                report.issues.push(FsckIssue::DanglingListing {
                    dir: dir.clone(),
                    name,
                });
                continue;
            };
            reached_paths.insert(child.clone());
            reached_inos.insert(ino, child.clone());

            let Some(attr) = attrs.find(ino)? else {
                report.issues.push(FsckIssue::MissingAttributes { path: child, ino });
                continue;
            };
            if attr.is_dir() {
                report.dirs += 1;
                reached_dirs.insert(child.clone());
                pending.push(child);
            } else {
                report.files += 1;
            }
        }
    }

    for (path, ino) in ns.all_bindings()? {
        if !reached_paths.contains(&path) {
            report.issues.push(FsckIssue::UnlistedBinding { path, ino });
        }
    }

    let mut known: HashSet<Ino> = HashSet::new();
    for attr in attrs.all()? {
        known.insert(attr.ino);
        let Some(path) = reached_inos.get(&attr.ino) else {
            report.issues.push(FsckIssue::OrphanAttributes { ino: attr.ino });
            continue;
        };
        if attr.is_dir() && fs.content().find(attr.ino)?.is_some() {
            report.issues.push(FsckIssue::KindMismatch {
                path: path.clone(),
                ino: attr.ino,
                detail: "directory has a content blob".to_string(),
            });
        }
    }

    for (ino, _) in fs.content().all()? {
        if !known.contains(&ino) {
            report.issues.push(FsckIssue::OrphanContent { ino });
        }
    }

    for (dir, _) in ns.all_listings()? {
        if reached_dirs.contains(&dir) {
            continue;
        }
        match ns.resolve(&dir)?.map(|ino| attrs.find(ino)).transpose()?.flatten() {
            Some(attr) if reached_paths.contains(&dir) => {
                report.issues.push(FsckIssue::KindMismatch {
                    path: dir,
                    ino: attr.ino,
                    detail: "regular file has a child listing".to_string(),
                });
            }
            _ => report.issues.push(FsckIssue::OrphanListing { dir }),
        }
    }

    if report.is_clean() {
        tracing::debug!(dirs = report.dirs, files = report.files, "fsck clean");
    } else {
        tracing::warn!(issues = report.issues.len(), "fsck found inconsistencies");
    }
    Ok(report)
}
