//! Subtree-wide archive and restore.
//!
//! The synchronous half of each operation patches only the target record.
//! The descendant walk in [`propagate`] runs later, off the caller's path,
//! and re-reads children from the table at every step.

use std::collections::HashSet;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{DocError, DocResult};
use crate::query::owned;
use crate::storage::{Document, DocumentPatch, DocumentTable};

pub const DEFAULT_MAX_DEPTH: usize = 1024;

/// Which flag value a propagation writes to the subtree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum SubtreeChange {
    Archive,
    Restore,
}

impl SubtreeChange {
    pub fn archived(self) -> bool {
        matches!(self, SubtreeChange::Archive)
    }

    pub(crate) fn as_u8(self) -> u8 {
        match self {
            SubtreeChange::Archive => 1,
            SubtreeChange::Restore => 2,
        }
    }

    pub(crate) fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(SubtreeChange::Archive),
            2 => Some(SubtreeChange::Restore),
            _ => None,
        }
    }
}

/// Outcome of a subtree walk.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PropagationReport {
    /// Descendants reached, the root excluded.
    pub visited: usize,
    /// Descendants whose flag actually changed.
    pub patched: usize,
    /// Children skipped because they sit below the depth bound.
    pub truncated: usize,
    /// The root no longer carried the flag this job writes, so nothing was
    /// walked.
    pub superseded: bool,
}

/// Result of the synchronous half of a restore.
#[derive(Clone, Debug)]
pub struct Restored {
    pub document: Document,
    /// Whether the parent reference was cleared because the parent is archived.
    pub detached: bool,
}

pub fn archive_root(table: &mut DocumentTable, id: Uuid, user: &str) -> DocResult<Document> {
    owned(table, id, user)?;
    table
        .patch(id, DocumentPatch::archived(true))?
        .ok_or(DocError::NotFound(id))
}

pub fn restore_root(table: &mut DocumentTable, id: Uuid, user: &str) -> DocResult<Restored> {
    let parent = owned(table, id, user)?.parent_document;
    let detached = parent
        .and_then(|pid| table.get(pid))
        .map_or(false, |p| p.is_archived);

    let mut patch = DocumentPatch::archived(false);
    if detached {
        patch.parent_document = Some(None);
    }
    let document = table.patch(id, patch)?.ok_or(DocError::NotFound(id))?;
    Ok(Restored { document, detached })
}

/// Walk the descendants of `root` owned by `user` and set their archive flag.
///
/// Depth-first with an explicit stack. A parent is always patched before its
/// children are expanded; sibling order follows the index and carries no
/// meaning. Ids already seen are skipped so a hand-edited cycle terminates,
/// and nothing deeper than `max_depth` below the root is touched.
pub async fn propagate(
    table: &RwLock<DocumentTable>,
    user: &str,
    root: Uuid,
    change: SubtreeChange,
    max_depth: usize,
) -> DocResult<PropagationReport> {
    let flag = change.archived();
    let mut report = PropagationReport::default();
    let mut seen = HashSet::from([root]);
    let mut stack = vec![(root, 0usize)];

    while let Some((id, depth)) = stack.pop() {
        let children: Vec<(Uuid, bool)> = {
            let table = table.read().await;
            table
                .by_user_parent(user, Some(id))
                .iter()
                .map(|d| (d.id, d.is_archived))
                .collect()
        };

        for (child, current) in children {
            if !seen.insert(child) {
                continue;
            }
            if depth + 1 > max_depth {
                report.truncated += 1;
                continue;
            }
            report.visited += 1;
            if current != flag {
                let mut table = table.write().await;
                if let Some(doc) = table.patch(child, DocumentPatch::archived(flag))? {
                    if doc.is_archived == flag {
                        report.patched += 1;
                    }
                }
            }
            stack.push((child, depth + 1));
        }
    }

    if report.truncated > 0 {
        warn!(%root, truncated = report.truncated, max_depth, "subtree deeper than bound, propagation truncated");
    }
    debug!(%root, ?change, visited = report.visited, patched = report.patched, "subtree propagated");
    Ok(report)
}
