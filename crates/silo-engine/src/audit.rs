use std::collections::BTreeSet;

use serde::Serialize;
use silo_blob::BlobStore;
use silo_records::{LockScope, RecordResult, Transaction};
use silo_types::{FileId, FileReference, Standing};
use tracing::{debug, info, warn};

use crate::engine::Silo;
use crate::error::EngineResult;

/// Findings of one consistency audit. Every finding was repaired.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AuditReport {
    /// Files flagged canonical although a reference names them as a duplicate.
    pub demoted_referenced: usize,
    /// Extra canonical files in a hash group that already had one.
    pub collapsed_canonicals: usize,
    /// References that were re-pointed or removed because they were invalid
    /// or redundant.
    pub repaired_references: usize,
    /// Unreferenced duplicates attached to their group's canonical.
    pub orphans_attached: usize,
    /// Unreferenced duplicates promoted because their group had no canonical.
    pub orphans_promoted: usize,
    pub fixed_count: usize,
    pub current_duplicate_count: usize,
    pub current_reference_count: usize,
}

impl<B: BlobStore> Silo<B> {
    /// Find and repair every invariant violation in one exclusive
    /// transaction.
    ///
    /// Safe to call at any time and idempotent: a second run immediately
    /// after the first reports `fixed_count == 0`. This is the health check
    /// ops tooling invokes; nothing runs it implicitly.
    pub fn audit_consistency(&self) -> EngineResult<AuditReport> {
        let mut tx = self.records.begin(LockScope::Exclusive)?;
        let mut report = repair(&mut tx)?;
        report.current_duplicate_count = tx.files().iter().filter(|f| !f.is_canonical()).count();
        report.current_reference_count = tx.references().len();
        tx.commit()?;

        if report.fixed_count > 0 {
            info!(
                fixed = report.fixed_count,
                demoted = report.demoted_referenced,
                collapsed = report.collapsed_canonicals,
                references = report.repaired_references,
                attached = report.orphans_attached,
                promoted = report.orphans_promoted,
                "consistency audit repaired records"
            );
        } else {
            debug!("consistency audit found nothing to repair");
        }
        Ok(report)
    }
}

/// Passes run in a fixed order; each sees the effect of the ones before.
fn repair(tx: &mut Transaction<'_>) -> RecordResult<AuditReport> {
    let mut report = AuditReport {
        demoted_referenced: demote_referenced(tx)?,
        collapsed_canonicals: collapse_canonicals(tx)?,
        repaired_references: repair_references(tx)?,
        ..AuditReport::default()
    };
    let (attached, promoted) = adopt_orphans(tx)?;
    report.orphans_attached = attached;
    report.orphans_promoted = promoted;
    report.fixed_count = report.demoted_referenced
        + report.collapsed_canonicals
        + report.repaired_references
        + attached
        + promoted;
    Ok(report)
}

/// A reference is authoritative about its duplicate end.
fn demote_referenced(tx: &mut Transaction<'_>) -> RecordResult<usize> {
    let targets: BTreeSet<FileId> = tx
        .references()
        .iter()
        .map(|r| r.duplicate)
        .filter(|id| tx.file(id).is_some_and(|f| f.is_canonical()))
        .collect();
    for id in &targets {
        warn!(file = %id, "canonical file is the duplicate end of a reference; demoting");
        tx.set_standing(*id, Standing::Duplicate)?;
    }
    Ok(targets.len())
}

/// Keep the earliest canonical per hash group.
fn collapse_canonicals(tx: &mut Transaction<'_>) -> RecordResult<usize> {
    let mut collapsed = 0;
    for hash in tx.hashes() {
        let extra: Vec<FileId> = tx.canonicals(&hash).iter().skip(1).map(|f| f.id).collect();
        for id in extra {
            warn!(file = %id, %hash, "second canonical in hash group; demoting");
            tx.set_standing(id, Standing::Duplicate)?;
            collapsed += 1;
        }
    }
    Ok(collapsed)
}

/// Leave every duplicate with at most one reference, and that one pointing
/// at the canonical of its own hash group.
fn repair_references(tx: &mut Transaction<'_>) -> RecordResult<usize> {
    let mut seen = BTreeSet::new();
    let duplicates: Vec<FileId> = tx
        .references()
        .iter()
        .map(|r| r.duplicate)
        .filter(|id| seen.insert(*id))
        .collect();

    let mut repaired = 0;
    for dup_id in duplicates {
        let Some(hash) = tx.file(&dup_id).map(|f| *f.content_hash()) else {
            continue;
        };
        let edges: Vec<FileReference> = tx.references_from(&dup_id).into_iter().cloned().collect();
        let keep = edges.iter().position(|r| {
            r.canonical != dup_id
                && tx
                    .file(&r.canonical)
                    .is_some_and(|c| c.is_canonical() && *c.content_hash() == hash)
        });
        let group_canonical = tx
            .canonicals(&hash)
            .first()
            .map(|f| f.id)
            .filter(|id| *id != dup_id);

        let kept = match (keep, group_canonical) {
            (Some(index), _) => Some(index),
            (None, Some(target)) => {
                warn!(file = %dup_id, canonical = %target, "re-pointing dangling reference");
                tx.repoint_reference(edges[0].id, target)?;
                repaired += 1;
                Some(0)
            }
            (None, None) => None,
        };
        for (index, edge) in edges.iter().enumerate() {
            if Some(index) != kept {
                warn!(reference = %edge.id, file = %dup_id, "removing invalid reference");
                tx.delete_reference(edge.id)?;
                repaired += 1;
            }
        }
    }
    Ok(repaired)
}

/// Unreferenced duplicates, earliest first. Each one sees the effect of the
/// previous: the first orphan of a group without a canonical is promoted and
/// the rest attach to it.
fn adopt_orphans(tx: &mut Transaction<'_>) -> RecordResult<(usize, usize)> {
    let orphans: Vec<FileId> = tx
        .files()
        .iter()
        .filter(|f| !f.is_canonical() && tx.references_from(&f.id).is_empty())
        .map(|f| f.id)
        .collect();

    let (mut attached, mut promoted) = (0, 0);
    for id in orphans {
        let Some(hash) = tx.file(&id).map(|f| *f.content_hash()) else {
            continue;
        };
        match tx.canonicals(&hash).first().map(|f| f.id) {
            Some(canonical) => {
                warn!(file = %id, %canonical, "attaching orphaned duplicate");
                let edge = FileReference::new(canonical, id, tx.next_anchor()?)?;
                tx.insert_reference(edge)?;
                attached += 1;
            }
            None => {
                warn!(file = %id, "orphaned duplicate has no canonical; promoting");
                tx.set_standing(id, Standing::Canonical)?;
                promoted += 1;
            }
        }
    }
    Ok((attached, promoted))
}
