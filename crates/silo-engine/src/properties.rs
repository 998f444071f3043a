//! Property tests over random operation sequences.

use std::collections::HashMap;

use proptest::prelude::*;
use silo_blob::{BlobStore, InMemoryBlobStore};
use silo_records::RecordTable;
use silo_types::ContentHash;

use crate::engine::Silo;
use crate::error::EngineError;
use crate::testing::ingest_bytes;

/// A small content alphabet forces frequent hash collisions.
const CONTENTS: [&[u8]; 4] = [b"", b"AAAA", b"BBBB", b"a longer payload"];

#[derive(Clone, Debug)]
enum Op {
    Ingest(usize),
    Delete { pick: usize, confirm: bool },
    Audit,
    Rebuild,
    Purge,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        6 => (0..CONTENTS.len()).prop_map(Op::Ingest),
        3 => (any::<usize>(), any::<bool>()).prop_map(|(pick, confirm)| Op::Delete { pick, confirm }),
        1 => Just(Op::Audit),
        1 => Just(Op::Rebuild),
        1 => Just(Op::Purge),
    ]
}

fn run(silo: &Silo<InMemoryBlobStore>, op: &Op) {
    match op {
        Op::Ingest(i) => {
            ingest_bytes(silo, CONTENTS[*i], "f");
        }
        Op::Delete { pick, confirm } => {
            let files = silo.files().unwrap();
            if files.is_empty() {
                return;
            }
            let id = files[pick % files.len()].id;
            match silo.delete(&id, *confirm) {
                Ok(_) | Err(EngineError::ConflictRequiresConfirmation { .. }) => {}
                Err(e) => panic!("delete failed: {e}"),
            }
        }
        Op::Audit => {
            silo.audit_consistency().unwrap();
        }
        Op::Rebuild => {
            silo.rebuild_all().unwrap();
        }
        Op::Purge => {
            silo.purge_duplicates(false).unwrap();
        }
    }
}

/// Violations of the record invariants, empty when the table is sound.
pub(crate) fn violations(table: &RecordTable) -> Vec<String> {
    let mut found = Vec::new();

    let mut canonicals: HashMap<ContentHash, usize> = HashMap::new();
    for file in table.files().into_iter().filter(|f| f.is_canonical()) {
        *canonicals.entry(*file.content_hash()).or_default() += 1;
    }
    for (hash, count) in canonicals.into_iter().filter(|(_, n)| *n > 1) {
        found.push(format!("{hash}: {count} canonical files"));
    }

    for file in table.files().into_iter().filter(|f| !f.is_canonical()) {
        let refs = table.references_from(&file.id);
        if refs.len() != 1 {
            found.push(format!("duplicate {} has {} references", file.id, refs.len()));
            continue;
        }
        match table.file(&refs[0].canonical) {
            Some(target)
                if target.is_canonical() && target.content_hash() == file.content_hash() => {}
            _ => found.push(format!("duplicate {} points at a bad target", file.id)),
        }
    }

    for reference in table.references() {
        if reference.canonical == reference.duplicate {
            found.push(format!("reference {} is a self reference", reference.id));
        }
    }
    found
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn invariants_hold_after_every_operation(ops in prop::collection::vec(op(), 1..40)) {
        let silo = Silo::in_memory();
        for op in &ops {
            run(&silo, op);
            let table = silo.records().snapshot().unwrap();
            let problems = violations(&table);
            prop_assert!(problems.is_empty(), "after {:?}: {:?}", op, problems);

            for file in table.files() {
                prop_assert!(silo.blobs().exists(&file.location).unwrap());
            }
            prop_assert_eq!(silo.blobs().len(), table.hashes().len());
        }
        prop_assert_eq!(silo.audit_consistency().unwrap().fixed_count, 0);
    }

    #[test]
    fn audit_is_idempotent_after_rebuild(ops in prop::collection::vec(op(), 0..30)) {
        let silo = Silo::in_memory();
        for op in &ops {
            run(&silo, op);
        }
        silo.rebuild_all().unwrap();
        prop_assert_eq!(silo.audit_consistency().unwrap().fixed_count, 0);
        prop_assert_eq!(silo.audit_consistency().unwrap().fixed_count, 0);
    }

    #[test]
    fn same_content_n_times_has_one_canonical(n in 1usize..12) {
        let silo = Silo::in_memory();
        let outcomes: Vec<_> = (0..n).map(|_| ingest_bytes(&silo, b"same", "s")).collect();
        let canonical = outcomes[0].file.id;
        prop_assert!(!outcomes[0].is_duplicate);
        for outcome in &outcomes[1..] {
            prop_assert_eq!(outcome.canonical_id, Some(canonical));
        }
        let stats = silo.storage_stats().unwrap();
        prop_assert_eq!(stats.canonical_count, 1);
        prop_assert_eq!(stats.duplicate_count, n - 1);
    }
}
