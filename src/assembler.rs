//! Turns one commit's canonical actions into depot revisions, integration
//! edges, and archive-write jobs (spec §4.6). The depot-file-revision map and
//! blob store are shared, process-wide handles passed in explicitly (spec §9
//! "Global state" — no ambient singletons); this module only mutates them
//! inside the sequential front half.

use std::collections::HashMap;

use crate::blob_store::{BlobStore, LibrarianHome};
use crate::depot::{DepotFileTable, LibrarianPointer, RevAction};
use crate::error::{CoreError, CoreResult, Mark};
use crate::opts::CompiledBranchMapping;
use crate::path_mapper;
use crate::stream::BlobRef;
use crate::validator::CanonicalAction;

/// Why an integration edge exists (spec §4.6, §4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegKind {
    Branch,
    Merge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeDirection {
    Forward,
    Reverse,
}

#[derive(Debug, Clone)]
pub struct IntegrationEdge {
    pub from_depot_file: u64,
    pub from_rev: u32,
    pub to_depot_file: u64,
    pub to_rev: u32,
    pub kind: IntegKind,
    pub direction: EdgeDirection,
}

fn push_edge_pair(
    edges: &mut Vec<IntegrationEdge>,
    from: (u64, u32),
    to: (u64, u32),
    kind: IntegKind,
) {
    edges.push(IntegrationEdge {
        from_depot_file: from.0,
        from_rev: from.1,
        to_depot_file: to.0,
        to_rev: to.1,
        kind,
        direction: EdgeDirection::Forward,
    });
    edges.push(IntegrationEdge {
        from_depot_file: to.0,
        from_rev: to.1,
        to_depot_file: from.0,
        to_rev: from.1,
        kind,
        direction: EdgeDirection::Reverse,
    });
}

#[derive(Debug, Clone)]
pub struct AssembledRevision {
    pub depot_file_id: u64,
    pub depot_path: Vec<u8>,
    pub revision: u32,
    pub action: RevAction,
    pub file_type: String,
    pub lbr: LibrarianPointer,
    pub compress: bool,
}

#[derive(Debug, Clone)]
pub struct ArchiveJob {
    pub depot_path: Vec<u8>,
    pub revision: u32,
    pub change_no: u32,
    pub blob_mark: u32,
    pub compress: bool,
}

#[derive(Debug, Default)]
pub struct AssembleOutput {
    pub revisions: Vec<AssembledRevision>,
    pub integration_edges: Vec<IntegrationEdge>,
    pub archive_jobs: Vec<ArchiveJob>,
}

/// Per-branch map from branch-local path to the depot file/revision last
/// emitted for it. Mirrors the branch tree's bootstrap-on-first-sight
/// semantics (spec §4.5 step 1), kept here since it carries revision numbers
/// the tree itself doesn't track.
#[derive(Default)]
pub struct BranchHeads {
    heads: HashMap<String, HashMap<Vec<u8>, (u64, u32)>>,
}

impl BranchHeads {
    pub fn new() -> Self {
        BranchHeads::default()
    }

    pub fn ensure_branch(&mut self, branch: &str, parent: Option<&str>) {
        if self.heads.contains_key(branch) {
            return;
        }
        let cloned = parent
            .and_then(|p| self.heads.get(p))
            .cloned()
            .unwrap_or_default();
        self.heads.insert(branch.to_string(), cloned);
    }

    pub fn get(&self, branch: &str, path: &[u8]) -> Option<(u64, u32)> {
        self.heads.get(branch).and_then(|m| m.get(path)).copied()
    }

    pub fn set(&mut self, branch: &str, path: Vec<u8>, value: (u64, u32)) {
        self.heads.entry(branch.to_string()).or_default().insert(path, value);
    }

    pub fn remove(&mut self, branch: &str, path: &[u8]) {
        if let Some(m) = self.heads.get_mut(branch) {
            m.remove(path);
        }
    }
}

fn blob_mark(blob: &BlobRef, mark: Mark) -> CoreResult<u32> {
    match blob {
        BlobRef::Mark(m) => Ok(*m),
        BlobRef::Inline(_) => Err(CoreError::invariant(
            mark,
            "inline blob reached the assembler unnormalized",
        )),
    }
}

#[allow(clippy::too_many_arguments)]
pub fn assemble_commit(
    depot_table: &mut DepotFileTable,
    blob_store: &mut BlobStore,
    branch_heads: &mut BranchHeads,
    import_depot: &str,
    import_path: Option<&str>,
    branch: &str,
    mappings: &[CompiledBranchMapping],
    actions: &[CanonicalAction],
    merge_branches: &[String],
    change_no: u32,
    mark: Mark,
) -> CoreResult<AssembleOutput> {
    let mut out = AssembleOutput::default();
    let mut touched: Vec<(Vec<u8>, u64, u32)> = Vec::new();

    for action in actions {
        match action {
            CanonicalAction::Modify { path, blob, .. } => {
                let depot_path =
                    path_mapper::to_depot_path(import_depot, import_path, branch, path, mappings);
                let m = blob_mark(blob, mark)?;
                let info = blob_store
                    .get(m)
                    .ok_or_else(|| CoreError::invariant(mark, "blob mark not staged"))?;
                let file_type = info.classification.p4_filetype().to_string();
                let id = depot_table.get_or_create(&depot_path, &file_type);
                let rev_action = if branch_heads.get(branch, path).is_none() {
                    RevAction::Add
                } else {
                    RevAction::Edit
                };
                let revision = depot_table.record_revision(id, rev_action, mark)?;
                let claimed = blob_store.claim_home(
                    m,
                    LibrarianHome {
                        depot_file_id: id,
                        revision,
                    },
                );
                let home = blob_store
                    .home(m)
                    .ok_or_else(|| CoreError::invariant(mark, "blob home missing after claim"))?;
                let lbr = LibrarianPointer {
                    depot_file_id: home.depot_file_id,
                    revision: home.revision,
                };
                depot_table.set_last_home(id, lbr);
                if claimed {
                    out.archive_jobs.push(ArchiveJob {
                        depot_path: depot_path.clone(),
                        revision,
                        change_no,
                        blob_mark: m,
                        compress: info.classification.compressible(),
                    });
                }
                out.revisions.push(AssembledRevision {
                    depot_file_id: id,
                    depot_path,
                    revision,
                    action: rev_action,
                    file_type,
                    lbr,
                    compress: info.classification.compressible(),
                });
                branch_heads.set(branch, path.clone(), (id, revision));
                touched.push((path.clone(), id, revision));
            }
            CanonicalAction::Delete { path } => {
                let depot_path =
                    path_mapper::to_depot_path(import_depot, import_path, branch, path, mappings);
                let id = depot_table.lookup(&depot_path).ok_or_else(|| {
                    CoreError::invariant(mark, "deleting a depot file never created")
                })?;
                let revision = depot_table.record_revision(id, RevAction::Delete, mark)?;
                let lbr = depot_table
                    .last_home(id)
                    .ok_or_else(|| CoreError::invariant(mark, "delete with no prior content"))?;
                out.revisions.push(AssembledRevision {
                    depot_file_id: id,
                    depot_path,
                    revision,
                    action: RevAction::Delete,
                    file_type: depot_table.file(id).base_file_type.clone(),
                    lbr,
                    compress: false,
                });
                branch_heads.remove(branch, path);
            }
            CanonicalAction::Copy { src, dst } => {
                let (src_id, src_rev) = match branch_heads.get(branch, src) {
                    Some(h) => h,
                    None => continue, // dangling copy source: ignorable (spec §3 clarification)
                };
                let dst_depot_path =
                    path_mapper::to_depot_path(import_depot, import_path, branch, dst, mappings);
                let file_type = depot_table.file(src_id).base_file_type.clone();
                let dst_id = depot_table.get_or_create(&dst_depot_path, &file_type);
                let rev_action = if branch_heads.get(branch, dst).is_none() {
                    RevAction::Branch
                } else {
                    RevAction::Integrate
                };
                let revision = depot_table.record_revision(dst_id, rev_action, mark)?;
                let lbr = depot_table.last_home(src_id).ok_or_else(|| {
                    CoreError::invariant(mark, "copy source has no librarian home")
                })?;
                depot_table.set_last_home(dst_id, lbr);
                out.revisions.push(AssembledRevision {
                    depot_file_id: dst_id,
                    depot_path: dst_depot_path,
                    revision,
                    action: rev_action,
                    file_type,
                    lbr,
                    compress: false,
                });
                branch_heads.set(branch, dst.clone(), (dst_id, revision));
                touched.push((dst.clone(), dst_id, revision));
                push_edge_pair(&mut out.integration_edges, (src_id, src_rev), (dst_id, revision), IntegKind::Branch);
            }
            CanonicalAction::Rename {
                src,
                dst,
                dirty_content,
                is_pseudo,
                ..
            } => {
                let (src_id, src_rev) = branch_heads.get(branch, src).ok_or_else(|| {
                    CoreError::invariant(mark, "rename source missing from branch heads")
                })?;
                let src_lbr = depot_table
                    .last_home(src_id)
                    .ok_or_else(|| CoreError::invariant(mark, "rename source with no content"))?;

                // A pseudo-rename's source stays live in the tree (a same-commit
                // modify recreated it), so it is not deleted here either.
                if !*is_pseudo {
                    let src_depot_path = path_mapper::to_depot_path(
                        import_depot, import_path, branch, src, mappings,
                    );
                    let del_rev = depot_table.record_revision(src_id, RevAction::Delete, mark)?;
                    out.revisions.push(AssembledRevision {
                        depot_file_id: src_id,
                        depot_path: src_depot_path,
                        revision: del_rev,
                        action: RevAction::Delete,
                        file_type: depot_table.file(src_id).base_file_type.clone(),
                        lbr: src_lbr,
                        compress: false,
                    });
                    branch_heads.remove(branch, src);
                }

                let dst_depot_path =
                    path_mapper::to_depot_path(import_depot, import_path, branch, dst, mappings);
                let (file_type, new_blob_mark) = match dirty_content {
                    Some((_, blob)) => {
                        let m = blob_mark(blob, mark)?;
                        let info = blob_store
                            .get(m)
                            .ok_or_else(|| CoreError::invariant(mark, "dirty rename blob not staged"))?;
                        (info.classification.p4_filetype().to_string(), Some(m))
                    }
                    None => (depot_table.file(src_id).base_file_type.clone(), None),
                };
                let dst_id = depot_table.get_or_create(&dst_depot_path, &file_type);
                let rev_action = if branch_heads.get(branch, dst).is_none() {
                    RevAction::Branch
                } else {
                    RevAction::Integrate
                };
                let revision = depot_table.record_revision(dst_id, rev_action, mark)?;
                let lbr = if let Some(m) = new_blob_mark {
                    let claimed = blob_store.claim_home(
                        m,
                        LibrarianHome {
                            depot_file_id: dst_id,
                            revision,
                        },
                    );
                    let home = blob_store.home(m).ok_or_else(|| {
                        CoreError::invariant(mark, "dirty rename blob home missing after claim")
                    })?;
                    let lbr = LibrarianPointer {
                        depot_file_id: home.depot_file_id,
                        revision: home.revision,
                    };
                    if claimed {
                        out.archive_jobs.push(ArchiveJob {
                            depot_path: dst_depot_path.clone(),
                            revision,
                            change_no,
                            blob_mark: m,
                            compress: blob_store.get(m).unwrap().classification.compressible(),
                        });
                    }
                    lbr
                } else {
                    src_lbr
                };
                depot_table.set_last_home(dst_id, lbr);
                out.revisions.push(AssembledRevision {
                    depot_file_id: dst_id,
                    depot_path: dst_depot_path,
                    revision,
                    action: rev_action,
                    file_type,
                    lbr,
                    compress: false,
                });
                branch_heads.set(branch, dst.clone(), (dst_id, revision));
                touched.push((dst.clone(), dst_id, revision));
                push_edge_pair(&mut out.integration_edges, (src_id, src_rev), (dst_id, revision), IntegKind::Branch);
            }
        }
    }

    // Merge integration edges: for every file this commit explicitly
    // touched, if a merge-parent branch has a differing revision of that
    // same path, emit a cross-branch integrate edge (spec §4.6, §9 — the
    // "heuristic" merge detection note: only explicitly-mentioned files).
    for merge_branch in merge_branches {
        for (path, this_id, this_rev) in &touched {
            if let Some((other_id, other_rev)) = branch_heads.get(merge_branch, path) {
                if other_id != *this_id || other_rev != *this_rev {
                    push_edge_pair(
                        &mut out.integration_edges,
                        (other_id, other_rev),
                        (*this_id, *this_rev),
                        IntegKind::Merge,
                    );
                }
            }
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob_store::Classification;
    use crate::stream::FileMode;

    fn stage(blob_store: &mut BlobStore, mark: u32, size: u64) {
        blob_store.stage(mark, Classification::TextC, size);
    }

    fn modify(path: &[u8], mark: u32) -> CanonicalAction {
        CanonicalAction::Modify {
            path: path.to_vec(),
            mode: FileMode::Regular,
            blob: BlobRef::Mark(mark),
        }
    }

    #[test]
    fn add_then_edit_assigns_sequential_revisions() {
        let mut depot = DepotFileTable::new();
        let mut blobs = BlobStore::new();
        let mut heads = BranchHeads::new();
        heads.ensure_branch("main", None);
        stage(&mut blobs, 1, 3);
        let out1 = assemble_commit(
            &mut depot,
            &mut blobs,
            &mut heads,
            "import",
            None,
            "main",
            &[],
            &[modify(b"src.txt", 1)],
            &[],
            1,
            None,
        )
        .unwrap();
        assert_eq!(out1.revisions.len(), 1);
        assert_eq!(out1.revisions[0].revision, 1);
        assert_eq!(out1.revisions[0].action, RevAction::Add);
        assert_eq!(out1.archive_jobs.len(), 1);

        stage(&mut blobs, 2, 5);
        let out2 = assemble_commit(
            &mut depot,
            &mut blobs,
            &mut heads,
            "import",
            None,
            "main",
            &[],
            &[modify(b"src.txt", 2)],
            &[],
            2,
            None,
        )
        .unwrap();
        assert_eq!(out2.revisions[0].revision, 2);
        assert_eq!(out2.revisions[0].action, RevAction::Edit);
    }

    #[test]
    fn rename_emits_delete_and_branch_with_integration_edge() {
        let mut depot = DepotFileTable::new();
        let mut blobs = BlobStore::new();
        let mut heads = BranchHeads::new();
        heads.ensure_branch("main", None);
        stage(&mut blobs, 1, 3);
        assemble_commit(
            &mut depot,
            &mut blobs,
            &mut heads,
            "import",
            None,
            "main",
            &[],
            &[modify(b"file1.txt", 1)],
            &[],
            1,
            None,
        )
        .unwrap();

        let rename = CanonicalAction::Rename {
            src: b"file1.txt".to_vec(),
            dst: b"file2.txt".to_vec(),
            is_dirty: false,
            is_pseudo: false,
            is_source_double: false,
            dirty_content: None,
        };
        let out = assemble_commit(
            &mut depot,
            &mut blobs,
            &mut heads,
            "import",
            None,
            "main",
            &[],
            &[rename],
            &[],
            2,
            None,
        )
        .unwrap();
        assert_eq!(out.revisions.len(), 2);
        assert_eq!(out.revisions[0].action, RevAction::Delete);
        assert_eq!(out.revisions[1].action, RevAction::Branch);
        assert_eq!(out.integration_edges.len(), 2);
        assert_eq!(out.archive_jobs.len(), 0); // no new content written, blob reused
    }

    #[test]
    fn pseudo_rename_keeps_source_live_and_branches_destination() {
        let mut depot = DepotFileTable::new();
        let mut blobs = BlobStore::new();
        let mut heads = BranchHeads::new();
        heads.ensure_branch("main", None);
        stage(&mut blobs, 1, 3);
        assemble_commit(
            &mut depot,
            &mut blobs,
            &mut heads,
            "import",
            None,
            "main",
            &[],
            &[modify(b"file1.txt", 1)],
            &[],
            1,
            None,
        )
        .unwrap();

        stage(&mut blobs, 2, 5);
        let rename = CanonicalAction::Rename {
            src: b"file1.txt".to_vec(),
            dst: b"file2.txt".to_vec(),
            is_dirty: false,
            is_pseudo: true,
            is_source_double: false,
            dirty_content: None,
        };
        let out = assemble_commit(
            &mut depot,
            &mut blobs,
            &mut heads,
            "import",
            None,
            "main",
            &[],
            &[rename, modify(b"file1.txt", 2)],
            &[],
            2,
            None,
        )
        .unwrap();

        // No Delete for the source: only the destination's Branch and the
        // source's Edit (from the companion Modify action) are emitted.
        assert!(!out.revisions.iter().any(|r| r.action == RevAction::Delete));
        assert_eq!(out.revisions.len(), 2);
        assert_eq!(out.revisions[0].action, RevAction::Branch);
        assert_eq!(out.revisions[1].action, RevAction::Edit);
        assert!(heads.get("main", b"file1.txt").is_some());
    }

    #[test]
    fn merge_touching_same_path_emits_integration_edge() {
        let mut depot = DepotFileTable::new();
        let mut blobs = BlobStore::new();
        let mut heads = BranchHeads::new();
        heads.ensure_branch("main", None);
        stage(&mut blobs, 1, 3);
        assemble_commit(
            &mut depot,
            &mut blobs,
            &mut heads,
            "import",
            None,
            "main",
            &[],
            &[modify(b"a.txt", 1)],
            &[],
            1,
            None,
        )
        .unwrap();
        heads.ensure_branch("dev", Some("main"));
        stage(&mut blobs, 2, 4);
        let out = assemble_commit(
            &mut depot,
            &mut blobs,
            &mut heads,
            "import",
            None,
            "dev",
            &[],
            &[modify(b"a.txt", 2)],
            &["main".to_string()],
            2,
            None,
        )
        .unwrap();
        assert!(!out.integration_edges.is_empty());
    }
}
