//! Reconciles one commit's raw file-actions against its branch tree into a
//! canonical, file-granularity action list (spec §4.5 — "the hard part").
//!
//! Runs in three passes mirroring the spec's numbered procedure:
//! directory expansion, same-commit override collapsing, and a final
//! sequential resolve that classifies renames as dirty/pseudo/dangling and
//! decides case-folded casing. The branch tree itself is only mutated at the
//! very end (`apply_to_tree`) — everything upstream reads it immutably and
//! tracks its own commit-local overlay of what has changed so far.

use std::collections::{HashMap, HashSet};

use crate::branch_tree::{self, BranchTree, CasePolicy};
use crate::commit::RawFileAction;
use crate::error::{CoreError, CoreResult, Mark};
use crate::pathutil::{join_components, split_components};
use crate::stream::{BlobRef, FileMode};

#[derive(Debug, Clone)]
pub enum CanonicalAction {
    Modify {
        path: Vec<u8>,
        mode: FileMode,
        blob: BlobRef,
    },
    Delete {
        path: Vec<u8>,
    },
    Copy {
        src: Vec<u8>,
        dst: Vec<u8>,
    },
    Rename {
        src: Vec<u8>,
        dst: Vec<u8>,
        is_dirty: bool,
        is_pseudo: bool,
        /// This rename's destination was pulled into a later directory
        /// rename's target and rewritten accordingly (spec §4.5 step 3,
        /// "source-double") — its original destination never existed.
        is_source_double: bool,
        /// For a dirty rename: the modify's own (mode, blob) that replaces
        /// the source's content on the destination.
        dirty_content: Option<(FileMode, BlobRef)>,
    },
}

#[derive(Debug, Clone)]
enum ExpandedAction {
    Modify {
        path: Vec<u8>,
        mode: FileMode,
        blob: BlobRef,
    },
    Delete {
        path: Vec<u8>,
    },
    Copy {
        src: Vec<u8>,
        dst: Vec<u8>,
    },
    Rename {
        src: Vec<u8>,
        dst: Vec<u8>,
        is_source_double: bool,
    },
}

fn rebase_suffix(old_root: &[u8], new_root: &[u8], full_path: &[u8]) -> Vec<u8> {
    let old_comps = split_components(old_root);
    let full_comps = split_components(full_path);
    let suffix = &full_comps[old_comps.len().min(full_comps.len())..];
    let mut new_comps = split_components(new_root);
    new_comps.extend_from_slice(suffix);
    join_components(&new_comps)
}

/// Step 2: expand directory-denoting raw actions into one action per live
/// descendant, using the tree exactly as it stood before this commit.
fn expand_directories(
    tree: &BranchTree,
    raw_actions: &[RawFileAction],
    mark: Mark,
) -> CoreResult<Vec<ExpandedAction>> {
    let mut out = Vec::with_capacity(raw_actions.len());
    for action in raw_actions {
        match action {
            RawFileAction::Modify { path, mode, blob } => {
                if path.is_empty() {
                    return Err(CoreError::validation(mark, "modify with empty path"));
                }
                out.push(ExpandedAction::Modify {
                    path: path.clone(),
                    mode: *mode,
                    blob: blob.clone(),
                });
            }
            RawFileAction::Delete { path } => {
                if path.is_empty() {
                    return Err(CoreError::validation(mark, "delete with empty path"));
                }
                if tree.find(path) {
                    out.push(ExpandedAction::Delete { path: path.clone() });
                } else if tree.is_directory(path) {
                    for descendant in tree.list(path) {
                        out.push(ExpandedAction::Delete { path: descendant });
                    }
                }
                // else: deleting a path that doesn't exist at all — ignorable.
            }
            RawFileAction::Rename { src, dst } => {
                if src.is_empty() || dst.is_empty() {
                    return Err(CoreError::validation(mark, "rename with empty path"));
                }
                if tree.find(src) {
                    out.push(ExpandedAction::Rename {
                        src: src.clone(),
                        dst: dst.clone(),
                        is_source_double: false,
                    });
                } else if tree.is_directory(src) {
                    for descendant in tree.list(src) {
                        let new_dst = rebase_suffix(src, dst, &descendant);
                        out.push(ExpandedAction::Rename {
                            src: descendant,
                            dst: new_dst,
                            is_source_double: false,
                        });
                    }
                    // empty directory: action vanishes silently.
                } else {
                    // Not currently live at all; might become live earlier
                    // in this same commit (a chained rename), or might be a
                    // directory rename whose "directory" was itself only
                    // just created this commit by an earlier file rename —
                    // resolved by `pull_directory_rename_destinations` below.
                    out.push(ExpandedAction::Rename {
                        src: src.clone(),
                        dst: dst.clone(),
                        is_source_double: false,
                    });
                }
            }
            RawFileAction::Copy { src, dst } => {
                if src.is_empty() || dst.is_empty() {
                    return Err(CoreError::validation(mark, "copy with empty path"));
                }
                if tree.find(src) {
                    out.push(ExpandedAction::Copy {
                        src: src.clone(),
                        dst: dst.clone(),
                    });
                } else if tree.is_directory(src) {
                    for descendant in tree.list(src) {
                        let new_dst = rebase_suffix(src, dst, &descendant);
                        out.push(ExpandedAction::Copy {
                            src: descendant,
                            dst: new_dst,
                        });
                    }
                } else {
                    out.push(ExpandedAction::Copy {
                        src: src.clone(),
                        dst: dst.clone(),
                    });
                }
            }
        }
    }
    Ok(out)
}

fn group_key(action: &ExpandedAction, policy: CasePolicy) -> Vec<u8> {
    let path = match action {
        ExpandedAction::Modify { path, .. } => path,
        ExpandedAction::Delete { path } => path,
        ExpandedAction::Copy { dst, .. } => dst,
        ExpandedAction::Rename { dst, .. } => dst,
    };
    branch_tree::fold_path(path, policy)
}

/// True iff `dir` is a strict directory-prefix of `path` under `policy`'s
/// comparison rules (component-wise, so `old` prefixes `old/a.txt` but not
/// `oldx/a.txt`).
fn is_dir_prefix(dir: &[u8], path: &[u8], policy: CasePolicy) -> bool {
    let dir_comps = split_components(dir);
    let path_comps = split_components(path);
    if dir_comps.is_empty() || path_comps.len() <= dir_comps.len() {
        return false;
    }
    dir_comps
        .iter()
        .zip(path_comps.iter())
        .all(|(a, b)| branch_tree::fold_path(a, policy) == branch_tree::fold_path(b, policy))
}

/// Step 3, first bullet: a later directory rename whose source is a
/// directory-prefix of an earlier file rename's destination pulls that
/// destination along — rewritten in place to land under the new directory —
/// instead of being treated as a dangling rename with a missing source. The
/// pulled-along earlier rename is marked `is_source_double`; the directory
/// rename itself is consumed (it has nothing left to expand on its own,
/// since a directory that doesn't exist in the pre-commit tree can only
/// have come from an earlier same-commit rename).
fn pull_directory_rename_destinations(expanded: Vec<ExpandedAction>, policy: CasePolicy) -> Vec<ExpandedAction> {
    let mut actions = expanded;
    let mut consumed = vec![false; actions.len()];
    for i in 0..actions.len() {
        let (src, dst) = match &actions[i] {
            ExpandedAction::Rename { src, dst, .. } => (src.clone(), dst.clone()),
            _ => continue,
        };
        let mut pulled_any = false;
        for j in 0..i {
            if consumed[j] {
                continue;
            }
            if let ExpandedAction::Rename {
                dst: earlier_dst,
                is_source_double,
                ..
            } = &mut actions[j]
            {
                if is_dir_prefix(&src, earlier_dst, policy) {
                    *earlier_dst = rebase_suffix(&src, &dst, earlier_dst);
                    *is_source_double = true;
                    pulled_any = true;
                }
            }
        }
        if pulled_any {
            consumed[i] = true;
        }
    }
    actions
        .into_iter()
        .enumerate()
        .filter(|(i, _)| !consumed[*i])
        .map(|(_, a)| a)
        .collect()
}

/// Step 3a: collapse same-target touches so only the chronologically last
/// survives per path — this alone implements "modify then delete collapses
/// to delete", "delete then modify collapses to modify", and "a delete
/// later re-created cancels the delete". Also harvests, for every surviving
/// Rename, any dropped Modify that shared its destination key (the dirty
/// rename's content donor).
fn collapse_same_target(
    expanded: Vec<ExpandedAction>,
    policy: CasePolicy,
) -> (Vec<ExpandedAction>, HashMap<usize, (FileMode, BlobRef)>) {
    let mut last_index_for_key: HashMap<Vec<u8>, usize> = HashMap::new();
    for (i, a) in expanded.iter().enumerate() {
        last_index_for_key.insert(group_key(a, policy), i);
    }
    let mut winner_is_rename: HashSet<Vec<u8>> = HashSet::new();
    for (i, a) in expanded.iter().enumerate() {
        let k = group_key(a, policy);
        if last_index_for_key.get(&k) == Some(&i) && matches!(a, ExpandedAction::Rename { .. }) {
            winner_is_rename.insert(k);
        }
    }
    let mut donors: HashMap<Vec<u8>, (FileMode, BlobRef)> = HashMap::new();
    let mut kept: Vec<ExpandedAction> = Vec::with_capacity(expanded.len());
    for (i, a) in expanded.into_iter().enumerate() {
        let k = group_key(&a, policy);
        let is_winner = last_index_for_key.get(&k) == Some(&i);
        if is_winner {
            kept.push(a);
        } else if let ExpandedAction::Modify { mode, blob, .. } = &a {
            if winner_is_rename.contains(&k) {
                donors.insert(k, (*mode, blob.clone()));
            }
        }
    }
    let mut donor_by_index = HashMap::new();
    for (i, a) in kept.iter().enumerate() {
        if let ExpandedAction::Rename { dst, .. } = a {
            let k = branch_tree::fold_path(dst, policy);
            if let Some(d) = donors.get(&k) {
                donor_by_index.insert(i, d.clone());
            }
        }
    }
    (kept, donor_by_index)
}

/// Resolve a path reference to the casing already established for it
/// (either earlier this commit, or in the tree from before this commit). In
/// case-sensitive mode this is always a no-op identity.
fn resolve_casing(
    tree: &BranchTree,
    overlay_casing: &mut HashMap<Vec<u8>, Vec<u8>>,
    raw: &[u8],
    policy: CasePolicy,
) -> Vec<u8> {
    if policy == CasePolicy::Sensitive {
        return raw.to_vec();
    }
    let fold = branch_tree::fold_path(raw, policy);
    if let Some(existing) = overlay_casing.get(&fold) {
        return existing.clone();
    }
    let chosen = tree.canonical_case(raw).unwrap_or_else(|| raw.to_vec());
    overlay_casing.insert(fold, chosen.clone());
    chosen
}

fn record_casing(overlay_casing: &mut HashMap<Vec<u8>, Vec<u8>>, path: &[u8], policy: CasePolicy) {
    let fold = branch_tree::fold_path(path, policy);
    overlay_casing.insert(fold, path.to_vec());
}

/// Steps 3b-3c + the tie-break rules for renames: dangling-source discard,
/// pseudo/dirty classification, and the case-insensitive differs-only-by-case
/// rule.
fn resolve(
    tree: &BranchTree,
    kept: Vec<ExpandedAction>,
    donor_by_index: HashMap<usize, (FileMode, BlobRef)>,
    policy: CasePolicy,
) -> Vec<CanonicalAction> {
    let modified_keys: HashSet<Vec<u8>> = kept
        .iter()
        .filter_map(|a| match a {
            ExpandedAction::Modify { path, .. } => Some(branch_tree::fold_path(path, policy)),
            _ => None,
        })
        .collect();

    let mut live_added: HashSet<Vec<u8>> = HashSet::new();
    let mut live_removed: HashSet<Vec<u8>> = HashSet::new();
    let mut overlay_casing: HashMap<Vec<u8>, Vec<u8>> = HashMap::new();
    let mut out = Vec::with_capacity(kept.len());

    let is_live = |path: &[u8], added: &HashSet<Vec<u8>>, removed: &HashSet<Vec<u8>>| -> bool {
        let fold = branch_tree::fold_path(path, policy);
        if added.contains(&fold) {
            true
        } else if removed.contains(&fold) {
            false
        } else {
            tree.find(path)
        }
    };

    for (i, action) in kept.into_iter().enumerate() {
        match action {
            ExpandedAction::Modify { path, mode, blob } => {
                let resolved = resolve_casing(tree, &mut overlay_casing, &path, policy);
                let fold = branch_tree::fold_path(&resolved, policy);
                live_added.insert(fold.clone());
                live_removed.remove(&fold);
                out.push(CanonicalAction::Modify {
                    path: resolved,
                    mode,
                    blob,
                });
            }
            ExpandedAction::Delete { path } => {
                let resolved = resolve_casing(tree, &mut overlay_casing, &path, policy);
                let fold = branch_tree::fold_path(&resolved, policy);
                live_removed.insert(fold.clone());
                live_added.remove(&fold);
                out.push(CanonicalAction::Delete { path: resolved });
            }
            ExpandedAction::Copy { src, dst } => {
                if !is_live(&src, &live_added, &live_removed) {
                    continue;
                }
                let resolved_src = resolve_casing(tree, &mut overlay_casing, &src, policy);
                record_casing(&mut overlay_casing, &dst, policy);
                let fold_dst = branch_tree::fold_path(&dst, policy);
                live_added.insert(fold_dst.clone());
                live_removed.remove(&fold_dst);
                out.push(CanonicalAction::Copy {
                    src: resolved_src,
                    dst,
                });
            }
            ExpandedAction::Rename { src, dst, is_source_double } => {
                let fold_src = branch_tree::fold_path(&src, policy);
                let fold_dst = branch_tree::fold_path(&dst, policy);
                if policy == CasePolicy::Insensitive && fold_src == fold_dst {
                    if let Some((mode, blob)) = donor_by_index.get(&i).cloned() {
                        record_casing(&mut overlay_casing, &dst, policy);
                        live_added.insert(fold_dst.clone());
                        live_removed.remove(&fold_dst);
                        out.push(CanonicalAction::Modify {
                            path: dst,
                            mode,
                            blob,
                        });
                    }
                    // else: pure case-rename with no companion modify — discarded.
                    continue;
                }
                if !is_live(&src, &live_added, &live_removed) {
                    continue; // dangling rename source — ignorable.
                }
                let resolved_src = resolve_casing(tree, &mut overlay_casing, &src, policy);
                record_casing(&mut overlay_casing, &dst, policy);
                live_removed.insert(fold_src);
                live_added.insert(fold_dst.clone());
                live_removed.remove(&fold_dst);
                let is_pseudo = modified_keys.contains(&branch_tree::fold_path(&src, policy));
                let dirty_content = donor_by_index.get(&i).cloned();
                out.push(CanonicalAction::Rename {
                    src: resolved_src,
                    dst,
                    is_dirty: dirty_content.is_some(),
                    is_pseudo,
                    is_source_double,
                    dirty_content,
                });
            }
        }
    }
    out
}

/// Step 4: apply the canonical action list to the branch tree.
fn apply_to_tree(tree: &mut BranchTree, actions: &[CanonicalAction]) {
    for action in actions {
        match action {
            CanonicalAction::Modify { path, .. } => tree.add(path),
            CanonicalAction::Delete { path } => tree.delete(path),
            CanonicalAction::Copy { dst, .. } => tree.add(dst),
            CanonicalAction::Rename { src, dst, is_pseudo, .. } => {
                if !*is_pseudo {
                    tree.delete(src);
                }
                tree.add(dst);
            }
        }
    }
}

/// Run the full validator procedure for one commit's raw actions against
/// `tree`, mutating `tree` to reflect the commit's canonical effect.
pub fn validate_commit(
    tree: &mut BranchTree,
    raw_actions: &[RawFileAction],
    mark: Mark,
) -> CoreResult<Vec<CanonicalAction>> {
    let policy = tree.policy();
    let expanded = expand_directories(tree, raw_actions, mark)?;
    let expanded = pull_directory_rename_destinations(expanded, policy);
    let (kept, donors) = collapse_same_target(expanded, policy);
    let canonical = resolve(tree, kept, donors, policy);
    apply_to_tree(tree, &canonical);
    Ok(canonical)
}
