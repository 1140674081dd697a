//! Per-branch hierarchical index of currently-live paths (spec §4.2).
//!
//! A `BranchTree` is a trie over path components. Comparison is either
//! byte-exact or Unicode case-folded depending on `CasePolicy`; in the
//! case-insensitive policy, components are first run through
//! `unicode-normalization`'s NFC normalization so that differently-composed
//! (NFC vs NFD) but visually-identical names collapse to one entry, matching
//! `original_source/`'s observed behavior on cross-platform histories.

use std::collections::BTreeMap;

use unicode_normalization::UnicodeNormalization;

use crate::pathutil::{join_components, split_components};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasePolicy {
    Sensitive,
    Insensitive,
}

/// The key a trie level is indexed by: either the raw bytes, or a
/// normalized+case-folded projection of them, depending on policy.
fn fold_key(component: &[u8], policy: CasePolicy) -> Vec<u8> {
    match policy {
        CasePolicy::Sensitive => component.to_vec(),
        CasePolicy::Insensitive => {
            let s = String::from_utf8_lossy(component);
            let normalized: String = s.nfc().collect();
            normalized.to_lowercase().into_bytes()
        }
    }
}

/// Fold a whole path (not just one component) for case-insensitive
/// comparison outside the trie itself — used by the validator to compare two
/// full paths for "differs only in case".
pub fn fold_path(path: &[u8], policy: CasePolicy) -> Vec<u8> {
    fold_key(path, policy)
}

#[derive(Debug, Default)]
struct Node {
    /// Present iff this node corresponds to a live file.
    is_file: bool,
    /// folded component key -> (first-seen-case component bytes, child node)
    children: BTreeMap<Vec<u8>, (Vec<u8>, Node)>,
}

impl Node {
    fn new() -> Self {
        Node::default()
    }
}

/// Case-sensitivity-aware trie of live paths for one branch.
pub struct BranchTree {
    policy: CasePolicy,
    root: Node,
}

impl BranchTree {
    pub fn new(policy: CasePolicy) -> Self {
        BranchTree {
            policy,
            root: Node::new(),
        }
    }

    /// Deep-copy constructor used when bootstrapping a new branch from its
    /// parent's tree (spec §4.5 step 1).
    pub fn clone_from(parent: &BranchTree) -> Self {
        BranchTree {
            policy: parent.policy,
            root: clone_node(&parent.root),
        }
    }

    pub fn policy(&self) -> CasePolicy {
        self.policy
    }

    /// Idempotent: does nothing if `path` is already present under the
    /// active comparison policy.
    pub fn add(&mut self, path: &[u8]) {
        let comps = split_components(path);
        if comps.is_empty() {
            return;
        }
        let mut node = &mut self.root;
        for (i, comp) in comps.iter().enumerate() {
            let key = fold_key(comp, self.policy);
            let entry = node
                .children
                .entry(key)
                .or_insert_with(|| (comp.clone(), Node::new()));
            node = &mut entry.1;
            if i == comps.len() - 1 {
                node.is_file = true;
            }
        }
    }

    /// No-op if `path` is not present. Does not expand directories — the
    /// validator does that via `list`.
    pub fn delete(&mut self, path: &[u8]) {
        let comps = split_components(path);
        if comps.is_empty() {
            return;
        }
        delete_rec(&mut self.root, &comps, 0, self.policy);
    }

    /// True iff `file` names an exact live file (not a directory).
    pub fn find(&self, file: &[u8]) -> bool {
        let comps = split_components(file);
        if comps.is_empty() {
            return false;
        }
        let mut node = &self.root;
        for comp in &comps {
            let key = fold_key(comp, self.policy);
            match node.children.get(&key) {
                Some((_, child)) => node = child,
                None => return false,
            }
        }
        node.is_file
    }

    /// True iff `dir` has at least one live descendant file and is not
    /// itself a live file (used by the validator to decide directory vs.
    /// file actions).
    pub fn is_directory(&self, dir: &[u8]) -> bool {
        if dir.is_empty() {
            return !self.root.children.is_empty();
        }
        let comps = split_components(dir);
        let mut node = &self.root;
        for comp in &comps {
            let key = fold_key(comp, self.policy);
            match node.children.get(&key) {
                Some((_, child)) => node = child,
                None => return false,
            }
        }
        !node.is_file && !node.children.is_empty()
    }

    /// If `path` names a live file under the active comparison policy,
    /// return it rewritten with the first-seen casing stored in the trie
    /// (identity under `CasePolicy::Sensitive`, since the fold key is the raw
    /// bytes there). Used by the validator to keep a path's depot casing
    /// stable across commits even when later git actions reference it with
    /// different casing.
    pub fn canonical_case(&self, path: &[u8]) -> Option<Vec<u8>> {
        let comps = split_components(path);
        if comps.is_empty() {
            return None;
        }
        let mut node = &self.root;
        let mut out: Vec<Vec<u8>> = Vec::with_capacity(comps.len());
        for comp in &comps {
            let key = fold_key(comp, self.policy);
            match node.children.get(&key) {
                Some((orig, child)) => {
                    out.push(orig.clone());
                    node = child;
                }
                None => return None,
            }
        }
        if node.is_file {
            Some(join_components(&out))
        } else {
            None
        }
    }

    /// All live descendant file paths under `dir`, or all live paths when
    /// `dir` is empty. Returned paths use first-seen casing.
    pub fn list(&self, dir: &[u8]) -> Vec<Vec<u8>> {
        let comps = split_components(dir);
        let mut node = &self.root;
        let mut prefix: Vec<Vec<u8>> = Vec::new();
        for comp in &comps {
            let key = fold_key(comp, self.policy);
            match node.children.get(&key) {
                Some((orig, child)) => {
                    prefix.push(orig.clone());
                    node = child;
                }
                None => return Vec::new(),
            }
        }
        let mut out = Vec::new();
        collect(node, &mut prefix, &mut out);
        out
    }
}

fn collect(node: &Node, prefix: &mut Vec<Vec<u8>>, out: &mut Vec<Vec<u8>>) {
    if node.is_file {
        out.push(join_components(prefix));
    }
    for (_, (orig, child)) in node.children.iter() {
        prefix.push(orig.clone());
        collect(child, prefix, out);
        prefix.pop();
    }
}

fn clone_node(node: &Node) -> Node {
    let mut children = BTreeMap::new();
    for (k, (orig, child)) in node.children.iter() {
        children.insert(k.clone(), (orig.clone(), clone_node(child)));
    }
    Node {
        is_file: node.is_file,
        children,
    }
}

/// Returns true if, after deletion, `node` has no children and is not a
/// file itself (so the caller can prune the now-empty entry).
fn delete_rec(node: &mut Node, comps: &[Vec<u8>], idx: usize, policy: CasePolicy) -> bool {
    if idx == comps.len() {
        node.is_file = false;
        return node.children.is_empty();
    }
    let key = fold_key(&comps[idx], policy);
    let should_prune_child = if let Some((_, child)) = node.children.get_mut(&key) {
        delete_rec(child, comps, idx + 1, policy)
    } else {
        return false;
    };
    if should_prune_child {
        node.children.remove(&key);
    }
    !node.is_file && node.children.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_find_delete_roundtrip() {
        let mut t = BranchTree::new(CasePolicy::Sensitive);
        t.add(b"src/a.txt");
        assert!(t.find(b"src/a.txt"));
        assert!(!t.find(b"src"));
        assert!(t.is_directory(b"src"));
        t.delete(b"src/a.txt");
        assert!(!t.find(b"src/a.txt"));
    }

    #[test]
    fn add_is_idempotent() {
        let mut t = BranchTree::new(CasePolicy::Sensitive);
        t.add(b"a.txt");
        t.add(b"a.txt");
        assert_eq!(t.list(b""), vec![b"a.txt".to_vec()]);
    }

    #[test]
    fn delete_missing_is_noop() {
        let mut t = BranchTree::new(CasePolicy::Sensitive);
        t.add(b"a.txt");
        t.delete(b"nonexistent.txt");
        assert!(t.find(b"a.txt"));
    }

    #[test]
    fn list_returns_descendants_with_first_seen_case() {
        let mut t = BranchTree::new(CasePolicy::Sensitive);
        t.add(b"Src/A.txt");
        t.add(b"Src/b.txt");
        let mut files = t.list(b"Src");
        files.sort();
        assert_eq!(files, vec![b"Src/A.txt".to_vec(), b"Src/b.txt".to_vec()]);
    }

    #[test]
    fn list_empty_dir_returns_all_live_paths() {
        let mut t = BranchTree::new(CasePolicy::Sensitive);
        t.add(b"a.txt");
        t.add(b"dir/b.txt");
        let mut all = t.list(b"");
        all.sort();
        assert_eq!(all, vec![b"a.txt".to_vec(), b"dir/b.txt".to_vec()]);
    }

    #[test]
    fn case_insensitive_folds_and_preserves_first_seen_case() {
        let mut t = BranchTree::new(CasePolicy::Insensitive);
        t.add(b"File.txt");
        assert!(t.find(b"FILE.txt"));
        assert!(t.find(b"file.txt"));
        assert_eq!(t.list(b""), vec![b"File.txt".to_vec()]);
    }

    #[test]
    fn case_insensitive_delete_matches_different_casing() {
        let mut t = BranchTree::new(CasePolicy::Insensitive);
        t.add(b"src/File.txt");
        t.delete(b"SRC/file.TXT");
        assert!(!t.find(b"src/File.txt"));
    }

    #[test]
    fn clone_from_produces_independent_snapshot() {
        let mut parent = BranchTree::new(CasePolicy::Sensitive);
        parent.add(b"a.txt");
        let mut child = BranchTree::clone_from(&parent);
        child.add(b"b.txt");
        assert!(parent.find(b"a.txt"));
        assert!(!parent.find(b"b.txt"));
        assert!(child.find(b"a.txt"));
        assert!(child.find(b"b.txt"));
    }

    #[test]
    fn canonical_case_returns_first_seen_casing() {
        let mut t = BranchTree::new(CasePolicy::Insensitive);
        t.add(b"Src/File.txt");
        assert_eq!(
            t.canonical_case(b"SRC/file.TXT"),
            Some(b"Src/File.txt".to_vec())
        );
        assert_eq!(t.canonical_case(b"Src/Other.txt"), None);
    }

    #[test]
    fn is_directory_false_for_file_and_missing_path() {
        let mut t = BranchTree::new(CasePolicy::Sensitive);
        t.add(b"a.txt");
        assert!(!t.is_directory(b"a.txt"));
        assert!(!t.is_directory(b"missing"));
    }
}
