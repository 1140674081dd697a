//! Translates `(branch, gitPath)` pairs into depot paths (spec §4.4).
//!
//! Depot paths have the shape `//<importDepot>/[<importPath>/]<mappedBranch>/<gitPath>`.
//! `<mappedBranch>` is `<prefix><branchName>` from the first matching entry
//! in the ordered `branchMappings` list, or the bare branch name if nothing
//! matches. Wildcard characters in the git path are percent-escaped last, so
//! the escape sequences themselves are never re-folded by the case policy.

use crate::opts::CompiledBranchMapping;
use crate::pathutil::percent_escape_wildcards;

/// First-match-wins lookup of a branch's depot-path prefix.
fn mapped_branch_name(branch: &str, mappings: &[CompiledBranchMapping]) -> String {
    for m in mappings {
        if m.regex.is_match(branch.as_bytes()) {
            return format!("{}{}", m.prefix, branch);
        }
    }
    branch.to_string()
}

/// Build the depot path for a file on `branch`, as it appears in the
/// journal text (original case preserved regardless of case policy).
pub fn to_depot_path(
    import_depot: &str,
    import_path: Option<&str>,
    branch: &str,
    git_path: &[u8],
    mappings: &[CompiledBranchMapping],
) -> Vec<u8> {
    let mapped_branch = mapped_branch_name(branch, mappings);
    let mut out = Vec::new();
    out.push(b'/');
    out.push(b'/');
    out.extend_from_slice(import_depot.as_bytes());
    out.push(b'/');
    if let Some(p) = import_path {
        if !p.is_empty() {
            out.extend_from_slice(p.as_bytes());
            out.push(b'/');
        }
    }
    out.extend_from_slice(mapped_branch.as_bytes());
    out.push(b'/');
    out.extend_from_slice(&percent_escape_wildcards(git_path));
    out
}

/// The path used to key archive tree storage. Under case-insensitive mode
/// this is lowercased so two depot paths differing only in case land on the
/// same archive file; the journal itself always keeps `to_depot_path`'s
/// original-case text.
pub fn archive_key(depot_path: &[u8], case_insensitive: bool) -> Vec<u8> {
    if !case_insensitive {
        return depot_path.to_vec();
    }
    String::from_utf8_lossy(depot_path)
        .to_lowercase()
        .into_bytes()
}
