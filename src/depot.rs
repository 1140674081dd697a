//! Per-depot-path revision bookkeeping (spec §4.6, §4.9 "Depot file
//! lifecycle"). Keyed by depot path rather than branch-local path, since
//! distinct branches map into disjoint depot subtrees via the path mapper and
//! therefore never collide on a single `DepotFileTable`.

use std::collections::HashMap;

use crate::error::{CoreError, Mark};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepotFileState {
    Absent,
    Live,
    Deleted,
}

/// The Perforce revision action recorded in `db.rev` for one emitted
/// revision (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevAction {
    Add,
    Branch,
    Edit,
    Integrate,
    Delete,
}

impl RevAction {
    /// The integer Perforce uses in `db.rev`'s action field.
    pub fn code(self) -> u32 {
        match self {
            RevAction::Add => 0,
            RevAction::Edit => 1,
            RevAction::Delete => 2,
            RevAction::Branch => 3,
            RevAction::Integrate => 4,
        }
    }
}

/// Where a depot file's content physically lives (spec §4.6 "librarian
/// pointer"). A depot file/rev either *is* the librarian home (it owns the
/// archive file) or points at an earlier one that is.
#[derive(Debug, Clone, Copy)]
pub struct LibrarianPointer {
    pub depot_file_id: u64,
    pub revision: u32,
}

#[derive(Debug, Clone)]
pub struct DepotFile {
    pub id: u64,
    pub depot_path: Vec<u8>,
    pub state: DepotFileState,
    pub head_revision: u32,
    pub base_file_type: String,
    /// Where this depot file's most recent content-bearing revision's bytes
    /// actually live. Carried forward by `delete`/`copy`/`branch` revisions
    /// that don't themselves introduce new content.
    pub last_home: Option<LibrarianPointer>,
}

#[derive(Debug, Default)]
pub struct DepotFileTable {
    by_path: HashMap<Vec<u8>, u64>,
    files: Vec<DepotFile>,
}

impl DepotFileTable {
    pub fn new() -> Self {
        DepotFileTable::default()
    }

    fn file_mut(&mut self, id: u64) -> &mut DepotFile {
        &mut self.files[id as usize]
    }

    pub fn file(&self, id: u64) -> &DepotFile {
        &self.files[id as usize]
    }

    pub fn lookup(&self, depot_path: &[u8]) -> Option<u64> {
        self.by_path.get(depot_path).copied()
    }

    /// Get the depot file id for `depot_path`, creating a fresh `Absent`
    /// entry on first sight.
    pub fn get_or_create(&mut self, depot_path: &[u8], base_file_type: &str) -> u64 {
        if let Some(&id) = self.by_path.get(depot_path) {
            return id;
        }
        let id = self.files.len() as u64;
        self.files.push(DepotFile {
            id,
            depot_path: depot_path.to_vec(),
            state: DepotFileState::Absent,
            head_revision: 0,
            base_file_type: base_file_type.to_string(),
            last_home: None,
        });
        self.by_path.insert(depot_path.to_vec(), id);
        id
    }

    pub fn last_home(&self, id: u64) -> Option<LibrarianPointer> {
        self.files[id as usize].last_home
    }

    pub fn set_last_home(&mut self, id: u64, home: LibrarianPointer) {
        self.files[id as usize].last_home = Some(home);
    }

    /// Record a new revision of `action` on `id`, enforcing the lifecycle
    /// state machine (spec §4.9). Returns the new revision number.
    pub fn record_revision(
        &mut self,
        id: u64,
        action: RevAction,
        mark: Mark,
    ) -> Result<u32, CoreError> {
        let file = self.file_mut(id);
        let next_state = match (file.state, action) {
            (DepotFileState::Absent, RevAction::Add)
            | (DepotFileState::Absent, RevAction::Branch)
            | (DepotFileState::Absent, RevAction::Integrate) => DepotFileState::Live,
            (DepotFileState::Deleted, RevAction::Add)
            | (DepotFileState::Deleted, RevAction::Branch)
            | (DepotFileState::Deleted, RevAction::Integrate) => DepotFileState::Live,
            (DepotFileState::Live, RevAction::Edit)
            | (DepotFileState::Live, RevAction::Branch)
            | (DepotFileState::Live, RevAction::Integrate) => DepotFileState::Live,
            (DepotFileState::Live, RevAction::Delete) => DepotFileState::Deleted,
            (state, action) => {
                return Err(CoreError::invariant(
                    mark,
                    format!(
                        "illegal depot file transition for {:?}: {:?} from state {:?}",
                        String::from_utf8_lossy(&file.depot_path),
                        action,
                        state
                    ),
                ));
            }
        };
        file.state = next_state;
        file.head_revision += 1;
        Ok(file.head_revision)
    }
}
