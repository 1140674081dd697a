//! Buffers one commit's raw file-actions between `CommitStart` and the
//! implicit `CommitEnd` the stream reader synthesizes (spec §3 "Commit").
//! Mirrors the teacher's `commit_buf`/`commit_has_changes` bookkeeping, but
//! accumulates typed actions instead of re-serialized stream bytes, since
//! here the buffered commit feeds the validator rather than a fast-import
//! pass-through.

use std::io::BufRead;

use crate::error::CoreResult;
use crate::stream::{BlobRef, Command, CommitHeader, FileMode, Identity, StreamReader};

#[derive(Debug, Clone)]
pub enum RawFileAction {
    Modify {
        path: Vec<u8>,
        mode: FileMode,
        blob: BlobRef,
    },
    Delete {
        path: Vec<u8>,
    },
    Rename {
        src: Vec<u8>,
        dst: Vec<u8>,
    },
    Copy {
        src: Vec<u8>,
        dst: Vec<u8>,
    },
}

#[derive(Debug, Clone)]
pub struct Commit {
    pub mark: Option<u32>,
    pub branch: String,
    pub parent: Option<u32>,
    pub merges: Vec<u32>,
    pub author: Identity,
    pub message: Vec<u8>,
    pub actions: Vec<RawFileAction>,
}

impl From<CommitHeader> for Commit {
    fn from(h: CommitHeader) -> Self {
        Commit {
            mark: h.mark,
            branch: h.branch,
            parent: h.from,
            merges: h.merges,
            author: h.author,
            message: h.message,
            actions: Vec::new(),
        }
    }
}

/// Pull `header`'s body (file actions) from `reader` up to and including the
/// synthesized `CommitEnd`.
pub fn collect_commit<R: BufRead>(
    reader: &mut StreamReader<R>,
    header: CommitHeader,
) -> CoreResult<Commit> {
    let mut commit = Commit::from(header);
    loop {
        match reader.next_command()? {
            Some(Command::FileModify { path, mode, blob }) => {
                commit.actions.push(RawFileAction::Modify { path, mode, blob });
            }
            Some(Command::FileDelete { path }) => {
                commit.actions.push(RawFileAction::Delete { path });
            }
            Some(Command::FileRename { src, dst }) => {
                commit.actions.push(RawFileAction::Rename { src, dst });
            }
            Some(Command::FileCopy { src, dst }) => {
                commit.actions.push(RawFileAction::Copy { src, dst });
            }
            Some(Command::CommitEnd) | None => break,
            Some(other) => {
                return Err(crate::error::CoreError::invariant(
                    commit.mark,
                    format!("unexpected command while buffering commit body: {other:?}"),
                ));
            }
        }
    }
    Ok(commit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn collects_actions_until_commit_end() {
        let header = CommitHeader {
            mark: Some(1),
            branch: "main".to_string(),
            from: None,
            merges: Vec::new(),
            author: Identity {
                name: "A".to_string(),
                email: "a@b.com".to_string(),
                time: 1,
            },
            message: Vec::new(),
        };
        let mut reader = StreamReader::new(
            Cursor::new(b"M 100644 :1 a.txt\nD b.txt\ndone\n".to_vec()),
            1024,
            "main",
        );
        let commit = collect_commit(&mut reader, header).unwrap();
        assert_eq!(commit.actions.len(), 2);
        assert!(matches!(commit.actions[0], RawFileAction::Modify { .. }));
        assert!(matches!(commit.actions[1], RawFileAction::Delete { .. }));
    }
}
