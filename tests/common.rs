//! Fixture builder for synthetic fast-export streams plus small helpers for
//! reading back the journal/archive tree a test run produced. No teacher
//! `tests/common.rs` survives the transformation (its helpers shell out to
//! `git`, which this crate never does), so this is authored fresh in the
//! style of the teacher's per-suite `common.rs` modules: plain functions, no
//! framework, real temp directories.

#![allow(dead_code)]

use std::io::Cursor;
use std::path::PathBuf;

use gitp4_migrate::opts::{CompiledConfig, Config};
use gitp4_migrate::report::RunSummary;

/// Appends fast-export stream bytes line by line.
#[derive(Default)]
pub struct StreamBuilder {
    buf: Vec<u8>,
}

impl StreamBuilder {
    pub fn new() -> Self {
        StreamBuilder::default()
    }

    pub fn blob(mut self, mark: u32, content: &[u8]) -> Self {
        self.buf
            .extend_from_slice(format!("blob\nmark :{mark}\ndata {}\n", content.len()).as_bytes());
        self.buf.extend_from_slice(content);
        self
    }

    /// Start a commit header. Call `.modify`/`.delete`/`.rename`/`.copy` to
    /// append its body, then `.finish_commit()` (or just let the next
    /// top-level call close it implicitly, as the real stream does).
    pub fn commit(
        mut self,
        mark: u32,
        branch: &str,
        from: Option<u32>,
        merges: &[u32],
        message: &str,
    ) -> Self {
        self.buf
            .extend_from_slice(format!("commit refs/heads/{branch}\nmark :{mark}\n").as_bytes());
        self.buf.extend_from_slice(
            format!("committer Test User <test@example.com> {} +0000\n", 1_700_000_000 + mark as i64)
                .as_bytes(),
        );
        if let Some(f) = from {
            self.buf.extend_from_slice(format!("from :{f}\n").as_bytes());
        }
        for m in merges {
            self.buf.extend_from_slice(format!("merge :{m}\n").as_bytes());
        }
        self.buf
            .extend_from_slice(format!("data {}\n{message}", message.len()).as_bytes());
        self
    }

    pub fn modify(mut self, path: &str, mark: u32) -> Self {
        self.buf
            .extend_from_slice(format!("M 100644 :{mark} {path}\n").as_bytes());
        self
    }

    pub fn delete(mut self, path: &str) -> Self {
        self.buf.extend_from_slice(format!("D {path}\n").as_bytes());
        self
    }

    pub fn rename(mut self, src: &str, dst: &str) -> Self {
        self.buf
            .extend_from_slice(format!("R {src} {dst}\n").as_bytes());
        self
    }

    pub fn copy(mut self, src: &str, dst: &str) -> Self {
        self.buf
            .extend_from_slice(format!("C {src} {dst}\n").as_bytes());
        self
    }

    pub fn done(mut self) -> Vec<u8> {
        self.buf.extend_from_slice(b"done\n");
        self.buf
    }
}

pub struct Harness {
    pub dir: tempfile::TempDir,
    pub cfg: CompiledConfig,
}

impl Harness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.archive_root = dir.path().join("archive");
        config.journal_path = dir.path().join("journal.txt");
        config.quiet = true;
        Harness {
            cfg: config.compile().unwrap(),
            dir,
        }
    }

    pub fn case_insensitive() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.archive_root = dir.path().join("archive");
        config.journal_path = dir.path().join("journal.txt");
        config.quiet = true;
        config.case_insensitive = true;
        Harness {
            cfg: config.compile().unwrap(),
            dir,
        }
    }

    pub fn run(&self, stream: Vec<u8>) -> RunSummary {
        gitp4_migrate::run(&self.cfg, Cursor::new(stream)).unwrap()
    }

    pub fn journal_text(&self) -> String {
        std::fs::read_to_string(&self.cfg.config.journal_path).unwrap()
    }

    pub fn archive_path(&self, depot_path: &[u8], change_no: u32, compress: bool) -> PathBuf {
        let bucket = gitp4_migrate::path_mapper::archive_key(depot_path, self.cfg.config.case_insensitive);
        gitp4_migrate::archive::librarian_path(&self.cfg.config.archive_root, &bucket, change_no, compress)
    }
}

/// Count occurrences of `needle` as a whole journal field (`@needle@`) in
/// `haystack`, used to count `db.rev`/`db.integed` records for a given path.
pub fn count_field(haystack: &str, needle: &str) -> usize {
    haystack.matches(&format!("@{needle}@")).count()
}
