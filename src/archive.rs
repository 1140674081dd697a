//! Writes blob content into the on-disk archive tree (spec §4.7). The
//! sequential front half only ever produces `(archivePath, bytes, compress)`
//! jobs and dispatches them to a bounded `rayon::ThreadPool`; this module
//! owns that pool and the actual file I/O (spec §5).

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc;

use flate2::write::GzEncoder;
use flate2::Compression;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::error::CoreError;
use crate::pathutil::percent_escape_wildcards;

/// A fixed placeholder written instead of real content when `dummyArchives`
/// is set (spec §4.7, §6 — scale-test mode). Never compressed: there is
/// nothing to gain and it keeps scale-test output trivially diffable.
const DUMMY_ARCHIVE_BYTE: u8 = b'.';

/// Build the on-disk librarian path for a depot file revision:
/// `<root>/<depotPathMinusLeadingSlashes>,d/1.<changeNo>[.gz]`.
pub fn librarian_path(root: &Path, depot_path: &[u8], change_no: u32, compress: bool) -> PathBuf {
    let trimmed = depot_path
        .iter()
        .skip_while(|&&b| b == b'/')
        .copied()
        .collect::<Vec<u8>>();
    let escaped = percent_escape_wildcards(&trimmed);
    let rel = String::from_utf8_lossy(&escaped).into_owned();
    let file_name = if compress {
        format!("1.{change_no}.gz")
    } else {
        format!("1.{change_no}")
    };
    root.join(format!("{rel},d")).join(file_name)
}

fn write_one(path: &Path, bytes: &[u8], compress: bool) -> Result<(), CoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    if compress {
        let file = fs::File::create(path)?;
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder.write_all(bytes)?;
        encoder.finish()?;
    } else {
        fs::write(path, bytes)?;
    }
    Ok(())
}

/// One dispatched write: the fully-resolved on-disk path plus the bytes (or
/// dummy placeholder) to write.
pub struct WriteJob {
    pub path: PathBuf,
    pub bytes: Vec<u8>,
    pub compress: bool,
}

/// Owns the bounded worker pool archive writes are dispatched to. The
/// sequential front half calls `dispatch` per job and `drain` once per run
/// (spec §5: "on shutdown the writer pool is drained before the journal file
/// is closed").
pub struct ArchiveWriter {
    pool: ThreadPool,
    sender: mpsc::Sender<Result<(), CoreError>>,
    receiver: mpsc::Receiver<Result<(), CoreError>>,
    dispatched: usize,
}

impl ArchiveWriter {
    pub fn new(parallel_threads: usize) -> Result<Self, CoreError> {
        let mut builder = ThreadPoolBuilder::new();
        if parallel_threads > 0 {
            builder = builder.num_threads(parallel_threads);
        }
        let pool = builder
            .build()
            .map_err(|e| CoreError::config(format!("failed to build archive writer pool: {e}")))?;
        let (sender, receiver) = mpsc::channel();
        Ok(ArchiveWriter {
            pool,
            sender,
            receiver,
            dispatched: 0,
        })
    }

    /// Dispatch one job. Does not block for completion — callers await all
    /// outstanding jobs via `drain` before treating the run as done.
    pub fn dispatch(&mut self, job: WriteJob) {
        let sender = self.sender.clone();
        self.dispatched += 1;
        self.pool.spawn(move || {
            let result = write_one(&job.path, &job.bytes, job.compress);
            let _ = sender.send(result);
        });
    }

    /// Block until every dispatched job has reported back, surfacing the
    /// first error encountered (if any). Subsequent jobs may still be
    /// dispatched afterward; the counter resets.
    pub fn drain(&mut self) -> Result<(), CoreError> {
        let mut first_err = None;
        for _ in 0..self.dispatched {
            if let Ok(result) = self.receiver.recv() {
                if first_err.is_none() {
                    if let Err(e) = result {
                        first_err = Some(e);
                    }
                }
            }
        }
        self.dispatched = 0;
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Build the bytes to actually write for one archive job: the real blob
/// content, or the fixed dummy placeholder under `dummyArchives`.
pub fn job_bytes(real_bytes: &[u8], dummy_archives: bool) -> Vec<u8> {
    if dummy_archives {
        vec![DUMMY_ARCHIVE_BYTE]
    } else {
        real_bytes.to_vec()
    }
}
