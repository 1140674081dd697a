//! Wires the pipeline together: stream reader -> blob staging -> per-commit
//! validation -> revision assembly -> archive writes -> journal emission
//! (spec §4, §5). `run` is the single entry point both the CLI shell and
//! integration tests drive.

pub mod archive;
pub mod assembler;
pub mod blob_store;
pub mod branch_tree;
pub mod commit;
pub mod depot;
pub mod error;
pub mod journal;
pub mod limits;
pub mod opts;
pub mod path_mapper;
pub mod pathutil;
pub mod report;
pub mod stream;
pub mod validator;

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufWriter};

use crate::archive::{job_bytes, librarian_path, ArchiveWriter, WriteJob};
use crate::assembler::{assemble_commit, BranchHeads};
use crate::blob_store::{classify_blob, convert_crlf, BlobStore};
use crate::branch_tree::{BranchTree, CasePolicy};
use crate::commit::{collect_commit, Commit, RawFileAction};
use crate::depot::DepotFileTable;
use crate::error::{CoreError, CoreResult};
use crate::journal::JournalWriter;
use crate::opts::CompiledConfig;
use crate::path_mapper::archive_key;
use crate::report::RunSummary;
use crate::stream::{BlobRef, Command, StreamReader};

/// Inline blob content is assigned a synthetic mark above every mark the
/// stream itself could have issued, so it lands in `BlobStore` exactly like
/// a marked blob and the validator/assembler never see `BlobRef::Inline`.
struct InlineMarkAllocator {
    next: u32,
}

impl InlineMarkAllocator {
    fn new() -> Self {
        InlineMarkAllocator { next: u32::MAX }
    }

    fn allocate(&mut self) -> u32 {
        let mark = self.next;
        self.next -= 1;
        mark
    }
}

/// Replace every `BlobRef::Inline` in `commit`'s actions with a freshly
/// allocated mark, staging the blob's content along the way. Run once per
/// commit, before the action list reaches the validator.
fn normalize_inline_blobs(
    commit: &mut Commit,
    blob_store: &mut BlobStore,
    inline_marks: &mut InlineMarkAllocator,
    cfg: &CompiledConfig,
) {
    for action in &mut commit.actions {
        if let RawFileAction::Modify { path, mode, blob } = action {
            if let BlobRef::Inline(content) = blob {
                let is_symlink = matches!(mode, crate::stream::FileMode::Symlink);
                let classification =
                    classify_blob(content, path, is_symlink, &cfg.typemaps);
                let content = if cfg.config.convert_crlf
                    && classification.compressible()
                    && !content.contains(&0u8)
                {
                    convert_crlf(content)
                } else {
                    content.clone()
                };
                let mark = inline_marks.allocate();
                blob_store.stage(mark, classification, content.len() as u64);
                *blob = BlobRef::Mark(mark);
            }
        }
    }
}

/// Per-mark staged content, kept only long enough for the archive writer to
/// consume it once the owning depot file claims the librarian home.
type BlobContentTable = HashMap<u32, Vec<u8>>;

fn stage_blob(
    blob_store: &mut BlobStore,
    contents: &mut BlobContentTable,
    mark: u32,
    data: Vec<u8>,
    cfg: &CompiledConfig,
) {
    // `blob` commands precede any file-action referencing their mark, so the
    // eventual depot path isn't known yet — classification here is content
    // sniffing only. Path-based typemap overrides fully apply to inline
    // blobs (normalized with their path already in hand); for marked blobs
    // they're a gap inherent to the stream's ordering, not recovered later.
    let is_symlink = false; // the mode lives on the referencing file-action, not the blob
    let classification = classify_blob(&data, b"", is_symlink, &[]);
    let data = if cfg.config.convert_crlf && classification.compressible() && !data.contains(&0u8)
    {
        convert_crlf(&data)
    } else {
        data
    };
    blob_store.stage(mark, classification, data.len() as u64);
    contents.insert(mark, data);
}

/// Run the full migration against `input`, writing the archive tree under
/// `cfg.config.archive_root` and the journal to `cfg.config.journal_path`.
/// Returns the end-of-run summary counts.
pub fn run<R: BufRead>(cfg: &CompiledConfig, input: R) -> CoreResult<RunSummary> {
    let config = &cfg.config;
    let policy = if config.case_insensitive {
        CasePolicy::Insensitive
    } else {
        CasePolicy::Sensitive
    };

    let mut reader = StreamReader::new(input, config.max_data_block_size, config.default_branch.clone());
    let mut blob_store = BlobStore::new();
    let mut blob_contents: BlobContentTable = HashMap::new();
    let mut inline_marks = InlineMarkAllocator::new();

    let mut trees: HashMap<String, BranchTree> = HashMap::new();
    let mut branch_heads = BranchHeads::new();
    let mut branch_of_mark: HashMap<u32, String> = HashMap::new();

    let journal_file = File::create(&config.journal_path)?;
    let mut journal = JournalWriter::new(BufWriter::new(journal_file));
    journal.write_header(
        &config.import_depot,
        "import-client",
        "import-user",
        &config.import_depot,
    )?;

    let mut archive_writer = ArchiveWriter::new(config.parallel_threads)?;

    let mut summary = RunSummary::default();
    let mut depot_table = DepotFileTable::new();
    let mut change_no: u32 = 0;
    let mut commits_done: usize = 0;

    loop {
        let command = match reader.next_command()? {
            Some(c) => c,
            None => break,
        };
        match command {
            Command::Blob { mark, data } => {
                let mark = mark.ok_or_else(|| {
                    CoreError::stream_parse(None, "blob command missing a mark")
                })?;
                stage_blob(&mut blob_store, &mut blob_contents, mark, data, cfg);
            }
            Command::Reset { branch, from } => {
                ensure_branch_tree(&mut trees, &branch, from.as_ref(), &branch_of_mark, policy);
                let parent_branch = from.and_then(|m| branch_of_mark.get(&m).cloned());
                branch_heads.ensure_branch(&branch, parent_branch.as_deref());
            }
            Command::CommitStart(header) => {
                if config.max_commits > 0 && commits_done >= config.max_commits {
                    // drain the commit body without acting on it, then stop
                    // reading further commands altogether (spec §6 maxCommits).
                    let _ = collect_commit(&mut reader, header)?;
                    break;
                }
                let header_branch = header.branch.clone();
                let header_mark = header.mark;
                let parent_mark = header.from;
                let merges = header.merges.clone();
                let mut commit = collect_commit(&mut reader, header)?;
                change_no += 1;
                commits_done += 1;

                let parent_branch = parent_mark.and_then(|m| branch_of_mark.get(&m).cloned());
                ensure_branch_tree(
                    &mut trees,
                    &header_branch,
                    parent_mark.as_ref(),
                    &branch_of_mark,
                    policy,
                );
                branch_heads.ensure_branch(&header_branch, parent_branch.as_deref());

                normalize_inline_blobs(&mut commit, &mut blob_store, &mut inline_marks, cfg);

                let merge_branches: Vec<String> = merges
                    .iter()
                    .filter_map(|m| branch_of_mark.get(m).cloned())
                    .collect();

                let tree = trees.get_mut(&header_branch).expect("branch tree bootstrapped above");
                let canonical = validator::validate_commit(tree, &commit.actions, header_mark)?;

                let assembled = assemble_commit(
                    &mut depot_table,
                    &mut blob_store,
                    &mut branch_heads,
                    &config.import_depot,
                    config.import_path.as_deref(),
                    &header_branch,
                    &cfg.branch_mappings,
                    &canonical,
                    &merge_branches,
                    change_no,
                    header_mark,
                )?;

                journal.write_commit_header(
                    change_no,
                    "import-client",
                    "import-user",
                    commit.author.time,
                    &commit.message,
                )?;
                for rev in &assembled.revisions {
                    journal.write_revision(&depot_table, rev, change_no, commit.author.time)?;
                    summary.revisions_written += 1;
                }
                for edge in &assembled.integration_edges {
                    journal.write_integration_edge(&depot_table, edge)?;
                    summary.integration_edges_written += 1;
                }

                for job in &assembled.archive_jobs {
                    let bytes = blob_contents.remove(&job.blob_mark).ok_or_else(|| {
                        CoreError::invariant(header_mark, "archive job references unstaged blob")
                    })?;
                    let bytes = job_bytes(&bytes, config.dummy_archives);
                    summary.archive_files_written += 1;
                    summary.archive_bytes_written += bytes.len() as u64;
                    let bucket = archive_key(&job.depot_path, config.case_insensitive);
                    let path = librarian_path(&config.archive_root, &bucket, job.change_no, job.compress);
                    archive_writer.dispatch(WriteJob {
                        path,
                        bytes,
                        compress: job.compress,
                    });
                }

                if let Some(mark) = header_mark {
                    branch_of_mark.insert(mark, header_branch.clone());
                }
                summary.commits_processed += 1;
            }
            Command::FileModify { .. }
            | Command::FileDelete { .. }
            | Command::FileCopy { .. }
            | Command::FileRename { .. }
            | Command::CommitEnd => {
                return Err(CoreError::invariant(
                    None,
                    "file action encountered outside a commit body",
                ));
            }
            Command::Tag { .. } => {
                // No journal record kind corresponds to a git tag; the
                // migration preserves file/branch history only.
                summary.ignorable_actions += 1;
            }
            Command::End => break,
        }
    }

    archive_writer.drain()?;
    journal.flush()?;

    // Blobs still holding unconsumed bytes at shutdown never became a
    // librarian home themselves — they rode on an earlier mark's archive
    // write (spec §3 "Librarian pointer" / content-addressed dedup).
    summary.blobs_deduplicated = blob_contents.len() as u64;

    summary.print_human(config.quiet);
    if let Some(path) = &config.report_json {
        summary.write_json(path)?;
    }

    Ok(summary)
}

fn ensure_branch_tree(
    trees: &mut HashMap<String, BranchTree>,
    branch: &str,
    from_mark: Option<&u32>,
    branch_of_mark: &HashMap<u32, String>,
    policy: CasePolicy,
) {
    if trees.contains_key(branch) {
        return;
    }
    let parent = from_mark.and_then(|m| branch_of_mark.get(m));
    let tree = match parent.and_then(|p| trees.get(p)) {
        Some(parent_tree) => BranchTree::clone_from(parent_tree),
        None => BranchTree::new(policy),
    };
    trees.insert(branch.to_string(), tree);
}
