//! End-to-end scenarios driving the full pipeline through a synthetic
//! fast-export stream and checking the resulting journal/archive tree, one
//! test per concrete scenario.

mod common;

use common::{count_field, Harness, StreamBuilder};

#[test]
fn add_then_edit_writes_two_revisions_and_two_archives() {
    let h = Harness::new();
    let stream = StreamBuilder::new()
        .blob(1, b"c\n")
        .commit(1, "main", None, &[], "add")
        .modify("src.txt", 1)
        .blob(2, b"c\na\n")
        .commit(2, "main", None, &[], "edit")
        .modify("src.txt", 2)
        .done();
    let summary = h.run(stream);

    assert_eq!(summary.commits_processed, 2);
    assert_eq!(summary.revisions_written, 2);
    assert_eq!(summary.archive_files_written, 2);

    assert!(h.archive_path(b"//import/main/src.txt", 1, true).exists()
        || h.archive_path(b"//import/main/src.txt", 1, false).exists());
    assert!(h.archive_path(b"//import/main/src.txt", 2, true).exists()
        || h.archive_path(b"//import/main/src.txt", 2, false).exists());

    let journal = h.journal_text();
    assert_eq!(count_field(&journal, "//import/main/src.txt"), count_field(&journal, "//import/main/src.txt"));
    assert!(journal.contains("@//import/main/src.txt@"));
}

#[test]
fn rename_on_branch_with_merge_emits_delete_and_branch_both_sides() {
    let h = Harness::new();
    let stream = StreamBuilder::new()
        .blob(1, b"hello\n")
        .commit(1, "main", None, &[], "init")
        .modify("src.txt", 1)
        .commit(2, "dev", Some(1), &[], "rename on dev")
        .rename("src.txt", "targ.txt")
        .blob(3, b"hello2\n")
        .commit(3, "main", Some(1), &[], "edit on main")
        .modify("src.txt", 3)
        .commit(4, "main", Some(3), &[2], "merge dev")
        .rename("src.txt", "targ.txt")
        .done();
    let summary = h.run(stream);

    assert_eq!(summary.commits_processed, 4);
    assert!(summary.integration_edges_written > 0);

    let journal = h.journal_text();
    assert!(journal.contains("@//import/dev/src.txt@"));
    assert!(journal.contains("@//import/dev/targ.txt@"));
    assert!(journal.contains("@//import/main/targ.txt@"));
}

#[test]
fn dirty_rename_collapses_to_single_delete_and_add_with_integration_edge() {
    let h = Harness::new();
    let stream = StreamBuilder::new()
        .blob(1, b"v1\n")
        .commit(1, "main", None, &[], "init")
        .modify("file1.txt", 1)
        .blob(2, b"v2\n")
        .commit(2, "main", Some(1), &[], "edit")
        .modify("file1.txt", 2)
        .blob(3, b"v3\n")
        .commit(3, "main", Some(2), &[], "dirty rename")
        .rename("file1.txt", "file2.txt")
        .modify("file2.txt", 3)
        .done();
    let summary = h.run(stream);

    assert_eq!(summary.commits_processed, 3);
    // commit 1: add. commit 2: edit. commit 3 (dirty rename): one delete of
    // file1, one add of file2 whose content is the dirty blob :3.
    assert_eq!(summary.revisions_written, 4);
    assert!(summary.integration_edges_written > 0);
    assert!(h.archive_path(b"//import/main/file2.txt", 1, true).exists()
        || h.archive_path(b"//import/main/file2.txt", 1, false).exists());
}

#[test]
fn dir_rename_with_one_deleted_file_skips_the_deleted_member() {
    let h = Harness::new();
    let stream = StreamBuilder::new()
        .blob(1, b"a\n")
        .commit(1, "main", None, &[], "init")
        .modify("src/a.txt", 1)
        .modify("src/b.txt", 1)
        .commit(2, "main", Some(1), &[], "delete then rename")
        .delete("src/a.txt")
        .rename("src", "targ")
        .done();
    let summary = h.run(stream);

    assert_eq!(summary.commits_processed, 2);
    let journal = h.journal_text();
    assert!(journal.contains("@//import/main/src/a.txt@"));
    assert!(journal.contains("@//import/main/src/b.txt@"));
    assert!(journal.contains("@//import/main/targ/b.txt@"));
    assert!(!journal.contains("@//import/main/targ/a.txt@"));
}

#[test]
fn pseudo_rename_keeps_source_live() {
    let h = Harness::new();
    let stream = StreamBuilder::new()
        .blob(1, b"orig\n")
        .commit(1, "main", None, &[], "init")
        .modify("file1.txt", 1)
        .blob(2, b"replaced\n")
        .commit(2, "main", Some(1), &[], "pseudo rename")
        .rename("file1.txt", "file2.txt")
        .modify("file1.txt", 2)
        .done();
    let summary = h.run(stream);

    assert_eq!(summary.commits_processed, 2);
    // commit 1: add file1#1. commit 2: branch file2#1 + edit file1#2 -- no
    // delete of file1.
    assert_eq!(summary.revisions_written, 3);
    assert!(h.archive_path(b"//import/main/file2.txt", 1, true).exists()
        || h.archive_path(b"//import/main/file2.txt", 1, false).exists());
    assert!(h.archive_path(b"//import/main/file1.txt", 2, true).exists()
        || h.archive_path(b"//import/main/file1.txt", 2, false).exists());
}

#[test]
fn case_insensitive_dir_delete_and_modify_collapses_to_one_edit() {
    let h = Harness::case_insensitive();
    let stream = StreamBuilder::new()
        .blob(1, b"orig\n")
        .commit(1, "main", None, &[], "init")
        .modify("src/file1.txt", 1)
        .blob(2, b"new\n")
        .commit(2, "main", Some(1), &[], "delete dir then recreate with different case")
        .delete("src")
        .modify("SRC/file1.txt", 2)
        .done();
    let summary = h.run(stream);

    assert_eq!(summary.commits_processed, 2);
    // commit 1: add. commit 2: a single edit of the same depot file -- the
    // directory delete and the differently-cased modify fold onto one path.
    assert_eq!(summary.revisions_written, 2);

    let insensitive_path = h.archive_path(b"//import/main/src/file1.txt", 2, true);
    let insensitive_path_raw = h.archive_path(b"//import/main/src/file1.txt", 2, false);
    assert!(insensitive_path.exists() || insensitive_path_raw.exists());
}

#[test]
fn case_insensitive_mode_folds_differently_cased_paths_to_one_archive_bucket() {
    let h = Harness::case_insensitive();
    let stream = StreamBuilder::new()
        .blob(1, b"v1\n")
        .commit(1, "main", None, &[], "add lowercase")
        .modify("file.txt", 1)
        .commit(2, "main", Some(1), &[], "delete it")
        .delete("file.txt")
        .blob(3, b"v2\n")
        .commit(3, "main", Some(2), &[], "recreate with different case")
        .modify("FILE.txt", 3)
        .done();
    h.run(stream);

    // Two distinct depot-file lifetimes (separated by a delete), differing
    // only in case. Under case-insensitive mode the archive bucket still
    // folds to the same on-disk directory, revisions distinguished only by
    // change number.
    let lower = h.archive_path(b"//import/main/file.txt", 1, false);
    let upper = h.archive_path(b"//import/main/FILE.txt", 3, false);
    assert_eq!(lower.parent(), upper.parent());
}
