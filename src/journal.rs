//! Emits the at-rest Perforce journal text (spec §4.8). Record shape is
//! `@pv@ <version> @<table>@ <fields...>` (`@rv@` for counter updates);
//! string fields are wrapped in `@...@` with any embedded `@` doubled, the
//! journal's own escape for its field delimiter. The emitter buffers only one
//! commit's worth of records at a time (spec §5) and is written against any
//! `std::io::Write`, so the orchestrator can hand it a `BufWriter<File>`.

use std::io::{self, Write};

use crate::assembler::{AssembledRevision, EdgeDirection, IntegKind, IntegrationEdge};
use crate::depot::DepotFileTable;
use crate::pathutil::percent_escape_wildcards;

const JOURNAL_VERSION: u32 = 3;

fn escape_field(field: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(field.len() + 2);
    out.push(b'@');
    for &b in field {
        if b == b'@' {
            out.push(b'@');
            out.push(b'@');
        } else {
            out.push(b);
        }
    }
    out.push(b'@');
    out
}

fn escaped_depot_path(path: &[u8]) -> Vec<u8> {
    escape_field(&percent_escape_wildcards(path))
}

pub struct JournalWriter<W: Write> {
    out: W,
}

impl<W: Write> JournalWriter<W> {
    pub fn new(out: W) -> Self {
        JournalWriter { out }
    }

    fn write_record(&mut self, prefix: &str, table: &str, fields: &[Vec<u8>]) -> io::Result<()> {
        write!(self.out, "{prefix} {JOURNAL_VERSION} @{table}@")?;
        for f in fields {
            self.out.write_all(b" ")?;
            self.out.write_all(f)?;
        }
        self.out.write_all(b"\n")
    }

    fn write_pv(&mut self, table: &str, fields: &[Vec<u8>]) -> io::Result<()> {
        self.write_record("@pv@", table, fields)
    }

    /// Fixed startup header: depot, domain (client), user, view entries
    /// (spec §4.8, "a fixed header declaring the import depot, domain
    /// (client), user, view, and counter entries").
    pub fn write_header(
        &mut self,
        import_depot: &str,
        client_name: &str,
        user_name: &str,
        archive_root_depot_path: &str,
    ) -> io::Result<()> {
        self.write_pv(
            "db.depot",
            &[
                escape_field(import_depot.as_bytes()),
                escape_field(b"0"),
                escape_field(format!("{import_depot}/...").as_bytes()),
                escape_field(b""),
            ],
        )?;
        self.write_pv(
            "db.domain",
            &[
                escape_field(client_name.as_bytes()),
                escape_field(b"100"),
                escape_field(user_name.as_bytes()),
                escape_field(b"/"),
                escape_field(b""),
            ],
        )?;
        self.write_pv(
            "db.user",
            &[
                escape_field(user_name.as_bytes()),
                escape_field(format!("{user_name}@example.com").as_bytes()),
                escape_field(b""),
                escape_field(b""),
                escape_field(b"0"),
            ],
        )?;
        self.write_pv(
            "db.view",
            &[
                escape_field(client_name.as_bytes()),
                escape_field(format!("//{import_depot}/...").as_bytes()),
                escape_field(format!("//{client_name}/{archive_root_depot_path}/...").as_bytes()),
                escape_field(b"0"),
            ],
        )?;
        self.write_counter("change", 0)
    }

    pub fn write_counter(&mut self, name: &str, value: u64) -> io::Result<()> {
        self.write_record(
            "@rv@",
            "db.counters",
            &[escape_field(name.as_bytes()), escape_field(value.to_string().as_bytes())],
        )
    }

    /// Per-commit `db.desc` + `db.change` pair, followed by the counter
    /// update advancing "change" to this change number.
    pub fn write_commit_header(
        &mut self,
        change_no: u32,
        client_name: &str,
        user_name: &str,
        timestamp: i64,
        message: &[u8],
    ) -> io::Result<()> {
        self.write_pv(
            "db.desc",
            &[
                escape_field(change_no.to_string().as_bytes()),
                escape_field(message),
            ],
        )?;
        self.write_pv(
            "db.change",
            &[
                escape_field(change_no.to_string().as_bytes()),
                escape_field(change_no.to_string().as_bytes()),
                escape_field(client_name.as_bytes()),
                escape_field(user_name.as_bytes()),
                escape_field(timestamp.to_string().as_bytes()),
                escape_field(b"1"), // submitted
                escape_field(message),
            ],
        )?;
        self.write_counter("change", change_no as u64)
    }

    /// One `db.rev` + one `db.revcx` per emitted file revision.
    pub fn write_revision(
        &mut self,
        depot_table: &DepotFileTable,
        rev: &AssembledRevision,
        change_no: u32,
        timestamp: i64,
    ) -> io::Result<()> {
        let lbr_path = depot_table.file(rev.lbr.depot_file_id).depot_path.clone();
        self.write_pv(
            "db.rev",
            &[
                escaped_depot_path(&rev.depot_path),
                escape_field(rev.revision.to_string().as_bytes()),
                escape_field(rev.action.code().to_string().as_bytes()),
                escape_field(rev.file_type.as_bytes()),
                escape_field(change_no.to_string().as_bytes()),
                escape_field(timestamp.to_string().as_bytes()),
                escape_field(timestamp.to_string().as_bytes()),
                escaped_depot_path(&lbr_path),
                escape_field(rev.lbr.revision.to_string().as_bytes()),
            ],
        )?;
        self.write_pv(
            "db.revcx",
            &[
                escape_field(change_no.to_string().as_bytes()),
                escaped_depot_path(&rev.depot_path),
                escape_field(rev.revision.to_string().as_bytes()),
            ],
        )
    }

    /// One `db.integed` record per direction of one integration edge.
    pub fn write_integration_edge(
        &mut self,
        depot_table: &DepotFileTable,
        edge: &IntegrationEdge,
    ) -> io::Result<()> {
        let from_path = depot_table.file(edge.from_depot_file).depot_path.clone();
        let to_path = depot_table.file(edge.to_depot_file).depot_path.clone();
        let how = integ_how_code(edge.kind, edge.direction);
        self.write_pv(
            "db.integed",
            &[
                escaped_depot_path(&from_path),
                escaped_depot_path(&to_path),
                escape_field(edge.from_rev.to_string().as_bytes()),
                escape_field(edge.from_rev.to_string().as_bytes()),
                escape_field(edge.to_rev.to_string().as_bytes()),
                escape_field(edge.to_rev.to_string().as_bytes()),
                escape_field(how.to_string().as_bytes()),
            ],
        )
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

/// Perforce's `db.integed` "how" field distinguishes branch/merge and
/// direction; reverse records use the odd-numbered sibling of the forward
/// code, matching the convention real `db.integed` pairs follow.
fn integ_how_code(kind: IntegKind, direction: EdgeDirection) -> u32 {
    match (kind, direction) {
        (IntegKind::Branch, EdgeDirection::Forward) => 2, // "branch from"
        (IntegKind::Branch, EdgeDirection::Reverse) => 3, // "branch into"
        (IntegKind::Merge, EdgeDirection::Forward) => 0,  // "merge from"
        (IntegKind::Merge, EdgeDirection::Reverse) => 1,  // "merge into"
    }
}
