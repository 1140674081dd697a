//! Lazily parses a `git fast-export` byte stream into typed commands
//! (spec §4.1, §6). `StreamReader::next_command` never buffers more than one
//! line plus the payload of the `data N` block currently being read; a
//! one-line lookahead buffer (`pending_line`) is how the reader detects the
//! implicit end of a commit/tag body without peeking past an object it
//! can't yet classify.

use std::io::{self, BufRead, Read};

use crate::error::{CoreError, CoreResult};
use crate::limits::parse_data_size_header;
use crate::pathutil::parse_path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    Regular,
    Executable,
    Symlink,
    Gitlink,
}

impl FileMode {
    fn parse(bytes: &[u8]) -> Option<FileMode> {
        match bytes {
            b"100644" | b"644" => Some(FileMode::Regular),
            b"100755" | b"755" => Some(FileMode::Executable),
            b"120000" => Some(FileMode::Symlink),
            b"160000" => Some(FileMode::Gitlink),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum BlobRef {
    Mark(u32),
    Inline(Vec<u8>),
}

/// An identity line's epoch seconds, kept after syntactic validation of the
/// timezone offset — the offset itself is never used downstream.
#[derive(Debug, Clone)]
pub struct Identity {
    pub name: String,
    pub email: String,
    pub time: i64,
}

#[derive(Debug, Clone)]
pub struct CommitHeader {
    pub mark: Option<u32>,
    pub branch: String,
    pub from: Option<u32>,
    pub merges: Vec<u32>,
    pub author: Identity,
    pub message: Vec<u8>,
}

#[derive(Debug, Clone)]
pub enum Command {
    Blob {
        mark: Option<u32>,
        data: Vec<u8>,
    },
    Reset {
        branch: String,
        from: Option<u32>,
    },
    CommitStart(CommitHeader),
    FileModify {
        path: Vec<u8>,
        mode: FileMode,
        blob: BlobRef,
    },
    FileDelete {
        path: Vec<u8>,
    },
    FileCopy {
        src: Vec<u8>,
        dst: Vec<u8>,
    },
    FileRename {
        src: Vec<u8>,
        dst: Vec<u8>,
    },
    CommitEnd,
    Tag {
        name: String,
        from: Option<u32>,
        tagger: Option<Identity>,
        message: Vec<u8>,
    },
    End,
}

pub struct StreamReader<R: BufRead> {
    reader: R,
    pending_line: Option<Vec<u8>>,
    in_commit: bool,
    max_data_block_size: usize,
    default_branch: String,
}

/// Extracts the branch name from a `commit`/`reset` ref line. A ref that
/// doesn't match `refs/heads/<name>` falls back to `default_branch` (spec §6
/// `defaultBranch`) rather than the raw ref text.
fn branch_name_from_ref(ref_bytes: &[u8], default_branch: &str) -> String {
    let s = String::from_utf8_lossy(ref_bytes);
    s.strip_prefix("refs/heads/")
        .map(|b| b.to_string())
        .unwrap_or_else(|| default_branch.to_string())
}

fn parse_u32_prefixed(rest: &[u8]) -> Option<(u32, &[u8])> {
    let mut num: u32 = 0;
    let mut seen = false;
    let mut i = 0;
    while i < rest.len() && rest[i].is_ascii_digit() {
        seen = true;
        num = num.saturating_mul(10).saturating_add((rest[i] - b'0') as u32);
        i += 1;
    }
    if seen {
        Some((num, &rest[i..]))
    } else {
        None
    }
}

fn strip_newline(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\n").unwrap_or(line)
}

fn parse_mark_line(line: &[u8]) -> CoreResult<Option<u32>> {
    let rest = match line.strip_prefix(b"mark :") {
        Some(r) => r,
        None => return Ok(None),
    };
    let (n, _) = parse_u32_prefixed(strip_newline(rest))
        .ok_or_else(|| CoreError::stream_parse(None, "malformed mark line"))?;
    Ok(Some(n))
}

fn parse_from_line(line: &[u8]) -> CoreResult<Option<u32>> {
    let rest = match line.strip_prefix(b"from :") {
        Some(r) => r,
        None => return Ok(None),
    };
    let (n, _) = parse_u32_prefixed(strip_newline(rest))
        .ok_or_else(|| CoreError::stream_parse(None, "malformed from line"))?;
    Ok(Some(n))
}

fn parse_merge_line(line: &[u8]) -> CoreResult<Option<u32>> {
    let rest = match line.strip_prefix(b"merge :") {
        Some(r) => r,
        None => return Ok(None),
    };
    let (n, _) = parse_u32_prefixed(strip_newline(rest))
        .ok_or_else(|| CoreError::stream_parse(None, "malformed merge line"))?;
    Ok(Some(n))
}

/// `<name> <email> <epoch> <tz>` as fast-export emits author/committer/tagger
/// lines. Validates the tz offset looks like `[+-]NNNN` but discards it.
fn parse_identity_line(body: &[u8]) -> CoreResult<Identity> {
    let body = strip_newline(body);
    let lt = memchr::memchr(b'<', body)
        .ok_or_else(|| CoreError::stream_parse(None, "identity line missing '<'"))?;
    let gt = memchr::memchr(b'>', &body[lt..])
        .map(|i| i + lt)
        .ok_or_else(|| CoreError::stream_parse(None, "identity line missing '>'"))?;
    let name = String::from_utf8_lossy(trim_spaces_end(&body[..lt])).to_string();
    let email = String::from_utf8_lossy(&body[lt + 1..gt]).to_string();
    let rest = trim_spaces_start(&body[gt + 1..]);
    let mut parts = rest.split(|&b| b == b' ').filter(|p| !p.is_empty());
    let time_bytes = parts
        .next()
        .ok_or_else(|| CoreError::stream_parse(None, "identity line missing timestamp"))?;
    let tz_bytes = parts
        .next()
        .ok_or_else(|| CoreError::stream_parse(None, "identity line missing timezone"))?;
    let time = std::str::from_utf8(time_bytes)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| CoreError::stream_parse(None, "invalid identity timestamp"))?;
    let tz_ok = tz_bytes.len() == 5
        && (tz_bytes[0] == b'+' || tz_bytes[0] == b'-')
        && tz_bytes[1..].iter().all(u8::is_ascii_digit);
    if !tz_ok {
        return Err(CoreError::stream_parse(None, "invalid identity timezone"));
    }
    Ok(Identity { name, email, time })
}

impl<R: BufRead> StreamReader<R> {
    pub fn new(reader: R, max_data_block_size: usize, default_branch: impl Into<String>) -> Self {
        StreamReader {
            reader,
            pending_line: None,
            in_commit: false,
            max_data_block_size,
            default_branch: default_branch.into(),
        }
    }

    fn next_line(&mut self) -> CoreResult<Option<Vec<u8>>> {
        if let Some(line) = self.pending_line.take() {
            return Ok(Some(line));
        }
        let mut buf = Vec::with_capacity(256);
        loop {
            let available = self.reader.fill_buf()?;
            if available.is_empty() {
                return Ok(if buf.is_empty() { None } else { Some(buf) });
            }
            match memchr::memchr(b'\n', available) {
                Some(i) => {
                    buf.extend_from_slice(&available[..=i]);
                    self.reader.consume(i + 1);
                    return Ok(Some(buf));
                }
                None => {
                    let len = available.len();
                    buf.extend_from_slice(available);
                    self.reader.consume(len);
                }
            }
        }
    }

    fn read_exact_payload(&mut self, n: usize) -> CoreResult<Vec<u8>> {
        let mut payload = vec![0u8; n];
        self.reader
            .read_exact(&mut payload)
            .map_err(|e| io_to_stream_err(e, n))?;
        Ok(payload)
    }

    fn expect_line(&mut self) -> CoreResult<Vec<u8>> {
        self.next_line()?
            .ok_or_else(|| CoreError::stream_parse(None, "unexpected end of stream"))
    }

    fn read_data_payload(&mut self) -> CoreResult<Vec<u8>> {
        let header = self.expect_line()?;
        let n = parse_data_size_header(&header, self.max_data_block_size)?;
        self.read_exact_payload(n)
    }

    fn is_top_level_header(line: &[u8]) -> bool {
        line.starts_with(b"commit ")
            || line.starts_with(b"tag ")
            || line.starts_with(b"reset ")
            || line == b"blob\n"
            || line == b"done\n"
    }

    pub fn next_command(&mut self) -> CoreResult<Option<Command>> {
        loop {
            let line = match self.next_line()? {
                Some(l) => l,
                None => return Ok(None),
            };
            if line.starts_with(b"#") {
                continue;
            }
            if self.in_commit {
                if Self::is_top_level_header(&line) {
                    self.pending_line = Some(line);
                    self.in_commit = false;
                    return Ok(Some(Command::CommitEnd));
                }
                return self.parse_commit_body_line(&line).map(Some);
            }
            if line == b"blob\n" {
                return self.parse_blob().map(Some);
            }
            if line.starts_with(b"reset ") {
                return self.parse_reset(&line).map(Some);
            }
            if line.starts_with(b"commit ") {
                self.in_commit = true;
                return self.parse_commit_start(&line).map(Some);
            }
            if line.starts_with(b"tag ") {
                return self.parse_tag(&line).map(Some);
            }
            if line == b"done\n" {
                return Ok(Some(Command::End));
            }
            return Err(CoreError::stream_parse(
                None,
                format!(
                    "unexpected line at top level: {:?}",
                    String::from_utf8_lossy(&line)
                ),
            ));
        }
    }

    fn parse_blob(&mut self) -> CoreResult<Command> {
        let mut mark = None;
        let mut line = self.expect_line()?;
        if let Some(m) = parse_mark_line(&line)? {
            mark = Some(m);
            line = self.expect_line()?;
        }
        if !line.starts_with(b"data ") {
            return Err(CoreError::stream_parse(
                mark,
                "expected 'data <n>' header after blob",
            ));
        }
        let n = parse_data_size_header(&line, self.max_data_block_size)?;
        let data = self.read_exact_payload(n)?;
        Ok(Command::Blob { mark, data })
    }

    fn parse_reset(&mut self, line: &[u8]) -> CoreResult<Command> {
        let refname = strip_newline(&line[b"reset ".len()..]);
        let branch = branch_name_from_ref(refname, &self.default_branch);
        let next = self.expect_line()?;
        let from = match parse_from_line(&next)? {
            Some(m) => Some(m),
            None => {
                self.pending_line = Some(next);
                None
            }
        };
        Ok(Command::Reset { branch, from })
    }

    fn parse_commit_start(&mut self, line: &[u8]) -> CoreResult<Command> {
        let refname = strip_newline(&line[b"commit ".len()..]);
        let branch = branch_name_from_ref(refname, &self.default_branch);
        let mut mark = None;
        let mut author: Option<Identity> = None;
        let mut committer: Option<Identity> = None;
        let mut from = None;
        let mut merges = Vec::new();
        let mut message = Vec::new();
        let mut have_data = false;

        loop {
            let l = self.expect_line()?;
            if let Some(m) = parse_mark_line(&l)? {
                mark = Some(m);
                continue;
            }
            if l.starts_with(b"author ") {
                author = Some(parse_identity_line(&l[b"author ".len()..])?);
                continue;
            }
            if l.starts_with(b"committer ") {
                committer = Some(parse_identity_line(&l[b"committer ".len()..])?);
                continue;
            }
            if l.starts_with(b"encoding ") {
                continue;
            }
            if l.starts_with(b"data ") {
                let n = parse_data_size_header(&l, self.max_data_block_size)?;
                message = self.read_exact_payload(n)?;
                have_data = true;
                continue;
            }
            if let Some(m) = parse_from_line(&l)? {
                from = Some(m);
                continue;
            }
            if let Some(m) = parse_merge_line(&l)? {
                merges.push(m);
                continue;
            }
            if have_data {
                self.pending_line = Some(l);
                break;
            }
            return Err(CoreError::stream_parse(
                mark,
                format!(
                    "unexpected line in commit header: {:?}",
                    String::from_utf8_lossy(&l)
                ),
            ));
        }

        let identity = committer
            .or(author)
            .ok_or_else(|| CoreError::stream_parse(mark, "commit missing committer identity"))?;

        Ok(Command::CommitStart(CommitHeader {
            mark,
            branch,
            from,
            merges,
            author: identity,
            message,
        }))
    }

    fn parse_commit_body_line(&mut self, line: &[u8]) -> CoreResult<Command> {
        if line.starts_with(b"M ") {
            return self.parse_filemodify(line);
        }
        if line.starts_with(b"D ") {
            let (path, _) = parse_path(&line[b"D ".len()..])
                .ok_or_else(|| CoreError::stream_parse(None, "malformed D line"))?;
            return Ok(Command::FileDelete { path });
        }
        if line.starts_with(b"R ") {
            let (src, dst) = self.parse_two_paths(&line[b"R ".len()..])?;
            return Ok(Command::FileRename { src, dst });
        }
        if line.starts_with(b"C ") {
            let (src, dst) = self.parse_two_paths(&line[b"C ".len()..])?;
            return Ok(Command::FileCopy { src, dst });
        }
        Err(CoreError::stream_parse(
            None,
            format!(
                "unexpected line in commit body: {:?}",
                String::from_utf8_lossy(line)
            ),
        ))
    }

    fn parse_two_paths(&self, rest: &[u8]) -> CoreResult<(Vec<u8>, Vec<u8>)> {
        let (src, remainder) =
            parse_path(rest).ok_or_else(|| CoreError::stream_parse(None, "malformed path pair"))?;
        let remainder = remainder
            .strip_prefix(b" ")
            .ok_or_else(|| CoreError::stream_parse(None, "expected second path"))?;
        let (dst, _) = parse_path(remainder)
            .ok_or_else(|| CoreError::stream_parse(None, "malformed second path"))?;
        Ok((src, dst))
    }

    fn parse_filemodify(&mut self, line: &[u8]) -> CoreResult<Command> {
        let rest = &line[b"M ".len()..];
        let sp = memchr::memchr(b' ', rest)
            .ok_or_else(|| CoreError::stream_parse(None, "malformed M line"))?;
        let mode = FileMode::parse(&rest[..sp])
            .ok_or_else(|| CoreError::stream_parse(None, "unknown file mode"))?;
        let rest2 = &rest[sp + 1..];
        let sp2 = memchr::memchr(b' ', rest2)
            .ok_or_else(|| CoreError::stream_parse(None, "malformed M line"))?;
        let dataref = &rest2[..sp2];
        let path_part = &rest2[sp2 + 1..];
        let (path, _) =
            parse_path(path_part).ok_or_else(|| CoreError::stream_parse(None, "malformed M path"))?;
        let blob = if dataref == b"inline" {
            let payload = self.read_data_payload()?;
            BlobRef::Inline(payload)
        } else if let Some(mark_bytes) = dataref.strip_prefix(b":") {
            let (mark, _) = parse_u32_prefixed(mark_bytes)
                .ok_or_else(|| CoreError::stream_parse(None, "malformed mark reference"))?;
            BlobRef::Mark(mark)
        } else {
            return Err(CoreError::stream_parse(
                None,
                "sha1 blob references are not supported",
            ));
        };
        Ok(Command::FileModify { path, mode, blob })
    }

    fn parse_tag(&mut self, line: &[u8]) -> CoreResult<Command> {
        let name = String::from_utf8_lossy(strip_newline(&line[b"tag ".len()..])).to_string();
        let from_line = self.expect_line()?;
        let from = parse_from_line(&from_line)?;
        if from.is_none() {
            return Err(CoreError::stream_parse(None, "tag missing 'from' line"));
        }
        let mut l = self.expect_line()?;
        let mut tagger = None;
        if l.starts_with(b"tagger ") {
            tagger = Some(parse_identity_line(&l[b"tagger ".len()..])?);
            l = self.expect_line()?;
        }
        if !l.starts_with(b"data ") {
            return Err(CoreError::stream_parse(None, "tag missing 'data' header"));
        }
        let n = parse_data_size_header(&l, self.max_data_block_size)?;
        let message = self.read_exact_payload(n)?;
        Ok(Command::Tag {
            name,
            from,
            tagger,
            message,
        })
    }
}

fn io_to_stream_err(e: io::Error, n: usize) -> CoreError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        CoreError::stream_parse(None, format!("stream ended mid-payload (expected {n} bytes)"))
    } else {
        CoreError::from(e)
    }
}

fn trim_spaces_start(bytes: &[u8]) -> &[u8] {
    let mut i = 0;
    while i < bytes.len() && bytes[i] == b' ' {
        i += 1;
    }
    &bytes[i..]
}

fn trim_spaces_end(bytes: &[u8]) -> &[u8] {
    let mut end = bytes.len();
    while end > 0 && bytes[end - 1] == b' ' {
        end -= 1;
    }
    &bytes[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn reader(input: &[u8]) -> StreamReader<Cursor<Vec<u8>>> {
        StreamReader::new(Cursor::new(input.to_vec()), 1024 * 1024, "main")
    }

    #[test]
    fn parses_blob_with_mark() {
        let mut r = reader(b"blob\nmark :1\ndata 5\nhello");
        let cmd = r.next_command().unwrap().unwrap();
        match cmd {
            Command::Blob { mark, data } => {
                assert_eq!(mark, Some(1));
                assert_eq!(data, b"hello");
            }
            _ => panic!("expected Blob"),
        }
        assert!(r.next_command().unwrap().is_none());
    }

    #[test]
    fn ref_not_under_refs_heads_falls_back_to_configured_default_branch() {
        let mut r = StreamReader::new(Cursor::new(b"reset HEAD\n".to_vec()), 1024, "trunk");
        match r.next_command().unwrap().unwrap() {
            Command::Reset { branch, .. } => assert_eq!(branch, "trunk"),
            _ => panic!("expected Reset"),
        }
    }

    #[test]
    fn parses_reset_with_from() {
        let mut r = reader(b"reset refs/heads/main\nfrom :3\n");
        match r.next_command().unwrap().unwrap() {
            Command::Reset { branch, from } => {
                assert_eq!(branch, "main");
                assert_eq!(from, Some(3));
            }
            _ => panic!("expected Reset"),
        }
    }

    #[test]
    fn parses_reset_without_from_and_preserves_next_line() {
        let mut r = reader(b"reset refs/heads/main\nblob\nmark :1\ndata 1\nx");
        match r.next_command().unwrap().unwrap() {
            Command::Reset { branch, from } => {
                assert_eq!(branch, "main");
                assert_eq!(from, None);
            }
            _ => panic!("expected Reset"),
        }
        match r.next_command().unwrap().unwrap() {
            Command::Blob { mark, .. } => assert_eq!(mark, Some(1)),
            _ => panic!("expected Blob to still be reachable"),
        }
    }

    #[test]
    fn parses_commit_with_file_actions_and_implicit_end() {
        let stream = b"commit refs/heads/main\n\
mark :2\n\
author A U Thor <a@example.com> 1000 +0000\n\
committer A U Thor <a@example.com> 1000 +0000\n\
data 5\n\
hello\
M 100644 :1 src.txt\n\
D old.txt\n\
done\n";
        let mut r = reader(stream);
        match r.next_command().unwrap().unwrap() {
            Command::CommitStart(h) => {
                assert_eq!(h.mark, Some(2));
                assert_eq!(h.branch, "main");
                assert_eq!(h.author.time, 1000);
                assert_eq!(h.message, b"hello");
            }
            _ => panic!("expected CommitStart"),
        }
        match r.next_command().unwrap().unwrap() {
            Command::FileModify { path, mode, blob } => {
                assert_eq!(path, b"src.txt");
                assert_eq!(mode, FileMode::Regular);
                match blob {
                    BlobRef::Mark(m) => assert_eq!(m, 1),
                    _ => panic!("expected mark blob ref"),
                }
            }
            _ => panic!("expected FileModify"),
        }
        match r.next_command().unwrap().unwrap() {
            Command::FileDelete { path } => assert_eq!(path, b"old.txt"),
            _ => panic!("expected FileDelete"),
        }
        assert!(matches!(
            r.next_command().unwrap().unwrap(),
            Command::CommitEnd
        ));
        assert!(matches!(r.next_command().unwrap().unwrap(), Command::End));
    }

    #[test]
    fn parses_rename_and_copy_with_quoted_paths() {
        let mut r = reader(b"commit refs/heads/main\ncommitter A <a@b.com> 1 +0000\ndata 0\nR \"a b.txt\" c.txt\nC c.txt d.txt\ndone\n");
        let _ = r.next_command().unwrap(); // CommitStart
        match r.next_command().unwrap().unwrap() {
            Command::FileRename { src, dst } => {
                assert_eq!(src, b"a b.txt");
                assert_eq!(dst, b"c.txt");
            }
            _ => panic!("expected FileRename"),
        }
        match r.next_command().unwrap().unwrap() {
            Command::FileCopy { src, dst } => {
                assert_eq!(src, b"c.txt");
                assert_eq!(dst, b"d.txt");
            }
            _ => panic!("expected FileCopy"),
        }
    }

    #[test]
    fn rejects_invalid_timezone() {
        let mut r = reader(b"commit refs/heads/main\ncommitter A <a@b.com> 1 bogus\ndata 0\ndone\n");
        assert!(r.next_command().is_err());
    }

    #[test]
    fn parses_tag_with_tagger() {
        let mut r = reader(
            b"tag v1\nfrom :5\ntagger A <a@b.com> 10 +0000\ndata 3\nrel",
        );
        match r.next_command().unwrap().unwrap() {
            Command::Tag {
                name,
                from,
                tagger,
                message,
            } => {
                assert_eq!(name, "v1");
                assert_eq!(from, Some(5));
                assert!(tagger.is_some());
                assert_eq!(message, b"rel");
            }
            _ => panic!("expected Tag"),
        }
    }

    #[test]
    fn rejects_oversized_blob_payload() {
        let mut r = StreamReader::new(Cursor::new(b"blob\ndata 100\nx".to_vec()), 10, "main");
        assert!(r.next_command().is_err());
    }
}
