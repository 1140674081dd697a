//! Byte-level path helpers shared by the stream reader, path mapper and
//! journal emitter: fast-export's C-style quoting, and Perforce's wildcard
//! percent-escaping.

/// Decode a fast-export C-style quoted path body (the bytes between the
/// quotes, quotes already stripped). Handles `\\ \" \n \t \r` and octal
/// `\ooo` escapes, exactly as git-fast-import documents.
pub fn dequote_c_style_bytes(s: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len());
    let mut i = 0usize;
    while i < s.len() {
        let b = s[i];
        i += 1;
        if b != b'\\' {
            out.push(b);
            continue;
        }
        if i >= s.len() {
            out.push(b'\\');
            break;
        }
        let c = s[i];
        i += 1;
        match c {
            b'\\' => out.push(b'\\'),
            b'"' => out.push(b'"'),
            b'n' => out.push(b'\n'),
            b't' => out.push(b'\t'),
            b'r' => out.push(b'\r'),
            b'0'..=b'7' => {
                let mut val: u32 = (c - b'0') as u32;
                let mut count = 0;
                while count < 2 && i < s.len() {
                    let d = s[i];
                    if !(b'0'..=b'7').contains(&d) {
                        break;
                    }
                    i += 1;
                    count += 1;
                    val = (val << 3) | (d - b'0') as u32;
                }
                out.push(val as u8);
            }
            other => out.push(other),
        }
    }
    out
}

/// Parse a (possibly quoted) path token at the start of `input`, returning
/// the decoded bytes and the remainder of the line. Mirrors the grammar
/// `path ::= path_str | '"' quoted_str '"'` from the fast-import spec.
pub fn parse_path(input: &[u8]) -> Option<(Vec<u8>, &[u8])> {
    if input.is_empty() {
        return None;
    }
    if input[0] == b'"' {
        let mut idx = 1usize;
        while idx < input.len() {
            if input[idx] == b'"' {
                let mut backslashes = 0usize;
                let mut j = idx;
                while j > 0 && input[j - 1] == b'\\' {
                    backslashes += 1;
                    j -= 1;
                }
                if backslashes % 2 == 1 {
                    idx += 1;
                    continue;
                }
                let decoded = dequote_c_style_bytes(&input[1..idx]);
                let rest = &input[idx + 1..];
                return Some((decoded, rest));
            }
            idx += 1;
        }
        None
    } else {
        let mut idx = 0usize;
        while idx < input.len() {
            let b = input[idx];
            if b == b' ' || b == b'\n' {
                return Some((input[..idx].to_vec(), &input[idx..]));
            }
            idx += 1;
        }
        Some((input.to_vec(), &input[input.len()..]))
    }
}

/// Percent-escape the four bytes Perforce treats as wildcards in a depot
/// path (`@ # % *`). Any other byte, including non-ASCII, passes through
/// unchanged — the journal is UTF-8 text and depot paths are not otherwise
/// quoted.
pub fn percent_escape_wildcards(path: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(path.len());
    for &b in path {
        match b {
            b'@' => out.extend_from_slice(b"%40"),
            b'#' => out.extend_from_slice(b"%23"),
            b'%' => out.extend_from_slice(b"%25"),
            b'*' => out.extend_from_slice(b"%2A"),
            _ => out.push(b),
        }
    }
    out
}

/// Render raw bytes as a human-legible, reversible-enough string for error
/// messages (ASCII-escaped, quoted).
pub fn format_path_bytes_for_report(path: &[u8]) -> String {
    let mut out = String::with_capacity(path.len() + 2);
    out.push('"');
    for &b in path {
        for c in std::ascii::escape_default(b) {
            out.push(c as char);
        }
    }
    out.push('"');
    out
}

/// Split a byte path on `/` into owned component `Vec<u8>`s, dropping empty
/// leading/trailing segments produced by a leading/trailing slash.
pub fn split_components(path: &[u8]) -> Vec<Vec<u8>> {
    path.split(|&b| b == b'/')
        .filter(|seg| !seg.is_empty())
        .map(|seg| seg.to_vec())
        .collect()
}

/// Join path components back into a `/`-separated byte path with no leading
/// or trailing slash.
pub fn join_components(components: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    for (i, c) in components.iter().enumerate() {
        if i > 0 {
            out.push(b'/');
        }
        out.extend_from_slice(c);
    }
    out
}
