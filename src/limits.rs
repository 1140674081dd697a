use crate::error::CoreError;

/// Default ceiling on a `data N` payload size, guarding against pathological
/// allocations from a malformed fast-export stream. Configurable via
/// `Config::max_data_block_size`.
pub const DEFAULT_MAX_DATA_BLOCK_SIZE: usize = 500 * 1024 * 1024; // 500 MiB

/// Parse a `data <n>\n` header line and return `n`, rejecting anything
/// above `max_size`.
pub fn parse_data_size_header(line: &[u8], max_size: usize) -> Result<usize, CoreError> {
    let size_bytes = line
        .strip_prefix(b"data ")
        .ok_or_else(|| CoreError::stream_parse(None, "expected 'data <n>' header"))?;
    let size_bytes = size_bytes.strip_suffix(b"\n").unwrap_or(size_bytes);
    let n = std::str::from_utf8(size_bytes)
        .ok()
        .map(|s| s.trim())
        .and_then(|s| s.parse::<usize>().ok())
        .ok_or_else(|| {
            CoreError::stream_parse(
                None,
                format!(
                    "invalid data header {:?}",
                    String::from_utf8_lossy(line)
                ),
            )
        })?;
    if n > max_size {
        return Err(CoreError::stream_parse(
            None,
            format!("blob size {n} exceeds maximum allowed size {max_size}"),
        ));
    }
    Ok(n)
}
