//! Scratch buffer rewriting.
//!
//! The scratch file is split by the sentinel line into an editable region
//! (everything above it) and a generated region (the sentinel and the
//! captured output below it). The generated region is never patched: every
//! rewrite cuts the file at the first sentinel line and appends a freshly
//! rendered one.

/// Append one captured output line to an accumulator as a comment line.
pub fn append_comment_line(buffer: &mut String, line_prefix: &str, line: &str) {
    buffer.reserve(line_prefix.len() + line.len() + 1);
    buffer.push_str(line_prefix);
    buffer.push_str(line);
    buffer.push('\n');
}

/// Render the new scratch file content.
///
/// Copies `current` line by line until a line equal to `sentinel` followed
/// by `\n` is found; that line and everything after it are dropped. When no
/// such line exists, all of `current` is kept and a single `\n` is appended
/// so the sentinel always starts on its own line. The sentinel line, the
/// captured `stdout` and the captured `stderr` follow, in that order.
///
/// Re-running the function on its own output with the same captured text
/// yields the same bytes.
#[must_use]
pub fn rewrite(current: &[u8], sentinel: &str, stdout: &str, stderr: &str) -> Vec<u8> {
    let mut out =
        Vec::with_capacity(current.len() + sentinel.len() + stdout.len() + stderr.len() + 2);

    let editable = editable_region(current, sentinel);
    out.extend_from_slice(editable);
    if editable.len() == current.len() {
        // No sentinel line: keep any unterminated tail and close it.
        out.push(b'\n');
    }

    out.extend_from_slice(sentinel.as_bytes());
    out.push(b'\n');
    out.extend_from_slice(stdout.as_bytes());
    out.extend_from_slice(stderr.as_bytes());
    out
}

/// The bytes of `content` above its first sentinel line, or all of
/// `content` when it has none.
#[must_use]
pub fn editable_region<'a>(content: &'a [u8], sentinel: &str) -> &'a [u8] {
    let mut offset = 0;
    while let Some(len) = content[offset..].iter().position(|b| *b == b'\n') {
        let line = &content[offset..=offset + len];
        if is_sentinel_line(line, sentinel) {
            return &content[..offset];
        }
        offset += len + 1;
    }
    content
}

/// Whether `line` (including its `\n`) is exactly the sentinel line.
fn is_sentinel_line(line: &[u8], sentinel: &str) -> bool {
    line.strip_suffix(b"\n") == Some(sentinel.as_bytes())
}
