//! Unit tests for the subprocess output line codec.
//!
//! Covers:
//! - complete lines are yielded without their terminator
//! - partial delivery is buffered until the newline arrives
//! - an unterminated trailing line is discarded at end-of-stream
//! - invalid UTF-8 is replaced instead of failing
//! - over-long lines are skipped and decoding resumes

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use pipescratch::scratch::codec::{ScratchLineCodec, MAX_LINE_BYTES};

fn decode_all(codec: &mut ScratchLineCodec, buf: &mut BytesMut) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(line) = codec.decode(buf).expect("decode never fails") {
        lines.push(line);
    }
    lines
}

// ── Framing ───────────────────────────────────────────────────────────────────

#[test]
fn two_terminated_lines_are_both_decoded() {
    let mut codec = ScratchLineCodec::new();
    let mut buf = BytesMut::from("select 1\nselect 2\n");

    assert_eq!(decode_all(&mut codec, &mut buf), ["select 1", "select 2"]);
    assert!(buf.is_empty());
}

#[test]
fn empty_line_is_yielded_as_empty_string() {
    let mut codec = ScratchLineCodec::new();
    let mut buf = BytesMut::from("\n");

    assert_eq!(codec.decode(&mut buf).unwrap(), Some(String::new()));
}

/// Only `\n` is a terminator; a carriage return stays part of the line.
#[test]
fn carriage_return_is_preserved() {
    let mut codec = ScratchLineCodec::new();
    let mut buf = BytesMut::from("a\r\n");

    assert_eq!(codec.decode(&mut buf).unwrap(), Some("a\r".to_owned()));
}

#[test]
fn partial_delivery_is_buffered_until_newline() {
    let mut codec = ScratchLineCodec::new();
    let mut buf = BytesMut::from("sele");

    assert_eq!(codec.decode(&mut buf).unwrap(), None);

    buf.extend_from_slice(b"ct 1\n");
    assert_eq!(codec.decode(&mut buf).unwrap(), Some("select 1".to_owned()));
}

// ── End of stream ─────────────────────────────────────────────────────────────

#[test]
fn unterminated_trailing_line_is_discarded_at_eof() {
    let mut codec = ScratchLineCodec::new();
    let mut buf = BytesMut::from("select 1\nselect 2");

    assert_eq!(
        codec.decode_eof(&mut buf).unwrap(),
        Some("select 1".to_owned())
    );
    assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
    assert!(buf.is_empty(), "trailing fragment must be dropped");
}

#[test]
fn eof_on_empty_buffer_is_clean() {
    let mut codec = ScratchLineCodec::new();
    let mut buf = BytesMut::new();

    assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
}

// ── Content handling ──────────────────────────────────────────────────────────

#[test]
fn invalid_utf8_is_replaced() {
    let mut codec = ScratchLineCodec::new();
    let mut buf = BytesMut::from(&b"ok \xff\xfe\n"[..]);

    let line = codec.decode(&mut buf).unwrap().expect("one line");
    assert!(line.starts_with("ok "));
    assert!(line.contains('\u{FFFD}'));
}

#[test]
fn over_long_line_is_skipped_and_decoding_resumes() {
    let mut codec = ScratchLineCodec::with_max_length(4);
    let mut buf = BytesMut::from("abcdefgh\nok\n");

    assert_eq!(decode_all(&mut codec, &mut buf), ["ok"]);
}

#[test]
fn over_long_line_split_across_reads_is_skipped() {
    let mut codec = ScratchLineCodec::with_max_length(4);
    let mut buf = BytesMut::from("abcdefgh");

    assert_eq!(codec.decode(&mut buf).unwrap(), None);

    buf.extend_from_slice(b"ijkl\nnext\n");
    assert_eq!(decode_all(&mut codec, &mut buf), ["next"]);
}

#[test]
fn line_at_exact_limit_is_accepted() {
    let mut codec = ScratchLineCodec::with_max_length(4);
    let mut buf = BytesMut::from("abcd\n");

    assert_eq!(codec.decode(&mut buf).unwrap(), Some("abcd".to_owned()));
}

#[test]
fn default_limit_is_one_mebibyte() {
    assert_eq!(ScratchLineCodec::default().max_length(), MAX_LINE_BYTES);
    assert_eq!(MAX_LINE_BYTES, 1_048_576);
}
