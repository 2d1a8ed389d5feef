//! Stateless STOMP frame serializer.
//!
//! Command line, `name:value` header lines, blank line, payload bytes, NUL
//! terminator. Header names and values carry the STOMP escape sequences
//! (`\\`, `\n`, `\r`, `\c`); the decoder applies the inverse substitutions.

use super::Frame;

/// Serialize a frame to its wire form. Total for well-formed frames.
pub fn encode(frame: &Frame) -> Vec<u8> {
    let mut out = Vec::with_capacity(estimate_size(frame));
    out.extend_from_slice(frame.command.as_str().as_bytes());
    out.push(b'\n');
    for (name, value) in frame.headers.iter() {
        push_escaped(&mut out, name);
        out.push(b':');
        push_escaped(&mut out, value);
        out.push(b'\n');
    }
    out.push(b'\n');
    out.extend_from_slice(&frame.payload);
    out.push(0);
    out
}

/// Wire form of a heartbeat: a lone line terminator.
pub fn encoded_heartbeat() -> &'static [u8] {
    b"\n"
}

fn estimate_size(frame: &Frame) -> usize {
    let headers: usize = frame
        .headers
        .iter()
        .map(|(n, v)| n.len() + v.len() + 2)
        .sum();
    frame.command.as_str().len() + 1 + headers + 1 + frame.payload.len() + 1
}

// Escaping one byte at a time makes double-escaping of the inserted
// backslashes impossible.
fn push_escaped(out: &mut Vec<u8>, input: &str) {
    for byte in input.bytes() {
        match byte {
            b'\\' => out.extend_from_slice(b"\\\\"),
            b'\n' => out.extend_from_slice(b"\\n"),
            b'\r' => out.extend_from_slice(b"\\r"),
            b':' => out.extend_from_slice(b"\\c"),
            other => out.push(other),
        }
    }
}
