//! Stateful STOMP frame decoder.
//!
//! One decoder per connection. Each `decode` call consumes one transport
//! chunk and produces at most one frame. A decoder constructed with
//! [`StompDecoder::buffering`] assembles frames split across chunks up to a
//! configured maximum accumulated size; a decoder constructed with
//! [`StompDecoder::new`] expects one complete frame per call.

use bytes::BytesMut;
use tracing::{trace, warn};

use super::{Command, Frame, Headers, CONTENT_LENGTH};
use crate::error::ProtocolError;

/// Outcome of a single [`StompDecoder::decode`] call.
#[derive(Debug, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// A complete data frame.
    Frame(Frame),
    /// A lone line terminator; keep-alive only, carries no data.
    Heartbeat,
    /// More bytes are required before a frame can be produced.
    Incomplete,
}

/// Decodes STOMP frames from successive byte chunks.
pub struct StompDecoder {
    /// Maximum accumulated size when assembling fragments; `None` disables
    /// fragment buffering entirely.
    max_buffer_size: Option<usize>,
    buffer: BytesMut,
    /// A prior call ended mid-frame without retaining position; the caller
    /// must not feed further chunks until [`StompDecoder::reset`].
    holds_partial: bool,
    /// Framing is desynchronized; every further call fails.
    corrupted: bool,
}

impl StompDecoder {
    /// Decoder that does not assemble fragmented frames. Every call must
    /// carry one complete frame (or a discardable partial).
    pub fn new() -> Self {
        Self {
            max_buffer_size: None,
            buffer: BytesMut::new(),
            holds_partial: false,
            corrupted: false,
        }
    }

    /// Decoder that buffers fragments and assembles them once the chunk
    /// carrying the frame terminator arrives. The accumulated size is capped
    /// at `max_buffer_size` bytes.
    pub fn buffering(max_buffer_size: usize) -> Self {
        Self {
            max_buffer_size: Some(max_buffer_size),
            buffer: BytesMut::new(),
            holds_partial: false,
            corrupted: false,
        }
    }

    /// Decode one chunk.
    ///
    /// Returns [`DecodeOutcome::Incomplete`] when more bytes are required. A
    /// non-buffering decoder does not retain position across calls: after an
    /// `Incomplete` result it must be [`reset`](StompDecoder::reset) before
    /// the next call, otherwise the call fails with
    /// [`ProtocolError::DecoderReuse`].
    pub fn decode(&mut self, chunk: &[u8]) -> Result<DecodeOutcome, ProtocolError> {
        if self.corrupted || self.holds_partial {
            return Err(ProtocolError::DecoderReuse);
        }

        let mut input = chunk;
        if self.buffer.is_empty() {
            // STOMP permits blank lines between frames.
            let skipped = skip_leading_eol(&mut input)?;
            if input.is_empty() {
                return Ok(if skipped {
                    DecodeOutcome::Heartbeat
                } else {
                    DecodeOutcome::Incomplete
                });
            }
        }

        if find_frame_terminator(input).is_none() {
            return if self.max_buffer_size.is_some() {
                self.push_fragment(input)?;
                trace!(buffered = self.buffer.len(), "frame fragment buffered");
                Ok(DecodeOutcome::Incomplete)
            } else {
                // Position is not retained; the caller owns the bytes.
                self.holds_partial = true;
                trace!("incomplete frame in non-buffering mode");
                Ok(DecodeOutcome::Incomplete)
            };
        }

        if self.buffer.is_empty() {
            match parse(input)? {
                Parsed::Frame(frame) => Ok(DecodeOutcome::Frame(frame)),
                Parsed::Heartbeat => Ok(DecodeOutcome::Heartbeat),
                Parsed::Short => {
                    // The NUL located was payload data, not the terminator.
                    if self.max_buffer_size.is_some() {
                        self.push_fragment(input)?;
                    } else {
                        self.holds_partial = true;
                    }
                    Ok(DecodeOutcome::Incomplete)
                }
            }
        } else {
            self.push_fragment(input)?;
            let assembled = std::mem::take(&mut self.buffer);
            match parse(&assembled)? {
                Parsed::Frame(frame) => Ok(DecodeOutcome::Frame(frame)),
                Parsed::Heartbeat => Ok(DecodeOutcome::Heartbeat),
                Parsed::Short => {
                    // Still mid-frame; keep the assembled bytes for the
                    // next fragment.
                    self.buffer = assembled;
                    Ok(DecodeOutcome::Incomplete)
                }
            }
        }
    }

    /// Discard any buffered fragments and clear the partial-frame marker.
    /// A corrupted decoder stays corrupted.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.holds_partial = false;
    }

    fn push_fragment(&mut self, chunk: &[u8]) -> Result<(), ProtocolError> {
        let limit = match self.max_buffer_size {
            Some(limit) => limit,
            // Fragments only accumulate in buffering mode.
            None => return Err(ProtocolError::DecoderReuse),
        };
        if self.buffer.len() + chunk.len() > limit {
            self.buffer.clear();
            self.corrupted = true;
            return Err(ProtocolError::BufferOverflow { limit });
        }
        self.buffer.extend_from_slice(chunk);
        Ok(())
    }
}

impl Default for StompDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of parsing a byte sequence believed to hold a whole frame.
enum Parsed {
    Frame(Frame),
    Heartbeat,
    /// Ran out of bytes mid-frame; the located NUL was payload data.
    Short,
}

/// Parse one frame from `data`, which runs to the end of the current chunk
/// (the NUL terminator sits somewhere inside, possibly followed by trailing
/// line terminators).
fn parse(data: &[u8]) -> Result<Parsed, ProtocolError> {
    let mut reader = Reader::new(data);

    let command_line = reader.read_line()?;
    let token = std::str::from_utf8(command_line.bytes)
        .map_err(|_| ProtocolError::MalformedFrame("command line is not valid UTF-8".into()))?;
    if token.trim().is_empty() {
        trace!("decoded heartbeat");
        return Ok(Parsed::Heartbeat);
    }

    let (headers, headers_short) = read_headers(&mut reader)?;
    let payload = if headers_short {
        None
    } else {
        read_payload(&mut reader, &headers)?
    };

    // The command token is validated even when the frame turned out short.
    let command: Command = token.parse()?;

    match payload {
        Some(payload) => {
            if !payload.is_empty() && !command.is_body_allowed() {
                return Err(ProtocolError::MalformedFrame(format!(
                    "{} must not have a payload (length={})",
                    command,
                    payload.len()
                )));
            }
            Ok(Parsed::Frame(Frame {
                command,
                headers,
                payload,
            }))
        }
        None => {
            trace!("received short frame");
            Ok(Parsed::Short)
        }
    }
}

/// Read header lines up to the first blank line. The second element is true
/// when the data ran out before the blank line (tolerated trailing fragment).
fn read_headers(reader: &mut Reader<'_>) -> Result<(Headers, bool), ProtocolError> {
    let mut headers = Headers::new();
    loop {
        let line = reader.read_line()?;
        if line.bytes.is_empty() {
            // A blank line ends the headers; an empty read without a line
            // terminator means the fragment was cut mid-headers.
            return Ok((headers, !line.terminated));
        }
        let text = std::str::from_utf8(line.bytes)
            .map_err(|_| ProtocolError::MalformedFrame("header line is not valid UTF-8".into()))?;
        match text.find(':') {
            Some(colon) if colon > 0 && colon < text.len() - 1 => {
                headers.push(unescape(&text[..colon])?, unescape(&text[colon + 1..])?);
            }
            _ => {
                // A malformed line with no bytes left is a fragment cut
                // mid-line, not a violation.
                if reader.has_remaining() {
                    return Err(ProtocolError::MalformedFrame(format!(
                        "illegal header: '{}'; a header must be of the form <name>:<value>",
                        text
                    )));
                }
                return Ok((headers, true));
            }
        }
    }
}

/// Read the payload. `None` means the frame is short of its declared or
/// NUL-terminated length.
fn read_payload(
    reader: &mut Reader<'_>,
    headers: &Headers,
) -> Result<Option<Vec<u8>>, ProtocolError> {
    let content_length = headers.get(CONTENT_LENGTH).and_then(|raw| {
        match raw.trim().parse::<usize>() {
            Ok(n) => Some(n),
            Err(_) => {
                warn!(value = raw, "ignoring invalid content-length header");
                None
            }
        }
    });

    if let Some(length) = content_length {
        if reader.remaining() <= length {
            // The terminator we located was payload data; the true end of
            // the frame has not arrived yet.
            return Ok(None);
        }
        let payload = reader.take(length).to_vec();
        if reader.next_byte() != Some(0) {
            return Err(ProtocolError::MalformedFrame(
                "frame must be terminated with a null octet".into(),
            ));
        }
        Ok(Some(payload))
    } else {
        match reader.take_until_nul() {
            Some(payload) => Ok(Some(payload.to_vec())),
            None => Ok(None),
        }
    }
}

/// Strip leading line terminators; true when at least one was consumed.
fn skip_leading_eol(input: &mut &[u8]) -> Result<bool, ProtocolError> {
    let mut skipped = false;
    loop {
        match input {
            [b'\n', rest @ ..] => {
                *input = rest;
                skipped = true;
            }
            [b'\r', b'\n', rest @ ..] => {
                *input = rest;
                skipped = true;
            }
            [b'\r', ..] => {
                return Err(ProtocolError::MalformedFrame(
                    "'\\r' must be followed by '\\n'".into(),
                ))
            }
            _ => return Ok(skipped),
        }
    }
}

/// Position of the frame terminator: the last NUL, allowing only trailing
/// line terminators after it.
fn find_frame_terminator(input: &[u8]) -> Option<usize> {
    let mut end = input.len();
    while end > 0 && (input[end - 1] == b'\n' || input[end - 1] == b'\r') {
        end -= 1;
    }
    (end > 0 && input[end - 1] == 0).then_some(end - 1)
}

fn unescape(input: &str) -> Result<String, ProtocolError> {
    if !input.contains('\\') {
        return Ok(input.to_string());
    }
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            Some('\\') => out.push('\\'),
            other => {
                return Err(ProtocolError::MalformedFrame(format!(
                    "invalid header escape sequence '\\{}'",
                    other.map(String::from).unwrap_or_default()
                )))
            }
        }
    }
    Ok(out)
}

/// A line as read from the wire: its bytes and whether a line terminator
/// was actually consumed (false when the data ran out first).
struct Line<'a> {
    bytes: &'a [u8],
    terminated: bool,
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn has_remaining(&self) -> bool {
        self.pos < self.data.len()
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Read bytes up to (and consuming) the next line terminator.
    fn read_line(&mut self) -> Result<Line<'a>, ProtocolError> {
        let start = self.pos;
        while self.pos < self.data.len() {
            match self.data[self.pos] {
                b'\n' => {
                    let line = &self.data[start..self.pos];
                    self.pos += 1;
                    return Ok(Line {
                        bytes: line,
                        terminated: true,
                    });
                }
                b'\r' => {
                    if self.data.get(self.pos + 1) == Some(&b'\n') {
                        let line = &self.data[start..self.pos];
                        self.pos += 2;
                        return Ok(Line {
                            bytes: line,
                            terminated: true,
                        });
                    }
                    return Err(ProtocolError::MalformedFrame(
                        "'\\r' must be followed by '\\n'".into(),
                    ));
                }
                _ => self.pos += 1,
            }
        }
        Ok(Line {
            bytes: &self.data[start..],
            terminated: false,
        })
    }

    fn take(&mut self, len: usize) -> &'a [u8] {
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        slice
    }

    fn next_byte(&mut self) -> Option<u8> {
        let byte = self.data.get(self.pos).copied();
        if byte.is_some() {
            self.pos += 1;
        }
        byte
    }

    /// Bytes up to the next NUL, consuming the NUL. `None` if no NUL remains.
    fn take_until_nul(&mut self) -> Option<&'a [u8]> {
        let rest = &self.data[self.pos..];
        let nul = rest.iter().position(|&b| b == 0)?;
        self.pos += nul + 1;
        Some(&rest[..nul])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::encode;

    fn frame(outcome: DecodeOutcome) -> Frame {
        match outcome {
            DecodeOutcome::Frame(f) => f,
            other => panic!("expected frame, got {:?}", other),
        }
    }

    #[test]
    fn single_fragment() {
        let mut decoder = StompDecoder::new();
        let f = frame(decoder.decode(b"SEND\na:alpha\n\nMessage body\0").unwrap());
        assert_eq!(f.command, Command::Send);
        assert_eq!(f.headers.get("a"), Some("alpha"));
        assert_eq!(f.payload, b"Message body");
    }

    #[test]
    fn max_buffer_size() {
        let mut decoder = StompDecoder::buffering(10);
        let err = decoder.decode(b"SEND\na:alpha\n\nMessage body").unwrap_err();
        assert!(matches!(err, ProtocolError::BufferOverflow { limit: 10 }));
        // The decoder is desynchronized and refuses further input.
        assert!(matches!(
            decoder.decode(b"SEND\n\n\0").unwrap_err(),
            ProtocolError::DecoderReuse
        ));
    }

    #[test]
    fn invalid_frame() {
        let mut decoder = StompDecoder::buffering(10);
        let err = decoder.decode(b"FOO\n\n\0").unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedFrame(_)));
    }

    #[test]
    fn multiple_fragments() {
        let mut decoder = StompDecoder::buffering(128);
        assert_eq!(
            decoder.decode(b"SEND\na:alpha\n\nMessage").unwrap(),
            DecodeOutcome::Incomplete
        );
        let f = frame(decoder.decode(b" body\0").unwrap());
        assert_eq!(f.command, Command::Send);
        assert_eq!(f.headers.get("a"), Some("alpha"));
        assert_eq!(f.payload, b"Message body");
    }

    #[test]
    fn reuse_non_buffered() {
        let mut decoder = StompDecoder::new();
        for _ in 0..2 {
            let f = frame(decoder.decode(b"SEND\na:alpha\n\nMessage body\0").unwrap());
            assert_eq!(f.payload, b"Message body");
        }
    }

    #[test]
    fn reuse_buffered() {
        let mut decoder = StompDecoder::new();
        assert_eq!(
            decoder.decode(b"SEND\na:alpha\n\nMessage").unwrap(),
            DecodeOutcome::Incomplete
        );
        assert!(matches!(
            decoder.decode(b" body\0").unwrap_err(),
            ProtocolError::DecoderReuse
        ));
    }

    #[test]
    fn reset_clears_partial_state() {
        let mut decoder = StompDecoder::new();
        decoder.decode(b"SEND\na:alpha\n\nMessage").unwrap();
        decoder.reset();
        let f = frame(decoder.decode(b"SEND\n\nhi\0").unwrap());
        assert_eq!(f.payload, b"hi");
    }

    #[test]
    fn heartbeats() {
        let mut decoder = StompDecoder::new();
        assert_eq!(decoder.decode(b"\n").unwrap(), DecodeOutcome::Heartbeat);
        assert_eq!(decoder.decode(b"\r\n").unwrap(), DecodeOutcome::Heartbeat);
        // Buffering decoders see heartbeats too.
        let mut buffered = StompDecoder::buffering(64);
        assert_eq!(buffered.decode(b"\n").unwrap(), DecodeOutcome::Heartbeat);
    }

    #[test]
    fn whitespace_only_command_is_heartbeat() {
        let mut decoder = StompDecoder::new();
        assert_eq!(decoder.decode(b"  \n\0").unwrap(), DecodeOutcome::Heartbeat);
    }

    #[test]
    fn empty_chunk_is_incomplete() {
        let mut decoder = StompDecoder::buffering(64);
        assert_eq!(decoder.decode(b"").unwrap(), DecodeOutcome::Incomplete);
    }

    #[test]
    fn leading_eol_between_frames_skipped() {
        let mut decoder = StompDecoder::new();
        let f = frame(decoder.decode(b"\n\r\nSEND\n\nx\0").unwrap());
        assert_eq!(f.payload, b"x");
    }

    #[test]
    fn trailing_eol_after_terminator_skipped() {
        let mut decoder = StompDecoder::new();
        let f = frame(decoder.decode(b"SEND\na:1\n\nx\0\n\r\n").unwrap());
        assert_eq!(f.payload, b"x");
    }

    #[test]
    fn crlf_line_terminators() {
        let mut decoder = StompDecoder::new();
        let f = frame(decoder.decode(b"SEND\r\na:alpha\r\n\r\nbody\0").unwrap());
        assert_eq!(f.headers.get("a"), Some("alpha"));
        assert_eq!(f.payload, b"body");
    }

    #[test]
    fn stray_carriage_return_is_malformed() {
        let mut decoder = StompDecoder::new();
        let err = decoder.decode(b"SEND\rX\na:1\n\nx\0").unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedFrame(_)));
    }

    #[test]
    fn content_length_fixes_payload_with_nul_bytes() {
        let mut decoder = StompDecoder::new();
        let f = frame(decoder.decode(b"SEND\ncontent-length:5\n\nab\0cd\0").unwrap());
        assert_eq!(f.payload, b"ab\0cd");
    }

    #[test]
    fn content_length_mismatch_is_malformed() {
        let mut decoder = StompDecoder::new();
        let err = decoder.decode(b"SEND\ncontent-length:3\n\nabcd\0").unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedFrame(_)));
    }

    #[test]
    fn invalid_content_length_falls_back_to_nul_terminated() {
        let mut decoder = StompDecoder::new();
        let f = frame(decoder.decode(b"SEND\ncontent-length:abc\n\nbody\0").unwrap());
        assert_eq!(f.payload, b"body");
        assert_eq!(f.headers.get(CONTENT_LENGTH), Some("abc"));
    }

    #[test]
    fn short_content_length_rebuffers_until_complete() {
        // Chunk one ends on a NUL that is payload data, not the terminator.
        let mut decoder = StompDecoder::buffering(128);
        assert_eq!(
            decoder.decode(b"SEND\ncontent-length:10\n\nabc\0").unwrap(),
            DecodeOutcome::Incomplete
        );
        let f = frame(decoder.decode(b"def\0gh\0").unwrap());
        assert_eq!(f.payload, b"abc\0def\0gh");
    }

    #[test]
    fn header_unescaping() {
        let mut decoder = StompDecoder::new();
        let f = frame(
            decoder
                .decode(b"SEND\na\\cb:1\\n2\\r3\\\\4\n\nx\0")
                .unwrap(),
        );
        assert_eq!(f.headers.get("a:b"), Some("1\n2\r3\\4"));
    }

    #[test]
    fn invalid_escape_is_malformed() {
        let mut decoder = StompDecoder::new();
        let err = decoder.decode(b"SEND\na:b\\t\n\nx\0").unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedFrame(_)));
    }

    #[test]
    fn duplicate_headers_preserved_in_order() {
        let mut decoder = StompDecoder::new();
        let f = frame(decoder.decode(b"SEND\nfoo:1\nfoo:2\n\nx\0").unwrap());
        assert_eq!(f.headers.get_all("foo").collect::<Vec<_>>(), vec!["1", "2"]);
    }

    #[test]
    fn illegal_header_with_more_lines_is_malformed() {
        let mut decoder = StompDecoder::new();
        for payload in [
            &b"SEND\nno-colon\na:1\n\nx\0"[..],
            &b"SEND\n:value\na:1\n\nx\0"[..],
            &b"SEND\nname:\na:1\n\nx\0"[..],
        ] {
            let err = decoder.decode(payload).unwrap_err();
            assert!(matches!(err, ProtocolError::MalformedFrame(_)));
        }
    }

    #[test]
    fn malformed_trailing_fragment_is_tolerated_as_incomplete() {
        let mut decoder = StompDecoder::new();
        assert_eq!(
            decoder.decode(b"SEND\nno-colon-yet\0").unwrap(),
            DecodeOutcome::Incomplete
        );
    }

    #[test]
    fn body_not_allowed() {
        let mut decoder = StompDecoder::new();
        let err = decoder.decode(b"SUBSCRIBE\nid:1\n\nbody\0").unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedFrame(_)));
        // An empty payload is fine for any command.
        let f = frame(decoder.decode(b"SUBSCRIBE\nid:1\n\n\0").unwrap());
        assert_eq!(f.command, Command::Subscribe);
    }

    #[test]
    fn round_trip_preserves_frame() {
        let original = Frame::new(Command::Message)
            .with_header("subscription", "sub-0")
            .with_header("destination", "/topic/greetings")
            .with_header("weird", "colon:and\nnewline")
            .with_payload(&b"hello there"[..]);
        let mut decoder = StompDecoder::new();
        let decoded = frame(decoder.decode(&encode(&original)).unwrap());
        assert_eq!(decoded, original);
    }

    #[test]
    fn fragmentation_equivalence_at_every_boundary() {
        let original = Frame::new(Command::Send)
            .with_header("destination", "/queue/a")
            .with_header("x", "esc\\aped\ncontent")
            .with_payload(&b"fragmented payload"[..]);
        let bytes = encode(&original);

        let mut whole = StompDecoder::new();
        let reference = frame(whole.decode(&bytes).unwrap());

        for split in 1..bytes.len() {
            let mut decoder = StompDecoder::buffering(1024);
            match decoder.decode(&bytes[..split]).unwrap() {
                DecodeOutcome::Incomplete => {
                    let f = frame(decoder.decode(&bytes[split..]).unwrap());
                    assert_eq!(f, reference, "split at {}", split);
                }
                other => panic!("split at {}: unexpected {:?}", split, other),
            }
        }
    }

    #[test]
    fn overflow_across_fragments() {
        let mut decoder = StompDecoder::buffering(16);
        assert_eq!(
            decoder.decode(b"SEND\na:1\n\nabc").unwrap(),
            DecodeOutcome::Incomplete
        );
        let err = decoder.decode(b"defghijklmnop").unwrap_err();
        assert!(matches!(err, ProtocolError::BufferOverflow { limit: 16 }));
    }
}
