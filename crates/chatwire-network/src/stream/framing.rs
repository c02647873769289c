//! Byte-level record framing for streamed bodies.
//!
//! Frames are cut on ASCII delimiters before any UTF-8 decoding, so a
//! multi-byte character split across two network chunks is reassembled
//! intact.

/// How a stream separates its records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Server-sent events: records end at a blank line (`\n\n` or `\r\n\r\n`).
    Sse,
    /// One record per line.
    Lines,
}

/// Incremental framer. Feed chunks with [`Framer::push`], then drain the
/// trailing fragment with [`Framer::finish`].
#[derive(Debug)]
pub struct Framer {
    framing: Framing,
    buf: Vec<u8>,
}

impl Framer {
    pub fn new(framing: Framing) -> Self {
        Self {
            framing,
            buf: Vec::new(),
        }
    }

    /// Append a chunk and return every record it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut records = Vec::new();
        let mut start = 0;

        while let Some((end, next)) = self.find_boundary(start) {
            let raw = &self.buf[start..end];
            if let Some(record) = decode(raw) {
                records.push(record);
            }
            start = next;
        }
        self.buf.drain(..start);
        records
    }

    /// The unterminated remainder, if it holds anything.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buf);
        decode(&rest)
    }

    /// Bytes buffered while waiting for a delimiter.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// (record end, start of the next record) for the first boundary at or
    /// after `from`.
    fn find_boundary(&self, from: usize) -> Option<(usize, usize)> {
        let buf = &self.buf;
        let mut i = from;
        while i < buf.len() {
            if buf[i] == b'\n' {
                match self.framing {
                    Framing::Lines => return Some((i, i + 1)),
                    Framing::Sse => {
                        if buf.get(i + 1) == Some(&b'\n') {
                            return Some((i, i + 2));
                        }
                        if buf.get(i + 1) == Some(&b'\r') && buf.get(i + 2) == Some(&b'\n') {
                            return Some((i, i + 3));
                        }
                    }
                }
            }
            i += 1;
        }
        None
    }
}

fn decode(raw: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(raw);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// One parsed server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// Parse an SSE record. Multiple `data:` lines are joined with `\n`;
/// records without data (comments, bare `event:` lines) yield `None`.
pub fn parse_sse(record: &str) -> Option<SseEvent> {
    let mut event = None;
    let mut data: Vec<&str> = Vec::new();

    for line in record.lines() {
        let line = line.trim_end_matches('\r');
        if line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => (line, ""),
        };
        match field {
            "event" => event = Some(value.to_string()),
            "data" => data.push(value),
            _ => {}
        }
    }

    if data.is_empty() {
        return None;
    }
    Some(SseEvent {
        event,
        data: data.join("\n"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sse_frames_across_chunks() {
        let mut framer = Framer::new(Framing::Sse);
        assert!(framer.push(b"data: {\"a\"").is_empty());
        let records = framer.push(b":1}\n\ndata: [DONE]\n\n");
        assert_eq!(records, vec!["data: {\"a\":1}", "data: [DONE]"]);
        assert_eq!(framer.pending(), 0);
    }

    #[test]
    fn test_crlf_blank_line() {
        let mut framer = Framer::new(Framing::Sse);
        let records = framer.push(b"event: delta\r\ndata: x\r\n\r\ndata: y");
        assert_eq!(records.len(), 1);
        let ev = parse_sse(&records[0]).unwrap();
        assert_eq!(ev.event.as_deref(), Some("delta"));
        assert_eq!(ev.data, "x");
        assert_eq!(framer.finish().as_deref(), Some("data: y"));
    }

    #[test]
    fn test_split_multibyte_character() {
        let bytes = "data: \"héllo\"\n\n".as_bytes();
        let split = bytes.iter().position(|b| *b >= 0x80).unwrap() + 1;
        let mut framer = Framer::new(Framing::Sse);
        assert!(framer.push(&bytes[..split]).is_empty());
        let records = framer.push(&bytes[split..]);
        assert_eq!(records, vec!["data: \"héllo\""]);
    }

    #[test]
    fn test_line_framing_skips_blank_lines() {
        let mut framer = Framer::new(Framing::Lines);
        let records = framer.push(b"0:\"a\"\n\n0:\"b\"\nd:{}");
        assert_eq!(records, vec!["0:\"a\"", "0:\"b\""]);
        assert_eq!(framer.finish().as_deref(), Some("d:{}"));
        assert_eq!(framer.finish(), None);
    }

    #[test]
    fn test_parse_sse_comment_and_multiline() {
        assert_eq!(parse_sse(": keepalive"), None);
        assert_eq!(parse_sse("event: ping"), None);
        let ev = parse_sse("data: a\ndata: b").unwrap();
        assert_eq!(ev.data, "a\nb");
        assert_eq!(ev.event, None);
    }
}
