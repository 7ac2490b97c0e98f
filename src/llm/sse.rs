//! Incremental Server-Sent Events framing
//!
//! Bytes are buffered until a blank line closes a frame, so multi-byte UTF-8
//! characters split across network chunks are decoded intact.

/// Incremental parser for SSE byte streams.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
}

impl SseParser {
    /// Feed arbitrary bytes and drain the `data:` payloads of complete frames.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend(bytes.iter().copied().filter(|b| *b != b'\r'));
        let mut payloads = Vec::new();

        while let Some(split) = find_frame_end(&self.buffer) {
            let frame: Vec<u8> = self.buffer.drain(..split + 2).collect();
            let frame = String::from_utf8_lossy(&frame[..split]);

            if let Some(payload) = extract_data_payload(&frame) {
                if payload == "[DONE]" {
                    continue;
                }
                payloads.push(payload);
            }
        }

        payloads
    }

    /// Drain whatever is left once the byte stream has ended.
    ///
    /// Servers are allowed to omit the blank line after the final frame.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let frame = String::from_utf8_lossy(&rest);
        extract_data_payload(&frame).filter(|payload| payload != "[DONE]")
    }

    #[cfg(test)]
    pub fn is_empty_buffer(&self) -> bool {
        self.buffer.iter().all(u8::is_ascii_whitespace)
    }
}

fn find_frame_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|window| window == b"\n\n")
}

fn extract_data_payload(frame: &str) -> Option<String> {
    let data_lines: Vec<&str> = frame
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .collect();

    if data_lines.is_empty() {
        None
    } else {
        Some(data_lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::SseParser;

    #[test]
    fn parse_frames_incrementally() {
        let mut parser = SseParser::default();
        let mut payloads = Vec::new();

        payloads.extend(parser.feed(b"data: {\"a\":1}\n\n"));
        assert_eq!(payloads, vec!["{\"a\":1}".to_string()]);

        payloads.extend(parser.feed(b"data: [DONE]\n\n"));
        assert_eq!(payloads.len(), 1);
        assert!(parser.is_empty_buffer());
    }

    #[test]
    fn frame_split_across_chunks() {
        let mut parser = SseParser::default();
        assert!(parser.feed(b"data: {\"text\":").is_empty());
        assert!(parser.feed(b"\"hi\"}\n").is_empty());
        assert_eq!(parser.feed(b"\n"), vec!["{\"text\":\"hi\"}".to_string()]);
    }

    #[test]
    fn crlf_delimiters() {
        let mut parser = SseParser::default();
        let payloads = parser.feed(b"data: one\r\n\r\ndata: two\r\n\r\n");
        assert_eq!(payloads, vec!["one".to_string(), "two".to_string()]);
    }

    #[test]
    fn multibyte_character_split_across_chunks() {
        let frame = "data: 你好\n\n".as_bytes();
        // Split inside the three-byte encoding of the first character
        let (head, tail) = frame.split_at(7);
        let mut parser = SseParser::default();
        assert!(parser.feed(head).is_empty());
        assert_eq!(parser.feed(tail), vec!["你好".to_string()]);
    }

    #[test]
    fn comment_and_event_lines_ignored() {
        let mut parser = SseParser::default();
        let payloads = parser.feed(b": keep-alive\n\nevent: message\ndata: x\n\n");
        assert_eq!(payloads, vec!["x".to_string()]);
    }

    #[test]
    fn finish_drains_unterminated_frame() {
        let mut parser = SseParser::default();
        assert!(parser.feed(b"data: last").is_empty());
        assert_eq!(parser.finish(), Some("last".to_string()));
        assert!(parser.is_empty_buffer());
        assert_eq!(parser.finish(), None);
    }
}
