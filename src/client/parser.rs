//! Inbound envelope decoder.
//!
//! A byte-at-a-time state machine over the response head, followed by a
//! verbatim copy of `Content-Length` payload bytes:
//!
//! ```text
//! StatusLine ─\r─▶ LineEnd ─\n─▶ LineStart ─\r─▶ HeadEnd ─\n─▶ Payload
//!                     ▲              │
//!                     └─\r─ Header ◀─┘ (any other byte)
//! ```
//!
//! Bytes are read straight into the caller's buffer and never beyond its
//! free space, so nothing is pulled off the socket that cannot be returned.

use std::collections::HashMap;

use crate::client::transport::Transport;
use crate::error::{Result, TunnelError};

const MAX_LINE_LEN: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    StatusLine,
    LineEnd,
    LineStart,
    Header,
    HeadEnd,
    Payload,
}

/// Decodes a single response. Discard once [`has_remaining`](Self::has_remaining) is false.
#[derive(Debug)]
pub struct ResponseParser {
    state: State,
    line: Vec<u8>,
    headers: HashMap<String, String>,
    payload_remaining: usize,
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseParser {
    pub fn new() -> Self {
        Self {
            state: State::StatusLine,
            line: Vec::new(),
            headers: HashMap::new(),
            payload_remaining: 0,
        }
    }

    /// Read from `transport` and deliver payload bytes into `dst`.
    ///
    /// Returns the number of payload bytes written to the front of `dst`.
    pub fn read<T: Transport + ?Sized>(&mut self, transport: &mut T, dst: &mut [u8]) -> Result<usize> {
        let mut delivered = 0;

        while delivered < dst.len() && self.has_remaining() {
            let window = match self.state {
                State::Payload => (dst.len() - delivered).min(self.payload_remaining),
                _ => dst.len() - delivered,
            };
            let chunk = delivered..delivered + window;
            let n = transport.read(&mut dst[chunk.clone()])?;
            if n == 0 {
                break;
            }

            let mut head_bytes = 0;
            while head_bytes < n && self.state != State::Payload {
                self.advance(dst[chunk.start + head_bytes])?;
                head_bytes += 1;
            }

            let payload = n - head_bytes;
            if payload > self.payload_remaining {
                return Err(TunnelError::protocol(format!(
                    "{} bytes received past the end of the response",
                    payload - self.payload_remaining
                )));
            }
            dst.copy_within(chunk.start + head_bytes..chunk.start + n, delivered);
            delivered += payload;
            self.payload_remaining -= payload;
        }

        Ok(delivered)
    }

    /// True until the complete payload has been delivered.
    pub fn has_remaining(&self) -> bool {
        self.state != State::Payload || self.payload_remaining > 0
    }

    /// Response headers parsed so far, with their original casing.
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    fn advance(&mut self, byte: u8) -> Result<()> {
        match self.state {
            State::StatusLine | State::Header => {
                if byte == b'\r' {
                    let line = self.take_line()?;
                    if self.state == State::StatusLine {
                        check_status_line(&line)?;
                    } else {
                        self.add_header(&line)?;
                    }
                    self.state = State::LineEnd;
                } else {
                    self.push(byte)?;
                }
            }
            State::LineEnd => {
                expect_line_feed(byte)?;
                self.state = State::LineStart;
            }
            State::LineStart => {
                if byte == b'\r' {
                    self.state = State::HeadEnd;
                } else {
                    self.push(byte)?;
                    self.state = State::Header;
                }
            }
            State::HeadEnd => {
                expect_line_feed(byte)?;
                self.payload_remaining = self.content_length()?;
                self.state = State::Payload;
            }
            State::Payload => unreachable!("payload bytes are copied, not parsed"),
        }
        Ok(())
    }

    fn push(&mut self, byte: u8) -> Result<()> {
        if self.line.len() >= MAX_LINE_LEN {
            return Err(TunnelError::protocol(format!(
                "response line exceeds {MAX_LINE_LEN} bytes"
            )));
        }
        self.line.push(byte);
        Ok(())
    }

    fn take_line(&mut self) -> Result<String> {
        String::from_utf8(std::mem::take(&mut self.line))
            .map_err(|_| TunnelError::protocol("response head is not valid UTF-8"))
    }

    fn add_header(&mut self, line: &str) -> Result<()> {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| TunnelError::protocol(format!("malformed header line {line:?}")))?;
        let (name, value) = (name.trim(), value.trim());
        if name.eq_ignore_ascii_case("content-length") {
            let conflict = self.headers.iter().any(|(seen, earlier)| {
                seen.eq_ignore_ascii_case("content-length") && earlier != value
            });
            if conflict {
                return Err(TunnelError::protocol(format!(
                    "conflicting Content-Length headers, got {value:?} after an earlier value"
                )));
            }
        }
        self.headers.insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn content_length(&self) -> Result<usize> {
        let value = self
            .headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
            .map(|(_, value)| value)
            .ok_or_else(|| TunnelError::protocol("response has no Content-Length header"))?;
        value
            .parse::<usize>()
            .map_err(|_| TunnelError::protocol(format!("invalid Content-Length {value:?}")))
    }
}

/// `HTTP/1.1 200 <reason>`. The reason phrase may be empty but its separator may not.
fn check_status_line(line: &str) -> Result<()> {
    let mut parts = line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    let status = parts.next().unwrap_or_default();
    let reason = parts.next();
    if version != "HTTP/1.1" || status != "200" || reason.is_none() {
        return Err(TunnelError::protocol(format!(
            "unexpected status line {line:?}"
        )));
    }
    Ok(())
}

fn expect_line_feed(byte: u8) -> Result<()> {
    if byte != b'\n' {
        return Err(TunnelError::protocol(format!(
            "expected line feed after carriage return, got {byte:#04x}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::testing::MemorySocket;
    use crate::client::transport::PlainTransport;
    use crate::protocol::encode_frame;

    const FOO: [u8; 7] = [0x00, 0x00, 0x00, 0x03, 0x66, 0x6f, 0x6f];

    fn response(body: &[u8]) -> Vec<u8> {
        let mut bytes = format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n", body.len()).into_bytes();
        bytes.extend_from_slice(body);
        bytes
    }

    #[test]
    fn reconstructs_payload_across_three_reads() {
        let (socket, peer) = MemorySocket::pair();
        let mut transport = PlainTransport::new(socket);
        let mut parser = ResponseParser::new();
        let wire = response(&FOO);

        let mut payload = Vec::new();
        let mut dst = [0u8; 10];
        for segment in [&wire[..20], &wire[20..40], &wire[40..]] {
            assert!(parser.has_remaining());
            peer.send(segment);
            let n = parser.read(&mut transport, &mut dst).unwrap();
            payload.extend_from_slice(&dst[..n]);
        }

        assert_eq!(payload, FOO);
        assert!(!parser.has_remaining());
    }

    #[test]
    fn ten_byte_reads_report_remaining_until_last_byte() {
        let (socket, peer) = MemorySocket::pair();
        peer.set_read_chunk(10);
        let mut transport = PlainTransport::new(socket);
        let mut parser = ResponseParser::new();
        peer.send(&response(&FOO));

        let mut dst = [0u8; 10];
        let mut payload = Vec::new();
        while parser.has_remaining() {
            let n = parser.read(&mut transport, &mut dst).unwrap();
            payload.extend_from_slice(&dst[..n]);
            if payload.len() < FOO.len() {
                assert!(parser.has_remaining());
            }
        }
        assert_eq!(payload, FOO);
        assert_eq!(peer.unread(), 0);
    }

    #[test]
    fn rejects_non_200_status() {
        let (socket, peer) = MemorySocket::pair();
        let mut transport = PlainTransport::new(socket);
        let mut parser = ResponseParser::new();
        peer.send(b"HTTP/1.1 404 Not Found\r\nContent-Length: 7\r\n\r\n\x00\x00\x00\x03foo");

        let mut dst = [0u8; 64];
        assert!(matches!(
            parser.read(&mut transport, &mut dst),
            Err(TunnelError::Protocol(_))
        ));
    }

    #[test]
    fn rejects_other_http_versions() {
        let (socket, peer) = MemorySocket::pair();
        let mut transport = PlainTransport::new(socket);
        let mut parser = ResponseParser::new();
        peer.send(b"HTTP/1.0 200 OK\r\n");

        let mut dst = [0u8; 64];
        assert!(parser.read(&mut transport, &mut dst).is_err());
    }

    #[test]
    fn requires_content_length() {
        let (socket, peer) = MemorySocket::pair();
        let mut transport = PlainTransport::new(socket);
        let mut parser = ResponseParser::new();
        peer.send(b"HTTP/1.1 200 OK\r\nContent-Type: application/octet-stream\r\n\r\n");

        let mut dst = [0u8; 64];
        assert!(matches!(
            parser.read(&mut transport, &mut dst),
            Err(TunnelError::Protocol(_))
        ));
    }

    #[test]
    fn headers_are_trimmed_and_last_write_wins() {
        let (socket, peer) = MemorySocket::pair();
        let mut transport = PlainTransport::new(socket);
        let mut parser = ResponseParser::new();
        peer.send(b"HTTP/1.1 200 OK\r\nX-Trace:  one \r\nX-Trace: two\r\ncontent-length: 0\r\n\r\n");

        let mut dst = [0u8; 64];
        assert_eq!(parser.read(&mut transport, &mut dst).unwrap(), 0);
        assert!(!parser.has_remaining());
        assert_eq!(parser.headers().get("X-Trace").map(String::as_str), Some("two"));
        assert_eq!(parser.headers().get("content-length").map(String::as_str), Some("0"));
    }

    #[test]
    fn never_reads_past_destination_capacity() {
        let (socket, peer) = MemorySocket::pair();
        let mut transport = PlainTransport::new(socket);
        let mut parser = ResponseParser::new();
        let wire = response(&encode_frame(b"payload"));
        peer.send(&wire);

        let mut dst = [0u8; 5];
        let n = parser.read(&mut transport, &mut dst).unwrap();
        assert!(n <= dst.len());
        // Whatever was not delivered is still on the socket
        let consumed = wire.len() - peer.unread();
        assert_eq!(consumed - n, wire.len() - 11);
    }

    #[test]
    fn byte_at_a_time_matches_single_read() {
        let body = encode_frame(&(0..=255u8).cycle().take(70_000).collect::<Vec<_>>());
        let wire = response(&body);

        let (socket, peer) = MemorySocket::pair();
        let mut transport = PlainTransport::new(socket);
        let mut parser = ResponseParser::new();
        peer.send(&wire);
        let mut whole = vec![0u8; body.len()];
        assert_eq!(parser.read(&mut transport, &mut whole).unwrap(), body.len());
        assert!(!parser.has_remaining());

        let (socket, peer) = MemorySocket::pair();
        peer.set_read_chunk(1);
        let mut transport = PlainTransport::new(socket);
        let mut parser = ResponseParser::new();
        peer.send(&wire);
        let mut trickled = Vec::new();
        let mut byte = [0u8; 1];
        while parser.has_remaining() {
            let n = parser.read(&mut transport, &mut byte).unwrap();
            trickled.extend_from_slice(&byte[..n]);
        }

        assert_eq!(trickled, whole);
        assert_eq!(&whole[..], &body[..]);
    }

    #[test]
    fn rejects_bytes_beyond_content_length() {
        let (socket, peer) = MemorySocket::pair();
        let mut transport = PlainTransport::new(socket);
        let mut parser = ResponseParser::new();
        let mut wire = response(&FOO);
        wire.extend_from_slice(b"junk");
        peer.send(&wire);

        let mut dst = [0u8; 128];
        assert!(matches!(
            parser.read(&mut transport, &mut dst),
            Err(TunnelError::Protocol(_))
        ));
    }

    #[test]
    fn conflicting_content_lengths_are_rejected() {
        let (socket, peer) = MemorySocket::pair();
        let mut transport = PlainTransport::new(socket);
        let mut parser = ResponseParser::new();
        peer.send(b"HTTP/1.1 200 OK\r\nContent-Length: 4\r\ncontent-length: 5\r\n\r\n\x00\x00\x00\x01x");

        let mut dst = [0u8; 64];
        assert!(matches!(
            parser.read(&mut transport, &mut dst),
            Err(TunnelError::Protocol(_))
        ));
    }

    #[test]
    fn repeated_identical_content_length_is_accepted() {
        let (socket, peer) = MemorySocket::pair();
        let mut transport = PlainTransport::new(socket);
        let mut parser = ResponseParser::new();
        let mut wire = b"HTTP/1.1 200 OK\r\nContent-Length: 7\r\ncontent-length: 7\r\n\r\n".to_vec();
        wire.extend_from_slice(&FOO);
        peer.send(&wire);

        let mut dst = [0u8; 64];
        assert_eq!(parser.read(&mut transport, &mut dst).unwrap(), FOO.len());
        assert_eq!(&dst[..FOO.len()], &FOO);
        assert!(!parser.has_remaining());
    }

    #[test]
    fn status_line_needs_a_reason_phrase() {
        let (socket, peer) = MemorySocket::pair();
        let mut transport = PlainTransport::new(socket);
        let mut parser = ResponseParser::new();
        peer.send(b"HTTP/1.1 200\r\nContent-Length: 0\r\n\r\n");

        let mut dst = [0u8; 64];
        assert!(matches!(
            parser.read(&mut transport, &mut dst),
            Err(TunnelError::Protocol(_))
        ));
    }

    #[test]
    fn empty_reason_phrase_is_accepted() {
        let (socket, peer) = MemorySocket::pair();
        let mut transport = PlainTransport::new(socket);
        let mut parser = ResponseParser::new();
        peer.send(b"HTTP/1.1 200 \r\nContent-Length: 0\r\n\r\n");

        let mut dst = [0u8; 64];
        assert_eq!(parser.read(&mut transport, &mut dst).unwrap(), 0);
        assert!(!parser.has_remaining());
    }
}
