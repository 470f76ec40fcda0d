//! Byte-level slicing shared by the client and server parsers.
//!
//! Every helper either consumes a complete unit from the front of the buffer
//! or returns `None` and leaves the buffer untouched, which is what lets the
//! state machines suspend mid-message.

use bytes::BytesMut;

/// Parsed start line of a response.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ResponseStarted {
    /// The protocol token, e.g. `HTTP/1.1`.
    pub protocol: String,
    /// The status code.
    pub code: i32,
    /// The status description, e.g. `OK`.
    pub description: String,
}

/// Parsed start line of a request.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct RequestStarted {
    /// The method, e.g. `GET`.
    pub method: String,
    /// The path, query string included.
    pub path: String,
    /// The protocol token, e.g. `HTTP/1.1`.
    pub protocol: String,
}

/// One header field.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct HttpHeader {
    /// The field name, case preserved.
    pub key: String,
    /// The field value.
    pub value: String,
}

pub(crate) fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|index| index + from)
}

/// Consumes `"A B C\r\n"` into its three space-separated parts.
pub(crate) fn parse_start_line(buffer: &mut BytesMut) -> Option<(String, String, String)> {
    let first = find(buffer, b" ", 0)?;
    let second = find(buffer, b" ", first + 1)?;
    let line_end = find(buffer, b"\r\n", second + 1)?;

    let a = String::from_utf8_lossy(&buffer[..first]).into_owned();
    let b = String::from_utf8_lossy(&buffer[first + 1..second]).into_owned();
    let c = String::from_utf8_lossy(&buffer[second + 1..line_end]).into_owned();
    let _ = buffer.split_to(line_end + 2);
    Some((a, b, c))
}

pub(crate) enum HeaderLine {
    /// The empty line terminating the header block.
    End,
    /// A `key: value` field.
    Field { key: String, value: String },
}

/// Consumes one header line. The separator is exactly `": "`: the value
/// starts two bytes past the colon.
pub(crate) fn parse_header_line(buffer: &mut BytesMut) -> Option<HeaderLine> {
    let line_end = find(buffer, b"\r\n", 0)?;
    if line_end == 0 {
        let _ = buffer.split_to(2);
        return Some(HeaderLine::End);
    }

    let colon = find(buffer, b":", 0)?;
    if colon > line_end {
        return None;
    }

    let key = String::from_utf8_lossy(&buffer[..colon]).into_owned();
    let value = if colon + 2 <= line_end {
        String::from_utf8_lossy(&buffer[colon + 2..line_end]).into_owned()
    } else {
        String::new()
    };
    let _ = buffer.split_to(line_end + 2);
    Some(HeaderLine::Field { key, value })
}

/// Consumes a hex chunk-size line.
pub(crate) fn parse_chunk_size(buffer: &mut BytesMut) -> Option<Result<usize, String>> {
    let line_end = find(buffer, b"\r\n", 0)?;
    let text = String::from_utf8_lossy(&buffer[..line_end]).trim().to_string();
    let _ = buffer.split_to(line_end + 2);
    Some(usize::from_str_radix(&text, 16).map_err(|_| format!("bad chunk size {text:?}")))
}

/// Consumes up to `remaining` bytes of body, decrementing the count.
pub(crate) fn take_content(buffer: &mut BytesMut, remaining: &mut usize) -> Option<BytesMut> {
    if buffer.is_empty() {
        return None;
    }
    let count = buffer.len().min(*remaining);
    *remaining -= count;
    Some(buffer.split_to(count))
}

/// Consumes the CRLF that closes a chunk or the zero-size terminator, if it
/// has arrived.
pub(crate) fn take_crlf(buffer: &mut BytesMut) -> bool {
    if buffer.len() >= 2 && &buffer[..2] == b"\r\n" {
        let _ = buffer.split_to(2);
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_lines_split_on_spaces_and_crlf() {
        let mut buffer = BytesMut::from(&b"HTTP/1.1 200 OK\r\nrest"[..]);
        let (protocol, code, description) = parse_start_line(&mut buffer).unwrap();
        assert_eq!((protocol.as_str(), code.as_str(), description.as_str()), ("HTTP/1.1", "200", "OK"));
        assert_eq!(&buffer[..], b"rest");
    }

    #[test]
    fn partial_start_lines_leave_the_buffer_alone() {
        let mut buffer = BytesMut::from(&b"HTTP/1.1 200 OK"[..]);
        assert!(parse_start_line(&mut buffer).is_none());
        assert_eq!(&buffer[..], b"HTTP/1.1 200 OK");
    }

    #[test]
    fn header_values_start_two_bytes_past_the_colon() {
        let mut buffer = BytesMut::from(&b"Host: example.com\r\n"[..]);
        match parse_header_line(&mut buffer).unwrap() {
            HeaderLine::Field { key, value } => {
                assert_eq!(key, "Host");
                assert_eq!(value, "example.com");
            }
            HeaderLine::End => panic!("expected a field"),
        }
    }

    #[test]
    fn the_empty_line_ends_the_header_block() {
        let mut buffer = BytesMut::from(&b"\r\nbody"[..]);
        assert!(matches!(parse_header_line(&mut buffer), Some(HeaderLine::End)));
        assert_eq!(&buffer[..], b"body");
    }

    #[test]
    fn chunk_sizes_parse_as_hex() {
        let mut buffer = BytesMut::from(&b"1a\r\n"[..]);
        assert_eq!(parse_chunk_size(&mut buffer).unwrap().unwrap(), 26);

        let mut bad = BytesMut::from(&b"zz\r\n"[..]);
        assert!(parse_chunk_size(&mut bad).unwrap().is_err());
    }
}
