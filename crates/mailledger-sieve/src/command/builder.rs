//! Wire encoding of command arguments.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// Incrementally serializes a command line.
///
/// Arguments are separated by a single space and the line is terminated
/// with CRLF by [`RequestBuilder::into_bytes`].
#[derive(Debug, Clone, Default)]
pub struct RequestBuilder {
    buf: Vec<u8>,
}

impl RequestBuilder {
    /// Starts a line with the given command keyword.
    #[must_use]
    pub fn new(command: &str) -> Self {
        Self {
            buf: command.as_bytes().to_vec(),
        }
    }

    /// Starts a line with no command keyword, used for SASL client replies.
    #[must_use]
    pub const fn continuation() -> Self {
        Self { buf: Vec::new() }
    }

    fn separate(&mut self) {
        if !self.buf.is_empty() {
            self.buf.push(b' ');
        }
    }

    /// Appends a bare token.
    #[must_use]
    pub fn add_token(mut self, token: &str) -> Self {
        self.separate();
        self.buf.extend_from_slice(token.as_bytes());
        self
    }

    /// Appends a quoted string, escaping `"` and `\`.
    #[must_use]
    pub fn add_quoted_string(mut self, value: &str) -> Self {
        self.separate();
        self.buf.reserve(value.len() + 2);
        self.buf.push(b'"');
        for b in value.bytes() {
            if b == b'"' || b == b'\\' {
                self.buf.push(b'\\');
            }
            self.buf.push(b);
        }
        self.buf.push(b'"');
        self
    }

    /// Appends base64-encoded data as a quoted string.
    #[must_use]
    pub fn add_quoted_base64(self, data: &[u8]) -> Self {
        let encoded = encode_base64(data);
        self.add_quoted_string(&encoded)
    }

    /// Appends a non-synchronizing literal `{N+}\r\n<value>`.
    ///
    /// `N` is the UTF-8 byte length of `value`.
    #[must_use]
    pub fn add_literal(mut self, value: &str) -> Self {
        self.separate();
        self.buf
            .extend_from_slice(format!("{{{}+}}\r\n", byte_length(value)).as_bytes());
        self.buf.extend_from_slice(value.as_bytes());
        self
    }

    /// Appends base64-encoded data as a literal.
    #[must_use]
    pub fn add_literal_base64(self, data: &[u8]) -> Self {
        let encoded = encode_base64(data);
        self.add_literal(&encoded)
    }

    /// Terminates the line with CRLF and returns the wire bytes.
    #[must_use]
    pub fn into_bytes(mut self) -> Vec<u8> {
        self.buf.extend_from_slice(b"\r\n");
        self.buf
    }
}

/// Returns the length of `value` in UTF-8 octets.
#[must_use]
pub const fn byte_length(value: &str) -> usize {
    value.len()
}

/// Encodes bytes as standard padded base64.
#[must_use]
pub fn encode_base64(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Decodes standard base64, returning `None` when malformed.
#[must_use]
pub fn decode_base64(data: &str) -> Option<Vec<u8>> {
    STANDARD.decode(data.trim()).ok()
}

/// Rewrites every line terminator as CRLF.
///
/// Recognized terminators are CRLF, lone CR, lone LF, NEL (U+0085),
/// form feed, LINE SEPARATOR (U+2028) and PARAGRAPH SEPARATOR (U+2029).
#[must_use]
pub fn normalize_line_endings(script: &str) -> String {
    let mut normalized = String::with_capacity(script.len());
    let mut chars = script.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\r' => {
                chars.next_if_eq(&'\n');
                normalized.push_str("\r\n");
            }
            '\n' | '\u{85}' | '\u{0C}' | '\u{2028}' | '\u{2029}' => normalized.push_str("\r\n"),
            other => normalized.push(other),
        }
    }

    normalized
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new)]
mod tests {
    use super::*;
    use crate::parser::ResponseParser;
    use proptest::prelude::*;

    #[test]
    fn test_tokens_and_quotes() {
        let bytes = RequestBuilder::new("RENAMESCRIPT")
            .add_quoted_string("old")
            .add_quoted_string("new \"one\"")
            .into_bytes();
        assert_eq!(bytes, b"RENAMESCRIPT \"old\" \"new \\\"one\\\"\"\r\n");
    }

    #[test]
    fn test_literal_uses_byte_length() {
        let bytes = RequestBuilder::new("CHECKSCRIPT").add_literal("ü").into_bytes();
        assert_eq!(bytes, "CHECKSCRIPT {2+}\r\nü\r\n".as_bytes());
    }

    #[test]
    fn test_continuation_has_no_leading_space() {
        let bytes = RequestBuilder::continuation()
            .add_literal_base64(b"geek")
            .into_bytes();
        assert_eq!(bytes, b"{8+}\r\nZ2Vlaw==\r\n");

        let bytes = RequestBuilder::continuation().add_quoted_string("").into_bytes();
        assert_eq!(bytes, b"\"\"\r\n");
    }

    #[test]
    fn test_base64() {
        assert_eq!(encode_base64(b"th3g33k1"), "dGgzZzMzazE=");
        assert_eq!(decode_base64("VXNlcm5hbWU6").unwrap(), b"Username:");
        assert!(decode_base64("not base64!").is_none());
    }

    #[test]
    fn test_normalize_line_endings() {
        assert_eq!(normalize_line_endings("a\nb\rc\r\nd"), "a\r\nb\r\nc\r\nd");
        assert_eq!(normalize_line_endings("a\r\r\nb"), "a\r\n\r\nb");
        assert_eq!(
            normalize_line_endings("x\u{85}y\u{0C}z\u{2028}w\u{2029}"),
            "x\r\ny\r\nz\r\nw\r\n"
        );
        assert_eq!(normalize_line_endings(""), "");
    }

    proptest! {
        #[test]
        fn quoted_string_survives_parser(value in "[^\r\n]{0,64}") {
            let bytes = RequestBuilder::continuation().add_quoted_string(&value).into_bytes();
            let mut parser = ResponseParser::new(&bytes);
            prop_assert_eq!(parser.extract_string().unwrap(), value);
            prop_assert!(parser.is_line_break());
        }

        #[test]
        fn normalized_literal_survives_parser(script in "(\\PC|\r|\n){0,128}") {
            let normalized = normalize_line_endings(&script);
            let bytes = RequestBuilder::continuation().add_literal(&normalized).into_bytes();
            let mut parser = ResponseParser::new(&bytes);
            let decoded = parser.extract_string().unwrap();

            prop_assert_eq!(&decoded, &normalized);
            prop_assert!(!decoded.replace("\r\n", "").contains(['\r', '\n']));
            prop_assert!(parser.is_line_break());
        }
    }
}
