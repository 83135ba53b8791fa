//! ManageSieve response parser.
//!
//! This module provides a sans-I/O parser for ManageSieve server responses
//! (RFC 5804). It is split into two layers:
//!
//! - [`ResponseParser`]: a forward-only cursor over a byte buffer exposing
//!   predicates (`is_string`, `is_line_break`, `starts_with`, ...) and
//!   consuming extractors (`extract_string`, `extract_token`, ...).
//! - [`response`]: grammar functions composed from those primitives that
//!   build typed values (status trailers, capability listings, script lists).
//!
//! The cursor never rewinds. When a buffer holds only part of a response,
//! extraction fails with [`Error::Parse`] and the caller retries once more
//! bytes have arrived; [`ResponseParser::position`] tells how many bytes a
//! successful parse consumed.
//!
//! # Example
//!
//! ```
//! use mailledger_sieve::parser::{ResponseParser, response};
//! use mailledger_sieve::Status;
//!
//! let mut parser = ResponseParser::new(b"NO (NONEXISTENT) \"no such script\"\r\n");
//! let parsed = response::parse_response(&mut parser).unwrap();
//!
//! assert_eq!(parsed.status, Status::No);
//! assert_eq!(parsed.message(), "no such script");
//! assert!(parser.is_eof());
//! ```

#![allow(clippy::missing_errors_doc)]

pub mod response;

use crate::{Error, Result};

const CR: u8 = b'\r';
const LF: u8 = b'\n';
const SPACE: u8 = b' ';
const QUOTE: u8 = b'"';
const BACKSLASH: u8 = b'\\';
const LEFT_BRACE: u8 = b'{';
const RIGHT_BRACE: u8 = b'}';

/// Cursor over a buffer of server bytes.
#[derive(Debug, Clone)]
pub struct ResponseParser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> ResponseParser<'a> {
    /// Creates a new parser for the given input.
    #[must_use]
    pub const fn new(input: &'a [u8]) -> Self {
        Self { input, pos: 0 }
    }

    /// Returns the number of bytes consumed so far.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.pos
    }

    /// Returns the unconsumed input.
    #[must_use]
    pub fn remaining(&self) -> &'a [u8] {
        &self.input[self.pos.min(self.input.len())..]
    }

    /// Returns true if all input has been consumed.
    #[must_use]
    pub const fn is_eof(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn peek(&self) -> Option<u8> {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.input.get(self.pos + offset).copied()
    }

    /// Checks the upcoming bytes against a sequence of alternatives.
    ///
    /// Each element lists the bytes accepted at that offset, so
    /// `[b"Oo", b"Kk"]` matches `OK`, `ok`, `Ok` and `oK`.
    #[must_use]
    pub fn starts_with(&self, alternatives: &[&[u8]]) -> bool {
        if alternatives.is_empty() {
            return false;
        }

        alternatives
            .iter()
            .enumerate()
            .all(|(offset, accepted)| self.peek_at(offset).is_some_and(|b| accepted.contains(&b)))
    }

    /// Checks for an ASCII keyword, ignoring case.
    #[must_use]
    pub fn starts_with_keyword(&self, keyword: &str) -> bool {
        let keyword = keyword.as_bytes();
        self.remaining()
            .get(..keyword.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(keyword))
    }

    /// Consumes exactly `n` bytes.
    pub fn extract(&mut self, n: usize) -> Result<&'a [u8]> {
        let Some(end) = self.pos.checked_add(n).filter(|&end| end <= self.input.len()) else {
            return Err(self.error(&format!("Expected {n} more bytes")));
        };

        let bytes = &self.input[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    /// Returns true if the cursor is on a CRLF.
    #[must_use]
    pub fn is_line_break(&self) -> bool {
        self.peek() == Some(CR) && self.peek_at(1) == Some(LF)
    }

    /// Consumes a CRLF.
    pub fn extract_line_break(&mut self) -> Result<()> {
        if !self.is_line_break() {
            return Err(self.error("Expected CRLF"));
        }
        self.pos += 2;
        Ok(())
    }

    /// Returns true if the cursor is on a space.
    #[must_use]
    pub fn is_space(&self) -> bool {
        self.peek() == Some(SPACE)
    }

    /// Consumes a single space.
    pub fn extract_space(&mut self) -> Result<()> {
        if !self.is_space() {
            return Err(self.error("Expected space"));
        }
        self.pos += 1;
        Ok(())
    }

    /// Returns true if the cursor is on a quoted string.
    #[must_use]
    pub fn is_quoted(&self) -> bool {
        self.peek() == Some(QUOTE)
    }

    /// Returns true if the cursor is on a literal.
    #[must_use]
    pub fn is_literal(&self) -> bool {
        self.peek() == Some(LEFT_BRACE)
    }

    /// Returns true if the cursor is on a quoted string or a literal.
    #[must_use]
    pub fn is_string(&self) -> bool {
        self.is_quoted() || self.is_literal()
    }

    /// Consumes a quoted string or literal.
    pub fn extract_string(&mut self) -> Result<String> {
        if self.is_quoted() {
            self.extract_quoted()
        } else if self.is_literal() {
            self.extract_literal()
        } else {
            Err(self.error("Expected string"))
        }
    }

    /// Consumes a quoted string and unescapes `\"` and `\\`.
    pub fn extract_quoted(&mut self) -> Result<String> {
        if !self.is_quoted() {
            return Err(self.error("Expected quoted string"));
        }

        let mut cursor = self.pos + 1;
        let mut result = Vec::new();

        loop {
            match self.input.get(cursor).copied() {
                Some(QUOTE) => break,
                Some(CR | LF) => return Err(self.error("Line break in quoted string")),
                Some(BACKSLASH) => {
                    match self.input.get(cursor + 1).copied() {
                        Some(c @ (QUOTE | BACKSLASH)) => result.push(c),
                        Some(c) => {
                            return Err(self.error(&format!("Invalid escape: \\{}", c as char)));
                        }
                        None => return Err(self.error("Unterminated quoted string")),
                    }
                    cursor += 2;
                }
                Some(c) => {
                    result.push(c);
                    cursor += 1;
                }
                None => return Err(self.error("Unterminated quoted string")),
            }
        }

        let quoted =
            String::from_utf8(result).map_err(|_| self.error("Invalid UTF-8 in quoted string"))?;
        self.pos = cursor + 1;
        Ok(quoted)
    }

    /// Consumes a literal `{N[+]}\r\n` followed by exactly N bytes.
    pub fn extract_literal(&mut self) -> Result<String> {
        if !self.is_literal() {
            return Err(self.error("Expected literal"));
        }

        let digits_start = self.pos + 1;
        let mut cursor = digits_start;
        while self.input.get(cursor).is_some_and(u8::is_ascii_digit) {
            cursor += 1;
        }
        let digits_end = cursor;

        if self.input.get(cursor) == Some(&b'+') {
            cursor += 1;
        }

        match self.input.get(cursor) {
            Some(&RIGHT_BRACE) => cursor += 1,
            Some(_) => return Err(self.error("Invalid character in literal size")),
            None => return Err(self.error("Incomplete literal size")),
        }

        let size: usize = std::str::from_utf8(&self.input[digits_start..digits_end])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| self.error("Invalid literal size"))?;

        if self.input.get(cursor..cursor + 2) != Some(b"\r\n".as_slice()) {
            return Err(self.error("Expected CRLF after literal size"));
        }
        cursor += 2;

        let end = cursor
            .checked_add(size)
            .ok_or_else(|| self.error("Invalid literal size"))?;
        let Some(data) = self.input.get(cursor..end) else {
            return Err(self.error("Literal shorter than declared"));
        };

        let literal = String::from_utf8(data.to_vec())
            .map_err(|_| self.error("Invalid UTF-8 in literal"))?;
        self.pos = end;
        Ok(literal)
    }

    /// Consumes bytes up to (not including) the first of the stop bytes.
    pub fn extract_token(&mut self, stops: &[u8]) -> Result<&'a str> {
        let rest = self.remaining();
        let Some(len) = rest.iter().position(|b| stops.contains(b)) else {
            return Err(self.error("Token delimiter not found"));
        };

        let token =
            std::str::from_utf8(&rest[..len]).map_err(|_| self.error("Invalid UTF-8 in token"))?;
        self.pos += len;
        Ok(token)
    }

    /// Creates a parse error at the current position.
    pub(crate) fn error(&self, message: &str) -> Error {
        Error::Parse {
            position: self.pos,
            message: message.to_string(),
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn test_quoted_string() {
        let mut parser = ResponseParser::new(br#""say \"hi\" \\o/" rest"#);
        assert!(parser.is_string());
        assert_eq!(parser.extract_quoted().unwrap(), r#"say "hi" \o/"#);
        assert!(parser.is_space());
        assert_eq!(parser.remaining(), b" rest");
    }

    #[test]
    fn test_quoted_rejects_line_break() {
        let mut parser = ResponseParser::new(b"\"abc\r\ndef\"");
        assert!(parser.extract_quoted().unwrap_err().is_parse());
        assert_eq!(parser.position(), 0);
    }

    #[test]
    fn test_quoted_rejects_bad_escape() {
        let mut parser = ResponseParser::new(br#""a\nb""#);
        assert!(parser.extract_quoted().is_err());
    }

    #[test]
    fn test_unterminated_quoted_does_not_consume() {
        let mut parser = ResponseParser::new(b"\"partial");
        assert!(parser.extract_string().is_err());
        assert_eq!(parser.position(), 0);
    }

    #[test]
    fn test_literal() {
        let mut parser = ResponseParser::new(b"{5}\r\nhello\r\n");
        assert!(parser.is_literal());
        assert_eq!(parser.extract_literal().unwrap(), "hello");
        assert!(parser.is_line_break());
    }

    #[test]
    fn test_literal_plus() {
        let mut parser = ResponseParser::new(b"{3+}\r\nabc");
        assert_eq!(parser.extract_string().unwrap(), "abc");
        assert!(parser.is_eof());
    }

    #[test]
    fn test_literal_counts_octets() {
        // "grüß" is 4 characters but 6 bytes.
        let input = "{6}\r\ngrüß".as_bytes();
        let mut parser = ResponseParser::new(input);
        assert_eq!(parser.extract_literal().unwrap(), "grüß");
    }

    #[test]
    fn test_literal_shorter_than_declared() {
        let mut parser = ResponseParser::new(b"{10}\r\nshort");
        let err = parser.extract_literal().unwrap_err();
        assert!(matches!(err, Error::Parse { ref message, .. } if message.contains("shorter")));
        assert_eq!(parser.position(), 0);
    }

    #[test]
    fn test_literal_incomplete_header() {
        let mut parser = ResponseParser::new(b"{12");
        assert!(parser.extract_literal().is_err());
        let mut parser = ResponseParser::new(b"{12}\r");
        assert!(parser.extract_literal().is_err());
    }

    #[test]
    fn test_line_break_and_space() {
        let mut parser = ResponseParser::new(b" \r\n");
        assert!(!parser.is_line_break());
        parser.extract_space().unwrap();
        parser.extract_line_break().unwrap();
        assert!(parser.is_eof());
        assert!(parser.extract_line_break().is_err());
    }

    #[test]
    fn test_starts_with_alternatives() {
        let parser = ResponseParser::new(b"oK rest");
        assert!(parser.starts_with(&[b"Oo", b"Kk"]));
        assert!(!parser.starts_with(&[b"Nn", b"Oo"]));
        assert!(!parser.starts_with(&[]));
        assert!(parser.starts_with_keyword("OK"));
        assert!(!ResponseParser::new(b"O").starts_with_keyword("OK"));
    }

    #[test]
    fn test_extract_token() {
        let mut parser = ResponseParser::new(b"NONEXISTENT) \"x\"");
        assert_eq!(parser.extract_token(b" )").unwrap(), "NONEXISTENT");
        assert_eq!(parser.extract(1).unwrap(), b")");
    }

    #[test]
    fn test_extract_token_without_delimiter() {
        let mut parser = ResponseParser::new(b"ACTIVE");
        assert!(parser.extract_token(b"\r").is_err());
        assert_eq!(parser.position(), 0);
    }

    #[test]
    fn test_extract_past_end() {
        let mut parser = ResponseParser::new(b"ab");
        assert!(parser.extract(3).is_err());
        parser.extract(1).unwrap();
        assert!(parser.extract(usize::MAX).is_err());
        assert_eq!(parser.extract(1).unwrap(), b"b");
    }

    #[test]
    fn test_literal_size_overflow() {
        let mut parser = ResponseParser::new(b"{18446744073709551615}\r\nabc");
        assert!(parser.extract_string().unwrap_err().is_parse());
        assert_eq!(parser.position(), 0);

        let mut parser = ResponseParser::new(b"{99999999999999999999999}\r\nabc");
        assert!(parser.extract_literal().unwrap_err().is_parse());
    }
}
