//! Grammar for ManageSieve server responses.
//!
//! Every function consumes exactly one complete response from the parser
//! or fails. Failures leave the caller free to discard the parser and retry
//! on a longer buffer.

use super::ResponseParser;
use crate::Result;
use crate::types::{Capabilities, Response, ResponseCode, ScriptInfo, Status};

/// Bytes that end a bare token inside a response code.
const CODE_TOKEN_STOPS: &[u8] = b" ()\r\n";

/// Parses a status line: `("OK" / "NO" / "BYE") [SP "(" code ")"] [SP string] CRLF`.
pub fn parse_response(parser: &mut ResponseParser<'_>) -> Result<Response> {
    let status = parse_status(parser)?;
    let mut response = Response::new(status);

    if parser.is_line_break() {
        parser.extract_line_break()?;
        return Ok(response);
    }

    parser.extract_space()?;

    if parser.starts_with(&[b"("]) {
        response.code = Some(parse_response_code(parser)?);

        if parser.is_line_break() {
            parser.extract_line_break()?;
            return Ok(response);
        }
        parser.extract_space()?;
    }

    response.message = Some(parser.extract_string()?);
    parser.extract_line_break()?;

    Ok(response)
}

fn parse_status(parser: &mut ResponseParser<'_>) -> Result<Status> {
    let (status, len) = if parser.starts_with_keyword("OK") {
        (Status::Ok, 2)
    } else if parser.starts_with_keyword("NO") {
        (Status::No, 2)
    } else if parser.starts_with_keyword("BYE") {
        (Status::Bye, 3)
    } else {
        return Err(parser.error("Expected OK, NO or BYE"));
    };

    parser.extract(len)?;
    Ok(status)
}

/// Parses `"(" part *(SP ["("] part [")"]) ")"`.
///
/// Nested parentheses are flattened into the part list.
fn parse_response_code(parser: &mut ResponseParser<'_>) -> Result<ResponseCode> {
    parser.extract(1)?;

    let mut parts = vec![parse_code_part(parser)?];
    let mut nesting = 0usize;

    while parser.is_space() {
        parser.extract_space()?;

        if parser.starts_with(&[b"("]) {
            parser.extract(1)?;
            nesting += 1;
        }

        parts.push(parse_code_part(parser)?);

        if nesting > 0 && parser.starts_with(&[b")"]) {
            parser.extract(1)?;
            nesting -= 1;
        }
    }

    if !parser.starts_with(&[b")"]) {
        return Err(parser.error("Expected ')' after response code"));
    }
    parser.extract(1)?;

    Ok(ResponseCode::from_parts(parts))
}

fn parse_code_part(parser: &mut ResponseParser<'_>) -> Result<String> {
    if parser.is_string() {
        parser.extract_string()
    } else {
        Ok(parser.extract_token(CODE_TOKEN_STOPS)?.to_string())
    }
}

/// Parses a capability listing followed by its status line.
///
/// Each capability is `string [SP string] CRLF`. An `OK` listing without
/// `IMPLEMENTATION` is rejected.
pub fn parse_capabilities(parser: &mut ResponseParser<'_>) -> Result<(Capabilities, Response)> {
    let mut capabilities = Capabilities::default();
    let mut has_implementation = false;

    while parser.is_string() {
        let name = parser.extract_string()?;
        let value = if parser.is_space() {
            parser.extract_space()?;
            parser.extract_string()?
        } else {
            String::new()
        };
        parser.extract_line_break()?;

        has_implementation |= name.eq_ignore_ascii_case("IMPLEMENTATION");
        capabilities.insert(&name, &value);
    }

    let response = parse_response(parser)?;

    if response.is_ok() && !has_implementation {
        return Err(parser.error("Capability listing without IMPLEMENTATION"));
    }

    Ok((capabilities, response))
}

/// Parses a `LISTSCRIPTS` reply: `*(string [SP "ACTIVE"] CRLF)` then a status line.
pub fn parse_script_list(parser: &mut ResponseParser<'_>) -> Result<(Vec<ScriptInfo>, Response)> {
    let mut scripts = Vec::new();

    while parser.is_string() {
        let name = parser.extract_string()?;
        let mut active = false;

        if parser.is_space() {
            parser.extract_space()?;
            if !parser.starts_with_keyword("ACTIVE") {
                return Err(parser.error("Expected ACTIVE"));
            }
            parser.extract(6)?;
            active = true;
        }
        parser.extract_line_break()?;

        scripts.push(ScriptInfo::new(name, active));
    }

    let response = parse_response(parser)?;
    Ok((scripts, response))
}

/// Parses a `GETSCRIPT` reply: `[string CRLF]` then a status line.
pub fn parse_script_body(parser: &mut ResponseParser<'_>) -> Result<(Option<String>, Response)> {
    let body = if parser.is_string() {
        let body = parser.extract_string()?;
        parser.extract_line_break()?;
        Some(body)
    } else {
        None
    };

    let response = parse_response(parser)?;
    Ok((body, response))
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect
)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn response(input: &[u8]) -> Result<Response> {
        parse_response(&mut ResponseParser::new(input))
    }

    #[test]
    fn test_bare_status() {
        for (input, status) in [
            (&b"OK\r\n"[..], Status::Ok),
            (b"no\r\n", Status::No),
            (b"Bye\r\n", Status::Bye),
        ] {
            let parsed = response(input).unwrap();
            assert_eq!(parsed.status, status);
            assert!(parsed.code.is_none());
            assert!(parsed.message.is_none());
        }
    }

    #[test]
    fn test_status_with_message() {
        let parsed = response(b"OK \"Logout complete\"\r\n").unwrap();
        assert_eq!(parsed.message(), "Logout complete");
    }

    #[test]
    fn test_status_with_literal_message() {
        let parsed = response(b"NO {11}\r\nno \"quotes\"\r\n").unwrap();
        assert_eq!(parsed.status, Status::No);
        assert_eq!(parsed.message(), "no \"quotes\"");
    }

    #[test]
    fn test_status_with_code_only() {
        let parsed = response(b"NO (NONEXISTENT)\r\n").unwrap();
        assert_eq!(parsed.code, Some(ResponseCode::NonExistent));
        assert!(parsed.message.is_none());
    }

    #[test]
    fn test_status_with_code_and_message() {
        let parsed = response(b"NO (QUOTA/MAXSIZE) \"Script too big\"\r\n").unwrap();
        assert_eq!(parsed.code, Some(ResponseCode::Quota(Some("MAXSIZE".into()))));
        assert_eq!(parsed.message(), "Script too big");
    }

    #[test]
    fn test_sasl_code() {
        let parsed = response(b"OK (SASL \"dj1ybUY5cHFWOFM3c3VBb1pXamE0ZEpSa0ZzS1E9\")\r\n").unwrap();
        assert_eq!(parsed.sasl(), Some("dj1ybUY5cHFWOFM3c3VBb1pXamE0ZEpSa0ZzS1E9"));
    }

    #[test]
    fn test_referral_code() {
        let parsed = response(b"BYE (REFERRAL \"sieve://backend.example.com\") \"Try elsewhere\"\r\n")
            .unwrap();
        let Some(ResponseCode::Referral(referral)) = parsed.code else {
            panic!("expected referral");
        };
        assert_eq!(referral.host, "backend.example.com");
    }

    #[test]
    fn test_nested_code_is_flattened() {
        let parsed = response(b"NO (X-VENDOR (a \"b\") c) \"nested\"\r\n").unwrap();
        assert_eq!(
            parsed.code,
            Some(ResponseCode::Other(vec![
                "X-VENDOR".into(),
                "a".into(),
                "b".into(),
                "c".into()
            ]))
        );
        assert_eq!(parsed.message(), "nested");
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(response(b"MAYBE\r\n").is_err());
        assert!(response(b"OK\n").is_err());
        assert!(response(b"OK  \"two spaces\"\r\n").is_err());
        assert!(response(b"NO (UNCLOSED \"x\"\r\n").is_err());
    }

    #[test]
    fn test_incomplete_is_error() {
        assert!(response(b"OK \"partial").unwrap_err().is_parse());
        assert!(response(b"OK").unwrap_err().is_parse());
        assert!(response(b"").unwrap_err().is_parse());
    }

    #[test]
    fn test_position_after_response() {
        let mut parser = ResponseParser::new(b"OK\r\nNO\r\n");
        parse_response(&mut parser).unwrap();
        assert_eq!(parser.position(), 4);
        assert_eq!(parse_response(&mut parser).unwrap().status, Status::No);
    }

    #[test]
    fn test_capabilities() {
        let input = b"\"IMPLEMENTATION\" \"Dovecot Pigeonhole\"\r\n\
\"SIEVE\" \"fileinto reject envelope vacation\"\r\n\
\"NOTIFY\" \"mailto\"\r\n\
\"SASL\" \"PLAIN SCRAM-SHA-256\"\r\n\
\"STARTTLS\"\r\n\
\"VERSION\" \"1.0\"\r\n\
OK \"Dovecot ready.\"\r\n";
        let mut parser = ResponseParser::new(input);
        let (caps, status) = parse_capabilities(&mut parser).unwrap();

        assert!(status.is_ok());
        assert_eq!(caps.implementation, "Dovecot Pigeonhole");
        assert!(caps.starttls);
        assert!(caps.has_extension("vacation"));
        assert_eq!(caps.sasl, vec!["PLAIN", "SCRAM-SHA-256"]);
        assert!(caps.is_rfc5804());
        assert!(parser.is_eof());
    }

    #[test]
    fn test_capabilities_require_implementation() {
        let input = b"\"SASL\" \"PLAIN\"\r\nOK\r\n";
        assert!(parse_capabilities(&mut ResponseParser::new(input)).is_err());
    }

    #[test]
    fn test_capabilities_no_status() {
        let input = b"NO \"not now\"\r\n";
        let (_, status) = parse_capabilities(&mut ResponseParser::new(input)).unwrap();
        assert_eq!(status.status, Status::No);
    }

    #[test]
    fn test_script_list() {
        let input = b"\"summer_script\"\r\n\"vacation\" ACTIVE\r\n{13}\r\nclever\"script\r\nOK\r\n";
        let (scripts, status) = parse_script_list(&mut ResponseParser::new(input)).unwrap();

        assert!(status.is_ok());
        assert_eq!(
            scripts,
            vec![
                ScriptInfo::new("summer_script", false),
                ScriptInfo::new("vacation", true),
                ScriptInfo::new("clever\"script", false),
            ]
        );
    }

    #[test]
    fn test_script_list_rejects_other_flag() {
        let input = b"\"a\" PASSIVE\r\nOK\r\n";
        assert!(parse_script_list(&mut ResponseParser::new(input)).is_err());
    }

    #[test]
    fn test_empty_script_list() {
        let (scripts, status) = parse_script_list(&mut ResponseParser::new(b"OK\r\n")).unwrap();
        assert!(scripts.is_empty());
        assert!(status.is_ok());
    }

    #[test]
    fn test_script_body() {
        let input = b"{21}\r\nrequire \"fileinto\";\r\n\r\nOK\r\n";
        let (body, status) = parse_script_body(&mut ResponseParser::new(input)).unwrap();
        assert_eq!(body.as_deref(), Some("require \"fileinto\";\r\n"));
        assert!(status.is_ok());
    }

    #[test]
    fn test_script_body_missing() {
        let input = b"NO (NONEXISTENT) \"There is no script by that name\"\r\n";
        let (body, status) = parse_script_body(&mut ResponseParser::new(input)).unwrap();
        assert!(body.is_none());
        assert_eq!(status.code, Some(ResponseCode::NonExistent));
    }

    proptest! {
        #[test]
        fn parse_never_panics(input in proptest::collection::vec(any::<u8>(), 0..256)) {
            let mut parser = ResponseParser::new(&input);
            let _ = parse_response(&mut parser);
            let mut parser = ResponseParser::new(&input);
            let _ = parse_script_list(&mut parser);
        }

        #[test]
        fn truncated_response_is_incomplete(message in "[a-zA-Z0-9 ]{0,40}", cut in 0usize..64) {
            let full = format!("NO (TRYLATER) \"{message}\"\r\n");
            let cut = cut.min(full.len() - 1);
            prop_assert!(response(&full.as_bytes()[..cut]).is_err());
            prop_assert!(response(full.as_bytes()).is_ok());
        }
    }
}
