//! Response parser
//!
//! The controller never signals success through HTTP status codes, so every
//! outcome is recovered from the body. The shape of a document is known from
//! the request that produced it ([`DocumentShape`]), and each shape has its
//! own best-effort, line and token based scanning strategy. No general markup
//! parsing is attempted: the controller's HTML is not well-formed.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

use crate::error::ProtocolError;
use crate::transport::ResponseDocument;
use crate::{ControllerError, Result};

/// Document shape a request is answered with
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentShape {
    /// Helper page echoing the value of a single variable under `label`
    VariablePage { label: String },
    /// Raw text rendering of a structured variable
    RawDump,
    /// KCL command output, enclosed in `<XMP>` tags
    CommandOutput,
    /// Command without output; only the absence of an error page signals success
    Acknowledgement,
    /// Web server acknowledgement of a helper program start
    HelperTrigger { program: String },
    /// Key/value document a helper program wrote to the response file
    HelperDocument { op: String },
    /// Plain file from controller storage
    File,
}

/// How much a successful result can be trusted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    /// The document positively confirmed the outcome
    Confirmed,
    /// Success inferred from an empty body, which a truncated response would also produce
    Unverified,
}

/// Outcome recovered from a response document
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedResult {
    pub success: bool,
    pub confidence: Confidence,
    pub payload: Option<String>,
    pub reason: Option<String>,
    /// Fields of a helper document, empty for other shapes
    pub fields: BTreeMap<String, String>,
}

impl ParsedResult {
    fn confirmed(payload: Option<String>) -> Self {
        Self {
            success: true,
            confidence: Confidence::Confirmed,
            payload,
            reason: None,
            fields: BTreeMap::new(),
        }
    }

    fn unverified() -> Self {
        Self {
            confidence: Confidence::Unverified,
            ..Self::confirmed(None)
        }
    }

    fn failure(reason: String) -> Self {
        Self {
            success: false,
            reason: Some(reason),
            ..Self::confirmed(None)
        }
    }

    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// Turn a controller-reported failure into a [`ControllerError::Resource`]
    pub fn into_success(self) -> Result<Self> {
        if self.success {
            Ok(self)
        } else {
            Err(ControllerError::Resource(
                self.reason
                    .unwrap_or_else(|| "controller reported failure without a reason".to_string()),
            ))
        }
    }

    pub fn into_payload(self) -> Result<String> {
        self.into_success()?
            .payload
            .ok_or_else(|| ProtocolError::Malformed("document carried no payload".to_string()).into())
    }

    pub fn into_confidence(self) -> Result<Confidence> {
        Ok(self.into_success()?.confidence)
    }
}

/// Texts the controller puts in place of a value it cannot render
const VALUE_ERRORS: &[&str] = &[
    "bad variable",
    "unknown port type name",
    "no ports of this type",
    "illegal port number",
    "unknown variable",
];

/// Texts of the web server's generic error pages
const WEB_SERVER_ERRORS: &[&str] = &[
    "unable to run",
    "cannot be started",
    "not found",
    "too long",
    "missing parameter",
    "access denied",
];

/// Texts of KCL error messages
const KCL_ERRORS: &[&str] = &[
    "port name expected",
    "no ports of this type",
    "illegal port number",
    "value out of range",
    "bad variable",
    "unknown command",
    "invalid command",
];

fn tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"<[^>]*>").expect("valid tag pattern"))
}

fn xmp_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?is)<XMP>(.*?)</XMP>").expect("valid XMP pattern"))
}

fn strip_tags(text: &str) -> String {
    tag_pattern().replace_all(text, " ").into_owned()
}

/// The first line of `text` containing one of `markers`, as the controller wrote it
fn find_marker(text: &str, markers: &[&str]) -> Option<String> {
    strip_tags(text)
        .lines()
        .map(str::trim)
        .find(|line| {
            let lower = line.to_ascii_lowercase();
            markers.iter().any(|marker| lower.contains(marker))
        })
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
}

fn find_kcl_error(text: &str) -> Option<String> {
    find_marker(text, KCL_ERRORS)
}

fn is_label_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '$')
}

/// Value following `label` and a `=` or `:` separator
fn value_after(rest: &str) -> Option<String> {
    let rest = rest
        .strip_prefix('"')
        .or_else(|| rest.strip_prefix('\''))
        .unwrap_or(rest);
    let rest = rest.trim_start_matches([' ', '\t']);
    let rest = rest.strip_prefix(['=', ':'])?;
    let rest = rest.trim_start_matches([' ', '\t']);

    if let Some(quote) = rest.chars().next().filter(|c| *c == '"' || *c == '\'') {
        let inner = &rest[1..];
        let end = inner
            .find(quote)
            .or_else(|| inner.find(['\r', '\n']))
            .unwrap_or(inner.len());
        return Some(inner[..end].trim().to_string());
    }

    let end = rest.find(['<', ',', '}', '\r', '\n']).unwrap_or(rest.len());
    let value = rest[..end].trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Locate `label` in a loosely formatted page and return the value next to it
pub fn extract_labelled_value(body: &str, label: &str) -> Option<String> {
    let haystack = body.to_ascii_uppercase();
    let needle = label.to_ascii_uppercase();
    if needle.is_empty() {
        return None;
    }

    let mut from = 0;
    while let Some(pos) = haystack[from..].find(&needle) {
        let start = from + pos;
        let end = start + needle.len();
        from = end;

        let before = body[..start].chars().next_back();
        if before.is_some_and(is_label_char) {
            continue;
        }
        let after = body[end..].chars().next();
        if after.is_some_and(|c| is_label_char(c) || c == '.' || c == '[') {
            continue;
        }
        if let Some(value) = value_after(&body[end..]) {
            return Some(value);
        }
    }
    None
}

fn parse_variable_page(body: &str, label: &str) -> std::result::Result<ParsedResult, ProtocolError> {
    match extract_labelled_value(body, label) {
        Some(value) => match find_marker(&value, VALUE_ERRORS) {
            Some(reason) => Ok(ParsedResult::failure(reason)),
            None => Ok(ParsedResult::confirmed(Some(value))),
        },
        None => match find_marker(body, WEB_SERVER_ERRORS) {
            Some(reason) => Ok(ParsedResult::failure(reason)),
            None => Err(ProtocolError::ValueNotFound(label.to_string())),
        },
    }
}

fn parse_acknowledgement(body: &str) -> ParsedResult {
    if strip_tags(body).trim().is_empty() {
        return ParsedResult::unverified();
    }
    match find_kcl_error(body).or_else(|| find_marker(body, WEB_SERVER_ERRORS)) {
        Some(reason) => ParsedResult::failure(reason),
        None => ParsedResult::confirmed(Some(strip_tags(body).trim().to_string())),
    }
}

fn parse_command_output(body: &str) -> std::result::Result<ParsedResult, ProtocolError> {
    let Some(output) = xmp_pattern().captures(body).and_then(|c| c.get(1)) else {
        return match find_marker(body, WEB_SERVER_ERRORS) {
            Some(reason) => Ok(ParsedResult::failure(reason)),
            None => Err(ProtocolError::Malformed(
                "could not find KCL output in returned document".to_string(),
            )),
        };
    };
    let output = output.as_str();
    match find_kcl_error(output) {
        Some(reason) => Ok(ParsedResult::failure(reason)),
        None => Ok(ParsedResult::confirmed(Some(output.to_string()))),
    }
}

fn parse_helper_trigger(body: &str) -> ParsedResult {
    if let Some(reason) = find_marker(body, WEB_SERVER_ERRORS) {
        return ParsedResult::failure(reason);
    }
    if strip_tags(body).trim().is_empty() {
        ParsedResult::unverified()
    } else {
        ParsedResult::confirmed(None)
    }
}

fn unquote(value: &str) -> &str {
    let value = value.trim();
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

/// Parse the key/value document a helper program wrote
pub fn parse_helper_document(body: &str, expected_op: &str) -> std::result::Result<ParsedResult, ProtocolError> {
    if body.trim().is_empty() {
        return Err(ProtocolError::Garbled("empty helper document".to_string()));
    }
    if !body.ends_with('\n') {
        return Err(ProtocolError::Garbled(
            "helper document is not terminated by a line break".to_string(),
        ));
    }

    let mut fields = BTreeMap::new();
    for line in body.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let Some((key, value)) = line.split_once(['=', ':']) else {
            return Err(ProtocolError::Garbled(format!("unexpected line '{}'", line)));
        };
        let key = key.trim().to_ascii_lowercase();
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(ProtocolError::Garbled(format!("unexpected line '{}'", line)));
        }
        if fields.insert(key.clone(), unquote(value).to_string()).is_some() {
            return Err(ProtocolError::Garbled(format!("duplicate field '{}'", key)));
        }
    }

    let op = fields
        .get("op")
        .ok_or_else(|| ProtocolError::Garbled("missing 'op' field".to_string()))?;
    if !op.eq_ignore_ascii_case(expected_op) {
        return Err(ProtocolError::Stale {
            expected: expected_op.to_string(),
            found: op.clone(),
        });
    }

    let success = match fields.get("success").map(String::as_str) {
        Some("TRUE") => true,
        Some("FALSE") => false,
        Some(other) => {
            return Err(ProtocolError::Garbled(format!("malformed success flag '{}'", other)))
        }
        None => return Err(ProtocolError::Garbled("missing 'success' field".to_string())),
    };
    let status = fields
        .get("status")
        .map(|s| {
            s.parse::<i64>()
                .map_err(|_| ProtocolError::Garbled(format!("non-numeric status '{}'", s)))
        })
        .transpose()?;
    let reason = fields.get("reason").filter(|r| !r.is_empty()).cloned();

    let mut result = match (success, status) {
        (true, Some(code)) if code != 0 => ParsedResult::failure(reason.unwrap_or_else(|| {
            format!("helper reported success with non-zero status {}", code)
        })),
        (true, _) => ParsedResult::confirmed(None),
        (false, code) => ParsedResult::failure(reason.unwrap_or_else(|| match code {
            Some(code) => format!("helper reported failure (status {})", code),
            None => "helper reported failure without a reason".to_string(),
        })),
    };
    result.fields = fields;
    Ok(result)
}

fn parse_raw_dump(body: &str) -> std::result::Result<ParsedResult, ProtocolError> {
    if body.trim().is_empty() {
        return Err(ProtocolError::Malformed("empty variable dump".to_string()));
    }
    match find_marker(body, VALUE_ERRORS).or_else(|| find_marker(body, WEB_SERVER_ERRORS)) {
        Some(reason) => Ok(ParsedResult::failure(reason)),
        None => Ok(ParsedResult::confirmed(Some(body.to_string()))),
    }
}

fn parse_file(body: &str) -> ParsedResult {
    if body.trim_start().starts_with('<') {
        if let Some(reason) = find_marker(body, WEB_SERVER_ERRORS) {
            return ParsedResult::failure(reason);
        }
    }
    ParsedResult::confirmed(Some(body.to_string()))
}

/// Convert `document` into a [`ParsedResult`] according to `shape`
///
/// `Err` is reserved for documents that cannot be interpreted at all;
/// failures the controller reports are returned as `success == false`.
pub fn parse(shape: &DocumentShape, document: &ResponseDocument) -> std::result::Result<ParsedResult, ProtocolError> {
    let body = document.body.as_str();
    match shape {
        DocumentShape::VariablePage { label } => parse_variable_page(body, label),
        DocumentShape::RawDump => parse_raw_dump(body),
        DocumentShape::CommandOutput => parse_command_output(body),
        DocumentShape::Acknowledgement => Ok(parse_acknowledgement(body)),
        DocumentShape::HelperTrigger { .. } => Ok(parse_helper_trigger(body)),
        DocumentShape::HelperDocument { op } => parse_helper_document(body, op),
        DocumentShape::File => Ok(parse_file(body)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(label: &str, body: &str) -> std::result::Result<ParsedResult, ProtocolError> {
        parse(
            &DocumentShape::VariablePage { label: label.to_string() },
            &ResponseDocument::from_body(body),
        )
    }

    #[test]
    fn test_extracts_plain_assignment() {
        let result = page("DOUT[1]", "<html><body>\r\n  DOUT[1]=ON\r\n</body></html>").unwrap();
        assert!(result.success);
        assert_eq!(result.payload.as_deref(), Some("ON"));
    }

    #[test]
    fn test_extracts_quoted_value_with_whitespace() {
        let body = "{ \"$FNO\": \"  F-123456 \r\" }\r\n";
        let result = page("$FNO", body).unwrap();
        assert_eq!(result.payload.as_deref(), Some("F-123456"));

        let result = page("$fno", "{ \"$FNO\" :   \"42\" }").unwrap();
        assert_eq!(result.payload.as_deref(), Some("42"));
    }

    #[test]
    fn test_label_must_match_whole_name() {
        let body = "DOUT[10]=OFF\nRDOUT[1]=OFF\nDOUT[1] = ON<br>";
        let result = page("DOUT[1]", body).unwrap();
        assert_eq!(result.payload.as_deref(), Some("ON"));

        let body = "$MCR.$GENOVERRIDE=30\n$MCR=12\n";
        assert_eq!(page("$MCR", body).unwrap().payload.as_deref(), Some("12"));
    }

    #[test]
    fn test_missing_value_is_protocol_error() {
        let err = page("$FNO", "<html><body>$VERSION=V9.10</body></html>").unwrap_err();
        assert!(matches!(err, ProtocolError::ValueNotFound(ref label) if label == "$FNO"));
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_value_error_text_is_failure() {
        let result = page("$FOO", "{ \"$FOO\": \"Bad variable name\" }").unwrap();
        assert!(!result.success);
        assert_eq!(result.reason.as_deref(), Some("Bad variable name"));

        let result = page("DIN[9999]", "DIN[9999]=Illegal port number").unwrap();
        assert!(!result.success);
    }

    #[test]
    fn test_web_server_error_page_without_value() {
        let result = page("$FNO", "<HTML><BODY><H1>Error</H1>\nFile not found: /td/dmh_scalar.stm\n</BODY></HTML>").unwrap();
        assert!(!result.success);
        assert_eq!(result.reason.as_deref(), Some("File not found: /td/dmh_scalar.stm"));
    }

    #[test]
    fn test_acknowledgement_confidence() {
        let empty = parse(&DocumentShape::Acknowledgement, &ResponseDocument::from_body("  \r\n")).unwrap();
        assert!(empty.success);
        assert_eq!(empty.confidence, Confidence::Unverified);

        let page = parse(
            &DocumentShape::Acknowledgement,
            &ResponseDocument::from_body("<html><body>Comment updated</body></html>"),
        )
        .unwrap();
        assert!(page.success);
        assert_eq!(page.confidence, Confidence::Confirmed);

        let error = parse(
            &DocumentShape::Acknowledgement,
            &ResponseDocument::from_body("<html><body><XMP>Value out of range</XMP></body></html>"),
        )
        .unwrap();
        assert!(!error.success);
        assert_eq!(error.reason.as_deref(), Some("Value out of range"));
    }

    #[test]
    fn test_status_code_is_ignored() {
        let document = ResponseDocument {
            status: 500,
            headers: vec![("Content-Type".to_string(), "application/octet-stream".to_string())],
            body: "DOUT[2]=OFF".to_string(),
        };
        let result = parse(&DocumentShape::VariablePage { label: "DOUT[2]".to_string() }, &document).unwrap();
        assert!(result.success);
        assert_eq!(result.payload.as_deref(), Some("OFF"));
    }

    #[test]
    fn test_command_output() {
        let body = "<HTML><BODY><XMP>\r\nshow clock\r\n16-OCT-26 14:05\r\n</XMP></BODY></HTML>";
        let result = parse(&DocumentShape::CommandOutput, &ResponseDocument::from_body(body)).unwrap();
        assert_eq!(result.payload.as_deref(), Some("\r\nshow clock\r\n16-OCT-26 14:05\r\n"));

        let body = "<XMP>Port name expected</XMP>";
        let result = parse(&DocumentShape::CommandOutput, &ResponseDocument::from_body(body)).unwrap();
        assert!(!result.success);

        let body = "<XMP>\r\nERROR_RECOV    TP    Task Name: \r\n</XMP>";
        let result = parse(&DocumentShape::CommandOutput, &ResponseDocument::from_body(body)).unwrap();
        assert!(result.success);

        let err = parse(&DocumentShape::CommandOutput, &ResponseDocument::from_body("<html></html>")).unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
    }

    #[test]
    fn test_helper_trigger() {
        let shape = DocumentShape::HelperTrigger { program: "dmh_selprg".to_string() };
        let ok = parse(&shape, &ResponseDocument::from_body("<html><body>Program started</body></html>")).unwrap();
        assert!(ok.success);

        let failed = parse(
            &shape,
            &ResponseDocument::from_body("<html><body>Unable to run dmh_selprg</body></html>"),
        )
        .unwrap();
        assert!(!failed.success);
        assert_eq!(failed.reason.as_deref(), Some("Unable to run dmh_selprg"));
    }

    #[test]
    fn test_helper_document_success() {
        let result = parse_helper_document("op=in_auto_mode\nsuccess=TRUE\nin_auto_mode=FALSE\n", "in_auto_mode").unwrap();
        assert!(result.success);
        assert_eq!(result.field("in_auto_mode"), Some("FALSE"));

        let result = parse_helper_document("op: select_program\r\nsuccess: TRUE\r\nstatus: 0\r\n", "select_program").unwrap();
        assert!(result.success);
    }

    #[test]
    fn test_helper_document_failure_keeps_reason() {
        let result = parse_helper_document(
            "op=select_program\nsuccess=FALSE\nreason=Program not found: FOO\n",
            "select_program",
        )
        .unwrap();
        assert!(!result.success);
        assert_eq!(result.reason.as_deref(), Some("Program not found: FOO"));

        let err = result.into_payload().unwrap_err();
        assert!(matches!(err, ControllerError::Resource(ref r) if r == "Program not found: FOO"));
    }

    #[test]
    fn test_helper_document_status_contradiction() {
        let result = parse_helper_document("op=select_program\nsuccess=TRUE\nstatus=7015\n", "select_program").unwrap();
        assert!(!result.success);
        assert!(result.reason.unwrap().contains("7015"));
    }

    #[test]
    fn test_helper_document_garbled() {
        let cases = [
            "",
            "op=select_program\nsuccess=TRUE",
            "op=select_program\nsuccess=yes\n",
            "op=select_program\n",
            "success=TRUE\n",
            "op=select_program\nsuccess=TRUE\nstatus=abc\n",
            "<html>oops</html>\n",
        ];
        for body in cases {
            let err = parse_helper_document(body, "select_program").unwrap_err();
            assert!(matches!(err, ProtocolError::Garbled(_)), "{:?} -> {:?}", body, err);
        }
    }

    #[test]
    fn test_helper_document_stale() {
        let err = parse_helper_document("op=in_auto_mode\nsuccess=TRUE\n", "select_program").unwrap_err();
        assert!(matches!(err, ProtocolError::Stale { .. }));
    }

    #[test]
    fn test_file_error_page() {
        let ok = parse(&DocumentShape::File, &ResponseDocument::from_body("line 1\nline 2\n")).unwrap();
        assert_eq!(ok.payload.as_deref(), Some("line 1\nline 2\n"));

        let missing = parse(
            &DocumentShape::File,
            &ResponseDocument::from_body("<HTML>404 Not Found</HTML>"),
        )
        .unwrap();
        assert!(!missing.success);
    }
}
