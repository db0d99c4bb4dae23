//! Command encoder
//!
//! Renders KCL statements, helper page queries, Karel program invocations and
//! file fetches into ready-to-send [`Request`]s. Every limit the controller
//! enforces with a fixed-size buffer is checked here, so that malformed input
//! never leaves the process.

use reqwest::Method;
use std::fmt;

use crate::error::Realm;
use crate::parser::DocumentShape;
use crate::{ControllerError, Result};

/// Longest KCL command line accepted by the web server
pub const MAX_KCL_COMMAND_LEN: usize = 128;
/// Longest variable name passed to the helper pages
pub const MAX_VARIABLE_NAME_LEN: usize = 64;
/// Karel program names are limited to 12 characters
pub const MAX_KAREL_PROGRAM_NAME_LEN: usize = 12;
/// Longest program name `dmh_selprg` accepts
pub const MAX_SELECT_PROGRAM_NAME_LEN: usize = 11;
/// Register and IO comments
pub const MAX_COMMENT_LEN: usize = 24;
/// String register contents
pub const MAX_STRING_VALUE_LEN: usize = 254;

/// Helper page echoing a single scalar variable
pub const SCALAR_VAR_PAGE: &str = "dmh_scalar.stm";
/// Helper page dumping the raw text rendering of a variable
pub const RAW_VAR_PAGE: &str = "dmh_raw.stm";
/// Query parameter carrying the requested variable name
pub const REQVAR_PARAM: &str = "_reqvar";

/// Contents of [`SCALAR_VAR_PAGE`]: the requested name and its value as a one-entry object
pub const SCALAR_VAR_PAGE_TEMPLATE: &str =
    r#"{ "<!-- #ECHO var="_reqvar" -->": "<!-- #ECHO var="{_reqvar}" -->" }"#;
/// Contents of [`RAW_VAR_PAGE`]
pub const RAW_VAR_PAGE_TEMPLATE: &str = r#"<!-- #ECHO var="{_reqvar}" -->"#;

/// A fully encoded controller request
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    /// Absolute, already percent-encoded path
    pub path: String,
    /// Unencoded query parameters, encoded by [`Request::target`]
    pub query: Vec<(String, String)>,
    pub realm: Realm,
    /// Document shape the controller answers this request with
    pub shape: DocumentShape,
}

impl Request {
    fn get(path: String, realm: Realm, shape: DocumentShape) -> Self {
        Self {
            method: Method::GET,
            path,
            query: Vec::new(),
            realm,
            shape,
        }
    }

    /// Path plus percent-encoded query string
    pub fn target(&self) -> String {
        if self.query.is_empty() {
            return self.path.clone();
        }
        let query = self
            .query
            .iter()
            .map(|(key, value)| format!("{}={}", urlencoding::encode(key), urlencoding::encode(value)))
            .collect::<Vec<_>>()
            .join("&");
        format!("{}?{}", self.path, query)
    }

    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.target())
    }
}

/// Declared parameter of a helper program
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub max_len: usize,
}

/// A compiled helper program resident on the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HelperProgram {
    /// Program name, without the `.pc` extension
    pub name: &'static str,
    /// Value of the `op` field in the document the program writes
    pub op: &'static str,
    pub params: &'static [ParamSpec],
}

/// Makes a program the selected program on the TP
pub const SELECT_PROGRAM: HelperProgram = HelperProgram {
    name: "dmh_selprg",
    op: "select_program",
    params: &[ParamSpec {
        name: "prog_name",
        max_len: MAX_SELECT_PROGRAM_NAME_LEN,
    }],
};

/// Reports whether the controller is in AUTO mode
pub const AUTO_MODE: HelperProgram = HelperProgram {
    name: "dmh_autom",
    op: "in_auto_mode",
    params: &[],
};

pub const HELPER_PROGRAMS: &[HelperProgram] = &[SELECT_PROGRAM, AUTO_MODE];

fn validation(message: String) -> ControllerError {
    ControllerError::Validation(message)
}

fn check_text(what: &str, value: &str, max_len: usize) -> Result<()> {
    if value.is_empty() {
        return Err(validation(format!("{} must not be empty", what)));
    }
    let len = value.chars().count();
    if len > max_len {
        return Err(validation(format!(
            "{} '{}' is too long ({} characters, limit is {})",
            what, value, len, max_len
        )));
    }
    if value.chars().any(|c| c.is_control()) {
        return Err(validation(format!("{} '{}' contains control characters", what, value.escape_debug())));
    }
    Ok(())
}

/// Check a Karel program name (no extension, at most 12 characters)
pub fn check_program_name(name: &str) -> Result<()> {
    check_text("Program name", name, MAX_KAREL_PROGRAM_NAME_LEN)?;
    if name.to_ascii_lowercase().ends_with(".pc") {
        return Err(validation(format!("Program name includes extension ('{}')", name)));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(validation(format!("Program name '{}' contains illegal characters", name)));
    }
    Ok(())
}

/// Convert a controller storage path (`md:/errall.ls`) into the path the web
/// server serves it at (`/md/errall.ls`)
pub fn device_url_path(path: &str) -> Result<String> {
    let (device, rest) = match path.split_once(':') {
        Some((device, rest)) => (device, rest),
        None => ("", path),
    };
    if device.is_empty() && !rest.starts_with('/') {
        return Err(validation(format!("Path '{}' has no device and is not absolute", path)));
    }
    if !device.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(validation(format!("Illegal device name in path '{}'", path)));
    }
    let legal = |c: char| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/');
    if !rest.chars().all(legal) || rest.contains("..") {
        return Err(validation(format!("Illegal characters in path '{}'", path)));
    }

    let mut url_path = String::from("/");
    if !device.is_empty() {
        url_path.push_str(&device.to_ascii_lowercase());
        url_path.push('/');
    }
    url_path.push_str(rest.trim_start_matches('/'));
    while url_path.contains("//") {
        url_path = url_path.replace("//", "/");
    }
    Ok(url_path)
}

/// KCL command line, via `/KCL` (output captured) or `/KCLDO` (no output)
pub fn kcl(command: &str, expect_output: bool) -> Result<Request> {
    let command = command.trim();
    check_text("KCL command", command, MAX_KCL_COMMAND_LEN)?;
    let (base, shape) = if expect_output {
        ("KCL", DocumentShape::CommandOutput)
    } else {
        ("KCLDO", DocumentShape::Acknowledgement)
    };
    Ok(Request::get(
        format!("/{}/{}", base, urlencoding::encode(command)),
        Realm::Kcl,
        shape,
    ))
}

fn check_variable_name(name: &str) -> Result<()> {
    check_text("Variable name", name, MAX_VARIABLE_NAME_LEN)?;
    if name.chars().any(char::is_whitespace) {
        return Err(validation(format!("Variable name '{}' contains whitespace", name)));
    }
    Ok(())
}

fn helper_page(base_path: &str, page: &str, name: &str, shape: DocumentShape) -> Result<Request> {
    check_variable_name(name)?;
    let mut request = Request::get(
        device_url_path(&format!("{}/{}", base_path, page))?,
        Realm::Public,
        shape,
    );
    request.query.push((REQVAR_PARAM.to_string(), name.to_string()));
    Ok(request)
}

/// Query the scalar helper page for the value of `name`
pub fn variable_page(base_path: &str, name: &str) -> Result<Request> {
    let label = name.to_uppercase();
    helper_page(base_path, SCALAR_VAR_PAGE, name, DocumentShape::VariablePage { label })
}

/// Query the raw helper page for the text rendering of `name`
pub fn raw_variable_page(base_path: &str, name: &str) -> Result<Request> {
    helper_page(base_path, RAW_VAR_PAGE, name, DocumentShape::RawDump)
}

/// FTP paths and contents of the helper pages under `base_path`
pub fn helper_pages(base_path: &str) -> Vec<(String, &'static str)> {
    [
        (SCALAR_VAR_PAGE, SCALAR_VAR_PAGE_TEMPLATE),
        (RAW_VAR_PAGE, RAW_VAR_PAGE_TEMPLATE),
    ]
    .into_iter()
    .map(|(page, template)| (format!("/{}/{}", base_path, page), template))
    .collect()
}

/// Run a built-in Karel program whose answer is the returned page itself
pub fn karel_program(name: &str, params: &[(&str, String)]) -> Result<Request> {
    check_program_name(name)?;
    let mut request = Request::get(format!("/KAREL/{}", name), Realm::Karel, DocumentShape::Acknowledgement);
    request.query = params
        .iter()
        .map(|(key, value)| (key.to_string(), value.clone()))
        .collect();
    Ok(request)
}

/// Trigger request starting `program` with `args`
pub fn helper_trigger(program: &HelperProgram, args: &[(&str, &str)]) -> Result<Request> {
    check_program_name(program.name)?;

    for (key, _) in args {
        if !program.params.iter().any(|spec| spec.name == *key) {
            return Err(validation(format!(
                "Helper program '{}' has no parameter '{}'",
                program.name, key
            )));
        }
    }

    let mut query = Vec::with_capacity(program.params.len());
    for spec in program.params {
        let value = args
            .iter()
            .find(|(key, _)| *key == spec.name)
            .map(|(_, value)| *value)
            .ok_or_else(|| {
                validation(format!(
                    "Helper program '{}' requires parameter '{}'",
                    program.name, spec.name
                ))
            })?;
        check_text(&format!("Parameter '{}'", spec.name), value, spec.max_len)?;
        query.push((spec.name.to_string(), value.to_string()));
    }

    let mut request = Request::get(
        format!("/KAREL/{}", program.name),
        Realm::Karel,
        DocumentShape::HelperTrigger {
            program: program.name.to_string(),
        },
    );
    request.query = query;
    Ok(request)
}

/// Retrieve request for the document `program` wrote to `response_file`
pub fn helper_result(response_file: &str, program: &HelperProgram) -> Result<Request> {
    Ok(Request::get(
        device_url_path(response_file)?,
        Realm::File,
        DocumentShape::HelperDocument {
            op: program.op.to_string(),
        },
    ))
}

/// Fetch a file from controller storage
pub fn file(path: &str) -> Result<Request> {
    Ok(Request::get(device_url_path(path)?, Realm::File, DocumentShape::File))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kcl_encodes_command_into_path() {
        let request = kcl("set var $MCR.$GENOVERRIDE=50", false).unwrap();
        assert_eq!(request.path, "/KCLDO/set%20var%20%24MCR.%24GENOVERRIDE%3D50");
        assert_eq!(request.realm, Realm::Kcl);
        assert_eq!(request.shape, DocumentShape::Acknowledgement);

        let request = kcl("show clock", true).unwrap();
        assert_eq!(request.target(), "/KCL/show%20clock");
        assert_eq!(request.shape, DocumentShape::CommandOutput);
    }

    #[test]
    fn test_kcl_rejects_bad_commands() {
        assert!(matches!(kcl("   ", false), Err(ControllerError::Validation(_))));
        assert!(matches!(kcl("reset\nabort", false), Err(ControllerError::Validation(_))));
        let long = "x".repeat(MAX_KCL_COMMAND_LEN + 1);
        assert!(matches!(kcl(&long, true), Err(ControllerError::Validation(_))));
    }

    #[test]
    fn test_variable_page_encodes_sigils() {
        let request = variable_page("td:", "$fno").unwrap();
        assert_eq!(request.target(), "/td/dmh_scalar.stm?_reqvar=%24fno");
        assert_eq!(
            request.shape,
            DocumentShape::VariablePage { label: "$FNO".to_string() }
        );

        let request = raw_variable_page("td:/dmh", "$POSREG[1,2]").unwrap();
        assert_eq!(request.target(), "/td/dmh/dmh_raw.stm?_reqvar=%24POSREG%5B1%2C2%5D");
    }

    #[test]
    fn test_variable_name_limits() {
        let long = format!("${}", "A".repeat(MAX_VARIABLE_NAME_LEN));
        assert!(matches!(variable_page("td:", &long), Err(ControllerError::Validation(_))));
        assert!(matches!(variable_page("td:", "$A B"), Err(ControllerError::Validation(_))));
        assert!(matches!(variable_page("td:", ""), Err(ControllerError::Validation(_))));
    }

    #[test]
    fn test_helper_trigger_validates_parameters() {
        let request = helper_trigger(&SELECT_PROGRAM, &[("prog_name", "MAIN")]).unwrap();
        assert_eq!(request.target(), "/KAREL/dmh_selprg?prog_name=MAIN");
        assert_eq!(request.realm, Realm::Karel);

        let err = helper_trigger(&SELECT_PROGRAM, &[("prog_name", "ABCDEFGHIJKL")]).unwrap_err();
        assert!(matches!(err, ControllerError::Validation(ref msg) if msg.contains("limit is 11")));

        assert!(matches!(
            helper_trigger(&SELECT_PROGRAM, &[]),
            Err(ControllerError::Validation(_))
        ));
        assert!(matches!(
            helper_trigger(&AUTO_MODE, &[("prog_name", "X")]),
            Err(ControllerError::Validation(_))
        ));
        assert!(helper_trigger(&AUTO_MODE, &[]).unwrap().query.is_empty());
    }

    #[test]
    fn test_helper_pages() {
        let pages = helper_pages("td:/dmh");
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].0, "/td:/dmh/dmh_scalar.stm");
        assert!(pages[0].1.contains(r#"<!-- #ECHO var="{_reqvar}" -->"#));
        assert_eq!(pages[1], ("/td:/dmh/dmh_raw.stm".to_string(), RAW_VAR_PAGE_TEMPLATE));
    }

    #[test]
    fn test_declared_helpers() {
        for (i, program) in HELPER_PROGRAMS.iter().enumerate() {
            assert!(check_program_name(program.name).is_ok(), "{}", program.name);
            assert!(HELPER_PROGRAMS[i + 1..].iter().all(|other| other.op != program.op));
        }
    }

    #[test]
    fn test_program_names() {
        assert!(check_program_name("ComSet").is_ok());
        assert!(check_program_name("dmh_selprg.pc").is_err());
        assert!(check_program_name("ABCDEFGHIJKLM").is_err());
        assert!(check_program_name("bad/name").is_err());
        assert!(karel_program("ComSet.PC", &[]).is_err());
    }

    #[test]
    fn test_device_paths() {
        assert_eq!(device_url_path("md:/errall.ls").unwrap(), "/md/errall.ls");
        assert_eq!(device_url_path("TD:dmh_resp.txt").unwrap(), "/td/dmh_resp.txt");
        assert_eq!(device_url_path("/md/version.dg").unwrap(), "/md/version.dg");
        assert!(device_url_path("errall.ls").is_err());
        assert!(device_url_path("md:/../secret").is_err());

        let request = helper_result("td:/dmh_resp.txt", &SELECT_PROGRAM).unwrap();
        assert_eq!(request.path, "/td/dmh_resp.txt");
        assert_eq!(request.realm, Realm::File);
        assert_eq!(
            request.shape,
            DocumentShape::HelperDocument { op: "select_program".to_string() }
        );
    }
}
