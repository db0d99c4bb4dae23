//! Typed values and decode rules
//!
//! Literals are decoded strictly: only the words and number formats the
//! controller actually emits are accepted, anything else is a protocol error.

use chrono::NaiveDateTime;
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::sync::OnceLock;

use crate::error::ProtocolError;
use crate::resource::ValueType;

type DecodeResult<T> = std::result::Result<T, ProtocolError>;

/// Arm configuration of a Cartesian position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Configuration {
    pub flip: bool,
    pub up: bool,
    pub top: bool,
    pub turn_nos: [i32; 3],
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CartesianPosition {
    pub config: Configuration,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
    pub p: f64,
    pub r: f64,
}

/// Joint angles in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct JointPosition {
    pub joints: [f64; 6],
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Pose {
    Cartesian(CartesianPosition),
    Joint(JointPosition),
}

/// Position register or frame contents
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionValue {
    pub group: Option<u32>,
    /// `None` when the position is uninitialized
    pub pose: Option<Pose>,
    pub comment: String,
}

/// Payload schedule (`PLST_GRP_T`, without `ICONDISP`)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Payload {
    pub comment: Option<String>,
    pub payload: f64,
    pub payload_x: f64,
    pub payload_y: f64,
    pub payload_z: f64,
    pub payload_ix: f64,
    pub payload_iy: f64,
    pub payload_iz: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgramEntry {
    pub name: String,
    /// Program type as shown by the controller (`TP`, `PC`, `VR`, ...)
    pub kind: String,
}

/// Entry of the controller's error history
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorEntry {
    pub sequence: u32,
    pub date: String,
    pub message: String,
    pub detail: String,
    pub level: String,
    pub state: String,
}

/// Installed software option
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Feature {
    pub order_no: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Real(f64),
    Text(String),
    Position(PositionValue),
    Payload(Payload),
    Programs(Vec<ProgramEntry>),
    Errors(Vec<ErrorEntry>),
}

impl Value {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(value) => Some(*value as f64),
            Value::Real(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(value) => Some(value),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Real(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(true) => write!(f, "ON"),
            Value::Bool(false) => write!(f, "OFF"),
            Value::Int(value) => write!(f, "{}", value),
            Value::Real(value) => write!(f, "{}", format_real(*value)),
            Value::Text(value) => write!(f, "{}", value),
            Value::Position(position) => {
                if !position.comment.is_empty() {
                    write!(f, "'{}' ", position.comment)?;
                }
                match &position.pose {
                    None => write!(f, "Uninitialized"),
                    Some(Pose::Cartesian(c)) => write!(
                        f,
                        "X {} Y {} Z {} W {} P {} R {} ({} {} {}, {}, {}, {})",
                        c.x,
                        c.y,
                        c.z,
                        c.w,
                        c.p,
                        c.r,
                        if c.config.flip { "F" } else { "N" },
                        if c.config.up { "U" } else { "D" },
                        if c.config.top { "T" } else { "B" },
                        c.config.turn_nos[0],
                        c.config.turn_nos[1],
                        c.config.turn_nos[2]
                    ),
                    Some(Pose::Joint(j)) => {
                        let joints: Vec<String> = j.joints.iter().map(|v| v.to_string()).collect();
                        write!(f, "J [{}]", joints.join(", "))
                    }
                }
            }
            Value::Payload(p) => write!(
                f,
                "{} kg at ({}, {}, {}), inertia ({}, {}, {})",
                p.payload, p.payload_x, p.payload_y, p.payload_z, p.payload_ix, p.payload_iy, p.payload_iz
            ),
            Value::Programs(programs) => {
                for (i, program) in programs.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{} ({})", program.name, program.kind)?;
                }
                Ok(())
            }
            Value::Errors(errors) => {
                for (i, error) in errors.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{:>5} {} {} {}", error.sequence, error.date, error.message, error.state)?;
                }
                Ok(())
            }
        }
    }
}

fn invalid(literal: &str, expected: &'static str) -> ProtocolError {
    ProtocolError::InvalidLiteral {
        literal: literal.to_string(),
        expected,
    }
}

/// `TRUE`/`FALSE` and the IO words `ON`/`OFF`
pub fn decode_bool(literal: &str) -> DecodeResult<bool> {
    match literal.trim() {
        "TRUE" | "ON" => Ok(true),
        "FALSE" | "OFF" => Ok(false),
        _ => Err(invalid(literal, "boolean")),
    }
}

pub fn decode_int(literal: &str) -> DecodeResult<i64> {
    let trimmed = literal.trim();
    let digits = trimmed.strip_prefix(['-', '+']).unwrap_or(trimmed);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid(literal, "integer"));
    }
    trimmed.parse().map_err(|_| invalid(literal, "integer"))
}

/// Real number with `.` as the only accepted decimal separator
pub fn decode_real(literal: &str) -> DecodeResult<f64> {
    let trimmed = literal.trim();
    let legal = |c: char| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E');
    if trimmed.is_empty() || !trimmed.chars().all(legal) || !trimmed.chars().any(|c| c.is_ascii_digit()) {
        return Err(invalid(literal, "real"));
    }
    let value: f64 = trimmed.parse().map_err(|_| invalid(literal, "real"))?;
    if !value.is_finite() {
        return Err(invalid(literal, "real"));
    }
    Ok(value)
}

/// Integer when the literal has no decimal point, real otherwise
pub fn decode_number(literal: &str) -> DecodeResult<Value> {
    if literal.contains('.') {
        decode_real(literal).map(Value::Real)
    } else {
        decode_int(literal).map(Value::Int)
    }
}

pub fn decode_value(literal: &str, value_type: ValueType) -> DecodeResult<Value> {
    match value_type {
        ValueType::Boolean => decode_bool(literal).map(Value::Bool),
        ValueType::Integer => decode_int(literal).map(Value::Int),
        ValueType::Real => decode_number(literal),
        ValueType::Text => Ok(Value::Text(literal.to_string())),
        ValueType::Record => Err(invalid(literal, "record")),
    }
}

/// Shortest representation that parses back to the same `f64`, always with
/// a decimal point
pub fn format_real(value: f64) -> String {
    let text = value.to_string();
    if value.is_finite() && !text.contains(['.', 'e', 'E']) {
        format!("{}.0", text)
    } else {
        text
    }
}

const POSITION_PATTERN: &str = concat!(
    r"(?:'(?P<comment>[^']*)'\s*)?",
    r"(?:(?P<uninit>Uninitialized)",
    r"|Group:\s*(?P<cgroup>\d+)\s+Config:\s*(?P<flip>[FN])\s*(?P<up>[UD])\s*(?P<top>[TB]),\s*(?P<t1>-?\d+),\s*(?P<t2>-?\d+),\s*(?P<t3>-?\d+)\s+",
    r"X:\s*(?P<x>\S+)\s+Y:\s*(?P<y>\S+)\s+Z:\s*(?P<z>\S+)\s+",
    r"W:\s*(?P<w>\S+)\s+P:\s*(?P<p>\S+)\s+R:\s*(?P<r>\S+)",
    r"|Group:\s*(?P<jgroup>\d+)\s+",
    r"J1\s*=\s*(?P<j1>\S+)\s*deg\s+J2\s*=\s*(?P<j2>\S+)\s*deg\s+J3\s*=\s*(?P<j3>\S+)\s*deg\s+",
    r"J4\s*=\s*(?P<j4>\S+)\s*deg\s+J5\s*=\s*(?P<j5>\S+)\s*deg\s+J6\s*=\s*(?P<j6>\S+)\s*deg)",
);

fn position_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(POSITION_PATTERN).expect("valid position pattern"))
}

/// Parse the raw text dump of a position register or frame
pub fn parse_position(text: &str) -> DecodeResult<PositionValue> {
    let caps = position_pattern()
        .captures(text)
        .ok_or_else(|| ProtocolError::Malformed(format!("no position in '{}'", text.trim())))?;
    let comment = caps
        .name("comment")
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default();
    let field = |name: &str| caps.name(name).map(|m| m.as_str()).unwrap_or_default();

    if caps.name("uninit").is_some() {
        return Ok(PositionValue {
            group: None,
            pose: None,
            comment,
        });
    }

    if let Some(group) = caps.name("cgroup") {
        let turn = |name: &str| -> DecodeResult<i32> {
            decode_int(field(name)).and_then(|v| i32::try_from(v).map_err(|_| invalid(field(name), "turn number")))
        };
        let config = Configuration {
            flip: field("flip") == "F",
            up: field("up") == "U",
            top: field("top") == "T",
            turn_nos: [turn("t1")?, turn("t2")?, turn("t3")?],
        };
        let pose = CartesianPosition {
            config,
            x: decode_real(field("x"))?,
            y: decode_real(field("y"))?,
            z: decode_real(field("z"))?,
            w: decode_real(field("w"))?,
            p: decode_real(field("p"))?,
            r: decode_real(field("r"))?,
        };
        return Ok(PositionValue {
            group: group.as_str().parse().ok(),
            pose: Some(Pose::Cartesian(pose)),
            comment,
        });
    }

    let mut joints = [0.0; 6];
    for (i, joint) in joints.iter_mut().enumerate() {
        *joint = decode_real(field(&format!("j{}", i + 1)))?;
    }
    Ok(PositionValue {
        group: caps.name("jgroup").and_then(|g| g.as_str().parse().ok()),
        pose: Some(Pose::Joint(JointPosition { joints })),
        comment,
    })
}

fn program_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(\S+)\s+(\S+)\s+Task").expect("valid program pattern"))
}

/// Parse `show progs` output, keeping only `types` (case-insensitive) if any are given
pub fn parse_program_list(output: &str, types: &[&str]) -> Vec<ProgramEntry> {
    program_pattern()
        .captures_iter(output.trim())
        .map(|caps| ProgramEntry {
            name: caps[1].to_string(),
            kind: caps[2].to_string(),
        })
        .filter(|entry| types.is_empty() || types.iter().any(|t| t.eq_ignore_ascii_case(&entry.kind)))
        .collect()
}

fn quoted_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#""([^"]*)""#).expect("valid quote pattern"))
}

/// Parse the error history file (`errall.ls`)
pub fn parse_error_log(text: &str) -> DecodeResult<Vec<ErrorEntry>> {
    let mut entries = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() || line.contains("Robot Name") {
            continue;
        }
        let (sequence, rest) = line
            .split_once('"')
            .map(|(seq, _)| (seq.trim(), &line[seq.len()..]))
            .ok_or_else(|| ProtocolError::Malformed(format!("unexpected error log line '{}'", line)))?;
        let fields: Vec<&str> = quoted_pattern()
            .captures_iter(rest)
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str().trim())
            .collect();
        if fields.len() < 4 {
            return Err(ProtocolError::Malformed(format!("unexpected error log line '{}'", line)));
        }
        let sequence = u32::try_from(decode_int(sequence)?).map_err(|_| invalid(sequence, "sequence number"))?;
        let level_state: Vec<&str> = fields[3].split_whitespace().collect();
        let (level, state) = match level_state.as_slice() {
            [level, state, ..] => (level.to_string(), state.to_string()),
            [state] => (String::new(), state.to_string()),
            [] => (String::new(), String::new()),
        };
        entries.push(ErrorEntry {
            sequence,
            date: fields[0].to_string(),
            message: fields[1].to_string(),
            detail: fields[2].to_string(),
            level,
            state,
        });
    }
    Ok(entries)
}

/// Parse the installed options from `version.dg`
pub fn parse_features(text: &str) -> Vec<Feature> {
    text.lines()
        .skip_while(|line| !line.to_ascii_lowercase().starts_with("feature"))
        .skip(1)
        .take_while(|line| !line.trim().is_empty())
        .map(|line| {
            let line = line.trim();
            let (description, order_no) = line.rsplit_once(' ').unwrap_or(("", line));
            Feature {
                order_no: order_no.to_string(),
                description: description.trim().to_string(),
            }
        })
        .collect()
}

/// Controller time from `show clock` output (minute resolution)
pub fn parse_clock(output: &str) -> DecodeResult<NaiveDateTime> {
    let stamp = output
        .trim()
        .lines()
        .nth(1)
        .map(str::trim)
        .ok_or_else(|| ProtocolError::Malformed(format!("no timestamp in '{}'", output.trim())))?;
    NaiveDateTime::parse_from_str(stamp, "%d-%b-%y %H:%M").map_err(|_| invalid(stamp, "timestamp"))
}

fn version_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^V(\d+)\.").expect("valid version pattern"))
}

/// Controller series from the system software version (`V9.10P/19` -> `R-30iB+`)
pub fn controller_series(software_version: &str) -> DecodeResult<&'static str> {
    let major = version_pattern()
        .captures(software_version.trim())
        .and_then(|caps| caps[1].parse::<u32>().ok())
        .ok_or_else(|| invalid(software_version, "software version"))?;
    match major {
        7 => Ok("R-30iA"),
        8 => Ok("R-30iB"),
        9 => Ok("R-30iB+"),
        _ => Err(ProtocolError::Malformed(format!(
            "unknown controller series for software version '{}'",
            software_version
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_bool_is_strict() {
        assert!(decode_bool("TRUE").unwrap());
        assert!(!decode_bool("FALSE").unwrap());
        assert!(decode_bool("ON").unwrap());
        assert!(!decode_bool(" OFF\r").unwrap());
        for literal in ["1", "0", "yes", "", "T", "true", "on", "False", "Off"] {
            assert!(matches!(
                decode_bool(literal),
                Err(ProtocolError::InvalidLiteral { expected: "boolean", .. })
            ));
        }
    }

    #[test]
    fn test_numbers_are_locale_independent() {
        assert_eq!(decode_real("1.234").unwrap(), 1.234);
        assert_eq!(decode_real("-0.5e2").unwrap(), -50.0);
        assert!(decode_real("1,234").is_err());
        assert!(decode_real("inf").is_err());
        assert!(decode_real("1e400").is_err());
        assert!(decode_real("-1e400").is_err());
        assert!(decode_real("*****").is_err());
        assert_eq!(decode_int("-42").unwrap(), -42);
        assert!(decode_int("4.2").is_err());
    }

    #[test]
    fn test_numeric_register_decoding() {
        assert_eq!(decode_number("12").unwrap(), Value::Int(12));
        assert_eq!(decode_number("1.234").unwrap(), Value::Real(1.234));
        assert_eq!(decode_value("7", ValueType::Real).unwrap(), Value::Int(7));
    }

    #[test]
    fn test_format_real_round_trips() {
        assert_eq!(format_real(1.234), "1.234");
        assert_eq!(format_real(1.0), "1.0");
        assert_eq!(format_real(-0.1), "-0.1");
        let value = 0.1 + 0.2;
        assert_eq!(decode_real(&format_real(value)).unwrap(), value);
    }

    #[test]
    fn test_parse_cartesian_position() {
        let text = "\r\n'PICK_APPROACH' \r\n  Group: 1   Config: N U T, 0, 0, 1\r\n  X:   500.000   Y:  -120.500   Z:   300.250\r\n  W:   180.000   P:     0.000   R:    90.000\r\n";
        let position = parse_position(text).unwrap();
        assert_eq!(position.comment, "PICK_APPROACH");
        assert_eq!(position.group, Some(1));
        let Some(Pose::Cartesian(pose)) = position.pose else {
            panic!("expected cartesian pose");
        };
        assert!(!pose.config.flip);
        assert!(pose.config.up);
        assert!(pose.config.top);
        assert_eq!(pose.config.turn_nos, [0, 0, 1]);
        assert_eq!(pose.y, -120.5);
        assert_eq!(pose.r, 90.0);
    }

    #[test]
    fn test_parse_joint_position() {
        let text = "'' \r\n  Group: 2\r\n  J1 =    10.000 deg   J2 =   -20.000 deg   J3 =    30.000 deg \r\n  J4 =     0.000 deg   J5 =   -90.000 deg   J6 =   180.000 deg\r\n";
        let position = parse_position(text).unwrap();
        assert_eq!(position.group, Some(2));
        assert_eq!(
            position.pose,
            Some(Pose::Joint(JointPosition {
                joints: [10.0, -20.0, 30.0, 0.0, -90.0, 180.0]
            }))
        );
    }

    #[test]
    fn test_parse_uninitialized_and_garbage() {
        let position = parse_position("'' Uninitialized\r\n").unwrap();
        assert!(position.pose.is_none());

        assert!(matches!(parse_position("Bad variable"), Err(ProtocolError::Malformed(_))));
        let stars = "  Group: 1   Config: N U T, 0, 0, 0\r\n  X: ********   Y: 0.0   Z: 0.0\r\n  W: 0.0   P: 0.0   R: 0.0\r\n";
        assert!(matches!(parse_position(stars), Err(ProtocolError::InvalidLiteral { .. })));
    }

    #[test]
    fn test_parse_program_list() {
        let output = "\r\nMAIN             TP    Task Name: \r\nGET_DATA         PC    Task Name: \r\nTOOL_CHG         TP    Task Name: \r\n";
        let all = parse_program_list(output, &[]);
        assert_eq!(all.len(), 3);
        assert_eq!(all[1], ProgramEntry { name: "GET_DATA".to_string(), kind: "PC".to_string() });

        let tp = parse_program_list(output, &["tp"]);
        assert_eq!(tp.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(), vec!["MAIN", "TOOL_CHG"]);
    }

    #[test]
    fn test_parse_error_log() {
        let text = "Robot Name ROBOT  F-12345  16-OCT-26 14:05\r\n\r\n  2469 \"16-OCT-26 11:45 \" \"SRVO-001 Operator panel E-stop\" \"\" \"STOP.G   ACTIVE\"\r\n  2468 \"16-OCT-26 11:40 \" \"SYST-026 System normal power up\" \"\" \"\"\r\n";
        let entries = parse_error_log(text).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].sequence, 2469);
        assert_eq!(entries[0].date, "16-OCT-26 11:45");
        assert_eq!(entries[0].message, "SRVO-001 Operator panel E-stop");
        assert_eq!(entries[0].level, "STOP.G");
        assert_eq!(entries[0].state, "ACTIVE");
        assert_eq!(entries[1].level, "");
        assert_eq!(entries[1].state, "");

        assert!(parse_error_log("garbage line\n").is_err());
    }

    #[test]
    fn test_parse_features() {
        let text = "VERSION INFO\r\nSoftware Edition No.: V9.10P/19\r\n\r\nFEATURE ORDER NO\r\nCollision Guard J684\r\nKAREL Cmd. Language J632\r\n\r\nDEMO FEATURES\r\nSomething R123\r\n";
        let features = parse_features(text);
        assert_eq!(
            features,
            vec![
                Feature { order_no: "J684".to_string(), description: "Collision Guard".to_string() },
                Feature { order_no: "J632".to_string(), description: "KAREL Cmd. Language".to_string() },
            ]
        );
    }

    #[test]
    fn test_parse_clock() {
        let stamp = parse_clock("\r\nshow clock\r\n16-OCT-26 14:05\r\n").unwrap();
        assert_eq!(stamp.format("%Y-%m-%d %H:%M").to_string(), "2026-10-16 14:05");
        assert!(parse_clock("show clock").is_err());
    }

    #[test]
    fn test_controller_series() {
        assert_eq!(controller_series("V7.70P/23").unwrap(), "R-30iA");
        assert_eq!(controller_series("V8.30P/40").unwrap(), "R-30iB");
        assert_eq!(controller_series("V9.10P/19").unwrap(), "R-30iB+");
        assert!(controller_series("V6.40").is_err());
        assert!(controller_series("unknown").is_err());
    }
}
