//! Controller resource categories and descriptors
//!
//! A [`Category`] statically determines which operations are legal on a
//! resource, its value type and its index range. Descriptors are validated
//! when constructed, so an out-of-range index or an unsupported operation is
//! rejected before anything is sent to the controller.

use serde::Serialize;
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

use crate::error::Operation;
use crate::{ControllerError, Result};

/// Operations a category supports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Access {
    ReadOnly,
    ReadWrite,
}

impl Access {
    pub fn allows(self, operation: Operation) -> bool {
        match operation {
            Operation::Read => true,
            Operation::Write => self == Access::ReadWrite,
        }
    }
}

/// Declared type of the value a resource holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ValueType {
    Boolean,
    Integer,
    Real,
    Text,
    Record,
}

/// IO port types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum IoKind {
    Din,
    Dout,
    Rdi,
    Rdo,
    Uopin,
    Uopout,
    Sopin,
    Sopout,
    Tpin,
    Tpout,
    Flg,
    M,
    Ain,
    Aout,
    Gin,
    Gout,
}

impl IoKind {
    pub const ALL: [IoKind; 16] = [
        IoKind::Din,
        IoKind::Dout,
        IoKind::Rdi,
        IoKind::Rdo,
        IoKind::Uopin,
        IoKind::Uopout,
        IoKind::Sopin,
        IoKind::Sopout,
        IoKind::Tpin,
        IoKind::Tpout,
        IoKind::Flg,
        IoKind::M,
        IoKind::Ain,
        IoKind::Aout,
        IoKind::Gin,
        IoKind::Gout,
    ];

    /// Port type name used in KCL `set port` statements
    pub fn name(self) -> &'static str {
        match self {
            IoKind::Din => "DIN",
            IoKind::Dout => "DOUT",
            IoKind::Rdi => "RDI",
            IoKind::Rdo => "RDO",
            IoKind::Uopin => "UOPIN",
            IoKind::Uopout => "UOPOUT",
            IoKind::Sopin => "SOPIN",
            IoKind::Sopout => "SOPOUT",
            IoKind::Tpin => "TPIN",
            IoKind::Tpout => "TPOUT",
            IoKind::Flg => "FLG",
            IoKind::M => "M",
            IoKind::Ain => "AIN",
            IoKind::Aout => "AOUT",
            IoKind::Gin => "GIN",
            IoKind::Gout => "GOUT",
        }
    }

    /// Port type name the web server uses for reads
    pub fn read_name(self) -> &'static str {
        match self {
            IoKind::Ain => "ANIN",
            IoKind::Aout => "ANOUT",
            IoKind::Gin => "GPIN",
            IoKind::Gout => "GPOUT",
            other => other.name(),
        }
    }

    pub fn value_type(self) -> ValueType {
        match self {
            IoKind::Ain | IoKind::Aout | IoKind::Gin | IoKind::Gout => ValueType::Integer,
            _ => ValueType::Boolean,
        }
    }

    pub fn access(self) -> Access {
        match self {
            IoKind::Din
            | IoKind::Dout
            | IoKind::Rdo
            | IoKind::Tpout
            | IoKind::Ain
            | IoKind::Aout
            | IoKind::Gin
            | IoKind::Gout => Access::ReadWrite,
            _ => Access::ReadOnly,
        }
    }

    pub fn index_range(self) -> RangeInclusive<u32> {
        match self {
            IoKind::Din | IoKind::Dout => 1..=512,
            IoKind::Rdi | IoKind::Rdo => 1..=8,
            IoKind::Uopin => 1..=18,
            IoKind::Uopout => 1..=20,
            // SOP ports are numbered from zero on the controller
            IoKind::Sopin | IoKind::Sopout => 0..=15,
            IoKind::Tpin | IoKind::Tpout => 1..=32,
            IoKind::Flg | IoKind::M => 1..=1024,
            IoKind::Ain | IoKind::Aout => 1..=64,
            IoKind::Gin | IoKind::Gout => 1..=100,
        }
    }

    /// `sFc` code of the ComSet comment function for this port type
    pub fn comment_code(self) -> Option<u32> {
        match self {
            IoKind::Rdi => Some(6),
            IoKind::Rdo => Some(7),
            IoKind::Din => Some(8),
            IoKind::Dout => Some(9),
            IoKind::Gin => Some(10),
            IoKind::Gout => Some(11),
            IoKind::Ain => Some(12),
            IoKind::Aout => Some(13),
            IoKind::Flg => Some(19),
            _ => None,
        }
    }
}

impl fmt::Display for IoKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for IoKind {
    type Err = ControllerError;

    fn from_str(s: &str) -> Result<Self> {
        let upper = s.trim().to_ascii_uppercase();
        let kind = match upper.as_str() {
            "ANIN" => IoKind::Ain,
            "ANOUT" => IoKind::Aout,
            "GPIN" => IoKind::Gin,
            "GPOUT" => IoKind::Gout,
            "ROUT" => IoKind::Rdo,
            "RIN" => IoKind::Rdi,
            name => IoKind::ALL
                .into_iter()
                .find(|kind| kind.name() == name)
                .ok_or_else(|| ControllerError::Validation(format!("Unknown port type '{}'", s)))?,
        };
        Ok(kind)
    }
}

/// Frame types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FrameKind {
    Tool,
    User,
    Jog,
}

impl FrameKind {
    pub fn index_range(self) -> RangeInclusive<u32> {
        match self {
            FrameKind::Tool | FrameKind::User => 1..=10,
            FrameKind::Jog => 1..=5,
        }
    }

    /// Frame type number used by the frame setup data
    pub fn setup_type(self) -> u32 {
        match self {
            FrameKind::Tool => 1,
            FrameKind::Jog => 2,
            FrameKind::User => 3,
        }
    }

    pub fn variable(self, group: u32, index: u32) -> String {
        match self {
            FrameKind::Tool => format!("[*SYSTEM*]$MNUTOOL[{},{}]", group, index),
            FrameKind::User => format!("[*SYSTEM*]$MNUFRAME[{},{}]", group, index),
            FrameKind::Jog => format!("[TPFDEF]JOGFRAMES[{},{}]", group, index),
        }
    }

    pub fn comment_variable(self, group: u32, index: u32) -> String {
        format!(
            "[TPFDEF]SETUP_DATA[{},{},{}].$COMMENT",
            group,
            self.setup_type(),
            index
        )
    }

    /// Variable holding the number of the active frame of this type
    pub fn active_variable(self, group: u32) -> String {
        match self {
            FrameKind::Tool => format!("[*SYSTEM*]$MNUTOOLNUM[{}]", group),
            FrameKind::User => format!("[*SYSTEM*]$MNUFRAMENUM[{}]", group),
            FrameKind::Jog => format!("[TPFDEF]JOGFRAMNUM[{}]", group),
        }
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameKind::Tool => write!(f, "tool frame"),
            FrameKind::User => write!(f, "user frame"),
            FrameKind::Jog => write!(f, "jog frame"),
        }
    }
}

/// Kind of controller resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Category {
    SystemVariable,
    Io(IoKind),
    NumericRegister,
    StringRegister,
    PositionRegister,
    Frame(FrameKind),
    Payload,
    /// The program selected on the TP
    Program,
    ProgramList,
    ErrorLog,
}

pub const REGISTER_RANGE: RangeInclusive<u32> = 1..=999;
pub const GROUP_RANGE: RangeInclusive<u32> = 1..=8;
pub const PAYLOAD_GROUP_RANGE: RangeInclusive<u32> = 1..=5;
pub const PAYLOAD_RANGE: RangeInclusive<u32> = 1..=10;

impl Category {
    pub fn access(self) -> Access {
        match self {
            Category::Io(kind) => kind.access(),
            Category::SystemVariable
            | Category::NumericRegister
            | Category::StringRegister
            | Category::Program => Access::ReadWrite,
            Category::PositionRegister
            | Category::Frame(_)
            | Category::Payload
            | Category::ProgramList
            | Category::ErrorLog => Access::ReadOnly,
        }
    }

    pub fn supports(self, operation: Operation) -> bool {
        self.access().allows(operation)
    }

    pub fn value_type(self) -> ValueType {
        match self {
            Category::Io(kind) => kind.value_type(),
            Category::SystemVariable | Category::StringRegister | Category::Program => ValueType::Text,
            Category::NumericRegister => ValueType::Real,
            Category::PositionRegister
            | Category::Frame(_)
            | Category::Payload
            | Category::ProgramList
            | Category::ErrorLog => ValueType::Record,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::SystemVariable => write!(f, "system variable"),
            Category::Io(kind) => write!(f, "{} port", kind),
            Category::NumericRegister => write!(f, "numeric register"),
            Category::StringRegister => write!(f, "string register"),
            Category::PositionRegister => write!(f, "position register"),
            Category::Frame(kind) => write!(f, "{}", kind),
            Category::Payload => write!(f, "payload schedule"),
            Category::Program => write!(f, "selected program"),
            Category::ProgramList => write!(f, "program list"),
            Category::ErrorLog => write!(f, "error log"),
        }
    }
}

/// Where a resource lives within its category
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Locator {
    Name(String),
    Index(u32),
    GroupIndex { group: u32, index: u32 },
    /// The category has a single instance
    Whole,
}

/// Identifies one controller resource to read or write
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceDescriptor {
    category: Category,
    locator: Locator,
    value_type: ValueType,
}

fn check_range(what: &str, value: u32, range: &RangeInclusive<u32>) -> Result<()> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err(ControllerError::Validation(format!(
            "{} must be between {} and {} (got: {})",
            what,
            range.start(),
            range.end(),
            value
        )))
    }
}

impl ResourceDescriptor {
    fn new(category: Category, locator: Locator) -> Self {
        Self {
            category,
            locator,
            value_type: category.value_type(),
        }
    }

    /// System variable read and written as text
    pub fn sysvar(name: &str) -> Result<Self> {
        Self::sysvar_typed(name, ValueType::Text)
    }

    /// System variable decoded as `value_type`
    pub fn sysvar_typed(name: &str, value_type: ValueType) -> Result<Self> {
        let name = name.trim();
        if name.is_empty() || name.chars().any(char::is_whitespace) {
            return Err(ControllerError::Validation(format!(
                "Invalid variable name '{}'",
                name
            )));
        }
        if value_type == ValueType::Record {
            return Err(ControllerError::Validation(
                "System variables are accessed as scalars".to_string(),
            ));
        }
        Ok(Self {
            value_type,
            ..Self::new(Category::SystemVariable, Locator::Name(name.to_string()))
        })
    }

    pub fn io(kind: IoKind, index: u32) -> Result<Self> {
        check_range(&format!("{} index", kind), index, &kind.index_range())?;
        Ok(Self::new(Category::Io(kind), Locator::Index(index)))
    }

    pub fn numreg(index: u32) -> Result<Self> {
        check_range("Numeric register index", index, &REGISTER_RANGE)?;
        Ok(Self::new(Category::NumericRegister, Locator::Index(index)))
    }

    pub fn strreg(index: u32) -> Result<Self> {
        check_range("String register index", index, &REGISTER_RANGE)?;
        Ok(Self::new(Category::StringRegister, Locator::Index(index)))
    }

    pub fn posreg(group: u32, index: u32) -> Result<Self> {
        check_range("Group", group, &GROUP_RANGE)?;
        check_range("Position register index", index, &REGISTER_RANGE)?;
        Ok(Self::new(Category::PositionRegister, Locator::GroupIndex { group, index }))
    }

    pub fn frame(kind: FrameKind, group: u32, index: u32) -> Result<Self> {
        check_range("Group", group, &GROUP_RANGE)?;
        check_range(&format!("{} index", kind), index, &kind.index_range())?;
        Ok(Self::new(Category::Frame(kind), Locator::GroupIndex { group, index }))
    }

    pub fn payload(group: u32, index: u32) -> Result<Self> {
        check_range("Payload group", group, &PAYLOAD_GROUP_RANGE)?;
        check_range("Payload index", index, &PAYLOAD_RANGE)?;
        Ok(Self::new(Category::Payload, Locator::GroupIndex { group, index }))
    }

    /// The program currently selected on the TP; writing selects another one
    pub fn program() -> Self {
        Self::new(Category::Program, Locator::Whole)
    }

    pub fn program_list() -> Self {
        Self::new(Category::ProgramList, Locator::Whole)
    }

    pub fn error_log() -> Self {
        Self::new(Category::ErrorLog, Locator::Whole)
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn locator(&self) -> &Locator {
        &self.locator
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    pub fn access(&self) -> Access {
        self.category.access()
    }

    /// Fail with a capability error if `operation` is not legal here
    pub fn check(&self, operation: Operation) -> Result<()> {
        if self.category.supports(operation) {
            Ok(())
        } else {
            Err(ControllerError::Capability {
                category: self.category.to_string(),
                operation,
            })
        }
    }

    /// Name of the variable holding this resource, for resources that map onto one
    pub fn variable(&self) -> Option<String> {
        match (&self.category, &self.locator) {
            (Category::SystemVariable, Locator::Name(name)) => Some(name.clone()),
            (Category::Io(kind), Locator::Index(index)) => Some(format!("{}[{}]", kind.read_name(), index)),
            (Category::NumericRegister, Locator::Index(index)) => Some(format!("$NUMREG[{}]", index)),
            (Category::StringRegister, Locator::Index(index)) => {
                Some(format!("[*STRREG*]$STRREG[{}]", index))
            }
            (Category::PositionRegister, Locator::GroupIndex { group, index }) => {
                Some(format!("$POSREG[{},{}]", group, index))
            }
            (Category::Frame(kind), Locator::GroupIndex { group, index }) => Some(kind.variable(*group, *index)),
            (Category::Program, _) => Some("$SHELL_WRK.$ACTIVEPROG".to_string()),
            _ => None,
        }
    }
}

impl fmt::Display for ResourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.category, &self.locator) {
            (Category::Io(kind), Locator::Index(index)) => write!(f, "{}[{}]", kind, index),
            (Category::NumericRegister, Locator::Index(index)) => write!(f, "R[{}]", index),
            (Category::StringRegister, Locator::Index(index)) => write!(f, "SR[{}]", index),
            (Category::PositionRegister, Locator::GroupIndex { group, index }) => {
                write!(f, "PR[GP{}:{}]", group, index)
            }
            (Category::Payload, Locator::GroupIndex { group, index }) => {
                write!(f, "PAYLOAD[GP{}:{}]", group, index)
            }
            (category, Locator::GroupIndex { group, index }) => {
                write!(f, "{} {} of group {}", category, index, group)
            }
            (_, Locator::Name(name)) => write!(f, "{}", name),
            (category, _) => write!(f, "{}", category),
        }
    }
}
