//! Controller client
//!
//! Dispatches typed reads and writes of [`ResourceDescriptor`]s onto the
//! controller's web server, KCL and Karel endpoints. Capability and input
//! checks happen before any request is built.

use std::sync::Arc;
use tracing::{debug, info};

use crate::config::ControllerConfig;
use crate::encoder::{self, HelperProgram, Request, MAX_COMMENT_LEN, MAX_STRING_VALUE_LEN, SELECT_PROGRAM};
use crate::error::{Operation, ProtocolError};
use crate::ftp::{FileUploader, FtpUploader};
use crate::helper_rpc::HelperRpc;
use crate::parser::{self, Confidence, ParsedResult};
use crate::resource::{Category, IoKind, Locator, ResourceDescriptor, ValueType};
use crate::transport::{HttpTransport, Transport};
use crate::value::{self, ErrorEntry, Payload, ProgramEntry, Value};
use crate::{ControllerError, Result};

/// Built-in Karel program behind the web server's comment tool
pub const COMSET_PROGRAM: &str = "ComSet";
/// ComSet value function codes
pub const COMSET_NUMREG_VALUE: u32 = 2;
pub const COMSET_STRREG_VALUE: u32 = 15;
/// ComSet comment function codes
pub const COMSET_NUMREG_COMMENT: u32 = 1;
pub const COMSET_POSREG_COMMENT: u32 = 3;
pub const COMSET_STRREG_COMMENT: u32 = 14;

/// Location of the error history
pub const ERROR_LOG_FILE: &str = "md:/errall.ls";
/// Location of the version and options listing
pub const VERSION_FILE: &str = "md:/version.dg";

const HEADERS_VAR: &str = "$HTTP_CTRL.$ENAB_TEMPL";

/// Client for one controller
pub struct Controller {
    config: ControllerConfig,
    transport: Arc<dyn Transport>,
    uploader: Arc<dyn FileUploader>,
    helpers: HelperRpc,
    helper_base: String,
}

impl Controller {
    /// Create a client talking HTTP to the controller in `config`
    pub fn connect(config: ControllerConfig) -> Result<Self> {
        let transport = Arc::new(HttpTransport::new(&config)?);
        Self::with_transport(config, transport)
    }

    /// Create a client and upload the helper pages, unless the
    /// configuration says they are already on the controller
    pub async fn open(config: ControllerConfig) -> Result<Self> {
        let controller = Self::connect(config)?;
        controller.initialize().await?;
        Ok(controller)
    }

    /// Create a client on top of an existing transport
    pub fn with_transport(config: ControllerConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;
        let helper_base = config.helper_base_path();
        let helpers = HelperRpc::new(
            transport.clone(),
            config.response_file(),
            config.request_timeout(),
        );
        info!(
            "Controller client for {} (helpers in {}, response file {})",
            transport.endpoint(),
            helper_base,
            helpers.response_file()
        );
        let uploader = Arc::new(FtpUploader::new(&config));
        Ok(Self {
            config,
            transport,
            uploader,
            helpers,
            helper_base,
        })
    }

    /// Replace the FTP client used for helper page uploads
    pub fn with_uploader(mut self, uploader: Arc<dyn FileUploader>) -> Self {
        self.uploader = uploader;
        self
    }

    /// Upload the helper pages unless `skip_helper_upload` is set; returns
    /// whether they were uploaded
    pub async fn initialize(&self) -> Result<bool> {
        if self.config.skip_helper_upload() {
            debug!("Skipping helper page upload for {}", self.endpoint());
            return Ok(false);
        }
        self.upload_helpers().await?;
        Ok(true)
    }

    /// Store the `.stm` helper pages in the helper directory
    pub async fn upload_helpers(&self) -> Result<()> {
        for (path, contents) in encoder::helper_pages(&self.helper_base) {
            info!("Uploading helper page {}", path);
            self.uploader.upload(&path, contents.as_bytes()).await?;
        }
        Ok(())
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn endpoint(&self) -> &str {
        self.transport.endpoint()
    }

    /// Single round trip: send `request` and parse the answer by its shape
    pub async fn send(&self, request: &Request) -> Result<ParsedResult> {
        debug!("Sending {}", request);
        let document = self.transport.execute(request).await?;
        Ok(parser::parse(&request.shape, &document)?)
    }

    /// Execute a KCL command without capturing output
    pub async fn exec_kcl(&self, command: &str) -> Result<Confidence> {
        let request = encoder::kcl(command, false)?;
        self.send(&request).await?.into_confidence()
    }

    /// Execute a KCL command and return its output verbatim
    pub async fn exec_kcl_output(&self, command: &str) -> Result<String> {
        let request = encoder::kcl(command, true)?;
        self.send(&request).await?.into_payload()
    }

    /// Value of a scalar variable or single array element, as text
    pub async fn get_scalar_var(&self, name: &str) -> Result<String> {
        let request = encoder::variable_page(&self.helper_base, name)?;
        self.send(&request).await?.into_payload()
    }

    /// Raw text rendering of a (structured) variable
    pub async fn get_raw_var(&self, name: &str) -> Result<String> {
        let request = encoder::raw_variable_page(&self.helper_base, name)?;
        self.send(&request).await?.into_payload()
    }

    pub async fn set_scalar_var(&self, name: &str, value: &str) -> Result<Confidence> {
        self.exec_kcl(&format!("set var {}={}", name, value)).await
    }

    /// Run a built-in Karel program which answers with the returned page
    pub async fn exec_karel(&self, program: &str, params: &[(&str, String)]) -> Result<Confidence> {
        let request = encoder::karel_program(program, params)?;
        self.send(&request).await?.into_confidence()
    }

    /// Run a helper program through the response file cycle
    pub async fn call_helper(&self, program: &HelperProgram, args: &[(&str, &str)]) -> Result<ParsedResult> {
        self.helpers.call(program, args).await
    }

    /// Contents of a file in controller storage, e.g. `md:/errall.ls`
    pub async fn read_file(&self, path: &str) -> Result<String> {
        let request = encoder::file(path)?;
        self.send(&request).await?.into_payload()
    }

    /// Read the resource identified by `descriptor`
    pub async fn read(&self, descriptor: &ResourceDescriptor) -> Result<Value> {
        descriptor.check(Operation::Read)?;
        debug!("Reading {}", descriptor);

        match (descriptor.category(), descriptor.locator()) {
            (Category::PositionRegister, _) => {
                let name = variable_of(descriptor)?;
                let raw = self.get_raw_var(&name).await?;
                Ok(Value::Position(value::parse_position(&raw)?))
            }
            (Category::Frame(kind), Locator::GroupIndex { group, index }) => {
                let name = variable_of(descriptor)?;
                let raw = self.get_raw_var(&name).await?;
                let mut position = value::parse_position(&raw)?;
                position.comment = self.get_scalar_var(&kind.comment_variable(*group, *index)).await?;
                Ok(Value::Position(position))
            }
            (Category::Payload, Locator::GroupIndex { group, index }) => {
                Ok(Value::Payload(self.get_payload(*group, *index).await?))
            }
            (Category::ProgramList, _) => Ok(Value::Programs(self.list_programs(&[]).await?)),
            (Category::ErrorLog, _) => Ok(Value::Errors(self.list_errors().await?)),
            _ => {
                let name = variable_of(descriptor)?;
                let literal = self.get_scalar_var(&name).await?;
                Ok(value::decode_value(&literal, descriptor.value_type())?)
            }
        }
    }

    /// Write `value` to the resource identified by `descriptor`
    pub async fn write(&self, descriptor: &ResourceDescriptor, value: Value) -> Result<Confidence> {
        descriptor.check(Operation::Write)?;
        debug!("Writing {} to {}", value, descriptor);

        match (descriptor.category(), descriptor.locator()) {
            (Category::SystemVariable, Locator::Name(name)) => {
                let literal = sysvar_literal(&value, descriptor.value_type())?;
                self.set_scalar_var(name, &literal).await
            }
            (Category::Io(kind), Locator::Index(index)) => {
                let level = port_level(kind, &value)?;
                self.exec_kcl(&format!("set port {}[{}]={}", kind.name(), index, level))
                    .await
            }
            (Category::NumericRegister, Locator::Index(index)) => {
                let (literal, real_flag) = match value {
                    Value::Int(v) => (v.to_string(), -1),
                    Value::Real(v) if v.is_finite() => (value::format_real(v), 1),
                    other => return Err(mismatch(descriptor, &other)),
                };
                self.comset_value(COMSET_NUMREG_VALUE, *index, literal, real_flag).await
            }
            (Category::StringRegister, Locator::Index(index)) => {
                let text = match value {
                    Value::Text(text) => text,
                    other => return Err(mismatch(descriptor, &other)),
                };
                check_comset_text("String register value", &text, MAX_STRING_VALUE_LEN)?;
                self.comset_value(COMSET_STRREG_VALUE, *index, text, -1).await
            }
            (Category::Program, _) => {
                let name = match value {
                    Value::Text(name) => name,
                    other => return Err(mismatch(descriptor, &other)),
                };
                self.select_program(&name).await?;
                Ok(Confidence::Confirmed)
            }
            _ => Err(ControllerError::Capability {
                category: descriptor.category().to_string(),
                operation: Operation::Write,
            }),
        }
    }

    async fn comset_value(&self, code: u32, index: u32, literal: String, real_flag: i32) -> Result<Confidence> {
        self.exec_karel(
            COMSET_PROGRAM,
            &[
                ("sValue", literal),
                ("sIndx", index.to_string()),
                ("sRealFlag", real_flag.to_string()),
                ("sFc", code.to_string()),
            ],
        )
        .await
    }

    /// Update the comment of a register or IO port through ComSet
    pub async fn set_comment(&self, descriptor: &ResourceDescriptor, comment: &str) -> Result<Confidence> {
        let code = match descriptor.category() {
            Category::NumericRegister => Some(COMSET_NUMREG_COMMENT),
            Category::PositionRegister => Some(COMSET_POSREG_COMMENT),
            Category::StringRegister => Some(COMSET_STRREG_COMMENT),
            Category::Io(kind) => kind.comment_code(),
            _ => None,
        };
        let (Some(code), Some(index)) = (code, comment_index(descriptor)) else {
            return Err(ControllerError::Capability {
                category: format!("comment of {}", descriptor.category()),
                operation: Operation::Write,
            });
        };
        check_comset_text("Comment", comment, MAX_COMMENT_LEN)?;

        self.exec_karel(
            COMSET_PROGRAM,
            &[
                ("sComment", comment.to_string()),
                ("sIndx", index.to_string()),
                ("sFc", code.to_string()),
            ],
        )
        .await
    }

    /// Write a port through `KCL` and verify the reported new value
    pub async fn io_write_checked(&self, kind: IoKind, index: u32, value: &Value) -> Result<bool> {
        let descriptor = ResourceDescriptor::io(kind, index)?;
        descriptor.check(Operation::Write)?;
        let level = port_level(kind, value)?;

        let output = self
            .exec_kcl_output(&format!("set port {}[{}]={}", kind.name(), index, level))
            .await?;
        let verified = parse_checked_write(&output, level)?;
        debug!("Checked write of {}: {}", descriptor, verified);
        Ok(verified)
    }

    /// Make `program` the selected program on the TP
    pub async fn select_program(&self, program: &str) -> Result<()> {
        info!("Selecting program {}", program);
        self.call_helper(&SELECT_PROGRAM, &[("prog_name", program)]).await?;
        Ok(())
    }

    /// Programs stored on the controller, optionally limited to `types` (`TP`, `PC`, ...)
    pub async fn list_programs(&self, types: &[&str]) -> Result<Vec<ProgramEntry>> {
        self.set_scalar_var(HEADERS_VAR, "0").await?;
        let output = self.exec_kcl_output("show progs").await;
        let restored = self.set_scalar_var(HEADERS_VAR, "1").await;
        let output = output?;
        restored?;
        Ok(value::parse_program_list(&output, types))
    }

    /// Error history, most recent first
    pub async fn list_errors(&self) -> Result<Vec<ErrorEntry>> {
        let text = self.read_file(ERROR_LOG_FILE).await?;
        Ok(value::parse_error_log(&text)?)
    }

    pub async fn get_payload(&self, group: u32, index: u32) -> Result<Payload> {
        let descriptor = ResourceDescriptor::payload(group, index)?;
        let field = |name: &str| format!("$PLST_GRP{}[{}].${}", group, index, name);
        let real = |literal: String| -> Result<f64> { Ok(value::decode_real(&literal)?) };

        let comment = self.get_scalar_var(&field("COMMENT")).await?;
        let payload = Payload {
            comment: if comment == "Uninitialized" { None } else { Some(comment) },
            payload: real(self.get_scalar_var(&field("PAYLOAD")).await?)?,
            payload_x: real(self.get_scalar_var(&field("PAYLOAD_X")).await?)?,
            payload_y: real(self.get_scalar_var(&field("PAYLOAD_Y")).await?)?,
            payload_z: real(self.get_scalar_var(&field("PAYLOAD_Z")).await?)?,
            payload_ix: real(self.get_scalar_var(&field("PAYLOAD_IX")).await?)?,
            payload_iy: real(self.get_scalar_var(&field("PAYLOAD_IY")).await?)?,
            payload_iz: real(self.get_scalar_var(&field("PAYLOAD_IZ")).await?)?,
        };
        debug!("Read {}", descriptor);
        Ok(payload)
    }
}

fn variable_of(descriptor: &ResourceDescriptor) -> Result<String> {
    descriptor.variable().ok_or_else(|| ControllerError::Capability {
        category: descriptor.category().to_string(),
        operation: Operation::Read,
    })
}

fn comment_index(descriptor: &ResourceDescriptor) -> Option<u32> {
    match descriptor.locator() {
        Locator::Index(index) => Some(*index),
        Locator::GroupIndex { index, .. } => Some(*index),
        _ => None,
    }
}

fn mismatch(descriptor: &ResourceDescriptor, value: &Value) -> ControllerError {
    ControllerError::Validation(format!(
        "Cannot write {:?} to {} ({:?} expected)",
        value,
        descriptor,
        descriptor.value_type()
    ))
}

fn check_comset_text(what: &str, text: &str, max_len: usize) -> Result<()> {
    let len = text.chars().count();
    if len > max_len {
        return Err(ControllerError::Validation(format!(
            "{} is too long ({} characters, limit is {})",
            what, len, max_len
        )));
    }
    if text.chars().any(|c| c.is_control()) {
        return Err(ControllerError::Validation(format!("{} contains control characters", what)));
    }
    Ok(())
}

/// Literal used in a KCL `set var` statement
fn sysvar_literal(value: &Value, declared: ValueType) -> Result<String> {
    let literal = match value {
        Value::Bool(true) => "TRUE".to_string(),
        Value::Bool(false) => "FALSE".to_string(),
        Value::Int(v) => v.to_string(),
        Value::Real(v) if v.is_finite() => value::format_real(*v),
        Value::Text(text) => {
            // text written to a typed variable must decode as that type
            value::decode_value(text, declared).map_err(|e| ControllerError::Validation(e.to_string()))?;
            text.clone()
        }
        other => {
            return Err(ControllerError::Validation(format!(
                "Cannot write {:?} to a system variable",
                other
            )))
        }
    };
    if literal.is_empty() || literal.chars().any(char::is_control) {
        return Err(ControllerError::Validation(format!("Invalid value '{}'", literal.escape_debug())));
    }
    Ok(literal)
}

/// Numeric level written to a port
fn port_level(kind: IoKind, value: &Value) -> Result<i64> {
    match (kind.value_type(), value) {
        (ValueType::Boolean, Value::Bool(on)) => Ok(i64::from(*on)),
        (ValueType::Boolean, Value::Int(level @ (0 | 1))) => Ok(*level),
        (ValueType::Integer, Value::Int(level)) => Ok(*level),
        (_, other) => Err(ControllerError::Validation(format!(
            "Cannot write {:?} to a {} port",
            other, kind
        ))),
    }
}

/// Outcome of `set port` as reported by `KCL`
fn parse_checked_write(output: &str, level: i64) -> Result<bool> {
    // set port marks failures not covered by the KCL error texts with `ERROR`
    if let Some(line) = output.lines().map(str::trim).find(|line| line.contains("ERROR")) {
        return Err(ControllerError::Resource(line.to_string()));
    }
    let was = output.find("Value was:");
    let is = output.find("Value is:");
    let (Some(_), Some(is)) = (was, is) else {
        return Err(ProtocolError::Malformed(format!(
            "unexpected set port output '{}'",
            output.trim()
        ))
        .into());
    };
    let reported = output[is + "Value is:".len()..]
        .split_whitespace()
        .next()
        .unwrap_or_default();
    Ok(value::decode_int(reported)? == level)
}
