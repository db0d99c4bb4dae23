//! Controller state and information accessors
//!
//! Conveniences layered on the typed read/write primitives of
//! [`Controller`]. Every accessor is a thin composition of the scalar
//! variable, IO, KCL, file and helper operations.

use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::info;

use crate::controller::{Controller, VERSION_FILE};
use crate::encoder::AUTO_MODE;
use crate::error::ProtocolError;
use crate::parser::Confidence;
use crate::resource::{FrameKind, IoKind, ResourceDescriptor, ValueType, GROUP_RANGE};
use crate::value::{self, Feature, Value};
use crate::{ControllerError, Result};

/// SOP output signalling the controller is in remote mode
pub const SOPO_REMOTE: u32 = 0;
/// SOP output signalling a fault
pub const SOPO_FAULT: u32 = 3;
/// SOP output signalling the TP is enabled
pub const SOPO_TPENBL: u32 = 7;
/// SOP input of the e-stop chain, OFF while e-stopped
pub const SOPI_ESTOP: u32 = 0;
/// UOP output signalling a running program
pub const UOPO_PROGRUN: u32 = 3;
/// UOP output signalling a paused program
pub const UOPO_PAUSED: u32 = 4;

const GENOVERRIDE_VAR: &str = "$MCR.$GENOVERRIDE";
const APPLICATION_VAR: &str = "$APPLICATION[1]";
const SOFTWARE_VERSION_VAR: &str = "$APPLICATION[2]";

/// Summary of the controller's identity and state
#[derive(Debug, Clone, Serialize)]
pub struct ControllerInfo {
    pub series: String,
    pub application: String,
    pub software_version: String,
    pub clock: String,
    pub general_override: i64,
    pub num_groups: i64,
    pub active_program: String,
    pub tp_enabled: bool,
    pub faulted: bool,
    pub e_stopped: bool,
    pub remote: bool,
    pub program_running: bool,
    pub program_paused: bool,
}

fn check_group(group: u32) -> Result<()> {
    if GROUP_RANGE.contains(&group) {
        Ok(())
    } else {
        Err(ControllerError::Validation(format!(
            "Requested group id invalid (must be between 1 and 8, got: {})",
            group
        )))
    }
}

impl Controller {
    async fn read_port(&self, kind: IoKind, index: u32) -> Result<bool> {
        let value = self.read(&ResourceDescriptor::io(kind, index)?).await?;
        value
            .as_bool()
            .ok_or_else(|| ProtocolError::Malformed(format!("{}[{}] is not boolean", kind, index)).into())
    }

    async fn read_typed(&self, name: &str, value_type: ValueType) -> Result<Value> {
        self.read(&ResourceDescriptor::sysvar_typed(name, value_type)?).await
    }

    async fn read_int(&self, name: &str) -> Result<i64> {
        let literal = self.get_scalar_var(name).await?;
        Ok(value::decode_int(&literal)?)
    }

    /// Reset the controller (clears alarms)
    pub async fn reset(&self) -> Result<Confidence> {
        info!("Resetting {}", self.endpoint());
        self.exec_kcl("reset").await
    }

    pub async fn general_override(&self) -> Result<i64> {
        self.read_int(GENOVERRIDE_VAR).await
    }

    pub async fn set_general_override(&self, value: u32) -> Result<Confidence> {
        if value > 100 {
            return Err(ControllerError::Validation(format!(
                "General override must be between 0 and 100 (got: {})",
                value
            )));
        }
        let descriptor = ResourceDescriptor::sysvar_typed(GENOVERRIDE_VAR, ValueType::Integer)?;
        self.write(&descriptor, Value::Int(i64::from(value))).await
    }

    /// Application the controller runs, e.g. `HandlingTool`
    pub async fn application(&self) -> Result<String> {
        self.get_scalar_var(APPLICATION_VAR).await
    }

    /// System software version, e.g. `V9.10P/19`
    pub async fn software_version(&self) -> Result<String> {
        self.get_scalar_var(SOFTWARE_VERSION_VAR).await
    }

    /// Controller series derived from the major software version
    pub async fn series(&self) -> Result<&'static str> {
        let version = self.software_version().await?;
        Ok(value::controller_series(&version)?)
    }

    /// Controller date and time, with a resolution of one minute
    pub async fn clock(&self) -> Result<NaiveDateTime> {
        let output = self.exec_kcl_output("show clock").await?;
        Ok(value::parse_clock(&output)?)
    }

    pub async fn num_groups(&self) -> Result<i64> {
        self.read_int("$SCR.$NUM_GROUP").await
    }

    pub async fn active_program(&self) -> Result<String> {
        self.get_scalar_var("$SHELL_WRK.$ACTIVEPROG").await
    }

    pub async fn current_routine(&self) -> Result<String> {
        self.get_scalar_var("$SHELL_WRK.$ROUT_NAME").await
    }

    pub async fn current_line(&self) -> Result<i64> {
        self.read_int("$SHELL_WRK.$CURR_LINE").await
    }

    pub async fn robot_id(&self, group: u32) -> Result<String> {
        check_group(group)?;
        self.get_scalar_var(&format!("$SCR_GRP[{}].$ROBOT_ID", group)).await
    }

    pub async fn robot_model(&self, group: u32) -> Result<String> {
        check_group(group)?;
        self.get_scalar_var(&format!("$SCR_GRP[{}].$ROBOT_MODEL", group)).await
    }

    /// Whether `group` was jogged since the last program motion
    pub async fn was_jogged(&self, group: u32) -> Result<bool> {
        check_group(group)?;
        let value = self
            .read_typed(&format!("$MOR_GRP[{}].$JOGGED", group), ValueType::Boolean)
            .await?;
        value
            .as_bool()
            .ok_or_else(|| ProtocolError::Malformed(format!("$MOR_GRP[{}].$JOGGED is not boolean", group)).into())
    }

    pub async fn tp_enabled(&self) -> Result<bool> {
        self.read_port(IoKind::Sopout, SOPO_TPENBL).await
    }

    pub async fn is_faulted(&self) -> Result<bool> {
        self.read_port(IoKind::Sopout, SOPO_FAULT).await
    }

    pub async fn is_e_stopped(&self) -> Result<bool> {
        Ok(!self.read_port(IoKind::Sopin, SOPI_ESTOP).await?)
    }

    pub async fn in_remote_mode(&self) -> Result<bool> {
        self.read_port(IoKind::Sopout, SOPO_REMOTE).await
    }

    pub async fn is_program_running(&self) -> Result<bool> {
        self.read_port(IoKind::Uopout, UOPO_PROGRUN).await
    }

    pub async fn is_program_paused(&self) -> Result<bool> {
        self.read_port(IoKind::Uopout, UOPO_PAUSED).await
    }

    /// Whether the controller is in AUTO mode, as reported by `dmh_autom`
    pub async fn in_auto_mode(&self) -> Result<bool> {
        let result = self.call_helper(&AUTO_MODE, &[]).await?;
        let flag = result
            .field(AUTO_MODE.op)
            .ok_or_else(|| ProtocolError::Garbled(format!("missing '{}' field", AUTO_MODE.op)))?;
        Ok(value::decode_bool(flag)?)
    }

    /// Number of the active frame of `kind` for `group`
    pub async fn active_frame(&self, kind: FrameKind, group: u32) -> Result<i64> {
        check_group(group)?;
        self.read_int(&kind.active_variable(group)).await
    }

    pub async fn frame_comment(&self, kind: FrameKind, group: u32, index: u32) -> Result<String> {
        ResourceDescriptor::frame(kind, group, index)?;
        self.get_scalar_var(&kind.comment_variable(group, index)).await
    }

    /// Number of string registers configured on the controller
    pub async fn num_string_registers(&self) -> Result<i64> {
        self.read_int("[*STRREG*]$MAXSREGNUM").await
    }

    /// Installed software options, without demo options
    pub async fn features(&self) -> Result<Vec<Feature>> {
        let text = self.read_file(VERSION_FILE).await?;
        Ok(value::parse_features(&text))
    }

    pub async fn has_feature(&self, order_no: &str) -> Result<bool> {
        let features = self.features().await?;
        Ok(features.iter().any(|f| f.order_no.eq_ignore_ascii_case(order_no)))
    }

    /// Collect identity and state in one summary
    pub async fn info(&self) -> Result<ControllerInfo> {
        let software_version = self.software_version().await?;
        Ok(ControllerInfo {
            series: value::controller_series(&software_version)?.to_string(),
            application: self.application().await?,
            software_version,
            clock: self.clock().await?.format("%Y-%m-%d %H:%M").to_string(),
            general_override: self.general_override().await?,
            num_groups: self.num_groups().await?,
            active_program: self.active_program().await?,
            tp_enabled: self.tp_enabled().await?,
            faulted: self.is_faulted().await?,
            e_stopped: self.is_e_stopped().await?,
            remote: self.in_remote_mode().await?,
            program_running: self.is_program_running().await?,
            program_paused: self.is_program_paused().await?,
        })
    }
}
