//! fanuc-web - typed request/response layer for FANUC robot controllers
//!
//! FANUC R-30iA/R-30iB/R-30iB+ controllers expose no native RPC mechanism,
//! only a web server that executes KCL commands, renders `.stm` pages and
//! runs Karel programs. This library turns that text based side channel into
//! typed reads and writes of controller resources.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use fanuc_web::{Controller, ControllerConfig, IoKind, ResourceDescriptor, Value};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let controller = Controller::open(ControllerConfig::new("192.168.1.10")).await?;
//!
//!     let dout = ResourceDescriptor::io(IoKind::Dout, 1)?;
//!     controller.write(&dout, Value::Bool(true)).await?;
//!     println!("DOUT[1] = {}", controller.read(&dout).await?);
//!
//!     println!("Override: {}%", controller.general_override().await?);
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **transport**: HTTP round trips, transport failures only
//! - **ftp**: upload of the `.stm` helper pages
//! - **encoder**: KCL, helper page, Karel and file requests with local limit checks
//! - **parser**: document shapes and outcome recovery from response bodies
//! - **helper_rpc**: trigger/retrieve cycle through the shared response file
//! - **resource** / **value**: capability table, descriptors and decode rules
//! - **controller** / **status**: the client and its conveniences

pub mod config;
pub mod controller;
pub mod encoder;
pub mod error;
pub mod ftp;
pub mod helper_rpc;
pub mod parser;
pub mod resource;
pub mod status;
pub mod transport;
pub mod value;

pub use config::{ControllerConfig, Credentials};
pub use controller::Controller;
pub use encoder::{HelperProgram, Request, AUTO_MODE, SELECT_PROGRAM};
pub use error::{ControllerError, Operation, ProtocolError, Realm, Result, TransportError};
pub use ftp::{FileUploader, FtpUploader};
pub use helper_rpc::HelperRpc;
pub use parser::{Confidence, DocumentShape, ParsedResult};
pub use resource::{Access, Category, FrameKind, IoKind, Locator, ResourceDescriptor, ValueType};
pub use status::ControllerInfo;
pub use transport::{HttpTransport, ResponseDocument, Transport};
pub use value::{ErrorEntry, Feature, Payload, PositionValue, Pose, ProgramEntry, Value};
