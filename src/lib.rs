//! melfad - driver for Mitsubishi MELFA robot controllers
//!
//! Bridges an offline-programming host, which speaks a line-oriented
//! instruction protocol on stdin/stdout, and the R-series controller
//! command server over TCP.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use melfad::{ConsoleReporter, Driver, DriverConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut driver = Driver::new(DriverConfig::default(), Arc::new(ConsoleReporter))?;
//!     driver.announce();
//!     driver.handle_line("CONNECT 192.168.0.20 10001 6").await;
//!     driver.handle_line("MOVJ 0 0 90 0 90 0").await;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **FramedConnection**: NUL-terminated request/response codec over TCP
//! - **ControllerSession**: handshake, command/acknowledge, fault retrieval
//! - **MotionSequencer**: builds and runs one controller program per motion
//! - **PositionMonitor**: feedback and completion detection on a second connection
//! - **StatusArbiter**: single owner of the status reported to the host
//! - **Driver**: instruction parsing and dispatch

pub mod codec;
pub mod config;
pub mod driver;
pub mod error;
pub mod instruction;
pub mod monitor;
pub mod motion;
pub mod reporter;
pub mod sequencer;
pub mod session;
pub mod status;

pub use codec::{encode_frame, FrameBuffer, FramedConnection};
pub use config::{ConnectionConfig, DriverConfig, MonitorConfig, MotionConfig, RobotConfig};
pub use driver::{Driver, Flow};
pub use error::{DriverError, Result};
pub use instruction::{DigitalOutput, Instruction, InstructionParser, ParseError};
pub use monitor::{MonitorHandle, PollOutcome, PositionMonitor};
pub use motion::{joints_error, JointFrame, MotionState};
pub use reporter::{ConsoleReporter, OutputLine, RecordingReporter, Reporter};
pub use sequencer::{MotionParameters, MotionPlan, MotionRequest, MotionSequencer, SequenceReport};
pub use session::ControllerSession;
pub use status::{Status, StatusArbiter, StatusCategory};
