//! Host-facing driver: reads instructions, dispatches them to the session
//! and the motion sequencer, and reports back over the line protocol.

use crate::{
    config::{DriverConfig, MAX_AXES},
    instruction::{is_halt, DigitalOutput, Instruction, InstructionParser, ParseError},
    reporter::{command_list, OutputLine, Reporter},
    sequencer::{MotionParameters, MotionRequest, MotionSequencer},
    session::{command, ControllerSession},
    status::Status,
    Result,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info, warn};

/// Whether the driver keeps reading after an instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub struct Driver {
    session: ControllerSession,
    sequencer: MotionSequencer,
    parser: InstructionParser,
    reporter: Arc<dyn Reporter>,
}

impl Driver {
    pub fn new(config: DriverConfig, reporter: Arc<dyn Reporter>) -> Result<Self> {
        let sequencer = MotionSequencer::new(MotionParameters::from(&config.motion));
        Ok(Self {
            session: ControllerSession::new(config, reporter.clone()),
            sequencer,
            parser: InstructionParser::new()?,
            reporter,
        })
    }

    pub fn session(&self) -> &ControllerSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut ControllerSession {
        &mut self.session
    }

    pub fn sequencer(&self) -> &MotionSequencer {
        &self.sequencer
    }

    /// Startup banner, shortcut list and current status
    pub fn announce(&self) {
        self.reporter.message(&format!(
            "RoboDK Driver v{} for Mitsubishi robot controllers",
            env!("CARGO_PKG_VERSION")
        ));
        self.reporter.emit(OutputLine::CommandList(command_list()));
        self.session.status().refresh();
    }

    /// Connect using the configured address
    pub async fn connect_configured(&mut self) -> bool {
        let connection = &self.session.config().connection;
        let (host, port) = (connection.host.clone(), connection.port);
        self.session.connect(&host, port).await
    }

    /// Handle one input line
    pub async fn handle_line(&mut self, line: &str) -> Flow {
        if self.session.motion().is_moving() && !is_halt(line) {
            debug!("Discarding '{}' while moving", line.trim());
            return Flow::Continue;
        }

        match self.parser.parse(line, self.session.axis_count()) {
            Ok(instruction) => self.execute(instruction).await,
            Err(ParseError::Empty) => Flow::Continue,
            Err(e) => {
                warn!("{}", e);
                self.reporter.message(&e.to_string());
                Flow::Continue
            }
        }
    }

    pub async fn execute(&mut self, instruction: Instruction) -> Flow {
        debug!("Instruction: {:?}", instruction);
        match instruction {
            Instruction::Connect { host, port, axis_count } => {
                if let Some(axes) = axis_count {
                    if !(1..=MAX_AXES).contains(&axes) {
                        warn!("Ignoring CONNECT with {} axes", axes);
                        self.reporter
                            .message(&format!("CONNECT: invalid axis count '{}'", axes));
                        return Flow::Continue;
                    }
                    self.session.set_axis_count(axes);
                }
                let port = port.unwrap_or(self.session.config().connection.port);
                self.session.connect(&host, port).await;
            }
            Instruction::MoveJoint { joints, pose } => {
                debug!("Joint move with pose {:?}", pose);
                self.dispatch(MotionRequest::Joint { target: joints }).await;
            }
            Instruction::MoveLinear { joints, pose } => {
                self.dispatch(MotionRequest::Linear { target: joints, pose }).await;
            }
            Instruction::MoveCircular { via, target } => {
                self.dispatch(MotionRequest::Circular { via, target }).await;
            }
            Instruction::ReadJoints => {
                self.session.run(&command("JPOSF"), true).await;
            }
            Instruction::Speed(values) => {
                self.session.status().set(Status::Working);
                if self.sequencer.configure_speed(&mut self.session, values).await {
                    self.ready();
                }
            }
            Instruction::Rounding(rounding) => {
                self.sequencer.set_rounding(rounding);
                self.ready();
            }
            Instruction::Pause { millis } => {
                self.session.status().set(Status::Waiting);
                if millis > 0.0 {
                    tokio::time::sleep(Duration::from_secs_f64(millis / 1000.0)).await;
                }
                self.ready();
            }
            Instruction::SetOutput(output) => {
                self.session.status().set(Status::Working);
                let body = match output {
                    DigitalOutput::Raw { id, value } => format!("OUT={};{}", id, value),
                    DigitalOutput::Numeric { id, value } => format!("OUT={};{}", id, value),
                };
                debug!("Digital output: {}", body);
                if self.session.run(&command(&body), false).await {
                    self.ready();
                }
            }
            Instruction::WaitInput { id, value } => {
                self.session.status().set(Status::Working);
                self.reporter.message(&format!(
                    "Warning: Waiting DI[{}] = {:.1} not implemented",
                    id as i64, value
                ));
                self.ready();
            }
            Instruction::GetInput { id } => {
                if self.session.run(&command(&format!("IN{}", id)), false).await {
                    self.reporter.driver_status(&self.session.acknowledgment());
                    self.ready();
                }
            }
            Instruction::SetTool(pose) => {
                if self.sequencer.set_tool(&mut self.session, pose).await {
                    self.ready();
                }
            }
            Instruction::RunProgram { name, .. } => {
                self.session.status().set(Status::Working);
                self.reporter
                    .message(&format!("Warning: Running program {} not implemented", name));
                self.ready();
            }
            Instruction::Popup { message } => {
                self.session.status().set(Status::Working);
                self.reporter
                    .message(&format!("Warning: Display message {} not implemented", message));
                self.reporter.status_bar(&message);
                self.ready();
            }
            Instruction::Disconnect => {
                self.session.disconnect().await;
            }
            Instruction::Stop => self.stop().await,
            Instruction::Quit => {
                self.session.disconnect().await;
                return Flow::Quit;
            }
            Instruction::Raw(cmd) => {
                if self.session.run(&cmd, false).await {
                    self.ready();
                }
            }
            Instruction::Query(cmd) => {
                if self.session.run(&command(&cmd), false).await {
                    self.reporter.driver_status(&self.session.acknowledgment());
                    self.ready();
                }
            }
        }
        Flow::Continue
    }

    async fn dispatch(&mut self, request: MotionRequest) {
        let report = self.sequencer.execute(&mut self.session, &request).await;
        debug!(
            started = report.started,
            "{:?} sequence dispatched with {} steps",
            report.kind,
            report.steps.len()
        );
    }

    /// Halt: drop the moving flag, servo off, reset the program, disconnect
    pub async fn stop(&mut self) {
        warn!("Stop requested");
        self.session.emergency_stop().await;
        self.session.disconnect().await;
    }

    fn ready(&self) {
        self.session.status().set_if_accepting(Status::Ready);
    }

    /// Read instructions until end of input, QUIT, or the shutdown future
    /// resolves. A shutdown halts the robot before returning.
    pub async fn run<R, S>(&mut self, reader: R, shutdown: S) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        S: Future<Output = ()>,
    {
        let mut lines = reader.lines();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    match line? {
                        Some(line) => {
                            if self.handle_line(&line).await == Flow::Quit {
                                info!("Quit requested");
                                return Ok(());
                            }
                        }
                        None => {
                            info!("End of input reached");
                            self.session.disconnect().await;
                            return Ok(());
                        }
                    }
                }
                _ = &mut shutdown => {
                    info!("Shutdown signal received - stopping robot");
                    self.stop().await;
                    return Ok(());
                }
            }
        }
    }
}
