//! Position monitor task
//!
//! Runs on its own controller connection. While a motion is in flight it
//! streams joint feedback to the host and polls the controller run state;
//! once the program stops it verifies the final position against the
//! commanded target and releases the moving flag.

use crate::{
    codec::FramedConnection,
    config::MonitorConfig,
    motion::{joints_error, JointFrame, MotionState},
    reporter::Reporter,
    session::{command, report_error, JOINT_READOUT},
    status::{Status, StatusArbiter},
    DriverError, Result,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Run-state request
pub const STATE_QUERY: &str = "STATE";

/// Bit of the run-state nibble set while a program executes
pub const RUNNING_BIT: u8 = 0b0100;

/// Field of the `STATE` response that carries the run-state nibble
const STATE_FIELD: usize = 4;

/// Minimum field count of a usable joint readout
const MIN_READOUT_FIELDS: usize = 4;

/// Result of one monitor poll
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// Readout too short to decode; only the poll delay elapsed
    Skipped,
    /// Program still running
    Moving,
    /// Program stopped within tolerance of the target
    Reached,
    /// Program stopped away from the target
    Deviated { deviation: f64 },
}

/// Decode the run-state nibble of a `STATE` response
pub fn decode_run_state(response: &str) -> Result<u8> {
    let field = response
        .split(';')
        .nth(STATE_FIELD)
        .ok_or_else(|| DriverError::Protocol(format!("Short state response: {}", response)))?;
    field
        .chars()
        .next()
        .and_then(|c| c.to_digit(16))
        .map(|d| d as u8)
        .ok_or_else(|| DriverError::Protocol(format!("Invalid run state '{}'", field)))
}

pub fn is_running(run_state: u8) -> bool {
    run_state & RUNNING_BIT != 0
}

/// Handle to a spawned monitor
pub struct MonitorHandle {
    shutdown: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Signal the task, cancel it at its next await point and wait for it
    pub async fn stop(self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.task.abort();
        match self.task.await {
            Ok(()) => debug!("Position monitor exited"),
            Err(e) if e.is_cancelled() => debug!("Position monitor cancelled"),
            Err(e) => warn!("Position monitor ended abnormally: {}", e),
        }
    }
}

pub struct PositionMonitor {
    conn: FramedConnection,
    motion: Arc<MotionState>,
    status: Arc<StatusArbiter>,
    reporter: Arc<dyn Reporter>,
    axis_count: usize,
    config: MonitorConfig,
    shutdown: Arc<AtomicBool>,
}

impl PositionMonitor {
    pub fn new(
        conn: FramedConnection,
        motion: Arc<MotionState>,
        status: Arc<StatusArbiter>,
        reporter: Arc<dyn Reporter>,
        axis_count: usize,
        config: MonitorConfig,
    ) -> Self {
        Self {
            conn,
            motion,
            status,
            reporter,
            axis_count,
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn spawn(self) -> MonitorHandle {
        let shutdown = self.shutdown.clone();
        let task = tokio::spawn(self.run());
        MonitorHandle { shutdown, task }
    }

    async fn run(mut self) {
        info!("Position monitor started");
        while !self.shutdown.load(Ordering::Relaxed) {
            if !self.motion.is_moving() {
                tokio::select! {
                    _ = self.motion.wait_started() => {}
                    _ = sleep(self.config.idle_delay()) => {}
                }
                continue;
            }

            match self.poll_once().await {
                Ok(outcome) => debug!("Monitor poll: {:?}", outcome),
                Err(e) => {
                    if self.shutdown.load(Ordering::Relaxed) {
                        break;
                    }
                    error!("Position monitor failed: {}", e);
                    report_error(self.reporter.as_ref(), &self.status, &e.to_string());
                    break;
                }
            }
        }
        self.conn.shutdown().await;
        info!("Position monitor stopped");
    }

    /// One feedback and run-state cycle
    pub async fn poll_once(&mut self) -> Result<PollOutcome> {
        let readout = self.conn.request(&command(JOINT_READOUT)).await?;
        if readout.split(';').count() < MIN_READOUT_FIELDS {
            debug!("Skipping short readout: {}", readout);
            sleep(self.config.poll_delay()).await;
            return Ok(PollOutcome::Skipped);
        }
        let frame = JointFrame::parse(&readout, self.axis_count);
        if self.motion.is_moving() {
            self.reporter.joints(&frame.values, true);
        }

        sleep(self.config.poll_delay()).await;

        let state = self.conn.request(&command(STATE_QUERY)).await?;
        if is_running(decode_run_state(&state)?) {
            return Ok(PollOutcome::Moving);
        }

        let commanded = self.motion.last_commanded();
        let deviation = joints_error(commanded.as_deref(), &frame.values);
        let outcome = if deviation < self.config.tolerance {
            if let Some(target) = commanded.as_deref() {
                if self.motion.is_moving() {
                    self.reporter.joints(target, true);
                }
            }
            PollOutcome::Reached
        } else {
            warn!(deviation, "Robot stopped away from target");
            let observed: Vec<String> = frame.values.iter().map(|v| v.to_string()).collect();
            self.reporter
                .message(&format!("Warning: Error moving robot: {}", observed.join(" ")));
            PollOutcome::Deviated { deviation }
        };

        if self.motion.finish() {
            self.status.set_if_accepting(Status::Ready);
        }
        Ok(outcome)
    }
}
