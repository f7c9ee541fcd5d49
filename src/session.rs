//! Controller session for MELFA robots
//!
//! Owns the control connection and performs the command/acknowledge
//! exchange. Every request is answered by exactly one frame; a response
//! carrying the fault marker triggers the error-retrieval exchange.

use crate::{
    codec::FramedConnection,
    config::DriverConfig,
    monitor::{MonitorHandle, PositionMonitor},
    motion::{JointFrame, MotionState},
    reporter::Reporter,
    status::{Status, StatusArbiter},
    DriverError, Result,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Substring that marks a controller-reported fault
pub const FAULT_MARKER: &str = "Qer";

/// Joint readout request
pub const JOINT_READOUT: &str = "JPOSF";

/// Length of the `QoK` / `Qer` status prefix on every response
const RESPONSE_PREFIX_LEN: usize = 3;

/// Build a `robot;slot;command` request for robot 1, slot 1
pub fn command(body: &str) -> String {
    format!("1;1;{}", body)
}

/// Session with one controller
pub struct ControllerSession {
    config: DriverConfig,
    control: Option<FramedConnection>,
    connected: bool,
    last_response: Option<String>,
    status: Arc<StatusArbiter>,
    motion: Arc<MotionState>,
    reporter: Arc<dyn Reporter>,
    monitor: Option<MonitorHandle>,
}

impl ControllerSession {
    pub fn new(config: DriverConfig, reporter: Arc<dyn Reporter>) -> Self {
        Self {
            config,
            control: None,
            connected: false,
            last_response: None,
            status: Arc::new(StatusArbiter::new(reporter.clone())),
            motion: Arc::new(MotionState::new()),
            reporter,
            monitor: None,
        }
    }

    pub fn status(&self) -> &Arc<StatusArbiter> {
        &self.status
    }

    pub fn motion(&self) -> &Arc<MotionState> {
        &self.motion
    }

    pub fn reporter(&self) -> &Arc<dyn Reporter> {
        &self.reporter
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn axis_count(&self) -> usize {
        self.config.robot.axis_count
    }

    pub fn set_axis_count(&mut self, axis_count: usize) {
        self.config.robot.axis_count = axis_count;
    }

    /// Raw text of the last response received on the control connection
    pub fn last_response(&self) -> Option<&str> {
        self.last_response.as_deref()
    }

    /// Last response with the leading acknowledgment characters removed
    pub fn acknowledgment(&self) -> String {
        self.last_response
            .as_deref()
            .unwrap_or_default()
            .trim_start_matches(['Q', 'o', 'K'])
            .to_string()
    }

    /// Open a fresh session: handshake, reset alarms, control and servo on,
    /// then start the position monitor.
    pub async fn connect(&mut self, host: &str, port: u16) -> bool {
        self.disconnect().await;
        self.config.connection.host = host.to_string();
        self.config.connection.port = port;

        self.reporter.message(&format!("Connecting to robot {}:{}", host, port));
        self.status.set(Status::Working);

        let control = match self.open_connection(port).await {
            Ok(conn) => conn,
            Err(e) => {
                error!("Connection to {}:{} failed: {}", host, port, e);
                self.reporter.message(&connection_failure_text(&e));
                self.status.set(Status::NotConnected);
                return false;
            }
        };
        self.control = Some(control);
        self.connected = true;
        self.motion.finish();
        info!("Connected to controller at {}:{}", host, port);

        self.reporter.message("Waiting for welcome message...");
        let open = command(&format!("OPEN={}", self.config.connection.client_name));
        self.run(&open, false).await;
        self.status.set(Status::Working);

        self.run(&command("RSTALRM"), false).await;
        self.run(&command("CNTLON"), false).await;
        self.run(&command("SRVON"), false).await;

        if !self.connected || !self.status.accepts_commands() {
            warn!("Controller handshake did not complete");
            return false;
        }

        match self.start_monitor().await {
            Ok(handle) => self.monitor = Some(handle),
            Err(e) => {
                error!("Position monitor failed to start: {}", e);
                self.reporter.message(&format!("Monitor connection failed: {}", e));
                self.disconnect().await;
                self.status.set(Status::NotConnected);
                return false;
            }
        }

        self.status.set(Status::Ready);
        true
    }

    async fn open_connection(&self, port: u16) -> Result<FramedConnection> {
        let conn = &self.config.connection;
        FramedConnection::connect(
            &conn.host,
            port,
            conn.connect_timeout(),
            conn.response_timeout(),
            conn.buffer_size,
        )
        .await
    }

    async fn start_monitor(&self) -> Result<MonitorHandle> {
        let mut conn = self.open_connection(self.config.connection.monitor_port()).await?;
        let open = command(&format!("OPEN={}", self.config.connection.client_name));
        let reply = conn.request(&open).await?;
        if reply.contains(FAULT_MARKER) {
            return Err(DriverError::Protocol(format!("Monitor handshake rejected: {}", reply)));
        }

        let monitor = PositionMonitor::new(
            conn,
            self.motion.clone(),
            self.status.clone(),
            self.reporter.clone(),
            self.axis_count(),
            self.config.monitor.clone(),
        );
        Ok(monitor.spawn())
    }

    /// Close both connections. Always succeeds and leaves status Disconnected.
    pub async fn disconnect(&mut self) -> bool {
        if let Some(monitor) = self.monitor.take() {
            monitor.stop().await;
        }

        if let Some(mut control) = self.control.take() {
            if self.connected {
                if let Err(e) = control.request(&command("CLOSE")).await {
                    debug!("Close request failed: {}", e);
                }
            }
            control.shutdown().await;
        }

        self.connected = false;
        self.status.set(Status::Disconnected);
        true
    }

    /// Send one command and wait for its acknowledgment.
    ///
    /// With `expect_ready` unset the status is left alone on success, which
    /// is how intermediate steps of a sequence avoid flooding the host.
    pub async fn run(&mut self, cmd: &str, expect_ready: bool) -> bool {
        let current = self.status.current();
        if !current.accepts_commands() {
            debug!("Refusing '{}' while status is {}", cmd, current);
            return false;
        }
        if !self.connected {
            self.status.set(Status::NotConnected);
            return false;
        }
        let Some(control) = self.control.as_mut() else {
            self.connected = false;
            self.status.set(Status::NotConnected);
            return false;
        };

        debug!("Sending: {}", cmd);
        if let Err(e) = control.send(cmd).await {
            warn!("Send of '{}' failed: {}", cmd, e);
            self.reporter.message("Robot connection broken");
            self.mark_disconnected();
            self.status.set(Status::NotConnectedOnSend);
            return false;
        }

        let response = match control.recv().await {
            Ok(response) => response,
            Err(e) => {
                warn!("No response to '{}': {}", cmd, e);
                self.reporter.message("Robot connection broken");
                self.mark_disconnected();
                self.status.set(Status::NotConnectedOnReceive);
                return false;
            }
        };
        debug!("Received: {}", response);
        self.last_response = Some(response.clone());

        if response.contains(FAULT_MARKER) {
            self.report_fault(&response).await;
            return false;
        }

        if cmd.contains(JOINT_READOUT) {
            let frame = JointFrame::parse(&response, self.axis_count());
            self.reporter.joints(&frame.values, false);
            return true;
        }

        if expect_ready {
            self.status.set(Status::Ready);
        }
        true
    }

    /// Servo off and program reset, bypassing the sticky error gate
    pub async fn emergency_stop(&mut self) {
        self.motion.finish();
        let Some(control) = self.control.as_mut() else {
            warn!("Emergency stop requested without a control connection");
            return;
        };
        for cmd in [command("SRVOFF"), command("RSTPRG")] {
            match control.request(&cmd).await {
                Ok(response) => {
                    debug!("{} -> {}", cmd, response);
                    self.last_response = Some(response);
                }
                Err(e) => {
                    error!("Emergency stop step '{}' failed: {}", cmd, e);
                    self.reporter.message("Robot connection broken");
                    self.mark_disconnected();
                    return;
                }
            }
        }
        info!("Servo off and program reset sent");
    }

    fn mark_disconnected(&mut self) {
        self.connected = false;
        self.control = None;
    }

    /// Retrieve error code and text for a faulted response, then lock the
    /// session into the error state.
    async fn report_fault(&mut self, response: &str) {
        warn!("Controller fault: {}", response);
        self.reporter.message(response);

        let description = match self.retrieve_error().await {
            Ok(text) => text,
            Err(e) => {
                error!("Error retrieval failed: {}", e);
                e.to_string()
            }
        };
        report_error(self.reporter.as_ref(), &self.status, &description);
    }

    async fn retrieve_error(&mut self) -> Result<String> {
        let control = self.control.as_mut().ok_or(DriverError::NotConnected)?;
        let code_reply = control.request(&command("ERROR")).await?;
        let code = error_code(&code_reply);
        let text_reply = control.request(&command(&format!("ERRORMES{}", code))).await?;
        Ok(response_payload(&text_reply).to_string())
    }
}

/// Surface a controller or monitor error and enter the sticky error state
pub fn report_error(reporter: &dyn Reporter, status: &StatusArbiter, text: &str) {
    reporter.message(text);
    if text.contains("RUN or WAI") {
        reporter.message("Do you have the program open?");
    }
    status.set(Status::Unknown);
}

/// Response without its three-character status prefix
pub fn response_payload(response: &str) -> &str {
    response.get(RESPONSE_PREFIX_LEN..).unwrap_or_default()
}

/// Four-character error number that follows the status prefix
pub fn error_code(response: &str) -> &str {
    let payload = response_payload(response);
    payload.get(..4).unwrap_or(payload)
}

fn connection_failure_text(e: &DriverError) -> String {
    match e {
        DriverError::Timeout(_) => "Connection timed out".to_string(),
        DriverError::Connection(_) => "Connection refused".to_string(),
        other => other.to_string(),
    }
}
