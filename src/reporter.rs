//! Outbound line protocol towards the offline-programming host
//!
//! Every line written to stdout is consumed by the host, so the console
//! reporter flushes after each line. Diagnostics go through `tracing` on
//! stderr instead.

use std::fmt;
use std::io::Write;
use std::sync::{Mutex, PoisonError};

/// Raw passthrough shortcuts declared to the host at startup
pub const COMMAND_SHORTCUTS: &[(&str, &str)] = &[
    ("c 1;1;SRVOFF", "Servo OFF"),
    ("c 1;1;SRVON", "Servo ON"),
    ("c 1;1;CNTLON", "Control On"),
    ("c 1;1;CNTLOFF", "Control Off"),
];

/// One line of host output
#[derive(Debug, Clone, PartialEq)]
pub enum OutputLine {
    /// Log window and connection status bar (`SMS:`)
    Message(String),
    /// Literal controller acknowledgment (`RE:`)
    DriverStatus(String),
    /// Main window status bar (`SMS2:`)
    StatusBar(String),
    /// Joint readout, either settled (`JNTS`) or while moving (`JNTS_MOVING`)
    Joints { values: Vec<f64>, moving: bool },
    /// Shortcut declaration (`CMDLIST:`)
    CommandList(String),
}

impl fmt::Display for OutputLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputLine::Message(msg) => write!(f, "SMS:{}", msg),
            OutputLine::DriverStatus(msg) => write!(f, "RE:{}", msg),
            OutputLine::StatusBar(msg) => write!(f, "SMS2:{}", msg),
            OutputLine::Joints { values, moving } => {
                let tag = if *moving { "JNTS_MOVING" } else { "JNTS" };
                let joined: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                write!(f, "{} {}", tag, joined.join(" "))
            }
            OutputLine::CommandList(list) => write!(f, "CMDLIST:{}", list),
        }
    }
}

/// Render the shortcut table as `cmd|label|cmd|label|...`
pub fn command_list() -> String {
    COMMAND_SHORTCUTS
        .iter()
        .map(|(cmd, label)| format!("{}|{}|", cmd, label))
        .collect()
}

/// Sink for host output lines
///
/// Implementations must be cheap and non-blocking; the position monitor
/// reports from its own task.
pub trait Reporter: Send + Sync {
    fn emit(&self, line: OutputLine);

    fn message(&self, msg: &str) {
        self.emit(OutputLine::Message(msg.to_string()));
    }

    fn driver_status(&self, msg: &str) {
        self.emit(OutputLine::DriverStatus(msg.to_string()));
    }

    fn status_bar(&self, msg: &str) {
        self.emit(OutputLine::StatusBar(msg.to_string()));
    }

    fn joints(&self, values: &[f64], moving: bool) {
        self.emit(OutputLine::Joints {
            values: values.to_vec(),
            moving,
        });
    }
}

/// Writes host lines to stdout
#[derive(Debug, Clone, Default)]
pub struct ConsoleReporter;

impl Reporter for ConsoleReporter {
    fn emit(&self, line: OutputLine) {
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();
        let _ = writeln!(handle, "{}", line);
        let _ = handle.flush();
    }
}

/// Keeps every line in memory
#[derive(Debug, Default)]
pub struct RecordingReporter {
    lines: Mutex<Vec<OutputLine>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<OutputLine> {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Rendered text of every line, in order
    pub fn rendered(&self) -> Vec<String> {
        self.lines().iter().map(|line| line.to_string()).collect()
    }

    pub fn contains(&self, text: &str) -> bool {
        self.rendered().iter().any(|line| line == text)
    }

    pub fn clear(&self) {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

impl Reporter for RecordingReporter {
    fn emit(&self, line: OutputLine) {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner).push(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_host_tags() {
        assert_eq!(OutputLine::Message("Ready".into()).to_string(), "SMS:Ready");
        assert_eq!(OutputLine::DriverStatus("1".into()).to_string(), "RE:1");
        assert_eq!(OutputLine::StatusBar("hi".into()).to_string(), "SMS2:hi");
        let moving = OutputLine::Joints { values: vec![10.0, -2.5], moving: true };
        assert_eq!(moving.to_string(), "JNTS_MOVING 10 -2.5");
        let settled = OutputLine::Joints { values: vec![1.25], moving: false };
        assert_eq!(settled.to_string(), "JNTS 1.25");
    }

    #[test]
    fn shortcut_list_matches_host_format() {
        assert_eq!(
            command_list(),
            "c 1;1;SRVOFF|Servo OFF|c 1;1;SRVON|Servo ON|c 1;1;CNTLON|Control On|c 1;1;CNTLOFF|Control Off|"
        );
    }

    #[test]
    fn recording_reporter_keeps_order() {
        let reporter = RecordingReporter::new();
        reporter.message("a");
        reporter.joints(&[1.0], false);
        assert_eq!(reporter.rendered(), vec!["SMS:a".to_string(), "JNTS 1".to_string()]);
        reporter.clear();
        assert!(reporter.lines().is_empty());
    }
}
