//! Session status shared by the command path and the position monitor

use crate::reporter::Reporter;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Driver status as understood by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Disconnected,
    NotConnected,
    NotConnectedOnSend,
    NotConnectedOnReceive,
    ConnectionProblems,
    Ready,
    Working,
    Waiting,
    /// Sticky error state; blocks every command until the next connect
    Unknown,
}

/// Coloring category used by the host display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusCategory {
    Ready,
    Working,
    Waiting,
    Error,
}

impl Status {
    /// Numeric code of the host driver protocol
    pub fn code(self) -> i32 {
        match self {
            Status::Unknown => -1000,
            Status::NotConnectedOnReceive => -5,
            Status::NotConnectedOnSend => -4,
            Status::ConnectionProblems => -3,
            Status::Disconnected => -2,
            Status::NotConnected => -1,
            Status::Ready => 0,
            Status::Working => 1,
            Status::Waiting => 2,
        }
    }

    pub fn category(self) -> StatusCategory {
        match self {
            Status::Ready => StatusCategory::Ready,
            Status::Working => StatusCategory::Working,
            Status::Waiting => StatusCategory::Waiting,
            _ => StatusCategory::Error,
        }
    }

    pub fn text(self) -> &'static str {
        match self {
            Status::ConnectionProblems => "Connection problems",
            Status::Disconnected => "Disconnected",
            Status::NotConnected => "Not connected",
            Status::NotConnectedOnSend => "Not connected -- send",
            Status::NotConnectedOnReceive => "Not connected -- recv",
            Status::Ready => "Ready",
            Status::Working => "Working...",
            Status::Waiting => "Waiting...",
            Status::Unknown => "Unknown status",
        }
    }

    pub fn accepts_commands(self) -> bool {
        self != Status::Unknown
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.text())
    }
}

/// Holds the current status and publishes every transition to the host
pub struct StatusArbiter {
    current: Mutex<Status>,
    reporter: Arc<dyn Reporter>,
}

impl StatusArbiter {
    pub fn new(reporter: Arc<dyn Reporter>) -> Self {
        Self {
            current: Mutex::new(Status::Disconnected),
            reporter,
        }
    }

    pub fn current(&self) -> Status {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn accepts_commands(&self) -> bool {
        self.current().accepts_commands()
    }

    /// Transition and publish
    pub fn set(&self, status: Status) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = status;
        self.publish(status);
    }

    /// Transition only while commands are accepted. Returns whether it happened.
    pub fn set_if_accepting(&self, status: Status) -> bool {
        let changed = {
            let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
            if current.accepts_commands() {
                *current = status;
                true
            } else {
                false
            }
        };
        if changed {
            self.publish(status);
        }
        changed
    }

    /// Re-publish the current status
    pub fn refresh(&self) {
        self.publish(self.current());
    }

    pub fn reporter(&self) -> &Arc<dyn Reporter> {
        &self.reporter
    }

    fn publish(&self, status: Status) {
        debug!(code = status.code(), "Status: {}", status);
        self.reporter.message(status.text());
        if status == Status::Unknown {
            self.reporter.message(Status::ConnectionProblems.text());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::RecordingReporter;

    fn arbiter() -> (StatusArbiter, Arc<RecordingReporter>) {
        let reporter = Arc::new(RecordingReporter::new());
        (StatusArbiter::new(reporter.clone()), reporter)
    }

    #[test]
    fn starts_disconnected() {
        let (arbiter, _) = arbiter();
        assert_eq!(arbiter.current(), Status::Disconnected);
        assert!(arbiter.accepts_commands());
    }

    #[test]
    fn every_status_has_one_category() {
        assert_eq!(Status::Ready.category(), StatusCategory::Ready);
        assert_eq!(Status::Working.category(), StatusCategory::Working);
        assert_eq!(Status::Waiting.category(), StatusCategory::Waiting);
        for status in [
            Status::Disconnected,
            Status::NotConnected,
            Status::NotConnectedOnSend,
            Status::NotConnectedOnReceive,
            Status::ConnectionProblems,
            Status::Unknown,
        ] {
            assert_eq!(status.category(), StatusCategory::Error);
        }
    }

    #[test]
    fn unknown_is_sticky_for_conditional_transitions() {
        let (arbiter, reporter) = arbiter();
        arbiter.set(Status::Unknown);
        assert!(!arbiter.accepts_commands());
        assert!(!arbiter.set_if_accepting(Status::Ready));
        assert_eq!(arbiter.current(), Status::Unknown);
        assert_eq!(
            reporter.rendered(),
            vec!["SMS:Unknown status".to_string(), "SMS:Connection problems".to_string()]
        );

        arbiter.set(Status::Working);
        assert!(arbiter.set_if_accepting(Status::Ready));
        assert_eq!(arbiter.current(), Status::Ready);
    }

    #[test]
    fn codes_follow_host_protocol() {
        assert_eq!(Status::Ready.code(), 0);
        assert_eq!(Status::Disconnected.code(), -2);
        assert_eq!(Status::Unknown.code(), -1000);
    }
}
