//! Motion bookkeeping shared between dispatch and the position monitor
//!
//! Holds the moving flag, the last commanded joint vector, and the pure
//! helpers used to decode feedback and compare it against the target.

use crate::config::MAX_AXES;
use crate::{DriverError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::sync::Notify;

/// Marker the controller puts in place of axes the robot does not have
pub const WILDCARD: char = '*';

/// Shared state of the motion in flight
#[derive(Debug, Default)]
pub struct MotionState {
    moving: AtomicBool,
    last_commanded: Mutex<Option<Vec<f64>>>,
    started: Notify,
}

impl MotionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_moving(&self) -> bool {
        self.moving.load(Ordering::SeqCst)
    }

    /// Record the target of the motion about to be dispatched
    pub fn set_target(&self, joints: Vec<f64>) {
        *self.last_commanded.lock().unwrap_or_else(PoisonError::into_inner) = Some(joints);
    }

    pub fn last_commanded(&self) -> Option<Vec<f64>> {
        self.last_commanded.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Raise the moving flag and wake the monitor
    pub fn start(&self) {
        self.moving.store(true, Ordering::SeqCst);
        self.started.notify_one();
    }

    /// Lower the moving flag. Returns whether it was set.
    pub fn finish(&self) -> bool {
        self.moving.swap(false, Ordering::SeqCst)
    }

    /// Wait until a motion starts; returns immediately if one is in flight
    pub async fn wait_started(&self) {
        if self.is_moving() {
            return;
        }
        self.started.notified().await;
    }
}

/// Per-axis positions decoded from a `JPOSF` response
#[derive(Debug, Clone, PartialEq)]
pub struct JointFrame {
    pub values: Vec<f64>,
}

impl JointFrame {
    /// Decode up to `slots` axes from a `name;value;name;value;...` response.
    ///
    /// Values sit at the odd `;` positions. Wildcard-marked entries are
    /// dropped, as are entries that are not numbers.
    pub fn parse(response: &str, slots: usize) -> Self {
        let values = response
            .split(';')
            .skip(1)
            .step_by(2)
            .take(slots)
            .filter(|field| !field.contains(WILDCARD))
            .filter_map(|field| field.trim().parse::<f64>().ok())
            .collect();
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Largest absolute per-axis difference over the axes both vectors share.
///
/// Returns infinity when there is nothing to compare, so an unverifiable
/// motion never counts as reached.
pub fn joints_error(commanded: Option<&[f64]>, observed: &[f64]) -> f64 {
    let Some(commanded) = commanded else {
        return f64::INFINITY;
    };
    commanded
        .iter()
        .zip(observed)
        .map(|(a, b)| (a - b).abs())
        .reduce(f64::max)
        .unwrap_or(f64::INFINITY)
}

/// Revolution disambiguation flag: `floor((angle + 180) / 360)` per axis,
/// four bits per axis, axis 1 in the lowest nibble.
pub fn turns_flag(joints: &[f64]) -> u64 {
    joints
        .iter()
        .take(MAX_AXES)
        .enumerate()
        .fold(0u64, |acc, (i, angle)| {
            let turns = ((angle + 180.0) / 360.0).floor() as i64;
            acc | (((turns as u64) & 0xF) << (4 * i))
        })
}

/// Posture flag for Cartesian targets.
///
/// SCARA (4 axes): right/left arm from the sign of J2.
/// Articulated arms: right/above/non-flip with the flip bit from J5.
pub fn config_flag(joints: &[f64], axis_count: usize) -> u32 {
    if axis_count == 4 {
        if joints.get(1).copied().unwrap_or(0.0) < 0.0 {
            0
        } else {
            4
        }
    } else {
        let j5 = joints.get(4).copied().unwrap_or(0.0);
        6 | if j5 > 0.0 { 0 } else { 1 }
    }
}

/// Fixed 6-decimal, comma separated coordinate list
pub fn format_coordinates(values: &[f64]) -> String {
    values
        .iter()
        .map(|v| format!("{:.6}", v))
        .collect::<Vec<_>>()
        .join(",")
}

/// Inverse of [`format_coordinates`]
pub fn parse_coordinates(text: &str) -> Result<Vec<f64>> {
    text.trim_matches(|c| c == '(' || c == ')')
        .split(',')
        .map(|field| {
            field
                .trim()
                .parse::<f64>()
                .map_err(|e| DriverError::Protocol(format!("Invalid coordinate '{}': {}", field, e)))
        })
        .collect()
}
