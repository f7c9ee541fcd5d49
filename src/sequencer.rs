//! Motion sequencer
//!
//! Every motion is dispatched as a throwaway controller program: delete the
//! previous one, write the waypoint and parameter lines, save, load and run
//! it. Only the data lines differ between joint, linear and circular moves.

use crate::{
    config::MotionConfig,
    motion::{config_flag, format_coordinates, turns_flag},
    session::{command, ControllerSession},
    status::Status,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Name of the program rebuilt for every motion
pub const PROGRAM_NAME: &str = "MRL";

/// Base frame written into Cartesian programs
const BASE_FRAME: &str = "(0.000,0.000,0.000,0.000,0.000,0.000)";

/// Host speed value that maps to 100 % override
const FULL_SCALE: f64 = 5000.0;

/// Scale a host speed or acceleration value to a 1..=100 percentage
pub fn percent_of_full_scale(value: f64) -> f64 {
    (value * 100.0 / FULL_SCALE).clamp(1.0, 100.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MotionKind {
    Joint,
    Linear,
    Circular,
}

/// One logical motion requested by the host
#[derive(Debug, Clone, PartialEq)]
pub enum MotionRequest {
    Joint { target: Vec<f64> },
    /// Joint target plus the Cartesian pose the host computed for it
    Linear { target: Vec<f64>, pose: Vec<f64> },
    /// Arc from the previous target through `via` to `target`
    Circular { via: Vec<f64>, target: Vec<f64> },
}

impl MotionRequest {
    pub fn kind(&self) -> MotionKind {
        match self {
            MotionRequest::Joint { .. } => MotionKind::Joint,
            MotionRequest::Linear { .. } => MotionKind::Linear,
            MotionRequest::Circular { .. } => MotionKind::Circular,
        }
    }

    /// Joint vector the robot should hold once the motion completes
    pub fn target(&self) -> &[f64] {
        match self {
            MotionRequest::Joint { target }
            | MotionRequest::Linear { target, .. }
            | MotionRequest::Circular { target, .. } => target,
        }
    }
}

/// Parameters substituted into every motion program
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MotionParameters {
    pub speed_mms: f64,
    pub accel_percent_joints: f64,
    pub accel_percent_linear: f64,
    /// Stored for the host; not written into programs
    pub rounding: f64,
    pub tool: [f64; 6],
}

impl From<&MotionConfig> for MotionParameters {
    fn from(config: &MotionConfig) -> Self {
        Self {
            speed_mms: config.speed_mms,
            accel_percent_joints: config.accel_percent_joints,
            accel_percent_linear: config.accel_percent_linear,
            rounding: config.rounding,
            tool: config.tool,
        }
    }
}

/// Ordered controller commands for one motion
#[derive(Debug, Clone, PartialEq)]
pub struct MotionPlan {
    pub kind: MotionKind,
    pub target: Vec<f64>,
    pub steps: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome {
    pub command: String,
    pub ok: bool,
}

/// What happened to each step of a dispatched motion
#[derive(Debug, Clone, Serialize)]
pub struct SequenceReport {
    pub kind: MotionKind,
    pub started_at: DateTime<Utc>,
    pub steps: Vec<StepOutcome>,
    /// Whether the run step went through and the moving flag was raised
    pub started: bool,
}

impl SequenceReport {
    pub fn succeeded(&self) -> bool {
        self.steps.iter().all(|step| step.ok)
    }

    pub fn failed_steps(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|step| !step.ok)
            .map(|step| step.command.as_str())
            .collect()
    }
}

pub struct MotionSequencer {
    params: MotionParameters,
}

impl MotionSequencer {
    pub fn new(params: MotionParameters) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &MotionParameters {
        &self.params
    }

    pub fn tool_string(&self) -> String {
        format_coordinates(&self.params.tool)
    }

    /// Build the command list for a motion.
    ///
    /// `previous` is the last commanded joint vector and only matters for
    /// circular moves, whose arc starts there.
    pub fn plan(&self, request: &MotionRequest, previous: Option<&[f64]>) -> MotionPlan {
        let mut data = Vec::new();
        match request {
            MotionRequest::Joint { target } => {
                data.push(format!("J1=({})", format_coordinates(target)));
                data.push(format!("SPD {:.3}", self.params.speed_mms));
                data.push(format!("ACCEL {:.3}", self.params.accel_percent_joints));
                data.push("MOV J1".to_string());
            }
            MotionRequest::Linear { target, .. } => {
                self.push_cartesian_header(&mut data);
                data.push(format!("J1=({})", format_coordinates(target)));
                data.push("Mvs J1".to_string());
            }
            MotionRequest::Circular { via, target } => {
                let start = previous.unwrap_or(via);
                self.push_cartesian_header(&mut data);
                data.push(format!("J1=({})", format_coordinates(start)));
                data.push(format!("J2=({})", format_coordinates(via)));
                data.push(format!("J3=({})", format_coordinates(target)));
                data.push("Mvr J1, J2, J3".to_string());
            }
        }

        let mut steps = vec![
            command("FDELMRL"),
            command("NEW"),
            command(&format!("LOAD={}", PROGRAM_NAME)),
        ];
        steps.extend(
            data.iter()
                .enumerate()
                .map(|(i, line)| command(&format!("EDATA {} {}", i + 1, line))),
        );
        steps.extend([
            command("SAVE"),
            command("RSTPRG"),
            command(&format!("PRGLOAD={}", PROGRAM_NAME)),
            command("RSTPRG"),
            command(&format!("RUN{};1", PROGRAM_NAME)),
        ]);

        MotionPlan {
            kind: request.kind(),
            target: request.target().to_vec(),
            steps,
        }
    }

    fn push_cartesian_header(&self, data: &mut Vec<String>) {
        data.push(format!("Base {}", BASE_FRAME));
        data.push(format!("Tool ({})", self.tool_string()));
        data.push(format!("ACCEL {:.3}", self.params.accel_percent_linear));
        data.push(format!("SPD {:.3}", self.params.speed_mms));
    }

    /// Dispatch a motion. Every step is attempted even after a failure;
    /// the moving flag is raised once the run step has gone through.
    pub async fn execute(
        &self,
        session: &mut ControllerSession,
        request: &MotionRequest,
    ) -> SequenceReport {
        let started_at = Utc::now();
        let previous = session.motion().last_commanded();
        let plan = self.plan(request, previous.as_deref());

        if let MotionRequest::Linear { target, pose } = request {
            debug!(
                config = config_flag(target, session.axis_count()),
                turns = turns_flag(target),
                "Linear target pose {:?}",
                pose
            );
        }

        session.status().set(Status::Working);
        session.motion().set_target(plan.target.clone());

        let mut steps = Vec::with_capacity(plan.steps.len());
        for step in &plan.steps {
            let ok = session.run(step, false).await;
            steps.push(StepOutcome { command: step.clone(), ok });
        }

        let started = steps.last().is_some_and(|step| step.ok);
        if started {
            session.motion().start();
            info!("{:?} motion started towards {:?}", plan.kind, plan.target);
        }

        let report = SequenceReport {
            kind: plan.kind,
            started_at,
            steps,
            started,
        };
        if !report.succeeded() {
            let failed = report.failed_steps();
            warn!(
                "Motion sequence had {} failed step(s): {}",
                failed.len(),
                serde_json::to_string(&report).unwrap_or_default()
            );
            session.reporter().message(&format!(
                "Warning: Motion sequence had {} failed step(s), first: {}",
                failed.len(),
                failed.first().copied().unwrap_or_default()
            ));
        }
        report
    }

    /// Apply a host speed/acceleration configuration.
    ///
    /// Values that are zero or negative leave the parameter unchanged.
    pub async fn configure_speed(&mut self, session: &mut ControllerSession, values: [f64; 4]) -> bool {
        let [linear_speed, joint_speed, linear_accel, joint_accel] = values;
        let mut ok = true;
        if linear_speed > 0.0 {
            self.params.speed_mms = linear_speed;
        }
        if joint_speed > 0.0 {
            let percent = percent_of_full_scale(joint_speed);
            ok &= session.run(&command(&format!("JOVRD {:.3}", percent)), false).await;
        }
        if linear_accel > 0.0 {
            self.params.accel_percent_linear = percent_of_full_scale(linear_accel);
        }
        if joint_accel > 0.0 {
            self.params.accel_percent_joints = percent_of_full_scale(joint_accel);
        }
        debug!("Motion parameters: {:?}", self.params);
        ok
    }

    pub fn set_rounding(&mut self, rounding: f64) {
        self.params.rounding = rounding;
    }

    /// Store the tool frame and apply it on the controller. Ready is left
    /// to the caller.
    pub async fn set_tool(&mut self, session: &mut ControllerSession, pose: [f64; 6]) -> bool {
        self.params.tool = pose;
        let cmd = command(&format!("EXECTOOL ({})", self.tool_string()));
        session.run(&cmd, false).await
    }
}
