mod common;

use common::{wait_for, FakeController, ERROR_CODE};
use melfad::{
    ControllerSession, Driver, MotionParameters, MotionRequest, MotionSequencer,
    RecordingReporter, Status,
};
use std::sync::Arc;

const TARGET: [f64; 6] = [10.0, 20.0, 30.0, 40.0, 50.0, 60.0];

async fn connected_driver(controller: &FakeController) -> (Driver, Arc<RecordingReporter>) {
    let reporter = Arc::new(RecordingReporter::new());
    let mut driver = Driver::new(controller.config(), reporter.clone()).unwrap();
    driver
        .handle_line(&format!("CONNECT 127.0.0.1 {}", controller.port))
        .await;
    assert_eq!(driver.session().status().current(), Status::Ready);
    controller.clear_log();
    reporter.clear();
    (driver, reporter)
}

/// Wait until the monitor has released the motion and reported Ready
async fn wait_for_completion(driver: &Driver) -> bool {
    let motion = driver.session().motion().clone();
    let status = driver.session().status().clone();
    wait_for(|| !motion.is_moving() && status.current() == Status::Ready).await
}

fn expected_joint_program() -> Vec<&'static str> {
    vec![
        "1;1;FDELMRL",
        "1;1;NEW",
        "1;1;LOAD=MRL",
        "1;1;EDATA 1 J1=(10.000000,20.000000,30.000000,40.000000,50.000000,60.000000)",
        "1;1;EDATA 2 SPD 50.000",
        "1;1;EDATA 3 ACCEL 100.000",
        "1;1;EDATA 4 MOV J1",
        "1;1;SAVE",
        "1;1;RSTPRG",
        "1;1;PRGLOAD=MRL",
        "1;1;RSTPRG",
        "1;1;RUNMRL;1",
    ]
}

#[tokio::test]
async fn joint_move_runs_program_and_completes() {
    let controller = FakeController::start().await;
    let (mut driver, reporter) = connected_driver(&controller).await;

    controller.set_joints(&TARGET);
    controller.set_running(true);
    driver.handle_line("MOVJ 10 20 30 40 50 60").await;

    assert_eq!(controller.commands(0), expected_joint_program());
    assert!(driver.session().motion().is_moving());
    assert_eq!(driver.session().status().current(), Status::Working);
    assert_eq!(reporter.rendered().first().map(String::as_str), Some("SMS:Working..."));

    // Busy: everything but the halt is dropped
    driver.handle_line("SETROUNDING 3").await;
    driver.handle_line("CJNT").await;
    assert_eq!(driver.sequencer().params().rounding, -1.0);
    assert_eq!(controller.commands(0).len(), expected_joint_program().len());

    controller.set_running(false);
    assert!(wait_for_completion(&driver).await);
    assert!(reporter.contains("JNTS_MOVING 10 20 30 40 50 60"));
    assert!(!reporter.rendered().iter().any(|l| l.starts_with("SMS:Warning: Error moving robot")));
    assert!(controller.commands(1).iter().any(|c| c == "1;1;STATE"));
}

#[tokio::test]
async fn stall_away_from_target_is_reported() {
    let controller = FakeController::start().await;
    let (mut driver, reporter) = connected_driver(&controller).await;

    controller.set_joints(&[10.0, 20.0, 30.0, 40.0, 50.0, 70.0]);
    driver.handle_line("MOVJ 10 20 30 40 50 60").await;

    assert!(wait_for_completion(&driver).await);
    assert!(reporter.contains("SMS:Warning: Error moving robot: 10 20 30 40 50 70"));
}

#[tokio::test]
async fn stop_halts_and_disconnects() {
    let controller = FakeController::start().await;
    let (mut driver, _) = connected_driver(&controller).await;

    controller.set_running(true);
    driver.handle_line("MOVJ 10 20 30 40 50 60").await;
    assert!(driver.session().motion().is_moving());
    controller.clear_log();

    driver.handle_line("STOP").await;
    assert!(!driver.session().motion().is_moving());
    assert_eq!(
        controller.commands(0),
        vec!["1;1;SRVOFF", "1;1;RSTPRG", "1;1;CLOSE"]
    );
    assert!(!driver.session().is_connected());
    assert_eq!(driver.session().status().current(), Status::Disconnected);
}

#[tokio::test]
async fn circular_move_starts_at_previous_target() {
    let controller = FakeController::start().await;
    let (mut driver, _) = connected_driver(&controller).await;

    controller.set_joints(&TARGET);
    driver.handle_line("MOVJ 10 20 30 40 50 60").await;
    assert!(wait_for_completion(&driver).await);
    controller.clear_log();

    controller.set_running(true);
    let line = format!("MOVC {} {} {}", "1 ".repeat(6), "2 ".repeat(6), "0 ".repeat(6));
    driver.handle_line(line.trim()).await;

    let commands = controller.commands(0);
    assert_eq!(commands.len(), 16);
    assert_eq!(commands[3], "1;1;EDATA 1 Base (0.000,0.000,0.000,0.000,0.000,0.000)");
    assert_eq!(
        commands[7],
        "1;1;EDATA 5 J1=(10.000000,20.000000,30.000000,40.000000,50.000000,60.000000)"
    );
    assert_eq!(commands[10], "1;1;EDATA 8 Mvr J1, J2, J3");
    assert_eq!(driver.session().motion().last_commanded(), Some(vec![2.0; 6]));
}

#[tokio::test]
async fn monitor_failure_enters_error_state() {
    let controller = FakeController::start().await;
    let (mut driver, reporter) = connected_driver(&controller).await;

    controller.hang_up_on("1;1;STATE");
    driver.handle_line("MOVJ 10 20 30 40 50 60").await;

    let status = driver.session().status().clone();
    assert!(wait_for(|| status.current() == Status::Unknown).await);
    assert!(reporter.contains("SMS:Controller closed the connection"));
    assert!(driver.session().motion().is_moving());

    controller.clear_log();
    driver.handle_line("STOP").await;
    assert_eq!(&controller.commands(0)[..2], ["1;1;SRVOFF", "1;1;RSTPRG"]);
    assert_eq!(driver.session().status().current(), Status::Disconnected);
}

#[tokio::test]
async fn speed_and_tool_reach_the_controller() {
    let controller = FakeController::start().await;
    let (mut driver, reporter) = connected_driver(&controller).await;

    driver.handle_line("SPEED 100 2500 -1 0").await;
    driver.handle_line("SETTOOL 0 0 120 0 0 0").await;
    assert_eq!(
        controller.commands(0),
        vec![
            "1;1;JOVRD 50.000",
            "1;1;EXECTOOL (0.000000,0.000000,120.000000,0.000000,0.000000,0.000000)",
        ]
    );
    assert_eq!(driver.sequencer().params().speed_mms, 100.0);
    assert_eq!(reporter.rendered().last().map(String::as_str), Some("SMS:Ready"));
}

#[tokio::test]
async fn query_relays_acknowledgment() {
    let controller = FakeController::start().await;
    let (mut driver, reporter) = connected_driver(&controller).await;

    controller.reply("1;1;IN14", "QoK0001");
    driver.handle_line("GETDI 14").await;
    controller.reply("1;1;VAL", "QoKM_01=5");
    driver.handle_line("r VAL").await;
    driver.handle_line("SETDO 3 1").await;

    assert!(reporter.contains("RE:0001"));
    assert!(reporter.contains("RE:M_01=5"));
    assert_eq!(
        controller.commands(0),
        vec!["1;1;IN14", "1;1;VAL", "1;1;OUT=3;1"]
    );
}

#[tokio::test]
async fn each_instruction_publishes_ready_once() {
    let controller = FakeController::start().await;
    let (mut driver, reporter) = connected_driver(&controller).await;

    driver.handle_line("SETDO 3 1").await;
    assert_eq!(reporter.rendered(), vec!["SMS:Working...", "SMS:Ready"]);

    reporter.clear();
    driver.handle_line("SETTOOL 0 0 120 0 0 0").await;
    assert_eq!(reporter.rendered(), vec!["SMS:Ready"]);

    reporter.clear();
    controller.reply("1;1;IN14", "QoK0001");
    driver.handle_line("GETDI 14").await;
    assert_eq!(reporter.rendered(), vec!["RE:0001", "SMS:Ready"]);

    reporter.clear();
    driver.handle_line("SPEED 100 2500 -1 0").await;
    assert_eq!(reporter.rendered(), vec!["SMS:Working...", "SMS:Ready"]);

    reporter.clear();
    controller.reply("1;1;VAL", "QoKM_01=5");
    driver.handle_line("r VAL").await;
    assert_eq!(reporter.rendered(), vec!["RE:M_01=5", "SMS:Ready"]);
}

#[tokio::test]
async fn failed_step_stops_the_motion_from_starting() {
    let controller = FakeController::start().await;
    let reporter = Arc::new(RecordingReporter::new());
    let mut session = ControllerSession::new(controller.config(), reporter.clone());
    assert!(session.connect("127.0.0.1", controller.port).await);
    let sequencer = MotionSequencer::new(MotionParameters::from(&session.config().motion));

    controller.reply("1;1;SAVE", "QerE001");
    controller.clear_log();
    reporter.clear();

    let request = MotionRequest::Joint { target: TARGET.to_vec() };
    let report = sequencer.execute(&mut session, &request).await;

    assert!(!report.started);
    assert!(!report.succeeded());
    assert!(!session.motion().is_moving());
    assert_eq!(
        report.failed_steps(),
        vec!["1;1;SAVE", "1;1;RSTPRG", "1;1;PRGLOAD=MRL", "1;1;RSTPRG", "1;1;RUNMRL;1"]
    );

    // The fault is retrieved and every later step is refused locally
    let errormes = format!("1;1;ERRORMES{}", ERROR_CODE);
    let mut expected: Vec<&str> = expected_joint_program()[..8].to_vec();
    expected.extend(["1;1;ERROR", errormes.as_str()]);
    assert_eq!(controller.commands(0), expected);
    assert_eq!(session.status().current(), Status::Unknown);

    assert!(reporter.contains("SMS:QerE001"));
    assert!(reporter.contains(
        "SMS:Warning: Motion sequence had 5 failed step(s), first: 1;1;SAVE"
    ));
    assert!(controller.commands(1).iter().all(|c| c != "1;1;STATE"));
}
