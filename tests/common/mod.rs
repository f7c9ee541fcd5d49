//! In-process stand-in for an R-series controller command server

#![allow(dead_code)]

use melfad::{DriverConfig, FrameBuffer};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

pub const ERROR_CODE: &str = "1234";
pub const ERROR_TEXT: &str = "Cannot execute (RUN or WAI)";

#[derive(Default)]
struct ControllerState {
    /// (connection index, command) in arrival order
    log: Vec<(usize, String)>,
    joints: String,
    running: bool,
    replies: HashMap<String, String>,
    hang_up_on: Option<String>,
}

pub struct FakeController {
    pub port: u16,
    state: Arc<Mutex<ControllerState>>,
    task: JoinHandle<()>,
}

impl FakeController {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let state = Arc::new(Mutex::new(ControllerState {
            joints: joint_reply(&[0.0; 6]),
            ..Default::default()
        }));

        let shared = state.clone();
        let task = tokio::spawn(async move {
            let mut index = 0;
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(serve(socket, index, shared.clone()));
                index += 1;
            }
        });

        Self { port, state, task }
    }

    pub fn config(&self) -> DriverConfig {
        let mut config = DriverConfig::default();
        config.connection.port = self.port;
        config.connection.connect_timeout_secs = 1.0;
        config.connection.response_timeout_secs = 5.0;
        config.monitor.poll_delay_ms = 1;
        config.monitor.idle_delay_ms = 1;
        config
    }

    /// Commands received on one connection; 0 is control, 1 is the monitor
    pub fn commands(&self, connection: usize) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .log
            .iter()
            .filter(|(index, _)| *index == connection)
            .map(|(_, cmd)| cmd.clone())
            .collect()
    }

    pub fn clear_log(&self) {
        self.state.lock().unwrap().log.clear();
    }

    pub fn set_joints(&self, joints: &[f64]) {
        self.state.lock().unwrap().joints = joint_reply(joints);
    }

    pub fn set_running(&self, running: bool) {
        self.state.lock().unwrap().running = running;
    }

    pub fn reply(&self, command: &str, response: &str) {
        self.state
            .lock()
            .unwrap()
            .replies
            .insert(command.to_string(), response.to_string());
    }

    /// Drop the connection instead of answering this command
    pub fn hang_up_on(&self, command: &str) {
        self.state.lock().unwrap().hang_up_on = Some(command.to_string());
    }
}

impl Drop for FakeController {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub fn joint_reply(joints: &[f64]) -> String {
    let fields: Vec<String> = joints
        .iter()
        .enumerate()
        .map(|(i, v)| format!("J{};{:.2}", i + 1, v))
        .collect();
    format!("QoK{}", fields.join(";"))
}

fn respond(state: &mut ControllerState, command: &str) -> Option<String> {
    if state.hang_up_on.as_deref() == Some(command) {
        return None;
    }
    if let Some(reply) = state.replies.get(command) {
        return Some(reply.clone());
    }
    let reply = match command {
        "1;1;JPOSF" => state.joints.clone(),
        "1;1;STATE" if state.running => "QoKA;B;C;D;6000".to_string(),
        "1;1;STATE" => "QoKA;B;C;D;2000".to_string(),
        "1;1;ERROR" => format!("QoK{}", ERROR_CODE),
        c if c == format!("1;1;ERRORMES{}", ERROR_CODE) => format!("QoK{}", ERROR_TEXT),
        _ => "QoK".to_string(),
    };
    Some(reply)
}

async fn serve(mut socket: TcpStream, index: usize, state: Arc<Mutex<ControllerState>>) {
    let mut frames = FrameBuffer::new();
    let mut buf = [0u8; 512];
    loop {
        let n = match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        frames.extend(&buf[..n]);
        while let Some(command) = frames.next_frame() {
            let reply = {
                let mut state = state.lock().unwrap();
                state.log.push((index, command.clone()));
                respond(&mut state, &command)
            };
            let Some(reply) = reply else {
                return;
            };
            let mut frame = reply.into_bytes();
            frame.push(0);
            if socket.write_all(&frame).await.is_err() {
                return;
            }
        }
    }
}

/// Poll `condition` until it holds or five seconds pass
pub async fn wait_for<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..500 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
