//! Inbound host instructions
//!
//! One instruction per line, space separated, first token selects the
//! handler. Numeric arguments are collected from every token after the
//! keyword; tokens that are not numbers are skipped.

use crate::config::MAX_AXES;
use regex::Regex;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("Empty instruction")]
    Empty,

    #[error("{keyword} expects at least {expected} values, got {found}")]
    MissingValues {
        keyword: String,
        expected: usize,
        found: usize,
    },

    #[error("{0} is missing its argument")]
    MissingArgument(String),

    #[error("{keyword}: invalid {name} '{value}'")]
    InvalidArgument {
        keyword: String,
        name: &'static str,
        value: String,
    },

    #[error("Unknown command: {0}")]
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum DigitalOutput {
    /// Identifier and value passed through as written
    Raw { id: String, value: String },
    Numeric { id: i64, value: i64 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    Connect {
        host: String,
        port: Option<u16>,
        axis_count: Option<usize>,
    },
    MoveJoint {
        joints: Vec<f64>,
        pose: Vec<f64>,
    },
    MoveLinear {
        joints: Vec<f64>,
        pose: Vec<f64>,
    },
    MoveCircular {
        via: Vec<f64>,
        target: Vec<f64>,
    },
    ReadJoints,
    Speed([f64; 4]),
    Rounding(f64),
    Pause {
        millis: f64,
    },
    SetOutput(DigitalOutput),
    WaitInput {
        id: f64,
        value: f64,
    },
    GetInput {
        id: i64,
    },
    SetTool([f64; 6]),
    RunProgram {
        id: i64,
        name: String,
    },
    Popup {
        message: String,
    },
    Disconnect,
    Stop,
    Quit,
    /// Bare controller command, sent as written
    Raw(String),
    /// Command for robot 1 whose acknowledgment is relayed to the host
    Query(String),
}

/// Turns host lines into instructions
pub struct InstructionParser {
    hex_token: Regex,
}

impl InstructionParser {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            // Hex digits with at least one letter and no decimal point
            hex_token: Regex::new(r"^[0-9A-Fa-f]*[A-Fa-f][0-9A-Fa-f]*$")?,
        })
    }

    /// Numeric value of one token, if it has one
    pub fn token_value(&self, token: &str) -> Option<f64> {
        if self.hex_token.is_match(token) {
            return i64::from_str_radix(token, 16).ok().map(|v| v as f64);
        }
        token.parse::<f64>().ok().filter(|v| v.is_finite())
    }

    pub fn values(&self, words: &[&str]) -> Vec<f64> {
        words
            .iter()
            .skip(1)
            .filter_map(|word| self.token_value(word))
            .collect()
    }

    pub fn parse(&self, line: &str, axis_count: usize) -> Result<Instruction, ParseError> {
        let line = line.trim();
        if line.is_empty() {
            return Err(ParseError::Empty);
        }

        if let Some(rest) = line.strip_prefix("c ") {
            return Ok(Instruction::Raw(rest.trim().to_string()));
        }
        if let Some(rest) = line.strip_prefix("r ") {
            return Ok(Instruction::Query(rest.trim().to_string()));
        }

        let words: Vec<&str> = line.split_whitespace().collect();
        let values = self.values(&words);
        let keyword = words[0];
        let n = axis_count;

        let require = |expected: usize| {
            if values.len() < expected {
                Err(ParseError::MissingValues {
                    keyword: keyword.to_string(),
                    expected,
                    found: values.len(),
                })
            } else {
                Ok(())
            }
        };

        let instruction = match keyword {
            "CONNECT" => {
                let host = words
                    .get(1)
                    .ok_or_else(|| ParseError::MissingArgument(keyword.to_string()))?;
                let axis_count = match words.get(3) {
                    Some(word) => Some(parse_axis_count(keyword, word)?),
                    None => None,
                };
                Instruction::Connect {
                    host: host.to_string(),
                    port: words.get(2).and_then(|w| w.parse().ok()),
                    axis_count,
                }
            }
            "MOVJ" => {
                require(n)?;
                Instruction::MoveJoint {
                    joints: values[..n].to_vec(),
                    pose: values[n..].to_vec(),
                }
            }
            "MOVL" => {
                require(n.saturating_add(6))?;
                Instruction::MoveLinear {
                    joints: values[..n].to_vec(),
                    pose: values[n..n + 6].to_vec(),
                }
            }
            "MOVC" => {
                require(n.saturating_add(12).max(n.saturating_mul(2)))?;
                Instruction::MoveCircular {
                    via: values[..n].to_vec(),
                    target: values[n..2 * n].to_vec(),
                }
            }
            "CJNT" => Instruction::ReadJoints,
            "SPEED" => {
                require(1)?;
                let mut speed = [0.0; 4];
                for (slot, value) in speed.iter_mut().zip(&values) {
                    *slot = *value;
                }
                Instruction::Speed(speed)
            }
            "SETROUNDING" => {
                require(1)?;
                Instruction::Rounding(values[0])
            }
            "PAUSE" => {
                require(1)?;
                Instruction::Pause { millis: values[0] }
            }
            "SETDO" if words.len() == 3 => Instruction::SetOutput(DigitalOutput::Raw {
                id: words[1].to_string(),
                value: words[2].to_string(),
            }),
            "SETDO" => {
                require(2)?;
                Instruction::SetOutput(DigitalOutput::Numeric {
                    id: values[0] as i64,
                    value: values[1] as i64,
                })
            }
            "WAITDI" => {
                require(2)?;
                Instruction::WaitInput {
                    id: values[0],
                    value: values[1],
                }
            }
            "GETDI" => {
                require(1)?;
                Instruction::GetInput { id: values[0] as i64 }
            }
            "SETTOOL" => {
                require(6)?;
                let mut pose = [0.0; 6];
                pose.copy_from_slice(&values[..6]);
                Instruction::SetTool(pose)
            }
            "RUNPROG" => {
                require(1)?;
                let id = values[0] as i64;
                let name = if words.len() >= 3 {
                    words[1].to_string()
                } else {
                    format!("Program {}", id)
                };
                Instruction::RunProgram { id, name }
            }
            "POPUP" => {
                let message = line
                    .strip_prefix("POPUP ")
                    .ok_or_else(|| ParseError::MissingArgument(keyword.to_string()))?;
                Instruction::Popup {
                    message: message.to_string(),
                }
            }
            "DISCONNECT" => Instruction::Disconnect,
            "STOP" => Instruction::Stop,
            "QUIT" => Instruction::Quit,
            _ => return Err(ParseError::Unknown(line.to_string())),
        };
        Ok(instruction)
    }
}

/// Axis count in `1..=MAX_AXES`
fn parse_axis_count(keyword: &str, word: &str) -> Result<usize, ParseError> {
    word.parse::<usize>()
        .ok()
        .filter(|axes| (1..=MAX_AXES).contains(axes))
        .ok_or_else(|| ParseError::InvalidArgument {
            keyword: keyword.to_string(),
            name: "axis count",
            value: word.to_string(),
        })
}

/// True for the one instruction accepted while a motion is in flight
pub fn is_halt(line: &str) -> bool {
    line.trim_start().starts_with("STOP")
}
