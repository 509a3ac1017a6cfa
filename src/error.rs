//! Error taxonomy for the test execution engine.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to start {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("lost track of {command} after it started: {source}")]
    Wait {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} exceeded its {after_secs}s deadline and was terminated")]
    Timeout { command: String, after_secs: u64 },

    #[error("{command} exited with code {}: {}", display_code(.code), .stderr.trim())]
    ProcessExit {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("could not parse {tool} output: {message}")]
    Parse { tool: &'static str, message: String },

    #[error("{command} was cancelled")]
    Cancelled { command: String },

    #[error("invalid target: {0}")]
    InvalidTarget(String),
}

impl EngineError {
    pub(crate) fn parse(tool: &'static str, message: impl Into<String>) -> Self {
        Self::Parse {
            tool,
            message: message.into(),
        }
    }

    /// Command name the error refers to, if any.
    pub fn command(&self) -> Option<&str> {
        match self {
            Self::Spawn { command, .. }
            | Self::Wait { command, .. }
            | Self::Timeout { command, .. }
            | Self::ProcessExit { command, .. }
            | Self::Cancelled { command } => Some(command.as_str()),
            Self::Parse { tool, .. } => Some(*tool),
            Self::InvalidTarget(_) => None,
        }
    }
}

fn display_code(code: &Option<i32>) -> String {
    match code {
        Some(c) => c.to_string(),
        None => "<signal>".to_string(),
    }
}
