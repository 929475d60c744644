use serde_json::{Map, Value};
use std::time::Duration;
use thiserror::Error;

/// Result alias for core operations.
pub type WardenResult<T> = Result<T, WardenError>;

#[derive(Error, Debug)]
pub enum WardenError {
    #[error("[PW1000] io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("[PW1001] toml config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("[PW1002] yaml config parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("[PW1100] configuration error: {0}")]
    InvalidConfig(String),

    #[error("[PW1200] not found: {subject}")]
    NotFound { subject: String, stderr: String },

    #[error("[PW1201] invalid request: {0}")]
    InvalidRequest(String),

    #[error("[PW2000] `{command}` timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("[PW2001] `{command}` exited with code {exit_code}: {}", diagnostic(.stdout, .stderr))]
    CommandFailed {
        command: String,
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    #[error("[PW2002] failed to launch `{command}`: {message}")]
    System { command: String, message: String },

    #[error("[PW2003] unexpected output from `{command}`: {line:?}")]
    UnexpectedOutput { command: String, line: String },

    #[error("[PW3000] native binding unavailable: {0}")]
    BindingUnavailable(String),
}

/// Coarse classification used as the envelope error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidRequest,
    Timeout,
    CommandFailed,
    SystemError,
    BindingUnavailable,
    InvalidConfig,
    UnexpectedOutput,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::Timeout => "timeout",
            ErrorKind::CommandFailed => "command_failed",
            ErrorKind::SystemError => "system_error",
            ErrorKind::BindingUnavailable => "binding_unavailable",
            ErrorKind::InvalidConfig => "invalid_config",
            ErrorKind::UnexpectedOutput => "unexpected_output",
        }
    }
}

impl WardenError {
    pub fn code(&self) -> &'static str {
        match self {
            WardenError::Io(_) => "PW1000",
            WardenError::Toml(_) => "PW1001",
            WardenError::Yaml(_) => "PW1002",
            WardenError::InvalidConfig(_) => "PW1100",
            WardenError::NotFound { .. } => "PW1200",
            WardenError::InvalidRequest(_) => "PW1201",
            WardenError::Timeout { .. } => "PW2000",
            WardenError::CommandFailed { .. } => "PW2001",
            WardenError::System { .. } => "PW2002",
            WardenError::UnexpectedOutput { .. } => "PW2003",
            WardenError::BindingUnavailable(_) => "PW3000",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            WardenError::Io(_) | WardenError::System { .. } => ErrorKind::SystemError,
            WardenError::Toml(_) | WardenError::Yaml(_) | WardenError::InvalidConfig(_) => {
                ErrorKind::InvalidConfig
            }
            WardenError::NotFound { .. } => ErrorKind::NotFound,
            WardenError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            WardenError::Timeout { .. } => ErrorKind::Timeout,
            WardenError::CommandFailed { .. } => ErrorKind::CommandFailed,
            WardenError::UnexpectedOutput { .. } => ErrorKind::UnexpectedOutput,
            WardenError::BindingUnavailable(_) => ErrorKind::BindingUnavailable,
        }
    }

    /// Shorthand for a `NotFound` without captured CLI output.
    pub fn not_found(subject: impl Into<String>) -> Self {
        WardenError::NotFound {
            subject: subject.into(),
            stderr: String::new(),
        }
    }

    /// Context attached to failure envelopes so operators can see what ran.
    ///
    /// Captured stdout/stderr are passed through verbatim.
    pub fn extra(&self) -> Map<String, Value> {
        let mut extra = Map::new();
        extra.insert("reference".into(), Value::from(self.code()));
        match self {
            WardenError::NotFound { stderr, .. } if !stderr.is_empty() => {
                extra.insert("stderr".into(), Value::from(stderr.as_str()));
            }
            WardenError::Timeout { command, timeout } => {
                extra.insert("command".into(), Value::from(command.as_str()));
                extra.insert("timeout_secs".into(), Value::from(timeout.as_secs_f64()));
            }
            WardenError::CommandFailed {
                command,
                exit_code,
                stdout,
                stderr,
            } => {
                extra.insert("command".into(), Value::from(command.as_str()));
                extra.insert("exit_code".into(), Value::from(*exit_code));
                extra.insert("stdout".into(), Value::from(stdout.as_str()));
                extra.insert("stderr".into(), Value::from(stderr.as_str()));
            }
            WardenError::System { command, .. } | WardenError::UnexpectedOutput { command, .. } => {
                extra.insert("command".into(), Value::from(command.as_str()));
            }
            _ => {}
        }
        extra
    }
}

fn diagnostic(stdout: &str, stderr: &str) -> String {
    let stderr = stderr.trim();
    let stdout = stdout.trim();
    if !stderr.is_empty() {
        stderr.to_string()
    } else if !stdout.is_empty() {
        stdout.to_string()
    } else {
        "no additional output".to_string()
    }
}
