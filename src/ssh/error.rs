use std::time::Duration;
use thiserror::Error;

/// Errors raised by sessions, results and shells.
///
/// Every variant carries the context needed to log or react to the failure
/// without going back to the transport.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{library} is not available or incompatible on your computer: {message}")]
    Library { library: String, message: String },

    #[error("Connection to {hostname}:{port} failed: Error {return_code}: {message}")]
    Connection {
        hostname: String,
        port: u16,
        return_code: i32,
        message: String,
    },

    #[error("Authentication to {hostname} as {username} failed.")]
    Authentication { hostname: String, username: String },

    #[error("Communication to {hostname} failed. Error code: {return_code}")]
    Communication { hostname: String, return_code: i32 },

    #[error("Remote execution of command on {hostname} failed: Error {return_code}: {message}\nCommand: {command}")]
    Execution {
        hostname: String,
        return_code: i32,
        message: String,
        command: String,
    },

    #[error("Error writing data to SSH socket on {hostname}: {written} of {expected} bytes written")]
    Write {
        hostname: String,
        written: i32,
        expected: usize,
    },

    #[error("SSH remote shell on {hostname} seems to be closed.")]
    ShellClosed { hostname: String },

    #[error("Result of command on {hostname} is already consumed.\nCommand: {command}")]
    ResultConsumed { hostname: String, command: String },

    #[error("Remote shell on {hostname} did not settle within {elapsed:?}")]
    Timeout {
        hostname: String,
        elapsed: Duration,
        output: String,
    },

    #[error("Config error: {0}")]
    Config(String),

    #[error("SSH agent error: {0}")]
    Agent(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A custom `Result` type for SSH operations.
pub type Result<T> = std::result::Result<T, Error>;
