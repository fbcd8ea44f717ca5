//! Wrapper around the `ssh-add` utility of a running SSH agent.

use super::error::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

/// Environment variable overriding the `ssh-add` binary.
pub const SSH_ADD_ENV: &str = "BEAST_SSH_ADD";

static KEY_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<keylength>\d+)\s+(?P<fingerprint>\S+)\s+(?P<filename>.+?)\s\((?P<keytype>\w+?)\)$")
        .expect("valid key list pattern")
});

/// One identity held by the agent, as listed by `ssh-add -l`.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct AgentKey {
    pub bits: u32,
    pub fingerprint: String,
    /// Key file name or comment.
    pub filename: String,
    pub key_type: String,
}

/// Locate `ssh-add`: `BEAST_SSH_ADD` first, then `PATH`.
pub fn ssh_add_program() -> Result<PathBuf> {
    if let Ok(p) = std::env::var(SSH_ADD_ENV) {
        let p = p.trim();
        if !p.is_empty() {
            return Ok(PathBuf::from(p));
        }
    }
    which::which("ssh-add").map_err(|e| {
        Error::Agent(format!(
            "ssh-add not found ({}). Install OpenSSH or set {} to a full path.",
            e, SSH_ADD_ENV
        ))
    })
}

/// Parse `ssh-add -l` output. Lines that do not describe a key are skipped.
pub fn parse_key_list(stdout: &str) -> Vec<AgentKey> {
    stdout
        .lines()
        .filter_map(|line| {
            let caps = KEY_LINE.captures(line.trim_end())?;
            Some(AgentKey {
                bits: caps["keylength"].parse().ok()?,
                fingerprint: caps["fingerprint"].to_string(),
                filename: caps["filename"].to_string(),
                key_type: caps["keytype"].to_string(),
            })
        })
        .collect()
}

/// Handle on the user's SSH agent.
#[derive(Clone, Debug)]
pub struct SshAgent {
    program: PathBuf,
    socket: Option<String>,
    askpass: bool,
}

impl SshAgent {
    pub fn new() -> Result<Self> {
        Ok(Self::with_program(ssh_add_program()?))
    }

    /// Use a specific `ssh-add` binary. Agent socket and askpass settings
    /// are read from the environment.
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            socket: std::env::var("SSH_AUTH_SOCK").ok().filter(|s| !s.is_empty()),
            askpass: std::env::var_os("SSH_ASKPASS").is_some(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn socket(&self) -> Option<&str> {
        self.socket.as_deref()
    }

    /// Add an identity file to the agent.
    pub fn add(&self, filename: &Path) -> Result<()> {
        let path = std::path::absolute(filename)?;
        self.operate(vec![path.into_os_string()])
    }

    /// Remove an identity file from the agent.
    pub fn delete(&self, filename: &Path) -> Result<()> {
        let path = std::path::absolute(filename)?;
        self.operate(vec![OsString::from("-d"), path.into_os_string()])
    }

    /// Keys currently held by the agent.
    pub fn keys(&self) -> Result<Vec<AgentKey>> {
        let output = self.run(&[OsString::from("-l")], false)?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            // Exit status 1 with this message just means an empty agent.
            if stdout.contains("has no identities") {
                return Ok(Vec::new());
            }
            return Err(Error::Agent(String::from_utf8_lossy(&output.stderr).trim().to_string()));
        }
        Ok(parse_key_list(&stdout))
    }

    fn operate(&self, args: Vec<OsString>) -> Result<()> {
        if self.socket.is_none() {
            return Err(Error::Agent(
                "no SSH agent available (SSH_AUTH_SOCK is not set)".to_string(),
            ));
        }
        let output = self.run(&args, self.askpass)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            log::warn!("ssh-add {:?} failed: {}", args, stderr);
            return Err(Error::Agent(stderr));
        }
        Ok(())
    }

    fn run(&self, args: &[OsString], null_stdin: bool) -> Result<Output> {
        log::debug!("Running {} {:?}", self.program.display(), args);
        let stdin = if null_stdin { Stdio::null() } else { Stdio::piped() };
        let output = Command::new(&self.program)
            .args(args)
            .stdin(stdin)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()?;
        Ok(output)
    }
}
