pub mod agent;
pub mod charset;
pub mod error;
pub mod handle;
pub mod native;
pub mod result;
pub mod session;
pub mod shell;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Error, Result};
pub use result::{CommandResult, ConsumptionState, EagerResult, LazyResult};
pub use session::Session;
pub use shell::{PollPolicy, Shell};

use std::fmt;
use std::path::{Path, PathBuf};

/// SSH connection configuration.
#[derive(Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct SshConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    pub passphrase: Option<String>,
    pub private_key_file: Option<PathBuf>,
    /// Authentication strategies, tried in order until one succeeds.
    pub auth_methods: Vec<AuthMethod>,
    /// Label of the charset used to decode remote output.
    pub charset: String,
    pub timeout_secs: Option<u64>,
}

/// SSH authentication method.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    PublicKey,
    Password,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 22,
            username: String::new(),
            password: None,
            passphrase: None,
            private_key_file: None,
            auth_methods: vec![AuthMethod::PublicKey, AuthMethod::Password],
            charset: "utf-8".to_string(),
            timeout_secs: None,
        }
    }
}

impl SshConfig {
    pub fn new(host: impl Into<String>, port: u16, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            ..Default::default()
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_key_file(mut self, path: impl Into<PathBuf>, passphrase: Option<String>) -> Self {
        self.private_key_file = Some(path.into());
        self.passphrase = passphrase;
        self
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}

impl fmt::Debug for SshConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("passphrase", &self.passphrase.as_ref().map(|_| "***"))
            .field("private_key_file", &self.private_key_file)
            .field("auth_methods", &self.auth_methods)
            .field("charset", &self.charset)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Connect to a remote host via SSH.
///
/// The returned session is lazy: nothing goes over the wire until the
/// first command is executed.
pub fn connect(config: SshConfig) -> Result<Session> {
    Session::new(config)
}
