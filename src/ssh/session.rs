use super::charset::Charset;
use super::error::{Error, Result};
use super::handle::SessionHandle;
use super::native::RusshTransport;
use super::result::{CommandResult, EagerResult, LazyResult};
use super::transport::{AuthStatus, SessionOption, Transport};
use super::{AuthMethod, SshConfig};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// SSH session manager.
///
/// Connection management is implicit: the session connects and
/// authenticates the first time a command is executed, and tears the
/// connection down when dropped.
pub struct Session<T: Transport = RusshTransport> {
    config: SshConfig,
    charset: Charset,
    transport: Arc<T>,
    handle: Option<SessionHandle<T>>,
}

impl Session<RusshTransport> {
    /// Create a session backed by the shared russh transport.
    pub fn new(config: SshConfig) -> Result<Self> {
        Self::with_transport(config, RusshTransport::shared()?)
    }
}

impl<T: Transport> Session<T> {
    pub fn with_transport(config: SshConfig, transport: Arc<T>) -> Result<Self> {
        let charset = Charset::from_label(&config.charset)?;
        let mut session = Self {
            config,
            charset,
            transport,
            handle: None,
        };
        session.session_init();
        Ok(session)
    }

    /// Execute a command on the remote host.
    ///
    /// A lazy result streams output as it is consumed; an eager one runs the
    /// command to completion before returning.
    pub fn execute(&mut self, command: impl AsRef<[u8]>, lazy: bool) -> Result<CommandResult<'_, T>> {
        if lazy {
            self.execute_lazy(command).map(CommandResult::Lazy)
        } else {
            self.execute_eager(command).map(CommandResult::Eager)
        }
    }

    pub fn execute_lazy(&mut self, command: impl AsRef<[u8]>) -> Result<LazyResult<'_, T>> {
        self.connect()?;
        let hostname = self.config.host.clone();
        let charset = self.charset;
        let handle = self.handle.as_ref().ok_or_else(|| Error::Communication {
            hostname: hostname.clone(),
            return_code: -1,
        })?;
        Ok(LazyResult::new(hostname, handle, command.as_ref().to_vec(), charset))
    }

    pub fn execute_eager(&mut self, command: impl AsRef<[u8]>) -> Result<EagerResult> {
        let lazy = self.execute_lazy(command)?;
        EagerResult::from_lazy(lazy)
    }

    pub fn hostname(&self) -> &str {
        &self.config.host
    }

    pub fn port(&self) -> u16 {
        self.config.port
    }

    pub fn username(&self) -> &str {
        &self.config.username
    }

    pub fn keyfile(&self) -> Option<&Path> {
        self.config.private_key_file.as_deref()
    }

    pub fn config(&self) -> &SshConfig {
        &self.config
    }

    pub fn charset(&self) -> Charset {
        self.charset
    }

    pub fn is_connected(&self) -> bool {
        self.handle.as_ref().map_or(false, |h| h.connected())
    }

    /// Whether a native session handle is currently allocated.
    pub fn has_session(&self) -> bool {
        self.handle.is_some()
    }

    pub(crate) fn handle(&self) -> Option<&SessionHandle<T>> {
        self.handle.as_ref()
    }

    /// Open the connection and authenticate. No-op when already connected.
    pub(crate) fn connect(&mut self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        if self.handle.is_none() {
            self.session_init();
        }

        let config = &self.config;
        let Some(handle) = self.handle.as_mut() else {
            return Err(Error::Communication {
                hostname: config.host.clone(),
                return_code: -1,
            });
        };

        let status = handle.connect();
        if !status.is_ok() {
            let message = handle.last_error();
            log::warn!("SSH connect to {}:{} failed: {}", config.host, config.port, message);
            return Err(Error::Connection {
                hostname: config.host.clone(),
                port: config.port,
                return_code: status.code(),
                message,
            });
        }

        for method in &config.auth_methods {
            let transport = Arc::clone(handle.transport());
            let status = match method {
                AuthMethod::PublicKey => {
                    transport.auth_pubkey(handle.raw_mut(), config.passphrase.as_deref())
                }
                AuthMethod::Password => {
                    transport.auth_password(handle.raw_mut(), config.password.as_deref())
                }
            };
            log::debug!("SSH {:?} authentication on {}: {:?}", method, config.host, status);
            if status == AuthStatus::Success {
                log::info!("SSH connected to {}:{}", config.host, config.port);
                return Ok(());
            }
        }

        let err = Error::Authentication {
            hostname: config.host.clone(),
            username: config.username.clone(),
        };
        self.terminate();
        Err(err)
    }

    /// Tear down and re-establish the connection.
    pub fn reconnect(&mut self) -> Result<()> {
        self.terminate();
        self.session_init();
        self.connect()
    }

    /// Disconnect and free the native session. Safe to call repeatedly.
    pub fn terminate(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            if handle.connected() {
                log::debug!("SSH disconnecting from {}", self.config.host);
            }
            handle.disconnect();
        }
    }

    /// (Re-)initialise the native session and apply connection options.
    fn session_init(&mut self) {
        if self.handle.is_some() {
            self.terminate();
        }
        let mut handle = SessionHandle::new(Arc::clone(&self.transport));
        let transport = Arc::clone(&self.transport);
        let raw = handle.raw_mut();
        if !self.config.username.is_empty() {
            transport.set_option(raw, SessionOption::User(&self.config.username));
        }
        transport.set_option(raw, SessionOption::Host(&self.config.host));
        transport.set_option(raw, SessionOption::Port(self.config.port));
        if let Some(path) = &self.config.private_key_file {
            transport.set_option(raw, SessionOption::Identity(path));
        }
        if let Some(secs) = self.config.timeout_secs {
            transport.set_option(raw, SessionOption::Timeout(Duration::from_secs(secs)));
        }
        self.handle = Some(handle);
    }
}

impl<T: Transport> Drop for Session<T> {
    fn drop(&mut self) {
        self.terminate();
    }
}
