//! Command execution results.
//!
//! A [`LazyResult`] runs its command when first iterated and yields output
//! chunk by chunk. An [`EagerResult`] drains a lazy result up front and
//! caches everything. Either can be consumed exactly once.

use super::charset::Charset;
use super::error::{Error, Result};
use super::handle::{ChannelHandle, SessionHandle};
use super::native::RusshTransport;
use super::transport::Transport;
use std::sync::Arc;

/// Bytes requested per read while streaming command output.
pub const CHUNK_SIZE: usize = 1024;

/// Where a result stands in its single pass over the output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsumptionState {
    NotStarted,
    Iterating,
    Exhausted,
}

/// Streaming result of one remote command.
///
/// Holds the session borrowed for its whole lifetime, so the channel it
/// opens can never outlive the connection.
pub struct LazyResult<'a, T: Transport = RusshTransport> {
    hostname: String,
    session: &'a SessionHandle<T>,
    command: Vec<u8>,
    charset: Charset,
    channel: Option<ChannelHandle<T>>,
    state: ConsumptionState,
    return_code: Option<i32>,
}

impl<'a, T: Transport> LazyResult<'a, T> {
    pub(crate) fn new(
        hostname: String,
        session: &'a SessionHandle<T>,
        command: Vec<u8>,
        charset: Charset,
    ) -> Self {
        Self {
            hostname,
            session,
            command,
            charset,
            channel: None,
            state: ConsumptionState::NotStarted,
            return_code: None,
        }
    }

    /// Start the command and iterate over its output.
    ///
    /// Fails with [`Error::ResultConsumed`] on every call after the first.
    pub fn iter(&mut self) -> Result<Chunks<'_, 'a, T>> {
        if self.state != ConsumptionState::NotStarted {
            return Err(self.consumed());
        }
        // A failed start still counts as the single allowed pass.
        self.state = ConsumptionState::Exhausted;

        let transport = Arc::clone(self.session.transport());
        let mut channel = self.session.channel();

        let status = transport.channel_open_session(channel.raw_mut());
        if !status.is_ok() {
            log::warn!("SSH channel open on {} failed: {:?}", self.hostname, status);
            return Err(Error::Communication {
                hostname: self.hostname.clone(),
                return_code: status.code(),
            });
        }

        let status = transport.channel_request_exec(channel.raw_mut(), &self.command);
        if !status.is_ok() {
            return Err(Error::Execution {
                hostname: self.hostname.clone(),
                return_code: status.code(),
                message: self.session.last_error(),
                command: String::from_utf8_lossy(&self.command).into_owned(),
            });
        }

        log::debug!(
            "SSH executing on {}: {}",
            self.hostname,
            String::from_utf8_lossy(&self.command)
        );
        self.channel = Some(channel);
        self.state = ConsumptionState::Iterating;
        Ok(Chunks { result: self })
    }

    /// Run the command and return its whole output.
    pub fn as_bytes(&mut self) -> Result<Vec<u8>> {
        Ok(self.iter()?.flatten().collect())
    }

    /// Run the command and return its output decoded with the session charset.
    pub fn as_str(&mut self) -> Result<String> {
        let bytes = self.as_bytes()?;
        Ok(self.charset.decode(&bytes))
    }

    /// Run the command to completion, discarding output.
    pub fn wait(&mut self) -> Result<Option<i32>> {
        self.iter()?.for_each(drop);
        Ok(self.return_code)
    }

    /// Exit status of the remote command, once the output is exhausted.
    pub fn return_code(&self) -> Option<i32> {
        self.return_code
    }

    pub fn state(&self) -> ConsumptionState {
        self.state
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn command(&self) -> &[u8] {
        &self.command
    }

    fn next_chunk(&mut self) -> Option<Vec<u8>> {
        if self.state != ConsumptionState::Iterating {
            return None;
        }
        let mut channel = self.channel.take()?;
        let transport = Arc::clone(self.session.transport());

        let data = transport.channel_read(channel.raw_mut(), CHUNK_SIZE, false);
        if !data.is_empty() {
            self.channel = Some(channel);
            return Some(data);
        }

        // No more data: the command is done.
        transport.channel_send_eof(channel.raw_mut());
        let status = transport.channel_exit_status(channel.raw_mut());
        self.return_code = Some(status);
        self.state = ConsumptionState::Exhausted;
        log::debug!("SSH command on {} exited with {}", self.hostname, status);
        None
    }

    fn consumed(&self) -> Error {
        Error::ResultConsumed {
            hostname: self.hostname.clone(),
            command: String::from_utf8_lossy(&self.command).into_owned(),
        }
    }
}

/// Iterator over the output chunks of a running [`LazyResult`].
pub struct Chunks<'r, 'a, T: Transport> {
    result: &'r mut LazyResult<'a, T>,
}

impl<T: Transport> Iterator for Chunks<'_, '_, T> {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Vec<u8>> {
        self.result.next_chunk()
    }
}

/// Buffered result: the command has already run to completion.
#[derive(Debug)]
pub struct EagerResult {
    hostname: String,
    command: Vec<u8>,
    charset: Charset,
    data: Vec<Vec<u8>>,
    return_code: Option<i32>,
}

impl EagerResult {
    pub(crate) fn from_lazy<T: Transport>(mut lazy: LazyResult<'_, T>) -> Result<Self> {
        let data: Vec<Vec<u8>> = lazy.iter()?.collect();
        Ok(Self {
            hostname: lazy.hostname.clone(),
            command: lazy.command.clone(),
            charset: lazy.charset,
            data,
            return_code: lazy.return_code,
        })
    }

    /// Cached output chunks in the order they were received.
    pub fn chunks(&self) -> &[Vec<u8>] {
        &self.data
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        self.data.concat()
    }

    pub fn as_str(&self) -> String {
        self.charset.decode(&self.as_bytes())
    }

    /// The command has already finished; returns the cached exit status.
    pub fn wait(&self) -> Option<i32> {
        self.return_code
    }

    pub fn return_code(&self) -> Option<i32> {
        self.return_code
    }

    /// Always a reuse violation: the output was drained when the result was built.
    pub fn iter(&self) -> Result<std::slice::Iter<'_, Vec<u8>>> {
        Err(Error::ResultConsumed {
            hostname: self.hostname.clone(),
            command: String::from_utf8_lossy(&self.command).into_owned(),
        })
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn command(&self) -> &[u8] {
        &self.command
    }
}

/// What [`Session::execute`](super::Session::execute) hands back.
pub enum CommandResult<'a, T: Transport = RusshTransport> {
    Lazy(LazyResult<'a, T>),
    Eager(EagerResult),
}

impl<T: Transport> CommandResult<'_, T> {
    pub fn as_bytes(&mut self) -> Result<Vec<u8>> {
        match self {
            CommandResult::Lazy(result) => result.as_bytes(),
            CommandResult::Eager(result) => Ok(result.as_bytes()),
        }
    }

    pub fn as_str(&mut self) -> Result<String> {
        match self {
            CommandResult::Lazy(result) => result.as_str(),
            CommandResult::Eager(result) => Ok(result.as_str()),
        }
    }

    pub fn wait(&mut self) -> Result<Option<i32>> {
        match self {
            CommandResult::Lazy(result) => result.wait(),
            CommandResult::Eager(result) => Ok(result.wait()),
        }
    }

    pub fn return_code(&self) -> Option<i32> {
        match self {
            CommandResult::Lazy(result) => result.return_code(),
            CommandResult::Eager(result) => result.return_code(),
        }
    }
}
