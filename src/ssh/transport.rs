//! Transport capability contract.
//!
//! A transport implements the SSH protocol and hands out opaque session and
//! channel handles. The rest of the crate only sequences calls into it and
//! turns its return codes into typed errors.

use std::path::Path;
use std::time::Duration;

/// Return code of a session or channel primitive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Ok,
    Error,
    Again,
    Eof,
}

impl Status {
    pub fn code(self) -> i32 {
        match self {
            Status::Ok => 0,
            Status::Error => -1,
            Status::Again => -2,
            Status::Eof => -127,
        }
    }

    /// Map a raw return code; anything unknown is treated as an error.
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Status::Ok,
            -2 => Status::Again,
            -127 => Status::Eof,
            _ => Status::Error,
        }
    }

    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }
}

/// Return code of an authentication attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthStatus {
    Success,
    Denied,
    Partial,
    Info,
    Again,
    Error,
}

impl AuthStatus {
    pub fn code(self) -> i32 {
        match self {
            AuthStatus::Success => 0,
            AuthStatus::Denied => 1,
            AuthStatus::Partial => 2,
            AuthStatus::Info => 3,
            AuthStatus::Again => 4,
            AuthStatus::Error => -1,
        }
    }

    pub fn from_code(code: i32) -> Self {
        match code {
            0 => AuthStatus::Success,
            1 => AuthStatus::Denied,
            2 => AuthStatus::Partial,
            3 => AuthStatus::Info,
            4 => AuthStatus::Again,
            _ => AuthStatus::Error,
        }
    }

    pub fn is_success(self) -> bool {
        self == AuthStatus::Success
    }
}

/// Connection option applied to a session before it connects.
#[derive(Clone, Copy, Debug)]
pub enum SessionOption<'a> {
    Host(&'a str),
    Port(u16),
    User(&'a str),
    Identity(&'a Path),
    Timeout(Duration),
}

/// Native SSH implementation consumed by sessions, results and shells.
///
/// Handles are plain values owned by the caller. `session_free` and
/// `channel_free` consume them, so a handle cannot be released twice.
/// Implementations block the calling thread for every call except the
/// non-blocking read.
pub trait Transport {
    type Session;
    type Channel;

    fn session_new(&self) -> Self::Session;
    fn session_free(&self, session: Self::Session);
    fn set_option(&self, session: &mut Self::Session, option: SessionOption<'_>);
    fn connect(&self, session: &mut Self::Session) -> Status;
    fn disconnect(&self, session: &mut Self::Session);
    fn auth_pubkey(&self, session: &mut Self::Session, passphrase: Option<&str>) -> AuthStatus;
    fn auth_password(&self, session: &mut Self::Session, password: Option<&str>) -> AuthStatus;
    /// Human readable description of the last failure on this session.
    fn last_error(&self, session: &Self::Session) -> String;

    fn channel_new(&self, session: &Self::Session) -> Self::Channel;
    fn channel_open_session(&self, channel: &mut Self::Channel) -> Status;
    fn channel_request_exec(&self, channel: &mut Self::Channel, command: &[u8]) -> Status;
    fn channel_request_pty(&self, channel: &mut Self::Channel) -> Status;
    fn channel_request_shell(&self, channel: &mut Self::Channel) -> Status;
    /// Blocking read of at most `max_len` bytes. Empty means no more data.
    fn channel_read(&self, channel: &mut Self::Channel, max_len: usize, stderr: bool) -> Vec<u8>;
    /// Read whatever is already available, at most `max_len` bytes.
    fn channel_read_nonblocking(
        &self,
        channel: &mut Self::Channel,
        max_len: usize,
        stderr: bool,
    ) -> Vec<u8>;
    /// Returns the number of bytes written, negative on error.
    fn channel_write(&self, channel: &mut Self::Channel, data: &[u8]) -> i32;
    fn channel_send_eof(&self, channel: &mut Self::Channel);
    fn channel_is_eof(&self, channel: &Self::Channel) -> bool;
    fn channel_is_open(&self, channel: &Self::Channel) -> bool;
    /// Exit status of the remote command, -1 if the remote never sent one.
    fn channel_exit_status(&self, channel: &mut Self::Channel) -> i32;
    fn channel_close(&self, channel: &mut Self::Channel);
    fn channel_free(&self, channel: Self::Channel);
}
