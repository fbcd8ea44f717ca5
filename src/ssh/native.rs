//! Blocking transport backed by the russh client.
//!
//! russh is asynchronous; every call here is driven to completion on a
//! process-wide tokio runtime, so callers see plain blocking functions.
//! Do not call into this transport from inside another tokio runtime.

use super::error::{Error, Result};
use super::transport::{AuthStatus, SessionOption, Status, Transport};
use once_cell::sync::OnceCell;
use russh::client;
use russh::keys::*;
use russh::{ChannelMsg, Disconnect};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

type SharedHandle = Arc<tokio::sync::Mutex<client::Handle<SshHandler>>>;

/// Identity files tried when no private key is configured.
const DEFAULT_IDENTITIES: &[&str] = &["id_ed25519", "id_ecdsa", "id_rsa"];

/// Most recent stderr bytes kept per channel; older ones are dropped.
const STDERR_LIMIT: usize = 64 * 1024;

/// Minimal SSH client handler.
struct SshHandler;

impl client::Handler for SshHandler {
    type Error = anyhow::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &ssh_key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        // Host keys are not verified, matching a libssh session without known_hosts checks.
        Ok(true)
    }
}

/// Transport implementation on top of russh.
pub struct RusshTransport {
    runtime: tokio::runtime::Runtime,
}

/// Native session handle of [`RusshTransport`].
pub struct RusshSession {
    host: String,
    port: u16,
    user: Option<String>,
    identity: Option<PathBuf>,
    timeout: Option<Duration>,
    handle: Option<SharedHandle>,
    error: Arc<Mutex<String>>,
}

/// Native channel handle of [`RusshTransport`].
pub struct RusshChannel {
    session: Option<SharedHandle>,
    channel: Option<russh::Channel<client::Msg>>,
    stdout: VecDeque<u8>,
    stderr: VecDeque<u8>,
    exit_status: Option<u32>,
    eof: bool,
    closed: bool,
    error: Arc<Mutex<String>>,
}

impl RusshTransport {
    /// The process-wide transport, created on first use.
    ///
    /// Concurrent first callers all observe the same instance.
    pub fn shared() -> Result<Arc<Self>> {
        static SHARED: OnceCell<Arc<RusshTransport>> = OnceCell::new();
        SHARED
            .get_or_try_init(|| Self::new().map(Arc::new))
            .map(Arc::clone)
    }

    /// Create a transport with its own runtime.
    pub fn new() -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("beast-ssh")
            .enable_all()
            .build()
            .map_err(|e| Error::Library {
                library: "tokio runtime".to_string(),
                message: e.to_string(),
            })?;
        Ok(Self { runtime })
    }

    fn next_message(&self, channel: &mut RusshChannel) -> Option<ChannelMsg> {
        let inner = channel.channel.as_mut()?;
        self.runtime.block_on(inner.wait())
    }

    /// `None` when nothing is ready yet.
    fn poll_message(&self, channel: &mut RusshChannel) -> Option<Option<ChannelMsg>> {
        match channel.channel.as_mut() {
            Some(inner) => self.runtime.block_on(async {
                tokio::time::timeout(Duration::ZERO, inner.wait()).await.ok()
            }),
            None => Some(None),
        }
    }

    /// Wait for the server to accept or reject the last channel request.
    fn await_reply(&self, channel: &mut RusshChannel, request: &str) -> Status {
        loop {
            match self.next_message(channel) {
                Some(ChannelMsg::Success) => return Status::Ok,
                Some(ChannelMsg::Failure) => {
                    record(&channel.error, format!("{} request rejected by server", request));
                    return Status::Error;
                }
                msg => {
                    channel.absorb(msg);
                    if channel.closed {
                        record(&channel.error, format!("channel closed during {} request", request));
                        return Status::Error;
                    }
                }
            }
        }
    }

    fn authenticate_key(
        &self,
        handle: &SharedHandle,
        user: &str,
        key: ssh_key::PrivateKey,
    ) -> anyhow::Result<bool> {
        self.runtime.block_on(async {
            let key = PrivateKeyWithHashAlg::new(Arc::new(key), None);
            let result = handle.lock().await.authenticate_publickey(user, key).await?;
            Ok::<bool, anyhow::Error>(matches!(result, client::AuthResult::Success))
        })
    }
}

impl RusshSession {
    fn user(&self) -> String {
        self.user
            .clone()
            .or_else(|| std::env::var("USER").ok())
            .or_else(|| std::env::var("USERNAME").ok())
            .unwrap_or_else(|| "root".to_string())
    }

    fn identities(&self) -> Vec<PathBuf> {
        if let Some(path) = &self.identity {
            return vec![path.clone()];
        }
        let Some(home) = dirs::home_dir() else {
            return Vec::new();
        };
        DEFAULT_IDENTITIES
            .iter()
            .map(|name| home.join(".ssh").join(name))
            .filter(|path| path.exists())
            .collect()
    }
}

impl RusshChannel {
    fn absorb(&mut self, msg: Option<ChannelMsg>) {
        match msg {
            Some(ChannelMsg::Data { data }) => self.stdout.extend(data.iter()),
            Some(ChannelMsg::ExtendedData { data, ext }) => {
                if ext == 1 {
                    self.stderr.extend(data.iter());
                    let excess = self.stderr.len().saturating_sub(STDERR_LIMIT);
                    self.stderr.drain(..excess);
                }
            }
            Some(ChannelMsg::ExitStatus { exit_status }) => self.exit_status = Some(exit_status),
            Some(ChannelMsg::Eof) => self.eof = true,
            Some(ChannelMsg::Close) | None => {
                self.eof = true;
                self.closed = true;
            }
            Some(_) => {}
        }
    }

    fn buffer(&mut self, stderr: bool) -> &mut VecDeque<u8> {
        if stderr {
            &mut self.stderr
        } else {
            &mut self.stdout
        }
    }

    /// Return buffered data, pulling messages from `fetch` until some
    /// arrives or EOF is seen. `fetch` yields `None` when nothing is ready,
    /// which ends the read with no data.
    fn read_with(
        &mut self,
        max_len: usize,
        stderr: bool,
        mut fetch: impl FnMut(&mut Self) -> Option<Option<ChannelMsg>>,
    ) -> Vec<u8> {
        loop {
            let buffer = self.buffer(stderr);
            if !buffer.is_empty() {
                return take(buffer, max_len);
            }
            if self.eof {
                return Vec::new();
            }
            match fetch(self) {
                Some(msg) => self.absorb(msg),
                None => return Vec::new(),
            }
        }
    }

    /// Pull messages until the exit status is known or the channel closes.
    fn exit_status_with(&mut self, mut fetch: impl FnMut(&mut Self) -> Option<ChannelMsg>) -> i32 {
        while self.exit_status.is_none() && !self.closed {
            let msg = fetch(self);
            self.absorb(msg);
        }
        self.exit_status.map_or(-1, |status| status as i32)
    }
}

fn take(buffer: &mut VecDeque<u8>, max_len: usize) -> Vec<u8> {
    let n = max_len.min(buffer.len());
    buffer.drain(..n).collect()
}

fn record(slot: &Arc<Mutex<String>>, message: impl Into<String>) {
    let message = message.into();
    log::debug!("SSH transport: {}", message);
    if let Ok(mut slot) = slot.lock() {
        *slot = message;
    }
}

impl Transport for RusshTransport {
    type Session = RusshSession;
    type Channel = RusshChannel;

    fn session_new(&self) -> RusshSession {
        RusshSession {
            host: "localhost".to_string(),
            port: 22,
            user: None,
            identity: None,
            timeout: None,
            handle: None,
            error: Arc::new(Mutex::new(String::new())),
        }
    }

    fn session_free(&self, mut session: RusshSession) {
        self.disconnect(&mut session);
    }

    fn set_option(&self, session: &mut RusshSession, option: SessionOption<'_>) {
        match option {
            SessionOption::Host(host) => session.host = host.to_string(),
            SessionOption::Port(port) => session.port = port,
            SessionOption::User(user) => session.user = Some(user.to_string()),
            SessionOption::Identity(path) => session.identity = Some(path.to_path_buf()),
            SessionOption::Timeout(timeout) => session.timeout = Some(timeout),
        }
    }

    fn connect(&self, session: &mut RusshSession) -> Status {
        let config = Arc::new(client::Config {
            inactivity_timeout: session.timeout,
            ..Default::default()
        });
        let addr = (session.host.as_str(), session.port);
        let limit = session.timeout;

        let result = self.runtime.block_on(async {
            let connecting = client::connect(config, addr, SshHandler);
            match limit {
                Some(limit) => match tokio::time::timeout(limit, connecting).await {
                    Ok(result) => result,
                    Err(_) => Err(anyhow::anyhow!("timed out after {:?}", limit)),
                },
                None => connecting.await,
            }
        });

        match result {
            Ok(handle) => {
                session.handle = Some(Arc::new(tokio::sync::Mutex::new(handle)));
                Status::Ok
            }
            Err(e) => {
                record(&session.error, e.to_string());
                Status::Error
            }
        }
    }

    fn disconnect(&self, session: &mut RusshSession) {
        if let Some(handle) = session.handle.take() {
            let result = self.runtime.block_on(async {
                handle
                    .lock()
                    .await
                    .disconnect(Disconnect::ByApplication, "", "en")
                    .await
            });
            if let Err(e) = result {
                log::debug!("SSH disconnect from {} failed: {}", session.host, e);
            }
        }
    }

    fn auth_pubkey(&self, session: &mut RusshSession, passphrase: Option<&str>) -> AuthStatus {
        let Some(handle) = session.handle.clone() else {
            record(&session.error, "not connected");
            return AuthStatus::Error;
        };
        let user = session.user();
        let identities = session.identities();
        if identities.is_empty() {
            record(&session.error, "no identity file available");
            return AuthStatus::Denied;
        }

        for path in identities {
            let key = match load_secret_key(&path, passphrase) {
                Ok(key) => key,
                Err(e) => {
                    record(&session.error, format!("{}: {}", path.display(), e));
                    continue;
                }
            };
            match self.authenticate_key(&handle, &user, key) {
                Ok(true) => return AuthStatus::Success,
                Ok(false) => {
                    record(&session.error, format!("public key {} denied", path.display()))
                }
                Err(e) => {
                    record(&session.error, e.to_string());
                    return AuthStatus::Error;
                }
            }
        }
        AuthStatus::Denied
    }

    fn auth_password(&self, session: &mut RusshSession, password: Option<&str>) -> AuthStatus {
        let Some(handle) = session.handle.clone() else {
            record(&session.error, "not connected");
            return AuthStatus::Error;
        };
        let Some(password) = password.filter(|p| !p.is_empty()) else {
            record(&session.error, "no password configured");
            return AuthStatus::Denied;
        };
        let user = session.user();
        let result = self.runtime.block_on(async {
            handle.lock().await.authenticate_password(user, password).await
        });
        match result {
            Ok(client::AuthResult::Success) => AuthStatus::Success,
            Ok(_) => {
                record(&session.error, "password denied");
                AuthStatus::Denied
            }
            Err(e) => {
                record(&session.error, e.to_string());
                AuthStatus::Error
            }
        }
    }

    fn last_error(&self, session: &RusshSession) -> String {
        session
            .error
            .lock()
            .map(|message| message.clone())
            .unwrap_or_default()
    }

    fn channel_new(&self, session: &RusshSession) -> RusshChannel {
        RusshChannel {
            session: session.handle.clone(),
            channel: None,
            stdout: VecDeque::new(),
            stderr: VecDeque::new(),
            exit_status: None,
            eof: false,
            closed: false,
            error: Arc::clone(&session.error),
        }
    }

    fn channel_open_session(&self, channel: &mut RusshChannel) -> Status {
        let Some(handle) = channel.session.clone() else {
            record(&channel.error, "session is not connected");
            return Status::Error;
        };
        let result = self
            .runtime
            .block_on(async { handle.lock().await.channel_open_session().await });
        match result {
            Ok(inner) => {
                channel.channel = Some(inner);
                Status::Ok
            }
            Err(e) => {
                record(&channel.error, e.to_string());
                Status::Error
            }
        }
    }

    fn channel_request_exec(&self, channel: &mut RusshChannel, command: &[u8]) -> Status {
        let Some(inner) = channel.channel.as_ref() else {
            record(&channel.error, "channel is not open");
            return Status::Error;
        };
        if let Err(e) = self.runtime.block_on(inner.exec(true, command.to_vec())) {
            record(&channel.error, e.to_string());
            return Status::Error;
        }
        self.await_reply(channel, "exec")
    }

    fn channel_request_pty(&self, channel: &mut RusshChannel) -> Status {
        let Some(inner) = channel.channel.as_ref() else {
            record(&channel.error, "channel is not open");
            return Status::Error;
        };
        if let Err(e) = self
            .runtime
            .block_on(inner.request_pty(true, "xterm", 80, 24, 0, 0, &[]))
        {
            record(&channel.error, e.to_string());
            return Status::Error;
        }
        self.await_reply(channel, "pty")
    }

    fn channel_request_shell(&self, channel: &mut RusshChannel) -> Status {
        let Some(inner) = channel.channel.as_ref() else {
            record(&channel.error, "channel is not open");
            return Status::Error;
        };
        if let Err(e) = self.runtime.block_on(inner.request_shell(true)) {
            record(&channel.error, e.to_string());
            return Status::Error;
        }
        self.await_reply(channel, "shell")
    }

    fn channel_read(&self, channel: &mut RusshChannel, max_len: usize, stderr: bool) -> Vec<u8> {
        channel.read_with(max_len, stderr, |c| Some(self.next_message(c)))
    }

    fn channel_read_nonblocking(
        &self,
        channel: &mut RusshChannel,
        max_len: usize,
        stderr: bool,
    ) -> Vec<u8> {
        channel.read_with(max_len, stderr, |c| self.poll_message(c))
    }

    fn channel_write(&self, channel: &mut RusshChannel, data: &[u8]) -> i32 {
        let Some(inner) = channel.channel.as_ref() else {
            record(&channel.error, "channel is not open");
            return -1;
        };
        match self.runtime.block_on(inner.data(data)) {
            Ok(()) => i32::try_from(data.len()).unwrap_or(i32::MAX),
            Err(e) => {
                record(&channel.error, e.to_string());
                -1
            }
        }
    }

    fn channel_send_eof(&self, channel: &mut RusshChannel) {
        if let Some(inner) = channel.channel.as_ref() {
            if let Err(e) = self.runtime.block_on(inner.eof()) {
                record(&channel.error, e.to_string());
            }
        }
    }

    fn channel_is_eof(&self, channel: &RusshChannel) -> bool {
        // Only stdout is consumed by readers; unread stderr must not hold off EOF.
        channel.eof && channel.stdout.is_empty()
    }

    fn channel_is_open(&self, channel: &RusshChannel) -> bool {
        channel.channel.is_some() && !channel.closed
    }

    fn channel_exit_status(&self, channel: &mut RusshChannel) -> i32 {
        channel.exit_status_with(|c| self.next_message(c))
    }

    fn channel_close(&self, channel: &mut RusshChannel) {
        if let Some(inner) = channel.channel.as_ref() {
            if let Err(e) = self.runtime.block_on(inner.close()) {
                record(&channel.error, e.to_string());
            }
        }
        channel.closed = true;
    }

    fn channel_free(&self, mut channel: RusshChannel) {
        if self.channel_is_open(&channel) {
            self.channel_close(&mut channel);
        }
    }
}
