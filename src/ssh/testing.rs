//! Scripted in-memory transport used by the unit tests.

use super::transport::{AuthStatus, SessionOption, Status, Transport};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Canned behavior of the fake remote host.
pub struct Script {
    pub connect: Status,
    pub pubkey: AuthStatus,
    pub password: AuthStatus,
    pub open_session: Status,
    pub exec: Status,
    pub pty: Status,
    pub shell: Status,
    pub error: String,
    /// Command -> (stdout, exit status) for exec channels and the shell.
    pub commands: HashMap<Vec<u8>, (Vec<u8>, i32)>,
    /// Output waiting on a freshly spawned shell.
    pub banner: Vec<u8>,
    /// Shell keeps producing output forever.
    pub endless: bool,
    /// Overrides the byte count reported by `channel_write`.
    pub written: Option<i32>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            connect: Status::Ok,
            pubkey: AuthStatus::Success,
            password: AuthStatus::Denied,
            open_session: Status::Ok,
            exec: Status::Ok,
            pty: Status::Ok,
            shell: Status::Ok,
            error: "mock failure".to_string(),
            commands: HashMap::new(),
            banner: Vec::new(),
            endless: false,
            written: None,
        }
    }
}

/// Counters and the ordered event log of everything the transport did.
#[derive(Clone, Debug, Default)]
pub struct Stats {
    pub sessions_created: usize,
    pub sessions_freed: usize,
    pub connects: usize,
    pub disconnects: usize,
    pub pubkey_attempts: usize,
    pub password_attempts: usize,
    pub channels_created: usize,
    pub channels_freed: usize,
    pub eofs_sent: usize,
    pub closes: usize,
    pub options: Vec<String>,
    pub writes: Vec<Vec<u8>>,
    pub events: Vec<&'static str>,
}

pub struct MockSession {
    connected: bool,
}

pub struct MockChannel {
    open: bool,
    shell: bool,
    eof: bool,
    output: VecDeque<u8>,
    exit_status: i32,
}

impl MockChannel {
    fn take(&mut self, max_len: usize) -> Vec<u8> {
        let n = max_len.min(self.output.len());
        self.output.drain(..n).collect()
    }
}

pub struct MockTransport {
    script: Mutex<Script>,
    stats: Mutex<Stats>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(Script::default()),
            stats: Mutex::new(Stats::default()),
        }
    }

    /// Adjust the script in place.
    pub fn script(&self, f: impl FnOnce(&mut Script)) {
        f(&mut self.script.lock().unwrap());
    }

    /// Register a command and what it prints.
    pub fn command(&self, command: &str, output: &str, exit_status: i32) {
        self.script(|s| {
            s.commands
                .insert(command.as_bytes().to_vec(), (output.as_bytes().to_vec(), exit_status));
        });
    }

    pub fn stats(&self) -> Stats {
        self.stats.lock().unwrap().clone()
    }

    fn record(&self, f: impl FnOnce(&mut Stats)) {
        f(&mut self.stats.lock().unwrap());
    }

    fn lookup(&self, command: &[u8]) -> (Vec<u8>, i32) {
        let script = self.script.lock().unwrap();
        script
            .commands
            .get(command)
            .cloned()
            .unwrap_or_else(|| (Vec::new(), 127))
    }
}

impl Transport for MockTransport {
    type Session = MockSession;
    type Channel = MockChannel;

    fn session_new(&self) -> MockSession {
        self.record(|s| {
            s.sessions_created += 1;
            s.events.push("session_new");
        });
        MockSession { connected: false }
    }

    fn session_free(&self, _session: MockSession) {
        self.record(|s| {
            s.sessions_freed += 1;
            s.events.push("session_free");
        });
    }

    fn set_option(&self, _session: &mut MockSession, option: SessionOption<'_>) {
        self.record(|s| s.options.push(format!("{:?}", option)));
    }

    fn connect(&self, session: &mut MockSession) -> Status {
        let status = self.script.lock().unwrap().connect;
        self.record(|s| {
            s.connects += 1;
            s.events.push("connect");
        });
        session.connected = status.is_ok();
        status
    }

    fn disconnect(&self, session: &mut MockSession) {
        session.connected = false;
        self.record(|s| {
            s.disconnects += 1;
            s.events.push("disconnect");
        });
    }

    fn auth_pubkey(&self, _session: &mut MockSession, _passphrase: Option<&str>) -> AuthStatus {
        self.record(|s| {
            s.pubkey_attempts += 1;
            s.events.push("auth_pubkey");
        });
        self.script.lock().unwrap().pubkey
    }

    fn auth_password(&self, _session: &mut MockSession, _password: Option<&str>) -> AuthStatus {
        self.record(|s| {
            s.password_attempts += 1;
            s.events.push("auth_password");
        });
        self.script.lock().unwrap().password
    }

    fn last_error(&self, _session: &MockSession) -> String {
        self.script.lock().unwrap().error.clone()
    }

    fn channel_new(&self, _session: &MockSession) -> MockChannel {
        self.record(|s| {
            s.channels_created += 1;
            s.events.push("channel_new");
        });
        MockChannel {
            open: false,
            shell: false,
            eof: false,
            output: VecDeque::new(),
            exit_status: -1,
        }
    }

    fn channel_open_session(&self, channel: &mut MockChannel) -> Status {
        let status = self.script.lock().unwrap().open_session;
        channel.open = status.is_ok();
        status
    }

    fn channel_request_exec(&self, channel: &mut MockChannel, command: &[u8]) -> Status {
        let status = self.script.lock().unwrap().exec;
        if status.is_ok() {
            let (output, exit_status) = self.lookup(command);
            channel.output.extend(output);
            channel.exit_status = exit_status;
        }
        status
    }

    fn channel_request_pty(&self, _channel: &mut MockChannel) -> Status {
        self.script.lock().unwrap().pty
    }

    fn channel_request_shell(&self, channel: &mut MockChannel) -> Status {
        let script = self.script.lock().unwrap();
        if script.shell.is_ok() {
            channel.shell = true;
            channel.output.extend(script.banner.iter().copied());
        }
        script.shell
    }

    fn channel_read(&self, channel: &mut MockChannel, max_len: usize, _stderr: bool) -> Vec<u8> {
        let chunk = channel.take(max_len);
        if chunk.is_empty() && !channel.shell {
            channel.eof = true;
        }
        chunk
    }

    fn channel_read_nonblocking(
        &self,
        channel: &mut MockChannel,
        max_len: usize,
        _stderr: bool,
    ) -> Vec<u8> {
        if channel.shell && self.script.lock().unwrap().endless {
            channel.output.extend(b"tick\r\n".iter().copied());
        }
        channel.take(max_len)
    }

    fn channel_write(&self, channel: &mut MockChannel, data: &[u8]) -> i32 {
        self.record(|s| s.writes.push(data.to_vec()));
        let forced = self.script.lock().unwrap().written;
        if let Some(written) = forced {
            return written;
        }
        if channel.shell {
            // Echo like a terminal, then run complete lines.
            channel.output.extend(data.iter().copied());
            let line = data.strip_suffix(b"\n").unwrap_or(data);
            if line == b"exit" {
                channel.eof = true;
            } else {
                let (output, _) = self.lookup(line);
                channel.output.extend(output);
            }
        }
        data.len() as i32
    }

    fn channel_send_eof(&self, _channel: &mut MockChannel) {
        self.record(|s| s.eofs_sent += 1);
    }

    fn channel_is_eof(&self, channel: &MockChannel) -> bool {
        channel.eof && channel.output.is_empty()
    }

    fn channel_is_open(&self, channel: &MockChannel) -> bool {
        channel.open
    }

    fn channel_exit_status(&self, channel: &mut MockChannel) -> i32 {
        channel.exit_status
    }

    fn channel_close(&self, channel: &mut MockChannel) {
        channel.open = false;
        self.record(|s| s.closes += 1);
    }

    fn channel_free(&self, _channel: MockChannel) {
        self.record(|s| {
            s.channels_freed += 1;
            s.events.push("channel_free");
        });
    }
}
