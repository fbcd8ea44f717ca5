//! Interactive remote shell over a PTY channel.
//!
//! Unlike command results, a shell keeps one channel open across many
//! commands. Since an interactive shell gives no end-of-command marker,
//! `execute` treats a run of empty polls as "the command finished".

use super::error::{Error, Result};
use super::handle::ChannelHandle;
use super::native::RusshTransport;
use super::session::Session;
use super::transport::{Status, Transport};
use super::SshConfig;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Read size of the uncapped `read(0)` loop.
const DRAIN_CHUNK: usize = 80;

/// How `Shell::execute` decides that a command has finished.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollPolicy {
    /// Initial sleep between polls.
    pub interval_ms: u64,
    /// Factor applied to the sleep after each empty poll.
    pub backoff: f64,
    pub max_interval_ms: u64,
    /// Consecutive empty polls that end the command.
    pub quiet_polls: u32,
    /// Upper bound for one `execute` call, flush included.
    pub deadline_ms: Option<u64>,
    pub chunk_size: usize,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval_ms: 250,
            backoff: 2.0,
            max_interval_ms: 2000,
            quiet_polls: 2,
            deadline_ms: Some(60_000),
            chunk_size: 1024,
        }
    }
}

impl PollPolicy {
    /// Fixed half-second polling that stops at the first empty read.
    pub fn legacy() -> Self {
        Self {
            interval_ms: 500,
            backoff: 1.0,
            max_interval_ms: 500,
            quiet_polls: 1,
            ..Default::default()
        }
    }

    fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    fn next_interval(&self, current: Duration) -> Duration {
        let cap = Duration::from_millis(self.max_interval_ms.max(self.interval_ms));
        let grown = current.as_secs_f64() * self.backoff.max(1.0);
        // Huge or non-finite products saturate at the cap.
        Duration::try_from_secs_f64(grown).unwrap_or(cap).min(cap)
    }

    fn deadline(&self) -> Option<Duration> {
        self.deadline_ms.map(Duration::from_millis)
    }
}

/// Long-lived interactive shell on a remote host.
pub struct Shell<T: Transport = RusshTransport> {
    // Declared before `session` so the channel is freed first.
    channel: Option<ChannelHandle<T>>,
    session: Session<T>,
    policy: PollPolicy,
}

impl Shell<RusshTransport> {
    pub fn new(config: SshConfig) -> Result<Self> {
        Ok(Self::from_session(Session::new(config)?))
    }
}

impl<T: Transport> Shell<T> {
    pub fn with_transport(config: SshConfig, transport: Arc<T>) -> Result<Self> {
        Ok(Self::from_session(Session::with_transport(config, transport)?))
    }

    fn from_session(session: Session<T>) -> Self {
        Self {
            channel: None,
            session,
            policy: PollPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &PollPolicy {
        &self.policy
    }

    pub fn session(&self) -> &Session<T> {
        &self.session
    }

    /// Write raw data to the shell's stdin.
    pub fn write(&mut self, data: impl AsRef<[u8]>) -> Result<()> {
        let data = data.as_ref();
        let channel = self.channel()?;
        let transport = Arc::clone(channel.transport());
        let written = transport.channel_write(channel.raw_mut(), data);
        if written < 0 || written as usize != data.len() {
            log::warn!(
                "Short write to shell on {}: {} of {} bytes",
                self.session.hostname(),
                written,
                data.len()
            );
            return Err(Error::Write {
                hostname: self.session.hostname().to_string(),
                written,
                expected: data.len(),
            });
        }
        Ok(())
    }

    /// Read decoded output. See [`Shell::read_bytes`].
    pub fn read(&mut self, max_bytes: usize) -> Result<String> {
        let bytes = self.read_bytes(max_bytes)?;
        Ok(self.session.charset().decode(&bytes))
    }

    /// Read raw output without blocking.
    ///
    /// With `max_bytes > 0` a single read of at most that many bytes is
    /// done. With `0` the shell is read until the remote side reports EOF.
    pub fn read_bytes(&mut self, max_bytes: usize) -> Result<Vec<u8>> {
        if !self.channel()?.is_open() {
            return Err(Error::ShellClosed {
                hostname: self.session.hostname().to_string(),
            });
        }
        let channel = self.channel()?;
        let transport = Arc::clone(channel.transport());
        let raw = channel.raw_mut();

        if max_bytes > 0 {
            return Ok(transport.channel_read_nonblocking(raw, max_bytes, false));
        }
        let mut output = Vec::new();
        while !transport.channel_is_eof(raw) {
            output.extend(transport.channel_read_nonblocking(raw, DRAIN_CHUNK, false));
        }
        Ok(output)
    }

    /// Run a command and collect its output.
    ///
    /// Pending output is discarded first. Output is then polled under the
    /// shell's [`PollPolicy`] until the shell goes quiet or exits.
    pub fn execute(&mut self, command: &str) -> Result<String> {
        let started = Instant::now();
        let chunk_size = self.policy.chunk_size.max(1);

        let mut flushed = 0;
        loop {
            let pending = self.read_bytes(chunk_size)?;
            if pending.is_empty() {
                break;
            }
            flushed += pending.len();
            self.check_deadline(started, &[])?;
        }
        if flushed > 0 {
            log::debug!("Discarded {} pending bytes on {}", flushed, self.session.hostname());
        }

        let mut line = self.session.charset().encode(command);
        line.push(b'\n');
        self.write(&line)?;

        let mut output = Vec::new();
        let mut interval = self.policy.interval();
        let mut quiet = 0;
        loop {
            std::thread::sleep(interval);
            let chunk = self.read_bytes(chunk_size)?;
            if chunk.is_empty() {
                if self.at_eof() {
                    break;
                }
                quiet += 1;
                if quiet >= self.policy.quiet_polls {
                    break;
                }
                interval = self.policy.next_interval(interval);
            } else {
                output.extend(chunk);
                quiet = 0;
                interval = self.policy.interval();
            }
            self.check_deadline(started, &output)?;
        }

        Ok(self.session.charset().decode(&output))
    }

    /// Close and free the shell channel. Safe to call repeatedly.
    pub fn close(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
    }

    /// Close the shell and terminate the underlying session.
    pub fn terminate(&mut self) {
        self.close();
        self.session.terminate();
    }

    fn channel(&mut self) -> Result<&mut ChannelHandle<T>> {
        if self.channel.is_none() {
            self.channel_init()?;
        }
        match self.channel.as_mut() {
            Some(channel) => Ok(channel),
            None => Err(Error::ShellClosed {
                hostname: self.session.hostname().to_string(),
            }),
        }
    }

    fn at_eof(&self) -> bool {
        self.channel
            .as_ref()
            .map_or(true, |c| c.transport().channel_is_eof(c.raw()))
    }

    fn check_deadline(&self, started: Instant, output: &[u8]) -> Result<()> {
        let Some(deadline) = self.policy.deadline() else {
            return Ok(());
        };
        let elapsed = started.elapsed();
        if elapsed < deadline {
            return Ok(());
        }
        log::warn!("Shell on {} did not settle within {:?}", self.session.hostname(), deadline);
        Err(Error::Timeout {
            hostname: self.session.hostname().to_string(),
            elapsed,
            output: self.session.charset().decode(output),
        })
    }

    /// Open a PTY-backed shell channel, replacing any previous one.
    fn channel_init(&mut self) -> Result<()> {
        self.session.connect()?;
        self.close();

        let hostname = self.session.hostname();
        let port = self.session.port();
        let Some(session) = self.session.handle() else {
            return Err(Error::Communication {
                hostname: hostname.to_string(),
                return_code: -1,
            });
        };

        let steps: [(&str, fn(&T, &mut T::Channel) -> Status); 3] = [
            ("open session", T::channel_open_session),
            ("request pty", T::channel_request_pty),
            ("request shell", T::channel_request_shell),
        ];

        // On failure the half-initialised channel is freed when dropped.
        let mut channel = session.channel();
        let transport = session.transport();
        for (step, request) in steps {
            let status = request(transport.as_ref(), channel.raw_mut());
            log::debug!("Shell channel on {}: {} -> {:?}", hostname, step, status);
            if !status.is_ok() {
                return Err(Error::Connection {
                    hostname: hostname.to_string(),
                    port,
                    return_code: status.code(),
                    message: session.last_error(),
                });
            }
        }

        self.channel = Some(channel);
        Ok(())
    }
}

impl<T: Transport> Drop for Shell<T> {
    fn drop(&mut self) {
        self.terminate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::testing::MockTransport;

    fn fast() -> PollPolicy {
        PollPolicy {
            interval_ms: 1,
            backoff: 2.0,
            max_interval_ms: 4,
            quiet_polls: 2,
            deadline_ms: Some(5_000),
            chunk_size: 1024,
        }
    }

    fn shell(transport: &Arc<MockTransport>) -> Shell<MockTransport> {
        let config = SshConfig::new("web01", 22, "deploy");
        Shell::with_transport(config, Arc::clone(transport))
            .unwrap()
            .with_policy(fast())
    }

    #[test]
    fn test_policy_defaults() {
        let policy = PollPolicy::default();
        assert_eq!(policy.interval_ms, 250);
        assert_eq!(policy.quiet_polls, 2);
        assert_eq!(policy.deadline_ms, Some(60_000));

        let legacy = PollPolicy::legacy();
        assert_eq!(legacy.interval_ms, 500);
        assert_eq!(legacy.quiet_polls, 1);
        assert_eq!(legacy.next_interval(legacy.interval()), Duration::from_millis(500));
    }

    #[test]
    fn test_policy_backoff_is_capped() {
        let policy = PollPolicy::default();
        let mut interval = policy.interval();
        for _ in 0..10 {
            interval = policy.next_interval(interval);
        }
        assert_eq!(interval, Duration::from_millis(2000));
    }

    #[test]
    fn test_policy_extreme_backoff_saturates() {
        let policy: PollPolicy = serde_json::from_str(r#"{"backoff": 1e20}"#).unwrap();
        assert_eq!(
            policy.next_interval(policy.interval()),
            Duration::from_millis(2000)
        );

        let policy = PollPolicy {
            backoff: f64::INFINITY,
            ..Default::default()
        };
        assert_eq!(
            policy.next_interval(Duration::from_secs(1)),
            Duration::from_millis(2000)
        );
    }

    #[test]
    fn test_policy_from_json() {
        let policy: PollPolicy =
            serde_json::from_str(r#"{"interval_ms": 100, "deadline_ms": null}"#).unwrap();
        assert_eq!(policy.interval_ms, 100);
        assert_eq!(policy.deadline_ms, None);
        assert_eq!(policy.chunk_size, 1024);
    }

    #[test]
    fn test_shell_is_lazy() {
        let transport = Arc::new(MockTransport::new());
        let shell = shell(&transport);
        assert!(!shell.session().is_connected());
        assert_eq!(transport.stats().channels_created, 0);
    }

    #[test]
    fn test_execute_echo() {
        let transport = Arc::new(MockTransport::new());
        transport.command("echo foo", "foo\r\n", 0);
        let mut shell = shell(&transport);

        let output = shell.execute("echo foo").unwrap();
        assert!(output.contains("foo"));
        assert!(shell.session().is_connected());
        assert_eq!(transport.stats().writes, vec![b"echo foo\n".to_vec()]);
    }

    #[test]
    fn test_execute_discards_banner() {
        let transport = Arc::new(MockTransport::new());
        transport.command("id -un", "deploy\r\n", 0);
        transport.script(|s| s.banner = b"Welcome to web01\r\n$ ".to_vec());
        let mut shell = shell(&transport);

        let output = shell.execute("id -un").unwrap();
        assert!(output.contains("deploy"));
        assert!(!output.contains("Welcome"));
    }

    #[test]
    fn test_channel_reused_across_commands() {
        let transport = Arc::new(MockTransport::new());
        let mut shell = shell(&transport);
        shell.execute("true").unwrap();
        shell.execute("true").unwrap();
        assert_eq!(transport.stats().channels_created, 1);
    }

    #[test]
    fn test_short_write() {
        let transport = Arc::new(MockTransport::new());
        transport.script(|s| s.written = Some(3));
        let mut shell = shell(&transport);

        match shell.write("hello").err().unwrap() {
            Error::Write {
                hostname,
                written,
                expected,
            } => {
                assert_eq!(hostname, "web01");
                assert_eq!(written, 3);
                assert_eq!(expected, 5);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_read_closed_shell() {
        let transport = Arc::new(MockTransport::new());
        let mut shell = shell(&transport);
        shell.write("ls\n").unwrap();
        shell.channel.as_mut().unwrap().close();
        assert!(matches!(shell.read(16), Err(Error::ShellClosed { .. })));
    }

    #[test]
    fn test_read_capped() {
        let transport = Arc::new(MockTransport::new());
        transport.script(|s| s.banner = b"hello world".to_vec());
        let mut shell = shell(&transport);
        assert_eq!(shell.read(5).unwrap(), "hello");
        assert_eq!(shell.read(64).unwrap(), " world");
        assert_eq!(shell.read(64).unwrap(), "");
    }

    #[test]
    fn test_channel_init_replaces_prior_channel() {
        let transport = Arc::new(MockTransport::new());
        let mut shell = shell(&transport);
        shell.write("ls\n").unwrap();
        shell.channel_init().unwrap();
        assert!(shell.channel.as_ref().unwrap().is_open());

        let stats = transport.stats();
        assert_eq!(stats.channels_created, 2);
        assert_eq!(stats.closes, 1);
        assert_eq!(stats.channels_freed, 1);
        assert_eq!(stats.connects, 1);
    }

    #[test]
    fn test_read_until_eof() {
        let transport = Arc::new(MockTransport::new());
        let mut shell = shell(&transport);
        shell.write("exit\n").unwrap();
        assert_eq!(shell.read(0).unwrap(), "exit\n");
    }

    #[test]
    fn test_execute_timeout() {
        let transport = Arc::new(MockTransport::new());
        let mut shell = shell(&transport).with_policy(PollPolicy {
            deadline_ms: Some(30),
            ..fast()
        });
        // Start producing output only once the command is running.
        shell.write("").unwrap();
        transport.script(|s| s.endless = true);

        match shell.execute("tail -f log").err().unwrap() {
            Error::Timeout { elapsed, .. } => assert!(elapsed >= Duration::from_millis(30)),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_pty_failure_frees_channel() {
        let transport = Arc::new(MockTransport::new());
        transport.script(|s| {
            s.pty = Status::Error;
            s.error = "pty denied".to_string();
        });
        let mut shell = shell(&transport);

        let err = shell.execute("ls").err().unwrap();
        assert!(matches!(err, Error::Connection { ref message, .. } if message == "pty denied"));
        assert!(shell.channel.is_none());
        let stats = transport.stats();
        assert_eq!(stats.channels_created, 1);
        assert_eq!(stats.channels_freed, 1);
    }

    #[test]
    fn test_open_failure_skips_shell_request() {
        let transport = Arc::new(MockTransport::new());
        transport.script(|s| s.open_session = Status::Error);
        let mut shell = shell(&transport);
        assert!(matches!(shell.write("ls\n"), Err(Error::Connection { .. })));
        assert_eq!(transport.stats().channels_freed, 1);
    }

    #[test]
    fn test_terminate_releases_everything() {
        let transport = Arc::new(MockTransport::new());
        let mut shell = shell(&transport);
        shell.execute("true").unwrap();
        shell.terminate();
        shell.terminate();
        assert!(!shell.session().has_session());

        let stats = transport.stats();
        assert_eq!(stats.closes, 1);
        assert_eq!(stats.channels_freed, 1);
        assert_eq!(stats.sessions_freed, 1);
    }

    #[test]
    fn test_drop_frees_channel_before_session() {
        let transport = Arc::new(MockTransport::new());
        let mut shell = shell(&transport);
        shell.execute("true").unwrap();
        drop(shell);

        let events = transport.stats().events;
        let channel = events.iter().position(|e| *e == "channel_free").unwrap();
        let session = events.iter().position(|e| *e == "session_free").unwrap();
        assert!(channel < session);
    }
}
