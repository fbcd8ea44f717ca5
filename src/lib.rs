//! Beast Core: SSH engine for ControlBeast
//!
//! Provides lazily connected SSH sessions, streaming and cached command
//! results, and interactive PTY shells, plus a C FFI interface.

pub mod ffi;
pub mod ssh;

pub use ssh::{connect, Error, Result, Session, Shell, SshConfig};

/// Install the `env_logger` backend, defaulting to the `info` level.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_logging() {
    let env = env_logger::Env::default().default_filter_or("info");
    let _ = env_logger::Builder::from_env(env).try_init();
}
