//! C FFI interface.
//!
//! All functions exported here are callable through the generated
//! `include/beast_core.h` header.
//! Naming convention: beast_<module>_<action>

use crate::ssh::{PollPolicy, Session, Shell, SshConfig};
use std::ffi::{CStr, CString};
use std::os::raw::c_char;

/// Read a borrowed C string. Returns `None` for null or non-UTF-8 input.
unsafe fn c_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok()
}

/// Hand a JSON value to the caller. Free with `beast_string_free`.
fn json_string(value: serde_json::Value) -> *mut c_char {
    match CString::new(value.to_string()) {
        Ok(cs) => cs.into_raw(),
        Err(_) => std::ptr::null_mut(),
    }
}

fn json_error(error: impl std::fmt::Display) -> *mut c_char {
    json_string(serde_json::json!({ "error": error.to_string() }))
}

fn parse_config(config_json: *const c_char) -> Option<SshConfig> {
    let json = unsafe { c_str(config_json) }?;
    match SshConfig::from_json(json) {
        Ok(config) => Some(config),
        Err(e) => {
            log::error!("Invalid SSH config: {}", e);
            None
        }
    }
}

/// Read the optional "poll_policy" object of a shell config.
/// A malformed policy is logged and replaced by the defaults.
fn parse_poll_policy(json: &str) -> PollPolicy {
    let policy = serde_json::from_str::<serde_json::Value>(json)
        .ok()
        .and_then(|value| value.get("poll_policy").cloned());
    match policy {
        Some(policy) => serde_json::from_value(policy).unwrap_or_else(|e| {
            log::warn!("Invalid poll_policy, using defaults: {}", e);
            PollPolicy::default()
        }),
        None => PollPolicy::default(),
    }
}

// ═══════════════════════════════════════════════════════════
// SSH Session FFI
// ═══════════════════════════════════════════════════════════

/// Opaque pointer to a Session.
pub type BeastSessionHandle = *mut Session;

/// Create an SSH session from a JSON config.
/// The session connects on its first command.
/// Returns null on failure.
#[no_mangle]
pub extern "C" fn beast_ssh_session_create(config_json: *const c_char) -> BeastSessionHandle {
    let Some(config) = parse_config(config_json) else {
        return std::ptr::null_mut();
    };
    match Session::new(config) {
        Ok(session) => Box::into_raw(Box::new(session)),
        Err(e) => {
            log::error!("Failed to create SSH session: {}", e);
            std::ptr::null_mut()
        }
    }
}

/// Disconnect an SSH session and free the handle.
#[no_mangle]
pub extern "C" fn beast_ssh_session_destroy(handle: BeastSessionHandle) {
    if !handle.is_null() {
        unsafe {
            drop(Box::from_raw(handle));
        }
    }
}

/// Check if SSH session is connected.
/// Returns 1 if connected, 0 if not, -1 on invalid handle.
#[no_mangle]
pub extern "C" fn beast_ssh_is_connected(handle: BeastSessionHandle) -> i32 {
    if handle.is_null() {
        return -1;
    }
    let session = unsafe { &*handle };
    if session.is_connected() { 1 } else { 0 }
}

/// Execute a command on the remote server and wait for it to finish.
/// Returns JSON: {"return_code": N, "output": "..."} or {"error": "..."}
/// Caller must free with beast_string_free.
#[no_mangle]
pub extern "C" fn beast_ssh_execute(
    handle: BeastSessionHandle,
    command: *const c_char,
) -> *mut c_char {
    if handle.is_null() || command.is_null() {
        return std::ptr::null_mut();
    }

    let session = unsafe { &mut *handle };
    let Some(cmd_str) = (unsafe { c_str(command) }) else {
        return json_error("command is not valid UTF-8");
    };

    match session.execute_eager(cmd_str) {
        Ok(result) => json_string(serde_json::json!({
            "return_code": result.return_code(),
            "output": result.as_str(),
        })),
        Err(e) => {
            log::error!("SSH execute failed: {}", e);
            json_error(e)
        }
    }
}

// ═══════════════════════════════════════════════════════════
// SSH Shell FFI
// ═══════════════════════════════════════════════════════════

/// Opaque pointer to a Shell.
pub type BeastShellHandle = *mut Shell;

/// Create an interactive shell from a JSON config.
/// An optional "poll_policy" object overrides the polling defaults.
/// Returns null on failure.
#[no_mangle]
pub extern "C" fn beast_ssh_shell_create(config_json: *const c_char) -> BeastShellHandle {
    let Some(config) = parse_config(config_json) else {
        return std::ptr::null_mut();
    };
    let policy = unsafe { c_str(config_json) }
        .map(parse_poll_policy)
        .unwrap_or_default();

    match Shell::new(config) {
        Ok(shell) => Box::into_raw(Box::new(shell.with_policy(policy))),
        Err(e) => {
            log::error!("Failed to create SSH shell: {}", e);
            std::ptr::null_mut()
        }
    }
}

/// Run a command in the shell.
/// Returns JSON: {"output": "..."} or {"error": "...", "output": "..."}
/// where the latter carries partial output on timeout.
/// Caller must free with beast_string_free.
#[no_mangle]
pub extern "C" fn beast_ssh_shell_execute(
    handle: BeastShellHandle,
    command: *const c_char,
) -> *mut c_char {
    if handle.is_null() || command.is_null() {
        return std::ptr::null_mut();
    }

    let shell = unsafe { &mut *handle };
    let Some(cmd_str) = (unsafe { c_str(command) }) else {
        return json_error("command is not valid UTF-8");
    };

    match shell.execute(cmd_str) {
        Ok(output) => json_string(serde_json::json!({ "output": output })),
        Err(crate::ssh::Error::Timeout { hostname, elapsed, output }) => {
            log::warn!("Shell command on {} timed out after {:?}", hostname, elapsed);
            json_string(serde_json::json!({
                "error": format!("command timed out after {:?}", elapsed),
                "output": output,
            }))
        }
        Err(e) => {
            log::error!("Shell execute failed: {}", e);
            json_error(e)
        }
    }
}

/// Close the shell, disconnect its session and free the handle.
#[no_mangle]
pub extern "C" fn beast_ssh_shell_destroy(handle: BeastShellHandle) {
    if !handle.is_null() {
        unsafe {
            drop(Box::from_raw(handle));
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Utility FFI
// ═══════════════════════════════════════════════════════════

/// Free a string allocated by Rust.
#[no_mangle]
pub extern "C" fn beast_string_free(s: *mut c_char) {
    if !s.is_null() {
        unsafe {
            drop(CString::from_raw(s));
        }
    }
}

/// Initialize the Rust logger.
#[no_mangle]
pub extern "C" fn beast_init() {
    crate::init_logging();
    log::info!("Beast Core initialized");
}
