//! Owning wrappers around native transport handles.
//!
//! Each wrapper holds exactly one handle and releases it when dropped.
//! Neither is `Clone`, so ownership can only move.

use super::transport::{Status, Transport};
use std::sync::Arc;

/// A native session handle plus its connection flag.
pub struct SessionHandle<T: Transport> {
    transport: Arc<T>,
    raw: Option<T::Session>,
    connected: bool,
}

impl<T: Transport> SessionHandle<T> {
    /// Allocate a fresh, unconnected session.
    pub fn new(transport: Arc<T>) -> Self {
        let raw = transport.session_new();
        Self {
            transport,
            raw: Some(raw),
            connected: false,
        }
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn connected(&self) -> bool {
        self.connected
    }

    pub fn raw(&self) -> &T::Session {
        // `raw` is only taken in `drop`.
        self.raw.as_ref().expect("session handle used after free")
    }

    pub fn raw_mut(&mut self) -> &mut T::Session {
        self.raw.as_mut().expect("session handle used after free")
    }

    pub fn connect(&mut self) -> Status {
        let transport = Arc::clone(&self.transport);
        let status = transport.connect(self.raw_mut());
        self.connected = status.is_ok();
        status
    }

    pub fn disconnect(&mut self) {
        if self.connected {
            let transport = Arc::clone(&self.transport);
            transport.disconnect(self.raw_mut());
            self.connected = false;
        }
    }

    pub fn last_error(&self) -> String {
        self.transport.last_error(self.raw())
    }

    /// Allocate a channel on this session. The channel is not opened yet.
    pub fn channel(&self) -> ChannelHandle<T> {
        ChannelHandle {
            transport: Arc::clone(&self.transport),
            raw: Some(self.transport.channel_new(self.raw())),
        }
    }
}

impl<T: Transport> Drop for SessionHandle<T> {
    fn drop(&mut self) {
        self.disconnect();
        if let Some(raw) = self.raw.take() {
            self.transport.session_free(raw);
        }
    }
}

/// A native channel handle, freed on drop.
pub struct ChannelHandle<T: Transport> {
    transport: Arc<T>,
    raw: Option<T::Channel>,
}

impl<T: Transport> ChannelHandle<T> {
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn raw(&self) -> &T::Channel {
        self.raw.as_ref().expect("channel handle used after free")
    }

    pub fn raw_mut(&mut self) -> &mut T::Channel {
        self.raw.as_mut().expect("channel handle used after free")
    }

    pub fn is_open(&self) -> bool {
        self.transport.channel_is_open(self.raw())
    }

    /// Close the channel if it is still open. Safe to call repeatedly.
    pub fn close(&mut self) {
        if self.is_open() {
            let transport = Arc::clone(&self.transport);
            transport.channel_send_eof(self.raw_mut());
            transport.channel_close(self.raw_mut());
        }
    }
}

impl<T: Transport> Drop for ChannelHandle<T> {
    fn drop(&mut self) {
        if let Some(raw) = self.raw.take() {
            self.transport.channel_free(raw);
        }
    }
}
