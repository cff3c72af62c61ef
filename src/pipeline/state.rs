//! Pipeline State and Statistics

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

/// Lifecycle of one pipeline's connection.
///
/// ```text
/// Initial ──connect──> Connected ──subscribe──> Subscribed
///                          │
///                          ├──quit──> Quitting ──> Disconnected
///                          └──disconnect──────────> Disconnected
///
/// any state ──transport/protocol error──> FatalError
/// ```
///
/// `Disconnected` and `FatalError` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectionState {
    Initial = 0,
    Connected = 1,
    Subscribed = 2,
    Disconnected = 3,
    Quitting = 4,
    FatalError = 5,
}

impl ConnectionState {
    /// Returns true if the pipeline can never be used again.
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Disconnected | ConnectionState::FatalError)
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Initial,
            1 => ConnectionState::Connected,
            2 => ConnectionState::Subscribed,
            3 => ConnectionState::Disconnected,
            4 => ConnectionState::Quitting,
            _ => ConnectionState::FatalError,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Initial => "initial",
            ConnectionState::Connected => "connected",
            ConnectionState::Subscribed => "subscribed",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Quitting => "quitting",
            ConnectionState::FatalError => "fatal-error",
        };
        f.write_str(name)
    }
}

/// Lock-free holder for a [`ConnectionState`].
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new(state: ConnectionState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub(crate) fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Moves to `next` unless the current state is terminal.
    ///
    /// Returns the previous state. Once terminal, the state is frozen.
    pub(crate) fn transition(&self, next: ConnectionState) -> ConnectionState {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            if ConnectionState::from_u8(current).is_terminal() {
                return ConnectionState::from_u8(current);
            }
            match self.0.compare_exchange_weak(
                current,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(previous) => return ConnectionState::from_u8(previous),
                Err(actual) => current = actual,
            }
        }
    }
}

/// Counters for one pipeline.
#[derive(Debug, Default)]
pub struct PipelineStats {
    /// Commands framed and queued for sending
    pub commands_sent: AtomicU64,
    /// Replies decoded from the socket
    pub replies_received: AtomicU64,
    /// Server error replies among them
    pub server_errors: AtomicU64,
    /// Physical flushes
    pub flushes: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
    /// Total bytes read
    pub bytes_read: AtomicU64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn command_sent(&self) {
        self.commands_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reply_received(&self, is_error: bool) {
        self.replies_received.fetch_add(1, Ordering::Relaxed);
        if is_error {
            self.server_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn flushed(&self, bytes: usize) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }
}
