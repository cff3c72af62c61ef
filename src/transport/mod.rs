//! Transport Layer
//!
//! Thin async wrapper over a TCP stream. The rest of the crate only sees
//! [`SocketReader`] and [`SocketWriter`], so any in-memory stream can stand
//! in for a socket.

pub mod socket;

pub use socket::{connect, split, SocketReader, SocketWriter};
