//! Kernel TCP socket handles (component C3): connected sockets, listening
//! sockets, and the free-standing readiness query.

pub mod listener;
pub mod poll_fn;
pub mod socket;

pub use listener::{Accepted, Creation, ListeningSocketHandle};
pub use poll_fn::{poll, PollEntry, PollResult, PollWhat};
pub use socket::{ByteSocketHandle, ShutdownKind, SocketRef};
