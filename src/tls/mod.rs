//! TLS byte-I/O handles layered atop [`crate::net`] (component C4).
//!
//! Ciphertext flows through `rustls` via two small `std::io` adapters over
//! the underlying socket; plaintext flows through the same
//! [`crate::io_handle::ByteIoHandle`] contract as every other handle in this
//! crate.

mod ring;
mod socket;

pub use socket::{ListeningTlsSocketHandle, TlsAlgorithm, TlsSocketHandle};
