//! `TlsSocketHandle`/`ListeningTlsSocketHandle`: the TLS overlay atop a
//! kernel byte socket.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use bitflags::bitflags;

use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls_pki_types::PrivateKeyDer;

use crate::buf::{Buffer, ConstBuffer};
use crate::deadline::Deadline;
use crate::diag::trace_io;
use crate::error::{invalid_argument, Error, Result};
use crate::handle::Flag;
use crate::io_handle::{check_buffer_count, ByteIoHandle};
use crate::ip::{resolve, Family, ResolveFlag};
use crate::multiplexer::{Multiplexer, RegistrationToken};
use crate::net::listener::{Accepted, ListeningSocketHandle};
use crate::net::socket::{ByteSocketHandle, SocketRef};
use crate::request::{BarrierKind, BarrierWait, IoRequest, IoResult};

use super::ring::CiphertextRing;

bitflags! {
    /// Cipher/protocol policy requested via [`TlsSocketHandle::set_algorithms`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TlsAlgorithm: u32 {
        /// A curated, strong-cipher short list; the default.
        const DEFAULT = 1 << 0;
        /// Restrict to FIPS 140-2 approved algorithms. Fails `not_supported`
        /// on a build without a FIPS-validated crypto provider.
        const FIPS_140_2 = 1 << 1;
    }
}

impl Default for TlsAlgorithm {
    fn default() -> Self {
        TlsAlgorithm::DEFAULT
    }
}

const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;

enum TlsConnection {
    Unconfigured,
    Client(rustls::ClientConnection),
    Server(rustls::ServerConnection),
}

struct TlsInner<'a> {
    socket: SocketRef<'a>,
    conn: TlsConnection,
    ring: CiphertextRing,
    algorithms: TlsAlgorithm,
    cert_path: Option<PathBuf>,
    hostname: Option<String>,
    no_buffer_pooling: bool,
}

/// A plaintext byte-I/O handle whose bytes are carried, encrypted, over an
/// underlying [`ByteSocketHandle`].
///
/// The underlying socket is either owned (composition) or referenced by
/// pointer (pointer-indirection mode, see [`SocketRef`]); either way this
/// handle's own state — the `rustls` connection and the ciphertext ring —
/// is guarded by one mutex, matching the "per-handle mutex, underlying
/// socket touchable while it is released" concurrency contract.
pub struct TlsSocketHandle<'a> {
    inner: Mutex<TlsInner<'a>>,
}

impl<'a> TlsSocketHandle<'a> {
    /// Wraps `underlying` as an unconfigured client-role TLS socket. Call
    /// [`TlsSocketHandle::set_algorithms`]/
    /// [`TlsSocketHandle::set_authentication_certificates_path`]/
    /// [`TlsSocketHandle::set_connect_hostname`] as needed, then
    /// [`TlsSocketHandle::connect`].
    pub fn client(underlying: SocketRef<'a>) -> TlsSocketHandle<'a> {
        TlsSocketHandle {
            inner: Mutex::new(TlsInner {
                socket: underlying,
                conn: TlsConnection::Unconfigured,
                ring: CiphertextRing::new(DEFAULT_CHUNK_SIZE),
                algorithms: TlsAlgorithm::default(),
                cert_path: None,
                hostname: None,
                no_buffer_pooling: false,
            }),
        }
    }

    pub(crate) fn from_accepted_server(underlying: ByteSocketHandle, server_conn: rustls::ServerConnection, no_buffer_pooling: bool) -> TlsSocketHandle<'static> {
        TlsSocketHandle {
            inner: Mutex::new(TlsInner {
                socket: SocketRef::Owned(underlying),
                conn: TlsConnection::Server(server_conn),
                ring: CiphertextRing::new(DEFAULT_CHUNK_SIZE),
                algorithms: TlsAlgorithm::default(),
                cert_path: None,
                hostname: None,
                no_buffer_pooling,
            }),
        }
    }

    /// Sets the cipher/protocol policy. Must be called before `connect`.
    pub fn set_algorithms(&self, algorithms: TlsAlgorithm) -> Result<()> {
        if algorithms.contains(TlsAlgorithm::FIPS_140_2) {
            return Err(Error::NotSupported(
                "this build's crypto provider is not FIPS 140-2 validated".into(),
            ));
        }
        self.inner.lock().unwrap().algorithms = algorithms;
        Ok(())
    }

    /// Installs identity/trust material from a PEM file at `path`. For a
    /// client-role handle this is a trusted CA bundle used to verify the
    /// peer; an empty path disables peer certificate verification
    /// entirely. For a server-role handle (built via
    /// [`ListeningTlsSocketHandle`]) this is the server's own certificate
    /// chain and private key, concatenated in one PEM file.
    pub fn set_authentication_certificates_path(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut inner = self.inner.lock().unwrap();
        inner.cert_path = if path.as_os_str().is_empty() {
            None
        } else {
            Some(path.to_path_buf())
        };
        Ok(())
    }

    /// Stores `host` for SNI and certificate hostname validation. Returns
    /// `port` rendered as a string, per the convenience contract. If this
    /// is never called, no peer hostname validation is performed even when
    /// a certificate path is configured.
    pub fn set_connect_hostname(&self, host: &str, port: u16) -> String {
        self.inner.lock().unwrap().hostname = Some(host.to_string());
        port.to_string()
    }

    /// Configures the inbound ciphertext ring's chunk size. Fails if
    /// buffer pooling was disabled for this handle
    /// ([`Flag::NO_BUFFER_POOLING`]).
    pub fn set_registered_buffer_chunk_size(&self, bytes: usize) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.no_buffer_pooling {
            return Err(Error::NotSupported("this handle was opened with buffer pooling disabled".into()));
        }
        inner.ring.resize(bytes);
        Ok(())
    }

    /// A comma-separated, implementation-defined list of cipher names:
    /// negotiated suite/version once the handshake has completed,
    /// otherwise the configured candidate suites.
    pub fn algorithms_description(&self) -> String {
        let inner = self.inner.lock().unwrap();
        match &inner.conn {
            TlsConnection::Client(c) => describe_connection(c.negotiated_cipher_suite(), c.protocol_version()),
            TlsConnection::Server(c) => describe_connection(c.negotiated_cipher_suite(), c.protocol_version()),
            TlsConnection::Unconfigured => default_provider()
                .cipher_suites
                .iter()
                .map(|s| format!("{:?}", s.suite()))
                .collect::<Vec<_>>()
                .join(","),
        }
    }

    /// Convenience: sets the hostname, resolves `host`, attempts each
    /// resolved address with the remaining `deadline`, and performs the
    /// handshake. Returns the last error if every address is exhausted.
    pub fn connect(&self, host: &str, port: u16, deadline: Deadline) -> Result<()> {
        self.set_connect_hostname(host, port);
        let port_str = port.to_string();
        let resolver = resolve(host, &port_str, Family::Unknown, deadline, ResolveFlag::NONE)?;
        let mut last_err = None;
        let family = { self.inner.lock().unwrap().socket.family() };
        for addr in resolver.get().iter().filter(|a| family == Family::Unknown || a.family() == family) {
            let attempt = self.connect_one(*addr, deadline);
            match attempt {
                Ok(()) => return Ok(()),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| invalid_argument("name resolution returned no usable addresses")))
    }

    fn connect_one(&self, address: crate::ip::Address, deadline: Deadline) -> Result<()> {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.socket.connect(address, deadline)?;
        }
        self.configure_client_connection()?;
        self.drive_handshake(deadline)
    }

    fn configure_client_connection(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let provider = Arc::new(default_provider());
        let builder = rustls::ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()
            .map_err(|e| Error::StateNotRecoverable(e.to_string()))?;
        let config = if let Some(path) = &inner.cert_path {
            let mut roots = rustls::RootCertStore::empty();
            for cert in load_certs(path)? {
                roots.add(cert).map_err(|e| Error::StateNotRecoverable(e.to_string()))?;
            }
            builder.with_root_certificates(roots).with_no_client_auth()
        } else {
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(NoServerVerification(provider)))
                .with_no_client_auth()
        };
        let server_name = match &inner.hostname {
            Some(h) => ServerName::try_from(h.clone()).map_err(|_| invalid_argument("invalid TLS hostname"))?,
            None => ServerName::try_from("localhost").unwrap(),
        };
        let client = rustls::ClientConnection::new(Arc::new(config), server_name)
            .map_err(|e| Error::StateNotRecoverable(e.to_string()))?;
        inner.conn = TlsConnection::Client(client);
        Ok(())
    }

    fn drive_handshake(&self, deadline: Deadline) -> Result<()> {
        trace_io!("starting TLS handshake");
        loop {
            let mut inner = self.inner.lock().unwrap();
            if !conn_is_handshaking(&inner.conn) {
                trace_io!("TLS handshake complete: {}", describe_connection_ref(&inner.conn));
                return Ok(());
            }
            pump_io(&mut inner, deadline)?;
            if deadline.is_expired() && conn_is_handshaking(&inner.conn) {
                return Err(Error::TimedOut);
            }
        }
    }

    /// Sends the TLS close-notify alert. Does not wait for the peer's own
    /// close-notify; see [`TlsSocketHandle::shutdown_and_close`] for the
    /// full graceful shutdown.
    pub fn shutdown(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        conn_send_close_notify(&mut inner.conn);
        let _ = pump_io(&mut inner, Deadline::zero());
        Ok(())
    }

    /// Sends close-notify, then drains reads until the peer's own
    /// close-notify arrives or `deadline` expires, then closes the
    /// underlying socket.
    pub fn shutdown_and_close(&mut self, deadline: Deadline) -> Result<()> {
        self.shutdown()?;
        loop {
            let mut inner = self.inner.lock().unwrap();
            if conn_peer_closed(&inner.conn) || deadline.is_expired() {
                break;
            }
            if pump_io(&mut inner, deadline).is_err() {
                break;
            }
        }
        ByteIoHandle::close(self)
    }
}

impl<'a> ByteIoHandle for TlsSocketHandle<'a> {
    fn max_buffers(&self) -> usize {
        1
    }

    fn read<'b>(&self, request: IoRequest<Buffer<'b>>, deadline: Deadline) -> Result<IoResult<Buffer<'b>>> {
        check_buffer_count(request.buffers.len(), self.max_buffers())?;
        let mut inner = self.inner.lock().unwrap();
        if matches!(inner.conn, TlsConnection::Unconfigured) {
            return Err(Error::NotConnected);
        }
        let mut out = Vec::with_capacity(request.buffers.len());
        for mut buf in request.buffers {
            loop {
                pump_io(&mut inner, deadline)?;
                match conn_read_plaintext(&mut inner.conn, buf.as_mut_slice()) {
                    Ok(0) if buf.is_empty() => {
                        out.push(buf);
                        break;
                    }
                    Ok(0) => {
                        if deadline.is_zero() || deadline.is_expired() {
                            out.push(buf.truncated_to(0));
                            break;
                        }
                        continue;
                    }
                    Ok(n) => {
                        out.push(buf.truncated_to(n));
                        break;
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        out.push(buf.truncated_to(0));
                        break;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(IoResult::new(out))
    }

    fn write<'b>(&self, request: IoRequest<ConstBuffer<'b>>, deadline: Deadline) -> Result<IoResult<ConstBuffer<'b>>> {
        check_buffer_count(request.buffers.len(), self.max_buffers())?;
        let mut inner = self.inner.lock().unwrap();
        if matches!(inner.conn, TlsConnection::Unconfigured) {
            return Err(Error::NotConnected);
        }
        let mut out = Vec::with_capacity(request.buffers.len());
        for buf in request.buffers {
            match conn_write_plaintext(&mut inner.conn, buf.as_slice()) {
                Ok(n) => {
                    out.push(buf.truncated_to(n));
                    if let Err(e) = pump_io(&mut inner, deadline) {
                        if !e.is_would_block() {
                            return Err(e);
                        }
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    // Backpressure: report zero bytes written rather than
                    // buffering indefinitely.
                    out.push(buf.truncated_to(0));
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(IoResult::new(out))
    }

    fn barrier(&self, _kind: BarrierKind, _wait: BarrierWait, _deadline: Deadline) -> Result<()> {
        Ok(())
    }

    fn set_multiplexer(&mut self, multiplexer: Arc<dyn Multiplexer>) -> Result<()> {
        self.inner.get_mut().unwrap().socket.set_multiplexer(multiplexer)
    }

    fn multiplexer(&self) -> Option<Arc<dyn Multiplexer>> {
        self.inner.lock().unwrap().socket.multiplexer()
    }

    fn registration_token(&self) -> Option<RegistrationToken> {
        self.inner.lock().unwrap().socket.registration_token()
    }

    fn close(&mut self) -> Result<()> {
        let inner = self.inner.get_mut().unwrap();
        ByteIoHandle::close(&mut *inner.socket)
    }
}

/// A bound TLS listener: composes a [`ListeningSocketHandle`] and a shared
/// server configuration, producing a server-role [`TlsSocketHandle`] for
/// each accepted connection.
pub struct ListeningTlsSocketHandle {
    listener: ListeningSocketHandle,
    certificates_path: PathBuf,
    no_buffer_pooling: bool,
}

impl ListeningTlsSocketHandle {
    /// Wraps an already-bound [`ListeningSocketHandle`]. `certificates_path`
    /// must name a PEM file containing the server's certificate chain
    /// followed by its private key.
    pub fn new(listener: ListeningSocketHandle, certificates_path: impl AsRef<Path>, flags: Flag) -> ListeningTlsSocketHandle {
        ListeningTlsSocketHandle {
            listener,
            certificates_path: certificates_path.as_ref().to_path_buf(),
            no_buffer_pooling: flags.contains(Flag::NO_BUFFER_POOLING),
        }
    }

    /// Accepts up to `max_connections` TCP connections and wraps each in a
    /// server-role TLS socket, handshake not yet started (it runs lazily
    /// on first `read`/`write` via the usual `pump_io` loop).
    pub fn read(&self, max_connections: usize, deadline: Deadline) -> Result<Vec<(TlsSocketHandle<'static>, crate::ip::Address)>> {
        let accepted = self.listener.read(max_connections, deadline)?;
        let config = self.build_server_config()?;
        let mut out = Vec::with_capacity(accepted.len());
        for Accepted { socket, remote } in accepted {
            let conn = rustls::ServerConnection::new(config.clone()).map_err(|e| Error::StateNotRecoverable(e.to_string()))?;
            let tls = TlsSocketHandle::from_accepted_server(socket, conn, self.no_buffer_pooling);
            out.push((tls, remote));
        }
        Ok(out)
    }

    fn build_server_config(&self) -> Result<Arc<rustls::ServerConfig>> {
        let mut certs = load_certs(&self.certificates_path)?;
        let key = load_private_key(&self.certificates_path)?;
        if certs.is_empty() {
            return Err(Error::StateNotRecoverable("no certificates found in the configured PEM file".into()));
        }
        let leaf_chain = certs.drain(..).collect::<Vec<_>>();
        let provider = Arc::new(default_provider());
        let config = rustls::ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| Error::StateNotRecoverable(e.to_string()))?
            .with_no_client_auth()
            .with_single_cert(leaf_chain, key)
            .map_err(|e| Error::StateNotRecoverable(e.to_string()))?;
        Ok(Arc::new(config))
    }
}

fn default_provider() -> rustls::crypto::CryptoProvider {
    rustls::crypto::ring::default_provider()
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = std::fs::File::open(path).map_err(Error::Io)?;
    let mut reader = std::io::BufReader::new(file);
    rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Error::Io)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file = std::fs::File::open(path).map_err(Error::Io)?;
    let mut reader = std::io::BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(Error::Io)?
        .ok_or_else(|| Error::StateNotRecoverable("no private key found in the configured PEM file".into()))
}

fn describe_connection(suite: Option<rustls::SupportedCipherSuite>, version: Option<rustls::ProtocolVersion>) -> String {
    match (suite, version) {
        (Some(s), Some(v)) => format!("{:?},{:?}", s.suite(), v),
        (Some(s), None) => format!("{:?}", s.suite()),
        _ => String::new(),
    }
}

#[derive(Debug)]
struct NoServerVerification(Arc<rustls::crypto::CryptoProvider>);

impl rustls::client::danger::ServerCertVerifier for NoServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

fn describe_connection_ref(conn: &TlsConnection) -> String {
    match conn {
        TlsConnection::Client(c) => describe_connection(c.negotiated_cipher_suite(), c.protocol_version()),
        TlsConnection::Server(c) => describe_connection(c.negotiated_cipher_suite(), c.protocol_version()),
        TlsConnection::Unconfigured => String::new(),
    }
}

fn conn_is_handshaking(conn: &TlsConnection) -> bool {
    match conn {
        TlsConnection::Client(c) => c.is_handshaking(),
        TlsConnection::Server(c) => c.is_handshaking(),
        TlsConnection::Unconfigured => false,
    }
}

fn conn_peer_closed(conn: &TlsConnection) -> bool {
    match conn {
        TlsConnection::Client(c) => c.process_new_packets().map(|s| s.peer_has_closed()).unwrap_or(true),
        TlsConnection::Server(c) => c.process_new_packets().map(|s| s.peer_has_closed()).unwrap_or(true),
        TlsConnection::Unconfigured => true,
    }
}

fn conn_wants_write(conn: &TlsConnection) -> bool {
    match conn {
        TlsConnection::Client(c) => c.wants_write(),
        TlsConnection::Server(c) => c.wants_write(),
        TlsConnection::Unconfigured => false,
    }
}

fn conn_wants_read(conn: &TlsConnection) -> bool {
    match conn {
        TlsConnection::Client(c) => c.wants_read(),
        TlsConnection::Server(c) => c.wants_read(),
        TlsConnection::Unconfigured => false,
    }
}

fn conn_write_tls(conn: &mut TlsConnection, w: &mut dyn Write) -> std::io::Result<usize> {
    match conn {
        TlsConnection::Client(c) => c.write_tls(w),
        TlsConnection::Server(c) => c.write_tls(w),
        TlsConnection::Unconfigured => Ok(0),
    }
}

fn conn_read_tls(conn: &mut TlsConnection, r: &mut dyn Read) -> std::io::Result<usize> {
    match conn {
        TlsConnection::Client(c) => c.read_tls(r),
        TlsConnection::Server(c) => c.read_tls(r),
        TlsConnection::Unconfigured => Ok(0),
    }
}

fn conn_process_new_packets(conn: &mut TlsConnection) -> std::result::Result<(), rustls::Error> {
    match conn {
        TlsConnection::Client(c) => c.process_new_packets().map(|_| ()),
        TlsConnection::Server(c) => c.process_new_packets().map(|_| ()),
        TlsConnection::Unconfigured => Ok(()),
    }
}

fn conn_read_plaintext(conn: &mut TlsConnection, buf: &mut [u8]) -> std::io::Result<usize> {
    match conn {
        TlsConnection::Client(c) => match c.reader().read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(0),
            Err(e) => Err(e),
        },
        TlsConnection::Server(c) => match c.reader().read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(0),
            Err(e) => Err(e),
        },
        TlsConnection::Unconfigured => Ok(0),
    }
}

fn conn_write_plaintext(conn: &mut TlsConnection, buf: &[u8]) -> std::io::Result<usize> {
    match conn {
        TlsConnection::Client(c) => c.writer().write(buf),
        TlsConnection::Server(c) => c.writer().write(buf),
        TlsConnection::Unconfigured => Ok(0),
    }
}

fn conn_send_close_notify(conn: &mut TlsConnection) {
    match conn {
        TlsConnection::Client(c) => c.send_close_notify(),
        TlsConnection::Server(c) => c.send_close_notify(),
        TlsConnection::Unconfigured => {}
    }
}

/// Drives one round of the TLS I/O pump: flushes any pending outbound
/// ciphertext, then pulls and processes any available inbound ciphertext.
/// Returns [`Error::OperationWouldBlock`] only when neither direction made
/// progress and the underlying socket had nothing ready.
fn pump_io(inner: &mut TlsInner<'_>, deadline: Deadline) -> Result<()> {
    let mut progressed = false;
    if conn_wants_write(&inner.conn) {
        let mut writer = SocketWriter {
            socket: &inner.socket,
            deadline,
        };
        match conn_write_tls(&mut inner.conn, &mut writer) {
            Ok(_) => progressed = true,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(e) => return Err(e.into()),
        }
    }
    if conn_wants_read(&inner.conn) {
        let mut reader = RingReader {
            socket: &inner.socket,
            ring: &mut inner.ring,
            deadline,
        };
        match conn_read_tls(&mut inner.conn, &mut reader) {
            Ok(_) => {
                conn_process_new_packets(&mut inner.conn).map_err(|e| Error::Tls(e))?;
                progressed = true;
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(e) => return Err(e.into()),
        }
    }
    if !progressed {
        return Err(Error::OperationWouldBlock);
    }
    Ok(())
}

struct SocketWriter<'a> {
    socket: &'a ByteSocketHandle,
    deadline: Deadline,
}

impl<'a> Write for SocketWriter<'a> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let result = self.socket.write(IoRequest::single(ConstBuffer::new(buf)), self.deadline)?;
        let n = result.into_buffers().into_iter().map(|b| b.len()).next().unwrap_or(0);
        if n == 0 {
            return Err(std::io::ErrorKind::WouldBlock.into());
        }
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

struct RingReader<'a> {
    socket: &'a ByteSocketHandle,
    ring: &'a mut CiphertextRing,
    deadline: Deadline,
}

impl<'a> Read for RingReader<'a> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.ring.is_drained() {
            let target = self.ring.fill_target();
            let target_len = target.len();
            let result = self
                .socket
                .read(IoRequest::single(Buffer::new(target)), self.deadline)?;
            let n = result.into_buffers().into_iter().map(|b| b.len()).next().unwrap_or(0);
            let _ = target_len;
            if n == 0 {
                return Err(std::io::ErrorKind::WouldBlock.into());
            }
            self.ring.commit_fill(n);
        }
        let avail = self.ring.sink_bytes();
        let take = avail.len().min(buf.len());
        buf[..take].copy_from_slice(&avail[..take]);
        self.ring.consume_sink(take);
        Ok(take)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fips_requested_without_a_fips_provider_is_not_supported() {
        let socket = ByteSocketHandle::byte_socket(Family::V4, crate::handle::Mode::Write, crate::handle::Caching::All, Flag::NONE).unwrap();
        let tls = TlsSocketHandle::client(SocketRef::Owned(socket));
        assert!(tls.set_algorithms(TlsAlgorithm::FIPS_140_2).is_err());
    }

    #[test]
    fn empty_certificates_path_disables_verification() {
        let socket = ByteSocketHandle::byte_socket(Family::V4, crate::handle::Mode::Write, crate::handle::Caching::All, Flag::NONE).unwrap();
        let tls = TlsSocketHandle::client(SocketRef::Owned(socket));
        tls.set_authentication_certificates_path("").unwrap();
        assert!(tls.inner.lock().unwrap().cert_path.is_none());
    }

    #[test]
    fn set_connect_hostname_returns_port_as_string() {
        let socket = ByteSocketHandle::byte_socket(Family::V4, crate::handle::Mode::Write, crate::handle::Caching::All, Flag::NONE).unwrap();
        let tls = TlsSocketHandle::client(SocketRef::Owned(socket));
        assert_eq!(tls.set_connect_hostname("example.com", 443), "443");
    }
}
