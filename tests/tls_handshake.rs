//! End-to-end TLS handshake and echo scenario against loopback, using a
//! freshly generated self-signed certificate.

use std::time::Duration;

use byte_io_core::io_handle::ByteIoHandle;
use byte_io_core::net::{ListeningSocketHandle, SocketRef};
use byte_io_core::tls::{ListeningTlsSocketHandle, TlsSocketHandle};
use byte_io_core::{Address, Buffer, Caching, ConstBuffer, Creation, Deadline, Family, Flag, IoRequest, Mode};

fn write_self_signed_cert(dir: &std::path::Path) -> std::path::PathBuf {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let path = dir.join("server.pem");
    let pem = format!("{}{}", cert.cert.pem(), cert.signing_key.serialize_pem());
    std::fs::write(&path, pem).unwrap();
    path
}

#[test]
fn tls_handshake_and_echo_round_trips_over_loopback() {
    let dir = std::env::temp_dir().join(format!("byte-io-core-tls-test-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let cert_path = write_self_signed_cert(&dir);

    let mut listener = ListeningSocketHandle::listening_socket(Family::V4, Mode::Write, Caching::All, Flag::NONE).unwrap();
    let any = Address::make_v4([127, 0, 0, 1], 0);
    listener.bind(any, Creation::IfNeeded, -1).unwrap();
    let bound = listener.local_endpoint().unwrap();
    let tls_listener = ListeningTlsSocketHandle::new(listener, &cert_path, Flag::NONE);

    let client_socket = byte_io_core::net::ByteSocketHandle::byte_socket(Family::V4, Mode::Write, Caching::All, Flag::NONE).unwrap();
    let client = TlsSocketHandle::client(SocketRef::Owned(client_socket));
    client.set_authentication_certificates_path("").unwrap();
    client.connect("localhost", bound.port(), Deadline::after(Duration::from_secs(2))).unwrap();

    let accepted = tls_listener.read(1, Deadline::after(Duration::from_secs(2))).unwrap();
    assert_eq!(accepted.len(), 1);
    let (server, _remote) = &accepted[0];

    client
        .write(IoRequest::single(ConstBuffer::new(b"Hello")), Deadline::after(Duration::from_secs(2)))
        .unwrap();

    let mut scratch = [0u8; 64];
    let server_result = server
        .read(IoRequest::single(Buffer::new(&mut scratch)), Deadline::after(Duration::from_secs(2)))
        .unwrap();
    let received: Vec<u8> = server_result.into_buffers().into_iter().flat_map(|b| b.as_slice().to_vec()).collect();
    assert_eq!(received, b"Hello");

    server
        .write(IoRequest::single(ConstBuffer::new(b"World")), Deadline::after(Duration::from_secs(2)))
        .unwrap();

    let mut scratch2 = [0u8; 64];
    let client_result = client
        .read(IoRequest::single(Buffer::new(&mut scratch2)), Deadline::after(Duration::from_secs(2)))
        .unwrap();
    let received2: Vec<u8> = client_result.into_buffers().into_iter().flat_map(|b| b.as_slice().to_vec()).collect();
    assert_eq!(received2, b"World");

    client.shutdown().unwrap();

    let _ = std::fs::remove_dir_all(&dir);
}
