//! End-to-end plain TCP scenarios.

use std::time::Duration;

use byte_io_core::io_handle::ByteIoHandle;
use byte_io_core::{
    Address, Buffer, Caching, ConstBuffer, Creation, Deadline, Error, Family, Flag, IoRequest, ListeningSocketHandle, Mode,
};
use byte_io_core::net::ByteSocketHandle;

#[test]
fn plain_tcp_echo_round_trips_exact_bytes() {
    let mut listener = ListeningSocketHandle::listening_socket(Family::V6, Mode::Write, Caching::All, Flag::NONE).unwrap();
    let any = Address::make_v6(std::net::Ipv6Addr::LOCALHOST.octets(), 0, 0);
    listener.bind(any, Creation::IfNeeded, -1).unwrap();
    let bound = listener.local_endpoint().unwrap();

    let mut client = ByteSocketHandle::byte_socket(Family::V6, Mode::Write, Caching::All, Flag::NONE).unwrap();
    client.connect(bound, Deadline::after(Duration::from_secs(1))).unwrap();

    let payload = b"hello";
    let write_result = client
        .write(IoRequest::single(ConstBuffer::new(payload)), Deadline::after(Duration::from_secs(1)))
        .unwrap();
    assert_eq!(write_result.buffers()[0].as_slice(), payload);
    client.shutdown(byte_io_core::net::ShutdownKind::Write).unwrap();

    let accepted = listener.read(1, Deadline::after(Duration::from_secs(1))).unwrap();
    assert_eq!(accepted.len(), 1);
    let server_side = &accepted[0].socket;

    let mut received = Vec::new();
    loop {
        let mut scratch = [0u8; 64];
        let result = server_side
            .read(IoRequest::single(Buffer::new(&mut scratch)), Deadline::after(Duration::from_secs(1)))
            .unwrap();
        let buffers = result.into_buffers();
        if buffers.iter().all(|b| b.is_empty()) {
            break;
        }
        for b in &buffers {
            received.extend_from_slice(b.as_slice());
        }
    }
    assert_eq!(received, payload);
}

#[test]
fn nonblocking_connect_to_unroutable_address_eventually_times_out() {
    let mut client = ByteSocketHandle::byte_socket(Family::V4, Mode::Write, Caching::All, Flag::MULTIPLEXABLE).unwrap();
    let target = Address::make_v4([198, 51, 100, 1], 1);
    let result = client.connect(target, Deadline::zero());
    assert!(matches!(result, Err(Error::OperationInProgress)));

    let result = client.connect(target, Deadline::after(Duration::from_millis(100)));
    assert!(result.is_err());
}
