//! Connection server tests over real SOCK_SEQPACKET sockets
//!
//! Each test binds its own socket under a fresh tempdir and plays the
//! client side by hand, so the handshake and steady-state policies are
//! exercised end to end without a display.

use super::*;
use nix::sys::socket::connect;
use std::thread::sleep;
use tempfile::{tempdir, TempDir};

fn server(max_clients: usize) -> (ProtocolServer, TempDir, PathBuf) {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("strata.sock");
    let server = ProtocolServer::bind(&path, max_clients).expect("bind server");
    (server, dir, path)
}

fn client_connect(path: &Path) -> OwnedFd {
    let fd = socket(
        AddressFamily::Unix,
        SockType::SeqPacket,
        SockFlag::empty(),
        None,
    )
    .expect("client socket");
    connect(fd.as_raw_fd(), &UnixAddr::new(path).expect("addr")).expect("connect");
    fd
}

fn send_word(fd: &OwnedFd, word: u32) {
    let sent = send(fd.as_raw_fd(), &word.to_ne_bytes(), MsgFlags::empty()).expect("send");
    assert_eq!(sent, MSG_SIZE);
}

/// Blocking read on the client side; Ok(0) means the server closed us.
fn recv_len(fd: &OwnedFd) -> usize {
    let mut buf = [0u8; 16];
    recv(fd.as_raw_fd(), &mut buf, MsgFlags::empty()).expect("recv")
}

/// Run a few poll rounds so connect/send from the test thread is seen.
fn pump(server: &mut ProtocolServer) {
    for _ in 0..5 {
        server.poll().expect("poll");
        sleep(Duration::from_millis(1));
    }
}

#[test]
fn poll_with_no_clients_returns_immediately() {
    let (mut server, _dir, _path) = server(2);
    server.poll().expect("poll");
    assert!(!server.registry().is_connected(0));
}

#[test]
fn distinct_identities_bind_independently() {
    let (mut server, _dir, path) = server(2);

    let a = client_connect(&path);
    let b = client_connect(&path);
    pump(&mut server);
    send_word(&a, 0);
    send_word(&b, 1);
    pump(&mut server);

    assert!(server.registry().is_connected(0));
    assert!(server.registry().is_connected(1));
}

#[test]
fn duplicate_identity_keeps_first_binding() {
    let (mut server, _dir, path) = server(2);

    let a = client_connect(&path);
    pump(&mut server);
    send_word(&a, 0);
    pump(&mut server);
    assert!(server.registry().is_connected(0));

    let b = client_connect(&path);
    pump(&mut server);
    send_word(&b, 0);
    pump(&mut server);

    // First binding intact, second claimant cut off
    assert!(server.registry().is_connected(0));
    assert_eq!(recv_len(&b), 0);

    // ... and the survivor still works
    send_word(&a, 7);
    pump(&mut server);
    assert_eq!(server.registry_mut().take_pending(0), Some(7));
}

#[test]
fn out_of_range_identity_is_rejected() {
    let (mut server, _dir, path) = server(2);

    let a = client_connect(&path);
    pump(&mut server);
    send_word(&a, 9);
    pump(&mut server);

    assert!(!server.registry().is_connected(0));
    assert!(!server.registry().is_connected(1));
    assert_eq!(recv_len(&a), 0);
}

#[test]
fn malformed_handshake_is_rejected() {
    let (mut server, _dir, path) = server(2);

    let a = client_connect(&path);
    pump(&mut server);
    // Two bytes instead of four
    send(a.as_raw_fd(), &[0u8, 0u8], MsgFlags::empty()).expect("send");
    pump(&mut server);

    assert!(!server.registry().is_connected(0));
    assert_eq!(recv_len(&a), 0);
}

#[test]
fn latest_submission_wins_across_one_cycle() {
    let (mut server, _dir, path) = server(1);

    let a = client_connect(&path);
    pump(&mut server);
    send_word(&a, 0);
    pump(&mut server);

    for fb in [3, 4, 5] {
        send_word(&a, fb);
    }
    pump(&mut server);

    assert_eq!(server.registry_mut().take_pending(0), Some(5));
    // Consumed: nothing left for the next cycle
    assert_eq!(server.registry_mut().take_pending(0), None);
}

#[test]
fn hangup_frees_the_slot_for_reclaiming() {
    let (mut server, _dir, path) = server(1);

    let a = client_connect(&path);
    pump(&mut server);
    send_word(&a, 0);
    pump(&mut server);
    assert!(server.registry().is_connected(0));

    drop(a);
    pump(&mut server);
    assert!(!server.registry().is_connected(0));

    // The identity can be claimed again by a new connection
    let b = client_connect(&path);
    pump(&mut server);
    send_word(&b, 0);
    pump(&mut server);
    assert!(server.registry().is_connected(0));
}

#[test]
fn broadcast_reaches_identified_clients() {
    let (mut server, _dir, path) = server(1);

    let a = client_connect(&path);
    pump(&mut server);
    send_word(&a, 0);
    pump(&mut server);

    server.broadcast_sync(42);

    let mut buf = [0u8; MSG_SIZE];
    let got = recv(a.as_raw_fd(), &mut buf, MsgFlags::empty()).expect("recv");
    assert_eq!(got, MSG_SIZE);
    assert_eq!(u32::from_ne_bytes(buf), 42);
}

#[test]
fn registry_rejects_out_of_range_operations() {
    let mut registry = ClientRegistry::new(2);
    assert!(!registry.bind(2, Token(9)));
    registry.submit(2, 1);
    assert_eq!(registry.take_pending(2), None);
    registry.reset(2);
}
