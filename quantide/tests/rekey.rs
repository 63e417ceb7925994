//! In-band rekey scenarios over loopback TCP.

mod common;

use quantide::{Error, SessionState};

use common::tunnel_pair;

// Drive one full rekey negotiation over the tunnels: the offer rides out
// with a sync record, the responder answers inside its receive loop, and an
// ack record lets the initiator drain the answer.
fn negotiate_rekey(
    initiator: &quantide::Tunnel<std::net::TcpStream, std::net::TcpStream>,
    responder: &quantide::Tunnel<std::net::TcpStream, std::net::TcpStream>,
) {
    initiator.send_rekey().unwrap();
    initiator.send(b"sync").unwrap();
    assert_eq!(responder.receive().unwrap(), b"sync");

    responder.send(b"ack").unwrap();
    assert_eq!(initiator.receive().unwrap(), b"ack");
}

#[test]
fn explicit_rekey_mid_stream() {
    let (initiator, responder) = tunnel_pair();

    negotiate_rekey(&initiator, &responder);
    assert!(initiator.session().is_rekey_in_progress());
    assert_eq!(initiator.session().state(), SessionState::Rekeying);

    // 25 records span the activation boundary; the first ~16 travel under
    // the old keys, the rest under the new ones, all byte-identical.
    for i in 0..25u32 {
        let message = format!("Cycle1-Msg{i:02}");
        initiator.send(message.as_bytes()).unwrap();
        assert_eq!(responder.receive().unwrap(), message.as_bytes());
    }

    assert_eq!(initiator.session().state(), SessionState::Established);
    assert_eq!(responder.session().state(), SessionState::Established);
    assert!(!initiator.session().is_rekey_in_progress());
    assert!(!responder.session().is_rekey_in_progress());
}

#[test]
fn traffic_flows_after_rekey_in_both_directions() {
    let (initiator, responder) = tunnel_pair();

    negotiate_rekey(&initiator, &responder);
    for i in 0..20u32 {
        let message = format!("forward {i}");
        initiator.send(message.as_bytes()).unwrap();
        assert_eq!(responder.receive().unwrap(), message.as_bytes());
    }
    assert_eq!(initiator.session().state(), SessionState::Established);

    // The responder's outbound cipher swapped with its inbound one.
    responder.send(b"reverse path").unwrap();
    assert_eq!(initiator.receive().unwrap(), b"reverse path");
}

#[test]
fn second_rekey_cycle_after_completion() {
    let (initiator, responder) = tunnel_pair();

    for cycle in 1..=2u32 {
        negotiate_rekey(&initiator, &responder);
        for i in 0..20u32 {
            let message = format!("Cycle{cycle}-Msg{i:02}");
            initiator.send(message.as_bytes()).unwrap();
            assert_eq!(responder.receive().unwrap(), message.as_bytes());
        }
        assert_eq!(initiator.session().state(), SessionState::Established);
        assert_eq!(responder.session().state(), SessionState::Established);
    }
}

#[test]
fn concurrent_rekey_rejected() {
    let (initiator, _responder) = tunnel_pair();

    initiator.send_rekey().unwrap();
    assert!(matches!(
        initiator.send_rekey(),
        Err(Error::RekeyInProgress)
    ));
}
