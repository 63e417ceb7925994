#![allow(dead_code)]

use std::net::{TcpListener, TcpStream};
use std::thread;

use quantide::{Session, SessionConfig, TicketManager, TransportConfig, Tunnel};

pub fn tcp_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let client = TcpStream::connect(addr).unwrap();
    let (server, _) = listener.accept().unwrap();
    (client, server)
}

/// Run a full handshake between fresh sessions over a loopback connection.
/// Returns both sessions and both streams, initiator side first.
pub fn handshake_pair(
    initiator_config: SessionConfig,
    responder_config: SessionConfig,
) -> (Session, Session, TcpStream, TcpStream) {
    let (client, server) = tcp_pair();

    let responder = thread::spawn(move || {
        let mut session = Session::responder(responder_config);
        let mut stream = server.try_clone().unwrap();
        session.respond_handshake(&mut stream).unwrap();
        (session, server)
    });

    let mut initiator = Session::initiator(initiator_config);
    let mut stream = client.try_clone().unwrap();
    initiator.initiate_handshake(&mut stream).unwrap();

    let (responder, server) = responder.join().unwrap();
    (initiator, responder, client, server)
}

/// Handshake, then wrap both sides in tunnels.
pub fn tunnel_pair() -> (Tunnel<TcpStream, TcpStream>, Tunnel<TcpStream, TcpStream>) {
    let (initiator, responder, client, server) =
        handshake_pair(SessionConfig::default(), SessionConfig::default());
    let config = TransportConfig::default();
    (
        Tunnel::from_tcp(client, initiator, &config).unwrap(),
        Tunnel::from_tcp(server, responder, &config).unwrap(),
    )
}

/// Handshake with ticket support on the responder, returning the manager so
/// tests can issue and redeem tickets.
pub fn handshake_pair_with_tickets(
    manager: &TicketManager,
) -> (Session, Session, TcpStream, TcpStream) {
    let (client, server) = tcp_pair();

    let (initiator, rest) = thread::scope(|scope| {
        let responder = scope.spawn(move || {
            let mut session = Session::responder(SessionConfig::default());
            let mut stream = server.try_clone().unwrap();
            session
                .respond_handshake_with_tickets(&mut stream, manager)
                .unwrap();
            (session, server)
        });

        let mut initiator = Session::initiator(SessionConfig::default());
        let mut stream = client.try_clone().unwrap();
        initiator.initiate_handshake(&mut stream).unwrap();
        (initiator, responder.join().unwrap())
    });
    let (responder, server) = rest;
    (initiator, responder, client, server)
}
