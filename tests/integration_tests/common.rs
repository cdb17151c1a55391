// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Mock-device harness: a loopback TCP pair stands in for the DUT. These
//! scenarios never complete a real TLS handshake (exactly like the unit
//! tests in `client::pool` and `pase::busy`) — what's under test is the
//! framing/multiplexing/classification logic, not `rustls` itself.

use mash_conformance_core::{
    session::{ConnectionState, Session},
    transport::stream::Transport,
    wire::framer::Framer,
};
use tokio::net::{TcpListener, TcpStream};

pub async fn loopback() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (client, (server, _)) =
        tokio::try_join!(TcpStream::connect(addr), listener.accept()).expect("pair");
    (client, server)
}

/// A client-side session plus the bare framer standing in for the device on
/// the other end of the loopback pair.
pub async fn mock_pair(state: ConnectionState) -> (Session, Framer<Transport>) {
    let (client, server) = loopback().await;
    let session = Session::new(Transport::Raw(client), state);
    let device = Framer::new(Transport::Raw(server));
    (session, device)
}
