use std::collections::HashMap;

use futures::{Sink, SinkExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::debug;

use crate::{codec::LineCodec, error::Error};

/// Identifies one connected client for the lifetime of its connection.
/// Clients carry no other identity; every inbound line must carry an
/// explicit address token.
pub(crate) type ClientId = usize;

/// One connected client's framed transport.
pub(crate) type ClientConnection = Framed<TcpStream, LineCodec>;

/// All currently connected clients.
pub(crate) type Clients = HashMap<ClientId, ClientConnection>;

/// The transmit seam toward one network peer: anything which can sink
/// protocol lines. The codec newline-terminates them on the wire.
pub(crate) trait LineSink: Sink<String, Error = Error> + Unpin {}

impl<T> LineSink for T where T: Sink<String, Error = Error> + Unpin {}

/// Fan one line out to every connected client (never the listener).
///
/// A client whose transport fails mid-send is dropped from the set; it
/// was gone anyway and delivery to disconnected clients is not promised.
pub(crate) async fn broadcast(clients: &mut Clients, line: String) {
    let mut dead = Vec::new();

    for (id, connection) in clients.iter_mut() {
        if let Err(e) = connection.send(line.clone()).await {
            debug!(client = *id, %e, "Dropping client which failed during broadcast");
            dead.push(*id);
        }
    }

    for id in dead {
        clients.remove(&id);
    }
}
