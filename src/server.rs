use std::{
    future::Future,
    io,
    net::SocketAddr,
    pin::Pin,
    task::{Context, Poll},
};

use futures::{future::poll_fn, Stream};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::oneshot,
    time::{Instant, Sleep},
};
use tokio_util::codec::Decoder;
use tracing::{debug, error, info, warn};

use crate::{
    client::{broadcast, ClientId, Clients},
    codec::LineCodec,
    config::Config,
    discovery,
    error::Error,
    health,
    panel::Panel,
    registry::Registry,
    router,
};

/// The default port to run the relay on.
pub const DEFAULT_PORT: u16 = 5000;

async fn run(config: Config, port: Option<u16>, allocated_port: Option<oneshot::Sender<u16>>) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port.unwrap_or(0)));
    let listener = TcpListener::bind(addr)
        .await
        .expect("Binding the listener should work");

    let addr = listener
        .local_addr()
        .expect("A bound listener has a local address");

    if let Some(port_reply) = allocated_port {
        port_reply
            .send(addr.port())
            .expect("The receiver of which port was allocated should not be dropped");
    }

    info!("listening on {}", addr);

    let mut relay = Relay::new(config, listener);
    relay.open_configured_devices().await;
    relay.run().await;
}

/// Start the relay on an arbitrary available port.
/// The port allocated will be sent on the provided channel.
pub async fn run_any_port(config: Config, allocated_port: oneshot::Sender<u16>) {
    run(config, None, Some(allocated_port)).await
}

/// Start the relay on the given port.
pub async fn run_on_port(config: Config, port: u16) {
    run(config, Some(port), None).await
}

/// What one readiness pass woke up for.
enum Wakeup {
    /// The listener accepted a connection.
    NewClient(TcpStream, SocketAddr),

    /// The listener hit an accept error.
    AcceptFailed(io::Error),

    /// A registered panel's link produced a line (or broke).
    PanelLine(String, Result<String, Error>),

    /// A client connection produced a line (or ended).
    ClientLine(ClientId, Option<Result<String, Error>>),

    /// Nothing happened for a whole health-check interval.
    Tick,
}

/// The relay: one task owning the listener, every client connection and
/// (via the registry) every panel session.
///
/// Single-threaded and cooperative; all mutation happens on this task's
/// stack, so the registry and client set need no locking. Panel commands
/// perform their bounded waits inline and stall the whole relay for that
/// duration, which is the accepted latency bound of the device protocol.
struct Relay {
    listener: TcpListener,
    clients: Clients,
    next_client_id: ClientId,
    registry: Registry,
    config: Config,

    /// Bounds every readiness wait so health checks run without traffic.
    tick: Pin<Box<Sleep>>,
}

impl Relay {
    fn new(config: Config, listener: TcpListener) -> Self {
        let interval = config.healthcheck_interval();

        Self {
            listener,
            clients: Clients::new(),
            next_client_id: 0,
            registry: Registry::new(),
            config,
            tick: Box::pin(tokio::time::sleep(interval)),
        }
    }

    /// `OPENALL` semantics at startup, when configured.
    async fn open_configured_devices(&mut self) {
        if !self.config.open_all_on_start {
            return;
        }

        let candidates = match discovery::list(&self.config.device_pattern) {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(%e, "Could not enumerate devices at startup");
                return;
            }
        };

        for (path, _) in candidates {
            match Panel::open(&path, self.config.timing()).await {
                Ok(panel) => {
                    info!(ident = %panel.ident(), %path, "Opened at startup");
                    self.registry.insert(panel).await;
                }
                Err(e) => warn!(%path, %e, "Could not open device at startup"),
            }
        }
    }

    /// One readiness poll across the listener, every panel link, every
    /// client connection and the bounded-wait timer, in that order.
    /// Within a pass, whatever is ready first is served first.
    fn poll_sources(&mut self, cx: &mut Context<'_>) -> Poll<Wakeup> {
        if let Poll::Ready(result) = self.listener.poll_accept(cx) {
            return Poll::Ready(match result {
                Ok((stream, addr)) => Wakeup::NewClient(stream, addr),
                Err(e) => Wakeup::AcceptFailed(e),
            });
        }

        if let Poll::Ready((ident, line)) = self.registry.poll_event(cx) {
            return Poll::Ready(Wakeup::PanelLine(ident, line));
        }

        for (id, connection) in self.clients.iter_mut() {
            if let Poll::Ready(item) = Pin::new(connection).poll_next(cx) {
                return Poll::Ready(Wakeup::ClientLine(*id, item));
            }
        }

        if self.tick.as_mut().poll(cx).is_ready() {
            return Poll::Ready(Wakeup::Tick);
        }

        Poll::Pending
    }

    /// Drive the relay until a fault with `shutdown_on_fault` set.
    async fn run(&mut self) {
        loop {
            let wakeup = poll_fn(|cx| self.poll_sources(cx)).await;

            if let Err(fault) = self.handle(wakeup).await {
                error!(%fault, "TOPEX: fault escaped an iteration");
                broadcast(&mut self.clients, format!("ERR\tTOPEX\t{fault}")).await;

                if self.config.shutdown_on_fault {
                    info!("Closing every panel and shutting down");
                    self.registry.close_all().await;
                    return;
                }
            }

            health::sweep(
                &mut self.registry,
                &mut self.clients,
                self.config.healthcheck_interval(),
            )
            .await;

            // Re-arm the bounded wait.
            self.tick
                .as_mut()
                .reset(Instant::now() + self.config.healthcheck_interval());
        }
    }

    async fn handle(&mut self, wakeup: Wakeup) -> Result<(), Error> {
        match wakeup {
            Wakeup::NewClient(stream, addr) => {
                let id = self.next_client_id;
                self.next_client_id += 1;

                info!(%addr, client = id, "CONN");
                self.clients.insert(id, LineCodec::new().framed(stream));
            }

            Wakeup::AcceptFailed(e) => {
                // Transient accept failures (fd exhaustion and friends)
                // leave the listener usable.
                warn!(%e, "Accept failed");
            }

            Wakeup::PanelLine(ident, Ok(line)) => {
                if line.is_empty() {
                    // Readiness without payload: the device protocol is
                    // out of step.
                    return Err(Error::EmptyEvent(ident));
                }

                debug!(%ident, %line, "EVENT");
                broadcast(&mut self.clients, format!("{ident}\t{line}")).await;
            }

            Wakeup::PanelLine(ident, Err(e)) => {
                // The device went away; plain bookkeeping.
                warn!(%ident, %e, "Panel link broke, deregistering");
                if let Some(panel) = self.registry.remove(&ident) {
                    panel.close().await;
                }
            }

            Wakeup::ClientLine(id, Some(Ok(line))) => {
                if let Some(connection) = self.clients.get_mut(&id) {
                    if let Err(e) =
                        router::handle_line(&line, connection, &mut self.registry, &self.config)
                            .await
                    {
                        debug!(client = id, %e, "DISCONNECT: could not write reply");
                        self.clients.remove(&id);
                    }
                }
            }

            Wakeup::ClientLine(id, Some(Err(e))) => {
                // Undecodable input gets a disconnect, not a protocol
                // error.
                debug!(client = id, %e, "DISCONNECT: undecodable input");
                self.clients.remove(&id);
            }

            Wakeup::ClientLine(id, None) => {
                debug!(client = id, "DISCONNECT");
                self.clients.remove(&id);
            }

            Wakeup::Tick => {
                // The sweep below every wakeup covers the work.
            }
        }

        Ok(())
    }
}
