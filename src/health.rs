use std::time::Duration;

use tracing::{debug, warn};

use crate::{
    client::{broadcast, Clients},
    error::Error,
    registry::Registry,
};

/// Ping every panel which has gone uncontacted longer than `interval`.
///
/// Runs once per event-loop wake-up. A panel which does not answer is
/// reported to every client as a synthetic event line, and its contact
/// timestamp is refreshed so the same failure is reported at most once
/// per interval.
pub(crate) async fn sweep(registry: &mut Registry, clients: &mut Clients, interval: Duration) {
    let stale: Vec<String> = registry
        .iter()
        .filter(|panel| panel.is_stale(interval))
        .map(|panel| panel.ident().to_string())
        .collect();

    for ident in stale {
        let Some(panel) = registry.get_mut(&ident) else {
            continue;
        };

        debug!(%ident, "Healthcheck");

        match panel.ping().await {
            Ok(()) => {}
            Err(Error::Timeout { .. }) => {
                panel.note_contact();
                warn!(%ident, "Healthcheck got no response");
                broadcast(
                    clients,
                    format!("{ident}\tEVENT\tSERV_PING\tPING\tNOPONG"),
                )
                .await;
            }
            Err(e) => {
                // Broken links are cleaned up by the event loop when the
                // stream ends; don't re-ping a wedged panel every pass.
                panel.note_contact();
                warn!(%ident, %e, "Healthcheck failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        codec::LineCodec,
        panel::{Panel, Timing},
    };
    use futures::StreamExt;
    use tokio::time::timeout;
    use tokio_util::codec::Decoder;

    fn test_timing() -> Timing {
        Timing {
            boot_delay: Duration::from_millis(10),
            init_delay: Duration::from_millis(20),
            retry_delay: Duration::from_millis(60),
        }
    }

    /// A connected TCP pair: the server-side frame goes into `Clients`,
    /// the peer side observes what gets broadcast.
    async fn tcp_pair() -> (
        crate::client::ClientConnection,
        tokio_util::codec::Framed<tokio::net::TcpStream, LineCodec>,
    ) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let peer = tokio::net::TcpStream::connect(addr).await.unwrap();
        let (server_side, _) = listener.accept().await.unwrap();

        (
            LineCodec::new().framed(server_side),
            LineCodec::new().framed(peer),
        )
    }

    #[tokio::test]
    async fn fresh_panels_are_not_probed() {
        let mut registry = Registry::new();
        registry
            .insert(Panel::open("mock:deaf", test_timing()).await.unwrap())
            .await;
        let mut clients = Clients::new();

        // Probing the deaf panel would block for the full two-stage wait
        // (80 ms with the test timing); a fresh panel is left alone.
        let before = std::time::Instant::now();
        sweep(&mut registry, &mut clients, Duration::from_secs(60)).await;
        assert!(before.elapsed() < Duration::from_millis(40));
    }

    #[tokio::test]
    async fn nopong_is_reported_once_per_interval() {
        let mut registry = Registry::new();
        registry
            .insert(Panel::open("mock:deaf", test_timing()).await.unwrap())
            .await;

        let mut clients = Clients::new();

        let interval = Duration::from_millis(50);
        tokio::time::sleep(Duration::from_millis(60)).await;

        // First sweep: stale, deaf -> the failure refreshes the timestamp.
        sweep(&mut registry, &mut clients, interval).await;
        assert!(!registry.iter().next().unwrap().is_stale(interval));

        // Second sweep right away: not stale anymore, so no probe at all.
        let before = std::time::Instant::now();
        sweep(&mut registry, &mut clients, interval).await;
        // A probe against a deaf device would have taken the full
        // two-stage wait (80 ms with the test timing).
        assert!(before.elapsed() < Duration::from_millis(40));
    }

    #[tokio::test]
    async fn healthy_panels_survive_the_sweep() {
        let mut registry = Registry::new();
        registry
            .insert(Panel::open("mock:tray", test_timing()).await.unwrap())
            .await;

        let mut clients = Clients::new();

        let interval = Duration::from_millis(50);
        tokio::time::sleep(Duration::from_millis(60)).await;

        sweep(&mut registry, &mut clients, interval).await;

        assert_eq!(registry.len(), 1);
        assert!(!registry.iter().next().unwrap().is_stale(interval));
    }

    #[tokio::test]
    async fn deaf_panel_is_reported_and_stays_registered() {
        let mut registry = Registry::new();
        registry
            .insert(Panel::open("mock:deaf", test_timing()).await.unwrap())
            .await;

        let (server_side, mut peer) = tcp_pair().await;
        let mut clients = Clients::new();
        clients.insert(0, server_side);

        tokio::time::sleep(Duration::from_millis(60)).await;
        sweep(&mut registry, &mut clients, Duration::from_millis(50)).await;

        let notice = timeout(Duration::from_secs(1), peer.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(notice, "DEAFPANEL\tEVENT\tSERV_PING\tPING\tNOPONG");

        // A slow or dead device is not assumed gone.
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn event_read_resets_staleness() {
        let mut registry = Registry::new();
        registry
            .insert(Panel::open("mock:tray", test_timing()).await.unwrap())
            .await;

        let interval = Duration::from_millis(80);

        // Trigger an unsolicited event and consume it like the loop would.
        let panel = registry.get_mut("TRAYPANEL").unwrap();
        panel.multiline_command("EVENT DING").await.unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        let event = timeout(Duration::from_secs(1), panel.read_event())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, "EVENT\tDING");

        assert!(!panel.is_stale(interval));
    }
}
