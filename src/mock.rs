//! A mock panel device, useful to exercise the relay without hardware.
//!
//! Opening a port whose path is `mock:<name>` spawns a task emulating a
//! panel's firmware loop behind an in-memory duplex link. The emulation
//! follows the real firmware's command table (`IDENT`, `PING`, `VERSION`,
//! `DESC`, `SET`, `GET`) plus two conveniences: `STATUS` and `EVENT
//! <payload>`, the latter making the device emit an unsolicited event
//! shortly after acknowledging.
//!
//! Two name prefixes alter behavior for failure-path testing:
//! `misfit*` devices identify without the `PANEL` suffix, and `deaf*`
//! devices never answer `PING`.

use std::{collections::HashMap, time::Duration};

use futures::{SinkExt, StreamExt};
use tokio::io::DuplexStream;
use tokio_util::codec::{Decoder, Framed};
use tracing::{debug, info_span, Instrument};

use crate::codec::LineCodec;

/// How long a mock device waits between acknowledging an `EVENT` command
/// and emitting the event itself.
const EVENT_LAG: Duration = Duration::from_millis(50);

/// Spawn a mock device and return the relay's side of its link.
pub(crate) fn spawn(name: &str) -> DuplexStream {
    let (near, far) = tokio::io::duplex(4096);

    let device = MockDevice::new(name);
    let span = info_span!("mock", name = %device.name);
    tokio::spawn(device.run(LineCodec::new().framed(far)).instrument(span));

    near
}

struct MockDevice {
    name: String,
    ident: String,
    answers_ping: bool,
    store: HashMap<String, String>,
}

impl MockDevice {
    fn new(name: &str) -> Self {
        let ident = if name.starts_with("misfit") {
            name.to_uppercase()
        } else {
            format!("{}PANEL", name.to_uppercase())
        };

        Self {
            name: name.to_string(),
            ident,
            answers_ping: !name.starts_with("deaf"),
            store: HashMap::new(),
        }
    }

    async fn run(mut self, mut wire: Framed<DuplexStream, LineCodec>) {
        // Real panels dump debug output while booting.
        let _ = wire.send("boot: mock panel firmware".into()).await;
        let _ = wire.send(format!("boot: {} inputs ok", self.name)).await;

        while let Some(line) = wire.next().await {
            let line = match line {
                Ok(line) => line,
                Err(_) => break,
            };

            debug!(%line, "Mock device got a command");

            let (command, args) = match line.split_once(' ') {
                Some((command, args)) => (command, Some(args)),
                None => (line.as_str(), None),
            };

            let sent = match command {
                "IDENT" => wire.send(self.ident.clone()).await,

                "PING" => {
                    if self.answers_ping {
                        wire.send("PONG".into()).await
                    } else {
                        Ok(())
                    }
                }

                "VERSION" => {
                    let _ = wire.send("0.1.0".into()).await;
                    wire.send("ACK".into()).await
                }

                "DESC" => {
                    let _ = wire.send(format!("Mock panel `{}`", self.name)).await;
                    wire.send("ACK".into()).await
                }

                "STATUS" => {
                    let _ = wire.send("ONLINE".into()).await;
                    wire.send("ACK".into()).await
                }

                "GET" => {
                    let key = args.unwrap_or_default();
                    let value = self.store.get(key).map(String::as_str).unwrap_or("?");
                    let _ = wire.send(format!("{key}\t{value}")).await;
                    wire.send("ACK".into()).await
                }

                "SET" => {
                    if let Some((key, value)) = args.and_then(|args| args.split_once(' ')) {
                        self.store.insert(key.to_string(), value.to_string());
                    }
                    wire.send("ACK".into()).await
                }

                "EVENT" => {
                    let payload = args.unwrap_or_default().to_string();
                    let sent = wire.send("ACK".into()).await;

                    tokio::time::sleep(EVENT_LAG).await;
                    let _ = wire.send(format!("EVENT\t{payload}")).await;

                    sent
                }

                _ => wire.send("ERR Command not found".into()).await,
            };

            if sent.is_err() {
                break;
            }
        }

        debug!("Mock device hanging up");
    }
}
