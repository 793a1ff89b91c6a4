use futures::SinkExt;
use itertools::Itertools;
use tracing::{debug, info, warn};

use crate::{
    client::LineSink,
    config::Config,
    discovery,
    error::Error,
    panel::{Panel, ACK},
    registry::Registry,
};

/// Pull the first space-separated token off a line.
fn pop_token(line: &str) -> (&str, Option<&str>) {
    match line.split_once(' ') {
        Some((token, rest)) => (token, Some(rest)),
        None => (line, None),
    }
}

/// Dispatch one inbound client line.
///
/// The line's first token addresses either the relay itself (`SERV`) or a
/// registered panel. Panel-side failures become `ERR` replies and the
/// client stays connected; only a failure to write back to the client
/// propagates, which makes the event loop drop that client.
pub(crate) async fn handle_line(
    line: &str,
    client: &mut impl LineSink,
    registry: &mut Registry,
    config: &Config,
) -> Result<(), Error> {
    let (address, rest) = pop_token(line);

    let Some(rest) = rest else {
        warn!(%line, "Malformed command");
        client
            .send(Error::Malformed(line.to_string()).to_err_line())
            .await?;
        return Ok(());
    };

    if address == "SERV" {
        handle_serv(rest, client, registry, config).await
    } else {
        handle_panel_command(address, rest, client, registry).await
    }
}

/// An administrative command addressed to the relay itself.
///
/// Unrecognized operations are ignored; every exchange ends with `ACK`,
/// including the `ERR` replies, so clients always see the same framing.
async fn handle_serv(
    rest: &str,
    client: &mut impl LineSink,
    registry: &mut Registry,
    config: &Config,
) -> Result<(), Error> {
    let (op, params) = pop_token(rest);

    match op {
        "LIST" => match discovery::list(&config.device_pattern) {
            Ok(candidates) => {
                for (path, description) in candidates {
                    client.send(format!("{path}\t{description}")).await?;
                }
            }
            Err(e) => {
                warn!(%e, "LIST failed");
                client.send(e.to_err_line()).await?;
            }
        },

        "OPEN" => match params {
            None => {
                client.send("ERR\tMust provide port to open".into()).await?;
            }
            Some(port) => match Panel::open(port, config.timing()).await {
                Ok(panel) => {
                    let ident = panel.ident().to_string();
                    info!(%ident, %port, "OPEN");
                    registry.insert(panel).await;
                    client.send(ident).await?;
                }
                Err(e) => {
                    warn!(%port, %e, "OPEN failed");
                    client.send(e.to_err_line()).await?;
                }
            },
        },

        "OPENALL" => match discovery::list(&config.device_pattern) {
            Ok(candidates) => {
                for (path, _) in candidates {
                    match Panel::open(&path, config.timing()).await {
                        Ok(panel) => {
                            let ident = panel.ident().to_string();
                            info!(%ident, %path, "OPENALL");
                            registry.insert(panel).await;
                            client.send(format!("{ident}\t{path}")).await?;
                        }
                        // One bad device does not abort the sweep.
                        Err(e) => warn!(%path, %e, "OPENALL skipping device"),
                    }
                }
            }
            Err(e) => {
                warn!(%e, "OPENALL failed");
                client.send(e.to_err_line()).await?;
            }
        },

        "CLOSE" => match params {
            None => {
                client
                    .send("ERR\tMust provide panel IDENT to close".into())
                    .await?;
            }
            Some(ident) => match registry.remove(ident) {
                None => {
                    client
                        .send(Error::NoSuchPanel(ident.to_string()).to_err_line())
                        .await?;
                }
                Some(panel) => {
                    info!(%ident, port = %panel.port(), "CLOSE");
                    panel.close().await;
                }
            },
        },

        "AVAIL" => {
            let panels: Vec<(String, String)> = registry
                .iter()
                .map(|panel| (panel.ident().to_string(), panel.port().to_string()))
                .sorted()
                .collect();

            for (ident, port) in panels {
                client.send(format!("{ident}\t{port}")).await?;
            }
        }

        "DEBUG" => match params.map(pop_token) {
            None => {
                client
                    .send("ERR\tMust provide panel ident and command".into())
                    .await?;
            }
            Some((_, None)) => {
                client
                    .send("ERR\tDEBUG, panel command not found".into())
                    .await?;
            }
            Some((ident, Some(command))) => match registry.get_mut(ident) {
                None => {
                    client
                        .send(Error::NoSuchPanel(ident.to_string()).to_err_line())
                        .await?;
                }
                Some(panel) => match panel.command(command).await {
                    Ok(response) => client.send(response).await?,
                    Err(e) => {
                        warn!(%ident, %e, "DEBUG command failed");
                        client.send(e.to_err_line()).await?;
                    }
                },
            },
        },

        "PING" => client.send("PONG".into()).await?,

        _ => debug!(%op, "Ignoring unknown SERV operation"),
    }

    client.send(ACK.to_string()).await?;
    Ok(())
}

/// Forward a command line to the addressed panel and relay its response,
/// closed off by a synthetic `ACK` (the device-level one was already
/// consumed inside the multi-line call).
async fn handle_panel_command(
    address: &str,
    rest: &str,
    client: &mut impl LineSink,
    registry: &mut Registry,
) -> Result<(), Error> {
    let Some(panel) = registry.get_mut(address) else {
        client
            .send(Error::NoSuchPanel(address.to_string()).to_err_line())
            .await?;
        return Ok(());
    };

    match panel.multiline_command(rest).await {
        Ok(lines) => {
            for line in lines {
                client.send(line).await?;
            }
            client.send(ACK.to_string()).await?;
        }
        Err(e) => {
            warn!(ident = %address, %e, "Panel command failed");
            client.send(e.to_err_line()).await?;
        }
    }

    Ok(())
}
