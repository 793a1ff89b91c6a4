#![allow(dead_code)]

use std::time::Duration;

use color_eyre::Result;
use futures::{SinkExt, StreamExt};
use panel_relay::{codec::LineCodec, config::Config, logging, server};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio_util::codec::{Decoder, Framed};
use tracing::Level;

pub type Client = Framed<TcpStream, LineCodec>;

/// Relay defaults, but with device waits short enough for test runs.
pub fn fast_config() -> Config {
    Config {
        boot_delay_ms: 10,
        init_delay_ms: 20,
        retry_delay_ms: 60,
        ..Default::default()
    }
}

pub async fn start_server() -> Result<u16> {
    start_server_with_config(fast_config()).await
}

pub async fn start_server_with_config(config: Config) -> Result<u16> {
    logging::init(Level::INFO, None).await;

    let (port_tx, port_rx) = oneshot::channel();

    tokio::spawn(async move { server::run_any_port(config, port_tx).await });

    Ok(port_rx.await?)
}

pub async fn connect(port: u16) -> Result<Client> {
    let stream = TcpStream::connect(("127.0.0.1", port)).await?;

    Ok(LineCodec::new().framed(stream))
}

pub async fn start_server_and_connect() -> Result<Client> {
    let port = start_server().await?;
    connect(port).await
}

pub async fn send(client: &mut Client, line: &str) -> Result<()> {
    client.send(line.to_string()).await?;

    Ok(())
}

pub async fn recv(client: &mut Client) -> Result<String> {
    let line = timeout(Duration::from_secs(5), client.next())
        .await?
        .expect("Connection should stay open")?;

    Ok(line)
}

/// Receive reply lines up to and excluding the terminating `ACK`.
pub async fn recv_until_ack(client: &mut Client) -> Result<Vec<String>> {
    let mut lines = Vec::new();

    loop {
        let line = recv(client).await?;

        if line == "ACK" {
            return Ok(lines);
        }

        lines.push(line);
    }
}

/// Assert that nothing arrives for `quiet`.
pub async fn assert_silence(client: &mut Client, quiet: Duration) {
    let got = timeout(quiet, client.next()).await;

    assert!(got.is_err(), "expected silence, got {got:?}");
}
