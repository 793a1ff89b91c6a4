use color_eyre::Result;
use pretty_assertions::assert_eq;

use common::{recv, send, start_server_and_connect};

mod common;

#[tokio::test]
async fn can_connect() -> Result<()> {
    start_server_and_connect().await?;

    Ok(())
}

#[tokio::test]
async fn serv_ping_pongs() -> Result<()> {
    let mut client = start_server_and_connect().await?;

    send(&mut client, "SERV PING").await?;

    assert_eq!(recv(&mut client).await?, "PONG");
    assert_eq!(recv(&mut client).await?, "ACK");

    Ok(())
}

#[tokio::test]
async fn malformed_line_gets_err_and_connection_survives() -> Result<()> {
    let mut client = start_server_and_connect().await?;

    send(&mut client, "NONSENSE").await?;
    assert!(recv(&mut client).await?.starts_with("ERR\t"));

    // The same connection keeps working.
    send(&mut client, "SERV PING").await?;
    assert_eq!(recv(&mut client).await?, "PONG");
    assert_eq!(recv(&mut client).await?, "ACK");

    Ok(())
}

#[tokio::test]
async fn unknown_address_is_err() -> Result<()> {
    let mut client = start_server_and_connect().await?;

    send(&mut client, "GHOST_PANEL STATUS").await?;

    assert_eq!(
        recv(&mut client).await?,
        "ERR\tPanel `GHOST_PANEL` is not found"
    );

    Ok(())
}

#[tokio::test]
async fn unknown_serv_op_still_acks() -> Result<()> {
    let mut client = start_server_and_connect().await?;

    send(&mut client, "SERV FROBNICATE now").await?;

    assert_eq!(recv(&mut client).await?, "ACK");

    Ok(())
}

#[tokio::test]
async fn list_and_openall_always_end_with_ack() -> Result<()> {
    let mut client = start_server_and_connect().await?;

    // No panel hardware is assumed here; both ops must still close off
    // their (possibly empty) replies with ACK.
    send(&mut client, "SERV LIST").await?;
    common::recv_until_ack(&mut client).await?;

    send(&mut client, "SERV OPENALL").await?;
    common::recv_until_ack(&mut client).await?;

    Ok(())
}

#[tokio::test]
async fn two_clients_are_served_independently() -> Result<()> {
    let port = common::start_server().await?;

    let mut a = common::connect(port).await?;
    let mut b = common::connect(port).await?;

    send(&mut a, "SERV PING").await?;
    send(&mut b, "SERV PING").await?;

    assert_eq!(recv(&mut a).await?, "PONG");
    assert_eq!(recv(&mut a).await?, "ACK");
    assert_eq!(recv(&mut b).await?, "PONG");
    assert_eq!(recv(&mut b).await?, "ACK");

    Ok(())
}
