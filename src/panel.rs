use std::{
    pin::Pin,
    task::{Context, Poll},
    time::{Duration, Instant},
};

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::{io::DuplexStream, time::timeout};
use tokio_serial::SerialPortBuilderExt;
use tokio_util::codec::{Decoder, Framed};
use tracing::{info, trace, warn};

use crate::{codec::LineCodec, error::Error, mock};

/// The suffix a device's identity response must end with.
pub(crate) const IDENT_SUFFIX: &str = "PANEL";

/// Sentinel line terminating a multi-line response, on the device wire
/// and (synthetically) on the network wire.
pub(crate) const ACK: &str = "ACK";

/// The wait times governing device exchanges.
#[derive(Debug, Clone, Copy)]
pub struct Timing {
    /// How long to let the device dump boot/debug output when opening.
    pub boot_delay: Duration,

    /// How long to wait for the first response line.
    pub init_delay: Duration,

    /// How long to wait when retrying a silent device once.
    pub retry_delay: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            boot_delay: Duration::from_millis(1000),
            init_delay: Duration::from_millis(100),
            retry_delay: Duration::from_millis(1000),
        }
    }
}

/// The transport a panel session rides on.
///
/// Ports whose path starts with `mock:` get an in-memory scripted device,
/// anything else a real serial port at 115200 8N1.
pub(crate) enum Link {
    /// A real serial port.
    Serial(Framed<tokio_serial::SerialStream, LineCodec>),
    /// An in-memory device, see [`crate::mock`].
    Mock(Framed<DuplexStream, LineCodec>),
}

impl Link {
    fn open(port: &str) -> Result<Self, Error> {
        if let Some(name) = port.strip_prefix("mock:") {
            Ok(Link::Mock(LineCodec::new().framed(mock::spawn(name))))
        } else {
            let serial = tokio_serial::new(port, 115_200)
                .data_bits(tokio_serial::DataBits::Eight)
                .parity(tokio_serial::Parity::None)
                .stop_bits(tokio_serial::StopBits::One)
                .open_native_async()?;

            Ok(Link::Serial(LineCodec::new().framed(serial)))
        }
    }
}

impl Stream for Link {
    type Item = Result<String, Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.get_mut() {
            Link::Serial(framed) => Pin::new(framed).poll_next(cx),
            Link::Mock(framed) => Pin::new(framed).poll_next(cx),
        }
    }
}

impl Sink<String> for Link {
    type Error = Error;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        match self.get_mut() {
            Link::Serial(framed) => Pin::new(framed).poll_ready(cx),
            Link::Mock(framed) => Pin::new(framed).poll_ready(cx),
        }
    }

    fn start_send(self: Pin<&mut Self>, item: String) -> Result<(), Self::Error> {
        match self.get_mut() {
            Link::Serial(framed) => Pin::new(framed).start_send(item),
            Link::Mock(framed) => Pin::new(framed).start_send(item),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        match self.get_mut() {
            Link::Serial(framed) => Pin::new(framed).poll_flush(cx),
            Link::Mock(framed) => Pin::new(framed).poll_flush(cx),
        }
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        match self.get_mut() {
            Link::Serial(framed) => Pin::new(framed).poll_close(cx),
            Link::Mock(framed) => Pin::new(framed).poll_close(cx),
        }
    }
}

/// One open serial session to a smart panel device.
///
/// A value of this type is always fully open: the link is established, the
/// identity assigned, the contact timestamp set. [`Panel::open`] is the
/// only constructor and [`Panel::close`] consumes the panel.
pub struct Panel {
    port: String,
    ident: String,
    link: Link,
    last_contact: Instant,
    timing: Timing,
}

/// Wait for one response line.
///
/// Short probe first, then one longer retry for slow devices; still
/// nothing means the device timed out. Empty lines count as silence,
/// matching devices which pad their output.
async fn read_line_two_stage(
    link: &mut Link,
    label: &str,
    command: &str,
    timing: &Timing,
) -> Result<String, Error> {
    for wait in [timing.init_delay, timing.retry_delay] {
        match timeout(wait, link.next()).await {
            Ok(Some(Ok(line))) if !line.is_empty() => return Ok(line),
            Ok(Some(Ok(_empty))) => continue,
            Ok(Some(Err(e))) => return Err(e),
            Ok(None) => return Err(Error::LinkClosed(label.to_string())),
            Err(_elapsed) => continue,
        }
    }

    Err(Error::Timeout {
        command: command.to_string(),
        ident: label.to_string(),
    })
}

/// Write a command and wait for its single-line response.
async fn exchange(
    link: &mut Link,
    label: &str,
    command: &str,
    timing: &Timing,
) -> Result<String, Error> {
    link.send(command.to_string()).await?;
    read_line_two_stage(link, label, command, timing).await
}

/// Discard whatever the device has buffered until its output goes quiet.
async fn drain(link: &mut Link, label: &str, gap: Duration) -> Result<(), Error> {
    loop {
        match timeout(gap, link.next()).await {
            Ok(Some(Ok(line))) => trace!(%line, "Discarding boot noise"),
            // Boot noise is often binary garbage; not our problem.
            Ok(Some(Err(_))) => {}
            Ok(None) => return Err(Error::LinkClosed(label.to_string())),
            Err(_elapsed) => return Ok(()),
        }
    }
}

impl Panel {
    /// Open a serial session on `port` and establish the device identity.
    ///
    /// Boot/debug noise is discarded first, then the device is asked to
    /// identify itself; a response not ending in `PANEL` closes the
    /// session and fails without registering anything.
    pub async fn open(port: &str, timing: Timing) -> Result<Self, Error> {
        let link = Link::open(port)?;
        Self::open_link(link, port, timing).await
    }

    async fn open_link(mut link: Link, port: &str, timing: Timing) -> Result<Self, Error> {
        tokio::time::sleep(timing.boot_delay).await;
        drain(&mut link, port, timing.init_delay).await?;
        tokio::time::sleep(timing.init_delay).await;

        let ident = match exchange(&mut link, port, "IDENT", &timing).await {
            Ok(ident) => ident,
            Err(e) => {
                let _ = link.close().await;
                return Err(e);
            }
        };

        if !ident.ends_with(IDENT_SUFFIX) {
            let _ = link.close().await;
            return Err(Error::NotAPanel {
                port: port.to_string(),
                ident,
            });
        }

        info!(%ident, %port, "Panel open");

        Ok(Self {
            port: port.to_string(),
            ident,
            link,
            last_contact: Instant::now(),
            timing,
        })
    }

    /// The identity the device reported when opened.
    pub fn ident(&self) -> &str {
        &self.ident
    }

    /// The port this session was opened on.
    pub fn port(&self) -> &str {
        &self.port
    }

    /// Send a command and return its single-line result.
    pub async fn command(&mut self, command: &str) -> Result<String, Error> {
        let response = exchange(&mut self.link, &self.ident, command, &self.timing).await?;
        self.note_contact();
        Ok(response)
    }

    /// Send a command and return its multi-line result.
    ///
    /// The response must be terminated by an `ACK` line, which is
    /// stripped before the lines are returned.
    pub async fn multiline_command(&mut self, command: &str) -> Result<Vec<String>, Error> {
        self.link.send(command.to_string()).await?;

        let first = read_line_two_stage(&mut self.link, &self.ident, command, &self.timing).await?;

        let mut lines = vec![first];

        // Subsequent lines of one response follow closely; stop at the
        // sentinel so unsolicited events stay in the stream.
        while lines.last().map(String::as_str) != Some(ACK) {
            match timeout(self.timing.init_delay, self.link.next()).await {
                Ok(Some(Ok(line))) => lines.push(line),
                Ok(Some(Err(e))) => return Err(e),
                Ok(None) => return Err(Error::LinkClosed(self.ident.clone())),
                Err(_elapsed) => break,
            }
        }

        if lines.last().map(String::as_str) != Some(ACK) {
            return Err(Error::MissingAck {
                command: command.to_string(),
                ident: self.ident.clone(),
            });
        }
        lines.pop();

        self.note_contact();
        Ok(lines)
    }

    /// Poll for one unsolicited line from the device.
    pub(crate) fn poll_event(&mut self, cx: &mut Context<'_>) -> Poll<Result<String, Error>> {
        match Pin::new(&mut self.link).poll_next(cx) {
            Poll::Ready(Some(Ok(line))) => {
                self.note_contact();
                Poll::Ready(Ok(line))
            }
            Poll::Ready(Some(Err(e))) => Poll::Ready(Err(e)),
            Poll::Ready(None) => Poll::Ready(Err(Error::LinkClosed(self.ident.clone()))),
            Poll::Pending => Poll::Pending,
        }
    }

    /// Read one unsolicited line from the device.
    ///
    /// Meant for a link which readiness polling already reported readable.
    pub async fn read_event(&mut self) -> Result<String, Error> {
        futures::future::poll_fn(|cx| self.poll_event(cx)).await
    }

    /// Check that the device is responsive.
    ///
    /// A reply other than `PONG` is a logged warning, not a failure; a
    /// timeout propagates.
    pub async fn ping(&mut self) -> Result<(), Error> {
        let response = self.command("PING").await?;

        if response != "PONG" {
            warn!(ident = %self.ident, %response, "Ping got an unexpected reply");
        }

        Ok(())
    }

    /// Whether the device has gone uncontacted longer than `interval`.
    pub fn is_stale(&self, interval: Duration) -> bool {
        self.last_contact.elapsed() > interval
    }

    /// Refresh the last-contact timestamp.
    pub(crate) fn note_contact(&mut self) {
        self.last_contact = Instant::now();
    }

    /// Close the session. The panel cannot be used afterwards.
    pub async fn close(self) {
        let mut link = self.link;
        let _ = link.close().await;
        info!(ident = %self.ident, port = %self.port, "Panel closed");
    }
}

impl std::fmt::Debug for Panel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Panel")
            .field("port", &self.port)
            .field("ident", &self.ident)
            .field("last_contact", &self.last_contact)
            .finish()
    }
}
