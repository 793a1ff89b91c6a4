use std::{io, string};

use thiserror::Error;

/// Any error this library might encounter.
///
/// None of these are fatal to the relay: the router turns them into
/// `ERR` replies, the event loop turns them into bookkeeping or a
/// broadcast notice.
#[derive(Debug, Error)]
pub enum Error {
    /// No panel is registered under this identity.
    #[error("Panel `{0}` is not found")]
    NoSuchPanel(String),

    /// A client line without an address/remainder separator.
    #[error("Malformed command: `{0}`")]
    Malformed(String),

    /// The device did not answer within the two-stage wait.
    #[error("TIMEOUT when calling `{command}` for {ident}")]
    Timeout {
        /// The command that went unanswered.
        command: String,
        /// Which panel was addressed.
        ident: String,
    },

    /// A multi-line response arrived without the terminating `ACK`.
    #[error("TIMEOUT missing ACK when calling `{command}` for {ident}")]
    MissingAck {
        /// The command whose response was unterminated.
        command: String,
        /// Which panel was addressed.
        ident: String,
    },

    /// The device on this port does not identify as a panel.
    #[error("{port} identifies as `{ident}` and not PANEL")]
    NotAPanel {
        /// The port that was probed.
        port: String,
        /// What it claimed to be.
        ident: String,
    },

    /// The panel's serial stream ended.
    #[error("Link to {0} closed")]
    LinkClosed(String),

    /// A readable panel link produced an empty line.
    #[error("{0} produced an empty event line")]
    EmptyEvent(String),

    /// Underlying IO problem.
    #[error("Underlying IO problem")]
    Io(#[from] io::Error),

    /// Serial port problem, opening or enumerating.
    ///
    /// `tokio_serial::Error` re-exports `serialport::Error`, so this one
    /// variant absorbs both enumeration and open failures.
    #[error("Serial port problem")]
    Serial(#[from] tokio_serial::Error),

    /// A received line was not valid UTF-8.
    #[error("Problem with UTF8 conversion")]
    Utf8(#[from] string::FromUtf8Error),
}

impl Error {
    /// The message to put after `ERR<TAB>` on the client wire.
    pub(crate) fn to_err_line(&self) -> String {
        format!("ERR\t{self}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enumeration_and_open_failures_share_one_variant() {
        let enumeration: Error =
            serialport::Error::new(serialport::ErrorKind::Unknown, "no bus").into();
        assert!(matches!(enumeration, Error::Serial(_)));

        let open: Error =
            tokio_serial::Error::new(tokio_serial::ErrorKind::NoDevice, "gone").into();
        assert!(matches!(open, Error::Serial(_)));
    }
}
