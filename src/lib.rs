#![deny(missing_docs)]
#![doc = include_str!("../README.md")]

/// Code relating to setting up the server which accepts clients and owns
/// the panel sessions.
pub mod server;

/// Network clients and the line-sending seam.
pub(crate) mod client;

/// The command line interface.
pub mod cli;

/// One serial session to a smart panel device.
pub mod panel;

/// The live mapping from panel identity to open panel.
pub(crate) mod registry;

/// Dispatch of one inbound client line.
pub(crate) mod router;

/// Periodic panel liveness checks.
pub(crate) mod health;

/// Enumeration of candidate serial devices.
pub(crate) mod discovery;

/// Mocked panel device driver.
pub(crate) mod mock;

/// Newline framing shared by the network and device sides.
pub mod codec;

/// Relates to config files.
pub mod config;

/// Possible errors in this library.
pub mod error;

/// Logging/tracing setup.
pub mod logging;
