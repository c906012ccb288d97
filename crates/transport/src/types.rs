//! Common types and traits for transports

use async_trait::async_trait;
use gse_types::{Command, TransportKind};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Errors that can occur while opening or using a transport
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    /// The tier cannot be used at all (no device, no URL configured)
    #[error("{0} transport unavailable: {1}")]
    Unavailable(TransportKind, String),
    /// Connecting or opening the device failed
    #[error("connection to {target} failed: {message}")]
    ConnectFailed { target: String, message: String },
    /// The connect attempt did not finish in time
    #[error("timed out connecting to {0}")]
    Timeout(String),
    /// I/O error
    #[error("I/O error: {0}")]
    Io(String),
    /// The link was torn down
    #[error("link is closed")]
    Closed,
    /// Every tier failed and no fallback is configured
    #[error("all transport tiers exhausted")]
    Exhausted,
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::Io(err.to_string())
    }
}

impl From<serialport::Error> for TransportError {
    fn from(err: serialport::Error) -> Self {
        TransportError::Io(err.to_string())
    }
}

/// Something received from the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Raw `TYPE:VALUE` text. May hold several lines or end mid-line.
    Chunk(String),
    /// A JSON envelope from an upstream hub.
    Envelope(String),
    /// The transport went away. Carries the failure when there was one.
    Closed(Option<String>),
}

/// Relay-side handle to an open transport.
///
/// Dropping the link cancels the transport's background tasks and releases
/// the underlying socket or device.
pub struct Link {
    kind: TransportKind,
    inbound: flume::Receiver<Inbound>,
    outbound: flume::Sender<Command>,
    cancel: CancellationToken,
}

/// Transport-side ends of a [`Link`], owned by the connector's I/O task.
pub struct LinkEnds {
    pub inbound_tx: flume::Sender<Inbound>,
    pub outbound_rx: flume::Receiver<Command>,
    pub cancel: CancellationToken,
}

impl Link {
    /// Creates a link together with the ends a connector drives.
    pub fn pair(kind: TransportKind) -> (Link, LinkEnds) {
        let (inbound_tx, inbound) = flume::unbounded();
        let (outbound, outbound_rx) = flume::unbounded();
        let cancel = CancellationToken::new();
        let link = Link {
            kind,
            inbound,
            outbound,
            cancel: cancel.clone(),
        };
        let ends = LinkEnds {
            inbound_tx,
            outbound_rx,
            cancel,
        };
        (link, ends)
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    pub fn inbound(&self) -> &flume::Receiver<Inbound> {
        &self.inbound
    }

    /// Hands a command to the transport's writer. When the transport has
    /// already shut down the command is given back untouched.
    pub fn send(&self, command: Command) -> Result<(), Command> {
        if self.cancel.is_cancelled() {
            return Err(command);
        }
        self.outbound.send(command).map_err(|e| e.into_inner())
    }

    /// Tears the transport down.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.outbound.is_disconnected()
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("kind", &self.kind)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// A transport tier the selector can try.
#[async_trait]
pub trait Connector: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Opens the transport and spawns its I/O task.
    async fn connect(&self) -> Result<Link, TransportError>;
}
