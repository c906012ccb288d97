//! WebSocket transport towards an upstream relay endpoint
//!
//! Inbound frames are hub envelopes (JSON); outbound commands are sent as
//! the viewer command JSON rather than wire text.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use gse_types::TransportKind;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::types::{Connector, Inbound, Link, LinkEnds, TransportError};

pub struct WebSocketConnector {
    url: String,
    connect_timeout: Duration,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            connect_timeout,
        }
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    fn kind(&self) -> TransportKind {
        TransportKind::WebSocket
    }

    async fn connect(&self) -> Result<Link, TransportError> {
        let (stream, _response) = tokio::time::timeout(self.connect_timeout, connect_async(self.url.as_str()))
            .await
            .map_err(|_| TransportError::Timeout(self.url.clone()))?
            .map_err(|e| TransportError::ConnectFailed {
                target: self.url.clone(),
                message: e.to_string(),
            })?;

        info!(url = %self.url, "WebSocket connected to relay endpoint");

        let (link, ends) = Link::pair(TransportKind::WebSocket);
        tokio::spawn(run_socket(self.url.clone(), stream, ends));
        Ok(link)
    }
}

async fn run_socket(url: String, stream: WebSocketStream<MaybeTlsStream<TcpStream>>, ends: LinkEnds) {
    let LinkEnds {
        inbound_tx,
        outbound_rx,
        cancel,
    } = ends;
    let (mut sink, mut source) = stream.split();

    let reason = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break None;
            }
            message = source.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    if inbound_tx.send(Inbound::Envelope(text)).is_err() {
                        break None;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break Some("closed by peer".to_string()),
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(url = %url, "WebSocket error: {}", e);
                    break Some(e.to_string());
                }
            },
            command = outbound_rx.recv_async() => match command {
                Ok(command) => match serde_json::to_string(&command) {
                    Ok(json) => {
                        if let Err(e) = sink.send(Message::Text(json)).await {
                            error!(url = %url, "Error sending WebSocket command: {}", e);
                            break Some(e.to_string());
                        }
                    }
                    Err(e) => error!("Failed to serialize command {}: {}", command.tag(), e),
                },
                Err(_) => break None,
            },
        }
    };

    debug!(url = %url, "WebSocket connection closed");
    let _ = inbound_tx.send(Inbound::Closed(reason));
}
