//! Owns the relay session: connection lifecycle, heartbeat, retry and the
//! command backlog.
//!
//! All session state lives inside [`RelaySupervisor::run`]. Everything else
//! talks to it through a cloneable [`RelayHandle`].

use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use gse_transport::{Inbound, Link, TransportError, TransportSelector};
use gse_types::{Command, ConnectionState, ConnectionStatus, HubMessage, TelemetryEvent};
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{interval_at, sleep, Instant, Interval, MissedTickBehavior, Sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::dispatcher::CommandDispatcher;
use crate::parser::{parse, LineAssembler};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub heartbeat_interval_ms: u64,
    pub retry_interval_ms: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 5000,
            retry_interval_ms: 5000,
        }
    }
}

impl SupervisorConfig {
    fn heartbeat_period(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.max(1))
    }

    fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms.max(1))
    }
}

enum Request {
    Submit {
        command: Command,
        reply: oneshot::Sender<bool>,
    },
    Status {
        reply: oneshot::Sender<ConnectionStatus>,
    },
    Subscribe(flume::Sender<TelemetryEvent>),
}

/// Cloneable access to a running [`RelaySupervisor`].
#[derive(Clone)]
pub struct RelayHandle {
    requests: flume::Sender<Request>,
    state: watch::Receiver<ConnectionState>,
}

impl RelayHandle {
    /// Sends `command` now if a transport is attached, otherwise queues it.
    ///
    /// Returns `true` only when the command went straight to the transport.
    pub async fn submit(&self, command: Command) -> bool {
        let (reply, rx) = oneshot::channel();
        let tag = command.tag().to_string();
        if self
            .requests
            .send_async(Request::Submit { command, reply })
            .await
            .is_err()
        {
            warn!(command = %tag, "Relay supervisor is gone, dropping command");
            return false;
        }
        rx.await.unwrap_or(false)
    }

    pub async fn status(&self) -> ConnectionStatus {
        let (reply, rx) = oneshot::channel();
        if self.requests.send_async(Request::Status { reply }).await.is_ok() {
            if let Ok(status) = rx.await {
                return status;
            }
        }
        ConnectionStatus::from_state(ConnectionState::Disconnected, 0)
    }

    /// Returns a stream of every event parsed from the transport from now on.
    pub fn subscribe(&self) -> flume::Receiver<TelemetryEvent> {
        let (tx, rx) = flume::unbounded();
        if self.requests.send(Request::Subscribe(tx)).is_err() {
            warn!("Relay supervisor is gone, subscription will never yield");
        }
        rx
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub async fn open_valve(&self, name: impl Into<String>) -> bool {
        self.submit(Command::open_valve(name)).await
    }

    pub async fn close_valve(&self, name: impl Into<String>) -> bool {
        self.submit(Command::close_valve(name)).await
    }

    pub async fn set_servo_position(&self, name: impl Into<String>, position: f64) -> bool {
        self.submit(Command::set_servo_position(name, position)).await
    }

    pub async fn emergency_stop(&self) -> bool {
        self.submit(Command::emergency_stop()).await
    }

    pub async fn set_mission_status(&self, status: impl Into<String>) -> bool {
        self.submit(Command::mission_status(status)).await
    }
}

type Attempt = JoinHandle<Result<Link, TransportError>>;

/// The single relay session of the process.
pub struct RelaySupervisor {
    selector: Arc<TransportSelector>,
    config: SupervisorConfig,
    requests: flume::Receiver<Request>,
    state: watch::Sender<ConnectionState>,
    link: Option<Link>,
    attempt: Option<Attempt>,
    heartbeat: Option<Interval>,
    retry: Option<Pin<Box<Sleep>>>,
    dispatcher: CommandDispatcher,
    assembler: LineAssembler,
    subscribers: Vec<flume::Sender<TelemetryEvent>>,
    last_heartbeat_ack: Option<i64>,
}

impl RelaySupervisor {
    pub fn new(selector: Arc<TransportSelector>, config: SupervisorConfig) -> (Self, RelayHandle) {
        let (requests_tx, requests) = flume::unbounded();
        let (state, state_rx) = watch::channel(ConnectionState::Disconnected);
        let supervisor = Self {
            selector,
            config,
            requests,
            state,
            link: None,
            attempt: None,
            heartbeat: None,
            retry: None,
            dispatcher: CommandDispatcher::new(),
            assembler: LineAssembler::default(),
            subscribers: Vec::new(),
            last_heartbeat_ack: None,
        };
        let handle = RelayHandle {
            requests: requests_tx,
            state: state_rx,
        };
        (supervisor, handle)
    }

    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("Relay supervisor is running.");
        self.begin_attempt(ConnectionState::Connecting);
        let mut requests_open = true;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Relay supervisor received shutdown signal.");
                    break;
                }
                request = self.requests.recv_async(), if requests_open => {
                    match request {
                        Ok(request) => self.handle_request(request),
                        Err(_) => {
                            debug!("All relay handles dropped");
                            requests_open = false;
                        }
                    }
                }
                result = wait_attempt(&mut self.attempt) => {
                    self.attempt = None;
                    self.finish_attempt(result);
                }
                inbound = recv_inbound(self.link.as_ref()) => {
                    self.handle_inbound(inbound);
                }
                _ = tick(&mut self.heartbeat) => {
                    self.send_heartbeat();
                }
                _ = expire(&mut self.retry) => {
                    self.retry = None;
                    self.begin_attempt(ConnectionState::Reconnecting);
                }
            }
        }

        self.shutdown();
        info!("Relay supervisor has shut down.");
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = ?previous, to = ?state, "Connection state changed");
        }
    }

    fn begin_attempt(&mut self, state: ConnectionState) {
        if self.link.is_some() || self.attempt.is_some() {
            return;
        }
        self.set_state(state);
        let selector = Arc::clone(&self.selector);
        self.attempt = Some(tokio::spawn(async move { selector.connect().await }));
    }

    fn finish_attempt(&mut self, result: Result<Result<Link, TransportError>, JoinError>) {
        match result {
            Ok(Ok(link)) => self.attach(link),
            Ok(Err(e)) => {
                warn!("Connection attempt failed: {}", e);
                self.set_state(ConnectionState::Disconnected);
                self.schedule_retry();
            }
            Err(e) => {
                error!("Connection attempt panicked: {}", e);
                self.set_state(ConnectionState::Disconnected);
                self.schedule_retry();
            }
        }
    }

    fn attach(&mut self, link: Link) {
        let kind = link.kind();
        self.retry = None;
        self.assembler = LineAssembler::default();

        let period = self.config.heartbeat_period();
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.heartbeat = Some(heartbeat);

        let link = self.link.insert(link);
        if !self.dispatcher.is_empty() {
            self.dispatcher.drain(link);
        }
        info!(kind = %kind, "Transport connected");
        self.set_state(ConnectionState::Connected(kind));
    }

    /// Arms the retry timer unless one is already pending.
    fn schedule_retry(&mut self) {
        if self.retry.is_some() {
            return;
        }
        let delay = self.config.retry_delay();
        info!("Retrying connection in {:?}", delay);
        self.retry = Some(Box::pin(sleep(delay)));
    }

    fn handle_request(&mut self, request: Request) {
        match request {
            Request::Submit { command, reply } => {
                let sent = self.dispatcher.submit(command, self.link.as_ref());
                let _ = reply.send(sent);
            }
            Request::Status { reply } => {
                let state = *self.state.borrow();
                let _ = reply.send(ConnectionStatus::from_state(state, self.dispatcher.len()));
            }
            Request::Subscribe(tx) => self.subscribers.push(tx),
        }
    }

    fn handle_inbound(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::Chunk(text) => {
                if let Some(lines) = self.assembler.push(&text) {
                    self.publish_all(parse(&lines));
                }
            }
            Inbound::Envelope(text) => match HubMessage::from_json(&text) {
                Ok(HubMessage::Telemetry(event)) => self.publish(event),
                Ok(HubMessage::Init(snapshot)) => {
                    debug!("Received initial snapshot from upstream hub");
                    self.publish_all(snapshot.to_events(Utc::now()));
                }
                Ok(HubMessage::HeartbeatResponse { timestamp }) => {
                    self.last_heartbeat_ack = Some(timestamp);
                    debug!(timestamp, "Upstream acknowledged heartbeat");
                }
                Err(e) => warn!("Dropping malformed upstream message: {}", e),
            },
            Inbound::Closed(reason) => self.detach(reason),
        }
    }

    fn detach(&mut self, reason: Option<String>) {
        let Some(link) = self.link.take() else {
            return;
        };
        match reason {
            Some(reason) => warn!(kind = %link.kind(), "Transport lost: {}", reason),
            None => info!(kind = %link.kind(), "Transport closed"),
        }
        drop(link);
        self.heartbeat = None;
        if let Some(rest) = self.assembler.flush() {
            self.publish_all(parse(&rest));
        }
        self.set_state(ConnectionState::Disconnected);
        self.schedule_retry();
    }

    fn send_heartbeat(&mut self) {
        let Some(link) = &self.link else {
            return;
        };
        if link.send(Command::heartbeat()).is_err() {
            debug!("Heartbeat not sent, transport already closed");
        }
    }

    fn publish(&mut self, event: TelemetryEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn publish_all(&mut self, events: Vec<TelemetryEvent>) {
        for event in events {
            self.publish(event);
        }
    }

    fn shutdown(&mut self) {
        if let Some(attempt) = self.attempt.take() {
            attempt.abort();
        }
        self.retry = None;
        self.heartbeat = None;
        if let Some(link) = self.link.take() {
            link.close();
        }
        if !self.dispatcher.is_empty() {
            warn!(dropped = self.dispatcher.len(), "Shutting down with queued commands");
        }
        if let Some(ts) = self.last_heartbeat_ack {
            debug!(last_heartbeat_ack = ts, "Last upstream heartbeat acknowledgement");
        }
        self.set_state(ConnectionState::Disconnected);
    }
}

async fn wait_attempt(attempt: &mut Option<Attempt>) -> Result<Result<Link, TransportError>, JoinError> {
    match attempt {
        Some(handle) => handle.await,
        None => pending().await,
    }
}

async fn recv_inbound(link: Option<&Link>) -> Inbound {
    match link {
        Some(link) => link
            .inbound()
            .recv_async()
            .await
            .unwrap_or_else(|_| Inbound::Closed(Some("transport task ended".to_string()))),
        None => pending().await,
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending().await,
    }
}

async fn expire(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(timer) => timer.as_mut().await,
        None => pending().await,
    }
}
