//! Relay transport
//!
//! One logical connection to the bridge. A single worker task owns the
//! sockets, the offline queue and the subscription list; [`RelayTransport`]
//! handles only push commands to it, so socket writes never race.
//!
//! While a socket is not open, outbound frames are queued and a socket is
//! created. When a socket opens it replaces the previous one, the configured
//! subscriptions are queued behind pending frames and the queue is flushed in
//! insertion order. Unexpected closes are retried according to
//! [`RetryPolicy`].

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use url::Url;

use crate::constants::{PROTOCOL, VERSION};
use crate::error::{Error, Result};
use crate::socket::{SocketConnector, SocketEvent, SocketHandle};
use crate::types::{SocketMessage, SocketMessageType};
use crate::utils::websocket_url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
    /// `None` retries forever
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_attempts: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub url: String,
    pub protocol: String,
    pub version: u32,
    pub env: String,
    pub subscriptions: Vec<String>,
    pub retry: RetryPolicy,
}

impl TransportOptions {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            protocol: PROTOCOL.to_string(),
            version: VERSION,
            env: std::env::consts::OS.to_string(),
            subscriptions: vec![],
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_subscriptions(mut self, subscriptions: Vec<String>) -> Self {
        self.subscriptions = subscriptions;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Open,
    Close,
    Error(String),
    Message(SocketMessage),
}

#[derive(Debug)]
enum Command {
    Send(SocketMessage),
    Subscribe(String),
    ReplaceSubscriptions(Vec<String>),
    Open,
    Close,
    Online,
}

#[derive(Debug, Clone)]
pub struct RelayTransport {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<TransportState>,
}

impl RelayTransport {
    /// Spawns the transport worker on the current tokio runtime. Nothing is
    /// connected until [`RelayTransport::open`] or the first send.
    pub fn spawn(
        options: TransportOptions,
        socket: Arc<dyn SocketConnector>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<TransportEvent>)> {
        let url = websocket_url(
            &options.url,
            &options.protocol,
            options.version,
            &options.env,
        )?;

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(TransportState::Disconnected);

        let worker = Worker {
            url,
            socket,
            retry: options.retry,
            commands: commands_rx,
            events: events_tx,
            state: state_tx,
            active: None,
            next: None,
            queue: VecDeque::new(),
            subscriptions: options.subscriptions,
            topics: vec![],
            reconnect_at: None,
            attempts: 0,
        };
        tokio::spawn(worker.run());

        Ok((
            Self {
                commands: commands_tx,
                state: state_rx,
            },
            events_rx,
        ))
    }

    pub fn state(&self) -> TransportState {
        *self.state.borrow()
    }

    pub fn open(&self) {
        self.command(Command::Open);
    }

    /// Closes the socket without scheduling a reconnect. A later send opens
    /// a new one.
    pub fn close(&self) {
        self.command(Command::Close);
    }

    /// Publishes `payload` on `topic`. Never fails for transport reasons:
    /// while offline the frame is queued.
    pub fn send(&self, payload: String, topic: &str, silent: bool) -> Result<()> {
        if topic.is_empty() {
            return Err(Error::InvalidTopic);
        }
        self.command(Command::Send(SocketMessage::publish(
            topic, payload, silent,
        )));
        Ok(())
    }

    pub fn subscribe(&self, topic: &str) -> Result<()> {
        if topic.is_empty() {
            return Err(Error::InvalidTopic);
        }
        self.command(Command::Subscribe(topic.to_string()));
        Ok(())
    }

    /// Forgets every topic subscribed so far. Later reconnects subscribe to
    /// `topics` only.
    pub fn replace_subscriptions(&self, topics: Vec<String>) {
        self.command(Command::ReplaceSubscriptions(topics));
    }

    /// Network came back online, connect eagerly.
    pub fn notify_online(&self) {
        self.command(Command::Online);
    }

    fn command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            log::warn!("relay transport worker is gone");
        }
    }
}

struct Worker {
    url: Url,
    socket: Arc<dyn SocketConnector>,
    retry: RetryPolicy,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<TransportEvent>,
    state: watch::Sender<TransportState>,
    active: Option<SocketHandle>,
    next: Option<SocketHandle>,
    queue: VecDeque<SocketMessage>,
    subscriptions: Vec<String>,
    topics: Vec<String>,
    reconnect_at: Option<Instant>,
    attempts: u32,
}

impl Worker {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                event = next_event(&mut self.active) => {
                    self.on_active_event(event)
                }
                event = next_event(&mut self.next) => self.on_next_event(event),
                _ = wait_until(self.reconnect_at) => {
                    self.reconnect_at = None;
                    self.create_socket();
                }
            }
        }
        log::debug!("relay transport stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Send(message) => self.send_frame(message),
            Command::Subscribe(topic) => {
                if !self.topics.contains(&topic) {
                    self.topics.push(topic.clone());
                }
                self.send_frame(SocketMessage::subscribe(&topic));
            }
            Command::ReplaceSubscriptions(topics) => {
                self.subscriptions = topics;
                self.topics.clear();
            }
            Command::Open => {
                if self.active.is_none() {
                    self.create_socket();
                }
            }
            Command::Close => self.close(),
            Command::Online => self.create_socket(),
        }
    }

    fn send_frame(&mut self, message: SocketMessage) {
        let text = match serde_json::to_string(&message) {
            Ok(text) => text,
            Err(e) => {
                log::warn!("failed to serialize socket message: {e}");
                return;
            }
        };

        let delivered = match &self.active {
            Some(socket) => socket.outbound.send(text).is_ok(),
            None => false,
        };
        if delivered {
            log::trace!("sent {:?} frame on {}", message.kind, message.topic);
            return;
        }

        if self.active.take().is_some() {
            log::warn!("active socket went away, queueing frame");
            self.set_state(TransportState::Disconnected);
        }
        self.queue.push_back(message);
        self.create_socket();
    }

    fn create_socket(&mut self) {
        if self.next.is_some() {
            return;
        }
        log::debug!("opening socket to {}", self.url);
        self.reconnect_at = None;
        self.next = Some(self.socket.connect(&self.url));
        if self.active.is_none() {
            self.set_state(TransportState::Connecting);
        }
    }

    fn on_next_event(&mut self, event: SocketEvent) {
        match event {
            SocketEvent::Open => self.promote_next(),
            SocketEvent::Error(e) => self.emit(TransportEvent::Error(e)),
            SocketEvent::Closed => {
                self.next = None;
                if self.active.is_none() {
                    self.set_state(TransportState::Disconnected);
                }
                self.schedule_reconnect();
            }
            SocketEvent::Text(_) => {}
        }
    }

    fn on_active_event(&mut self, event: SocketEvent) {
        match event {
            SocketEvent::Text(text) => self.on_receive(&text),
            SocketEvent::Error(e) => self.emit(TransportEvent::Error(e)),
            SocketEvent::Closed => {
                log::debug!("socket closed unexpectedly");
                self.active = None;
                if self.next.is_none() {
                    self.set_state(TransportState::Disconnected);
                }
                self.emit(TransportEvent::Close);
                self.schedule_reconnect();
            }
            SocketEvent::Open => {}
        }
    }

    fn promote_next(&mut self) {
        // dropping the previous handle closes it without a reconnect
        self.active = self.next.take();
        self.attempts = 0;
        self.set_state(TransportState::Connected);
        log::debug!("socket open, flushing {} queued frames", self.queue.len());

        let topics: Vec<String> = self
            .subscriptions
            .iter()
            .chain(self.topics.iter())
            .cloned()
            .collect();
        for topic in topics {
            let already_queued = self.queue.iter().any(|m| {
                m.kind == SocketMessageType::Sub && m.topic == topic
            });
            if !already_queued {
                self.queue.push_back(SocketMessage::subscribe(&topic));
            }
        }

        let pending = std::mem::take(&mut self.queue);
        for message in pending {
            self.send_frame(message);
        }

        self.emit(TransportEvent::Open);
    }

    fn on_receive(&mut self, text: &str) {
        let message = match serde_json::from_str::<SocketMessage>(text) {
            Ok(message) => message,
            Err(e) => {
                log::debug!("ignoring malformed socket frame: {e}");
                return;
            }
        };

        // ack on receipt, before anyone looks at the payload
        self.send_frame(SocketMessage::ack(&message.topic));
        self.emit(TransportEvent::Message(message));
    }

    fn schedule_reconnect(&mut self) {
        if let Some(max) = self.retry.max_attempts {
            if self.attempts >= max {
                log::warn!("giving up reconnecting after {max} attempts");
                self.emit(TransportEvent::Error(
                    "reconnect attempts exhausted".to_string(),
                ));
                return;
            }
        }
        self.attempts += 1;
        log::info!(
            "reconnecting in {:?} (attempt {})",
            self.retry.interval,
            self.attempts
        );
        self.reconnect_at = Some(Instant::now() + self.retry.interval);
    }

    fn close(&mut self) {
        self.reconnect_at = None;
        self.next = None;
        if self.active.take().is_some() {
            log::debug!("socket closed");
        }
        self.set_state(TransportState::Disconnected);
    }

    fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    fn set_state(&self, state: TransportState) {
        self.state.send_replace(state);
    }
}

async fn next_event(socket: &mut Option<SocketHandle>) -> SocketEvent {
    match socket {
        Some(socket) => {
            socket.inbound.recv().await.unwrap_or(SocketEvent::Closed)
        }
        None => std::future::pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::mock::{MockConnector, MockSocket};

    fn spawn_transport(
        options: TransportOptions,
    ) -> (
        RelayTransport,
        mpsc::UnboundedReceiver<TransportEvent>,
        mpsc::UnboundedReceiver<MockSocket>,
    ) {
        let _ = env_logger::builder().is_test(true).try_init();
        let (connector, sockets) = MockConnector::new();
        let (transport, events) = RelayTransport::spawn(options, Arc::new(connector)).unwrap();
        (transport, events, sockets)
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("condition not reached");
    }

    #[tokio::test]
    async fn test_queue_flushes_in_order() {
        let (transport, mut events, mut sockets) =
            spawn_transport(TransportOptions::new("https://bridge.example"));

        transport.send("m1".to_string(), "topic", false).unwrap();
        transport.send("m2".to_string(), "topic", false).unwrap();
        transport.send("m3".to_string(), "topic", true).unwrap();

        let mut socket = sockets.recv().await.unwrap();
        assert_eq!(socket.url.scheme(), "wss");
        let query = socket.url.query().unwrap();
        assert!(query.contains("protocol=wc"));
        assert!(query.contains("version=1"));
        assert!(query.contains("env="));

        socket.open();
        for payload in ["m1", "m2", "m3"] {
            let frame = socket.next_frame().await;
            assert_eq!(frame.kind, SocketMessageType::Pub);
            assert_eq!(frame.topic, "topic");
            assert_eq!(frame.payload, payload);
        }
        assert_eq!(events.recv().await, Some(TransportEvent::Open));
        assert_eq!(transport.state(), TransportState::Connected);

        // only one socket was created for the three sends
        assert!(sockets.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_ack_before_dispatch() {
        let (transport, mut events, mut sockets) =
            spawn_transport(TransportOptions::new("https://bridge.example"));
        transport.open();

        let mut socket = sockets.recv().await.unwrap();
        socket.open();
        assert_eq!(events.recv().await, Some(TransportEvent::Open));

        socket.deliver_raw("not json");
        let inbound = SocketMessage::publish("topic-a", "{}".to_string(), false);
        socket.deliver(&inbound);

        let ack = socket.next_frame().await;
        assert_eq!(ack, SocketMessage::ack("topic-a"));
        assert_eq!(events.recv().await, Some(TransportEvent::Message(inbound)));
        assert!(socket.try_next_frame().is_none());
    }

    #[tokio::test]
    async fn test_subscriptions_sent_after_queue() {
        let (transport, _events, mut sockets) = spawn_transport(
            TransportOptions::new("https://bridge.example")
                .with_subscriptions(vec!["client".to_string()]),
        );

        transport.send("m1".to_string(), "peer", false).unwrap();
        transport.subscribe("handshake").unwrap();

        let mut socket = sockets.recv().await.unwrap();
        socket.open();

        assert_eq!(socket.next_frame().await.payload, "m1");
        assert_eq!(
            socket.next_frame().await,
            SocketMessage::subscribe("handshake")
        );
        assert_eq!(socket.next_frame().await, SocketMessage::subscribe("client"));
        assert!(socket.try_next_frame().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_interval() {
        let (transport, mut events, mut sockets) = spawn_transport(
            TransportOptions::new("https://bridge.example")
                .with_subscriptions(vec!["client".to_string()]),
        );
        transport.subscribe("handshake").unwrap();

        let mut first = sockets.recv().await.unwrap();
        first.open();
        assert_eq!(first.next_frame().await, SocketMessage::subscribe("handshake"));
        assert_eq!(first.next_frame().await, SocketMessage::subscribe("client"));

        let closed_at = Instant::now();
        first.close();

        let mut second = sockets.recv().await.unwrap();
        assert!(closed_at.elapsed() >= Duration::from_secs(1));

        second.open();
        assert_eq!(second.next_frame().await, SocketMessage::subscribe("client"));
        assert_eq!(
            second.next_frame().await,
            SocketMessage::subscribe("handshake")
        );

        let mut seen = vec![];
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert_eq!(
            seen,
            vec![
                TransportEvent::Open,
                TransportEvent::Close,
                TransportEvent::Open
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_replaced_subscriptions_after_reconnect() {
        let (transport, _events, mut sockets) = spawn_transport(
            TransportOptions::new("https://bridge.example")
                .with_subscriptions(vec!["client".to_string(), "handshake".to_string()]),
        );
        transport.subscribe("extra").unwrap();
        transport.open();

        let mut first = sockets.recv().await.unwrap();
        first.open();
        for topic in ["extra", "client", "handshake"] {
            assert_eq!(first.next_frame().await, SocketMessage::subscribe(topic));
        }

        transport.replace_subscriptions(vec!["client".to_string()]);
        first.close();

        let mut second = sockets.recv().await.unwrap();
        second.open();
        assert_eq!(second.next_frame().await, SocketMessage::subscribe("client"));
        tokio::task::yield_now().await;
        assert!(second.try_next_frame().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_ceiling() {
        let (transport, mut events, mut sockets) = spawn_transport(
            TransportOptions::new("https://bridge.example").with_retry(
                RetryPolicy {
                    interval: Duration::from_millis(500),
                    max_attempts: Some(1),
                },
            ),
        );
        transport.open();

        let first = sockets.recv().await.unwrap();
        first.open();
        first.close();

        let second = sockets.recv().await.unwrap();
        second.error("refused");
        second.close();

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(sockets.try_recv().is_err());

        let mut seen = vec![];
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert!(seen.contains(&TransportEvent::Error("refused".to_string())));
        assert_eq!(
            seen.last(),
            Some(&TransportEvent::Error(
                "reconnect attempts exhausted".to_string()
            ))
        );
        assert_eq!(transport.state(), TransportState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_does_not_reconnect() {
        let (transport, _events, mut sockets) =
            spawn_transport(TransportOptions::new("https://bridge.example"));
        transport.open();

        let socket = sockets.recv().await.unwrap();
        socket.open();
        wait_for(|| transport.state() == TransportState::Connected).await;

        transport.close();
        wait_for(|| socket.is_dropped()).await;

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(sockets.try_recv().is_err());
        assert_eq!(transport.state(), TransportState::Disconnected);

        // sending afterwards connects again
        transport.send("late".to_string(), "topic", false).unwrap();
        let mut socket = sockets.recv().await.unwrap();
        socket.open();
        assert_eq!(socket.next_frame().await.payload, "late");
    }

    #[tokio::test]
    async fn test_online_signal_replaces_socket() {
        let (transport, _events, mut sockets) =
            spawn_transport(TransportOptions::new("https://bridge.example"));

        transport.notify_online();
        let first = sockets.recv().await.unwrap();
        first.open();
        wait_for(|| transport.state() == TransportState::Connected).await;

        transport.notify_online();
        let second = sockets.recv().await.unwrap();
        second.open();
        wait_for(|| first.is_dropped()).await;
        assert!(!second.is_dropped());
    }

    #[tokio::test]
    async fn test_rejects_empty_topic() {
        let (transport, _events, _sockets) =
            spawn_transport(TransportOptions::new("https://bridge.example"));
        assert!(matches!(
            transport.send("x".to_string(), "", false),
            Err(Error::InvalidTopic)
        ));
        assert!(matches!(transport.subscribe(""), Err(Error::InvalidTopic)));
    }

    #[tokio::test]
    async fn test_invalid_bridge_url() {
        let (connector, _sockets) = MockConnector::new();
        let result = RelayTransport::spawn(TransportOptions::new("not a url"), Arc::new(connector));
        assert!(matches!(result, Err(Error::InvalidBridgeUrl(_))));
    }
}
