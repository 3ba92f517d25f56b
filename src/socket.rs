//! Socket
//!
//! The transport never talks to a websocket directly. It asks a
//! [`SocketConnector`] for a socket and then only sees two channels: text
//! frames going out and [`SocketEvent`]s coming back. Dropping the outbound
//! sender closes the socket.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

#[derive(Debug, Clone, PartialEq)]
pub enum SocketEvent {
    Open,
    Text(String),
    Error(String),
    Closed,
}

#[derive(Debug)]
pub struct SocketHandle {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<SocketEvent>,
}

pub trait SocketConnector: Send + Sync + 'static {
    /// Starts connecting and returns immediately. `SocketEvent::Open` is
    /// reported once the socket is usable.
    fn connect(&self, url: &Url) -> SocketHandle;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

impl SocketConnector for WsConnector {
    fn connect(&self, url: &Url) -> SocketHandle {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_socket(url.to_string(), outbound_rx, inbound_tx));
        SocketHandle {
            outbound: outbound_tx,
            inbound: inbound_rx,
        }
    }
}

async fn run_socket(
    url: String,
    mut outbound: mpsc::UnboundedReceiver<String>,
    inbound: mpsc::UnboundedSender<SocketEvent>,
) {
    let stream = match connect_async(url.as_str()).await {
        Ok((stream, _)) => stream,
        Err(e) => {
            log::debug!("websocket connect to {url} failed: {e}");
            let _ = inbound.send(SocketEvent::Error(e.to_string()));
            let _ = inbound.send(SocketEvent::Closed);
            return;
        }
    };
    log::debug!("websocket connected: {url}");
    let _ = inbound.send(SocketEvent::Open);

    let (mut write, mut read) = stream.split();
    loop {
        tokio::select! {
            text = outbound.recv() => match text {
                Some(text) => {
                    if let Err(e) = write.send(Message::Text(text)).await {
                        let _ = inbound.send(SocketEvent::Error(e.to_string()));
                        break;
                    }
                }
                None => {
                    // owner dropped the handle, close without reporting
                    let _ = write.close().await;
                    return;
                }
            },
            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    let _ = inbound.send(SocketEvent::Text(text));
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let _ = inbound.send(SocketEvent::Error(e.to_string()));
                    break;
                }
            },
        }
    }

    log::debug!("websocket closed: {url}");
    let _ = inbound.send(SocketEvent::Closed);
}

#[cfg(test)]
pub(crate) mod mock {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use serde::de::DeserializeOwned;
    use tokio::sync::mpsc;
    use url::Url;

    use super::{SocketConnector, SocketEvent, SocketHandle};
    use crate::types::SocketMessage;

    /// Hands every socket the transport creates over to the test.
    #[derive(Clone)]
    pub struct MockConnector {
        created: mpsc::UnboundedSender<MockSocket>,
        pub urls: Arc<Mutex<Vec<Url>>>,
    }

    pub struct MockSocket {
        pub url: Url,
        outbound: mpsc::UnboundedReceiver<String>,
        events: mpsc::UnboundedSender<SocketEvent>,
    }

    impl MockConnector {
        pub fn new() -> (Self, mpsc::UnboundedReceiver<MockSocket>) {
            let (created, sockets) = mpsc::unbounded_channel();
            (
                Self {
                    created,
                    urls: Default::default(),
                },
                sockets,
            )
        }
    }

    impl SocketConnector for MockConnector {
        fn connect(&self, url: &Url) -> SocketHandle {
            let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
            let (events_tx, events_rx) = mpsc::unbounded_channel();
            self.urls.lock().unwrap().push(url.clone());
            let _ = self.created.send(MockSocket {
                url: url.clone(),
                outbound: outbound_rx,
                events: events_tx,
            });
            SocketHandle {
                outbound: outbound_tx,
                inbound: events_rx,
            }
        }
    }

    impl MockSocket {
        pub fn open(&self) {
            self.events.send(SocketEvent::Open).unwrap();
        }

        pub fn close(&self) {
            let _ = self.events.send(SocketEvent::Closed);
        }

        pub fn error(&self, message: &str) {
            let _ = self.events.send(SocketEvent::Error(message.to_string()));
        }

        pub fn deliver(&self, frame: &SocketMessage) {
            self.deliver_raw(&serde_json::to_string(frame).unwrap());
        }

        pub fn deliver_raw(&self, text: &str) {
            self.events.send(SocketEvent::Text(text.to_string())).unwrap();
        }

        pub async fn next_frame(&mut self) -> SocketMessage {
            self.next_as().await
        }

        pub async fn next_as<T: DeserializeOwned>(&mut self) -> T {
            let text = tokio::time::timeout(
                Duration::from_secs(5),
                self.outbound.recv(),
            )
            .await
            .expect("timed out waiting for a frame")
            .expect("socket handle dropped");
            serde_json::from_str(&text).unwrap()
        }

        pub fn try_next_frame(&mut self) -> Option<SocketMessage> {
            self.outbound
                .try_recv()
                .ok()
                .map(|text| serde_json::from_str(&text).unwrap())
        }

        /// True once the transport dropped its side of the socket.
        pub fn is_dropped(&self) -> bool {
            self.events.is_closed()
        }
    }
}
