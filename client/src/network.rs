//! Client network layer: TCP connection to the race server

use log::{debug, error, info, warn};
use shared::protocol::{read_frame, write_message};
use shared::{ClientEvent, ClientTransport, ConnectionError, Event, Message};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};

/// Interval at which the handshake wait reports progress
const KEEP_ALIVE: Duration = Duration::from_millis(250);

/// A registered connection to the server.
///
/// Socket I/O happens in a reader and a writer task; the game loop sees
/// arrived events through [`ClientTransport::poll_events`].
pub struct TcpClientTransport {
    outgoing: mpsc::UnboundedSender<Message>,
    incoming: mpsc::UnboundedReceiver<ClientEvent>,
    /// Messages that arrived during the handshake, delivered first
    pending: VecDeque<ClientEvent>,
    closed: bool,
}

impl TcpClientTransport {
    /// Connects, says `hi` and blocks until the server accepts `name`.
    ///
    /// Fails with [`ConnectionError::NickInUse`] if the name is taken,
    /// [`ConnectionError::Rejected`] on a goodbye, and
    /// [`ConnectionError::Closed`] if the socket closes first.
    pub async fn connect(addr: &str, name: &str) -> Result<Self, ConnectionError> {
        info!("Connecting to {} as {}...", addr, name);
        let stream = TcpStream::connect(addr).await?;
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to disable Nagle: {}", e);
        }

        let (reader, writer) = stream.into_split();
        let (outgoing, out_rx) = mpsc::unbounded_channel();
        let (events_tx, incoming) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(writer, out_rx));
        tokio::spawn(run_reader(reader, events_tx));

        let mut transport = Self {
            outgoing,
            incoming,
            pending: VecDeque::new(),
            closed: false,
        };
        transport.send(&Event::Hi {
            name: name.to_string(),
        })?;
        transport.handshake(name).await?;

        info!("Joined server {} as {}", addr, name);
        Ok(transport)
    }

    async fn handshake(&mut self, name: &str) -> Result<(), ConnectionError> {
        let started = Instant::now();
        let mut keep_alive = interval(KEEP_ALIVE);
        keep_alive.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                arrived = self.incoming.recv() => {
                    let message = match arrived {
                        Some(ClientEvent::Message(message)) => message,
                        Some(ClientEvent::Connected) => continue,
                        Some(ClientEvent::Disconnected { reason }) => {
                            debug!("Handshake aborted: {}", reason);
                            self.closed = true;
                            return Err(ConnectionError::Closed);
                        }
                        None => {
                            self.closed = true;
                            return Err(ConnectionError::Closed);
                        }
                    };

                    match Event::from_message(&message) {
                        Ok(Event::PlayerConnected { name: joined }) if joined == name => {
                            return Ok(());
                        }
                        Ok(Event::NickInUse) => {
                            return Err(ConnectionError::NickInUse(name.to_string()));
                        }
                        Ok(Event::Goodbye { reason, message }) => {
                            warn!("Server said goodbye ({:?}): {}", reason, message);
                            return Err(ConnectionError::Rejected(message));
                        }
                        Ok(_) => self.pending.push_back(ClientEvent::Message(message)),
                        Err(e) => warn!("Discarding `{}` during handshake: {}", message.name, e),
                    }
                }
                _ = keep_alive.tick() => {
                    debug!(
                        "Waiting for handshake ({} ms)",
                        started.elapsed().as_millis()
                    );
                }
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl ClientTransport for TcpClientTransport {
    fn send(&mut self, event: &Event) -> Result<(), ConnectionError> {
        if self.closed {
            return Err(ConnectionError::Closed);
        }
        self.outgoing
            .send(event.to_message())
            .map_err(|_| ConnectionError::Closed)
    }

    fn poll_events(&mut self) -> Vec<ClientEvent> {
        let mut events: Vec<ClientEvent> = self.pending.drain(..).collect();
        while let Ok(event) = self.incoming.try_recv() {
            if matches!(event, ClientEvent::Disconnected { .. }) {
                self.closed = true;
            }
            events.push(event);
        }
        events
    }
}

/// Spawned task: writes queued messages until the transport is dropped
async fn run_writer(mut writer: OwnedWriteHalf, mut out_rx: mpsc::UnboundedReceiver<Message>) {
    while let Some(message) = out_rx.recv().await {
        if let Err(e) = write_message(&mut writer, &message).await {
            error!("Failed to send `{}`: {}", message.name, e);
            break;
        }
    }
    let _ = writer.shutdown().await;
}

/// Spawned task: turns incoming frames into client events
async fn run_reader(reader: OwnedReadHalf, events_tx: mpsc::UnboundedSender<ClientEvent>) {
    let mut reader = BufReader::new(reader);
    let reason = loop {
        match read_frame(&mut reader).await {
            Ok(Some(body)) => match Message::from_body(&body) {
                Ok(message) => {
                    if events_tx.send(ClientEvent::Message(message)).is_err() {
                        return;
                    }
                }
                Err(e) => warn!("Failed to deserialize frame: {}", e),
            },
            Ok(None) => break "connection closed by server".to_string(),
            Err(e) => {
                error!("Error receiving frame: {}", e);
                break e.to_string();
            }
        }
    };
    let _ = events_tx.send(ClientEvent::Disconnected { reason });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio::time::timeout;
    use tokio_test::assert_ok;

    async fn next_event(stream: &mut BufReader<TcpStream>) -> Event {
        let body = timeout(Duration::from_secs(2), read_frame(stream))
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        Event::from_message(&Message::from_body(&body).unwrap()).unwrap()
    }

    async fn reply(stream: &mut BufReader<TcpStream>, event: Event) {
        write_message(stream.get_mut(), &event.to_message())
            .await
            .unwrap();
    }

    /// Accepts one client, expects `hi`, then answers with `replies`
    async fn fake_server(replies: Vec<Event>) -> (String, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut stream = BufReader::new(stream);
            assert!(matches!(next_event(&mut stream).await, Event::Hi { .. }));
            for event in replies {
                reply(&mut stream, event).await;
            }
            // Hold the socket until the client hangs up.
            let _ = timeout(Duration::from_secs(2), read_frame(&mut stream)).await;
        });
        (addr, handle)
    }

    #[tokio::test]
    async fn test_handshake_succeeds_and_keeps_early_messages() {
        let (addr, server) = fake_server(vec![
            Event::PlayerConnected {
                name: "Bob".into(),
            },
            Event::PlayerConnected {
                name: "Alice".into(),
            },
            Event::InitRace {
                level: "oval".into(),
            },
        ])
        .await;

        let mut transport = assert_ok!(TcpClientTransport::connect(&addr, "Alice").await);

        let mut events = transport.poll_events();
        for _ in 0..100 {
            if events.len() >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
            events.extend(transport.poll_events());
        }
        assert_eq!(
            events,
            vec![
                ClientEvent::Message(
                    Event::PlayerConnected {
                        name: "Bob".into()
                    }
                    .to_message()
                ),
                ClientEvent::Message(
                    Event::InitRace {
                        level: "oval".into()
                    }
                    .to_message()
                ),
            ]
        );

        drop(transport);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_nick_in_use_fails_handshake() {
        let (addr, _server) = fake_server(vec![Event::NickInUse]).await;
        let result = TcpClientTransport::connect(&addr, "Alice").await;
        assert!(matches!(result, Err(ConnectionError::NickInUse(name)) if name == "Alice"));
    }

    #[tokio::test]
    async fn test_goodbye_fails_handshake() {
        let (addr, _server) = fake_server(vec![Event::Goodbye {
            reason: shared::GoodbyeReason::ServerFull,
            message: "server full".into(),
        }])
        .await;
        let result = TcpClientTransport::connect(&addr, "Alice").await;
        assert!(matches!(result, Err(ConnectionError::Rejected(message)) if message == "server full"));
    }

    #[tokio::test]
    async fn test_closed_socket_fails_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });

        let result = TcpClientTransport::connect(&addr, "Alice").await;
        assert!(matches!(result, Err(ConnectionError::Closed)));
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let result = TcpClientTransport::connect(&addr, "Alice").await;
        assert!(matches!(result, Err(ConnectionError::Io(_))));
    }
}
