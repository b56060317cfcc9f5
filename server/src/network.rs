//! Server network layer: TCP transport and the game loop driving it

use crate::config::ServerConfig;
use crate::game::GameServer;
use crate::ranking::RankingStore;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use shared::clock::{Clock, MonotonicClock};
use shared::protocol::{read_frame, write_message};
use shared::{ConnId, ConnectionError, Event, Message, ServerEvent, ServerTransport};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};

type ConnectionTable = Arc<Mutex<BTreeMap<ConnId, mpsc::UnboundedSender<Message>>>>;

/// Listens for TCP clients and exposes them as a [`ServerTransport`].
///
/// Every connection gets a reader task feeding the shared event queue and a
/// writer task draining its own outgoing queue. The game loop only touches
/// the queues.
pub struct TcpServerTransport {
    local_addr: SocketAddr,
    connections: ConnectionTable,
    events: mpsc::UnboundedReceiver<ServerEvent>,
}

impl TcpServerTransport {
    pub async fn bind(addr: &str) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("Server listening on {}", local_addr);

        let connections: ConnectionTable = Arc::new(Mutex::new(BTreeMap::new()));
        let (events_tx, events) = mpsc::unbounded_channel();

        spawn_acceptor(listener, Arc::clone(&connections), events_tx);

        Ok(Self {
            local_addr,
            connections,
            events,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl ServerTransport for TcpServerTransport {
    fn send_to(&mut self, conn: ConnId, event: &Event) -> Result<(), ConnectionError> {
        let connections = self.connections.lock();
        let outgoing = connections
            .get(&conn)
            .ok_or(ConnectionError::UnknownConnection(conn.0))?;
        outgoing
            .send(event.to_message())
            .map_err(|_| ConnectionError::Closed)
    }

    fn connections(&self) -> Vec<ConnId> {
        self.connections.lock().keys().copied().collect()
    }

    fn disconnect(&mut self, conn: ConnId) {
        // Dropping the sender lets the writer flush what is queued and close.
        if self.connections.lock().remove(&conn).is_some() {
            debug!("Closing connection {}", conn);
        }
    }

    fn poll_events(&mut self) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Spawns task that accepts new connections
fn spawn_acceptor(
    listener: TcpListener,
    connections: ConnectionTable,
    events_tx: mpsc::UnboundedSender<ServerEvent>,
) {
    let next_id = AtomicU32::new(1);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let id = ConnId(next_id.fetch_add(1, Ordering::Relaxed));
                    info!("Client {} connected from {}", id, peer);
                    if let Err(e) = stream.set_nodelay(true) {
                        warn!("Failed to disable Nagle for {}: {}", id, e);
                    }
                    spawn_connection(id, stream, Arc::clone(&connections), events_tx.clone());
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
            if events_tx.is_closed() {
                break;
            }
        }
    });
}

fn spawn_connection(
    id: ConnId,
    stream: TcpStream,
    connections: ConnectionTable,
    events_tx: mpsc::UnboundedSender<ServerEvent>,
) {
    let (reader, writer) = stream.into_split();
    let (out_tx, out_rx) = mpsc::unbounded_channel();

    connections.lock().insert(id, out_tx);
    if events_tx.send(ServerEvent::ClientConnected(id)).is_err() {
        connections.lock().remove(&id);
        return;
    }

    tokio::spawn(run_writer(id, writer, out_rx));
    tokio::spawn(run_reader(id, reader, connections, events_tx));
}

/// Spawned per connection: writes queued messages until the queue closes
async fn run_writer(
    id: ConnId,
    mut writer: OwnedWriteHalf,
    mut out_rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(message) = out_rx.recv().await {
        if let Err(e) = write_message(&mut writer, &message).await {
            error!("Failed to send `{}` to {}: {}", message.name, id, e);
            break;
        }
    }
    let _ = writer.shutdown().await;
}

/// Spawned per connection: turns incoming frames into server events
async fn run_reader(
    id: ConnId,
    reader: OwnedReadHalf,
    connections: ConnectionTable,
    events_tx: mpsc::UnboundedSender<ServerEvent>,
) {
    let mut reader = BufReader::new(reader);
    loop {
        match read_frame(&mut reader).await {
            Ok(Some(body)) => {
                if !connections.lock().contains_key(&id) {
                    break;
                }
                match Message::from_body(&body) {
                    Ok(message) => {
                        if events_tx.send(ServerEvent::Message(id, message)).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Failed to deserialize frame from {}: {}", id, e),
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!("Dropping {}: {}", id, e);
                break;
            }
        }
    }

    // Only report connections the game has not already dropped itself.
    if connections.lock().remove(&id).is_some() {
        let _ = events_tx.send(ServerEvent::ClientDisconnected(id));
    }
}

/// Main server coordinating the transport and the race logic
pub struct Server {
    game: GameServer<TcpServerTransport>,
    tick_duration: Duration,
    clock: MonotonicClock,
}

impl Server {
    pub async fn new(config: ServerConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let transport = TcpServerTransport::bind(&config.bind_address()).await?;

        let ranking = match RankingStore::open(&config.ranking_db) {
            Ok(store) => Some(store),
            Err(e) => {
                error!(
                    "Failed to open ranking store {}: {}",
                    config.ranking_db.display(),
                    e
                );
                None
            }
        };

        Ok(Server {
            tick_duration: config.tick_duration(),
            game: GameServer::new(transport, config, ranking),
            clock: MonotonicClock::new(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.game.transport().local_addr()
    }

    /// Ticks the game at the configured rate until `shutdown` resolves
    pub async fn run<F>(&mut self, shutdown: F) -> Result<(), Box<dyn std::error::Error>>
    where
        F: std::future::Future<Output = ()>,
    {
        let mut tick_interval = interval(self.tick_duration);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        info!("Server started successfully");

        let mut ticks: u64 = 0;
        loop {
            tokio::select! {
                _ = tick_interval.tick() => {
                    self.game.tick(self.clock.now_ms());
                    ticks += 1;

                    if ticks % 600 == 0 {
                        debug!(
                            "Tick {}: {} clients, race {:?}",
                            ticks,
                            self.game.clients().len(),
                            self.game.race_state()
                        );
                    }
                }
                _ = &mut shutdown => {
                    break;
                }
            }
        }

        self.game.shutdown();
        // Give writer tasks a moment to flush the goodbyes.
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(())
    }
}
