use std::collections::HashMap;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use engine::Snapshot;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::auth::{TokenVerifier, UserId};
use super::bootstrap::AppWiring;
use super::config::ConfigError;
use super::protocol::{
    decode_client_message, encode_control_line, encode_snapshot_line, ClientMessage,
    ServerControl,
};
use super::room::{RoomId, RoomManager, RoomSettings};
use super::transport::{ConnectionId, TcpLineTransport, TransportError, TransportEvent};

const ROOM_METRICS_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub(crate) enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Session {
    room_id: RoomId,
    user_id: UserId,
}

/// Connections, sessions and rooms driven from one thread. Each call to
/// [`Server::pump`] reads input, ticks every room and queues snapshots.
pub(crate) struct Server {
    transport: TcpLineTransport,
    rooms: RoomManager,
    verifier: Box<dyn TokenVerifier>,
    sessions: HashMap<ConnectionId, Session>,
    tick_interval: Duration,
    metrics_elapsed: Duration,
    events: Vec<TransportEvent>,
}

impl Server {
    pub(crate) fn bind(app: AppWiring) -> Result<Self, ServerError> {
        let addr = app.config.socket_addr()?;
        let transport = TcpLineTransport::bind(addr)?;
        Ok(Self {
            transport,
            rooms: RoomManager::new(RoomSettings::from_config(&app.config)),
            verifier: app.verifier,
            sessions: HashMap::new(),
            tick_interval: Duration::from_secs(1) / app.config.tick_hz.max(1),
            metrics_elapsed: Duration::ZERO,
            events: Vec::new(),
        })
    }

    pub(crate) fn local_addr(&self) -> SocketAddr {
        self.transport.local_addr()
    }

    pub(crate) fn pump(&mut self, elapsed: Duration) {
        let mut events = std::mem::take(&mut self.events);
        self.transport.poll(&mut events);
        for event in events.drain(..) {
            self.handle_event(event);
        }

        for (room_id, snapshots) in self.rooms.advance_all(elapsed) {
            for snapshot in &snapshots {
                self.broadcast(&room_id, snapshot);
            }
        }
        self.maybe_log_room_metrics(elapsed);

        self.transport.flush_all(&mut events);
        for event in events.drain(..) {
            self.handle_event(event);
        }
        self.events = events;
    }

    fn maybe_log_room_metrics(&mut self, elapsed: Duration) {
        self.metrics_elapsed = self.metrics_elapsed.saturating_add(elapsed);
        if self.metrics_elapsed < ROOM_METRICS_INTERVAL {
            return;
        }
        self.metrics_elapsed = Duration::ZERO;
        for (room_id, players, metrics) in self.rooms.room_metrics() {
            info!(
                room = %room_id,
                players,
                tps = metrics.tps,
                tick_time_ms = metrics.tick_time_ms,
                ticks_total = metrics.ticks_total,
                entity_count = metrics.entity_count,
                "room_metrics"
            );
        }
    }

    fn run_forever(mut self) -> ! {
        let mut last = Instant::now();
        loop {
            let now = Instant::now();
            let elapsed = now.saturating_duration_since(last);
            last = now;
            self.pump(elapsed);
            thread::sleep(self.tick_interval.saturating_sub(now.elapsed()));
        }
    }

    fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected(connection) => {
                debug!(connection = %connection, "session_awaiting_join");
            }
            TransportEvent::Line { connection, line } => self.handle_line(connection, &line),
            TransportEvent::Disconnected(connection) => self.handle_disconnect(connection),
        }
    }

    fn handle_line(&mut self, connection: ConnectionId, line: &str) {
        if let Some(session) = self.sessions.get(&connection) {
            let result = self
                .rooms
                .on_message(&session.room_id, &session.user_id, line.as_bytes());
            if let Err(err) = result {
                warn!(
                    connection = %connection,
                    room = %session.room_id,
                    user = %session.user_id,
                    error = %err,
                    "client_message_rejected"
                );
                self.send_error(connection, err.to_string());
            }
            return;
        }

        match decode_client_message(line.as_bytes()) {
            Ok(ClientMessage::Join { room_id, token }) => {
                self.handle_join(connection, room_id, &token)
            }
            Ok(_) => self.send_error(connection, "join a room first".to_string()),
            Err(err) => {
                warn!(connection = %connection, error = %err, "client_message_rejected");
                self.send_error(connection, err.to_string());
            }
        }
    }

    fn handle_join(&mut self, connection: ConnectionId, room_id: RoomId, token: &str) {
        let Some(user_id) = self.verifier.verify_token(token, &room_id) else {
            warn!(connection = %connection, room = %room_id, "join_rejected_token");
            self.send_error(connection, "invalid token".to_string());
            return;
        };
        let already_connected = self
            .sessions
            .values()
            .any(|session| session.room_id == room_id && session.user_id == user_id);
        if already_connected {
            warn!(
                connection = %connection,
                room = %room_id,
                user = %user_id,
                "join_rejected_duplicate"
            );
            self.send_error(connection, format!("user '{user_id}' is already connected"));
            return;
        }

        match self.rooms.subscribe_user(&room_id, &user_id) {
            Ok(net_id) => {
                info!(
                    connection = %connection,
                    room = %room_id,
                    user = %user_id,
                    net_id = %net_id,
                    "session_joined"
                );
                self.send_control(
                    connection,
                    &ServerControl::Welcome {
                        room_id: room_id.clone(),
                        user_id: user_id.as_str().to_string(),
                        net_id: net_id.as_str().to_string(),
                    },
                );
                self.sessions.insert(connection, Session { room_id, user_id });
            }
            Err(err) => {
                error!(connection = %connection, room = %room_id, error = %err, "join_failed");
                self.send_error(connection, err.to_string());
            }
        }
    }

    fn handle_disconnect(&mut self, connection: ConnectionId) {
        let Some(session) = self.sessions.remove(&connection) else {
            return;
        };
        self.rooms
            .unsubscribe_user(&session.room_id, &session.user_id);
        info!(
            connection = %connection,
            room = %session.room_id,
            user = %session.user_id,
            clients = self.transport.client_count(),
            "session_closed"
        );
    }

    fn broadcast(&mut self, room_id: &str, snapshot: &Arc<Snapshot>) {
        let line = match encode_snapshot_line(room_id, snapshot) {
            Ok(line) => line,
            Err(err) => {
                error!(
                    room = room_id,
                    tick = snapshot.tick,
                    error = %err,
                    "snapshot_encode_failed"
                );
                return;
            }
        };
        let connections = self
            .sessions
            .iter()
            .filter(|(_, session)| session.room_id == room_id)
            .map(|(connection, _)| *connection)
            .collect::<Vec<_>>();
        for connection in connections {
            self.transport.send_telemetry(connection, &line);
        }
    }

    fn send_error(&mut self, connection: ConnectionId, message: String) {
        self.send_control(connection, &ServerControl::Error { message });
    }

    fn send_control(&mut self, connection: ConnectionId, control: &ServerControl) {
        match encode_control_line(control) {
            Ok(line) => {
                self.transport.send_control(connection, &line);
            }
            Err(err) => error!(connection = %connection, error = %err, "control_encode_failed"),
        }
    }
}

pub(crate) fn run(app: AppWiring) -> ExitCode {
    let server = match Server::bind(app) {
        Ok(server) => server,
        Err(err) => {
            error!(error = %err, "startup_failed");
            return ExitCode::FAILURE;
        }
    };
    info!(addr = %server.local_addr(), "server_listening");
    server.run_forever()
}

#[cfg(test)]
mod tests {
    use std::io::{self, Read, Write};
    use std::net::TcpStream;

    use serde::Deserialize;
    use serde_json::Value;

    use super::*;
    use crate::app::auth::PrefixTokenVerifier;
    use crate::app::config::ServerConfig;

    #[derive(Debug, Deserialize)]
    struct SnapshotLine {
        snapshot: Snapshot,
        #[serde(rename = "roomId")]
        room_id: String,
    }

    struct TestClient {
        stream: TcpStream,
        buffer: Vec<u8>,
        lines: Vec<String>,
    }

    impl TestClient {
        fn connect(addr: SocketAddr) -> Self {
            let stream = TcpStream::connect(addr).expect("connect");
            stream.set_nonblocking(true).expect("client nonblocking");
            Self {
                stream,
                buffer: Vec::new(),
                lines: Vec::new(),
            }
        }

        fn send(&mut self, line: &str) {
            self.stream.write_all(line.as_bytes()).expect("write");
            self.stream.write_all(b"\n").expect("newline");
            self.stream.flush().expect("flush");
        }

        fn read_available(&mut self) {
            let mut chunk = [0u8; 4096];
            loop {
                match self.stream.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(bytes_read) => self.buffer.extend_from_slice(&chunk[..bytes_read]),
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                    Err(err) => panic!("unexpected read error: {err}"),
                }
            }
            while let Some(index) = self.buffer.iter().position(|byte| *byte == b'\n') {
                let line = self.buffer.drain(..=index).collect::<Vec<_>>();
                self.lines
                    .push(String::from_utf8_lossy(&line[..line.len() - 1]).into_owned());
            }
        }

        fn controls(&self) -> Vec<Value> {
            self.lines
                .iter()
                .filter_map(|line| serde_json::from_str::<Value>(line).ok())
                .filter(|value| value.get("type").is_some())
                .collect()
        }

        fn snapshots(&self) -> Vec<SnapshotLine> {
            self.lines
                .iter()
                .filter_map(|line| serde_json::from_str::<SnapshotLine>(line).ok())
                .collect()
        }
    }

    fn test_server() -> Server {
        let config = ServerConfig {
            port: 0,
            seed: Some(3),
            ..ServerConfig::default()
        };
        Server::bind(AppWiring {
            config,
            verifier: Box::new(PrefixTokenVerifier::new("dev.")),
        })
        .expect("bind server")
    }

    fn pump_until<F>(server: &mut Server, client: &mut TestClient, elapsed: Duration, done: F)
    where
        F: Fn(&TestClient) -> bool,
    {
        for _ in 0..100 {
            server.pump(elapsed);
            client.read_available();
            if done(client) {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("condition not reached; lines: {:?}", client.lines);
    }

    fn join(server: &mut Server, client: &mut TestClient, room: &str, user: &str) -> String {
        client.send(&format!(
            r#"{{"type":"join","roomId":"{room}","token":"dev.{user}"}}"#
        ));
        pump_until(server, client, Duration::ZERO, |client| {
            !client.controls().is_empty()
        });
        let welcome = client.controls().remove(0);
        assert_eq!(welcome["type"], "welcome");
        assert_eq!(welcome["roomId"], room);
        assert_eq!(welcome["userId"], user);
        welcome["netId"].as_str().expect("net id").to_string()
    }

    #[test]
    fn joined_client_receives_snapshots_that_follow_its_input() {
        let mut server = test_server();
        let mut client = TestClient::connect(server.local_addr());
        let net_id = join(&mut server, &mut client, "r1", "amy");
        let tick = server.tick_interval;

        pump_until(&mut server, &mut client, tick, |client| {
            !client.snapshots().is_empty()
        });
        let first = client.snapshots().remove(0);
        assert_eq!(first.room_id, "r1");
        let start = first.snapshot.find(&net_id).expect("player").x;

        client.send(r#"{"type":"keypress","direction":"right"}"#);
        pump_until(&mut server, &mut client, tick, |client| {
            client.snapshots().iter().any(|line| {
                line.snapshot
                    .find(&net_id)
                    .map(|entry| entry.x >= start + 10.0)
                    .unwrap_or(false)
            })
        });

        let ticks = client
            .snapshots()
            .iter()
            .map(|line| line.snapshot.tick)
            .collect::<Vec<_>>();
        assert!(ticks.windows(2).all(|pair| pair[1] == pair[0] + 1));
    }

    #[test]
    fn catch_up_pump_broadcasts_every_tick_in_order() {
        let mut server = test_server();
        let mut client = TestClient::connect(server.local_addr());
        join(&mut server, &mut client, "r1", "amy");

        server.pump(server.tick_interval * 3);
        pump_until(&mut server, &mut client, Duration::ZERO, |client| {
            client.snapshots().len() >= 3
        });

        let ticks = client
            .snapshots()
            .iter()
            .map(|line| line.snapshot.tick)
            .collect::<Vec<_>>();
        assert_eq!(ticks, vec![1, 2, 3]);
    }

    #[test]
    fn bad_token_is_answered_with_an_error() {
        let mut server = test_server();
        let mut client = TestClient::connect(server.local_addr());
        client.send(r#"{"type":"join","roomId":"r1","token":"nope"}"#);
        pump_until(&mut server, &mut client, Duration::ZERO, |client| {
            !client.controls().is_empty()
        });

        let reply = client.controls().remove(0);
        assert_eq!(reply["type"], "error");
        assert_eq!(reply["message"], "invalid token");
        assert!(server.sessions.is_empty());
        assert_eq!(server.rooms.room_count(), 0);
    }

    #[test]
    fn input_before_join_is_rejected() {
        let mut server = test_server();
        let mut client = TestClient::connect(server.local_addr());
        client.send(r#"{"type":"keypress","direction":"up"}"#);
        pump_until(&mut server, &mut client, Duration::ZERO, |client| {
            !client.controls().is_empty()
        });

        let reply = client.controls().remove(0);
        assert_eq!(reply["type"], "error");
        assert_eq!(reply["message"], "join a room first");
    }

    #[test]
    fn second_connection_for_same_user_is_refused() {
        let mut server = test_server();
        let mut first = TestClient::connect(server.local_addr());
        join(&mut server, &mut first, "r1", "amy");

        let mut second = TestClient::connect(server.local_addr());
        second.send(r#"{"type":"join","roomId":"r1","token":"dev.amy"}"#);
        pump_until(&mut server, &mut second, Duration::ZERO, |client| {
            !client.controls().is_empty()
        });
        assert_eq!(second.controls()[0]["type"], "error");
        assert_eq!(server.sessions.len(), 1);
    }

    #[test]
    fn disconnect_removes_the_player() {
        let mut server = test_server();
        let mut client = TestClient::connect(server.local_addr());
        join(&mut server, &mut client, "r1", "amy");
        let room = server.rooms.room("r1").expect("room");
        assert_eq!(room.lock().expect("lock").player_count(), 1);

        drop(client);
        for _ in 0..100 {
            server.pump(Duration::ZERO);
            if server.sessions.is_empty() {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }

        assert!(server.sessions.is_empty());
        assert_eq!(room.lock().expect("lock").player_count(), 0);
    }
}
