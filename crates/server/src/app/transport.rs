use std::collections::VecDeque;
use std::fmt;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};

use thiserror::Error;
use tracing::{debug, info, trace, warn};

pub(crate) const MAX_PENDING_CONTROL_BYTES_PER_CLIENT: usize = 256 * 1024;
pub(crate) const MAX_PENDING_TELEMETRY_BYTES_PER_CLIENT: usize = 256 * 1024;
const MAX_LINE_BYTES: usize = 64 * 1024;

#[derive(Debug, Error)]
pub(crate) enum TransportError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("failed to configure listener: {0}")]
    Configure(#[source] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TransportEvent {
    Connected(ConnectionId),
    Line {
        connection: ConnectionId,
        line: String,
    },
    Disconnected(ConnectionId),
}

/// Replies and errors are `Control`; per-tick snapshots are `Telemetry`.
/// Control lines jump ahead of queued telemetry and are never evicted to
/// make room for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutboundClass {
    Control,
    Telemetry,
}

#[derive(Debug)]
struct OutboundChunk {
    class: OutboundClass,
    bytes: Vec<u8>,
}

#[derive(Debug)]
struct OutboundChunkState {
    chunk: OutboundChunk,
    written: usize,
}

#[derive(Debug, Default)]
struct OutboundQueue {
    active: Option<OutboundChunkState>,
    queued: VecDeque<OutboundChunk>,
    control_bytes: usize,
    telemetry_bytes: usize,
}

#[derive(Debug)]
struct ClientConn {
    id: ConnectionId,
    stream: TcpStream,
    read_buf: Vec<u8>,
    outbound: OutboundQueue,
}

/// Non-blocking newline-delimited TCP transport. Everything happens inside
/// [`TcpLineTransport::poll`] and the send calls; nothing blocks.
#[derive(Debug)]
pub(crate) struct TcpLineTransport {
    listener: TcpListener,
    local_addr: SocketAddr,
    next_connection: u64,
    clients: Vec<ClientConn>,
}

impl TcpLineTransport {
    pub(crate) fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        let listener =
            TcpListener::bind(addr).map_err(|source| TransportError::Bind { addr, source })?;
        listener
            .set_nonblocking(true)
            .map_err(TransportError::Configure)?;
        let local_addr = listener.local_addr().map_err(TransportError::Configure)?;
        Ok(Self {
            listener,
            local_addr,
            next_connection: 0,
            clients: Vec::new(),
        })
    }

    pub(crate) fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub(crate) fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Accepts new clients, reads complete lines and flushes pending output.
    pub(crate) fn poll(&mut self, out: &mut Vec<TransportEvent>) {
        self.accept_pending_clients(out);
        self.poll_client_lines(out);
        self.flush_all(out);
    }

    pub(crate) fn send_control(&mut self, connection: ConnectionId, line: &str) -> bool {
        let Some(client) = self.client_mut(connection) else {
            return false;
        };
        enqueue_control_line(
            &mut client.outbound,
            line,
            MAX_PENDING_CONTROL_BYTES_PER_CLIENT,
        );
        true
    }

    pub(crate) fn send_telemetry(&mut self, connection: ConnectionId, line: &str) -> bool {
        let Some(client) = self.client_mut(connection) else {
            return false;
        };
        enqueue_telemetry_line(
            &mut client.outbound,
            line,
            MAX_PENDING_TELEMETRY_BYTES_PER_CLIENT,
        );
        true
    }

    /// Writes as much queued output as the sockets accept. Clients whose
    /// writes fail are dropped and reported as disconnected.
    pub(crate) fn flush_all(&mut self, out: &mut Vec<TransportEvent>) {
        let mut index = 0usize;
        while index < self.clients.len() {
            let flush_result = {
                let client = &mut self.clients[index];
                let stream = &mut client.stream;
                flush_pending_chunks(&mut client.outbound, |payload| stream.write(payload))
            };
            if let Err(err) = flush_result {
                let client = self.clients.swap_remove(index);
                warn!(connection = %client.id, error = %err, "client_write_failed");
                out.push(TransportEvent::Disconnected(client.id));
            } else {
                index += 1;
            }
        }
    }

    fn client_mut(&mut self, connection: ConnectionId) -> Option<&mut ClientConn> {
        self.clients
            .iter_mut()
            .find(|client| client.id == connection)
    }

    fn accept_pending_clients(&mut self, out: &mut Vec<TransportEvent>) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(err) = stream.set_nonblocking(true) {
                        warn!(error = %err, "client_nonblocking_failed");
                        continue;
                    }
                    if let Err(err) = stream.set_nodelay(true) {
                        warn!(error = %err, "client_nodelay_failed");
                    }
                    self.next_connection += 1;
                    let id = ConnectionId(self.next_connection);
                    info!(connection = %id, %peer, "client_connected");
                    self.clients.push(ClientConn {
                        id,
                        stream,
                        read_buf: Vec::new(),
                        outbound: OutboundQueue::default(),
                    });
                    out.push(TransportEvent::Connected(id));
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    warn!(error = %err, "client_accept_failed");
                    break;
                }
            }
        }
    }

    fn poll_client_lines(&mut self, out: &mut Vec<TransportEvent>) {
        let mut index = 0usize;
        while index < self.clients.len() {
            let mut disconnected = false;
            {
                let client = &mut self.clients[index];
                let mut chunk = [0u8; 1024];
                loop {
                    match client.stream.read(&mut chunk) {
                        Ok(0) => {
                            disconnected = true;
                            break;
                        }
                        Ok(bytes_read) => {
                            client.read_buf.extend_from_slice(&chunk[..bytes_read]);
                            let mut lines = Vec::new();
                            drain_complete_lines(&mut client.read_buf, &mut lines);
                            out.extend(lines.into_iter().map(|line| TransportEvent::Line {
                                connection: client.id,
                                line,
                            }));
                            if client.read_buf.len() > MAX_LINE_BYTES {
                                warn!(
                                    connection = %client.id,
                                    buffered = client.read_buf.len(),
                                    "client_line_too_long"
                                );
                                disconnected = true;
                                break;
                            }
                        }
                        Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                        Err(err) => {
                            warn!(connection = %client.id, error = %err, "client_read_failed");
                            disconnected = true;
                            break;
                        }
                    }
                }
            }

            if disconnected {
                let client = self.clients.swap_remove(index);
                info!(connection = %client.id, "client_disconnected");
                out.push(TransportEvent::Disconnected(client.id));
            } else {
                index += 1;
            }
        }
    }
}

fn drain_complete_lines(buffer: &mut Vec<u8>, out: &mut Vec<String>) {
    while let Some(newline_index) = buffer.iter().position(|byte| *byte == b'\n') {
        let mut line_bytes = buffer.drain(..=newline_index).collect::<Vec<u8>>();
        line_bytes.pop(); // newline
        if line_bytes.last().copied() == Some(b'\r') {
            line_bytes.pop();
        }
        if line_bytes.is_empty() {
            continue;
        }

        match String::from_utf8(line_bytes) {
            Ok(line) => {
                trace!(line = %line, "client_line_read");
                out.push(line)
            }
            Err(err) => warn!(error = %err, "client_invalid_utf8_line_dropped"),
        }
    }
}

fn encode_line_payload(line: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(line.len() + 1);
    payload.extend_from_slice(line.as_bytes());
    payload.push(b'\n');
    payload
}

fn enqueue_control_line(queue: &mut OutboundQueue, line: &str, control_cap: usize) {
    let chunk = OutboundChunk {
        class: OutboundClass::Control,
        bytes: encode_line_payload(line),
    };
    let chunk_bytes = chunk.bytes.len();
    if chunk_bytes > control_cap {
        debug!(chunk_bytes, control_cap, "drop_control_chunk_over_cap");
        return;
    }

    while queue.control_bytes.saturating_add(chunk_bytes) > control_cap {
        if !evict_oldest(queue, OutboundClass::Control) {
            debug!(chunk_bytes, control_cap, "drop_control_chunk_no_evictable_entry");
            return;
        }
    }

    queue.control_bytes = queue.control_bytes.saturating_add(chunk_bytes);
    let insert_at = queue
        .queued
        .iter()
        .position(|existing| existing.class == OutboundClass::Telemetry)
        .unwrap_or(queue.queued.len());
    queue.queued.insert(insert_at, chunk);
}

fn enqueue_telemetry_line(queue: &mut OutboundQueue, line: &str, telemetry_cap: usize) {
    let chunk = OutboundChunk {
        class: OutboundClass::Telemetry,
        bytes: encode_line_payload(line),
    };
    let chunk_bytes = chunk.bytes.len();
    if chunk_bytes > telemetry_cap {
        debug!(chunk_bytes, telemetry_cap, "drop_telemetry_chunk_over_cap");
        return;
    }

    while queue.telemetry_bytes.saturating_add(chunk_bytes) > telemetry_cap {
        if !evict_oldest(queue, OutboundClass::Telemetry) {
            debug!(
                chunk_bytes,
                telemetry_cap, "drop_telemetry_chunk_no_evictable_entry"
            );
            return;
        }
    }

    queue.telemetry_bytes = queue.telemetry_bytes.saturating_add(chunk_bytes);
    queue.queued.push_back(chunk);
}

/// Drops the oldest queued chunk of `class`. The chunk being written is
/// never touched.
fn evict_oldest(queue: &mut OutboundQueue, class: OutboundClass) -> bool {
    let Some(index) = queue.queued.iter().position(|chunk| chunk.class == class) else {
        return false;
    };
    let Some(removed) = queue.queued.remove(index) else {
        return false;
    };
    let counter = match class {
        OutboundClass::Control => &mut queue.control_bytes,
        OutboundClass::Telemetry => &mut queue.telemetry_bytes,
    };
    *counter = counter.saturating_sub(removed.bytes.len());
    true
}

fn flush_pending_chunks<F>(queue: &mut OutboundQueue, mut write_payload: F) -> io::Result<()>
where
    F: FnMut(&[u8]) -> io::Result<usize>,
{
    loop {
        if queue.active.is_none() {
            let Some(chunk) = queue.queued.pop_front() else {
                return Ok(());
            };
            match chunk.class {
                OutboundClass::Control => {
                    queue.control_bytes = queue.control_bytes.saturating_sub(chunk.bytes.len());
                }
                OutboundClass::Telemetry => {
                    queue.telemetry_bytes = queue.telemetry_bytes.saturating_sub(chunk.bytes.len());
                }
            }
            queue.active = Some(OutboundChunkState { chunk, written: 0 });
        }

        let Some(state) = queue.active.as_mut() else {
            return Ok(());
        };
        let remaining = &state.chunk.bytes[state.written..];
        match write_payload(remaining) {
            Ok(0) => {
                return Err(io::Error::new(io::ErrorKind::WriteZero, "write_zero"));
            }
            Ok(bytes_written) => {
                state.written = state.written.saturating_add(bytes_written);
                if state.written >= state.chunk.bytes.len() {
                    queue.active = None;
                }
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(()),
            Err(err) => return Err(err),
        }
    }
}
