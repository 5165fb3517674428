//! Connection management and transport multiplexing. One poll watches the
//! stream listener, every live stream connection and the datagram socket;
//! the caller supplies the poll timeout, which is how the tick timer shares
//! the same loop.

use crate::roster::{ConnId, Registration, Roster};
use crate::shared::{ErrorType, ErrorUtils, NetworkError, NetworkResult};
use crate::wire::{BoardAdvert, PositionMessage, Position, TcpMessage, TcpResponse, OP_REGISTER};
use lumen::logging;
use lumen::PlayerId;
use mio::net::{TcpListener, TcpStream, UdpSocket};
use mio::{Events, Interest, Poll, Token};
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::time::Duration;

const LISTENER: Token = Token(0);
const UDP: Token = Token(1);
const CONN_BASE: usize = 2;

const DATAGRAM_BUF_SIZE: usize = 1024;

/// Describes a roster or paddle mutation observed by the ingress loop.
/// Drained by the caller between polls; paddle updates must be applied to
/// the world before the next tick fires.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum IngressChange {
    Paddle { id: PlayerId, position: Position },
    Registered(PlayerId),
    Dropped(PlayerId),
}

/// A live stream connection. Inbound bytes accumulate until a full frame is
/// buffered; outbound frames are queued whole and flushed as the socket
/// allows.
struct Connection {
    stream: TcpStream,
    frame: [u8; TcpMessage::SIZE],
    frame_len: usize,
    egress: Vec<u8>,
    egress_cursor: usize,
    wants_write: bool,
}

impl Connection {
    #[inline]
    fn new(stream: TcpStream) -> Connection {
        Connection {
            stream,
            frame: [0; TcpMessage::SIZE],
            frame_len: 0,
            egress: Vec::new(),
            egress_cursor: 0,
            wants_write: false,
        }
    }
}

/// Handles both listening sockets, all stream connections and the player
/// roster.
pub struct Endpoint {
    listener: TcpListener,
    udp: UdpSocket,

    poll: Poll,
    events: Events,

    conns: Vec<Option<Connection>>,
    free: Vec<ConnId>,
    roster: Roster,
    advert: BoardAdvert,

    changes: Vec<IngressChange>,

    log: logging::Logger,
}

impl Endpoint {
    /// Binds the stream listener and the datagram socket to the provided
    /// address in the format `<ip>:<port>` and registers both on the poll.
    pub fn new<'a, L: Into<Option<&'a logging::Logger>>>(
        address: &str,
        advert: BoardAdvert,
        log: L,
    ) -> NetworkResult<Endpoint> {
        let endpoint_log = match log.into() {
            Some(log) => log.new(logging::o!()),
            _ => logging::Logger::root(logging::Discard, logging::o!()),
        };

        let addr: SocketAddr = address.parse()?;
        let mut listener = TcpListener::bind(addr)?;
        let mut udp = UdpSocket::bind(addr)?;

        let poll = Poll::new()?;
        poll.registry().register(&mut listener, LISTENER, Interest::READABLE)?;
        poll.registry().register(&mut udp, UDP, Interest::READABLE)?;

        let stream_addr = listener.local_addr()?;
        let datagram_addr = udp.local_addr()?;
        logging::info!(endpoint_log, "endpoint bound";
                       "context" => "new",
                       "stream" => %stream_addr,
                       "datagram" => %datagram_addr);

        Ok(Endpoint {
            listener,
            udp,
            poll,
            events: Events::with_capacity(256),
            conns: Vec::new(),
            free: Vec::new(),
            roster: Roster::new(),
            advert,
            changes: Vec::new(),
            log: endpoint_log,
        })
    }

    /// Runs one poll round, servicing every ready source. Blocks for at
    /// most `timeout`; the caller picks it so the next tick is never late.
    pub fn sync(&mut self, timeout: Option<Duration>) -> NetworkResult<()> {
        if let Err(err) = self.poll.poll(&mut self.events, timeout) {
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err.into());
        }

        let mut ready = Vec::new();
        for event in self.events.iter() {
            ready.push((event.token(), event.is_readable(), event.is_writable()));
        }

        for (token, readable, writable) in ready {
            match token {
                LISTENER => self.accept_pending(),
                UDP => self.drain_datagrams(),
                Token(value) => self.service_conn(value - CONN_BASE, readable, writable),
            }
        }

        Ok(())
    }

    /// Drains all the changes accumulated since the last `sync`.
    #[inline]
    pub fn changes(&mut self) -> impl Iterator<Item = IngressChange> + '_ {
        self.changes.drain(..)
    }

    #[inline]
    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    #[inline]
    pub fn tcp_addr(&self) -> NetworkResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    #[inline]
    pub fn udp_addr(&self) -> NetworkResult<SocketAddr> {
        Ok(self.udp.local_addr()?)
    }

    /// Sends the frame to every active slot with a learned return address.
    /// Datagram send failures log and continue.
    pub fn broadcast_datagram(&self, frame: &[u8]) {
        for addr in self.roster.return_addrs() {
            match self.udp.send_to(frame, addr) {
                Ok(count) => {
                    logging::trace!(self.log, "snapshot sent";
                                    "context" => "broadcast_datagram",
                                    "target" => %addr,
                                    "bytes" => count);
                }
                Err(err) => {
                    logging::warn!(self.log, "snapshot send failed";
                                   "context" => "broadcast_datagram",
                                   "target" => %addr,
                                   "error" => %err);
                }
            }
        }
    }

    /// Queues the frame on every active slot's stream connection. A write
    /// error demotes that slot instead of stalling the caller.
    pub fn broadcast_stream(&mut self, frame: &[u8]) {
        let targets: Vec<(PlayerId, ConnId)> = self.roster.active_conns().collect();

        for (player_id, conn_id) in targets {
            if self.queue_frame(conn_id, frame).has_failed() {
                logging::warn!(self.log, "stream push failed, dropping slot";
                               "context" => "broadcast_stream",
                               "player_id" => player_id);
                self.disconnect(conn_id);
            }
        }
    }

    /// Closes every connection and releases all slots. Sockets close when
    /// the endpoint is dropped.
    pub fn shutdown(&mut self) {
        for conn_id in 0..self.conns.len() {
            self.disconnect(conn_id);
        }

        logging::info!(self.log, "endpoint shut down"; "context" => "shutdown");
    }

    fn accept_pending(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((mut stream, peer)) => {
                    let conn_id = match self.free.pop() {
                        Some(id) => id,
                        None => {
                            self.conns.push(None);
                            self.conns.len() - 1
                        }
                    };

                    match self.poll.registry().register(
                        &mut stream,
                        Token(CONN_BASE + conn_id),
                        Interest::READABLE,
                    ) {
                        Ok(()) => {
                            self.conns[conn_id] = Some(Connection::new(stream));
                            logging::debug!(self.log, "new stream connection";
                                            "context" => "accept",
                                            "conn_id" => conn_id,
                                            "peer" => %peer);
                        }
                        Err(err) => {
                            self.free.push(conn_id);
                            logging::warn!(self.log, "stream registration failed";
                                           "context" => "accept",
                                           "error" => %err);
                        }
                    }
                }
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    logging::warn!(self.log, "failure accepting connection";
                                   "context" => "accept",
                                   "error" => %err);
                    break;
                }
            }
        }
    }

    fn drain_datagrams(&mut self) {
        let mut buffer = [0u8; DATAGRAM_BUF_SIZE];

        loop {
            match self.udp.recv_from(&mut buffer) {
                Ok((count, source)) => match PositionMessage::decode(&buffer[..count]) {
                    Ok(message) => {
                        if self.roster.record_return_addr(message.id, source) {
                            logging::trace!(self.log, "paddle update";
                                            "context" => "datagram",
                                            "player_id" => message.id,
                                            "x" => message.position.x,
                                            "y" => message.position.y);
                            self.changes.push(IngressChange::Paddle {
                                id: message.id,
                                position: message.position,
                            });
                        } else {
                            logging::debug!(self.log, "dropping datagram with unknown player id";
                                            "context" => "datagram",
                                            "player_id" => message.id,
                                            "source" => %source);
                        }
                    }
                    Err(_) => {
                        logging::debug!(self.log, "dropping short datagram";
                                        "context" => "datagram",
                                        "len" => count);
                    }
                },
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    logging::warn!(self.log, "datagram receive failed";
                                   "context" => "datagram",
                                   "error" => %err);
                    break;
                }
            }
        }
    }

    fn service_conn(&mut self, conn_id: ConnId, readable: bool, writable: bool) {
        if self.conns.get(conn_id).map_or(true, |slot| slot.is_none()) {
            return;
        }

        let mut result = Ok(());

        if readable {
            result = self.read_frames(conn_id);
        }
        if !result.has_failed() && writable {
            result = self.flush_conn(conn_id);
        }

        if result.has_failed() {
            self.disconnect(conn_id);
        }
    }

    /// Reads and handles as many full frames as the socket will yield.
    fn read_frames(&mut self, conn_id: ConnId) -> NetworkResult<()> {
        loop {
            let frame = {
                let conn = match self.conns[conn_id].as_mut() {
                    Some(conn) => conn,
                    None => return Ok(()),
                };

                match conn.stream.read(&mut conn.frame[conn.frame_len..]) {
                    // Connection closed by the peer.
                    Ok(0) => {
                        return Err(NetworkError::Fatal(ErrorType::Io(
                            io::ErrorKind::UnexpectedEof,
                        )))
                    }
                    Ok(count) => {
                        conn.frame_len += count;
                        if conn.frame_len < TcpMessage::SIZE {
                            continue;
                        }
                        conn.frame_len = 0;
                        conn.frame
                    }
                    Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                    Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                    Err(err) => return Err(err.into()),
                }
            };

            self.handle_frame(conn_id, &frame)?;
        }
    }

    fn handle_frame(&mut self, conn_id: ConnId, frame: &[u8]) -> NetworkResult<()> {
        let message = TcpMessage::decode(frame)?;

        match message.opcode {
            OP_REGISTER => self.handle_register(conn_id, &message),
            opcode => {
                logging::debug!(self.log, "ignoring unknown opcode";
                                "context" => "handle_frame",
                                "conn_id" => conn_id,
                                "opcode" => opcode);
                Ok(())
            }
        }
    }

    fn handle_register(&mut self, conn_id: ConnId, message: &TcpMessage) -> NetworkResult<()> {
        // Self-reported ports are diagnostic only; routing always uses the
        // addresses learned from actual traffic.
        if let Ok((udp_port, tcp_port)) = message.register_ports() {
            logging::debug!(self.log, "client reported ports";
                           "context" => "register",
                           "conn_id" => conn_id,
                           "udp_port" => udp_port,
                           "tcp_port" => tcp_port);
        }

        let response = match self.roster.register(conn_id) {
            Registration::Accepted(player_id) => {
                logging::info!(self.log, "registered player";
                               "context" => "register",
                               "conn_id" => conn_id,
                               "player_id" => player_id);
                self.changes.push(IngressChange::Registered(player_id));
                TcpResponse::register_ok(player_id, &self.advert)
            }
            Registration::Full => {
                logging::info!(self.log, "registration refused, no free slots";
                               "context" => "register",
                               "conn_id" => conn_id);
                TcpResponse::server_full()
            }
        };

        let mut frame = [0u8; TcpResponse::SIZE];
        response.encode(&mut frame)?;
        self.queue_frame(conn_id, &frame)
    }

    /// Queues the frame whole on the connection and flushes what the socket
    /// will take right away. The remainder goes out on writable readiness.
    fn queue_frame(&mut self, conn_id: ConnId, frame: &[u8]) -> NetworkResult<()> {
        {
            let conn = match self.conns[conn_id].as_mut() {
                Some(conn) => conn,
                None => return Ok(()),
            };
            conn.egress.extend_from_slice(frame);
        }

        self.flush_conn(conn_id)
    }

    fn flush_conn(&mut self, conn_id: ConnId) -> NetworkResult<()> {
        let conn = match self.conns[conn_id].as_mut() {
            Some(conn) => conn,
            None => return Ok(()),
        };

        while conn.egress_cursor < conn.egress.len() {
            match conn.stream.write(&conn.egress[conn.egress_cursor..]) {
                Ok(0) => {
                    return Err(NetworkError::Fatal(ErrorType::Io(io::ErrorKind::WriteZero)))
                }
                Ok(count) => conn.egress_cursor += count,
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }

        if conn.egress_cursor == conn.egress.len() {
            conn.egress.clear();
            conn.egress_cursor = 0;

            if conn.wants_write {
                conn.wants_write = false;
                self.poll.registry().reregister(
                    &mut conn.stream,
                    Token(CONN_BASE + conn_id),
                    Interest::READABLE,
                )?;
            }
        } else if !conn.wants_write {
            conn.wants_write = true;
            self.poll.registry().reregister(
                &mut conn.stream,
                Token(CONN_BASE + conn_id),
                Interest::READABLE | Interest::WRITABLE,
            )?;
        }

        Ok(())
    }

    fn disconnect(&mut self, conn_id: ConnId) {
        if let Some(mut conn) = self.conns.get_mut(conn_id).and_then(|slot| slot.take()) {
            drop(self.poll.registry().deregister(&mut conn.stream));

            if let Some(player_id) = self.roster.release(conn_id) {
                logging::info!(self.log, "released player slot";
                               "context" => "disconnect",
                               "conn_id" => conn_id,
                               "player_id" => player_id);
                self.changes.push(IngressChange::Dropped(player_id));
            }

            self.free.push(conn_id);
            logging::debug!(self.log, "connection closed";
                            "context" => "disconnect",
                            "conn_id" => conn_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{GameStateSnapshot, STATUS_OK, STATUS_SERVER_FULL};
    use std::net;
    use std::thread;

    const POLL_SLICE: Duration = Duration::from_millis(10);

    fn advert() -> BoardAdvert {
        BoardAdvert {
            cols: 200,
            rows: 50,
            tick_rate_ms: 16,
            ball_radius: 1.0,
            player_length: 2.5,
        }
    }

    fn new_endpoint() -> Endpoint {
        Endpoint::new("127.0.0.1:0", advert(), None).unwrap()
    }

    fn register_frame() -> [u8; TcpMessage::SIZE] {
        let mut frame = [0u8; TcpMessage::SIZE];
        TcpMessage::new(OP_REGISTER).encode(&mut frame).unwrap();
        frame
    }

    fn connect(endpoint: &Endpoint) -> net::TcpStream {
        let client = net::TcpStream::connect(endpoint.tcp_addr().unwrap()).unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        client
    }

    fn sync_until<F: Fn(&Endpoint) -> bool>(endpoint: &mut Endpoint, cond: F) -> bool {
        for _ in 0..500 {
            endpoint.sync(Some(POLL_SLICE)).unwrap();
            if cond(endpoint) {
                return true;
            }
        }
        false
    }

    fn register_client(endpoint: &mut Endpoint, expected_count: usize) -> net::TcpStream {
        let mut client = connect(endpoint);
        client.write_all(&register_frame()).unwrap();
        assert!(sync_until(endpoint, |e| e.roster().active_count() == expected_count));
        client
    }

    fn read_response(client: &mut net::TcpStream) -> TcpResponse {
        let mut buffer = [0u8; TcpResponse::SIZE];
        client.read_exact(&mut buffer).unwrap();
        TcpResponse::decode(&buffer).unwrap()
    }

    #[test]
    fn test_register_assigns_first_slot() {
        let mut endpoint = new_endpoint();

        let mut client = register_client(&mut endpoint, 1);
        let response = read_response(&mut client);

        assert_eq!(response.statuscode, STATUS_OK);
        assert_eq!(response.assigned_player_id().unwrap(), 1);

        let changes: Vec<_> = endpoint.changes().collect();
        assert!(changes.contains(&IngressChange::Registered(1)));
    }

    #[test]
    fn test_registration_ordering_and_capacity() {
        let mut endpoint = new_endpoint();

        let mut first = register_client(&mut endpoint, 1);
        let mut second = register_client(&mut endpoint, 2);

        assert_eq!(read_response(&mut first).assigned_player_id().unwrap(), 1);
        assert_eq!(read_response(&mut second).assigned_player_id().unwrap(), 2);

        // A third client is refused without disturbing the roster.
        let mut third = connect(&endpoint);
        third.write_all(&register_frame()).unwrap();
        for _ in 0..20 {
            endpoint.sync(Some(POLL_SLICE)).unwrap();
        }

        let response = read_response(&mut third);
        assert_eq!(response.statuscode, STATUS_SERVER_FULL);
        assert_eq!(endpoint.roster().active_count(), 2);
    }

    #[test]
    fn test_disconnect_frees_slot_for_reuse() {
        let mut endpoint = new_endpoint();

        let first = register_client(&mut endpoint, 1);
        let _second = register_client(&mut endpoint, 2);

        drop(first);
        assert!(sync_until(&mut endpoint, |e| e.roster().active_count() == 1));

        let mut replacement = register_client(&mut endpoint, 2);
        assert_eq!(
            read_response(&mut replacement).assigned_player_id().unwrap(),
            1
        );

        let changes: Vec<_> = endpoint.changes().collect();
        assert!(changes.contains(&IngressChange::Dropped(1)));
        assert!(changes.contains(&IngressChange::Registered(1)));
    }

    #[test]
    fn test_paddle_datagram_routes_by_declared_id() {
        let mut endpoint = new_endpoint();
        let _client = register_client(&mut endpoint, 1);

        let udp_client = net::UdpSocket::bind("127.0.0.1:0").unwrap();
        udp_client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();

        let message = PositionMessage {
            id: 1,
            position: Position::new(10.0, 20.0, 0.0, 0.0),
        };
        let mut dgram = [0u8; PositionMessage::SIZE];
        message.encode(&mut dgram).unwrap();
        udp_client
            .send_to(&dgram, endpoint.udp_addr().unwrap())
            .unwrap();

        assert!(sync_until(&mut endpoint, |e| {
            e.roster().return_addrs().count() == 1
        }));

        let changes: Vec<_> = endpoint.changes().collect();
        assert!(changes.contains(&IngressChange::Paddle {
            id: 1,
            position: message.position,
        }));

        // The learned return address now receives snapshot broadcasts of
        // exactly the fixed frame size.
        let frame = [0u8; GameStateSnapshot::SIZE];
        endpoint.broadcast_datagram(&frame);

        let mut buffer = [0u8; 512];
        let (count, _) = udp_client.recv_from(&mut buffer).unwrap();
        assert_eq!(count, GameStateSnapshot::SIZE);
    }

    #[test]
    fn test_unknown_player_id_datagram_is_dropped() {
        let mut endpoint = new_endpoint();
        let _client = register_client(&mut endpoint, 1);
        endpoint.changes().count();

        let udp_client = net::UdpSocket::bind("127.0.0.1:0").unwrap();

        let message = PositionMessage {
            id: 2,
            position: Position::new(1.0, 1.0, 0.0, 0.0),
        };
        let mut dgram = [0u8; PositionMessage::SIZE];
        message.encode(&mut dgram).unwrap();
        udp_client
            .send_to(&dgram, endpoint.udp_addr().unwrap())
            .unwrap();
        // Garbled short datagram on the side.
        udp_client
            .send_to(&[1, 2, 3], endpoint.udp_addr().unwrap())
            .unwrap();

        for _ in 0..20 {
            endpoint.sync(Some(POLL_SLICE)).unwrap();
        }

        assert_eq!(endpoint.roster().return_addrs().count(), 0);
        assert_eq!(endpoint.changes().count(), 0);
    }

    #[test]
    fn test_unknown_opcode_is_ignored() {
        let mut endpoint = new_endpoint();

        let mut client = connect(&endpoint);
        let mut frame = [0u8; TcpMessage::SIZE];
        TcpMessage::new(77).encode(&mut frame).unwrap();
        client.write_all(&frame).unwrap();

        for _ in 0..20 {
            endpoint.sync(Some(POLL_SLICE)).unwrap();
        }

        assert_eq!(endpoint.roster().active_count(), 0);
        assert_eq!(endpoint.changes().count(), 0);
    }

    #[test]
    fn test_frame_assembly_across_partial_writes() {
        let mut endpoint = new_endpoint();

        let mut client = connect(&endpoint);
        let frame = register_frame();

        // Dribble the frame in three chunks with pauses in between.
        client.write_all(&frame[..100]).unwrap();
        for _ in 0..5 {
            endpoint.sync(Some(POLL_SLICE)).unwrap();
        }
        client.write_all(&frame[100..200]).unwrap();
        for _ in 0..5 {
            endpoint.sync(Some(POLL_SLICE)).unwrap();
        }
        thread::sleep(Duration::from_millis(20));
        client.write_all(&frame[200..]).unwrap();

        assert!(sync_until(&mut endpoint, |e| e.roster().active_count() == 1));
        assert_eq!(read_response(&mut client).assigned_player_id().unwrap(), 1);
    }

    #[test]
    fn test_broadcast_stream_reaches_active_clients() {
        let mut endpoint = new_endpoint();

        let mut first = register_client(&mut endpoint, 1);
        let mut second = register_client(&mut endpoint, 2);
        read_response(&mut first);
        read_response(&mut second);

        let mut frame = [0u8; TcpMessage::SIZE];
        TcpMessage::new(crate::wire::OP_GAME_START)
            .encode(&mut frame)
            .unwrap();
        endpoint.broadcast_stream(&frame);
        for _ in 0..10 {
            endpoint.sync(Some(POLL_SLICE)).unwrap();
        }

        for client in [&mut first, &mut second].iter_mut() {
            let mut buffer = [0u8; TcpMessage::SIZE];
            client.read_exact(&mut buffer).unwrap();
            let message = TcpMessage::decode(&buffer).unwrap();
            assert_eq!(message.opcode, crate::wire::OP_GAME_START);
        }
    }
}
