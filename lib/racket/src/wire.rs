//! Serialization of the four fixed-width message frames. All integers are
//! big-endian; floats travel as the big-endian byte pattern of their
//! IEEE-754 single-precision bit image. The codec performs no I/O and no
//! allocation beyond the caller's buffer.

use crate::shared::{ErrorType, NetworkError, NetworkResult};
use crate::MAX_CLIENTS;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use lumen::PlayerId;
use std::io::{Cursor, Read, Write};

/// Opcode of a client registration request.
pub const OP_REGISTER: u32 = 0;
/// Opcode of the game-start notification (server to client only).
pub const OP_GAME_START: u32 = 1;

/// Registration accepted.
pub const STATUS_OK: u32 = 0;
/// Registration refused, all player slots taken.
pub const STATUS_SERVER_FULL: u32 = 1;

/// Positions carried by every snapshot: the ball plus one paddle per slot.
pub const SNAPSHOT_POSITIONS: usize = MAX_CLIENTS + 1;

/// Payload width shared by both stream frame types.
const FRAME_PAYLOAD_SIZE: usize = 256;

/// A point in world-units together with its velocity in units/sec.
#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub dx: f32,
    pub dy: f32,
}

impl Position {
    pub const SIZE: usize = 16;

    #[inline]
    pub fn new(x: f32, y: f32, dx: f32, dy: f32) -> Position {
        Position { x, y, dx, dy }
    }

    #[inline]
    fn write(&self, stream: &mut Cursor<&mut [u8]>) -> NetworkResult<()> {
        stream.write_f32::<BigEndian>(self.x)?;
        stream.write_f32::<BigEndian>(self.y)?;
        stream.write_f32::<BigEndian>(self.dx)?;
        stream.write_f32::<BigEndian>(self.dy)?;
        Ok(())
    }

    #[inline]
    fn read(stream: &mut Cursor<&[u8]>) -> NetworkResult<Position> {
        Ok(Position {
            x: stream.read_f32::<BigEndian>()?,
            y: stream.read_f32::<BigEndian>()?,
            dx: stream.read_f32::<BigEndian>()?,
            dy: stream.read_f32::<BigEndian>()?,
        })
    }
}

/// Paddle state reported by a client over the datagram transport. The id is
/// the sender's self-declared player id; validation against the roster
/// happens upstream.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct PositionMessage {
    pub id: PlayerId,
    pub position: Position,
}

impl PositionMessage {
    pub const SIZE: usize = 4 + Position::SIZE;

    pub fn encode(&self, buffer: &mut [u8]) -> NetworkResult<()> {
        if buffer.len() < Self::SIZE {
            return Err(NetworkError::Wait);
        }

        let mut stream = Cursor::new(buffer);
        stream.write_u32::<BigEndian>(self.id)?;
        self.position.write(&mut stream)?;
        Ok(())
    }

    pub fn decode(buffer: &[u8]) -> NetworkResult<PositionMessage> {
        if buffer.len() < Self::SIZE {
            return Err(NetworkError::Wait);
        }

        let mut stream = Cursor::new(buffer);
        Ok(PositionMessage {
            id: stream.read_u32::<BigEndian>()?,
            position: Position::read(&mut stream)?,
        })
    }
}

/// Authoritative world state fanned out to every client once per tick. The
/// wire image is always exactly 256 bytes, zero-padded past the last
/// position record. The ball occupies index 0, paddles follow in slot order.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct GameStateSnapshot {
    pub left_score: u8,
    pub right_score: u8,
    pub game_active: bool,
    pub seconds_to_start: i32,
    pub positions: [Position; SNAPSHOT_POSITIONS],
}

impl GameStateSnapshot {
    pub const SIZE: usize = 256;

    pub fn encode(&self, buffer: &mut [u8]) -> NetworkResult<()> {
        if buffer.len() < Self::SIZE {
            return Err(NetworkError::Wait);
        }

        for byte in buffer[..Self::SIZE].iter_mut() {
            *byte = 0;
        }

        let mut stream = Cursor::new(buffer);
        stream.write_u8(self.left_score)?;
        stream.write_u8(self.right_score)?;
        stream.write_u8(self.game_active as u8)?;
        stream.write_i32::<BigEndian>(self.seconds_to_start)?;
        stream.write_u32::<BigEndian>(self.positions.len() as u32)?;
        for position in self.positions.iter() {
            position.write(&mut stream)?;
        }
        Ok(())
    }

    pub fn decode(buffer: &[u8]) -> NetworkResult<GameStateSnapshot> {
        if buffer.len() < Self::SIZE {
            return Err(NetworkError::Wait);
        }

        let mut stream = Cursor::new(buffer);
        let left_score = stream.read_u8()?;
        let right_score = stream.read_u8()?;
        let game_active = stream.read_u8()? != 0;
        let seconds_to_start = stream.read_i32::<BigEndian>()?;

        if stream.read_u32::<BigEndian>()? != SNAPSHOT_POSITIONS as u32 {
            return Err(NetworkError::Fatal(ErrorType::Serialization));
        }

        let mut positions = [Position::default(); SNAPSHOT_POSITIONS];
        for position in positions.iter_mut() {
            *position = Position::read(&mut stream)?;
        }

        Ok(GameStateSnapshot {
            left_score,
            right_score,
            game_active,
            seconds_to_start,
            positions,
        })
    }
}

/// Control frame on the stream transport: a u32 opcode followed by 256
/// payload bytes. Clients send `OP_REGISTER`; the server pushes
/// `OP_GAME_START` when the countdown is scheduled.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct TcpMessage {
    pub opcode: u32,
    pub payload: [u8; FRAME_PAYLOAD_SIZE],
}

impl TcpMessage {
    pub const PAYLOAD_SIZE: usize = FRAME_PAYLOAD_SIZE;
    pub const SIZE: usize = 4 + Self::PAYLOAD_SIZE;

    #[inline]
    pub fn new(opcode: u32) -> TcpMessage {
        TcpMessage {
            opcode,
            payload: [0; Self::PAYLOAD_SIZE],
        }
    }

    pub fn encode(&self, buffer: &mut [u8]) -> NetworkResult<()> {
        if buffer.len() < Self::SIZE {
            return Err(NetworkError::Wait);
        }

        let mut stream = Cursor::new(buffer);
        stream.write_u32::<BigEndian>(self.opcode)?;
        stream.write_all(&self.payload)?;
        Ok(())
    }

    pub fn decode(buffer: &[u8]) -> NetworkResult<TcpMessage> {
        if buffer.len() < Self::SIZE {
            return Err(NetworkError::Wait);
        }

        let mut stream = Cursor::new(buffer);
        let opcode = stream.read_u32::<BigEndian>()?;
        let mut payload = [0; Self::PAYLOAD_SIZE];
        stream.read_exact(&mut payload)?;
        Ok(TcpMessage { opcode, payload })
    }

    /// UDP and TCP ports self-reported by the client in a register payload.
    /// Kept for diagnostics only; the datagram return address is learned
    /// from actual traffic, never from these.
    pub fn register_ports(&self) -> NetworkResult<(u16, u16)> {
        let mut stream = Cursor::new(&self.payload[..]);
        let udp_port = stream.read_u16::<BigEndian>()?;
        let tcp_port = stream.read_u16::<BigEndian>()?;
        Ok((udp_port, tcp_port))
    }
}

/// Board geometry and timing advertised to clients. Appended to the
/// register response payload directly after the assigned player id, in
/// this order: cols, rows, tick_rate_ms as u32, then ball_radius and
/// player_length as f32 bit images. Clients that only read the player id
/// keep working.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct BoardAdvert {
    pub cols: u32,
    pub rows: u32,
    pub tick_rate_ms: u32,
    pub ball_radius: f32,
    pub player_length: f32,
}

/// Reply frame on the stream transport: a u32 statuscode followed by 256
/// payload bytes.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct TcpResponse {
    pub statuscode: u32,
    pub payload: [u8; FRAME_PAYLOAD_SIZE],
}

impl TcpResponse {
    pub const PAYLOAD_SIZE: usize = FRAME_PAYLOAD_SIZE;
    pub const SIZE: usize = 4 + Self::PAYLOAD_SIZE;

    /// Builds the successful register response carrying the assigned player
    /// id and the board advert.
    pub fn register_ok(player_id: PlayerId, advert: &BoardAdvert) -> TcpResponse {
        let mut payload = [0; Self::PAYLOAD_SIZE];
        {
            let mut stream = Cursor::new(&mut payload[..]);

            // The payload layout is part of the protocol, see BoardAdvert.
            stream
                .write_u32::<BigEndian>(player_id)
                .and_then(|_| stream.write_u32::<BigEndian>(advert.cols))
                .and_then(|_| stream.write_u32::<BigEndian>(advert.rows))
                .and_then(|_| stream.write_u32::<BigEndian>(advert.tick_rate_ms))
                .and_then(|_| stream.write_f32::<BigEndian>(advert.ball_radius))
                .and_then(|_| stream.write_f32::<BigEndian>(advert.player_length))
                .expect("Register payload exceeds the response frame");
        }

        TcpResponse {
            statuscode: STATUS_OK,
            payload,
        }
    }

    #[inline]
    pub fn server_full() -> TcpResponse {
        TcpResponse {
            statuscode: STATUS_SERVER_FULL,
            payload: [0; Self::PAYLOAD_SIZE],
        }
    }

    pub fn encode(&self, buffer: &mut [u8]) -> NetworkResult<()> {
        if buffer.len() < Self::SIZE {
            return Err(NetworkError::Wait);
        }

        let mut stream = Cursor::new(buffer);
        stream.write_u32::<BigEndian>(self.statuscode)?;
        stream.write_all(&self.payload)?;
        Ok(())
    }

    pub fn decode(buffer: &[u8]) -> NetworkResult<TcpResponse> {
        if buffer.len() < Self::SIZE {
            return Err(NetworkError::Wait);
        }

        let mut stream = Cursor::new(buffer);
        let statuscode = stream.read_u32::<BigEndian>()?;
        let mut payload = [0; Self::PAYLOAD_SIZE];
        stream.read_exact(&mut payload)?;
        Ok(TcpResponse { statuscode, payload })
    }

    /// Player id carried at the head of a register response payload.
    pub fn assigned_player_id(&self) -> NetworkResult<PlayerId> {
        let mut stream = Cursor::new(&self.payload[..]);
        Ok(stream.read_u32::<BigEndian>()?)
    }
}
