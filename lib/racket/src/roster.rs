//! Fixed-capacity table of player slots. Slot `i` owns public player id
//! `i + 1`; the lowest inactive slot always wins a registration, which makes
//! the left paddle deterministically player 1. Freed slots are reusable but
//! never compacted.

use crate::MAX_CLIENTS;
use lumen::PlayerId;
use std::net::SocketAddr;

/// Identity of a stream connection inside the endpoint.
pub type ConnId = usize;

/// Outcome of a registration attempt.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Registration {
    Accepted(PlayerId),
    Full,
}

#[derive(Debug, Copy, Clone)]
struct Slot {
    active: bool,
    conn: Option<ConnId>,
    return_addr: Option<SocketAddr>,
}

impl Slot {
    #[inline]
    fn vacant() -> Slot {
        Slot {
            active: false,
            conn: None,
            return_addr: None,
        }
    }
}

pub struct Roster {
    slots: [Slot; MAX_CLIENTS],
}

impl Roster {
    #[inline]
    pub fn new() -> Roster {
        Roster {
            slots: [Slot::vacant(); MAX_CLIENTS],
        }
    }

    /// Claims the lowest inactive slot for the connection. Registering the
    /// same connection twice returns its existing player id unchanged.
    pub fn register(&mut self, conn: ConnId) -> Registration {
        for (index, slot) in self.slots.iter().enumerate() {
            if slot.active && slot.conn == Some(conn) {
                return Registration::Accepted(index as PlayerId + 1);
            }
        }

        for (index, slot) in self.slots.iter_mut().enumerate() {
            if !slot.active {
                slot.active = true;
                slot.conn = Some(conn);
                slot.return_addr = None;
                return Registration::Accepted(index as PlayerId + 1);
            }
        }

        Registration::Full
    }

    /// Marks the slot owned by the connection inactive. Paddle datagrams
    /// bearing its player id are dropped until a fresh registration.
    pub fn release(&mut self, conn: ConnId) -> Option<PlayerId> {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.active && slot.conn == Some(conn) {
                *slot = Slot::vacant();
                return Some(index as PlayerId + 1);
            }
        }

        None
    }

    /// Records the datagram source of an active player, last writer wins.
    /// Returns false when the id names no active slot.
    pub fn record_return_addr(&mut self, id: PlayerId, addr: SocketAddr) -> bool {
        match self.slot_index(id) {
            Some(index) if self.slots[index].active => {
                self.slots[index].return_addr = Some(addr);
                true
            }
            _ => false,
        }
    }

    #[inline]
    pub fn is_active(&self, id: PlayerId) -> bool {
        match self.slot_index(id) {
            Some(index) => self.slots[index].active,
            None => false,
        }
    }

    #[inline]
    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.active).count()
    }

    /// Player ids and connections of all active slots, in slot order.
    pub fn active_conns(&self) -> impl Iterator<Item = (PlayerId, ConnId)> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            match (slot.active, slot.conn) {
                (true, Some(conn)) => Some((index as PlayerId + 1, conn)),
                _ => None,
            }
        })
    }

    /// Learned return addresses of all active slots, in slot order. Slots
    /// that have not sent a datagram yet are skipped.
    pub fn return_addrs(&self) -> impl Iterator<Item = SocketAddr> + '_ {
        self.slots
            .iter()
            .filter(|slot| slot.active)
            .filter_map(|slot| slot.return_addr)
    }

    #[inline]
    fn slot_index(&self, id: PlayerId) -> Option<usize> {
        if id >= 1 && id as usize <= MAX_CLIENTS {
            Some(id as usize - 1)
        } else {
            None
        }
    }
}
