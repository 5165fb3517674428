//! The running match: one endpoint, one world, one loop. The poll timeout
//! doubles as the tick timer, so all ingress and all physics happen on the
//! same thread with no locking.

use crate::config::GameConfig;
use crate::world::{Phase, World};
use lumen::logging;
use lumen::time::timestamp_secs;
use racket::endpoint::{Endpoint, IngressChange};
use racket::shared::{ErrorUtils, NetworkResult};
use racket::wire::{GameStateSnapshot, TcpMessage, OP_GAME_START};
use racket::MAX_CLIENTS;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

pub struct Session {
    world: World,
    endpoint: Endpoint,

    tick_period: Duration,
    countdown_secs: u64,
    next_tick: Instant,
    stop: bool,

    log: logging::Logger,
}

impl Session {
    /// Binds the endpoint and spawns a fresh world. The spawn RNG is seeded
    /// from wall time, once, here.
    pub fn new<'a, L: Into<Option<&'a logging::Logger>>>(
        config: &GameConfig,
        log: L,
    ) -> NetworkResult<Session> {
        let session_log = match log.into() {
            Some(log) => log.new(logging::o!()),
            _ => logging::Logger::root(logging::Discard, logging::o!()),
        };

        let endpoint = Endpoint::new(&config.address(), config.game.advert(), &session_log)?;
        let world = World::new(config.game, timestamp_secs());

        Ok(Session {
            world,
            endpoint,
            tick_period: config.game.tick_period(),
            countdown_secs: config.game.countdown_secs,
            next_tick: Instant::now() + config.game.tick_period(),
            stop: false,
            log: session_log,
        })
    }

    /// Runs the main loop until a stop is requested or the endpoint fails.
    /// On the way out the tick timer stops first, then the endpoint closes
    /// its sockets and releases all slots.
    pub fn run(&mut self) {
        logging::info!(self.log, "session started";
                       "context" => "run",
                       "tick_period" => ?self.tick_period);

        while !self.stop {
            if self.run_once().has_failed() {
                logging::error!(self.log, "fatal endpoint failure, stopping"; "context" => "run");
                break;
            }
        }

        self.endpoint.shutdown();
        logging::info!(self.log, "session finished"; "context" => "run");
    }

    /// One loop iteration: wait for readiness at most until the next tick
    /// is due, land ingress into the world, then tick if the deadline
    /// passed. Paddle updates drained here are always reflected in the tick
    /// that follows.
    pub fn run_once(&mut self) -> NetworkResult<()> {
        let now = Instant::now();
        let timeout = self.next_tick.saturating_duration_since(now);
        self.endpoint.sync(Some(timeout))?;
        self.apply_ingress();

        let now = Instant::now();
        if now >= self.next_tick {
            self.tick(now);
            // No catch-up on late firings, the clock delta already covers
            // the lost time.
            self.next_tick = now + self.tick_period;
        }

        Ok(())
    }

    #[inline]
    pub fn request_stop(&mut self) {
        self.stop = true;
    }

    #[inline]
    pub fn connected_players(&self) -> usize {
        self.endpoint.roster().active_count()
    }

    #[inline]
    pub fn tcp_addr(&self) -> NetworkResult<SocketAddr> {
        self.endpoint.tcp_addr()
    }

    #[inline]
    pub fn udp_addr(&self) -> NetworkResult<SocketAddr> {
        self.endpoint.udp_addr()
    }

    fn apply_ingress(&mut self) {
        let world = &mut self.world;

        for change in self.endpoint.changes() {
            match change {
                IngressChange::Paddle { id, position } => world.set_player_position(id, position),
                IngressChange::Registered(id) => world.set_player_active(id, true),
                IngressChange::Dropped(id) => world.set_player_active(id, false),
            }
        }
    }

    fn tick(&mut self, now: Instant) {
        let wall_now = timestamp_secs();

        match self.world.phase() {
            Phase::Waiting => {
                if self.endpoint.roster().active_count() == MAX_CLIENTS {
                    let scheduled_start = wall_now + self.countdown_secs;
                    self.world.schedule_start(scheduled_start);
                    logging::info!(self.log, "all players connected, countdown scheduled";
                                   "context" => "tick",
                                   "scheduled_start" => scheduled_start);

                    let mut frame = [0u8; TcpMessage::SIZE];
                    if !TcpMessage::new(OP_GAME_START).encode(&mut frame).has_failed() {
                        self.endpoint.broadcast_stream(&frame);
                    }
                }
            }
            Phase::Countdown { scheduled_start } => {
                if wall_now >= scheduled_start {
                    self.world.activate();
                    logging::info!(self.log, "game active"; "context" => "tick");
                }
            }
            Phase::Active => (),
        }

        if self.world.phase() == Phase::Active {
            self.world.step(now, wall_now);
        }

        // Every phase still emits the authoritative snapshot, whole or not
        // at all.
        let snapshot = self.world.snapshot(wall_now);
        let mut frame = [0u8; GameStateSnapshot::SIZE];
        if !snapshot.encode(&mut frame).has_failed() {
            self.endpoint.broadcast_datagram(&frame);
        }

        self.world.mark_tick(now);
    }
}
