//! Authoritative game state: ball kinematics, paddle positions, scores and
//! the match lifecycle. The session tick is the sole writer of ball state,
//! scores and phase; the ingress side only ever lands paddle positions and
//! activity flags.

use crate::config::Game;
use lumen::time::secs_between;
use lumen::PlayerId;
use racket::wire::{GameStateSnapshot, Position, SNAPSHOT_POSITIONS};
use racket::MAX_CLIENTS;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Instant;

/// Match lifecycle. The scheduled start only exists while counting down;
/// a score sends the match back into a fresh countdown.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Phase {
    Waiting,
    Countdown { scheduled_start: u64 },
    Active,
}

pub struct World {
    settings: Game,

    ball: Position,
    player_positions: [Position; MAX_CLIENTS],
    paddle_live: [bool; MAX_CLIENTS],

    left_score: u8,
    right_score: u8,

    phase: Phase,
    latest_tick: Instant,

    rng: StdRng,
}

impl World {
    /// Creates a world in the `Waiting` phase with the ball spawned at the
    /// board center. The seed fixes the spawn velocity sequence for the
    /// lifetime of the process.
    pub fn new(settings: Game, seed: u64) -> World {
        let mut rng = StdRng::seed_from_u64(seed);
        let ball = Self::spawn(&settings, &mut rng);

        World {
            settings,
            ball,
            player_positions: [Position::default(); MAX_CLIENTS],
            paddle_live: [false; MAX_CLIENTS],
            left_score: 0,
            right_score: 0,
            phase: Phase::Waiting,
            latest_tick: Instant::now(),
            rng,
        }
    }

    #[inline]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    #[inline]
    pub fn ball(&self) -> Position {
        self.ball
    }

    #[inline]
    pub fn scores(&self) -> (u8, u8) {
        (self.left_score, self.right_score)
    }

    /// Lands a paddle position reported over the datagram transport. Ids
    /// outside the slot range are dropped.
    pub fn set_player_position(&mut self, id: PlayerId, position: Position) {
        if let Some(index) = Self::slot_index(id) {
            self.player_positions[index] = position;
        }
    }

    pub fn player_position(&self, id: PlayerId) -> Option<Position> {
        Self::slot_index(id).map(|index| self.player_positions[index])
    }

    /// Mirrors roster activity so collision resolution only considers
    /// paddles that belong to a connected player.
    pub fn set_player_active(&mut self, id: PlayerId, live: bool) {
        if let Some(index) = Self::slot_index(id) {
            self.paddle_live[index] = live;
        }
    }

    #[inline]
    pub fn schedule_start(&mut self, at: u64) {
        self.phase = Phase::Countdown { scheduled_start: at };
    }

    #[inline]
    pub fn activate(&mut self) {
        self.phase = Phase::Active;
    }

    /// Advances ball physics by the clock delta since the previous tick and
    /// resolves walls, scoring and paddle deflection. Only called while the
    /// match is active.
    pub fn step(&mut self, now: Instant, wall_now: u64) {
        let dt = now.saturating_duration_since(self.latest_tick).as_secs_f32();

        self.ball.x += self.ball.dx * dt;
        self.ball.y += self.ball.dy * dt;

        let radius = self.settings.ball_radius;
        let cols = self.settings.cols as f32;
        let rows = self.settings.rows as f32;

        // Side walls score and put the match back into a countdown.
        if self.ball.x - radius <= 0.0 {
            self.right_score = self.right_score.saturating_add(1);
            self.reset_after_score(wall_now);
            return;
        } else if self.ball.x + radius > cols {
            self.left_score = self.left_score.saturating_add(1);
            self.reset_after_score(wall_now);
            return;
        }

        if self.ball.y - radius <= 0.0 {
            self.ball.y = radius;
            self.ball.dy = -self.ball.dy;
        } else if self.ball.y + radius > rows {
            self.ball.y = rows - radius;
            self.ball.dy = -self.ball.dy;
        }

        for index in 0..MAX_CLIENTS {
            if self.paddle_live[index] {
                let paddle = self.player_positions[index];
                Self::deflect(&mut self.ball, &paddle, &self.settings);
            }
        }
    }

    /// Closes out the tick. Runs in every phase so a frozen countdown never
    /// accumulates into one giant integration step.
    #[inline]
    pub fn mark_tick(&mut self, now: Instant) {
        self.latest_tick = now;
    }

    /// Copies the authoritative state into a snapshot, ball at index 0 and
    /// paddles in slot order.
    pub fn snapshot(&self, wall_now: u64) -> GameStateSnapshot {
        let mut positions = [Position::default(); SNAPSHOT_POSITIONS];
        positions[0] = self.ball;
        for (index, paddle) in self.player_positions.iter().enumerate() {
            positions[index + 1] = *paddle;
        }

        let seconds_to_start = match self.phase {
            Phase::Countdown { scheduled_start } => secs_between(wall_now, scheduled_start),
            _ => 0,
        };

        GameStateSnapshot {
            left_score: self.left_score,
            right_score: self.right_score,
            game_active: self.phase == Phase::Active,
            seconds_to_start,
            positions,
        }
    }

    fn reset_after_score(&mut self, wall_now: u64) {
        self.ball = Self::spawn(&self.settings, &mut self.rng);
        self.phase = Phase::Countdown {
            scheduled_start: wall_now + self.settings.countdown_secs,
        };
    }

    /// Centers the ball and draws both velocity components uniformly from
    /// the starting range, sign uniform.
    fn spawn(settings: &Game, rng: &mut StdRng) -> Position {
        let mut component = |rng: &mut StdRng| {
            let magnitude = rng.gen_range(
                settings.ball_min_starting_velo..=settings.ball_max_starting_velo,
            );
            if rng.gen::<bool>() {
                magnitude
            } else {
                -magnitude
            }
        };

        let dx = component(rng);
        let dy = component(rng);

        Position::new(settings.cols as f32 / 2.0, settings.rows as f32 / 2.0, dx, dy)
    }

    /// Deflects the ball off a paddle when their boxes overlap. Resolution
    /// picks the paddle side closest to the ball center in x; dx is flipped
    /// only when pointing into the paddle and the deflected component is
    /// capped, dy stays untouched.
    fn deflect(ball: &mut Position, paddle: &Position, settings: &Game) {
        let len = settings.player_length;
        let radius = settings.ball_radius;

        let overlap = ball.x + radius > paddle.x
            && ball.x - radius < paddle.x + len
            && ball.y + radius > paddle.y
            && ball.y - radius < paddle.y + len;

        if !overlap {
            return;
        }

        if ball.x < paddle.x + len / 2.0 {
            ball.x = paddle.x - radius;
            if ball.dx > 0.0 {
                ball.dx = -ball.dx;
            }
        } else {
            ball.x = paddle.x + len + radius;
            if ball.dx < 0.0 {
                ball.dx = -ball.dx;
            }
        }

        ball.dx = ball.dx.max(-settings.ball_max_velo).min(settings.ball_max_velo);
    }

    #[inline]
    fn slot_index(id: PlayerId) -> Option<usize> {
        if id >= 1 && id as usize <= MAX_CLIENTS {
            Some(id as usize - 1)
        } else {
            None
        }
    }
}
