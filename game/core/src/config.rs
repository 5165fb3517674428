use racket::wire::BoardAdvert;
use serde_derive::{Deserialize, Serialize};
use serdeconv;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 9034;

#[derive(Serialize, Deserialize, Clone)]
pub struct Server {
    pub address: Option<String>,
}

/// Board geometry and physics tuning. Clients share these through the
/// register response advert.
#[derive(Serialize, Deserialize, Copy, Clone)]
pub struct Game {
    pub cols: u32,
    pub rows: u32,
    pub tick_rate_ms: u64,
    pub countdown_secs: u64,
    pub ball_radius: f32,
    pub player_length: f32,
    pub ball_max_velo: f32,
    pub ball_min_starting_velo: f32,
    pub ball_max_starting_velo: f32,
}

#[derive(Serialize, Deserialize, Clone)]
pub struct GameConfig {
    pub server: Server,
    pub game: Game,
}

impl Default for GameConfig {
    fn default() -> GameConfig {
        GameConfig {
            server: Server {
                address: Some(format!("0.0.0.0:{}", DEFAULT_PORT)),
            },
            game: Game {
                cols: 200,
                rows: 50,
                tick_rate_ms: 16,
                countdown_secs: 5,
                ball_radius: 1.0,
                player_length: 2.5,
                ball_max_velo: 10.0,
                ball_min_starting_velo: 10.0,
                ball_max_starting_velo: 15.0,
            },
        }
    }
}

impl GameConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> GameConfig {
        serdeconv::from_toml_file(path).expect("Error loading game configuration file")
    }

    pub fn address(&self) -> String {
        match &self.server.address {
            Some(address) => address.clone(),
            None => format!("0.0.0.0:{}", DEFAULT_PORT),
        }
    }
}

impl Game {
    #[inline]
    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_rate_ms)
    }

    #[inline]
    pub fn advert(&self) -> BoardAdvert {
        BoardAdvert {
            cols: self.cols,
            rows: self.rows,
            tick_rate_ms: self.tick_rate_ms as u32,
            ball_radius: self.ball_radius,
            player_length: self.player_length,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_board_constants() {
        let config = GameConfig::default();

        assert_eq!(config.game.cols, 200);
        assert_eq!(config.game.rows, 50);
        assert_eq!(config.game.tick_rate_ms, 16);
        assert_eq!(config.game.countdown_secs, 5);
        assert_eq!(config.address(), "0.0.0.0:9034");
    }

    #[test]
    fn test_address_fallback() {
        let mut config = GameConfig::default();
        config.server.address = None;

        assert_eq!(config.address(), format!("0.0.0.0:{}", DEFAULT_PORT));
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = GameConfig::default();

        let toml = serdeconv::to_toml_string(&config).unwrap();
        let parsed: GameConfig = serdeconv::from_toml_str(&toml).unwrap();

        assert_eq!(parsed.game.cols, config.game.cols);
        assert_eq!(parsed.game.ball_max_starting_velo, config.game.ball_max_starting_velo);
        assert_eq!(parsed.address(), config.address());
    }

    #[test]
    fn test_advert_mirrors_game_settings() {
        let config = GameConfig::default();
        let advert = config.game.advert();

        assert_eq!(advert.cols, 200);
        assert_eq!(advert.rows, 50);
        assert_eq!(advert.tick_rate_ms, 16);
        assert_eq!(advert.ball_radius, 1.0);
        assert_eq!(advert.player_length, 2.5);
    }
}
