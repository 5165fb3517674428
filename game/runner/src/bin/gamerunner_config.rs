use gamecore::config::GameConfig;
use serdeconv;

/// Prints the default server configuration as TOML, ready to be saved and
/// passed to gamerunner. The header documents what clients will be told.
fn main() {
    let config = GameConfig::default();
    let advert = config.game.advert();

    let toml = serdeconv::to_toml_string(&config)
        .expect("Failed rendering the default configuration");

    println!("# Default gamerunner configuration.");
    println!("# Save and pass the file path as the first argument.");
    println!(
        "# Clients are advertised a {}x{} board, {} ms ticks, ball radius {}, paddle length {}.",
        advert.cols, advert.rows, advert.tick_rate_ms, advert.ball_radius, advert.player_length
    );
    println!();
    print!("{}", toml);
}
