use clap::{Arg, Command};
use gamecore::config::GameConfig;
use gamecore::session::Session;
use lumen::logging;
use std::process;

fn main() {
    let matches = Command::new("Game Server")
        .version("1.0")
        .about("Runs the authoritative pong server.")
        .arg(
            Arg::new("CONFIG_FILE")
                .help("Path to the config file, defaults apply without one")
                .required(false),
        )
        .get_matches();

    let config = match matches.get_one::<String>("CONFIG_FILE") {
        Some(path) => GameConfig::load(path),
        None => GameConfig::default(),
    };

    let logger = logging::init();

    logging::info!(logger, "starting game server"; "address" => config.address());

    let mut session = match Session::new(&config, &logger) {
        Ok(session) => session,
        Err(err) => {
            logging::crit!(logger, "failed acquiring server sockets";
                           "address" => config.address(),
                           "error" => ?err);
            process::exit(1);
        }
    };

    session.run();
}
