//! this binary starts the aviary server
//! to see the list of options, type: `aviary-server --help`

use std::process::exit;

use aviary::{AviaryServer, Result, ServerConfig};
use clap::{crate_version, App, Arg};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

const DEFAULT_PORT: &str = "4000";
const DEFAULT_DATA_DIR: &str = "serverdata";
const DEFAULT_WORKERS: &str = "2";

fn main() {
    // set up a tracing subscriber to log to STDERR
    subscriber_config();

    // parse command line args
    let matches = App::new("aviary-server")
        .version(crate_version!())
        .about("a multi-threaded store for bird observations")
        .arg(
            Arg::with_name("port")
                .long("port")
                .value_name("PORT")
                .help("sets the TCP port the server listens on")
                .default_value(DEFAULT_PORT),
        )
        .arg(
            Arg::with_name("data")
                .long("data")
                .value_name("DIR")
                .help("sets the directory where birds and sightings are persisted")
                .default_value(DEFAULT_DATA_DIR),
        )
        .arg(
            Arg::with_name("workers")
                .long("workers")
                .value_name("COUNT")
                .help("sets the number of worker threads executing commands")
                .default_value(DEFAULT_WORKERS),
        )
        .get_matches();

    // validate command line options before any socket is opened
    let config = match ServerConfig::build(
        matches.value_of("port").unwrap(),
        matches.value_of("data").unwrap(),
        matches.value_of("workers").unwrap(),
    ) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{}", err);
            exit(1);
        }
    };

    // start the server
    if let Err(e) = run(config) {
        eprintln!("{}", e);
        exit(1);
    }
}

fn run(config: ServerConfig) -> Result<()> {
    info!("aviary-server {}", env!("CARGO_PKG_VERSION"));
    info!(
        "starting with port {}, data directory {:?}, {} workers",
        config.port, config.data_dir, config.workers
    );
    let server = AviaryServer::new(config)?;
    server.run()
}

/// configures a tracing subscriber that will log to STDERR
fn subscriber_config() {
    let subscriber = FmtSubscriber::builder()
        // all spans/events with a level higher than DEBUG (e.g, info, warn, etc.)
        // will be logged
        .with_max_level(Level::DEBUG)
        // log to stderr instead of stdout
        .with_writer(std::io::stderr)
        // completes the builder.
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("setting tracing default subscriber failed");
}
