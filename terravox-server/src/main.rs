use std::{path::PathBuf, time::Duration};

use crossbeam_channel::{select, tick};
use structopt::StructOpt;

use terravox_common::material::{load_registry, MaterialRegistry};
use terravox_server::room::RoomManager;

/// The world core of the terravox server. A transport layer (WebSocket +
/// HTTP onboarding) embeds this loop and feeds frames through
/// [`terravox_server::room::dispatch`]; standalone it runs the world ticks
/// and persistence cadence.
#[derive(Debug, StructOpt)]
#[structopt(name = "terravox-server")]
struct Options {
    #[structopt(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    #[structopt(long, env = "PORT", default_value = "8080")]
    port: u16,

    /// debug|info|warn|error|none
    #[structopt(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[structopt(long, env = "DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,

    /// material manifest; the built-in set is used when absent
    #[structopt(long)]
    materials: Option<PathBuf>,
}

const TICK_INTERVAL: Duration = Duration::from_millis(33);
const SNAPSHOT_INTERVAL: Duration = Duration::from_millis(100);
const FLUSH_INTERVAL: Duration = Duration::from_secs(30);
const SHUTDOWN_FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

fn init_logging(level: &str) {
    let filter = match level {
        "none" => "off",
        other => other,
    };
    env_logger::Builder::new().parse_filters(filter).init();
}

fn run(options: &Options, shutdown: crossbeam_channel::Receiver<()>) -> anyhow::Result<i32> {
    let registry = match &options.materials {
        Some(path) => load_registry(path)?,
        None => MaterialRegistry::with_default_materials(),
    };

    std::fs::create_dir_all(&options.data_dir)?;
    let mut manager = RoomManager::new(&options.data_dir, registry);

    log::info!(
        "world core up; transport binds {}:{}, data in {}",
        options.host,
        options.port,
        options.data_dir.display()
    );

    let ticks = tick(TICK_INTERVAL);
    let snapshots = tick(SNAPSHOT_INTERVAL);
    let flushes = tick(FLUSH_INTERVAL);

    loop {
        select! {
            recv(ticks) -> _ => manager.tick_all(),
            recv(snapshots) -> _ => manager.broadcast_snapshots(),
            recv(flushes) -> _ => {
                let written = manager.flush_all();
                if written > 0 {
                    log::debug!("periodic flush wrote {} records", written);
                }
            }
            recv(shutdown) -> _ => break,
        }
    }

    // final flush, bounded; an unwritable store must not wedge shutdown
    let deadline = std::time::Instant::now() + SHUTDOWN_FLUSH_TIMEOUT;
    let mut written = 0;
    for room in manager.rooms_mut() {
        written += room.flush_stores();
        if std::time::Instant::now() > deadline {
            log::error!(
                "shutdown flush exceeded {:?}, exiting with dirty rooms",
                SHUTDOWN_FLUSH_TIMEOUT
            );
            return Ok(2);
        }
    }
    log::info!("shutdown flush wrote {} records", written);
    Ok(0)
}

fn main() {
    let options = Options::from_args();
    init_logging(&options.log_level);

    // transports signal this to stop the loop; the standalone binary keeps
    // the sender parked and runs until killed
    let (_shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);

    match run(&options, shutdown_rx) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            log::error!("startup failed: {:#}", err);
            std::process::exit(1);
        }
    }
}
