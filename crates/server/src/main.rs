//! quartz-server — RESP2 server binary.
//!
//! Flags: `-addr <host:port>` (default `:6379`), `-dir <path>` for the
//! substrate directory, `-log-level <DEBUG|INFO|WARN|ERROR>` with the
//! `LOG_LEVEL` environment variable taking precedence. Exits 0 on clean
//! shutdown, 1 on initialization failure.

use clap::{Arg, Command};
use quartz_engine::Database;
use quartz_server::server;
use std::process;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn build_cli() -> Command {
    Command::new("quartz-server")
        .about("RESP-compatible multi-structure key/value server")
        .arg(
            Arg::new("addr")
                .short('a')
                .long("addr")
                .value_name("HOST:PORT")
                .default_value(":6379")
                .help("Listen address"),
        )
        .arg(
            Arg::new("dir")
                .short('d')
                .long("dir")
                .value_name("PATH")
                .default_value("./quartz-data")
                .help("Substrate directory"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .default_value("INFO")
                .help("DEBUG, INFO, WARN or ERROR (env LOG_LEVEL overrides)"),
        )
}

fn init_logging(flag_level: &str) {
    let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| flag_level.to_string());
    let filter = EnvFilter::try_new(level.to_ascii_lowercase())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() {
    let matches = build_cli().get_matches();
    init_logging(matches.get_one::<String>("log-level").unwrap());

    // A bare ":6379" listens on all interfaces.
    let addr = {
        let raw = matches.get_one::<String>("addr").unwrap();
        if let Some(port) = raw.strip_prefix(':') {
            format!("0.0.0.0:{}", port)
        } else {
            raw.clone()
        }
    };
    let dir = matches.get_one::<String>("dir").unwrap();

    let db = match Database::open(dir) {
        Ok(db) => db,
        Err(e) => {
            error!(error = %e, dir, "failed to open database");
            process::exit(1);
        }
    };
    info!(dir, "database open");

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start runtime");
            process::exit(1);
        }
    };
    let result = runtime.block_on(async {
        let listener = TcpListener::bind(&addr).await?;
        server::serve(listener, db).await
    });
    if let Err(e) = result {
        error!(error = %e, "server terminated");
        process::exit(1);
    }
}
