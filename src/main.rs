#[macro_use]
extern crate slog;
extern crate slog_async;
extern crate slog_term;

use clap::Parser;
use kea_admin::config::Config;
use kea_admin::manager::Manager;
use kea_admin::{web, Result};
use slog::Drain;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Notify;

/// Manage Kea DHCPv4 reservations and inspect leases over HTTP.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// JSON settings file; built-in defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listen address from the settings file
    #[arg(short, long)]
    listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    let logger = slog::Logger::root(drain, o!());

    let code = match run(Args::parse(), &logger).await {
        Ok(()) => 0,
        Err(err) => {
            crit!(logger, "{}", err);
            1
        }
    };
    // flush the async drain before exiting
    drop(logger);
    std::process::exit(code);
}

async fn run(args: Args, logger: &slog::Logger) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => Config::load(path).map_err(|err| {
            error!(logger, "Failed loading settings"; "path" => path.display().to_string());
            err
        })?,
        None => Config::default(),
    };
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    info!(logger, "Starting";
          "config" => config.config_path.display().to_string(),
          "leases" => config.lease_path.display().to_string());

    let manager = Arc::new(Manager::create(&config, logger.clone()));
    let shutdown = Arc::new(Notify::new());

    // background shutdown handle
    let shutdown_bg = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown_bg.notify_one();
        }
    });

    web::serve(config.listen, manager, shutdown, logger.clone()).await
}
