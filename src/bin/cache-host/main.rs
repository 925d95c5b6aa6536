mod args;

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn, Level};

use args::Args;
use hivecache::config::HostConfig;
use hivecache::host::server;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    if args.debug {
        tracing_subscriber::fmt().with_max_level(Level::TRACE).init();
    } else {
        tracing_subscriber::fmt().json().init();
    }

    let config = HostConfig {
        listen_address: args.listen.to_string(),
        listen_port: args.port,
        data_dir: args.data_dir,
        memory_limit_pct: args.memory_limit_pct,
        max_frame_size: args.max_frame_size,
        expiration_sweep_interval: Duration::from_secs(args.expiration_sweep_secs),
        memory_watch_interval: Duration::from_secs(args.memory_watch_secs),
    };

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(error) = signal::ctrl_c().await {
                warn!(%error, "something strange with ctrl-c handling!");
            }
            cancel.cancel();
        });
    }

    match server::run(config, cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!(%error, "encountered runtime error");
            ExitCode::FAILURE
        },
    }
}
