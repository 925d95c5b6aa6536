use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(about, long_about = None, version)]
pub struct Args {
    /// Address to listen on.
    #[arg(short, long, default_value_t = IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)))]
    pub listen: IpAddr,
    /// (TCP) port to listen on.
    #[arg(short, long, default_value_t = 33_331)]
    pub port: u16,
    /// Enables on-disk persistence and sets the directory to store records in.
    #[arg(short = 'd', long)]
    pub data_dir: Option<PathBuf>,
    /// Sets the maximum allowed frame size, in bytes.
    #[arg(short = 'z', long, default_value_t = 16 * 1024 * 1024)]
    pub max_frame_size: u32,
    /// Evicts least-recently-touched entries once resident memory crosses this
    /// percentage of total system memory. 0 disables pressure eviction.
    #[arg(short = 'm', long, default_value_t = 0.0)]
    pub memory_limit_pct: f64,
    /// Seconds between expiration sweeps.
    #[arg(long, default_value_t = 2)]
    pub expiration_sweep_secs: u64,
    /// Seconds between memory-pressure checks.
    #[arg(long, default_value_t = 5)]
    pub memory_watch_secs: u64,
    /// Enables human-friendly logging.
    #[arg(short, long, default_value_t)]
    pub debug: bool,
}
