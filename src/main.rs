use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::{error, info};

use evdi_vnc::config::{DEFAULT_BANDWIDTH_HINT, DEFAULT_REFRESH_RATE};
use evdi_vnc::evdi::node::EvdiNode;
use evdi_vnc::vnc::{RustVncScreen, DEFAULT_PORT};
use evdi_vnc::{Bridge, BridgeConfig, Result};

#[derive(Parser, Debug)]
#[command(name = "evdi-vnc", about = "Serve an EVDI virtual display over VNC")]
struct Args {
    /// VNC port to listen on.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    #[arg(long, default_value = "evdi-vnc")]
    desktop_name: String,

    /// VNC password. Leave unset for no authentication.
    #[arg(long)]
    password: Option<String>,

    /// EDID file to announce instead of the built-in monitor.
    #[arg(long)]
    edid: Option<PathBuf>,

    /// Mode bandwidth limit (width * height * refresh) passed to the kernel.
    #[arg(long, default_value_t = DEFAULT_BANDWIDTH_HINT)]
    bandwidth_hint: u32,

    /// Refresh rate used to pace modes that report 0 Hz.
    #[arg(long, default_value_t = DEFAULT_REFRESH_RATE)]
    fallback_refresh_rate: u32,

    /// Log filter, overridden by RUST_LOG.
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn config_from(args: Args) -> Result<BridgeConfig> {
    let mut config = BridgeConfig::default()
        .with_port(args.port)?
        .with_desktop_name(args.desktop_name)
        .with_password(args.password)
        .with_bandwidth_hint(args.bandwidth_hint)?
        .with_fallback_refresh_rate(args.fallback_refresh_rate)?;
    if let Some(path) = args.edid {
        config = config.with_edid_file(&path)?;
    }
    Ok(config)
}

fn run(config: BridgeConfig) -> Result<()> {
    let node = EvdiNode::open()?;
    let mut bridge: Bridge<EvdiNode, RustVncScreen> = Bridge::new(node, config);
    bridge.run()
}

fn main() -> ExitCode {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(args.log_level.as_str()))
        .init();

    let result = config_from(args).and_then(run);
    match result {
        Ok(()) => {
            info!("VNC server stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
