use std::time::Duration;

use anyhow::Result;
use clap::Parser;

use kinsync::{SyncConfig, UdpTransport};
use kinsync_server::SyncServer;

#[derive(Parser)]
#[command(name = "kinsync-server")]
#[command(about = "State replication relay server")]
struct Args {
    #[arg(short, long, default_value_t = kinsync::DEFAULT_PORT)]
    port: u16,

    #[arg(long, default_value = "kinsync", help = "Application/protocol identifier")]
    app_id: String,

    #[arg(long, default_value_t = 60, help = "Network pump rate (updates/sec)")]
    net_rate: u32,

    #[arg(long, default_value_t = 10.0, help = "Connection timeout in seconds")]
    timeout: f32,

    #[arg(long, default_value_t = 2000, help = "Heartbeat interval in ms")]
    heartbeat_interval: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = SyncConfig {
        app_id: args.app_id.clone(),
        port: args.port,
        net_rate: args.net_rate,
        timeout_secs: args.timeout,
        heartbeat_interval_ms: args.heartbeat_interval,
        ..Default::default()
    };

    let transport = UdpTransport::new(&args.app_id, Duration::from_secs_f32(args.timeout));
    let mut server = SyncServer::new(transport, config);
    server.listen()?;
    log::info!("listening on port {}", args.port);

    server.run();
    Ok(())
}
