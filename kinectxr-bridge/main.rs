/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use kinectxr_bridge::protocol;
use kinectxr_bridge::server::BridgeServer;
use kinectxr_bridge::source;

use clap::Parser;
use log::info;
use tokio::sync::watch;

/// Republishes the Kinect's RGB and depth streams over a localhost
/// WebSocket for browser clients.
#[derive(Parser)]
#[command(name = "kinectxr-bridge", version)]
struct Args {
    /// Serve synthetic frames instead of opening the hardware.
    #[arg(long)]
    mock: bool,

    /// TCP port to listen on.
    #[arg(long, default_value_t = protocol::DEFAULT_PORT)]
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let source = source::start_source(args.mock)?;
    let server = BridgeServer::bind(args.port).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            let _ = shutdown_tx.send(true);
        }
    });

    server.serve(source, shutdown_rx).await
}
