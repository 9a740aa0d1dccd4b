mod config;
mod core_acl;
mod core_cli;
mod core_ftpcommand;
mod core_network;
mod core_tls;
mod core_transfer;
mod server;
mod session;

use std::io::Write;

use anyhow::Result;
use env_logger::{Builder, Env};
use structopt::StructOpt;

use crate::config::Config;
use crate::core_cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::from_args();

    let default_level = if args.verbose { "debug" } else { "info" };
    Builder::from_env(Env::default().default_filter_or(default_level))
        .format(|buf, record| {
            let timestamp = buf.timestamp();
            writeln!(
                buf,
                "[{}] [{}] {}",
                timestamp,
                record.level(),
                record.args()
            )
        })
        .init();

    let mut config = Config::load_from_file(&args.config)?;
    if let Some(port) = args.port {
        config.server.listen_port = port;
    }

    server::run(config).await
}
