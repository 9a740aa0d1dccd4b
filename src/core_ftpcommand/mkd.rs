use log::info;

use crate::core_ftpcommand::utils::{real_path, virtual_path};
use crate::core_network::error::Result;
use crate::session::Session;

pub async fn handle_mkd(session: &mut Session, arg: &str) -> Result<()> {
    if arg.is_empty() {
        session
            .control
            .reply(501u16, "Syntax: MKD <directory>")
            .await?;
        return Ok(());
    }
    let target = virtual_path(&session.current_dir, arg);
    let real = real_path(&session.context.config.server.base_path, &target);
    match tokio::fs::create_dir(&real).await {
        Ok(()) => {
            info!("Created directory {:?}", real);
            session
                .control
                .reply(257u16, &format!("\"{}\" created.", target))
                .await
        }
        Err(e) => {
            session
                .control
                .reply(550u16, &format!("{}: {}.", arg, e.kind()))
                .await
        }
    }
}

pub async fn handle_rmd(session: &mut Session, arg: &str) -> Result<()> {
    if arg.is_empty() {
        session
            .control
            .reply(501u16, "Syntax: RMD <directory>")
            .await?;
        return Ok(());
    }
    let target = virtual_path(&session.current_dir, arg);
    let real = real_path(&session.context.config.server.base_path, &target);
    match tokio::fs::remove_dir(&real).await {
        Ok(()) => {
            info!("Removed directory {:?}", real);
            session
                .control
                .reply(250u16, "RMD command successful.")
                .await
        }
        Err(e) => {
            session
                .control
                .reply(550u16, &format!("{}: {}.", arg, e.kind()))
                .await
        }
    }
}
