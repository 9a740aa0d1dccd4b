use log::info;

use crate::core_ftpcommand::utils::{real_path, virtual_path};
use crate::core_network::error::Result;
use crate::session::Session;

pub async fn handle_dele(session: &mut Session, arg: &str) -> Result<()> {
    if arg.is_empty() {
        session
            .control
            .reply(501u16, "Syntax: DELE <file>")
            .await?;
        return Ok(());
    }
    let target = virtual_path(&session.current_dir, arg);
    let real = real_path(&session.context.config.server.base_path, &target);
    match tokio::fs::remove_file(&real).await {
        Ok(()) => {
            info!("Deleted {:?}", real);
            session
                .control
                .reply(250u16, "DELE command successful.")
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
