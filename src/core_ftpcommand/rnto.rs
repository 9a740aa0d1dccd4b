use log::info;

use crate::core_ftpcommand::utils::{real_path, virtual_path};
use crate::core_network::error::Result;
use crate::session::Session;

/// Handles RNTO: completes the rename armed by RNFR.
pub async fn handle_rnto(session: &mut Session, arg: &str) -> Result<()> {
    if arg.is_empty() {
        session
            .control
            .reply(501u16, "Syntax: RNTO <path>")
            .await?;
        return Ok(());
    }
    let from = match session.rename_from.take() {
        Some(from) => from,
        None => {
            session
                .control
                .reply(503u16, "Send RNFR first.")
                .await?;
            return Ok(());
        }
    };
    let target = virtual_path(&session.current_dir, arg);
    let to = real_path(&session.context.config.server.base_path, &target);
    match tokio::fs::rename(&from, &to).await {
        Ok(()) => {
            info!("Renamed {:?} to {:?}", from, to);
            session
                .control
                .reply(250u16, "RNTO command successful.")
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
