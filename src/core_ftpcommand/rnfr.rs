use crate::core_ftpcommand::utils::{real_path, virtual_path};
use crate::core_network::error::Result;
use crate::session::Session;

/// Handles RNFR: remembers the rename source for the following RNTO.
pub async fn handle_rnfr(session: &mut Session, arg: &str) -> Result<()> {
    if arg.is_empty() {
        session
            .control
            .reply(501u16, "Syntax: RNFR <path>")
            .await?;
        return Ok(());
    }
    let target = virtual_path(&session.current_dir, arg);
    let real = real_path(&session.context.config.server.base_path, &target);
    if tokio::fs::metadata(&real).await.is_err() {
        session
            .control
            .reply(550u16, &format!("{}: No such file or directory.", arg))
            .await?;
        return Ok(());
    }
    session.rename_from = Some(real);
    session
        .control
        .reply(350u16, "File exists, send RNTO to continue.")
        .await
}
