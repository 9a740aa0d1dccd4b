use crate::core_ftpcommand::utils::{real_path, virtual_path};
use crate::core_network::error::Result;
use crate::session::Session;

/// Handles the CWD command. The target must exist as a directory under
/// the base path.
pub async fn handle_cwd(session: &mut Session, arg: &str) -> Result<()> {
    if arg.is_empty() {
        session
            .control
            .reply(501u16, "Syntax: CWD <directory>")
            .await?;
        return Ok(());
    }
    change_dir(session, arg).await
}

pub async fn handle_cdup(session: &mut Session, _arg: &str) -> Result<()> {
    change_dir(session, "..").await
}

async fn change_dir(session: &mut Session, arg: &str) -> Result<()> {
    let target = virtual_path(&session.current_dir, arg);
    let real = real_path(&session.context.config.server.base_path, &target);
    match tokio::fs::metadata(&real).await {
        Ok(meta) if meta.is_dir() => {
            session.current_dir = target.clone();
            session
                .control
                .reply(250u16, &format!("CWD command successful. \"{}\"", target))
                .await
        }
        _ => {
            session
                .control
                .reply(550u16, &format!("{}: No such directory.", arg))
                .await
        }
    }
}
