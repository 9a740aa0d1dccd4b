use crate::core_ftpcommand::utils::{real_path, virtual_path};
use crate::core_network::error::Result;
use crate::session::Session;

pub async fn handle_size(session: &mut Session, arg: &str) -> Result<()> {
    if arg.is_empty() {
        session
            .control
            .reply(501u16, "Syntax: SIZE <file>")
            .await?;
        return Ok(());
    }
    let target = virtual_path(&session.current_dir, arg);
    let real = real_path(&session.context.config.server.base_path, &target);
    match tokio::fs::metadata(&real).await {
        Ok(meta) if meta.is_file() => {
            session
                .control
                .reply(213u16, &meta.len().to_string())
                .await
        }
        _ => {
            session
                .control
                .reply(550u16, &format!("{}: No such file.", arg))
                .await
        }
    }
}
