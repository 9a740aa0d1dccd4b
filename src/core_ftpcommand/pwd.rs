use crate::core_network::error::Result;
use crate::session::Session;

pub async fn handle_pwd(session: &mut Session, _arg: &str) -> Result<()> {
    let message = format!("\"{}\" is current directory.", session.current_dir);
    session.control.reply(257u16, &message).await
}
