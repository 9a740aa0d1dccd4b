use crate::core_network::error::Result;
use crate::session::{Session, SessionState};

pub async fn handle_quit(session: &mut Session, _arg: &str) -> Result<()> {
    session.control.reply(221u16, "Goodbye.").await?;
    session.set_state(SessionState::Finished);
    Ok(())
}
