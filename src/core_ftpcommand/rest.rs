use crate::core_network::error::Result;
use crate::session::Session;

/// Handles the REST command: arms the restart offset for the next
/// RETR/STOR. The offset is reset whenever the data channel closes.
pub async fn handle_rest(session: &mut Session, arg: &str) -> Result<()> {
    match arg.parse::<u64>() {
        Ok(offset) => {
            session.data.set_restart_offset(offset);
            session
                .control
                .reply(
                    350u16,
                    &format!("Restarting at {}. Send STOR or RETR to continue.", offset),
                )
                .await
        }
        Err(_) => {
            session
                .control
                .reply(501u16, "Syntax: REST <offset>")
                .await
        }
    }
}
