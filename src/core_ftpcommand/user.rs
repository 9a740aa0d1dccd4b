use log::warn;

use crate::core_network::error::Result;
use crate::session::Session;

/// Handles the USER command: selects the account and moves the session to
/// WaitingPassword. A leading `!` requests a kick-login, which replaces
/// the user's other sessions once the password checks out.
pub async fn handle_user(session: &mut Session, arg: &str) -> Result<()> {
    let arg = arg.trim();
    if arg.is_empty() {
        session
            .control
            .reply(501u16, "Syntax: USER <username>")
            .await?;
        return Ok(());
    }

    let (kick_login, name) = match arg.strip_prefix('!') {
        Some(rest) => (true, rest),
        None => (false, arg),
    };

    match session.context.users.find(name).cloned() {
        Some(user) => {
            session
                .control
                .reply(331u16, &format!("Password required for {}.", user.name))
                .await?;
            session.set_waiting_password(user, kick_login);
        }
        None => {
            warn!(
                "Login attempt for unknown user {} from {}",
                name,
                session.control.peer_addr()
            );
            session.control.reply(530u16, "Login incorrect.").await?;
        }
    }
    Ok(())
}
