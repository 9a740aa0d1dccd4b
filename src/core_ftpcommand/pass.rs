use log::{info, warn};

use crate::core_network::error::Result;
use crate::core_transfer::counter::CounterResult;
use crate::session::{Session, SessionState};

/// Handles the PASS command. Three wrong passwords close the connection.
/// A confirmed kick-login evicts the user's other sessions before taking
/// their slot.
pub async fn handle_pass(session: &mut Session, arg: &str) -> Result<()> {
    if !session.verify_password(arg) {
        if session.password_attempts_exceeded() {
            warn!(
                "Password attempts exceeded from {}",
                session.control.peer_addr()
            );
            session
                .control
                .reply(530u16, "Password attempts exceeded, closing connection.")
                .await?;
            session.set_state(SessionState::Finished);
        } else {
            session.control.reply(530u16, "Login incorrect.").await?;
        }
        return Ok(());
    }

    if session.kick_login() {
        if let Some(user) = session.user() {
            let (uid, name) = (user.uid, user.name.clone());
            let id = session.id();
            let kicked = session.context.registry.kick_user(uid, id);
            if kicked > 0 {
                info!("Kicked {} other session(s) of user {}", kicked, name);
            }
        }
    }

    match session.set_logged_in() {
        Ok(()) => {
            session
                .control
                .reply(230u16, "User logged in, proceed.")
                .await?;
        }
        Err(CounterResult::GlobalFail) => {
            session
                .control
                .reply(
                    530u16,
                    "The server has reached its maximum number of logged in users.",
                )
                .await?;
        }
        Err(_) => {
            let max = session.user().map(|u| u.max_logins).unwrap_or(0);
            session
                .control
                .reply(
                    530u16,
                    &format!("You've reached your maximum of {} login(s).", max),
                )
                .await?;
        }
    }
    Ok(())
}
