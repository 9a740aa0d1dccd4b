use crate::core_network::control::ReplyCode;
use crate::core_network::error::Result;
use crate::session::Session;

/// Handles STAT outside a transfer: a multi-line server status listing
/// the online sessions from the registry.
pub async fn handle_stat(session: &mut Session, _arg: &str) -> Result<()> {
    let who = session.context.registry.who();
    session
        .control
        .part_reply(ReplyCode::Code(211), "Server status:")
        .await?;
    for snapshot in &who {
        let name = if snapshot.info.user_name.is_empty() {
            "-"
        } else {
            &snapshot.info.user_name
        };
        let command = if snapshot.info.current_command.is_empty() {
            "idle"
        } else {
            &snapshot.info.current_command
        };
        let line = format!(
            " {:>4}  {:<12} {:<24} {} bytes",
            snapshot.id, name, command, snapshot.transferred
        );
        session
            .control
            .part_reply(ReplyCode::NoCode, &line)
            .await?;
    }
    session
        .control
        .reply(211u16, &format!("End of status. {} session(s) online.", who.len()))
        .await
}
