use crate::core_network::error::Result;
use crate::session::Session;

/// Handles the TYPE command. Transfers are always binary-clean; ASCII
/// mode is accepted for compatibility but not translated.
pub async fn handle_type(session: &mut Session, arg: &str) -> Result<()> {
    match arg.to_ascii_uppercase().as_str() {
        "A" | "I" | "L 8" => {
            session
                .control
                .reply(200u16, &format!("TYPE set to {}.", arg.to_ascii_uppercase()))
                .await
        }
        _ => {
            session
                .control
                .reply(504u16, "TYPE not supported.")
                .await
        }
    }
}
