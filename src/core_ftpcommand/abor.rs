use crate::core_network::error::Result;
use crate::session::Session;

/// ABOR outside a transfer: drops whatever negotiation or connection is
/// pending and confirms. The mid-transfer case is answered from inside
/// the transfer loop.
pub async fn handle_abor(session: &mut Session, _arg: &str) -> Result<()> {
    session.data.close();
    session
        .control
        .reply(226u16, "ABOR command successful.")
        .await
}
