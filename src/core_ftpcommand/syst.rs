use crate::core_network::error::Result;
use crate::session::Session;

pub async fn handle_syst(session: &mut Session, _arg: &str) -> Result<()> {
    session.control.reply(215u16, "UNIX Type: L8").await
}
