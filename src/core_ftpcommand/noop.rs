use crate::core_network::error::Result;
use crate::session::Session;

pub async fn handle_noop(session: &mut Session, _arg: &str) -> Result<()> {
    session
        .control
        .reply(200u16, "NOOP command successful.")
        .await
}
