use crate::core_network::control::ReplyCode;
use crate::core_network::error::Result;
use crate::session::Session;

const FEATURES: &[&str] = &[
    "AUTH TLS", "PBSZ", "PROT", "SSCN", "CPSV", "EPSV", "EPRT", "LPSV", "LPRT", "SIZE",
    "REST STREAM",
];

/// Feature listing per RFC 2389: indented uncoded lines between a coded
/// header and terminator.
pub async fn handle_feat(session: &mut Session, _arg: &str) -> Result<()> {
    session
        .control
        .part_reply(ReplyCode::Code(211), "Extensions supported:")
        .await?;
    for feature in FEATURES {
        session
            .control
            .part_reply(ReplyCode::NoCode, &format!(" {}", feature))
            .await?;
    }
    session.control.reply(211u16, "End.").await
}
