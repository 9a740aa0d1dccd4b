//! TLS-related commands: AUTH, PBSZ, PROT, SSCN and the CCC rejection.

use log::{debug, warn};

use crate::core_network::data::SscnMode;
use crate::core_network::error::Result;
use crate::session::Session;

/// Handles AUTH TLS: upgrades the control channel in place. The 234 goes
/// out in plaintext, the handshake follows immediately after.
pub async fn handle_auth(session: &mut Session, arg: &str) -> Result<()> {
    if !arg.eq_ignore_ascii_case("TLS") && !arg.eq_ignore_ascii_case("SSL") {
        session
            .control
            .reply(504u16, "AUTH type not supported.")
            .await?;
        return Ok(());
    }
    if session.control.is_tls() {
        session
            .control
            .reply(503u16, "Control channel already protected.")
            .await?;
        return Ok(());
    }
    let tls = match &session.context.tls {
        Some(tls) => tls.acceptor().clone(),
        None => {
            session
                .control
                .reply(431u16, "TLS is not enabled.")
                .await?;
            return Ok(());
        }
    };
    session
        .control
        .reply(234u16, "AUTH TLS successful.")
        .await?;
    match session.control.negotiate_tls(&tls).await {
        Ok(()) => {
            debug!(
                "Control channel with {} upgraded to TLS",
                session.control.peer_addr()
            );
            Ok(())
        }
        Err(e) => {
            warn!(
                "TLS handshake with {} failed: {}",
                session.control.peer_addr(),
                e
            );
            Err(e)
        }
    }
}

pub async fn handle_pbsz(session: &mut Session, arg: &str) -> Result<()> {
    if arg != "0" {
        session
            .control
            .reply(501u16, "Only PBSZ 0 is supported.")
            .await?;
        return Ok(());
    }
    session.control.reply(200u16, "PBSZ 0 successful.").await
}

pub async fn handle_prot(session: &mut Session, arg: &str) -> Result<()> {
    match arg.to_ascii_uppercase().as_str() {
        "C" => {
            session.data.set_protection(false);
            session
                .control
                .reply(200u16, "Protection set to 'clear'.")
                .await
        }
        "P" => {
            session.data.set_protection(true);
            session
                .control
                .reply(200u16, "Protection set to 'private'.")
                .await
        }
        _ => {
            session
                .control
                .reply(504u16, "Protection level not supported.")
                .await
        }
    }
}

/// Handles SSCN, which flips the TLS role of our end of the data
/// connection for secure site-to-site transfers.
pub async fn handle_sscn(session: &mut Session, arg: &str) -> Result<()> {
    match arg.to_ascii_uppercase().as_str() {
        "ON" => session.data.set_sscn_mode(SscnMode::Client),
        "OFF" => session.data.set_sscn_mode(SscnMode::Server),
        "" => {}
        _ => {
            session
                .control
                .reply(501u16, "Syntax: SSCN [ON|OFF]")
                .await?;
            return Ok(());
        }
    }
    let mode = match session.data.sscn_mode() {
        SscnMode::Client => "CLIENT",
        SscnMode::Server => "SERVER",
    };
    session
        .control
        .reply(200u16, &format!("SSCN:{} METHOD", mode))
        .await
}

/// CCC is refused: once protected, the control channel stays protected.
pub async fn handle_ccc(session: &mut Session, _arg: &str) -> Result<()> {
    session
        .control
        .reply(534u16, "CCC rejected, control channel stays protected.")
        .await
}
