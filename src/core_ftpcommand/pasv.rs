//! Passive-family negotiation commands: PASV, EPSV, LPSV and CPSV.

use log::warn;

use crate::core_network::data::{EpsvMode, PassiveVariant};
use crate::core_network::endpoint::{self, Endpoint};
use crate::core_network::error::Result;
use crate::session::Session;

async fn negotiate(session: &mut Session, variant: PassiveVariant) -> Result<Option<Endpoint>> {
    let control_local = session.control.local_addr();
    match session.data.init_passive(variant, control_local).await {
        Ok(endpoint) => Ok(Some(endpoint)),
        Err(e) => {
            warn!(
                "Passive negotiation failed for {}: {}",
                session.control.peer_addr(),
                e
            );
            session
                .control
                .reply(425u16, "Unable to enter passive mode.")
                .await?;
            Ok(None)
        }
    }
}

pub async fn handle_pasv(session: &mut Session, _arg: &str) -> Result<()> {
    let endpoint = match negotiate(session, PassiveVariant::Pasv).await? {
        Some(endpoint) => endpoint,
        None => return Ok(()),
    };
    let encoded = endpoint::to_port_string(&endpoint)?;
    session
        .control
        .reply(227u16, &format!("Entering Passive Mode ({}).", encoded))
        .await
}

/// CPSV negotiates like PASV but marks the data connection for a
/// client-role TLS handshake.
pub async fn handle_cpsv(session: &mut Session, _arg: &str) -> Result<()> {
    let endpoint = match negotiate(session, PassiveVariant::Cpsv).await? {
        Some(endpoint) => endpoint,
        None => return Ok(()),
    };
    // the 227 reply form only carries IPv4; an IPv6 bind cannot be offered
    let encoded = match endpoint::to_port_string(&endpoint) {
        Ok(encoded) => encoded,
        Err(_) => {
            session.data.close();
            return session
                .control
                .reply(501u16, "CPSV requires an IPv4 address.")
                .await;
        }
    };
    session
        .control
        .reply(227u16, &format!("Entering Passive Mode ({}).", encoded))
        .await
}

/// EPSV carries three argument forms next to plain negotiation: `ALL`
/// (client promises to use only EPSV), an explicit protocol number, and
/// the `EXTENDED`/`NORMAL` addressing mode switch.
pub async fn handle_epsv(session: &mut Session, arg: &str) -> Result<()> {
    match arg.to_ascii_uppercase().as_str() {
        "ALL" => {
            return session
                .control
                .reply(200u16, "EPSV ALL command successful.")
                .await;
        }
        "EXTENDED" => {
            session.data.set_epsv_mode(EpsvMode::Extended);
            return session
                .control
                .reply(200u16, "EPSV mode set to 'extended'.")
                .await;
        }
        "NORMAL" => {
            session.data.set_epsv_mode(EpsvMode::Normal);
            return session
                .control
                .reply(200u16, "EPSV mode set to 'normal'.")
                .await;
        }
        "" => {}
        proto => {
            let control_v4 = session.control.local_addr().ip().is_ipv4();
            let okay = matches!((proto, control_v4), ("1", true) | ("2", false));
            if !okay {
                let supported = if control_v4 { "(1)" } else { "(2)" };
                session
                    .control
                    .reply(
                        522u16,
                        &format!("Network protocol not supported, use {}.", supported),
                    )
                    .await?;
                return Ok(());
            }
        }
    }

    let endpoint = match negotiate(session, PassiveVariant::Epsv).await? {
        Some(endpoint) => endpoint,
        None => return Ok(()),
    };
    session
        .control
        .reply(
            229u16,
            &format!(
                "Entering Extended Passive Mode ({})",
                endpoint::to_epsv_string(&endpoint)
            ),
        )
        .await
}

pub async fn handle_lpsv(session: &mut Session, _arg: &str) -> Result<()> {
    let endpoint = match negotiate(session, PassiveVariant::Lpsv).await? {
        Some(endpoint) => endpoint,
        None => return Ok(()),
    };
    session
        .control
        .reply(
            228u16,
            &format!(
                "Entering Long Passive Mode ({})",
                endpoint::to_lpsv_string(&endpoint)
            ),
        )
        .await
}
