//! Active-family negotiation commands: PORT, EPRT and LPRT.

use log::warn;

use crate::core_network::endpoint::{self, Endpoint};
use crate::core_network::error::Result;
use crate::session::Session;

async fn connect_to(session: &mut Session, remote: Endpoint, name: &str) -> Result<()> {
    match session.data.init_active(remote).await {
        Ok(()) => {
            session
                .control
                .reply(200u16, &format!("{} command successful.", name))
                .await
        }
        Err(e) => {
            warn!("Active connect to {} failed: {}", remote, e);
            session
                .control
                .reply(425u16, "Unable to open data connection.")
                .await
        }
    }
}

pub async fn handle_port(session: &mut Session, arg: &str) -> Result<()> {
    match endpoint::from_port_string(arg) {
        Ok(remote) => connect_to(session, remote, "PORT").await,
        Err(_) => {
            session
                .control
                .reply(501u16, "Invalid PORT string.")
                .await
        }
    }
}

pub async fn handle_eprt(session: &mut Session, arg: &str) -> Result<()> {
    match endpoint::from_eprt_string(arg) {
        Ok(remote) => connect_to(session, remote, "EPRT").await,
        Err(_) => {
            session
                .control
                .reply(501u16, "Invalid EPRT string.")
                .await
        }
    }
}

pub async fn handle_lprt(session: &mut Session, arg: &str) -> Result<()> {
    match endpoint::from_lprt_string(arg) {
        Ok(remote) => connect_to(session, remote, "LPRT").await,
        Err(_) => {
            session
                .control
                .reply(501u16, "Invalid LPRT string.")
                .await
        }
    }
}
