//! Shared plumbing for the data-moving commands: opening the data
//! connection with policy checks, per-transfer throttles, and the mapping
//! from transfer-loop errors to their control replies.

use std::sync::Arc;

use log::{info, warn};

use crate::core_acl::user::User;
use crate::core_network::error::{FtpError, Result};
use crate::core_transfer::state::TransferKind;
use crate::core_transfer::throttle::SpeedThrottle;
use crate::session::{Session, SessionState};

/// Completes the data connection and applies FXP and TLS policy.
/// Failures are answered on the control channel; `Ok(true)` means the
/// transfer may proceed.
pub async fn open_data(session: &mut Session, kind: TransferKind, user: &User) -> Result<bool> {
    let opened = session
        .data
        .open(&mut session.control, kind, user, session.context.tls.as_ref())
        .await;
    match opened {
        Ok(()) => {}
        Err(FtpError::FxpDenied { direction }) => {
            session
                .control
                .reply(435u16, &format!("FXP {} not allowed.", direction.as_str()))
                .await?;
            return Ok(false);
        }
        Err(FtpError::Control(inner)) => return Err(*inner),
        Err(e) => {
            warn!(
                "Unable to open data connection for {}: {}",
                session.control.peer_addr(),
                e
            );
            session
                .control
                .reply(425u16, "Unable to open data connection.")
                .await?;
            return Ok(false);
        }
    }

    if !session.data.protection_okay(user) {
        session.data.close();
        session
            .control
            .reply(536u16, "TLS is enforced on this data transfer.")
            .await?;
        return Ok(false);
    }
    Ok(true)
}

/// Builds the per-transfer throttle from the user's limits and the global
/// limits applying to the transfer path.
pub fn throttle_for(
    session: &Session,
    user: &User,
    kind: TransferKind,
    path: &str,
) -> SpeedThrottle {
    let limits = session.context.config.speed_limits_for(path);
    let counter = match kind {
        TransferKind::Upload => Arc::clone(&session.context.ul_counter),
        _ => Arc::clone(&session.context.dl_counter),
    };
    SpeedThrottle::new(
        user.min_speed(kind),
        user.max_speed(kind),
        session.data.state(),
        limits,
        counter,
    )
}

/// Closes the data channel and sends the reply matching the failure.
/// Returns `Err` only when the control channel itself broke.
pub async fn finish_error(session: &mut Session, e: FtpError) -> Result<()> {
    session.data.close();
    match e {
        FtpError::TransferAborted => {
            // the 426 went out from the transfer loop already
            session
                .control
                .reply(226u16, "ABOR command successful.")
                .await
        }
        FtpError::EndOfStream => {
            if session.data.take_quit_received() {
                session.set_state(SessionState::Finished);
                Ok(())
            } else {
                session
                    .control
                    .reply(426u16, "Data connection closed unexpectedly.")
                    .await
            }
        }
        FtpError::Timeout => {
            session
                .control
                .reply(426u16, "Data connection timed out.")
                .await
        }
        FtpError::MinimumSpeed { limit, observed } => {
            info!(
                "Kicking {} for dropping below the minimum speed",
                session.user().map(|u| u.name.as_str()).unwrap_or("-")
            );
            let message = format!(
                "Transfer killed, below minimum speed ({:.1} KiB/s < {} KiB/s). Disconnecting.",
                observed, limit
            );
            let sent = session.control.reply(426u16, &message).await;
            session.set_state(SessionState::Finished);
            sent
        }
        FtpError::Control(inner) => Err(*inner),
        e => {
            warn!("Transfer failed: {}", e);
            session
                .control
                .reply(426u16, "Transfer failed, closing data connection.")
                .await
        }
    }
}

/// Sends the closing 226 with transfer statistics. The duration is read
/// before `close()` stops the clock.
pub async fn finish_success(session: &mut Session, bytes: u64) -> Result<()> {
    let duration = session.data.state().duration();
    session.data.close();
    let secs = duration.num_milliseconds() as f64 / 1000.0;
    session
        .control
        .reply(
            226u16,
            &format!("Transfer complete, {} bytes in {:.2} second(s).", bytes, secs),
        )
        .await
}
