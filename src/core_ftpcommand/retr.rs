use std::io::SeekFrom;

use log::info;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::core_ftpcommand::utils::{real_path, virtual_path};
use crate::core_ftpcommand::xfer;
use crate::core_network::error::Result;
use crate::core_transfer::state::TransferKind;
use crate::session::Session;

const CHUNK_SIZE: usize = 32 * 1024;

/// Handles the RETR command: sends a file through the interleaved,
/// throttled data path, honoring a REST offset.
pub async fn handle_retr(session: &mut Session, arg: &str) -> Result<()> {
    if arg.is_empty() {
        session
            .control
            .reply(501u16, "Syntax: RETR <file>")
            .await?;
        return Ok(());
    }
    let user = match session.user().cloned() {
        Some(user) => user,
        None => {
            session.control.reply(530u16, "Not logged in.").await?;
            return Ok(());
        }
    };

    let vpath = virtual_path(&session.current_dir, arg);
    let real = real_path(&session.context.config.server.base_path, &vpath);
    let mut file = match File::open(&real).await {
        Ok(file) => file,
        Err(_) => {
            session
                .control
                .reply(550u16, &format!("{}: No such file.", arg))
                .await?;
            return Ok(());
        }
    };
    let size = match file.metadata().await {
        Ok(meta) => meta.len(),
        Err(_) => 0,
    };

    let offset = session.data.restart_offset();
    if offset > 0 && file.seek(SeekFrom::Start(offset)).await.is_err() {
        session
            .control
            .reply(550u16, "Invalid restart offset.")
            .await?;
        return Ok(());
    }

    let _guard = match session
        .context
        .counter
        .start_download(user.uid, user.max_downloads)
    {
        Ok(guard) => guard,
        Err(_) => {
            session
                .control
                .reply(
                    550u16,
                    &format!(
                        "You have reached your maximum of {} simultaneous download(s).",
                        user.max_downloads
                    ),
                )
                .await?;
            return Ok(());
        }
    };

    session
        .control
        .reply(
            150u16,
            &format!("Opening data connection for {} ({} bytes).", arg, size),
        )
        .await?;
    if !xfer::open_data(session, TransferKind::Download, &user).await? {
        return Ok(());
    }

    info!("User {} downloading {}", user.name, vpath);
    let mut throttle = xfer::throttle_for(&*session, &user, TransferKind::Download, &vpath);
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut sent: u64 = 0;
    loop {
        let n = match file.read(&mut buf).await {
            Ok(n) => n,
            Err(e) => {
                log::error!("Error reading {:?}: {}", real, e);
                session.data.close();
                session
                    .control
                    .reply(451u16, "Error reading file.")
                    .await?;
                return Ok(());
            }
        };
        if n == 0 {
            break;
        }
        if let Err(e) = session.data.write(&mut session.control, &buf[..n]).await {
            return xfer::finish_error(session, e).await;
        }
        sent += n as u64;
        if let Err(e) = throttle.apply().await {
            return xfer::finish_error(session, e).await;
        }
    }

    xfer::finish_success(session, sent).await
}
