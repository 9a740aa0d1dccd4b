use std::io::SeekFrom;

use log::info;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};

use crate::core_ftpcommand::utils::{real_path, virtual_path};
use crate::core_ftpcommand::xfer;
use crate::core_network::error::{FtpError, Result};
use crate::core_transfer::state::TransferKind;
use crate::session::{Session, SessionState};

const CHUNK_SIZE: usize = 32 * 1024;

pub async fn handle_stor(session: &mut Session, arg: &str) -> Result<()> {
    store(session, arg, false).await
}

pub async fn handle_appe(session: &mut Session, arg: &str) -> Result<()> {
    store(session, arg, true).await
}

/// Receives a file through the interleaved, throttled data path. A REST
/// offset rewrites the file from that position; APPE always extends.
async fn store(session: &mut Session, arg: &str, append: bool) -> Result<()> {
    if arg.is_empty() {
        session
            .control
            .reply(501u16, "Syntax: STOR <file>")
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
    let offset = session.data.restart_offset();
    let opened = if append {
        OpenOptions::new().append(true).create(true).open(&real).await
    } else if offset > 0 {
        OpenOptions::new().write(true).create(true).open(&real).await
    } else {
        File::create(&real).await
    };
    let mut file = match opened {
        Ok(file) => file,
        Err(e) => {
            log::error!("Unable to open {:?} for writing: {}", real, e);
            session
                .control
                .reply(550u16, &format!("{}: Unable to create file.", arg))
                .await?;
            return Ok(());
        }
    };
    if !append && offset > 0 && file.seek(SeekFrom::Start(offset)).await.is_err() {
        session
            .control
            .reply(550u16, "Invalid restart offset.")
            .await?;
        return Ok(());
    }

    let _guard = match session
        .context
        .counter
        .start_upload(user.uid, user.max_uploads)
    {
        Ok(guard) => guard,
        Err(_) => {
            session
                .control
                .reply(
                    550u16,
                    &format!(
                        "You have reached your maximum of {} simultaneous upload(s).",
                        user.max_uploads
                    ),
                )
                .await?;
            return Ok(());
        }
    };

    session
        .control
        .reply(150u16, &format!("Opening data connection for {}.", arg))
        .await?;
    if !xfer::open_data(session, TransferKind::Upload, &user).await? {
        return Ok(());
    }

    info!("User {} uploading {}", user.name, vpath);
    let mut throttle = xfer::throttle_for(&*session, &user, TransferKind::Upload, &vpath);
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut received: u64 = 0;
    loop {
        let n = match session.data.read(&mut session.control, &mut buf).await {
            Ok(n) => n,
            // the client closing the data connection ends the upload
            Err(FtpError::EndOfStream) => {
                if session.data.take_quit_received() {
                    session.data.close();
                    session.set_state(SessionState::Finished);
                    return Ok(());
                }
                break;
            }
            Err(e) => return xfer::finish_error(session, e).await,
        };
        if let Err(e) = file.write_all(&buf[..n]).await {
            log::error!("Error writing {:?}: {}", real, e);
            session.data.close();
            session
                .control
                .reply(451u16, "Error writing file.")
                .await?;
            return Ok(());
        }
        received += n as u64;
        if let Err(e) = throttle.apply().await {
            return xfer::finish_error(session, e).await;
        }
    }

    if let Err(e) = file.flush().await {
        log::error!("Error flushing {:?}: {}", real, e);
    }
    xfer::finish_success(session, received).await
}
