use std::path::Path;

use chrono::{DateTime, Local};

use crate::core_ftpcommand::utils::{real_path, virtual_path};
use crate::core_ftpcommand::xfer;
use crate::core_network::error::Result;
use crate::core_transfer::state::TransferKind;
use crate::session::Session;

pub async fn handle_list(session: &mut Session, arg: &str) -> Result<()> {
    send_listing(session, arg, true).await
}

pub async fn handle_nlst(session: &mut Session, arg: &str) -> Result<()> {
    send_listing(session, arg, false).await
}

/// Formats one `ls -l`-style line for LIST.
fn format_entry(name: &str, meta: &std::fs::Metadata) -> String {
    let kind = if meta.is_dir() { 'd' } else { '-' };
    let modified: DateTime<Local> = meta
        .modified()
        .map(DateTime::from)
        .unwrap_or_else(|_| Local::now());
    format!(
        "{}rw-r--r--   1 ftp      ftp      {:>12} {} {}",
        kind,
        meta.len(),
        modified.format("%b %e %H:%M"),
        name
    )
}

async fn build_listing(dir: &Path, long: bool) -> std::io::Result<String> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut lines: Vec<String> = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if long {
            let meta = entry.metadata().await?;
            lines.push(format_entry(&name, &meta));
        } else {
            lines.push(name);
        }
    }
    lines.sort();
    let mut listing = lines.join("\r\n");
    if !listing.is_empty() {
        listing.push_str("\r\n");
    }
    Ok(listing)
}

/// Sends a directory listing over the data connection. Listings skip the
/// admission counters and the FXP check but still honor per-user TLS
/// policy.
async fn send_listing(session: &mut Session, arg: &str, long: bool) -> Result<()> {
    let user = match session.user().cloned() {
        Some(user) => user,
        None => {
            session.control.reply(530u16, "Not logged in.").await?;
            return Ok(());
        }
    };

    // ignore ls-style option arguments
    let path_arg = arg
        .split_whitespace()
        .find(|part| !part.starts_with('-'))
        .unwrap_or("");
    let vpath = virtual_path(&session.current_dir, path_arg);
    let real = real_path(&session.context.config.server.base_path, &vpath);

    let listing = match build_listing(&real, long).await {
        Ok(listing) => listing,
        Err(_) => {
            session
                .control
                .reply(550u16, &format!("{}: No such directory.", vpath))
                .await?;
            return Ok(());
        }
    };

    session
        .control
        .reply(150u16, "Opening data connection for directory listing.")
        .await?;
    if !xfer::open_data(session, TransferKind::List, &user).await? {
        return Ok(());
    }

    if !listing.is_empty() {
        if let Err(e) = session
            .data
            .write(&mut session.control, listing.as_bytes())
            .await
        {
            return xfer::finish_error(session, e).await;
        }
    }
    session.data.close();
    session
        .control
        .reply(226u16, "Transfer complete.")
        .await
}
