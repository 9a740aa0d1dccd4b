//! Command dispatch: a plain table mapping command name to handler
//! function plus the session state it requires.

pub mod abor;
pub mod auth;
pub mod cwd;
pub mod dele;
pub mod feat;
pub mod list;
pub mod mkd;
pub mod noop;
pub mod pass;
pub mod pasv;
pub mod port;
pub mod pwd;
pub mod quit;
pub mod rest;
pub mod retr;
pub mod rnfr;
pub mod rnto;
pub mod size;
pub mod stat;
pub mod stor;
pub mod syst;
pub mod type_;
pub mod user;
pub mod utils;
pub mod xfer;

use std::future::Future;
use std::pin::Pin;

use crate::core_network::error::Result;
use crate::session::{Session, SessionState};

pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
pub type Handler = for<'a> fn(&'a mut Session, &'a str) -> HandlerFuture<'a>;

pub struct CommandDef {
    pub handler: Handler,
    pub required_state: SessionState,
}

pub fn lookup(name: &str) -> Option<CommandDef> {
    use SessionState::*;
    let entry = |handler: Handler, required_state: SessionState| CommandDef {
        handler,
        required_state,
    };
    let def = match name {
        "USER" => entry(|s, a| Box::pin(user::handle_user(s, a)), LoggedOut),
        "PASS" => entry(|s, a| Box::pin(pass::handle_pass(s, a)), WaitingPassword),
        "QUIT" => entry(|s, a| Box::pin(quit::handle_quit(s, a)), AnyState),
        "NOOP" => entry(|s, a| Box::pin(noop::handle_noop(s, a)), AnyState),
        "ABOR" => entry(|s, a| Box::pin(abor::handle_abor(s, a)), LoggedIn),
        "SYST" => entry(|s, a| Box::pin(syst::handle_syst(s, a)), AnyState),
        "FEAT" => entry(|s, a| Box::pin(feat::handle_feat(s, a)), AnyState),
        "PWD" => entry(|s, a| Box::pin(pwd::handle_pwd(s, a)), LoggedIn),
        "CWD" => entry(|s, a| Box::pin(cwd::handle_cwd(s, a)), LoggedIn),
        "CDUP" => entry(|s, a| Box::pin(cwd::handle_cdup(s, a)), LoggedIn),
        "TYPE" => entry(|s, a| Box::pin(type_::handle_type(s, a)), LoggedIn),
        "REST" => entry(|s, a| Box::pin(rest::handle_rest(s, a)), LoggedIn),
        "STAT" => entry(|s, a| Box::pin(stat::handle_stat(s, a)), LoggedIn),
        "SIZE" => entry(|s, a| Box::pin(size::handle_size(s, a)), LoggedIn),
        "MKD" => entry(|s, a| Box::pin(mkd::handle_mkd(s, a)), LoggedIn),
        "RMD" => entry(|s, a| Box::pin(mkd::handle_rmd(s, a)), LoggedIn),
        "DELE" => entry(|s, a| Box::pin(dele::handle_dele(s, a)), LoggedIn),
        "RNFR" => entry(|s, a| Box::pin(rnfr::handle_rnfr(s, a)), LoggedIn),
        "RNTO" => entry(|s, a| Box::pin(rnto::handle_rnto(s, a)), LoggedIn),
        "AUTH" => entry(|s, a| Box::pin(auth::handle_auth(s, a)), LoggedOut),
        "PBSZ" => entry(|s, a| Box::pin(auth::handle_pbsz(s, a)), NotBeforeAuth),
        "PROT" => entry(|s, a| Box::pin(auth::handle_prot(s, a)), NotBeforeAuth),
        "SSCN" => entry(|s, a| Box::pin(auth::handle_sscn(s, a)), NotBeforeAuth),
        "CCC" => entry(|s, a| Box::pin(auth::handle_ccc(s, a)), NotBeforeAuth),
        "PASV" => entry(|s, a| Box::pin(pasv::handle_pasv(s, a)), LoggedIn),
        "EPSV" => entry(|s, a| Box::pin(pasv::handle_epsv(s, a)), LoggedIn),
        "LPSV" => entry(|s, a| Box::pin(pasv::handle_lpsv(s, a)), LoggedIn),
        "CPSV" => entry(|s, a| Box::pin(pasv::handle_cpsv(s, a)), LoggedIn),
        "PORT" => entry(|s, a| Box::pin(port::handle_port(s, a)), LoggedIn),
        "EPRT" => entry(|s, a| Box::pin(port::handle_eprt(s, a)), LoggedIn),
        "LPRT" => entry(|s, a| Box::pin(port::handle_lprt(s, a)), LoggedIn),
        "RETR" => entry(|s, a| Box::pin(retr::handle_retr(s, a)), LoggedIn),
        "STOR" => entry(|s, a| Box::pin(stor::handle_stor(s, a)), LoggedIn),
        "APPE" => entry(|s, a| Box::pin(stor::handle_appe(s, a)), LoggedIn),
        "LIST" => entry(|s, a| Box::pin(list::handle_list(s, a)), LoggedIn),
        "NLST" => entry(|s, a| Box::pin(list::handle_nlst(s, a)), LoggedIn),
        _ => return None,
    };
    Some(def)
}

/// Runs one command line through dispatch: required-state check, handler,
/// idle reset, online-registry bookkeeping.
pub async fn execute(session: &mut Session, line: &str) -> Result<()> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(());
    }

    let (name_raw, arg) = match line.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (line, ""),
    };
    let name = name_raw.to_ascii_uppercase();

    if session.state() == SessionState::LoggedIn {
        // never publish password arguments
        let published = if name == "PASS" || arg.is_empty() {
            name.clone()
        } else {
            format!("{} {}", name, arg)
        };
        session.publish_command(&published);
    }

    match lookup(&name) {
        None => {
            session
                .control
                .reply(500u16, "Command not understood.")
                .await?;
        }
        Some(def) => {
            if session.check_state(def.required_state).await? {
                (def.handler)(session, arg).await?;
                session.idle_reset(line);
            }
        }
    }

    if session.state() == SessionState::LoggedIn {
        session.publish_command("");
    }
    Ok(())
}
