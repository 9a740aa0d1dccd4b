//! Per-connection session: the state machine every command passes through,
//! idle-deadline bookkeeping, the cross-task kick mechanism and the online
//! registry used for administrative monitoring.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Local};
use log::{debug, info};
use tokio::sync::Notify;

use crate::core_acl::user::User;
use crate::core_network::control::ControlChannel;
use crate::core_network::data::DataChannel;
use crate::core_network::error::{FtpError, Result};
use crate::core_transfer::counter::{CounterResult, LoginGuard, UserId};
use crate::core_transfer::state::TransferState;
use crate::server::ServerContext;

pub const MAX_PASSWORD_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    LoggedOut,
    WaitingPassword,
    LoggedIn,
    Finished,
    /// Required-state value only: satisfied once the control channel
    /// runs TLS, never an actual session state.
    NotBeforeAuth,
    /// Required-state wildcard.
    AnyState,
}

pub struct Session {
    pub control: ControlChannel,
    pub data: DataChannel,
    pub context: Arc<ServerContext>,
    pub rename_from: Option<PathBuf>,
    pub current_dir: String,
    id: u64,
    state: SessionState,
    user: Option<User>,
    kick_login: bool,
    password_attempts: u32,
    login_guard: Option<LoginGuard>,
    confirm_command: String,
    idle_timeout: Duration,
    idle_expires: DateTime<Local>,
    info: Arc<Mutex<OnlineInfo>>,
    kick: Arc<Notify>,
}

impl Session {
    pub fn new(control: ControlChannel, context: Arc<ServerContext>) -> Self {
        let data = DataChannel::new(context.data_config());
        let idle_timeout = Duration::from_secs(context.config.server.idle_timeout);
        let ticket = context.registry.register(control.peer_addr(), data.state());
        Self {
            control,
            data,
            context,
            rename_from: None,
            current_dir: String::from("/"),
            id: ticket.id,
            state: SessionState::LoggedOut,
            user: None,
            kick_login: false,
            password_attempts: 0,
            login_guard: None,
            confirm_command: String::new(),
            idle_timeout,
            idle_expires: Local::now()
                + chrono::Duration::from_std(idle_timeout).unwrap_or_default(),
            info: ticket.info,
            kick: ticket.kick,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    /// Transitions without side effects; LoggedIn and WaitingPassword have
    /// their own setters. Leaving LoggedIn for Finished releases the login
    /// slot, exactly once.
    pub fn set_state(&mut self, state: SessionState) {
        debug_assert!(state != SessionState::LoggedIn);
        debug_assert!(state != SessionState::WaitingPassword);
        let logout = state == SessionState::Finished && self.state == SessionState::LoggedIn;
        self.state = state;
        if logout {
            self.login_guard = None;
            if let Some(user) = &self.user {
                info!(
                    "User {} logged out from {}",
                    user.name,
                    self.control.peer_addr()
                );
            }
        }
    }

    pub fn set_waiting_password(&mut self, user: User, kick_login: bool) {
        self.state = SessionState::WaitingPassword;
        self.user = Some(user);
        self.kick_login = kick_login;
    }

    pub fn kick_login(&self) -> bool {
        self.kick_login
    }

    pub fn verify_password(&mut self, password: &str) -> bool {
        self.password_attempts += 1;
        self.user
            .as_ref()
            .map(|u| u.verify_password(password))
            .unwrap_or(false)
    }

    pub fn password_attempts_exceeded(&self) -> bool {
        self.password_attempts >= MAX_PASSWORD_ATTEMPTS
    }

    /// Completes the login from WaitingPassword: enrolls in the login
    /// counter, resolves the idle timeout and publishes the user to the
    /// online registry. On failure the state is left untouched.
    pub fn set_logged_in(&mut self) -> std::result::Result<(), CounterResult> {
        // user is always present in WaitingPassword
        let user = match self.user.as_ref() {
            Some(user) => user,
            None => return Err(CounterResult::PersonalFail),
        };

        let guard = self.context.counter.log_in(
            user.uid,
            user.max_logins,
            self.context.config.server.max_users,
            self.kick_login,
        )?;
        self.login_guard = Some(guard);

        self.idle_timeout = Duration::from_secs(
            user.idle_time
                .unwrap_or(self.context.config.server.idle_timeout),
        );
        self.state = SessionState::LoggedIn;

        {
            let mut info = self.info.lock().unwrap();
            info.uid = Some(user.uid);
            info.user_name = user.name.clone();
            info.logged_in_at = Some(Local::now());
        }
        info!(
            "User {} logged in from {}",
            user.name,
            self.control.peer_addr()
        );
        self.idle_reset("");
        Ok(())
    }

    /// Accepts the command or sends the protocol-correct rejection.
    /// NotBeforeAuth is checked first so that TLS-gated commands work in
    /// every state once the control channel is protected.
    pub async fn check_state(&mut self, required: SessionState) -> Result<bool> {
        if self.state == required || required == SessionState::AnyState {
            return Ok(true);
        }
        if required == SessionState::NotBeforeAuth {
            if self.control.is_tls() {
                return Ok(true);
            }
            self.control
                .reply(503u16, "AUTH command must be issued first.")
                .await?;
            return Ok(false);
        }
        match self.state {
            SessionState::LoggedIn => {
                self.control.reply(530u16, "Already logged in.").await?;
            }
            SessionState::WaitingPassword => {
                self.control
                    .reply(503u16, "Expecting PASS command.")
                    .await?;
            }
            SessionState::LoggedOut if required == SessionState::WaitingPassword => {
                self.control
                    .reply(503u16, "Expecting USER command first.")
                    .await?;
            }
            SessionState::LoggedOut => {
                self.control.reply(530u16, "Not logged in.").await?;
            }
            _ => {}
        }
        Ok(false)
    }

    /// Repeat-to-confirm helper for destructive commands: the first call
    /// arms the confirmation, an identical repeat fires it.
    pub fn confirm_command(&mut self, arg: &str) -> bool {
        let command: String = arg.split_whitespace().collect::<Vec<_>>().join(" ");
        if command != self.confirm_command {
            self.confirm_command = command;
            return false;
        }
        self.confirm_command.clear();
        true
    }

    /// Pushes the idle deadline forward unless the command is on the
    /// configured no-reset list.
    pub fn idle_reset(&mut self, command_line: &str) {
        let name = command_line
            .split_whitespace()
            .next()
            .unwrap_or("")
            .to_ascii_uppercase();
        if !name.is_empty()
            && self
                .context
                .config
                .server
                .idle_commands
                .iter()
                .any(|mask| mask.eq_ignore_ascii_case(&name))
        {
            return;
        }
        self.idle_expires =
            Local::now() + chrono::Duration::from_std(self.idle_timeout).unwrap_or_default();
    }

    /// Remaining time until the idle deadline; None disables the timeout
    /// (pre-login sessions, or an explicit zero idle time).
    pub fn command_timeout(&self) -> Option<Duration> {
        if self.state != SessionState::LoggedIn || self.idle_timeout.is_zero() {
            return None;
        }
        let remaining = self.idle_expires - Local::now();
        Some(remaining.to_std().unwrap_or(Duration::ZERO))
    }

    pub fn publish_command(&self, command: &str) {
        let mut info = self.info.lock().unwrap();
        info.current_command = command.to_string();
        info.last_activity = Local::now();
    }

    /// Command-read loop. Runs until the session is Finished or the
    /// transport fails; idle expiry and kicks get a 421 farewell.
    pub async fn handle(&mut self) -> Result<()> {
        while self.state != SessionState::Finished {
            let timeout = self.command_timeout();
            let kick = Arc::clone(&self.kick);
            let line = tokio::select! {
                line = self.control.next_command(timeout) => line,
                _ = kick.notified() => {
                    let _ = self
                        .control
                        .reply(421u16, "Kicked, closing control connection.")
                        .await;
                    self.set_state(SessionState::Finished);
                    debug!("Session {} kicked", self.id);
                    break;
                }
            };
            match line {
                Ok(line) => crate::core_ftpcommand::execute(self, &line).await?,
                Err(FtpError::Timeout) => {
                    let _ = self
                        .control
                        .reply(421u16, "Idle timeout exceeded, closing control connection.")
                        .await;
                    self.set_state(SessionState::Finished);
                    debug!("Session {} timed out", self.id);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.data.close();
        self.context.registry.unregister(self.id);
    }
}

/// What the registry publishes about a session for `STAT`-style listings.
#[derive(Debug, Clone)]
pub struct OnlineInfo {
    pub uid: Option<UserId>,
    pub user_name: String,
    pub peer: SocketAddr,
    pub current_command: String,
    pub logged_in_at: Option<DateTime<Local>>,
    pub last_activity: DateTime<Local>,
}

struct RegistryEntry {
    info: Arc<Mutex<OnlineInfo>>,
    transfer: TransferState,
    kick: Arc<Notify>,
    kicked: AtomicBool,
}

/// Handles a freshly registered session keeps for itself: its id, its
/// shared info slot and the kick notifier.
pub struct SessionTicket {
    pub id: u64,
    pub info: Arc<Mutex<OnlineInfo>>,
    pub kick: Arc<Notify>,
}

#[derive(Debug, Clone)]
pub struct OnlineSnapshot {
    pub id: u64,
    pub info: OnlineInfo,
    pub transferred: u64,
}

/// Shared map of live sessions, owned by the server context. Entries are
/// removed when the session value drops.
#[derive(Default)]
pub struct OnlineRegistry {
    next_id: AtomicU64,
    entries: Mutex<HashMap<u64, RegistryEntry>>,
}

impl OnlineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, peer: SocketAddr, transfer: TransferState) -> SessionTicket {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let info = Arc::new(Mutex::new(OnlineInfo {
            uid: None,
            user_name: String::new(),
            peer,
            current_command: String::new(),
            logged_in_at: None,
            last_activity: Local::now(),
        }));
        let kick = Arc::new(Notify::new());
        let entry = RegistryEntry {
            info: Arc::clone(&info),
            transfer,
            kick: Arc::clone(&kick),
            kicked: AtomicBool::new(false),
        };
        self.entries.lock().unwrap().insert(id, entry);
        SessionTicket { id, info, kick }
    }

    pub fn unregister(&self, id: u64) {
        self.entries.lock().unwrap().remove(&id);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }

    pub fn who(&self) -> Vec<OnlineSnapshot> {
        let entries = self.entries.lock().unwrap();
        let mut sessions: Vec<OnlineSnapshot> = entries
            .iter()
            .map(|(&id, entry)| OnlineSnapshot {
                id,
                info: entry.info.lock().unwrap().clone(),
                transferred: entry.transfer.bytes(),
            })
            .collect();
        sessions.sort_by_key(|s| s.id);
        sessions
    }

    /// Signals a session to finish. Repeat kicks are no-ops; the counter
    /// release belongs to the session's own guards.
    pub fn kick(&self, id: u64) -> bool {
        let entries = self.entries.lock().unwrap();
        match entries.get(&id) {
            Some(entry) => {
                if !entry.kicked.swap(true, Ordering::SeqCst) {
                    entry.kick.notify_one();
                }
                true
            }
            None => false,
        }
    }

    /// Kicks every other session of the given user; used when a login at
    /// the personal limit is confirmed as a kick-login.
    pub fn kick_user(&self, uid: UserId, exclude: u64) -> usize {
        let entries = self.entries.lock().unwrap();
        let mut kicked = 0;
        for (&id, entry) in entries.iter() {
            if id == exclude {
                continue;
            }
            if entry.info.lock().unwrap().uid == Some(uid) {
                if !entry.kicked.swap(true, Ordering::SeqCst) {
                    entry.kick.notify_one();
                }
                kicked += 1;
            }
        }
        kicked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::core_acl::user::User;

    fn test_context() -> Arc<ServerContext> {
        let mut config = Config::default();
        config.server.max_users = 2;
        config.users.push(User {
            uid: 7,
            name: "alice".to_string(),
            password: bcrypt::hash("secret", 4).unwrap(),
            max_logins: 1,
            idle_time: None,
            max_up_speed: 0,
            max_down_speed: 0,
            min_up_speed: 0,
            min_down_speed: 0,
            max_uploads: 0,
            max_downloads: 0,
            allow_fxp_upload: false,
            allow_fxp_download: false,
            log_fxp: false,
            tls_data_required: false,
            tls_list_required: false,
            tls_fxp_required: false,
        });
        ServerContext::new(config).unwrap()
    }

    fn test_session(context: Arc<ServerContext>) -> (Session, tokio::io::DuplexStream) {
        let (client, server) = tokio::io::duplex(4096);
        let local: SocketAddr = "127.0.0.1:21".parse().unwrap();
        let peer: SocketAddr = "198.51.100.7:50000".parse().unwrap();
        let control = ControlChannel::from_parts(Box::new(server), local, peer);
        (Session::new(control, context), client)
    }

    async fn read_reply(client: &mut tokio::io::DuplexStream) -> String {
        let mut buf = vec![0u8; 512];
        let n = tokio::io::AsyncReadExt::read(client, &mut buf)
            .await
            .unwrap();
        String::from_utf8_lossy(&buf[..n]).into_owned()
    }

    #[tokio::test]
    async fn state_rejection_matrix() {
        let context = test_context();
        let (mut session, mut client) = test_session(Arc::clone(&context));

        // AnyState always passes
        assert!(session.check_state(SessionState::AnyState).await.unwrap());

        // logged-out session running a logged-in command
        assert!(!session.check_state(SessionState::LoggedIn).await.unwrap());
        assert!(read_reply(&mut client).await.starts_with("530 Not logged in."));

        // PASS before USER
        assert!(!session
            .check_state(SessionState::WaitingPassword)
            .await
            .unwrap());
        assert!(read_reply(&mut client)
            .await
            .starts_with("503 Expecting USER command first."));

        // TLS-gated command on a plaintext control channel
        assert!(!session
            .check_state(SessionState::NotBeforeAuth)
            .await
            .unwrap());
        assert!(read_reply(&mut client)
            .await
            .starts_with("503 AUTH command must be issued first."));

        let user = context.users.find("alice").unwrap().clone();
        session.set_waiting_password(user, false);
        assert!(!session.check_state(SessionState::LoggedIn).await.unwrap());
        assert!(read_reply(&mut client)
            .await
            .starts_with("503 Expecting PASS command."));

        session.set_logged_in().unwrap();
        assert!(!session.check_state(SessionState::LoggedOut).await.unwrap());
        assert!(read_reply(&mut client)
            .await
            .starts_with("530 Already logged in."));
    }

    #[tokio::test]
    async fn login_respects_personal_limit_and_kick_bypass() {
        let context = test_context();
        let user = context.users.find("alice").unwrap().clone();

        let (mut first, _c1) = test_session(Arc::clone(&context));
        first.set_waiting_password(user.clone(), false);
        first.set_logged_in().unwrap();
        assert_eq!(context.counter.logins(7), 1);

        let (mut second, _c2) = test_session(Arc::clone(&context));
        second.set_waiting_password(user.clone(), false);
        assert_eq!(
            second.set_logged_in().unwrap_err(),
            CounterResult::PersonalFail
        );
        assert_eq!(second.state(), SessionState::WaitingPassword);

        // a kick-login bypasses the personal limit
        second.set_waiting_password(user, true);
        second.set_logged_in().unwrap();
        assert_eq!(context.counter.logins(7), 2);

        drop(first);
        drop(second);
        assert_eq!(context.counter.logins(7), 0);
    }

    #[tokio::test]
    async fn logout_releases_slot_exactly_once() {
        let context = test_context();
        let user = context.users.find("alice").unwrap().clone();
        let (mut session, _client) = test_session(Arc::clone(&context));
        session.set_waiting_password(user, false);
        session.set_logged_in().unwrap();

        session.set_state(SessionState::Finished);
        assert_eq!(context.counter.logins(7), 0);
        // repeating the transition must not double-release
        session.set_state(SessionState::Finished);
        assert_eq!(context.counter.logins(7), 0);
    }

    #[tokio::test]
    async fn password_attempts_counted() {
        let context = test_context();
        let user = context.users.find("alice").unwrap().clone();
        let (mut session, _client) = test_session(context);
        session.set_waiting_password(user, false);

        assert!(!session.verify_password("wrong"));
        assert!(!session.verify_password("wrong"));
        assert!(!session.password_attempts_exceeded());
        assert!(!session.verify_password("wrong"));
        assert!(session.password_attempts_exceeded());
    }

    #[tokio::test]
    async fn confirm_command_requires_exact_repeat() {
        let context = test_context();
        let (mut session, _client) = test_session(context);

        assert!(!session.confirm_command("alice secret"));
        assert!(!session.confirm_command("alice other"));
        assert!(session.confirm_command("alice  other"));
        // fires once, then re-arms
        assert!(!session.confirm_command("alice other"));
    }

    #[tokio::test]
    async fn registry_tracks_and_kicks() {
        let context = test_context();
        let user = context.users.find("alice").unwrap().clone();
        let (mut session, _client) = test_session(Arc::clone(&context));
        session.set_waiting_password(user, false);
        session.set_logged_in().unwrap();
        session.publish_command("RETR file.bin");

        let who = context.registry.who();
        assert_eq!(who.len(), 1);
        assert_eq!(who[0].info.user_name, "alice");
        assert_eq!(who[0].info.current_command, "RETR file.bin");

        let id = session.id();
        assert!(context.registry.kick(id));
        assert!(context.registry.kick(id));
        assert!(!context.registry.kick(id + 1000));

        drop(session);
        assert!(context.registry.is_empty());
    }

    #[tokio::test]
    async fn kick_unblocks_pending_command_read() {
        let context = test_context();
        let user = context.users.find("alice").unwrap().clone();
        let (mut session, mut client) = test_session(Arc::clone(&context));
        session.set_waiting_password(user, false);
        session.set_logged_in().unwrap();
        let id = session.id();

        let registry = Arc::clone(&context.registry);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            registry.kick(id);
        });

        session.handle().await.unwrap();
        assert_eq!(session.state(), SessionState::Finished);
        assert!(read_reply(&mut client).await.starts_with("421 "));
    }

    #[tokio::test]
    async fn idle_expiry_sends_farewell() {
        let context = test_context();
        let mut user = context.users.find("alice").unwrap().clone();
        user.idle_time = Some(1);
        let (mut session, mut client) = test_session(context);
        session.set_waiting_password(user, false);
        session.set_logged_in().unwrap();
        // force the deadline into the past
        session.idle_expires = Local::now() - chrono::Duration::seconds(1);

        session.handle().await.unwrap();
        assert_eq!(session.state(), SessionState::Finished);
        assert!(read_reply(&mut client)
            .await
            .starts_with("421 Idle timeout exceeded"));
    }
}
