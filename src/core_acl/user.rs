//! User records and the access policies the connection engine consults:
//! FXP authorization per direction and mandatory-TLS rules per transfer
//! kind. Credential verification is bcrypt against the configured hash.

use log::warn;
use serde::Deserialize;

use crate::core_network::error::FxpDirection;
use crate::core_transfer::state::TransferKind;
use crate::core_transfer::counter::UserId;

fn default_max_logins() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub uid: UserId,
    pub name: String,
    /// bcrypt hash of the password.
    pub password: String,
    #[serde(default = "default_max_logins")]
    pub max_logins: u32,
    /// Idle timeout override in seconds; `None` uses the server default,
    /// `Some(0)` disables the idle timeout.
    #[serde(default)]
    pub idle_time: Option<u64>,
    /// Speed limits in KiB/s, 0 meaning unenforced.
    #[serde(default)]
    pub max_up_speed: u64,
    #[serde(default)]
    pub max_down_speed: u64,
    #[serde(default)]
    pub min_up_speed: u64,
    #[serde(default)]
    pub min_down_speed: u64,
    /// Concurrent transfer limits, 0 meaning unlimited.
    #[serde(default)]
    pub max_uploads: u32,
    #[serde(default)]
    pub max_downloads: u32,
    #[serde(default)]
    pub allow_fxp_upload: bool,
    #[serde(default)]
    pub allow_fxp_download: bool,
    /// Log denied FXP attempts to the security log.
    #[serde(default)]
    pub log_fxp: bool,
    /// Mandatory TLS on ordinary data transfers / directory listings / FXP.
    #[serde(default)]
    pub tls_data_required: bool,
    #[serde(default)]
    pub tls_list_required: bool,
    #[serde(default)]
    pub tls_fxp_required: bool,
}

impl User {
    pub fn verify_password(&self, password: &str) -> bool {
        match bcrypt::verify(password, &self.password) {
            Ok(ok) => ok,
            Err(e) => {
                warn!("Malformed password hash for user {}: {}", self.name, e);
                false
            }
        }
    }

    /// Whether this user may take part in a third-party transfer in the
    /// given direction; the second value asks for the attempt to be logged
    /// on denial.
    pub fn fxp_allowed(&self, direction: FxpDirection) -> (bool, bool) {
        let allowed = match direction {
            FxpDirection::Receive => self.allow_fxp_upload,
            FxpDirection::Send => self.allow_fxp_download,
        };
        (allowed, self.log_fxp)
    }

    /// Whether configured policy demands TLS protection for this transfer.
    pub fn mandatory_tls(&self, kind: TransferKind, fxp: bool) -> bool {
        if fxp {
            return self.tls_fxp_required;
        }
        match kind {
            TransferKind::List => self.tls_list_required,
            TransferKind::Upload | TransferKind::Download => self.tls_data_required,
            TransferKind::None => false,
        }
    }

    pub fn min_speed(&self, kind: TransferKind) -> u64 {
        match kind {
            TransferKind::Upload => self.min_up_speed,
            TransferKind::Download => self.min_down_speed,
            _ => 0,
        }
    }

    pub fn max_speed(&self, kind: TransferKind) -> u64 {
        match kind {
            TransferKind::Upload => self.max_up_speed,
            TransferKind::Download => self.max_down_speed,
            _ => 0,
        }
    }
}

/// The configured user database.
#[derive(Debug, Default)]
pub struct UserStore {
    users: Vec<User>,
}

impl UserStore {
    pub fn new(users: Vec<User>) -> Self {
        Self { users }
    }

    pub fn find(&self, name: &str) -> Option<&User> {
        self.users.iter().find(|u| u.name == name)
    }
}
