use anyhow::{Context, Result};
use serde::Deserialize;

use crate::core_acl::user::User;
use crate::core_network::allocator::PortRange;
use crate::core_tls::TlsConfig;
use crate::core_transfer::throttle::SpeedLimit;

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub listen_port: u16,
    /// Root directory served to clients.
    pub base_path: String,
    /// Default idle timeout in seconds; per-user overrides win.
    pub idle_timeout: u64,
    /// Commands that do not reset the idle deadline.
    pub idle_commands: Vec<String>,
    /// Poll timeout for the data-channel read/write loop, seconds.
    pub data_timeout: u64,
    /// Timeout for active-mode connects and passive accepts, seconds.
    pub connect_timeout: u64,
    /// Global simultaneous-login ceiling, 0 for unlimited.
    pub max_users: u32,
    /// Candidate bind addresses for passive listeners.
    pub pasv_addresses: Vec<String>,
    /// Candidate source addresses for active connects.
    pub active_addresses: Vec<String>,
    pub pasv_ports: Vec<PortRange>,
    pub active_ports: Vec<PortRange>,
    /// Address advertised in passive replies instead of the bound one
    /// (NAT setups).
    pub nat_address: Option<String>,
    /// IPv4 partner address substituted when plain PASV lands on an IPv6
    /// bind address.
    pub nat_ipv4_partner: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: String::from("0.0.0.0"),
            listen_port: 21,
            base_path: String::from("/var/ftp"),
            idle_timeout: 1800,
            idle_commands: vec![String::from("STAT"), String::from("ABOR")],
            data_timeout: 30,
            connect_timeout: 30,
            max_users: 0,
            pasv_addresses: Vec::new(),
            active_addresses: Vec::new(),
            pasv_ports: Vec::new(),
            active_ports: Vec::new(),
            nat_address: None,
            nat_ipv4_partner: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub tls: TlsConfig,
    #[serde(default)]
    pub speed_limits: Vec<SpeedLimit>,
    #[serde(default)]
    pub users: Vec<User>,
}

impl Config {
    pub fn load_from_file(path: &str) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file: {}", path))?;
        let config: Config = toml::from_str(&config_str)
            .with_context(|| format!("Failed to parse configuration file: {}", path))?;
        Ok(config)
    }

    /// Speed limits whose section path covers the given virtual path.
    pub fn speed_limits_for(&self, path: &str) -> Vec<SpeedLimit> {
        self.speed_limits
            .iter()
            .filter(|l| path.starts_with(&l.path))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.server.listen_port, 21);
        assert_eq!(config.server.idle_timeout, 1800);
        assert!(config.server.pasv_ports.is_empty());
    }

    #[test]
    fn parses_minimal_toml() {
        let config: Config = toml::from_str(
            r#"
            [server]
            listen_port = 2121
            pasv_addresses = ["10.0.0.1"]
            pasv_ports = [{ from = 40000, to = 40100 }]

            [[speed_limits]]
            path = "/"
            dl_limit = 1024
        "#,
        )
        .unwrap();
        assert_eq!(config.server.listen_port, 2121);
        assert_eq!(config.server.pasv_addresses, vec!["10.0.0.1"]);
        assert_eq!(config.server.pasv_ports[0].from, 40000);
        assert_eq!(config.speed_limits[0].dl_limit, 1024);
    }

    #[test]
    fn speed_limits_filtered_by_prefix() {
        let config: Config = toml::from_str(
            r#"
            [[speed_limits]]
            path = "/"
            dl_limit = 1024

            [[speed_limits]]
            path = "/archive"
            dl_limit = 256
        "#,
        )
        .unwrap();
        assert_eq!(config.speed_limits_for("/archive/x").len(), 2);
        assert_eq!(config.speed_limits_for("/incoming").len(), 1);
    }
}
