//! The data channel: passive (PASV/EPSV/LPSV/CPSV) and active
//! (PORT/EPRT/LPRT) negotiation, transfer open/close with FXP policy and
//! opportunistic TLS, and the interleaved read/write loop that keeps the
//! control channel responsive while bytes move.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket};
use tokio_rustls::rustls::ServerName;

use crate::core_acl::user::User;
use crate::core_network::allocator::{AddrAllocator, PortAllocator};
use crate::core_network::control::{AsyncStream, ControlChannel};
use crate::core_network::endpoint::Endpoint;
use crate::core_network::error::{FtpError, FxpDirection, Result};
use crate::core_tls::TlsContext;
use crate::core_transfer::state::{TransferKind, TransferState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassiveVariant {
    Pasv,
    Epsv,
    Lpsv,
    Cpsv,
}

/// EPSV addressing sub-mode. Extended mode lets the server advertise a
/// pool address different from the control connection's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpsvMode {
    Normal,
    Extended,
}

/// Which party initiates the TLS handshake on the data socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SscnMode {
    Server,
    Client,
}

/// Allocators and policy knobs the data channel negotiates with; shared
/// across all sessions by the server context.
#[derive(Clone)]
pub struct DataConfig {
    pub pasv_addrs: Arc<AddrAllocator>,
    pub active_addrs: Arc<AddrAllocator>,
    pub pasv_ports: Arc<PortAllocator>,
    pub active_ports: Arc<PortAllocator>,
    /// Advertised in passive replies instead of the bound address.
    pub nat_address: Option<IpAddr>,
    /// IPv4 partner for plain PASV on an IPv6 bind address.
    pub nat_ipv4_partner: Option<Ipv4Addr>,
    pub data_timeout: Duration,
    pub connect_timeout: Duration,
}

/// Plain PASV can only advertise IPv4. When the chosen bind address turns
/// out to be IPv6, substitute: an IPv4-mapped address unmaps, anything
/// else takes the configured partner address or fails.
pub fn pasv_ipv4_substitute(ip: IpAddr, partner: Option<Ipv4Addr>) -> Option<Ipv4Addr> {
    match ip {
        IpAddr::V4(v4) => Some(v4),
        IpAddr::V6(v6) => v6.to_ipv4_mapped().or(partner),
    }
}

struct DataSocket {
    stream: Box<dyn AsyncStream>,
    peer: SocketAddr,
}

enum Polled<T> {
    Control(Result<String>),
    Data(std::io::Result<T>),
    Timeout,
}

pub struct DataChannel {
    config: DataConfig,
    listener: Option<TcpListener>,
    socket: Option<DataSocket>,
    passive_variant: Option<PassiveVariant>,
    epsv_mode: EpsvMode,
    protection: bool,
    sscn_mode: SscnMode,
    restart_offset: u64,
    bytes_read: u64,
    bytes_written: u64,
    fxp: bool,
    quit_received: bool,
    state: TransferState,
}

impl DataChannel {
    pub fn new(config: DataConfig) -> Self {
        Self {
            config,
            listener: None,
            socket: None,
            passive_variant: None,
            epsv_mode: EpsvMode::Normal,
            protection: false,
            sscn_mode: SscnMode::Server,
            restart_offset: 0,
            bytes_read: 0,
            bytes_written: 0,
            fxp: false,
            quit_received: false,
            state: TransferState::new(),
        }
    }

    pub fn set_protection(&mut self, protection: bool) {
        self.protection = protection;
    }

    pub fn protection(&self) -> bool {
        self.protection
    }

    pub fn set_epsv_mode(&mut self, mode: EpsvMode) {
        self.epsv_mode = mode;
    }

    pub fn epsv_mode(&self) -> EpsvMode {
        self.epsv_mode
    }

    pub fn set_sscn_mode(&mut self, mode: SscnMode) {
        self.sscn_mode = mode;
    }

    pub fn sscn_mode(&self) -> SscnMode {
        self.sscn_mode
    }

    pub fn set_restart_offset(&mut self, offset: u64) {
        self.restart_offset = offset;
    }

    pub fn restart_offset(&self) -> u64 {
        self.restart_offset
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Shared handle onto the in-progress transfer, for STAT/monitoring.
    pub fn state(&self) -> TransferState {
        self.state.clone()
    }

    /// True once a QUIT arrived mid-transfer; the command loop turns this
    /// into session teardown after the transfer unwinds.
    pub fn take_quit_received(&mut self) -> bool {
        std::mem::take(&mut self.quit_received)
    }

    fn drop_sockets(&mut self) {
        self.listener = None;
        self.socket = None;
    }

    /// Negotiates a passive listener and returns the endpoint to
    /// advertise. Wire encoding of the 227/229/228 reply is the caller's.
    pub async fn init_passive(
        &mut self,
        variant: PassiveVariant,
        control_local: SocketAddr,
    ) -> Result<Endpoint> {
        self.drop_sockets();
        self.passive_variant = Some(variant);

        // Every variant consults the pool except EPSV in normal mode,
        // which must advertise the control connection's own address.
        let mut ip: Option<IpAddr> = None;
        if variant != PassiveVariant::Epsv || self.epsv_mode == EpsvMode::Extended {
            let mut first_addr: Option<String> = None;
            loop {
                let addr = match self.config.pasv_addrs.next_addr() {
                    Some(a) => a,
                    None => break,
                };
                if first_addr.as_deref() == Some(addr.as_str()) {
                    // pool cycled without a qualifying entry
                    break;
                }
                if let Ok(parsed) = addr.parse::<IpAddr>() {
                    let qualifies = if variant == PassiveVariant::Pasv {
                        parsed.is_ipv4()
                    } else {
                        parsed.is_ipv4() == control_local.ip().is_ipv4()
                    };
                    if qualifies {
                        ip = Some(parsed);
                        break;
                    }
                }
                if first_addr.is_none() {
                    first_addr = Some(addr);
                }
            }
        }

        let mut ip = ip.unwrap_or_else(|| control_local.ip());
        if variant == PassiveVariant::Pasv {
            ip = IpAddr::V4(
                pasv_ipv4_substitute(ip, self.config.nat_ipv4_partner)
                    .ok_or(FtpError::AddrsExhausted)?,
            );
        }

        let mut first_port: Option<u16> = None;
        let listener = loop {
            let port = self.config.pasv_ports.next_port();
            match first_port {
                None => first_port = Some(port),
                Some(first) if first == port => return Err(FtpError::PortsExhausted),
                _ => {}
            }
            match TcpListener::bind(SocketAddr::new(ip, port)).await {
                Ok(listener) => break listener,
                Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => continue,
                Err(e) => return Err(FtpError::Network(e)),
            }
        };

        let bound: Endpoint = listener.local_addr().map_err(FtpError::Network)?.into();
        self.listener = Some(listener);

        let advertised = match self.config.nat_address {
            Some(nat_ip) => Endpoint::new(nat_ip, bound.port),
            None => bound,
        };
        debug!("Passive listener on {}, advertising {}", bound, advertised);
        Ok(advertised)
    }

    /// Connects out to a client-supplied endpoint (PORT/EPRT/LPRT).
    pub async fn init_active(&mut self, remote: Endpoint) -> Result<()> {
        self.drop_sockets();
        self.passive_variant = None;

        let mut local_ip: Option<IpAddr> = None;
        let mut first_addr: Option<String> = None;
        loop {
            let addr = match self.config.active_addrs.next_addr() {
                Some(a) => a,
                None => break,
            };
            if first_addr.as_deref() == Some(addr.as_str()) {
                break;
            }
            if let Ok(parsed) = addr.parse::<IpAddr>() {
                if parsed.is_ipv4() == remote.is_ipv4() {
                    local_ip = Some(parsed);
                    break;
                }
            }
            if first_addr.is_none() {
                first_addr = Some(addr);
            }
        }
        let local_ip = local_ip.unwrap_or_else(|| Endpoint::any(remote.is_ipv4()).ip);

        let mut first_port: Option<u16> = None;
        let stream = loop {
            let port = self.config.active_ports.next_port();
            match first_port {
                None => first_port = Some(port),
                Some(first) if first == port => return Err(FtpError::PortsExhausted),
                _ => {}
            }

            let socket = if remote.is_ipv4() {
                TcpSocket::new_v4()
            } else {
                TcpSocket::new_v6()
            }
            .map_err(FtpError::Network)?;
            socket.set_reuseaddr(true).map_err(FtpError::Network)?;
            if let Err(e) = socket.bind(SocketAddr::new(local_ip, port)) {
                if e.kind() == std::io::ErrorKind::AddrInUse {
                    continue;
                }
                return Err(FtpError::Network(e));
            }

            match tokio::time::timeout(
                self.config.connect_timeout,
                socket.connect(remote.to_socket_addr()),
            )
            .await
            {
                Err(_) => return Err(FtpError::Timeout),
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::AddrInUse => continue,
                Ok(Err(e)) => return Err(FtpError::Network(e)),
                Ok(Ok(stream)) => break stream,
            }
        };

        let peer = stream.peer_addr().map_err(FtpError::Network)?;
        debug!("Active data connection to {}", peer);
        self.socket = Some(DataSocket {
            stream: Box::new(stream),
            peer,
        });
        Ok(())
    }

    /// Completes the data connection for a transfer: accepts the passive
    /// peer, enforces FXP policy, protects the socket when negotiated and
    /// starts the transfer state.
    pub async fn open(
        &mut self,
        control: &mut ControlChannel,
        kind: TransferKind,
        user: &User,
        tls: Option<&TlsContext>,
    ) -> Result<()> {
        if self.passive_variant.is_some() {
            let listener = self
                .listener
                .take()
                .ok_or_else(|| FtpError::Protocol("No passive listener".to_string()))?;
            let (stream, peer) =
                match tokio::time::timeout(self.config.connect_timeout, listener.accept()).await {
                    Err(_) => return Err(FtpError::Timeout),
                    Ok(Err(e)) => return Err(FtpError::Network(e)),
                    Ok(Ok(accepted)) => accepted,
                };
            // one data connection per negotiation
            self.socket = Some(DataSocket {
                stream: Box::new(stream),
                peer,
            });
        } else if self.socket.is_none() {
            return Err(FtpError::Protocol(
                "PORT or PASV must be issued first".to_string(),
            ));
        }

        let peer = self.socket.as_ref().map(|s| s.peer).unwrap();
        self.fxp = kind != TransferKind::List && peer.ip() != control.peer_addr().ip();
        if self.fxp {
            let direction = FxpDirection::from_kind(kind);
            let (allowed, log) = user.fxp_allowed(direction);
            if !allowed {
                if log {
                    warn!(
                        "User {} attempted to fxp {} to {}",
                        user.name,
                        direction.as_str(),
                        peer
                    );
                }
                self.socket = None;
                return Err(FtpError::FxpDenied { direction });
            }
        }

        if self.protection {
            let tls = tls.ok_or_else(|| {
                FtpError::Protocol("Data protection negotiated without TLS".to_string())
            })?;
            let socket = self.socket.take().unwrap();
            let client_role = self.sscn_mode == SscnMode::Client
                || self.passive_variant == Some(PassiveVariant::Cpsv);
            let stream: Box<dyn AsyncStream> = if client_role {
                let name = ServerName::IpAddress(peer.ip());
                Box::new(
                    tls.connector()
                        .connect(name, socket.stream)
                        .await
                        .map_err(FtpError::Network)?,
                )
            } else {
                Box::new(
                    tls.acceptor()
                        .accept(socket.stream)
                        .await
                        .map_err(FtpError::Network)?,
                )
            };
            self.socket = Some(DataSocket { stream, peer });
        }

        self.state.start(kind);
        Ok(())
    }

    /// Whether the current transfer satisfies mandatory-TLS policy; the
    /// caller consults this right after `open` and aborts before any
    /// bytes move when it fails.
    pub fn protection_okay(&self, user: &User) -> bool {
        self.protection || !user.mandatory_tls(self.state.kind(), self.fxp)
    }

    /// Closes the data connection; resets the restart offset and stops the
    /// transfer state. Calling with no open socket is fine.
    pub fn close(&mut self) {
        self.restart_offset = 0;
        self.drop_sockets();
        self.state.stop();
    }

    /// Reads up to `buf.len()` payload bytes while simultaneously
    /// servicing the control channel; see module docs.
    pub async fn read(&mut self, control: &mut ControlChannel, buf: &mut [u8]) -> Result<usize> {
        loop {
            let timeout = self.config.data_timeout;
            let polled = {
                let socket = self
                    .socket
                    .as_mut()
                    .ok_or_else(|| FtpError::Protocol("No data connection".to_string()))?;
                tokio::select! {
                    line = control.next_command(None) => Polled::Control(line),
                    r = socket.stream.read(buf) => Polled::Data(r),
                    _ = tokio::time::sleep(timeout) => Polled::Timeout,
                }
            };
            match polled {
                Polled::Control(line) => self.service_control(control, line).await?,
                Polled::Data(result) => {
                    let n = result.map_err(FtpError::from_io)?;
                    if n == 0 {
                        return Err(FtpError::EndOfStream);
                    }
                    self.bytes_read += n as u64;
                    self.state.update(n as u64);
                    return Ok(n);
                }
                Polled::Timeout => return Err(FtpError::Timeout),
            }
        }
    }

    /// Writes the whole buffer, polling the control channel between
    /// partial writes.
    pub async fn write(&mut self, control: &mut ControlChannel, buf: &[u8]) -> Result<()> {
        let mut written = 0;
        while written < buf.len() {
            let timeout = self.config.data_timeout;
            let polled = {
                let socket = self
                    .socket
                    .as_mut()
                    .ok_or_else(|| FtpError::Protocol("No data connection".to_string()))?;
                tokio::select! {
                    line = control.next_command(None) => Polled::Control(line),
                    r = socket.stream.write(&buf[written..]) => Polled::Data(r),
                    _ = tokio::time::sleep(timeout) => Polled::Timeout,
                }
            };
            match polled {
                Polled::Control(line) => self.service_control(control, line).await?,
                Polled::Data(result) => {
                    let n = result.map_err(FtpError::from_io)?;
                    if n == 0 {
                        return Err(FtpError::EndOfStream);
                    }
                    written += n;
                    self.bytes_written += n as u64;
                    self.state.update(n as u64);
                }
                Polled::Timeout => return Err(FtpError::Timeout),
            }
        }
        Ok(())
    }

    /// Interprets the fixed command set allowed mid-transfer. Errors while
    /// talking to the control channel are wrapped so the caller can tell
    /// "the control channel broke" from "the data channel broke".
    async fn service_control(
        &mut self,
        control: &mut ControlChannel,
        line: Result<String>,
    ) -> Result<()> {
        let wrap = |e: FtpError| FtpError::Control(Box::new(e));
        let line = line.map_err(wrap)?;
        let command = line
            .split_whitespace()
            .next()
            .unwrap_or("")
            .to_ascii_uppercase();
        match command.as_str() {
            "ABOR" => {
                control
                    .reply(426u16, "Transfer aborted. Data connection closed.")
                    .await
                    .map_err(wrap)?;
                Err(FtpError::TransferAborted)
            }
            "QUIT" => {
                control.reply(221u16, "Goodbye.").await.map_err(wrap)?;
                self.quit_received = true;
                Err(FtpError::EndOfStream)
            }
            "STAT" => {
                let message = format!("Status: {} bytes transferred.", self.state.bytes());
                control.reply(213u16, &message).await.map_err(wrap)?;
                Ok(())
            }
            _ => {
                control
                    .reply(500u16, "Command not supported during transfer.")
                    .await
                    .map_err(wrap)?;
                Ok(())
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn attach_socket_for_test(
        &mut self,
        stream: Box<dyn AsyncStream>,
        peer: SocketAddr,
    ) {
        self.socket = Some(DataSocket { stream, peer });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_network::allocator::PortRange;
    use crate::core_network::endpoint;

    fn test_config(
        pasv_addrs: Vec<String>,
        active_addrs: Vec<String>,
        pasv_ports: Vec<PortRange>,
    ) -> DataConfig {
        DataConfig {
            pasv_addrs: Arc::new(AddrAllocator::new(pasv_addrs)),
            active_addrs: Arc::new(AddrAllocator::new(active_addrs)),
            pasv_ports: Arc::new(PortAllocator::new(pasv_ports)),
            active_ports: Arc::new(PortAllocator::new(vec![])),
            nat_address: None,
            nat_ipv4_partner: None,
            data_timeout: Duration::from_millis(500),
            connect_timeout: Duration::from_millis(500),
        }
    }

    fn control_pair() -> (ControlChannel, tokio::io::DuplexStream) {
        let (client, server) = tokio::io::duplex(4096);
        let local: SocketAddr = "127.0.0.1:21".parse().unwrap();
        let peer: SocketAddr = "198.51.100.7:50000".parse().unwrap();
        (
            ControlChannel::from_parts(Box::new(server), local, peer),
            client,
        )
    }

    fn test_user() -> User {
        User {
            uid: 1,
            name: "alice".to_string(),
            password: String::new(),
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
        }
    }

    #[test]
    fn ipv4_substitution_policy() {
        let mapped: IpAddr = "::ffff:10.0.0.1".parse().unwrap();
        assert_eq!(
            pasv_ipv4_substitute(mapped, None),
            Some("10.0.0.1".parse().unwrap())
        );

        let v6: IpAddr = "2001:db8::1".parse().unwrap();
        assert_eq!(pasv_ipv4_substitute(v6, None), None);
        assert_eq!(
            pasv_ipv4_substitute(v6, Some("192.0.2.1".parse().unwrap())),
            Some("192.0.2.1".parse().unwrap())
        );

        let v4: IpAddr = "10.0.0.1".parse().unwrap();
        assert_eq!(pasv_ipv4_substitute(v4, None), Some("10.0.0.1".parse().unwrap()));
    }

    #[tokio::test]
    async fn passive_binds_pool_address() {
        let config = test_config(vec!["127.0.0.1".to_string()], vec![], vec![]);
        let mut data = DataChannel::new(config);
        let control_local: SocketAddr = "127.0.0.1:21".parse().unwrap();
        let ep = data
            .init_passive(PassiveVariant::Pasv, control_local)
            .await
            .unwrap();
        assert_eq!(ep.ip, "127.0.0.1".parse::<IpAddr>().unwrap());
        assert_ne!(ep.port, 0);
        // the advertised endpoint encodes cleanly for the 227 reply
        assert!(endpoint::to_port_string(&ep).is_ok());
    }

    #[tokio::test]
    async fn passive_ports_exhausted_reported() {
        // occupy the only configured port, then negotiation must fail
        // within one pool cycle rather than hang
        let blocker = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = blocker.local_addr().unwrap().port();

        let config = test_config(
            vec!["127.0.0.1".to_string()],
            vec![],
            vec![PortRange { from: port, to: port }],
        );
        let mut data = DataChannel::new(config);
        let control_local: SocketAddr = "127.0.0.1:21".parse().unwrap();
        let err = data
            .init_passive(PassiveVariant::Pasv, control_local)
            .await
            .unwrap_err();
        assert!(matches!(err, FtpError::PortsExhausted));
    }

    #[tokio::test]
    async fn passive_nat_override_advertised() {
        let mut config = test_config(vec!["127.0.0.1".to_string()], vec![], vec![]);
        config.nat_address = Some("203.0.113.9".parse().unwrap());
        let mut data = DataChannel::new(config);
        let control_local: SocketAddr = "127.0.0.1:21".parse().unwrap();
        let ep = data
            .init_passive(PassiveVariant::Pasv, control_local)
            .await
            .unwrap();
        assert_eq!(ep.ip, "203.0.113.9".parse::<IpAddr>().unwrap());
    }

    #[tokio::test]
    async fn epsv_normal_ignores_pool() {
        // pool has a foreign address; EPSV in normal mode must stick to
        // the control connection's local address
        let config = test_config(vec!["10.99.99.99".to_string()], vec![], vec![]);
        let mut data = DataChannel::new(config);
        let control_local: SocketAddr = "127.0.0.1:21".parse().unwrap();
        let ep = data
            .init_passive(PassiveVariant::Epsv, control_local)
            .await
            .unwrap();
        assert_eq!(ep.ip, "127.0.0.1".parse::<IpAddr>().unwrap());
    }

    #[tokio::test]
    async fn lpsv_consults_pool() {
        let config = test_config(vec!["127.0.0.2".to_string()], vec![], vec![]);
        let mut data = DataChannel::new(config);
        let control_local: SocketAddr = "127.0.0.1:21".parse().unwrap();
        let ep = data
            .init_passive(PassiveVariant::Lpsv, control_local)
            .await
            .unwrap();
        assert_eq!(ep.ip, "127.0.0.2".parse::<IpAddr>().unwrap());
    }

    #[tokio::test]
    async fn cpsv_consults_pool() {
        let config = test_config(vec!["127.0.0.2".to_string()], vec![], vec![]);
        let mut data = DataChannel::new(config);
        let control_local: SocketAddr = "127.0.0.1:21".parse().unwrap();
        let ep = data
            .init_passive(PassiveVariant::Cpsv, control_local)
            .await
            .unwrap();
        assert_eq!(ep.ip, "127.0.0.2".parse::<IpAddr>().unwrap());
    }

    #[tokio::test]
    async fn extended_epsv_consults_pool() {
        let config = test_config(vec!["127.0.0.2".to_string()], vec![], vec![]);
        let mut data = DataChannel::new(config);
        data.set_epsv_mode(EpsvMode::Extended);
        let control_local: SocketAddr = "127.0.0.1:21".parse().unwrap();
        let ep = data
            .init_passive(PassiveVariant::Epsv, control_local)
            .await
            .unwrap();
        assert_eq!(ep.ip, "127.0.0.2".parse::<IpAddr>().unwrap());
    }

    #[tokio::test]
    async fn active_falls_back_to_wildcard_on_family_mismatch() {
        let target = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let remote: Endpoint = target.local_addr().unwrap().into();

        // pool is all IPv6, target is IPv4
        let config = test_config(vec![], vec!["::1".to_string()], vec![]);
        let mut data = DataChannel::new(config);
        data.init_active(remote).await.unwrap();
        let (_peer, _) = target.accept().await.unwrap();
    }

    #[tokio::test]
    async fn active_connect_failure_reported() {
        // port 1 on loopback is almost certainly closed
        let config = test_config(vec![], vec![], vec![]);
        let mut data = DataChannel::new(config);
        let remote = Endpoint::new("127.0.0.1".parse().unwrap(), 1);
        assert!(data.init_active(remote).await.is_err());
    }

    #[tokio::test]
    async fn open_without_negotiation_is_sequencing_error() {
        let (mut control, _client) = control_pair();
        let config = test_config(vec![], vec![], vec![]);
        let mut data = DataChannel::new(config);
        let err = data
            .open(&mut control, TransferKind::Download, &test_user(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, FtpError::Protocol(_)));
    }

    #[tokio::test]
    async fn fxp_denied_closes_socket() {
        let (mut control, _client) = control_pair();
        let config = test_config(vec![], vec![], vec![]);
        let mut data = DataChannel::new(config);

        // data peer differs from the control peer (198.51.100.7)
        let (stream, _other) = tokio::io::duplex(64);
        data.attach_socket_for_test(
            Box::new(stream),
            "203.0.113.50:20".parse().unwrap(),
        );

        let err = data
            .open(&mut control, TransferKind::Download, &test_user(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, FtpError::FxpDenied { .. }));
        // the socket must be gone afterwards
        assert!(data.socket.is_none());
    }

    #[tokio::test]
    async fn fxp_not_flagged_for_listings() {
        let (mut control, _client) = control_pair();
        let config = test_config(vec![], vec![], vec![]);
        let mut data = DataChannel::new(config);
        let (stream, _other) = tokio::io::duplex(64);
        data.attach_socket_for_test(
            Box::new(stream),
            "203.0.113.50:20".parse().unwrap(),
        );
        data.open(&mut control, TransferKind::List, &test_user(), None)
            .await
            .unwrap();
        assert!(!data.fxp);
    }

    #[tokio::test]
    async fn abort_mid_transfer_within_poll_interval() {
        let (mut control, mut control_client) = control_pair();
        let config = test_config(vec![], vec![], vec![]);
        let mut data = DataChannel::new(config);

        // data peer matches control peer: not FXP
        let (stream, _data_far_end) = tokio::io::duplex(64);
        data.attach_socket_for_test(Box::new(stream), "198.51.100.7:20".parse().unwrap());
        data.open(&mut control, TransferKind::Download, &test_user(), None)
            .await
            .unwrap();

        tokio::io::AsyncWriteExt::write_all(&mut control_client, b"ABOR\r\n")
            .await
            .unwrap();

        let started = std::time::Instant::now();
        let err = data.write(&mut control, b"payload").await.unwrap_err();
        assert!(matches!(err, FtpError::TransferAborted));
        assert!(started.elapsed() < Duration::from_millis(500));

        data.close();
        assert!(data.socket.is_none());

        // the abort acknowledgement went out on the control channel
        let mut buf = vec![0u8; 256];
        let n = tokio::io::AsyncReadExt::read(&mut control_client, &mut buf)
            .await
            .unwrap();
        let out = String::from_utf8_lossy(&buf[..n]).into_owned();
        assert!(out.starts_with("426 "));
    }

    #[tokio::test]
    async fn quit_mid_transfer_sets_flag() {
        let (mut control, mut control_client) = control_pair();
        let config = test_config(vec![], vec![], vec![]);
        let mut data = DataChannel::new(config);
        let (stream, _far) = tokio::io::duplex(64);
        data.attach_socket_for_test(Box::new(stream), "198.51.100.7:20".parse().unwrap());
        data.open(&mut control, TransferKind::Upload, &test_user(), None)
            .await
            .unwrap();

        tokio::io::AsyncWriteExt::write_all(&mut control_client, b"QUIT\r\n")
            .await
            .unwrap();
        let mut buf = [0u8; 64];
        let err = data.read(&mut control, &mut buf).await.unwrap_err();
        assert!(matches!(err, FtpError::EndOfStream));
        assert!(data.take_quit_received());
        assert!(!data.take_quit_received());
    }

    #[tokio::test]
    async fn stat_mid_transfer_reports_bytes_and_continues() {
        let (mut control, mut control_client) = control_pair();
        let config = test_config(vec![], vec![], vec![]);
        let mut data = DataChannel::new(config);
        let (stream, mut far) = tokio::io::duplex(1024);
        data.attach_socket_for_test(Box::new(stream), "198.51.100.7:20".parse().unwrap());
        data.open(&mut control, TransferKind::Upload, &test_user(), None)
            .await
            .unwrap();

        tokio::io::AsyncWriteExt::write_all(&mut control_client, b"STAT\r\n")
            .await
            .unwrap();
        // payload arrives after the STAT was serviced
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            tokio::io::AsyncWriteExt::write_all(&mut far, b"data!").await.unwrap();
        });

        let mut buf = [0u8; 64];
        let n = data.read(&mut control, &mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"data!");
        assert_eq!(data.state().bytes(), 5);

        let mut out = vec![0u8; 256];
        let n = tokio::io::AsyncReadExt::read(&mut control_client, &mut out)
            .await
            .unwrap();
        assert!(String::from_utf8_lossy(&out[..n]).starts_with("213 "));
    }

    #[tokio::test]
    async fn unsupported_command_mid_transfer_rejected() {
        let (mut control, mut control_client) = control_pair();
        let config = test_config(vec![], vec![], vec![]);
        let mut data = DataChannel::new(config);
        let (stream, mut far) = tokio::io::duplex(1024);
        data.attach_socket_for_test(Box::new(stream), "198.51.100.7:20".parse().unwrap());
        data.open(&mut control, TransferKind::Download, &test_user(), None)
            .await
            .unwrap();

        tokio::io::AsyncWriteExt::write_all(&mut control_client, b"PWD\r\n")
            .await
            .unwrap();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let mut sink = [0u8; 64];
            let _ = tokio::io::AsyncReadExt::read(&mut far, &mut sink).await;
        });

        data.write(&mut control, b"x").await.unwrap();

        let mut out = vec![0u8; 256];
        let n = tokio::io::AsyncReadExt::read(&mut control_client, &mut out)
            .await
            .unwrap();
        assert!(String::from_utf8_lossy(&out[..n]).starts_with("500 "));
    }

    #[tokio::test]
    async fn read_timeout_when_nothing_ready() {
        let (mut control, _control_client) = control_pair();
        let config = test_config(vec![], vec![], vec![]);
        let mut data = DataChannel::new(config);
        let (stream, _far) = tokio::io::duplex(64);
        data.attach_socket_for_test(Box::new(stream), "198.51.100.7:20".parse().unwrap());
        data.open(&mut control, TransferKind::Download, &test_user(), None)
            .await
            .unwrap();

        let mut buf = [0u8; 16];
        let err = data.read(&mut control, &mut buf).await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn close_is_idempotent_and_resets_offset() {
        let config = test_config(vec![], vec![], vec![]);
        let mut data = DataChannel::new(config);
        data.set_restart_offset(4096);
        data.close();
        assert_eq!(data.restart_offset(), 0);
        data.close();
    }

    #[tokio::test]
    async fn protection_policy_gate() {
        let config = test_config(vec![], vec![], vec![]);
        let mut data = DataChannel::new(config);
        let mut user = test_user();
        user.tls_data_required = true;

        data.state.start(TransferKind::Download);
        assert!(!data.protection_okay(&user));
        data.set_protection(true);
        assert!(data.protection_okay(&user));
    }
}
