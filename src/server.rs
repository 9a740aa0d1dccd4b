//! Server context and acceptor loop: builds the shared state once, then
//! spawns one task per accepted control connection.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, error, info};
use tokio::net::{TcpListener, TcpStream};

use crate::config::Config;
use crate::core_acl::user::UserStore;
use crate::core_network::allocator::{AddrAllocator, PortAllocator};
use crate::core_network::control::ControlChannel;
use crate::core_network::data::DataConfig;
use crate::core_network::error::FtpError;
use crate::core_tls::TlsContext;
use crate::core_transfer::counter::Counter;
use crate::core_transfer::throttle::{Direction, SpeedCounter};
use crate::session::{OnlineRegistry, Session};

/// Everything the sessions share: configuration, allocators, admission
/// and speed counters, the user store, TLS material and the online
/// registry. Built once, handed out as `Arc`.
pub struct ServerContext {
    pub config: Config,
    pub users: UserStore,
    pub counter: Arc<Counter>,
    pub ul_counter: Arc<SpeedCounter>,
    pub dl_counter: Arc<SpeedCounter>,
    pub registry: Arc<OnlineRegistry>,
    pub tls: Option<TlsContext>,
    pasv_addrs: Arc<AddrAllocator>,
    active_addrs: Arc<AddrAllocator>,
    pasv_ports: Arc<PortAllocator>,
    active_ports: Arc<PortAllocator>,
    nat_address: Option<IpAddr>,
    nat_ipv4_partner: Option<Ipv4Addr>,
}

impl ServerContext {
    pub fn new(config: Config) -> Result<Arc<Self>> {
        let tls = if config.tls.enabled {
            config.tls.validate()?;
            Some(TlsContext::new(&config.tls)?)
        } else {
            None
        };

        let nat_address: Option<IpAddr> = config
            .server
            .nat_address
            .as_deref()
            .map(str::parse)
            .transpose()
            .context("Invalid nat_address")?;
        let nat_ipv4_partner: Option<Ipv4Addr> = config
            .server
            .nat_ipv4_partner
            .as_deref()
            .map(str::parse)
            .transpose()
            .context("Invalid nat_ipv4_partner")?;

        let users = UserStore::new(config.users.clone());
        let pasv_addrs = Arc::new(AddrAllocator::new(config.server.pasv_addresses.clone()));
        let active_addrs = Arc::new(AddrAllocator::new(config.server.active_addresses.clone()));
        let pasv_ports = Arc::new(PortAllocator::new(config.server.pasv_ports.clone()));
        let active_ports = Arc::new(PortAllocator::new(config.server.active_ports.clone()));

        Ok(Arc::new(Self {
            config,
            users,
            counter: Counter::new(),
            ul_counter: SpeedCounter::new(Direction::Upload),
            dl_counter: SpeedCounter::new(Direction::Download),
            registry: Arc::new(OnlineRegistry::new()),
            tls,
            pasv_addrs,
            active_addrs,
            pasv_ports,
            active_ports,
            nat_address,
            nat_ipv4_partner,
        }))
    }

    /// Per-session view of the negotiation state; the allocators stay
    /// shared so their cursors rotate across all sessions.
    pub fn data_config(&self) -> DataConfig {
        DataConfig {
            pasv_addrs: Arc::clone(&self.pasv_addrs),
            active_addrs: Arc::clone(&self.active_addrs),
            pasv_ports: Arc::clone(&self.pasv_ports),
            active_ports: Arc::clone(&self.active_ports),
            nat_address: self.nat_address,
            nat_ipv4_partner: self.nat_ipv4_partner,
            data_timeout: Duration::from_secs(self.config.server.data_timeout),
            connect_timeout: Duration::from_secs(self.config.server.connect_timeout),
        }
    }
}

pub async fn run(config: Config) -> Result<()> {
    let context = ServerContext::new(config)?;
    let addr = format!(
        "{}:{}",
        context.config.server.listen_addr, context.config.server.listen_port
    );
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on {}", addr);

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!("Error accepting connection: {}", e);
                continue;
            }
        };
        info!("Connection from {}", peer);
        let context = Arc::clone(&context);
        tokio::spawn(async move {
            match serve_client(stream, context).await {
                Ok(()) => debug!("Session from {} closed", peer),
                Err(FtpError::EndOfStream) => debug!("Client {} disconnected", peer),
                Err(e) => debug!("Session from {} failed: {}", peer, e),
            }
        });
    }
}

async fn serve_client(
    stream: TcpStream,
    context: Arc<ServerContext>,
) -> crate::core_network::error::Result<()> {
    let control = ControlChannel::new(stream)?;
    let mut session = Session::new(control, context);
    session
        .control
        .reply(220u16, "oxyftpd ready.")
        .await?;
    session.handle().await
}
