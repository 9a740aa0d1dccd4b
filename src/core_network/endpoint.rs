//! Endpoint value type and the FTP wire codecs for the four negotiation
//! families (PASV/PORT, EPSV/EPRT, LPSV/LPRT).

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::core_network::error::{FtpError, Result};

/// An immutable IP + port pair, used for both local binds and remote peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    pub ip: IpAddr,
    pub port: u16,
}

impl Endpoint {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self { ip, port }
    }

    pub fn is_ipv4(&self) -> bool {
        self.ip.is_ipv4()
    }

    /// The wildcard endpoint for the given address family, port 0.
    pub fn any(ipv4: bool) -> Self {
        if ipv4 {
            Self::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)
        } else {
            Self::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0)
        }
    }

    pub fn to_socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip(), addr.port())
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_socket_addr())
    }
}

/// Encodes an IPv4 endpoint as `h1,h2,h3,h4,p1,p2` for 227 replies.
pub fn to_port_string(ep: &Endpoint) -> Result<String> {
    match ep.ip {
        IpAddr::V4(v4) => {
            let o = v4.octets();
            Ok(format!(
                "{},{},{},{},{},{}",
                o[0],
                o[1],
                o[2],
                o[3],
                ep.port / 256,
                ep.port % 256
            ))
        }
        IpAddr::V6(_) => Err(FtpError::Protocol(
            "IPv6 address cannot be encoded in PORT format".to_string(),
        )),
    }
}

/// Decodes a `h1,h2,h3,h4,p1,p2` argument (PORT command).
pub fn from_port_string(s: &str) -> Result<Endpoint> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    if parts.len() != 6 {
        return Err(FtpError::Protocol(format!("Invalid PORT string: {}", s)));
    }
    let mut octets = [0u8; 6];
    for (i, part) in parts.iter().enumerate() {
        octets[i] = part
            .parse::<u8>()
            .map_err(|_| FtpError::Protocol(format!("Invalid PORT string: {}", s)))?;
    }
    let ip = Ipv4Addr::new(octets[0], octets[1], octets[2], octets[3]);
    let port = (octets[4] as u16) << 8 | octets[5] as u16;
    Ok(Endpoint::new(IpAddr::V4(ip), port))
}

/// Encodes the 229 reply argument `|||port|`. EPSV replies never carry an
/// address; the client connects back to the control address.
pub fn to_epsv_string(ep: &Endpoint) -> String {
    format!("|||{}|", ep.port)
}

/// Decodes an EPRT argument `|proto|addr|port|` with any delimiter byte.
pub fn from_eprt_string(s: &str) -> Result<Endpoint> {
    let mut chars = s.chars();
    let delim = chars
        .next()
        .ok_or_else(|| FtpError::Protocol("Empty EPRT string".to_string()))?;
    let fields: Vec<&str> = s[delim.len_utf8()..].split(delim).collect();
    if fields.len() < 3 {
        return Err(FtpError::Protocol(format!("Invalid EPRT string: {}", s)));
    }
    let proto = fields[0];
    let ip: IpAddr = fields[1]
        .parse()
        .map_err(|_| FtpError::Protocol(format!("Invalid EPRT address: {}", fields[1])))?;
    match (proto, ip) {
        ("1", IpAddr::V4(_)) | ("2", IpAddr::V6(_)) => {}
        _ => {
            return Err(FtpError::Protocol(format!(
                "EPRT protocol/address mismatch: {}",
                s
            )))
        }
    }
    let port = fields[2]
        .parse::<u16>()
        .map_err(|_| FtpError::Protocol(format!("Invalid EPRT port: {}", fields[2])))?;
    Ok(Endpoint::new(ip, port))
}

/// Encodes the RFC 1639 long address format used by 228 replies:
/// `af, hal, h1..hN, 2, p1, p2`.
pub fn to_lpsv_string(ep: &Endpoint) -> String {
    let mut fields: Vec<String> = Vec::new();
    match ep.ip {
        IpAddr::V4(v4) => {
            fields.push("4".to_string());
            fields.push("4".to_string());
            fields.extend(v4.octets().iter().map(|o| o.to_string()));
        }
        IpAddr::V6(v6) => {
            fields.push("6".to_string());
            fields.push("16".to_string());
            fields.extend(v6.octets().iter().map(|o| o.to_string()));
        }
    }
    fields.push("2".to_string());
    fields.push((ep.port / 256).to_string());
    fields.push((ep.port % 256).to_string());
    fields.join(",")
}

/// Decodes an LPRT argument in the same long address format.
pub fn from_lprt_string(s: &str) -> Result<Endpoint> {
    let nums: Vec<u16> = s
        .split(',')
        .map(|p| p.trim().parse::<u16>())
        .collect::<std::result::Result<_, _>>()
        .map_err(|_| FtpError::Protocol(format!("Invalid LPRT string: {}", s)))?;
    let bad = || FtpError::Protocol(format!("Invalid LPRT string: {}", s));
    if nums.len() < 2 {
        return Err(bad());
    }
    let (af, hal) = (nums[0], nums[1] as usize);
    if nums.len() != 2 + hal + 3 || nums[2 + hal] != 2 {
        return Err(bad());
    }
    let addr_bytes: Vec<u8> = nums[2..2 + hal]
        .iter()
        .map(|&n| u8::try_from(n).map_err(|_| bad()))
        .collect::<Result<_>>()?;
    let ip = match (af, hal) {
        (4, 4) => {
            let o: [u8; 4] = addr_bytes.as_slice().try_into().map_err(|_| bad())?;
            IpAddr::V4(Ipv4Addr::from(o))
        }
        (6, 16) => {
            let o: [u8; 16] = addr_bytes.as_slice().try_into().map_err(|_| bad())?;
            IpAddr::V6(Ipv6Addr::from(o))
        }
        _ => return Err(bad()),
    };
    let hi = u8::try_from(nums[2 + hal + 1]).map_err(|_| bad())?;
    let lo = u8::try_from(nums[2 + hal + 2]).map_err(|_| bad())?;
    Ok(Endpoint::new(ip, u16::from(hi) << 8 | u16::from(lo)))
}
