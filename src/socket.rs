use std::fmt::Display;
use std::io;
use std::net::{ IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket };
use std::time::Duration;

use log::{ debug, warn };
use socket2::{ Domain, Protocol, SockAddr, SockRef, Socket, Type };

use crate::mdns_error::{ MdnsError, Result };

pub const MULTICAST_PORT: u16 = 5353;
pub const MULTICAST_ADDR_IPV4: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 251);
pub const MULTICAST_ADDR_IPV6: Ipv6Addr = Ipv6Addr::new(0xFF02, 0, 0, 0, 0, 0, 0, 0xFB);

/// Bounds how long a receive loop blocks before re-checking for shutdown.
pub const READ_TIMEOUT: Duration = Duration::from_millis(250);

// Address family not supported by protocol.
#[cfg(target_os = "linux")]
const EAFNOSUPPORT: i32 = 97;
#[cfg(not(target_os = "linux"))]
const EAFNOSUPPORT: i32 = 47;

lazy_static!
{
    pub(crate) static ref MULTICAST_IPV4_SOCKET: SocketAddr = SocketAddr::new(IpAddr::V4(MULTICAST_ADDR_IPV4), MULTICAST_PORT);
    pub(crate) static ref MULTICAST_IPV6_SOCKET: SocketAddr = SocketAddr::new(IpAddr::V6(MULTICAST_ADDR_IPV6), MULTICAST_PORT);
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum IpType
{
    V4,
    V6
}

impl IpType
{
    pub fn group(&self) -> SocketAddr
    {
        match self
        {
            IpType::V4 => *MULTICAST_IPV4_SOCKET,
            IpType::V6 => *MULTICAST_IPV6_SOCKET
        }
    }
}

impl Display for IpType
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        match self
        {
            IpType::V4 => write!(f, "udp4"),
            IpType::V6 => write!(f, "udp6")
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Interface
{
    pub name: String,
    pub index: u32,
    pub ipv4: Option<Ipv4Addr>,
    pub has_ipv6: bool
}

impl Interface
{
    fn supports(&self, ip_type: IpType) -> bool
    {
        match ip_type
        {
            IpType::V4 => self.ipv4.is_some(),
            IpType::V6 => self.has_ipv6
        }
    }
}

/// Interfaces that are up and multicast capable, optionally restricted to one
/// by name.
pub fn select_interfaces(name: Option<&str>) -> Result<Vec<Interface>>
{
    let interfaces: Vec<Interface> = default_net::get_interfaces()
        .into_iter()
        .filter(|iface| iface.is_up() && iface.is_multicast())
        .filter(|iface| name.map_or(true, |name| iface.name == name))
        .map(|iface| Interface
        {
            ipv4: iface.ipv4.first().map(|net| net.addr),
            has_ipv6: !iface.ipv6.is_empty(),
            index: iface.index,
            name: iface.name
        })
        .collect();

    if let Some(name) = name
    {
        if interfaces.is_empty()
        {
            return Err(MdnsError::BadParameter(format!("open: interface {} not found or not multicast capable", name)));
        }
    }

    Ok(interfaces)
}

fn create_socket(ip_type: IpType) -> io::Result<Socket>
{
    let domain = match ip_type
    {
        IpType::V4 => Domain::IPV4,
        IpType::V6 => Domain::IPV6
    };

    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;

    #[cfg(not(windows))]
    socket.set_reuse_port(true)?;

    let wildcard = match ip_type
    {
        IpType::V4 =>
        {
            socket.set_multicast_loop_v4(true)?;
            socket.set_multicast_ttl_v4(255)?;
            SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), MULTICAST_PORT)
        },
        IpType::V6 =>
        {
            socket.set_only_v6(true)?;
            socket.set_multicast_loop_v6(true)?;
            socket.set_multicast_hops_v6(255)?;
            SocketAddr::new(Ipv6Addr::UNSPECIFIED.into(), MULTICAST_PORT)
        }
    };

    socket.bind(&SockAddr::from(wildcard))?;
    socket.set_read_timeout(Some(READ_TIMEOUT))?;

    Ok(socket)
}

fn join_interface(socket: &Socket, ip_type: IpType, iface: &Interface) -> io::Result<()>
{
    match ip_type
    {
        IpType::V4 =>
        {
            let local = iface.ipv4.unwrap_or(Ipv4Addr::UNSPECIFIED);
            socket.join_multicast_v4(&MULTICAST_ADDR_IPV4, &local)
        },
        IpType::V6 => socket.join_multicast_v6(&MULTICAST_ADDR_IPV6, iface.index)
    }
}

fn unsupported(err: &io::Error) -> bool
{
    err.raw_os_error() == Some(EAFNOSUPPORT)
}

/// One socket per address family, joined to the group on every interface in
/// `interfaces`.
pub struct MulticastSocket
{
    pub ip_type: IpType,
    pub socket: UdpSocket,
    pub interfaces: Vec<Interface>
}

impl MulticastSocket
{
    /// Creates the family socket and joins each interface. An unsupported
    /// family or interface is skipped; other failures are pushed onto
    /// `errors`. Returns `None` when no interface could be joined.
    pub fn join(ip_type: IpType, interfaces: &[Interface], errors: &mut Vec<MdnsError>) -> Option<MulticastSocket>
    {
        let socket = match create_socket(ip_type)
        {
            Ok(socket) => socket,
            Err(err) if unsupported(&err) =>
            {
                debug!("Skipping {}: {}", ip_type, err);
                return None;
            },
            Err(err) =>
            {
                errors.push(MdnsError::io(&format!("open: {} socket", ip_type), err));
                return None;
            }
        };

        let mut joined: Vec<Interface> = Vec::new();

        for iface in interfaces.iter().filter(|iface| iface.supports(ip_type))
        {
            match join_interface(&socket, ip_type, iface)
            {
                Ok(()) =>
                {
                    debug!("Joined {} on {} ({})", ip_type.group(), iface.name, iface.index);
                    joined.push(iface.clone());
                },
                Err(err) if unsupported(&err) =>
                {
                    debug!("Skipping {} on {}: {}", ip_type, iface.name, err);
                },
                Err(err) =>
                {
                    warn!("Failed to join {} on {}: {}", ip_type.group(), iface.name, err);
                    errors.push(MdnsError::io(&format!("open: join {} on {}", ip_type, iface.name), err));
                }
            }
        }

        if joined.is_empty()
        {
            return None;
        }

        Some(MulticastSocket
        {
            ip_type,
            socket: socket.into(),
            interfaces: joined
        })
    }

    /// Multicasts `buffer` out of one joined interface.
    pub fn send_to_interface(&self, buffer: &[u8], iface: &Interface) -> io::Result<()>
    {
        let socket = SockRef::from(&self.socket);

        match self.ip_type
        {
            IpType::V4 => socket.set_multicast_if_v4(&iface.ipv4.unwrap_or(Ipv4Addr::UNSPECIFIED))?,
            IpType::V6 => socket.set_multicast_if_v6(iface.index)?
        }

        self.socket.send_to(buffer, self.ip_type.group())?;

        Ok(())
    }
}
