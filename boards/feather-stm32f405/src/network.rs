#![deny(unsafe_code)]
#![deny(warnings)]
//! Network plumbing for the time service
//!
//! [`UdpTransport`] adapts an embassy-net UDP socket to the non-blocking
//! [`DatagramTransport`] the time client expects: every call polls the socket
//! once with a no-op waker and returns immediately. Host names are resolved
//! ahead of time with [`UdpTransport::resolve`] since DNS needs to await.

use core::net::Ipv4Addr;
use core::task::{Context, Poll, Waker};

use defmt::{info, warn, Debug2Format};
use embassy_net::dns::DnsQueryType;
use embassy_net::udp::UdpSocket;
use embassy_net::{IpAddress, IpEndpoint, Stack};
use hal_abstractions::DatagramTransport;

/// Longest host name kept in the resolver cache
const HOST_CAPACITY: usize = 64;

/// Wait for network configuration (DHCP) and log IP address
pub async fn wait_for_config(stack: &Stack<'_>) {
    info!("Waiting for DHCP...");
    stack.wait_config_up().await;
    info!("Network is UP!");

    if let Some(config) = stack.config_v4() {
        let octets = config.address.address().octets();
        info!(
            "IP: {}.{}.{}.{}",
            octets[0], octets[1], octets[2], octets[3]
        );

        if let Some(gateway) = config.gateway {
            let gw_octets = gateway.octets();
            info!(
                "Gateway: {}.{}.{}.{}",
                gw_octets[0], gw_octets[1], gw_octets[2], gw_octets[3]
            );
        }
    }
}

/// UDP transport errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum UdpTransportError {
    /// Local port could not be bound
    BindFailed,
    /// Destination host has not been resolved
    Unresolved,
    /// Socket refused the datagram
    SendFailed,
}

/// Non-blocking datagram transport over an embassy-net UDP socket
pub struct UdpTransport<'a> {
    socket: UdpSocket<'a>,
    resolved: Option<(heapless::String<HOST_CAPACITY>, IpAddress)>,
}

impl<'a> UdpTransport<'a> {
    pub fn new(socket: UdpSocket<'a>) -> Self {
        Self {
            socket,
            resolved: None,
        }
    }

    /// True once `host` has an address
    pub fn is_resolved(&self, host: &str) -> bool {
        self.lookup(host).is_some()
    }

    /// Look `host` up through the stack's DNS client and cache the answer
    pub async fn resolve(&mut self, stack: Stack<'_>, host: &str) -> bool {
        if self.is_resolved(host) {
            return true;
        }
        let address = match stack.dns_query(host, DnsQueryType::A).await {
            Ok(addresses) => addresses.first().copied(),
            Err(e) => {
                warn!("DNS lookup for {} failed: {}", host, Debug2Format(&e));
                None
            }
        };
        let Some(address) = address else {
            return false;
        };
        let Ok(name) = heapless::String::try_from(host) else {
            warn!("Host name {} too long to cache", host);
            return false;
        };
        info!("Resolved {} to {}", host, Debug2Format(&address));
        self.resolved = Some((name, address));
        true
    }

    fn lookup(&self, host: &str) -> Option<IpAddress> {
        if let Ok(ip) = host.parse::<Ipv4Addr>() {
            return Some(IpAddress::Ipv4(ip));
        }
        match &self.resolved {
            Some((name, address)) if name.as_str() == host => Some(*address),
            _ => None,
        }
    }
}

impl DatagramTransport for UdpTransport<'_> {
    type Error = UdpTransportError;

    fn begin(&mut self, local_port: u16) -> Result<(), UdpTransportError> {
        self.socket.bind(local_port).map_err(|e| {
            warn!("UDP bind to port {} failed: {}", local_port, Debug2Format(&e));
            UdpTransportError::BindFailed
        })
    }

    fn send_datagram(
        &mut self,
        host: &str,
        port: u16,
        payload: &[u8],
    ) -> Result<(), UdpTransportError> {
        let address = self.lookup(host).ok_or(UdpTransportError::Unresolved)?;
        let endpoint = IpEndpoint::new(address, port);
        let mut cx = Context::from_waker(Waker::noop());
        match self.socket.poll_send_to(payload, endpoint, &mut cx) {
            Poll::Ready(Ok(())) => Ok(()),
            Poll::Ready(Err(e)) => {
                warn!("UDP send failed: {}", Debug2Format(&e));
                Err(UdpTransportError::SendFailed)
            }
            // Transmit buffer full
            Poll::Pending => Err(UdpTransportError::SendFailed),
        }
    }

    fn poll_incoming(&mut self, buf: &mut [u8]) -> Option<usize> {
        let mut cx = Context::from_waker(Waker::noop());
        match self.socket.poll_recv_from(buf, &mut cx) {
            Poll::Ready(Ok((len, _meta))) => Some(len),
            Poll::Ready(Err(e)) => {
                // Oversized datagrams are reported as truncated
                warn!("UDP receive failed: {}", Debug2Format(&e));
                None
            }
            Poll::Pending => None,
        }
    }
}
