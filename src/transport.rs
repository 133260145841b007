//! The two outside collaborators of a session: name resolution and a
//! connected UDP socket.
use std::{
    io,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
    sync::Arc,
};

use async_trait::async_trait;
use log::trace;
use tokio::{net::UdpSocket, sync::mpsc, task::JoinHandle};

use crate::session::Input;

/// Turns a host name into candidate addresses. Only the first address is used.
#[async_trait]
pub trait Resolver: Send + Sync + 'static {
    async fn resolve(&self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>>;
}

/// Resolves through the system resolver via [tokio::net::lookup_host].
#[derive(Debug, Clone, Copy, Default)]
pub struct DnsResolver;

#[async_trait]
impl Resolver for DnsResolver {
    async fn resolve(&self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
        let addrs = tokio::net::lookup_host((host, port)).await?;
        Ok(addrs.collect())
    }
}

/// Answers every lookup with a fixed list of addresses.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    addrs: Vec<IpAddr>,
}

impl StaticResolver {
    pub fn new(addrs: Vec<IpAddr>) -> Self {
        StaticResolver { addrs }
    }
}

#[async_trait]
impl Resolver for StaticResolver {
    async fn resolve(&self, _host: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
        Ok(self
            .addrs
            .iter()
            .map(|ip| SocketAddr::new(*ip, port))
            .collect())
    }
}

/// A UDP socket bound to an ephemeral port and connected to one server.
#[derive(Debug)]
pub struct Link {
    socket: UdpSocket,
    peer: SocketAddr,
}

impl Link {
    pub async fn open(peer: SocketAddr) -> io::Result<Self> {
        let local: SocketAddr = match peer {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(peer).await?;
        trace!("udp socket {} connected to {}", socket.local_addr()?, peer);
        Ok(Link { socket, peer })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub async fn send(&self, datagram: &[u8]) -> io::Result<()> {
        let written = self.socket.send(datagram).await?;
        if written != datagram.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("sent {} of {} bytes", written, datagram.len()),
            ));
        }
        Ok(())
    }

    pub async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.socket.recv(buf).await
    }
}

/// Reads datagrams off `link` until the socket fails, forwarding each one
/// tagged with `attempt`. A read error is forwarded and ends the loop.
pub fn spawn_reader(
    link: Arc<Link>,
    attempt: u64,
    buffer_size: usize,
    inputs: mpsc::UnboundedSender<(u64, Input)>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = vec![0u8; buffer_size];
        loop {
            match link.recv(&mut buf).await {
                Ok(n) => {
                    trace!("received {} bytes from {}", n, link.peer());
                    if inputs
                        .send((attempt, Input::Datagram(buf[..n].to_vec())))
                        .is_err()
                    {
                        break;
                    }
                }
                Err(e) => {
                    let _ = inputs.send((attempt, Input::LinkError(e)));
                    break;
                }
            }
        }
    })
}
