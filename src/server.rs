//! A minimal rcon responder, enough to exercise a client without a game
//! server at hand.
use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, AtomicU8, Ordering},
        Arc,
    },
};

use log::{error, info, warn};
use tokio::{
    net::UdpSocket,
    sync::{mpsc, Mutex},
    task::JoinHandle,
};

use crate::{
    error::RconError,
    packet::{Packet, Response},
};

/// Longest reply body sent in one datagram before switching to fragments.
pub const DEFAULT_FRAGMENT_SIZE: usize = 1024;

pub struct Server {
    socket: UdpSocket,
    password: String,
    fragment_size: usize,
}

/// Control surface of a running [Server].
pub struct ServerHandle {
    socket: Arc<UdpSocket>,
    client: Arc<Mutex<Option<SocketAddr>>>,
    silent: Arc<AtomicBool>,
    next_token: AtomicU8,
    acks: mpsc::UnboundedReceiver<u8>,
    task: JoinHandle<()>,
}

impl Server {
    pub async fn bind(addr: &str, password: &str) -> Result<Self, RconError> {
        let socket = UdpSocket::bind(addr).await.map_err(RconError::Socket)?;
        Ok(Server {
            socket,
            password: password.to_owned(),
            fragment_size: DEFAULT_FRAGMENT_SIZE,
        })
    }

    pub fn with_fragment_size(mut self, fragment_size: usize) -> Self {
        self.fragment_size = fragment_size.max(1);
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, RconError> {
        self.socket.local_addr().map_err(RconError::Socket)
    }

    /// Serves until the handle is dropped or stopped. `handler` produces the
    /// reply text for every non-empty command.
    pub fn start<F>(self, handler: F) -> ServerHandle
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        let socket = Arc::new(self.socket);
        let client = Arc::new(Mutex::new(None));
        let silent = Arc::new(AtomicBool::new(false));
        let (acks_tx, acks) = mpsc::unbounded_channel();

        let serve = Serve {
            socket: Arc::clone(&socket),
            password: self.password,
            fragment_size: self.fragment_size,
            client: Arc::clone(&client),
            silent: Arc::clone(&silent),
            acks: acks_tx,
        };
        let task = tokio::spawn(serve.run(handler));

        ServerHandle {
            socket,
            client,
            silent,
            next_token: AtomicU8::new(0),
            acks,
            task,
        }
    }
}

struct Serve {
    socket: Arc<UdpSocket>,
    password: String,
    fragment_size: usize,
    client: Arc<Mutex<Option<SocketAddr>>>,
    silent: Arc<AtomicBool>,
    acks: mpsc::UnboundedSender<u8>,
}

impl Serve {
    async fn run<F>(self, handler: F)
    where
        F: Fn(&str) -> String,
    {
        if let Ok(addr) = self.socket.local_addr() {
            info!("rcon responder running on {}", addr);
        }
        let mut buf = vec![0u8; 65535];
        loop {
            let (n, peer) = match self.socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    error!("{:?}", e);
                    continue;
                }
            };
            if self.silent.load(Ordering::Relaxed) {
                continue;
            }
            match Packet::unpack(&buf[..n]) {
                Ok(packet) => self.process(packet, peer, &handler).await,
                Err(e) => warn!("discarding datagram from {}: {}", peer, e),
            }
        }
    }

    async fn process<F>(&self, packet: Packet, peer: SocketAddr, handler: &F)
    where
        F: Fn(&str) -> String,
    {
        let logged_in = *self.client.lock().await == Some(peer);
        match packet {
            Packet::Login { password } => {
                let success = password == self.password;
                info!("login from {} ({})", peer, if success { "ok" } else { "denied" });
                if success {
                    *self.client.lock().await = Some(peer);
                }
                self.reply(&Response::Login { success }, peer).await;
            }
            Packet::Command { sequence, .. } if !logged_in => {
                warn!("command #{} from {} before login", sequence, peer);
            }
            Packet::Command { sequence, command } if command.is_empty() => {
                self.reply(&Response::Ack { sequence }, peer).await;
            }
            Packet::Command { sequence, command } => {
                info!("receive: {:?}", command);
                let body = handler(&command);
                for response in split_reply(sequence, &body, self.fragment_size) {
                    self.reply(&response, peer).await;
                }
            }
            Packet::MessageAck { token } => {
                let _ = self.acks.send(token);
            }
        }
    }

    async fn reply(&self, response: &Response, peer: SocketAddr) {
        if let Err(e) = self.socket.send_to(&response.pack(), peer).await {
            error!("cannot reply to {}: {}", peer, e);
        }
    }
}

/// Cuts a reply into fragments of at most `fragment_size` bytes. The
/// protocol counts fragments in a byte, so anything past 255 of them is cut.
pub fn split_reply(sequence: u8, body: &str, fragment_size: usize) -> Vec<Response> {
    let bytes = body.as_bytes();
    if bytes.len() <= fragment_size {
        return vec![Response::Command {
            sequence,
            body: body.to_owned(),
        }];
    }

    let chunks: Vec<&[u8]> = bytes.chunks(fragment_size).collect();
    let total = u8::try_from(chunks.len()).unwrap_or_else(|_| {
        warn!("reply to #{} needs {} fragments, truncating", sequence, chunks.len());
        u8::MAX
    });
    chunks
        .into_iter()
        .take(usize::from(total))
        .enumerate()
        .map(|(index, chunk)| Response::Fragment {
            sequence,
            total,
            index: index as u8,
            body: chunk.to_vec(),
        })
        .collect()
}

impl ServerHandle {
    pub fn local_addr(&self) -> Result<SocketAddr, RconError> {
        self.socket.local_addr().map_err(RconError::Socket)
    }

    /// Pushes a server message to the logged-in client. Returns the token the
    /// client is expected to echo, or `None` if nobody is logged in.
    pub async fn broadcast(&self, text: &str) -> Option<u8> {
        let peer = (*self.client.lock().await)?;
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let message = Response::Message {
            token,
            body: text.to_owned(),
        };
        if let Err(e) = self.socket.send_to(&message.pack(), peer).await {
            error!("cannot push message to {}: {}", peer, e);
            return None;
        }
        Some(token)
    }

    /// Next message token echoed back by the client.
    pub async fn next_ack(&mut self) -> Option<u8> {
        self.acks.recv().await
    }

    /// Stops answering anything, as a hung server would.
    pub fn set_silent(&self, silent: bool) {
        self.silent.store(silent, Ordering::Relaxed);
    }

    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
