use std::{io, sync::Arc, time::Duration};

use log::{debug, info, trace, warn};
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
    time::{self, Instant, Interval, MissedTickBehavior},
};

use crate::{
    config::ClientConfig,
    error::RconError,
    session::{Effect, Input, Session, State},
    transport::{self, DnsResolver, Link, Resolver},
};

pub use crate::session::Event;

/// Asynchronous rcon client for one server. The connection is run by a
/// background task, so `Client::new` must be called from within a tokio
/// runtime. Results of `connect` and replies to commands arrive on the
/// [Events] receiver handed out alongside the client.
///
/// ## Example
/// ```no_run
/// use bercon::client::{Client, Event};
/// use bercon::config::ClientConfig;
/// use std::error::Error;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn Error>> {
///     let (client, mut events) = Client::new(ClientConfig::default());
///     client.connect("<put rcon password here>", "dev.viora.sh", 2302).await?;
///
///     while let Some(event) = events.recv().await {
///         match event {
///             Event::Connected => {
///                 client.send_command("players").await?;
///             }
///             Event::CommandResponse { body, .. } => {
///                 println!("{}", body);
///                 break;
///             }
///             Event::Error(e) => return Err(e.into()),
///             _ => {}
///         }
///     }
///     Ok(())
/// }
/// ```
pub struct Client {
    requests: mpsc::UnboundedSender<Request>,
    state: watch::Receiver<State>,
    default_port: u16,
}

/// Receiving end of the events emitted by a [Client].
pub type Events = mpsc::UnboundedReceiver<Event>;

enum Request {
    Connect {
        password: String,
        host: String,
        port: u16,
        reply: oneshot::Sender<Result<(), RconError>>,
    },
    Disconnect,
    Command {
        command: String,
        reply: oneshot::Sender<Result<u8, RconError>>,
    },
    SetKeepaliveInterval(Duration),
}

impl Client {
    pub fn new(config: ClientConfig) -> (Self, Events) {
        Self::with_resolver(config, DnsResolver)
    }

    pub fn with_resolver<R: Resolver>(config: ClientConfig, resolver: R) -> (Self, Events) {
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(State::Idle);

        let default_port = config.default_port;
        let engine = Engine::new(config, Arc::new(resolver), requests_rx, events_tx, state_tx);
        tokio::spawn(engine.run());

        (
            Client {
                requests: requests_tx,
                state: state_rx,
                default_port,
            },
            events_rx,
        )
    }

    /// Starts connecting. Missing credentials, lookup and login failures are
    /// reported as [Event::Error]; success as [Event::Connected]. Fails with
    /// `AlreadyConnected` if an attempt is in flight or the client is logged
    /// in.
    pub async fn connect(&self, password: &str, host: &str, port: u16) -> Result<(), RconError> {
        let (reply, response) = oneshot::channel();
        self.request(Request::Connect {
            password: password.to_owned(),
            host: host.to_owned(),
            port,
            reply,
        })?;
        response.await.map_err(|_| RconError::EngineStopped)?
    }

    /// [Client::connect] on the configured `default_port` (2302 unless
    /// overridden).
    pub async fn connect_default_port(&self, password: &str, host: &str) -> Result<(), RconError> {
        self.connect(password, host, self.default_port).await
    }

    pub fn default_port(&self) -> u16 {
        self.default_port
    }

    /// Closes the connection or abandons an attempt in progress. Calling it
    /// again has no effect.
    pub fn disconnect(&self) {
        let _ = self.request(Request::Disconnect);
    }

    /// Sends a command and returns the sequence number the matching
    /// [Event::CommandResponse] will carry. There is no retry; if no reply
    /// arrives, it is up to the caller to give up.
    pub async fn send_command(&self, command: &str) -> Result<u8, RconError> {
        let (reply, response) = oneshot::channel();
        self.request(Request::Command {
            command: command.to_owned(),
            reply,
        })?;
        response.await.map_err(|_| RconError::EngineStopped)?
    }

    pub fn is_connected(&self) -> bool {
        *self.state.borrow() == State::Authenticated
    }

    pub fn is_connecting(&self) -> bool {
        matches!(
            *self.state.borrow(),
            State::Resolving | State::Connecting | State::Authenticating
        )
    }

    pub fn state(&self) -> State {
        *self.state.borrow()
    }

    /// Used from the next connection onwards.
    pub fn set_keepalive_interval(&self, interval: Duration) {
        let _ = self.request(Request::SetKeepaliveInterval(interval));
    }

    fn request(&self, request: Request) -> Result<(), RconError> {
        self.requests
            .send(request)
            .map_err(|_| RconError::EngineStopped)
    }
}

// Owns the session and everything it talks to. All state changes happen on
// this task, one step at a time.
struct Engine<R> {
    session: Session,
    resolver: Arc<R>,
    recv_buffer_size: usize,
    requests: mpsc::UnboundedReceiver<Request>,
    events: mpsc::UnboundedSender<Event>,
    state: watch::Sender<State>,
    lookups_tx: mpsc::UnboundedSender<Input>,
    lookups: mpsc::UnboundedReceiver<Input>,
    opened_tx: mpsc::UnboundedSender<(u64, io::Result<Link>)>,
    opened: mpsc::UnboundedReceiver<(u64, io::Result<Link>)>,
    link_tx: mpsc::UnboundedSender<(u64, Input)>,
    link_inputs: mpsc::UnboundedReceiver<(u64, Input)>,
    link: Option<(u64, Arc<Link>)>,
    reader: Option<JoinHandle<()>>,
    keepalive: Option<Interval>,
}

enum Step {
    Request(Option<Request>),
    Input(Input),
    Opened(u64, io::Result<Link>),
    Link(u64, Input),
}

impl<R: Resolver> Engine<R> {
    fn new(
        config: ClientConfig,
        resolver: Arc<R>,
        requests: mpsc::UnboundedReceiver<Request>,
        events: mpsc::UnboundedSender<Event>,
        state: watch::Sender<State>,
    ) -> Self {
        let mut session = Session::default();
        session.set_keepalive_interval(config.keepalive_interval());
        let (lookups_tx, lookups) = mpsc::unbounded_channel();
        let (opened_tx, opened) = mpsc::unbounded_channel();
        let (link_tx, link_inputs) = mpsc::unbounded_channel();
        Engine {
            session,
            resolver,
            recv_buffer_size: config.recv_buffer_size,
            requests,
            events,
            state,
            lookups_tx,
            lookups,
            opened_tx,
            opened,
            link_tx,
            link_inputs,
            link: None,
            reader: None,
            keepalive: None,
        }
    }

    async fn run(mut self) {
        loop {
            let step = tokio::select! {
                request = self.requests.recv() => Step::Request(request),
                Some(input) = self.lookups.recv() => Step::Input(input),
                Some((attempt, result)) = self.opened.recv() => Step::Opened(attempt, result),
                Some((attempt, input)) = self.link_inputs.recv() => Step::Link(attempt, input),
                _ = next_tick(&mut self.keepalive) => Step::Input(Input::Tick),
            };

            match step {
                Step::Request(Some(request)) => self.on_request(request),
                Step::Request(None) => {
                    debug!("client dropped, shutting down");
                    self.session.disconnect();
                    self.pump().await;
                    break;
                }
                Step::Input(input) => self.session.handle(input),
                Step::Opened(attempt, result) => self.on_link_opened(attempt, result),
                Step::Link(attempt, input) => {
                    if self.link.as_ref().map(|(current, _)| *current) == Some(attempt) {
                        self.session.handle(input);
                    } else {
                        trace!("dropping input from closed link {}", attempt);
                    }
                }
            }
            self.pump().await;
        }
    }

    fn on_request(&mut self, request: Request) {
        match request {
            Request::Connect {
                password,
                host,
                port,
                reply,
            } => {
                let _ = reply.send(self.session.connect(&password, &host, port));
            }
            Request::Disconnect => self.session.disconnect(),
            Request::Command { command, reply } => {
                let _ = reply.send(self.session.send_command(&command));
            }
            Request::SetKeepaliveInterval(interval) => {
                self.session.set_keepalive_interval(interval)
            }
        }
    }

    fn on_link_opened(&mut self, attempt: u64, result: io::Result<Link>) {
        match result {
            Ok(link) if self.session.accepts_link(attempt) => {
                let link = Arc::new(link);
                self.reader = Some(transport::spawn_reader(
                    Arc::clone(&link),
                    attempt,
                    self.recv_buffer_size,
                    self.link_tx.clone(),
                ));
                self.link = Some((attempt, link));
                self.session.handle(Input::LinkOpened { attempt });
            }
            Ok(link) => debug!("closing socket to {} of abandoned attempt", link.peer()),
            Err(error) => self.session.handle(Input::LinkFailed { attempt, error }),
        }
    }

    // Carries out queued effects until the session has nothing more to say.
    async fn pump(&mut self) {
        loop {
            let effects = self.session.take_effects();
            self.state.send_replace(self.session.state());
            if effects.is_empty() {
                break;
            }
            for effect in effects {
                self.apply(effect).await;
            }
        }
    }

    async fn apply(&mut self, effect: Effect) {
        match effect {
            Effect::Resolve {
                attempt,
                host,
                port,
            } => {
                let resolver = Arc::clone(&self.resolver);
                let results = self.lookups_tx.clone();
                tokio::spawn(async move {
                    let result = resolver.resolve(&host, port).await;
                    let _ = results.send(Input::Resolved { attempt, result });
                });
            }
            Effect::OpenLink { attempt, addr } => {
                let results = self.opened_tx.clone();
                tokio::spawn(async move {
                    let _ = results.send((attempt, Link::open(addr).await));
                });
            }
            Effect::Send(datagram) => {
                let Some((_, link)) = &self.link else {
                    warn!("no link, dropping {} byte datagram", datagram.len());
                    return;
                };
                if let Err(e) = link.send(&datagram).await {
                    self.session.handle(Input::LinkError(e));
                }
            }
            Effect::CloseLink => {
                if let Some(reader) = self.reader.take() {
                    reader.abort();
                }
                if let Some((_, link)) = self.link.take() {
                    info!("closed connection to {}", link.peer());
                }
                self.session.handle(Input::LinkClosed);
            }
            Effect::StartKeepalive(period) => {
                let mut interval = time::interval_at(Instant::now() + period, period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                self.keepalive = Some(interval);
            }
            Effect::StopKeepalive => self.keepalive = None,
            Effect::Emit(event) => {
                trace!("emitting {:?}", event);
                let _ = self.events.send(event);
            }
        }
    }
}

async fn next_tick(keepalive: &mut Option<Interval>) {
    match keepalive {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
