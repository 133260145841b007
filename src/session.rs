//! Connection state machine for a single rcon server.
//!
//! [Session] does no I/O. Callers feed it operations (`connect`,
//! `disconnect`, `send_command`) and asynchronous results ([Input]), and
//! carry out the [Effect]s it queues up. [crate::client::Client] is the
//! tokio driver; tests drive it by hand.
use std::{io, mem, net::SocketAddr, time::Duration};

use log::{debug, error, trace, warn};

use crate::{
    error::RconError,
    keepalive::{Keepalive, Verdict},
    packet::{Packet, Response},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Resolving,
    Connecting,
    /// Link is up and the login packet is on its way.
    Authenticating,
    Authenticated,
    Disconnected,
}

/// Notifications for whoever owns the session.
#[derive(Debug)]
pub enum Event {
    Connected,
    Disconnected,
    Error(RconError),
    /// Unsolicited server message (chat, admin logins, ...).
    Message(String),
    /// Reply to the command that was issued with `sequence`.
    CommandResponse { body: String, sequence: u8 },
}

/// Results of asynchronous work started by an [Effect].
#[derive(Debug)]
pub enum Input {
    Resolved {
        attempt: u64,
        result: io::Result<Vec<SocketAddr>>,
    },
    LinkOpened {
        attempt: u64,
    },
    LinkFailed {
        attempt: u64,
        error: io::Error,
    },
    /// The link was closed, either on request or by the transport.
    LinkClosed,
    LinkError(io::Error),
    Datagram(Vec<u8>),
    Tick,
}

/// Work the driver must carry out on the session's behalf.
#[derive(Debug)]
pub enum Effect {
    Resolve {
        attempt: u64,
        host: String,
        port: u16,
    },
    OpenLink {
        attempt: u64,
        addr: SocketAddr,
    },
    Send(Vec<u8>),
    CloseLink,
    StartKeepalive(Duration),
    StopKeepalive,
    Emit(Event),
}

// Command reply being glued together from fragments.
#[derive(Debug)]
struct Reassembly {
    sequence: u8,
    total: u8,
    next_index: u8,
    body: Vec<u8>,
}

#[derive(Debug)]
pub struct Session {
    state: State,
    password: String,
    host: String,
    port: u16,
    remote: Option<SocketAddr>,
    // Bumped on every connect so late results of an abandoned attempt can be told apart.
    attempt: u64,
    link_open: bool,
    next_sequence: u8,
    keepalive: Keepalive,
    reassembly: Option<Reassembly>,
    effects: Vec<Effect>,
}

impl Session {
    pub fn new(keepalive_interval: Duration) -> Self {
        Session {
            state: State::Idle,
            password: String::new(),
            host: String::new(),
            port: 0,
            remote: None,
            attempt: 0,
            link_open: false,
            next_sequence: 0,
            keepalive: Keepalive::new(keepalive_interval),
            reassembly: None,
            effects: Vec::new(),
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == State::Authenticated
    }

    pub fn is_connecting(&self) -> bool {
        matches!(
            self.state,
            State::Resolving | State::Connecting | State::Authenticating
        )
    }

    pub fn remote(&self) -> Option<SocketAddr> {
        self.remote
    }

    pub fn keepalive_interval(&self) -> Duration {
        self.keepalive.interval()
    }

    /// Applies from the next link onwards. A zero interval is ignored.
    pub fn set_keepalive_interval(&mut self, interval: Duration) {
        if interval.is_zero() {
            warn!("ignoring zero keepalive interval");
            return;
        }
        self.keepalive.set_interval(interval);
    }

    /// Whether a freshly opened socket for `attempt` is still wanted.
    pub fn accepts_link(&self, attempt: u64) -> bool {
        attempt == self.attempt && self.state == State::Connecting
    }

    /// Effects queued since the last call.
    pub fn take_effects(&mut self) -> Vec<Effect> {
        mem::take(&mut self.effects)
    }

    /// Starts a connection attempt. Empty credentials are reported through
    /// [Event::Error] and leave the session idle. Fails with
    /// `AlreadyConnected` while another attempt is in flight or logged in,
    /// and after `disconnect` until the old link has reported
    /// [Input::LinkClosed].
    pub fn connect(&mut self, password: &str, host: &str, port: u16) -> Result<(), RconError> {
        if self.is_connecting() || self.is_connected() || self.link_open {
            warn!("connect requested while {:?}, rejecting", self.state);
            return Err(RconError::AlreadyConnected);
        }

        self.state = State::Idle;
        if host.is_empty() || password.is_empty() {
            self.emit(Event::Error(RconError::MissingCredentials));
            return Ok(());
        }

        self.attempt += 1;
        self.password = password.to_owned();
        self.host = host.to_owned();
        self.port = port;
        self.remote = None;
        self.state = State::Resolving;
        debug!("resolving {}:{} (attempt {})", host, port, self.attempt);
        self.effects.push(Effect::Resolve {
            attempt: self.attempt,
            host: self.host.clone(),
            port,
        });
        Ok(())
    }

    /// Tears the session down. Safe to call in any state and any number of
    /// times. `Disconnected` is emitted once the link reports it has closed.
    pub fn disconnect(&mut self) {
        self.shut_down();
    }

    /// Sends `command` and returns the sequence number its reply will carry.
    pub fn send_command(&mut self, command: &str) -> Result<u8, RconError> {
        if self.state != State::Authenticated {
            return Err(RconError::NotConnected);
        }
        Ok(self.issue_command(command))
    }

    pub fn handle(&mut self, input: Input) {
        match input {
            Input::Resolved { attempt, result } => self.on_resolved(attempt, result),
            Input::LinkOpened { attempt } => self.on_link_opened(attempt),
            Input::LinkFailed { attempt, error } => {
                if !self.accepts_link(attempt) {
                    debug!("ignoring link failure of abandoned attempt {}", attempt);
                    return;
                }
                error!("cannot open link to {:?}: {}", self.remote, error);
                self.state = State::Disconnected;
                self.emit(Event::Error(RconError::Socket(error)));
            }
            Input::LinkClosed => {
                if !self.link_open {
                    return;
                }
                self.link_open = false;
                self.shut_down();
                debug!("link closed");
                self.emit(Event::Disconnected);
            }
            Input::LinkError(error) => {
                if !self.link_open {
                    return;
                }
                error!("link error: {}", error);
                self.emit(Event::Error(RconError::Socket(error)));
                self.shut_down();
            }
            Input::Datagram(datagram) => self.on_datagram(&datagram),
            Input::Tick => self.on_tick(),
        }
    }

    fn on_resolved(&mut self, attempt: u64, result: io::Result<Vec<SocketAddr>>) {
        if attempt != self.attempt || self.state != State::Resolving {
            debug!("ignoring stale lookup result for attempt {}", attempt);
            return;
        }

        let addr = result.and_then(|addrs| {
            addrs.into_iter().next().ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, "lookup returned no addresses")
            })
        });
        match addr {
            Ok(addr) => {
                debug!("{} resolved to {}", self.host, addr);
                self.remote = Some(addr);
                self.state = State::Connecting;
                self.effects.push(Effect::OpenLink { attempt, addr });
            }
            Err(error) => {
                error!("cannot resolve {}: {}", self.host, error);
                self.state = State::Disconnected;
                self.emit(Event::Error(RconError::Dns(error)));
            }
        }
    }

    fn on_link_opened(&mut self, attempt: u64) {
        if !self.accepts_link(attempt) {
            debug!("ignoring link of abandoned attempt {}", attempt);
            return;
        }
        self.link_open = true;
        self.next_sequence = 0;
        self.reassembly = None;
        self.keepalive.arm();
        self.state = State::Authenticating;
        self.effects
            .push(Effect::StartKeepalive(self.keepalive.interval()));
        trace!("sending login packet");
        self.send(Packet::Login {
            password: self.password.clone(),
        });
    }

    fn on_datagram(&mut self, datagram: &[u8]) {
        if !self.link_open || datagram.is_empty() {
            return;
        }
        let response = match Response::unpack(datagram) {
            Ok(response) => response,
            Err(e) => {
                warn!("discarding datagram: {}", e);
                return;
            }
        };
        trace!("received {:?}", response);

        match response {
            Response::Login { success } => {
                if self.state != State::Authenticating {
                    debug!("ignoring login result while {:?}", self.state);
                } else if success {
                    debug!("logged in to {:?}", self.remote);
                    self.state = State::Authenticated;
                    self.emit(Event::Connected);
                } else {
                    error!("server rejected the password");
                    self.emit(Event::Error(RconError::LoginFailed));
                    self.shut_down();
                }
            }
            Response::Ack { sequence } => {
                trace!("ack for #{}", sequence);
                self.keepalive.acknowledge();
            }
            Response::Command { sequence, body } => {
                self.emit(Event::CommandResponse { body, sequence });
            }
            Response::Fragment {
                sequence,
                total,
                index,
                body,
            } => self.reassemble(sequence, total, index, body),
            Response::Message { token, body } => {
                self.send(Packet::MessageAck { token });
                self.emit(Event::Message(body));
            }
        }
    }

    // Fragments must arrive as 0, 1, ..., total - 1 for one sequence number.
    // A repeated fragment is skipped; a gap or a foreign fragment drops the
    // partial reply. Index 0 always starts over.
    fn reassemble(&mut self, sequence: u8, total: u8, index: u8, body: Vec<u8>) {
        if index >= total {
            warn!("fragment {} of {} for #{} out of range", index, total, sequence);
            return;
        }
        if index == 0 {
            self.reassembly = Some(Reassembly {
                sequence,
                total,
                next_index: 0,
                body: Vec::new(),
            });
        }

        match self.reassembly.as_mut() {
            Some(partial)
                if partial.sequence == sequence
                    && partial.total == total
                    && partial.next_index == index =>
            {
                partial.body.extend_from_slice(&body);
                partial.next_index += 1;
            }
            Some(partial)
                if partial.sequence == sequence
                    && partial.total == total
                    && index < partial.next_index =>
            {
                debug!("duplicate fragment {} for #{}", index, sequence);
                return;
            }
            _ => {
                warn!(
                    "fragment {} of {} for #{} out of order, dropping reply",
                    index, total, sequence
                );
                self.reassembly = None;
                return;
            }
        }

        if index == total - 1 {
            if let Some(complete) = self.reassembly.take() {
                let body = String::from_utf8_lossy(&complete.body).into_owned();
                self.emit(Event::CommandResponse { body, sequence });
            }
        }
    }

    fn on_tick(&mut self) {
        if !self.link_open {
            return;
        }
        match self.keepalive.tick() {
            Verdict::Probe => {
                // Before login completes there is nothing to probe with.
                if self.state == State::Authenticated {
                    trace!("sending keepalive");
                    self.issue_command("");
                }
            }
            Verdict::Expired => {
                error!(
                    "no keepalive acknowledgement within {:?}",
                    self.keepalive.interval()
                );
                self.emit(Event::Error(RconError::KeepaliveExceeded));
                self.shut_down();
            }
        }
    }

    fn issue_command(&mut self, command: &str) -> u8 {
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        self.send(Packet::Command {
            sequence,
            command: command.to_owned(),
        });
        sequence
    }

    fn shut_down(&mut self) {
        match self.state {
            State::Idle | State::Disconnected => {}
            State::Resolving | State::Connecting => {
                debug!("abandoning connection attempt {}", self.attempt);
                self.state = State::Disconnected;
            }
            State::Authenticating | State::Authenticated => {
                debug!("disconnecting from {:?}", self.remote);
                self.state = State::Disconnected;
                self.reassembly = None;
                self.effects.push(Effect::StopKeepalive);
                self.effects.push(Effect::CloseLink);
            }
        }
    }

    fn send(&mut self, packet: Packet) {
        self.effects.push(Effect::Send(packet.pack()));
    }

    fn emit(&mut self, event: Event) {
        self.effects.push(Effect::Emit(event));
    }
}

impl Default for Session {
    fn default() -> Self {
        Session::new(crate::keepalive::DEFAULT_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:2302".parse().unwrap()
    }

    fn events(effects: &[Effect]) -> Vec<&Event> {
        effects
            .iter()
            .filter_map(|effect| match effect {
                Effect::Emit(event) => Some(event),
                _ => None,
            })
            .collect()
    }

    fn sent(effects: &[Effect]) -> Vec<Packet> {
        effects
            .iter()
            .filter_map(|effect| match effect {
                Effect::Send(bytes) => Some(Packet::unpack(bytes).unwrap()),
                _ => None,
            })
            .collect()
    }

    fn authenticating() -> Session {
        let mut session = Session::default();
        session.connect("secret", "example.org", 2302).unwrap();
        session.handle(Input::Resolved {
            attempt: 1,
            result: Ok(vec![addr()]),
        });
        session.handle(Input::LinkOpened { attempt: 1 });
        session.take_effects();
        session
    }

    fn authenticated() -> Session {
        let mut session = authenticating();
        session.handle(Input::Datagram(Response::Login { success: true }.pack()));
        session.take_effects();
        session
    }

    fn fragment(sequence: u8, total: u8, index: u8, body: &[u8]) -> Input {
        Input::Datagram(
            Response::Fragment {
                sequence,
                total,
                index,
                body: body.to_vec(),
            }
            .pack(),
        )
    }

    #[test]
    fn empty_password_or_host_is_rejected() {
        for (password, host) in [("", "host"), ("pw", "")] {
            let mut session = Session::default();
            session.connect(password, host, 2302).unwrap();
            let effects = session.take_effects();
            assert_eq!(effects.len(), 1);
            assert!(matches!(
                events(&effects)[..],
                [Event::Error(RconError::MissingCredentials)]
            ));
            assert_eq!(session.state(), State::Idle);
        }
    }

    #[test]
    fn connect_starts_lookup() {
        let mut session = Session::default();
        session.connect("secret", "example.org", 2309).unwrap();
        assert_eq!(session.state(), State::Resolving);
        assert!(session.is_connecting());
        match &session.take_effects()[..] {
            [Effect::Resolve {
                attempt: 1,
                host,
                port: 2309,
            }] => assert_eq!(host, "example.org"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn second_connect_is_rejected_while_busy() {
        let mut session = Session::default();
        session.connect("secret", "example.org", 2302).unwrap();
        assert!(matches!(
            session.connect("secret", "example.org", 2302),
            Err(RconError::AlreadyConnected)
        ));
        let mut session = authenticated();
        assert!(matches!(
            session.connect("secret", "example.org", 2302),
            Err(RconError::AlreadyConnected)
        ));
    }

    #[test]
    fn resolved_address_opens_link() {
        let mut session = Session::default();
        session.connect("secret", "example.org", 2302).unwrap();
        session.take_effects();
        session.handle(Input::Resolved {
            attempt: 1,
            result: Ok(vec![addr(), "10.0.0.1:2302".parse().unwrap()]),
        });
        assert_eq!(session.state(), State::Connecting);
        assert_eq!(session.remote(), Some(addr()));
        assert!(matches!(
            session.take_effects()[..],
            [Effect::OpenLink { attempt: 1, addr: a }] if a == addr()
        ));
    }

    #[test]
    fn failed_or_empty_lookup_reports_dns_error() {
        let failures: [io::Result<Vec<SocketAddr>>; 2] = [
            Err(io::Error::new(io::ErrorKind::Other, "no such host")),
            Ok(vec![]),
        ];
        for result in failures {
            let mut session = Session::default();
            session.connect("secret", "example.org", 2302).unwrap();
            session.take_effects();
            session.handle(Input::Resolved { attempt: 1, result });
            assert_eq!(session.state(), State::Disconnected);
            let effects = session.take_effects();
            assert!(matches!(
                events(&effects)[..],
                [Event::Error(RconError::Dns(_))]
            ));
        }
    }

    #[test]
    fn late_lookup_after_disconnect_is_ignored() {
        let mut session = Session::default();
        session.connect("secret", "example.org", 2302).unwrap();
        session.disconnect();
        session.take_effects();
        session.handle(Input::Resolved {
            attempt: 1,
            result: Ok(vec![addr()]),
        });
        assert_eq!(session.state(), State::Disconnected);
        assert!(session.take_effects().is_empty());
    }

    #[test]
    fn late_link_after_disconnect_is_ignored() {
        let mut session = Session::default();
        session.connect("secret", "example.org", 2302).unwrap();
        session.handle(Input::Resolved {
            attempt: 1,
            result: Ok(vec![addr()]),
        });
        assert_eq!(session.state(), State::Connecting);
        session.disconnect();
        session.take_effects();

        assert!(!session.accepts_link(1));
        session.handle(Input::LinkOpened { attempt: 1 });
        session.handle(Input::LinkFailed {
            attempt: 1,
            error: io::Error::new(io::ErrorKind::TimedOut, "late"),
        });
        assert_eq!(session.state(), State::Disconnected);
        assert!(session.take_effects().is_empty());
    }

    #[test]
    fn late_lookup_of_previous_attempt_is_ignored() {
        let mut session = Session::default();
        session.connect("secret", "old.example.org", 2302).unwrap();
        session.disconnect();
        session.connect("secret", "new.example.org", 2302).unwrap();
        session.take_effects();
        session.handle(Input::Resolved {
            attempt: 1,
            result: Ok(vec!["10.0.0.1:2302".parse().unwrap()]),
        });
        assert_eq!(session.state(), State::Resolving);
        assert!(session.take_effects().is_empty());
        assert!(!session.accepts_link(1));
    }

    #[test]
    fn opened_link_sends_login_and_starts_keepalive() {
        let mut session = Session::default();
        session.connect("secret", "example.org", 2302).unwrap();
        session.handle(Input::Resolved {
            attempt: 1,
            result: Ok(vec![addr()]),
        });
        session.take_effects();
        session.handle(Input::LinkOpened { attempt: 1 });
        assert_eq!(session.state(), State::Authenticating);
        assert!(session.is_connecting());
        let effects = session.take_effects();
        assert!(matches!(
            effects[0],
            Effect::StartKeepalive(d) if d == Duration::from_millis(5000)
        ));
        assert_eq!(
            sent(&effects),
            vec![Packet::Login {
                password: "secret".to_string()
            }]
        );
    }

    #[test]
    fn link_failure_reports_socket_error() {
        let mut session = Session::default();
        session.connect("secret", "example.org", 2302).unwrap();
        session.handle(Input::Resolved {
            attempt: 1,
            result: Ok(vec![addr()]),
        });
        session.take_effects();
        session.handle(Input::LinkFailed {
            attempt: 1,
            error: io::Error::new(io::ErrorKind::AddrNotAvailable, "nope"),
        });
        assert_eq!(session.state(), State::Disconnected);
        let effects = session.take_effects();
        assert!(matches!(
            events(&effects)[..],
            [Event::Error(RconError::Socket(e))] if e.kind() == io::ErrorKind::AddrNotAvailable
        ));
    }

    #[test]
    fn successful_login_connects() {
        let mut session = authenticating();
        session.handle(Input::Datagram(Response::Login { success: true }.pack()));
        assert!(session.is_connected());
        assert!(!session.is_connecting());
        let effects = session.take_effects();
        assert!(matches!(events(&effects)[..], [Event::Connected]));
    }

    #[test]
    fn rejected_login_disconnects() {
        let mut session = authenticating();
        session.handle(Input::Datagram(Response::Login { success: false }.pack()));
        assert_eq!(session.state(), State::Disconnected);
        let effects = session.take_effects();
        assert!(matches!(
            events(&effects)[..],
            [Event::Error(RconError::LoginFailed)]
        ));
        assert!(effects.iter().any(|e| matches!(e, Effect::CloseLink)));

        session.handle(Input::LinkClosed);
        let effects = session.take_effects();
        assert!(matches!(events(&effects)[..], [Event::Disconnected]));
    }

    #[test]
    fn commands_are_numbered_from_zero_and_wrap() {
        let mut session = authenticated();
        for expected in 0..=255u8 {
            assert_eq!(session.send_command("players").unwrap(), expected);
        }
        assert_eq!(session.send_command("players").unwrap(), 0);
        assert_eq!(
            sent(&session.take_effects()).last(),
            Some(&Packet::Command {
                sequence: 0,
                command: "players".to_string()
            })
        );
    }

    #[test]
    fn sequence_resets_on_reconnect() {
        let mut session = authenticated();
        session.send_command("a").unwrap();
        session.send_command("b").unwrap();
        session.disconnect();
        session.handle(Input::LinkClosed);

        session.connect("secret", "example.org", 2302).unwrap();
        session.handle(Input::Resolved {
            attempt: 2,
            result: Ok(vec![addr()]),
        });
        session.handle(Input::LinkOpened { attempt: 2 });
        session.handle(Input::Datagram(Response::Login { success: true }.pack()));
        assert_eq!(session.send_command("c").unwrap(), 0);
    }

    #[test]
    fn commands_need_a_login() {
        let mut session = Session::default();
        assert!(matches!(
            session.send_command("players"),
            Err(RconError::NotConnected)
        ));
        let mut session = authenticating();
        assert!(matches!(
            session.send_command("players"),
            Err(RconError::NotConnected)
        ));
        assert!(session.take_effects().is_empty());
    }

    #[test]
    fn single_part_reply_is_emitted() {
        let mut session = authenticated();
        session.handle(Input::Datagram(
            Response::Command {
                sequence: 3,
                body: "ok".to_string(),
            }
            .pack(),
        ));
        let effects = session.take_effects();
        assert!(matches!(
            events(&effects)[..],
            [Event::CommandResponse { body, sequence: 3 }] if body == "ok"
        ));
    }

    #[test]
    fn corrupt_datagram_is_silently_dropped() {
        let mut session = authenticated();
        let mut datagram = Response::Command {
            sequence: 3,
            body: "ok".to_string(),
        }
        .pack();
        datagram[2] ^= 0xFF;
        session.handle(Input::Datagram(datagram));
        session.handle(Input::Datagram(b"garbage".to_vec()));
        session.handle(Input::Datagram(Vec::new()));
        assert!(session.take_effects().is_empty());
        assert!(session.is_connected());
    }

    #[test]
    fn multipart_reply_is_reassembled() {
        let mut session = authenticated();
        session.handle(fragment(7, 3, 0, b"ab"));
        session.handle(fragment(7, 3, 1, b"cd"));
        assert!(session.take_effects().is_empty());
        session.handle(fragment(7, 3, 2, b"ef"));
        let effects = session.take_effects();
        assert!(matches!(
            events(&effects)[..],
            [Event::CommandResponse { body, sequence: 7 }] if body == "abcdef"
        ));
        assert!(session.reassembly.is_none());
    }

    #[test]
    fn multipart_keeps_split_characters_intact() {
        let mut session = authenticated();
        let text = "grüße".as_bytes();
        session.handle(fragment(1, 2, 0, &text[..3]));
        session.handle(fragment(1, 2, 1, &text[3..]));
        let effects = session.take_effects();
        assert!(matches!(
            events(&effects)[..],
            [Event::CommandResponse { body, .. }] if body == "grüße"
        ));
    }

    #[test]
    fn multipart_gap_drops_reply() {
        let mut session = authenticated();
        session.handle(fragment(7, 3, 0, b"ab"));
        session.handle(fragment(7, 3, 2, b"ef"));
        assert!(session.take_effects().is_empty());
        assert!(session.reassembly.is_none());
    }

    #[test]
    fn multipart_duplicate_is_skipped() {
        let mut session = authenticated();
        session.handle(fragment(7, 2, 0, b"ab"));
        session.handle(fragment(7, 2, 0, b"ab"));
        session.handle(fragment(7, 2, 1, b"cd"));
        let effects = session.take_effects();
        assert!(matches!(
            events(&effects)[..],
            [Event::CommandResponse { body, sequence: 7 }] if body == "abcd"
        ));
    }

    #[test]
    fn multipart_out_of_range_index_is_ignored() {
        let mut session = authenticated();
        session.handle(fragment(7, 2, 2, b"zz"));
        assert!(session.take_effects().is_empty());
    }

    #[test]
    fn server_message_is_acknowledged_then_emitted() {
        let mut session = authenticated();
        session.handle(Input::Datagram(
            Response::Message {
                token: 42,
                body: "(Global) admin: hi".to_string(),
            }
            .pack(),
        ));
        let effects = session.take_effects();
        assert_eq!(effects.len(), 2);
        assert_eq!(sent(&effects), vec![Packet::MessageAck { token: 42 }]);
        assert!(matches!(
            &effects[1],
            Effect::Emit(Event::Message(text)) if text == "(Global) admin: hi"
        ));
    }

    #[test]
    fn keepalive_probes_then_expires() {
        let mut session = authenticated();
        session.handle(Input::Tick);
        assert_eq!(
            sent(&session.take_effects()),
            vec![Packet::Command {
                sequence: 0,
                command: String::new()
            }]
        );

        session.handle(Input::Tick);
        let effects = session.take_effects();
        assert!(matches!(
            events(&effects)[..],
            [Event::Error(RconError::KeepaliveExceeded)]
        ));
        assert_eq!(session.state(), State::Disconnected);

        session.handle(Input::LinkClosed);
        session.handle(Input::Tick);
        session.handle(Input::LinkClosed);
        let effects = session.take_effects();
        assert!(matches!(events(&effects)[..], [Event::Disconnected]));
    }

    #[test]
    fn acknowledged_keepalive_keeps_session() {
        let mut session = authenticated();
        for sequence in 0..5 {
            session.handle(Input::Tick);
            session.handle(Input::Datagram(Response::Ack { sequence }.pack()));
        }
        assert!(session.is_connected());
        let effects = session.take_effects();
        assert!(events(&effects).is_empty());
    }

    #[test]
    fn login_must_finish_within_two_ticks() {
        let mut session = authenticating();
        session.handle(Input::Tick);
        assert!(session.take_effects().is_empty());
        session.handle(Input::Tick);
        let effects = session.take_effects();
        assert!(matches!(
            events(&effects)[..],
            [Event::Error(RconError::KeepaliveExceeded)]
        ));
    }

    #[test]
    fn reconnect_waits_for_old_link_to_close() {
        let mut session = authenticated();
        session.disconnect();
        assert!(matches!(
            session.connect("secret", "example.org", 2302),
            Err(RconError::AlreadyConnected)
        ));

        session.handle(Input::LinkClosed);
        let effects = session.take_effects();
        assert!(matches!(events(&effects)[..], [Event::Disconnected]));

        session.connect("secret", "example.org", 2302).unwrap();
        assert_eq!(session.state(), State::Resolving);
        session.handle(Input::LinkClosed);
        assert_eq!(session.state(), State::Resolving);
        match &session.take_effects()[..] {
            [Effect::Resolve { attempt: 2, .. }] => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn disconnect_is_idempotent() {
        let mut session = authenticated();
        session.disconnect();
        session.disconnect();
        let effects = session.take_effects();
        assert_eq!(
            effects
                .iter()
                .filter(|e| matches!(e, Effect::CloseLink))
                .count(),
            1
        );
        session.handle(Input::LinkClosed);
        session.handle(Input::LinkClosed);
        let effects = session.take_effects();
        assert_eq!(events(&effects).len(), 1);
        assert!(matches!(events(&effects)[..], [Event::Disconnected]));
        assert_eq!(session.state(), State::Disconnected);
    }

    #[test]
    fn transport_closure_disconnects() {
        let mut session = authenticated();
        session.handle(Input::LinkClosed);
        assert_eq!(session.state(), State::Disconnected);
        let effects = session.take_effects();
        assert!(effects.iter().any(|e| matches!(e, Effect::StopKeepalive)));
        assert!(matches!(events(&effects)[..], [Event::Disconnected]));
    }

    #[test]
    fn link_error_reports_and_disconnects() {
        let mut session = authenticated();
        session.handle(Input::LinkError(io::Error::new(
            io::ErrorKind::ConnectionRefused,
            "refused",
        )));
        let effects = session.take_effects();
        assert!(matches!(
            events(&effects)[..],
            [Event::Error(RconError::Socket(_))]
        ));
        assert!(effects.iter().any(|e| matches!(e, Effect::CloseLink)));
    }

    #[test]
    fn disconnect_before_link_emits_nothing() {
        let mut session = Session::default();
        session.connect("secret", "example.org", 2302).unwrap();
        session.take_effects();
        session.disconnect();
        assert_eq!(session.state(), State::Disconnected);
        assert!(session.take_effects().is_empty());
    }

    #[test]
    fn zero_keepalive_interval_is_ignored() {
        let mut session = Session::default();
        session.set_keepalive_interval(Duration::ZERO);
        assert_eq!(session.keepalive_interval(), Duration::from_millis(5000));
        session.set_keepalive_interval(Duration::from_secs(1));
        assert_eq!(session.keepalive_interval(), Duration::from_secs(1));
    }
}
