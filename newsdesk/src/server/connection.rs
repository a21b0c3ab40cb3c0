use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use common::protocol::{Domain, SubCommand, TopCommand};
use common::ServerConfig;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, info, warn};

use super::registry::Registration;
use crate::error::{ConnectionError, ValidationError};
use crate::router::{error_reply, CommandRouter, Request};

/// The identified client on the other end of a connection.
#[derive(Debug, Clone)]
pub struct ClientSession {
    pub name: String,
}

impl ClientSession {
    /// Names must be non-empty printable ASCII.
    pub fn from_handshake(name: String) -> Result<Self, ConnectionError> {
        if name.trim().is_empty() {
            return Err(ConnectionError::Protocol("Invalid client name received".to_string()));
        }
        if !name.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
            return Err(ConnectionError::Protocol(format!("client name is not printable ASCII: {:?}", name)));
        }
        Ok(Self { name })
    }
}

#[derive(Debug)]
enum State {
    Idle,
    AwaitSubCommand(Domain),
    AwaitParam(SubCommand),
    Dispatch(Request),
}

impl State {
    /// What the client owes us when the state is mid-request.
    fn expected_input(&self) -> Option<&'static str> {
        match self {
            State::AwaitSubCommand(_) => Some("search type"),
            State::AwaitParam(_) => Some("parameter"),
            State::Idle | State::Dispatch(_) => None,
        }
    }
}

enum Inbound {
    Message(String),
    TimedOut,
    /// Peer hung up or the server is shutting down.
    Closed,
}

/// Drives one client through the protocol:
/// name, then repeated (command, sub-command, optional parameter) until `Quit`.
pub struct ConnectionHandler {
    peer: SocketAddr,
    framed: Framed<TcpStream, LinesCodec>,
    router: Arc<CommandRouter>,
    registration: Registration,
    read_timeout: Duration,
    max_idle_cycles: u32,
}

impl ConnectionHandler {
    pub fn new(
        stream: TcpStream,
        peer: SocketAddr,
        router: Arc<CommandRouter>,
        registration: Registration,
        settings: &ServerConfig,
    ) -> Self {
        Self {
            peer,
            framed: Framed::new(stream, LinesCodec::new_with_max_length(settings.buffer_size)),
            router,
            registration,
            read_timeout: settings.read_timeout(),
            max_idle_cycles: settings.max_idle_cycles,
        }
    }

    pub async fn run(mut self) -> Result<(), ConnectionError> {
        let conn = self.registration.id();
        let session = match self.next_message().await? {
            Inbound::Message(name) => ClientSession::from_handshake(name)?,
            Inbound::TimedOut => return Err(ConnectionError::HandshakeTimeout),
            Inbound::Closed => return Ok(()),
        };
        info!(conn, peer = %self.peer, client = %session.name, "client connected");

        let mut state = State::Idle;
        let mut idle_cycles = 0u32;

        loop {
            state = match state {
                State::Dispatch(request) => {
                    let reply = self.router.respond(&session.name, &request).await;
                    self.framed.send(reply).await?;
                    State::Idle
                }
                waiting => match self.next_message().await? {
                    Inbound::Closed => break,
                    Inbound::TimedOut => {
                        idle_cycles += 1;
                        if let Some(expected) = waiting.expected_input() {
                            debug!(conn, state = ?waiting, "read timed out, abandoning partial request");
                            self.framed
                                .send(error_reply(format!("timed out waiting for {}", expected)))
                                .await?;
                        }
                        if idle_cycles >= self.max_idle_cycles {
                            info!(conn, client = %session.name, idle_cycles, "idle limit reached");
                            break;
                        }
                        State::Idle
                    }
                    Inbound::Message(message) => {
                        idle_cycles = 0;
                        match self.advance(waiting, message).await? {
                            Some(next) => next,
                            None => break,
                        }
                    }
                },
            };
        }

        info!(conn, client = %session.name, "connection closed");
        Ok(())
    }

    /// Apply one inbound message to a waiting state. `None` ends the session.
    async fn advance(&mut self, state: State, message: String) -> Result<Option<State>, ConnectionError> {
        if !message.is_ascii() {
            if matches!(state, State::Idle) {
                return Err(ConnectionError::Protocol(format!("command is not ASCII: {:?}", message)));
            }
            warn!(peer = %self.peer, %message, "rejecting non-ASCII input");
            self.framed.send(error_reply("message is not ASCII")).await?;
            return Ok(Some(State::Idle));
        }

        let next = match state {
            State::Idle => match TopCommand::parse(&message) {
                Some(TopCommand::Quit) => return Ok(None),
                Some(TopCommand::Search(domain)) => State::AwaitSubCommand(domain),
                None => {
                    debug!(peer = %self.peer, %message, "ignoring unknown command");
                    State::Idle
                }
            },
            State::AwaitSubCommand(domain) => match SubCommand::parse(domain, &message) {
                Ok(sub) if sub.requires_param() => State::AwaitParam(sub),
                Ok(sub) => State::Dispatch(Request::new(sub, None)),
                Err(e) => {
                    warn!(peer = %self.peer, %e, "rejecting sub-command");
                    self.framed.send(error_reply(ValidationError::from(e))).await?;
                    State::Idle
                }
            },
            State::AwaitParam(sub) => State::Dispatch(Request::new(sub, Some(message))),
            // Dispatch consumes no input; run() handles it before reading.
            dispatch @ State::Dispatch(_) => dispatch,
        };
        Ok(Some(next))
    }

    async fn next_message(&mut self) -> Result<Inbound, ConnectionError> {
        tokio::select! {
            _ = self.registration.token().cancelled() => Ok(Inbound::Closed),
            read = tokio::time::timeout(self.read_timeout, self.framed.next()) => match read {
                Err(_) => Ok(Inbound::TimedOut),
                Ok(None) => Ok(Inbound::Closed),
                Ok(Some(Ok(line))) => Ok(Inbound::Message(line)),
                Ok(Some(Err(e))) => Err(e.into()),
            },
        }
    }
}
