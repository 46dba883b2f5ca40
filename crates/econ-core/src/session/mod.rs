//! Per-agent connection to the game server.
//!
//! A [`Session`] owns one link at a time, opened through a [`Connector`].
//! It joins the game with the agent's recovery credential, hands decoded
//! server messages to the caller, and transparently reconnects (rejoining
//! with the same credential) when the link drops.
//!
//! # Failure policy
//!
//! - Link failures are transient: the session retries with exponential
//!   backoff up to [`RetryPolicy::max_retries`] attempts, then gives up with
//!   [`SessionError::RetriesExhausted`]. The attempt budget is restored once
//!   an event arrives on a fresh link.
//! - An `error` message received after the join payload is sent, before
//!   the first event and before any action went out on that link, is an
//!   authentication rejection. It is permanent and never retried.
//!
//! # Cancellation
//!
//! [`Session::receive`] may be dropped at any suspension point (the agent
//! races it against timers and decisions). The link, the retry counter, and
//! the deadline of the pending retry live in the session, so the next call
//! resumes where the dropped one stopped. An attempt is only counted once a
//! connection was actually tried.

mod memory;
mod ws;

use std::future::Future;
use std::sync::Arc;

use econ_types::{Action, AgentIndex, LoginPayload, ServerMessage};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

use crate::config::RetryPolicy;

pub use memory::{MemoryConnector, MemoryLink, MemoryPeer, MemoryServer};
pub use ws::{WsConnector, WsLink};

/// Errors raised by sessions and links.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Opening, reading, or writing the link failed.
    #[error("connection failed: {message}")]
    Connection {
        /// Description of the failure.
        message: String,
    },

    /// The server rejected the recovery credential.
    #[error("authentication rejected: {message}")]
    Auth {
        /// Server-provided reason.
        message: String,
    },

    /// Reconnection gave up.
    #[error("connection lost after {attempts} reconnection attempts: {last_error}")]
    RetriesExhausted {
        /// Attempts made since the last successful event.
        attempts: u32,
        /// The final failure.
        last_error: String,
    },

    /// An outbound message could not be encoded.
    #[error("failed to encode message: {source}")]
    Encode {
        /// The JSON error.
        #[from]
        source: serde_json::Error,
    },

    /// The session was closed locally.
    #[error("session closed")]
    Closed,
}

impl SessionError {
    /// Build a connection error from any displayable cause.
    pub fn connection(cause: impl core::fmt::Display) -> Self {
        Self::Connection {
            message: cause.to_string(),
        }
    }

    /// Whether the session cannot continue after this error.
    pub const fn is_permanent(&self) -> bool {
        !matches!(self, Self::Connection { .. })
    }
}

/// A bidirectional text-frame link to the server.
pub trait Link: Send + 'static {
    /// Send one text frame.
    fn send_text(&mut self, text: String) -> impl Future<Output = Result<(), SessionError>> + Send;

    /// Wait for the next text frame. `Ok(None)` means the peer closed the link.
    ///
    /// Must be cancel-safe: dropping the future loses no frame.
    fn recv_text(&mut self) -> impl Future<Output = Result<Option<String>, SessionError>> + Send;

    /// Close the link. Errors are ignored.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Opens links to one server.
pub trait Connector: Send + Sync + 'static {
    /// The link type produced.
    type Link: Link;

    /// Open a new link.
    fn open(&self) -> impl Future<Output = Result<Self::Link, SessionError>> + Send;
}

/// One agent's authenticated connection.
pub struct Session<C: Connector> {
    agent: AgentIndex,
    connector: Arc<C>,
    login: LoginPayload,
    policy: RetryPolicy,
    link: Option<C::Link>,
    attempts: u32,
    retry_at: Option<Instant>,
    last_error: String,
    awaiting_first_event: bool,
    sent_on_link: bool,
    closed: bool,
}

impl<C: Connector> core::fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Session")
            .field("agent", &self.agent)
            .field("game_id", &self.login.game_id)
            .field("connected", &self.link.is_some())
            .field("attempts", &self.attempts)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl<C: Connector> Session<C> {
    /// Open a link and send the join payload, retrying transient failures.
    ///
    /// Authentication is confirmed lazily: a rejection surfaces from the
    /// first [`Session::receive`] as [`SessionError::Auth`].
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::RetriesExhausted`] if no link could be opened,
    /// or [`SessionError::Encode`] if the join payload cannot be encoded.
    pub async fn connect(
        agent: AgentIndex,
        connector: Arc<C>,
        login: LoginPayload,
        policy: RetryPolicy,
    ) -> Result<Self, SessionError> {
        let mut session = Self {
            agent,
            connector,
            login,
            policy,
            link: None,
            attempts: 0,
            retry_at: None,
            last_error: String::new(),
            awaiting_first_event: false,
            sent_on_link: false,
            closed: false,
        };
        match Self::open_and_join(session.connector.as_ref(), &session.login).await {
            Ok(link) => session.install(link),
            Err(err) if err.is_permanent() => return Err(err),
            Err(err) => {
                warn!(agent = %agent, error = %err, "Initial connection failed");
                session.last_error = err.to_string();
                session.reconnect().await?;
            }
        }
        info!(agent = %agent, game_id = %session.login.game_id, "Join sent");
        Ok(session)
    }

    /// Wait for the next server message, reconnecting if the link drops.
    ///
    /// Frames that do not decode are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Auth`] if the server rejects the join,
    /// [`SessionError::RetriesExhausted`] once reconnection gives up, or
    /// [`SessionError::Closed`] after [`Session::close`].
    pub async fn receive(&mut self) -> Result<ServerMessage, SessionError> {
        loop {
            if self.closed {
                return Err(SessionError::Closed);
            }
            let Some(link) = self.link.as_mut() else {
                self.reconnect().await?;
                continue;
            };
            let frame = match link.recv_text().await {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    self.drop_link(SessionError::connection("server closed the connection"))
                        .await?;
                    continue;
                }
                Err(err) => {
                    self.drop_link(err).await?;
                    continue;
                }
            };
            let message = match ServerMessage::decode(&frame) {
                Ok(message) => message,
                Err(err) => {
                    warn!(agent = %self.agent, error = %err, "Skipping undecodable frame");
                    continue;
                }
            };
            match &message {
                ServerMessage::Error { message }
                    if self.awaiting_first_event && !self.sent_on_link =>
                {
                    return Err(SessionError::Auth {
                        message: message.clone(),
                    });
                }
                ServerMessage::Event(_) => {
                    if self.attempts > 0 {
                        debug!(agent = %self.agent, "Link healthy, retry budget restored");
                    }
                    self.awaiting_first_event = false;
                    self.attempts = 0;
                }
                ServerMessage::Error { .. } | ServerMessage::Other => {}
            }
            return Ok(message);
        }
    }

    /// Send an action, reconnecting first if the link is down.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Encode`] if the action cannot be encoded, or a
    /// permanent error if the link cannot be restored.
    pub async fn send(&mut self, action: &Action) -> Result<(), SessionError> {
        let text = action.encode()?;
        loop {
            if self.closed {
                return Err(SessionError::Closed);
            }
            let Some(link) = self.link.as_mut() else {
                self.reconnect().await?;
                continue;
            };
            match link.send_text(text.clone()).await {
                Ok(()) => {
                    self.sent_on_link = true;
                    return Ok(());
                }
                Err(err) => self.drop_link(err).await?,
            }
        }
    }

    /// Close the link. Safe to call more than once.
    pub async fn close(&mut self) {
        if let Some(mut link) = self.link.take() {
            link.close().await;
            debug!(agent = %self.agent, "Session closed");
        }
        self.closed = true;
    }

    /// Whether a link is currently open.
    pub const fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    /// Reconnection attempts since the last healthy event.
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    async fn drop_link(&mut self, cause: SessionError) -> Result<(), SessionError> {
        let link = self.link.take();
        if self.awaiting_first_event {
            debug!(agent = %self.agent, "Link dropped before the join was acknowledged");
        }
        warn!(agent = %self.agent, error = %cause, "Connection dropped");
        self.last_error = cause.to_string();
        if let Some(mut link) = link {
            link.close().await;
        }
        self.reconnect().await
    }

    async fn reconnect(&mut self) -> Result<(), SessionError> {
        loop {
            let due = match self.retry_at {
                Some(due) => due,
                None => {
                    if self.attempts >= self.policy.max_retries {
                        return Err(SessionError::RetriesExhausted {
                            attempts: self.attempts,
                            last_error: self.last_error.clone(),
                        });
                    }
                    let delay = self.policy.backoff(self.attempts);
                    info!(
                        agent = %self.agent,
                        attempt = self.attempts.saturating_add(1),
                        max_retries = self.policy.max_retries,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Reconnecting"
                    );
                    let due = Instant::now().checked_add(delay).unwrap_or_else(Instant::now);
                    self.retry_at = Some(due);
                    due
                }
            };
            sleep_until(due).await;

            let opened = Self::open_and_join(self.connector.as_ref(), &self.login).await;
            self.retry_at = None;
            self.attempts = self.attempts.saturating_add(1);
            match opened {
                Ok(link) => {
                    self.install(link);
                    return Ok(());
                }
                Err(err) if err.is_permanent() => return Err(err),
                Err(err) => {
                    warn!(agent = %self.agent, error = %err, "Reconnection attempt failed");
                    self.last_error = err.to_string();
                }
            }
        }
    }

    async fn open_and_join(connector: &C, login: &LoginPayload) -> Result<C::Link, SessionError> {
        let text = login.encode()?;
        let mut link = connector.open().await?;
        link.send_text(text).await?;
        Ok(link)
    }

    fn install(&mut self, link: C::Link) {
        self.link = Some(link);
        self.awaiting_first_event = true;
        self.sent_on_link = false;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use std::time::Duration;

    use econ_types::GameId;
    use serde_json::json;
    use tokio::time::Instant;

    use super::*;

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_backoff_ms: 100,
            max_backoff_ms: 1_000,
        }
    }

    fn login() -> LoginPayload {
        LoginPayload::join(GameId(1), "code-1")
    }

    async fn expect_join_frame(peer: &mut MemoryPeer) {
        assert_eq!(
            peer.recv_json().await.unwrap(),
            json!({"type": "join", "gameId": 1, "recovery": "code-1"})
        );
    }

    fn event(kind: &str) -> String {
        json!({"type": "event", "eventType": kind, "data": {}}).to_string()
    }

    #[tokio::test(start_paused = true)]
    async fn join_payload_is_first_frame() {
        let (connector, mut server) = MemoryConnector::new();
        let session = Session::connect(AgentIndex(1), Arc::new(connector), login(), policy(0))
            .await
            .unwrap();
        assert!(session.is_connected());
        let mut peer = server.accept().await.unwrap();
        assert_eq!(
            peer.recv_json().await.unwrap(),
            json!({"type": "join", "gameId": 1, "recovery": "code-1"})
        );
    }

    #[tokio::test(start_paused = true)]
    async fn error_before_first_event_is_auth_failure() {
        let (connector, mut server) = MemoryConnector::new();
        let connector = Arc::new(connector);
        let mut session = Session::connect(AgentIndex(1), Arc::clone(&connector), login(), policy(3))
            .await
            .unwrap();
        let peer = server.accept().await.unwrap();
        peer.send(r#"{"type":"error","message":"Invalid recovery code"}"#);

        let err = session.receive().await.unwrap_err();
        assert!(matches!(err, SessionError::Auth { ref message } if message == "Invalid recovery code"));
        assert_eq!(connector.opened(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn error_after_first_event_is_delivered() {
        let (connector, mut server) = MemoryConnector::new();
        let mut session = Session::connect(AgentIndex(1), Arc::new(connector), login(), policy(0))
            .await
            .unwrap();
        let peer = server.accept().await.unwrap();
        peer.send(&event("assign-name"));
        peer.send(r#"{"type":"error","message":"Invalid action"}"#);

        assert_eq!(session.receive().await.unwrap().event_type(), Some("assign-name"));
        assert_eq!(
            session.receive().await.unwrap(),
            ServerMessage::Error {
                message: "Invalid action".to_owned()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_with_backoff_and_rejoins() {
        let (connector, mut server) = MemoryConnector::new();
        let connector = Arc::new(connector);
        let mut session = Session::connect(AgentIndex(1), Arc::clone(&connector), login(), policy(5))
            .await
            .unwrap();
        let first = server.accept().await.unwrap();
        first.send(&event("assign-name"));
        assert!(session.receive().await.is_ok());

        // Drop the link and refuse the next two connection attempts.
        connector.refuse_next(2);
        drop(first);

        let started = Instant::now();
        let receiving = tokio::spawn(async move {
            let message = session.receive().await;
            (session, message)
        });
        let mut second = server.accept().await.unwrap();
        assert_eq!(
            second.recv_json().await.unwrap(),
            json!({"type": "join", "gameId": 1, "recovery": "code-1"})
        );
        second.send(&event("round-started"));
        let (session, message) = receiving.await.unwrap();
        assert_eq!(message.unwrap().event_type(), Some("round-started"));

        // 100ms + 200ms + 400ms of backoff for three attempts.
        assert!(started.elapsed() >= Duration::from_millis(700));
        assert_eq!(connector.opened(), 4);
        assert_eq!(session.attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_retries() {
        let (connector, mut server) = MemoryConnector::new();
        let connector = Arc::new(connector);
        let mut session = Session::connect(AgentIndex(1), Arc::clone(&connector), login(), policy(2))
            .await
            .unwrap();
        let peer = server.accept().await.unwrap();
        connector.refuse_next(10);
        drop(peer);

        let err = session.receive().await.unwrap_err();
        assert!(matches!(err, SessionError::RetriesExhausted { attempts: 2, .. }));
        assert_eq!(connector.opened(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn interrupted_backoff_keeps_its_deadline_and_budget() {
        let (connector, mut server) = MemoryConnector::new();
        let connector = Arc::new(connector);
        let slow = RetryPolicy {
            max_retries: 1,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 1_000,
        };
        let mut session = Session::connect(AgentIndex(1), Arc::clone(&connector), login(), slow)
            .await
            .unwrap();
        let first = server.accept().await.unwrap();
        first.send(&event("assign-name"));
        assert!(session.receive().await.is_ok());
        drop(first);

        let started = Instant::now();
        for _ in 0..5 {
            let cut_short =
                tokio::time::timeout(Duration::from_millis(50), session.receive()).await;
            assert!(cut_short.is_err());
        }
        assert_eq!(session.attempts(), 0);
        assert_eq!(connector.opened(), 1);

        let receiving = tokio::spawn(async move {
            let message = session.receive().await;
            (session, message)
        });
        let mut second = server.accept().await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(1_000));
        assert!(started.elapsed() < Duration::from_millis(1_050));
        expect_join_frame(&mut second).await;
        second.send(&event("round-started"));
        let (_, message) = receiving.await.unwrap();
        assert_eq!(message.unwrap().event_type(), Some("round-started"));
        assert_eq!(connector.opened(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn error_after_action_on_fresh_link_is_not_auth() {
        let (connector, mut server) = MemoryConnector::new();
        let connector = Arc::new(connector);
        let mut session = Session::connect(AgentIndex(1), Arc::clone(&connector), login(), policy(2))
            .await
            .unwrap();
        let first = server.accept().await.unwrap();
        first.send(&event("assign-name"));
        assert!(session.receive().await.is_ok());
        drop(first);

        // The action goes out on the reconnected link before any event.
        session.send(&Action::new("bid", GameId(1))).await.unwrap();
        let mut second = server.accept().await.unwrap();
        expect_join_frame(&mut second).await;
        assert_eq!(
            second.recv_json().await.unwrap(),
            json!({"type": "bid", "gameId": 1})
        );
        second.send(r#"{"type":"error","message":"Invalid bid"}"#);

        assert_eq!(
            session.receive().await.unwrap(),
            ServerMessage::Error {
                message: "Invalid bid".to_owned()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn close_is_idempotent() {
        let (connector, _server) = MemoryConnector::new();
        let mut session = Session::connect(AgentIndex(1), Arc::new(connector), login(), policy(0))
            .await
            .unwrap();
        session.close().await;
        session.close().await;
        assert!(!session.is_connected());
        assert!(matches!(session.receive().await, Err(SessionError::Closed)));
        assert!(matches!(
            session.send(&Action::new("choice", GameId(1))).await,
            Err(SessionError::Closed)
        ));
    }
}
