//! In-process links backed by tokio channels.
//!
//! [`MemoryConnector::new`] returns a connector for agents and a
//! [`MemoryServer`] that receives one [`MemoryPeer`] per opened link, so a
//! test (or a local demo) can play the game server without sockets.

use std::sync::atomic::{AtomicU32, Ordering};

use serde_json::Value;
use tokio::sync::mpsc;

use super::{Connector, Link, SessionError};

/// Client side: opens channel links and announces them to the server.
#[derive(Debug)]
pub struct MemoryConnector {
    accept_tx: mpsc::UnboundedSender<MemoryPeer>,
    refuse: AtomicU32,
    opened: AtomicU32,
}

impl MemoryConnector {
    /// Create a connector and the server end that accepts its links.
    pub fn new() -> (Self, MemoryServer) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        (
            Self {
                accept_tx,
                refuse: AtomicU32::new(0),
                opened: AtomicU32::new(0),
            },
            MemoryServer { accept_rx },
        )
    }

    /// Fail the next `count` open attempts with a connection error.
    pub fn refuse_next(&self, count: u32) {
        self.refuse.store(count, Ordering::SeqCst);
    }

    /// Open attempts so far, refused ones included.
    pub fn opened(&self) -> u32 {
        self.opened.load(Ordering::SeqCst)
    }
}

impl Connector for MemoryConnector {
    type Link = MemoryLink;

    async fn open(&self) -> Result<MemoryLink, SessionError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .refuse
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(SessionError::connection("connection refused"));
        }

        let (to_server, from_client) = mpsc::unbounded_channel();
        let (to_client, from_server) = mpsc::unbounded_channel();
        self.accept_tx
            .send(MemoryPeer {
                incoming: from_client,
                outgoing: to_client,
            })
            .map_err(|err| SessionError::connection(format!("server is not listening: {err}")))?;
        Ok(MemoryLink {
            outgoing: Some(to_server),
            incoming: from_server,
        })
    }
}

/// Client end of one channel link.
#[derive(Debug)]
pub struct MemoryLink {
    outgoing: Option<mpsc::UnboundedSender<String>>,
    incoming: mpsc::UnboundedReceiver<String>,
}

impl Link for MemoryLink {
    async fn send_text(&mut self, text: String) -> Result<(), SessionError> {
        let Some(outgoing) = self.outgoing.as_ref() else {
            return Err(SessionError::connection("link closed"));
        };
        outgoing
            .send(text)
            .map_err(|err| SessionError::connection(format!("peer closed: {err}")))
    }

    async fn recv_text(&mut self) -> Result<Option<String>, SessionError> {
        Ok(self.incoming.recv().await)
    }

    async fn close(&mut self) {
        self.outgoing = None;
        self.incoming.close();
    }
}

/// Server side: yields one peer per link the connector opens.
#[derive(Debug)]
pub struct MemoryServer {
    accept_rx: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryServer {
    /// Wait for the next link. `None` once the connector is gone.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.recv().await
    }
}

/// Server end of one link. Dropping it closes the link for the client.
#[derive(Debug)]
pub struct MemoryPeer {
    incoming: mpsc::UnboundedReceiver<String>,
    outgoing: mpsc::UnboundedSender<String>,
}

impl MemoryPeer {
    /// Push a text frame to the client. Returns `false` if the client is gone.
    pub fn send(&self, text: &str) -> bool {
        self.outgoing.send(text.to_owned()).is_ok()
    }

    /// Push a JSON frame to the client. Returns `false` if the client is gone.
    pub fn send_json(&self, value: &Value) -> bool {
        self.send(&value.to_string())
    }

    /// Next frame from the client, `None` once it closed the link.
    pub async fn recv(&mut self) -> Option<String> {
        self.incoming.recv().await
    }

    /// Next frame from the client, decoded as JSON. Undecodable frames are
    /// returned as JSON strings.
    pub async fn recv_json(&mut self) -> Option<Value> {
        let text = self.recv().await?;
        Some(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }

    /// Whether the client has closed its end.
    pub fn is_closed(&self) -> bool {
        self.outgoing.is_closed()
    }
}
