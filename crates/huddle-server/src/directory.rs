//! Live user directory.
//!
//! Owns the username → session map shared by every connection handler.
//! Every check-then-act sequence (claim a name, snapshot recipients for a
//! broadcast) happens under one lock acquisition; sends happen after the
//! lock is released.
//!
//! Fan-out never waits on another connection's queue. A session whose queue
//! is full when a record is offered is disconnected.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use huddle_shared::ServerMessage;

/// Queue feeding one connection's writer task.
pub type Outbound = mpsc::Sender<ServerMessage>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClaimError {
    #[error("Username is empty")]
    Empty,

    #[error("Username already taken: {0}")]
    Taken(String),
}

/// A registered participant.
#[derive(Debug, Clone)]
pub struct ClientSession {
    pub username: String,
    pub addr: SocketAddr,
    pub joined_at: DateTime<Utc>,
    outbound: Outbound,
    /// Cancelling this disconnects the session.
    cancel: CancellationToken,
}

impl ClientSession {
    pub fn outbound(&self) -> &Outbound {
        &self.outbound
    }

    /// Queue `msg` without waiting. Returns false if it was not queued.
    pub fn offer(&self, msg: ServerMessage) -> bool {
        match self.outbound.try_send(msg) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(user = %self.username, "Outbound queue full, disconnecting slow client");
                self.cancel.cancel();
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(user = %self.username, "Dropping record for closed connection");
                false
            }
        }
    }
}

#[derive(Clone, Default)]
pub struct UserDirectory {
    sessions: Arc<RwLock<BTreeMap<String, ClientSession>>>,
}

impl UserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically check that `username` is free and register it.
    pub async fn claim(
        &self,
        username: &str,
        addr: SocketAddr,
        outbound: Outbound,
        cancel: CancellationToken,
    ) -> Result<(), ClaimError> {
        if username.is_empty() {
            return Err(ClaimError::Empty);
        }

        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(username) {
            return Err(ClaimError::Taken(username.to_string()));
        }

        sessions.insert(
            username.to_string(),
            ClientSession {
                username: username.to_string(),
                addr,
                joined_at: Utc::now(),
                outbound,
                cancel,
            },
        );

        info!(
            user = %username,
            addr = %addr,
            live = sessions.len(),
            "Username claimed"
        );
        Ok(())
    }

    /// Remove a session. Returns whether it was registered.
    pub async fn release(&self, username: &str) -> bool {
        let removed = self.sessions.write().await.remove(username).is_some();
        if removed {
            debug!(user = %username, "Username released");
        }
        removed
    }

    /// Sorted snapshot of live usernames.
    pub async fn usernames(&self) -> Vec<String> {
        self.sessions.read().await.keys().cloned().collect()
    }

    pub async fn get(&self, username: &str) -> Option<ClientSession> {
        self.sessions.read().await.get(username).cloned()
    }

    pub async fn is_live(&self, username: &str) -> bool {
        self.sessions.read().await.contains_key(username)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Snapshot of every session except `exclude`.
    pub async fn recipients_except(&self, exclude: Option<&str>) -> Vec<ClientSession> {
        self.sessions
            .read()
            .await
            .values()
            .filter(|s| Some(s.username.as_str()) != exclude)
            .cloned()
            .collect()
    }

    /// Queue `msg` for every live session except `exclude`.
    pub async fn broadcast(&self, msg: &ServerMessage, exclude: Option<&str>) {
        for session in self.recipients_except(exclude).await {
            session.offer(msg.clone());
        }
    }

    /// Queue `msg` for one user. Returns false if the user is not live.
    pub async fn send_to(&self, username: &str, msg: ServerMessage) -> bool {
        match self.get(username).await {
            Some(session) => {
                session.offer(msg);
                true
            }
            None => false,
        }
    }

    /// Send the current user list to everyone.
    pub async fn broadcast_user_list(&self) {
        let users = self.usernames().await;
        self.broadcast(&ServerMessage::UserList { users }, None).await;
    }
}

/// Enqueue one record on a connection's own writer, waiting for room. A
/// closed queue means the connection is already going away; its handler
/// cleans up.
pub async fn deliver(username: &str, outbound: &Outbound, msg: ServerMessage) -> bool {
    match outbound.send(msg).await {
        Ok(()) => true,
        Err(_) => {
            debug!(user = %username, "Dropping record for closed connection");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:9000".parse().unwrap()
    }

    fn queue() -> (Outbound, mpsc::Receiver<ServerMessage>) {
        mpsc::channel(16)
    }

    fn token() -> CancellationToken {
        CancellationToken::new()
    }

    #[tokio::test]
    async fn test_claim_and_release() {
        let dir = UserDirectory::new();
        let (tx, _rx) = queue();

        dir.claim("alice", addr(), tx, token()).await.unwrap();
        assert!(dir.is_live("alice").await);
        assert_eq!(dir.usernames().await, vec!["alice".to_string()]);

        assert!(dir.release("alice").await);
        assert!(!dir.release("alice").await);
        assert!(dir.is_empty().await);
    }

    #[tokio::test]
    async fn test_empty_username_rejected() {
        let dir = UserDirectory::new();
        let (tx, _rx) = queue();
        assert_eq!(dir.claim("", addr(), tx, token()).await, Err(ClaimError::Empty));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_claims_admit_exactly_one() {
        for _ in 0..50 {
            let dir = UserDirectory::new();
            let (tx1, _rx1) = queue();
            let (tx2, _rx2) = queue();

            let d1 = dir.clone();
            let d2 = dir.clone();
            let a = tokio::spawn(async move { d1.claim("bob", addr(), tx1, token()).await });
            let b = tokio::spawn(async move { d2.claim("bob", addr(), tx2, token()).await });

            let results = [a.await.unwrap(), b.await.unwrap()];
            let accepted = results.iter().filter(|r| r.is_ok()).count();
            let rejected = results
                .iter()
                .filter(|r| matches!(r, Err(ClaimError::Taken(_))))
                .count();
            assert_eq!((accepted, rejected), (1, 1));
            assert_eq!(dir.len().await, 1);
        }
    }

    #[tokio::test]
    async fn test_broadcast_skips_excluded() {
        let dir = UserDirectory::new();
        let (tx_a, mut rx_a) = queue();
        let (tx_b, mut rx_b) = queue();
        dir.claim("a", addr(), tx_a, token()).await.unwrap();
        dir.claim("b", addr(), tx_b, token()).await.unwrap();

        dir.broadcast(&ServerMessage::chat("a", "hi", false), Some("a"))
            .await;

        assert_eq!(rx_b.try_recv().unwrap(), ServerMessage::chat("a", "hi", false));
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_to_missing_user() {
        let dir = UserDirectory::new();
        assert!(!dir.send_to("ghost", ServerMessage::error("x")).await);
    }

    #[tokio::test]
    async fn test_user_list_is_sorted() {
        let dir = UserDirectory::new();
        let (tx_c, mut rx_c) = queue();
        let (tx_a, _rx_a) = queue();
        dir.claim("carol", addr(), tx_c, token()).await.unwrap();
        dir.claim("alice", addr(), tx_a, token()).await.unwrap();

        dir.broadcast_user_list().await;
        assert_eq!(
            rx_c.try_recv().unwrap(),
            ServerMessage::UserList {
                users: vec!["alice".into(), "carol".into()]
            }
        );
    }

    #[tokio::test]
    async fn test_full_queue_disconnects_only_that_session() {
        let dir = UserDirectory::new();
        let (tx_slow, _rx_slow) = mpsc::channel(2);
        let (tx_fast, mut rx_fast) = mpsc::channel(64);
        let slow_cancel = token();
        let fast_cancel = token();
        dir.claim("slow", addr(), tx_slow, slow_cancel.clone()).await.unwrap();
        dir.claim("fast", addr(), tx_fast, fast_cancel.clone()).await.unwrap();

        // Never waits, even though "slow" stops draining after two records.
        for i in 0..5 {
            dir.broadcast(&ServerMessage::chat("x", format!("m{i}"), false), None)
                .await;
        }

        assert!(slow_cancel.is_cancelled());
        assert!(!fast_cancel.is_cancelled());
        let mut got = 0;
        while rx_fast.try_recv().is_ok() {
            got += 1;
        }
        assert_eq!(got, 5);
    }
}
