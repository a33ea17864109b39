//! Per-client session state, owned by the coordinator.
//!
//! The connection task only holds the write half of the picture: a bounded
//! queue of outgoing lines and a cancellation token. Everything else about a
//! client (its phase, nick, joined channels) lives here and is mutated from
//! one place.

use crate::identity::RemoteId;
use parking_lot::Mutex;
use slackirc_proto::Message;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub type SessionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// NICK/USER not complete, or waiting for the backend to be ready.
    Unregistered,
    /// Welcome sent, no channel joined yet.
    Registered,
    /// At least one channel joined.
    Active,
    Closed,
}

/// The coordinator's grip on one connection.
#[derive(Clone)]
pub struct SessionHandle {
    pub id: SessionId,
    tx: mpsc::Sender<Message>,
    cancel: CancellationToken,
    close_reason: Arc<Mutex<Option<String>>>,
}

impl SessionHandle {
    /// Handle plus the receiving end for the connection task.
    pub fn new(id: SessionId, sendq: usize) -> (Self, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(sendq.max(1));
        let handle = Self {
            id,
            tx,
            cancel: CancellationToken::new(),
            close_reason: Arc::new(Mutex::new(None)),
        };
        (handle, rx)
    }

    /// Queue a line without waiting. A client that cannot keep up is
    /// disconnected rather than allowed to stall everyone else.
    pub fn send(&self, msg: Message) -> bool {
        match self.tx.try_send(msg) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                if !self.cancel.is_cancelled() {
                    warn!(session = self.id, "send queue full, closing session");
                    self.close("SendQ exceeded");
                }
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Ask the connection to say goodbye and hang up. The first reason wins.
    pub fn close(&self, reason: &str) {
        {
            let mut slot = self.close_reason.lock();
            if slot.is_none() {
                *slot = Some(reason.to_string());
            }
        }
        self.cancel.cancel();
    }

    pub fn close_reason(&self) -> Option<String> {
        self.close_reason.lock().clone()
    }

    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.tx.is_closed()
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

pub struct IrcSession {
    pub handle: SessionHandle,
    pub addr: SocketAddr,
    pub phase: Phase,
    /// The nick the client last asked for; replaced by the self nick on welcome.
    pub nick: Option<String>,
    pub user: Option<String>,
    pub realname: String,
    joined: BTreeSet<RemoteId>,
    /// Channels left on purpose; autojoin does not bring them back.
    parted: HashSet<RemoteId>,
    pub away: bool,
}

impl IrcSession {
    pub fn new(handle: SessionHandle, addr: SocketAddr) -> Self {
        Self {
            handle,
            addr,
            phase: Phase::Unregistered,
            nick: None,
            user: None,
            realname: String::new(),
            joined: BTreeSet::new(),
            parted: HashSet::new(),
            away: false,
        }
    }

    pub fn id(&self) -> SessionId {
        self.handle.id
    }

    /// Nick for reply parameters; `*` before one is known.
    pub fn reply_nick(&self) -> &str {
        self.nick.as_deref().unwrap_or("*")
    }

    pub fn is_registered(&self) -> bool {
        matches!(self.phase, Phase::Registered | Phase::Active)
    }

    /// Both halves of registration received.
    pub fn can_register(&self) -> bool {
        self.phase == Phase::Unregistered && self.nick.is_some() && self.user.is_some()
    }

    pub fn has_joined(&self, channel: &RemoteId) -> bool {
        self.joined.contains(channel)
    }

    pub fn is_parted(&self, channel: &RemoteId) -> bool {
        self.parted.contains(channel)
    }

    pub fn joined(&self) -> impl Iterator<Item = &RemoteId> {
        self.joined.iter()
    }

    /// Returns false if already joined.
    pub fn join(&mut self, channel: RemoteId) -> bool {
        self.parted.remove(&channel);
        let added = self.joined.insert(channel);
        if self.phase == Phase::Registered {
            self.phase = Phase::Active;
        }
        added
    }

    pub fn part(&mut self, channel: &RemoteId) -> bool {
        self.parted.insert(channel.clone());
        self.joined.remove(channel)
    }

    /// Drop a channel without remembering it as parted (kicked, or we left remotely).
    pub fn forget(&mut self, channel: &RemoteId) -> bool {
        self.joined.remove(channel)
    }

    pub fn send(&self, msg: Message) -> bool {
        self.handle.send(msg)
    }
}

/// All live sessions by id.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: HashMap<SessionId, IrcSession>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, session: IrcSession) {
        debug!(session = session.id(), addr = %session.addr, "session attached");
        self.sessions.insert(session.id(), session);
    }

    pub fn remove(&mut self, id: SessionId) -> Option<IrcSession> {
        let mut session = self.sessions.remove(&id)?;
        session.phase = Phase::Closed;
        debug!(session = id, "session detached");
        Some(session)
    }

    pub fn get(&self, id: SessionId) -> Option<&IrcSession> {
        self.sessions.get(&id)
    }

    pub fn get_mut(&mut self, id: SessionId) -> Option<&mut IrcSession> {
        self.sessions.get_mut(&id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<_> = self.sessions.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn iter(&self) -> impl Iterator<Item = &IrcSession> {
        self.sessions.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut IrcSession> {
        self.sessions.values_mut()
    }

    /// Sessions that have completed registration.
    pub fn registered(&self) -> impl Iterator<Item = &IrcSession> {
        self.sessions.values().filter(|s| s.is_registered())
    }

    /// Sessions currently joined to `channel`.
    pub fn in_channel<'a>(&'a self, channel: &'a RemoteId) -> impl Iterator<Item = &'a IrcSession> {
        self.sessions.values().filter(move |s| s.has_joined(channel))
    }

    /// Close every session with the same reason.
    pub fn close_all(&self, reason: &str) {
        for session in self.sessions.values() {
            session.handle.close(reason);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(id: SessionId, sendq: usize) -> (IrcSession, mpsc::Receiver<Message>) {
        let (handle, rx) = SessionHandle::new(id, sendq);
        (IrcSession::new(handle, "127.0.0.1:40000".parse().unwrap()), rx)
    }

    #[test]
    fn full_queue_closes_the_session() {
        let (s, _rx) = session(1, 2);
        assert!(s.send(Message::notice("a", "1")));
        assert!(s.send(Message::notice("a", "2")));
        assert!(!s.send(Message::notice("a", "3")));
        assert!(s.handle.is_closed());
        assert_eq!(s.handle.close_reason().as_deref(), Some("SendQ exceeded"));
    }

    #[test]
    fn a_closed_session_ignores_further_overflow() {
        let (s, _rx) = session(1, 1);
        assert!(s.send(Message::notice("a", "1")));
        assert!(!s.send(Message::notice("a", "2")));
        for n in 3..100 {
            assert!(!s.send(Message::notice("a", &n.to_string())));
        }
        assert_eq!(s.handle.close_reason().as_deref(), Some("SendQ exceeded"));

        let (s, _rx) = session(2, 1);
        s.handle.close("Gateway shutting down");
        assert!(s.send(Message::notice("a", "1")));
        assert!(!s.send(Message::notice("a", "2")));
        assert_eq!(s.handle.close_reason().as_deref(), Some("Gateway shutting down"));
    }

    #[test]
    fn first_close_reason_is_kept() {
        let (s, _rx) = session(1, 4);
        s.handle.close("Backend lost");
        s.handle.close("SendQ exceeded");
        assert_eq!(s.handle.close_reason().as_deref(), Some("Backend lost"));
    }

    #[test]
    fn join_and_part_track_phase_and_memory() {
        let (mut s, _rx) = session(1, 4);
        s.phase = Phase::Registered;
        let general = RemoteId::new("C1");
        assert!(s.join(general.clone()));
        assert_eq!(s.phase, Phase::Active);
        assert!(!s.join(general.clone()));
        assert!(s.part(&general));
        assert!(s.is_parted(&general));
        assert!(!s.has_joined(&general));
        s.join(general.clone());
        assert!(!s.is_parted(&general));
    }

    #[test]
    fn registry_filters_by_channel() {
        let mut registry = SessionRegistry::new();
        let (mut a, _ra) = session(1, 4);
        let (mut b, _rb) = session(2, 4);
        a.phase = Phase::Registered;
        b.phase = Phase::Registered;
        a.join(RemoteId::new("C1"));
        registry.insert(a);
        registry.insert(b);
        let c1 = RemoteId::new("C1");
        let ids: Vec<_> = registry.in_channel(&c1).map(IrcSession::id).collect();
        assert_eq!(ids, vec![1]);
        assert_eq!(registry.registered().count(), 2);
        assert_eq!(registry.remove(2).map(|s| s.phase), Some(Phase::Closed));
    }
}
