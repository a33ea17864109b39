//! Backend Session - one authenticated connection, kept alive.
//!
//! ```text
//! Disconnected -> Connecting -> Streaming --(stream lost)--+
//!                     |                                     |
//!                     +--(transient failure)----------------+--> Reconnecting(backoff) -> Connecting
//!                     +--(auth failure / ceiling reached)--> Fatal
//! ```
//!
//! A lost stream counts as a failed attempt unless it delivered events or
//! stayed up for a while, so a backend that accepts and then drops every
//! connection still reaches the ceiling.
//!
//! The session owns the connection and the event stream. Everything it
//! learns goes out as [`SessionEvent`]s on a single channel, in stream
//! order. Calls from the IRC side go through a [`BackendHandle`] and never
//! touch the session task.

use super::{Backend, EventStream, LoginInfo, NormalizedEvent, OutgoingMessage};
use crate::config::{Credentials, ReconnectConfig};
use crate::error::BackendError;
use crate::identity::{RemoteChannel, RemoteId, RemoteUser};
use futures_util::StreamExt;
use regex::Regex;
use std::collections::HashSet;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

static MENTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<@([0-9A-Za-z]+)(?:\|[^>]*)?>").expect("static regex is valid"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Streaming,
    Reconnecting { attempt: u32, delay: Duration },
}

/// What the session tells the coordinator.
#[derive(Debug)]
pub enum SessionEvent {
    /// Connected (or reconnected) with a fresh snapshot of the workspace.
    Ready {
        login: LoginInfo,
        channels: Vec<RemoteChannel>,
        users: Vec<RemoteUser>,
    },
    Event(NormalizedEvent),
    Reconnecting { attempt: u32, delay: Duration },
    /// The session gave up. Nothing follows.
    Fatal(BackendError),
}

enum Stop {
    ReceiverGone,
    Fatal(BackendError),
}

/// How a stream that was up came to an end.
struct Lost {
    delivered: usize,
    cause: BackendError,
}

/// A connection that stayed up this long was healthy even if it was quiet.
const HEALTHY_UPTIME: Duration = Duration::from_secs(30);

/// Delay before reconnect attempt number `attempt` (1-based).
pub fn backoff_delay(policy: &ReconnectConfig, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    policy
        .initial_backoff()
        .saturating_mul(1u32 << exp)
        .min(policy.max_backoff())
}

pub struct BackendSession {
    backend: Arc<dyn Backend>,
    credentials: Credentials,
    policy: ReconnectConfig,
    preload_users: bool,
    tx: mpsc::Sender<SessionEvent>,
    state: SessionState,
    failures: u32,
    known_users: HashSet<RemoteId>,
    known_channels: HashSet<RemoteId>,
}

impl BackendSession {
    pub fn new(
        backend: Arc<dyn Backend>,
        credentials: Credentials,
        policy: ReconnectConfig,
        preload_users: bool,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        let session = Self {
            backend,
            credentials,
            policy,
            preload_users,
            tx,
            state: SessionState::Disconnected,
            failures: 0,
            known_users: HashSet::new(),
            known_channels: HashSet::new(),
        };
        (session, rx)
    }

    pub fn handle(&self) -> BackendHandle {
        BackendHandle::new(Arc::clone(&self.backend))
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn set_state(&mut self, state: SessionState) {
        debug!(from = ?self.state, to = ?state, "backend session state");
        self.state = state;
    }

    /// Run until the session gives up or the coordinator goes away.
    #[instrument(skip(self), name = "backend_session")]
    pub async fn run(mut self) {
        loop {
            self.set_state(SessionState::Connecting);
            let cause = match self.establish().await {
                Ok(events) => {
                    self.set_state(SessionState::Streaming);
                    let since = Instant::now();
                    match self.stream(events).await {
                        Ok(lost) => {
                            if lost.delivered > 0 || since.elapsed() >= HEALTHY_UPTIME {
                                self.failures = 0;
                            }
                            info!(delivered = lost.delivered, error = %lost.cause, "event stream ended");
                            lost.cause
                        }
                        Err(Stop::ReceiverGone) => break,
                        Err(Stop::Fatal(e)) => {
                            error!(error = %e, code = e.error_code(), "backend session failed");
                            let _ = self.tx.send(SessionEvent::Fatal(e)).await;
                            break;
                        }
                    }
                }
                Err(e) if e.is_transient() || matches!(e, BackendError::RateLimited { .. }) => e,
                Err(e) => {
                    error!(error = %e, code = e.error_code(), "backend connection refused");
                    let _ = self.tx.send(SessionEvent::Fatal(e)).await;
                    break;
                }
            };
            if !self.back_off(cause).await {
                break;
            }
        }
        self.set_state(SessionState::Disconnected);
    }

    /// Count a failed or lost connection and wait before the next attempt.
    /// Returns `false` when the session should stop.
    async fn back_off(&mut self, cause: BackendError) -> bool {
        self.failures += 1;
        let attempt = self.failures;
        if attempt >= self.policy.max_attempts {
            error!(attempts = attempt, error = %cause, "giving up on backend connection");
            let _ = self.tx.send(SessionEvent::Fatal(cause)).await;
            return false;
        }
        let mut delay = backoff_delay(&self.policy, attempt);
        if let BackendError::RateLimited { retry_after } = cause {
            delay = delay.max(retry_after);
        }
        warn!(attempt, ?delay, error = %cause, "backend connection lost, retrying");
        self.set_state(SessionState::Reconnecting { attempt, delay });
        if self
            .tx
            .send(SessionEvent::Reconnecting { attempt, delay })
            .await
            .is_err()
        {
            return false;
        }
        tokio::time::sleep(delay).await;
        true
    }

    /// Connect and take the initial snapshot.
    async fn establish(&mut self) -> Result<EventStream, BackendError> {
        let connected = self.backend.connect(&self.credentials).await?;
        let login = connected.login;
        info!(
            team = %login.team_name,
            self_id = %login.self_user.id,
            "connected to backend"
        );

        let mut channels = self.backend.list_channels().await?;
        if self.preload_users {
            for channel in channels.iter_mut().filter(|c| c.is_member && !c.is_direct()) {
                match self.backend.channel_members(&channel.id).await {
                    Ok(members) => channel.members = members.into_iter().collect(),
                    Err(e) if e.is_transient() => return Err(e),
                    Err(e) => warn!(channel = %channel.id, error = %e, "cannot list members"),
                }
            }
        }
        let users = if self.preload_users {
            self.backend.list_users().await?
        } else {
            Vec::new()
        };

        self.known_channels = channels.iter().map(|c| c.id.clone()).collect();
        self.known_users = users.iter().map(|u| u.id.clone()).collect();
        self.known_users.insert(login.self_user.id.clone());
        debug!(channels = channels.len(), users = users.len(), "snapshot taken");

        self.emit(SessionEvent::Ready {
            login,
            channels,
            users,
        })
        .await
        .map_err(|_| BackendError::ReconnectRequired)?;
        Ok(connected.events)
    }

    async fn stream(&mut self, mut events: EventStream) -> Result<Lost, Stop> {
        let mut delivered = 0;
        while let Some(item) = events.next().await {
            match item {
                Ok(NormalizedEvent::ReconnectRequired) => {
                    info!("backend asked for a reconnect");
                    return Ok(Lost {
                        delivered,
                        cause: BackendError::ReconnectRequired,
                    });
                }
                Ok(event) => {
                    self.discover(&event).await?;
                    self.emit(SessionEvent::Event(event)).await?;
                    delivered += 1;
                }
                Err(e) if e.is_transient() => {
                    warn!(error = %e, "event stream lost");
                    return Ok(Lost { delivered, cause: e });
                }
                Err(e) => return Err(Stop::Fatal(e)),
            }
        }
        Ok(Lost {
            delivered,
            cause: BackendError::Network("event stream ended".into()),
        })
    }

    /// Emit whatever the coordinator must know before it can render `event`.
    async fn discover(&mut self, event: &NormalizedEvent) -> Result<(), Stop> {
        match event {
            NormalizedEvent::UserDiscovered(user) | NormalizedEvent::UserRenamed(user) => {
                self.known_users.insert(user.id.clone());
            }
            NormalizedEvent::ChannelCreated(channel) => {
                self.known_channels.insert(channel.id.clone());
            }
            _ => {}
        }

        let mut wanted: Vec<RemoteId> = Vec::new();

        if let Some(id) = event.channel()
            && !self.known_channels.contains(id)
        {
            match self.backend.channel_info(id).await {
                Ok(channel) => {
                    self.known_channels.insert(id.clone());
                    if let Some(peer) = &channel.peer {
                        wanted.push(peer.clone());
                    }
                    self.emit(SessionEvent::Event(NormalizedEvent::ChannelCreated(channel)))
                        .await?;
                }
                Err(BackendError::Unsupported(_)) => {
                    self.known_channels.insert(id.clone());
                }
                // Looked up again the next time it shows up.
                Err(e) => debug!(channel = %id, error = %e, "channel lookup failed"),
            }
        }

        wanted.extend(event.referenced_users().into_iter().cloned());
        if let Some(text) = event.text() {
            wanted.extend(MENTION.captures_iter(text).map(|c| RemoteId::new(&c[1])));
        }

        for id in wanted {
            if self.known_users.contains(&id) {
                continue;
            }
            match self.backend.user_info(&id).await {
                Ok(user) => {
                    self.known_users.insert(id);
                    self.emit(SessionEvent::Event(NormalizedEvent::UserDiscovered(user)))
                        .await?;
                }
                Err(e) => debug!(user = %id, error = %e, "user lookup failed"),
            }
        }
        Ok(())
    }

    async fn emit(&self, event: SessionEvent) -> Result<(), Stop> {
        self.tx.send(event).await.map_err(|_| Stop::ReceiverGone)
    }
}

/// Shared access to the backend for remote calls.
#[derive(Clone)]
pub struct BackendHandle {
    backend: Arc<dyn Backend>,
}

impl BackendHandle {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    /// Post a message, retrying a rate-limited attempt exactly once.
    #[instrument(skip_all, fields(channel = %message.channel))]
    pub async fn post_message(&self, message: OutgoingMessage) -> Result<String, BackendError> {
        match self.backend.post_message(message.clone()).await {
            Err(BackendError::RateLimited { retry_after }) => {
                warn!(?retry_after, "rate limited, retrying once");
                tokio::time::sleep(retry_after).await;
                match self.backend.post_message(message).await {
                    Err(BackendError::RateLimited { retry_after }) => Err(BackendError::Remote(
                        format!("still rate limited (retry after {}s)", retry_after.as_secs()),
                    )),
                    other => other,
                }
            }
            other => other,
        }
    }
}
