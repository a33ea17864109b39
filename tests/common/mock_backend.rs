//! Scripted in-process backend.
//!
//! Serves a fixed workspace snapshot, records every outbound call and lets
//! a test push events into (or cut) the live stream.

use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::Mutex;
use slackirc::backend::{Backend, Connected, Dialect, LoginInfo, NormalizedEvent, OutgoingMessage};
use slackirc::config::Credentials;
use slackirc::error::BackendError;
use slackirc::identity::{ChannelKind, RemoteChannel, RemoteId, RemoteUser};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, mpsc};

type EventTx = mpsc::UnboundedSender<Result<NormalizedEvent, BackendError>>;

/// An outbound call as the backend saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Post(OutgoingMessage),
    OpenDirect(RemoteId),
    Upload {
        target: RemoteId,
        filename: String,
        bytes: Vec<u8>,
    },
    Join(RemoteId),
    Topic(RemoteId, String),
}

/// What `connect` does when there are no scripted failures left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectMode {
    Succeed,
    /// Transient network failure every time.
    AlwaysFail,
    Unauthorized,
}

pub struct MockBackend {
    login: LoginInfo,
    channels: Vec<RemoteChannel>,
    users: Vec<RemoteUser>,
    mode: Mutex<ConnectMode>,
    /// Transient failures to return before connecting.
    failures_left: AtomicU32,
    /// Posts to answer with `RateLimited` before accepting.
    rate_limits_left: AtomicU32,
    pub retry_after: Duration,
    stream: Mutex<Option<EventTx>>,
    connects: AtomicU32,
    calls: Mutex<Vec<Call>>,
    changed: Notify,
}

impl MockBackend {
    /// `me` (U0) in team Acme. alice (U1, admin) and bob (U2); `#general`
    /// with all three, `#random` with me and bob, and a DM with alice.
    pub fn workspace() -> Self {
        let mut me = RemoteUser::new("U0", "me");
        me.is_self = true;
        let mut alice = RemoteUser::new("U1", "alice");
        alice.is_admin = true;
        alice.real_name = "Alice Liddell".into();
        let bob = RemoteUser::new("U2", "bob");

        let mut general = RemoteChannel::new("C1", "general", ChannelKind::Public);
        general.topic = "all hands".into();
        general.members = ["U0", "U1", "U2"].into_iter().map(RemoteId::from).collect();
        let mut random = RemoteChannel::new("C2", "random", ChannelKind::Public);
        random.members = ["U0", "U2"].into_iter().map(RemoteId::from).collect();
        let direct = RemoteChannel::direct("D1", "U1");

        Self {
            login: LoginInfo {
                self_user: me.clone(),
                team_name: "Acme".into(),
                team_domain: "acme".into(),
            },
            channels: vec![general, random, direct],
            users: vec![me, alice, bob],
            mode: Mutex::new(ConnectMode::Succeed),
            failures_left: AtomicU32::new(0),
            rate_limits_left: AtomicU32::new(0),
            retry_after: Duration::from_millis(50),
            stream: Mutex::new(None),
            connects: AtomicU32::new(0),
            calls: Mutex::new(Vec::new()),
            changed: Notify::new(),
        }
    }

    pub fn with_mode(self, mode: ConnectMode) -> Self {
        *self.mode.lock() = mode;
        self
    }

    pub fn with_failures(self, n: u32) -> Self {
        self.failures_left.store(n, Ordering::SeqCst);
        self
    }

    pub fn with_rate_limits(self, n: u32) -> Self {
        self.rate_limits_left.store(n, Ordering::SeqCst);
        self
    }

    pub fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    /// Push an event into the live stream. Returns false when not connected.
    pub fn emit(&self, event: NormalizedEvent) -> bool {
        self.stream
            .lock()
            .as_ref()
            .is_some_and(|tx| tx.send(Ok(event)).is_ok())
    }

    /// End the live stream, as a dropped websocket would.
    pub fn drop_stream(&self) {
        self.stream.lock().take();
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Wait until at least `n` calls were recorded.
    pub async fn wait_for_calls(&self, n: usize) -> Vec<Call> {
        let wait = async {
            loop {
                let notified = self.changed.notified();
                if self.calls.lock().len() >= n {
                    return self.calls();
                }
                notified.await;
            }
        };
        tokio::time::timeout(Duration::from_secs(5), wait)
            .await
            .unwrap_or_else(|_| panic!("expected {n} calls, got {:?}", self.calls()))
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
        self.changed.notify_one();
    }
}

#[async_trait]
impl Backend for MockBackend {
    fn dialect(&self) -> Dialect {
        Dialect::Slack
    }

    async fn connect(&self, _credentials: &Credentials) -> Result<Connected, BackendError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(BackendError::Network("connection refused".into()));
        }
        let mode = *self.mode.lock();
        match mode {
            ConnectMode::Succeed => {}
            ConnectMode::AlwaysFail => return Err(BackendError::Network("connection refused".into())),
            ConnectMode::Unauthorized => return Err(BackendError::Auth("invalid_auth".into())),
        }

        let (tx, rx) = mpsc::unbounded_channel();
        *self.stream.lock() = Some(tx);
        let events = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        })
        .boxed();
        Ok(Connected {
            login: self.login.clone(),
            events,
        })
    }

    async fn post_message(&self, message: OutgoingMessage) -> Result<String, BackendError> {
        if self
            .rate_limits_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(BackendError::RateLimited {
                retry_after: self.retry_after,
            });
        }
        self.record(Call::Post(message));
        Ok("1.0".into())
    }

    async fn list_channels(&self) -> Result<Vec<RemoteChannel>, BackendError> {
        Ok(self.channels.clone())
    }

    async fn list_users(&self) -> Result<Vec<RemoteUser>, BackendError> {
        Ok(self.users.clone())
    }

    async fn channel_members(&self, channel: &RemoteId) -> Result<Vec<RemoteId>, BackendError> {
        Ok(self
            .channels
            .iter()
            .find(|c| &c.id == channel)
            .map(|c| c.members.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn user_info(&self, user: &RemoteId) -> Result<RemoteUser, BackendError> {
        self.users
            .iter()
            .find(|u| &u.id == user)
            .cloned()
            .ok_or_else(|| BackendError::Remote("user_not_found".into()))
    }

    async fn open_direct(&self, user: &RemoteId) -> Result<RemoteId, BackendError> {
        self.record(Call::OpenDirect(user.clone()));
        Ok(RemoteId::new(format!("D-{user}")))
    }

    async fn upload_file(
        &self,
        target: &RemoteId,
        bytes: Vec<u8>,
        filename: &str,
    ) -> Result<String, BackendError> {
        self.record(Call::Upload {
            target: target.clone(),
            filename: filename.to_string(),
            bytes,
        });
        Ok(format!("https://files.example/{filename}"))
    }

    async fn download_file(&self, _url: &str) -> Result<Vec<u8>, BackendError> {
        Err(BackendError::Unsupported("download"))
    }

    async fn set_topic(&self, channel: &RemoteId, topic: &str) -> Result<(), BackendError> {
        self.record(Call::Topic(channel.clone(), topic.to_string()));
        Ok(())
    }

    async fn join_channel(&self, channel: &RemoteId) -> Result<(), BackendError> {
        self.record(Call::Join(channel.clone()));
        Ok(())
    }
}
