//! The remote leg: backend capability trait, normalized events, the two
//! implementations and the session that supervises them.
//!
//! - [`event`]: [`NormalizedEvent`] and friends
//! - [`session`]: reconnecting [`BackendSession`] and the [`BackendHandle`] used for calls
//! - [`slack`]: Slack web API + RTM websocket
//! - [`rocket`]: Rocket.Chat DDP websocket + REST uploads

pub mod event;
pub mod rocket;
pub mod session;
pub mod slack;

pub use event::{LoginInfo, MessageKind, NormalizedEvent, PostedMessage, SharedFile};
pub use session::{BackendHandle, BackendSession, SessionEvent, SessionState};

use crate::config::{BackendConfig, BackendKind, Credentials};
use crate::error::BackendError;
use crate::identity::{RemoteChannel, RemoteId, RemoteUser};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use std::sync::Arc;

/// The live event sequence of one connection. Ends when the connection does;
/// a new [`Backend::connect`] is needed afterwards.
pub type EventStream = BoxStream<'static, Result<NormalizedEvent, BackendError>>;

/// Result of a successful [`Backend::connect`].
pub struct Connected {
    pub login: LoginInfo,
    pub events: EventStream,
}

/// Which markup conventions outbound text must follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Slack,
    Rocket,
}

/// A message to post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub channel: RemoteId,
    pub body: String,
    pub thread: Option<String>,
    pub action: bool,
}

impl OutgoingMessage {
    pub fn new(channel: RemoteId, body: impl Into<String>) -> Self {
        Self {
            channel,
            body: body.into(),
            thread: None,
            action: false,
        }
    }
}

/// What the gateway needs from a remote chat service.
///
/// Implementations must be cheap to share: the session and every outbound
/// worker hold the same `Arc<dyn Backend>`.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    fn dialect(&self) -> Dialect;

    /// Authenticate and open the event stream.
    async fn connect(&self, credentials: &Credentials) -> Result<Connected, BackendError>;

    /// Post a message, returning its remote timestamp/id.
    async fn post_message(&self, message: OutgoingMessage) -> Result<String, BackendError>;

    async fn list_channels(&self) -> Result<Vec<RemoteChannel>, BackendError>;

    async fn list_users(&self) -> Result<Vec<RemoteUser>, BackendError>;

    async fn channel_members(&self, channel: &RemoteId) -> Result<Vec<RemoteId>, BackendError>;

    async fn user_info(&self, user: &RemoteId) -> Result<RemoteUser, BackendError>;

    async fn channel_info(&self, _channel: &RemoteId) -> Result<RemoteChannel, BackendError> {
        Err(BackendError::Unsupported("channel lookup"))
    }

    /// Open (or find) the direct conversation with `user`.
    async fn open_direct(&self, user: &RemoteId) -> Result<RemoteId, BackendError>;

    /// Upload `bytes` into `target`, returning a URL for the file.
    async fn upload_file(
        &self,
        target: &RemoteId,
        bytes: Vec<u8>,
        filename: &str,
    ) -> Result<String, BackendError>;

    async fn download_file(&self, url: &str) -> Result<Vec<u8>, BackendError>;

    async fn set_topic(&self, _channel: &RemoteId, _topic: &str) -> Result<(), BackendError> {
        Err(BackendError::Unsupported("TOPIC"))
    }

    async fn kick(&self, _channel: &RemoteId, _user: &RemoteId) -> Result<(), BackendError> {
        Err(BackendError::Unsupported("KICK"))
    }

    async fn join_channel(&self, _channel: &RemoteId) -> Result<(), BackendError> {
        Err(BackendError::Unsupported("JOIN"))
    }

    async fn invite(&self, _channel: &RemoteId, _user: &RemoteId) -> Result<(), BackendError> {
        Err(BackendError::Unsupported("INVITE"))
    }

    async fn set_away(&self, _away: bool) -> Result<(), BackendError> {
        Err(BackendError::Unsupported("AWAY"))
    }
}

/// Build the backend selected by configuration.
pub fn from_config(config: &BackendConfig) -> Result<Arc<dyn Backend>, BackendError> {
    match config.kind {
        BackendKind::Slack => Ok(Arc::new(slack::SlackBackend::new(&config.api_url)?)),
        BackendKind::RocketChat => {
            let url = config
                .url
                .as_deref()
                .ok_or_else(|| BackendError::Remote("no Rocket.Chat url configured".into()))?;
            Ok(Arc::new(rocket::RocketBackend::new(url)?))
        }
    }
}
