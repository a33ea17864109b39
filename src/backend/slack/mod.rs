//! Slack backend: web API for calls, RTM websocket for events.

mod api;
mod rtm;
mod types;

pub use api::SlackApi;
pub use rtm::{ECHO_WINDOW, RtmItem, SentLog, decode};

use super::{Backend, Connected, Dialect, LoginInfo, OutgoingMessage};
use crate::config::Credentials;
use crate::error::BackendError;
use crate::identity::{RemoteChannel, RemoteId, RemoteUser};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, instrument};
use types::{ChannelInfo, ChannelList, MemberList, OpenedChannel, Posted, RtmConnect, UserInfo, UserList};

const PAGE_LIMIT: &str = "1000";

pub struct SlackBackend {
    api: Arc<SlackApi>,
    sent: Arc<SentLog>,
    /// user id -> IM channel id
    directs: DashMap<RemoteId, RemoteId>,
}

impl SlackBackend {
    pub fn new(api_url: &str) -> Result<Self, BackendError> {
        Ok(Self {
            api: Arc::new(SlackApi::new(api_url)?),
            sent: Arc::new(SentLog::new(ECHO_WINDOW)),
            directs: DashMap::new(),
        })
    }

    /// Follow `next_cursor` until the listing is complete.
    async fn paged<P, T>(
        &self,
        method: &str,
        params: &[(&str, String)],
        mut unpack: impl FnMut(P) -> Vec<T>,
    ) -> Result<Vec<T>, BackendError>
    where
        P: DeserializeOwned,
    {
        let mut out = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut page_params = params.to_vec();
            if let Some(c) = cursor.take() {
                page_params.push(("cursor", c));
            }
            let (page, next) = self.api.call_page::<P>(method, &page_params).await?;
            out.extend(unpack(page));
            match next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl Backend for SlackBackend {
    fn dialect(&self) -> Dialect {
        Dialect::Slack
    }

    #[instrument(skip_all, name = "slack_connect")]
    async fn connect(&self, credentials: &Credentials) -> Result<Connected, BackendError> {
        self.api.set_credentials(credentials.clone());
        let rtm: RtmConnect = self.api.call("rtm.connect", &[]).await?;

        let mut self_user = match self.user_info(&RemoteId::new(&rtm.me.id)).await {
            Ok(user) => user,
            Err(e) => {
                debug!(error = %e, "users.info for self failed, using rtm.connect data");
                RemoteUser::new(rtm.me.id.as_str(), rtm.me.name.as_str())
            }
        };
        self_user.is_self = true;

        let events = rtm::open(&rtm.url, Arc::clone(&self.api), Arc::clone(&self.sent)).await?;
        Ok(Connected {
            login: LoginInfo {
                self_user,
                team_name: rtm.team.name,
                team_domain: rtm.team.domain,
            },
            events,
        })
    }

    async fn post_message(&self, message: OutgoingMessage) -> Result<String, BackendError> {
        let method = if message.action {
            "chat.meMessage"
        } else {
            "chat.postMessage"
        };
        let mut params = vec![
            ("channel", message.channel.to_string()),
            ("text", message.body),
            ("as_user", "true".to_string()),
        ];
        if let Some(thread) = message.thread {
            params.push(("thread_ts", thread));
        }
        let posted: Posted = self.api.call(method, &params).await?;
        self.sent.record(&posted.ts);
        Ok(posted.ts)
    }

    async fn list_channels(&self) -> Result<Vec<RemoteChannel>, BackendError> {
        let params = [
            ("types", "public_channel,private_channel,mpim,im".to_string()),
            ("exclude_archived", "true".to_string()),
            ("limit", PAGE_LIMIT.to_string()),
        ];
        let channels = self
            .paged("conversations.list", &params, |p: ChannelList| p.channels)
            .await?;
        let channels: Vec<RemoteChannel> = channels.into_iter().map(|c| c.into_remote()).collect();
        for channel in channels.iter().filter(|c| c.is_direct()) {
            if let Some(peer) = &channel.peer {
                self.directs.insert(peer.clone(), channel.id.clone());
            }
        }
        Ok(channels)
    }

    async fn list_users(&self) -> Result<Vec<RemoteUser>, BackendError> {
        let params = [("limit", PAGE_LIMIT.to_string())];
        let users = self.paged("users.list", &params, |p: UserList| p.members).await?;
        Ok(users.into_iter().map(|u| u.into_remote()).collect())
    }

    async fn channel_members(&self, channel: &RemoteId) -> Result<Vec<RemoteId>, BackendError> {
        let params = [
            ("channel", channel.to_string()),
            ("limit", "5000".to_string()),
        ];
        let members = self
            .paged("conversations.members", &params, |p: MemberList| p.members)
            .await?;
        Ok(members.into_iter().map(RemoteId::from).collect())
    }

    async fn user_info(&self, user: &RemoteId) -> Result<RemoteUser, BackendError> {
        let info: UserInfo = self
            .api
            .call("users.info", &[("user", user.to_string())])
            .await?;
        Ok(info.user.into_remote())
    }

    async fn channel_info(&self, channel: &RemoteId) -> Result<RemoteChannel, BackendError> {
        let info: ChannelInfo = self
            .api
            .call("conversations.info", &[("channel", channel.to_string())])
            .await?;
        let channel = info.channel.into_remote();
        if let Some(peer) = &channel.peer {
            self.directs.insert(peer.clone(), channel.id.clone());
        }
        Ok(channel)
    }

    async fn open_direct(&self, user: &RemoteId) -> Result<RemoteId, BackendError> {
        if let Some(id) = self.directs.get(user) {
            return Ok(id.clone());
        }
        let opened: OpenedChannel = self
            .api
            .call("conversations.open", &[("users", user.to_string())])
            .await?;
        let id = RemoteId::new(opened.channel.id);
        self.directs.insert(user.clone(), id.clone());
        Ok(id)
    }

    async fn upload_file(
        &self,
        target: &RemoteId,
        bytes: Vec<u8>,
        filename: &str,
    ) -> Result<String, BackendError> {
        let file = self.api.upload(target.as_str(), bytes, filename).await?;
        Ok(file.url())
    }

    async fn download_file(&self, url: &str) -> Result<Vec<u8>, BackendError> {
        self.api.download(url).await
    }

    async fn set_topic(&self, channel: &RemoteId, topic: &str) -> Result<(), BackendError> {
        self.api
            .call_ok(
                "conversations.setTopic",
                &[("channel", channel.to_string()), ("topic", topic.to_string())],
            )
            .await
    }

    async fn kick(&self, channel: &RemoteId, user: &RemoteId) -> Result<(), BackendError> {
        self.api
            .call_ok(
                "conversations.kick",
                &[("channel", channel.to_string()), ("user", user.to_string())],
            )
            .await
    }

    async fn join_channel(&self, channel: &RemoteId) -> Result<(), BackendError> {
        self.api
            .call_ok("conversations.join", &[("channel", channel.to_string())])
            .await
    }

    async fn invite(&self, channel: &RemoteId, user: &RemoteId) -> Result<(), BackendError> {
        self.api
            .call_ok(
                "conversations.invite",
                &[("channel", channel.to_string()), ("users", user.to_string())],
            )
            .await
    }

    async fn set_away(&self, away: bool) -> Result<(), BackendError> {
        let presence = if away { "away" } else { "auto" };
        self.api
            .call_ok("users.setPresence", &[("presence", presence.to_string())])
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Secret;
    use axum::extract::{Form, State};
    use axum::http::{HeaderMap, StatusCode, header};
    use axum::response::IntoResponse;
    use axum::routing::post;
    use axum::{Json, Router};
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    struct Seen {
        calls: Mutex<Vec<(String, Option<String>, HashMap<String, String>)>>,
    }

    async fn post_message(
        State(seen): State<Arc<Seen>>,
        headers: HeaderMap,
        Form(form): Form<HashMap<String, String>>,
    ) -> impl IntoResponse {
        let auth = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        seen.calls.lock().push(("chat.postMessage".into(), auth, form));
        Json(serde_json::json!({ "ok": true, "ts": "1700000000.000100" }))
    }

    async fn open_direct(
        State(seen): State<Arc<Seen>>,
        Form(form): Form<HashMap<String, String>>,
    ) -> impl IntoResponse {
        seen.calls.lock().push(("conversations.open".into(), None, form));
        Json(serde_json::json!({ "ok": true, "channel": { "id": "D42" } }))
    }

    async fn rate_limited() -> impl IntoResponse {
        (StatusCode::TOO_MANY_REQUESTS, [(header::RETRY_AFTER, "7")], "")
    }

    async fn revoked() -> impl IntoResponse {
        Json(serde_json::json!({ "ok": false, "error": "token_revoked" }))
    }

    async fn fake_slack() -> (SlackBackend, Arc<Seen>) {
        let seen = Arc::new(Seen::default());
        let app = Router::new()
            .route("/chat.postMessage", post(post_message))
            .route("/conversations.open", post(open_direct))
            .route("/users.setPresence", post(rate_limited))
            .route("/conversations.join", post(revoked))
            .with_state(Arc::clone(&seen));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let backend = SlackBackend::new(&format!("http://{addr}/")).unwrap();
        backend.api.set_credentials(Credentials {
            token: Secret::new("xoxp-test"),
            cookie: None,
        });
        (backend, seen)
    }

    #[tokio::test]
    async fn posts_are_form_encoded_with_bearer_auth() {
        let (backend, seen) = fake_slack().await;
        let ts = backend
            .post_message(OutgoingMessage::new(RemoteId::new("C1"), "hello <@U1>"))
            .await
            .unwrap();
        assert_eq!(ts, "1700000000.000100");

        let calls = seen.calls.lock();
        let (method, auth, form) = &calls[0];
        assert_eq!(method, "chat.postMessage");
        assert_eq!(auth.as_deref(), Some("Bearer xoxp-test"));
        assert_eq!(form["channel"], "C1");
        assert_eq!(form["text"], "hello <@U1>");
    }

    #[tokio::test]
    async fn direct_conversations_are_opened_once() {
        let (backend, seen) = fake_slack().await;
        let user = RemoteId::new("U7");
        assert_eq!(backend.open_direct(&user).await.unwrap(), RemoteId::new("D42"));
        assert_eq!(backend.open_direct(&user).await.unwrap(), RemoteId::new("D42"));
        assert_eq!(seen.calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn http_429_carries_retry_after() {
        let (backend, _) = fake_slack().await;
        let err = backend.set_away(true).await.unwrap_err();
        assert!(matches!(
            err,
            BackendError::RateLimited { retry_after } if retry_after == std::time::Duration::from_secs(7)
        ));
    }

    #[tokio::test]
    async fn revoked_tokens_are_auth_errors() {
        let (backend, _) = fake_slack().await;
        let err = backend.join_channel(&RemoteId::new("C1")).await.unwrap_err();
        assert!(matches!(err, BackendError::Auth(ref e) if e == "token_revoked"));
        assert!(!err.is_transient());
    }
}
