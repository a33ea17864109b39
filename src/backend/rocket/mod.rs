//! Rocket.Chat backend: DDP websocket for events and most calls, REST for files.
//!
//! Smaller than the Slack side. Rocket.Chat has no roster listing usable
//! here, so users are learned from room member lists and message authors.
//! Topic, kick, join, invite and away are not supported.

mod ddp;

pub use ddp::DdpClient;

use super::{Backend, Connected, Dialect, LoginInfo, NormalizedEvent, OutgoingMessage, PostedMessage};
use crate::backend::{MessageKind, SharedFile};
use crate::config::Credentials;
use crate::error::BackendError;
use crate::identity::{ChannelKind, RemoteChannel, RemoteId, RemoteUser};
use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::StreamExt;
use parking_lot::RwLock;
use reqwest::{RequestBuilder, multipart};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

const STREAM_BUFFER: usize = 256;

#[derive(Clone)]
struct RestAuth {
    user_id: String,
    token: String,
}

pub struct RocketBackend {
    ws_url: String,
    rest_base: String,
    http: reqwest::Client,
    client: RwLock<Option<Arc<DdpClient>>>,
    auth: RwLock<Option<RestAuth>>,
    /// Messages we send carry this id prefix so their echoes can be skipped.
    id_prefix: String,
    users: Arc<DashMap<RemoteId, RemoteUser>>,
}

/// `wss://host/websocket` -> `https://host`.
pub fn rest_base_from(ws_url: &str) -> String {
    let base = ws_url.trim_end_matches('/');
    let base = base.strip_suffix("/websocket").unwrap_or(base);
    if let Some(rest) = base.strip_prefix("wss://") {
        format!("https://{rest}")
    } else if let Some(rest) = base.strip_prefix("ws://") {
        format!("http://{rest}")
    } else {
        base.to_string()
    }
}

impl RocketBackend {
    pub fn new(ws_url: &str) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("slackirc/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            ws_url: ws_url.to_string(),
            rest_base: rest_base_from(ws_url),
            http,
            client: RwLock::new(None),
            auth: RwLock::new(None),
            id_prefix: format!("slackirc-{}-", uuid::Uuid::new_v4().simple()),
            users: Arc::new(DashMap::new()),
        })
    }

    fn client(&self) -> Result<Arc<DdpClient>, BackendError> {
        self.client
            .read()
            .clone()
            .ok_or_else(|| BackendError::Network("not connected".into()))
    }

    fn rest(&self, req: RequestBuilder) -> Result<RequestBuilder, BackendError> {
        let auth = self
            .auth
            .read()
            .clone()
            .ok_or_else(|| BackendError::Auth("not logged in".into()))?;
        Ok(req
            .header("X-User-Id", auth.user_id)
            .header("X-Auth-Token", auth.token))
    }

    async fn rest_json(&self, req: RequestBuilder) -> Result<Value, BackendError> {
        let resp = self.rest(req)?.send().await?;
        let status = resp.status();
        if status.as_u16() == 401 {
            return Err(BackendError::Auth(status.to_string()));
        }
        if !status.is_success() {
            return Err(BackendError::Remote(status.to_string()));
        }
        Ok(resp.json().await?)
    }

    fn remember(&self, user: &Value) -> Option<RemoteUser> {
        let parsed = parse_user(user)?;
        self.users.insert(parsed.id.clone(), parsed.clone());
        Some(parsed)
    }
}

fn parse_user(user: &Value) -> Option<RemoteUser> {
    let id = user.get("_id").and_then(Value::as_str)?;
    let username = user.get("username").and_then(Value::as_str)?;
    let mut parsed = RemoteUser::new(id, username);
    if let Some(name) = user.get("name").and_then(Value::as_str).filter(|n| !n.is_empty()) {
        parsed.real_name = name.to_string();
    }
    Some(parsed)
}

fn parse_room(room: &Value, self_id: &str) -> Option<RemoteChannel> {
    let id = room.get("_id").and_then(Value::as_str)?;
    let name = room
        .get("fname")
        .or_else(|| room.get("name"))
        .and_then(Value::as_str)
        .unwrap_or(id);
    let kind = match room.get("t").and_then(Value::as_str) {
        Some("c") => ChannelKind::Public,
        Some("p") => ChannelKind::Private,
        Some("d") => {
            let peers: Vec<&str> = room
                .get("uids")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .filter_map(Value::as_str)
                .filter(|u| *u != self_id)
                .collect();
            if let [peer] = peers.as_slice() {
                return Some(RemoteChannel::direct(id, *peer));
            }
            ChannelKind::Group
        }
        _ => return None,
    };
    let mut channel = RemoteChannel::new(id, name, kind);
    channel.topic = room
        .get("topic")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .replace('\n', " | ");
    Some(channel)
}

/// Decode one `stream-room-messages` frame.
///
/// Authors not seen before are emitted as [`NormalizedEvent::UserDiscovered`]
/// ahead of the message.
pub fn decode_frame(
    frame: &Value,
    id_prefix: &str,
    rest_base: &str,
    users: &DashMap<RemoteId, RemoteUser>,
) -> Vec<NormalizedEvent> {
    if frame.get("msg").and_then(Value::as_str) != Some("changed")
        || frame.get("collection").and_then(Value::as_str) != Some("stream-room-messages")
    {
        return Vec::new();
    }
    let Some(msg) = frame
        .get("fields")
        .and_then(|f| f.get("args"))
        .and_then(|a| a.get(0))
    else {
        return Vec::new();
    };
    let str_of = |key: &str| msg.get(key).and_then(Value::as_str);
    if str_of("_id").is_some_and(|id| id.starts_with(id_prefix)) {
        return Vec::new();
    }
    let (Some(channel), Some(author)) = (str_of("rid"), msg.get("u").and_then(parse_user)) else {
        return Vec::new();
    };

    let mut out = Vec::new();
    if !users.contains_key(&author.id) {
        users.insert(author.id.clone(), author.clone());
        out.push(NormalizedEvent::UserDiscovered(author.clone()));
    }
    let text = str_of("msg").unwrap_or_default().to_string();
    let channel = RemoteId::new(channel);

    let event = match str_of("t") {
        Some("uj") | Some("au") => NormalizedEvent::UserJoinedChannel {
            channel,
            user: author.id,
        },
        Some("ul") | Some("ru") => NormalizedEvent::UserLeftChannel {
            channel,
            user: author.id,
        },
        Some("room_changed_topic") => NormalizedEvent::TopicChanged {
            channel,
            author: Some(author.id),
            topic: text,
        },
        Some(_) => return out,
        None if msg.get("editedBy").is_some() => NormalizedEvent::MessageEdited {
            channel,
            author: author.id,
            previous: String::new(),
            current: text,
        },
        None => {
            let files = msg
                .get("file")
                .and_then(|f| {
                    let id = f.get("_id").and_then(Value::as_str)?;
                    let name = f.get("name").and_then(Value::as_str)?;
                    Some(SharedFile {
                        name: name.to_string(),
                        mimetype: f
                            .get("type")
                            .and_then(Value::as_str)
                            .unwrap_or("application/octet-stream")
                            .to_string(),
                        size: f.get("size").and_then(Value::as_u64).unwrap_or(0),
                        url: format!("{rest_base}/file-upload/{id}/{name}"),
                    })
                })
                .into_iter()
                .collect();
            NormalizedEvent::MessagePosted(PostedMessage {
                channel,
                author: Some(author.id),
                text,
                ts: str_of("_id").unwrap_or_default().to_string(),
                thread: str_of("tmid").map(str::to_string),
                kind: MessageKind::Plain,
                files,
            })
        }
    };
    out.push(event);
    out
}

#[async_trait]
impl Backend for RocketBackend {
    fn dialect(&self) -> Dialect {
        Dialect::Rocket
    }

    #[instrument(skip_all, name = "rocket_connect")]
    async fn connect(&self, credentials: &Credentials) -> Result<Connected, BackendError> {
        let (client, mut frames) = DdpClient::connect(&self.ws_url).await?;
        let login = client
            .call("login", json!([{"resume": credentials.token.expose()}]))
            .await
            .map_err(|e| match e {
                BackendError::Remote(reason) => BackendError::Auth(reason),
                other => other,
            })?;
        let user_id = login
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| BackendError::Decode("login result without id".into()))?
            .to_string();
        *self.auth.write() = Some(RestAuth {
            user_id: user_id.clone(),
            token: credentials.token.expose().to_string(),
        });
        *self.client.write() = Some(Arc::clone(&client));

        let me = self
            .rest_json(self.http.get(format!("{}/api/v1/me", self.rest_base)))
            .await;
        let mut self_user = match me.as_ref().ok().and_then(parse_user) {
            Some(user) => user,
            None => {
                debug!("cannot read own profile, using the user id");
                RemoteUser::new(user_id.as_str(), user_id.as_str())
            }
        };
        self_user.is_self = true;
        self.users.insert(self_user.id.clone(), self_user.clone());

        let rooms = client.call("rooms/get", json!([])).await?;
        for room in rooms.as_array().into_iter().flatten() {
            if let Some(rid) = room.get("_id").and_then(Value::as_str)
                && let Err(e) = client
                    .subscribe(
                        "stream-room-messages",
                        json!([rid, {"useCollection": false, "args": []}]),
                    )
                    .await
            {
                warn!(room = rid, error = %e, "cannot subscribe to room");
            }
        }
        info!(rooms = rooms.as_array().map_or(0, Vec::len), "rocket.chat session ready");

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let id_prefix = self.id_prefix.clone();
        let rest_base = self.rest_base.clone();
        let users = Arc::clone(&self.users);
        tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                for event in decode_frame(&frame, &id_prefix, &rest_base, &users) {
                    if tx.send(Ok(event)).await.is_err() {
                        return;
                    }
                }
            }
            let _ = tx.send(Err(BackendError::ReconnectRequired)).await;
        });

        Ok(Connected {
            login: LoginInfo {
                self_user,
                team_name: self.rest_base.clone(),
                team_domain: self.rest_base.clone(),
            },
            events: futures_util::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            })
            .boxed(),
        })
    }

    async fn post_message(&self, message: OutgoingMessage) -> Result<String, BackendError> {
        let id = format!("{}{}", self.id_prefix, uuid::Uuid::new_v4().simple());
        let body = if message.action {
            format!("_{}_", message.body)
        } else {
            message.body
        };
        let mut payload = json!({"_id": id, "rid": message.channel.as_str(), "msg": body});
        if let Some(thread) = message.thread {
            payload["tmid"] = Value::String(thread);
        }
        self.client()?.call("sendMessage", json!([payload])).await?;
        Ok(id)
    }

    async fn list_channels(&self) -> Result<Vec<RemoteChannel>, BackendError> {
        let self_id = self
            .auth
            .read()
            .as_ref()
            .map(|a| a.user_id.clone())
            .unwrap_or_default();
        let rooms = self.client()?.call("rooms/get", json!([])).await?;
        Ok(rooms
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|room| parse_room(room, &self_id))
            .collect())
    }

    async fn list_users(&self) -> Result<Vec<RemoteUser>, BackendError> {
        Ok(self.users.iter().map(|u| u.value().clone()).collect())
    }

    async fn channel_members(&self, channel: &RemoteId) -> Result<Vec<RemoteId>, BackendError> {
        let result = self
            .client()?
            .call("getUsersOfRoom", json!([channel.as_str(), true]))
            .await?;
        Ok(result
            .get("records")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|u| self.remember(u))
            .map(|u| u.id)
            .collect())
    }

    async fn user_info(&self, user: &RemoteId) -> Result<RemoteUser, BackendError> {
        if let Some(known) = self.users.get(user) {
            return Ok(known.clone());
        }
        let url = format!("{}/api/v1/users.info", self.rest_base);
        let info = self
            .rest_json(self.http.get(url).query(&[("userId", user.as_str())]))
            .await?;
        info.get("user")
            .and_then(|u| self.remember(u))
            .ok_or_else(|| BackendError::Decode("users.info without user".into()))
    }

    async fn open_direct(&self, user: &RemoteId) -> Result<RemoteId, BackendError> {
        let username = self.user_info(user).await?.display_name;
        let result = self
            .client()?
            .call("createDirectMessage", json!([username]))
            .await?;
        result
            .get("rid")
            .and_then(Value::as_str)
            .map(RemoteId::new)
            .ok_or_else(|| BackendError::Decode("createDirectMessage without rid".into()))
    }

    async fn upload_file(
        &self,
        target: &RemoteId,
        bytes: Vec<u8>,
        filename: &str,
    ) -> Result<String, BackendError> {
        let url = format!("{}/api/v1/rooms.upload/{}", self.rest_base, target);
        let form = multipart::Form::new()
            .part("file", multipart::Part::bytes(bytes).file_name(filename.to_string()));
        let result = self.rest_json(self.http.post(url).multipart(form)).await?;
        let file = result.get("message").and_then(|m| m.get("file"));
        Ok(match file.and_then(|f| f.get("_id")).and_then(Value::as_str) {
            Some(id) => format!("{}/file-upload/{}/{}", self.rest_base, id, filename),
            None => self.rest_base.clone(),
        })
    }

    async fn download_file(&self, url: &str) -> Result<Vec<u8>, BackendError> {
        let resp = self.rest(self.http.get(url))?.send().await?;
        if !resp.status().is_success() {
            return Err(BackendError::Remote(resp.status().to_string()));
        }
        Ok(resp.bytes().await?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(msg: Value) -> Value {
        json!({"msg": "changed", "collection": "stream-room-messages", "fields": {"args": [msg]}})
    }

    #[test]
    fn rest_base_is_derived() {
        assert_eq!(rest_base_from("wss://chat.example/websocket"), "https://chat.example");
        assert_eq!(rest_base_from("ws://localhost:3000/websocket/"), "http://localhost:3000");
    }

    #[test]
    fn first_message_discovers_author() {
        let users = DashMap::new();
        let msg = frame(json!({
            "_id": "m1", "rid": "R1", "msg": "hi",
            "u": {"_id": "U1", "username": "alice", "name": "Alice"}
        }));
        let events = decode_frame(&msg, "slackirc-x-", "https://chat", &users);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], NormalizedEvent::UserDiscovered(ref u) if u.real_name == "Alice"));
        assert!(matches!(events[1], NormalizedEvent::MessagePosted(ref m) if m.text == "hi"));

        let again = decode_frame(&msg, "slackirc-x-", "https://chat", &users);
        assert_eq!(again.len(), 1);
    }

    #[test]
    fn own_messages_are_skipped() {
        let users = DashMap::new();
        let msg = frame(json!({
            "_id": "slackirc-x-123", "rid": "R1", "msg": "mine",
            "u": {"_id": "U1", "username": "me"}
        }));
        assert!(decode_frame(&msg, "slackirc-x-", "https://chat", &users).is_empty());
    }

    #[test]
    fn system_messages() {
        let users = DashMap::new();
        let joined = frame(json!({
            "_id": "m2", "rid": "R1", "msg": "bob", "t": "uj",
            "u": {"_id": "U2", "username": "bob"}
        }));
        let events = decode_frame(&joined, "p-", "https://chat", &users);
        assert!(matches!(events.last(), Some(NormalizedEvent::UserJoinedChannel { .. })));
    }

    #[test]
    fn direct_rooms_find_their_peer() {
        let room = json!({"_id": "R9", "t": "d", "uids": ["ME", "U2"], "usernames": ["me", "bob"]});
        let channel = parse_room(&room, "ME").unwrap();
        assert!(channel.is_direct());
        assert_eq!(channel.peer.unwrap().as_str(), "U2");
    }
}
