//! Slack web API payloads, and their conversion into the identity model.

use crate::backend::SharedFile;
use crate::identity::{ChannelKind, Presence, RemoteChannel, RemoteUser};
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Envelope {
    pub ok: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub response_metadata: Option<ResponseMetadata>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ResponseMetadata {
    #[serde(default)]
    pub next_cursor: String,
}

impl Envelope {
    /// Cursor for the next page, if there is one.
    pub fn next_cursor(&self) -> Option<&str> {
        self.response_metadata
            .as_ref()
            .map(|m| m.next_cursor.as_str())
            .filter(|c| !c.is_empty())
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct TextValue {
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Deserialize)]
pub struct Latest {
    pub ts: String,
}

#[derive(Debug, Deserialize)]
pub struct SlackChannel {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub name_normalized: Option<String>,
    #[serde(default)]
    pub is_im: bool,
    #[serde(default)]
    pub is_mpim: bool,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub is_group: bool,
    /// Absent on groups, where membership is implied.
    #[serde(default = "yes")]
    pub is_member: bool,
    /// Peer of an IM.
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub topic: TextValue,
    #[serde(default)]
    pub purpose: TextValue,
    #[serde(default)]
    pub latest: Option<Latest>,
    /// Milliseconds since the epoch.
    #[serde(default)]
    pub updated: Option<i64>,
}

fn yes() -> bool {
    true
}

/// Parse a Slack `"1700000000.000100"` timestamp.
pub fn parse_ts(ts: &str) -> Option<DateTime<Utc>> {
    let secs: f64 = ts.parse().ok()?;
    Utc.timestamp_opt(secs as i64, 0).single()
}

impl SlackChannel {
    /// Topic, falling back to the purpose, on one line.
    pub fn real_topic(&self) -> String {
        let t = if self.topic.value.is_empty() {
            &self.purpose.value
        } else {
            &self.topic.value
        };
        t.replace('\n', " | ")
    }

    pub fn into_remote(self) -> RemoteChannel {
        if self.is_im {
            let peer = self.user.clone().unwrap_or_default();
            return RemoteChannel::direct(self.id, peer);
        }
        let kind = if self.is_mpim {
            ChannelKind::Group
        } else if self.is_private || self.is_group {
            ChannelKind::Private
        } else {
            ChannelKind::Public
        };
        let topic = self.real_topic();
        let last_activity = self
            .latest
            .as_ref()
            .and_then(|l| parse_ts(&l.ts))
            .or_else(|| self.updated.and_then(|ms| Utc.timestamp_millis_opt(ms).single()));
        let name = self
            .name_normalized
            .or(self.name)
            .unwrap_or_else(|| self.id.clone());
        let mut channel = RemoteChannel::new(self.id, name, kind);
        channel.topic = topic;
        channel.is_member = self.is_member;
        channel.last_activity = last_activity;
        channel
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub real_name: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SlackUser {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub profile: Profile,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub presence: Option<String>,
}

impl SlackUser {
    pub fn into_remote(self) -> RemoteUser {
        let mut user = RemoteUser::new(self.id, self.name);
        if !self.profile.real_name.is_empty() {
            user.real_name = self.profile.real_name;
        }
        user.email = self.profile.email.filter(|e| !e.is_empty());
        user.is_admin = self.is_admin;
        user.deleted = self.deleted;
        user.presence = self
            .presence
            .as_deref()
            .map(Presence::from_remote)
            .unwrap_or_default();
        user
    }
}

#[derive(Debug, Deserialize)]
pub struct SlackFile {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub mimetype: Option<String>,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub url_private: Option<String>,
    #[serde(default)]
    pub permalink: Option<String>,
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub ims: Vec<String>,
    #[serde(default)]
    pub user: Option<String>,
}

impl SlackFile {
    /// A conversation the file was shared into.
    pub fn shared_in(&self) -> Option<&str> {
        self.channels
            .iter()
            .chain(&self.groups)
            .chain(&self.ims)
            .next_back()
            .map(String::as_str)
    }

    pub fn url(&self) -> String {
        self.url_private
            .clone()
            .or_else(|| self.permalink.clone())
            .unwrap_or_default()
    }

    pub fn to_shared(&self) -> SharedFile {
        SharedFile {
            name: self
                .name
                .clone()
                .or_else(|| self.title.clone())
                .unwrap_or_else(|| "unnamed".to_string()),
            mimetype: self
                .mimetype
                .clone()
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            size: self.size,
            url: self.url(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SelfInfo {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct TeamInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub domain: String,
}

/// `rtm.connect` answer.
#[derive(Debug, Deserialize)]
pub struct RtmConnect {
    pub url: String,
    #[serde(rename = "self")]
    pub me: SelfInfo,
    #[serde(default)]
    pub team: TeamInfo,
}

#[derive(Debug, Deserialize)]
pub struct ChannelList {
    pub channels: Vec<SlackChannel>,
}

#[derive(Debug, Deserialize)]
pub struct MemberList {
    pub members: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct UserList {
    pub members: Vec<SlackUser>,
}

#[derive(Debug, Deserialize)]
pub struct UserInfo {
    pub user: SlackUser,
}

#[derive(Debug, Deserialize)]
pub struct ChannelInfo {
    pub channel: SlackChannel,
}

#[derive(Debug, Deserialize)]
pub struct OpenedChannel {
    pub channel: ChannelId,
}

#[derive(Debug, Deserialize)]
pub struct ChannelId {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct Posted {
    pub ts: String,
}

#[derive(Debug, Deserialize)]
pub struct FileInfo {
    pub file: SlackFile,
}
