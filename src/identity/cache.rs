//! The identity cache: remote ids ↔ IRC names.
//!
//! Only the coordinator touches it, so it is a plain struct with `&mut self`
//! mutators and no interior locking.

use slackirc_proto::FoldedName;
use std::collections::{BTreeSet, HashMap};

use super::names::{base_channel, base_nick, channel_with_suffix, nick_with_suffix};
use super::types::{IrcIdentity, Presence, RemoteChannel, RemoteId, RemoteUser};

/// What an upsert did to the IRC-visible name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// First sighting; the name was just bound.
    New(IrcIdentity),
    /// The remote name changed and so did the IRC name.
    Renamed { old: IrcIdentity, new: IrcIdentity },
    /// Same IRC name as before (other fields may have changed).
    Unchanged,
}

/// Result of a name lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameTarget {
    User(RemoteId),
    Channel(RemoteId),
}

impl NameTarget {
    pub fn id(&self) -> &RemoteId {
        match self {
            NameTarget::User(id) | NameTarget::Channel(id) => id,
        }
    }
}

struct UserEntry {
    user: RemoteUser,
    nick: IrcIdentity,
}

struct ChannelEntry {
    channel: RemoteChannel,
    /// `None` for direct conversations, which surface as the peer's nick.
    name: Option<IrcIdentity>,
}

/// Which namespace a name belongs to.
#[derive(Clone, Copy)]
enum Space {
    Nick,
    Channel,
}

#[derive(Default)]
pub struct IdentityCache {
    users: HashMap<RemoteId, UserEntry>,
    channels: HashMap<RemoteId, ChannelEntry>,
    /// Every nick ever handed out, old names included. Never shrinks.
    nicks: HashMap<FoldedName, RemoteId>,
    /// Every channel name ever handed out. Never shrinks.
    channel_names: HashMap<FoldedName, RemoteId>,
    direct_by_peer: HashMap<RemoteId, RemoteId>,
    self_id: Option<RemoteId>,
}

impl IdentityCache {
    pub fn new() -> Self {
        Self::default()
    }

    // ---------------------------------------------------------------------
    // Resolution
    // ---------------------------------------------------------------------

    /// Current nickname of a user, `None` if never seen.
    pub fn resolve_user(&self, id: &RemoteId) -> Option<&IrcIdentity> {
        self.users.get(id).map(|e| &e.nick)
    }

    /// IRC channel name for a channel. Direct conversations resolve to the
    /// peer's nickname.
    pub fn resolve_channel(&self, id: &RemoteId) -> Option<&IrcIdentity> {
        let entry = self.channels.get(id)?;
        match &entry.name {
            Some(name) => Some(name),
            None => entry.channel.peer.as_ref().and_then(|p| self.resolve_user(p)),
        }
    }

    /// Look a name up in the namespace its sigil implies. Old names of
    /// renamed identities still resolve.
    pub fn lookup_by_irc_name(&self, name: &str) -> Option<NameTarget> {
        let key = FoldedName::new(name);
        if name.starts_with('#') || name.starts_with('&') {
            self.channel_names.get(&key).cloned().map(NameTarget::Channel)
        } else {
            self.nicks.get(&key).cloned().map(NameTarget::User)
        }
    }

    pub fn user(&self, id: &RemoteId) -> Option<&RemoteUser> {
        self.users.get(id).map(|e| &e.user)
    }

    pub fn channel(&self, id: &RemoteId) -> Option<&RemoteChannel> {
        self.channels.get(id).map(|e| &e.channel)
    }

    pub fn users(&self) -> impl Iterator<Item = (&RemoteUser, &IrcIdentity)> {
        self.users.values().map(|e| (&e.user, &e.nick))
    }

    /// Named (non-direct) channels.
    pub fn channels(&self) -> impl Iterator<Item = (&RemoteChannel, &IrcIdentity)> {
        self.channels
            .values()
            .filter_map(|e| e.name.as_ref().map(|n| (&e.channel, n)))
    }

    /// The direct conversation with `peer`, if one is known.
    pub fn direct_channel_with(&self, peer: &RemoteId) -> Option<&RemoteId> {
        self.direct_by_peer.get(peer)
    }

    pub fn self_id(&self) -> Option<&RemoteId> {
        self.self_id.as_ref()
    }

    pub fn self_nick(&self) -> Option<&IrcIdentity> {
        self.self_id.as_ref().and_then(|id| self.resolve_user(id))
    }

    // ---------------------------------------------------------------------
    // Mutation
    // ---------------------------------------------------------------------

    /// Insert or refresh a user. A changed display name moves the user to a
    /// new nickname; the old one stays reserved for them.
    pub fn upsert_user(&mut self, user: RemoteUser) -> UpsertOutcome {
        if user.is_self {
            self.self_id = Some(user.id.clone());
        }
        if let Some(entry) = self.users.get(&user.id) {
            let renamed = entry.user.display_name != user.display_name;
            let current = entry.nick.clone();
            let was_self = entry.user.is_self;
            let mut user = user;
            user.is_self |= was_self;
            if !renamed {
                if let Some(entry) = self.users.get_mut(&user.id) {
                    entry.user = user;
                }
                return UpsertOutcome::Unchanged;
            }
            let base = base_nick(&user.display_name, &user.id);
            let nick = self.allocate(Space::Nick, &base, &user.id);
            let id = user.id.clone();
            if let Some(entry) = self.users.get_mut(&id) {
                entry.user = user;
                entry.nick = nick.clone();
            }
            if nick == current {
                return UpsertOutcome::Unchanged;
            }
            return UpsertOutcome::Renamed { old: current, new: nick };
        }

        let base = base_nick(&user.display_name, &user.id);
        let nick = self.allocate(Space::Nick, &base, &user.id);
        self.users.insert(
            user.id.clone(),
            UserEntry {
                user,
                nick: nick.clone(),
            },
        );
        UpsertOutcome::New(nick)
    }

    /// Insert or refresh a channel. An empty member set in `channel` keeps
    /// the members already known.
    pub fn upsert_channel(&mut self, mut channel: RemoteChannel) -> UpsertOutcome {
        if let Some(peer) = channel.peer.clone().filter(|_| channel.is_direct()) {
            self.direct_by_peer.insert(peer, channel.id.clone());
        }

        let Some(entry) = self.channels.get(&channel.id) else {
            let name = (!channel.is_direct()).then(|| {
                let base = base_channel(&channel.name, &channel.id);
                self.allocate(Space::Channel, &base, &channel.id)
            });
            let outcome = match &name {
                Some(n) => UpsertOutcome::New(n.clone()),
                None => UpsertOutcome::Unchanged,
            };
            self.channels.insert(channel.id.clone(), ChannelEntry { channel, name });
            return outcome;
        };

        if channel.members.is_empty() {
            channel.members = entry.channel.members.clone();
        }
        let renamed = !channel.is_direct() && entry.channel.name != channel.name;
        let current = entry.name.clone();
        let new_name = match (&current, renamed) {
            (Some(_), true) => {
                let base = base_channel(&channel.name, &channel.id);
                Some(self.allocate(Space::Channel, &base, &channel.id))
            }
            _ => current.clone(),
        };
        let id = channel.id.clone();
        if let Some(entry) = self.channels.get_mut(&id) {
            entry.channel = channel;
            entry.name = new_name.clone();
        }
        match (current, new_name) {
            (Some(old), Some(new)) if old != new => UpsertOutcome::Renamed { old, new },
            _ => UpsertOutcome::Unchanged,
        }
    }

    /// Returns `false` when the user is unknown or nothing changed.
    pub fn set_presence(&mut self, id: &RemoteId, presence: Presence) -> bool {
        match self.users.get_mut(id) {
            Some(entry) if entry.user.presence != presence => {
                entry.user.presence = presence;
                true
            }
            _ => false,
        }
    }

    pub fn set_members(&mut self, channel: &RemoteId, members: BTreeSet<RemoteId>) {
        if let Some(entry) = self.channels.get_mut(channel) {
            entry.channel.members = members;
        }
    }

    /// Returns `true` when the user was not a member before.
    pub fn add_member(&mut self, channel: &RemoteId, user: &RemoteId) -> bool {
        let is_self = self.self_id.as_ref() == Some(user);
        match self.channels.get_mut(channel) {
            Some(entry) => {
                if is_self {
                    entry.channel.is_member = true;
                }
                entry.channel.members.insert(user.clone())
            }
            None => false,
        }
    }

    /// Returns `true` when the user was a member before.
    pub fn remove_member(&mut self, channel: &RemoteId, user: &RemoteId) -> bool {
        let is_self = self.self_id.as_ref() == Some(user);
        match self.channels.get_mut(channel) {
            Some(entry) => {
                if is_self {
                    entry.channel.is_member = false;
                }
                entry.channel.members.remove(user)
            }
            None => false,
        }
    }

    pub fn set_topic(&mut self, channel: &RemoteId, topic: &str) {
        if let Some(entry) = self.channels.get_mut(channel) {
            entry.channel.topic = topic.to_string();
        }
    }

    pub fn touch_channel(&mut self, channel: &RemoteId, at: chrono::DateTime<chrono::Utc>) {
        if let Some(entry) = self.channels.get_mut(channel) {
            entry.channel.last_activity = Some(at);
        }
    }

    /// Bind the first free name derived from `base` to `owner`. A name the
    /// owner already holds (current or old) counts as free for them.
    fn allocate(&mut self, space: Space, base: &str, owner: &RemoteId) -> IrcIdentity {
        let table = match space {
            Space::Nick => &mut self.nicks,
            Space::Channel => &mut self.channel_names,
        };
        let mut candidate = base.to_string();
        let mut n = 2;
        loop {
            let key = FoldedName::new(&candidate);
            match table.get(&key) {
                Some(holder) if holder != owner => {
                    candidate = match space {
                        Space::Nick => nick_with_suffix(base, n),
                        Space::Channel => channel_with_suffix(base, n),
                    };
                    n += 1;
                }
                Some(_) => return IrcIdentity::new(candidate),
                None => {
                    table.insert(key, owner.clone());
                    return IrcIdentity::new(candidate);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::ChannelKind;

    fn user(id: &str, name: &str) -> RemoteUser {
        RemoteUser::new(id, name)
    }

    #[test]
    fn resolution_is_stable() {
        let mut cache = IdentityCache::new();
        assert_eq!(cache.upsert_user(user("U1", "alice")), UpsertOutcome::New(IrcIdentity::new("alice".into())));
        for _ in 0..3 {
            assert_eq!(cache.resolve_user(&"U1".into()).unwrap(), "alice");
        }
        assert_eq!(cache.upsert_user(user("U1", "alice")), UpsertOutcome::Unchanged);
        assert_eq!(cache.resolve_user(&"U1".into()).unwrap(), "alice");
        assert!(cache.resolve_user(&"U404".into()).is_none());
    }

    #[test]
    fn collisions_get_suffixes_first_wins() {
        let mut cache = IdentityCache::new();
        cache.upsert_user(user("U1", "john.doe"));
        cache.upsert_user(user("U2", "John Doe"));
        cache.upsert_user(user("U3", "johndoe!"));
        assert_eq!(cache.resolve_user(&"U1".into()).unwrap(), "johndoe");
        assert_eq!(cache.resolve_user(&"U2".into()).unwrap(), "JohnDoe2");
        assert_eq!(cache.resolve_user(&"U3".into()).unwrap(), "johndoe3");
        assert_eq!(cache.lookup_by_irc_name("JOHNDOE"), Some(NameTarget::User("U1".into())));
        assert_eq!(cache.lookup_by_irc_name("johndoe2"), Some(NameTarget::User("U2".into())));
    }

    #[test]
    fn rename_keeps_old_name_reserved() {
        let mut cache = IdentityCache::new();
        cache.upsert_user(user("U1", "alice"));
        let outcome = cache.upsert_user(user("U1", "alice2"));
        assert_eq!(
            outcome,
            UpsertOutcome::Renamed {
                old: IrcIdentity::new("alice".into()),
                new: IrcIdentity::new("alice2".into()),
            }
        );
        assert_eq!(cache.resolve_user(&"U1".into()).unwrap(), "alice2");
        assert_eq!(cache.lookup_by_irc_name("alice"), Some(NameTarget::User("U1".into())));

        // Someone new called alice cannot take the reserved name.
        cache.upsert_user(user("U2", "alice"));
        assert_eq!(cache.resolve_user(&"U2".into()).unwrap(), "alice3");
    }

    #[test]
    fn renaming_back_reuses_own_alias() {
        let mut cache = IdentityCache::new();
        cache.upsert_user(user("U1", "bob"));
        cache.upsert_user(user("U1", "robert"));
        let outcome = cache.upsert_user(user("U1", "bob"));
        assert!(matches!(outcome, UpsertOutcome::Renamed { ref new, .. } if new == "bob"));
    }

    #[test]
    fn cosmetic_rename_is_unchanged() {
        let mut cache = IdentityCache::new();
        cache.upsert_user(user("U1", "bob"));
        assert_eq!(cache.upsert_user(user("U1", "bob.")), UpsertOutcome::Unchanged);
    }

    #[test]
    fn channels_and_nicks_are_separate_namespaces() {
        let mut cache = IdentityCache::new();
        cache.upsert_user(user("U1", "general"));
        cache.upsert_channel(RemoteChannel::new("C1", "general", ChannelKind::Public));
        assert_eq!(cache.resolve_channel(&"C1".into()).unwrap(), "#general");
        assert_eq!(cache.lookup_by_irc_name("#GENERAL"), Some(NameTarget::Channel("C1".into())));
        assert_eq!(cache.lookup_by_irc_name("general"), Some(NameTarget::User("U1".into())));
    }

    #[test]
    fn direct_channels_resolve_to_peer() {
        let mut cache = IdentityCache::new();
        cache.upsert_user(user("U2", "carol"));
        cache.upsert_channel(RemoteChannel::direct("D1", "U2"));
        assert_eq!(cache.resolve_channel(&"D1".into()).unwrap(), "carol");
        assert_eq!(cache.direct_channel_with(&"U2".into()), Some(&RemoteId::from("D1")));
        assert!(cache.channels().all(|(c, _)| c.id.as_str() != "D1"));
    }

    #[test]
    fn channel_upsert_keeps_members_when_omitted() {
        let mut cache = IdentityCache::new();
        let mut chan = RemoteChannel::new("C1", "dev", ChannelKind::Private);
        chan.members.insert("U1".into());
        cache.upsert_channel(chan);
        let mut refreshed = RemoteChannel::new("C1", "dev", ChannelKind::Private);
        refreshed.topic = "ship it".into();
        assert_eq!(cache.upsert_channel(refreshed), UpsertOutcome::Unchanged);
        let stored = cache.channel(&"C1".into()).unwrap();
        assert_eq!(stored.topic, "ship it");
        assert!(stored.members.contains(&RemoteId::from("U1")));
    }

    #[test]
    fn membership_tracks_self() {
        let mut cache = IdentityCache::new();
        let mut me = user("U0", "me");
        me.is_self = true;
        cache.upsert_user(me);
        let mut chan = RemoteChannel::new("C1", "dev", ChannelKind::Public);
        chan.is_member = false;
        cache.upsert_channel(chan);
        assert!(cache.add_member(&"C1".into(), &"U0".into()));
        assert!(cache.channel(&"C1".into()).unwrap().is_member);
        assert!(!cache.add_member(&"C1".into(), &"U0".into()));
        assert!(cache.remove_member(&"C1".into(), &"U0".into()));
        assert!(!cache.channel(&"C1".into()).unwrap().is_member);
        assert_eq!(cache.self_nick().unwrap(), "me");
    }

    #[test]
    fn presence_changes_are_reported_once() {
        let mut cache = IdentityCache::new();
        cache.upsert_user(user("U1", "dave"));
        assert!(cache.set_presence(&"U1".into(), Presence::Away));
        assert!(!cache.set_presence(&"U1".into(), Presence::Away));
        assert!(!cache.set_presence(&"U9".into(), Presence::Away));
    }
}
