//! Text conversion between remote markup and plain IRC lines.
//!
//! Everything here is pure: it reads the identity cache and returns new
//! strings. Names come from the cache so a mention always renders as the
//! nick the client already knows.

use super::emoji::replace_shortcodes;
use crate::backend::{Dialect, SharedFile};
use crate::identity::{IdentityCache, NameTarget, RemoteId};
use regex::{Captures, Regex};
use std::sync::LazyLock;

macro_rules! static_regex {
    ($name:ident, $re:expr) => {
        static $name: LazyLock<Regex> =
            LazyLock::new(|| Regex::new($re).expect("static regex is valid"));
    };
}

static_regex!(USER_MENTION, r"<@([0-9A-Za-z]+)(?:\|([^>]*))?>");
static_regex!(CHANNEL_MENTION, r"<#([0-9A-Za-z]+)(?:\|([^>]*))?>");
static_regex!(URL, r"<([a-z0-9\-\.]+)://([^\s\|>]+)\|?([^<>]*)>");
static_regex!(MAILTO, r"<mailto:([^|>]+)(?:\|[^>]*)?>");
static_regex!(BROADCAST, r"<!(here|channel|everyone)(?:\|[^>]*)?>");
static_regex!(CODE_FENCE, r"```");
static_regex!(BOLD, r"(^|[\s(])\*([^\s*](?:[^*\n]*[^\s*])?)\*([\s).,!?:;]|$)");
static_regex!(ITALIC, r"(^|[\s(])_([^\s_](?:[^_\n]*[^\s_])?)_([\s).,!?:;]|$)");
static_regex!(STRIKE, r"(^|[\s(])~([^\s~](?:[^~\n]*[^\s~])?)~([\s).,!?:;]|$)");

/// Trailing characters that may follow a nick in running text.
const NICK_TRAILERS: &[char] = &[':', ',', '.', '!', '?', ';', ')'];

// ============================================================================
// Inbound (remote -> IRC)
// ============================================================================

/// Convert a remote message body into plain text for IRC.
///
/// Broadcast mentions name the local nick so the client highlights them.
pub fn inbound_text(text: &str, dialect: Dialect, cache: &IdentityCache) -> String {
    let self_nick = cache.self_nick().map(|n| n.to_string()).unwrap_or_default();
    let text = strip_markup(text);
    let text = replace_shortcodes(&text);

    match dialect {
        Dialect::Slack => {
            let text = USER_MENTION.replace_all(&text, |caps: &Captures<'_>| {
                let id = RemoteId::new(&caps[1]);
                match cache.resolve_user(&id) {
                    Some(nick) => nick.to_string(),
                    None => caps
                        .get(2)
                        .map(|label| label.as_str().to_string())
                        .unwrap_or_else(|| caps[1].to_string()),
                }
            });
            let text = CHANNEL_MENTION.replace_all(&text, |caps: &Captures<'_>| {
                let id = RemoteId::new(&caps[1]);
                match cache.resolve_channel(&id) {
                    Some(name) if name.as_str().starts_with('#') => name.to_string(),
                    Some(name) => format!("#{name}"),
                    None => format!("#{}", caps.get(2).map_or(&caps[1], |m| m.as_str())),
                }
            });
            let text = URL.replace_all(&text, |caps: &Captures<'_>| {
                let url = format!("{}://{}", &caps[1], &caps[2]);
                let label = &caps[3];
                if label.is_empty() || label == url || label == &caps[2] {
                    url
                } else {
                    format!("{url} ({label})")
                }
            });
            let text = MAILTO.replace_all(&text, "$1");
            let text = BROADCAST.replace_all(&text, |caps: &Captures<'_>| {
                broadcast(&caps[1], &self_nick)
            });
            decode_entities(&text)
        }
        Dialect::Rocket => text
            .replace("@here", &broadcast("here", &self_nick))
            .replace("@channel", &broadcast("channel", &self_nick)),
    }
}

fn broadcast(kind: &str, nick: &str) -> String {
    match kind {
        "here" => format!("yelling [{nick}]"),
        "channel" => format!("YELLING LOUDER [{nick}]"),
        _ => format!("DEAFENING YELL [{nick}]"),
    }
}

/// Drop `*bold*`, `_italic_`, `~strike~` and code fences.
pub fn strip_markup(text: &str) -> String {
    let mut out = CODE_FENCE.replace_all(text, "").into_owned();
    for re in [&*BOLD, &*ITALIC, &*STRIKE] {
        // A match eats the separator after it, so adjacent spans need another pass.
        loop {
            let next = re.replace_all(&out, "$1$2$3");
            if next == out {
                break;
            }
            out = next.into_owned();
        }
    }
    out
}

pub fn decode_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

fn encode_entities(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Non-empty lines of a body; each becomes its own PRIVMSG.
pub fn split_lines(text: &str) -> impl Iterator<Item = &str> {
    text.split('\n')
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.is_empty())
}

/// The announcement shown for a file shared into a conversation.
pub fn file_announcement(file: &SharedFile) -> Vec<String> {
    vec![
        format!("[file upload] {}", file.name),
        format!("{} {} bytes", file.mimetype, file.size),
        file.url.clone(),
    ]
}

/// Render an edit as `s/old/new/`, keeping only the words that changed.
///
/// A pure insertion keeps one neighbouring word so the expression still
/// anchors somewhere. With no previous text there is nothing to diff.
pub fn sed_diff(previous: &str, current: &str) -> String {
    if previous.is_empty() {
        return format!("[edited] {current}");
    }
    let old: Vec<&str> = previous.split(' ').collect();
    let new: Vec<&str> = current.split(' ').collect();

    let mut prefix = old.iter().zip(&new).take_while(|(a, b)| a == b).count();
    let max_suffix = old.len().min(new.len()) - prefix;
    let mut suffix = old
        .iter()
        .rev()
        .zip(new.iter().rev())
        .take(max_suffix)
        .take_while(|(a, b)| a == b)
        .count();

    if prefix == old.len() && prefix == new.len() {
        return format!("s/{previous}/{current}/");
    }
    if old.len() - prefix - suffix == 0 || new.len() - prefix - suffix == 0 {
        if prefix > 0 {
            prefix -= 1;
        } else if suffix > 0 {
            suffix -= 1;
        }
    }
    let old_mid = old[prefix..old.len() - suffix].join(" ");
    let new_mid = new[prefix..new.len() - suffix].join(" ");
    format!("s/{old_mid}/{new_mid}/")
}

// ============================================================================
// Outbound (IRC -> remote)
// ============================================================================

/// Convert an IRC line into the remote's markup.
pub fn outbound_text(text: &str, dialect: Dialect, cache: &IdentityCache) -> String {
    let text = match dialect {
        Dialect::Slack => encode_entities(text)
            .replace("@here", "<!here>")
            .replace("@channel", "<!channel>")
            .replace("@everyone", "<!everyone>"),
        Dialect::Rocket => text
            .replace("@yell", "@channel")
            .replace("@shout", "@channel")
            .replace("@attention", "@channel"),
    };
    text.split(' ')
        .map(|word| link_word(word, dialect, cache))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Turn a bare nick or channel name into a remote mention. URLs are left as typed.
fn link_word(word: &str, dialect: Dialect, cache: &IdentityCache) -> String {
    if word.is_empty() || word.contains("://") {
        return word.to_string();
    }
    let core = word.trim_end_matches(NICK_TRAILERS);
    let rest = &word[core.len()..];
    let bare = core.strip_prefix('@').unwrap_or(core);
    if bare.is_empty() {
        return word.to_string();
    }

    match (cache.lookup_by_irc_name(bare), dialect) {
        (Some(NameTarget::User(id)), Dialect::Slack) => format!("<@{id}>{rest}"),
        (Some(NameTarget::User(id)), Dialect::Rocket) => match cache.user(&id) {
            Some(user) => format!("@{}{rest}", user.display_name),
            None => word.to_string(),
        },
        (Some(NameTarget::Channel(id)), Dialect::Slack) if bare.starts_with('#') => {
            format!("<#{id}>{rest}")
        }
        _ => word.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{ChannelKind, RemoteChannel, RemoteUser};

    fn cache() -> IdentityCache {
        let mut cache = IdentityCache::new();
        let mut me = RemoteUser::new("U0", "me");
        me.is_self = true;
        cache.upsert_user(me);
        cache.upsert_user(RemoteUser::new("U1", "alice"));
        cache.upsert_user(RemoteUser::new("U2", "bob.smith"));
        cache.upsert_channel(RemoteChannel::new("C1", "general", ChannelKind::Public));
        cache
    }

    #[test]
    fn mentions_resolve_to_cached_names() {
        let cache = cache();
        assert_eq!(
            inbound_text("hey <@U1>, see <#C1|general>", Dialect::Slack, &cache),
            "hey alice, see #general"
        );
        assert_eq!(inbound_text("<@U9|ghost> left", Dialect::Slack, &cache), "ghost left");
    }

    #[test]
    fn links_keep_their_labels() {
        let cache = cache();
        assert_eq!(
            inbound_text("<https://example.com/a|the docs>", Dialect::Slack, &cache),
            "https://example.com/a (the docs)"
        );
        assert_eq!(
            inbound_text("<https://example.com/a>", Dialect::Slack, &cache),
            "https://example.com/a"
        );
        assert_eq!(
            inbound_text("<mailto:a@b.io|a@b.io>", Dialect::Slack, &cache),
            "a@b.io"
        );
    }

    #[test]
    fn broadcasts_name_the_local_nick() {
        let cache = cache();
        assert_eq!(inbound_text("<!here> lunch", Dialect::Slack, &cache), "yelling [me] lunch");
        assert_eq!(
            inbound_text("<!channel|channel>", Dialect::Slack, &cache),
            "YELLING LOUDER [me]"
        );
        assert_eq!(inbound_text("<!everyone>", Dialect::Slack, &cache), "DEAFENING YELL [me]");
        assert_eq!(inbound_text("@here now", Dialect::Rocket, &cache), "yelling [me] now");
    }

    #[test]
    fn entities_are_decoded_last() {
        let cache = cache();
        assert_eq!(inbound_text("a &lt;b&gt; &amp;lt;", Dialect::Slack, &cache), "a <b> &lt;");
    }

    #[test]
    fn markup_is_stripped() {
        assert_eq!(strip_markup("*bold* and _it_ ~gone~"), "bold and it gone");
        assert_eq!(strip_markup("```let x = 1;```"), "let x = 1;");
        assert_eq!(strip_markup("snake_case_name stays"), "snake_case_name stays");
        assert_eq!(strip_markup("2*3*4"), "2*3*4");
    }

    #[test]
    fn emoji_in_messages() {
        let cache = cache();
        assert_eq!(inbound_text("done :tada:", Dialect::Slack, &cache), "done 🎉");
    }

    #[test]
    fn outbound_slack_escapes_and_links() {
        let cache = cache();
        assert_eq!(
            outbound_text("alice: a<b & @here", Dialect::Slack, &cache),
            "<@U1>: a&lt;b &amp; <!here>"
        );
        assert_eq!(
            outbound_text("see #general", Dialect::Slack, &cache),
            "see <#C1>"
        );
    }

    #[test]
    fn outbound_skips_urls() {
        let cache = cache();
        assert_eq!(
            outbound_text("https://alice.example/alice", Dialect::Slack, &cache),
            "https://alice.example/alice"
        );
    }

    #[test]
    fn outbound_rocket_uses_usernames() {
        let cache = cache();
        assert_eq!(
            outbound_text("@shout bobsmith, ping", Dialect::Rocket, &cache),
            "@channel @bob.smith, ping"
        );
    }

    #[test]
    fn sed_diff_keeps_the_changed_words() {
        assert_eq!(sed_diff("hello wrold", "hello world"), "s/wrold/world/");
        assert_eq!(sed_diff("a b c d", "a x y d"), "s/b c/x y/");
        assert_eq!(sed_diff("see you", "see you later"), "s/you/you later/");
        assert_eq!(sed_diff("later", "see you later"), "s/later/see you later/");
        assert_eq!(sed_diff("", "brand new"), "[edited] brand new");
    }

    #[test]
    fn lines_and_files() {
        assert_eq!(split_lines("a\n\nb\r\n").collect::<Vec<_>>(), vec!["a", "b"]);
        let file = SharedFile {
            name: "plan.pdf".into(),
            mimetype: "application/pdf".into(),
            size: 1234,
            url: "https://files/plan.pdf".into(),
        };
        assert_eq!(
            file_announcement(&file),
            vec![
                "[file upload] plan.pdf".to_string(),
                "application/pdf 1234 bytes".to_string(),
                "https://files/plan.pdf".to_string()
            ]
        );
    }
}
