//! `:shortcode:` to unicode for the emoji people actually type.
//!
//! Unknown codes are left alone, colons included.

use regex::{Captures, Regex};
use std::borrow::Cow;
use std::sync::LazyLock;

static SHORTCODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r":([a-z0-9_+\-]+):").expect("static regex is valid"));

fn lookup(code: &str) -> Option<&'static str> {
    Some(match code {
        "smile" | "smiley" => "😄",
        "grinning" => "😀",
        "grin" => "😁",
        "joy" => "😂",
        "rofl" | "rolling_on_the_floor_laughing" => "🤣",
        "laughing" | "satisfied" => "😆",
        "sweat_smile" => "😅",
        "wink" => "😉",
        "blush" => "😊",
        "slightly_smiling_face" => "🙂",
        "upside_down_face" => "🙃",
        "heart_eyes" => "😍",
        "kissing_heart" => "😘",
        "stuck_out_tongue" => "😛",
        "stuck_out_tongue_winking_eye" => "😜",
        "thinking_face" | "thinking" => "🤔",
        "neutral_face" => "😐",
        "expressionless" => "😑",
        "unamused" => "😒",
        "roll_eyes" | "face_with_rolling_eyes" => "🙄",
        "grimacing" => "😬",
        "relieved" => "😌",
        "pensive" => "😔",
        "sleepy" => "😪",
        "sleeping" => "😴",
        "sunglasses" => "😎",
        "nerd_face" => "🤓",
        "confused" => "😕",
        "worried" => "😟",
        "slightly_frowning_face" => "🙁",
        "open_mouth" => "😮",
        "astonished" => "😲",
        "flushed" => "😳",
        "scream" => "😱",
        "cry" => "😢",
        "sob" => "😭",
        "angry" => "😠",
        "rage" => "😡",
        "skull" => "💀",
        "poop" | "hankey" | "shit" => "💩",
        "see_no_evil" => "🙈",
        "wave" => "👋",
        "ok_hand" => "👌",
        "+1" | "thumbsup" => "👍",
        "-1" | "thumbsdown" => "👎",
        "clap" => "👏",
        "raised_hands" => "🙌",
        "pray" => "🙏",
        "muscle" => "💪",
        "point_up" => "☝️",
        "eyes" => "👀",
        "heart" => "❤️",
        "broken_heart" => "💔",
        "fire" => "🔥",
        "sparkles" => "✨",
        "star" => "⭐",
        "tada" => "🎉",
        "rocket" => "🚀",
        "100" => "💯",
        "white_check_mark" | "heavy_check_mark" => "✅",
        "x" => "❌",
        "warning" => "⚠️",
        "question" => "❓",
        "exclamation" => "❗",
        "coffee" => "☕",
        "beer" => "🍺",
        "beers" => "🍻",
        "pizza" => "🍕",
        "bug" => "🐛",
        "zap" => "⚡",
        "sun" | "sunny" => "☀️",
        "cloud" => "☁️",
        "umbrella" => "☔",
        "snowflake" => "❄️",
        "wrench" => "🔧",
        "hammer" => "🔨",
        "lock" => "🔒",
        "key" => "🔑",
        "bulb" => "💡",
        "memo" | "pencil" => "📝",
        "calendar" => "📆",
        "hourglass" => "⌛",
        "email" | "envelope" => "✉️",
        "link" => "🔗",
        "shrug" => "🤷",
        "facepalm" | "face_palm" => "🤦",
        _ => return None,
    })
}

/// Replace every known shortcode in `text`.
pub fn replace_shortcodes(text: &str) -> Cow<'_, str> {
    if !text.contains(':') {
        return Cow::Borrowed(text);
    }
    SHORTCODE.replace_all(text, |caps: &Captures<'_>| match lookup(&caps[1]) {
        Some(emoji) => emoji.to_string(),
        None => caps[0].to_string(),
    })
}
