//! Channel name validation and derivation.

/// Longest channel name (prefix included) the gateway hands out.
pub const CHANNEL_MAX_LEN: usize = 50;

/// Extension trait for recognising channel names.
pub trait ChannelExt {
    /// `true` when this starts with a channel sigil and contains no space,
    /// comma, BEL or other control character.
    fn is_channel_name(&self) -> bool;
}

#[inline]
fn is_forbidden(c: char) -> bool {
    c == ' ' || c == ',' || c == ':' || c.is_control()
}

impl ChannelExt for str {
    fn is_channel_name(&self) -> bool {
        let mut chars = self.chars();
        if !matches!(chars.next(), Some('#' | '&' | '+' | '!')) {
            return false;
        }
        self.chars().count() <= CHANNEL_MAX_LEN && chars.all(|c| !is_forbidden(c))
    }
}

impl ChannelExt for String {
    fn is_channel_name(&self) -> bool {
        self.as_str().is_channel_name()
    }
}

/// Derive a `#`-prefixed channel name from a remote channel name.
///
/// Returns `None` when no legal character survives.
pub fn sanitize_channel(raw: &str) -> Option<String> {
    let body: String = raw
        .trim_start_matches('#')
        .chars()
        .filter(|c| !is_forbidden(*c))
        .take(CHANNEL_MAX_LEN - 1)
        .collect();
    if body.is_empty() {
        None
    } else {
        Some(format!("#{body}"))
    }
}
