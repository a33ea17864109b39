//! Deriving IRC names from remote names.

use slackirc_proto::chan::{CHANNEL_MAX_LEN, sanitize_channel};
use slackirc_proto::nick::{NICK_MAX_LEN, sanitize_nick};

use super::types::RemoteId;

/// Base nickname for a user, before collision handling.
///
/// Falls back to the remote id, then to `user`, when the display name has
/// nothing IRC-legal in it.
pub fn base_nick(display_name: &str, id: &RemoteId) -> String {
    sanitize_nick(display_name)
        .or_else(|| sanitize_nick(id.as_str()))
        .unwrap_or_else(|| "user".to_string())
}

/// Base channel name (with `#`), before collision handling.
pub fn base_channel(name: &str, id: &RemoteId) -> String {
    sanitize_channel(name)
        .or_else(|| sanitize_channel(id.as_str()))
        .unwrap_or_else(|| "#channel".to_string())
}

/// `base` with a numeric suffix, cutting `base` so the result still fits.
pub fn with_suffix(base: &str, n: u32, max_len: usize) -> String {
    let suffix = n.to_string();
    let keep = max_len.saturating_sub(suffix.len());
    let mut cut = base.len().min(keep);
    while !base.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}{}", &base[..cut], suffix)
}

pub fn nick_with_suffix(base: &str, n: u32) -> String {
    with_suffix(base, n, NICK_MAX_LEN)
}

pub fn channel_with_suffix(base: &str, n: u32) -> String {
    with_suffix(base, n, CHANNEL_MAX_LEN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_through_id() {
        assert_eq!(base_nick("john.doe", &"U1".into()), "johndoe");
        assert_eq!(base_nick("😀", &"U0ABC".into()), "U0ABC");
        assert_eq!(base_nick("😀", &"😀".into()), "user");
        assert_eq!(base_channel("dev ops", &"C1".into()), "#devops");
        assert_eq!(base_channel("", &"".into()), "#channel");
    }

    #[test]
    fn suffix_fits_length() {
        assert_eq!(nick_with_suffix("alice", 2), "alice2");
        let long = "a".repeat(30);
        let n = nick_with_suffix(&long, 12);
        assert_eq!(n.len(), 30);
        assert!(n.ends_with("12"));
    }

    #[test]
    fn suffix_respects_char_boundaries() {
        let name = format!("#{}", "é".repeat(30));
        let out = channel_with_suffix(&name, 7);
        assert!(out.len() <= 50);
        assert!(out.ends_with('7'));
    }
}
