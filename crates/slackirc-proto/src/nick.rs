//! Nickname validation and derivation.
//!
//! Remote display names are free-form; IRC nicknames are not. [`sanitize_nick`]
//! turns the former into something every client accepts.

/// Longest nickname the gateway hands out.
pub const NICK_MAX_LEN: usize = 30;

/// Extension trait for checking nickname legality (RFC 2812 grammar).
pub trait NickExt {
    /// `true` when this is a legal nickname of at most [`NICK_MAX_LEN`] bytes.
    ///
    /// ```
    /// use slackirc_proto::NickExt;
    ///
    /// assert!("alice".is_valid_nick());
    /// assert!("[away]".is_valid_nick());
    /// assert!(!"9lives".is_valid_nick());
    /// assert!(!"two words".is_valid_nick());
    /// ```
    fn is_valid_nick(&self) -> bool;
}

/// `[ ] \ ` ^ _ { | }` per RFC 2812.
#[inline]
fn is_special(c: char) -> bool {
    matches!(c, '[' | ']' | '\\' | '`' | '_' | '^' | '{' | '|' | '}')
}

#[inline]
fn is_nick_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || is_special(c) || c == '-'
}

impl NickExt for str {
    fn is_valid_nick(&self) -> bool {
        if self.is_empty() || self.len() > NICK_MAX_LEN {
            return false;
        }
        let mut chars = self.chars();
        match chars.next() {
            Some(first) if first.is_ascii_alphabetic() || is_special(first) => {}
            _ => return false,
        }
        chars.all(is_nick_char)
    }
}

impl NickExt for String {
    fn is_valid_nick(&self) -> bool {
        self.as_str().is_valid_nick()
    }
}

/// Derive a legal nickname from an arbitrary remote name.
///
/// Illegal characters are dropped, a leading digit or hyphen gets a `_` in
/// front, and the result is cut to [`NICK_MAX_LEN`]. Returns `None` when
/// nothing legal is left, so the caller can pick a fallback.
pub fn sanitize_nick(raw: &str) -> Option<String> {
    let mut out: String = raw.chars().filter(|c| is_nick_char(*c)).collect();
    if out.is_empty() {
        return None;
    }
    if out.starts_with(|c: char| c.is_ascii_digit() || c == '-') {
        out.insert(0, '_');
    }
    out.truncate(NICK_MAX_LEN);
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_rfc_nicks() {
        assert!("nick-name".is_valid_nick());
        assert!("`quoted`".is_valid_nick());
        assert!("a".is_valid_nick());
    }

    #[test]
    fn rejects_bad_nicks() {
        assert!(!"".is_valid_nick());
        assert!(!"-dash".is_valid_nick());
        assert!(!"nick@host".is_valid_nick());
        assert!(!"x".repeat(31).is_valid_nick());
    }

    #[test]
    fn sanitize_strips_and_prefixes() {
        assert_eq!(sanitize_nick("john.doe").as_deref(), Some("johndoe"));
        assert_eq!(sanitize_nick("Jane Smith").as_deref(), Some("JaneSmith"));
        assert_eq!(sanitize_nick("42bot").as_deref(), Some("_42bot"));
        assert_eq!(sanitize_nick("-x").as_deref(), Some("_-x"));
        assert_eq!(sanitize_nick("日本"), None);
    }

    #[test]
    fn sanitize_output_is_always_valid() {
        for raw in ["john.doe", "42bot", "a b c", "-x", "über", "x".repeat(40).as_str()] {
            if let Some(nick) = sanitize_nick(raw) {
                assert!(nick.is_valid_nick(), "{raw:?} -> {nick:?}");
            }
        }
    }
}
