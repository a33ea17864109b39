//! Configuration validation.
//!
//! Validates configuration at startup to catch common errors early.

use super::types::{BackendKind, Config, Credentials};
use thiserror::Error;

/// Validation errors for configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("listen address {0} is not loopback; set listen.allow_non_loopback (or OVERRIDE_LOCAL_IP) to allow it")]
    NonLoopbackListen(String),
    #[error("backend token is empty")]
    EmptyToken,
    #[error("xoxc- tokens need the d= session cookie (backend.cookie, cookie_file or COOKIE)")]
    CookieRequired,
    #[error("backend.url is required for rocketchat")]
    MissingRocketUrl,
    #[error("reconnect.max_attempts must be at least 1")]
    ZeroAttempts,
    #[error("gateway.sendq must be at least 16, got {0}")]
    SendqTooSmall(usize),
    #[error("gateway.server_name is required")]
    MissingServerName,
}

/// Validate a configuration and its resolved credentials, returning all
/// errors found.
pub fn validate(config: &Config, credentials: &Credentials) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let addr = config.listen.address;
    if !addr.ip().is_loopback() && !config.listen.allow_non_loopback {
        errors.push(ValidationError::NonLoopbackListen(addr.to_string()));
    }

    if credentials.token.is_empty() {
        errors.push(ValidationError::EmptyToken);
    }
    if config.backend.kind == BackendKind::Slack
        && credentials.token.expose().starts_with("xoxc-")
        && credentials.cookie.as_ref().is_none_or(|c| c.is_empty())
    {
        errors.push(ValidationError::CookieRequired);
    }
    if config.backend.kind == BackendKind::RocketChat && config.backend.url.is_none() {
        errors.push(ValidationError::MissingRocketUrl);
    }

    if config.reconnect.max_attempts == 0 {
        errors.push(ValidationError::ZeroAttempts);
    }
    if config.gateway.sendq < 16 {
        errors.push(ValidationError::SendqTooSmall(config.gateway.sendq));
    }
    if config.gateway.server_name.trim().is_empty() {
        errors.push(ValidationError::MissingServerName);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Secret;

    fn creds(token: &str, cookie: Option<&str>) -> Credentials {
        Credentials {
            token: Secret::new(token),
            cookie: cookie.map(Secret::new),
        }
    }

    #[test]
    fn defaults_pass() {
        assert!(validate(&Config::default(), &creds("xoxp-1", None)).is_ok());
    }

    #[test]
    fn non_loopback_needs_override() {
        let mut config = Config::default();
        config.listen.address = "0.0.0.0:9007".parse().unwrap();
        let errors = validate(&config, &creds("xoxp-1", None)).unwrap_err();
        assert_eq!(errors, vec![ValidationError::NonLoopbackListen("0.0.0.0:9007".into())]);

        config.listen.allow_non_loopback = true;
        assert!(validate(&config, &creds("xoxp-1", None)).is_ok());
    }

    #[test]
    fn xoxc_needs_cookie() {
        let config = Config::default();
        let errors = validate(&config, &creds("xoxc-1", None)).unwrap_err();
        assert_eq!(errors, vec![ValidationError::CookieRequired]);
        assert!(validate(&config, &creds("xoxc-1", Some("d=abc"))).is_ok());
    }

    #[test]
    fn collects_every_error() {
        let mut config = Config::default();
        config.backend.kind = BackendKind::RocketChat;
        config.reconnect.max_attempts = 0;
        config.gateway.sendq = 1;
        let errors = validate(&config, &creds("  ", None)).unwrap_err();
        assert_eq!(errors.len(), 4);
    }
}
