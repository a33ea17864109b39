//! Environment-variable overrides.
//!
//! Service units for the gateway configure it through the environment, so
//! these names are kept stable: `IP_ADDRESS`, `PORT`, `OVERRIDE_LOCAL_IP`,
//! `TOKEN`, `COOKIE`, `RC_URL`, `AUTOJOIN`, `NOUSERLIST`.

use super::types::{BackendKind, Config, ConfigError, Secret};

fn parse_flag(var: &'static str, value: String) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::Env { var, value }),
    }
}

impl Config {
    /// Apply overrides from `lookup` (normally `std::env::var`).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("IP_ADDRESS") {
            let ip = value
                .trim()
                .parse()
                .map_err(|_| ConfigError::Env { var: "IP_ADDRESS", value: value.clone() })?;
            self.listen.address.set_ip(ip);
        }
        if let Some(value) = lookup("PORT") {
            let port = value
                .trim()
                .parse()
                .map_err(|_| ConfigError::Env { var: "PORT", value: value.clone() })?;
            self.listen.address.set_port(port);
        }
        if let Some(value) = lookup("OVERRIDE_LOCAL_IP") {
            self.listen.allow_non_loopback = parse_flag("OVERRIDE_LOCAL_IP", value)?;
        }
        if let Some(value) = lookup("TOKEN") {
            self.backend.token = Some(Secret::new(value.trim()));
        }
        if let Some(value) = lookup("COOKIE") {
            self.backend.cookie = Some(Secret::new(value.trim()));
        }
        if let Some(value) = lookup("RC_URL").filter(|v| !v.trim().is_empty()) {
            self.backend.kind = BackendKind::RocketChat;
            self.backend.url = Some(value.trim().to_string());
        }
        if let Some(value) = lookup("AUTOJOIN") {
            self.gateway.autojoin = parse_flag("AUTOJOIN", value)?;
        }
        if let Some(value) = lookup("NOUSERLIST") {
            self.gateway.user_list = !parse_flag("NOUSERLIST", value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn overrides_listen_address() {
        let mut config = Config::default();
        config
            .apply_env(env(&[("IP_ADDRESS", "0.0.0.0"), ("PORT", "6667"), ("OVERRIDE_LOCAL_IP", "true")]))
            .unwrap();
        assert_eq!(config.listen.address.to_string(), "0.0.0.0:6667");
        assert!(config.listen.allow_non_loopback);
    }

    #[test]
    fn rc_url_selects_rocketchat() {
        let mut config = Config::default();
        config
            .apply_env(env(&[("RC_URL", "wss://rc.example/websocket"), ("NOUSERLIST", "TRUE")]))
            .unwrap();
        assert_eq!(config.backend.kind, BackendKind::RocketChat);
        assert!(!config.gateway.user_list);
    }

    #[test]
    fn bad_values_are_rejected() {
        let mut config = Config::default();
        assert!(matches!(
            config.apply_env(env(&[("PORT", "ninety")])),
            Err(ConfigError::Env { var: "PORT", .. })
        ));
        assert!(matches!(
            config.apply_env(env(&[("AUTOJOIN", "maybe")])),
            Err(ConfigError::Env { var: "AUTOJOIN", .. })
        ));
    }
}
